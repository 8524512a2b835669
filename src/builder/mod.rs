//! Build execution.
//!
//! This module runs a computed dependency graph stage by stage and owns the
//! result context that steps exchange items through.

pub mod context;
pub mod errors;
pub mod events;
pub mod executor;

pub use context::{BuildResult, StepContext};
pub use errors::{BuildFailure, ExecutionError};
pub use events::BuildEvent;
pub use executor::{BuildExecutor, BuildObserver, BuildReport, BuildState, NoopObserver, StepTiming};
