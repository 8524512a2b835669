//! Buildchain - a typed, dependency-driven build step chain
//!
//! Steps declare the item types they produce and consume. The chain
//! resolves those declarations into a staged dependency graph, then runs
//! the stages in order with the steps of each stage in parallel, passing
//! items between steps through a shared result context.
//!
//! ```
//! use buildchain::{new_step, run_build, BuildOptions, ChainBuilder};
//!
//! let mut chain = ChainBuilder::new();
//! let greeting = chain.declare_simple::<String>("greeting").unwrap();
//!
//! let key = greeting.clone();
//! let step = new_step("greet")
//!     .produces(&greeting)
//!     .build(move |ctx| Ok(ctx.produce(&key, "hello".to_string())?))
//!     .unwrap();
//! chain.register_step(step).unwrap();
//!
//! let result = run_build(&chain, &[greeting.id().clone()], &BuildOptions::default()).unwrap();
//! assert_eq!(*result.get(&greeting).unwrap(), "hello");
//! ```

pub mod builder;
pub mod core;
pub mod ops;
pub mod resolver;
pub mod util;

pub use crate::builder::{BuildEvent, BuildFailure, BuildResult, ExecutionError, StepContext};
pub use crate::core::{
    new_step, ChainBuilder, Consumption, ItemId, ItemKey, ItemKind, Marker, ProduceFlags,
    Requirement, StepHandle,
};
pub use crate::ops::{run_build, BuildOptions};
pub use crate::resolver::{ChainError, ChainErrors, DependencyGraph};
