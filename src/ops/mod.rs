//! High-level operations.
//!
//! These implement the entry points used by the command line.

pub mod run_build;

pub use run_build::{run_build, run_build_observed, write_graph, BuildOptions};
