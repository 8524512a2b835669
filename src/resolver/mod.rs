//! Dependency graph resolution.
//!
//! Turns the producer/consumer declarations of a [`ChainBuilder`] into a
//! validated, staged [`DependencyGraph`]. Resolution is pure: nothing here
//! runs a step.
//!
//! [`ChainBuilder`]: crate::core::ChainBuilder

pub mod dump;
pub mod errors;
pub mod graph;

pub use dump::{DumpFormat, GraphDump};
pub use errors::{ChainError, ChainErrors};
pub use graph::{DependencyGraph, EdgeKind, EdgeReason, GraphEdge, Stage};
