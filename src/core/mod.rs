//! Core data structures for buildchain.
//!
//! This module contains the foundational types of a build chain:
//! - Item types and typed item keys
//! - Step descriptors and their builder
//! - The chain registry steps are registered with
//! - The Chain.toml manifest used by the command line

pub mod chain;
pub mod item;
pub mod manifest;
pub mod step;

pub use chain::{ChainBuilder, StepHandle};
pub use item::{ItemId, ItemKey, ItemKind, ItemRegistry, ItemType, Marker};
pub use manifest::{find_manifest, LoadedChain, ManifestError, ManifestKey, MANIFEST_NAME};
pub use step::{
    new_step, Consume, Consumption, Produce, ProduceFlags, Requirement, StepAction, StepBuilder,
    StepDescriptor,
};
