//! Step registry.
//!
//! A [`ChainBuilder`] is the explicit registry of item types, build steps and
//! caller-supplied initial items for one build session. It is populated by
//! registration code before the build starts and is never mutated by a
//! running build.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::core::item::{ItemId, ItemKey, ItemKind, ItemRegistry, ItemType, ItemValue, Marker};
use crate::core::step::StepDescriptor;
use crate::resolver::{ChainError, ChainErrors, DependencyGraph};

/// Handle to a registered step; the value is the registration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StepHandle(usize);

impl StepHandle {
    /// Get the registration index of this step.
    pub fn index(&self) -> usize {
        self.0
    }
}

/// An item supplied by the caller before any step runs.
#[derive(Debug, Clone)]
pub(crate) struct InitialItem {
    pub item: ItemType,
    pub values: Vec<ItemValue>,
}

/// Registry of steps and items making up a build chain.
#[derive(Debug, Clone, Default)]
pub struct ChainBuilder {
    items: ItemRegistry,
    steps: Vec<StepDescriptor>,
    names: BTreeMap<String, StepHandle>,
    initial: BTreeMap<ItemId, InitialItem>,
}

impl ChainBuilder {
    /// Create an empty chain.
    pub fn new() -> Self {
        ChainBuilder::default()
    }

    /// Create a chain over an existing item registry.
    pub fn with_items(items: ItemRegistry) -> Self {
        ChainBuilder {
            items,
            ..ChainBuilder::default()
        }
    }

    /// Get the item registry.
    pub fn items(&self) -> &ItemRegistry {
        &self.items
    }

    /// Declare a simple item type.
    pub fn declare_simple<T: Send + Sync + 'static>(
        &mut self,
        name: impl AsRef<str>,
    ) -> Result<ItemKey<T>, ChainError> {
        self.items.declare_simple(name)
    }

    /// Declare a multi item type.
    pub fn declare_multi<T: Send + Sync + 'static>(
        &mut self,
        name: impl AsRef<str>,
    ) -> Result<ItemKey<T>, ChainError> {
        self.items.declare_multi(name)
    }

    /// Declare a marker item type.
    pub fn declare_marker(&mut self, name: impl AsRef<str>) -> Result<ItemKey<Marker>, ChainError> {
        self.items.declare_marker(name)
    }

    /// Register a step with the chain.
    ///
    /// Every item the step produces or consumes must already be declared
    /// with the same kind, and step names must be unique.
    pub fn register_step(&mut self, step: StepDescriptor) -> Result<StepHandle, ChainErrors> {
        let mut errors = Vec::new();

        if self.names.contains_key(step.name()) {
            errors.push(ChainError::DuplicateStep {
                step: step.name().to_string(),
            });
        }

        let declared = step
            .produces()
            .iter()
            .map(|p| &p.item)
            .chain(step.consumes().iter().map(|c| &c.item));
        for item in declared {
            if !self.items.is_declared(item) {
                errors.push(ChainError::UnregisteredItem {
                    step: step.name().to_string(),
                    item: item.id().to_string(),
                });
            }
        }

        if !errors.is_empty() {
            return Err(ChainErrors::new(errors));
        }

        let handle = StepHandle(self.steps.len());
        tracing::debug!("registered step `{}` as #{}", step.name(), handle.0);
        self.names.insert(step.name().to_string(), handle);
        self.steps.push(step);
        Ok(handle)
    }

    /// Supply an initial value for an item before the build starts.
    ///
    /// Multi items accept any number of initial values; simple and marker
    /// items accept one.
    pub fn add_initial<T: Send + Sync + 'static>(
        &mut self,
        key: &ItemKey<T>,
        value: T,
    ) -> Result<(), ChainError> {
        if !self.items.is_declared(key.item_type()) {
            return Err(ChainError::UnregisteredItem {
                step: "<initial>".to_string(),
                item: key.id().to_string(),
            });
        }

        let entry = self
            .initial
            .entry(key.id().clone())
            .or_insert_with(|| InitialItem {
                item: key.item_type().clone(),
                values: Vec::new(),
            });

        if key.kind() != ItemKind::Multi && !entry.values.is_empty() {
            return Err(ChainError::DuplicateInitial {
                item: key.id().to_string(),
            });
        }

        entry.values.push(Arc::new(value));
        Ok(())
    }

    /// Check whether an item is supplied by the caller.
    pub fn is_initial(&self, id: &ItemId) -> bool {
        self.initial.contains_key(id)
    }

    pub(crate) fn initial_items(&self) -> impl Iterator<Item = &InitialItem> {
        self.initial.values()
    }

    /// Get all registered steps in registration order.
    pub fn steps(&self) -> &[StepDescriptor] {
        &self.steps
    }

    /// Iterate over steps with their handles.
    pub fn iter_steps(&self) -> impl Iterator<Item = (StepHandle, &StepDescriptor)> {
        self.steps
            .iter()
            .enumerate()
            .map(|(i, step)| (StepHandle(i), step))
    }

    /// Get a step by handle.
    pub fn step(&self, handle: StepHandle) -> Option<&StepDescriptor> {
        self.steps.get(handle.0)
    }

    /// Look up a step handle by name.
    pub fn handle_of(&self, name: &str) -> Option<StepHandle> {
        self.names.get(name).copied()
    }

    /// Get the number of registered steps.
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Check if no steps are registered.
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Compute the dependency graph for the given final items.
    ///
    /// An empty `finals` slice keeps every registered step.
    pub fn graph(&self, finals: &[ItemId]) -> Result<DependencyGraph, ChainErrors> {
        DependencyGraph::build(self, finals)
    }
}
