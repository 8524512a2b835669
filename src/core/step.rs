//! Build step descriptors.
//!
//! A step is a named unit of work that declares which item types it
//! produces and consumes. The declarations are the only thing the graph
//! builder looks at; the action itself is opaque until execution.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;

use crate::builder::StepContext;
use crate::core::item::{ItemId, ItemKey, ItemType};
use crate::resolver::{ChainError, ChainErrors};

/// Whether a consumer needs a producer to exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Requirement {
    /// A missing producer is a configuration error.
    Required,
    /// A missing producer resolves to an absent value at run time.
    Optional,
}

/// Whether consuming an item removes it from the result context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Consumption {
    /// Read access only.
    NonDestructive,
    /// One-time take; no later step may read the item.
    Destructive,
}

/// Flags qualifying a produce declaration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
pub struct ProduceFlags {
    /// The step may finish without producing the item.
    pub optional: bool,
    /// Fallback producer; its value is visible only when no regular value exists.
    pub overridable: bool,
    /// The produce does not pull the step into a pruned graph.
    pub weak: bool,
}

impl ProduceFlags {
    /// No flags set.
    pub const NONE: ProduceFlags = ProduceFlags {
        optional: false,
        overridable: false,
        weak: false,
    };

    /// Set the optional flag.
    pub const fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    /// Set the overridable flag.
    pub const fn overridable(mut self) -> Self {
        self.overridable = true;
        self
    }

    /// Set the weak flag.
    pub const fn weak(mut self) -> Self {
        self.weak = true;
        self
    }
}

/// A produce declaration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Produce {
    pub item: ItemType,
    pub flags: ProduceFlags,
}

/// A consume declaration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Consume {
    pub item: ItemType,
    pub requirement: Requirement,
    pub consumption: Consumption,
}

impl Consume {
    pub fn is_required(&self) -> bool {
        self.requirement == Requirement::Required
    }

    pub fn is_destructive(&self) -> bool {
        self.consumption == Consumption::Destructive
    }
}

/// Executable body of a step.
pub type StepAction = Arc<dyn Fn(&mut StepContext<'_>) -> anyhow::Result<()> + Send + Sync>;

/// A finalized build step.
///
/// Descriptors are cheap to clone and can be registered with any number of
/// chains; the action is shared.
#[derive(Clone)]
pub struct StepDescriptor {
    name: String,
    produces: Vec<Produce>,
    consumes: Vec<Consume>,
    action: StepAction,
}

impl StepDescriptor {
    /// Get the step name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the produce declarations in declaration order.
    pub fn produces(&self) -> &[Produce] {
        &self.produces
    }

    /// Get the consume declarations in declaration order.
    pub fn consumes(&self) -> &[Consume] {
        &self.consumes
    }

    /// Find the produce declaration for an item.
    pub fn produce_of(&self, id: &ItemId) -> Option<&Produce> {
        self.produces.iter().find(|p| p.item.id() == id)
    }

    /// Find the consume declaration for an item.
    pub fn consume_of(&self, id: &ItemId) -> Option<&Consume> {
        self.consumes.iter().find(|c| c.item.id() == id)
    }

    pub(crate) fn action(&self) -> &StepAction {
        &self.action
    }
}

impl fmt::Debug for StepDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StepDescriptor")
            .field("name", &self.name)
            .field("produces", &self.produces)
            .field("consumes", &self.consumes)
            .finish_non_exhaustive()
    }
}

/// Start building a step with the given name.
pub fn new_step(name: impl Into<String>) -> StepBuilder {
    StepBuilder::new(name)
}

/// Builder for [`StepDescriptor`].
///
/// Declaration errors are collected and reported together by
/// [`StepBuilder::build`].
#[derive(Debug)]
pub struct StepBuilder {
    name: String,
    produces: Vec<Produce>,
    consumes: Vec<Consume>,
    errors: Vec<ChainError>,
}

impl StepBuilder {
    /// Create a builder for a step named `name`.
    pub fn new(name: impl Into<String>) -> Self {
        StepBuilder {
            name: name.into(),
            produces: Vec::new(),
            consumes: Vec::new(),
            errors: Vec::new(),
        }
    }

    /// Declare that the step produces `key`.
    pub fn produces<T>(self, key: &ItemKey<T>) -> Self {
        self.produces_with(key, ProduceFlags::NONE)
    }

    /// Declare that the step produces `key` with the given flags.
    pub fn produces_with<T>(mut self, key: &ItemKey<T>, flags: ProduceFlags) -> Self {
        if self.produces.iter().any(|p| p.item.id() == key.id()) {
            self.errors.push(ChainError::DuplicateProduces {
                step: self.name.clone(),
                item: key.id().to_string(),
            });
        } else {
            self.produces.push(Produce {
                item: key.item_type().clone(),
                flags,
            });
        }
        self
    }

    /// Declare that the step consumes `key`.
    pub fn consumes<T>(
        mut self,
        key: &ItemKey<T>,
        requirement: Requirement,
        consumption: Consumption,
    ) -> Self {
        if self.consumes.iter().any(|c| c.item.id() == key.id()) {
            self.errors.push(ChainError::DuplicateConsumes {
                step: self.name.clone(),
                item: key.id().to_string(),
            });
        } else {
            self.consumes.push(Consume {
                item: key.item_type().clone(),
                requirement,
                consumption,
            });
        }
        self
    }

    /// Declare a required, non-destructive consumption of `key`.
    pub fn requires<T>(self, key: &ItemKey<T>) -> Self {
        self.consumes(key, Requirement::Required, Consumption::NonDestructive)
    }

    /// Declare an optional, non-destructive consumption of `key`.
    pub fn optionally<T>(self, key: &ItemKey<T>) -> Self {
        self.consumes(key, Requirement::Optional, Consumption::NonDestructive)
    }

    /// Finalize the step with its action.
    pub fn build<F>(mut self, action: F) -> Result<StepDescriptor, ChainErrors>
    where
        F: Fn(&mut StepContext<'_>) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        for consume in &self.consumes {
            if self.produces.iter().any(|p| p.item.id() == consume.item.id()) {
                self.errors.push(ChainError::SelfDependency {
                    step: self.name.clone(),
                    item: consume.item.id().to_string(),
                });
            }
        }

        if !self.errors.is_empty() {
            return Err(ChainErrors::new(self.errors));
        }

        Ok(StepDescriptor {
            name: self.name,
            produces: self.produces,
            consumes: self.consumes,
            action: Arc::new(action),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::item::ItemRegistry;

    #[test]
    fn test_build_step() {
        let mut items = ItemRegistry::new();
        let x = items.declare_simple::<String>("x").unwrap();
        let y = items.declare_multi::<String>("y").unwrap();

        let step = new_step("compile")
            .requires(&x)
            .produces(&y)
            .build(|_| Ok(()))
            .unwrap();

        assert_eq!(step.name(), "compile");
        assert_eq!(step.produces().len(), 1);
        assert!(step.consume_of(x.id()).unwrap().is_required());
        assert!(step.produce_of(y.id()).is_some());
    }

    #[test]
    fn test_duplicate_produces() {
        let mut items = ItemRegistry::new();
        let x = items.declare_simple::<String>("x").unwrap();

        let err = new_step("twice")
            .produces(&x)
            .produces_with(&x, ProduceFlags::NONE.optional())
            .build(|_| Ok(()))
            .unwrap_err();

        assert!(matches!(
            err.errors()[0],
            ChainError::DuplicateProduces { ref step, .. } if step == "twice"
        ));
    }

    #[test]
    fn test_duplicate_consumes() {
        let mut items = ItemRegistry::new();
        let x = items.declare_simple::<String>("x").unwrap();

        let err = new_step("reader")
            .requires(&x)
            .optionally(&x)
            .build(|_| Ok(()))
            .unwrap_err();

        assert!(matches!(err.errors()[0], ChainError::DuplicateConsumes { .. }));
    }

    #[test]
    fn test_self_dependency_rejected() {
        let mut items = ItemRegistry::new();
        let x = items.declare_multi::<String>("x").unwrap();

        let err = new_step("loop")
            .produces(&x)
            .requires(&x)
            .build(|_| Ok(()))
            .unwrap_err();

        assert!(matches!(err.errors()[0], ChainError::SelfDependency { .. }));
    }

    #[test]
    fn test_errors_are_collected() {
        let mut items = ItemRegistry::new();
        let x = items.declare_simple::<String>("x").unwrap();
        let y = items.declare_simple::<String>("y").unwrap();

        let err = new_step("messy")
            .produces(&x)
            .produces(&x)
            .requires(&y)
            .requires(&y)
            .build(|_| Ok(()))
            .unwrap_err();

        assert_eq!(err.len(), 2);
    }

    #[test]
    fn test_produce_flags() {
        let flags = ProduceFlags::NONE.optional().weak();
        assert!(flags.optional);
        assert!(flags.weak);
        assert!(!flags.overridable);
    }
}
