//! Result context and the per-step view of it.
//!
//! The [`ResultContext`] owns every produced item for one build. Running
//! steps only ever see it through a shared reference wrapped in a
//! [`StepContext`]; productions are buffered in the step context and
//! committed by the executor at the stage barrier, which is the only place
//! the result context is mutated. Reads within a stage therefore need no
//! locking, and the borrow checker enforces the barrier.

use std::any::type_name;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::builder::errors::ExecutionError;
use crate::builder::executor::BuildReport;
use crate::core::chain::InitialItem;
use crate::core::item::{ItemId, ItemKey, ItemKind, ItemRegistry, ItemValue, Marker};
use crate::core::step::StepDescriptor;

/// Name used when the caller reads items from a finished build.
const CALLER: &str = "<caller>";

#[derive(Debug)]
struct Bucket {
    kind: ItemKind,
    /// Values from regular producers, in commit order.
    values: Vec<ItemValue>,
    /// Values from overridable producers; visible only when `values` is empty.
    fallback: Vec<ItemValue>,
    consumed_by: Option<String>,
}

impl Bucket {
    fn visible(&self) -> &[ItemValue] {
        if self.values.is_empty() {
            &self.fallback
        } else {
            &self.values
        }
    }
}

/// Store of produced items for one build.
#[derive(Debug)]
pub(crate) struct ResultContext {
    buckets: BTreeMap<ItemId, Bucket>,
}

impl ResultContext {
    /// Create an empty context with one bucket per declared item.
    pub(crate) fn new(items: &ItemRegistry) -> Self {
        let buckets = items
            .iter()
            .map(|ty| {
                let bucket = Bucket {
                    kind: ty.kind(),
                    values: Vec::new(),
                    fallback: Vec::new(),
                    consumed_by: None,
                };
                (ty.id().clone(), bucket)
            })
            .collect();
        ResultContext { buckets }
    }

    /// Store caller-supplied initial values.
    pub(crate) fn seed(&mut self, initial: &InitialItem) {
        if let Some(bucket) = self.buckets.get_mut(initial.item.id()) {
            bucket.values.extend(initial.values.iter().cloned());
        }
    }

    fn bucket(&self, id: &ItemId, reader: &str) -> Result<&Bucket, ExecutionError> {
        let bucket = self
            .buckets
            .get(id)
            .ok_or_else(|| ExecutionError::UndeclaredAccess {
                item: id.to_string(),
                step: reader.to_string(),
                access: "declared",
            })?;

        if let Some(consumer) = &bucket.consumed_by {
            return Err(ExecutionError::UseAfterConsume {
                item: id.to_string(),
                consumed_by: consumer.clone(),
                reader: reader.to_string(),
            });
        }
        Ok(bucket)
    }

    /// Record a produced value.
    ///
    /// A second regular value for a simple item is a duplicate production;
    /// multi values append in call order.
    pub(crate) fn produce(
        &mut self,
        id: &ItemId,
        value: ItemValue,
        overridable: bool,
        producer: &str,
    ) -> Result<(), ExecutionError> {
        let bucket = self
            .buckets
            .get_mut(id)
            .ok_or_else(|| ExecutionError::UndeclaredAccess {
                item: id.to_string(),
                step: producer.to_string(),
                access: "declared",
            })?;

        if let Some(consumer) = &bucket.consumed_by {
            return Err(ExecutionError::UseAfterConsume {
                item: id.to_string(),
                consumed_by: consumer.clone(),
                reader: producer.to_string(),
            });
        }

        let target = if overridable {
            &mut bucket.fallback
        } else {
            &mut bucket.values
        };
        if bucket.kind == ItemKind::Simple && !target.is_empty() {
            return Err(ExecutionError::DuplicateProduction {
                item: id.to_string(),
                step: producer.to_string(),
            });
        }
        target.push(value);
        Ok(())
    }

    /// Get the value of a simple item.
    pub(crate) fn get(&self, id: &ItemId, reader: &str) -> Result<ItemValue, ExecutionError> {
        let bucket = self.bucket(id, reader)?;
        bucket
            .visible()
            .first()
            .cloned()
            .ok_or_else(|| ExecutionError::NotYetProduced {
                item: id.to_string(),
                reader: reader.to_string(),
            })
    }

    /// Get every value of a multi item produced so far.
    pub(crate) fn get_all(&self, id: &ItemId, reader: &str) -> Result<Vec<ItemValue>, ExecutionError> {
        Ok(self.bucket(id, reader)?.visible().to_vec())
    }

    /// Check whether any value of an item is present and not consumed.
    pub(crate) fn is_present(&self, id: &ItemId) -> bool {
        self.buckets
            .get(id)
            .is_some_and(|b| b.consumed_by.is_none() && !b.visible().is_empty())
    }

    /// Remove and return the values of an item, marking it consumed.
    pub(crate) fn take_destructive(
        &mut self,
        id: &ItemId,
        consumer: &str,
    ) -> Result<Vec<ItemValue>, ExecutionError> {
        self.bucket(id, consumer)?;
        let values = match self.buckets.get_mut(id) {
            Some(bucket) => {
                bucket.consumed_by = Some(consumer.to_string());
                let values = std::mem::take(&mut bucket.values);
                let fallback = std::mem::take(&mut bucket.fallback);
                if values.is_empty() {
                    fallback
                } else {
                    values
                }
            }
            None => Vec::new(),
        };
        tracing::debug!("`{}` consumed `{}`", consumer, id);
        Ok(values)
    }

    /// Commit the buffered output of a finished step.
    pub(crate) fn commit(
        &mut self,
        step: &StepDescriptor,
        output: StepOutput,
    ) -> Result<(), ExecutionError> {
        for (id, value) in output.pending {
            let overridable = step
                .produce_of(&id)
                .is_some_and(|p| p.flags.overridable);
            self.produce(&id, value, overridable, step.name())?;
        }

        for consume in step.consumes().iter().filter(|c| c.is_destructive()) {
            // Nothing to consume when an optional item was never produced.
            if self.buckets.get(consume.item.id()).is_some_and(|b| b.consumed_by.is_none()) {
                self.take_destructive(consume.item.id(), step.name())?;
            }
        }
        Ok(())
    }
}

fn downcast<T: Send + Sync + 'static>(id: &ItemId, value: ItemValue) -> Result<Arc<T>, ExecutionError> {
    value
        .downcast::<T>()
        .map_err(|_| ExecutionError::ItemTypeMismatch {
            item: id.to_string(),
            expected: type_name::<T>(),
        })
}

fn downcast_all<T: Send + Sync + 'static>(
    id: &ItemId,
    values: Vec<ItemValue>,
) -> Result<Vec<Arc<T>>, ExecutionError> {
    values.into_iter().map(|v| downcast(id, v)).collect()
}

fn expect_kind<T>(key: &ItemKey<T>, expected: ItemKind) -> Result<(), ExecutionError> {
    if key.kind() == expected {
        Ok(())
    } else {
        Err(ExecutionError::KindMismatch {
            item: key.id().to_string(),
            expected,
            actual: key.kind(),
        })
    }
}

/// Buffered result of one step action.
#[derive(Debug, Default)]
pub(crate) struct StepOutput {
    pub pending: Vec<(ItemId, ItemValue)>,
    pub produced: BTreeMap<ItemId, usize>,
}

/// A running step's view of the build.
///
/// Steps may only read items they declared as consumed and produce items
/// they declared as produced.
pub struct StepContext<'a> {
    step: &'a StepDescriptor,
    results: &'a ResultContext,
    output: StepOutput,
}

impl<'a> StepContext<'a> {
    pub(crate) fn new(step: &'a StepDescriptor, results: &'a ResultContext) -> Self {
        StepContext {
            step,
            results,
            output: StepOutput::default(),
        }
    }

    /// Get the name of the running step.
    pub fn step_name(&self) -> &str {
        self.step.name()
    }

    fn check_consumes<T>(&self, key: &ItemKey<T>) -> Result<bool, ExecutionError> {
        self.step
            .consume_of(key.id())
            .map(|c| c.is_required())
            .ok_or_else(|| ExecutionError::UndeclaredAccess {
                item: key.id().to_string(),
                step: self.step.name().to_string(),
                access: "consumed",
            })
    }

    /// Get a simple item.
    ///
    /// Returns `Ok(None)` when an optionally consumed item was never
    /// produced.
    pub fn get<T: Send + Sync + 'static>(
        &self,
        key: &ItemKey<T>,
    ) -> Result<Option<Arc<T>>, ExecutionError> {
        let required = self.check_consumes(key)?;
        expect_kind(key, ItemKind::Simple)?;

        match self.results.get(key.id(), self.step.name()) {
            Ok(value) => downcast(key.id(), value).map(Some),
            Err(ExecutionError::NotYetProduced { .. }) if !required => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Get a simple item that must be present.
    pub fn require<T: Send + Sync + 'static>(
        &self,
        key: &ItemKey<T>,
    ) -> Result<Arc<T>, ExecutionError> {
        self.get(key)?.ok_or_else(|| ExecutionError::NotYetProduced {
            item: key.id().to_string(),
            reader: self.step.name().to_string(),
        })
    }

    /// Get every instance of a multi item produced so far.
    pub fn get_all<T: Send + Sync + 'static>(
        &self,
        key: &ItemKey<T>,
    ) -> Result<Vec<Arc<T>>, ExecutionError> {
        self.check_consumes(key)?;
        expect_kind(key, ItemKind::Multi)?;
        let values = self.results.get_all(key.id(), self.step.name())?;
        downcast_all(key.id(), values)
    }

    /// Check whether a marker item has been produced.
    pub fn is_present(&self, key: &ItemKey<Marker>) -> Result<bool, ExecutionError> {
        self.check_consumes(key)?;
        expect_kind(key, ItemKind::Marker)?;
        self.results.bucket(key.id(), self.step.name())?;
        Ok(self.results.is_present(key.id()))
    }

    fn check_destructive<T>(&self, key: &ItemKey<T>) -> Result<(), ExecutionError> {
        match self.step.consume_of(key.id()) {
            Some(c) if c.is_destructive() => Ok(()),
            _ => Err(ExecutionError::UndeclaredAccess {
                item: key.id().to_string(),
                step: self.step.name().to_string(),
                access: "destructively consumed",
            }),
        }
    }

    /// Take a destructively consumed simple item.
    ///
    /// The item is removed from the build once this step returns.
    pub fn take<T: Send + Sync + 'static>(
        &self,
        key: &ItemKey<T>,
    ) -> Result<Option<Arc<T>>, ExecutionError> {
        self.check_destructive(key)?;
        self.get(key)
    }

    /// Take every instance of a destructively consumed multi item.
    pub fn take_all<T: Send + Sync + 'static>(
        &self,
        key: &ItemKey<T>,
    ) -> Result<Vec<Arc<T>>, ExecutionError> {
        self.check_destructive(key)?;
        self.get_all(key)
    }

    /// Produce an item.
    ///
    /// Simple items may be produced once per step; multi items any number
    /// of times.
    pub fn produce<T: Send + Sync + 'static>(
        &mut self,
        key: &ItemKey<T>,
        value: T,
    ) -> Result<(), ExecutionError> {
        if self.step.produce_of(key.id()).is_none() {
            return Err(ExecutionError::UndeclaredAccess {
                item: key.id().to_string(),
                step: self.step.name().to_string(),
                access: "produced",
            });
        }

        let count = self.output.produced.entry(key.id().clone()).or_insert(0);
        if key.kind() == ItemKind::Simple && *count > 0 {
            return Err(ExecutionError::DuplicateProduction {
                item: key.id().to_string(),
                step: self.step.name().to_string(),
            });
        }
        *count += 1;

        self.output.pending.push((key.id().clone(), Arc::new(value)));
        Ok(())
    }

    /// Produce a marker item.
    pub fn produce_marker(&mut self, key: &ItemKey<Marker>) -> Result<(), ExecutionError> {
        self.produce(key, Marker)
    }

    pub(crate) fn finish(self) -> StepOutput {
        self.output
    }
}

/// The frozen outcome of a successful build.
#[derive(Debug)]
pub struct BuildResult {
    results: ResultContext,
    finals: Vec<ItemId>,
    report: BuildReport,
}

impl BuildResult {
    pub(crate) fn new(results: ResultContext, finals: Vec<ItemId>, report: BuildReport) -> Self {
        BuildResult {
            results,
            finals,
            report,
        }
    }

    /// Get a simple item.
    pub fn get<T: Send + Sync + 'static>(&self, key: &ItemKey<T>) -> Result<Arc<T>, ExecutionError> {
        expect_kind(key, ItemKind::Simple)?;
        let value = self.results.get(key.id(), CALLER)?;
        downcast(key.id(), value)
    }

    /// Get every instance of a multi item.
    pub fn get_all<T: Send + Sync + 'static>(
        &self,
        key: &ItemKey<T>,
    ) -> Result<Vec<Arc<T>>, ExecutionError> {
        expect_kind(key, ItemKind::Multi)?;
        let values = self.results.get_all(key.id(), CALLER)?;
        downcast_all(key.id(), values)
    }

    /// Check whether an item was produced and is still available.
    pub fn is_present<T>(&self, key: &ItemKey<T>) -> bool {
        self.results.is_present(key.id())
    }

    /// Get the final items the build was run for.
    pub fn finals(&self) -> &[ItemId] {
        &self.finals
    }

    /// Get the execution report.
    pub fn report(&self) -> &BuildReport {
        &self.report
    }
}
