//! Build chain configuration errors.
//!
//! These are detected before any step runs. Graph construction collects
//! every problem it finds into a single [`ChainErrors`] so that extension
//! authors can fix them in one pass.

use miette::Diagnostic as MietteDiagnostic;
use thiserror::Error;

use crate::util::diagnostic::{suggestions, Diagnostic};

/// A single configuration error.
#[derive(Debug, Clone, PartialEq, Eq, Error, MietteDiagnostic)]
pub enum ChainError {
    #[error("item `{item}` is already declared as {existing}, not {requested}")]
    #[diagnostic(code(buildchain::chain::duplicate_declaration))]
    DuplicateDeclaration {
        item: String,
        existing: String,
        requested: String,
    },

    #[error("step `{step}` declares `{item}` as produced more than once")]
    #[diagnostic(code(buildchain::chain::duplicate_produces))]
    DuplicateProduces { step: String, item: String },

    #[error("step `{step}` declares `{item}` as consumed more than once")]
    #[diagnostic(code(buildchain::chain::duplicate_consumes))]
    DuplicateConsumes { step: String, item: String },

    #[error("step `{step}` both produces and consumes `{item}`")]
    #[diagnostic(code(buildchain::chain::self_dependency))]
    SelfDependency { step: String, item: String },

    #[error("a step named `{step}` is already registered")]
    #[diagnostic(code(buildchain::chain::duplicate_step))]
    DuplicateStep { step: String },

    #[error("step `{step}` uses item `{item}` which is not declared in this chain")]
    #[diagnostic(
        code(buildchain::chain::unregistered_item),
        help("declare the item on the chain's registry before registering the step")
    )]
    UnregisteredItem { step: String, item: String },

    #[error("initial item `{item}` was supplied more than once")]
    #[diagnostic(code(buildchain::chain::duplicate_initial))]
    DuplicateInitial { item: String },

    #[error("initial value for `{item}` must be {expected}")]
    #[diagnostic(code(buildchain::chain::invalid_initial))]
    InvalidInitial { item: String, expected: &'static str },

    #[error("step `{step}` produces `{item}`, which is supplied as an initial item")]
    #[diagnostic(code(buildchain::chain::initial_item_produced))]
    InitialItemProduced { item: String, step: String },

    #[error("final item `{item}` is not declared")]
    #[diagnostic(code(buildchain::chain::unknown_final_item))]
    UnknownFinalItem { item: String },

    #[error("no producer for required item `{item}` consumed by step `{step}`")]
    #[diagnostic(code(buildchain::chain::unsatisfied_dependency))]
    UnsatisfiedDependency { item: String, step: String },

    #[error("multiple producers of simple item `{item}`: {}", .producers.join(", "))]
    #[diagnostic(code(buildchain::chain::ambiguous_producer))]
    AmbiguousProducer { item: String, producers: Vec<String> },

    #[error("multiple destructive consumers of item `{item}`: {}", .consumers.join(", "))]
    #[diagnostic(code(buildchain::chain::multiple_destructive_consumers))]
    MultipleDestructiveConsumers { item: String, consumers: Vec<String> },

    #[error("cycle detected: {}", .cycle.join(" -> "))]
    #[diagnostic(code(buildchain::chain::cycle))]
    CyclicDependency { cycle: Vec<String> },
}

impl ChainError {
    /// Convert to a user-friendly diagnostic.
    pub fn to_diagnostic(&self) -> Diagnostic {
        match self {
            ChainError::DuplicateDeclaration { item, .. } => Diagnostic::error(self.to_string())
                .with_suggestion(format!("Use a single declaration of `{}` shared by all steps", item)),

            ChainError::DuplicateProduces { step, item }
            | ChainError::DuplicateConsumes { step, item } => Diagnostic::error(self.to_string())
                .with_context(format!("in step `{}`", step))
                .with_suggestion(format!("Remove the repeated declaration of `{}`", item)),

            ChainError::SelfDependency { step, item } => Diagnostic::error(self.to_string())
                .with_suggestion(format!(
                    "Split `{}` into two steps, or introduce a new item type instead of `{}`",
                    step, item
                )),

            ChainError::DuplicateStep { step } => Diagnostic::error(self.to_string())
                .with_suggestion(format!("Rename one of the `{}` steps", step)),

            ChainError::UnregisteredItem { item, .. } => Diagnostic::error(self.to_string())
                .with_suggestion(format!("Declare `{}` before registering the step", item)),

            ChainError::DuplicateInitial { .. } => Diagnostic::error(self.to_string())
                .with_suggestion("Declare the item as multi to supply several values"),

            ChainError::InvalidInitial { item, .. } => Diagnostic::error(self.to_string())
                .with_context(format!("in the `[initial]` entry for `{}`", item)),

            ChainError::InitialItemProduced { item, step } => Diagnostic::error(self.to_string())
                .with_context(format!("`{}` is provided by the caller", item))
                .with_suggestion(format!("Remove the produce declaration from `{}`", step)),

            ChainError::UnknownFinalItem { .. } => Diagnostic::error(self.to_string())
                .with_suggestion(suggestions::LIST_ITEMS),

            ChainError::UnsatisfiedDependency { item, step } => Diagnostic::error(self.to_string())
                .with_context(format!("`{}` requires `{}`", step, item))
                .with_suggestion(format!("Register a step that produces `{}`", item))
                .with_suggestion(format!("Mark the consumption of `{}` as optional", item)),

            ChainError::AmbiguousProducer { item, producers } => {
                let mut diag = Diagnostic::error(format!("multiple producers of `{}`", item));
                for producer in producers {
                    diag = diag.with_context(format!("`{}` produces {}", producer, item));
                }
                diag.with_suggestion(format!("Declare `{}` as a multi item", item))
                    .with_suggestion("Mark all but one producer as overridable")
            }

            ChainError::MultipleDestructiveConsumers { item, consumers } => {
                let mut diag =
                    Diagnostic::error(format!("multiple destructive consumers of `{}`", item));
                for consumer in consumers {
                    diag = diag.with_context(format!("`{}` consumes {} destructively", consumer, item));
                }
                diag.with_suggestion("Make all but one consumption non-destructive")
            }

            ChainError::CyclicDependency { cycle } => Diagnostic::error("cycle detected in build chain")
                .with_context(format!("cycle: {}", cycle.join(" -> ")))
                .with_suggestion("Break the cycle by splitting a step or making a consumption optional")
                .with_suggestion(suggestions::DUMP_GRAPH),
        }
    }
}

/// Every configuration error found while validating a chain.
#[derive(Debug, Clone, PartialEq, Eq, Error, MietteDiagnostic)]
#[error("{}", summarize(.errors))]
#[diagnostic(code(buildchain::chain::invalid))]
pub struct ChainErrors {
    #[related]
    errors: Vec<ChainError>,
}

fn summarize(errors: &[ChainError]) -> String {
    match errors {
        [single] => single.to_string(),
        _ => {
            let mut out = format!("{} build chain configuration errors", errors.len());
            for error in errors {
                out.push_str("\n  - ");
                out.push_str(&error.to_string());
            }
            out
        }
    }
}

impl ChainErrors {
    pub(crate) fn new(errors: Vec<ChainError>) -> Self {
        debug_assert!(!errors.is_empty());
        ChainErrors { errors }
    }

    /// Get the individual errors in detection order.
    pub fn errors(&self) -> &[ChainError] {
        &self.errors
    }

    /// Get the number of errors.
    pub fn len(&self) -> usize {
        self.errors.len()
    }

    /// Always false; an aggregate holds at least one error.
    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// Check whether any of the errors is a cycle.
    pub fn has_cycle(&self) -> bool {
        self.errors
            .iter()
            .any(|e| matches!(e, ChainError::CyclicDependency { .. }))
    }

    /// Convert every error to a diagnostic.
    pub fn to_diagnostics(&self) -> Vec<Diagnostic> {
        self.errors.iter().map(ChainError::to_diagnostic).collect()
    }
}

impl From<ChainError> for ChainErrors {
    fn from(error: ChainError) -> Self {
        ChainErrors::new(vec![error])
    }
}
