//! Execution errors and the build failure outcome.

use miette::Diagnostic as MietteDiagnostic;
use thiserror::Error;

use crate::core::item::ItemKind;
use crate::resolver::ChainErrors;
use crate::util::diagnostic::{suggestions, Diagnostic};

/// An error raised while steps are running.
#[derive(Debug, Error, MietteDiagnostic)]
pub enum ExecutionError {
    #[error("step `{step}` failed: {source}")]
    #[diagnostic(code(buildchain::exec::step_failed))]
    StepFailed {
        step: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("step `{step}` panicked: {message}")]
    #[diagnostic(code(buildchain::exec::step_panicked))]
    StepPanicked { step: String, message: String },

    #[error("simple item `{item}` was produced more than once (last by step `{step}`)")]
    #[diagnostic(code(buildchain::exec::duplicate_production))]
    DuplicateProduction { item: String, step: String },

    #[error("step `{reader}` accessed `{item}` after it was consumed by `{consumed_by}`")]
    #[diagnostic(code(buildchain::exec::use_after_consume))]
    UseAfterConsume {
        item: String,
        consumed_by: String,
        reader: String,
    },

    #[error("step `{step}` declared `{item}` as produced but never produced it")]
    #[diagnostic(code(buildchain::exec::unfulfilled_production))]
    UnfulfilledProduction { item: String, step: String },

    #[error("`{reader}` read `{item}` before it was produced")]
    #[diagnostic(code(buildchain::exec::not_yet_produced))]
    NotYetProduced { item: String, reader: String },

    #[error("step `{step}` did not declare `{item}` as {access}")]
    #[diagnostic(code(buildchain::exec::undeclared_access))]
    UndeclaredAccess {
        item: String,
        step: String,
        access: &'static str,
    },

    #[error("item `{item}` is a {actual} item, not {expected}")]
    #[diagnostic(code(buildchain::exec::kind_mismatch))]
    KindMismatch {
        item: String,
        expected: ItemKind,
        actual: ItemKind,
    },

    #[error("item `{item}` does not hold values of type `{expected}`")]
    #[diagnostic(code(buildchain::exec::type_mismatch))]
    ItemTypeMismatch { item: String, expected: &'static str },

    #[error("failed to start worker pool: {message}")]
    #[diagnostic(code(buildchain::exec::worker_pool))]
    WorkerPool { message: String },

    #[error("build executor is already {state}")]
    #[diagnostic(code(buildchain::exec::already_executed))]
    AlreadyExecuted { state: String },

    #[error("internal executor error: {message}")]
    #[diagnostic(code(buildchain::exec::internal))]
    Internal { message: String },
}

impl ExecutionError {
    /// Get the step the error is attributed to, if any.
    pub fn step(&self) -> Option<&str> {
        match self {
            ExecutionError::StepFailed { step, .. }
            | ExecutionError::StepPanicked { step, .. }
            | ExecutionError::DuplicateProduction { step, .. }
            | ExecutionError::UnfulfilledProduction { step, .. }
            | ExecutionError::UndeclaredAccess { step, .. } => Some(step),
            ExecutionError::UseAfterConsume { reader, .. }
            | ExecutionError::NotYetProduced { reader, .. } => Some(reader),
            ExecutionError::KindMismatch { .. }
            | ExecutionError::ItemTypeMismatch { .. }
            | ExecutionError::WorkerPool { .. }
            | ExecutionError::AlreadyExecuted { .. }
            | ExecutionError::Internal { .. } => None,
        }
    }

    /// Convert to a user-friendly diagnostic.
    pub fn to_diagnostic(&self) -> Diagnostic {
        match self {
            ExecutionError::StepFailed { step, source } => {
                let mut diag = Diagnostic::error(format!("step `{}` failed", step));
                for cause in source.chain() {
                    diag = diag.with_context(cause.to_string());
                }
                diag.with_suggestion(suggestions::STEP_FAILED)
            }

            ExecutionError::StepPanicked { step, message } => {
                Diagnostic::error(format!("step `{}` panicked", step))
                    .with_context(message.clone())
                    .with_suggestion("Return an error from the step instead of panicking")
            }

            ExecutionError::DuplicateProduction { item, .. } => Diagnostic::error(self.to_string())
                .with_suggestion(format!("Produce `{}` at most once per build", item))
                .with_suggestion(format!("Declare `{}` as a multi item", item)),

            ExecutionError::UseAfterConsume { consumed_by, reader, .. } => {
                Diagnostic::error(self.to_string())
                    .with_context(format!("`{}` owns the item after consuming it", consumed_by))
                    .with_suggestion(format!("Declare the consumption in `{}`", reader))
            }

            ExecutionError::UnfulfilledProduction { item, step } => {
                Diagnostic::error(self.to_string())
                    .with_suggestion(format!("Produce `{}` from `{}`", item, step))
                    .with_suggestion(format!("Mark the production of `{}` as optional", item))
            }

            ExecutionError::NotYetProduced { item, .. } => Diagnostic::error(self.to_string())
                .with_suggestion(format!("Declare the consumption of `{}` on the step", item))
                .with_suggestion(suggestions::DUMP_GRAPH),

            ExecutionError::UndeclaredAccess { item, step, access } => {
                Diagnostic::error(self.to_string())
                    .with_suggestion(format!("Declare `{}` as {} on `{}`", item, access, step))
            }

            ExecutionError::KindMismatch { .. } | ExecutionError::ItemTypeMismatch { .. } => {
                Diagnostic::error(self.to_string())
                    .with_suggestion("Use the item key returned when the item was declared")
            }

            ExecutionError::WorkerPool { .. } => Diagnostic::error(self.to_string())
                .with_suggestion("Retry with `--jobs 1`"),

            ExecutionError::AlreadyExecuted { .. } => Diagnostic::error(self.to_string())
                .with_context("an executor runs its graph exactly once")
                .with_suggestion("Create a new executor for every build"),

            ExecutionError::Internal { .. } => Diagnostic::error(self.to_string())
                .with_suggestion("Re-run with `--verbose` and report the output"),
        }
    }
}

/// Why a build did not produce a result.
#[derive(Debug, Error, MietteDiagnostic)]
pub enum BuildFailure {
    /// The chain was rejected before any step ran.
    #[error(transparent)]
    #[diagnostic(transparent)]
    Configuration(#[from] ChainErrors),

    /// One or more steps failed at run time.
    #[error("{primary}{}", suppressed_note(.suppressed))]
    #[diagnostic(code(buildchain::build::failed))]
    Execution {
        primary: ExecutionError,
        #[related]
        suppressed: Vec<ExecutionError>,
        /// Steps whose action ran, in execution order.
        executed_steps: Vec<String>,
    },
}

fn suppressed_note(suppressed: &[ExecutionError]) -> String {
    match suppressed.len() {
        0 => String::new(),
        1 => " (and 1 more failure)".to_string(),
        n => format!(" (and {} more failures)", n),
    }
}

impl BuildFailure {
    /// Build an execution failure from errors in detection order.
    pub(crate) fn execution(mut errors: Vec<ExecutionError>, executed_steps: Vec<String>) -> Self {
        let primary = if errors.is_empty() {
            ExecutionError::Internal {
                message: "build failed without an error".to_string(),
            }
        } else {
            errors.remove(0)
        };
        BuildFailure::Execution {
            primary,
            suppressed: errors,
            executed_steps,
        }
    }

    /// Check whether the failure happened before any step ran.
    pub fn is_configuration(&self) -> bool {
        matches!(self, BuildFailure::Configuration(_))
    }

    /// Get the steps that ran before the build failed.
    pub fn executed_steps(&self) -> &[String] {
        match self {
            BuildFailure::Configuration(_) => &[],
            BuildFailure::Execution { executed_steps, .. } => executed_steps,
        }
    }

    /// Get every execution error, primary first.
    pub fn execution_errors(&self) -> Vec<&ExecutionError> {
        match self {
            BuildFailure::Configuration(_) => Vec::new(),
            BuildFailure::Execution {
                primary, suppressed, ..
            } => std::iter::once(primary).chain(suppressed).collect(),
        }
    }

    /// Convert to user-friendly diagnostics, one per underlying error.
    pub fn to_diagnostics(&self) -> Vec<Diagnostic> {
        match self {
            BuildFailure::Configuration(errors) => errors.to_diagnostics(),
            BuildFailure::Execution {
                primary, suppressed, ..
            } => std::iter::once(primary)
                .chain(suppressed)
                .map(ExecutionError::to_diagnostic)
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::ChainError;

    #[test]
    fn test_step_failed_keeps_cause_chain() {
        let source = anyhow::anyhow!("exit status 2").context("running `mvn package`");
        let err = ExecutionError::StepFailed {
            step: "jar".to_string(),
            source,
        };

        assert_eq!(err.to_string(), "step `jar` failed: running `mvn package`");
        let output = err.to_diagnostic().format(false);
        assert!(output.contains("  -> exit status 2"));
        assert_eq!(err.step(), Some("jar"));
    }

    #[test]
    fn test_execution_failure_display() {
        let failure = BuildFailure::execution(
            vec![
                ExecutionError::StepPanicked {
                    step: "a".to_string(),
                    message: "boom".to_string(),
                },
                ExecutionError::StepPanicked {
                    step: "b".to_string(),
                    message: "bang".to_string(),
                },
            ],
            vec!["a".to_string(), "b".to_string()],
        );

        assert_eq!(
            failure.to_string(),
            "step `a` panicked: boom (and 1 more failure)"
        );
        assert_eq!(failure.execution_errors().len(), 2);
        assert_eq!(failure.to_diagnostics().len(), 2);
        assert!(!failure.is_configuration());
    }

    #[test]
    fn test_empty_failure_is_internal() {
        let failure = BuildFailure::execution(Vec::new(), Vec::new());
        let errors = failure.execution_errors();
        assert!(matches!(errors[0], ExecutionError::Internal { .. }));
        assert!(!failure.to_diagnostics()[0].format(false).contains("--jobs"));
    }

    #[test]
    fn test_already_executed_diagnostic() {
        let err = ExecutionError::AlreadyExecuted {
            state: "completed".to_string(),
        };
        assert_eq!(err.to_string(), "build executor is already completed");
        let output = err.to_diagnostic().format(false);
        assert!(output.contains("new executor"));
        assert!(!output.contains("--jobs"));
        assert_eq!(err.step(), None);
    }

    #[test]
    fn test_configuration_failure_is_transparent() {
        let failure: BuildFailure = ChainErrors::from(ChainError::UnknownFinalItem {
            item: "jar".to_string(),
        })
        .into();

        assert!(failure.is_configuration());
        assert_eq!(failure.to_string(), "final item `jar` is not declared");
        assert!(failure.executed_steps().is_empty());
    }

    #[test]
    fn test_kind_mismatch_message() {
        let err = ExecutionError::KindMismatch {
            item: "sources".to_string(),
            expected: ItemKind::Simple,
            actual: ItemKind::Multi,
        };
        assert_eq!(err.to_string(), "item `sources` is a multi item, not simple");
    }
}
