//! Build event types for JSON output.
//!
//! These events are emitted when using `--message-format=json`, one JSON
//! object per line.
//!
//! # Event Types
//!
//! - `build-started`: The graph was computed and execution begins
//! - `stage-started`: A stage of independent steps is about to run
//! - `step-started`: A step action was dispatched
//! - `step-finished`: A step action returned (success or failure)
//! - `build-finished`: Build completed (success or failure)
//! - `diagnostic`: A configuration or execution error
//!
//! # Stability
//!
//! New fields may be added, but existing fields should not be removed or renamed.

use serde::Serialize;

/// A build event emitted during execution.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "reason")]
pub enum BuildEvent {
    /// Execution begins.
    #[serde(rename = "build-started")]
    BuildStarted {
        /// Number of steps that will run
        steps: usize,
        /// Number of stages
        stages: usize,
        /// Worker pool size
        jobs: usize,
    },

    /// A stage is about to run.
    #[serde(rename = "stage-started")]
    StageStarted {
        stage: usize,
        /// Step names in dispatch order
        steps: Vec<String>,
    },

    /// A step action was dispatched.
    #[serde(rename = "step-started")]
    StepStarted { step: String, stage: usize },

    /// A step action returned.
    #[serde(rename = "step-finished")]
    StepFinished {
        step: String,
        stage: usize,
        success: bool,
        duration_ms: u64,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },

    /// Build completed (success or failure).
    #[serde(rename = "build-finished")]
    BuildFinished {
        success: bool,
        duration_ms: u64,
        /// Number of step actions that ran
        steps_run: usize,
    },

    /// A generic diagnostic message.
    #[serde(rename = "diagnostic")]
    Diagnostic {
        /// Severity level ("error", "warning", "note")
        level: String,
        message: String,
    },
}

impl BuildEvent {
    /// Create a build started event.
    pub fn started(steps: usize, stages: usize, jobs: usize) -> Self {
        BuildEvent::BuildStarted {
            steps,
            stages,
            jobs,
        }
    }

    /// Create a stage started event.
    pub fn stage(stage: usize, steps: Vec<String>) -> Self {
        BuildEvent::StageStarted { stage, steps }
    }

    /// Create a step started event.
    pub fn step_started(step: impl Into<String>, stage: usize) -> Self {
        BuildEvent::StepStarted {
            step: step.into(),
            stage,
        }
    }

    /// Create a step finished event.
    pub fn step_finished(
        step: impl Into<String>,
        stage: usize,
        duration_ms: u64,
        error: Option<String>,
    ) -> Self {
        BuildEvent::StepFinished {
            step: step.into(),
            stage,
            success: error.is_none(),
            duration_ms,
            error,
        }
    }

    /// Create a build finished event.
    pub fn finished(success: bool, duration_ms: u64, steps_run: usize) -> Self {
        BuildEvent::BuildFinished {
            success,
            duration_ms,
            steps_run,
        }
    }

    /// Create a diagnostic event.
    pub fn diagnostic(level: impl Into<String>, message: impl Into<String>) -> Self {
        BuildEvent::Diagnostic {
            level: level.into(),
            message: message.into(),
        }
    }

    /// Serialize this event to a JSON string.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_started_serialization() {
        let json = BuildEvent::started(4, 3, 8).to_json();
        assert!(json.contains("\"reason\":\"build-started\""));
        assert!(json.contains("\"steps\":4"));
        assert!(json.contains("\"jobs\":8"));
    }

    #[test]
    fn test_step_finished_serialization() {
        let ok = BuildEvent::step_finished("compile", 1, 12, None).to_json();
        assert!(ok.contains("\"reason\":\"step-finished\""));
        assert!(ok.contains("\"success\":true"));
        assert!(!ok.contains("\"error\""));

        let failed =
            BuildEvent::step_finished("compile", 1, 12, Some("exit status 1".into())).to_json();
        assert!(failed.contains("\"success\":false"));
        assert!(failed.contains("\"error\":\"exit status 1\""));
    }

    #[test]
    fn test_finished_serialization() {
        let json = BuildEvent::finished(true, 2340, 5).to_json();
        assert!(json.contains("\"reason\":\"build-finished\""));
        assert!(json.contains("\"duration_ms\":2340"));
        assert!(json.contains("\"steps_run\":5"));
    }

    #[test]
    fn test_stage_serialization() {
        let json = BuildEvent::stage(0, vec!["a".into(), "b".into()]).to_json();
        assert_eq!(
            json,
            r#"{"reason":"stage-started","stage":0,"steps":["a","b"]}"#
        );
    }
}
