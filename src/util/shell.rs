//! Centralized shell output and build progress.
//!
//! The Shell provides a unified API for CLI output:
//! - Status messages with consistent formatting
//! - A step progress bar (via indicatif) driven by build events
//! - JSON-lines output for machine-readable builds
//!
//! Human and JSON output are mutually exclusive. In JSON mode every build
//! event is written to stdout as one JSON object per line and status
//! messages are suppressed.

use std::fmt::Display;
use std::io::{self, IsTerminal, Write};
use std::sync::OnceLock;
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};

use crate::builder::{BuildEvent, BuildObserver};

/// Shell output mode - Human and Json are mutually exclusive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShellMode {
    /// Human-readable output with optional colors and a progress bar.
    Human {
        verbosity: Verbosity,
        color: ColorChoice,
    },
    /// Machine-readable JSON lines only.
    Json,
}

impl Default for ShellMode {
    fn default() -> Self {
        ShellMode::Human {
            verbosity: Verbosity::Normal,
            color: ColorChoice::Auto,
        }
    }
}

/// Output verbosity level (Human mode only).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Verbosity {
    /// --quiet: errors only, no progress
    Quiet,
    /// Default: status messages + progress bar
    #[default]
    Normal,
    /// --verbose: one status line per step instead of a progress bar
    Verbose,
}

/// Color output mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ColorChoice {
    /// Detect TTY and use colors if available.
    #[default]
    Auto,
    /// Always use ANSI colors.
    Always,
    /// Never use ANSI colors.
    Never,
}

/// Status types for output messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    // Success statuses (green)
    Finished,
    Checked,

    // In-progress statuses (cyan)
    Resolving,
    Running,

    // Error status (red)
    Error,
}

impl Status {
    fn as_str(&self) -> &'static str {
        match self {
            Status::Finished => "Finished",
            Status::Checked => "Checked",
            Status::Resolving => "Resolving",
            Status::Running => "Running",
            Status::Error => "error",
        }
    }

    fn color_code(&self) -> &'static str {
        match self {
            Status::Finished | Status::Checked => "\x1b[1;32m",
            Status::Resolving | Status::Running => "\x1b[1;36m",
            Status::Error => "\x1b[1;31m",
        }
    }
}

/// Width statuses are right-aligned to.
const STATUS_WIDTH: usize = 12;

/// Central shell for all CLI output.
#[derive(Debug)]
pub struct Shell {
    mode: ShellMode,
    use_color: bool,
}

impl Shell {
    /// Create a new shell with the given mode.
    pub fn new(mode: ShellMode) -> Self {
        let use_color = match &mode {
            ShellMode::Json => false,
            ShellMode::Human { color, .. } => match color {
                ColorChoice::Auto => io::stderr().is_terminal(),
                ColorChoice::Always => true,
                ColorChoice::Never => false,
            },
        };

        Shell { mode, use_color }
    }

    /// Create a shell from CLI flags with proper precedence.
    ///
    /// JSON mode takes precedence over quiet/verbose.
    pub fn from_flags(
        quiet: bool,
        verbose: bool,
        color: ColorChoice,
        message_format_json: bool,
    ) -> Self {
        let mode = if message_format_json {
            ShellMode::Json
        } else {
            let verbosity = if quiet {
                Verbosity::Quiet
            } else if verbose {
                Verbosity::Verbose
            } else {
                Verbosity::Normal
            };
            ShellMode::Human { verbosity, color }
        };

        Shell::new(mode)
    }

    pub fn is_quiet(&self) -> bool {
        matches!(
            self.mode,
            ShellMode::Human {
                verbosity: Verbosity::Quiet,
                ..
            }
        )
    }

    pub fn is_verbose(&self) -> bool {
        matches!(
            self.mode,
            ShellMode::Human {
                verbosity: Verbosity::Verbose,
                ..
            }
        )
    }

    pub fn is_json(&self) -> bool {
        matches!(self.mode, ShellMode::Json)
    }

    pub fn use_color(&self) -> bool {
        self.use_color
    }

    /// Print a status message.
    ///
    /// Format: `{status:>12} {message}`
    ///
    /// In quiet mode only the Error status is printed. In JSON mode status
    /// messages are dropped; use [`Shell::json_line`] instead.
    pub fn status(&self, status: Status, msg: impl Display) {
        if self.is_json() {
            return;
        }

        if self.is_quiet() && status != Status::Error {
            return;
        }

        eprintln!("{} {}", self.format_status(status), msg);
    }

    /// Print an error message.
    ///
    /// In JSON mode, this outputs a diagnostic event.
    pub fn error(&self, msg: impl Display) {
        if self.is_json() {
            self.json_line(&BuildEvent::diagnostic("error", msg.to_string()).to_json());
        } else {
            self.status(Status::Error, msg);
        }
    }

    /// Write one line of JSON to stdout. Ignored in human mode.
    pub fn json_line(&self, line: &str) {
        if !self.is_json() {
            return;
        }

        let mut stdout = io::stdout().lock();
        let _ = writeln!(stdout, "{}", line);
        let _ = stdout.flush();
    }

    fn format_status(&self, status: Status) -> String {
        let text = status.as_str();

        if self.use_color {
            format!(
                "{}{:>width$}\x1b[0m",
                status.color_code(),
                text,
                width = STATUS_WIDTH
            )
        } else {
            format!("{:>width$}", text, width = STATUS_WIDTH)
        }
    }

    /// Create an observer that reports build events through this shell.
    pub fn build_progress(&self) -> BuildProgress<'_> {
        BuildProgress {
            shell: self,
            pb: OnceLock::new(),
        }
    }
}

impl Default for Shell {
    fn default() -> Self {
        Shell::new(ShellMode::default())
    }
}

/// Build observer that renders events according to the shell mode.
///
/// Normal mode draws a progress bar over the steps of the build, verbose
/// mode prints a line per step, JSON mode forwards every event.
pub struct BuildProgress<'a> {
    shell: &'a Shell,
    pb: OnceLock<ProgressBar>,
}

impl BuildProgress<'_> {
    fn start(&self, total: usize) {
        if self.shell.is_quiet() || self.shell.is_verbose() || self.shell.is_json() || total < 2 {
            return;
        }

        let pb = ProgressBar::new(total as u64);
        let style = ProgressStyle::default_bar()
            .template("{spinner:.green} {msg} [{bar:40.cyan/blue}] {pos}/{len}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-");
        pb.set_style(style);
        let _ = self.pb.set(pb);
    }

    /// Clear the progress bar, if one is drawn.
    pub fn finish(&self) {
        if let Some(pb) = self.pb.get() {
            pb.finish_and_clear();
        }
    }

    fn handle(&self, event: &BuildEvent) {
        if self.shell.is_json() {
            self.shell.json_line(&event.to_json());
            return;
        }

        match event {
            BuildEvent::BuildStarted { steps, .. } => self.start(*steps),
            BuildEvent::StageStarted { stage, steps } => {
                if let Some(pb) = self.pb.get() {
                    pb.set_message(format!("stage {}", stage));
                } else if self.shell.is_verbose() {
                    self.shell
                        .status(Status::Running, format!("stage {} ({})", stage, steps.join(", ")));
                }
            }
            BuildEvent::StepFinished {
                step,
                success,
                duration_ms,
                ..
            } => {
                if let Some(pb) = self.pb.get() {
                    pb.inc(1);
                } else if self.shell.is_verbose() {
                    let outcome = if *success { "ok" } else { "FAILED" };
                    self.shell.status(
                        Status::Running,
                        format!(
                            "{} ... {} ({})",
                            step,
                            outcome,
                            format_duration(Duration::from_millis(*duration_ms))
                        ),
                    );
                }
            }
            BuildEvent::BuildFinished {
                success,
                duration_ms,
                steps_run,
            } => {
                self.finish();
                if *success {
                    self.shell.status(
                        Status::Finished,
                        format!(
                            "{} step(s) in {}",
                            steps_run,
                            format_duration(Duration::from_millis(*duration_ms))
                        ),
                    );
                }
            }
            _ => {}
        }
    }
}

impl BuildObserver for BuildProgress<'_> {
    fn on_event(&self, event: &BuildEvent) {
        self.handle(event);
    }
}

/// Format a duration in a human-readable way.
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs_f64();
    if secs < 60.0 {
        format!("{:.2}s", secs)
    } else {
        format!("{:.1}m", secs / 60.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shell_modes() {
        let shell = Shell::new(ShellMode::Human {
            verbosity: Verbosity::Normal,
            color: ColorChoice::Never,
        });
        assert!(!shell.is_quiet());
        assert!(!shell.is_verbose());
        assert!(!shell.is_json());

        let quiet_shell = Shell::new(ShellMode::Human {
            verbosity: Verbosity::Quiet,
            color: ColorChoice::Never,
        });
        assert!(quiet_shell.is_quiet());

        let json_shell = Shell::new(ShellMode::Json);
        assert!(json_shell.is_json());
        assert!(!json_shell.use_color());
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_millis(500)), "0.50s");
        assert_eq!(format_duration(Duration::from_secs(2)), "2.00s");
        assert_eq!(format_duration(Duration::from_secs(90)), "1.5m");
    }

    #[test]
    fn test_status_formatting() {
        let shell = Shell::new(ShellMode::Human {
            verbosity: Verbosity::Normal,
            color: ColorChoice::Never,
        });

        let formatted = shell.format_status(Status::Checked);
        assert_eq!(formatted.trim(), "Checked");
        assert_eq!(formatted.len(), STATUS_WIDTH);
    }

    #[test]
    fn test_from_flags() {
        let shell = Shell::from_flags(true, false, ColorChoice::Never, false);
        assert!(shell.is_quiet());

        let shell = Shell::from_flags(false, true, ColorChoice::Never, false);
        assert!(shell.is_verbose());

        // JSON takes precedence
        let shell = Shell::from_flags(true, true, ColorChoice::Never, true);
        assert!(shell.is_json());
        assert!(!shell.is_quiet());
    }

    #[test]
    fn test_progress_bar_follows_mode() {
        let started = BuildEvent::started(10, 3, 2);

        let shell = Shell::from_flags(false, false, ColorChoice::Never, false);
        let progress = shell.build_progress();
        progress.on_event(&started);
        assert!(progress.pb.get().is_some());
        progress.finish();

        let shell = Shell::from_flags(false, true, ColorChoice::Never, false);
        let progress = shell.build_progress();
        progress.on_event(&started);
        assert!(progress.pb.get().is_none());

        let shell = Shell::from_flags(true, false, ColorChoice::Never, false);
        let progress = shell.build_progress();
        progress.on_event(&started);
        assert!(progress.pb.get().is_none());
    }
}
