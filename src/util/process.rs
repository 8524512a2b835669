//! Subprocess execution for command steps.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use anyhow::{bail, Context, Result};

/// Builder for a captured subprocess.
///
/// Stdin is closed; stdout and stderr are captured and decoded lossily.
#[derive(Debug, Clone)]
pub struct ProcessBuilder {
    program: String,
    args: Vec<String>,
    env: BTreeMap<String, String>,
    cwd: Option<PathBuf>,
}

/// Captured result of a finished process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code, or None when terminated by a signal.
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

impl ProcessBuilder {
    pub fn new(program: impl Into<String>) -> Self {
        ProcessBuilder {
            program: program.into(),
            args: Vec::new(),
            env: BTreeMap::new(),
            cwd: None,
        }
    }

    /// Run `script` through the platform shell.
    pub fn shell(script: &str) -> Self {
        if cfg!(windows) {
            ProcessBuilder::new("cmd").args(["/C", script])
        } else {
            ProcessBuilder::new("sh").args(["-c", script])
        }
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Set an environment variable for the child.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Set the working directory.
    pub fn cwd(mut self, cwd: impl AsRef<Path>) -> Self {
        self.cwd = Some(cwd.as_ref().to_path_buf());
        self
    }

    /// Wait for the process and capture its output.
    pub fn output(&self) -> Result<CommandOutput> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .envs(&self.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(cwd) = &self.cwd {
            cmd.current_dir(cwd);
        }

        let output = cmd
            .output()
            .with_context(|| format!("failed to spawn `{}`", self.program))?;

        Ok(CommandOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    /// Run to completion and return stdout; a non-zero exit is an error
    /// carrying the child's stderr.
    pub fn run(&self) -> Result<String> {
        let output = self.output()?;
        if !output.success() {
            let code = output
                .code
                .map_or_else(|| "a signal".to_string(), |c| format!("exit code {}", c));
            bail!(
                "`{}` failed with {}\n{}",
                self.display_command(),
                code,
                output.stderr.trim_end()
            );
        }
        Ok(output.stdout)
    }

    /// The command line, for messages.
    pub fn display_command(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_command() {
        let pb = ProcessBuilder::new("make").args(["-j4", "all"]);
        assert_eq!(pb.display_command(), "make -j4 all");
    }

    #[cfg(unix)]
    #[test]
    fn test_shell_with_env() {
        let stdout = ProcessBuilder::shell("printf '%s' \"$GREETING\"")
            .env("GREETING", "hello")
            .run()
            .unwrap();
        assert_eq!(stdout, "hello");
    }

    #[cfg(unix)]
    #[test]
    fn test_run_in_directory() {
        let tmp = tempfile::TempDir::new().unwrap();
        std::fs::write(tmp.path().join("marker.txt"), "here").unwrap();

        let stdout = ProcessBuilder::shell("cat marker.txt")
            .cwd(tmp.path())
            .run()
            .unwrap();
        assert_eq!(stdout, "here");
    }

    #[cfg(unix)]
    #[test]
    fn test_run_reports_exit_code_and_stderr() {
        let err = ProcessBuilder::shell("echo broken >&2; exit 3")
            .run()
            .unwrap_err();
        let message = err.to_string();
        assert!(message.contains("exit code 3"));
        assert!(message.contains("broken"));
    }

    #[cfg(unix)]
    #[test]
    fn test_output_keeps_failure() {
        let output = ProcessBuilder::shell("exit 1").output().unwrap();
        assert!(!output.success());
        assert_eq!(output.code, Some(1));
    }
}
