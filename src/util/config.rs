//! Configuration file support for buildchain.
//!
//! Two configuration file locations are read:
//! - Global: `~/.buildchain/config.toml` - User-wide defaults
//! - Project: `.buildchain/config.toml` - Project-specific overrides
//!
//! Project config takes precedence over global config.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Buildchain configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Build settings
    pub build: BuildConfig,
}

/// Build-related configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildConfig {
    /// Worker pool size (None = available parallelism)
    pub jobs: Option<usize>,

    /// Write a Graphviz dump of every computed graph to this path
    pub graph_output: Option<PathBuf>,

    /// Stop a sequential stage at its first failing step
    pub fail_fast: Option<bool>,
}

impl Config {
    /// Load configuration from a file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;

        toml::from_str(&contents)
            .with_context(|| format!("failed to parse config file: {}", path.display()))
    }

    /// Load configuration with fallback to defaults if file doesn't exist.
    pub fn load_or_default(path: &Path) -> Self {
        if path.exists() {
            Self::load(path).unwrap_or_else(|e| {
                tracing::warn!("Failed to load config from {}: {:#}", path.display(), e);
                Self::default()
            })
        } else {
            Self::default()
        }
    }

    /// Merge another config into this one (other takes precedence).
    pub fn merge(&mut self, other: Config) {
        if other.build.jobs.is_some() {
            self.build.jobs = other.build.jobs;
        }
        if other.build.graph_output.is_some() {
            self.build.graph_output = other.build.graph_output;
        }
        if other.build.fail_fast.is_some() {
            self.build.fail_fast = other.build.fail_fast;
        }
    }

    /// Whether sequential stages stop at their first failure. Defaults to true.
    pub fn fail_fast(&self) -> bool {
        self.build.fail_fast.unwrap_or(true)
    }
}

/// Load merged configuration from global and project locations.
///
/// Order of precedence (highest to lowest):
/// 1. Project config (.buildchain/config.toml)
/// 2. Global config (~/.buildchain/config.toml)
/// 3. Defaults
pub fn load_config(global_path: Option<&Path>, project_path: &Path) -> Config {
    let mut config = Config::default();

    if let Some(global_path) = global_path {
        config.merge(Config::load_or_default(global_path));
    }

    config.merge(Config::load_or_default(project_path));

    config
}

/// Get the global buildchain config directory (~/.buildchain).
pub fn global_config_dir() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|b| b.home_dir().join(".buildchain"))
}

/// Get the global config path (~/.buildchain/config.toml).
pub fn global_config_path() -> Option<PathBuf> {
    global_config_dir().map(|dir| dir.join("config.toml"))
}

/// Get the project config path (.buildchain/config.toml).
pub fn project_config_path(project_root: &Path) -> PathBuf {
    project_root.join(".buildchain").join("config.toml")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert!(config.build.jobs.is_none());
        assert!(config.build.graph_output.is_none());
        assert!(config.fail_fast());
    }

    #[test]
    fn test_config_load() {
        let tmp = TempDir::new().unwrap();
        let config_path = tmp.path().join("config.toml");

        std::fs::write(
            &config_path,
            r#"
[build]
jobs = 8
graph_output = "target/chain.dot"
fail_fast = false
"#,
        )
        .unwrap();

        let config = Config::load(&config_path).unwrap();
        assert_eq!(config.build.jobs, Some(8));
        assert_eq!(
            config.build.graph_output,
            Some(PathBuf::from("target/chain.dot"))
        );
        assert!(!config.fail_fast());
    }

    #[test]
    fn test_config_merge() {
        let mut base = Config::default();
        base.build.jobs = Some(4);
        base.build.fail_fast = Some(false);

        let mut override_cfg = Config::default();
        override_cfg.build.jobs = Some(2);

        base.merge(override_cfg);

        assert_eq!(base.build.jobs, Some(2));
        assert_eq!(base.build.fail_fast, Some(false)); // Not overridden
    }

    #[test]
    fn test_invalid_config_falls_back_to_default() {
        let tmp = TempDir::new().unwrap();
        let config_path = tmp.path().join("config.toml");
        std::fs::write(&config_path, "[build\njobs = ").unwrap();

        assert!(Config::load(&config_path).is_err());
        assert_eq!(Config::load_or_default(&config_path), Config::default());
    }

    #[test]
    fn test_load_config_precedence() {
        let tmp = TempDir::new().unwrap();
        let global_path = tmp.path().join("global.toml");
        let project_path = tmp.path().join("project.toml");

        std::fs::write(
            &global_path,
            r#"
[build]
jobs = 16
fail_fast = false
"#,
        )
        .unwrap();
        std::fs::write(
            &project_path,
            r#"
[build]
jobs = 1
"#,
        )
        .unwrap();

        let config = load_config(Some(global_path.as_path()), &project_path);
        assert_eq!(config.build.jobs, Some(1));
        assert!(!config.fail_fast());
    }

    #[test]
    fn test_project_config_path() {
        let path = project_config_path(Path::new("/work/app"));
        assert_eq!(path, PathBuf::from("/work/app/.buildchain/config.toml"));
    }
}
