//! Implementation of a build run.
//!
//! Computes the dependency graph for the requested final items and executes
//! it. Configuration errors are reported before any step runs.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::builder::executor::default_jobs;
use crate::builder::{BuildExecutor, BuildFailure, BuildObserver, BuildResult, NoopObserver};
use crate::core::{ChainBuilder, ItemId};
use crate::resolver::{DependencyGraph, GraphDump};
use crate::util::Config;

/// Options for a build run.
#[derive(Debug, Clone)]
pub struct BuildOptions {
    /// Number of parallel workers (None = available parallelism)
    pub jobs: Option<usize>,

    /// Stop a sequential stage at its first failing step
    pub fail_fast: bool,

    /// Write a Graphviz dump of the computed graph here
    pub graph_output: Option<PathBuf>,
}

impl Default for BuildOptions {
    fn default() -> Self {
        BuildOptions {
            jobs: None,
            fail_fast: true,
            graph_output: None,
        }
    }
}

impl BuildOptions {
    /// Take defaults from configuration files.
    pub fn from_config(config: &Config) -> Self {
        BuildOptions {
            jobs: config.build.jobs,
            fail_fast: config.fail_fast(),
            graph_output: config.build.graph_output.clone(),
        }
    }
}

/// Run the steps of `chain` that feed `finals`.
///
/// An empty `finals` slice runs every registered step.
pub fn run_build(
    chain: &ChainBuilder,
    finals: &[ItemId],
    options: &BuildOptions,
) -> Result<BuildResult, BuildFailure> {
    run_build_observed(chain, finals, options, &NoopObserver)
}

/// Like [`run_build`], reporting events to `observer`.
pub fn run_build_observed(
    chain: &ChainBuilder,
    finals: &[ItemId],
    options: &BuildOptions,
    observer: &dyn BuildObserver,
) -> Result<BuildResult, BuildFailure> {
    let graph = chain.graph(finals)?;

    if let Some(path) = &options.graph_output {
        if let Err(e) = write_graph(chain, &graph, path) {
            tracing::warn!("{:#}", e);
        }
    }

    let mut executor = BuildExecutor::new(chain, &graph)
        .jobs(options.jobs.unwrap_or_else(default_jobs))
        .fail_fast(options.fail_fast)
        .observer(observer);
    executor.execute()
}

/// Write the Graphviz dump of `graph` to `path`.
pub fn write_graph(chain: &ChainBuilder, graph: &DependencyGraph, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory: {}", parent.display()))?;
    }

    let dot = GraphDump::new(chain, graph).to_dot();
    std::fs::write(path, dot)
        .with_context(|| format!("failed to write graph to {}", path.display()))?;

    tracing::debug!("wrote build graph to {}", path.display());
    Ok(())
}
