//! Command implementations

pub mod check;
pub mod completions;
pub mod graph;
pub mod run;

use std::path::PathBuf;

use anyhow::{bail, Context, Result};

use buildchain::core::{find_manifest, LoadedChain};
use buildchain::util::{ColorChoice, Diagnostic, Shell};
use buildchain::ItemId;

use crate::cli::Cli;

/// Flags shared by every subcommand.
pub struct GlobalArgs {
    pub verbose: bool,
    pub quiet: bool,
    pub color: ColorChoice,
    pub manifest: Option<PathBuf>,
}

impl GlobalArgs {
    pub fn from_cli(cli: &Cli) -> Self {
        GlobalArgs {
            verbose: cli.verbose,
            quiet: cli.quiet,
            color: if cli.no_color {
                ColorChoice::Never
            } else {
                ColorChoice::Auto
            },
            manifest: cli.manifest.clone(),
        }
    }

    pub fn shell(&self, json: bool) -> Shell {
        Shell::from_flags(self.quiet, self.verbose, self.color, json)
    }
}

/// Locate and load the chain manifest, reporting problems through `shell`.
pub fn load_chain(global: &GlobalArgs, shell: &Shell) -> Result<LoadedChain> {
    let path = match &global.manifest {
        Some(path) => path.clone(),
        None => {
            let cwd = std::env::current_dir().context("failed to get current directory")?;
            match find_manifest(&cwd) {
                Ok(path) => path,
                Err(e) => {
                    report(shell, &e.to_diagnostics());
                    bail!("could not find a chain manifest");
                }
            }
        }
    };

    tracing::debug!("loading manifest {}", path.display());
    match LoadedChain::load(&path) {
        Ok(loaded) => Ok(loaded),
        Err(e) => {
            report(shell, &e.to_diagnostics());
            bail!("could not load `{}`", path.display());
        }
    }
}

/// Final items from the command line, or the manifest's `[chain] finals`.
pub fn select_finals(loaded: &LoadedChain, requested: &[String]) -> Vec<ItemId> {
    if requested.is_empty() {
        loaded.finals.clone()
    } else {
        requested.iter().map(ItemId::new).collect()
    }
}

/// Print diagnostics to stderr, or as diagnostic events in JSON mode.
pub fn report(shell: &Shell, diagnostics: &[Diagnostic]) {
    for diagnostic in diagnostics {
        if shell.is_json() {
            let event = buildchain::BuildEvent::diagnostic(
                diagnostic.severity.to_string(),
                diagnostic.format(false).trim_end(),
            );
            shell.json_line(&event.to_json());
        } else {
            eprint!("{}", diagnostic.format(shell.use_color()));
        }
    }
}
