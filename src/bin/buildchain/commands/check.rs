//! `buildchain check` command
//!
//! Loads the manifest and computes the graph without running any step.

use anyhow::{bail, Result};

use buildchain::util::Status;

use super::{load_chain, report, select_finals, GlobalArgs};
use crate::cli::CheckArgs;

pub fn execute(global: &GlobalArgs, args: CheckArgs) -> Result<()> {
    let shell = global.shell(false);
    let loaded = load_chain(global, &shell)?;
    let finals = select_finals(&loaded, &args.finals);

    shell.status(Status::Resolving, format!("{} step(s)", loaded.chain.len()));

    let graph = match loaded.chain.graph(&finals) {
        Ok(graph) => graph,
        Err(errors) => {
            report(&shell, &errors.to_diagnostics());
            bail!("chain is invalid ({} error(s))", errors.len());
        }
    };

    shell.status(
        Status::Checked,
        format!(
            "{} step(s) in {} stage(s) [{}]",
            graph.len(),
            graph.stages().len(),
            graph.fingerprint()
        ),
    );

    Ok(())
}
