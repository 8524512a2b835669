//! `buildchain graph` command

use anyhow::{bail, Result};

use buildchain::resolver::GraphDump;

use super::{load_chain, report, select_finals, GlobalArgs};
use crate::cli::GraphArgs;

pub fn execute(global: &GlobalArgs, args: GraphArgs) -> Result<()> {
    let shell = global.shell(false);
    let loaded = load_chain(global, &shell)?;
    let finals = select_finals(&loaded, &args.finals);

    let graph = match loaded.chain.graph(&finals) {
        Ok(graph) => graph,
        Err(errors) => {
            report(&shell, &errors.to_diagnostics());
            bail!("chain is invalid ({} error(s))", errors.len());
        }
    };

    let dump = GraphDump::new(&loaded.chain, &graph);
    let out = dump.render(args.format);
    if out.ends_with('\n') {
        print!("{}", out);
    } else {
        println!("{}", out);
    }

    Ok(())
}
