//! `buildchain run` command

use anyhow::{bail, Result};

use buildchain::ops::{run_build_observed, BuildOptions};
use buildchain::util::config::{global_config_path, load_config, project_config_path};
use buildchain::BuildFailure;

use super::{load_chain, report, select_finals, GlobalArgs};
use crate::cli::{MessageFormat, RunArgs};

pub fn execute(global: &GlobalArgs, args: RunArgs) -> Result<()> {
    let json = args.message_format == MessageFormat::Json;
    let shell = global.shell(json);
    let loaded = load_chain(global, &shell)?;
    let finals = select_finals(&loaded, &args.finals);

    // Load configuration (global + project); CLI flags override it
    let global_path = global_config_path();
    let config = load_config(global_path.as_deref(), &project_config_path(&loaded.root));

    let mut opts = BuildOptions::from_config(&config);
    if args.jobs.is_some() {
        opts.jobs = args.jobs;
    }
    if args.graph_output.is_some() {
        opts.graph_output = args.graph_output;
    }
    if args.no_fail_fast {
        opts.fail_fast = false;
    }

    let progress = shell.build_progress();
    let outcome = run_build_observed(&loaded.chain, &finals, &opts, &progress);
    progress.finish();

    let result = match outcome {
        Ok(result) => result,
        Err(failure) => {
            report(&shell, &failure.to_diagnostics());
            match failure {
                BuildFailure::Configuration(errors) => {
                    bail!("chain is invalid ({} error(s))", errors.len())
                }
                BuildFailure::Execution { .. } => bail!("build failed"),
            }
        }
    };

    // Print every declared item when the whole chain ran
    let shown: Vec<_> = if finals.is_empty() {
        loaded.keys.keys().cloned().collect()
    } else {
        finals
    };

    if json {
        let items: serde_json::Map<String, serde_json::Value> = shown
            .iter()
            .map(|id| (id.to_string(), loaded.item_value(&result, id)))
            .collect();
        let line = serde_json::json!({ "reason": "items", "items": items });
        shell.json_line(&line.to_string());
    } else {
        for id in &shown {
            println!("{} = {}", id, loaded.item_value(&result, id));
        }
    }

    Ok(())
}
