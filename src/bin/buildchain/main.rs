//! Buildchain CLI - run a chain of typed build steps

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

mod cli;
mod commands;

use cli::{Cli, Commands};

fn main() {
    if let Err(e) = run() {
        eprintln!("error: {:#}", e);
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("buildchain=debug")
    } else {
        EnvFilter::new("buildchain=info")
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time()
        .init();

    let global = commands::GlobalArgs::from_cli(&cli);

    match cli.command {
        Commands::Check(args) => commands::check::execute(&global, args),
        Commands::Graph(args) => commands::graph::execute(&global, args),
        Commands::Run(args) => commands::run::execute(&global, args),
        Commands::Completions(args) => commands::completions::execute(args),
    }
}
