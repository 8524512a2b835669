//! CLI definitions using clap.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use clap_complete::Shell;

use buildchain::resolver::DumpFormat;

/// Buildchain - run a chain of typed build steps declared in Chain.toml
#[derive(Parser)]
#[command(name = "buildchain")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Only print errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,

    /// Path to Chain.toml (defaults to searching the current directory and its parents)
    #[arg(long, global = true, value_name = "PATH", env = "BUILDCHAIN_MANIFEST")]
    pub manifest: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Validate the chain without running any step
    Check(CheckArgs),

    /// Print the computed dependency graph
    Graph(GraphArgs),

    /// Run the steps needed for the final items
    Run(RunArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

#[derive(Args)]
pub struct CheckArgs {
    /// Final item to build (repeatable; defaults to `[chain] finals`)
    #[arg(long = "final", value_name = "ITEM")]
    pub finals: Vec<String>,
}

#[derive(Args)]
pub struct GraphArgs {
    /// Output format: text, json, or dot
    #[arg(long, default_value = "text", value_parser = parse_dump_format)]
    pub format: DumpFormat,

    /// Final item to build (repeatable; defaults to `[chain] finals`)
    #[arg(long = "final", value_name = "ITEM")]
    pub finals: Vec<String>,
}

#[derive(Args)]
pub struct RunArgs {
    /// Final item to build (repeatable; defaults to `[chain] finals`)
    #[arg(long = "final", value_name = "ITEM")]
    pub finals: Vec<String>,

    /// Number of parallel jobs (defaults to available parallelism)
    #[arg(short, long)]
    pub jobs: Option<usize>,

    /// Write a Graphviz dump of the computed graph to this path
    #[arg(long, value_name = "PATH")]
    pub graph_output: Option<PathBuf>,

    /// Keep running the steps of a stage after one of them fails
    #[arg(long)]
    pub no_fail_fast: bool,

    /// Output format for build messages
    #[arg(long, value_enum, default_value_t = MessageFormat::Human)]
    pub message_format: MessageFormat,
}

/// Output format for `buildchain run`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum MessageFormat {
    /// Progress bar and status lines on stderr
    Human,
    /// One JSON event per line on stdout
    Json,
}

#[derive(Args)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    #[arg(value_enum)]
    pub shell: Shell,
}

fn parse_dump_format(s: &str) -> Result<DumpFormat, String> {
    s.parse()
}
