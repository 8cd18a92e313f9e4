//! fsmon CLI - watch files and directories for changes

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod cmd;
mod output;
mod settings;

/// fsmon - Cross-platform file system change notification
#[derive(Parser)]
#[command(name = "fsmon")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Log backend selection and event flow to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Watch files and directories and print one line per event
    Monitor(cmd::monitor::MonitorArgs),
    /// List backends, their capabilities and which one is selected
    Backends,
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    // stdout carries events only
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Monitor(args) => cmd::monitor::run(args),
        Commands::Backends => cmd::backends::run(),
    }
}
