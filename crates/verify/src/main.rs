use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use irdiff_verify::cancel::CancelToken;
use irdiff_verify::harness::{self, DirArgs, RunArgs};

#[derive(Debug, Parser)]
#[command(
    name = "irdiff-verify",
    about = "Compare program exit codes under a trusted interpreter and an IR round-trip tool"
)]
struct Cli {
    /// Log every tool invocation.
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run named suites from the artifact cache.
    Run(RunArgs),
    /// Run every artifact below a directory.
    Dir(DirArgs),
    /// List the built-in suites.
    List,
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let cancel = CancelToken::new();
    cancel
        .install_ctrlc_handler()
        .context("failed to install interrupt handler")?;

    match cli.command {
        Command::Run(args) => harness::run(args, &cancel),
        Command::Dir(args) => harness::run_dir(args, &cancel),
        Command::List => {
            harness::list();
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}
