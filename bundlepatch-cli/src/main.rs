//! BundlePatch CLI - Command-line interface
//!
//! This binary drives the BundlePatch orchestrator from a terminal: checking
//! for updates, downloading a group, repairing local state and managing the
//! configuration file.

mod commands;
mod error;

use bundlepatch::logging::{default_log_dir, default_log_file, init_logging_with_level};
use clap::{Parser, Subcommand};

use commands::check::CheckArgs;
use commands::config::ConfigCommands;
use commands::repair::RepairArgs;
use error::CliError;

#[derive(Parser)]
#[command(name = "bundlepatch")]
#[command(version, about = "Patch versioned asset-bundle packages", long_about = None)]
struct Cli {
    /// Log at debug level (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check for updates and download the selected group
    Check(CheckArgs),

    /// Clear local package state, then check again
    Repair(RepairArgs),

    /// Manage the configuration file
    #[command(subcommand)]
    Config(ConfigCommands),
}

fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Config(command) => commands::config::run(command),
        Commands::Check(args) => run_async(cli.verbose, commands::check::run(args)),
        Commands::Repair(args) => run_async(cli.verbose, commands::repair::run(args)),
    };

    if let Err(e) = result {
        e.exit();
    }
}

/// Set up logging and a tokio runtime, then run `command` to completion.
fn run_async<F>(verbose: bool, command: F) -> Result<(), CliError>
where
    F: std::future::Future<Output = Result<(), CliError>>,
{
    let level = if verbose { "debug" } else { "warn" };
    let _guard = init_logging_with_level(&default_log_dir(), default_log_file(), level)
        .map_err(|e| CliError::LoggingInit(e.to_string()))?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(CliError::Runtime)?;
    runtime.block_on(command)
}
