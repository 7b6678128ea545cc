//! Repair command - clear local package state and check again.

use std::path::PathBuf;

use bundlepatch::patch::PatchRegistry;
use clap::Args;
use console::style;

use super::common::{load_config, spawn_app};
use super::session::{drive, SessionOptions};
use crate::error::CliError;

/// Arguments for the repair command.
#[derive(Debug, Args)]
pub struct RepairArgs {
    /// Configuration file (defaults to the user config directory)
    #[arg(long)]
    pub config: Option<PathBuf>,
}

/// Run the repair command.
pub async fn run(args: RepairArgs) -> Result<(), CliError> {
    let config = load_config(args.config.as_deref())?;
    let registry = PatchRegistry::new();
    let handle = spawn_app(&config, &registry)?;

    println!(
        "{} cached content for {}",
        style("Clearing").yellow().bold(),
        config.packages.join(", ")
    );
    let events = handle.subscribe();
    handle.repair()?;

    drive(&handle, events, &SessionOptions::default()).await
}
