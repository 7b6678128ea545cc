//! Check command - bring every configured package up to date.

use std::path::PathBuf;

use bundlepatch::patch::PatchRegistry;
use clap::Args;

use super::common::{load_config, spawn_app};
use super::session::{drive, SessionOptions};
use crate::error::CliError;

/// Arguments for the check command.
#[derive(Debug, Args)]
pub struct CheckArgs {
    /// Configuration file (defaults to the user config directory)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Download this group instead of asking
    #[arg(long)]
    pub group: Option<String>,

    /// Accept the first offered group and never prompt
    #[arg(short, long)]
    pub yes: bool,
}

/// Run the check command.
pub async fn run(args: CheckArgs) -> Result<(), CliError> {
    let config = load_config(args.config.as_deref())?;
    let registry = PatchRegistry::new();
    let handle = spawn_app(&config, &registry)?;

    println!(
        "Checking {} package(s) in {} mode",
        config.packages.len(),
        config.settings.play_mode.as_str()
    );
    let events = handle.subscribe();
    handle.check()?;

    let options = SessionOptions {
        group: args.group,
        assume_yes: args.yes,
    };
    drive(&handle, events, &options).await
}
