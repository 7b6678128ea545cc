//! CLI error handling with user-friendly messages.
//!
//! Centralizes error handling for the CLI, providing consistent formatting
//! and appropriate exit codes.

use std::fmt;
use std::process;

use bundlepatch::config::ConfigFileError;
use bundlepatch::patch::PatchError;

/// CLI-specific errors with user-friendly messages.
#[derive(Debug)]
pub enum CliError {
    /// Failed to initialize logging
    LoggingInit(String),
    /// Configuration error
    Config(String),
    /// Failed to start the async runtime
    Runtime(std::io::Error),
    /// The orchestrator rejected a command
    Patch(PatchError),
    /// The pipeline parked on a failure the user chose not to retry
    Failed(String),
    /// The installed application must be updated from the store
    AppOutdated { local: String, remote: String },
    /// An interactive prompt failed
    Prompt(String),
    /// The user canceled the run
    Canceled,
}

impl CliError {
    /// Exit the process with an appropriate error message and code.
    pub fn exit(&self) -> ! {
        eprintln!("Error: {}", self);

        match self {
            CliError::AppOutdated { .. } => {
                eprintln!();
                eprintln!("Install the latest application release, then run the check again.");
                process::exit(3)
            }
            CliError::Failed(_) => {
                eprintln!();
                eprintln!("Run with --verbose or inspect the log file for details:");
                eprintln!(
                    "  {}",
                    bundlepatch::logging::default_log_dir()
                        .join(bundlepatch::logging::default_log_file())
                        .display()
                );
                process::exit(1)
            }
            CliError::Canceled => process::exit(130),
            _ => process::exit(1),
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliError::LoggingInit(msg) => write!(f, "Failed to initialize logging: {}", msg),
            CliError::Config(msg) => write!(f, "Configuration error: {}", msg),
            CliError::Runtime(e) => write!(f, "Failed to start runtime: {}", e),
            CliError::Patch(e) => write!(f, "Patch error: {}", e),
            CliError::Failed(msg) => write!(f, "Patch failed: {}", msg),
            CliError::AppOutdated { local, remote } => write!(
                f,
                "Application version {} is too old, version {} is required",
                local, remote
            ),
            CliError::Prompt(msg) => write!(f, "Prompt failed: {}", msg),
            CliError::Canceled => write!(f, "Canceled"),
        }
    }
}

impl std::error::Error for CliError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CliError::Runtime(e) => Some(e),
            CliError::Patch(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ConfigFileError> for CliError {
    fn from(e: ConfigFileError) -> Self {
        CliError::Config(e.to_string())
    }
}

impl From<PatchError> for CliError {
    fn from(e: PatchError) -> Self {
        CliError::Patch(e)
    }
}
