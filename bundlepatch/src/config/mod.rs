//! Configuration for patch runs.
//!
//! [`PatchSettings`] is the in-memory configuration handed to the
//! orchestrator. [`ConfigFile`] loads it from `bundlepatch.ini`, starting from
//! defaults and overlaying whatever keys the file sets.

mod file;
mod settings;

pub use file::{config_file_path, ConfigFile, ConfigFileError};
pub use settings::{
    PatchSettings, PlayMode, APP_CONFIG_FILE_NAME, DEFAULT_HTTP_TIMEOUT_SECS,
    DEFAULT_MAX_CONCURRENCY, DEFAULT_MAX_RETRY, DEFAULT_REPAIR_RETRY_BUDGET,
    DEFAULT_STATE_DELAY_MS, PATCH_CONFIG_FILE_NAME,
};
