//! Error types for version gating.

use std::path::PathBuf;

use thiserror::Error;

use crate::fetch::FetchError;

/// Result type for version gating.
pub type VersionResult<T> = Result<T, VersionError>;

/// Errors raised while reading or comparing app configs.
#[derive(Debug, Error)]
pub enum VersionError {
    /// Version string is not `major.minor[.patch]`.
    #[error("invalid app version '{value}': {reason}")]
    InvalidVersion { value: String, reason: String },

    /// App config JSON could not be parsed.
    #[error("invalid app config from {source_name}: {reason}")]
    InvalidConfig { source_name: String, reason: String },

    /// The installation bundle has no app config to seed the sandbox from.
    #[error("installation app config not found at {}", path.display())]
    BundleConfigMissing { path: PathBuf },

    /// Reading or writing the sandbox copy failed.
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The remote app config could not be fetched.
    #[error("remote app config unavailable: {0}")]
    RemoteUnavailable(#[from] FetchError),
}
