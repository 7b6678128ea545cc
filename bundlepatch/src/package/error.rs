//! Error types for package operations.

use std::path::PathBuf;

use thiserror::Error;

use crate::fetch::FetchError;

/// Result type for package operations.
pub type PackageResult<T> = Result<T, PackageError>;

/// Errors raised by a package or its downloaders.
#[derive(Debug, Error)]
pub enum PackageError {
    /// The package has not been initialised.
    #[error("package {package} is not initialized")]
    NotInitialized { package: String },

    /// No manifest has been applied yet.
    #[error("package {package} has no manifest loaded")]
    ManifestNotLoaded { package: String },

    /// No host server is configured for a networked package.
    #[error("package {package} has no host server")]
    NoHostServer { package: String },

    /// The latest version could not be fetched from any host.
    #[error("failed to update version of {package}: {reason}")]
    VersionUnavailable { package: String, reason: String },

    /// The manifest for a version could not be fetched from any host.
    #[error("failed to fetch manifest {version} of {package}: {reason}")]
    ManifestUnavailable {
        package: String,
        version: String,
        reason: String,
    },

    /// Manifest JSON did not parse or did not describe this package.
    #[error("invalid manifest for {package}: {reason}")]
    InvalidManifest { package: String, reason: String },

    /// Downloaded content does not match the manifest hash.
    #[error("checksum mismatch for {file}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        file: String,
        expected: String,
        actual: String,
    },

    /// Filesystem error in the sandbox.
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Transfer error.
    #[error(transparent)]
    Fetch(#[from] FetchError),
}

impl PackageError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
