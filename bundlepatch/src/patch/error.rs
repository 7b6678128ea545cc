//! Errors raised while driving the patch pipeline.

use thiserror::Error;

use super::events::InstanceId;
use crate::fetch::FetchError;
use crate::package::PackageError;
use crate::version::VersionError;

/// Result type for patch operations.
pub type PatchResult<T> = Result<T, PatchError>;

/// Failure classes a caller reacts to differently.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Local and remote app versions differ; the app itself must be updated.
    VersionIncompatible,
    /// A fetch or download failed; re-entering the state may succeed.
    NetworkTransient,
    /// A package version or manifest pass was aborted.
    ManifestInconsistent,
    /// Not enough free disk space for the selected group.
    ResourceExhaustion,
    /// Clearing local state during repair kept failing.
    RepairExhaustion,
}

/// Errors from the patch components and the orchestrator.
#[derive(Debug, Error)]
pub enum PatchError {
    /// App version gate could not run.
    #[error("app version check failed: {0}")]
    AppVersion(#[from] VersionError),

    /// Installed app is older than the content line on the server.
    #[error("application update required: local {local}, remote {remote}")]
    VersionIncompatible { local: String, remote: String },

    /// A package could not be initialized.
    #[error("failed to initialize package '{package}': {source}")]
    PackageInit {
        package: String,
        #[source]
        source: PackageError,
    },

    /// A package's latest version could not be fetched.
    #[error("failed to update version of package '{package}': {source}")]
    VersionUpdate {
        package: String,
        #[source]
        source: PackageError,
    },

    /// A package's manifest could not be applied.
    #[error("failed to update manifest of package '{package}': {source}")]
    ManifestUpdate {
        package: String,
        #[source]
        source: PackageError,
    },

    /// The remote patch config could not be fetched.
    #[error("patch config unavailable: {0}")]
    PatchConfigUnavailable(#[source] FetchError),

    /// The remote patch config is malformed.
    #[error("invalid patch config from {source_name}: {reason}")]
    InvalidPatchConfig { source_name: String, reason: String },

    /// A downloader could not be created for a package.
    #[error("failed to create downloader for package '{package}': {source}")]
    CreateDownloader {
        package: String,
        #[source]
        source: PackageError,
    },

    /// Free disk space is below what the selected group needs.
    #[error("not enough disk space: {available_mb} MB available, {required_bytes} bytes required")]
    DiskNotEnoughSpace {
        available_mb: u64,
        required_bytes: u64,
    },

    /// Manifests were requested before every package version resolved.
    #[error("no resolved version for package '{package}'")]
    VersionsUnresolved { package: String },

    /// A package downloader finished in the failed state.
    #[error("download failed for package '{package}'")]
    DownloadFailed { package: String },

    /// The download was canceled.
    #[error("download canceled")]
    Canceled,

    /// Clearing a package during repair failed.
    #[error("repair failed on package '{package}': {source}")]
    RepairFailed {
        package: String,
        #[source]
        source: PackageError,
    },

    /// Another orchestrator already runs under this id.
    #[error("an orchestrator is already registered for instance {0}")]
    InstanceInUse(InstanceId),

    /// The HTTP client could not be constructed.
    #[error("failed to create fetcher: {0}")]
    Fetcher(#[source] FetchError),

    /// The orchestrator task has stopped.
    #[error("orchestrator for instance {0} is not running")]
    Stopped(InstanceId),
}

impl PatchError {
    /// Failure class, for deciding how to react.
    pub fn kind(&self) -> ErrorKind {
        match self {
            PatchError::VersionIncompatible { .. } => ErrorKind::VersionIncompatible,
            PatchError::PackageInit { .. }
            | PatchError::VersionUpdate { .. }
            | PatchError::ManifestUpdate { .. }
            | PatchError::VersionsUnresolved { .. }
            | PatchError::CreateDownloader { .. } => ErrorKind::ManifestInconsistent,
            PatchError::DiskNotEnoughSpace { .. } => ErrorKind::ResourceExhaustion,
            PatchError::RepairFailed { .. } => ErrorKind::RepairExhaustion,
            PatchError::AppVersion(_)
            | PatchError::PatchConfigUnavailable(_)
            | PatchError::Fetcher(_)
            | PatchError::InvalidPatchConfig { .. }
            | PatchError::DownloadFailed { .. }
            | PatchError::Canceled
            | PatchError::InstanceInUse(_)
            | PatchError::Stopped(_) => ErrorKind::NetworkTransient,
        }
    }

    /// Whether the pipeline can be resumed by re-entering the failed state.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self.kind(),
            ErrorKind::VersionIncompatible | ErrorKind::ResourceExhaustion
        )
    }
}
