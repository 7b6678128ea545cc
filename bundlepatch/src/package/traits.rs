//! Package and downloader contracts.
//!
//! Both traits are dyn-compatible: async methods return [`BoxFuture`] so the
//! orchestrator can hold `Arc<dyn PackageHandle>` and
//! `Box<dyn DownloaderHandle>` without knowing the implementation.

use std::fmt;
use std::sync::Arc;

use super::control::DownloadControl;
use super::error::PackageResult;
use super::query::{BuiltinQuery, DeliveryQuery};
use crate::config::PlayMode;
use crate::BoxFuture;

/// Lifecycle of one downloader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloaderState {
    Idle,
    Running,
    Succeeded,
    Failed,
    Canceled,
}

impl DownloaderState {
    pub fn is_finished(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Canceled)
    }
}

/// Absolute progress of a single downloader.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DownloadTick {
    pub total_count: usize,
    pub current_count: usize,
    pub total_bytes: u64,
    pub current_bytes: u64,
}

/// Progress callback, invoked with the downloader's absolute counters.
pub type ProgressCallback = Arc<dyn Fn(DownloadTick) + Send + Sync>;

/// Per-file error callback: `(file_name, error)`.
pub type FileErrorCallback = Arc<dyn Fn(&str, &str) + Send + Sync>;

/// Callbacks attached when a download begins.
#[derive(Clone, Default)]
pub struct DownloadCallbacks {
    pub on_progress: Option<ProgressCallback>,
    pub on_file_error: Option<FileErrorCallback>,
}

impl DownloadCallbacks {
    pub fn progress(&self, tick: DownloadTick) {
        if let Some(cb) = &self.on_progress {
            cb(tick);
        }
    }

    pub fn file_error(&self, file_name: &str, error: &str) {
        if let Some(cb) = &self.on_file_error {
            cb(file_name, error);
        }
    }
}

impl fmt::Debug for DownloadCallbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DownloadCallbacks")
            .field("on_progress", &self.on_progress.is_some())
            .field("on_file_error", &self.on_file_error.is_some())
            .finish()
    }
}

/// Outcome of an unused-cache sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub files_removed: usize,
    pub bytes_freed: u64,
}

/// Resolved network plumbing for one package.
///
/// Hosts and query services are `None` in modes that never touch the
/// network.
#[derive(Clone, Default)]
pub struct InitParameters {
    pub play_mode: PlayMode,
    pub host_server: Option<String>,
    pub fallback_host_server: Option<String>,
    pub builtin_query: Option<Arc<dyn BuiltinQuery>>,
    pub delivery_query: Option<Arc<dyn DeliveryQuery>>,
}

impl fmt::Debug for InitParameters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InitParameters")
            .field("play_mode", &self.play_mode)
            .field("host_server", &self.host_server)
            .field("fallback_host_server", &self.fallback_host_server)
            .field("builtin_query", &self.builtin_query.is_some())
            .field("delivery_query", &self.delivery_query.is_some())
            .finish()
    }
}

/// Explicit per-package plumbing that wins over computed defaults.
#[derive(Clone, Default)]
pub struct PackageOverrides {
    pub host_server: Option<String>,
    pub fallback_host_server: Option<String>,
    pub builtin_query: Option<Arc<dyn BuiltinQuery>>,
    pub delivery_query: Option<Arc<dyn DeliveryQuery>>,
}

impl PackageOverrides {
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host_server = Some(host.into());
        self
    }

    pub fn with_fallback_host(mut self, host: impl Into<String>) -> Self {
        self.fallback_host_server = Some(host.into());
        self
    }

    pub fn with_builtin_query(mut self, query: Arc<dyn BuiltinQuery>) -> Self {
        self.builtin_query = Some(query);
        self
    }

    pub fn with_delivery_query(mut self, query: Arc<dyn DeliveryQuery>) -> Self {
        self.delivery_query = Some(query);
        self
    }
}

/// A package handle plus its overrides, in the order given by the caller.
#[derive(Clone)]
pub struct PackageEntry {
    pub handle: Arc<dyn PackageHandle>,
    pub overrides: PackageOverrides,
}

impl PackageEntry {
    pub fn new(handle: Arc<dyn PackageHandle>) -> Self {
        Self {
            handle,
            overrides: PackageOverrides::default(),
        }
    }

    pub fn with_overrides(mut self, overrides: PackageOverrides) -> Self {
        self.overrides = overrides;
        self
    }

    pub fn name(&self) -> &str {
        self.handle.name()
    }
}

impl fmt::Debug for PackageEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PackageEntry")
            .field("name", &self.handle.name())
            .finish()
    }
}

/// One versioned bundle collection.
///
/// Created once, lives for the whole process, and is shared by reference.
/// Operations are never invoked concurrently on the same package.
pub trait PackageHandle: Send + Sync {
    /// Package name, unique within an orchestration instance.
    fn name(&self) -> &str;

    /// Whether [`initialize`](Self::initialize) has succeeded.
    fn is_initialized(&self) -> bool;

    /// Bring the package into an operable state.
    fn initialize(&self, params: InitParameters) -> BoxFuture<'_, PackageResult<()>>;

    /// Fetch the latest published version.
    fn update_version(&self) -> BoxFuture<'_, PackageResult<String>>;

    /// Fetch and apply the manifest for `version`.
    fn update_manifest<'a>(&'a self, version: &'a str) -> BoxFuture<'a, PackageResult<()>>;

    /// Persist the applied version so a restart can skip re-initialisation.
    fn save_version<'a>(&'a self, version: &'a str) -> BoxFuture<'a, PackageResult<()>>;

    /// Downloader for the files not yet on device.
    ///
    /// `tags` of `None` (or empty) selects every file of the manifest.
    fn create_downloader(
        &self,
        tags: Option<&[String]>,
        max_concurrency: usize,
        max_retry: u32,
    ) -> PackageResult<Box<dyn DownloaderHandle>>;

    /// Remove cached files the applied manifest no longer references.
    fn clear_unused_cache(&self) -> BoxFuture<'_, PackageResult<SweepReport>>;

    /// Unload the package and remove every cached file and record.
    fn clear_all_cache(&self) -> BoxFuture<'_, PackageResult<()>>;

    /// Whether `asset_name` is part of the applied manifest.
    fn check_location_valid(&self, asset_name: &str) -> bool;
}

/// One grouped download for one package.
///
/// Starts [`DownloaderState::Idle`], runs once, and finishes
/// `Succeeded`, `Failed` or `Canceled`.
pub trait DownloaderHandle: Send {
    fn package_name(&self) -> &str;

    /// Files this downloader will transfer.
    fn total_count(&self) -> usize;

    /// Bytes this downloader will transfer.
    fn total_bytes(&self) -> u64;

    fn state(&self) -> DownloaderState;

    /// Pause/resume/cancel switch for this download.
    fn control(&self) -> DownloadControl;

    /// Transfer every file, reporting through `callbacks`.
    ///
    /// Individual file failures are retried internally; the returned state
    /// is `Failed` only if a file is still failing after its retries.
    fn begin(&mut self, callbacks: DownloadCallbacks) -> BoxFuture<'_, DownloaderState>;
}
