//! Grouped download execution.
//!
//! ```text
//!   selected group
//!        │
//!        ▼
//!  one downloader per package ──► sum totals ──► disk check
//!                                                    │
//!        ┌───────────────────────────────────────────┘
//!        ▼
//!  package 1 ──► package 2 ──► ...      (sequential, abort on failure)
//!     │ files up to max_concurrency      (parallel inside a downloader)
//!     ▼
//!  deltas ──► shared aggregate ──► SpeedCalculator ──► DownloadProgress
//! ```
//!
//! Each downloader reports absolute counters for itself only. The executor
//! turns them into deltas so the aggregate sums correctly across packages.

use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{error, info, warn};

use super::disk::{bytes_to_mb, DiskSpaceProbe};
use super::error::{PatchError, PatchResult};
use super::events::{InstanceId, PatchEvent};
use super::planner::GroupInfo;
use super::speed::{DownloadProgress, SpeedCalculator};
use crate::config::PlayMode;
use crate::package::{
    DownloadCallbacks, DownloadControl, DownloadTick, DownloaderHandle, DownloaderState,
    PackageEntry,
};

/// Callback receiving executor events.
pub type EventSink = Arc<dyn Fn(PatchEvent) + Send + Sync>;

// =============================================================================
// Active downloads
// =============================================================================

/// Controls of the downloaders of the current run.
///
/// Shared between the orchestrator task and its handle so pause, resume and
/// cancel act on running downloads without going through the task.
#[derive(Debug, Clone, Default)]
pub struct ActiveDownloads {
    controls: Arc<Mutex<Vec<DownloadControl>>>,
}

impl ActiveDownloads {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn replace(&self, controls: Vec<DownloadControl>) {
        *self.controls.lock() = controls;
    }

    /// Forget the current downloaders without touching them.
    pub fn clear(&self) {
        self.controls.lock().clear();
    }

    pub fn pause_all(&self) {
        for control in self.controls.lock().iter() {
            control.pause();
        }
    }

    pub fn resume_all(&self) {
        for control in self.controls.lock().iter() {
            control.resume();
        }
    }

    /// Cancel and forget the current downloaders.
    pub fn cancel_all(&self) -> usize {
        let controls = std::mem::take(&mut *self.controls.lock());
        for control in &controls {
            control.cancel();
        }
        controls.len()
    }

    pub fn len(&self) -> usize {
        self.controls.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// =============================================================================
// Executor
// =============================================================================

/// Counters after a completed run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DownloadSummary {
    pub total_count: usize,
    pub total_bytes: u64,
    pub current_count: usize,
    pub current_bytes: u64,
}

/// Settings of a [`DownloadExecutor`].
#[derive(Clone)]
pub struct ExecutorConfig {
    pub max_concurrency: usize,
    pub max_retry: u32,
    pub play_mode: PlayMode,
    /// Whether to refuse groups that do not fit on disk.
    pub check_disk_space: bool,
    /// Path whose volume receives the downloads.
    pub download_root: PathBuf,
}

/// Running totals shared by every downloader's progress callback.
#[derive(Default)]
pub(crate) struct Aggregate {
    current_count: usize,
    current_bytes: u64,
    speed: SpeedCalculator,
}

/// Downloads one group across every package.
pub struct DownloadExecutor {
    config: ExecutorConfig,
    disk: Arc<dyn DiskSpaceProbe>,
}

impl DownloadExecutor {
    pub fn new(config: ExecutorConfig, disk: Arc<dyn DiskSpaceProbe>) -> Self {
        Self { config, disk }
    }

    /// Download `group` for every package.
    ///
    /// Registers the downloader controls in `active` before the first
    /// transfer. Progress and per-file failures go to `events`.
    ///
    /// # Errors
    ///
    /// - [`PatchError::CreateDownloader`] when a package cannot build one
    /// - [`PatchError::DiskNotEnoughSpace`] before any transfer starts
    /// - [`PatchError::DownloadFailed`] when a package downloader fails;
    ///   later packages are not started
    /// - [`PatchError::Canceled`] when the run was canceled
    pub async fn run(
        &self,
        instance: InstanceId,
        packages: &[PackageEntry],
        group: &GroupInfo,
        active: &ActiveDownloads,
        events: EventSink,
    ) -> PatchResult<DownloadSummary> {
        let mut downloaders = Vec::with_capacity(packages.len());
        for entry in packages {
            let downloader = entry
                .handle
                .create_downloader(
                    group.tag_filter(),
                    self.config.max_concurrency,
                    self.config.max_retry,
                )
                .map_err(|source| PatchError::CreateDownloader {
                    package: entry.name().to_string(),
                    source,
                })?;
            downloaders.push(downloader);
        }

        let total_count: usize = downloaders.iter().map(|d| d.total_count()).sum();
        let total_bytes: u64 = downloaders.iter().map(|d| d.total_bytes()).sum();
        info!(
            instance = %instance,
            group = %group.group_name,
            files = total_count,
            bytes = total_bytes,
            "Starting group download"
        );

        self.check_disk_space(total_bytes)?;

        active.replace(downloaders.iter().map(|d| d.control()).collect());
        let aggregate = Arc::new(Mutex::new(Aggregate::default()));

        let outcome = Self::run_downloaders(
            instance,
            &mut downloaders,
            &aggregate,
            total_count,
            total_bytes,
            &events,
        )
        .await;
        active.clear();
        outcome?;

        let aggregate = aggregate.lock();
        Ok(DownloadSummary {
            total_count,
            total_bytes,
            current_count: aggregate.current_count,
            current_bytes: aggregate.current_bytes,
        })
    }

    /// Run each package downloader in order, stopping at the first that
    /// does not succeed.
    async fn run_downloaders(
        instance: InstanceId,
        downloaders: &mut [Box<dyn DownloaderHandle>],
        aggregate: &Arc<Mutex<Aggregate>>,
        total_count: usize,
        total_bytes: u64,
        events: &EventSink,
    ) -> PatchResult<()> {
        for downloader in downloaders.iter_mut() {
            if downloader.control().is_cancelled() {
                return Err(PatchError::Canceled);
            }

            let callbacks = callbacks_for(
                Arc::clone(aggregate),
                total_count,
                total_bytes,
                Arc::clone(events),
            );
            let package = downloader.package_name().to_string();
            match downloader.begin(callbacks).await {
                DownloaderState::Succeeded => {
                    info!(instance = %instance, package = %package, "Package download finished")
                }
                DownloaderState::Canceled => {
                    warn!(instance = %instance, package = %package, "Package download canceled");
                    return Err(PatchError::Canceled);
                }
                state => {
                    error!(instance = %instance, package = %package, state = ?state, "Package download failed");
                    return Err(PatchError::DownloadFailed { package });
                }
            }
        }
        Ok(())
    }

    fn check_disk_space(&self, required_bytes: u64) -> PatchResult<()> {
        if !self.config.check_disk_space || self.config.play_mode == PlayMode::Web {
            return Ok(());
        }
        let Some(available) = self.disk.available_bytes(&self.config.download_root) else {
            warn!("Free disk space unknown, skipping disk check");
            return Ok(());
        };

        let available_mb = bytes_to_mb(available);
        if bytes_to_mb(required_bytes) > available_mb {
            warn!(available_mb, required_bytes, "Not enough disk space for download");
            return Err(PatchError::DiskNotEnoughSpace {
                available_mb,
                required_bytes,
            });
        }
        Ok(())
    }
}

/// Callbacks for one downloader, feeding the shared aggregate.
pub(crate) fn callbacks_for(
    aggregate: Arc<Mutex<Aggregate>>,
    total_count: usize,
    total_bytes: u64,
    events: EventSink,
) -> DownloadCallbacks {
    // Last absolute counters seen from this downloader.
    let last = Mutex::new(DownloadTick::default());
    let progress_events = Arc::clone(&events);

    let on_progress = move |tick: DownloadTick| {
        let progress: Option<DownloadProgress> = {
            let mut last = last.lock();
            let mut aggregate = aggregate.lock();
            aggregate.current_count += tick.current_count.saturating_sub(last.current_count);
            aggregate.current_bytes += tick.current_bytes.saturating_sub(last.current_bytes);
            *last = tick;

            let (count, bytes) = (aggregate.current_count, aggregate.current_bytes);
            aggregate
                .speed
                .on_progress(total_count, count, total_bytes, bytes)
        };
        if let Some(progress) = progress {
            progress_events(PatchEvent::DownloadProgress(progress));
        }
    };

    let on_file_error = move |file_name: &str, error: &str| {
        events(PatchEvent::DownloadFailed {
            file_name: file_name.to_string(),
            error: error.to_string(),
        });
    };

    DownloadCallbacks {
        on_progress: Some(Arc::new(on_progress)),
        on_file_error: Some(Arc::new(on_file_error)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::package::{
        InitParameters, PackageError, PackageHandle, PackageResult, SweepReport,
    };
    use crate::patch::disk::FixedDiskSpace;
    use crate::BoxFuture;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Downloader transferring `files` in two ticks each.
    struct ScriptedDownloader {
        package: String,
        files: Vec<u64>,
        outcome: DownloaderState,
        control: DownloadControl,
        bad_file: Option<&'static str>,
    }

    impl DownloaderHandle for ScriptedDownloader {
        fn package_name(&self) -> &str {
            &self.package
        }
        fn total_count(&self) -> usize {
            self.files.len()
        }
        fn total_bytes(&self) -> u64 {
            self.files.iter().sum()
        }
        fn state(&self) -> DownloaderState {
            DownloaderState::Idle
        }
        fn control(&self) -> DownloadControl {
            self.control.clone()
        }
        fn begin(&mut self, callbacks: DownloadCallbacks) -> BoxFuture<'_, DownloaderState> {
            Box::pin(async move {
                let mut tick = DownloadTick {
                    total_count: self.total_count(),
                    total_bytes: self.total_bytes(),
                    ..Default::default()
                };
                for size in &self.files {
                    tick.current_bytes += size / 2;
                    callbacks.progress(tick);
                    tick.current_bytes += size - size / 2;
                    tick.current_count += 1;
                    callbacks.progress(tick);
                }
                if let Some(file) = self.bad_file {
                    callbacks.file_error(file, "404");
                }
                self.outcome
            })
        }
    }

    struct ScriptedPackage {
        name: String,
        files: Vec<u64>,
        outcome: DownloaderState,
        bad_file: Option<&'static str>,
        started: Arc<AtomicUsize>,
    }

    impl PackageHandle for ScriptedPackage {
        fn name(&self) -> &str {
            &self.name
        }
        fn is_initialized(&self) -> bool {
            true
        }
        fn initialize(&self, _: InitParameters) -> BoxFuture<'_, PackageResult<()>> {
            Box::pin(async { Ok(()) })
        }
        fn update_version(&self) -> BoxFuture<'_, PackageResult<String>> {
            Box::pin(async { Ok(String::new()) })
        }
        fn update_manifest<'a>(&'a self, _: &'a str) -> BoxFuture<'a, PackageResult<()>> {
            Box::pin(async { Ok(()) })
        }
        fn save_version<'a>(&'a self, _: &'a str) -> BoxFuture<'a, PackageResult<()>> {
            Box::pin(async { Ok(()) })
        }
        fn create_downloader(
            &self,
            _: Option<&[String]>,
            _: usize,
            _: u32,
        ) -> PackageResult<Box<dyn DownloaderHandle>> {
            self.started.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(ScriptedDownloader {
                package: self.name.clone(),
                files: self.files.clone(),
                outcome: self.outcome,
                control: DownloadControl::new(),
                bad_file: self.bad_file,
            }))
        }
        fn clear_unused_cache(&self) -> BoxFuture<'_, PackageResult<SweepReport>> {
            Box::pin(async { Ok(SweepReport::default()) })
        }
        fn clear_all_cache(&self) -> BoxFuture<'_, PackageResult<()>> {
            Box::pin(async { Ok(()) })
        }
        fn check_location_valid(&self, _: &str) -> bool {
            false
        }
    }

    fn package(name: &str, files: Vec<u64>, outcome: DownloaderState) -> PackageEntry {
        PackageEntry::new(Arc::new(ScriptedPackage {
            name: name.to_string(),
            files,
            outcome,
            bad_file: None,
            started: Arc::new(AtomicUsize::new(0)),
        }))
    }

    fn executor(disk: Option<u64>) -> DownloadExecutor {
        DownloadExecutor::new(
            ExecutorConfig {
                max_concurrency: 4,
                max_retry: 0,
                play_mode: PlayMode::Host,
                check_disk_space: true,
                download_root: PathBuf::from("/sandbox"),
            },
            Arc::new(FixedDiskSpace(disk)),
        )
    }

    fn collector() -> (EventSink, Arc<Mutex<Vec<PatchEvent>>>) {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink_events = Arc::clone(&events);
        let sink: EventSink = Arc::new(move |event| sink_events.lock().push(event));
        (sink, events)
    }

    #[tokio::test]
    async fn test_aggregate_matches_totals() {
        let packages = vec![
            package("main", vec![100, 300], DownloaderState::Succeeded),
            package("dlc", vec![50], DownloaderState::Succeeded),
        ];
        let (sink, events) = collector();
        let active = ActiveDownloads::new();

        let summary = executor(None)
            .run(InstanceId::APP, &packages, &GroupInfo::all(), &active, sink)
            .await
            .unwrap();

        assert_eq!(summary.total_count, 3);
        assert_eq!(summary.total_bytes, 450);
        assert_eq!(summary.current_count, summary.total_count);
        assert_eq!(summary.current_bytes, summary.total_bytes);
        assert!(active.is_empty());

        // Aggregate counters never go backwards across packages.
        let bytes: Vec<u64> = events
            .lock()
            .iter()
            .filter_map(|e| match e {
                PatchEvent::DownloadProgress(p) => Some(p.current_bytes),
                _ => None,
            })
            .collect();
        assert!(bytes.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(bytes.last().copied(), Some(450));
    }

    #[tokio::test]
    async fn test_insufficient_disk_aborts_before_transfer() {
        let started = Arc::new(AtomicUsize::new(0));
        let packages = vec![PackageEntry::new(Arc::new(ScriptedPackage {
            name: "main".into(),
            files: vec![100 << 20],
            outcome: DownloaderState::Succeeded,
            bad_file: None,
            started: Arc::clone(&started),
        }))];
        let (sink, events) = collector();

        let err = executor(Some(50 << 20))
            .run(InstanceId::APP, &packages, &GroupInfo::all(), &ActiveDownloads::new(), sink)
            .await
            .unwrap_err();

        match err {
            PatchError::DiskNotEnoughSpace {
                available_mb,
                required_bytes,
            } => {
                assert_eq!(available_mb, 50);
                assert_eq!(required_bytes, 100 << 20);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(events.lock().is_empty());
    }

    #[tokio::test]
    async fn test_disk_check_skipped_for_web() {
        let packages = vec![package("main", vec![100 << 20], DownloaderState::Succeeded)];
        let (sink, _) = collector();
        let mut exec = executor(Some(1));
        exec.config.play_mode = PlayMode::Web;

        assert!(exec
            .run(InstanceId::APP, &packages, &GroupInfo::all(), &ActiveDownloads::new(), sink)
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_failed_package_stops_run() {
        let packages = vec![
            package("main", vec![10], DownloaderState::Failed),
            package("dlc", vec![10], DownloaderState::Succeeded),
        ];
        let (sink, events) = collector();
        let active = ActiveDownloads::new();

        let err = executor(None)
            .run(InstanceId::APP, &packages, &GroupInfo::all(), &active, sink)
            .await
            .unwrap_err();
        assert!(matches!(err, PatchError::DownloadFailed { ref package } if package == "main"));
        assert!(active.is_empty());

        // Only the first package reported progress.
        let last = events.lock().iter().rev().find_map(|e| match e {
            PatchEvent::DownloadProgress(p) => Some(p.current_bytes),
            _ => None,
        });
        assert_eq!(last, Some(10));
    }

    #[tokio::test]
    async fn test_file_errors_are_reported() {
        let packages = vec![PackageEntry::new(Arc::new(ScriptedPackage {
            name: "main".into(),
            files: vec![10],
            outcome: DownloaderState::Succeeded,
            bad_file: Some("ui.bundle"),
            started: Arc::new(AtomicUsize::new(0)),
        }))];
        let (sink, events) = collector();

        executor(None)
            .run(InstanceId::APP, &packages, &GroupInfo::all(), &ActiveDownloads::new(), sink)
            .await
            .unwrap();
        assert!(events.lock().contains(&PatchEvent::DownloadFailed {
            file_name: "ui.bundle".into(),
            error: "404".into(),
        }));
    }

    #[test]
    fn test_active_downloads_cancel_all() {
        let active = ActiveDownloads::new();
        let a = DownloadControl::new();
        let b = DownloadControl::new();
        active.replace(vec![a.clone(), b.clone()]);

        active.pause_all();
        assert!(a.is_paused() && b.is_paused());
        active.resume_all();
        assert!(!a.is_paused());

        assert_eq!(active.cancel_all(), 2);
        assert!(a.is_cancelled() && b.is_cancelled());
        assert!(active.is_empty());
    }

    #[tokio::test]
    async fn test_create_failure_names_package() {
        struct Broken;
        impl PackageHandle for Broken {
            fn name(&self) -> &str {
                "broken"
            }
            fn is_initialized(&self) -> bool {
                false
            }
            fn initialize(&self, _: InitParameters) -> BoxFuture<'_, PackageResult<()>> {
                Box::pin(async { Ok(()) })
            }
            fn update_version(&self) -> BoxFuture<'_, PackageResult<String>> {
                Box::pin(async { Ok(String::new()) })
            }
            fn update_manifest<'a>(&'a self, _: &'a str) -> BoxFuture<'a, PackageResult<()>> {
                Box::pin(async { Ok(()) })
            }
            fn save_version<'a>(&'a self, _: &'a str) -> BoxFuture<'a, PackageResult<()>> {
                Box::pin(async { Ok(()) })
            }
            fn create_downloader(
                &self,
                _: Option<&[String]>,
                _: usize,
                _: u32,
            ) -> PackageResult<Box<dyn DownloaderHandle>> {
                Err(PackageError::ManifestNotLoaded {
                    package: "broken".into(),
                })
            }
            fn clear_unused_cache(&self) -> BoxFuture<'_, PackageResult<SweepReport>> {
                Box::pin(async { Ok(SweepReport::default()) })
            }
            fn clear_all_cache(&self) -> BoxFuture<'_, PackageResult<()>> {
                Box::pin(async { Ok(()) })
            }
            fn check_location_valid(&self, _: &str) -> bool {
                false
            }
        }

        let (sink, _) = collector();
        let err = executor(None)
            .run(
                InstanceId::APP,
                &[PackageEntry::new(Arc::new(Broken))],
                &GroupInfo::all(),
                &ActiveDownloads::new(),
                sink,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, PatchError::CreateDownloader { .. }));
    }
}
