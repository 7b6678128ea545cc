//! Patch orchestrator: one task per instance driving the state pipeline.
//!
//! ```text
//!  PatchHandle ──Command──► mpsc ──► run loop ──► enter(state) ──► execute(state)
//!      │                               ▲    │            │
//!      │ interrupt (token)             │    └─ next ─────┘
//!      └───────────────────────────────┘
//! ```
//!
//! The loop owns the [`PatchContext`] and executes one state at a time. A
//! state either names its successor or parks the pipeline (a failure event
//! was published, or a caller decision is needed). Parked pipelines resume
//! only through a command.
//!
//! # Interruption
//!
//! `repair` and `cancel` fire the interrupt token before their command is
//! queued, so a running state stops at its next await point. The token is
//! re-armed only when the loop takes a command off the queue. A queued
//! command also preempts the next state of a running pipeline.
//!
//! `ClearCache` is never interrupted.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::context::PatchContext;
use super::disk::{DiskSpaceProbe, StatvfsProbe};
use super::error::{PatchError, PatchResult};
use super::events::{EventBus, InstanceId, PatchEvent, PatchMessage};
use super::executor::{ActiveDownloads, DownloadExecutor, EventSink, ExecutorConfig};
use super::initializer::PackageInitializer;
use super::planner::{DownloadGroupPlanner, GroupInfo, PatchConfig};
use super::reconciler::ManifestReconciler;
use super::registry::{PatchRegistry, RegistrationGuard};
use super::scheduler::{FrameScheduler, TokioScheduler};
use super::selection::{FileSelectionStore, SelectionStore};
use super::state::PatchState;
use super::sweeper::CacheSweeper;
use crate::config::{PatchSettings, PlayMode};
use crate::fetch::{HttpFetcher, RemoteFetcher};
use crate::package::PackageEntry;
use crate::version::VersionGate;

/// Which pipeline an instance runs.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum PatchFlow {
    /// Main application flow: version gate, then group selection by the
    /// caller.
    #[default]
    App,
    /// Downloadable-content flow: no version gate, a fixed group, and only
    /// the per-package overrides for plumbing.
    Dlc {
        group: GroupInfo,
        /// Go from manifest update straight to cleanup.
        skip_download: bool,
    },
}

/// Requests from a [`PatchHandle`] to the run loop.
#[derive(Debug)]
enum Command {
    Check,
    Repair,
    BeginDownload(GroupInfo),
    Retry(PatchState),
    Cancel,
}

/// State visible to handles without going through the task.
#[derive(Debug, Default)]
struct SharedStatus {
    is_check: AtomicBool,
    is_repair: AtomicBool,
    is_done: AtomicBool,
    state: Mutex<Option<PatchState>>,
    interrupt: Mutex<CancellationToken>,
    downloads: ActiveDownloads,
}

impl SharedStatus {
    fn fire_interrupt(&self) {
        self.interrupt.lock().cancel();
    }

    fn rearm_interrupt(&self) {
        let mut token = self.interrupt.lock();
        if token.is_cancelled() {
            *token = CancellationToken::new();
        }
    }

    fn interrupt_token(&self) -> CancellationToken {
        self.interrupt.lock().clone()
    }
}

// =============================================================================
// Builder
// =============================================================================

/// Configures and spawns a [`PatchOrchestrator`].
pub struct PatchOrchestratorBuilder {
    instance: InstanceId,
    settings: PatchSettings,
    flow: PatchFlow,
    packages: Vec<PackageEntry>,
    fetcher: Option<Arc<dyn RemoteFetcher>>,
    scheduler: Option<Arc<dyn FrameScheduler>>,
    disk_probe: Option<Arc<dyn DiskSpaceProbe>>,
    selection: Option<Arc<dyn SelectionStore>>,
    bus: Option<EventBus>,
}

impl PatchOrchestratorBuilder {
    pub fn flow(mut self, flow: PatchFlow) -> Self {
        self.flow = flow;
        self
    }

    /// Add a package. Packages are processed in insertion order.
    pub fn package(mut self, entry: PackageEntry) -> Self {
        self.packages.push(entry);
        self
    }

    pub fn packages(mut self, entries: impl IntoIterator<Item = PackageEntry>) -> Self {
        self.packages.extend(entries);
        self
    }

    /// Fetcher for the app and patch configs. Defaults to an
    /// [`HttpFetcher`] with the configured timeout.
    pub fn fetcher(mut self, fetcher: Arc<dyn RemoteFetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    pub fn scheduler(mut self, scheduler: Arc<dyn FrameScheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    pub fn disk_probe(mut self, probe: Arc<dyn DiskSpaceProbe>) -> Self {
        self.disk_probe = Some(probe);
        self
    }

    pub fn selection_store(mut self, store: Arc<dyn SelectionStore>) -> Self {
        self.selection = Some(store);
        self
    }

    /// Publish into an existing bus, e.g. one shared by several instances.
    pub fn event_bus(mut self, bus: EventBus) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Register the instance and start its task.
    ///
    /// Must be called inside a tokio runtime. The task stops once every
    /// handle is dropped, releasing the instance id.
    ///
    /// # Errors
    ///
    /// - [`PatchError::InstanceInUse`] if the id is already running
    /// - [`PatchError::Fetcher`] if the default HTTP client cannot be built
    pub fn spawn(self, registry: &PatchRegistry) -> PatchResult<PatchHandle> {
        let registration = registry.register(self.instance)?;

        let settings = self.settings;
        let fetcher: Arc<dyn RemoteFetcher> = match self.fetcher {
            Some(fetcher) => fetcher,
            None => Arc::new(
                HttpFetcher::with_timeout(settings.http_timeout).map_err(PatchError::Fetcher)?,
            ),
        };
        let scheduler: Arc<dyn FrameScheduler> = self
            .scheduler
            .unwrap_or_else(|| Arc::new(TokioScheduler::new(settings.state_delay)));
        let disk_probe: Arc<dyn DiskSpaceProbe> =
            self.disk_probe.unwrap_or_else(|| Arc::new(StatvfsProbe));
        let selection: Arc<dyn SelectionStore> = self
            .selection
            .unwrap_or_else(|| Arc::new(FileSelectionStore::new(settings.selection_dir())));
        let bus = self.bus.unwrap_or_default();

        let initializer = match self.flow {
            PatchFlow::App => PackageInitializer::new(&settings),
            PatchFlow::Dlc { .. } => PackageInitializer::new(&settings).overrides_only(),
        };
        let executor = DownloadExecutor::new(
            ExecutorConfig {
                max_concurrency: settings.max_concurrency,
                max_retry: settings.max_retry,
                play_mode: settings.play_mode,
                check_disk_space: settings.check_disk_space,
                download_root: settings.sandbox_dir.clone(),
            },
            disk_probe,
        );

        let status = Arc::new(SharedStatus::default());
        let (commands, command_rx) = mpsc::unbounded_channel();

        info!(
            instance = %self.instance,
            mode = %settings.play_mode,
            packages = self.packages.len(),
            "Starting patch orchestrator"
        );

        let orchestrator = PatchOrchestrator {
            instance: self.instance,
            ctx: PatchContext::new(self.packages, settings.repair_retry_budget),
            planner: DownloadGroupPlanner::new(settings.max_concurrency, settings.max_retry),
            settings,
            flow: self.flow,
            fetcher,
            scheduler,
            selection,
            bus: bus.clone(),
            status: Arc::clone(&status),
            initializer,
            reconciler: ManifestReconciler::new(),
            executor,
            sweeper: CacheSweeper::new(),
        };
        tokio::spawn(orchestrator.run(command_rx, registration));

        Ok(PatchHandle {
            instance: self.instance,
            commands,
            status,
            bus,
        })
    }
}

// =============================================================================
// Orchestrator
// =============================================================================

/// Drives the patch pipeline of one instance.
///
/// Created through [`PatchOrchestrator::builder`] and controlled through
/// the returned [`PatchHandle`].
pub struct PatchOrchestrator {
    instance: InstanceId,
    settings: PatchSettings,
    flow: PatchFlow,
    ctx: PatchContext,
    fetcher: Arc<dyn RemoteFetcher>,
    scheduler: Arc<dyn FrameScheduler>,
    selection: Arc<dyn SelectionStore>,
    bus: EventBus,
    status: Arc<SharedStatus>,
    initializer: PackageInitializer,
    reconciler: ManifestReconciler,
    planner: DownloadGroupPlanner,
    executor: DownloadExecutor,
    sweeper: CacheSweeper,
}

impl PatchOrchestrator {
    pub fn builder(instance: InstanceId, settings: PatchSettings) -> PatchOrchestratorBuilder {
        PatchOrchestratorBuilder {
            instance,
            settings,
            flow: PatchFlow::App,
            packages: Vec::new(),
            fetcher: None,
            scheduler: None,
            disk_probe: None,
            selection: None,
            bus: None,
        }
    }

    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        _registration: RegistrationGuard,
    ) {
        let mut pending: Option<PatchState> = None;

        loop {
            let command = if pending.is_some() {
                match commands.try_recv() {
                    Ok(command) => Some(command),
                    Err(mpsc::error::TryRecvError::Empty) => None,
                    Err(mpsc::error::TryRecvError::Disconnected) => break,
                }
            } else {
                match commands.recv().await {
                    Some(command) => Some(command),
                    None => break,
                }
            };

            if let Some(command) = command {
                self.status.rearm_interrupt();
                pending = self.dispatch(command).await;
            }

            if let Some(state) = pending.take() {
                pending = self.enter(state).await;
            }
        }

        self.status.downloads.cancel_all();
        info!(instance = %self.instance, "Patch orchestrator stopped");
    }

    async fn dispatch(&mut self, command: Command) -> Option<PatchState> {
        debug!(instance = %self.instance, command = ?command, "Patch command");
        match command {
            Command::Check => {
                self.status.is_done.store(false, Ordering::SeqCst);
                Some(PatchState::Prepare)
            }
            Command::Repair => {
                self.status.is_done.store(false, Ordering::SeqCst);
                Some(PatchState::Repair)
            }
            Command::BeginDownload(group) => {
                if let Err(e) = self.selection.save(self.instance, &group).await {
                    warn!(instance = %self.instance, error = %e, "Failed to save group selection");
                }
                let next = if group.total_count == 0 {
                    info!(group = %group.group_name, "Selected group has nothing to download");
                    PatchState::DownloadOver
                } else {
                    PatchState::BeginDownload
                };
                self.ctx.selected_group = Some(group);
                Some(next)
            }
            Command::Retry(state) if state.is_retryable() => Some(state),
            Command::Retry(state) => {
                warn!(instance = %self.instance, state = %state, "State cannot be retried");
                None
            }
            Command::Cancel => {
                self.ctx.selected_group = None;
                info!(instance = %self.instance, "Patch canceled");
                None
            }
        }
    }

    async fn enter(&mut self, state: PatchState) -> Option<PatchState> {
        *self.status.state.lock() = Some(state);
        info!(instance = %self.instance, state = %state, "Entering patch state");
        self.publish(PatchEvent::StateEntered(state));

        if !state.is_interruptible() {
            return self.execute(state).await;
        }

        let instance = self.instance;
        let interrupt = self.status.interrupt_token();
        tokio::select! {
            biased;

            _ = interrupt.cancelled() => {
                info!(instance = %instance, state = %state, "Patch state interrupted");
                None
            }

            next = self.execute(state) => next,
        }
    }

    async fn execute(&mut self, state: PatchState) -> Option<PatchState> {
        let next = match state {
            PatchState::Repair => self.repair().await,
            PatchState::Prepare => self.prepare(),
            PatchState::AppVersionCheck => self.app_version_check().await,
            PatchState::InitPackages => self.init_packages().await,
            PatchState::PackageVersionUpdate => self.package_version_update().await,
            PatchState::ManifestUpdate => self.manifest_update().await,
            PatchState::CreateDownloader => self.create_downloader().await,
            PatchState::BeginDownload => self.begin_download().await,
            PatchState::DownloadOver => {
                self.scheduler.state_delay().await;
                Some(PatchState::ClearCache)
            }
            PatchState::ClearCache => {
                self.scheduler.state_delay().await;
                self.sweeper.sweep_all(&self.ctx.packages).await;
                Some(PatchState::Done)
            }
            PatchState::Done => self.done(),
        };

        if let Some(next) = next {
            debug_assert!(state.can_transition_to(next), "{state} -> {next}");
        }
        next
    }

    // -------------------------------------------------------------------------
    // State handlers
    // -------------------------------------------------------------------------

    async fn repair(&mut self) -> Option<PatchState> {
        if self.settings.play_mode == PlayMode::EditorSimulate {
            return Some(PatchState::Prepare);
        }

        self.status.downloads.cancel_all();
        self.scheduler.yield_frame().await;
        self.clear_selection().await;
        self.ctx.package_versions.clear();
        self.ctx.selected_group = None;

        match self.sweeper.clear_all(&self.ctx.packages).await {
            Ok(()) => {
                info!(instance = %self.instance, "Local package state cleared");
                self.ctx.reset_repair_budget();
                Some(PatchState::Prepare)
            }
            Err(e) if self.ctx.repair_budget == 0 => {
                warn!(instance = %self.instance, error = %e, "Repair incomplete, continuing anyway");
                self.ctx.reset_repair_budget();
                Some(PatchState::Prepare)
            }
            Err(e) => {
                self.ctx.repair_budget -= 1;
                error!(
                    instance = %self.instance,
                    error = %e,
                    kind = ?e.kind(),
                    budget = self.ctx.repair_budget,
                    "Repair failed"
                );
                let (package, reason) = package_failure(&e);
                self.publish(PatchEvent::RepairFailed { package, reason });
                None
            }
        }
    }

    fn prepare(&mut self) -> Option<PatchState> {
        self.status.is_check.store(true, Ordering::SeqCst);
        match self.flow {
            PatchFlow::App => Some(PatchState::AppVersionCheck),
            PatchFlow::Dlc { .. } => Some(PatchState::InitPackages),
        }
    }

    async fn app_version_check(&mut self) -> Option<PatchState> {
        let mode = self.settings.play_mode;
        if mode == PlayMode::EditorSimulate {
            return Some(PatchState::InitPackages);
        }

        // Offline the shipped config is the authority.
        let offline = mode == PlayMode::Offline;
        let remote = if offline {
            Some(
                self.settings
                    .bundle_app_config_path()
                    .to_string_lossy()
                    .into_owned(),
            )
        } else {
            self.settings.app_config_location()
        };
        let Some(remote) = remote else {
            self.publish(PatchEvent::AppVersionUpdateFailed {
                reason: "no app config location configured".to_string(),
            });
            return None;
        };

        let rule = self.settings.semantic_rule;
        let gate = VersionGate::new(
            self.settings.bundle_app_config_path(),
            self.settings.sandbox_app_config_path(),
            rule,
        )
        .with_force_sync(offline);

        match gate.check(self.fetcher.as_ref(), &remote).await {
            Ok(outcome) if outcome.proceed => {
                self.ctx.app_version = Some(outcome.remote_version.to_string());
                Some(PatchState::InitPackages)
            }
            Ok(outcome) => {
                let local = outcome.local_version.number(rule);
                let remote = outcome.remote_version.number(rule);
                self.log_failure(
                    PatchState::AppVersionCheck,
                    &PatchError::VersionIncompatible {
                        local: local.clone(),
                        remote: remote.clone(),
                    },
                );
                self.clear_selection().await;
                self.status.is_check.store(false, Ordering::SeqCst);
                self.publish(PatchEvent::GoToAppStore { local, remote });
                None
            }
            Err(e) => {
                let e = PatchError::AppVersion(e);
                self.log_failure(PatchState::AppVersionCheck, &e);
                self.publish(PatchEvent::AppVersionUpdateFailed {
                    reason: e.to_string(),
                });
                None
            }
        }
    }

    async fn init_packages(&mut self) -> Option<PatchState> {
        self.scheduler.state_delay().await;
        match self.initializer.init_all(&self.ctx.packages).await {
            Ok(()) => Some(PatchState::PackageVersionUpdate),
            Err(e) => {
                self.log_failure(PatchState::InitPackages, &e);
                let (package, reason) = package_failure(&e);
                self.publish(PatchEvent::InitPatchModeFailed { package, reason });
                None
            }
        }
    }

    async fn package_version_update(&mut self) -> Option<PatchState> {
        self.status.is_repair.store(false, Ordering::SeqCst);
        self.ctx.package_versions.clear();
        self.scheduler.state_delay().await;
        match self.reconciler.update_versions(&self.ctx.packages).await {
            Ok(versions) => {
                self.ctx.package_versions = versions;
                Some(PatchState::ManifestUpdate)
            }
            Err(e) => {
                self.log_failure(PatchState::PackageVersionUpdate, &e);
                let (package, reason) = package_failure(&e);
                self.publish(PatchEvent::VersionUpdateFailed { package, reason });
                None
            }
        }
    }

    async fn manifest_update(&mut self) -> Option<PatchState> {
        self.scheduler.state_delay().await;
        if !self.ctx.versions_resolved() {
            // The last version pass failed; its partial results were dropped.
            let package = self
                .ctx
                .packages
                .get(self.ctx.package_versions.len())
                .map(|p| p.name().to_string())
                .unwrap_or_default();
            let e = PatchError::VersionsUnresolved { package };
            self.log_failure(PatchState::ManifestUpdate, &e);
            let (package, reason) = package_failure(&e);
            self.publish(PatchEvent::VersionUpdateFailed { package, reason });
            return None;
        }
        let result = self
            .reconciler
            .update_manifests(&self.ctx.packages, &self.ctx.package_versions)
            .await;
        if let Err(e) = result {
            self.log_failure(PatchState::ManifestUpdate, &e);
            let (package, reason) = package_failure(&e);
            self.publish(PatchEvent::ManifestUpdateFailed { package, reason });
            return None;
        }

        let skip_download = match self.flow {
            PatchFlow::App => self.settings.skip_main_download,
            PatchFlow::Dlc { skip_download, .. } => skip_download,
        };
        if skip_download {
            info!(instance = %self.instance, "Skipping download");
            Some(PatchState::DownloadOver)
        } else {
            Some(PatchState::CreateDownloader)
        }
    }

    async fn create_downloader(&mut self) -> Option<PatchState> {
        self.scheduler.state_delay().await;
        self.status.is_check.store(true, Ordering::SeqCst);

        let result = match self.flow.clone() {
            PatchFlow::App => self.plan_app_groups().await,
            PatchFlow::Dlc { group, .. } => self.measure_dlc_group(group),
        };

        result.unwrap_or_else(|e| {
            self.log_failure(PatchState::CreateDownloader, &e);
            self.publish(PatchEvent::CreateDownloaderFailed {
                reason: e.to_string(),
            });
            None
        })
    }

    async fn plan_app_groups(&mut self) -> PatchResult<Option<PatchState>> {
        if matches!(
            self.settings.play_mode,
            PlayMode::EditorSimulate | PlayMode::Offline
        ) {
            return Ok(Some(PatchState::Done));
        }

        let location = self.settings.patch_config_location().ok_or_else(|| {
            PatchError::InvalidPatchConfig {
                source_name: "settings".to_string(),
                reason: "no patch config location configured".to_string(),
            }
        })?;
        let text = self
            .fetcher
            .fetch_text(&location)
            .await
            .map_err(PatchError::PatchConfigUnavailable)?;
        let config = PatchConfig::from_json(&text, &location)?;

        let last = self.selection.load(self.instance).await;
        let plan = self
            .planner
            .plan(&self.ctx.packages, &config.group_infos, last.as_ref())?;

        if plan.is_empty() {
            info!(instance = %self.instance, "Nothing to download");
            return Ok(Some(PatchState::DownloadOver));
        }

        let groups = plan.into_groups();
        info!(instance = %self.instance, groups = groups.len(), "Download groups planned");
        self.publish(PatchEvent::CreateDownloader { groups });
        Ok(None)
    }

    fn measure_dlc_group(&mut self, group: GroupInfo) -> PatchResult<Option<PatchState>> {
        let measured = self.planner.measure(&self.ctx.packages, &group)?;
        if measured.total_count > 0 {
            self.ctx.selected_group = Some(measured);
            Ok(Some(PatchState::BeginDownload))
        } else {
            Ok(Some(PatchState::DownloadOver))
        }
    }

    async fn begin_download(&mut self) -> Option<PatchState> {
        let Some(group) = self.ctx.selected_group.clone() else {
            warn!(instance = %self.instance, "No group selected for download");
            return None;
        };

        let bus = self.bus.clone();
        let instance = self.instance;
        let sink: EventSink = Arc::new(move |event| bus.publish(instance, event));

        let result = self
            .executor
            .run(
                instance,
                &self.ctx.packages,
                &group,
                &self.status.downloads,
                sink,
            )
            .await;

        match result {
            Ok(summary) => {
                info!(
                    instance = %instance,
                    files = summary.current_count,
                    bytes = summary.current_bytes,
                    "Group download complete"
                );
                Some(PatchState::DownloadOver)
            }
            Err(PatchError::DiskNotEnoughSpace {
                available_mb,
                required_bytes,
            }) => {
                self.publish(PatchEvent::DiskNotEnoughSpace {
                    available_mb,
                    required_bytes,
                });
                None
            }
            Err(PatchError::DownloadFailed { package }) => {
                self.publish(PatchEvent::DownloaderFailed { package });
                None
            }
            Err(PatchError::Canceled) => {
                info!(instance = %instance, "Group download canceled");
                None
            }
            Err(e) => {
                self.log_failure(PatchState::BeginDownload, &e);
                self.publish(PatchEvent::CreateDownloaderFailed {
                    reason: e.to_string(),
                });
                None
            }
        }
    }

    fn done(&mut self) -> Option<PatchState> {
        self.status.is_done.store(true, Ordering::SeqCst);
        self.status.is_check.store(false, Ordering::SeqCst);
        self.status.is_repair.store(false, Ordering::SeqCst);
        self.status.downloads.clear();
        self.ctx.selected_group = None;
        info!(
            instance = %self.instance,
            app_version = self.ctx.app_version.as_deref().unwrap_or("-"),
            packages = ?self.ctx.package_names(),
            "Patch complete"
        );
        self.publish(PatchEvent::Done);
        None
    }

    async fn clear_selection(&self) {
        if let Err(e) = self.selection.clear(self.instance).await {
            warn!(instance = %self.instance, error = %e, "Failed to clear group selection");
        }
    }

    /// Log a state failure with its failure class.
    fn log_failure(&self, state: PatchState, err: &PatchError) {
        error!(
            instance = %self.instance,
            state = %state,
            kind = ?err.kind(),
            retryable = err.is_retryable(),
            error = %err,
            "Patch state failed"
        );
    }

    fn publish(&self, event: PatchEvent) {
        self.bus.publish(self.instance, event);
    }
}

/// Package name and cause of a per-package failure.
fn package_failure(err: &PatchError) -> (String, String) {
    match err {
        PatchError::PackageInit { package, source }
        | PatchError::VersionUpdate { package, source }
        | PatchError::ManifestUpdate { package, source }
        | PatchError::CreateDownloader { package, source }
        | PatchError::RepairFailed { package, source } => (package.clone(), source.to_string()),
        PatchError::VersionsUnresolved { package } => (package.clone(), err.to_string()),
        other => (String::new(), other.to_string()),
    }
}

// =============================================================================
// Handle
// =============================================================================

/// Control surface of a running orchestrator.
///
/// Cheap to clone. Dropping the last handle stops the orchestrator.
#[derive(Debug, Clone)]
pub struct PatchHandle {
    instance: InstanceId,
    commands: mpsc::UnboundedSender<Command>,
    status: Arc<SharedStatus>,
    bus: EventBus,
}

impl PatchHandle {
    pub fn instance(&self) -> InstanceId {
        self.instance
    }

    /// Start a check. Ignored while one is already running.
    pub fn check(&self) -> PatchResult<()> {
        if self.status.is_check.swap(true, Ordering::SeqCst) {
            debug!(instance = %self.instance, "Check already running");
            return Ok(());
        }
        self.send(Command::Check)
    }

    /// Clear every package and check again. Interrupts the running state.
    pub fn repair(&self) -> PatchResult<()> {
        if self.status.is_repair.swap(true, Ordering::SeqCst) {
            debug!(instance = %self.instance, "Repair already running");
            return Ok(());
        }
        self.status.downloads.cancel_all();
        self.status.fire_interrupt();
        self.send(Command::Repair)
    }

    /// Download `group`, usually one of the groups from a
    /// [`PatchEvent::CreateDownloader`] event.
    pub fn begin_download(&self, group: GroupInfo) -> PatchResult<()> {
        self.send(Command::BeginDownload(group))
    }

    pub fn pause(&self) {
        self.status.downloads.pause_all();
    }

    pub fn resume(&self) {
        self.status.downloads.resume_all();
    }

    /// Stop downloads and park the pipeline.
    pub fn cancel(&self) -> PatchResult<()> {
        let canceled = self.status.downloads.cancel_all();
        self.status.fire_interrupt();
        debug!(instance = %self.instance, downloaders = canceled, "Canceling patch");
        self.bus.publish(self.instance, PatchEvent::DownloadCanceled);
        self.status.is_check.store(false, Ordering::SeqCst);
        self.status.is_repair.store(false, Ordering::SeqCst);
        self.send(Command::Cancel)
    }

    pub fn retry_app_version(&self) -> PatchResult<()> {
        self.send(Command::Retry(PatchState::AppVersionCheck))
    }

    pub fn retry_init(&self) -> PatchResult<()> {
        self.send(Command::Retry(PatchState::InitPackages))
    }

    pub fn retry_version_update(&self) -> PatchResult<()> {
        self.send(Command::Retry(PatchState::PackageVersionUpdate))
    }

    pub fn retry_manifest_update(&self) -> PatchResult<()> {
        self.send(Command::Retry(PatchState::ManifestUpdate))
    }

    pub fn retry_create_downloader(&self) -> PatchResult<()> {
        self.send(Command::Retry(PatchState::CreateDownloader))
    }

    pub fn retry_repair(&self) -> PatchResult<()> {
        self.status.is_repair.store(true, Ordering::SeqCst);
        self.send(Command::Retry(PatchState::Repair))
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PatchMessage> {
        self.bus.subscribe()
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn is_check(&self) -> bool {
        self.status.is_check.load(Ordering::SeqCst)
    }

    pub fn is_repair(&self) -> bool {
        self.status.is_repair.load(Ordering::SeqCst)
    }

    pub fn is_done(&self) -> bool {
        self.status.is_done.load(Ordering::SeqCst)
    }

    /// Last state entered, `None` before the first command.
    pub fn current_state(&self) -> Option<PatchState> {
        *self.status.state.lock()
    }

    /// Whether the orchestrator task is still running.
    pub fn is_running(&self) -> bool {
        !self.commands.is_closed()
    }

    fn send(&self, command: Command) -> PatchResult<()> {
        self.commands
            .send(command)
            .map_err(|_| PatchError::Stopped(self.instance))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::{ChunkCallback, FetchError, FetchResult};
    use crate::package::{
        DownloadCallbacks, DownloadControl, DownloadTick, DownloaderHandle, DownloaderState,
        InitParameters, PackageError, PackageHandle, PackageResult, SweepReport,
    };
    use crate::patch::disk::FixedDiskSpace;
    use crate::patch::scheduler::ImmediateScheduler;
    use crate::BoxFuture;
    use std::path::Path;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;
    use tokio::sync::Notify;

    const PATCH_CONFIG: &str = r#"{"GROUP_INFOS":[{"groupName":"ui","tags":["ui"]}]}"#;

    struct ConfigFetcher;

    impl RemoteFetcher for ConfigFetcher {
        fn fetch_text<'a>(&'a self, location: &'a str) -> BoxFuture<'a, FetchResult<String>> {
            Box::pin(async move {
                if location.ends_with("patchconfig.json") {
                    Ok(PATCH_CONFIG.to_string())
                } else {
                    Err(FetchError::Status {
                        location: location.to_string(),
                        status: 404,
                    })
                }
            })
        }
        fn fetch_to_file<'a>(
            &'a self,
            location: &'a str,
            _: &'a Path,
            _: ChunkCallback<'a>,
        ) -> BoxFuture<'a, FetchResult<u64>> {
            Box::pin(async move {
                Err(FetchError::Status {
                    location: location.to_string(),
                    status: 404,
                })
            })
        }
    }

    /// Downloader that blocks until released or canceled.
    struct GatedDownloader {
        control: DownloadControl,
        release: Arc<Notify>,
    }

    impl DownloaderHandle for GatedDownloader {
        fn package_name(&self) -> &str {
            "main"
        }
        fn total_count(&self) -> usize {
            1
        }
        fn total_bytes(&self) -> u64 {
            64
        }
        fn state(&self) -> DownloaderState {
            DownloaderState::Running
        }
        fn control(&self) -> DownloadControl {
            self.control.clone()
        }
        fn begin(&mut self, callbacks: DownloadCallbacks) -> BoxFuture<'_, DownloaderState> {
            Box::pin(async move {
                tokio::select! {
                    _ = self.control.cancelled() => DownloaderState::Canceled,
                    _ = self.release.notified() => {
                        callbacks.progress(DownloadTick {
                            total_count: 1,
                            current_count: 1,
                            total_bytes: 64,
                            current_bytes: 64,
                        });
                        DownloaderState::Succeeded
                    }
                }
            })
        }
    }

    #[derive(Default)]
    struct GatedPackage {
        initialized: AtomicBool,
        cleared: AtomicUsize,
        release: Arc<Notify>,
    }

    impl PackageHandle for GatedPackage {
        fn name(&self) -> &str {
            "main"
        }
        fn is_initialized(&self) -> bool {
            self.initialized.load(Ordering::SeqCst)
        }
        fn initialize(&self, _: InitParameters) -> BoxFuture<'_, PackageResult<()>> {
            Box::pin(async move {
                self.initialized.store(true, Ordering::SeqCst);
                Ok(())
            })
        }
        fn update_version(&self) -> BoxFuture<'_, PackageResult<String>> {
            Box::pin(async { Ok("v2".to_string()) })
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
            if !self.is_initialized() {
                return Err(PackageError::NotInitialized {
                    package: "main".into(),
                });
            }
            Ok(Box::new(GatedDownloader {
                control: DownloadControl::new(),
                release: Arc::clone(&self.release),
            }))
        }
        fn clear_unused_cache(&self) -> BoxFuture<'_, PackageResult<SweepReport>> {
            Box::pin(async { Ok(SweepReport::default()) })
        }
        fn clear_all_cache(&self) -> BoxFuture<'_, PackageResult<()>> {
            Box::pin(async move {
                self.cleared.fetch_add(1, Ordering::SeqCst);
                self.initialized.store(false, Ordering::SeqCst);
                Ok(())
            })
        }
        fn check_location_valid(&self, _: &str) -> bool {
            false
        }
    }

    struct Harness {
        handle: PatchHandle,
        events: broadcast::Receiver<PatchMessage>,
        package: Arc<GatedPackage>,
        _dir: tempfile::TempDir,
    }

    fn harness(flow: PatchFlow) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let settings = PatchSettings::new(dir.path().to_path_buf())
            .with_host("https://cdn.example.com/game")
            .with_play_mode(PlayMode::Host);
        let package = Arc::new(GatedPackage::default());
        let handle = PatchOrchestrator::builder(InstanceId(9), settings)
            .flow(flow)
            .package(PackageEntry::new(package.clone()))
            .fetcher(Arc::new(ConfigFetcher))
            .scheduler(Arc::new(ImmediateScheduler))
            .disk_probe(Arc::new(FixedDiskSpace(None)))
            .spawn(&PatchRegistry::new())
            .unwrap();
        let events = handle.subscribe();
        Harness {
            handle,
            events,
            package,
            _dir: dir,
        }
    }

    async fn next_event(events: &mut broadcast::Receiver<PatchMessage>) -> PatchEvent {
        tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .expect("event within timeout")
            .expect("bus open")
            .event
    }

    async fn wait_for(
        events: &mut broadcast::Receiver<PatchMessage>,
        wanted: impl Fn(&PatchEvent) -> bool,
    ) -> Vec<PatchEvent> {
        let mut seen = Vec::new();
        loop {
            let event = next_event(events).await;
            let done = wanted(&event);
            seen.push(event);
            if done {
                return seen;
            }
        }
    }

    fn dlc_flow() -> PatchFlow {
        PatchFlow::Dlc {
            group: GroupInfo::new("ui", vec!["ui".into()]),
            skip_download: false,
        }
    }

    #[tokio::test]
    async fn test_cancel_interrupts_download() {
        let mut h = harness(dlc_flow());
        h.handle.check().unwrap();
        wait_for(&mut h.events, |e| {
            *e == PatchEvent::StateEntered(PatchState::BeginDownload)
        })
        .await;

        h.handle.cancel().unwrap();
        let seen = wait_for(&mut h.events, |e| *e == PatchEvent::DownloadCanceled).await;
        assert!(!seen.contains(&PatchEvent::Done));
        assert!(!h.handle.is_check());
        assert!(!h.handle.is_done());

        // A fresh check runs the whole flow again.
        h.handle.check().unwrap();
        wait_for(&mut h.events, |e| {
            *e == PatchEvent::StateEntered(PatchState::BeginDownload)
        })
        .await;
        h.package.release.notify_one();
        wait_for(&mut h.events, |e| *e == PatchEvent::Done).await;
        assert!(h.handle.is_done());
    }

    #[tokio::test]
    async fn test_repair_preempts_download() {
        let mut h = harness(dlc_flow());
        h.handle.check().unwrap();
        wait_for(&mut h.events, |e| {
            *e == PatchEvent::StateEntered(PatchState::BeginDownload)
        })
        .await;

        h.handle.repair().unwrap();
        let seen = wait_for(&mut h.events, |e| {
            *e == PatchEvent::StateEntered(PatchState::BeginDownload)
        })
        .await;
        assert_eq!(seen[0], PatchEvent::StateEntered(PatchState::Repair));
        assert_eq!(h.package.cleared.load(Ordering::SeqCst), 1);
        assert!(!h.handle.is_repair());

        h.package.release.notify_one();
        wait_for(&mut h.events, |e| *e == PatchEvent::Done).await;
    }

    #[tokio::test]
    async fn test_app_flow_parks_for_selection() {
        // Start past the version gate; the fetcher only serves the patch config.
        let mut h = harness(PatchFlow::App);
        h.handle.retry_init().unwrap();

        let seen = wait_for(&mut h.events, |e| {
            matches!(e, PatchEvent::CreateDownloader { .. })
        })
        .await;
        let Some(PatchEvent::CreateDownloader { groups }) = seen.last() else {
            unreachable!()
        };
        let names: Vec<&str> = groups.iter().map(|g| g.group_name.as_str()).collect();
        assert_eq!(names, vec!["#all", "ui"]);
        assert_eq!(h.handle.current_state(), Some(PatchState::CreateDownloader));

        h.handle.begin_download(groups[1].clone()).unwrap();
        wait_for(&mut h.events, |e| {
            *e == PatchEvent::StateEntered(PatchState::BeginDownload)
        })
        .await;
        h.package.release.notify_one();
        wait_for(&mut h.events, |e| *e == PatchEvent::Done).await;
    }

    #[tokio::test]
    async fn test_duplicate_instance_rejected() {
        let registry = PatchRegistry::new();
        let settings = PatchSettings::new(std::env::temp_dir());
        let _first = PatchOrchestrator::builder(InstanceId(4), settings.clone())
            .fetcher(Arc::new(ConfigFetcher))
            .spawn(&registry)
            .unwrap();
        let err = PatchOrchestrator::builder(InstanceId(4), settings)
            .fetcher(Arc::new(ConfigFetcher))
            .spawn(&registry)
            .unwrap_err();
        assert!(matches!(err, PatchError::InstanceInUse(_)));
    }

    #[tokio::test]
    async fn test_retry_of_non_retryable_state_is_ignored() {
        let mut h = harness(dlc_flow());
        h.handle
            .send(Command::Retry(PatchState::ClearCache))
            .unwrap();
        h.handle.retry_init().unwrap();
        let first = next_event(&mut h.events).await;
        assert_eq!(first, PatchEvent::StateEntered(PatchState::InitPackages));
    }
}
