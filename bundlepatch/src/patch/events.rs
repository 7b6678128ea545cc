//! Patch notifications for decoupled observers.
//!
//! Each orchestrator owns an [`EventBus`]. Publishing never blocks and never
//! fails: with no subscriber the event is simply dropped, and a subscriber
//! that falls behind sees `RecvError::Lagged` instead of stalling the
//! pipeline.

use std::fmt;

use tokio::sync::broadcast;
use tracing::trace;

use super::planner::GroupInfo;
use super::speed::DownloadProgress;
use super::state::PatchState;

/// Default number of events buffered per subscriber.
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Caller-supplied id of one orchestration instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstanceId(pub u32);

impl InstanceId {
    /// Conventional id of the main application flow.
    pub const APP: InstanceId = InstanceId(0);
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Something that happened inside a patch flow.
#[derive(Debug, Clone, PartialEq)]
pub enum PatchEvent {
    /// The pipeline entered a state.
    StateEntered(PatchState),
    /// The remote app config could not be fetched or read.
    AppVersionUpdateFailed { reason: String },
    /// The installed app is too old; the user must update it from the store.
    GoToAppStore { local: String, remote: String },
    /// A package failed to initialize.
    InitPatchModeFailed { package: String, reason: String },
    /// A package's latest version could not be fetched.
    VersionUpdateFailed { package: String, reason: String },
    /// A package's manifest could not be applied.
    ManifestUpdateFailed { package: String, reason: String },
    /// Groups could not be planned.
    CreateDownloaderFailed { reason: String },
    /// Groups are planned and the pipeline waits for a selection.
    CreateDownloader { groups: Vec<GroupInfo> },
    /// Aggregate download progress.
    DownloadProgress(DownloadProgress),
    /// A file kept failing after its retries.
    DownloadFailed { file_name: String, error: String },
    /// A package downloader finished in the failed state.
    DownloaderFailed { package: String },
    /// Free space is below what the selected group needs.
    DiskNotEnoughSpace { available_mb: u64, required_bytes: u64 },
    /// Downloads were canceled.
    DownloadCanceled,
    /// Clearing local state during repair failed.
    RepairFailed { package: String, reason: String },
    /// The pipeline finished.
    Done,
}

impl PatchEvent {
    /// Whether the pipeline parked because of this event.
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            PatchEvent::AppVersionUpdateFailed { .. }
                | PatchEvent::GoToAppStore { .. }
                | PatchEvent::InitPatchModeFailed { .. }
                | PatchEvent::VersionUpdateFailed { .. }
                | PatchEvent::ManifestUpdateFailed { .. }
                | PatchEvent::CreateDownloaderFailed { .. }
                | PatchEvent::DownloaderFailed { .. }
                | PatchEvent::DiskNotEnoughSpace { .. }
                | PatchEvent::RepairFailed { .. }
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            PatchEvent::StateEntered(_) => "StateEntered",
            PatchEvent::AppVersionUpdateFailed { .. } => "AppVersionUpdateFailed",
            PatchEvent::GoToAppStore { .. } => "GoToAppStore",
            PatchEvent::InitPatchModeFailed { .. } => "InitPatchModeFailed",
            PatchEvent::VersionUpdateFailed { .. } => "VersionUpdateFailed",
            PatchEvent::ManifestUpdateFailed { .. } => "ManifestUpdateFailed",
            PatchEvent::CreateDownloaderFailed { .. } => "CreateDownloaderFailed",
            PatchEvent::CreateDownloader { .. } => "CreateDownloader",
            PatchEvent::DownloadProgress(_) => "DownloadProgress",
            PatchEvent::DownloadFailed { .. } => "DownloadFailed",
            PatchEvent::DownloaderFailed { .. } => "DownloaderFailed",
            PatchEvent::DiskNotEnoughSpace { .. } => "DiskNotEnoughSpace",
            PatchEvent::DownloadCanceled => "DownloadCanceled",
            PatchEvent::RepairFailed { .. } => "RepairFailed",
            PatchEvent::Done => "Done",
        }
    }
}

/// An event tagged with the instance that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct PatchMessage {
    pub instance: InstanceId,
    pub event: PatchEvent,
}

/// Broadcast channel of [`PatchMessage`]s.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<PatchMessage>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publish `event` for `instance`. Fire and forget.
    pub fn publish(&self, instance: InstanceId, event: PatchEvent) {
        trace!(instance = %instance, event = event.name(), "Publishing patch event");
        let _ = self.sender.send(PatchMessage { instance, event });
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PatchMessage> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}
