//! Orchestrator states and their transition table.
//!
//! ```text
//! Repair ──► Prepare ──► AppVersionCheck ──► InitPackages ──► PackageVersionUpdate
//!               │                                ▲                    │
//!               └────────── (package flow) ──────┘                    ▼
//!                                                              ManifestUpdate
//!                                                                     │
//!            ┌────────────── (skip / nothing to download) ────────────┤
//!            ▼                                                        ▼
//!      DownloadOver ◄──── BeginDownload ◄──── (begin) ──── CreateDownloader
//!            │
//!            ▼
//!       ClearCache ──► Done
//! ```

use std::fmt;

/// One node of the patch pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PatchState {
    Repair,
    Prepare,
    AppVersionCheck,
    InitPackages,
    PackageVersionUpdate,
    ManifestUpdate,
    CreateDownloader,
    BeginDownload,
    DownloadOver,
    ClearCache,
    Done,
}

impl PatchState {
    /// Every state, in nominal pipeline order.
    pub const ALL: [PatchState; 11] = [
        PatchState::Repair,
        PatchState::Prepare,
        PatchState::AppVersionCheck,
        PatchState::InitPackages,
        PatchState::PackageVersionUpdate,
        PatchState::ManifestUpdate,
        PatchState::CreateDownloader,
        PatchState::BeginDownload,
        PatchState::DownloadOver,
        PatchState::ClearCache,
        PatchState::Done,
    ];

    /// States this state may drive the pipeline into on success.
    pub fn successors(self) -> &'static [PatchState] {
        use PatchState::*;
        match self {
            Repair => &[Prepare],
            // Package flows and editor simulation skip the version gate.
            Prepare => &[AppVersionCheck, InitPackages],
            AppVersionCheck => &[InitPackages],
            InitPackages => &[PackageVersionUpdate],
            PackageVersionUpdate => &[ManifestUpdate],
            ManifestUpdate => &[CreateDownloader, DownloadOver],
            CreateDownloader => &[BeginDownload, DownloadOver, Done],
            BeginDownload => &[DownloadOver],
            DownloadOver => &[ClearCache],
            ClearCache => &[Done],
            Done => &[],
        }
    }

    /// Whether `self -> next` is an edge of the pipeline.
    pub fn can_transition_to(self, next: PatchState) -> bool {
        self.successors().contains(&next)
    }

    /// Whether a repair or cancel may interrupt this state mid-flight.
    ///
    /// A cache sweep always runs to completion.
    pub fn is_interruptible(self) -> bool {
        !matches!(self, PatchState::ClearCache)
    }

    /// States a caller can re-enter explicitly after a failure event.
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            PatchState::Repair
                | PatchState::AppVersionCheck
                | PatchState::InitPackages
                | PatchState::PackageVersionUpdate
                | PatchState::ManifestUpdate
                | PatchState::CreateDownloader
        )
    }

    pub fn name(self) -> &'static str {
        match self {
            PatchState::Repair => "Repair",
            PatchState::Prepare => "Prepare",
            PatchState::AppVersionCheck => "AppVersionCheck",
            PatchState::InitPackages => "InitPackages",
            PatchState::PackageVersionUpdate => "PackageVersionUpdate",
            PatchState::ManifestUpdate => "ManifestUpdate",
            PatchState::CreateDownloader => "CreateDownloader",
            PatchState::BeginDownload => "BeginDownload",
            PatchState::DownloadOver => "DownloadOver",
            PatchState::ClearCache => "ClearCache",
            PatchState::Done => "Done",
        }
    }
}

impl fmt::Display for PatchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
