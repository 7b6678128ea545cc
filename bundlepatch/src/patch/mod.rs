//! Patch pipeline: version gate, package reconciliation, grouped download and
//! cache cleanup, driven by a per-instance state machine.
//!
//! # Module Structure
//!
//! - [`orchestrator`]: the state machine task and its [`PatchHandle`]
//! - [`state`]: pipeline states and the transition table
//! - [`initializer`], [`reconciler`], [`planner`], [`executor`], [`sweeper`]:
//!   the per-state workers
//! - [`events`]: [`EventBus`] notifications
//! - [`registry`]: one orchestrator per instance id
//! - [`selection`]: persisted last group choice
//! - [`scheduler`], [`disk`]: injectable timing and disk-space probes
//!
//! # Events
//!
//! Every state entry publishes [`PatchEvent::StateEntered`]. Failures park
//! the pipeline and publish a failure event; the caller resumes with the
//! matching `retry_*` method on the handle.

pub mod context;
pub mod disk;
mod error;
pub mod events;
pub mod executor;
pub mod initializer;
pub mod orchestrator;
pub mod planner;
pub mod reconciler;
pub mod registry;
pub mod scheduler;
pub mod selection;
pub mod speed;
pub mod state;
pub mod sweeper;

pub use context::PatchContext;
pub use disk::{DiskSpaceProbe, FixedDiskSpace, StatvfsProbe};
pub use error::{ErrorKind, PatchError, PatchResult};
pub use events::{EventBus, InstanceId, PatchEvent, PatchMessage, DEFAULT_EVENT_CAPACITY};
pub use executor::{ActiveDownloads, DownloadExecutor, DownloadSummary, EventSink, ExecutorConfig};
pub use initializer::PackageInitializer;
pub use orchestrator::{PatchFlow, PatchHandle, PatchOrchestrator, PatchOrchestratorBuilder};
pub use planner::{DownloadGroupPlanner, GroupInfo, GroupPlan, PatchConfig, DEFAULT_GROUP_TAG};
pub use reconciler::ManifestReconciler;
pub use registry::{PatchRegistry, RegistrationGuard};
pub use scheduler::{FrameScheduler, ImmediateScheduler, TokioScheduler};
pub use selection::{FileSelectionStore, SelectionError, SelectionStore};
pub use speed::{DownloadProgress, SpeedCalculator};
pub use state::PatchState;
pub use sweeper::CacheSweeper;
