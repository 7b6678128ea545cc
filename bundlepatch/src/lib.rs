//! BundlePatch - patch orchestration for versioned asset-bundle packages.
//!
//! The crate reconciles locally installed bundle packages with an
//! authoritative remote version, downloads only what is missing, and
//! sweeps cache files the current manifest no longer references.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐  commands   ┌──────────────────────────────────────────┐
//! │ PatchHandle  │────────────►│ PatchOrchestrator (one task per instance)│
//! └──────┬───────┘             │                                          │
//!        │ subscribe           │  Repair → Prepare → AppVersionCheck      │
//!        ▼                     │  → InitPackages → PackageVersionUpdate   │
//! ┌──────────────┐   events    │  → ManifestUpdate → CreateDownloader     │
//! │   EventBus   │◄────────────│  → BeginDownload → DownloadOver          │
//! └──────────────┘             │  → ClearCache → Done                     │
//!                              └──────────────┬───────────────────────────┘
//!                                             │ Arc<dyn PackageHandle>
//!                                             ▼
//!                              ┌──────────────────────────────────────────┐
//!                              │ HostedPackage (manifest server + sandbox)│
//!                              └──────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```ignore
//! use bundlepatch::config::PatchSettings;
//! use bundlepatch::patch::{InstanceId, PatchOrchestrator, PatchRegistry};
//!
//! let registry = PatchRegistry::new();
//! let handle = PatchOrchestrator::builder(InstanceId::APP, settings)
//!     .package(entry)
//!     .spawn(&registry)?;
//!
//! let mut events = handle.subscribe();
//! handle.check();
//! ```

use std::future::Future;
use std::pin::Pin;

pub mod config;
pub mod fetch;
pub mod logging;
pub mod package;
pub mod patch;
pub mod retry;
pub mod version;

/// Boxed future type for dyn-compatible async methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;
