//! Package collaborators driven by the patch orchestrator.
//!
//! A package is a named, independently versioned collection of bundle files.
//! The orchestrator only sees it through [`PackageHandle`]; how manifests are
//! stored or files are transferred is up to the implementation.
//! [`HostedPackage`] is the implementation backed by a manifest server and a
//! sandbox directory.
//!
//! # Module Structure
//!
//! - [`traits`]: `PackageHandle`, `DownloaderHandle` and their value types
//! - [`control`]: pause/resume/cancel switch shared with running downloads
//! - [`query`]: builtin and delivery query services
//! - [`hosted`]: manifest-server backed package

pub mod control;
mod error;
pub mod hosted;
pub mod query;
pub mod traits;

pub use control::DownloadControl;
pub use error::{PackageError, PackageResult};
pub use hosted::{BundleEntry, HostedPackage, PackageManifest};
pub use query::{BuiltinQuery, DeliveryQuery, InstallationQuery, NoDeliveryQuery};
pub use traits::{
    DownloadCallbacks, DownloadTick, DownloaderHandle, DownloaderState, FileErrorCallback,
    InitParameters, PackageEntry, PackageHandle, PackageOverrides, ProgressCallback, SweepReport,
};
