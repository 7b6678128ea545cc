//! Application version gating.
//!
//! The app version lives in a small JSON file (`AppConfig`) that exists in
//! three places: the read-only installation bundle, a writable sandbox
//! mirror, and the content server. [`VersionGate`] keeps the sandbox mirror
//! current and decides whether the installed application may go on patching
//! content or must be updated through the store first.

mod config;
mod error;
mod gate;

pub use config::{AppConfig, AppVersion, SemanticRule};
pub use error::{VersionError, VersionResult};
pub use gate::{GateOutcome, VersionGate};
