//! Package initialization.
//!
//! Per-package plumbing is resolved in this order:
//!
//! 1. Explicit [`PackageOverrides`] on the entry.
//! 2. Computed defaults (`<default_host>/<package>`, installation builtin
//!    query), only in networked play modes and only when enabled.
//!
//! Offline and simulated modes never construct network plumbing.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, info};

use super::error::{PatchError, PatchResult};
use crate::config::{PatchSettings, PlayMode};
use crate::fetch::join_location;
use crate::package::{BuiltinQuery, InitParameters, InstallationQuery, PackageEntry};

/// Brings packages into an operable state.
#[derive(Debug, Clone)]
pub struct PackageInitializer {
    play_mode: PlayMode,
    default_host: Option<String>,
    fallback_host: Option<String>,
    installation_dir: PathBuf,
    use_defaults: bool,
}

impl PackageInitializer {
    pub fn new(settings: &PatchSettings) -> Self {
        Self {
            play_mode: settings.play_mode,
            default_host: settings.default_host.clone(),
            fallback_host: settings.fallback_host.clone(),
            installation_dir: settings.installation_dir.clone(),
            use_defaults: true,
        }
    }

    /// Only use the explicit per-package overrides.
    pub fn overrides_only(mut self) -> Self {
        self.use_defaults = false;
        self
    }

    /// Parameters `entry` is initialized with.
    pub fn resolve(&self, entry: &PackageEntry) -> InitParameters {
        let overrides = &entry.overrides;
        let mut params = InitParameters {
            play_mode: self.play_mode,
            host_server: overrides.host_server.clone(),
            fallback_host_server: overrides.fallback_host_server.clone(),
            builtin_query: overrides.builtin_query.clone(),
            delivery_query: overrides.delivery_query.clone(),
        };

        if !self.play_mode.is_networked() || !self.use_defaults {
            return params;
        }

        let name = entry.name();
        if params.host_server.is_none() {
            params.host_server = self
                .default_host
                .as_deref()
                .map(|host| join_location(host, name));
        }
        if params.fallback_host_server.is_none() {
            params.fallback_host_server = self
                .fallback_host
                .as_deref()
                .map(|host| join_location(host, name));
        }
        if params.builtin_query.is_none() {
            let query: Arc<dyn BuiltinQuery> =
                Arc::new(InstallationQuery::new(&self.installation_dir));
            params.builtin_query = Some(query);
        }
        params
    }

    /// Initialize every package in order, stopping at the first failure.
    ///
    /// Packages that are already initialized are skipped without any I/O.
    pub async fn init_all(&self, packages: &[PackageEntry]) -> PatchResult<()> {
        let mut initialized = 0usize;
        for entry in packages {
            if entry.handle.is_initialized() {
                debug!(package = %entry.name(), "Package already initialized");
                continue;
            }

            let params = self.resolve(entry);
            debug!(package = %entry.name(), params = ?params, "Initializing package");
            entry
                .handle
                .initialize(params)
                .await
                .map_err(|source| PatchError::PackageInit {
                    package: entry.name().to_string(),
                    source,
                })?;
            initialized += 1;
        }

        if initialized > 0 {
            info!(initialized, total = packages.len(), "Packages initialized");
        }
        Ok(())
    }
}
