//! Package backed by a manifest server and a sandbox directory.
//!
//! # Remote Layout
//!
//! ```text
//! <host>/
//! ├── <package>.version            latest version, plain text
//! ├── <package>_<version>.json     manifest for that version
//! └── <bundle name>                bundle files
//! ```
//!
//! # Sandbox Layout
//!
//! ```text
//! <sandbox>/packages/<package>/
//! ├── manifest.json                applied manifest
//! ├── version                      applied version
//! └── cache/<sha256>               downloaded bundles
//! ```
//!
//! In offline and simulate modes the installation directory
//! `<installation>/<package>` takes the place of the host.

mod checksum;
mod downloader;
mod manifest;

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::config::{PatchSettings, PlayMode};
use crate::fetch::{join_location, RemoteFetcher};
use crate::package::error::{PackageError, PackageResult};
use crate::package::query::{BuiltinQuery, DeliveryQuery};
use crate::package::traits::{
    DownloaderHandle, InitParameters, PackageHandle, SweepReport,
};
use crate::retry::RetryPolicy;
use crate::BoxFuture;

pub use checksum::{calculate_file_checksum, verify_checksum};
pub use downloader::HostedDownloader;
pub use manifest::{manifest_file_name, version_file_name, BundleEntry, PackageManifest};

use downloader::PendingBundle;

const MANIFEST_FILE: &str = "manifest.json";
const VERSION_FILE: &str = "version";
const CACHE_DIR: &str = "cache";

/// Mutable state of a hosted package.
#[derive(Default)]
struct HostedState {
    initialized: bool,
    play_mode: PlayMode,
    sources: Vec<String>,
    builtin: Option<Arc<dyn BuiltinQuery>>,
    delivery: Option<Arc<dyn DeliveryQuery>>,
    manifest: Option<PackageManifest>,
}

/// Hosted package implementation of [`PackageHandle`].
pub struct HostedPackage {
    name: String,
    root: PathBuf,
    installation: PathBuf,
    fetcher: Arc<dyn RemoteFetcher>,
    retry_delay: Option<std::time::Duration>,
    state: RwLock<HostedState>,
}

impl HostedPackage {
    /// Create a package whose sandbox and installation dirs come from
    /// `settings`.
    pub fn new(
        name: impl Into<String>,
        settings: &PatchSettings,
        fetcher: Arc<dyn RemoteFetcher>,
    ) -> Self {
        let name = name.into();
        Self {
            root: settings.packages_dir().join(&name),
            installation: settings.installation_dir.join(&name),
            name,
            fetcher,
            retry_delay: None,
            state: RwLock::new(HostedState::default()),
        }
    }

    /// Override the delay between per-file retries.
    pub fn with_retry_delay(mut self, delay: std::time::Duration) -> Self {
        self.retry_delay = Some(delay);
        self
    }

    /// Sandbox directory of this package.
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.root.join(CACHE_DIR)
    }

    /// Version of the applied manifest, if any.
    pub fn applied_version(&self) -> Option<String> {
        self.state.read().manifest.as_ref().map(|m| m.version.clone())
    }

    fn sources(&self) -> PackageResult<Vec<String>> {
        let state = self.state.read();
        if !state.initialized {
            return Err(PackageError::NotInitialized {
                package: self.name.clone(),
            });
        }
        Ok(state.sources.clone())
    }

    /// Fetch `file` from the first source that has it.
    async fn fetch_from_sources(&self, file: &str) -> Result<String, String> {
        let sources = self.sources().map_err(|e| e.to_string())?;
        let mut last_error = String::from("no sources configured");
        for source in &sources {
            let location = join_location(source, file);
            match self.fetcher.fetch_text(&location).await {
                Ok(text) => return Ok(text),
                Err(e) => {
                    debug!(package = %self.name, location = %location, error = %e, "Source failed");
                    last_error = e.to_string();
                }
            }
        }
        Err(last_error)
    }

    async fn load_applied_manifest(&self) -> Option<PackageManifest> {
        let path = self.root.join(MANIFEST_FILE);
        let text = tokio::fs::read_to_string(&path).await.ok()?;
        match PackageManifest::from_json(&text, &self.name) {
            Ok(manifest) => Some(manifest),
            Err(e) => {
                warn!(package = %self.name, error = %e, "Ignoring unreadable applied manifest");
                None
            }
        }
    }

    fn is_on_device(&self, state: &HostedState, bundle: &BundleEntry) -> bool {
        if self.cache_dir().join(&bundle.hash).is_file() {
            return true;
        }
        if let Some(builtin) = &state.builtin {
            if builtin.is_builtin(&self.name, &bundle.name) {
                return true;
            }
        }
        if let Some(delivery) = &state.delivery {
            if let Some(path) = delivery.delivery_path(&self.name, &bundle.name) {
                return path.is_file();
            }
        }
        false
    }
}

impl PackageHandle for HostedPackage {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_initialized(&self) -> bool {
        self.state.read().initialized
    }

    fn initialize(&self, params: InitParameters) -> BoxFuture<'_, PackageResult<()>> {
        Box::pin(async move {
            let sources = if params.play_mode.is_networked() {
                let sources: Vec<String> = params
                    .host_server
                    .iter()
                    .chain(params.fallback_host_server.iter())
                    .cloned()
                    .collect();
                if sources.is_empty() {
                    return Err(PackageError::NoHostServer {
                        package: self.name.clone(),
                    });
                }
                sources
            } else {
                vec![self.installation.display().to_string()]
            };

            let cache = self.cache_dir();
            tokio::fs::create_dir_all(&cache)
                .await
                .map_err(|e| PackageError::io(&cache, e))?;

            let manifest = self.load_applied_manifest().await;
            let applied = manifest.as_ref().map(|m| m.version.clone());

            let mut state = self.state.write();
            state.play_mode = params.play_mode;
            state.sources = sources;
            state.builtin = params.builtin_query;
            state.delivery = params.delivery_query;
            state.manifest = manifest;
            state.initialized = true;
            drop(state);

            info!(
                package = %self.name,
                mode = %params.play_mode,
                applied = ?applied,
                "Package initialized"
            );
            Ok(())
        })
    }

    fn update_version(&self) -> BoxFuture<'_, PackageResult<String>> {
        Box::pin(async move {
            let text = self
                .fetch_from_sources(&version_file_name(&self.name))
                .await
                .map_err(|reason| PackageError::VersionUnavailable {
                    package: self.name.clone(),
                    reason,
                })?;

            let version = text.trim().to_string();
            if version.is_empty() {
                return Err(PackageError::VersionUnavailable {
                    package: self.name.clone(),
                    reason: "version file is empty".to_string(),
                });
            }
            debug!(package = %self.name, version = %version, "Latest package version");
            Ok(version)
        })
    }

    fn update_manifest<'a>(&'a self, version: &'a str) -> BoxFuture<'a, PackageResult<()>> {
        Box::pin(async move {
            if self.applied_version().as_deref() == Some(version) {
                debug!(package = %self.name, version, "Manifest already applied");
                return Ok(());
            }

            let text = self
                .fetch_from_sources(&manifest_file_name(&self.name, version))
                .await
                .map_err(|reason| PackageError::ManifestUnavailable {
                    package: self.name.clone(),
                    version: version.to_string(),
                    reason,
                })?;

            let manifest = PackageManifest::from_json(&text, &self.name)?;
            if manifest.version != version {
                return Err(PackageError::InvalidManifest {
                    package: self.name.clone(),
                    reason: format!(
                        "requested version {} but manifest is {}",
                        version, manifest.version
                    ),
                });
            }

            let path = self.root.join(MANIFEST_FILE);
            tokio::fs::write(&path, manifest.to_json())
                .await
                .map_err(|e| PackageError::io(&path, e))?;

            info!(
                package = %self.name,
                version,
                bundles = manifest.bundles.len(),
                "Manifest applied"
            );
            self.state.write().manifest = Some(manifest);
            Ok(())
        })
    }

    fn save_version<'a>(&'a self, version: &'a str) -> BoxFuture<'a, PackageResult<()>> {
        Box::pin(async move {
            let path = self.root.join(VERSION_FILE);
            tokio::fs::write(&path, version)
                .await
                .map_err(|e| PackageError::io(&path, e))
        })
    }

    fn create_downloader(
        &self,
        tags: Option<&[String]>,
        max_concurrency: usize,
        max_retry: u32,
    ) -> PackageResult<Box<dyn DownloaderHandle>> {
        let state = self.state.read();
        let manifest = state
            .manifest
            .as_ref()
            .ok_or_else(|| PackageError::ManifestNotLoaded {
                package: self.name.clone(),
            })?;

        let mut seen = HashSet::new();
        let pending: Vec<PendingBundle> = manifest
            .select(tags)
            .filter(|bundle| !self.is_on_device(&state, bundle))
            .filter(|bundle| seen.insert(bundle.hash.clone()))
            .map(|bundle| PendingBundle {
                name: bundle.name.clone(),
                hash: bundle.hash.clone(),
                size: bundle.size,
            })
            .collect();

        let mut retry = RetryPolicy::for_files(max_retry);
        if let Some(delay) = self.retry_delay {
            retry = retry.with_delay(delay);
        }

        Ok(Box::new(HostedDownloader::new(
            self.name.clone(),
            pending,
            state.sources.clone(),
            self.cache_dir(),
            Arc::clone(&self.fetcher),
            max_concurrency,
            retry,
        )))
    }

    fn clear_unused_cache(&self) -> BoxFuture<'_, PackageResult<SweepReport>> {
        Box::pin(async move {
            let keep: HashSet<String> = {
                let state = self.state.read();
                let manifest =
                    state
                        .manifest
                        .as_ref()
                        .ok_or_else(|| PackageError::ManifestNotLoaded {
                            package: self.name.clone(),
                        })?;
                manifest
                    .referenced_hashes()
                    .into_iter()
                    .map(str::to_string)
                    .collect()
            };

            let cache = self.cache_dir();
            let mut report = SweepReport::default();
            let mut entries = match tokio::fs::read_dir(&cache).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(report),
                Err(e) => return Err(PackageError::io(&cache, e)),
            };

            while let Some(entry) = entries
                .next_entry()
                .await
                .map_err(|e| PackageError::io(&cache, e))?
            {
                let file_name = entry.file_name().to_string_lossy().to_string();
                if keep.contains(&file_name) {
                    continue;
                }
                let size = entry.metadata().await.map(|m| m.len()).unwrap_or(0);
                match tokio::fs::remove_file(entry.path()).await {
                    Ok(()) => {
                        report.files_removed += 1;
                        report.bytes_freed += size;
                    }
                    Err(e) => {
                        warn!(package = %self.name, file = %file_name, error = %e, "Failed to remove cache file")
                    }
                }
            }

            info!(
                package = %self.name,
                removed = report.files_removed,
                bytes = report.bytes_freed,
                "Unused cache cleared"
            );
            Ok(report)
        })
    }

    fn clear_all_cache(&self) -> BoxFuture<'_, PackageResult<()>> {
        Box::pin(async move {
            {
                let mut state = self.state.write();
                state.initialized = false;
                state.manifest = None;
            }

            match tokio::fs::remove_dir_all(&self.root).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(PackageError::io(&self.root, e)),
            }
            info!(package = %self.name, "Package unloaded and cache cleared");
            Ok(())
        })
    }

    fn check_location_valid(&self, asset_name: &str) -> bool {
        self.state
            .read()
            .manifest
            .as_ref()
            .is_some_and(|m| m.contains_bundle(asset_name))
    }
}
