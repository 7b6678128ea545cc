//! Common utilities shared across CLI commands.

use std::path::Path;
use std::sync::Arc;

use bundlepatch::config::{config_file_path, ConfigFile};
use bundlepatch::fetch::{HttpFetcher, RemoteFetcher};
use bundlepatch::package::{HostedPackage, PackageEntry};
use bundlepatch::patch::{InstanceId, PatchHandle, PatchOrchestrator, PatchRegistry};
use tracing::info;

use crate::error::CliError;

/// Load the config file at `path`, or the default location.
pub fn load_config(path: Option<&Path>) -> Result<ConfigFile, CliError> {
    let path = path.map(Path::to_path_buf).unwrap_or_else(config_file_path);
    let config = ConfigFile::load_from(&path)?;
    info!(path = %path.display(), packages = ?config.packages, "Loaded configuration");
    Ok(config)
}

/// Start the app orchestrator for every configured package.
///
/// Must be called from inside the tokio runtime.
pub fn spawn_app(config: &ConfigFile, registry: &PatchRegistry) -> Result<PatchHandle, CliError> {
    if config.packages.is_empty() {
        return Err(CliError::Config("no packages configured".to_string()));
    }

    let settings = config.settings.clone();
    let fetcher: Arc<dyn RemoteFetcher> = Arc::new(
        HttpFetcher::with_timeout(settings.http_timeout)
            .map_err(|e| CliError::Config(format!("Failed to create HTTP client: {}", e)))?,
    );

    let entries: Vec<PackageEntry> = config
        .packages
        .iter()
        .map(|name| {
            PackageEntry::new(Arc::new(HostedPackage::new(
                name.as_str(),
                &settings,
                Arc::clone(&fetcher),
            )))
        })
        .collect();

    let handle = PatchOrchestrator::builder(InstanceId::APP, settings)
        .packages(entries)
        .fetcher(fetcher)
        .spawn(registry)?;
    Ok(handle)
}
