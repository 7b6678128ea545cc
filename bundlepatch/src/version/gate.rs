//! App-version gate between the installed binary and the content server.
//!
//! ```text
//!  installation/appconfig.json ──seed/refresh──► sandbox/appconfig.json
//!                                                        │
//!              remote appconfig.json ──compare (rule)────┘
//!                         │
//!            match ───────┴──────── mismatch
//!              │                       │
//!          proceed                go to store
//! ```

use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use super::config::{AppConfig, AppVersion, SemanticRule};
use super::error::{VersionError, VersionResult};
use crate::fetch::RemoteFetcher;

/// Result of a version check.
#[derive(Debug, Clone, PartialEq)]
pub struct GateOutcome {
    /// Whether the pipeline may continue.
    pub proceed: bool,
    /// Version in the sandbox copy at comparison time.
    pub local_version: AppVersion,
    /// Version published remotely.
    pub remote_version: AppVersion,
    /// Whether the sandbox copy was written during this check.
    pub sandbox_rewritten: bool,
}

/// Compares the local app config against the authoritative one.
#[derive(Debug, Clone)]
pub struct VersionGate {
    bundle_config: PathBuf,
    sandbox_config: PathBuf,
    rule: SemanticRule,
    force_sync: bool,
}

impl VersionGate {
    /// Create a gate over the installation and sandbox copies.
    pub fn new(bundle_config: PathBuf, sandbox_config: PathBuf, rule: SemanticRule) -> Self {
        Self {
            bundle_config,
            sandbox_config,
            rule,
            force_sync: false,
        }
    }

    /// Always overwrite the sandbox copy from the installation copy.
    ///
    /// Used in offline mode, where the installation copy is also the remote.
    pub fn with_force_sync(mut self, force: bool) -> Self {
        self.force_sync = force;
        self
    }

    pub fn rule(&self) -> SemanticRule {
        self.rule
    }

    /// Run the check against `remote_location`.
    ///
    /// # Errors
    ///
    /// [`VersionError::RemoteUnavailable`] when the remote config cannot be
    /// fetched; this is retryable, unlike a mismatch which is reported
    /// through `GateOutcome::proceed`.
    pub async fn check(
        &self,
        fetcher: &dyn RemoteFetcher,
        remote_location: &str,
    ) -> VersionResult<GateOutcome> {
        let mut sandbox_rewritten = self.sync_sandbox().await?;

        let remote_text = fetcher.fetch_text(remote_location).await?;
        let remote = AppConfig::from_json(&remote_text, remote_location)?;
        let remote_version = remote.version()?;

        let local = read_config(&self.sandbox_config)
            .await?
            .ok_or_else(|| VersionError::BundleConfigMissing {
                path: self.sandbox_config.clone(),
            })?;
        let local_version = local.version()?;

        if !local_version.matches(&remote_version, self.rule) {
            warn!(
                local = %local_version.number(self.rule),
                remote = %remote_version.number(self.rule),
                "App version mismatch, application update required"
            );
            return Ok(GateOutcome {
                proceed: false,
                local_version,
                remote_version,
                sandbox_rewritten,
            });
        }

        if local_version != remote_version {
            // Same content line, newer patch release: adopt the remote copy.
            write_config(&self.sandbox_config, &remote).await?;
            sandbox_rewritten = true;
            debug!(
                local = %local_version,
                remote = %remote_version,
                "Sandbox app config updated from remote"
            );
        }

        info!(version = %remote_version, "App version check passed");
        Ok(GateOutcome {
            proceed: true,
            local_version,
            remote_version,
            sandbox_rewritten,
        })
    }

    /// Seed or refresh the sandbox copy from the installation copy.
    ///
    /// Returns whether the sandbox copy was written.
    async fn sync_sandbox(&self) -> VersionResult<bool> {
        let bundle = read_config(&self.bundle_config).await?;
        let sandbox = read_config(&self.sandbox_config).await?;

        match (bundle, sandbox) {
            (None, None) => Err(VersionError::BundleConfigMissing {
                path: self.bundle_config.clone(),
            }),
            (Some(bundle), None) => {
                write_config(&self.sandbox_config, &bundle).await?;
                info!(version = %bundle.app_version, "Sandbox app config created");
                Ok(true)
            }
            (None, Some(_)) => Ok(false),
            (Some(bundle), Some(sandbox)) => {
                let changed = self.force_sync
                    || bundle.version()?.number(self.rule) != sandbox.version()?.number(self.rule);
                if changed {
                    // The installed binary changed since the last run.
                    write_config(&self.sandbox_config, &bundle).await?;
                    info!(
                        from = %sandbox.app_version,
                        to = %bundle.app_version,
                        "Sandbox app config refreshed from installation"
                    );
                }
                Ok(changed)
            }
        }
    }
}

async fn read_config(path: &Path) -> VersionResult<Option<AppConfig>> {
    match tokio::fs::read_to_string(path).await {
        Ok(text) => AppConfig::from_json(&text, &path.display().to_string()).map(Some),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(VersionError::Io {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}

async fn write_config(path: &Path, config: &AppConfig) -> VersionResult<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| VersionError::Io {
                path: parent.to_path_buf(),
                source: e,
            })?;
    }
    tokio::fs::write(path, config.to_json())
        .await
        .map_err(|e| VersionError::Io {
            path: path.to_path_buf(),
            source: e,
        })
}
