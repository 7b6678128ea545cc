//! Package version and manifest reconciliation.
//!
//! Two strictly sequential passes over the package list. Either pass stops at
//! the first failing package; later packages are never touched.

use tracing::info;

use super::error::{PatchError, PatchResult};
use crate::package::PackageEntry;

/// Fetches and applies the latest manifest of each package.
#[derive(Debug, Clone, Copy, Default)]
pub struct ManifestReconciler;

impl ManifestReconciler {
    pub fn new() -> Self {
        Self
    }

    /// Latest published version of every package, in list order.
    pub async fn update_versions(&self, packages: &[PackageEntry]) -> PatchResult<Vec<String>> {
        let mut versions = Vec::with_capacity(packages.len());
        for entry in packages {
            let version =
                entry
                    .handle
                    .update_version()
                    .await
                    .map_err(|source| PatchError::VersionUpdate {
                        package: entry.name().to_string(),
                        source,
                    })?;
            info!(package = %entry.name(), version = %version, "Package version resolved");
            versions.push(version);
        }
        Ok(versions)
    }

    /// Apply `versions[i]` to `packages[i]` and persist it.
    pub async fn update_manifests(
        &self,
        packages: &[PackageEntry],
        versions: &[String],
    ) -> PatchResult<()> {
        for (index, entry) in packages.iter().enumerate() {
            let package = entry.name().to_string();
            let Some(version) = versions.get(index) else {
                return Err(PatchError::ManifestUpdate {
                    source: crate::package::PackageError::ManifestNotLoaded {
                        package: package.clone(),
                    },
                    package,
                });
            };

            entry
                .handle
                .update_manifest(version)
                .await
                .map_err(|source| PatchError::ManifestUpdate {
                    package: package.clone(),
                    source,
                })?;
            entry
                .handle
                .save_version(version)
                .await
                .map_err(|source| PatchError::ManifestUpdate {
                    package: package.clone(),
                    source,
                })?;
            info!(package = %package, version = %version, "Package manifest updated");
        }
        Ok(())
    }
}
