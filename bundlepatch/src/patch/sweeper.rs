//! Cache cleanup after a download and during repair.

use tracing::{info, warn};

use super::error::{PatchError, PatchResult};
use crate::package::{PackageEntry, SweepReport};

/// Removes cache files packages no longer need.
#[derive(Debug, Clone, Copy, Default)]
pub struct CacheSweeper;

impl CacheSweeper {
    pub fn new() -> Self {
        Self
    }

    /// Clear unused cache files of every package, one package at a time.
    ///
    /// A package that fails to sweep is logged and skipped; the sweep of the
    /// remaining packages still runs.
    pub async fn sweep_all(&self, packages: &[PackageEntry]) -> SweepReport {
        let mut total = SweepReport::default();
        for entry in packages {
            match entry.handle.clear_unused_cache().await {
                Ok(report) => {
                    total.files_removed += report.files_removed;
                    total.bytes_freed += report.bytes_freed;
                }
                Err(e) => {
                    warn!(package = %entry.name(), error = %e, "Unused cache sweep failed")
                }
            }
        }
        info!(
            files = total.files_removed,
            bytes = total.bytes_freed,
            "Cache sweep finished"
        );
        total
    }

    /// Unload every package and clear all of its cache files, stopping at
    /// the first failure.
    pub async fn clear_all(&self, packages: &[PackageEntry]) -> PatchResult<()> {
        for entry in packages {
            entry
                .handle
                .clear_all_cache()
                .await
                .map_err(|source| PatchError::RepairFailed {
                    package: entry.name().to_string(),
                    source,
                })?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::package::{
        DownloaderHandle, InitParameters, PackageError, PackageHandle, PackageResult,
    };
    use crate::BoxFuture;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CachePackage {
        name: &'static str,
        fail: bool,
        unused_bytes: u64,
        cleared: AtomicUsize,
    }

    impl CachePackage {
        fn new(name: &'static str, fail: bool, unused_bytes: u64) -> Arc<Self> {
            Arc::new(Self {
                name,
                fail,
                unused_bytes,
                cleared: AtomicUsize::new(0),
            })
        }

        fn failure(&self) -> PackageError {
            PackageError::io(
                format!("/sandbox/{}", self.name),
                std::io::Error::other("device busy"),
            )
        }
    }

    impl PackageHandle for CachePackage {
        fn name(&self) -> &str {
            self.name
        }
        fn is_initialized(&self) -> bool {
            true
        }
        fn initialize(&self, _: InitParameters) -> BoxFuture<'_, PackageResult<()>> {
            Box::pin(async { Ok(()) })
        }
        fn update_version(&self) -> BoxFuture<'_, PackageResult<String>> {
            Box::pin(async { Ok(String::new()) })
        }
        fn update_manifest<'a>(&'a self, _: &'a str) -> BoxFuture<'a, PackageResult<()>> {
            Box::pin(async { Ok(()) })
        }
        fn save_version<'a>(&'a self, _: &'a str) -> BoxFuture<'a, PackageResult<()>> {
            Box::pin(async { Ok(()) })
        }
        fn create_downloader(
            &self,
            _: Option<&[String]>,
            _: usize,
            _: u32,
        ) -> PackageResult<Box<dyn DownloaderHandle>> {
            Err(self.failure())
        }
        fn clear_unused_cache(&self) -> BoxFuture<'_, PackageResult<SweepReport>> {
            Box::pin(async move {
                if self.fail {
                    return Err(self.failure());
                }
                Ok(SweepReport {
                    files_removed: 1,
                    bytes_freed: self.unused_bytes,
                })
            })
        }
        fn clear_all_cache(&self) -> BoxFuture<'_, PackageResult<()>> {
            Box::pin(async move {
                self.cleared.fetch_add(1, Ordering::SeqCst);
                if self.fail {
                    return Err(self.failure());
                }
                Ok(())
            })
        }
        fn check_location_valid(&self, _: &str) -> bool {
            false
        }
    }

    #[tokio::test]
    async fn test_sweep_continues_past_failure() {
        let packages = vec![
            PackageEntry::new(CachePackage::new("a", false, 10)),
            PackageEntry::new(CachePackage::new("b", true, 0)),
            PackageEntry::new(CachePackage::new("c", false, 5)),
        ];
        let report = CacheSweeper::new().sweep_all(&packages).await;
        assert_eq!(report.files_removed, 2);
        assert_eq!(report.bytes_freed, 15);
    }

    #[tokio::test]
    async fn test_clear_all_stops_at_first_failure() {
        let a = CachePackage::new("a", false, 0);
        let b = CachePackage::new("b", true, 0);
        let c = CachePackage::new("c", false, 0);
        let packages = vec![
            PackageEntry::new(a.clone()),
            PackageEntry::new(b.clone()),
            PackageEntry::new(c.clone()),
        ];

        let err = CacheSweeper::new().clear_all(&packages).await.unwrap_err();
        assert!(matches!(err, PatchError::RepairFailed { ref package, .. } if package == "b"));
        assert_eq!(a.cleared.load(Ordering::SeqCst), 1);
        assert_eq!(c.cleared.load(Ordering::SeqCst), 0);
    }
}
