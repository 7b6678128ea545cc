//! Concurrent bundle downloader for a hosted package.
//!
//! Files are transferred up to `max_concurrency` at a time. Each file is
//! written to `<cache>/<hash>.part`, verified against its manifest hash and
//! renamed to `<cache>/<hash>`. A failing file is retried per the
//! [`RetryPolicy`] and tried against every host in order on each attempt.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use tracing::{debug, info, warn};

use super::checksum::verify_checksum_async;
use crate::fetch::{join_location, RemoteFetcher};
use crate::package::control::DownloadControl;
use crate::package::error::{PackageError, PackageResult};
use crate::package::traits::{DownloadCallbacks, DownloadTick, DownloaderHandle, DownloaderState};
use crate::retry::RetryPolicy;
use crate::BoxFuture;

/// A bundle that is not yet on device.
#[derive(Debug, Clone)]
pub(crate) struct PendingBundle {
    pub name: String,
    pub hash: String,
    pub size: u64,
}

/// Running totals shared by all transfers of one downloader.
#[derive(Debug, Default)]
struct Counters {
    files: AtomicUsize,
    bytes: AtomicU64,
}

/// Downloader over the pending bundles of one package.
pub struct HostedDownloader {
    package: String,
    pending: Vec<PendingBundle>,
    hosts: Vec<String>,
    cache_dir: PathBuf,
    fetcher: Arc<dyn RemoteFetcher>,
    max_concurrency: usize,
    retry: RetryPolicy,
    control: DownloadControl,
    state: DownloaderState,
    total_bytes: u64,
}

impl HostedDownloader {
    pub(crate) fn new(
        package: String,
        pending: Vec<PendingBundle>,
        hosts: Vec<String>,
        cache_dir: PathBuf,
        fetcher: Arc<dyn RemoteFetcher>,
        max_concurrency: usize,
        retry: RetryPolicy,
    ) -> Self {
        let total_bytes = pending.iter().map(|b| b.size).sum();
        Self {
            package,
            pending,
            hosts,
            cache_dir,
            fetcher,
            max_concurrency: max_concurrency.max(1),
            retry,
            control: DownloadControl::new(),
            state: DownloaderState::Idle,
            total_bytes,
        }
    }

    async fn run(&self, callbacks: &DownloadCallbacks) -> DownloaderState {
        let counters = Counters::default();
        let total_count = self.pending.len();

        info!(
            package = %self.package,
            files = total_count,
            bytes = self.total_bytes,
            concurrency = self.max_concurrency,
            "Starting bundle download"
        );

        let transfers: Vec<_> = self
            .pending
            .iter()
            .map(|bundle| self.download_bundle(bundle, callbacks, &counters))
            .collect();
        let outcomes: Vec<bool> = stream::iter(transfers)
            .buffer_unordered(self.max_concurrency)
            .collect()
            .await;

        let failed = outcomes.iter().filter(|ok| !**ok).count();
        if self.control.is_cancelled() {
            info!(package = %self.package, "Bundle download canceled");
            DownloaderState::Canceled
        } else if failed > 0 {
            warn!(package = %self.package, failed, "Bundle download finished with failures");
            DownloaderState::Failed
        } else {
            info!(package = %self.package, files = total_count, "Bundle download complete");
            DownloaderState::Succeeded
        }
    }

    /// Download one bundle with retries. Returns whether it ended up cached.
    async fn download_bundle(
        &self,
        bundle: &PendingBundle,
        callbacks: &DownloadCallbacks,
        counters: &Counters,
    ) -> bool {
        // Bytes of this bundle already counted in `counters`.
        let reported = AtomicU64::new(0);
        let mut attempt = 0u32;

        loop {
            self.control.wait_while_paused().await;
            if self.control.is_cancelled() {
                return false;
            }

            attempt += 1;
            match self.transfer_once(bundle, callbacks, counters, &reported).await {
                Ok(()) => {
                    // Settle this bundle at exactly its manifest size.
                    let counted = reported.load(Ordering::SeqCst);
                    if counted < bundle.size {
                        counters.bytes.fetch_add(bundle.size - counted, Ordering::SeqCst);
                    } else if counted > bundle.size {
                        counters.bytes.fetch_sub(counted - bundle.size, Ordering::SeqCst);
                    }
                    counters.files.fetch_add(1, Ordering::SeqCst);
                    callbacks.progress(self.tick(counters));
                    debug!(package = %self.package, bundle = %bundle.name, "Bundle cached");
                    return true;
                }
                Err(e) => match self.retry.delay_for_attempt(attempt) {
                    Some(delay) => {
                        debug!(
                            package = %self.package,
                            bundle = %bundle.name,
                            attempt,
                            error = %e,
                            "Bundle transfer failed, retrying"
                        );
                        tokio::select! {
                            _ = tokio::time::sleep(delay) => {}
                            _ = self.control.cancelled() => return false,
                        }
                    }
                    None => {
                        warn!(
                            package = %self.package,
                            bundle = %bundle.name,
                            attempts = attempt,
                            error = %e,
                            "Bundle transfer failed"
                        );
                        callbacks.file_error(&bundle.name, &e.to_string());
                        return false;
                    }
                },
            }
        }
    }

    /// One attempt against every host in order.
    async fn transfer_once(
        &self,
        bundle: &PendingBundle,
        callbacks: &DownloadCallbacks,
        counters: &Counters,
        reported: &AtomicU64,
    ) -> PackageResult<()> {
        let part = self.cache_dir.join(format!("{}.part", bundle.hash));
        let dest = self.cache_dir.join(&bundle.hash);
        let mut last_error = None;

        for host in &self.hosts {
            let location = join_location(host, &bundle.name);
            let received = AtomicU64::new(0);
            let on_chunk = |n: u64| {
                let now = received.fetch_add(n, Ordering::SeqCst) + n;
                let before = reported.load(Ordering::SeqCst);
                if now > before {
                    reported.store(now, Ordering::SeqCst);
                    counters.bytes.fetch_add(now - before, Ordering::SeqCst);
                    callbacks.progress(self.tick(counters));
                }
            };

            match self.fetcher.fetch_to_file(&location, &part, &on_chunk).await {
                Ok(_) => {
                    verify_checksum_async(part.clone(), bundle.name.clone(), bundle.hash.clone())
                        .await
                        .inspect_err(|_| remove_quietly(&part))?;
                    tokio::fs::rename(&part, &dest)
                        .await
                        .map_err(|e| PackageError::io(&dest, e))?;
                    return Ok(());
                }
                Err(e) => {
                    debug!(location = %location, error = %e, "Host transfer failed");
                    remove_quietly(&part);
                    last_error = Some(PackageError::from(e));
                }
            }
        }

        Err(last_error.unwrap_or_else(|| PackageError::NoHostServer {
            package: self.package.clone(),
        }))
    }

    fn tick(&self, counters: &Counters) -> DownloadTick {
        DownloadTick {
            total_count: self.pending.len(),
            current_count: counters.files.load(Ordering::SeqCst),
            total_bytes: self.total_bytes,
            current_bytes: counters.bytes.load(Ordering::SeqCst).min(self.total_bytes),
        }
    }
}

impl DownloaderHandle for HostedDownloader {
    fn package_name(&self) -> &str {
        &self.package
    }

    fn total_count(&self) -> usize {
        self.pending.len()
    }

    fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    fn state(&self) -> DownloaderState {
        self.state
    }

    fn control(&self) -> DownloadControl {
        self.control.clone()
    }

    fn begin(&mut self, callbacks: DownloadCallbacks) -> BoxFuture<'_, DownloaderState> {
        Box::pin(async move {
            if self.state != DownloaderState::Idle {
                return self.state;
            }
            self.state = DownloaderState::Running;
            let state = self.run(&callbacks).await;
            self.state = state;
            state
        })
    }
}

fn remove_quietly(path: &Path) {
    let _ = std::fs::remove_file(path);
}
