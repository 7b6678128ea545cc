//! Pause, resume and cancel for in-flight downloads.
//!
//! A [`DownloadControl`] is cloned out of a downloader before it starts, so
//! the orchestrator can steer a download while the downloader itself is
//! borrowed by the running transfer.

use std::sync::Arc;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// Shared switch for one downloader.
#[derive(Debug, Clone)]
pub struct DownloadControl {
    cancel: CancellationToken,
    paused: Arc<watch::Sender<bool>>,
}

impl Default for DownloadControl {
    fn default() -> Self {
        Self::new()
    }
}

impl DownloadControl {
    pub fn new() -> Self {
        let (paused, _) = watch::channel(false);
        Self {
            cancel: CancellationToken::new(),
            paused: Arc::new(paused),
        }
    }

    /// Hold new transfers until [`resume`](Self::resume).
    pub fn pause(&self) {
        self.paused.send_replace(true);
    }

    pub fn resume(&self) {
        self.paused.send_replace(false);
    }

    /// Stop scheduling transfers. Cannot be undone.
    pub fn cancel(&self) {
        self.cancel.cancel();
        // Wake anything parked on pause so it can observe the cancel.
        self.paused.send_replace(false);
    }

    pub fn is_paused(&self) -> bool {
        *self.paused.borrow()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Completes once [`cancel`](Self::cancel) has been called.
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await
    }

    /// Wait while paused. Returns immediately when running or cancelled.
    pub async fn wait_while_paused(&self) {
        let mut rx = self.paused.subscribe();
        loop {
            if !*rx.borrow_and_update() || self.is_cancelled() {
                return;
            }
            tokio::select! {
                changed = rx.changed() => {
                    if changed.is_err() {
                        return;
                    }
                }
                _ = self.cancel.cancelled() => return,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_not_paused_returns_immediately() {
        let control = DownloadControl::new();
        tokio::time::timeout(Duration::from_millis(100), control.wait_while_paused())
            .await
            .expect("should not block");
    }

    #[tokio::test]
    async fn test_resume_releases_waiter() {
        let control = DownloadControl::new();
        control.pause();
        assert!(control.is_paused());

        let waiter = {
            let control = control.clone();
            tokio::spawn(async move { control.wait_while_paused().await })
        };
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        control.resume();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter released")
            .unwrap();
    }

    #[tokio::test]
    async fn test_cancel_releases_paused_waiter() {
        let control = DownloadControl::new();
        control.pause();
        let clone = control.clone();
        let waiter = tokio::spawn(async move { clone.wait_while_paused().await });

        control.cancel();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter released")
            .unwrap();
        assert!(control.is_cancelled());
        assert!(!control.is_paused());
    }
}
