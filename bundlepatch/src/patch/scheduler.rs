//! Cooperative yields between pipeline steps.
//!
//! Several states pause briefly on entry so an observer can render the
//! state change before heavy work starts. The pause goes through a
//! [`FrameScheduler`] so tests can run the pipeline without sleeping.

use std::time::Duration;

use crate::config::DEFAULT_STATE_DELAY_MS;
use crate::BoxFuture;

/// Source of the short waits the orchestrator takes.
pub trait FrameScheduler: Send + Sync {
    /// Fixed delay taken on entry to a heavy state.
    fn state_delay(&self) -> BoxFuture<'_, ()>;

    /// Give other tasks one turn.
    fn yield_frame(&self) -> BoxFuture<'_, ()>;
}

/// Scheduler backed by the tokio timer.
#[derive(Debug, Clone, Copy)]
pub struct TokioScheduler {
    entry_delay: Duration,
}

impl TokioScheduler {
    pub fn new(entry_delay: Duration) -> Self {
        Self { entry_delay }
    }

    pub fn entry_delay(&self) -> Duration {
        self.entry_delay
    }
}

impl Default for TokioScheduler {
    fn default() -> Self {
        Self::new(Duration::from_millis(DEFAULT_STATE_DELAY_MS))
    }
}

impl FrameScheduler for TokioScheduler {
    fn state_delay(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            if !self.entry_delay.is_zero() {
                tokio::time::sleep(self.entry_delay).await;
            }
        })
    }

    fn yield_frame(&self) -> BoxFuture<'_, ()> {
        Box::pin(tokio::task::yield_now())
    }
}

/// Scheduler that never waits.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImmediateScheduler;

impl FrameScheduler for ImmediateScheduler {
    fn state_delay(&self) -> BoxFuture<'_, ()> {
        Box::pin(std::future::ready(()))
    }

    fn yield_frame(&self) -> BoxFuture<'_, ()> {
        Box::pin(std::future::ready(()))
    }
}
