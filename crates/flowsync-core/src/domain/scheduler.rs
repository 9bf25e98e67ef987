//! Cooperative scheduling abstraction
//!
//! Timers (edit-session quiet periods, ledger retention) go through an
//! injectable [`Scheduler`] so they can be driven deterministically in tests.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

#[derive(Debug, Default)]
struct CancelState {
    cancelled: AtomicBool,
    notify: Notify,
}

/// Cloneable cancellation flag shared between a timer and its owner
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    inner: Arc<CancelState>,
}

impl CancelToken {
    /// Create an uncancelled token
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancel the token and wake everything waiting on it
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    /// Whether [`cancel`](Self::cancel) has been called
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Resolve once the token is cancelled
    pub async fn cancelled(&self) {
        loop {
            // Register before checking the flag so a concurrent cancel is not missed
            let notified = self.inner.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

/// Source of time and delayed wake-ups
#[async_trait]
pub trait Scheduler: Send + Sync {
    /// Wait for `delay`; resolves `true` if the delay elapsed, `false` if
    /// `cancel` fired first
    async fn schedule(&self, delay: Duration, cancel: CancelToken) -> bool;

    /// Current instant on this scheduler's clock
    fn now(&self) -> Instant;
}

/// Scheduler backed by the tokio timer
///
/// Works with `tokio::time::pause` so tests can use auto-advancing time.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioScheduler;

#[async_trait]
impl Scheduler for TokioScheduler {
    async fn schedule(&self, delay: Duration, cancel: CancelToken) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(delay) => !cancel.is_cancelled(),
            _ = cancel.cancelled() => false,
        }
    }

    fn now(&self) -> Instant {
        Instant::now()
    }
}
