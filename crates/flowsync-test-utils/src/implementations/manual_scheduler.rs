//! Scheduler whose clock only moves when a test advances it.

use async_trait::async_trait;
use flowsync_core::{CancelToken, Scheduler};
use parking_lot::Mutex;
use std::fmt;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;

struct Timer {
    deadline: Instant,
    fire: oneshot::Sender<()>,
}

/// A manually driven scheduler for testing.
///
/// `schedule` parks until [`advance`](ManualScheduler::advance) moves the
/// clock past its deadline or the cancel token fires.
pub struct ManualScheduler {
    origin: Instant,
    offset: Mutex<Duration>,
    timers: Mutex<Vec<Timer>>,
}

impl fmt::Debug for ManualScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManualScheduler")
            .field("offset", &*self.offset.lock())
            .field("pending", &self.timers.lock().len())
            .finish()
    }
}

impl Default for ManualScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl ManualScheduler {
    /// Create a scheduler with its clock at zero
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            offset: Mutex::new(Duration::ZERO),
            timers: Mutex::new(Vec::new()),
        }
    }

    /// Time advanced so far
    pub fn elapsed(&self) -> Duration {
        *self.offset.lock()
    }

    /// Number of timers still waiting
    pub fn pending_timers(&self) -> usize {
        let mut timers = self.timers.lock();
        timers.retain(|t| !t.fire.is_closed());
        timers.len()
    }

    /// Move the clock forward and fire every timer that is now due.
    ///
    /// Yields before and after so freshly spawned timers are registered
    /// against the old clock and woken tasks run before the caller continues.
    pub async fn advance(&self, by: Duration) {
        settle().await;
        let now = {
            let mut offset = self.offset.lock();
            *offset += by;
            self.origin + *offset
        };

        let due: Vec<Timer> = {
            let mut timers = self.timers.lock();
            let (due, waiting): (Vec<Timer>, Vec<Timer>) =
                timers.drain(..).partition(|t| t.deadline <= now);
            *timers = waiting;
            due
        };
        for timer in due {
            let _ = timer.fire.send(());
        }

        settle().await;
    }
}

/// Give spawned tasks a chance to run to their next await point
pub async fn settle() {
    for _ in 0..32 {
        tokio::task::yield_now().await;
    }
}

#[async_trait]
impl Scheduler for ManualScheduler {
    async fn schedule(&self, delay: Duration, cancel: CancelToken) -> bool {
        if delay.is_zero() {
            return !cancel.is_cancelled();
        }

        let (fire, fired) = oneshot::channel();
        self.timers.lock().push(Timer {
            deadline: self.now() + delay,
            fire,
        });

        tokio::select! {
            result = fired => result.is_ok() && !cancel.is_cancelled(),
            _ = cancel.cancelled() => false,
        }
    }

    fn now(&self) -> Instant {
        self.origin + *self.offset.lock()
    }
}
