//! Drives an [`EventSource`] from a tokio runtime.

use std::time::Duration;

use cadence_animation::{Clock, EventSource};
use log::{debug, trace};
use serde::Deserialize;
use tokio::time::{self, Instant};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EventLoopConfig {
    /// How long to sleep when the source has nothing scheduled.
    pub idle_poll_ms: u64,
}

impl Default for EventLoopConfig {
    fn default() -> Self {
        Self { idle_poll_ms: 50 }
    }
}

/// A [`Clock`] that reads tokio's time, so that it follows a paused runtime clock in tests.
#[derive(Debug, Clone, Copy)]
pub struct TokioClock {
    epoch: Instant,
}

impl Default for TokioClock {
    fn default() -> Self {
        Self::new()
    }
}

impl TokioClock {
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
        }
    }
}

impl Clock for TokioClock {
    fn now_ms(&self) -> u64 {
        u64::try_from(self.epoch.elapsed().as_millis()).unwrap_or(u64::MAX)
    }
}

#[derive(Debug, Clone)]
pub struct EventLoop {
    idle_poll: Duration,
}

impl Default for EventLoop {
    fn default() -> Self {
        Self::new(&EventLoopConfig::default())
    }
}

impl EventLoop {
    pub fn new(config: &EventLoopConfig) -> Self {
        Self {
            idle_poll: Duration::from_millis(config.idle_poll_ms.max(1)),
        }
    }

    pub fn idle_poll(&self) -> Duration {
        self.idle_poll
    }

    /// Polls `source` until `done` returns `true`. `done` is checked before every poll.
    pub async fn run_until(&self, source: &impl EventSource, mut done: impl FnMut() -> bool) {
        debug!("Entering event loop");
        let mut passes = 0usize;
        while !done() {
            let wait = source.next_wakeup().unwrap_or(self.idle_poll);
            if self.poll(source, wait).await {
                passes += 1;
            }
        }
        debug!("Exiting event loop after {passes} dispatch passes");
    }

    /// Polls `source` for `duration`.
    pub async fn run_for(&self, source: &impl EventSource, duration: Duration) {
        let deadline = Instant::now() + duration;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            let wait = source
                .next_wakeup()
                .unwrap_or(self.idle_poll)
                .min(remaining);
            self.poll(source, wait).await;
        }
    }

    /// Sleeps for `wait` and dispatches if something became due. Returns `true` if it
    /// dispatched.
    async fn poll(&self, source: &impl EventSource, wait: Duration) -> bool {
        if !wait.is_zero() {
            trace!("Sleeping for {wait:?}");
            time::sleep(wait).await;
        }
        if !source.is_ready() {
            return false;
        }
        source.dispatch();
        true
    }
}
