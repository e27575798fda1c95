use std::fmt;

use derive_more::{Deref, Display};

/// Identifies a timer inside the [`TimeoutPool`](crate::TimeoutPool) that created it.
///
/// Ids start at 1 and are never reused by the same pool.
#[derive(Debug, Display, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Deref)]
pub struct TimerId(u32);

impl TimerId {
    pub(crate) const FIRST: Self = Self(1);

    pub(crate) fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

/// What a timer callback wants to happen after it ran.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TickResponse {
    Continue,
    Stop,
}

pub type TimerCallback = Box<dyn FnMut() -> TickResponse + Send>;
pub type TimerDestructor = Box<dyn FnOnce() + Send>;

/// The callable part of an entry: the callback with its captured state and the optional
/// destructor.
///
/// While an entry is dispatched, its payload is on loan to the dispatcher, so removing the entry
/// from within the callback only unlinks it. The payload is released when the last owner lets go,
/// which runs the destructor exactly once.
pub(crate) struct Payload {
    pub callback: TimerCallback,
    destructor: Option<TimerDestructor>,
}

impl Payload {
    pub fn new(callback: TimerCallback, destructor: Option<TimerDestructor>) -> Self {
        Self {
            callback,
            destructor,
        }
    }
}

impl Drop for Payload {
    fn drop(&mut self) {
        if let Some(destructor) = self.destructor.take() {
            destructor();
        }
    }
}

/// One periodic callback scheduled in a pool.
///
/// Times are pool clock milliseconds. They are signed so that resetting `last_fire` to one
/// interval before `now` is well defined near the clock's epoch.
pub(crate) struct TimerEntry {
    pub id: TimerId,
    pub interval: i64,
    pub last_fire: i64,
    pub ready: bool,
    /// `None` while the dispatcher is running the callback.
    pub payload: Option<Payload>,
}

impl fmt::Debug for TimerEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimerEntry")
            .field("id", &self.id)
            .field("interval", &self.interval)
            .field("last_fire", &self.last_fire)
            .field("ready", &self.ready)
            .field("in_flight", &self.payload.is_none())
            .finish()
    }
}

impl TimerEntry {
    pub fn new(id: TimerId, interval: i64, now: i64, payload: Payload) -> Self {
        debug_assert!(interval > 0, "Timer interval must be positive");
        Self {
            id,
            interval,
            last_fire: now,
            ready: false,
            payload: Some(payload),
        }
    }

    /// The time this entry wants to fire next.
    pub fn deadline(&self) -> i64 {
        self.last_fire + self.interval
    }

    /// Ready entries first, then by ascending deadline.
    pub fn sort_key(&self) -> (bool, i64) {
        (!self.ready, self.deadline())
    }

    /// The remaining wait in milliseconds at `now`, zero meaning due. Does not modify the entry.
    pub fn wait(&self, now: i64) -> i64 {
        let since = now - self.last_fire;
        if self.needs_reset(since) {
            return 0;
        }
        (self.interval - since).max(0)
    }

    /// Tests whether the entry is due at `now` and returns the remaining wait in milliseconds,
    /// zero meaning due.
    ///
    /// When the clock went backwards or more than two intervals passed since the last fire, the
    /// entry is rescheduled to fire exactly once now instead of trying to catch up.
    pub fn remaining(&mut self, now: i64) -> i64 {
        if self.needs_reset(now - self.last_fire) {
            self.last_fire = now - self.interval;
            return 0;
        }
        self.wait(now)
    }

    fn needs_reset(&self, since: i64) -> bool {
        since < 0 || since > self.interval * 2
    }

    /// Moves the schedule forward by exactly one interval.
    pub fn reschedule(&mut self) {
        self.last_fire += self.interval;
    }
}
