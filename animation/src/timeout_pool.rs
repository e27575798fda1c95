//! A pool of periodic callbacks that share one slot of the host event loop.
//!
//! Instead of registering one timer per animation with the host, every timer lives in a pool that
//! the host polls as a single [`EventSource`]. The entries are kept sorted, ready entries first and
//! the others by their next deadline, so finding the next wakeup and collecting the due entries
//! only ever looks at a prefix.
//!
//! Callbacks may add and remove timers of the pool that is dispatching them, including their own.
//! The entry being dispatched is moved to a separate in-flight list and its callback is taken out
//! of it before the lock is released, so nothing that happens inside the callback can invalidate
//! the iteration.

use std::{
    collections::VecDeque,
    mem,
    sync::{Arc, Weak},
    time::Duration,
};

use log::{debug, trace, warn};
use parking_lot::Mutex;

use crate::{
    Clock, ConfigError, EventSource, MonotonicClock, TickResponse, TimerId,
    timer_entry::{Payload, TimerEntry},
};

#[derive(Debug, Clone)]
pub struct TimeoutPool {
    clock: Arc<dyn Clock>,
    inner: Arc<Mutex<PoolInner>>,
}

/// A pool handle that does not keep the pool alive.
#[derive(Debug, Clone)]
pub(crate) struct WeakTimeoutPool {
    clock: Arc<dyn Clock>,
    inner: Weak<Mutex<PoolInner>>,
}

impl WeakTimeoutPool {
    pub fn upgrade(&self) -> Option<TimeoutPool> {
        Some(TimeoutPool {
            clock: self.clock.clone(),
            inner: self.inner.upgrade()?,
        })
    }
}

#[derive(Debug)]
struct PoolInner {
    next_id: TimerId,
    /// Sorted: ready entries first, then ascending by deadline.
    timeouts: VecDeque<TimerEntry>,
    /// Entries taken out of `timeouts` during the current dispatch pass.
    dispatched: Vec<TimerEntry>,
    /// Number of entries marked ready since the last dispatch pass.
    ready: usize,
    dispatching: bool,
}

impl Default for TimeoutPool {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeoutPool {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(MonotonicClock::new()))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            inner: Mutex::new(PoolInner {
                next_id: TimerId::FIRST,
                timeouts: VecDeque::new(),
                dispatched: Vec::new(),
                ready: 0,
                dispatching: false,
            })
            .into(),
        }
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub(crate) fn downgrade(&self) -> WeakTimeoutPool {
        WeakTimeoutPool {
            clock: self.clock.clone(),
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// `true` if both handles refer to the same pool.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Adds a callback that is invoked every `interval_ms` until it returns
    /// [`TickResponse::Stop`] or is removed.
    ///
    /// The first invocation happens one interval after adding it. Late invocations are compensated
    /// by scheduling the next one relative to the previous deadline, but missed invocations are
    /// never repeated.
    pub fn add(
        &self,
        interval_ms: u32,
        callback: impl FnMut() -> TickResponse + Send + 'static,
    ) -> Result<TimerId, ConfigError> {
        self.add_payload(interval_ms, Payload::new(Box::new(callback), None))
    }

    /// Like [`add`](Self::add), and runs `destructor` once the timer is gone for good.
    pub fn add_with_destructor(
        &self,
        interval_ms: u32,
        callback: impl FnMut() -> TickResponse + Send + 'static,
        destructor: impl FnOnce() + Send + 'static,
    ) -> Result<TimerId, ConfigError> {
        self.add_payload(
            interval_ms,
            Payload::new(Box::new(callback), Some(Box::new(destructor))),
        )
    }

    fn add_payload(&self, interval_ms: u32, payload: Payload) -> Result<TimerId, ConfigError> {
        if interval_ms == 0 {
            return Err(ConfigError::ZeroInterval);
        }
        let now = self.now();
        let mut inner = self.inner.lock();
        let id = inner.next_id;
        inner.next_id = id.next();
        inner.insert_sorted(TimerEntry::new(id, interval_ms.into(), now, payload));
        trace!("Timer {id} added ({interval_ms}ms)");
        Ok(id)
    }

    /// Removes a timer. Legal from within any callback of this pool, including the timer's own.
    ///
    /// Returns `false` if the id is unknown, which is not an error: it may have stopped itself
    /// already.
    pub fn remove(&self, id: TimerId) -> bool {
        let removed = self.inner.lock().unlink(id);
        match removed {
            Some(entry) => {
                trace!("Timer {id} removed");
                // Drop the entry (and possibly run its destructor) outside of the lock.
                drop(entry);
                true
            }
            None => {
                debug!("Timer {id} is not in the pool");
                false
            }
        }
    }

    pub fn contains(&self, id: TimerId) -> bool {
        let inner = self.inner.lock();
        inner.timeouts.iter().any(|e| e.id == id) || inner.dispatched.iter().any(|e| e.id == id)
    }

    pub fn len(&self) -> usize {
        let inner = self.inner.lock();
        inner.timeouts.len() + inner.dispatched.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Removes and destroys all timers.
    pub fn clear(&self) {
        let (timeouts, dispatched) = {
            let mut inner = self.inner.lock();
            inner.ready = 0;
            (
                mem::take(&mut inner.timeouts),
                mem::take(&mut inner.dispatched),
            )
        };
        debug!("Clearing {} timers", timeouts.len() + dispatched.len());
        drop(timeouts);
        drop(dispatched);
    }

    /// Marks the due prefix of the pool as ready and returns the number of ready entries.
    pub fn mark_ready(&self) -> usize {
        let now = self.now();
        self.inner.lock().mark_ready(now)
    }

    fn now(&self) -> i64 {
        self.clock.now_ms() as i64
    }

    /// Runs the callbacks of all ready entries.
    ///
    /// If no entry was marked ready yet, readiness is checked once more, because the host may
    /// have decided to dispatch on a stale poll.
    pub fn dispatch(&self) {
        {
            let mut inner = self.inner.lock();
            if inner.dispatching {
                warn!("Ignoring nested dispatch of a timeout pool");
                return;
            }
            inner.dispatching = true;
            if inner.ready == 0 {
                let now = self.now();
                inner.mark_ready(now);
            }
        }

        let mut dispatched = 0;
        loop {
            // The guard must be gone before the callback runs.
            let next = self.inner.lock().begin_dispatch();
            let Some((id, mut payload)) = next else {
                break;
            };
            dispatched += 1;
            let response = (payload.callback)();
            let released = self.inner.lock().end_dispatch(id, payload, response);
            // Destructors run without the lock, they may use the pool.
            drop(released);
        }

        let mut inner = self.inner.lock();
        let survivors = mem::take(&mut inner.dispatched);
        for entry in survivors {
            inner.insert_sorted(entry);
        }
        inner.ready = 0;
        inner.dispatching = false;
        debug_assert!(inner.is_sorted(), "Timeout pool lost its sort order");
        trace!("Dispatched {dispatched} timers");
    }
}

impl EventSource for TimeoutPool {
    fn next_wakeup(&self) -> Option<Duration> {
        let now = self.now();
        let inner = self.inner.lock();
        // The head is the earliest deadline, everything behind it can only wait longer.
        let head = inner.timeouts.front()?;
        if head.ready {
            return Some(Duration::ZERO);
        }
        Some(Duration::from_millis(head.wait(now) as u64))
    }

    fn is_ready(&self) -> bool {
        self.mark_ready() > 0
    }

    fn dispatch(&self) {
        TimeoutPool::dispatch(self)
    }
}

impl PoolInner {
    fn insert_sorted(&mut self, entry: TimerEntry) {
        let key = entry.sort_key();
        let index = self.timeouts.partition_point(|e| e.sort_key() <= key);
        self.timeouts.insert(index, entry);
    }

    fn unlink(&mut self, id: TimerId) -> Option<TimerEntry> {
        if let Some(index) = self.timeouts.iter().position(|e| e.id == id) {
            let entry = self.timeouts.remove(index)?;
            if entry.ready {
                self.ready = self.ready.saturating_sub(1);
            }
            return Some(entry);
        }
        let index = self.dispatched.iter().position(|e| e.id == id)?;
        Some(self.dispatched.remove(index))
    }

    fn mark_ready(&mut self, now: i64) -> usize {
        for entry in self.timeouts.iter_mut() {
            if entry.ready {
                continue;
            }
            // Sorted by deadline: the first entry that is not due ends the search.
            if entry.remaining(now) != 0 {
                break;
            }
            entry.ready = true;
            self.ready += 1;
        }
        self.ready
    }

    /// Moves the ready head entry to the in-flight list and lends out its payload.
    fn begin_dispatch(&mut self) -> Option<(TimerId, Payload)> {
        if self.ready == 0 {
            return None;
        }
        // A ready entry may have been removed in the meantime, the ready prefix is authoritative.
        if !self.timeouts.front()?.ready {
            return None;
        }
        let mut entry = self.timeouts.pop_front()?;
        self.ready -= 1;
        entry.ready = false;
        let id = entry.id;
        let payload = entry.payload.take();
        debug_assert!(payload.is_some(), "Timer {id} dispatched twice");
        self.dispatched.push(entry);
        payload.map(|payload| (id, payload))
    }

    /// Returns the payload to its entry, or hands it back for release if the entry is gone or
    /// wants to stop.
    fn end_dispatch(
        &mut self,
        id: TimerId,
        payload: Payload,
        response: TickResponse,
    ) -> Option<Payload> {
        let Some(index) = self.dispatched.iter().position(|e| e.id == id) else {
            // Removed by its own or another callback.
            return Some(payload);
        };
        match response {
            TickResponse::Continue => {
                let entry = &mut self.dispatched[index];
                entry.reschedule();
                entry.payload = Some(payload);
                None
            }
            TickResponse::Stop => {
                self.dispatched.remove(index);
                Some(payload)
            }
        }
    }

    fn is_sorted(&self) -> bool {
        self.timeouts
            .iter()
            .zip(self.timeouts.iter().skip(1))
            .all(|(a, b)| a.sort_key() <= b.sort_key())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::ManualClock;

    fn pool() -> (TimeoutPool, ManualClock) {
        let clock = ManualClock::new(1000);
        (TimeoutPool::with_clock(Arc::new(clock.clone())), clock)
    }

    fn counter() -> Arc<AtomicUsize> {
        Arc::new(AtomicUsize::new(0))
    }

    fn counting(count: &Arc<AtomicUsize>) -> impl FnMut() -> TickResponse + Send + 'static {
        let count = count.clone();
        move || {
            count.fetch_add(1, Ordering::SeqCst);
            TickResponse::Continue
        }
    }

    fn get(count: &Arc<AtomicUsize>) -> usize {
        count.load(Ordering::SeqCst)
    }

    #[test]
    fn zero_interval_is_rejected() {
        let (pool, _) = pool();
        assert_eq!(
            pool.add(0, || TickResponse::Continue),
            Err(ConfigError::ZeroInterval)
        );
        assert!(pool.is_empty());
    }

    #[test]
    fn ids_start_at_one_and_increase() {
        let (pool, _) = pool();
        let a = pool.add(10, || TickResponse::Continue).unwrap();
        let b = pool.add(10, || TickResponse::Continue).unwrap();
        pool.remove(a);
        let c = pool.add(10, || TickResponse::Continue).unwrap();
        assert_eq!(*a, 1);
        assert_eq!(*b, 2);
        assert_eq!(*c, 3);
    }

    #[test]
    fn fires_once_per_interval() {
        let (pool, clock) = pool();
        let count = counter();
        pool.add(100, counting(&count)).unwrap();

        pool.dispatch();
        assert_eq!(get(&count), 0);

        for i in 1..=5 {
            clock.advance(50);
            pool.dispatch();
            clock.advance(50);
            pool.dispatch();
            assert_eq!(get(&count), i);
        }
    }

    #[test]
    fn next_wakeup_reflects_the_earliest_deadline() {
        let (pool, clock) = pool();
        assert_eq!(pool.next_wakeup(), None);

        pool.add(300, || TickResponse::Continue).unwrap();
        pool.add(100, || TickResponse::Continue).unwrap();
        clock.advance(40);
        assert_eq!(pool.next_wakeup(), Some(Duration::from_millis(60)));

        clock.advance(60);
        assert_eq!(pool.next_wakeup(), Some(Duration::ZERO));
        assert!(pool.is_ready());
        assert_eq!(pool.next_wakeup(), Some(Duration::ZERO));
    }

    #[test]
    fn mark_ready_stops_at_first_entry_not_due() {
        let (pool, clock) = pool();
        let fast = counter();
        let slow = counter();
        pool.add(300, counting(&slow)).unwrap();
        pool.add(100, counting(&fast)).unwrap();
        pool.add(200, counting(&slow)).unwrap();

        clock.advance(100);
        assert_eq!(pool.mark_ready(), 1);
        // Marking again does not count the same entry twice.
        assert_eq!(pool.mark_ready(), 1);
        pool.dispatch();
        assert_eq!(get(&fast), 1);
        assert_eq!(get(&slow), 0);

        clock.advance(100);
        assert_eq!(pool.mark_ready(), 2);
        pool.dispatch();
        assert_eq!(get(&fast), 2);
        assert_eq!(get(&slow), 1);
    }

    #[test]
    fn late_dispatch_keeps_the_schedule_phase() {
        let (pool, clock) = pool();
        let count = counter();
        pool.add(100, counting(&count)).unwrap();

        clock.advance(130);
        pool.dispatch();
        assert_eq!(get(&count), 1);
        // Scheduled relative to the previous deadline, not to the late dispatch.
        assert_eq!(pool.next_wakeup(), Some(Duration::from_millis(70)));
    }

    #[test]
    fn starvation_fires_once_without_catch_up() {
        let (pool, clock) = pool();
        let count = counter();
        pool.add(100, counting(&count)).unwrap();

        clock.advance(1000);
        pool.dispatch();
        pool.dispatch();
        assert_eq!(get(&count), 1);
        assert_eq!(pool.next_wakeup(), Some(Duration::from_millis(100)));
    }

    #[test]
    fn stop_drops_the_entry_and_runs_the_destructor() {
        let (pool, clock) = pool();
        let calls = counter();
        let destroyed = counter();
        let c = calls.clone();
        let d = destroyed.clone();
        pool.add_with_destructor(
            10,
            move || {
                c.fetch_add(1, Ordering::SeqCst);
                TickResponse::Stop
            },
            move || {
                d.fetch_add(1, Ordering::SeqCst);
            },
        )
        .unwrap();

        clock.advance(10);
        pool.dispatch();
        clock.advance(10);
        pool.dispatch();
        assert_eq!(get(&calls), 1);
        assert_eq!(get(&destroyed), 1);
        assert!(pool.is_empty());
    }

    #[test]
    fn removing_itself_from_the_callback() {
        let (pool, clock) = pool();
        let calls = counter();
        let destroyed = counter();
        let own_id = Arc::new(Mutex::new(None::<TimerId>));

        let id = {
            let pool_in_callback = pool.clone();
            let own_id = own_id.clone();
            let calls = calls.clone();
            let destroyed_in_callback = destroyed.clone();
            let d = destroyed.clone();
            pool.add_with_destructor(
                10,
                move || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    let id = own_id.lock().expect("id is set before dispatch");
                    assert!(pool_in_callback.remove(id));
                    // Still alive while running.
                    assert_eq!(destroyed_in_callback.load(Ordering::SeqCst), 0);
                    TickResponse::Continue
                },
                move || {
                    d.fetch_add(1, Ordering::SeqCst);
                },
            )
            .unwrap()
        };
        *own_id.lock() = Some(id);

        for _ in 0..3 {
            clock.advance(10);
            pool.dispatch();
        }
        assert_eq!(get(&calls), 1);
        assert_eq!(get(&destroyed), 1);
        assert!(!pool.contains(id));
        assert!(!pool.remove(id));
    }

    #[test]
    fn removing_another_ready_entry_from_a_callback() {
        let (pool, clock) = pool();
        let victim_calls = counter();
        let victim = Arc::new(Mutex::new(None::<TimerId>));

        {
            let pool_in_callback = pool.clone();
            let victim = victim.clone();
            pool.add(10, move || {
                if let Some(id) = victim.lock().take() {
                    pool_in_callback.remove(id);
                }
                TickResponse::Continue
            })
            .unwrap();
        }
        *victim.lock() = Some(pool.add(10, counting(&victim_calls)).unwrap());

        clock.advance(10);
        assert_eq!(pool.mark_ready(), 2);
        pool.dispatch();
        assert_eq!(get(&victim_calls), 0);
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn entries_added_during_dispatch_wait_for_their_interval() {
        let (pool, clock) = pool();
        let added_calls = counter();
        {
            let pool_in_callback = pool.clone();
            let added_calls = added_calls.clone();
            pool.add(10, move || {
                pool_in_callback
                    .add(10, counting(&added_calls))
                    .expect("valid interval");
                TickResponse::Stop
            })
            .unwrap();
        }

        clock.advance(10);
        pool.dispatch();
        assert_eq!(get(&added_calls), 0);
        assert_eq!(pool.len(), 1);

        clock.advance(10);
        pool.dispatch();
        assert_eq!(get(&added_calls), 1);
    }

    #[test]
    fn nested_dispatch_is_ignored() {
        let (pool, clock) = pool();
        let count = counter();
        {
            let pool_in_callback = pool.clone();
            let count = count.clone();
            pool.add(10, move || {
                count.fetch_add(1, Ordering::SeqCst);
                pool_in_callback.dispatch();
                TickResponse::Continue
            })
            .unwrap();
        }
        clock.advance(10);
        pool.dispatch();
        assert_eq!(get(&count), 1);
    }

    #[test]
    fn survivors_are_merged_back_in_deadline_order() {
        let (pool, clock) = pool();
        let order = Arc::new(Mutex::new(Vec::new()));
        for (interval, name) in [(30, "c"), (10, "a"), (20, "b")] {
            let order = order.clone();
            pool.add(interval, move || {
                order.lock().push(name);
                TickResponse::Continue
            })
            .unwrap();
        }

        clock.advance(10);
        pool.dispatch();
        assert_eq!(*order.lock(), ["a"]);

        // a and b are both due at 20, c at 30.
        clock.advance(10);
        pool.dispatch();
        assert_eq!(*order.lock(), ["a", "b", "a"]);
        assert_eq!(pool.next_wakeup(), Some(Duration::from_millis(10)));

        clock.advance(10);
        pool.dispatch();
        assert_eq!(*order.lock(), ["a", "b", "a", "c", "a"]);
    }

    #[test]
    fn clear_destroys_everything() {
        let (pool, _) = pool();
        let destroyed = counter();
        for _ in 0..3 {
            let d = destroyed.clone();
            pool.add_with_destructor(
                10,
                || TickResponse::Continue,
                move || {
                    d.fetch_add(1, Ordering::SeqCst);
                },
            )
            .unwrap();
        }
        pool.clear();
        assert_eq!(get(&destroyed), 3);
        assert!(pool.is_empty());
    }
}
