use std::time::Duration;

/// The hooks a host event loop uses to drive a source of timed callbacks.
///
/// A host calls [`next_wakeup`](Self::next_wakeup) to learn how long it may sleep, then
/// [`is_ready`](Self::is_ready) after waking up, and [`dispatch`](Self::dispatch) if that returned
/// `true`. A source never calls into the host.
pub trait EventSource {
    /// How long the host may sleep before polling again. `None` if nothing is scheduled.
    fn next_wakeup(&self) -> Option<Duration>;

    /// Marks all due callbacks and returns `true` if at least one is.
    fn is_ready(&self) -> bool;

    /// Runs all due callbacks.
    fn dispatch(&self);
}
