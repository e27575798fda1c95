use std::{fmt, sync::Arc};

use derive_more::{Deref, Display};

use crate::Timeline;

/// Notifications sent by a [`Timeline`] to its listeners.
///
/// Events are delivered synchronously on the thread that drives the timeline's pool. Frames may
/// be skipped when ticks arrive late, so listeners must not expect one `NewFrame` per frame.
/// Markers on skipped frames are still reported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimelineEvent {
    Started,
    Paused,
    Completed,
    NewFrame(i64),
    /// Not reported for markers jumped over by the tick that completes the timeline.
    MarkerReached { name: String, frame: i64 },
}

#[derive(Debug, Display, Copy, Clone, PartialEq, Eq, Hash, Deref)]
pub struct ListenerId(u32);

pub type Listener = Arc<dyn Fn(&Timeline, &TimelineEvent) + Send + Sync>;

#[derive(Default)]
pub(crate) struct Listeners {
    next_id: u32,
    entries: Vec<(ListenerId, Listener)>,
}

impl fmt::Debug for Listeners {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listeners")
            .field("count", &self.entries.len())
            .finish()
    }
}

impl Listeners {
    pub fn add(&mut self, listener: Listener) -> ListenerId {
        self.next_id += 1;
        let id = ListenerId(self.next_id);
        self.entries.push((id, listener));
        id
    }

    pub fn remove(&mut self, id: ListenerId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(i, _)| *i != id);
        self.entries.len() != before
    }

    /// A copy of the current listeners, so that they can be invoked without holding a lock.
    pub fn snapshot(&self) -> Vec<Listener> {
        self.entries.iter().map(|(_, l)| l.clone()).collect()
    }
}
