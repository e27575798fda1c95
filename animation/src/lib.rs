mod clock;
mod error;
mod event_source;
mod marker_index;
mod pool_registry;
mod timeline;
mod timeline_config;
mod timeline_event;
mod timeout_pool;
mod timer_entry;

pub use clock::*;
pub use error::{ConfigError, MAX_FPS, MIN_FPS};
pub use event_source::*;
pub use marker_index::*;
pub use pool_registry::*;
pub use timeline::*;
pub use timeline_config::*;
pub use timeline_event::{Listener, ListenerId, TimelineEvent};
pub use timeout_pool::*;
pub use timer_entry::{TickResponse, TimerCallback, TimerDestructor, TimerId};
