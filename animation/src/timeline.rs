//! A frame clock for animations.
//!
//! A timeline counts frames from `0` to `n_frames` (or back) at a nominal frame rate, driven by a
//! periodic timer in a [`TimeoutPool`]. Ticks that arrive late are not replayed. Instead, the
//! wall clock time since the previous tick decides how many frames to advance, so an animation
//! finishes in time even if the host loop is busy. Markers on frames that were jumped over are
//! still reported.
//!
//! Listeners receive the timeline and may call any of its operations while handling an event. No
//! lock is held while a listener runs.

use std::{mem, ops::RangeInclusive, sync::Arc};

use log::{debug, trace, warn};
use parking_lot::{Mutex, MutexGuard};

use crate::{
    ConfigError, Direction, Listener, ListenerId, MarkerIndex, PoolRegistry, TickResponse,
    TimelineConfig, TimelineEvent, TimeoutPool, TimerId,
    error::check_fps,
    timeline_config::{DEFAULT_FPS, duration_for_frames, frames_for_duration},
    timeline_event::Listeners,
};

/// How far [`Timeline::skip`] lands from a boundary when it wraps around.
///
/// Wrapping forward lands on frame `SKIP_WRAP_INSET` instead of `0`, wrapping backward on
/// `n_frames - SKIP_WRAP_INSET` instead of `n_frames`. Existing animations depend on this.
pub const SKIP_WRAP_INSET: i64 = 1;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Playback {
    Idle,
    /// Started, but waiting for the delay to expire.
    DelayPending,
    Playing,
}

/// A handle to a timeline.
///
/// Unlike most handles, `Clone` does not share the timeline: it creates a new, idle timeline with
/// the same configuration. Listeners receive the timeline they are connected to.
#[derive(Debug)]
pub struct Timeline {
    shared: Arc<Shared>,
}

#[derive(Debug)]
struct Shared {
    registry: PoolRegistry,
    pool: TimeoutPool,
    state: Mutex<State>,
    listeners: Mutex<Listeners>,
}

/// The timer a timeline holds, if any. A timeline never holds a delay and a tick timer at the
/// same time.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum Phase {
    Idle,
    DelayPending(TimerId),
    Playing(TimerId),
}

impl Phase {
    fn timer(self) -> Option<TimerId> {
        match self {
            Self::Idle => None,
            Self::DelayPending(id) | Self::Playing(id) => Some(id),
        }
    }
}

#[derive(Debug)]
struct State {
    direction: Direction,
    /// Transiently outside of `0..=n_frames` while a tick resolves a boundary crossing.
    current_frame: i64,
    fps: u32,
    n_frames: u32,
    delay_ms: u32,
    looping: bool,
    /// `None` if the next tick is the first one after (re)starting.
    prev_tick: Option<u64>,
    skipped_frames: u32,
    msecs_delta: u64,
    markers: MarkerIndex,
    phase: Phase,
}

impl State {
    fn new(n_frames: u32, fps: u32) -> Self {
        Self {
            direction: Direction::Forward,
            current_frame: 0,
            fps,
            n_frames,
            delay_ms: 0,
            looping: false,
            prev_tick: None,
            skipped_frames: 0,
            msecs_delta: 0,
            markers: MarkerIndex::default(),
            phase: Phase::Idle,
        }
    }

    fn interval_ms(&self) -> u32 {
        1000 / self.fps
    }

    fn n_frames(&self) -> i64 {
        self.n_frames.into()
    }

    /// The last frame in the current direction.
    fn boundary(&self) -> i64 {
        match self.direction {
            Direction::Forward => self.n_frames(),
            Direction::Backward => 0,
        }
    }

    fn crossed_boundary(&self) -> bool {
        match self.direction {
            Direction::Forward => self.current_frame >= self.n_frames(),
            Direction::Backward => self.current_frame <= 0,
        }
    }

    fn rewind(&mut self) {
        self.current_frame = match self.direction {
            Direction::Forward => 0,
            Direction::Backward => self.n_frames(),
        };
    }

    fn advance_to(&mut self, frame: u32) {
        self.current_frame = frame.min(self.n_frames).into();
    }

    fn duration(&self) -> u32 {
        duration_for_frames(self.n_frames, self.fps)
    }

    /// The frames passed by the last advance of `frames`, in ascending order.
    fn passed_frames(&self, frames: i64) -> RangeInclusive<i64> {
        match self.direction {
            Direction::Forward => (self.current_frame - frames + 1)..=self.current_frame,
            Direction::Backward => self.current_frame..=(self.current_frame + frames - 1),
        }
    }
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock()
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        if let Some(id) = mem::replace(&mut self.state.get_mut().phase, Phase::Idle).timer() {
            self.pool.remove(id);
        }
    }
}

impl Timeline {
    /// A timeline of `n_frames` frames played at `fps` frames per second.
    pub fn new(registry: &PoolRegistry, n_frames: u32, fps: u32) -> Result<Self, ConfigError> {
        let fps = check_fps(fps)?;
        if n_frames == 0 {
            return Err(ConfigError::ZeroFrames);
        }
        Ok(Self::with_state(registry, State::new(n_frames, fps)))
    }

    /// A timeline lasting `duration_ms` at the default frame rate.
    pub fn for_duration(registry: &PoolRegistry, duration_ms: u32) -> Self {
        let n_frames = frames_for_duration(duration_ms, DEFAULT_FPS);
        Self::with_state(registry, State::new(n_frames, DEFAULT_FPS))
    }

    pub fn from_config(
        registry: &PoolRegistry,
        config: &TimelineConfig,
    ) -> Result<Self, ConfigError> {
        let timeline = Self::new(registry, config.n_frames()?, config.fps()?)?;
        timeline.set_loop(config.looping);
        timeline.set_delay(config.delay_ms);
        timeline.set_direction(config.direction);
        Ok(timeline)
    }

    fn with_state(registry: &PoolRegistry, state: State) -> Self {
        Self {
            shared: Shared {
                registry: registry.clone(),
                pool: registry.pool(),
                state: state.into(),
                listeners: Mutex::default(),
            }
            .into(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.shared.lock()
    }

    fn now(&self) -> u64 {
        self.shared.pool.clock().now_ms()
    }

    /// The pool this timeline registers its timers in.
    pub fn pool(&self) -> &TimeoutPool {
        &self.shared.pool
    }

    /// `true` if both handles refer to the same timeline.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }

    // Playback

    /// Starts playing from the current frame, after the configured delay.
    ///
    /// Does nothing if the timeline is already playing or waiting for its delay.
    pub fn start(&self) {
        let started = {
            let mut state = self.lock();
            if state.phase != Phase::Idle {
                return;
            }
            if state.delay_ms > 0 {
                let weak = Arc::downgrade(&self.shared);
                match self.shared.pool.add(state.delay_ms, move || {
                    if let Some(shared) = weak.upgrade() {
                        Timeline { shared }.delay_elapsed();
                    }
                    TickResponse::Stop
                }) {
                    Ok(id) => state.phase = Phase::DelayPending(id),
                    Err(e) => warn!("Failed to schedule the start delay: {e}"),
                }
                false
            } else {
                self.start_ticking(&mut state)
            }
        };

        if started {
            self.emit(TimelineEvent::Started);
        }
    }

    fn delay_elapsed(&self) {
        let started = {
            let mut state = self.lock();
            if !matches!(state.phase, Phase::DelayPending(_)) {
                return;
            }
            // The delay timer stops itself after this returns.
            state.phase = Phase::Idle;
            self.start_ticking(&mut state)
        };

        if started {
            self.emit(TimelineEvent::Started);
        }
    }

    /// Registers the tick timer. Returns `false` if that failed.
    fn start_ticking(&self, state: &mut State) -> bool {
        debug_assert!(
            state.phase.timer().is_none(),
            "Timeline already holds a timer"
        );
        if state.prev_tick.is_none() {
            state.prev_tick = Some(self.now());
        }
        state.skipped_frames = 0;
        state.msecs_delta = 0;

        let weak = Arc::downgrade(&self.shared);
        let tick = move || match weak.upgrade() {
            Some(shared) => Timeline { shared }.tick(),
            None => TickResponse::Stop,
        };
        match self.shared.pool.add(state.interval_ms(), tick) {
            Ok(id) => {
                state.phase = Phase::Playing(id);
                true
            }
            Err(e) => {
                warn!("Failed to schedule timeline ticks: {e}");
                false
            }
        }
    }

    /// Stops playing and keeps the current frame.
    pub fn pause(&self) {
        let timer = {
            let mut state = self.lock();
            state.prev_tick = None;
            mem::replace(&mut state.phase, Phase::Idle).timer()
        };
        if let Some(id) = timer {
            self.shared.pool.remove(id);
        }
        self.emit(TimelineEvent::Paused);
    }

    /// Pauses and rewinds.
    pub fn stop(&self) {
        self.pause();
        self.rewind();
    }

    pub fn playback(&self) -> Playback {
        match self.lock().phase {
            Phase::Idle => Playback::Idle,
            Phase::DelayPending(_) => Playback::DelayPending,
            Phase::Playing(_) => Playback::Playing,
        }
    }

    pub fn is_playing(&self) -> bool {
        self.playback() == Playback::Playing
    }

    // Ticks

    fn tick(&self) -> TickResponse {
        let now = self.now();

        let passed = {
            let mut state = self.lock();
            let prev_tick = *state.prev_tick.get_or_insert_with(|| {
                // Restarted from a `Completed` listener.
                trace!("First tick of a restarted timeline");
                now
            });

            // Interpolate the frames passed since the previous tick.
            let elapsed = now.saturating_sub(prev_tick);
            let frames = (elapsed / u64::from(state.interval_ms())).max(1);
            state.msecs_delta = elapsed;
            state.skipped_frames = (frames - 1).try_into().unwrap_or(u32::MAX);
            state.prev_tick = Some(now);
            if state.skipped_frames > 0 {
                debug!("Timeline skipping {} frames", state.skipped_frames);
            }

            let frames = i64::try_from(frames).unwrap_or(i64::MAX);
            state.current_frame = state
                .current_frame
                .saturating_add(state.direction.sign().saturating_mul(frames));
            trace!("Timeline tick at frame {}", state.current_frame);

            (!state.crossed_boundary())
                .then(|| (state.current_frame, state.passed_frames(frames)))
        };

        match passed {
            Some((frame, passed)) => self.tick_within(frame, passed),
            None => self.tick_at_boundary(),
        }
    }

    fn tick_within(&self, frame: i64, passed: RangeInclusive<i64>) -> TickResponse {
        self.emit(TimelineEvent::NewFrame(frame));

        for frame in passed {
            let Ok(marker_frame) = u32::try_from(frame) else {
                continue;
            };
            let names = self.lock().markers.at_frame(marker_frame).to_vec();
            for name in names {
                debug!("Marker `{name}` reached");
                self.emit(TimelineEvent::MarkerReached { name, frame });
            }
        }

        // A listener may have paused the timeline.
        if matches!(self.lock().phase, Phase::Playing(_)) {
            TickResponse::Continue
        } else {
            TickResponse::Stop
        }
    }

    fn tick_at_boundary(&self) -> TickResponse {
        let (end_frame, overflow, saved_direction) = {
            let mut state = self.lock();
            let overflow = state.current_frame;
            // Listeners see the clamped frame.
            state.current_frame = state.boundary();
            (state.current_frame, overflow, state.direction)
        };

        self.emit(TimelineEvent::NewFrame(end_frame));

        let completed_timer = {
            let mut state = self.lock();
            if state.current_frame != end_frame {
                // A listener moved the timeline, that wins.
                return TickResponse::Continue;
            }
            debug!(
                "Timeline completed (frames: {}, dropped: {})",
                state.n_frames, state.skipped_frames
            );
            let phase = state.phase;
            match phase {
                // Unregister before completing, so that a listener can start again.
                Phase::Playing(id) if !state.looping => {
                    state.phase = Phase::Idle;
                    Some(id)
                }
                _ => None,
            }
        };
        if let Some(id) = completed_timer {
            self.shared.pool.remove(id);
        }

        self.emit(TimelineEvent::Completed);

        let mut state = self.lock();
        let n_frames = state.n_frames();
        let current = state.current_frame;
        // The first and the last frame are the same position.
        let equivalent = (current == 0 && end_frame == n_frames)
            || (current == n_frames && end_frame == 0);
        if current != end_frame && !equivalent {
            return TickResponse::Continue;
        }

        if state.looping {
            // Carry the overshoot into the next lap.
            state.current_frame = match saved_direction {
                Direction::Forward => overflow - n_frames,
                Direction::Backward => n_frames + overflow,
            };
            // Bounce if a listener changed the direction.
            if state.direction != saved_direction {
                state.current_frame = n_frames - state.current_frame;
            }
            TickResponse::Continue
        } else {
            state.rewind();
            state.prev_tick = None;
            TickResponse::Stop
        }
    }

    // Position

    /// Moves to the start of the current direction.
    pub fn rewind(&self) {
        self.lock().rewind();
    }

    /// Moves to `frame`, clamped to `n_frames`. Does not emit events.
    pub fn advance_to(&self, frame: u32) {
        self.lock().advance_to(frame);
    }

    /// Moves `frames` frames in the current direction, wrapping around at the boundary.
    ///
    /// See [`SKIP_WRAP_INSET`] for where a wrap lands.
    pub fn skip(&self, frames: u32) {
        let mut state = self.lock();
        let n_frames = state.n_frames();
        let frames = i64::from(frames);
        match state.direction {
            Direction::Forward => {
                state.current_frame += frames;
                if state.current_frame > n_frames {
                    state.current_frame = SKIP_WRAP_INSET;
                }
            }
            Direction::Backward => {
                state.current_frame -= frames;
                if state.current_frame < 1 {
                    state.current_frame = n_frames - SKIP_WRAP_INSET;
                }
            }
        }
    }

    pub fn current_frame(&self) -> i64 {
        self.lock().current_frame
    }

    /// The position as a fraction of the timeline, measured in the playing direction.
    pub fn progress(&self) -> f64 {
        let state = self.lock();
        let progress = state.current_frame as f64 / f64::from(state.n_frames);
        match state.direction {
            Direction::Forward => progress,
            Direction::Backward => 1.0 - progress,
        }
    }

    /// The number of frames advanced by the most recent tick and the milliseconds it covered.
    ///
    /// `(0, 0)` if the timeline is not playing.
    pub fn delta(&self) -> (u32, u64) {
        let state = self.lock();
        match state.phase {
            Phase::Playing(_) => (state.skipped_frames + 1, state.msecs_delta),
            _ => (0, 0),
        }
    }

    // Configuration

    pub fn fps(&self) -> u32 {
        self.lock().fps
    }

    /// Changes the frame rate. A playing timeline restarts its tick timer at the new interval.
    pub fn set_speed(&self, fps: u32) -> Result<(), ConfigError> {
        let fps = check_fps(fps)?;
        let mut state = self.lock();
        if state.fps == fps {
            return Ok(());
        }
        state.fps = fps;
        let phase = state.phase;
        if let Phase::Playing(id) = phase {
            self.shared.pool.remove(id);
            state.phase = Phase::Idle;
            self.start_ticking(&mut state);
        }
        Ok(())
    }

    pub fn n_frames(&self) -> u32 {
        self.lock().n_frames
    }

    pub fn set_n_frames(&self, n_frames: u32) -> Result<(), ConfigError> {
        if n_frames == 0 {
            return Err(ConfigError::ZeroFrames);
        }
        self.lock().n_frames = n_frames;
        Ok(())
    }

    /// The duration in milliseconds at the current frame rate.
    pub fn duration(&self) -> u32 {
        self.lock().duration()
    }

    /// Sets the number of frames so that the timeline lasts about `duration_ms`, at least one
    /// frame.
    pub fn set_duration(&self, duration_ms: u32) {
        let mut state = self.lock();
        state.n_frames = frames_for_duration(duration_ms, state.fps);
    }

    pub fn delay(&self) -> u32 {
        self.lock().delay_ms
    }

    /// The delay observed by the next [`start`](Self::start).
    pub fn set_delay(&self, delay_ms: u32) {
        self.lock().delay_ms = delay_ms;
    }

    pub fn is_loop(&self) -> bool {
        self.lock().looping
    }

    pub fn set_loop(&self, looping: bool) {
        self.lock().looping = looping;
    }

    pub fn direction(&self) -> Direction {
        self.lock().direction
    }

    /// Changes the direction. Frame `0` is treated as `n_frames`, so that a timeline that just
    /// completed forward continues smoothly backward.
    pub fn set_direction(&self, direction: Direction) {
        let mut state = self.lock();
        if state.direction == direction {
            return;
        }
        state.direction = direction;
        if state.current_frame == 0 {
            state.current_frame = state.n_frames();
        }
    }

    // Markers

    pub fn add_marker_at_frame(&self, name: &str, frame: u32) {
        let mut state = self.lock();
        if frame > state.n_frames {
            warn!(
                "Marker `{name}` at frame {frame} is beyond the last frame {}",
                state.n_frames
            );
            return;
        }
        Self::add_marker(&mut state, name, frame);
    }

    pub fn add_marker_at_time(&self, name: &str, msecs: u32) {
        let mut state = self.lock();
        if msecs > state.duration() {
            warn!(
                "Marker `{name}` at {msecs}ms is beyond the duration {}ms",
                state.duration()
            );
            return;
        }
        let frame = u64::from(msecs) * u64::from(state.fps) / 1000;
        Self::add_marker(&mut state, name, frame as u32);
    }

    fn add_marker(state: &mut State, name: &str, frame: u32) {
        if let Some(existing) = state.markers.frame_of(name) {
            warn!("A marker named `{name}` already exists on frame {existing}");
            return;
        }
        state.markers.insert(name, frame);
    }

    pub fn remove_marker(&self, name: &str) {
        if self.lock().markers.remove(name).is_none() {
            warn!("No marker named `{name}` found");
        }
    }

    pub fn has_marker(&self, name: &str) -> bool {
        self.lock().markers.contains(name)
    }

    /// The frame of the marker `name`.
    pub fn marker_frame(&self, name: &str) -> Option<u32> {
        self.lock().markers.frame_of(name)
    }

    /// The names of the markers at `frame`, or of all markers if `None`, in insertion order.
    pub fn list_markers(&self, frame: Option<u32>) -> Vec<String> {
        let state = self.lock();
        match frame {
            Some(frame) => state.markers.at_frame(frame).to_vec(),
            None => state.markers.names().map(str::to_owned).collect(),
        }
    }

    /// Moves to the marker `name`. Does not emit events.
    pub fn advance_to_marker(&self, name: &str) {
        let mut state = self.lock();
        match state.markers.frame_of(name) {
            Some(frame) => state.advance_to(frame),
            None => warn!("No marker named `{name}` found"),
        }
    }

    // Events

    pub fn connect(
        &self,
        listener: impl Fn(&Timeline, &TimelineEvent) + Send + Sync + 'static,
    ) -> ListenerId {
        self.shared.listeners.lock().add(Arc::new(listener))
    }

    /// Listens to [`TimelineEvent::MarkerReached`] for the marker `name` only.
    pub fn connect_marker(
        &self,
        name: &str,
        listener: impl Fn(&Timeline, &str, i64) + Send + Sync + 'static,
    ) -> ListenerId {
        let marker = name.to_owned();
        self.connect(move |timeline, event| {
            if let TimelineEvent::MarkerReached { name, frame } = event
                && *name == marker
            {
                listener(timeline, name.as_str(), *frame);
            }
        })
    }

    pub fn disconnect(&self, id: ListenerId) -> bool {
        let removed = self.shared.listeners.lock().remove(id);
        if !removed {
            debug!("Listener {id} is not connected");
        }
        removed
    }

    fn emit(&self, event: TimelineEvent) {
        trace!("Timeline event: {event:?}");
        let listeners: Vec<Listener> = self.shared.listeners.lock().snapshot();
        for listener in listeners {
            listener(self, &event);
        }
    }
}

impl Clone for Timeline {
    /// A new, idle timeline with the same frame rate, frames, loop, delay and direction.
    ///
    /// The position, markers, and listeners are not copied.
    fn clone(&self) -> Self {
        let (fps, n_frames, looping, delay_ms, direction) = {
            let state = self.lock();
            (
                state.fps,
                state.n_frames,
                state.looping,
                state.delay_ms,
                state.direction,
            )
        };
        let copy = Self::with_state(&self.shared.registry, State::new(n_frames, fps));
        copy.set_loop(looping);
        copy.set_delay(delay_ms);
        copy.set_direction(direction);
        copy
    }
}
