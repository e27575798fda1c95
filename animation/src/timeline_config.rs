use serde::Deserialize;

use crate::{ConfigError, error::check_fps};

/// The frame rate of timelines that are not given one.
pub const DEFAULT_FPS: u32 = 60;

/// The duration of timelines that specify neither frames nor duration.
pub const DEFAULT_DURATION_MS: u32 = 1000;

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    #[default]
    Forward,
    Backward,
}

impl Direction {
    /// `1` for forward, `-1` for backward.
    pub fn sign(self) -> i64 {
        match self {
            Self::Forward => 1,
            Self::Backward => -1,
        }
    }

    pub fn reversed(self) -> Self {
        match self {
            Self::Forward => Self::Backward,
            Self::Backward => Self::Forward,
        }
    }
}

/// Declarative timeline setup, as read from configuration files.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TimelineConfig {
    pub fps: u32,
    /// Takes precedence over `duration_ms`.
    pub n_frames: Option<u32>,
    pub duration_ms: Option<u32>,
    pub delay_ms: u32,
    #[serde(rename = "loop")]
    pub looping: bool,
    pub direction: Direction,
}

impl Default for TimelineConfig {
    fn default() -> Self {
        Self {
            fps: DEFAULT_FPS,
            n_frames: None,
            duration_ms: None,
            delay_ms: 0,
            looping: false,
            direction: Direction::Forward,
        }
    }
}

impl TimelineConfig {
    /// The validated frame rate.
    pub fn fps(&self) -> Result<u32, ConfigError> {
        check_fps(self.fps)
    }

    /// The validated number of frames, derived from the duration if not set explicitly.
    pub fn n_frames(&self) -> Result<u32, ConfigError> {
        let fps = self.fps()?;
        match self.n_frames {
            Some(0) => Err(ConfigError::ZeroFrames),
            Some(n_frames) => Ok(n_frames),
            None => Ok(frames_for_duration(
                self.duration_ms.unwrap_or(DEFAULT_DURATION_MS),
                fps,
            )),
        }
    }
}

/// The number of frames that cover `duration_ms` at `fps`, at least one.
pub fn frames_for_duration(duration_ms: u32, fps: u32) -> u32 {
    let frames = u64::from(duration_ms) * u64::from(fps) / 1000;
    frames.clamp(1, u32::MAX.into()) as u32
}

/// The duration of `n_frames` at `fps`.
pub fn duration_for_frames(n_frames: u32, fps: u32) -> u32 {
    let duration = u64::from(n_frames) * 1000 / u64::from(fps.max(1));
    duration.min(u32::MAX.into()) as u32
}
