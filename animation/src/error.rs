use derive_more::{Display, Error};

/// Rejected attempts to put a timer or timeline into an invalid configuration.
#[derive(Debug, Display, Error, Copy, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[display("timer interval must be greater than zero")]
    ZeroInterval,
    #[display("frames per second must be within 1..=1000, got {fps}")]
    InvalidFps { fps: u32 },
    #[display("a timeline needs at least one frame")]
    ZeroFrames,
}

pub const MIN_FPS: u32 = 1;
pub const MAX_FPS: u32 = 1000;

pub(crate) fn check_fps(fps: u32) -> Result<u32, ConfigError> {
    if (MIN_FPS..=MAX_FPS).contains(&fps) {
        Ok(fps)
    } else {
        Err(ConfigError::InvalidFps { fps })
    }
}
