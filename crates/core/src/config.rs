// Engine configuration

use crate::error::{EngineError, Result};
use std::time::Duration;

/// Smallest ring buffer, as audio duration
pub const MIN_BUFFER_MS: u64 = 100;

/// Largest ring buffer, as audio duration (limits memory usage)
pub const MAX_BUFFER_MS: u64 = 8000;

/// Default ring buffer size, as audio duration
pub const DEFAULT_BUFFER_MS: u64 = 2000;

/// Default coalescing interval of position updates
pub const POSITION_UPDATE_INTERVAL_MS: u64 = 100;

/// Default frames per output callback
pub const RENDER_BUFFER_FRAMES: usize = 1024;

/// Tunables of a playback engine instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Ring buffer capacity expressed as audio duration
    pub buffer_duration_ms: u64,
    /// Minimum spacing of position updates; 0 disables them
    pub position_update_interval_ms: u64,
    /// Frames the sink asks for per render callback
    pub render_buffer_frames: usize,
    /// Upper bound for every wait on the control context
    pub control_timeout_ms: u64,
    /// Upper bound for a synchronized position read
    pub sync_read_timeout_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            buffer_duration_ms: DEFAULT_BUFFER_MS,
            position_update_interval_ms: POSITION_UPDATE_INTERVAL_MS,
            render_buffer_frames: RENDER_BUFFER_FRAMES,
            control_timeout_ms: 1000,
            sync_read_timeout_ms: 20,
        }
    }
}

impl EngineConfig {
    /// Defaults overridden by `TRACKPLAY_*` environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(ms) = env_u64("TRACKPLAY_BUFFER_MS") {
            config.buffer_duration_ms = ms;
        }
        if let Some(ms) = env_u64("TRACKPLAY_POSITION_INTERVAL_MS") {
            config.position_update_interval_ms = ms;
        }
        if let Some(frames) = env_u64("TRACKPLAY_RENDER_FRAMES") {
            config.render_buffer_frames = frames as usize;
        }

        config
    }

    pub fn with_buffer_duration_ms(mut self, ms: u64) -> Self {
        self.buffer_duration_ms = ms;
        self
    }

    pub fn with_position_update_interval_ms(mut self, ms: u64) -> Self {
        self.position_update_interval_ms = ms;
        self
    }

    pub fn with_render_buffer_frames(mut self, frames: usize) -> Self {
        self.render_buffer_frames = frames;
        self
    }

    pub fn with_control_timeout_ms(mut self, ms: u64) -> Self {
        self.control_timeout_ms = ms;
        self
    }

    pub fn with_sync_read_timeout_ms(mut self, ms: u64) -> Self {
        self.sync_read_timeout_ms = ms;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.render_buffer_frames == 0 {
            return Err(EngineError::InvalidState(
                "render_buffer_frames must be non-zero".to_string(),
            ));
        }
        if self.control_timeout_ms == 0 {
            return Err(EngineError::InvalidState(
                "control_timeout_ms must be non-zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Ring buffer capacity in frames for a track at `sample_rate`
    pub fn buffer_capacity_frames(&self, sample_rate: u32) -> usize {
        let ms = self.buffer_duration_ms.clamp(MIN_BUFFER_MS, MAX_BUFFER_MS);
        ((ms * sample_rate as u64) / 1000) as usize
    }

    pub fn position_update_interval(&self) -> Option<Duration> {
        if self.position_update_interval_ms == 0 {
            None
        } else {
            Some(Duration::from_millis(self.position_update_interval_ms))
        }
    }

    pub fn control_timeout(&self) -> Duration {
        Duration::from_millis(self.control_timeout_ms)
    }

    pub fn sync_read_timeout(&self) -> Duration {
        Duration::from_millis(self.sync_read_timeout_ms)
    }
}

fn env_u64(key: &str) -> Option<u64> {
    let value = std::env::var(key).ok()?;
    match value.trim().parse() {
        Ok(parsed) => Some(parsed),
        Err(_) => {
            log::warn!("Ignoring {}={:?}: not a number", key, value);
            None
        }
    }
}
