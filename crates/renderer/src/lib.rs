// Audio output abstraction layer

use parking_lot::Mutex;
use std::sync::Arc;
use trackplay_core::{EngineError, Result};

#[cfg(feature = "cpal")]
mod cpal_sink;
mod null_sink;
mod pull_sink;

#[cfg(feature = "cpal")]
pub use cpal_sink::{CpalSink, CpalSinkFactory};
pub use null_sink::{NullSink, NullSinkFactory};
pub use pull_sink::{PullSink, PullSinkFactory, PullSinkHandle};

/// Fills an interleaved f32 buffer, returning the number of samples written
pub type RenderCallback = Box<dyn FnMut(&mut [f32]) -> usize + Send + 'static>;

/// Receives fatal sink failures
pub type ErrorCallback = Arc<dyn Fn(EngineError) + Send + Sync + 'static>;

/// Audio output target
///
/// The sink pulls audio on its own timing by invoking the render callback;
/// whatever the callback leaves unwritten is played as silence.
pub trait OutputSink: Send {
    /// Set the callback that provides PCM data
    fn set_render_callback(&mut self, callback: RenderCallback) -> Result<()>;

    /// Set the callback that is told about device failures
    fn set_error_callback(&mut self, callback: ErrorCallback);

    /// Start pulling audio
    fn start(&mut self) -> Result<()>;

    /// Stop pulling audio, keeping the device open
    fn pause(&mut self) -> Result<()>;

    fn resume(&mut self) -> Result<()>;

    /// Stop pulling audio
    fn stop(&mut self) -> Result<()>;

    fn sample_rate(&self) -> u32;

    fn channels(&self) -> u16;

    /// Frames requested per render callback
    fn buffer_frames(&self) -> usize;

    fn is_running(&self) -> bool;

    /// Release all audio resources
    fn release(&mut self) -> Result<()>;
}

/// Audio format requested from a sink
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioSpec {
    pub sample_rate: u32,
    pub channels: u16,
    pub buffer_frames: usize,
}

impl Default for AudioSpec {
    fn default() -> Self {
        Self {
            sample_rate: 48000,
            channels: 2,
            buffer_frames: 1024,
        }
    }
}

/// Creates sinks for a given audio format
pub trait SinkFactory: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &'static str;

    fn create_sink(&self, spec: AudioSpec) -> Result<Box<dyn OutputSink>>;
}

/// Shared holder of a render callback
///
/// Zero-fills what the callback does not write.
#[derive(Clone, Default)]
pub struct RenderSlot {
    callback: Arc<Mutex<Option<RenderCallback>>>,
}

impl RenderSlot {
    pub fn set(&self, callback: RenderCallback) {
        *self.callback.lock() = Some(callback);
    }

    pub fn clear(&self) {
        *self.callback.lock() = None;
    }

    pub fn render(&self, data: &mut [f32]) -> usize {
        let written = match self.callback.lock().as_mut() {
            Some(callback) => callback(data).min(data.len()),
            None => 0,
        };

        // Zero-fill any unwritten samples to prevent playing stale data
        if written < data.len() {
            data[written..].fill(0.0);
        }
        written
    }
}

/// Factory used when the embedder does not supply one
pub fn default_sink_factory() -> Arc<dyn SinkFactory> {
    #[cfg(feature = "cpal")]
    {
        Arc::new(CpalSinkFactory)
    }

    #[cfg(not(feature = "cpal"))]
    {
        Arc::new(NullSinkFactory)
    }
}
