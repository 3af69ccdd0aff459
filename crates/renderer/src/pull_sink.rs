// Caller-driven sink: audio is rendered only when the owner of the handle asks for it

use crate::{AudioSpec, ErrorCallback, OutputSink, RenderCallback, RenderSlot, SinkFactory};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use trackplay_core::{EngineError, Result};

struct PullShared {
    slot: RenderSlot,
    running: AtomicBool,
    on_error: Mutex<Option<ErrorCallback>>,
    spec: Mutex<AudioSpec>,
}

/// Sink whose render callback is driven through a [`PullSinkHandle`]
///
/// Used by embedders that own their own audio clock, and by tests that need
/// deterministic control over when audio is consumed.
pub struct PullSink {
    shared: Arc<PullShared>,
}

impl OutputSink for PullSink {
    fn set_render_callback(&mut self, callback: RenderCallback) -> Result<()> {
        self.shared.slot.set(callback);
        Ok(())
    }

    fn set_error_callback(&mut self, callback: ErrorCallback) {
        *self.shared.on_error.lock() = Some(callback);
    }

    fn start(&mut self) -> Result<()> {
        self.shared.running.store(true, Ordering::Release);
        Ok(())
    }

    fn pause(&mut self) -> Result<()> {
        self.shared.running.store(false, Ordering::Release);
        Ok(())
    }

    fn resume(&mut self) -> Result<()> {
        self.start()
    }

    fn stop(&mut self) -> Result<()> {
        self.shared.running.store(false, Ordering::Release);
        Ok(())
    }

    fn sample_rate(&self) -> u32 {
        self.shared.spec.lock().sample_rate
    }

    fn channels(&self) -> u16 {
        self.shared.spec.lock().channels
    }

    fn buffer_frames(&self) -> usize {
        self.shared.spec.lock().buffer_frames
    }

    fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    fn release(&mut self) -> Result<()> {
        self.stop()?;
        self.shared.slot.clear();
        *self.shared.on_error.lock() = None;
        Ok(())
    }
}

/// Creates [`PullSink`]s that all answer to the same handle
///
/// Each new sink replaces the previous one behind the handle.
pub struct PullSinkFactory {
    shared: Arc<PullShared>,
}

impl PullSinkFactory {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(PullShared {
                slot: RenderSlot::default(),
                running: AtomicBool::new(false),
                on_error: Mutex::new(None),
                spec: Mutex::new(AudioSpec::default()),
            }),
        }
    }

    pub fn handle(&self) -> PullSinkHandle {
        PullSinkHandle {
            shared: self.shared.clone(),
        }
    }
}

impl Default for PullSinkFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl SinkFactory for PullSinkFactory {
    fn name(&self) -> &'static str {
        "pull"
    }

    fn create_sink(&self, spec: AudioSpec) -> Result<Box<dyn OutputSink>> {
        *self.shared.spec.lock() = spec;
        self.shared.running.store(false, Ordering::Release);
        self.shared.slot.clear();
        *self.shared.on_error.lock() = None;

        Ok(Box::new(PullSink {
            shared: self.shared.clone(),
        }))
    }
}

/// Drives a [`PullSink`] from the outside
#[derive(Clone)]
pub struct PullSinkHandle {
    shared: Arc<PullShared>,
}

impl PullSinkHandle {
    /// Request `frames` frames, returning how many the engine supplied
    ///
    /// A sink that is not running renders nothing.
    pub fn render(&self, frames: usize) -> usize {
        let channels = self.shared.spec.lock().channels.max(1) as usize;
        let mut buffer = vec![0.0f32; frames * channels];
        self.render_into(&mut buffer) / channels
    }

    /// Render into `data`, returning the number of samples written
    pub fn render_into(&self, data: &mut [f32]) -> usize {
        if !self.is_running() {
            data.fill(0.0);
            return 0;
        }
        self.shared.slot.render(data)
    }

    /// Simulate a fatal device failure
    pub fn fail(&self, message: &str) {
        let on_error = self.shared.on_error.lock().clone();
        match on_error {
            Some(on_error) => on_error(EngineError::OutputDeviceFailure(message.to_string())),
            None => log::warn!("Pull sink failure with no error callback: {}", message),
        }
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    pub fn spec(&self) -> AudioSpec {
        *self.shared.spec.lock()
    }
}
