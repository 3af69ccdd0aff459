// cpal-based output sink for desktop platforms
// The stream is not Send on every host, so a dedicated thread owns it

use crate::{AudioSpec, ErrorCallback, OutputSink, RenderCallback, RenderSlot, SinkFactory};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BufferSize, SampleRate, Stream, StreamConfig};
use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use trackplay_core::{EngineError, Result};

enum StreamCmd {
    Play(Sender<Result<()>>),
    Pause(Sender<Result<()>>),
    Close,
}

/// cpal output sink
pub struct CpalSink {
    spec: AudioSpec,
    slot: RenderSlot,
    on_error: Arc<Mutex<Option<ErrorCallback>>>,
    is_playing: Arc<AtomicBool>,
    cmd_tx: Option<Sender<StreamCmd>>,
    stream_thread: Option<thread::JoinHandle<()>>,
}

impl CpalSink {
    pub fn new(spec: AudioSpec) -> Result<Self> {
        let slot = RenderSlot::default();
        let on_error: Arc<Mutex<Option<ErrorCallback>>> = Arc::new(Mutex::new(None));
        let is_playing = Arc::new(AtomicBool::new(false));

        let (cmd_tx, cmd_rx) = crossbeam_channel::unbounded();
        let (ready_tx, ready_rx) = crossbeam_channel::bounded(1);

        let thread_slot = slot.clone();
        let thread_on_error = on_error.clone();
        let thread_is_playing = is_playing.clone();
        let stream_thread = thread::Builder::new()
            .name("trackplay-cpal".to_string())
            .spawn(move || {
                let stream = match build_stream(spec, thread_slot, thread_on_error, thread_is_playing) {
                    Ok(stream) => {
                        let _ = ready_tx.send(Ok(()));
                        stream
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                run_stream(stream, cmd_rx);
            })
            .map_err(|e| EngineError::ThreadError(format!("Failed to spawn output thread: {}", e)))?;

        match ready_rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                let _ = stream_thread.join();
                return Err(e);
            }
            Err(_) => {
                let _ = stream_thread.join();
                return Err(EngineError::OutputDeviceFailure(
                    "Output thread exited during setup".to_string(),
                ));
            }
        }

        log::info!(
            "Opened output stream: {}Hz, {} channels, {} frames per callback",
            spec.sample_rate,
            spec.channels,
            spec.buffer_frames
        );

        Ok(Self {
            spec,
            slot,
            on_error,
            is_playing,
            cmd_tx: Some(cmd_tx),
            stream_thread: Some(stream_thread),
        })
    }

    fn request(&self, make: impl FnOnce(Sender<Result<()>>) -> StreamCmd) -> Result<()> {
        let Some(cmd_tx) = &self.cmd_tx else {
            return Err(EngineError::OutputDeviceFailure("Output stream released".to_string()));
        };
        let (reply_tx, reply_rx) = crossbeam_channel::bounded(1);
        cmd_tx
            .send(make(reply_tx))
            .map_err(|_| EngineError::OutputDeviceFailure("Output thread is gone".to_string()))?;
        reply_rx
            .recv()
            .map_err(|_| EngineError::OutputDeviceFailure("Output thread is gone".to_string()))?
    }
}

fn build_stream(
    spec: AudioSpec,
    slot: RenderSlot,
    on_error: Arc<Mutex<Option<ErrorCallback>>>,
    is_playing: Arc<AtomicBool>,
) -> Result<Stream> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| EngineError::OutputDeviceFailure("No output device available".to_string()))?;

    let mut last_error = None;
    for config in stream_configs(spec) {
        match open_stream(&device, &config, slot.clone(), on_error.clone(), is_playing.clone()) {
            Ok(stream) => return Ok(stream),
            Err(e) => {
                log::warn!("Output config {:?} rejected: {}", config.buffer_size, e);
                last_error = Some(e);
            }
        }
    }
    Err(last_error
        .unwrap_or_else(|| EngineError::OutputDeviceFailure("No usable output config".to_string())))
}

/// Configs to try in order: the requested buffer size, then the device default
fn stream_configs(spec: AudioSpec) -> [StreamConfig; 2] {
    let fixed = StreamConfig {
        channels: spec.channels,
        sample_rate: SampleRate(spec.sample_rate),
        buffer_size: BufferSize::Fixed(spec.buffer_frames as u32),
    };
    let fallback = StreamConfig {
        buffer_size: BufferSize::Default,
        ..fixed.clone()
    };
    [fixed, fallback]
}

fn open_stream(
    device: &cpal::Device,
    config: &StreamConfig,
    slot: RenderSlot,
    on_error: Arc<Mutex<Option<ErrorCallback>>>,
    is_playing: Arc<AtomicBool>,
) -> Result<Stream> {
    let data_is_playing = is_playing.clone();
    let data_callback = move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
        if !data_is_playing.load(Ordering::Relaxed) {
            data.fill(0.0);
            return;
        }
        slot.render(data);
    };

    let error_callback = move |err: cpal::StreamError| {
        log::error!("Audio stream error: {}", err);
        is_playing.store(false, Ordering::Relaxed);
        let callback = on_error.lock().clone();
        if let Some(callback) = callback {
            callback(EngineError::OutputDeviceFailure(err.to_string()));
        }
    };

    device
        .build_output_stream(config, data_callback, error_callback, None)
        .map_err(|e| EngineError::OutputDeviceFailure(format!("Failed to build output stream: {}", e)))
}

fn run_stream(stream: Stream, cmd_rx: Receiver<StreamCmd>) {
    while let Ok(cmd) = cmd_rx.recv() {
        match cmd {
            StreamCmd::Play(reply) => {
                let result = stream
                    .play()
                    .map_err(|e| EngineError::OutputDeviceFailure(format!("Failed to start stream: {}", e)));
                let _ = reply.send(result);
            }
            StreamCmd::Pause(reply) => {
                let result = stream
                    .pause()
                    .map_err(|e| EngineError::OutputDeviceFailure(format!("Failed to pause stream: {}", e)));
                let _ = reply.send(result);
            }
            StreamCmd::Close => break,
        }
    }
    drop(stream);
    log::debug!("Output stream closed");
}

impl OutputSink for CpalSink {
    fn set_render_callback(&mut self, callback: RenderCallback) -> Result<()> {
        self.slot.set(callback);
        Ok(())
    }

    fn set_error_callback(&mut self, callback: ErrorCallback) {
        *self.on_error.lock() = Some(callback);
    }

    fn start(&mut self) -> Result<()> {
        self.request(StreamCmd::Play)?;
        self.is_playing.store(true, Ordering::Relaxed);
        Ok(())
    }

    fn pause(&mut self) -> Result<()> {
        self.is_playing.store(false, Ordering::Relaxed);
        self.request(StreamCmd::Pause)
    }

    fn resume(&mut self) -> Result<()> {
        self.start()
    }

    fn stop(&mut self) -> Result<()> {
        self.is_playing.store(false, Ordering::Relaxed);
        if self.cmd_tx.is_some() {
            self.request(StreamCmd::Pause)?;
        }
        Ok(())
    }

    fn sample_rate(&self) -> u32 {
        self.spec.sample_rate
    }

    fn channels(&self) -> u16 {
        self.spec.channels
    }

    fn buffer_frames(&self) -> usize {
        self.spec.buffer_frames
    }

    fn is_running(&self) -> bool {
        self.is_playing.load(Ordering::Relaxed)
    }

    fn release(&mut self) -> Result<()> {
        self.is_playing.store(false, Ordering::Relaxed);
        if let Some(cmd_tx) = self.cmd_tx.take() {
            let _ = cmd_tx.send(StreamCmd::Close);
        }
        if let Some(stream_thread) = self.stream_thread.take() {
            stream_thread
                .join()
                .map_err(|_| EngineError::ThreadError("Output thread panicked".to_string()))?;
        }
        self.slot.clear();
        Ok(())
    }
}

impl Drop for CpalSink {
    fn drop(&mut self) {
        let _ = self.release();
    }
}

/// Opens the host's default output device
pub struct CpalSinkFactory;

impl SinkFactory for CpalSinkFactory {
    fn name(&self) -> &'static str {
        "cpal"
    }

    fn create_sink(&self, spec: AudioSpec) -> Result<Box<dyn OutputSink>> {
        Ok(Box::new(CpalSink::new(spec)?))
    }
}
