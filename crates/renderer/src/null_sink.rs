// Headless sink: pulls audio at real-time pace and discards it

use crate::{AudioSpec, ErrorCallback, OutputSink, RenderCallback, RenderSlot, SinkFactory};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use trackplay_core::{EngineError, Result};

enum PacerMsg {
    Pause,
    Resume,
    Stop,
}

/// Sink without a device
///
/// A pacer thread invokes the render callback every
/// `buffer_frames / sample_rate`, so playback takes as long as it would on
/// real hardware.
pub struct NullSink {
    spec: AudioSpec,
    slot: RenderSlot,
    is_playing: Arc<AtomicBool>,
    control_tx: Option<Sender<PacerMsg>>,
    pacer: Option<thread::JoinHandle<()>>,
}

impl NullSink {
    pub fn new(spec: AudioSpec) -> Self {
        Self {
            spec,
            slot: RenderSlot::default(),
            is_playing: Arc::new(AtomicBool::new(false)),
            control_tx: None,
            pacer: None,
        }
    }

    fn period(&self) -> Duration {
        let rate = self.spec.sample_rate.max(1) as u64;
        Duration::from_nanos(self.spec.buffer_frames.max(1) as u64 * 1_000_000_000 / rate)
    }

    fn send(&self, msg: PacerMsg) {
        if let Some(tx) = &self.control_tx {
            let _ = tx.send(msg);
        }
    }
}

fn run_pacer(
    slot: RenderSlot,
    is_playing: Arc<AtomicBool>,
    control_rx: Receiver<PacerMsg>,
    period: Duration,
    samples: usize,
) {
    log::debug!("Null sink pacer started ({:?} per callback)", period);

    let mut buffer = vec![0.0f32; samples];
    let mut paused = false;
    let mut next_tick = Instant::now();

    loop {
        let timeout = if paused {
            Duration::from_secs(3600)
        } else {
            next_tick.saturating_duration_since(Instant::now())
        };

        match control_rx.recv_timeout(timeout) {
            Ok(PacerMsg::Pause) => {
                paused = true;
                is_playing.store(false, Ordering::Release);
            }
            Ok(PacerMsg::Resume) => {
                paused = false;
                next_tick = Instant::now();
                is_playing.store(true, Ordering::Release);
            }
            Ok(PacerMsg::Stop) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {
                if paused {
                    continue;
                }
                slot.render(&mut buffer);
                next_tick += period;

                // Fell far behind (e.g. the machine was suspended): do not burst
                let now = Instant::now();
                if now > next_tick + period * 4 {
                    next_tick = now;
                }
            }
        }
    }

    is_playing.store(false, Ordering::Release);
    log::debug!("Null sink pacer exited");
}

impl OutputSink for NullSink {
    fn set_render_callback(&mut self, callback: RenderCallback) -> Result<()> {
        self.slot.set(callback);
        Ok(())
    }

    fn set_error_callback(&mut self, _callback: ErrorCallback) {
        // A null sink has no device that could fail
    }

    fn start(&mut self) -> Result<()> {
        if self.pacer.is_some() {
            self.send(PacerMsg::Resume);
            return Ok(());
        }

        let (control_tx, control_rx) = crossbeam_channel::unbounded();
        let slot = self.slot.clone();
        let is_playing = self.is_playing.clone();
        let period = self.period();
        let samples = self.spec.buffer_frames.max(1) * self.spec.channels.max(1) as usize;

        is_playing.store(true, Ordering::Release);
        let pacer = thread::Builder::new()
            .name("trackplay-null-sink".to_string())
            .spawn(move || run_pacer(slot, is_playing, control_rx, period, samples))
            .map_err(|e| EngineError::ThreadError(format!("Failed to spawn sink thread: {}", e)))?;

        self.control_tx = Some(control_tx);
        self.pacer = Some(pacer);
        Ok(())
    }

    fn pause(&mut self) -> Result<()> {
        self.is_playing.store(false, Ordering::Release);
        self.send(PacerMsg::Pause);
        Ok(())
    }

    fn resume(&mut self) -> Result<()> {
        if self.pacer.is_none() {
            return self.start();
        }
        self.is_playing.store(true, Ordering::Release);
        self.send(PacerMsg::Resume);
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        self.send(PacerMsg::Stop);
        self.control_tx = None;
        if let Some(pacer) = self.pacer.take() {
            pacer
                .join()
                .map_err(|_| EngineError::ThreadError("Sink thread panicked".to_string()))?;
        }
        self.is_playing.store(false, Ordering::Release);
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
        self.is_playing.load(Ordering::Acquire)
    }

    fn release(&mut self) -> Result<()> {
        self.stop()?;
        self.slot.clear();
        Ok(())
    }
}

impl Drop for NullSink {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

/// Creates [`NullSink`]s
pub struct NullSinkFactory;

impl SinkFactory for NullSinkFactory {
    fn name(&self) -> &'static str {
        "null"
    }

    fn create_sink(&self, spec: AudioSpec) -> Result<Box<dyn OutputSink>> {
        Ok(Box::new(NullSink::new(spec)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counting_sink(calls: &Arc<AtomicUsize>) -> NullSink {
        let mut sink = NullSink::new(AudioSpec {
            sample_rate: 8000,
            channels: 1,
            buffer_frames: 80,
        });
        let calls = calls.clone();
        sink.set_render_callback(Box::new(move |data: &mut [f32]| {
            calls.fetch_add(1, Ordering::SeqCst);
            data.len()
        }))
        .unwrap();
        sink
    }

    #[test]
    fn test_renders_at_real_time_pace() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut sink = counting_sink(&calls);

        sink.start().unwrap();
        thread::sleep(Duration::from_millis(200));
        sink.stop().unwrap();

        // 10ms per callback: about 20 calls in 200ms
        let n = calls.load(Ordering::SeqCst);
        assert!((10..=30).contains(&n), "unexpected callback count {}", n);
    }

    #[test]
    fn test_pause_stops_callbacks() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut sink = counting_sink(&calls);

        sink.start().unwrap();
        thread::sleep(Duration::from_millis(50));
        sink.pause().unwrap();
        assert!(!sink.is_running());
        thread::sleep(Duration::from_millis(30));

        let paused_at = calls.load(Ordering::SeqCst);
        thread::sleep(Duration::from_millis(100));
        assert_eq!(calls.load(Ordering::SeqCst), paused_at);

        sink.resume().unwrap();
        thread::sleep(Duration::from_millis(50));
        assert!(calls.load(Ordering::SeqCst) > paused_at);
        sink.release().unwrap();
    }
}
