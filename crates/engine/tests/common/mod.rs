// Shared fixtures for engine tests
#![allow(dead_code)]

use parking_lot::{Condvar, Mutex};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use trackplay::{EngineError, PlaybackListener, PlayerEvent};
use trackplay_decode_symphonia::test_support::{write_ima_adpcm_wav, write_sine_wav};

pub const SAMPLE_RATE: u32 = 8000;

/// A mono track of `seconds` at [`SAMPLE_RATE`] inside `dir`
pub fn track(dir: &Path, seconds: f64) -> PathBuf {
    let path = dir.join(format!("tone-{}s.wav", seconds));
    write_sine_wav(&path, SAMPLE_RATE, 1, (seconds * SAMPLE_RATE as f64) as u32).unwrap();
    path
}

/// A mono IMA ADPCM track whose block `corrupt_block` cannot be decoded
pub fn corrupt_track(dir: &Path, blocks: u32, corrupt_block: u32) -> PathBuf {
    let path = dir.join("damaged.wav");
    write_ima_adpcm_wav(&path, SAMPLE_RATE, blocks, Some(corrupt_block)).unwrap();
    path
}

/// Records every event and lets tests wait for specific ones
#[derive(Default)]
pub struct RecordingListener {
    events: Mutex<Vec<PlayerEvent>>,
    changed: Condvar,
}

impl RecordingListener {
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&self, event: PlayerEvent) {
        self.events.lock().push(event);
        self.changed.notify_all();
    }

    pub fn events(&self) -> Vec<PlayerEvent> {
        self.events.lock().clone()
    }

    /// Events other than position updates
    pub fn transitions(&self) -> Vec<PlayerEvent> {
        self.events()
            .into_iter()
            .filter(|e| !e.is_position_update())
            .collect()
    }

    pub fn count(&self, pred: impl Fn(&PlayerEvent) -> bool) -> usize {
        self.events.lock().iter().filter(|e| pred(e)).count()
    }

    /// Wait until at least `n` recorded events match `pred`; returns the `n`th
    pub fn wait_for_nth(
        &self,
        n: usize,
        timeout: Duration,
        pred: impl Fn(&PlayerEvent) -> bool,
    ) -> Option<PlayerEvent> {
        let deadline = Instant::now() + timeout;
        let mut events = self.events.lock();
        loop {
            if let Some(event) = events.iter().filter(|e| pred(e)).nth(n - 1) {
                return Some(event.clone());
            }
            if self.changed.wait_until(&mut events, deadline).timed_out() {
                return events.iter().filter(|e| pred(e)).nth(n - 1).cloned();
            }
        }
    }

    pub fn wait_for(
        &self,
        timeout: Duration,
        pred: impl Fn(&PlayerEvent) -> bool,
    ) -> Option<PlayerEvent> {
        self.wait_for_nth(1, timeout, pred)
    }
}

impl PlaybackListener for RecordingListener {
    fn on_position_update(&self, position: Duration) {
        self.record(PlayerEvent::PositionUpdate(position));
    }

    fn on_finished(&self) {
        self.record(PlayerEvent::Finished);
    }

    fn on_stopped(&self, position: Duration) {
        self.record(PlayerEvent::Stopped(position));
    }

    fn on_paused(&self, position: Duration) {
        self.record(PlayerEvent::Paused(position));
    }

    fn on_started_playing(&self, position: Duration) {
        self.record(PlayerEvent::StartedPlaying(position));
    }

    fn on_failed(&self, error: &EngineError) {
        self.record(PlayerEvent::Failed(error.clone()));
    }
}

pub fn is_started(e: &PlayerEvent) -> bool {
    matches!(e, PlayerEvent::StartedPlaying(_))
}

pub fn is_paused(e: &PlayerEvent) -> bool {
    matches!(e, PlayerEvent::Paused(_))
}

pub fn is_stopped(e: &PlayerEvent) -> bool {
    matches!(e, PlayerEvent::Stopped(_))
}

pub fn is_finished(e: &PlayerEvent) -> bool {
    matches!(e, PlayerEvent::Finished)
}

pub fn is_failed(e: &PlayerEvent) -> bool {
    matches!(e, PlayerEvent::Failed(_))
}

/// Poll `condition` every few milliseconds until it holds or `timeout` passes
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    condition()
}
