// Playback clock: position derived from frames rendered since the last anchor

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::thread;
use std::time::{Duration, Instant};
use trackplay_core::frames_to_duration;

/// Consistent view of the clock
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PositionSnapshot {
    /// Source frame index of the next frame to be rendered
    pub frame_index: u64,
    /// When `frame_index` was committed
    pub committed_at: Instant,
}

/// Single source of truth for the playback position
///
/// Writers (the render context via [`advance`](Self::advance) and the
/// control context via [`anchor`](Self::anchor)) publish through a sequence
/// counter; readers never lock and retry on a torn read.
pub struct PositionClock {
    seq: AtomicU64,
    frame_index: AtomicU64,
    committed_nanos: AtomicU64,
    origin: Instant,
    rendering: AtomicBool,
    writer: Mutex<()>,
    sample_rate: AtomicU32,
    total_frames: AtomicU64,
}

impl PositionClock {
    pub fn new() -> Self {
        Self {
            seq: AtomicU64::new(0),
            frame_index: AtomicU64::new(0),
            committed_nanos: AtomicU64::new(0),
            origin: Instant::now(),
            rendering: AtomicBool::new(false),
            writer: Mutex::new(()),
            sample_rate: AtomicU32::new(0),
            total_frames: AtomicU64::new(0),
        }
    }

    /// Set the time base from an opened track
    pub fn configure(&self, sample_rate: u32, total_frames: u64) {
        self.sample_rate.store(sample_rate, Ordering::Release);
        self.total_frames.store(total_frames, Ordering::Release);
    }

    pub fn duration(&self) -> Duration {
        frames_to_duration(
            self.total_frames.load(Ordering::Acquire),
            self.sample_rate.load(Ordering::Acquire),
        )
    }

    /// Mark a render in flight; must be paired with [`advance`](Self::advance)
    pub fn begin_render(&self) {
        self.rendering.store(true, Ordering::SeqCst);
    }

    /// Commit `frames` rendered frames and end the in-flight render
    pub fn advance(&self, frames: u64) {
        if frames > 0 {
            let _writer = self.writer.lock();
            let current = self.frame_index.load(Ordering::Acquire);
            self.commit(current + frames);
        }
        self.rendering.store(false, Ordering::SeqCst);
    }

    /// Reset the origin to `frame_index` (seek and stop)
    pub fn anchor(&self, frame_index: u64) {
        let _writer = self.writer.lock();
        self.commit(frame_index);
    }

    /// Publish a new value; caller holds `writer`
    fn commit(&self, frame_index: u64) {
        let nanos = self.origin.elapsed().as_nanos() as u64;

        self.seq.fetch_add(1, Ordering::AcqRel);
        self.frame_index.store(frame_index, Ordering::Release);
        self.committed_nanos.store(nanos, Ordering::Release);
        self.seq.fetch_add(1, Ordering::AcqRel);
    }

    /// Last committed value, without blocking
    pub fn snapshot(&self) -> PositionSnapshot {
        loop {
            let before = self.seq.load(Ordering::Acquire);
            if before % 2 == 1 {
                std::hint::spin_loop();
                continue;
            }

            let frame_index = self.frame_index.load(Ordering::Acquire);
            let nanos = self.committed_nanos.load(Ordering::Acquire);

            if self.seq.load(Ordering::Acquire) == before {
                return PositionSnapshot {
                    frame_index,
                    committed_at: self.origin + Duration::from_nanos(nanos),
                };
            }
        }
    }

    pub fn is_rendering(&self) -> bool {
        self.rendering.load(Ordering::SeqCst)
    }

    /// Wait until no render is in flight; returns false on timeout
    pub fn wait_render_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut spins = 0u32;

        while self.is_rendering() {
            if Instant::now() >= deadline {
                return false;
            }
            if spins < 64 {
                spins += 1;
                std::hint::spin_loop();
            } else {
                thread::yield_now();
            }
        }
        true
    }

    /// Current playback position
    ///
    /// With `sync`, waits (at most `timeout`) for an in-flight render to
    /// commit first. Without it, returns the last committed value.
    pub fn current_position(&self, sync: bool, timeout: Duration) -> Duration {
        if sync && !self.wait_render_idle(timeout) {
            log::debug!("Synchronized position read timed out after {:?}", timeout);
        }
        self.position_of(self.snapshot().frame_index)
    }

    fn position_of(&self, frame_index: u64) -> Duration {
        let total = self.total_frames.load(Ordering::Acquire);
        let frame_index = if total > 0 { frame_index.min(total) } else { frame_index };
        frames_to_duration(frame_index, self.sample_rate.load(Ordering::Acquire))
    }
}

impl Default for PositionClock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn clock() -> PositionClock {
        let clock = PositionClock::new();
        clock.configure(8000, 80_000);
        clock
    }

    #[test]
    fn test_advance_and_anchor() {
        let clock = clock();
        assert_eq!(clock.duration(), Duration::from_secs(10));

        clock.begin_render();
        clock.advance(4000);
        assert_eq!(clock.current_position(false, Duration::ZERO), Duration::from_millis(500));

        clock.anchor(16_000);
        assert_eq!(clock.current_position(true, Duration::from_millis(10)), Duration::from_secs(2));
        assert_eq!(clock.snapshot().frame_index, 16_000);
    }

    #[test]
    fn test_commit_time_tracks_last_render() {
        let clock = clock();
        let before = clock.snapshot().committed_at;

        thread::sleep(Duration::from_millis(20));
        clock.begin_render();
        clock.advance(0);
        // An empty render commits nothing
        assert_eq!(clock.snapshot().committed_at, before);

        clock.begin_render();
        clock.advance(80);
        let after = clock.snapshot().committed_at;
        assert!(after >= before + Duration::from_millis(20));
        assert!(after.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_position_is_clamped_to_duration() {
        let clock = clock();
        clock.anchor(79_000);
        clock.begin_render();
        clock.advance(5000);
        assert_eq!(clock.current_position(false, Duration::ZERO), Duration::from_secs(10));
    }

    #[test]
    fn test_sync_read_waits_for_render() {
        let clock = Arc::new(clock());
        clock.begin_render();

        let render_clock = clock.clone();
        let render = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            render_clock.advance(800);
        });

        // The unsynchronized read sees the stale value immediately
        assert_eq!(clock.current_position(false, Duration::ZERO), Duration::ZERO);
        let synced = clock.current_position(true, Duration::from_secs(1));
        assert_eq!(synced, Duration::from_millis(100));
        render.join().unwrap();
    }

    #[test]
    fn test_sync_read_is_bounded() {
        let clock = clock();
        clock.begin_render();

        let start = Instant::now();
        clock.current_position(true, Duration::from_millis(10));
        assert!(start.elapsed() < Duration::from_millis(500));
        assert!(!clock.wait_render_idle(Duration::ZERO));
    }

    #[test]
    fn test_anchor_is_not_lost_to_concurrent_advance() {
        let clock = Arc::new(clock());
        let render_clock = clock.clone();

        let render = thread::spawn(move || {
            for _ in 0..5000 {
                render_clock.begin_render();
                render_clock.advance(1);
            }
        });
        // Each anchor lands between two whole advances, never inside one
        for i in 0..200u64 {
            clock.anchor(1_000_000 * (i + 1));
            let frame_index = clock.snapshot().frame_index;
            assert!(frame_index >= 1_000_000 * (i + 1));
            assert!(frame_index < 1_000_000 * (i + 2));
        }
        render.join().unwrap();

        clock.anchor(40_000);
        assert_eq!(clock.snapshot().frame_index, 40_000);
    }

    #[test]
    fn test_concurrent_reads_are_monotonic() {
        let clock = Arc::new(clock());
        let writer_clock = clock.clone();

        let writer = thread::spawn(move || {
            for _ in 0..2000 {
                writer_clock.begin_render();
                writer_clock.advance(10);
            }
        });

        let mut last = Duration::ZERO;
        while !writer.is_finished() {
            let position = clock.current_position(true, Duration::from_millis(5));
            assert!(position >= last);
            last = position;
        }
        writer.join().unwrap();
        assert_eq!(clock.snapshot().frame_index, 20_000);
    }
}
