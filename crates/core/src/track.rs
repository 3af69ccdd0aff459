// Track description, decoded PCM chunks and frame/time conversions

use std::path::PathBuf;
use std::time::Duration;

/// An opened audio track
///
/// Immutable once the source has been opened.
#[derive(Debug, Clone, PartialEq)]
pub struct Track {
    pub path: PathBuf,
    pub sample_rate: u32,
    pub channels: u16,
    /// Total length in audio frames (0 if the container does not say)
    pub total_frames: u64,
}

impl Track {
    pub fn duration(&self) -> Duration {
        frames_to_duration(self.total_frames, self.sample_rate)
    }

    /// Limit a requested start position to the track length, if known
    pub fn clamp_position(&self, position: Duration) -> Duration {
        if self.total_frames > 0 {
            position.min(self.duration())
        } else {
            position
        }
    }

    /// Convert a time into a frame index, clamped to the track length
    pub fn frame_at(&self, position: Duration) -> u64 {
        let frame = duration_to_frames(position, self.sample_rate);
        if self.total_frames > 0 {
            frame.min(self.total_frames)
        } else {
            frame
        }
    }

    pub fn time_at(&self, frame: u64) -> Duration {
        frames_to_duration(frame, self.sample_rate)
    }
}

/// One decoded unit of interleaved f32 PCM
#[derive(Debug, Clone, PartialEq)]
pub struct PcmChunk {
    /// Interleaved samples, `frames * channels` long
    pub samples: Vec<f32>,
    pub channels: u16,
    /// Source frame index of the first frame in this chunk
    pub start_frame: u64,
}

impl PcmChunk {
    pub fn new(samples: Vec<f32>, channels: u16, start_frame: u64) -> Self {
        Self {
            samples,
            channels: channels.max(1),
            start_frame,
        }
    }

    /// Number of audio frames (sample sets across all channels)
    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels as usize
    }

    pub fn end_frame(&self) -> u64 {
        self.start_frame + self.frames() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

pub fn frames_to_duration(frames: u64, sample_rate: u32) -> Duration {
    if sample_rate == 0 {
        return Duration::ZERO;
    }
    let rate = sample_rate as u64;
    let secs = frames / rate;
    let nanos = (frames % rate) * 1_000_000_000 / rate;
    Duration::new(secs, nanos as u32)
}

/// Frame index at `position`, rounded down so the result never overshoots
pub fn duration_to_frames(position: Duration, sample_rate: u32) -> u64 {
    (position.as_nanos() * sample_rate as u128 / 1_000_000_000) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn track(total_frames: u64) -> Track {
        Track {
            path: PathBuf::from("a.flac"),
            sample_rate: 48000,
            channels: 2,
            total_frames,
        }
    }

    #[test]
    fn test_duration_from_frames() {
        assert_eq!(track(480_000).duration(), Duration::from_secs(10));
        assert_eq!(frames_to_duration(24_000, 48000), Duration::from_millis(500));
        assert_eq!(frames_to_duration(10, 0), Duration::ZERO);
    }

    #[test]
    fn test_frame_at_rounds_down_and_clamps() {
        let t = track(480_000);
        assert_eq!(t.frame_at(Duration::from_millis(9900)), 475_200);
        // 1 frame at 48kHz is ~20.8us; 20us must still map to frame 0
        assert_eq!(t.frame_at(Duration::from_micros(20)), 0);
        assert_eq!(t.frame_at(Duration::from_secs(60)), 480_000);
    }

    #[test]
    fn test_clamp_position_only_with_known_length() {
        assert_eq!(track(480_000).clamp_position(Duration::from_secs(60)), Duration::from_secs(10));
        assert_eq!(track(480_000).clamp_position(Duration::from_secs(3)), Duration::from_secs(3));
        // Length unknown: the source decides where the stream ends
        assert_eq!(track(0).clamp_position(Duration::from_secs(60)), Duration::from_secs(60));
    }

    #[test]
    fn test_conversions_never_overshoot() {
        for frames in [0u64, 1, 44_099, 44_100, 1_234_567] {
            let back = duration_to_frames(frames_to_duration(frames, 44100), 44100);
            assert!(back <= frames);
            assert!(frames - back <= 1);
        }
    }

    #[test]
    fn test_chunk_frames() {
        let chunk = PcmChunk::new(vec![0.0; 2048], 2, 4096);
        assert_eq!(chunk.frames(), 1024);
        assert_eq!(chunk.end_frame(), 5120);
        assert!(!chunk.is_empty());
    }
}
