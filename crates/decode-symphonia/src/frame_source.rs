// Sequential frame decoding into PCM chunks, with seek-by-time

use crate::demux::Demuxer;
use std::path::Path;
use std::time::Duration;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{Decoder, DecoderOptions};
use symphonia::core::errors::Error as SymphoniaError;
use trackplay_core::{EngineError, PcmChunk, Result, Track};

/// Decodes a track into interleaved f32 chunks
///
/// The cursor is the source frame index of the next chunk; it only moves
/// forward except on [`FrameSource::seek`].
pub struct FrameSource {
    demuxer: Demuxer,
    decoder: Box<dyn Decoder>,
    track: Track,
    cursor: u64,
    sample_buf: Option<SampleBuffer<f32>>,
}

impl FrameSource {
    /// Open a file, establishing codec parameters and duration
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let demuxer = Demuxer::open(path)?;
        let track = demuxer.track_info(path)?;

        let decoder = symphonia::default::get_codecs()
            .make(demuxer.codec_params()?, &DecoderOptions::default())
            .map_err(|e| {
                EngineError::UnsupportedFormat(format!("Failed to create decoder: {}", e))
            })?;

        log::info!(
            "Opened {}: {}Hz, {} channels, {} frames ({:?})",
            path.display(),
            track.sample_rate,
            track.channels,
            track.total_frames,
            track.duration()
        );

        Ok(Self {
            demuxer,
            decoder,
            track,
            cursor: 0,
            sample_buf: None,
        })
    }

    pub fn track(&self) -> &Track {
        &self.track
    }

    /// Source frame index of the next chunk
    pub fn position(&self) -> u64 {
        self.cursor
    }

    /// Decode the next chunk; `Ok(None)` is the natural end of the stream
    pub fn next_chunk(&mut self) -> Result<Option<PcmChunk>> {
        loop {
            let Some(packet) = self.demuxer.next_packet()? else {
                return Ok(None);
            };

            let decoded = match self.decoder.decode(&packet) {
                Ok(decoded) => decoded,
                Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    return Ok(None);
                }
                Err(e) => {
                    return Err(EngineError::DecodeCorruption(format!(
                        "Failed to decode frame at {}: {}",
                        self.cursor, e
                    )));
                }
            };

            if decoded.frames() == 0 {
                continue;
            }

            let spec = *decoded.spec();
            let channels = spec.channels.count() as u16;
            if channels != self.track.channels {
                return Err(EngineError::DecodeCorruption(format!(
                    "Channel count changed from {} to {}",
                    self.track.channels, channels
                )));
            }

            // Scratch buffer is reused across packets and only grows
            let needed = decoded.capacity() * channels as usize;
            if self.sample_buf.as_ref().map_or(true, |buf| buf.capacity() < needed) {
                self.sample_buf = Some(SampleBuffer::new(decoded.capacity() as u64, spec));
            }
            let Some(sample_buf) = self.sample_buf.as_mut() else {
                continue;
            };
            sample_buf.copy_interleaved_ref(decoded);

            let chunk = PcmChunk::new(sample_buf.samples().to_vec(), channels, self.cursor);
            self.cursor = chunk.end_frame();
            return Ok(Some(chunk));
        }
    }

    /// Reposition at the nearest decodable frame at or before `target`
    ///
    /// Returns the time the next chunk actually starts at.
    pub fn seek(&mut self, target: Duration) -> Result<Duration> {
        let mut target_frame = self.track.frame_at(target);
        if self.track.total_frames > 0 && target_frame >= self.track.total_frames {
            target_frame = self.track.total_frames - 1;
        }

        let ts = self.demuxer.frames_to_ts(target_frame, self.track.sample_rate);
        let actual_ts = self.demuxer.seek(ts)?;
        let actual_frame = self.demuxer.ts_to_frames(actual_ts, self.track.sample_rate);

        // Drop any state carried over from frames before the seek
        self.decoder.reset();
        self.cursor = actual_frame;

        let actual = self.track.time_at(actual_frame);
        log::debug!("Seek to {:?} landed at {:?} (frame {})", target, actual, actual_frame);
        Ok(actual)
    }
}
