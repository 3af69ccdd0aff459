// Demuxing audio containers using Symphonia

use std::fs::File;
use std::path::Path;
use symphonia::core::codecs::{CodecParameters, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader, Packet, SeekMode, SeekTo};
use symphonia::core::io::{MediaSource, MediaSourceStream};
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use trackplay_core::{EngineError, Result, Track};

/// Audio demuxer wrapper
pub struct Demuxer {
    format_reader: Box<dyn FormatReader>,
    track_id: u32,
}

impl Demuxer {
    /// Open a file and probe its container
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| {
            EngineError::UnreadableFile(format!("Failed to open {}: {}", path.display(), e))
        })?;

        Self::from_media_source(Box::new(file), Self::create_hint_from_path(path))
    }

    /// Create demuxer from a media source
    pub fn from_media_source(media_source: Box<dyn MediaSource>, hint: Hint) -> Result<Self> {
        let media_source_stream = MediaSourceStream::new(media_source, Default::default());

        // Probe the media source
        let probe_result = symphonia::default::get_probe()
            .format(
                &hint,
                media_source_stream,
                &FormatOptions::default(),
                &MetadataOptions::default(),
            )
            .map_err(map_probe_error)?;

        let format_reader = probe_result.format;

        // Prefer the default track, fall back to the first one carrying a codec
        let track = format_reader
            .default_track()
            .filter(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .or_else(|| {
                format_reader
                    .tracks()
                    .iter()
                    .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            })
            .ok_or_else(|| EngineError::UnsupportedFormat("No audio track found".to_string()))?;

        let track_id = track.id;

        Ok(Self {
            format_reader,
            track_id,
        })
    }

    /// Create a hint from file extension
    pub fn create_hint_from_path(path: &Path) -> Hint {
        let mut hint = Hint::new();
        if let Some(extension) = path.extension().and_then(|e| e.to_str()) {
            hint.with_extension(extension);
        }
        hint
    }

    /// Next packet of our track; `None` at end of stream
    pub fn next_packet(&mut self) -> Result<Option<Packet>> {
        loop {
            let packet = match self.format_reader.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    return Ok(None);
                }
                Err(SymphoniaError::IoError(e)) => {
                    return Err(EngineError::DecodeCorruption(format!(
                        "I/O error mid-stream: {}",
                        e
                    )));
                }
                Err(SymphoniaError::ResetRequired) => {
                    return Err(EngineError::DecodeCorruption(
                        "Stream parameters changed mid-stream".to_string(),
                    ));
                }
                Err(e) => {
                    return Err(EngineError::DecodeCorruption(format!(
                        "Failed to read packet: {}",
                        e
                    )));
                }
            };

            // Only return packets for our track
            if packet.track_id() == self.track_id {
                return Ok(Some(packet));
            }
        }
    }

    /// Seek so the next packet starts at or before `ts`; returns the actual timestamp
    pub fn seek(&mut self, ts: u64) -> Result<u64> {
        let seeked = self
            .format_reader
            .seek(
                SeekMode::Accurate,
                SeekTo::TimeStamp {
                    ts,
                    track_id: self.track_id,
                },
            )
            .map_err(|e| EngineError::DecodeCorruption(format!("Seek failed: {}", e)))?;

        log::debug!(
            "Demuxer seek: required ts {}, actual ts {}",
            seeked.required_ts,
            seeked.actual_ts
        );
        Ok(seeked.actual_ts)
    }

    pub fn codec_params(&self) -> Result<&CodecParameters> {
        self.format_reader
            .tracks()
            .iter()
            .find(|t| t.id == self.track_id)
            .map(|t| &t.codec_params)
            .ok_or_else(|| EngineError::UnsupportedFormat("Track not found".to_string()))
    }

    /// Describe the selected track
    pub fn track_info(&self, path: &Path) -> Result<Track> {
        let codec_params = self.codec_params()?;

        let sample_rate = codec_params.sample_rate.ok_or_else(|| {
            EngineError::UnsupportedFormat("Sample rate not specified".to_string())
        })?;
        let channels = codec_params
            .channels
            .map(|c| c.count() as u16)
            .filter(|&c| c > 0)
            .ok_or_else(|| EngineError::UnsupportedFormat("Channels not specified".to_string()))?;

        Ok(Track {
            path: path.to_path_buf(),
            sample_rate,
            channels,
            total_frames: codec_params.n_frames.unwrap_or(0),
        })
    }

    /// Convert a stream timestamp into a frame index
    pub fn ts_to_frames(&self, ts: u64, sample_rate: u32) -> u64 {
        match self.codec_params().ok().and_then(|p| p.time_base) {
            Some(tb) if tb.denom != 0 => {
                (ts as u128 * tb.numer as u128 * sample_rate as u128 / tb.denom as u128) as u64
            }
            _ => ts,
        }
    }

    /// Convert a frame index into a stream timestamp
    pub fn frames_to_ts(&self, frames: u64, sample_rate: u32) -> u64 {
        match self.codec_params().ok().and_then(|p| p.time_base) {
            Some(tb) if tb.numer != 0 && sample_rate != 0 => {
                (frames as u128 * tb.denom as u128 / (tb.numer as u128 * sample_rate as u128))
                    as u64
            }
            _ => frames,
        }
    }
}

/// Map a probe failure onto the engine's error kinds
///
/// Running out of bytes before any known header is found means the file
/// is not a format we understand, not that it is unreadable.
fn map_probe_error(err: SymphoniaError) -> EngineError {
    match err {
        SymphoniaError::IoError(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            EngineError::UnsupportedFormat("No recognizable container header".to_string())
        }
        SymphoniaError::IoError(e) => {
            EngineError::UnreadableFile(format!("Failed to read header: {}", e))
        }
        other => EngineError::UnsupportedFormat(format!("Failed to probe media: {}", other)),
    }
}
