// Capability probe: can this file be played without decoding it?

use crate::demux::Demuxer;
use std::path::Path;
use trackplay_core::{EngineError, Result, Track};

/// Header-only format inspection
pub struct FormatProbe;

impl FormatProbe {
    /// Whether the engine can play the file at `path`
    ///
    /// Fails closed: any read error or unrecognized container/codec yields
    /// `false`. Only the container header is read; no decoder is created.
    pub fn can_play(path: impl AsRef<Path>) -> bool {
        let path = path.as_ref();
        match Self::inspect(path) {
            Ok(_) => true,
            Err(e) => {
                log::debug!("Cannot play {}: {}", path.display(), e);
                false
            }
        }
    }

    /// Read the header and describe the track it declares
    pub fn inspect(path: impl AsRef<Path>) -> Result<Track> {
        let path = path.as_ref();
        let demuxer = Demuxer::open(path)?;
        let codec_params = demuxer.codec_params()?;

        // The codec must be registered, but we stop short of instantiating it
        if symphonia::default::get_codecs()
            .get_codec(codec_params.codec)
            .is_none()
        {
            return Err(EngineError::UnsupportedFormat(format!(
                "No decoder for codec {:?}",
                codec_params.codec
            )));
        }

        demuxer.track_info(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::write_sine_wav;
    use trackplay_core::ErrorKind;

    #[test]
    fn test_valid_wav_can_play() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tone.wav");
        write_sine_wav(&path, 44100, 2, 4410).unwrap();

        assert!(FormatProbe::can_play(&path));
        let track = FormatProbe::inspect(&path).unwrap();
        assert_eq!(track.sample_rate, 44100);
        assert_eq!(track.total_frames, 4410);
    }

    #[test]
    fn test_fails_closed() {
        let dir = tempfile::tempdir().unwrap();
        assert!(!FormatProbe::can_play(dir.path().join("missing.ogg")));

        let garbage = dir.path().join("garbage.mp3");
        std::fs::write(&garbage, vec![0x42u8; 2048]).unwrap();
        assert!(!FormatProbe::can_play(&garbage));

        let empty = dir.path().join("empty.flac");
        std::fs::write(&empty, b"").unwrap();
        assert!(!FormatProbe::can_play(&empty));
    }

    #[test]
    fn test_truncated_header_is_unsupported() {
        let dir = tempfile::tempdir().unwrap();
        let full = dir.path().join("full.wav");
        write_sine_wav(&full, 8000, 1, 800).unwrap();

        let bytes = std::fs::read(&full).unwrap();
        let truncated = dir.path().join("truncated.wav");
        std::fs::write(&truncated, &bytes[..10]).unwrap();

        let err = FormatProbe::inspect(&truncated).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnsupportedFormat);
    }
}
