// WAV fixtures shared by the decoder and engine tests

use std::io;
use std::path::Path;

/// Frames decoded from one 256-byte mono IMA ADPCM block
pub const IMA_FRAMES_PER_BLOCK: u32 = 505;

const IMA_BLOCK_ALIGN: u16 = 256;

/// Write a 16-bit PCM WAV containing a 440Hz sine
pub fn write_sine_wav(path: &Path, sample_rate: u32, channels: u16, frames: u32) -> io::Result<()> {
    let data_len = frames * channels as u32 * 2;
    let mut bytes = Vec::with_capacity(44 + data_len as usize);

    bytes.extend_from_slice(b"RIFF");
    bytes.extend_from_slice(&(36 + data_len).to_le_bytes());
    bytes.extend_from_slice(b"WAVE");
    bytes.extend_from_slice(b"fmt ");
    bytes.extend_from_slice(&16u32.to_le_bytes());
    bytes.extend_from_slice(&1u16.to_le_bytes());
    bytes.extend_from_slice(&channels.to_le_bytes());
    bytes.extend_from_slice(&sample_rate.to_le_bytes());
    bytes.extend_from_slice(&(sample_rate * channels as u32 * 2).to_le_bytes());
    bytes.extend_from_slice(&(channels * 2).to_le_bytes());
    bytes.extend_from_slice(&16u16.to_le_bytes());
    bytes.extend_from_slice(b"data");
    bytes.extend_from_slice(&data_len.to_le_bytes());

    for frame in 0..frames {
        let t = frame as f32 / sample_rate as f32;
        let sample = ((t * 440.0 * std::f32::consts::TAU).sin() * 0.25 * i16::MAX as f32) as i16;
        for _ in 0..channels {
            bytes.extend_from_slice(&sample.to_le_bytes());
        }
    }

    std::fs::write(path, bytes)
}

/// Write a silent mono IMA ADPCM WAV of `blocks` blocks
///
/// The header of `corrupt_block`, if given, carries an out-of-range step
/// index, so the file probes fine but decoding fails at that block.
pub fn write_ima_adpcm_wav(
    path: &Path,
    sample_rate: u32,
    blocks: u32,
    corrupt_block: Option<u32>,
) -> io::Result<()> {
    let data_len = blocks * IMA_BLOCK_ALIGN as u32;
    let mut bytes = Vec::with_capacity(60 + data_len as usize);

    bytes.extend_from_slice(b"RIFF");
    bytes.extend_from_slice(&(4 + 28 + 12 + 8 + data_len).to_le_bytes());
    bytes.extend_from_slice(b"WAVE");

    bytes.extend_from_slice(b"fmt ");
    bytes.extend_from_slice(&20u32.to_le_bytes());
    bytes.extend_from_slice(&0x11u16.to_le_bytes());
    bytes.extend_from_slice(&1u16.to_le_bytes());
    bytes.extend_from_slice(&sample_rate.to_le_bytes());
    let bytes_per_sec = sample_rate * IMA_BLOCK_ALIGN as u32 / IMA_FRAMES_PER_BLOCK;
    bytes.extend_from_slice(&bytes_per_sec.to_le_bytes());
    bytes.extend_from_slice(&IMA_BLOCK_ALIGN.to_le_bytes());
    bytes.extend_from_slice(&4u16.to_le_bytes());
    bytes.extend_from_slice(&2u16.to_le_bytes());
    bytes.extend_from_slice(&(IMA_FRAMES_PER_BLOCK as u16).to_le_bytes());

    bytes.extend_from_slice(b"fact");
    bytes.extend_from_slice(&4u32.to_le_bytes());
    bytes.extend_from_slice(&(blocks * IMA_FRAMES_PER_BLOCK).to_le_bytes());

    bytes.extend_from_slice(b"data");
    bytes.extend_from_slice(&data_len.to_le_bytes());
    for block in 0..blocks {
        let step_index: u8 = if corrupt_block == Some(block) { 200 } else { 0 };
        // Predictor, step index, reserved
        bytes.extend_from_slice(&0i16.to_le_bytes());
        bytes.push(step_index);
        bytes.push(0);
        bytes.resize(bytes.len() + IMA_BLOCK_ALIGN as usize - 4, 0);
    }

    std::fs::write(path, bytes)
}
