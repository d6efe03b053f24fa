// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

//! Decoding of stored sample data into linear 16-bit PCM.
//!
//! This module provides:
//! - PCM8 sign conversion
//! - IMA-ADPCM decoding with an optional hardware-compatible clamp
//! - Conversion of stored loop points into PCM16 positions
//! - Block-wise stream decoding and channel interleaving

pub mod adpcm;

use std::path::Path;

use hound::{SampleFormat as WavSampleFormat, WavSpec, WavWriter};

use crate::audio::WaveFormat;

pub use adpcm::{AdpcmState, PREAMBLE_SIZE};

/// Error raised when a block cannot be decoded. Never fatal to the engine.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("sample contains no data")]
    Empty,

    #[error("format {0} is unsupported")]
    Unsupported(WaveFormat),

    #[error("block truncated: needed {needed} bytes, found {available}")]
    Truncated { needed: usize, available: usize },
}

/// How the ADPCM predictor is clamped.
///
/// Which exports need [`ClampMode::RoundingError`] is a property of the content and has to
/// be supplied by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClampMode {
    /// Clamp to [-32768, 32767] after every step.
    #[default]
    Standard,
    /// Clamp only the side being moved toward, to [-32767, 32767].
    RoundingError,
}

impl ClampMode {
    /// Returns the rounding-error mode when `rounding_error` is set.
    pub fn from_flag(rounding_error: bool) -> ClampMode {
        if rounding_error {
            ClampMode::RoundingError
        } else {
            ClampMode::Standard
        }
    }
}

/// A loop region expressed in PCM16 sample positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LoopRegion {
    pub start: usize,
    pub length: usize,
}

impl LoopRegion {
    /// Converts header loop fields into PCM16 positions.
    ///
    /// ADPCM headers store both values in 32-bit words and the start includes the preamble
    /// word. PCM8 values are already sample positions.
    pub fn from_header(format: WaveFormat, loop_start: u32, loop_length: u32) -> LoopRegion {
        match format {
            WaveFormat::Adpcm => LoopRegion {
                start: (loop_start as usize * 4).saturating_sub(4) * 2,
                length: loop_length as usize * 8,
            },
            _ => LoopRegion {
                start: loop_start as usize,
                length: loop_length as usize,
            },
        }
    }

    /// Total number of samples covered by the intro and the loop.
    pub fn sample_count(&self) -> usize {
        self.start + self.length
    }

    /// The position one past the loop's last sample.
    pub fn end(&self) -> usize {
        self.start + self.length
    }
}

/// Decodes `sample_count` samples of `format` data into PCM16.
///
/// Decoding is a pure function of its inputs.
pub fn decode(
    format: WaveFormat,
    data: &[u8],
    sample_count: usize,
    mode: ClampMode,
) -> Result<Vec<i16>, DecodeError> {
    if !matches!(format, WaveFormat::Adpcm | WaveFormat::Pcm8) {
        return Err(DecodeError::Unsupported(format));
    }
    if data.is_empty() || sample_count == 0 {
        return Err(DecodeError::Empty);
    }

    let mut output = Vec::with_capacity(sample_count);
    match format {
        WaveFormat::Adpcm => adpcm::decode_block(data, sample_count, mode, &mut output)?,
        _ => decode_pcm8(data, sample_count, &mut output)?,
    }
    Ok(output)
}

/// Flips the sign bit of each byte and widens it to 16 bits.
fn decode_pcm8(data: &[u8], sample_count: usize, output: &mut Vec<i16>) -> Result<(), DecodeError> {
    if data.len() < sample_count {
        return Err(DecodeError::Truncated {
            needed: sample_count,
            available: data.len(),
        });
    }
    output.extend(
        data[..sample_count]
            .iter()
            .map(|byte| ((byte ^ 0x80) as i8 as i16) << 8),
    );
    Ok(())
}

/// One stored block of a stream channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamBlock {
    /// Raw block bytes, including the ADPCM preamble when present.
    pub data: Vec<u8>,
    /// Number of samples the block decodes to.
    pub samples: usize,
}

/// Decodes every block of every channel and interleaves the channels.
///
/// ADPCM blocks each carry their own preamble and are decoded independently. Channels shorter
/// than the longest one are padded with silence.
pub fn decode_stream(
    format: WaveFormat,
    channels: &[Vec<StreamBlock>],
) -> Result<Vec<i16>, DecodeError> {
    if channels.is_empty() {
        return Err(DecodeError::Empty);
    }

    let decoded = channels
        .iter()
        .map(|blocks| {
            let mut pcm = Vec::new();
            for block in blocks {
                pcm.extend(decode(format, &block.data, block.samples, ClampMode::Standard)?);
            }
            Ok(pcm)
        })
        .collect::<Result<Vec<Vec<i16>>, DecodeError>>()?;

    Ok(interleave(&decoded))
}

/// Interleaves planar channel data into frames.
pub fn interleave(channels: &[Vec<i16>]) -> Vec<i16> {
    let frames = channels.iter().map(Vec::len).max().unwrap_or(0);
    let mut output = Vec::with_capacity(frames * channels.len());
    for frame in 0..frames {
        for channel in channels {
            output.push(channel.get(frame).copied().unwrap_or(0));
        }
    }
    output
}

/// Writes mono PCM16 to a WAV file.
pub fn export_wav(path: &Path, pcm: &[i16], sample_rate: u32) -> Result<(), hound::Error> {
    let spec = WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: WavSampleFormat::Int,
    };
    let mut writer = WavWriter::create(path, spec)?;
    for sample in pcm {
        writer.write_sample(*sample)?;
    }
    writer.finalize()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn adpcm_block(predictor: i16, index: i16, nibbles: &[u8]) -> Vec<u8> {
        let mut data = predictor.to_le_bytes().to_vec();
        data.extend_from_slice(&index.to_le_bytes());
        for pair in nibbles.chunks(2) {
            let low = pair[0] & 0x0F;
            let high = pair.get(1).copied().unwrap_or(0) & 0x0F;
            data.push(low | (high << 4));
        }
        data
    }

    #[test]
    fn test_pcm8_sign_flip() {
        let pcm = decode(
            WaveFormat::Pcm8,
            &[0x80, 0x00, 0xFF, 0x7F],
            4,
            ClampMode::Standard,
        )
        .unwrap();
        assert_eq!(pcm, vec![0, -32768, 127 << 8, -256]);
    }

    #[test]
    fn test_pcm8_length_is_one_to_one() {
        let data = vec![0x80u8; 37];
        let pcm = decode(WaveFormat::Pcm8, &data, 37, ClampMode::Standard).unwrap();
        assert_eq!(pcm.len(), 37);
    }

    #[test]
    fn test_decode_errors() {
        assert_eq!(
            decode(WaveFormat::Adpcm, &[], 4, ClampMode::Standard),
            Err(DecodeError::Empty)
        );
        assert_eq!(
            decode(WaveFormat::None, &[], 0, ClampMode::Standard),
            Err(DecodeError::Unsupported(WaveFormat::None))
        );
        assert_eq!(
            decode(WaveFormat::Pcm16, &[1, 2], 1, ClampMode::Standard),
            Err(DecodeError::Unsupported(WaveFormat::Pcm16))
        );
        assert!(matches!(
            decode(WaveFormat::Pcm8, &[1, 2], 3, ClampMode::Standard),
            Err(DecodeError::Truncated { .. })
        ));
    }

    #[test]
    fn test_decode_is_deterministic() {
        let block = adpcm_block(100, 10, &[1, 7, 9, 15, 3, 4, 12, 0, 8, 2]);
        let first = decode(WaveFormat::Adpcm, &block, 10, ClampMode::RoundingError).unwrap();
        let second = decode(WaveFormat::Adpcm, &block, 10, ClampMode::RoundingError).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.len(), 10);
    }

    #[test]
    fn test_modes_diverge_only_at_negative_rail() {
        let nibbles = [0xFu8; 40];
        let block = adpcm_block(0, 40, &nibbles);
        let standard = decode(WaveFormat::Adpcm, &block, 40, ClampMode::Standard).unwrap();
        let rounding = decode(WaveFormat::Adpcm, &block, 40, ClampMode::RoundingError).unwrap();
        assert_eq!(*standard.last().unwrap(), -32768);
        assert_eq!(*rounding.last().unwrap(), -32767);
        for (a, b) in standard.iter().zip(rounding.iter()) {
            if *a > -32767 {
                assert_eq!(a, b);
            }
        }
    }

    #[test]
    fn test_loop_region_conversion() {
        let region = LoopRegion::from_header(WaveFormat::Adpcm, 3, 10);
        assert_eq!(region.start, (3 * 4 - 4) * 2);
        assert_eq!(region.length, 80);
        assert_eq!(region.sample_count(), 96);

        let region = LoopRegion::from_header(WaveFormat::Pcm8, 3, 10);
        assert_eq!(region, LoopRegion { start: 3, length: 10 });

        let region = LoopRegion::from_header(WaveFormat::Adpcm, 0, 2);
        assert_eq!(region.start, 0);
        assert_eq!(region.length, 16);
    }

    #[test]
    fn test_stream_blocks_decode_independently() {
        let left = vec![
            StreamBlock {
                data: adpcm_block(1000, 0, &[0, 0]),
                samples: 2,
            },
            StreamBlock {
                data: adpcm_block(-1000, 0, &[0]),
                samples: 1,
            },
        ];
        let right = vec![StreamBlock {
            data: adpcm_block(5, 0, &[0, 0, 0]),
            samples: 3,
        }];
        let pcm = decode_stream(WaveFormat::Adpcm, &[left, right]).unwrap();
        assert_eq!(pcm, vec![1000, 5, 1000, 5, -1000, 5]);
    }

    #[test]
    fn test_interleave_pads_short_channels() {
        let pcm = interleave(&[vec![1, 2, 3], vec![4]]);
        assert_eq!(pcm, vec![1, 4, 2, 0, 3, 0]);
    }

    #[test]
    fn test_export_wav() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.wav");
        export_wav(&path, &[0, 100, -100, 32767], 22050).unwrap();

        let mut reader = hound::WavReader::open(&path).unwrap();
        assert_eq!(reader.spec().sample_rate, 22050);
        assert_eq!(reader.spec().bits_per_sample, 16);
        let samples: Vec<i16> = reader.samples::<i16>().map(|s| s.unwrap()).collect();
        assert_eq!(samples, vec![0, 100, -100, 32767]);
    }
}
