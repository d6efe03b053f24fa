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

//! IMA-ADPCM block decoder.
//!
//! A block starts with a 4-byte preamble (little-endian i16 predictor, i16 step index)
//! followed by packed nibbles, low nibble first.

use super::{ClampMode, DecodeError};

/// Size of the per-block preamble in bytes.
pub const PREAMBLE_SIZE: usize = 4;

/// Highest valid index into [`STEP_TABLE`].
pub const MAX_STEP_INDEX: i32 = 88;

/// Quantizer step sizes.
pub const STEP_TABLE: [i32; 89] = [
    7, 8, 9, 10, 11, 12, 13, 14, 16, 17, 19, 21, 23, 25, 28, 31, 34, 37, 41, 45, 50, 55, 60, 66,
    73, 80, 88, 97, 107, 118, 130, 143, 157, 173, 190, 209, 230, 253, 279, 307, 337, 371, 408,
    449, 494, 544, 598, 658, 724, 796, 876, 963, 1060, 1166, 1282, 1411, 1552, 1707, 1878, 2066,
    2272, 2499, 2749, 3024, 3327, 3660, 4026, 4428, 4871, 5358, 5894, 6484, 7132, 7845, 8630,
    9493, 10442, 11487, 12635, 13899, 15289, 16818, 18500, 20350, 22385, 24623, 27086, 29794,
    32767,
];

/// Step index adjustment per nibble.
pub const INDEX_TABLE: [i32; 16] = [-1, -1, -1, -1, 2, 4, 6, 8, -1, -1, -1, -1, 2, 4, 6, 8];

/// Running decoder state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdpcmState {
    /// Current predicted sample.
    pub predictor: i32,
    /// Current index into the step table.
    pub step_index: i32,
}

impl AdpcmState {
    /// Reads the initial state from a block preamble.
    pub fn from_preamble(preamble: [u8; PREAMBLE_SIZE]) -> AdpcmState {
        let predictor = i16::from_le_bytes([preamble[0], preamble[1]]) as i32;
        let step_index = i16::from_le_bytes([preamble[2], preamble[3]]) as i32;
        AdpcmState {
            predictor,
            step_index: step_index.clamp(0, MAX_STEP_INDEX),
        }
    }

    /// Decodes a single nibble and advances the state.
    #[inline]
    pub fn next_sample(&mut self, nibble: u8, mode: ClampMode) -> i16 {
        let nibble = nibble & 0x0F;
        let step = STEP_TABLE[self.step_index as usize];
        let mut diff = step >> 3;
        if nibble & 1 != 0 {
            diff += step >> 2;
        }
        if nibble & 2 != 0 {
            diff += step >> 1;
        }
        if nibble & 4 != 0 {
            diff += step;
        }

        match mode {
            ClampMode::RoundingError => {
                // Only the side being moved toward is clamped, and the negative rail stops at
                // -32767.
                if nibble & 8 != 0 {
                    self.predictor = (self.predictor - diff).max(-32767);
                } else {
                    self.predictor = (self.predictor + diff).min(32767);
                }
            }
            ClampMode::Standard => {
                if nibble & 8 != 0 {
                    self.predictor -= diff;
                } else {
                    self.predictor += diff;
                }
                self.predictor = self.predictor.clamp(-32768, 32767);
            }
        }

        self.step_index =
            (self.step_index + INDEX_TABLE[nibble as usize]).clamp(0, MAX_STEP_INDEX);
        self.predictor as i16
    }
}

/// Decodes `sample_count` samples from one ADPCM block into `output`.
pub fn decode_block(
    block: &[u8],
    sample_count: usize,
    mode: ClampMode,
    output: &mut Vec<i16>,
) -> Result<(), DecodeError> {
    let needed = PREAMBLE_SIZE + sample_count.div_ceil(2);
    if block.len() < needed {
        return Err(DecodeError::Truncated {
            needed,
            available: block.len(),
        });
    }

    let mut state = AdpcmState::from_preamble([block[0], block[1], block[2], block[3]]);
    output.reserve(sample_count);

    let nibbles = block[PREAMBLE_SIZE..]
        .iter()
        .flat_map(|byte| [byte & 0x0F, byte >> 4])
        .take(sample_count);
    for nibble in nibbles {
        output.push(state.next_sample(nibble, mode));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn preamble(predictor: i16, index: i16) -> Vec<u8> {
        let mut data = predictor.to_le_bytes().to_vec();
        data.extend_from_slice(&index.to_le_bytes());
        data
    }

    #[test]
    fn test_preamble_clamps_step_index() {
        let state = AdpcmState::from_preamble([0, 0, 200, 0]);
        assert_eq!(state.step_index, MAX_STEP_INDEX);
        let state = AdpcmState::from_preamble([0x10, 0x00, 0xFF, 0xFF]);
        assert_eq!(state.predictor, 16);
        assert_eq!(state.step_index, 0);
    }

    #[test]
    fn test_single_nibbles() {
        // step 7: diff = 0 + (7 >> 2) for bit 0
        let mut state = AdpcmState {
            predictor: 0,
            step_index: 0,
        };
        assert_eq!(state.next_sample(0x1, ClampMode::Standard), 1);
        assert_eq!(state.step_index, 0);

        // step 7: diff = 0 + 1 + 3 + 7 = 11, negative
        let mut state = AdpcmState {
            predictor: 0,
            step_index: 0,
        };
        assert_eq!(state.next_sample(0xF, ClampMode::Standard), -11);
        assert_eq!(state.step_index, 8);
    }

    #[test]
    fn test_low_nibble_first() {
        let mut data = preamble(0, 0);
        data.push(0x70);
        let mut out = Vec::new();
        decode_block(&data, 2, ClampMode::Standard, &mut out).unwrap();
        // First nibble is 0 (diff 0), second nibble 7 at step index 0 -> diff 11.
        assert_eq!(out, vec![0, 11]);
    }

    #[test]
    fn test_standard_mode_clamps_to_i16_range() {
        let mut state = AdpcmState {
            predictor: -32760,
            step_index: 88,
        };
        assert_eq!(state.next_sample(0xF, ClampMode::Standard), -32768);

        let mut state = AdpcmState {
            predictor: 32760,
            step_index: 88,
        };
        assert_eq!(state.next_sample(0x7, ClampMode::Standard), 32767);
    }

    #[test]
    fn test_rounding_error_mode_clamps_negative_rail() {
        let mut state = AdpcmState {
            predictor: -32760,
            step_index: 88,
        };
        assert_eq!(state.next_sample(0xF, ClampMode::RoundingError), -32767);

        let mut state = AdpcmState {
            predictor: 32760,
            step_index: 88,
        };
        assert_eq!(state.next_sample(0x7, ClampMode::RoundingError), 32767);
    }

    #[test]
    fn test_predictor_stays_in_range_under_stress() {
        for mode in [ClampMode::Standard, ClampMode::RoundingError] {
            let mut state = AdpcmState {
                predictor: 0,
                step_index: 0,
            };
            let floor = match mode {
                ClampMode::Standard => -32768,
                ClampMode::RoundingError => -32767,
            };
            for i in 0..10_000u32 {
                let nibble = if (i / 50) % 2 == 0 { 0x7 } else { 0xF };
                let sample = state.next_sample(nibble, mode) as i32;
                assert!(sample >= floor && sample <= 32767);
                assert!(state.step_index >= 0 && state.step_index <= MAX_STEP_INDEX);
            }
        }
    }

    #[test]
    fn test_truncated_block() {
        let data = preamble(0, 0);
        let mut out = Vec::new();
        let result = decode_block(&data, 3, ClampMode::Standard, &mut out);
        assert!(matches!(
            result,
            Err(DecodeError::Truncated {
                needed: 6,
                available: 4
            })
        ));
    }
}
