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

//! Fixed-point pitch factors.
//!
//! Pitch is authored as a 14-bit factor centered on [`NEUTRAL`]. The factor is first mapped to
//! an offset in 1/1024 semitones using the same three linear segments as the hardware pitch
//! table, then to a playback-rate ratio.

/// The factor that leaves pitch unchanged.
pub const NEUTRAL: u16 = 0x2000;

/// Factors are masked to this many bits.
pub const FACTOR_MASK: u16 = 0x3FFF;

/// Fixed-point units per semitone.
pub const UNITS_PER_SEMITONE: i32 = 1024;

const OCTAVE_UNITS: i32 = 12 * UNITS_PER_SEMITONE;
const LOW_KNEE: i32 = 0x1000;

/// Maps a 14-bit factor to an offset in 1/1024 semitones.
pub fn semitone_units(factor: u16) -> i32 {
    let value = (factor & FACTOR_MASK) as i32;
    let neutral = NEUTRAL as i32;
    if value >= neutral {
        ((value - neutral) * OCTAVE_UNITS) >> 13
    } else if value >= LOW_KNEE {
        -(((neutral - value) * OCTAVE_UNITS) >> 12)
    } else {
        -OCTAVE_UNITS - ((LOW_KNEE - value) * 2 * OCTAVE_UNITS) / LOW_KNEE
    }
}

/// Maps a 14-bit factor to a semitone offset.
pub fn semitones(factor: u16) -> f32 {
    semitone_units(factor) as f32 / UNITS_PER_SEMITONE as f32
}

/// Maps a 14-bit factor to a playback-rate ratio. Always positive.
pub fn ratio(factor: u16) -> f32 {
    let semitones = semitones(factor);
    if semitones >= 0.0 {
        2f32.powf(semitones / 12.0)
    } else {
        0.5f32.powf(semitones.abs() / 12.0)
    }
}

/// Maps an unbounded factor product to a ratio, saturating at the 14-bit range.
pub fn ratio_saturating(factor: f32) -> f32 {
    let clamped = factor.round().clamp(0.0, FACTOR_MASK as f32) as u16;
    ratio(clamped)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_neutral_is_unity() {
        assert_eq!(semitone_units(NEUTRAL), 0);
        assert_eq!(ratio(NEUTRAL), 1.0);
    }

    #[test]
    fn test_segment_boundaries() {
        assert_eq!(semitone_units(0x3FFF), 12286);
        assert_eq!(semitone_units(0x2001), 1);
        assert_eq!(semitone_units(0x1FFF), -3);
        assert_eq!(semitone_units(0x1000), -12288);
        assert_eq!(semitone_units(0x0FFF), -12294);
        assert_eq!(semitone_units(0x0800), -24576);
        assert_eq!(semitone_units(0), -36864);
    }

    #[test]
    fn test_boundary_ratios() {
        assert!((ratio(0x1000) - 0.5).abs() < 1e-6);
        assert!((ratio(0) - 0.125).abs() < 1e-6);
        assert!((ratio(0x3000) - 2f32.powf(0.5)).abs() < 1e-6);
    }

    #[test]
    fn test_ratio_direction_and_sign() {
        for factor in (0..=FACTOR_MASK).step_by(7) {
            let r = ratio(factor);
            assert!(r > 0.0);
            if factor > NEUTRAL {
                assert!(r > 1.0, "factor {factor:#x} gave {r}");
            } else if factor < NEUTRAL {
                assert!(r < 1.0, "factor {factor:#x} gave {r}");
            }
        }
        assert!(ratio(0x2400) > 1.0);
        assert!(ratio(0x1C00) < 1.0);
    }

    #[test]
    fn test_strictly_monotonic() {
        let mut last = semitone_units(0);
        for factor in 1..=FACTOR_MASK {
            let units = semitone_units(factor);
            assert!(units > last, "factor {factor:#x}");
            last = units;
        }
    }

    #[test]
    fn test_input_is_masked_and_saturated() {
        assert_eq!(semitone_units(NEUTRAL | 0x4000), 0);
        assert_eq!(ratio_saturating(1.0e9), ratio(FACTOR_MASK));
        assert_eq!(ratio_saturating(-5.0), ratio(0));
        assert_eq!(ratio_saturating(8192.2), 1.0);
    }
}
