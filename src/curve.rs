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

//! Piecewise curves driving the volume and pitch of dynamic (DGN) sound layers.

use std::f32::consts::FRAC_PI_2;

use crate::pitch;

/// Layers quieter than this are not started.
pub const AUDIBILITY_FLOOR: f32 = 1.0 / 130.0;

/// Full-scale authored volume.
pub const MAX_VOLUME: f32 = 127.0;

const MAGNITUDE_MASK: u16 = 0x3FFF;

/// How the segment leading into a point is interpolated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interpolation {
    Linear,
    /// `v1 + (v2 - v1) * sin(pi/2 * ratio)`
    Sine,
}

/// One `(amount, value)` pair. The top two bits of `value` select the interpolation of the
/// incoming segment, the low 14 bits hold the magnitude.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CurvePoint {
    pub amount: u16,
    pub value: u16,
}

impl CurvePoint {
    pub fn new(amount: u16, value: u16) -> CurvePoint {
        CurvePoint { amount, value }
    }

    /// The 14-bit magnitude.
    pub fn magnitude(&self) -> f32 {
        (self.value & MAGNITUDE_MASK) as f32
    }

    pub fn interpolation(&self) -> Interpolation {
        match self.value >> 14 {
            1 => Interpolation::Sine,
            _ => Interpolation::Linear,
        }
    }
}

/// A table of points sorted by amount.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Curve {
    points: Vec<CurvePoint>,
}

impl Curve {
    /// Creates a curve, sorting the points by amount.
    pub fn new(mut points: Vec<CurvePoint>) -> Curve {
        points.sort_by_key(|point| point.amount);
        Curve { points }
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn points(&self) -> &[CurvePoint] {
        &self.points
    }

    /// Evaluates the curve at `amount`, clamping to the end values outside the table's domain.
    /// Returns `None` for an empty table.
    pub fn evaluate(&self, amount: f32) -> Option<f32> {
        let first = self.points.first()?;
        let last = self.points.last()?;
        if amount <= first.amount as f32 {
            return Some(first.magnitude());
        }
        if amount >= last.amount as f32 {
            return Some(last.magnitude());
        }

        // amount is strictly inside (first, last), so a bracketing pair exists.
        let index = self
            .points
            .windows(2)
            .position(|pair| amount < pair[1].amount as f32)?;
        let (from, to) = (self.points[index], self.points[index + 1]);

        let span = (to.amount - from.amount) as f32;
        let ratio = (amount - from.amount as f32) / span;
        let (v1, v2) = (from.magnitude(), to.magnitude());
        Some(match to.interpolation() {
            Interpolation::Linear => v1 + (v2 - v1) * ratio,
            Interpolation::Sine => v1 + (v2 - v1) * (FRAC_PI_2 * ratio).sin(),
        })
    }

    /// Evaluates the curve, falling back to `default` for an empty table.
    pub fn evaluate_or(&self, amount: f32, default: f32) -> f32 {
        self.evaluate(amount).unwrap_or(default)
    }
}

/// The four curves of one dynamic layer.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LayerCurves {
    /// Volume driven by the first control input.
    pub volume_a: Curve,
    /// Volume driven by the second control input.
    pub volume_b: Curve,
    /// Pitch factor driven by the first control input.
    pub pitch_a: Curve,
    /// Pitch factor driven by the second control input.
    pub pitch_b: Curve,
}

/// Volume and pitch ratio of a layer for a pair of control inputs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LayerMix {
    pub volume: f32,
    pub pitch: f32,
}

impl LayerMix {
    pub fn is_audible(&self) -> bool {
        self.volume > 0.0
    }
}

impl LayerCurves {
    /// Combines the curves for the given inputs. Volumes at or below [`AUDIBILITY_FLOOR`]
    /// are reported as zero.
    pub fn mix(&self, initial_volume: u8, amount_a: f32, amount_b: f32) -> LayerMix {
        let volume = self.volume_a.evaluate_or(amount_a, MAX_VOLUME) / MAX_VOLUME
            * self.volume_b.evaluate_or(amount_b, MAX_VOLUME)
            / MAX_VOLUME
            * initial_volume as f32
            / MAX_VOLUME;
        let volume = if volume <= AUDIBILITY_FLOOR {
            0.0
        } else {
            volume
        };

        let neutral = pitch::NEUTRAL as f32;
        let factor = self.pitch_a.evaluate_or(amount_a, neutral)
            * self.pitch_b.evaluate_or(amount_b, neutral)
            / neutral;

        LayerMix {
            volume,
            pitch: pitch::ratio_saturating(factor),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SINE: u16 = 1 << 14;

    fn curve(points: &[(u16, u16)]) -> Curve {
        Curve::new(
            points
                .iter()
                .map(|&(amount, value)| CurvePoint::new(amount, value))
                .collect(),
        )
    }

    #[test]
    fn test_point_fields() {
        let point = CurvePoint::new(10, SINE | 100);
        assert_eq!(point.magnitude(), 100.0);
        assert_eq!(point.interpolation(), Interpolation::Sine);
        assert_eq!(
            CurvePoint::new(0, 0xC000 | 5).interpolation(),
            Interpolation::Linear
        );
    }

    #[test]
    fn test_empty_curve() {
        let empty = Curve::default();
        assert!(empty.is_empty());
        assert_eq!(empty.evaluate(5.0), None);
        assert_eq!(empty.evaluate_or(5.0, 3.0), 3.0);
    }

    #[test]
    fn test_endpoints_are_exact() {
        let c = curve(&[(10, 20), (50, SINE | 90), (100, 40)]);
        assert_eq!(c.evaluate(10.0), Some(20.0));
        assert_eq!(c.evaluate(100.0), Some(40.0));
        assert_eq!(c.evaluate(0.0), Some(20.0));
        assert_eq!(c.evaluate(1000.0), Some(40.0));
    }

    #[test]
    fn test_points_are_sorted() {
        let c = curve(&[(100, 40), (10, 20)]);
        assert_eq!(c.points()[0].amount, 10);
        assert_eq!(c.evaluate(55.0), Some(30.0));
    }

    #[test]
    fn test_linear_segment() {
        let c = curve(&[(0, 0), (100, 100)]);
        assert_eq!(c.evaluate(25.0), Some(25.0));
        assert_eq!(c.evaluate(50.0), Some(50.0));
    }

    #[test]
    fn test_sine_segment() {
        let c = curve(&[(0, 0), (100, SINE | 100)]);
        let half = c.evaluate(50.0).unwrap();
        assert!((half - 100.0 * (FRAC_PI_2 * 0.5).sin()).abs() < 1e-4);
        // The ease-out shape runs ahead of a linear ramp.
        assert!(half > 50.0);
    }

    #[test]
    fn test_continuity_at_segment_boundaries() {
        for mode in [0, SINE] {
            let c = curve(&[(0, 10), (40, mode | 80), (80, mode | 30), (120, 60)]);
            for boundary in [40.0f32, 80.0] {
                let at = c.evaluate(boundary).unwrap();
                let before = c.evaluate(boundary - 0.001).unwrap();
                let after = c.evaluate(boundary + 0.001).unwrap();
                assert!((at - before).abs() < 0.01, "left of {boundary}");
                assert!((at - after).abs() < 0.01, "right of {boundary}");
            }
            assert_eq!(c.evaluate(40.0), Some(80.0));
            assert_eq!(c.evaluate(80.0), Some(30.0));
        }
    }

    #[test]
    fn test_mix_defaults_to_full_and_neutral() {
        let curves = LayerCurves::default();
        let mix = curves.mix(127, 0.0, 0.0);
        assert_eq!(mix.volume, 1.0);
        assert_eq!(mix.pitch, 1.0);
    }

    #[test]
    fn test_mix_volume_product() {
        let curves = LayerCurves {
            volume_a: curve(&[(0, 0), (100, 127)]),
            volume_b: curve(&[(0, 127)]),
            ..Default::default()
        };
        let mix = curves.mix(127, 50.0, 0.0);
        assert!((mix.volume - 63.5 / 127.0).abs() < 1e-6);

        let quiet = curves.mix(64, 50.0, 0.0);
        assert!((quiet.volume - 0.5 * 64.0 / 127.0).abs() < 1e-6);
    }

    #[test]
    fn test_mix_zeroes_inaudible_volume() {
        let curves = LayerCurves {
            volume_a: curve(&[(0, 0), (127, 127)]),
            ..Default::default()
        };
        assert_eq!(curves.mix(127, 0.0, 0.0).volume, 0.0);
        assert!(!curves.mix(127, 0.5, 0.0).is_audible());
        assert!(curves.mix(127, 2.0, 0.0).is_audible());
    }

    #[test]
    fn test_mix_pitch_combination() {
        let curves = LayerCurves {
            pitch_a: curve(&[(0, 0x3000)]),
            ..Default::default()
        };
        let mix = curves.mix(127, 0.0, 0.0);
        assert!((mix.pitch - pitch::ratio(0x3000)).abs() < 1e-6);

        let halved = LayerCurves {
            pitch_a: curve(&[(0, 0x3000)]),
            pitch_b: curve(&[(0, 0x1000)]),
            ..Default::default()
        };
        // 0x3000 * 0x1000 / 0x2000 = 0x1800
        let mix = halved.mix(127, 0.0, 0.0);
        assert!((mix.pitch - pitch::ratio(0x1800)).abs() < 1e-6);
    }
}
