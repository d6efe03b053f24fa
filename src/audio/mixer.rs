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
// Core voice mixing logic that's independent of any audio backend
use std::f32::consts::FRAC_PI_2;

use glam::Vec3;

use crate::audio::{BufferId, DeviceError, Listener, PcmData, VoiceId, VoiceParams, VoiceState};

const I16_SCALE: f32 = 1.0 / 32768.0;

/// A voice as seen by the mixer.
#[derive(Debug, Clone, Default)]
struct MixVoice {
    buffer: Option<BufferId>,
    params: VoiceParams,
    state: VoiceState,
    /// Fractional frame position in the bound buffer.
    cursor: f64,
}

/// Renders a fixed set of voices and buffers into interleaved f32 frames.
#[derive(Debug)]
pub struct Mixer {
    /// Number of output channels
    num_channels: u16,
    /// Output sample rate
    sample_rate: u32,
    master_volume: f32,
    buffers: Vec<Option<PcmData>>,
    voices: Vec<MixVoice>,
    listener: Listener,
}

/// Left and right gains for a voice.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StereoGain {
    pub left: f32,
    pub right: f32,
}

/// Linear distance attenuation, with the distance clamped to `[reference, max]`.
pub fn attenuation(distance: f32, reference: f32, max: f32, rolloff: f32) -> f32 {
    if max <= reference {
        return 1.0;
    }
    let distance = distance.clamp(reference, max);
    (1.0 - rolloff * (distance - reference) / (max - reference)).clamp(0.0, 1.0)
}

/// Equal-power pan for a position in [0, 1], 0 being hard left.
fn equal_power(position: f32) -> StereoGain {
    let angle = position.clamp(0.0, 1.0) * FRAC_PI_2;
    StereoGain {
        left: angle.cos(),
        right: angle.sin(),
    }
}

/// Computes the stereo gains of a voice heard by `listener`.
pub fn spatialize(params: &VoiceParams, listener: &Listener) -> StereoGain {
    if let Some(pan) = params.pan {
        let gain = equal_power(pan + 0.5);
        return StereoGain {
            left: gain.left * params.gain,
            right: gain.right * params.gain,
        };
    }

    let offset = if params.relative {
        params.position
    } else {
        params.position - listener.position
    };
    let distance = offset.length();
    let volume = params.gain
        * attenuation(
            distance,
            params.reference_distance,
            params.max_distance,
            params.rolloff,
        );

    let right: Vec3 = listener.facing.cross(listener.up).normalize_or_zero();
    let lateral = if distance > f32::EPSILON {
        (offset / distance).dot(right)
    } else {
        0.0
    };
    let gain = equal_power((lateral + 1.0) / 2.0);
    StereoGain {
        left: gain.left * volume,
        right: gain.right * volume,
    }
}

impl Mixer {
    /// Creates a new mixer.
    pub fn new(num_channels: u16, sample_rate: u32, master_volume: f32) -> Self {
        Self {
            num_channels,
            sample_rate,
            master_volume,
            buffers: Vec::new(),
            voices: Vec::new(),
            listener: Listener::default(),
        }
    }

    /// Gets the sample rate
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn create_buffer(&mut self) -> Result<BufferId, DeviceError> {
        self.buffers.push(None);
        Ok(BufferId(self.buffers.len() as u32 - 1))
    }

    pub fn create_voice(&mut self) -> Result<VoiceId, DeviceError> {
        self.voices.push(MixVoice::default());
        Ok(VoiceId(self.voices.len() as u32 - 1))
    }

    pub fn upload_pcm(&mut self, buffer: BufferId, pcm: PcmData) -> Result<(), DeviceError> {
        let slot = self
            .buffers
            .get_mut(buffer.0 as usize)
            .ok_or(DeviceError::Unknown {
                kind: "buffer",
                id: buffer.0,
            })?;
        *slot = Some(pcm);
        Ok(())
    }

    pub fn bind_buffer(&mut self, voice: VoiceId, buffer: Option<BufferId>) {
        if let Some(voice) = self.voices.get_mut(voice.0 as usize) {
            voice.buffer = buffer;
            voice.state = VoiceState::Initial;
            voice.cursor = 0.0;
        }
    }

    pub fn set_voice_params(&mut self, voice: VoiceId, params: &VoiceParams) {
        if let Some(voice) = self.voices.get_mut(voice.0 as usize) {
            voice.params = *params;
        }
    }

    pub fn play(&mut self, voice: VoiceId) {
        if let Some(voice) = self.voices.get_mut(voice.0 as usize) {
            if voice.buffer.is_some() {
                voice.state = VoiceState::Playing;
                voice.cursor = 0.0;
            }
        }
    }

    pub fn stop(&mut self, voice: VoiceId) {
        if let Some(voice) = self.voices.get_mut(voice.0 as usize) {
            if voice.state != VoiceState::Initial {
                voice.state = VoiceState::Stopped;
            }
        }
    }

    pub fn state(&self, voice: VoiceId) -> VoiceState {
        self.voices
            .get(voice.0 as usize)
            .map(|voice| voice.state)
            .unwrap_or_default()
    }

    pub fn set_listener(&mut self, listener: &Listener) {
        self.listener = *listener;
    }

    /// Mixes `output.len() / num_channels` frames into `output`, overwriting it.
    pub fn process_into_output(&mut self, output: &mut [f32]) {
        output.fill(0.0);
        let num_channels = self.num_channels.max(1) as usize;
        let out_rate = self.sample_rate.max(1) as f64;

        for voice in self.voices.iter_mut() {
            if voice.state != VoiceState::Playing {
                continue;
            }
            let Some(pcm) = voice
                .buffer
                .and_then(|buffer| self.buffers.get(buffer.0 as usize))
                .and_then(Option::as_ref)
            else {
                voice.state = VoiceState::Stopped;
                continue;
            };

            let gain = spatialize(&voice.params, &self.listener);
            let step = voice.params.pitch.max(0.0) as f64 * pcm.sample_rate as f64 / out_rate;
            let frames = pcm.frames();
            let (loop_start, loop_end) = match pcm.loop_region {
                Some(region) if region.length > 0 && region.start < frames => {
                    (region.start, region.end().min(frames))
                }
                _ => (0, frames),
            };

            for frame in output.chunks_exact_mut(num_channels) {
                if voice.cursor >= loop_end as f64 {
                    if voice.params.looping && loop_end > loop_start {
                        let span = (loop_end - loop_start) as f64;
                        voice.cursor = loop_start as f64 + (voice.cursor - loop_end as f64) % span;
                    } else if voice.cursor >= frames as f64 {
                        voice.state = VoiceState::Stopped;
                        break;
                    }
                }

                let (left, right) = read_frame(pcm, voice.cursor);
                if num_channels == 1 {
                    frame[0] += (left + right) * 0.5 * (gain.left + gain.right);
                } else {
                    frame[0] += left * gain.left;
                    frame[1] += right * gain.right;
                }
                voice.cursor += step;
            }
        }

        for sample in output.iter_mut() {
            *sample = (*sample * self.master_volume).clamp(-1.0, 1.0);
        }
    }

    /// Processes multiple frames of audio mixing
    pub fn process_frames(&mut self, num_frames: usize) -> Vec<f32> {
        let mut frames = vec![0.0; num_frames * self.num_channels.max(1) as usize];
        self.process_into_output(&mut frames);
        frames
    }
}

/// Reads a linearly interpolated frame, returning the first two channels. Mono buffers
/// return the same value for both.
fn read_frame(pcm: &PcmData, cursor: f64) -> (f32, f32) {
    let channels = pcm.channels.max(1) as usize;
    let frames = pcm.frames();
    if frames == 0 {
        return (0.0, 0.0);
    }
    let index = (cursor as usize).min(frames - 1);
    let next = (index + 1).min(frames - 1);
    let fraction = (cursor - index as f64) as f32;

    let sample = |frame: usize, channel: usize| -> f32 {
        pcm.samples[frame * channels + channel.min(channels - 1)] as f32 * I16_SCALE
    };
    let lerp = |channel: usize| -> f32 {
        let a = sample(index, channel);
        let b = sample(next, channel);
        a + (b - a) * fraction
    };
    (lerp(0), lerp(1))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::codec::LoopRegion;

    fn pcm(samples: Vec<i16>, channels: u16, loop_region: Option<LoopRegion>) -> PcmData {
        PcmData {
            samples: Arc::from(samples),
            channels,
            sample_rate: 4,
            loop_region,
        }
    }

    fn mixer_with_voice(pcm: PcmData, params: VoiceParams) -> (Mixer, VoiceId) {
        let mut mixer = Mixer::new(2, 4, 1.0);
        let buffer = mixer.create_buffer().unwrap();
        let voice = mixer.create_voice().unwrap();
        mixer.upload_pcm(buffer, pcm).unwrap();
        mixer.bind_buffer(voice, Some(buffer));
        mixer.set_voice_params(voice, &params);
        mixer.play(voice);
        (mixer, voice)
    }

    #[test]
    fn test_attenuation() {
        assert_eq!(attenuation(0.5, 1.0, 11.0, 1.0), 1.0);
        assert_eq!(attenuation(6.0, 1.0, 11.0, 1.0), 0.5);
        assert_eq!(attenuation(50.0, 1.0, 11.0, 1.0), 0.0);
        assert_eq!(attenuation(50.0, f32::MAX, f32::MAX, 1.0), 1.0);
    }

    #[test]
    fn test_spatialize_direction() {
        let listener = Listener::default();
        // Facing -Z with +Y up puts +X on the right.
        let right = spatialize(
            &VoiceParams {
                position: Vec3::new(1.0, 0.0, 0.0),
                ..Default::default()
            },
            &listener,
        );
        assert!(right.right > 0.99 && right.left < 0.01);

        let center = spatialize(
            &VoiceParams {
                position: Vec3::new(0.0, 0.0, -1.0),
                ..Default::default()
            },
            &listener,
        );
        assert!((center.left - center.right).abs() < 1e-6);
    }

    #[test]
    fn test_fixed_pan_ignores_distance() {
        let gain = spatialize(
            &VoiceParams {
                pan: Some(-0.5),
                position: Vec3::new(1000.0, 0.0, 0.0),
                max_distance: 10.0,
                gain: 0.5,
                ..Default::default()
            },
            &Listener::default(),
        );
        assert!((gain.left - 0.5).abs() < 1e-6);
        assert!(gain.right.abs() < 1e-6);
    }

    #[test]
    fn test_silence_without_voices() {
        let mut mixer = Mixer::new(2, 44100, 1.0);
        assert!(mixer.process_frames(8).iter().all(|s| *s == 0.0));
    }

    #[test]
    fn test_non_looping_voice_stops() {
        let (mut mixer, voice) = mixer_with_voice(
            pcm(vec![16384; 4], 1, None),
            VoiceParams {
                pan: Some(0.5),
                ..Default::default()
            },
        );
        let frames = mixer.process_frames(6);
        assert!((frames[1] - 0.5).abs() < 1e-4);
        assert!((frames[7] - 0.5).abs() < 1e-4);
        assert_eq!(frames[9], 0.0);
        assert_eq!(mixer.state(voice), VoiceState::Stopped);
    }

    #[test]
    fn test_looping_voice_wraps_to_loop_start() {
        let samples = vec![0, 0, 16384, 16384];
        let (mut mixer, voice) = mixer_with_voice(
            pcm(
                samples,
                1,
                Some(LoopRegion {
                    start: 2,
                    length: 2,
                }),
            ),
            VoiceParams {
                pan: Some(0.5),
                looping: true,
                ..Default::default()
            },
        );
        let frames = mixer.process_frames(12);
        assert_eq!(mixer.state(voice), VoiceState::Playing);
        // After the intro every frame comes from the loop.
        for frame in frames.chunks(2).skip(4) {
            assert!((frame[1] - 0.5).abs() < 1e-4);
        }
    }

    #[test]
    fn test_pitch_consumes_faster() {
        let (mut mixer, voice) = mixer_with_voice(
            pcm(vec![100; 8], 1, None),
            VoiceParams {
                pitch: 2.0,
                ..Default::default()
            },
        );
        mixer.process_frames(4);
        assert_eq!(mixer.state(voice), VoiceState::Playing);
        mixer.process_frames(1);
        assert_eq!(mixer.state(voice), VoiceState::Stopped);
    }

    #[test]
    fn test_stereo_buffer_and_master_volume() {
        let mut mixer = Mixer::new(2, 4, 0.5);
        let buffer = mixer.create_buffer().unwrap();
        let voice = mixer.create_voice().unwrap();
        mixer
            .upload_pcm(buffer, pcm(vec![16384, -16384, 16384, -16384], 2, None))
            .unwrap();
        mixer.bind_buffer(voice, Some(buffer));
        mixer.set_voice_params(
            voice,
            &VoiceParams {
                relative: true,
                ..Default::default()
            },
        );
        mixer.play(voice);
        let frames = mixer.process_frames(1);
        let center = FRAC_PI_2 / 2.0;
        assert!((frames[0] - 0.25 * center.cos()).abs() < 1e-4);
        assert!((frames[1] + 0.25 * center.sin()).abs() < 1e-4);
    }
}
