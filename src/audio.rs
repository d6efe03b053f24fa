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
use std::{fmt, sync::Arc};

use glam::Vec3;

use crate::{codec::LoopRegion, config};

pub mod cpal;
pub mod format;
pub mod mixer;
pub mod mock;

pub use format::{SampleFormat, WaveFormat};

/// Identifies a buffer created by a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferId(pub u32);

/// Identifies a voice created by a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VoiceId(pub u32);

/// Playback state reported by a voice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VoiceState {
    /// Never played since its buffer was bound.
    #[default]
    Initial,
    Playing,
    Stopped,
}

/// Decoded audio uploaded into a buffer.
#[derive(Debug, Clone, PartialEq)]
pub struct PcmData {
    /// Interleaved samples.
    pub samples: Arc<[i16]>,
    pub channels: u16,
    pub sample_rate: u32,
    /// Loop region in frames.
    pub loop_region: Option<LoopRegion>,
}

impl PcmData {
    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels.max(1) as usize
    }
}

/// Per-voice playback parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VoiceParams {
    pub gain: f32,
    pub pitch: f32,
    pub position: Vec3,
    pub reference_distance: f32,
    pub max_distance: f32,
    pub rolloff: f32,
    /// Position is relative to the listener.
    pub relative: bool,
    pub looping: bool,
    /// Fixed stereo pan in [-0.5, 0.5]. Overrides positional panning and attenuation.
    pub pan: Option<f32>,
}

impl Default for VoiceParams {
    fn default() -> Self {
        VoiceParams {
            gain: 1.0,
            pitch: 1.0,
            position: Vec3::ZERO,
            reference_distance: 1.0,
            max_distance: f32::MAX,
            rolloff: 1.0,
            relative: false,
            looping: false,
            pan: None,
        }
    }
}

/// Where sound is heard from.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Listener {
    pub position: Vec3,
    pub facing: Vec3,
    pub up: Vec3,
}

impl Default for Listener {
    fn default() -> Self {
        Listener {
            position: Vec3::ZERO,
            facing: Vec3::NEG_Z,
            up: Vec3::Y,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    #[error("no device found with name {0}")]
    NotFound(String),

    #[error("unknown {kind} {id}")]
    Unknown { kind: &'static str, id: u32 },

    #[error("audio backend error: {0}")]
    Backend(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// The hardware boundary the engine plays through.
pub trait Device: fmt::Display + Send {
    /// Creates a new empty buffer.
    fn create_buffer(&mut self) -> Result<BufferId, DeviceError>;

    /// Creates a new voice with no buffer bound.
    fn create_voice(&mut self) -> Result<VoiceId, DeviceError>;

    /// Replaces the contents of a buffer.
    fn upload_pcm(&mut self, buffer: BufferId, pcm: PcmData) -> Result<(), DeviceError>;

    /// Binds a buffer to a voice, or detaches it. Resets the voice to [`VoiceState::Initial`].
    fn bind_buffer(&mut self, voice: VoiceId, buffer: Option<BufferId>);

    fn set_voice_params(&mut self, voice: VoiceId, params: &VoiceParams);

    /// Starts the voice from the beginning of its buffer.
    fn play(&mut self, voice: VoiceId);

    fn stop(&mut self, voice: VoiceId);

    fn state(&self, voice: VoiceId) -> VoiceState;

    fn set_listener(&mut self, listener: &Listener);
}

impl<D: Device + ?Sized> Device for Box<D> {
    fn create_buffer(&mut self) -> Result<BufferId, DeviceError> {
        (**self).create_buffer()
    }

    fn create_voice(&mut self) -> Result<VoiceId, DeviceError> {
        (**self).create_voice()
    }

    fn upload_pcm(&mut self, buffer: BufferId, pcm: PcmData) -> Result<(), DeviceError> {
        (**self).upload_pcm(buffer, pcm)
    }

    fn bind_buffer(&mut self, voice: VoiceId, buffer: Option<BufferId>) {
        (**self).bind_buffer(voice, buffer)
    }

    fn set_voice_params(&mut self, voice: VoiceId, params: &VoiceParams) {
        (**self).set_voice_params(voice, params)
    }

    fn play(&mut self, voice: VoiceId) {
        (**self).play(voice)
    }

    fn stop(&mut self, voice: VoiceId) {
        (**self).stop(voice)
    }

    fn state(&self, voice: VoiceId) -> VoiceState {
        (**self).state(voice)
    }

    fn set_listener(&mut self, listener: &Listener) {
        (**self).set_listener(listener)
    }
}

/// Lists output devices known to cpal.
pub fn list_devices() -> Result<Vec<cpal::DeviceInfo>, DeviceError> {
    cpal::Device::list()
}

/// Gets the device named in the configuration.
pub fn get_device(config: &config::EngineConfig) -> Result<Box<dyn Device>, DeviceError> {
    let device = config.device();
    if device.starts_with("mock") {
        return Ok(Box::new(mock::Device::get(device)));
    };

    Ok(Box::new(cpal::Device::get(config)?))
}
