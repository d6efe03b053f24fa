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
use std::fmt;

use tracing::debug;

use crate::audio::{BufferId, DeviceError, Listener, PcmData, VoiceId, VoiceParams, VoiceState};

#[derive(Debug, Clone, Default)]
struct Voice {
    buffer: Option<BufferId>,
    params: VoiceParams,
    state: VoiceState,
    /// Seconds of buffer consumed since the last play.
    elapsed: f32,
}

/// A mock device. Doesn't actually play anything, but tracks voice state in simulated time.
#[derive(Debug, Clone)]
pub struct Device {
    name: String,
    buffers: Vec<Option<PcmData>>,
    voices: Vec<Voice>,
    listener: Listener,
    uploads: usize,
    binds: usize,
    fail_uploads: bool,
}

impl Device {
    /// Gets the given mock device.
    pub fn get(name: &str) -> Device {
        Device {
            name: name.to_string(),
            buffers: Vec::new(),
            voices: Vec::new(),
            listener: Listener::default(),
            uploads: 0,
            binds: 0,
            fail_uploads: false,
        }
    }

    /// Advances simulated time. Non-looping voices stop once their buffer is exhausted.
    pub fn advance(&mut self, dt: f32) {
        for voice in self.voices.iter_mut() {
            if voice.state != VoiceState::Playing {
                continue;
            }
            voice.elapsed += dt * voice.params.pitch;

            let duration = voice
                .buffer
                .and_then(|buffer| self.buffers.get(buffer.0 as usize))
                .and_then(Option::as_ref)
                .map(|pcm| pcm.frames() as f32 / pcm.sample_rate.max(1) as f32)
                .unwrap_or(0.0);
            if !voice.params.looping && voice.elapsed >= duration {
                voice.state = VoiceState::Stopped;
            }
        }
    }

    /// Stops a voice as if its buffer had run out.
    pub fn finish(&mut self, voice: VoiceId) {
        if let Some(voice) = self.voices.get_mut(voice.0 as usize) {
            if voice.state == VoiceState::Playing {
                voice.state = VoiceState::Stopped;
            }
        }
    }

    /// Finishes every playing voice.
    pub fn finish_all(&mut self) {
        for index in 0..self.voices.len() {
            self.finish(VoiceId(index as u32));
        }
    }

    /// Voices currently playing.
    pub fn playing_voices(&self) -> Vec<VoiceId> {
        self.voices
            .iter()
            .enumerate()
            .filter(|(_, voice)| voice.state == VoiceState::Playing)
            .map(|(index, _)| VoiceId(index as u32))
            .collect()
    }

    pub fn voice_params(&self, voice: VoiceId) -> Option<VoiceParams> {
        self.voices.get(voice.0 as usize).map(|voice| voice.params)
    }

    pub fn bound_buffer(&self, voice: VoiceId) -> Option<BufferId> {
        self.voices.get(voice.0 as usize)?.buffer
    }

    pub fn buffer(&self, buffer: BufferId) -> Option<&PcmData> {
        self.buffers.get(buffer.0 as usize)?.as_ref()
    }

    pub fn listener(&self) -> Listener {
        self.listener
    }

    /// Makes every following upload fail until cleared.
    pub fn fail_uploads(&mut self, fail: bool) {
        self.fail_uploads = fail;
    }

    /// Number of PCM uploads performed.
    pub fn upload_count(&self) -> usize {
        self.uploads
    }

    /// Number of buffer binds performed.
    pub fn bind_count(&self) -> usize {
        self.binds
    }

    pub fn buffer_count(&self) -> usize {
        self.buffers.len()
    }

    pub fn voice_count(&self) -> usize {
        self.voices.len()
    }
}

impl crate::audio::Device for Device {
    fn create_buffer(&mut self) -> Result<BufferId, DeviceError> {
        self.buffers.push(None);
        Ok(BufferId(self.buffers.len() as u32 - 1))
    }

    fn create_voice(&mut self) -> Result<VoiceId, DeviceError> {
        self.voices.push(Voice::default());
        Ok(VoiceId(self.voices.len() as u32 - 1))
    }

    fn upload_pcm(&mut self, buffer: BufferId, pcm: PcmData) -> Result<(), DeviceError> {
        if self.fail_uploads {
            return Err(DeviceError::Backend("upload rejected (mock)".to_string()));
        }
        let slot = self
            .buffers
            .get_mut(buffer.0 as usize)
            .ok_or(DeviceError::Unknown {
                kind: "buffer",
                id: buffer.0,
            })?;
        debug!(
            device = self.name,
            buffer = buffer.0,
            frames = pcm.frames(),
            "Uploaded PCM (mock)."
        );
        *slot = Some(pcm);
        self.uploads += 1;
        Ok(())
    }

    fn bind_buffer(&mut self, voice: VoiceId, buffer: Option<BufferId>) {
        if let Some(voice) = self.voices.get_mut(voice.0 as usize) {
            voice.buffer = buffer;
            voice.state = VoiceState::Initial;
            voice.elapsed = 0.0;
            self.binds += 1;
        }
    }

    fn set_voice_params(&mut self, voice: VoiceId, params: &VoiceParams) {
        if let Some(voice) = self.voices.get_mut(voice.0 as usize) {
            voice.params = *params;
        }
    }

    fn play(&mut self, voice: VoiceId) {
        if let Some(voice) = self.voices.get_mut(voice.0 as usize) {
            if voice.buffer.is_some() {
                voice.state = VoiceState::Playing;
                voice.elapsed = 0.0;
            }
        }
    }

    fn stop(&mut self, voice: VoiceId) {
        if let Some(voice) = self.voices.get_mut(voice.0 as usize) {
            if voice.state != VoiceState::Initial {
                voice.state = VoiceState::Stopped;
            }
        }
    }

    fn state(&self, voice: VoiceId) -> VoiceState {
        self.voices
            .get(voice.0 as usize)
            .map(|voice| voice.state)
            .unwrap_or_default()
    }

    fn set_listener(&mut self, listener: &Listener) {
        self.listener = *listener;
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (Mock)", self.name,)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::audio::Device as _;

    fn pcm(frames: usize, sample_rate: u32) -> PcmData {
        PcmData {
            samples: Arc::from(vec![0i16; frames]),
            channels: 1,
            sample_rate,
            loop_region: None,
        }
    }

    #[test]
    fn test_voice_lifecycle() {
        let mut device = Device::get("mock-device");
        let buffer = device.create_buffer().unwrap();
        let voice = device.create_voice().unwrap();
        device.upload_pcm(buffer, pcm(100, 100)).unwrap();

        // Nothing bound yet.
        device.play(voice);
        assert_eq!(device.state(voice), VoiceState::Initial);

        device.bind_buffer(voice, Some(buffer));
        device.play(voice);
        assert_eq!(device.state(voice), VoiceState::Playing);
        assert_eq!(device.playing_voices(), vec![voice]);

        device.advance(0.5);
        assert_eq!(device.state(voice), VoiceState::Playing);
        device.advance(0.5);
        assert_eq!(device.state(voice), VoiceState::Stopped);
        assert_eq!(device.upload_count(), 1);
        assert_eq!(device.bind_count(), 1);
    }

    #[test]
    fn test_pitch_and_looping() {
        let mut device = Device::get("mock-device");
        let buffer = device.create_buffer().unwrap();
        let fast = device.create_voice().unwrap();
        let looping = device.create_voice().unwrap();
        device.upload_pcm(buffer, pcm(100, 100)).unwrap();

        for voice in [fast, looping] {
            device.bind_buffer(voice, Some(buffer));
        }
        device.set_voice_params(
            fast,
            &VoiceParams {
                pitch: 2.0,
                ..Default::default()
            },
        );
        device.set_voice_params(
            looping,
            &VoiceParams {
                looping: true,
                ..Default::default()
            },
        );
        device.play(fast);
        device.play(looping);

        device.advance(0.5);
        assert_eq!(device.state(fast), VoiceState::Stopped);
        device.advance(10.0);
        assert_eq!(device.state(looping), VoiceState::Playing);

        device.finish(looping);
        assert_eq!(device.state(looping), VoiceState::Stopped);
    }

    #[test]
    fn test_unknown_ids() {
        let mut device = Device::get("mock-device");
        assert!(device.upload_pcm(BufferId(3), pcm(1, 1)).is_err());
        assert_eq!(device.state(VoiceId(9)), VoiceState::Initial);
        device.stop(VoiceId(9));
        assert_eq!(device.to_string(), "mock-device (Mock)");
    }
}
