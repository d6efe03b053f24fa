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
use std::{
    fmt,
    sync::{
        atomic::{AtomicBool, Ordering},
        mpsc, Arc,
    },
    thread,
    time::Duration,
};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use parking_lot::Mutex;
use tracing::{error, info, span, Level};

use crate::{
    audio::{
        mixer::Mixer, BufferId, Device as AudioDevice, DeviceError, Listener, PcmData,
        SampleFormat, VoiceId, VoiceParams, VoiceState,
    },
    config,
};

/// Output channels rendered by the mixer.
const OUTPUT_CHANNELS: u16 = 2;

/// A listed output device.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub name: String,
    pub max_channels: u16,
    pub host: String,
}

impl fmt::Display for DeviceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (Channels={}) ({})",
            self.name, self.max_channels, self.host
        )
    }
}

/// A cpal output device rendering the software mixer.
pub struct Device {
    /// The name of the device.
    name: String,
    /// The host ID of the device.
    host_id: cpal::HostId,
    /// The voices and buffers, shared with the output callback.
    mixer: Arc<Mutex<Mixer>>,
    /// Keeps the output thread (and its stream) alive.
    running: Arc<AtomicBool>,
    /// Handle to the output thread.
    output_thread: Option<thread::JoinHandle<()>>,
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.host_id.name())
    }
}

/// f32 callback: mix directly into the cpal buffer.
fn create_f32_callback(
    mixer: Arc<Mutex<Mixer>>,
) -> impl FnMut(&mut [f32], &cpal::OutputCallbackInfo) + Send + 'static {
    move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
        mixer.lock().process_into_output(data);
    }
}

/// Integer callback: mix into a scratch buffer and convert.
fn create_int_callback<T: cpal::Sample + cpal::FromSample<f32>>(
    mixer: Arc<Mutex<Mixer>>,
) -> impl FnMut(&mut [T], &cpal::OutputCallbackInfo) + Send + 'static {
    let mut scratch: Vec<f32> = Vec::new();
    move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
        scratch.resize(data.len(), 0.0);
        mixer.lock().process_into_output(&mut scratch);

        for (dst, &src) in data.iter_mut().zip(scratch.iter()) {
            *dst = T::from_sample(src);
        }
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Relaxed);
        if let Some(thread) = self.output_thread.take() {
            let _ = thread.join();
        }
    }
}

impl Device {
    /// Lists cpal output devices.
    pub fn list() -> Result<Vec<DeviceInfo>, DeviceError> {
        Ok(Device::list_cpal_devices()?
            .into_iter()
            .map(|(info, _, _)| info)
            .collect())
    }

    /// Lists cpal devices along with their host and handle.
    fn list_cpal_devices() -> Result<Vec<(DeviceInfo, cpal::HostId, cpal::Device)>, DeviceError>
    {
        // Suppress noisy output here.
        let _shh_stdout = shh::stdout()?;
        let _shh_stderr = shh::stderr()?;

        let mut devices = Vec::new();
        for host_id in cpal::available_hosts() {
            let host = cpal::host_from_id(host_id)
                .map_err(|e| DeviceError::Backend(e.to_string()))?;
            let host_devices = match host.output_devices() {
                Ok(host_devices) => host_devices,
                Err(e) => {
                    error!(
                        err = e.to_string(),
                        host = host_id.name(),
                        "Unable to list devices for host"
                    );
                    continue;
                }
            };

            for device in host_devices {
                let Ok(output_configs) = device.supported_output_configs() else {
                    continue;
                };
                let max_channels = output_configs
                    .map(|config| config.channels())
                    .max()
                    .unwrap_or(0);

                if max_channels > 0 {
                    let name = device
                        .name()
                        .map_err(|e| DeviceError::Backend(e.to_string()))?;
                    devices.push((
                        DeviceInfo {
                            name,
                            max_channels,
                            host: host_id.name().to_string(),
                        },
                        host_id,
                        device,
                    ));
                }
            }
        }

        devices.sort_by_key(|(info, _, _)| info.name.to_string());
        Ok(devices)
    }

    /// Finds the named device, or the default output device for the name "default".
    fn find(name: &str) -> Result<(String, cpal::HostId, cpal::Device), DeviceError> {
        if name == "default" {
            let host = cpal::default_host();
            let device = host
                .default_output_device()
                .ok_or_else(|| DeviceError::NotFound(name.to_string()))?;
            let name = device
                .name()
                .map_err(|e| DeviceError::Backend(e.to_string()))?;
            return Ok((name, host.id(), device));
        }

        Device::list_cpal_devices()?
            .into_iter()
            .find(|(info, _, _)| info.name.trim() == name)
            .map(|(info, host_id, device)| (info.name, host_id, device))
            .ok_or_else(|| DeviceError::NotFound(name.to_string()))
    }

    /// Gets the configured cpal device and starts its output stream.
    pub fn get(config: &config::EngineConfig) -> Result<Device, DeviceError> {
        let (name, host_id, device) = Device::find(config.device())?;
        let sample_format = config
            .sample_format()
            .map_err(|e| DeviceError::Backend(e.to_string()))?;
        let sample_rate = config.sample_rate();

        let mixer = Arc::new(Mutex::new(Mixer::new(
            OUTPUT_CHANNELS,
            sample_rate,
            config.master_volume(),
        )));
        let running = Arc::new(AtomicBool::new(true));
        let output_thread = Device::start_output_thread(
            device,
            mixer.clone(),
            running.clone(),
            sample_format,
            config.bits_per_sample(),
        )?;

        info!(
            device = name,
            host = host_id.name(),
            sample_rate,
            format = sample_format.as_str(),
            "Opened output device."
        );

        Ok(Device {
            name,
            host_id,
            mixer,
            running,
            output_thread: Some(output_thread),
        })
    }

    /// Starts the output thread that creates and owns the cpal stream. Waits until the stream
    /// has started or failed.
    fn start_output_thread(
        device: cpal::Device,
        mixer: Arc<Mutex<Mixer>>,
        running: Arc<AtomicBool>,
        sample_format: SampleFormat,
        bits_per_sample: u16,
    ) -> Result<thread::JoinHandle<()>, DeviceError> {
        let (ready_tx, ready_rx) = mpsc::channel::<Result<(), DeviceError>>();
        let sample_rate = mixer.lock().sample_rate();

        let output_thread = thread::spawn(move || {
            let span = span!(Level::INFO, "output stream (cpal)");
            let _enter = span.enter();

            let config = cpal::StreamConfig {
                channels: OUTPUT_CHANNELS,
                sample_rate: sample_rate as cpal::SampleRate,
                buffer_size: cpal::BufferSize::Default,
            };
            let error_callback = |err| error!("CPAL output stream error: {}", err);

            let stream_result = match (sample_format, bits_per_sample) {
                (SampleFormat::Float, _) => device.build_output_stream(
                    &config,
                    create_f32_callback(mixer),
                    error_callback,
                    None,
                ),
                (SampleFormat::Int, 16) => device.build_output_stream(
                    &config,
                    create_int_callback::<i16>(mixer),
                    error_callback,
                    None,
                ),
                (SampleFormat::Int, _) => device.build_output_stream(
                    &config,
                    create_int_callback::<i32>(mixer),
                    error_callback,
                    None,
                ),
            };

            let stream = match stream_result {
                Ok(stream) => stream,
                Err(e) => {
                    let _ = ready_tx.send(Err(DeviceError::Backend(e.to_string())));
                    return;
                }
            };
            if let Err(e) = stream.play() {
                let _ = ready_tx.send(Err(DeviceError::Backend(e.to_string())));
                return;
            }
            info!("CPAL output stream started successfully");
            let _ = ready_tx.send(Ok(()));

            // Keep the stream alive until the device is dropped.
            while running.load(Ordering::Relaxed) {
                thread::sleep(Duration::from_millis(100));
            }
        });

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(output_thread),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(DeviceError::Backend(
                "output thread exited before starting".to_string(),
            )),
        }
    }
}

impl AudioDevice for Device {
    fn create_buffer(&mut self) -> Result<BufferId, DeviceError> {
        self.mixer.lock().create_buffer()
    }

    fn create_voice(&mut self) -> Result<VoiceId, DeviceError> {
        self.mixer.lock().create_voice()
    }

    fn upload_pcm(&mut self, buffer: BufferId, pcm: PcmData) -> Result<(), DeviceError> {
        self.mixer.lock().upload_pcm(buffer, pcm)
    }

    fn bind_buffer(&mut self, voice: VoiceId, buffer: Option<BufferId>) {
        self.mixer.lock().bind_buffer(voice, buffer)
    }

    fn set_voice_params(&mut self, voice: VoiceId, params: &VoiceParams) {
        self.mixer.lock().set_voice_params(voice, params)
    }

    fn play(&mut self, voice: VoiceId) {
        self.mixer.lock().play(voice)
    }

    fn stop(&mut self, voice: VoiceId) {
        self.mixer.lock().stop(voice)
    }

    fn state(&self, voice: VoiceId) -> VoiceState {
        self.mixer.lock().state(voice)
    }

    fn set_listener(&mut self, listener: &Listener) {
        self.mixer.lock().set_listener(listener)
    }
}
