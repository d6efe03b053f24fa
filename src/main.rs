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
use std::error::Error;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use clap::{crate_version, Args, Parser, Subcommand};
use sfxkit::audio::{self, WaveFormat};
use sfxkit::bank::{Sample, SfxId, SoundBank};
use sfxkit::codec;
use sfxkit::config::{self, EngineConfig};
use sfxkit::engine::{Engine, PlayOptions};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Engine frame rate used by the play command.
const FRAME_RATE: f32 = 60.0;

#[derive(Parser)]
#[clap(
    author = "Michael Wilson",
    version = crate_version!(),
    about = "A positional sound-effect engine."
)]
struct Cli {
    #[clap(subcommand)]
    command: Commands,
}

/// A raw sample record read from disk.
#[derive(Args)]
struct RawSample {
    /// The path to the raw sample data.
    input: PathBuf,
    /// The wave format of the data: pcm8 or adpcm.
    #[arg(short, long, default_value = "adpcm")]
    format: String,
    /// Loop start as stored in the header. 32-bit words for ADPCM.
    #[arg(long, default_value_t = 0)]
    loop_start: u32,
    /// Loop length as stored in the header. 32-bit words for ADPCM.
    #[arg(long, default_value_t = 0)]
    loop_length: u32,
    /// The sample rate of the data.
    #[arg(short, long, default_value_t = 22050)]
    rate: u32,
    /// Decode ADPCM with the hardware-compatible clamp.
    #[arg(long)]
    rounding_error: bool,
}

impl RawSample {
    fn read(&self, looping: bool) -> Result<Sample, Box<dyn Error>> {
        Ok(Sample {
            format: self.format.parse::<WaveFormat>()?,
            sample_rate: self.rate,
            loop_start: self.loop_start,
            loop_length: self.loop_length,
            looping,
            data: fs::read(&self.input)?,
            initial_volume: 127,
            rounding_error: self.rounding_error,
        })
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Lists the available audio output devices.
    Devices {},
    /// Decodes a raw sample into a 16-bit WAV file.
    Decode {
        #[command(flatten)]
        sample: RawSample,
        /// The WAV file to write.
        output: PathBuf,
    },
    /// Plays a raw sample through the configured device.
    Play {
        #[command(flatten)]
        sample: RawSample,
        /// The engine configuration file.
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Loop the sample for this many seconds. The sample plays once when unset.
        #[arg(long)]
        loop_seconds: Option<f32>,
    },
}

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Devices {} => {
            let devices = audio::list_devices()?;

            if devices.is_empty() {
                println!("No devices found.");
                return Ok(());
            }

            println!("Devices:");
            for device in devices {
                println!("- {}", device);
            }
        }
        Commands::Decode { sample, output } => {
            let raw = sample.read(false)?;
            let pcm = raw.decode()?;
            codec::export_wav(&output, &pcm, raw.sample_rate)?;
            println!(
                "Decoded {} samples from {} to {}.",
                pcm.len(),
                sample.input.display(),
                output.display()
            );
        }
        Commands::Play {
            sample,
            config,
            loop_seconds,
        } => play(&sample, config.as_deref(), loop_seconds)?,
    }

    Ok(())
}

/// Plays a single sample until it ends, or for `loop_seconds` when looping.
fn play(
    sample: &RawSample,
    config: Option<&Path>,
    loop_seconds: Option<f32>,
) -> Result<(), Box<dyn Error>> {
    let config: EngineConfig = config::load(config)?;
    let bank = SoundBank {
        samples: vec![sample.read(loop_seconds.is_some())?],
        ..Default::default()
    };

    let device = audio::get_device(&config)?;
    let mut engine = Engine::load(device, bank, &config)?;
    let options = PlayOptions {
        looping: loop_seconds.is_some(),
        ..Default::default()
    };
    let Some(handle) = engine.play_sample(SfxId::sample(0), None, options).handle() else {
        return Err(format!("unable to play {}", sample.input.display()).into());
    };
    info!(handle = %handle, input = %sample.input.display(), "Playing sample.");

    let frame = Duration::from_secs_f32(1.0 / FRAME_RATE);
    let started = Instant::now();
    let mut last = started;
    while engine.is_handle_playing(handle) {
        if loop_seconds.is_some_and(|seconds| started.elapsed().as_secs_f32() >= seconds) {
            engine.stop_by_handle(handle);
            break;
        }
        spin_sleep::sleep(frame.saturating_sub(last.elapsed()));
        let now = Instant::now();
        engine.update(now.duration_since(last).as_secs_f32());
        last = now;
    }

    engine.shutdown();
    Ok(())
}
