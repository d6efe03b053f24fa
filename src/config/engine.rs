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
use std::{path::Path, str::FromStr};

use config::{Config, Environment, File, FileFormat};
use serde::Deserialize;

use super::error::ConfigError;
use crate::{audio::SampleFormat, bank::SfxId, engine::environment::SLOT_COUNT};

const DEFAULT_DEVICE: &str = "default";
const DEFAULT_SAMPLE_RATE: u32 = 44100;
const DEFAULT_BITS_PER_SAMPLE: u16 = 32;
const DEFAULT_MASTER_VOLUME: f32 = 0.35;

/// Prefix for environment variable overrides, e.g. `SFXKIT_DEVICE`.
pub const ENV_PREFIX: &str = "SFXKIT";

fn default_device() -> String {
    DEFAULT_DEVICE.to_string()
}

/// A YAML representation of the engine configuration.
#[derive(Deserialize, Clone, Debug)]
pub struct EngineConfig {
    /// The output device. Names starting with "mock" select the mock device.
    #[serde(default = "default_device")]
    device: String,

    /// Output sample rate in Hz (default: 44100)
    sample_rate: Option<u32>,

    /// Output sample format (default: "float")
    sample_format: Option<String>,

    /// Bits per sample for integer output (default: 32)
    bits_per_sample: Option<u16>,

    /// Master volume in [0, 1] (default: 0.35)
    master_volume: Option<f32>,

    /// Samples decoded with the hardware-compatible ADPCM clamp.
    #[serde(default)]
    rounding_error_samples: Vec<u16>,

    /// Sound ids assigned to environment slots, in slot order.
    #[serde(default)]
    environment: Vec<u16>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig::new(DEFAULT_DEVICE)
    }
}

impl EngineConfig {
    /// New will create a new engine configuration with defaults for everything but the device.
    pub fn new(device: &str) -> EngineConfig {
        EngineConfig {
            device: device.to_string(),
            sample_rate: None,
            sample_format: None,
            bits_per_sample: None,
            master_volume: None,
            rounding_error_samples: Vec::new(),
            environment: Vec::new(),
        }
    }

    /// Parses a configuration file, applying `SFXKIT_*` environment overrides.
    pub fn deserialize(path: &Path) -> Result<EngineConfig, ConfigError> {
        Self::build(
            Config::builder()
                .add_source(File::from(path))
                .add_source(Environment::with_prefix(ENV_PREFIX).try_parsing(true)),
        )
    }

    /// Parses a configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<EngineConfig, ConfigError> {
        Self::build(Config::builder().add_source(File::from_str(yaml, FileFormat::Yaml)))
    }

    fn build(
        builder: config::ConfigBuilder<config::builder::DefaultState>,
    ) -> Result<EngineConfig, ConfigError> {
        let config = builder.build()?.try_deserialize::<EngineConfig>()?;
        config.validate()?;
        Ok(config)
    }

    /// Checks value ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.master_volume()) {
            return Err(ConfigError::Invalid {
                field: "master_volume",
                reason: format!("{} is outside [0, 1]", self.master_volume()),
            });
        }
        if self.sample_rate() == 0 {
            return Err(ConfigError::Invalid {
                field: "sample_rate",
                reason: "must be positive".to_string(),
            });
        }
        if !matches!(self.bits_per_sample(), 16 | 32) {
            return Err(ConfigError::Invalid {
                field: "bits_per_sample",
                reason: format!("{} is not 16 or 32", self.bits_per_sample()),
            });
        }
        self.sample_format()?;
        if self.environment.len() > SLOT_COUNT {
            return Err(ConfigError::Invalid {
                field: "environment",
                reason: format!(
                    "{} entries given, only {} slots exist",
                    self.environment.len(),
                    SLOT_COUNT
                ),
            });
        }
        Ok(())
    }

    /// Returns the device from the configuration.
    pub fn device(&self) -> &str {
        &self.device
    }

    /// Returns the output sample rate (default: 44100)
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate.unwrap_or(DEFAULT_SAMPLE_RATE)
    }

    /// Returns the output sample format (default: Float)
    pub fn sample_format(&self) -> Result<SampleFormat, ConfigError> {
        match self.sample_format.as_deref() {
            Some(format) => SampleFormat::from_str(format).map_err(|e| ConfigError::Invalid {
                field: "sample_format",
                reason: e.to_string(),
            }),
            None => Ok(SampleFormat::Float),
        }
    }

    /// Returns the bits per sample for integer output (default: 32)
    pub fn bits_per_sample(&self) -> u16 {
        self.bits_per_sample.unwrap_or(DEFAULT_BITS_PER_SAMPLE)
    }

    pub fn master_volume(&self) -> f32 {
        self.master_volume.unwrap_or(DEFAULT_MASTER_VOLUME)
    }

    /// Returns true if the sample with the given index needs the rounding-error ADPCM clamp.
    pub fn rounding_error(&self, sample: u16) -> bool {
        self.rounding_error_samples.contains(&sample)
    }

    /// Marks a sample as needing the rounding-error ADPCM clamp.
    pub fn with_rounding_error(mut self, sample: u16) -> EngineConfig {
        self.rounding_error_samples.push(sample);
        self
    }

    /// Sound ids for the environment slots.
    pub fn environment(&self) -> Vec<SfxId> {
        self.environment.iter().copied().map(SfxId).collect()
    }

    pub fn with_environment(mut self, environment: &[SfxId]) -> EngineConfig {
        self.environment = environment.iter().map(|id| id.0).collect();
        self
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use config::Map;

    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::from_yaml("device: mock-device").unwrap();
        assert_eq!(config.device(), "mock-device");
        assert_eq!(config.sample_rate(), 44100);
        assert_eq!(config.sample_format().unwrap(), SampleFormat::Float);
        assert_eq!(config.bits_per_sample(), 32);
        assert_eq!(config.master_volume(), 0.35);
        assert!(config.environment().is_empty());
        assert!(!config.rounding_error(3));

        let config = EngineConfig::from_yaml("sample_rate: 48000").unwrap();
        assert_eq!(config.device(), "default");
    }

    #[test]
    fn test_full_config() {
        let yaml = r#"
            device: mock-device
            sample_rate: 32000
            sample_format: int
            bits_per_sample: 16
            master_volume: 0.8
            rounding_error_samples:
              - 3
              - 17
            environment:
              - 16385
              - 12
        "#;
        let config = EngineConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.sample_rate(), 32000);
        assert_eq!(config.sample_format().unwrap(), SampleFormat::Int);
        assert_eq!(config.bits_per_sample(), 16);
        assert_eq!(config.master_volume(), 0.8);
        assert!(config.rounding_error(17));
        assert_eq!(config.environment(), vec![SfxId(0x4001), SfxId(12)]);
    }

    #[test]
    fn test_invalid_values() {
        for yaml in [
            "master_volume: 1.5",
            "sample_rate: 0",
            "bits_per_sample: 24",
            "sample_format: double",
            "environment: [1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11]",
        ] {
            assert!(
                matches!(
                    EngineConfig::from_yaml(yaml),
                    Err(ConfigError::Invalid { .. })
                ),
                "{yaml}"
            );
        }
        assert!(matches!(
            EngineConfig::from_yaml("sample_rate: fast"),
            Err(ConfigError::Load(_))
        ));
    }

    #[test]
    fn test_deserialize_file() {
        let mut file = tempfile::NamedTempFile::with_suffix(".yaml").unwrap();
        writeln!(file, "device: mock-file\nmaster_volume: 0.5").unwrap();

        let config = EngineConfig::deserialize(file.path()).unwrap();
        assert_eq!(config.device(), "mock-file");
        assert_eq!(config.master_volume(), 0.5);

        assert!(EngineConfig::deserialize(Path::new("/nonexistent/sfxkit.yaml")).is_err());
    }

    #[test]
    fn test_environment_overrides() {
        let mut vars = Map::new();
        vars.insert("SFXKIT_DEVICE".to_string(), "mock-env".to_string());
        vars.insert("SFXKIT_SAMPLE_RATE".to_string(), "22050".to_string());

        let config = EngineConfig::build(
            Config::builder()
                .add_source(File::from_str("device: mock-file", FileFormat::Yaml))
                .add_source(
                    Environment::with_prefix(ENV_PREFIX)
                        .try_parsing(true)
                        .source(Some(vars)),
                ),
        )
        .unwrap();
        assert_eq!(config.device(), "mock-env");
        assert_eq!(config.sample_rate(), 22050);
    }
}
