// Copyright (C) 2025 Michael Wilson <mike@mdwn.dev>
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

use std::{error::Error, fmt, str::FromStr};

/// Output sample format used when opening an output stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleFormat {
    /// Integer samples (16-bit or 32-bit)
    Int,
    /// Floating point samples
    Float,
}

impl FromStr for SampleFormat {
    /// Convert from string representation
    fn from_str(s: &str) -> Result<Self, Box<dyn Error>> {
        match s {
            "float" | "Float" => Ok(SampleFormat::Float),
            "int" | "Int" => Ok(SampleFormat::Int),
            _ => Err(format!("Unsupported sample format: {}", s).into()),
        }
    }

    type Err = Box<dyn Error>;
}

impl SampleFormat {
    /// Convert to string representation
    pub fn as_str(self) -> &'static str {
        match self {
            SampleFormat::Float => "float",
            SampleFormat::Int => "int",
        }
    }
}

impl fmt::Display for SampleFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Encoding of a stored sample or stream block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WaveFormat {
    /// Biased 8-bit PCM.
    Pcm8,
    /// Raw 16-bit PCM. Present in headers but never produced by the exporter.
    Pcm16,
    /// 4-bit IMA-ADPCM with a 4-byte preamble.
    Adpcm,
    /// Placeholder entry with no audio data.
    #[default]
    None,
}

impl WaveFormat {
    /// Maps the header format byte (0 PCM8, 1 PCM16, 2 ADPCM) to a format.
    pub fn from_header(value: u8) -> Option<WaveFormat> {
        match value {
            0 => Some(WaveFormat::Pcm8),
            1 => Some(WaveFormat::Pcm16),
            2 => Some(WaveFormat::Adpcm),
            _ => None,
        }
    }

    /// Convert to string representation
    pub fn as_str(self) -> &'static str {
        match self {
            WaveFormat::Pcm8 => "pcm8",
            WaveFormat::Pcm16 => "pcm16",
            WaveFormat::Adpcm => "adpcm",
            WaveFormat::None => "none",
        }
    }
}

impl FromStr for WaveFormat {
    type Err = Box<dyn Error>;

    fn from_str(s: &str) -> Result<Self, Box<dyn Error>> {
        match s.to_ascii_lowercase().as_str() {
            "pcm8" => Ok(WaveFormat::Pcm8),
            "pcm16" => Ok(WaveFormat::Pcm16),
            "adpcm" => Ok(WaveFormat::Adpcm),
            "none" => Ok(WaveFormat::None),
            _ => Err(format!("Unsupported wave format: {}", s).into()),
        }
    }
}

impl fmt::Display for WaveFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
