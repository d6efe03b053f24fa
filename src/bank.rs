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

//! Sound records handed to the engine by the asset loader.
//!
//! Everything in here is read-only once the bank is built. The engine keeps its own
//! per-session state (decoded PCM, buffer ownership, reference counts) alongside it.

use std::fmt;

use crate::{
    audio::WaveFormat,
    codec::{self, ClampMode, DecodeError, LoopRegion, StreamBlock},
    curve::{LayerCurves, MAX_VOLUME},
    pitch,
};

/// Maximum number of layers a dynamic sound may define.
pub const MAX_DGN_LAYERS: usize = 3;

const KIND_MASK: u16 = 0xC000;
const INDEX_MASK: u16 = 0x3FFF;
const DGN_BIT: u16 = 0x4000;
const SCRIPT_BIT: u16 = 0x8000;

/// Distances in range entries are 20.12 fixed point.
const DISTANCE_SCALE: f32 = 4096.0;

/// What an [`SfxId`] refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SfxKind {
    Sample,
    Dgn,
    Script,
}

/// A packed sound id. The top two bits select the kind and the low 14 bits index the table
/// of that kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SfxId(pub u16);

impl SfxId {
    pub fn sample(index: u16) -> SfxId {
        SfxId(index & INDEX_MASK)
    }

    pub fn dgn(index: u16) -> SfxId {
        SfxId(DGN_BIT | (index & INDEX_MASK))
    }

    pub fn script(index: u16) -> SfxId {
        SfxId(SCRIPT_BIT | (index & INDEX_MASK))
    }

    /// Returns the kind, or `None` when both kind bits are set.
    pub fn kind(self) -> Option<SfxKind> {
        match self.0 & KIND_MASK {
            0 => Some(SfxKind::Sample),
            DGN_BIT => Some(SfxKind::Dgn),
            SCRIPT_BIT => Some(SfxKind::Script),
            _ => None,
        }
    }

    pub fn index(self) -> usize {
        (self.0 & INDEX_MASK) as usize
    }
}

impl fmt::Display for SfxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#06x}", self.0)
    }
}

/// Distance falloff parameters for a class of sound sources.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RangeEntry {
    pub reference_distance: f32,
    pub max_distance: f32,
}

impl RangeEntry {
    /// Converts fixed-point falloff and max distances.
    pub fn from_raw(falloff_distance: u32, max_distance: u32) -> RangeEntry {
        RangeEntry {
            reference_distance: falloff_distance as f32 / DISTANCE_SCALE,
            max_distance: max_distance as f32 / DISTANCE_SCALE,
        }
    }
}

/// A stored sound effect sample.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub format: WaveFormat,
    pub sample_rate: u32,
    /// Loop start as stored in the header. 32-bit words for ADPCM.
    pub loop_start: u32,
    /// Loop length as stored in the header. 32-bit words for ADPCM.
    pub loop_length: u32,
    pub looping: bool,
    pub data: Vec<u8>,
    /// Volume from the sound table, 0-127.
    pub initial_volume: u8,
    /// Decode with the hardware-compatible ADPCM clamp.
    pub rounding_error: bool,
}

impl Sample {
    /// A placeholder entry with no audio.
    pub fn empty() -> Sample {
        Sample {
            format: WaveFormat::None,
            sample_rate: 0,
            loop_start: 0,
            loop_length: 0,
            looping: false,
            data: Vec::new(),
            initial_volume: 0,
            rounding_error: false,
        }
    }

    /// Loop region in PCM16 positions.
    pub fn loop_region(&self) -> LoopRegion {
        LoopRegion::from_header(self.format, self.loop_start, self.loop_length)
    }

    /// Number of PCM16 samples the data decodes to.
    pub fn sample_count(&self) -> usize {
        match self.loop_region().sample_count() {
            0 if self.format == WaveFormat::Pcm8 => self.data.len(),
            count => count,
        }
    }

    pub fn volume(&self) -> f32 {
        self.initial_volume as f32 / MAX_VOLUME
    }

    pub fn clamp_mode(&self) -> ClampMode {
        ClampMode::from_flag(self.rounding_error)
    }

    pub fn decode(&self) -> Result<Vec<i16>, DecodeError> {
        codec::decode(
            self.format,
            &self.data,
            self.sample_count(),
            self.clamp_mode(),
        )
    }
}

/// A multi-channel background stream.
#[derive(Debug, Clone, PartialEq)]
pub struct Stream {
    pub name: String,
    pub format: WaveFormat,
    pub sample_rate: u32,
    pub looping: bool,
    /// Loop start in samples per channel.
    pub loop_start: u32,
    /// Loop end in samples per channel.
    pub loop_end: u32,
    /// Blocks for each channel.
    pub channels: Vec<Vec<StreamBlock>>,
    /// Stream volume, 0-127.
    pub volume: u8,
}

impl Stream {
    pub fn channel_count(&self) -> u16 {
        self.channels.len() as u16
    }

    pub fn gain(&self) -> f32 {
        self.volume as f32 / MAX_VOLUME
    }

    /// The loop region in frames, when the stream loops over a non-empty range.
    pub fn loop_region(&self) -> Option<LoopRegion> {
        if !self.looping || self.loop_end <= self.loop_start {
            return None;
        }
        Some(LoopRegion {
            start: self.loop_start as usize,
            length: (self.loop_end - self.loop_start) as usize,
        })
    }

    /// Decodes all channels and interleaves them.
    pub fn decode(&self) -> Result<Vec<i16>, DecodeError> {
        codec::decode_stream(self.format, &self.channels)
    }
}

/// One layer of a dynamic sound: a sample plus the curves driving it.
#[derive(Debug, Clone, PartialEq)]
pub struct DgnLayer {
    pub sample: SfxId,
    pub curves: LayerCurves,
}

/// A dynamic sound whose layers are mixed live from two control inputs.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DgnFile {
    pub name: String,
    pub initial_volume: u8,
    pub layers: Vec<DgnLayer>,
}

/// A script entry as stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RawScriptEntry {
    /// Sample to trigger, or the sound to stop for stop commands.
    pub sfx_id: u16,
    /// Delay in 1/30 s ticks from the start of the script.
    pub delay: u16,
    pub volume: u8,
    /// 255 for positional playback.
    pub pan: u8,
    pub pitch: u16,
    pub flags: u8,
}

impl RawScriptEntry {
    pub const LOOP: u8 = 0x01;
    pub const STOP: u8 = 0x02;
    pub const STOP_FROM_SOURCE: u8 = 0x04;
    pub const NO_PAN: u8 = 255;
}

/// What a script entry does when its delay elapses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptAction {
    /// Start a sample on a new layer.
    Play(SfxId),
    /// Stop every instance of a sound, optionally limited to the script's source.
    Stop { sfx: SfxId, from_source: bool },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScriptEntry {
    pub action: ScriptAction,
    /// Seconds from the start of the script.
    pub delay: f32,
    pub volume: f32,
    /// Fixed stereo pan in [-0.5, 0.5], overriding positional playback.
    pub pan: Option<f32>,
    pub pitch: f32,
    pub looping: bool,
}

impl ScriptEntry {
    pub fn from_raw(raw: RawScriptEntry, initial_volume: u8) -> ScriptEntry {
        let action = if raw.flags & RawScriptEntry::STOP != 0 {
            ScriptAction::Stop {
                sfx: SfxId(raw.sfx_id),
                from_source: raw.flags & RawScriptEntry::STOP_FROM_SOURCE != 0,
            }
        } else {
            ScriptAction::Play(SfxId::sample(raw.sfx_id))
        };

        let pan = match raw.pan {
            RawScriptEntry::NO_PAN => None,
            raw_pan => {
                // 127 is treated as hard right.
                let raw_pan = if raw_pan == 127 { 128 } else { raw_pan as i32 };
                Some(((raw_pan - 64) as f32 / 64.0 / 2.0).clamp(-0.5, 0.5))
            }
        };

        ScriptEntry {
            action,
            delay: raw.delay as f32 / 30.0,
            volume: raw.volume as f32 / MAX_VOLUME * initial_volume as f32 / MAX_VOLUME,
            pan,
            pitch: pitch::ratio(raw.pitch),
            looping: raw.flags & RawScriptEntry::LOOP != 0,
        }
    }
}

/// A pre-authored timeline of sample triggers.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ScriptFile {
    pub name: String,
    pub initial_volume: u8,
    /// Entries sorted by delay.
    pub entries: Vec<ScriptEntry>,
}

impl ScriptFile {
    pub fn from_raw(name: &str, initial_volume: u8, raw: &[RawScriptEntry]) -> ScriptFile {
        let mut entries: Vec<ScriptEntry> = raw
            .iter()
            .map(|entry| ScriptEntry::from_raw(*entry, initial_volume))
            .collect();
        entries.sort_by(|a, b| a.delay.total_cmp(&b.delay));
        ScriptFile {
            name: name.to_string(),
            initial_volume,
            entries,
        }
    }
}

/// Every record the engine can play.
#[derive(Debug, Clone, Default)]
pub struct SoundBank {
    pub samples: Vec<Sample>,
    pub streams: Vec<Stream>,
    pub dgn: Vec<DgnFile>,
    pub scripts: Vec<ScriptFile>,
    pub ranges: Vec<RangeEntry>,
}

impl SoundBank {
    pub fn sample(&self, id: SfxId) -> Option<&Sample> {
        match id.kind()? {
            SfxKind::Sample => self.samples.get(id.index()),
            _ => None,
        }
    }

    pub fn dgn(&self, id: SfxId) -> Option<&DgnFile> {
        match id.kind()? {
            SfxKind::Dgn => self.dgn.get(id.index()),
            _ => None,
        }
    }

    pub fn script(&self, id: SfxId) -> Option<&ScriptFile> {
        match id.kind()? {
            SfxKind::Script => self.scripts.get(id.index()),
            _ => None,
        }
    }

    pub fn stream(&self, index: usize) -> Option<&Stream> {
        self.streams.get(index)
    }

    pub fn range(&self, index: usize) -> Option<&RangeEntry> {
        self.ranges.get(index)
    }

    /// Returns true if the id refers to a record in the bank.
    pub fn contains(&self, id: SfxId) -> bool {
        match id.kind() {
            Some(SfxKind::Sample) => self.samples.len() > id.index(),
            Some(SfxKind::Dgn) => self.dgn.len() > id.index(),
            Some(SfxKind::Script) => self.scripts.len() > id.index(),
            None => false,
        }
    }
}
