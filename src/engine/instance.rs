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

//! Logical sound instances and the fixed pool they are claimed from.

use std::fmt;

use super::source::{Emitter, SourceId, Spatial};
use crate::bank::SfxId;

/// Number of instances that may exist at once.
pub const INSTANCE_CAPACITY: usize = 128;

/// Most layers a single instance can sound at once.
pub const MAX_LAYERS: usize = 12;

/// Identifies one started instance. Never reused within a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle(pub u32);

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceState {
    Free,
    /// Claimed but no layer has started yet.
    Armed,
    Active,
}

/// One sample sounding on one voice.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Layer {
    /// Index of the sample in the bank.
    pub sample: usize,
    /// Slot in the voice pool.
    pub voice: usize,
    pub volume: f32,
    pub pitch: f32,
    pub looping: bool,
    /// Fixed stereo pan replacing positional playback.
    pub pan: Option<f32>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum InstanceKind {
    Sample,
    /// Layer slot `i` belongs to layer `i` of the dynamic sound.
    Dgn { amount_a: f32, amount_b: f32 },
    /// `next_entry` is the first script entry not yet executed.
    Script { next_entry: usize },
}

#[derive(Debug, Clone)]
pub struct Instance {
    pub sfx: SfxId,
    pub handle: Handle,
    pub emitter: Emitter,
    /// Where the instance was started. Used instead of the live source when `no_update` is set.
    pub anchor: Spatial,
    /// Seconds since the instance was claimed. Negative when free.
    pub play_time: f32,
    pub looping: bool,
    pub cancellable: bool,
    pub no_update: bool,
    pub kind: InstanceKind,
    started: bool,
    layers: [Option<Layer>; MAX_LAYERS],
}

impl Default for Instance {
    fn default() -> Self {
        Instance {
            sfx: SfxId(0),
            handle: Handle(0),
            emitter: Emitter::Listener,
            anchor: Spatial::default(),
            play_time: -1.0,
            looping: false,
            cancellable: false,
            no_update: false,
            kind: InstanceKind::Sample,
            started: false,
            layers: [None; MAX_LAYERS],
        }
    }
}

impl Instance {
    pub fn state(&self) -> InstanceState {
        if self.play_time < 0.0 {
            InstanceState::Free
        } else if self.started {
            InstanceState::Active
        } else {
            InstanceState::Armed
        }
    }

    pub fn is_free(&self) -> bool {
        self.state() == InstanceState::Free
    }

    pub fn source(&self) -> Option<SourceId> {
        self.emitter.source()
    }

    pub fn layer(&self, index: usize) -> Option<&Layer> {
        self.layers.get(index)?.as_ref()
    }

    pub fn layer_mut(&mut self, index: usize) -> Option<&mut Layer> {
        self.layers.get_mut(index)?.as_mut()
    }

    /// Bound layers with their slot index.
    pub fn layers(&self) -> impl Iterator<Item = (usize, &Layer)> {
        self.layers
            .iter()
            .enumerate()
            .filter_map(|(index, layer)| layer.as_ref().map(|layer| (index, layer)))
    }

    pub fn layer_count(&self) -> usize {
        self.layers.iter().flatten().count()
    }

    /// First unbound layer slot.
    pub fn free_layer(&self) -> Option<usize> {
        self.layers.iter().position(Option::is_none)
    }

    /// Binds a layer into the given slot. Returns false if the slot is out of range or taken.
    pub fn set_layer(&mut self, index: usize, layer: Layer) -> bool {
        match self.layers.get_mut(index) {
            Some(slot) if slot.is_none() => {
                *slot = Some(layer);
                self.started = true;
                true
            }
            _ => false,
        }
    }

    pub fn take_layer(&mut self, index: usize) -> Option<Layer> {
        self.layers.get_mut(index)?.take()
    }

    /// Unbinds every layer, returning them for release.
    pub fn take_layers(&mut self) -> Vec<Layer> {
        self.layers.iter_mut().filter_map(Option::take).collect()
    }
}

/// Parameters fixed when an instance is claimed.
#[derive(Debug, Clone, Copy)]
pub struct Arming {
    pub sfx: SfxId,
    pub emitter: Emitter,
    pub anchor: Spatial,
    pub looping: bool,
    pub cancellable: bool,
    pub no_update: bool,
    pub kind: InstanceKind,
}

#[derive(Debug)]
pub struct InstancePool {
    slots: Vec<Instance>,
    next_handle: u32,
}

impl InstancePool {
    pub fn new(capacity: usize) -> InstancePool {
        InstancePool {
            slots: vec![Instance::default(); capacity],
            next_handle: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn get(&self, slot: usize) -> Option<&Instance> {
        self.slots.get(slot)
    }

    pub fn get_mut(&mut self, slot: usize) -> Option<&mut Instance> {
        self.slots.get_mut(slot)
    }

    /// Claimed instances with their slot index.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &Instance)> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, instance)| !instance.is_free())
    }

    /// Slots of claimed instances matching the predicate.
    pub fn slots_where(&self, predicate: impl Fn(&Instance) -> bool) -> Vec<usize> {
        self.iter()
            .filter(|(_, instance)| predicate(instance))
            .map(|(slot, _)| slot)
            .collect()
    }

    pub fn in_use_count(&self) -> usize {
        self.iter().count()
    }

    pub fn find_handle(&self, handle: Handle) -> Option<usize> {
        self.iter()
            .find(|(_, instance)| instance.handle == handle)
            .map(|(slot, _)| slot)
    }

    /// An instance of `sfx` that started at most `recency` seconds ago. When `source` is
    /// given only its instances match.
    pub fn find_recent(&self, sfx: SfxId, source: Option<SourceId>, recency: f32) -> Option<usize> {
        self.iter()
            .find(|(_, instance)| {
                source.is_none_or(|source| instance.source() == Some(source))
                    && instance.sfx == sfx
                    && instance.play_time <= recency
            })
            .map(|(slot, _)| slot)
    }

    /// Picks the slot for a new instance: the first free slot, otherwise the instance that
    /// has played longest, preferring one tied to `source`. Ties go to the earliest slot.
    pub fn choose_slot(&self, source: Option<SourceId>) -> usize {
        if let Some(slot) = self.slots.iter().position(Instance::is_free) {
            return slot;
        }

        let oldest = |candidates: &mut dyn Iterator<Item = (usize, &Instance)>| {
            candidates
                .min_by(|(_, a), (_, b)| b.play_time.total_cmp(&a.play_time))
                .map(|(slot, _)| slot)
        };
        source
            .and_then(|source| {
                oldest(
                    &mut self
                        .slots
                        .iter()
                        .enumerate()
                        .filter(|(_, instance)| instance.source() == Some(source)),
                )
            })
            .or_else(|| oldest(&mut self.slots.iter().enumerate()))
            .unwrap_or_default()
    }

    /// Claims a slot. The slot's previous layers must already be released.
    pub fn arm(&mut self, slot: usize, arming: Arming) -> Handle {
        let handle = Handle(self.next_handle);
        self.next_handle = self.next_handle.wrapping_add(1);

        let instance = &mut self.slots[slot];
        debug_assert_eq!(instance.layer_count(), 0, "armed slot {slot} still has layers");
        *instance = Instance {
            sfx: arming.sfx,
            handle,
            emitter: arming.emitter,
            anchor: arming.anchor,
            play_time: 0.0,
            looping: arming.looping,
            cancellable: arming.cancellable,
            no_update: arming.no_update,
            kind: arming.kind,
            started: false,
            layers: [None; MAX_LAYERS],
        };
        handle
    }

    /// Returns a slot to the free pool. Its layers must already be released.
    pub fn free(&mut self, slot: usize) {
        if let Some(instance) = self.slots.get_mut(slot) {
            debug_assert_eq!(instance.layer_count(), 0, "freed slot {slot} still has layers");
            *instance = Instance::default();
        }
    }
}
