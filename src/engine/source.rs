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

//! Registry of positioned sound emitters.

use glam::Vec3;

use crate::{audio::Listener, bank::RangeEntry};

/// Identifies a registered sound source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SourceId(pub u32);

/// How a source's distance falloff is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceRange {
    /// Pinned in front of the listener with no falloff.
    Listener,
    /// Falloff from the indexed range entry.
    Entry(usize),
}

/// Position and falloff of an emitter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Spatial {
    pub position: Vec3,
    pub reference_distance: f32,
    pub max_distance: f32,
    pub rolloff: f32,
}

impl Default for Spatial {
    fn default() -> Self {
        Spatial {
            position: Vec3::ZERO,
            reference_distance: 1.0,
            max_distance: f32::MAX,
            rolloff: 1.0,
        }
    }
}

impl Spatial {
    /// An emitter at `position` using `range` for falloff.
    pub fn at(position: Vec3, range: &RangeEntry) -> Spatial {
        Spatial {
            position,
            reference_distance: range.reference_distance,
            max_distance: range.max_distance,
            rolloff: 1.0,
        }
    }

    /// An emitter just in front of the listener that never attenuates.
    pub fn in_front_of(listener: &Listener) -> Spatial {
        Spatial {
            position: listener.position + listener.facing,
            reference_distance: f32::MAX,
            max_distance: f32::MAX,
            rolloff: 1.0,
        }
    }

    /// An emitter on the listener that never attenuates.
    pub fn on(listener: &Listener) -> Spatial {
        Spatial {
            position: listener.position,
            ..Spatial::in_front_of(listener)
        }
    }

    pub fn distance_squared(&self, point: Vec3) -> f32 {
        self.position.distance_squared(point)
    }
}

/// What an instance's position follows.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Emitter {
    /// No source; always heard at the listener.
    Listener,
    /// A registered source, refreshed every frame unless the instance opts out.
    Source(SourceId),
    /// A fixed position set by the engine.
    Fixed(Spatial),
}

impl Emitter {
    pub fn source(&self) -> Option<SourceId> {
        match self {
            Emitter::Source(id) => Some(*id),
            _ => None,
        }
    }
}

/// Sources indexed by [`SourceId`]. Removed ids are reused.
#[derive(Debug, Default)]
pub struct SourceRegistry {
    sources: Vec<Option<Spatial>>,
}

impl SourceRegistry {
    pub fn new() -> SourceRegistry {
        SourceRegistry::default()
    }

    /// Registers a source at the origin with default falloff.
    pub fn create(&mut self) -> SourceId {
        match self.sources.iter().position(Option::is_none) {
            Some(index) => {
                self.sources[index] = Some(Spatial::default());
                SourceId(index as u32)
            }
            None => {
                self.sources.push(Some(Spatial::default()));
                SourceId(self.sources.len() as u32 - 1)
            }
        }
    }

    /// Replaces a source's spatial parameters. Returns false for unknown ids.
    pub fn update(&mut self, id: SourceId, spatial: Spatial) -> bool {
        match self.sources.get_mut(id.0 as usize) {
            Some(Some(source)) => {
                *source = spatial;
                true
            }
            _ => false,
        }
    }

    pub fn remove(&mut self, id: SourceId) -> bool {
        match self.sources.get_mut(id.0 as usize) {
            Some(source) if source.is_some() => {
                *source = None;
                true
            }
            _ => false,
        }
    }

    pub fn get(&self, id: SourceId) -> Option<&Spatial> {
        self.sources.get(id.0 as usize)?.as_ref()
    }

    pub fn len(&self) -> usize {
        self.sources.iter().flatten().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_reuses_ids() {
        let mut registry = SourceRegistry::new();
        let a = registry.create();
        let b = registry.create();
        assert_ne!(a, b);
        assert_eq!(registry.len(), 2);

        assert!(registry.remove(a));
        assert!(!registry.remove(a));
        assert!(registry.get(a).is_none());
        assert!(!registry.update(a, Spatial::default()));

        let c = registry.create();
        assert_eq!(c, a);
        assert_eq!(registry.get(c), Some(&Spatial::default()));
    }

    #[test]
    fn test_spatial_constructors() {
        let range = RangeEntry::from_raw(4096, 4096 * 20);
        let spatial = Spatial::at(Vec3::new(1.0, 2.0, 3.0), &range);
        assert_eq!(spatial.reference_distance, 1.0);
        assert_eq!(spatial.max_distance, 20.0);

        let listener = Listener {
            position: Vec3::new(5.0, 0.0, 0.0),
            ..Default::default()
        };
        let front = Spatial::in_front_of(&listener);
        assert_eq!(front.position, Vec3::new(5.0, 0.0, -1.0));
        assert_eq!(front.reference_distance, f32::MAX);
        assert_eq!(Spatial::on(&listener).position, listener.position);
        assert_eq!(front.distance_squared(listener.position), 1.0);
    }

    #[test]
    fn test_emitter_source() {
        assert_eq!(Emitter::Source(SourceId(4)).source(), Some(SourceId(4)));
        assert_eq!(Emitter::Listener.source(), None);
        assert_eq!(Emitter::Fixed(Spatial::default()).source(), None);
    }
}
