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

//! Ambient sounds shared by many emitters.
//!
//! Every emitter of an ambient sound notifies its slot each frame. The slot keeps only the
//! emitter nearest the listener, and the engine plays one looping instance from there.

use glam::Vec3;

use super::{instance::Handle, source::Spatial};
use crate::bank::SfxId;

/// Number of environment slots.
pub const SLOT_COUNT: usize = 10;

#[derive(Debug, Clone, Default)]
struct Slot {
    sfx: Option<SfxId>,
    /// Squared listener distance and parameters of the nearest emitter this frame.
    nearest: Option<(f32, Spatial)>,
    hits: u32,
    handle: Option<Handle>,
}

/// What the engine should do with a slot this frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SlotAction {
    /// Make sure the sound plays from `spatial`. `handle` is the instance playing now, if any.
    Refresh {
        slot: usize,
        sfx: SfxId,
        spatial: Spatial,
        handle: Option<Handle>,
    },
    /// Nothing was notified; stop the slot's instance.
    Silence { slot: usize, handle: Handle },
}

#[derive(Debug)]
pub struct Environment {
    slots: [Slot; SLOT_COUNT],
}

impl Default for Environment {
    fn default() -> Self {
        Environment {
            slots: std::array::from_fn(|_| Slot::default()),
        }
    }
}

impl Environment {
    pub fn new(sounds: &[SfxId]) -> Environment {
        let mut environment = Environment::default();
        for (slot, sfx) in sounds.iter().take(SLOT_COUNT).enumerate() {
            environment.slots[slot].sfx = Some(*sfx);
        }
        environment
    }

    /// Assigns the sound for a slot. Returns the handle of the instance the slot was
    /// playing, which the caller must stop.
    pub fn assign(&mut self, slot: usize, sfx: Option<SfxId>) -> Option<Handle> {
        let entry = self.slots.get_mut(slot)?;
        entry.sfx = sfx;
        entry.nearest = None;
        entry.hits = 0;
        entry.handle.take()
    }

    pub fn sfx(&self, slot: usize) -> Option<SfxId> {
        self.slots.get(slot)?.sfx
    }

    pub fn handle(&self, slot: usize) -> Option<Handle> {
        self.slots.get(slot)?.handle
    }

    pub fn hits(&self, slot: usize) -> u32 {
        self.slots.get(slot).map(|slot| slot.hits).unwrap_or(0)
    }

    /// Records an emitter for this frame. Returns false for an unknown or unassigned slot.
    pub fn notify(&mut self, slot: usize, spatial: Spatial, listener: Vec3) -> bool {
        let Some(entry) = self.slots.get_mut(slot) else {
            return false;
        };
        if entry.sfx.is_none() {
            return false;
        }

        entry.hits += 1;
        let distance = spatial.distance_squared(listener);
        if entry.nearest.is_none_or(|(nearest, _)| distance < nearest) {
            entry.nearest = Some((distance, spatial));
        }
        true
    }

    /// Collects this frame's actions and resets the per-frame counters.
    pub fn drain(&mut self) -> Vec<SlotAction> {
        let mut actions = Vec::new();
        for (index, slot) in self.slots.iter_mut().enumerate() {
            let nearest = slot.nearest.take();
            let hits = std::mem::take(&mut slot.hits);
            match (slot.sfx, nearest) {
                (Some(sfx), Some((_, spatial))) if hits > 0 => {
                    actions.push(SlotAction::Refresh {
                        slot: index,
                        sfx,
                        spatial,
                        handle: slot.handle,
                    })
                }
                _ => {
                    if let Some(handle) = slot.handle.take() {
                        actions.push(SlotAction::Silence {
                            slot: index,
                            handle,
                        });
                    }
                }
            }
        }
        actions
    }

    /// Records the instance now playing for a slot.
    pub fn set_handle(&mut self, slot: usize, handle: Option<Handle>) {
        if let Some(entry) = self.slots.get_mut(slot) {
            entry.handle = handle;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(x: f32) -> Spatial {
        Spatial {
            position: Vec3::new(x, 0.0, 0.0),
            ..Default::default()
        }
    }

    #[test]
    fn test_nearest_emitter_wins() {
        let mut environment = Environment::new(&[SfxId(3)]);
        assert!(environment.notify(0, at(5.0), Vec3::ZERO));
        assert!(environment.notify(0, at(-2.0), Vec3::ZERO));
        assert!(environment.notify(0, at(4.0), Vec3::ZERO));
        assert_eq!(environment.hits(0), 3);

        assert_eq!(
            environment.drain(),
            vec![SlotAction::Refresh {
                slot: 0,
                sfx: SfxId(3),
                spatial: at(-2.0),
                handle: None
            }]
        );
        assert_eq!(environment.hits(0), 0);
        assert!(environment.drain().is_empty());
    }

    #[test]
    fn test_silence_after_quiet_frame() {
        let mut environment = Environment::new(&[SfxId(3), SfxId(4)]);
        environment.notify(1, at(1.0), Vec3::ZERO);
        environment.drain();
        environment.set_handle(1, Some(Handle(9)));

        environment.notify(1, at(1.0), Vec3::ZERO);
        assert_eq!(
            environment.drain(),
            vec![SlotAction::Refresh {
                slot: 1,
                sfx: SfxId(4),
                spatial: at(1.0),
                handle: Some(Handle(9))
            }]
        );

        assert_eq!(
            environment.drain(),
            vec![SlotAction::Silence {
                slot: 1,
                handle: Handle(9)
            }]
        );
        assert_eq!(environment.handle(1), None);
    }

    #[test]
    fn test_unassigned_slots() {
        let mut environment = Environment::new(&[SfxId(3)]);
        assert!(!environment.notify(1, at(1.0), Vec3::ZERO));
        assert!(!environment.notify(SLOT_COUNT, at(1.0), Vec3::ZERO));

        environment.set_handle(0, Some(Handle(2)));
        assert_eq!(environment.assign(0, Some(SfxId(8))), Some(Handle(2)));
        assert_eq!(environment.sfx(0), Some(SfxId(8)));
        assert_eq!(environment.assign(SLOT_COUNT, None), None);
    }
}
