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

//! Fixed-capacity pools of device buffers and voices.
//!
//! Both pools are created once at load and only rebound afterwards.

use tracing::debug;

use crate::audio::{BufferId, Device, DeviceError, VoiceId};

/// Number of sample buffers.
pub const BUFFER_CAPACITY: usize = 64;

/// Number of voices.
pub const VOICE_CAPACITY: usize = 128;

#[derive(Debug, Clone)]
struct BufferSlot {
    id: BufferId,
    /// Index of the sample whose PCM is resident.
    owner: Option<usize>,
    /// Bind order, for picking the least recently bound buffer.
    bound_at: u64,
}

/// Result of asking for a sample's buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferClaim {
    /// The sample is already resident.
    Resident(usize),
    /// The slot now belongs to the sample and its PCM must be uploaded.
    Rebound {
        slot: usize,
        previous: Option<usize>,
    },
    /// Every buffer belongs to a referenced sample.
    Exhausted,
}

/// Device buffers keyed by owning sample.
#[derive(Debug)]
pub struct BufferPool {
    slots: Vec<BufferSlot>,
    clock: u64,
}

impl BufferPool {
    /// Creates `capacity` buffers on the device.
    pub fn new<D: Device + ?Sized>(device: &mut D, capacity: usize) -> Result<Self, DeviceError> {
        let slots = (0..capacity)
            .map(|_| {
                Ok(BufferSlot {
                    id: device.create_buffer()?,
                    owner: None,
                    bound_at: 0,
                })
            })
            .collect::<Result<Vec<_>, DeviceError>>()?;
        Ok(BufferPool { slots, clock: 0 })
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn buffer_id(&self, slot: usize) -> BufferId {
        self.slots[slot].id
    }

    /// The slot holding the sample's PCM, if resident.
    pub fn slot_of(&self, sample: usize) -> Option<usize> {
        self.slots.iter().position(|slot| slot.owner == Some(sample))
    }

    pub fn owner(&self, slot: usize) -> Option<usize> {
        self.slots.get(slot)?.owner
    }

    /// Number of buffers holding a sample.
    pub fn bound_count(&self) -> usize {
        self.slots.iter().filter(|slot| slot.owner.is_some()).count()
    }

    /// Forgets the slot's sample. The next claim for it uploads again.
    pub fn unbind(&mut self, slot: usize) {
        if let Some(entry) = self.slots.get_mut(slot) {
            entry.owner = None;
        }
    }

    /// The owner bound longest ago among those `eligible` accepts.
    pub fn oldest_owner(&self, eligible: impl Fn(usize) -> bool) -> Option<usize> {
        self.slots
            .iter()
            .filter_map(|slot| Some((slot.bound_at, slot.owner?)))
            .filter(|(_, owner)| eligible(*owner))
            .min_by_key(|(bound_at, _)| *bound_at)
            .map(|(_, owner)| owner)
    }

    /// Finds a buffer for `sample`: its resident buffer, else a free one, else the least
    /// recently bound buffer whose owner is unreferenced.
    pub fn claim(&mut self, sample: usize, references: impl Fn(usize) -> u32) -> BufferClaim {
        if let Some(slot) = self.slot_of(sample) {
            return BufferClaim::Resident(slot);
        }

        let candidate = self
            .slots
            .iter()
            .position(|slot| slot.owner.is_none())
            .or_else(|| {
                self.slots
                    .iter()
                    .enumerate()
                    .filter(|(_, slot)| slot.owner.is_some_and(|owner| references(owner) == 0))
                    .min_by_key(|(_, slot)| slot.bound_at)
                    .map(|(index, _)| index)
            });

        match candidate {
            Some(slot) => {
                self.clock += 1;
                let entry = &mut self.slots[slot];
                let previous = entry.owner.replace(sample);
                entry.bound_at = self.clock;
                debug!(sample, slot, previous, "Bound sample to buffer.");
                BufferClaim::Rebound { slot, previous }
            }
            None => BufferClaim::Exhausted,
        }
    }
}

#[derive(Debug, Clone)]
struct VoiceSlot {
    id: VoiceId,
    bound: Option<BufferId>,
    in_use: bool,
}

/// Device voices, reused preferentially against their last bound buffer.
#[derive(Debug)]
pub struct VoicePool {
    slots: Vec<VoiceSlot>,
}

/// A voice handed out by the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VoiceClaim {
    pub slot: usize,
    pub voice: VoiceId,
    /// The voice was bound to another buffer and must be rebound.
    pub needs_bind: bool,
}

impl VoicePool {
    /// Creates `capacity` voices on the device.
    pub fn new<D: Device + ?Sized>(device: &mut D, capacity: usize) -> Result<Self, DeviceError> {
        let slots = (0..capacity)
            .map(|_| {
                Ok(VoiceSlot {
                    id: device.create_voice()?,
                    bound: None,
                    in_use: false,
                })
            })
            .collect::<Result<Vec<_>, DeviceError>>()?;
        Ok(VoicePool { slots })
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn voice_id(&self, slot: usize) -> VoiceId {
        self.slots[slot].id
    }

    pub fn in_use_count(&self) -> usize {
        self.slots.iter().filter(|slot| slot.in_use).count()
    }

    /// Claims a free voice, preferring one already bound to `buffer`.
    pub fn acquire(&mut self, buffer: BufferId) -> Option<VoiceClaim> {
        let slot = self
            .slots
            .iter()
            .position(|slot| !slot.in_use && slot.bound == Some(buffer))
            .or_else(|| self.slots.iter().position(|slot| !slot.in_use))?;

        let entry = &mut self.slots[slot];
        let needs_bind = entry.bound != Some(buffer);
        entry.bound = Some(buffer);
        entry.in_use = true;
        Some(VoiceClaim {
            slot,
            voice: entry.id,
            needs_bind,
        })
    }

    /// Returns a voice to the pool. It stays bound to its buffer.
    pub fn release(&mut self, slot: usize) {
        if let Some(entry) = self.slots.get_mut(slot) {
            debug_assert!(entry.in_use, "voice {slot} released twice");
            entry.in_use = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::mock;

    fn pools(buffers: usize, voices: usize) -> (mock::Device, BufferPool, VoicePool) {
        let mut device = mock::Device::get("mock-pool");
        let buffer_pool = BufferPool::new(&mut device, buffers).unwrap();
        let voice_pool = VoicePool::new(&mut device, voices).unwrap();
        (device, buffer_pool, voice_pool)
    }

    #[test]
    fn test_pools_create_device_resources() {
        let (device, buffers, voices) = pools(BUFFER_CAPACITY, VOICE_CAPACITY);
        assert_eq!(device.buffer_count(), 64);
        assert_eq!(device.voice_count(), 128);
        assert_eq!(buffers.capacity(), 64);
        assert_eq!(voices.capacity(), 128);
    }

    #[test]
    fn test_buffer_reuse_and_rebind() {
        let (_, mut buffers, _) = pools(2, 0);
        let refs = |_: usize| 1;

        assert_eq!(
            buffers.claim(7, refs),
            BufferClaim::Rebound {
                slot: 0,
                previous: None
            }
        );
        assert_eq!(buffers.claim(7, refs), BufferClaim::Resident(0));
        assert_eq!(
            buffers.claim(8, refs),
            BufferClaim::Rebound {
                slot: 1,
                previous: None
            }
        );

        // Both owners referenced: nothing can be rebound.
        assert_eq!(buffers.claim(9, refs), BufferClaim::Exhausted);
        assert_eq!(buffers.oldest_owner(|_| true), Some(7));
        assert_eq!(buffers.oldest_owner(|owner| owner != 7), Some(8));
        assert_eq!(buffers.oldest_owner(|_| false), None);

        // Sample 8 is unreferenced and gets evicted even though 7 is older.
        let refs = |sample: usize| if sample == 8 { 0 } else { 1 };
        assert_eq!(
            buffers.claim(9, refs),
            BufferClaim::Rebound {
                slot: 1,
                previous: Some(8)
            }
        );
        assert_eq!(buffers.slot_of(8), None);
        assert_eq!(buffers.owner(1), Some(9));
        assert_eq!(buffers.bound_count(), 2);
    }

    #[test]
    fn test_least_recently_bound_unreferenced_buffer() {
        let (_, mut buffers, _) = pools(3, 0);
        let none = |_: usize| 0;
        for sample in 0..3 {
            buffers.claim(sample, none);
        }
        assert_eq!(
            buffers.claim(3, none),
            BufferClaim::Rebound {
                slot: 0,
                previous: Some(0)
            }
        );
        assert_eq!(
            buffers.claim(4, none),
            BufferClaim::Rebound {
                slot: 1,
                previous: Some(1)
            }
        );
    }

    #[test]
    fn test_unbind_forces_upload() {
        let (_, mut buffers, _) = pools(2, 0);
        let none = |_: usize| 0;
        buffers.claim(3, none);
        buffers.unbind(0);
        assert_eq!(buffers.slot_of(3), None);
        assert_eq!(buffers.bound_count(), 0);
        assert_eq!(
            buffers.claim(3, none),
            BufferClaim::Rebound {
                slot: 0,
                previous: None
            }
        );
    }

    #[test]
    fn test_voice_prefers_bound_buffer() {
        let (_, _, mut voices) = pools(0, 3);
        let a = BufferId(10);
        let b = BufferId(11);

        let first = voices.acquire(a).unwrap();
        assert!(first.needs_bind);
        let second = voices.acquire(b).unwrap();
        voices.release(first.slot);
        voices.release(second.slot);

        let again = voices.acquire(b).unwrap();
        assert_eq!(again.slot, second.slot);
        assert!(!again.needs_bind);
        assert_eq!(voices.in_use_count(), 1);
    }

    #[test]
    fn test_voice_exhaustion() {
        let (_, _, mut voices) = pools(0, 2);
        assert!(voices.acquire(BufferId(0)).is_some());
        assert!(voices.acquire(BufferId(0)).is_some());
        assert!(voices.acquire(BufferId(0)).is_none());
        assert_eq!(voices.in_use_count(), 2);
    }
}
