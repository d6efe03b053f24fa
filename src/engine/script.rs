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

//! Script instances: a timeline of sample triggers and stop commands played as one instance.

use std::ops::Range;

use tracing::{error, warn};

use super::{instance::InstanceKind, Engine, LayerSpec};
use crate::{
    audio::Device,
    bank::{ScriptAction, ScriptEntry, ScriptFile, SfxId},
};

/// Entries of `script` that fall due at `play_time`, starting from the cursor. Entries are
/// sorted by delay, so the range is contiguous.
pub fn due_entries(script: &ScriptFile, next_entry: usize, play_time: f32) -> Range<usize> {
    let start = next_entry.min(script.entries.len());
    let end = start
        + script.entries[start..]
            .iter()
            .take_while(|entry| entry.delay <= play_time)
            .count();
    start..end
}

/// True once every entry has run.
pub fn is_exhausted(script: &ScriptFile, next_entry: usize) -> bool {
    next_entry >= script.entries.len()
}

impl<D: Device> Engine<D> {
    /// Runs one frame of a script instance. Finished layers are released, entries that fell
    /// due run in order, and the instance ends once every entry has run and nothing sounds.
    pub(super) fn update_script(&mut self, slot: usize, dt: f32) {
        let Some(instance) = self.instances.get_mut(slot) else {
            return;
        };
        let InstanceKind::Script { next_entry } = instance.kind else {
            return;
        };
        instance.play_time += dt;
        let (sfx, play_time, source) = (instance.sfx, instance.play_time, instance.source());

        let finished: Vec<usize> = self
            .instances
            .get(slot)
            .into_iter()
            .flat_map(|instance| instance.layers())
            .filter(|(_, layer)| !self.is_layer_playing(layer))
            .map(|(index, _)| index)
            .collect();
        for index in finished {
            if let Some(layer) = self
                .instances
                .get_mut(slot)
                .and_then(|instance| instance.take_layer(index))
            {
                self.release_layer(layer);
            }
        }

        let Some(script) = self.bank.script(sfx) else {
            self.stop_slot(slot);
            return;
        };
        let due = due_entries(script, next_entry, play_time);
        let entries: Vec<ScriptEntry> = script.entries[due.clone()].to_vec();
        let exhausted = is_exhausted(script, due.end);
        if let Some(instance) = self.instances.get_mut(slot) {
            instance.kind = InstanceKind::Script {
                next_entry: due.end,
            };
        }

        let mut stops: Vec<(SfxId, bool)> = Vec::new();
        let mut overflowed = false;
        for entry in entries {
            match entry.action {
                ScriptAction::Play(sample) => {
                    let Some(layer) = self
                        .instances
                        .get(slot)
                        .and_then(|instance| instance.free_layer())
                    else {
                        error!(
                            sfx = %sfx,
                            "Script has more sounding entries than layers, stopping."
                        );
                        overflowed = true;
                        break;
                    };
                    let spec = LayerSpec {
                        sample: sample.index(),
                        volume: entry.volume,
                        pitch: entry.pitch,
                        looping: entry.looping,
                        pan: entry.pan,
                    };
                    if !self.start_layer(slot, layer, spec) {
                        warn!(sfx = %sfx, sample = %sample, "Unable to start script entry.");
                    }
                }
                ScriptAction::Stop {
                    sfx: target,
                    from_source,
                } => stops.push((target, from_source)),
            }
        }

        let silent = self
            .instances
            .get(slot)
            .is_some_and(|instance| instance.layer_count() == 0);
        if overflowed || (exhausted && silent) {
            self.stop_slot(slot);
        } else {
            self.push_params(slot);
        }

        for (target, from_source) in stops {
            match source {
                Some(source) if from_source => self.stop_from_source_by_id(source, target),
                _ => self.stop_by_id(target),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bank::RawScriptEntry;

    fn script(delays: &[u16]) -> ScriptFile {
        let raw: Vec<RawScriptEntry> = delays
            .iter()
            .map(|&delay| RawScriptEntry {
                delay,
                ..Default::default()
            })
            .collect();
        ScriptFile::from_raw("test", 127, &raw)
    }

    #[test]
    fn test_due_entries() {
        let script = script(&[0, 15, 15, 30]);
        assert_eq!(due_entries(&script, 0, 0.0), 0..1);
        assert_eq!(due_entries(&script, 1, 0.4), 1..1);
        assert_eq!(due_entries(&script, 1, 0.5), 1..3);
        assert_eq!(due_entries(&script, 3, 5.0), 3..4);
        assert_eq!(due_entries(&script, 4, 5.0), 4..4);
        assert_eq!(due_entries(&script, 9, 5.0), 4..4);
    }

    #[test]
    fn test_exhaustion() {
        let script = script(&[0, 30]);
        assert!(!is_exhausted(&script, 1));
        assert!(is_exhausted(&script, 2));
        assert!(is_exhausted(&ScriptFile::default(), 0));
    }
}
