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

//! The sound engine: plays samples, dynamic sounds, scripts, ambient environment sounds
//! and background streams through a fixed set of device buffers and voices.
//!
//! The engine is driven by a single caller. Play and stop calls happen between frames and
//! [`Engine::update`] runs once per frame.

use std::sync::Arc;

use glam::Vec3;
use tracing::{debug, error, info, span, warn, Level};

use crate::{
    audio::{
        BufferId, Device, DeviceError, Listener, PcmData, VoiceId, VoiceParams, VoiceState,
        WaveFormat,
    },
    bank::{SfxId, SfxKind, SoundBank, MAX_DGN_LAYERS},
    codec::{DecodeError, LoopRegion},
    config::EngineConfig,
    curve::LayerMix,
};

pub mod environment;
pub mod instance;
pub mod pool;
mod script;
pub mod source;
pub mod stream;

use environment::{Environment, SlotAction};
use instance::{Arming, Instance, InstanceKind, InstancePool, Layer};
pub use instance::{Handle, InstanceState, INSTANCE_CAPACITY, MAX_LAYERS};
use pool::{BufferClaim, BufferPool, VoicePool, BUFFER_CAPACITY, VOICE_CAPACITY};
use source::SourceRegistry;
pub use source::{Emitter, SourceId, SourceRange, Spatial};
use stream::{QueueEvent, StreamQueue};

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Device(#[from] DeviceError),
}

/// How a sound is started.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlayOptions {
    pub looping: bool,
    /// Keep the position the sound started at instead of following its source.
    pub no_update: bool,
    /// Reuse an instance of the same sound started at most this many seconds ago.
    pub recency: Option<f32>,
    /// Only reuse instances of the same source.
    pub source_only: bool,
    /// May be stopped by a non-forced stop of its source.
    pub cancellable: bool,
    /// First control input of a dynamic sound.
    pub amount_a: f32,
    /// Second control input of a dynamic sound.
    pub amount_b: f32,
}

impl Default for PlayOptions {
    fn default() -> Self {
        PlayOptions {
            looping: false,
            no_update: false,
            recency: None,
            source_only: false,
            cancellable: false,
            amount_a: 0.0,
            amount_b: 0.0,
        }
    }
}

impl PlayOptions {
    /// A looping sound plays at most once per source.
    fn normalized(self) -> PlayOptions {
        if self.looping {
            PlayOptions {
                recency: Some(f32::MAX),
                source_only: true,
                ..self
            }
        } else {
            self
        }
    }
}

/// What a play call did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayOutcome {
    Started(Handle),
    /// A matching instance was already playing. Holds its handle.
    Coalesced(Handle),
    Failed,
}

impl PlayOutcome {
    pub fn handle(&self) -> Option<Handle> {
        match self {
            PlayOutcome::Started(handle) | PlayOutcome::Coalesced(handle) => Some(*handle),
            PlayOutcome::Failed => None,
        }
    }
}

/// A layer before it has a voice.
#[derive(Debug, Clone, Copy)]
struct LayerSpec {
    sample: usize,
    volume: f32,
    pitch: f32,
    looping: bool,
    pan: Option<f32>,
}

impl LayerSpec {
    fn on_voice(self, voice: usize) -> Layer {
        Layer {
            sample: self.sample,
            voice,
            volume: self.volume,
            pitch: self.pitch,
            looping: self.looping,
            pan: self.pan,
        }
    }
}

pub struct Engine<D: Device> {
    device: D,
    bank: SoundBank,
    /// Decoded PCM per sample. `None` for samples that failed to decode.
    pcm: Vec<Option<PcmData>>,
    /// Number of layers using each sample.
    references: Vec<u32>,
    buffers: BufferPool,
    voices: VoicePool,
    instances: InstancePool,
    sources: SourceRegistry,
    environment: Environment,
    streams: StreamQueue,
    stream_pcm: Vec<Option<PcmData>>,
    stream_buffer: BufferId,
    stream_voice: VoiceId,
    listener: Listener,
}

impl<D: Device> Engine<D> {
    /// Decodes the bank and creates every device buffer and voice the engine will use.
    pub fn load(
        mut device: D,
        mut bank: SoundBank,
        config: &EngineConfig,
    ) -> Result<Self, EngineError> {
        let span = span!(Level::INFO, "engine load");
        let _enter = span.enter();

        for (index, sample) in bank.samples.iter_mut().enumerate() {
            if u16::try_from(index).is_ok_and(|index| config.rounding_error(index)) {
                sample.rounding_error = true;
            }
        }

        let pcm: Vec<Option<PcmData>> = bank
            .samples
            .iter()
            .enumerate()
            .map(|(index, sample)| {
                let region = sample.loop_region();
                let loop_region = (sample.looping && region.length > 0).then_some(region);
                prepare(index, "sample", sample.decode(), 1, sample.sample_rate, loop_region)
            })
            .collect();
        let stream_pcm: Vec<Option<PcmData>> = bank
            .streams
            .iter()
            .enumerate()
            .map(|(index, stream)| {
                prepare(
                    index,
                    "stream",
                    stream.decode(),
                    stream.channel_count(),
                    stream.sample_rate,
                    stream.loop_region(),
                )
            })
            .collect();

        let buffers = BufferPool::new(&mut device, BUFFER_CAPACITY)?;
        let voices = VoicePool::new(&mut device, VOICE_CAPACITY)?;
        let stream_buffer = device.create_buffer()?;
        let stream_voice = device.create_voice()?;

        info!(
            device = device.to_string(),
            samples = bank.samples.len(),
            decoded = pcm.iter().flatten().count(),
            streams = bank.streams.len(),
            dgn = bank.dgn.len(),
            scripts = bank.scripts.len(),
            "Loaded sound engine."
        );

        Ok(Engine {
            device,
            references: vec![0; bank.samples.len()],
            environment: Environment::new(&config.environment()),
            bank,
            pcm,
            buffers,
            voices,
            instances: InstancePool::new(INSTANCE_CAPACITY),
            sources: SourceRegistry::new(),
            streams: StreamQueue::new(),
            stream_pcm,
            stream_buffer,
            stream_voice,
            listener: Listener::default(),
        })
    }

    /// Stops everything and hands back the device.
    pub fn shutdown(mut self) -> D {
        self.stop_all();
        self.streams.clear();
        info!(device = self.device.to_string(), "Shut down sound engine.");
        self.device
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    pub fn bank(&self) -> &SoundBank {
        &self.bank
    }

    pub fn listener(&self) -> &Listener {
        &self.listener
    }

    /// Sets where sound is heard from. Sent to the device on the next update.
    pub fn set_listener(&mut self, listener: Listener) {
        self.listener = listener;
    }

    pub fn create_source(&mut self) -> SourceId {
        self.sources.create()
    }

    /// Moves a source. Returns false for an unknown source or range entry.
    pub fn update_source(&mut self, id: SourceId, position: Vec3, range: SourceRange) -> bool {
        let spatial = match range {
            SourceRange::Listener => Spatial::in_front_of(&self.listener),
            SourceRange::Entry(index) => match self.bank.range(index) {
                Some(entry) => Spatial::at(position, entry),
                None => {
                    warn!(source = id.0, range = index, "Unknown range entry.");
                    return false;
                }
            },
        };
        self.sources.update(id, spatial)
    }

    /// Stops every instance of the source and unregisters it.
    pub fn remove_source(&mut self, id: SourceId) -> bool {
        for slot in self
            .instances
            .slots_where(|instance| instance.source() == Some(id))
        {
            self.stop_slot(slot);
        }
        self.sources.remove(id)
    }

    /// Plays any kind of sound.
    pub fn play(&mut self, id: SfxId, source: Option<SourceId>, options: PlayOptions) -> PlayOutcome {
        let Some(emitter) = self.emitter(source) else {
            return PlayOutcome::Failed;
        };
        self.start(id, emitter, options.normalized())
    }

    pub fn play_sample(
        &mut self,
        id: SfxId,
        source: Option<SourceId>,
        options: PlayOptions,
    ) -> PlayOutcome {
        if id.kind() != Some(SfxKind::Sample) {
            warn!(sfx = %id, "Not a sample id.");
            return PlayOutcome::Failed;
        }
        self.play(id, source, options)
    }

    /// Plays a sample at the listener with no coalescing.
    pub fn play_free_sample(&mut self, id: SfxId) -> PlayOutcome {
        self.play_sample(id, None, PlayOptions::default())
    }

    pub fn play_dgn(
        &mut self,
        id: SfxId,
        source: Option<SourceId>,
        options: PlayOptions,
    ) -> PlayOutcome {
        if id.kind() != Some(SfxKind::Dgn) {
            warn!(sfx = %id, "Not a dynamic sound id.");
            return PlayOutcome::Failed;
        }
        self.play(id, source, options)
    }

    /// Starts a script. Its entries run from the next update on.
    pub fn play_script(
        &mut self,
        id: SfxId,
        source: Option<SourceId>,
        options: PlayOptions,
    ) -> PlayOutcome {
        if id.kind() != Some(SfxKind::Script) {
            warn!(sfx = %id, "Not a script id.");
            return PlayOutcome::Failed;
        }
        self.play(id, source, options)
    }

    /// Reports an emitter of the slot's ambient sound for this frame.
    pub fn notify_environment(&mut self, slot: usize, source: SourceId) -> bool {
        let Some(spatial) = self.sources.get(source).copied() else {
            warn!(source = source.0, slot, "Unknown source notified environment.");
            return false;
        };
        self.environment.notify(slot, spatial, self.listener.position)
    }

    /// Changes the ambient sound of a slot, stopping what it was playing.
    pub fn set_environment_sfx(&mut self, slot: usize, sfx: Option<SfxId>) {
        if let Some(handle) = self.environment.assign(slot, sfx) {
            self.stop_by_handle(handle);
        }
    }

    /// Queues a background stream. Returns false if the stream is unknown or undecodable,
    /// or the queue is full.
    pub fn queue_stream(&mut self, index: usize, delay: f32, expiration: f32) -> bool {
        if !matches!(self.stream_pcm.get(index), Some(Some(_))) {
            warn!(stream = index, "Cannot queue unavailable stream.");
            return false;
        }
        self.streams.enqueue(index, delay, expiration)
    }

    /// Stops the source's sounds. Without `force` only looping or cancellable sounds stop;
    /// with `force` everything stops except sounds pinned to where they started.
    pub fn stop_from_source(&mut self, source: SourceId, force: bool) {
        for slot in self.instances.slots_where(|instance| {
            instance.source() == Some(source)
                && (force || instance.looping || instance.cancellable)
                && (!force || !instance.no_update)
        }) {
            self.stop_slot(slot);
        }
    }

    pub fn stop_from_source_by_id(&mut self, source: SourceId, id: SfxId) {
        for slot in self
            .instances
            .slots_where(|instance| instance.source() == Some(source) && instance.sfx == id)
        {
            self.stop_slot(slot);
        }
    }

    pub fn stop_by_id(&mut self, id: SfxId) {
        for slot in self.instances.slots_where(|instance| instance.sfx == id) {
            self.stop_slot(slot);
        }
    }

    /// Returns false if no instance has the handle.
    pub fn stop_by_handle(&mut self, handle: Handle) -> bool {
        match self.instances.find_handle(handle) {
            Some(slot) => {
                self.stop_slot(slot);
                true
            }
            None => false,
        }
    }

    /// Stops every instance and the background stream.
    pub fn stop_all(&mut self) {
        for slot in self.instances.slots_where(|_| true) {
            self.stop_slot(slot);
        }
        self.device.stop(self.stream_voice);
    }

    pub fn is_handle_playing(&self, handle: Handle) -> bool {
        self.instances.find_handle(handle).is_some()
    }

    /// Counts instances of the sound, optionally only those of one source.
    pub fn count_playing(&self, id: SfxId, source: Option<SourceId>) -> usize {
        self.instances
            .iter()
            .filter(|(_, instance)| {
                instance.sfx == id && source.is_none_or(|source| instance.source() == Some(source))
            })
            .count()
    }

    pub fn instance(&self, handle: Handle) -> Option<&Instance> {
        self.instances.get(self.instances.find_handle(handle)?)
    }

    pub fn instance_count(&self) -> usize {
        self.instances.in_use_count()
    }

    /// Number of layers currently using the sample.
    pub fn references(&self, sample: usize) -> u32 {
        self.references.get(sample).copied().unwrap_or(0)
    }

    /// Runs one frame.
    pub fn update(&mut self, dt: f32) {
        self.device.set_listener(&self.listener);
        self.update_environment();

        for slot in 0..self.instances.capacity() {
            let Some(instance) = self.instances.get(slot) else {
                continue;
            };
            if instance.is_free() {
                continue;
            }
            match instance.kind {
                InstanceKind::Script { .. } => self.update_script(slot, dt),
                InstanceKind::Sample | InstanceKind::Dgn { .. } => self.update_layered(slot, dt),
            }
        }

        self.update_streams(dt);
    }

    fn emitter(&self, source: Option<SourceId>) -> Option<Emitter> {
        match source {
            Some(id) if self.sources.get(id).is_none() => {
                warn!(source = id.0, "Unknown source.");
                None
            }
            Some(id) => Some(Emitter::Source(id)),
            None => Some(Emitter::Listener),
        }
    }

    /// Plays `id` from `emitter`, reusing a recent instance when `options.recency` is set.
    fn start(&mut self, id: SfxId, emitter: Emitter, options: PlayOptions) -> PlayOutcome {
        if !self.bank.contains(id) {
            warn!(sfx = %id, "Unknown sound id.");
            return PlayOutcome::Failed;
        }

        if let Some(recency) = options.recency {
            let source = if options.source_only {
                emitter.source()
            } else {
                None
            };
            if let Some(slot) = self.instances.find_recent(id, source, recency) {
                return self.coalesce(slot, options);
            }
        }

        match id.kind() {
            Some(SfxKind::Sample) => self.start_sample(id, emitter, options),
            Some(SfxKind::Dgn) => self.start_dgn(id, emitter, options),
            Some(SfxKind::Script) => {
                let kind = InstanceKind::Script { next_entry: 0 };
                let (slot, handle) = self.claim(id, emitter, options, kind);
                debug!(sfx = %id, handle = %handle, slot, "Started script.");
                PlayOutcome::Started(handle)
            }
            None => PlayOutcome::Failed,
        }
    }

    /// Returns the existing instance. Dynamic sounds take the new control inputs.
    fn coalesce(&mut self, slot: usize, options: PlayOptions) -> PlayOutcome {
        let Some(instance) = self.instances.get_mut(slot) else {
            return PlayOutcome::Failed;
        };
        let (sfx, handle) = (instance.sfx, instance.handle);
        if let InstanceKind::Dgn { .. } = instance.kind {
            instance.kind = InstanceKind::Dgn {
                amount_a: options.amount_a,
                amount_b: options.amount_b,
            };
            self.refresh_dgn(slot);
            self.push_params(slot);
        }
        debug!(sfx = %sfx, handle = %handle, slot, "Coalesced play.");
        PlayOutcome::Coalesced(handle)
    }

    fn start_sample(&mut self, id: SfxId, emitter: Emitter, options: PlayOptions) -> PlayOutcome {
        let index = id.index();
        let Some(sample) = self.bank.samples.get(index) else {
            return PlayOutcome::Failed;
        };
        if !matches!(self.pcm.get(index), Some(Some(_))) {
            warn!(sfx = %id, "Sample has no decoded audio.");
            return PlayOutcome::Failed;
        }
        let spec = LayerSpec {
            sample: index,
            volume: sample.volume(),
            pitch: 1.0,
            looping: options.looping,
            pan: None,
        };

        let (slot, handle) = self.claim(id, emitter, options, InstanceKind::Sample);
        if self.start_layer(slot, 0, spec) {
            debug!(sfx = %id, handle = %handle, slot, "Started sample.");
            PlayOutcome::Started(handle)
        } else {
            self.stop_slot(slot);
            PlayOutcome::Failed
        }
    }

    fn start_dgn(&mut self, id: SfxId, emitter: Emitter, options: PlayOptions) -> PlayOutcome {
        let audible = self
            .dgn_mixes(id, options.amount_a, options.amount_b)
            .into_iter()
            .filter(|(_, _, mix)| mix.is_audible())
            .count();
        if audible == 0 {
            debug!(sfx = %id, "No audible layer, not starting dynamic sound.");
            return PlayOutcome::Failed;
        }

        let kind = InstanceKind::Dgn {
            amount_a: options.amount_a,
            amount_b: options.amount_b,
        };
        let (slot, handle) = self.claim(id, emitter, options, kind);
        self.refresh_dgn(slot);
        let started = self
            .instances
            .get(slot)
            .is_some_and(|instance| instance.layer_count() > 0);
        if started {
            debug!(sfx = %id, handle = %handle, slot, "Started dynamic sound.");
            PlayOutcome::Started(handle)
        } else {
            self.stop_slot(slot);
            PlayOutcome::Failed
        }
    }

    /// Per-layer sample and mix of a dynamic sound for the given inputs. Layers without
    /// decoded audio are left out.
    fn dgn_mixes(
        &self,
        id: SfxId,
        amount_a: f32,
        amount_b: f32,
    ) -> Vec<(usize, usize, LayerMix)> {
        let Some(file) = self.bank.dgn(id) else {
            return Vec::new();
        };
        file.layers
            .iter()
            .take(MAX_DGN_LAYERS)
            .enumerate()
            .filter(|(_, layer)| {
                layer.sample.kind() == Some(SfxKind::Sample)
                    && matches!(self.pcm.get(layer.sample.index()), Some(Some(_)))
            })
            .map(|(index, layer)| {
                (
                    index,
                    layer.sample.index(),
                    layer.curves.mix(file.initial_volume, amount_a, amount_b),
                )
            })
            .collect()
    }

    /// Re-evaluates a dynamic sound's layers. Layers that became audible are started.
    fn refresh_dgn(&mut self, slot: usize) {
        let Some(instance) = self.instances.get(slot) else {
            return;
        };
        let InstanceKind::Dgn { amount_a, amount_b } = instance.kind else {
            return;
        };
        let (sfx, looping) = (instance.sfx, instance.looping);

        for (index, sample, mix) in self.dgn_mixes(sfx, amount_a, amount_b) {
            let Some(instance) = self.instances.get_mut(slot) else {
                return;
            };
            match instance.layer_mut(index) {
                Some(layer) => {
                    layer.volume = mix.volume;
                    layer.pitch = mix.pitch;
                }
                None if mix.is_audible() => {
                    let spec = LayerSpec {
                        sample,
                        volume: mix.volume,
                        pitch: mix.pitch,
                        looping,
                        pan: None,
                    };
                    if !self.start_layer(slot, index, spec) {
                        warn!(sfx = %sfx, layer = index, "Unable to start dynamic layer.");
                    }
                }
                None => {}
            }
        }
    }

    /// Claims an instance slot, evicting the oldest instance when the pool is full.
    fn claim(
        &mut self,
        id: SfxId,
        emitter: Emitter,
        options: PlayOptions,
        kind: InstanceKind,
    ) -> (usize, Handle) {
        let slot = self.instances.choose_slot(emitter.source());
        if let Some(victim) = self.instances.get(slot).filter(|instance| !instance.is_free()) {
            warn!(
                sfx = %victim.sfx,
                handle = %victim.handle,
                play_time = victim.play_time,
                "Instance pool full, evicting."
            );
            self.stop_slot(slot);
        }

        let anchor = self.resolve(&emitter, false, &Spatial::default());
        let handle = self.instances.arm(
            slot,
            Arming {
                sfx: id,
                emitter,
                anchor,
                looping: options.looping,
                cancellable: options.cancellable,
                no_update: options.no_update,
                kind,
            },
        );
        (slot, handle)
    }

    /// Where an emitter is now.
    fn resolve(&self, emitter: &Emitter, no_update: bool, anchor: &Spatial) -> Spatial {
        match emitter {
            Emitter::Listener => Spatial::on(&self.listener),
            Emitter::Source(_) if no_update => *anchor,
            Emitter::Source(id) => self.sources.get(*id).copied().unwrap_or(*anchor),
            Emitter::Fixed(spatial) => *spatial,
        }
    }

    fn voice_params(spatial: &Spatial, layer: &Layer) -> VoiceParams {
        VoiceParams {
            gain: layer.volume,
            pitch: layer.pitch,
            position: spatial.position,
            reference_distance: spatial.reference_distance,
            max_distance: spatial.max_distance,
            rolloff: spatial.rolloff,
            relative: false,
            looping: layer.looping,
            pan: layer.pan,
        }
    }

    /// Binds a buffer and voice for the layer and starts it.
    fn start_layer(&mut self, slot: usize, index: usize, spec: LayerSpec) -> bool {
        let Some(buffer_slot) = self.acquire_buffer(spec.sample, slot) else {
            return false;
        };
        let buffer = self.buffers.buffer_id(buffer_slot);

        let claim = match self.voices.acquire(buffer) {
            Some(claim) => claim,
            None => {
                let victim = self
                    .instances
                    .iter()
                    .filter(|(other, instance)| *other != slot && instance.layer_count() > 0)
                    .min_by(|(_, a), (_, b)| b.play_time.total_cmp(&a.play_time))
                    .map(|(other, _)| other);
                if let Some(victim) = victim {
                    warn!(victim, "Voice pool exhausted, evicting oldest instance.");
                    self.stop_slot(victim);
                }
                match self.voices.acquire(buffer) {
                    Some(claim) => claim,
                    None => {
                        error!(sample = spec.sample, "No voice available.");
                        return false;
                    }
                }
            }
        };

        if claim.needs_bind {
            self.device.bind_buffer(claim.voice, Some(buffer));
        }
        if let Some(references) = self.references.get_mut(spec.sample) {
            *references += 1;
        }

        let layer = spec.on_voice(claim.slot);
        let Some(instance) = self.instances.get_mut(slot) else {
            self.release_layer(layer);
            return false;
        };
        if !instance.set_layer(index, layer) {
            error!(slot, layer = index, "Layer slot already bound.");
            self.release_layer(layer);
            return false;
        }
        let (emitter, no_update, anchor) = (instance.emitter, instance.no_update, instance.anchor);
        let spatial = self.resolve(&emitter, no_update, &anchor);
        self.device
            .set_voice_params(claim.voice, &Self::voice_params(&spatial, &layer));
        self.device.play(claim.voice);
        true
    }

    /// Finds the buffer holding the sample, uploading its PCM when the buffer is rebound.
    fn acquire_buffer(&mut self, sample: usize, requester: usize) -> Option<usize> {
        let Some(Some(pcm)) = self.pcm.get(sample) else {
            warn!(sample, "Sample has no decoded audio.");
            return None;
        };
        let pcm = pcm.clone();

        for _ in 0..2 {
            let references = &self.references;
            let claim = self
                .buffers
                .claim(sample, |owner| references.get(owner).copied().unwrap_or(0));
            match claim {
                BufferClaim::Resident(slot) => return Some(slot),
                BufferClaim::Rebound { slot, previous } => {
                    debug!(sample, previous, slot, "Uploading sample.");
                    if let Err(e) = self
                        .device
                        .upload_pcm(self.buffers.buffer_id(slot), pcm.clone())
                    {
                        error!(err = e.to_string(), sample, "Unable to upload sample.");
                        self.buffers.unbind(slot);
                        return None;
                    }
                    return Some(slot);
                }
                BufferClaim::Exhausted => {
                    // Samples the requester sounds itself cannot be freed by stopping others.
                    let held: Vec<usize> = self
                        .instances
                        .get(requester)
                        .into_iter()
                        .flat_map(|instance| instance.layers())
                        .map(|(_, layer)| layer.sample)
                        .collect();
                    let Some(owner) = self.buffers.oldest_owner(|owner| !held.contains(&owner))
                    else {
                        break;
                    };
                    warn!(
                        sample,
                        owner,
                        "Buffer pool exhausted, stopping instances of the oldest sample."
                    );
                    for victim in self.instances.slots_where(|instance| {
                        instance.layers().any(|(_, layer)| layer.sample == owner)
                    }) {
                        self.stop_slot(victim);
                    }
                }
            }
        }
        error!(sample, "No buffer available.");
        None
    }

    fn release_layer(&mut self, layer: Layer) {
        self.device.stop(self.voices.voice_id(layer.voice));
        self.voices.release(layer.voice);
        if let Some(references) = self.references.get_mut(layer.sample) {
            debug_assert!(*references > 0, "sample {} released too often", layer.sample);
            *references = references.saturating_sub(1);
        }
    }

    /// Releases the instance's layers and returns it to the pool.
    fn stop_slot(&mut self, slot: usize) {
        let Some(instance) = self.instances.get_mut(slot) else {
            return;
        };
        if instance.is_free() {
            return;
        }
        let (sfx, handle) = (instance.sfx, instance.handle);
        for layer in instance.take_layers() {
            self.release_layer(layer);
        }
        self.instances.free(slot);
        debug!(sfx = %sfx, handle = %handle, slot, "Stopped instance.");
    }

    /// Pushes position and mix of every layer to the device.
    fn push_params(&mut self, slot: usize) {
        let Some(instance) = self.instances.get(slot) else {
            return;
        };
        let spatial = self.resolve(&instance.emitter, instance.no_update, &instance.anchor);
        for (_, layer) in instance.layers() {
            self.device.set_voice_params(
                self.voices.voice_id(layer.voice),
                &Self::voice_params(&spatial, layer),
            );
        }
    }

    fn is_layer_playing(&self, layer: &Layer) -> bool {
        self.device.state(self.voices.voice_id(layer.voice)) == VoiceState::Playing
    }

    /// Samples and dynamic sounds end once none of their layers is playing.
    fn update_layered(&mut self, slot: usize, dt: f32) {
        let Some(instance) = self.instances.get(slot) else {
            return;
        };
        let playing = instance
            .layers()
            .any(|(_, layer)| self.is_layer_playing(layer));
        if !playing {
            self.stop_slot(slot);
            return;
        }

        if let Some(instance) = self.instances.get_mut(slot) {
            instance.play_time += dt;
        }
        self.refresh_dgn(slot);
        self.push_params(slot);
    }

    fn update_environment(&mut self) {
        for action in self.environment.drain() {
            match action {
                SlotAction::Refresh {
                    slot,
                    sfx,
                    spatial,
                    handle,
                } => match handle.and_then(|handle| self.instances.find_handle(handle)) {
                    Some(index) => {
                        if let Some(instance) = self.instances.get_mut(index) {
                            instance.emitter = Emitter::Fixed(spatial);
                            instance.anchor = spatial;
                        }
                        self.push_params(index);
                    }
                    None => {
                        let options = PlayOptions {
                            looping: true,
                            ..Default::default()
                        };
                        let outcome = self.start(sfx, Emitter::Fixed(spatial), options);
                        debug!(slot, sfx = %sfx, ?outcome, "Started environment sound.");
                        self.environment.set_handle(slot, outcome.handle());
                    }
                },
                SlotAction::Silence { slot, handle } => {
                    debug!(slot, handle = %handle, "Silencing environment sound.");
                    self.stop_by_handle(handle);
                }
            }
        }
    }

    fn update_streams(&mut self, dt: f32) {
        let state = self.device.state(self.stream_voice);
        for event in self.streams.update(dt, state) {
            match event {
                QueueEvent::Finished(stream) => {
                    debug!(stream, "Stream finished.");
                    self.device.stop(self.stream_voice);
                    self.device.bind_buffer(self.stream_voice, None);
                }
                QueueEvent::Start(stream) => self.start_stream(stream),
                QueueEvent::Expired(stream) => debug!(stream, "Stream expired unplayed."),
            }
        }
    }

    fn start_stream(&mut self, index: usize) {
        let (Some(Some(pcm)), Some(stream)) = (self.stream_pcm.get(index), self.bank.stream(index))
        else {
            return;
        };
        if let Err(e) = self.device.upload_pcm(self.stream_buffer, pcm.clone()) {
            error!(err = e.to_string(), stream = index, "Unable to upload stream.");
            return;
        }
        let params = VoiceParams {
            gain: stream.gain(),
            reference_distance: f32::MAX,
            max_distance: f32::MAX,
            relative: true,
            looping: stream.looping,
            ..Default::default()
        };
        self.device.bind_buffer(self.stream_voice, Some(self.stream_buffer));
        self.device.set_voice_params(self.stream_voice, &params);
        self.device.play(self.stream_voice);
        debug!(stream = index, name = stream.name, "Started stream.");
    }
}

/// Wraps decoded audio for upload, logging and skipping records that fail to decode.
fn prepare(
    index: usize,
    kind: &str,
    decoded: Result<Vec<i16>, DecodeError>,
    channels: u16,
    sample_rate: u32,
    loop_region: Option<LoopRegion>,
) -> Option<PcmData> {
    match decoded {
        Ok(samples) => Some(PcmData {
            samples: Arc::from(samples),
            channels,
            sample_rate,
            loop_region,
        }),
        Err(DecodeError::Unsupported(WaveFormat::None)) => {
            debug!(index, kind, "Skipping empty record.");
            None
        }
        Err(e) => {
            warn!(index, kind, err = e.to_string(), "Unable to decode, skipping.");
            None
        }
    }
}
