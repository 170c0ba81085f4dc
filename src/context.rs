//! Contexts: a listener, its sources and its effect slots.
//!
//! All scalar state sits behind one coarse lock which the mixer holds while
//! it mixes the context. Effect slot parameters do not go through it; see
//! [`crate::effect_slot`].

use crate::buffer::Buffer;
use crate::buffer_queue::{Cursor, EntryState};
use crate::effect_slot::{EffectSlot, SlotRuntime};
use crate::effects::EffectRegistry;
use crate::error::{Result, SpatialMixError};
use crate::format::DeviceFormat;
use crate::listener::Listener;
use crate::source::{FilterParams, PlayState, Source, SourceId, SourceProperties};
use crate::source_params::{ContextParams, DistanceModel};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Everything the coarse context lock guards.
#[derive(Debug)]
pub(crate) struct ContextState {
    pub sources: HashMap<SourceId, Source>,
    /// Sources the mixer visits, in play order
    pub active: Vec<SourceId>,
    pub slots: Vec<SlotRuntime>,
    pub listener: Listener,
    pub params: ContextParams,
}

impl ContextState {
    pub fn new(max_sources: usize) -> Self {
        Self {
            sources: HashMap::with_capacity(max_sources),
            active: Vec::with_capacity(max_sources),
            slots: Vec::new(),
            listener: Listener::default(),
            params: ContextParams::default(),
        }
    }

    fn source_mut(&mut self, id: SourceId) -> Result<&mut Source> {
        self.sources
            .get_mut(&id)
            .ok_or_else(|| SpatialMixError::InvalidOperation(format!("Unknown source {}", id)))
    }

    fn activate(&mut self, id: SourceId) {
        if !self.active.contains(&id) {
            self.active.push(id);
        }
    }

    /// Forces every source to Stopped and retires all queued entries.
    pub fn stop_all(&mut self) {
        for source in self.sources.values_mut() {
            if matches!(source.state, PlayState::Playing | PlayState::Paused) {
                source.state = PlayState::Stopped;
            }
            source.queue.mark_all(EntryState::Processed);
        }
        self.active.clear();
    }
}

pub struct Context {
    state: Mutex<ContextState>,
    next_source_id: AtomicU64,
    format: DeviceFormat,
    registry: Arc<EffectRegistry>,
    num_sends: usize,
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("format", &self.format)
            .field("num_sends", &self.num_sends)
            .finish()
    }
}

impl Context {
    pub(crate) fn new(
        format: DeviceFormat,
        registry: Arc<EffectRegistry>,
        num_sends: usize,
        max_sources: usize,
    ) -> Self {
        Self {
            state: Mutex::new(ContextState::new(max_sources)),
            next_source_id: AtomicU64::new(1),
            format,
            registry,
            num_sends,
        }
    }

    /// Takes the coarse lock. A panic on another thread while holding it
    /// leaves plain data behind, so poisoning is ignored.
    pub(crate) fn lock(&self) -> MutexGuard<'_, ContextState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn format(&self) -> DeviceFormat {
        self.format
    }

    pub fn num_sends(&self) -> usize {
        self.num_sends
    }

    // Sources

    pub fn add_source(&self) -> SourceId {
        let id = SourceId(self.next_source_id.fetch_add(1, Ordering::Relaxed));
        self.lock().sources.insert(id, Source::new(id));
        log::debug!("Added {}", id);
        id
    }

    pub fn remove_source(&self, id: SourceId) -> Result<()> {
        let removed = {
            let mut state = self.lock();
            state.active.retain(|active| *active != id);
            state.sources.remove(&id)
        };
        match removed {
            Some(_) => {
                log::debug!("Removed {}", id);
                Ok(())
            }
            None => Err(SpatialMixError::InvalidOperation(format!(
                "Unknown source {}",
                id
            ))),
        }
    }

    pub fn source_ids(&self) -> Vec<SourceId> {
        self.lock().sources.keys().copied().collect()
    }

    pub fn source_properties(&self, id: SourceId) -> Result<SourceProperties> {
        Ok(self.lock().source_mut(id)?.props.clone())
    }

    /// Edits a source's properties. Invalid results are rejected and the
    /// previous values kept.
    pub fn update_source<F>(&self, id: SourceId, edit: F) -> Result<()>
    where
        F: FnOnce(&mut SourceProperties),
    {
        let mut state = self.lock();
        let source = state.source_mut(id)?;
        let mut props = source.props.clone();
        edit(&mut props);
        props.validate()?;
        let replaced = std::mem::replace(&mut source.props, props);
        drop(state);
        drop(replaced);
        Ok(())
    }

    /// Routes send `index` of a source into `slot`, or clears it.
    pub fn set_source_send(
        &self,
        id: SourceId,
        index: usize,
        slot: Option<Arc<EffectSlot>>,
        filter: FilterParams,
    ) -> Result<()> {
        if index >= self.num_sends {
            return Err(SpatialMixError::InvalidOperation(format!(
                "Send {} out of range, device has {}",
                index, self.num_sends
            )));
        }
        let mut state = self.lock();
        if let Some(slot) = &slot {
            if !state.slots.iter().any(|rt| Arc::ptr_eq(rt.slot(), slot)) {
                return Err(SpatialMixError::InvalidOperation(
                    "Effect slot belongs to another context".into(),
                ));
            }
        }
        let source = state.source_mut(id)?;
        source.props.sends[index].slot = slot;
        source.props.sends[index].filter = filter;
        Ok(())
    }

    pub fn source_state(&self, id: SourceId) -> Result<PlayState> {
        Ok(self.lock().source_mut(id)?.state())
    }

    pub fn source_cursor(&self, id: SourceId) -> Result<Cursor> {
        Ok(self.lock().source_mut(id)?.cursor())
    }

    pub fn play(&self, id: SourceId) -> Result<()> {
        let mut state = self.lock();
        state.source_mut(id)?.play();
        state.activate(id);
        Ok(())
    }

    pub fn pause(&self, id: SourceId) -> Result<()> {
        self.lock().source_mut(id)?.pause();
        Ok(())
    }

    pub fn stop(&self, id: SourceId) -> Result<()> {
        self.lock().source_mut(id)?.stop();
        Ok(())
    }

    pub fn rewind(&self, id: SourceId) -> Result<()> {
        self.lock().source_mut(id)?.rewind();
        Ok(())
    }

    /// Appends buffers to a source's queue. `None` entries are allowed and
    /// play as zero-length buffers.
    pub fn queue_buffers(
        &self,
        id: SourceId,
        buffers: impl IntoIterator<Item = Option<Arc<Buffer>>>,
    ) -> Result<()> {
        self.lock().source_mut(id)?.queue.queue(buffers)
    }

    /// Removes entries that have finished playing from the head of a
    /// source's queue.
    pub fn unqueue_processed(&self, id: SourceId) -> Result<Vec<Option<Arc<Buffer>>>> {
        let mut state = self.lock();
        let source = state.source_mut(id)?;
        if source.props.looping && source.is_playing() {
            return Ok(Vec::new());
        }
        Ok(source.queue.unqueue_processed())
    }

    // Listener and context parameters

    pub fn listener(&self) -> Listener {
        self.lock().listener
    }

    pub fn update_listener<F>(&self, edit: F) -> Result<()>
    where
        F: FnOnce(&mut Listener),
    {
        let mut state = self.lock();
        let mut listener = state.listener;
        edit(&mut listener);
        if listener.gain < 0.0 || listener.meters_per_unit <= 0.0 {
            return Err(SpatialMixError::InvalidOperation(
                "Listener gain must be >= 0 and meters per unit > 0".into(),
            ));
        }
        state.listener = listener;
        Ok(())
    }

    pub fn params(&self) -> ContextParams {
        self.lock().params
    }

    pub fn set_doppler_factor(&self, factor: f32) -> Result<()> {
        if !(factor >= 0.0 && factor.is_finite()) {
            return Err(SpatialMixError::InvalidOperation(format!(
                "Doppler factor {} must be finite and >= 0",
                factor
            )));
        }
        self.lock().params.doppler_factor = factor;
        Ok(())
    }

    pub fn set_doppler_velocity(&self, velocity: f32) -> Result<()> {
        if !(velocity > 0.0 && velocity.is_finite()) {
            return Err(SpatialMixError::InvalidOperation(format!(
                "Doppler velocity {} must be finite and > 0",
                velocity
            )));
        }
        self.lock().params.doppler_velocity = velocity;
        Ok(())
    }

    pub fn set_speed_of_sound(&self, speed: f32) -> Result<()> {
        if !(speed > 0.0 && speed.is_finite()) {
            return Err(SpatialMixError::InvalidOperation(format!(
                "Speed of sound {} must be finite and > 0",
                speed
            )));
        }
        self.lock().params.speed_of_sound = speed;
        Ok(())
    }

    pub fn set_distance_model(&self, model: DistanceModel) {
        self.lock().params.distance_model = model;
    }

    // Effect slots

    pub fn create_effect_slot(&self) -> Result<Arc<EffectSlot>> {
        let (slot, runtime) = EffectSlot::new(self.format, Arc::clone(&self.registry))?;
        self.lock().slots.push(runtime);
        Ok(slot)
    }

    /// Detaches a slot from the mixer. Fails while any source still sends
    /// to it.
    pub fn remove_effect_slot(&self, slot: &Arc<EffectSlot>) -> Result<()> {
        let runtime = {
            let mut state = self.lock();
            let in_use = state.sources.values().any(|source| {
                source
                    .props
                    .sends
                    .iter()
                    .any(|send| send.slot.as_ref().is_some_and(|s| Arc::ptr_eq(s, slot)))
            });
            if in_use {
                return Err(SpatialMixError::InvalidOperation(
                    "Effect slot is still in use by a source".into(),
                ));
            }
            let index = state
                .slots
                .iter()
                .position(|rt| Arc::ptr_eq(rt.slot(), slot))
                .ok_or_else(|| {
                    SpatialMixError::InvalidOperation("Effect slot not in this context".into())
                })?;
            state.slots.swap_remove(index)
        };
        drop(runtime);
        log::info!("Effect slot removed");
        Ok(())
    }

    pub(crate) fn stop_all(&self) {
        self.lock().stop_all();
    }
}
