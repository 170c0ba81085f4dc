//! Auxiliary effect slots.
//!
//! A slot is split in two halves. [`EffectSlot`] is the API-facing handle:
//! parameter edits are serialized by its own small lock and published as
//! whole [`SlotProps`] snapshots through a single-slot channel, never
//! through the context lock. [`SlotRuntime`] lives with the mixer and owns
//! the live kernel, the snapshot currently in force and the wet buffer.
//!
//! Snapshot containers circulate between the update slot, the runtime and a
//! freelist. The mixer never allocates or frees one: producers pop from the
//! freelist (allocating only when it is empty) and drop any kernel a
//! recycled container still carries.

use crate::effects::{EffectContext, EffectProps, EffectRegistry, EffectState, EffectType};
use crate::error::{Result, SpatialMixError};
use crate::format::{DeviceFormat, MixFrame};
use crate::mixer::BUFFERSIZE;
use crossbeam_channel::{Receiver, Sender, TryRecvError};
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

/// Retired snapshots kept for reuse. At most three containers are ever out
/// of the freelist at once (producer, update slot, runtime).
const FREELIST_CAPACITY: usize = 4;

/// Parameter snapshot handed from API callers to the mixer.
pub struct SlotProps {
    pub gain: f32,
    pub aux_send_auto: bool,
    pub effect_type: EffectType,
    pub props: EffectProps,
    /// New kernel to install on apply. Once retired, holds the kernel it
    /// replaced until a producer recycles the container.
    state: Option<Box<dyn EffectState>>,
}

impl SlotProps {
    pub fn new(gain: f32, aux_send_auto: bool, effect_type: EffectType, props: EffectProps) -> Self {
        Self {
            gain,
            aux_send_auto,
            effect_type,
            props,
            state: None,
        }
    }

    pub fn carries_state(&self) -> bool {
        self.state.is_some()
    }
}

impl fmt::Debug for SlotProps {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SlotProps")
            .field("gain", &self.gain)
            .field("aux_send_auto", &self.aux_send_auto)
            .field("effect_type", &self.effect_type)
            .field("props", &self.props)
            .field("carries_state", &self.state.is_some())
            .finish()
    }
}

/// Last values set through the API.
#[derive(Debug, Clone, Copy)]
struct SlotControl {
    gain: f32,
    aux_send_auto: bool,
    effect_type: EffectType,
    props: EffectProps,
}

/// API-side handle of an effect slot.
pub struct EffectSlot {
    control: Mutex<SlotControl>,
    update_tx: Sender<Box<SlotProps>>,
    update_rx: Receiver<Box<SlotProps>>,
    free_tx: Sender<Box<SlotProps>>,
    free_rx: Receiver<Box<SlotProps>>,
    allocated: AtomicUsize,
    format: DeviceFormat,
    registry: Arc<EffectRegistry>,
}

impl fmt::Debug for EffectSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let control = *self.control.lock().unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("EffectSlot")
            .field("effect_type", &control.effect_type)
            .field("gain", &control.gain)
            .field("aux_send_auto", &control.aux_send_auto)
            .finish()
    }
}

impl EffectSlot {
    /// Creates a slot running the null effect, together with its mixer half.
    pub fn new(
        format: DeviceFormat,
        registry: Arc<EffectRegistry>,
    ) -> Result<(Arc<Self>, SlotRuntime)> {
        let state = registry.create(EffectType::Null, &format)?;
        let control = SlotControl {
            gain: 1.0,
            aux_send_auto: true,
            effect_type: EffectType::Null,
            props: EffectProps::Null,
        };

        let (update_tx, update_rx) = crossbeam_channel::bounded(1);
        let (free_tx, free_rx) = crossbeam_channel::bounded(FREELIST_CAPACITY);
        let slot = Arc::new(Self {
            control: Mutex::new(control),
            update_tx,
            update_rx,
            free_tx,
            free_rx,
            allocated: AtomicUsize::new(1),
            format,
            registry,
        });

        let active = Box::new(SlotProps::new(
            control.gain,
            control.aux_send_auto,
            control.effect_type,
            control.props,
        ));
        let runtime = SlotRuntime {
            slot: Arc::clone(&slot),
            state,
            active,
            wet: vec![0.0; BUFFERSIZE],
            dirty: true,
        };
        log::info!("Effect slot created");
        Ok((slot, runtime))
    }

    fn control(&self) -> std::sync::MutexGuard<'_, SlotControl> {
        self.control.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn gain(&self) -> f32 {
        self.control().gain
    }

    pub fn aux_send_auto(&self) -> bool {
        self.control().aux_send_auto
    }

    pub fn effect_type(&self) -> EffectType {
        self.control().effect_type
    }

    pub fn effect_props(&self) -> EffectProps {
        self.control().props
    }

    pub fn set_gain(&self, gain: f32) -> Result<()> {
        if !(0.0..=1.0).contains(&gain) {
            return Err(SpatialMixError::InvalidOperation(format!(
                "Slot gain {} outside [0, 1]",
                gain
            )));
        }
        let mut control = self.control();
        control.gain = gain;
        self.publish(&control, None);
        Ok(())
    }

    pub fn set_aux_send_auto(&self, enable: bool) {
        let mut control = self.control();
        control.aux_send_auto = enable;
        self.publish(&control, None);
    }

    /// Attaches an effect. A change of kind builds a fresh kernel; on
    /// failure the slot keeps everything it had.
    pub fn set_effect(&self, effect_type: EffectType, props: EffectProps) -> Result<()> {
        if !props.fits(effect_type) {
            return Err(SpatialMixError::InvalidOperation(format!(
                "{:?} parameters cannot drive a {:?} effect",
                props, effect_type
            )));
        }

        let mut control = self.control();
        let state = if control.effect_type != effect_type {
            let state = self.registry.create(effect_type, &self.format).map_err(|e| {
                log::warn!("Effect slot kept {:?}: {}", control.effect_type, e);
                e
            })?;
            log::info!(
                "Effect slot switching {:?} -> {:?}",
                control.effect_type,
                effect_type
            );
            Some(state)
        } else {
            None
        };

        control.effect_type = effect_type;
        control.props = props;
        self.publish(&control, state);
        Ok(())
    }

    /// Builds a snapshot from `control` and makes it the pending update,
    /// replacing any update the mixer has not picked up yet.
    fn publish(&self, control: &SlotControl, state: Option<Box<dyn EffectState>>) {
        let mut snapshot = match self.free_rx.try_recv() {
            Ok(mut recycled) => {
                recycled.state = None;
                recycled
            }
            Err(_) => {
                self.allocated.fetch_add(1, Ordering::Relaxed);
                Box::new(SlotProps::new(
                    control.gain,
                    control.aux_send_auto,
                    control.effect_type,
                    control.props,
                ))
            }
        };
        snapshot.gain = control.gain;
        snapshot.aux_send_auto = control.aux_send_auto;
        snapshot.effect_type = control.effect_type;
        snapshot.props = control.props;
        snapshot.state = state;

        if let Ok(mut stale) = self.update_rx.try_recv() {
            // An unapplied kernel change still has to reach the mixer.
            if snapshot.state.is_none() {
                snapshot.state = stale.state.take();
            }
            self.retire(stale);
        }

        if let Err(e) = self.update_tx.try_send(snapshot) {
            log::warn!("Effect slot update slot unexpectedly occupied");
            self.retire(e.into_inner());
        }

        self.release_retired_states();
    }

    fn retire(&self, snapshot: Box<SlotProps>) {
        if let Err(e) = self.free_tx.try_send(snapshot) {
            drop(e.into_inner());
            self.allocated.fetch_sub(1, Ordering::Relaxed);
        }
    }

    /// Drops kernels still carried by containers sitting in the freelist.
    pub fn release_retired_states(&self) {
        for _ in 0..self.free_rx.len() {
            match self.free_rx.try_recv() {
                Ok(mut snapshot) => {
                    snapshot.state = None;
                    self.retire(snapshot);
                }
                Err(_) => break,
            }
        }
    }

    /// Snapshot containers currently parked for reuse.
    pub fn free_snapshots(&self) -> usize {
        self.free_rx.len()
    }

    /// Snapshot containers in existence.
    pub fn allocated_snapshots(&self) -> usize {
        self.allocated.load(Ordering::Relaxed)
    }

    pub fn has_pending_update(&self) -> bool {
        !self.update_rx.is_empty()
    }
}

/// Mixer half of an effect slot.
pub struct SlotRuntime {
    slot: Arc<EffectSlot>,
    state: Box<dyn EffectState>,
    active: Box<SlotProps>,
    wet: Vec<f32>,
    dirty: bool,
}

impl fmt::Debug for SlotRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SlotRuntime")
            .field("active", &self.active)
            .finish()
    }
}

impl SlotRuntime {
    pub fn slot(&self) -> &Arc<EffectSlot> {
        &self.slot
    }

    /// Snapshot currently in force.
    pub fn props(&self) -> &SlotProps {
        &self.active
    }

    /// Takes a pending snapshot, if any, and brings the kernel up to date.
    /// Returns whether a snapshot was applied.
    pub fn apply_update(&mut self, context: &EffectContext<'_>) -> bool {
        let applied = match self.slot.update_rx.try_recv() {
            Ok(mut next) => {
                if let Some(state) = next.state.take() {
                    let orphan = std::mem::replace(&mut self.state, state);
                    self.active.state = Some(orphan);
                }
                let previous = std::mem::replace(&mut self.active, next);
                self.slot.retire(previous);
                true
            }
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => false,
        };

        if applied || self.dirty {
            self.state.update(context, &self.active);
            self.dirty = false;
        }
        applied
    }

    /// Wet accumulation buffer for the current pass.
    pub fn wet_mut(&mut self) -> &mut [f32] {
        &mut self.wet
    }

    /// Runs the kernel over the first `dry.len()` wet samples, adding into
    /// `dry`, then clears them.
    pub fn process(&mut self, dry: &mut [MixFrame]) {
        let count = dry.len().min(self.wet.len());
        self.state.process(&self.wet[..count], &mut dry[..count]);
        self.wet[..count].fill(0.0);
    }
}
