//! Effect kinds, their parameter blocks and the contract effect kernels
//! implement.
//!
//! Kernels are created through an [`EffectStateFactory`] looked up by
//! [`EffectType`] in an [`EffectRegistry`]. The registry ships the null and
//! dedicated kernels; reverb, echo, chorus and friends are registered by
//! whoever provides their DSP.

mod dedicated;
mod null;

pub use dedicated::{DedicatedFactory, DedicatedKind, DedicatedState};
pub use null::{NullFactory, NullState};

use crate::effect_slot::SlotProps;
use crate::error::{Result, SpatialMixError};
use crate::format::{DeviceFormat, MixFrame};
use crate::panning::PanningModel;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EffectType {
    Null,
    Reverb,
    EaxReverb,
    Echo,
    Chorus,
    DedicatedDialogue,
    DedicatedLowFrequency,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReverbProps {
    pub density: f32,
    pub diffusion: f32,
    pub gain: f32,
    pub gain_hf: f32,
    pub decay_time: f32,
    pub decay_hf_ratio: f32,
    pub reflections_gain: f32,
    pub reflections_delay: f32,
    pub late_reverb_gain: f32,
    pub late_reverb_delay: f32,
    /// HF attenuation per meter applied to sends feeding this reverb
    pub air_absorption_gain_hf: f32,
    /// Added to a source's room rolloff on automatic sends
    pub room_rolloff_factor: f32,
    pub decay_hf_limit: bool,
}

impl Default for ReverbProps {
    fn default() -> Self {
        Self {
            density: 1.0,
            diffusion: 1.0,
            gain: 0.32,
            gain_hf: 0.89,
            decay_time: 1.49,
            decay_hf_ratio: 0.83,
            reflections_gain: 0.05,
            reflections_delay: 0.007,
            late_reverb_gain: 1.26,
            late_reverb_delay: 0.011,
            air_absorption_gain_hf: 0.994,
            room_rolloff_factor: 0.0,
            decay_hf_limit: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EchoProps {
    pub delay: f32,
    pub lr_delay: f32,
    pub damping: f32,
    pub feedback: f32,
    pub spread: f32,
}

impl Default for EchoProps {
    fn default() -> Self {
        Self {
            delay: 0.1,
            lr_delay: 0.1,
            damping: 0.5,
            feedback: 0.5,
            spread: -1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChorusProps {
    pub phase: i32,
    pub rate: f32,
    pub depth: f32,
    pub feedback: f32,
    pub delay: f32,
}

impl Default for ChorusProps {
    fn default() -> Self {
        Self {
            phase: 90,
            rate: 1.1,
            depth: 0.1,
            feedback: 0.25,
            delay: 0.016,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DedicatedProps {
    pub gain: f32,
}

impl Default for DedicatedProps {
    fn default() -> Self {
        Self { gain: 1.0 }
    }
}

/// Parameter block of an effect.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum EffectProps {
    #[default]
    Null,
    Reverb(ReverbProps),
    Echo(EchoProps),
    Chorus(ChorusProps),
    Dedicated(DedicatedProps),
}

impl EffectProps {
    /// Default parameters for an effect kind.
    pub fn default_for(effect_type: EffectType) -> Self {
        match effect_type {
            EffectType::Null => Self::Null,
            EffectType::Reverb | EffectType::EaxReverb => Self::Reverb(ReverbProps::default()),
            EffectType::Echo => Self::Echo(EchoProps::default()),
            EffectType::Chorus => Self::Chorus(ChorusProps::default()),
            EffectType::DedicatedDialogue | EffectType::DedicatedLowFrequency => {
                Self::Dedicated(DedicatedProps::default())
            }
        }
    }

    pub fn reverb(&self) -> Option<&ReverbProps> {
        match self {
            Self::Reverb(props) => Some(props),
            _ => None,
        }
    }

    /// Whether these props can drive the given effect kind.
    pub fn fits(&self, effect_type: EffectType) -> bool {
        std::mem::discriminant(self) == std::mem::discriminant(&Self::default_for(effect_type))
    }
}

/// Device facts an effect may consult when recomputing coefficients.
#[derive(Debug, Clone, Copy)]
pub struct EffectContext<'a> {
    pub format: DeviceFormat,
    pub panning: &'a PanningModel,
}

/// A live effect kernel attached to one slot.
///
/// Dropping the box is the destruct step.
pub trait EffectState: Send {
    /// Reconfigures for the device rate and layout.
    fn device_update(&mut self, format: &DeviceFormat) -> Result<()>;

    /// Recomputes internal coefficients from the slot's current snapshot.
    fn update(&mut self, context: &EffectContext<'_>, slot: &SlotProps);

    /// Consumes `input.len()` wet samples, adding the result into `output`.
    fn process(&mut self, input: &[f32], output: &mut [MixFrame]);
}

pub trait EffectStateFactory: Send + Sync {
    fn create(&self) -> Result<Box<dyn EffectState>>;
}

/// Factories keyed by effect kind.
#[derive(Clone)]
pub struct EffectRegistry {
    factories: HashMap<EffectType, Arc<dyn EffectStateFactory>>,
}

impl Default for EffectRegistry {
    fn default() -> Self {
        Self::with_builtin()
    }
}

impl std::fmt::Debug for EffectRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EffectRegistry")
            .field("types", &self.factories.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl EffectRegistry {
    /// A registry with nothing but the null kernel.
    pub fn empty() -> Self {
        let mut registry = Self {
            factories: HashMap::new(),
        };
        registry.register(EffectType::Null, Arc::new(NullFactory));
        registry
    }

    /// Null plus the dedicated dialogue and low-frequency kernels.
    pub fn with_builtin() -> Self {
        let mut registry = Self::empty();
        registry.register(
            EffectType::DedicatedDialogue,
            Arc::new(DedicatedFactory::new(DedicatedKind::Dialogue)),
        );
        registry.register(
            EffectType::DedicatedLowFrequency,
            Arc::new(DedicatedFactory::new(DedicatedKind::LowFrequency)),
        );
        registry
    }

    pub fn register(&mut self, effect_type: EffectType, factory: Arc<dyn EffectStateFactory>) {
        if self.factories.insert(effect_type, factory).is_some() {
            log::warn!("Replaced effect factory for {:?}", effect_type);
        }
    }

    /// Builds a kernel and readies it for `format`.
    pub fn create(
        &self,
        effect_type: EffectType,
        format: &DeviceFormat,
    ) -> Result<Box<dyn EffectState>> {
        let factory = self
            .factories
            .get(&effect_type)
            .ok_or(SpatialMixError::UnsupportedEffect(effect_type))?;

        let mut state = factory.create()?;
        state.device_update(format).map_err(|e| {
            SpatialMixError::OutOfMemory(format!(
                "{:?} kernel rejected device format: {}",
                effect_type, e
            ))
        })?;
        Ok(state)
    }
}
