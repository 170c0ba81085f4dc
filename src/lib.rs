//! Real-time 3D audio mixing.
//!
//! A [`Device`] renders interleaved PCM for a fixed output format. Each
//! [`Context`] on it owns a listener, a set of sources fed by buffer queues
//! and any number of auxiliary [`EffectSlot`]s. [`CpalBackend`] drives a
//! device from the host's default output.

pub mod backend;
pub mod buffer;
pub mod buffer_queue;
pub mod config;
pub mod context;
pub mod device;
pub mod effect_slot;
pub mod effects;
pub mod error;
pub mod events;
pub mod filter;
pub mod format;
pub mod listener;
pub mod math;
pub mod mixer;
pub mod output;
pub mod panning;
pub mod source;
pub mod source_params;

pub use backend::CpalBackend;
pub use buffer::Buffer;
pub use config::{DeviceConfig, Resampler};
pub use context::Context;
pub use device::Device;
pub use effect_slot::{EffectSlot, SlotProps, SlotRuntime};
pub use effects::{
    EffectContext, EffectProps, EffectRegistry, EffectState, EffectStateFactory, EffectType,
};
pub use error::{Result, SpatialMixError};
pub use events::MixerEvent;
pub use format::{Channel, ChannelLayout, ChannelOrder, SampleType};
pub use listener::Listener;
pub use output::StereoCrossfeed;
pub use panning::PanningModel;
pub use source::{FilterParams, PlayState, SourceId, SourceProperties};
pub use source_params::DistanceModel;
