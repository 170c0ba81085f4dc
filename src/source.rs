//! Sources: the public properties API callers edit plus the voice state the
//! mixer carries from one quantum to the next.

use crate::buffer_queue::{BufferQueue, Cursor, EntryState, MAX_BUFFER_CHANNELS};
use crate::effect_slot::EffectSlot;
use crate::error::{Result, SpatialMixError};
use crate::filter::LowPassFilter;
use crate::format::OUTPUT_CHANNELS;
use crate::math::Vec3;
use crate::mixer::GainRamp;
use crate::source_params::DistanceModel;
use std::fmt;
use std::sync::Arc;

/// Most auxiliary sends a source can carry.
pub const MAX_SENDS: usize = 4;

/// Unique identifier for a source within a context
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SourceId(pub(crate) u64);

impl SourceId {
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SourceId({})", self.0)
    }
}

/// Playback state of a source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlayState {
    #[default]
    Initial,
    Playing,
    Paused,
    Stopped,
}

/// Gain applied along one signal path, overall and at the HF reference.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FilterParams {
    pub gain: f32,
    pub gain_hf: f32,
}

impl Default for FilterParams {
    fn default() -> Self {
        Self {
            gain: 1.0,
            gain_hf: 1.0,
        }
    }
}

/// Route from a source into an effect slot.
#[derive(Debug, Clone, Default)]
pub struct SourceSend {
    pub slot: Option<Arc<EffectSlot>>,
    pub filter: FilterParams,
}

/// Editable source properties.
#[derive(Debug, Clone)]
pub struct SourceProperties {
    pub position: Vec3,
    pub velocity: Vec3,
    /// Facing used by the cone; zero means omnidirectional
    pub direction: Vec3,
    pub gain: f32,
    pub min_gain: f32,
    pub max_gain: f32,
    pub reference_distance: f32,
    pub max_distance: f32,
    pub rolloff_factor: f32,
    pub room_rolloff_factor: f32,
    pub air_absorption_factor: f32,
    /// Full apex angle of the inner cone, in degrees
    pub cone_inner_angle: f32,
    /// Full apex angle of the outer cone, in degrees
    pub cone_outer_angle: f32,
    pub cone_outer_gain: f32,
    pub cone_outer_gain_hf: f32,
    pub pitch: f32,
    /// Position, velocity and direction are relative to the listener
    pub head_relative: bool,
    /// Falls back to the context's model when unset
    pub distance_model: Option<DistanceModel>,
    pub looping: bool,
    pub direct_filter: FilterParams,
    pub dry_gain_hf_auto: bool,
    pub wet_gain_auto: bool,
    pub wet_gain_hf_auto: bool,
    pub sends: [SourceSend; MAX_SENDS],
}

impl Default for SourceProperties {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            velocity: Vec3::ZERO,
            direction: Vec3::ZERO,
            gain: 1.0,
            min_gain: 0.0,
            max_gain: 1.0,
            reference_distance: 1.0,
            max_distance: f32::MAX,
            rolloff_factor: 1.0,
            room_rolloff_factor: 0.0,
            air_absorption_factor: 0.0,
            cone_inner_angle: 360.0,
            cone_outer_angle: 360.0,
            cone_outer_gain: 0.0,
            cone_outer_gain_hf: 1.0,
            pitch: 1.0,
            head_relative: false,
            distance_model: None,
            looping: false,
            direct_filter: FilterParams::default(),
            dry_gain_hf_auto: true,
            wet_gain_auto: true,
            wet_gain_hf_auto: true,
            sends: Default::default(),
        }
    }
}

impl SourceProperties {
    pub fn validate(&self) -> Result<()> {
        let checks = [
            (self.gain >= 0.0, "gain must not be negative"),
            (
                (0.0..=1.0).contains(&self.min_gain) && (0.0..=1.0).contains(&self.max_gain),
                "min/max gain must lie in [0, 1]",
            ),
            (self.min_gain <= self.max_gain, "min gain exceeds max gain"),
            (self.reference_distance >= 0.0, "reference distance must not be negative"),
            (self.max_distance >= 0.0, "max distance must not be negative"),
            (self.rolloff_factor >= 0.0, "rolloff factor must not be negative"),
            (self.room_rolloff_factor >= 0.0, "room rolloff factor must not be negative"),
            (
                (0.0..=10.0).contains(&self.air_absorption_factor),
                "air absorption factor must lie in [0, 10]",
            ),
            (
                (0.0..=360.0).contains(&self.cone_inner_angle)
                    && (0.0..=360.0).contains(&self.cone_outer_angle),
                "cone angles must lie in [0, 360]",
            ),
            (
                (0.0..=1.0).contains(&self.cone_outer_gain)
                    && (0.0..=1.0).contains(&self.cone_outer_gain_hf),
                "cone outer gains must lie in [0, 1]",
            ),
            (self.pitch >= 0.0, "pitch must not be negative"),
            (
                self.position.is_finite() && self.velocity.is_finite() && self.direction.is_finite(),
                "vectors must be finite",
            ),
        ];
        match checks.iter().find(|(ok, _)| !ok) {
            Some((_, message)) => Err(SpatialMixError::InvalidOperation((*message).into())),
            None => Ok(()),
        }
    }
}

/// Mixer-side state persisted across quanta.
#[derive(Debug, Clone)]
pub(crate) struct Voice {
    pub cursor: Cursor,
    pub dry_ramps: [GainRamp; OUTPUT_CHANNELS],
    pub wet_ramps: [GainRamp; MAX_SENDS],
    /// One history per source channel
    pub dry_filters: [LowPassFilter; MAX_BUFFER_CHANNELS],
    pub wet_filters: [LowPassFilter; MAX_SENDS],
    /// Set by play; the next mix snaps gains instead of ramping
    pub first_start: bool,
}

impl Default for Voice {
    fn default() -> Self {
        Self {
            cursor: Cursor::default(),
            dry_ramps: [GainRamp::default(); OUTPUT_CHANNELS],
            wet_ramps: [GainRamp::default(); MAX_SENDS],
            dry_filters: [LowPassFilter::default(); MAX_BUFFER_CHANNELS],
            wet_filters: [LowPassFilter::default(); MAX_SENDS],
            first_start: true,
        }
    }
}

impl Voice {
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

#[derive(Debug, Clone)]
pub struct Source {
    id: SourceId,
    pub props: SourceProperties,
    pub(crate) state: PlayState,
    pub(crate) queue: BufferQueue,
    pub(crate) voice: Voice,
}

impl Source {
    pub(crate) fn new(id: SourceId) -> Self {
        Self {
            id,
            props: SourceProperties::default(),
            state: PlayState::Initial,
            queue: BufferQueue::new(),
            voice: Voice::default(),
        }
    }

    pub fn id(&self) -> SourceId {
        self.id
    }

    pub fn state(&self) -> PlayState {
        self.state
    }

    pub fn queue(&self) -> &BufferQueue {
        &self.queue
    }

    /// Playback position as (frame in current buffer, 14-bit fraction).
    pub fn cursor(&self) -> Cursor {
        self.voice.cursor
    }

    pub fn is_playing(&self) -> bool {
        self.state == PlayState::Playing
    }

    /// Starts or restarts playback. A stopped or fresh source rewinds to the
    /// head of its queue; a paused one resumes where it was.
    pub(crate) fn play(&mut self) {
        if self.state != PlayState::Paused {
            self.rewind_voice();
        }
        self.voice.first_start = true;
        self.state = PlayState::Playing;
        log::debug!("{} playing", self.id);
    }

    pub(crate) fn pause(&mut self) {
        if self.state == PlayState::Playing {
            self.state = PlayState::Paused;
            log::debug!("{} paused", self.id);
        }
    }

    /// Stops playback and retires every queued entry.
    pub(crate) fn stop(&mut self) {
        if self.state != PlayState::Initial {
            self.state = PlayState::Stopped;
            self.queue.mark_all(EntryState::Processed);
            log::debug!("{} stopped", self.id);
        }
    }

    pub(crate) fn rewind(&mut self) {
        self.state = PlayState::Initial;
        self.rewind_voice();
        log::debug!("{} rewound", self.id);
    }

    fn rewind_voice(&mut self) {
        self.queue.rewind();
        self.voice.reset();
    }
}
