//! Device configuration.
//!
//! Values here are already parsed; reading them from a file or the
//! environment is the caller's business.

use crate::error::{Result, SpatialMixError};
use crate::format::{Channel, ChannelLayout, ChannelOrder, DeviceFormat, SampleType};
use crate::mixer::BUFFERSIZE;
use crate::source::MAX_SENDS;
use std::collections::HashMap;
use std::time::Duration;

/// Upper bound accepted for [`DeviceConfig::max_pitch`]. The pitch step is an
/// 18.14 fixed-point value stored in 32 bits.
pub const PITCH_LIMIT: u32 = 255;

/// Sample interpolation used when stepping through source data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Resampler {
    /// Nearest-lower sample, no interpolation.
    Point,
    /// First-order interpolation between adjacent frames.
    #[default]
    Linear,
}

/// Configuration descriptor for a mixing device
#[derive(Debug, Clone)]
pub struct DeviceConfig {
    /// Output sample rate in Hz
    pub sample_rate: u32,
    /// Speaker layout of the output
    pub layout: ChannelLayout,
    /// Output sample representation
    pub sample_type: SampleType,
    /// Interleaving order for 5.1/7.1 output
    pub channel_order: ChannelOrder,
    /// Samples the backend asks for per callback
    pub update_size: usize,
    /// Auxiliary sends available on every source (at most [`MAX_SENDS`])
    pub num_sends: usize,
    /// Maximum resampling ratio a source may play at
    pub max_pitch: u32,
    /// Minimum duration of a gain ramp
    pub ramp_duration: Duration,
    pub resampler: Resampler,
    /// Fan stereo sources into rear/side speakers when the layout has them
    pub stereo_duplicate: bool,
    /// Per-layout speaker angle overrides in degrees, range [-180, 180]
    pub speaker_angles: HashMap<ChannelLayout, Vec<(Channel, f32)>>,
    /// Capacity hint for the per-context source tables
    pub max_sources: usize,
    /// Capacity of the mixer event queue
    pub event_capacity: usize,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48000,
            layout: ChannelLayout::Stereo,
            sample_type: SampleType::F32,
            channel_order: ChannelOrder::platform_default(),
            update_size: 1024,
            num_sends: 2,
            max_pitch: 10,
            ramp_duration: Duration::from_millis(15),
            resampler: Resampler::default(),
            stereo_duplicate: true,
            speaker_angles: HashMap::new(),
            max_sources: 256,
            event_capacity: 256,
        }
    }
}

impl DeviceConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sample_rate(mut self, rate: u32) -> Self {
        self.sample_rate = rate;
        self
    }

    pub fn layout(mut self, layout: ChannelLayout) -> Self {
        self.layout = layout;
        self
    }

    pub fn sample_type(mut self, sample_type: SampleType) -> Self {
        self.sample_type = sample_type;
        self
    }

    pub fn channel_order(mut self, order: ChannelOrder) -> Self {
        self.channel_order = order;
        self
    }

    pub fn update_size(mut self, size: usize) -> Self {
        self.update_size = size;
        self
    }

    pub fn num_sends(mut self, sends: usize) -> Self {
        self.num_sends = sends;
        self
    }

    pub fn max_pitch(mut self, pitch: u32) -> Self {
        self.max_pitch = pitch;
        self
    }

    pub fn ramp_duration(mut self, duration: Duration) -> Self {
        self.ramp_duration = duration;
        self
    }

    pub fn resampler(mut self, resampler: Resampler) -> Self {
        self.resampler = resampler;
        self
    }

    pub fn stereo_duplicate(mut self, enable: bool) -> Self {
        self.stereo_duplicate = enable;
        self
    }

    pub fn speaker_angles(mut self, layout: ChannelLayout, angles: Vec<(Channel, f32)>) -> Self {
        self.speaker_angles.insert(layout, angles);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.sample_rate == 0 {
            return Err(SpatialMixError::Configuration(
                "Sample rate must be greater than 0".into(),
            ));
        }
        if self.update_size == 0 {
            return Err(SpatialMixError::Configuration(
                "Update size must be greater than 0".into(),
            ));
        }
        if self.num_sends > MAX_SENDS {
            return Err(SpatialMixError::Configuration(format!(
                "{} auxiliary sends requested, at most {} supported",
                self.num_sends, MAX_SENDS
            )));
        }
        if self.max_pitch == 0 || self.max_pitch > PITCH_LIMIT {
            return Err(SpatialMixError::Configuration(format!(
                "Maximum pitch {} outside 1..={}",
                self.max_pitch, PITCH_LIMIT
            )));
        }
        Ok(())
    }

    pub fn format(&self) -> DeviceFormat {
        DeviceFormat {
            layout: self.layout,
            sample_type: self.sample_type,
            sample_rate: self.sample_rate,
            channel_order: self.channel_order,
        }
    }

    /// Fixed gain ramp length in samples: at least one update, and never
    /// shorter than `ramp_duration`.
    pub fn ramp_length(&self) -> usize {
        let min_len =
            (self.sample_rate as u128 * self.ramp_duration.as_millis() / 1000) as usize;
        self.update_size.min(BUFFERSIZE).max(min_len).max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(DeviceConfig::default().validate().is_ok());
    }

    #[test]
    fn rejects_out_of_range_values() {
        assert!(DeviceConfig::new().sample_rate(0).validate().is_err());
        assert!(DeviceConfig::new().num_sends(MAX_SENDS + 1).validate().is_err());
        assert!(DeviceConfig::new().max_pitch(0).validate().is_err());
        assert!(DeviceConfig::new().max_pitch(PITCH_LIMIT + 1).validate().is_err());
        assert!(DeviceConfig::new().update_size(0).validate().is_err());
    }

    #[test]
    fn ramp_length_is_floored_to_duration() {
        let config = DeviceConfig::new()
            .sample_rate(48000)
            .update_size(256)
            .ramp_duration(Duration::from_millis(10));
        assert_eq!(config.ramp_length(), 480);

        let config = config.update_size(1024);
        assert_eq!(config.ramp_length(), 1024);
    }
}
