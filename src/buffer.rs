//! Immutable PCM buffers.

use crate::error::{Result, SpatialMixError};
use std::sync::Arc;
use std::time::Duration;

/// Integer or float sample types a buffer can be filled from.
pub trait PcmSample: Copy {
    /// Bits per sample of the source representation.
    const BITS: u16;

    fn to_f32(self) -> f32;
}

impl PcmSample for u8 {
    const BITS: u16 = 8;

    fn to_f32(self) -> f32 {
        (self as f32 - 128.0) / 128.0
    }
}

impl PcmSample for i16 {
    const BITS: u16 = 16;

    fn to_f32(self) -> f32 {
        self as f32 / 32768.0
    }
}

impl PcmSample for f32 {
    const BITS: u16 = 32;

    fn to_f32(self) -> f32 {
        self
    }
}

/// Decoded, interleaved PCM shared between queues.
///
/// Samples are stored as `f32` whatever the input representation; the
/// original bit depth is kept for reporting.
#[derive(Debug)]
pub struct Buffer {
    samples: Vec<f32>,
    channels: u16,
    sample_rate: u32,
    bits: u16,
    frames: usize,
}

impl Buffer {
    /// Builds a buffer from interleaved samples.
    pub fn from_pcm<S: PcmSample>(samples: &[S], channels: u16, sample_rate: u32) -> Result<Arc<Self>> {
        if channels == 0 {
            return Err(SpatialMixError::AudioFormat(
                "Buffer must have at least one channel".into(),
            ));
        }
        if sample_rate == 0 {
            return Err(SpatialMixError::AudioFormat(
                "Buffer sample rate must be greater than 0".into(),
            ));
        }
        if samples.len() % channels as usize != 0 {
            return Err(SpatialMixError::AudioFormat(format!(
                "{} samples is not a whole number of {}-channel frames",
                samples.len(),
                channels
            )));
        }

        let samples: Vec<f32> = samples.iter().map(|s| s.to_f32()).collect();
        let frames = samples.len() / channels as usize;
        Ok(Arc::new(Self {
            samples,
            channels,
            sample_rate,
            bits: S::BITS,
            frames,
        }))
    }

    pub fn from_u8(samples: &[u8], channels: u16, sample_rate: u32) -> Result<Arc<Self>> {
        Self::from_pcm(samples, channels, sample_rate)
    }

    pub fn from_i16(samples: &[i16], channels: u16, sample_rate: u32) -> Result<Arc<Self>> {
        Self::from_pcm(samples, channels, sample_rate)
    }

    pub fn from_f32(samples: &[f32], channels: u16, sample_rate: u32) -> Result<Arc<Self>> {
        Self::from_pcm(samples, channels, sample_rate)
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn bits(&self) -> u16 {
        self.bits
    }

    /// Length in sample frames.
    pub fn frames(&self) -> usize {
        self.frames
    }

    pub fn duration(&self) -> Duration {
        Duration::from_secs_f64(self.frames as f64 / self.sample_rate as f64)
    }

    /// One sample of one channel. Callers stay within `frames()`.
    #[inline]
    pub fn sample(&self, frame: usize, channel: usize) -> f32 {
        self.samples[frame * self.channels as usize + channel]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn converts_integer_samples() {
        let buffer = Buffer::from_u8(&[0, 128, 255], 1, 8000).unwrap();
        assert_eq!(buffer.bits(), 8);
        assert_eq!(buffer.samples()[0], -1.0);
        assert_eq!(buffer.samples()[1], 0.0);

        let buffer = Buffer::from_i16(&[i16::MIN, 0, 16384, 0], 2, 8000).unwrap();
        assert_eq!(buffer.frames(), 2);
        assert_eq!(buffer.sample(0, 0), -1.0);
        assert_eq!(buffer.sample(1, 0), 0.5);
    }

    #[test]
    fn rejects_partial_frames() {
        assert!(Buffer::from_f32(&[0.0; 3], 2, 44100).is_err());
        assert!(Buffer::from_f32(&[0.0; 2], 0, 44100).is_err());
        assert!(Buffer::from_f32(&[0.0; 2], 1, 0).is_err());
    }

    #[test]
    fn duration_follows_rate() {
        let buffer = Buffer::from_f32(&[0.0; 22050], 1, 44100).unwrap();
        assert_eq!(buffer.duration(), Duration::from_millis(500));
    }
}
