//! One-pole low-pass cascade used for high-frequency attenuation.

use std::f32::consts::PI;

/// Reference frequency for the high-frequency gain.
pub const LOWPASS_FREQ_REF: f32 = 5000.0;

/// Smallest gain the coefficient solver accepts.
const MIN_GAIN: f32 = 0.01;

/// `cos(2*pi*f_ref/rate)` for a device sample rate.
pub fn cos_w0(sample_rate: u32) -> f32 {
    (2.0 * PI * LOWPASS_FREQ_REF / sample_rate as f32).cos()
}

/// Coefficient of a one-pole low-pass whose response at the reference
/// frequency is `gain`. A gain of (nearly) one yields zero, i.e. a
/// pass-through.
pub fn lp_coeff(gain: f32, cw: f32) -> f32 {
    let g = gain.max(MIN_GAIN);
    if g < 0.9999 {
        let disc = (2.0 * g * (1.0 - cw) - g * g * (1.0 - cw * cw)).max(0.0);
        (1.0 - g * cw - disc.sqrt()) / (1.0 - g)
    } else {
        0.0
    }
}

/// Up to four cascaded one-pole stages sharing one coefficient.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LowPassFilter {
    pub coeff: f32,
    history: [f32; 4],
}

impl LowPassFilter {
    pub fn new(coeff: f32) -> Self {
        Self {
            coeff,
            history: [0.0; 4],
        }
    }

    pub fn reset(&mut self) {
        self.history = [0.0; 4];
    }

    #[inline]
    fn stage(&mut self, index: usize, input: f32) -> f32 {
        let out = input + (self.history[index] - input) * self.coeff;
        self.history[index] = out;
        out
    }

    /// Two-pole response.
    #[inline]
    pub fn process2(&mut self, input: f32) -> f32 {
        let out = self.stage(0, input);
        self.stage(1, out)
    }

    /// Four-pole response.
    #[inline]
    pub fn process4(&mut self, input: f32) -> f32 {
        let out = self.process2(input);
        let out = self.stage(2, out);
        self.stage(3, out)
    }
}
