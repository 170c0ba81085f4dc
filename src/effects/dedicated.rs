use super::{EffectContext, EffectProps, EffectState, EffectStateFactory};
use crate::effect_slot::SlotProps;
use crate::error::Result;
use crate::format::{Channel, DeviceFormat, MixFrame, OUTPUT_CHANNELS};
use crate::panning::PanningModel;

/// Which output a dedicated kernel feeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DedicatedKind {
    /// Front-center image, panned like a source straight ahead
    Dialogue,
    /// The LFE channel
    LowFrequency,
}

/// Routes the slot's wet signal straight to fixed output channels.
#[derive(Debug)]
pub struct DedicatedState {
    kind: DedicatedKind,
    gains: MixFrame,
}

impl DedicatedState {
    pub fn new(kind: DedicatedKind) -> Self {
        Self {
            kind,
            gains: [0.0; OUTPUT_CHANNELS],
        }
    }

    pub fn gains(&self) -> &MixFrame {
        &self.gains
    }
}

impl EffectState for DedicatedState {
    fn device_update(&mut self, _format: &DeviceFormat) -> Result<()> {
        Ok(())
    }

    fn update(&mut self, context: &EffectContext<'_>, slot: &SlotProps) {
        let effect_gain = match slot.props {
            EffectProps::Dedicated(props) => props.gain,
            _ => 1.0,
        };
        let gain = slot.gain * effect_gain;

        self.gains = [0.0; OUTPUT_CHANNELS];
        match self.kind {
            DedicatedKind::Dialogue => {
                let front = context.panning.lut_gains(PanningModel::lut_index(1.0, 0.0));
                for (out, weight) in self.gains.iter_mut().zip(front.iter()) {
                    *out = weight * gain;
                }
            }
            DedicatedKind::LowFrequency => {
                self.gains[Channel::Lfe.index()] = gain;
            }
        }
    }

    fn process(&mut self, input: &[f32], output: &mut [MixFrame]) {
        for (sample, frame) in input.iter().zip(output.iter_mut()) {
            for (out, gain) in frame.iter_mut().zip(self.gains.iter()) {
                *out += sample * gain;
            }
        }
    }
}

#[derive(Debug)]
pub struct DedicatedFactory {
    kind: DedicatedKind,
}

impl DedicatedFactory {
    pub fn new(kind: DedicatedKind) -> Self {
        Self { kind }
    }
}

impl EffectStateFactory for DedicatedFactory {
    fn create(&self) -> Result<Box<dyn EffectState>> {
        Ok(Box::new(DedicatedState::new(self.kind)))
    }
}
