use super::{EffectContext, EffectState, EffectStateFactory};
use crate::effect_slot::SlotProps;
use crate::error::Result;
use crate::format::{DeviceFormat, MixFrame};

/// Kernel that consumes its input and adds nothing. Stands in whenever a
/// slot has no effect attached.
#[derive(Debug, Default)]
pub struct NullState;

impl EffectState for NullState {
    fn device_update(&mut self, _format: &DeviceFormat) -> Result<()> {
        Ok(())
    }

    fn update(&mut self, _context: &EffectContext<'_>, _slot: &SlotProps) {}

    fn process(&mut self, _input: &[f32], _output: &mut [MixFrame]) {}
}

#[derive(Debug, Default)]
pub struct NullFactory;

impl EffectStateFactory for NullFactory {
    fn create(&self) -> Result<Box<dyn EffectState>> {
        Ok(Box::new(NullState))
    }
}
