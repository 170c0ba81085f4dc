//! Per-quantum parameter resolution for a source: distance attenuation,
//! cone, doppler, send levels, panning gains and HF filter coefficients.

use crate::effect_slot::SlotProps;
use crate::effects::EffectType;
use crate::filter::{cos_w0, lp_coeff};
use crate::format::{MixFrame, OUTPUT_CHANNELS};
use crate::listener::Listener;
use crate::math::{Vec3, lerp};
use crate::mixer::channel_targets;
use crate::panning::PanningModel;
use crate::source::{MAX_SENDS, SourceProperties};

/// dB of HF attenuation per meter at an air absorption factor of one.
const AIR_ABSORB_GAIN_DB_HF: f32 = -0.05;

/// Default speed of sound in units per second.
pub const SPEED_OF_SOUND: f32 = 343.3;

/// Velocities are kept this far inside the doppler limit.
const DOPPLER_MARGIN: f32 = 1.0 - 1.0 / 1024.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DistanceModel {
    Inverse,
    #[default]
    InverseClamped,
    Linear,
    LinearClamped,
    Exponent,
    ExponentClamped,
    None,
}

impl DistanceModel {
    pub fn is_clamped(self) -> bool {
        matches!(
            self,
            Self::InverseClamped | Self::LinearClamped | Self::ExponentClamped
        )
    }

    /// Distance actually fed to the attenuation formula.
    pub fn effective_distance(self, distance: f32, min_dist: f32, max_dist: f32) -> f32 {
        match self {
            Self::None => min_dist,
            _ if self.is_clamped() => distance.max(min_dist).min(max_dist),
            _ => distance,
        }
    }

    /// Gain factor at `distance` for the given rolloff.
    pub fn attenuation(self, distance: f32, min_dist: f32, max_dist: f32, rolloff: f32) -> f32 {
        if self.is_clamped() && max_dist < min_dist {
            return 1.0;
        }
        let d = self.effective_distance(distance, min_dist, max_dist);
        match self {
            Self::Inverse | Self::InverseClamped => {
                if min_dist > 0.0 {
                    let denom = min_dist + rolloff * (d - min_dist);
                    if denom > 0.0 {
                        return min_dist / denom;
                    }
                }
                1.0
            }
            Self::Linear | Self::LinearClamped => {
                if max_dist != min_dist {
                    (1.0 - rolloff * (d - min_dist) / (max_dist - min_dist)).max(0.0)
                } else {
                    1.0
                }
            }
            Self::Exponent | Self::ExponentClamped => {
                if d > 0.0 && min_dist > 0.0 {
                    (d / min_dist).powf(-rolloff)
                } else {
                    1.0
                }
            }
            Self::None => 1.0,
        }
    }
}

/// Context-wide values feeding the parameter engine.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ContextParams {
    pub doppler_factor: f32,
    pub doppler_velocity: f32,
    pub speed_of_sound: f32,
    pub distance_model: DistanceModel,
}

impl Default for ContextParams {
    fn default() -> Self {
        Self {
            doppler_factor: 1.0,
            doppler_velocity: 1.0,
            speed_of_sound: SPEED_OF_SOUND,
            distance_model: DistanceModel::default(),
        }
    }
}

/// What a send needs to know about the slot it feeds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SendSlotInfo {
    pub aux_send_auto: bool,
    pub effect_type: EffectType,
    pub room_rolloff_factor: f32,
    pub air_absorption_gain_hf: f32,
}

impl SendSlotInfo {
    pub fn from_props(props: &SlotProps) -> Self {
        let (room_rolloff_factor, air_absorption_gain_hf) = props
            .props
            .reverb()
            .map_or((0.0, 1.0), |r| (r.room_rolloff_factor, r.air_absorption_gain_hf));
        Self {
            aux_send_auto: props.aux_send_auto,
            effect_type: props.effect_type,
            room_rolloff_factor,
            air_absorption_gain_hf,
        }
    }
}

/// Device and buffer facts for one evaluation.
#[derive(Debug, Clone, Copy)]
pub struct ParamInputs<'a> {
    pub listener: &'a Listener,
    pub context: &'a ContextParams,
    pub panning: &'a PanningModel,
    pub device_rate: u32,
    pub buffer_rate: u32,
    pub buffer_channels: u16,
    pub num_sends: usize,
    pub sends: [Option<SendSlotInfo>; MAX_SENDS],
}

/// Resolved targets for one source for one quantum.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SourceParams {
    /// Dry gain per working-set channel
    pub dry_gains: MixFrame,
    pub dry_coeff: f32,
    pub wet_gains: [f32; MAX_SENDS],
    pub wet_coeffs: [f32; MAX_SENDS],
    /// Resampling ratio including doppler and rate conversion
    pub pitch: f32,
}

impl Default for SourceParams {
    fn default() -> Self {
        Self {
            dry_gains: [0.0; OUTPUT_CHANNELS],
            dry_coeff: 0.0,
            wet_gains: [0.0; MAX_SENDS],
            wet_coeffs: [0.0; MAX_SENDS],
            pitch: 1.0,
        }
    }
}

pub fn calc_source_params(source: &SourceProperties, inputs: &ParamInputs<'_>) -> SourceParams {
    if inputs.buffer_channels == 1 {
        calc_spatial_params(source, inputs)
    } else {
        calc_direct_params(source, inputs)
    }
}

/// Multi-channel content is already mixed; it only gets volume, the direct
/// filter and rate conversion.
fn calc_direct_params(source: &SourceProperties, inputs: &ParamInputs<'_>) -> SourceParams {
    let mut params = SourceParams {
        pitch: source.pitch * inputs.buffer_rate as f32 / inputs.device_rate as f32,
        ..Default::default()
    };

    let gain = source.gain.max(source.min_gain).min(source.max_gain)
        * inputs.listener.gain
        * source.direct_filter.gain;

    let layout = inputs.panning.layout();
    if let Some(table) = channel_targets(inputs.buffer_channels, inputs.panning.duplicate_stereo()) {
        for &targets in table {
            if let [channel] = targets {
                // Absent channels are folded down by the mixer.
                params.dry_gains[channel.index()] = gain;
                continue;
            }
            // Duplicated channels only feed speakers that exist, at equal
            // power.
            let present = targets.iter().filter(|c| layout.has_channel(**c)).count();
            let scale = 1.0 / (present.max(1) as f32).sqrt();
            for &channel in targets.iter().filter(|c| layout.has_channel(**c)) {
                params.dry_gains[channel.index()] = gain * scale;
            }
        }
    }
    params.dry_coeff = lp_coeff(source.direct_filter.gain_hf, cos_w0(inputs.device_rate));
    params
}

fn calc_spatial_params(source: &SourceProperties, inputs: &ParamInputs<'_>) -> SourceParams {
    let listener = inputs.listener;
    let context = inputs.context;
    let model = source.distance_model.unwrap_or(context.distance_model);
    let min_dist = source.reference_distance;
    let max_dist = source.max_distance;

    // Relative position and velocities stay in world space; only the
    // panning direction is rotated into the listener frame.
    let (relative, listener_velocity, local) = if source.head_relative {
        (source.position, Vec3::ZERO, source.position)
    } else {
        let relative = source.position - listener.position;
        (
            relative,
            listener.velocity,
            listener.basis().to_listener_space(relative),
        )
    };
    let distance = relative.length();
    let source_to_listener = (-relative).normalize_or_zero();

    // Distance attenuation
    let attenuation = model.attenuation(distance, min_dist, max_dist, source.rolloff_factor);
    let clamped = model.effective_distance(distance, min_dist, max_dist);
    let absorbed_meters = if model != DistanceModel::None && clamped > min_dist {
        (clamped - min_dist) * listener.meters_per_unit
    } else {
        0.0
    };

    let mut dry_hf = 1.0;
    if source.air_absorption_factor > 0.0 && absorbed_meters > 0.0 {
        let db = absorbed_meters * source.air_absorption_factor * AIR_ABSORB_GAIN_DB_HF;
        dry_hf *= 10f32.powf(db / 20.0);
    }

    // Cone
    let (cone_volume, cone_hf) = cone_gains(source, source_to_listener);
    let mut dry = source.gain * attenuation * cone_volume;
    if source.dry_gain_hf_auto {
        dry_hf *= cone_hf;
    }
    let dry_mix = dry.max(source.min_gain).min(source.max_gain);

    // Sends
    let mut wet_gains = [0.0; MAX_SENDS];
    let mut wet_hfs = [1.0; MAX_SENDS];
    for i in 0..inputs.num_sends.min(MAX_SENDS) {
        let Some(slot) = inputs.sends[i] else {
            continue;
        };
        if slot.effect_type == EffectType::Null {
            continue;
        }
        let send = &source.sends[i];

        let (mut wet, mut wet_hf) = if slot.aux_send_auto {
            let room_rolloff = source.room_rolloff_factor + slot.room_rolloff_factor;
            let mut wet = source.gain * model.attenuation(distance, min_dist, max_dist, room_rolloff);
            if source.wet_gain_auto {
                wet *= cone_volume;
            }
            let mut wet_hf = 1.0;
            if source.air_absorption_factor > 0.0 && absorbed_meters > 0.0 {
                wet_hf *= slot
                    .air_absorption_gain_hf
                    .powf(source.air_absorption_factor * absorbed_meters);
            }
            if source.wet_gain_hf_auto {
                wet_hf *= cone_hf;
            }
            let wet = wet.max(source.min_gain).min(source.max_gain) * dry_mix.sqrt();
            (wet, wet_hf)
        } else {
            (dry_mix, dry_hf)
        };

        // Slot gain belongs to the effect kernel, not the send.
        wet *= listener.gain * send.filter.gain;
        wet_hf *= send.filter.gain_hf;
        wet_gains[i] = wet;
        wet_hfs[i] = wet_hf;
    }

    dry = dry_mix * source.direct_filter.gain * listener.gain;
    dry_hf *= source.direct_filter.gain_hf;

    // Doppler
    let mut pitch = source.pitch;
    let df = context.doppler_factor;
    let c_dv = context.speed_of_sound * context.doppler_velocity;
    if df != 0.0 && c_dv > 0.0 {
        let limit = c_dv / df * DOPPLER_MARGIN;
        let vss = source.velocity.dot(source_to_listener).clamp(-limit, limit);
        let vls = listener_velocity.dot(source_to_listener).clamp(-limit, limit);
        pitch *= (c_dv - df * vls) / (c_dv - df * vss);
    }
    pitch *= inputs.buffer_rate as f32 / inputs.device_rate as f32;

    // Panning
    let gains = inputs.panning.pan_gains(local.normalize_or_zero());
    let mut dry_gains = [0.0; OUTPUT_CHANNELS];
    for (out, g) in dry_gains.iter_mut().zip(gains.iter()) {
        *out = g * dry;
    }

    // Filters
    let cw = cos_w0(inputs.device_rate);
    let mut wet_coeffs = [0.0; MAX_SENDS];
    for (coeff, hf) in wet_coeffs.iter_mut().zip(wet_hfs.iter()) {
        *coeff = lp_coeff(*hf, cw);
    }

    SourceParams {
        dry_gains,
        dry_coeff: lp_coeff(dry_hf.sqrt(), cw),
        wet_gains,
        wet_coeffs,
        pitch,
    }
}

/// Volume and HF multipliers from the source's directional cone.
fn cone_gains(source: &SourceProperties, source_to_listener: Vec3) -> (f32, f32) {
    let direction = source.direction.normalize_or_zero();
    if direction == Vec3::ZERO || source_to_listener == Vec3::ZERO {
        return (1.0, 1.0);
    }

    let angle = 2.0 * direction.dot(source_to_listener).clamp(-1.0, 1.0).acos().to_degrees();
    let inner = source.cone_inner_angle;
    let outer = source.cone_outer_angle;
    if angle > inner && angle <= outer {
        let scale = (angle - inner) / (outer - inner);
        (
            lerp(1.0, source.cone_outer_gain, scale),
            lerp(1.0, source.cone_outer_gain_hf, scale),
        )
    } else if angle > outer {
        (source.cone_outer_gain, source.cone_outer_gain_hf)
    } else {
        (1.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effects::{EffectProps, ReverbProps};
    use crate::format::{Channel, ChannelLayout};

    const MODELS: [DistanceModel; 7] = [
        DistanceModel::Inverse,
        DistanceModel::InverseClamped,
        DistanceModel::Linear,
        DistanceModel::LinearClamped,
        DistanceModel::Exponent,
        DistanceModel::ExponentClamped,
        DistanceModel::None,
    ];

    struct Fixture {
        listener: Listener,
        context: ContextParams,
        panning: PanningModel,
    }

    impl Fixture {
        fn new(layout: ChannelLayout) -> Self {
            Self {
                listener: Listener::default(),
                context: ContextParams::default(),
                panning: PanningModel::new(layout, None, true),
            }
        }

        fn inputs(&self) -> ParamInputs<'_> {
            ParamInputs {
                listener: &self.listener,
                context: &self.context,
                panning: &self.panning,
                device_rate: 48000,
                buffer_rate: 48000,
                buffer_channels: 1,
                num_sends: 2,
                sends: [None; MAX_SENDS],
            }
        }
    }

    #[test]
    fn attenuation_is_unity_at_reference_distance() {
        for model in MODELS {
            let gain = model.attenuation(2.0, 2.0, 50.0, 1.0);
            assert!((gain - 1.0).abs() < 1e-6, "{:?} gave {}", model, gain);
        }
    }

    #[test]
    fn attenuation_never_increases_with_distance() {
        for model in MODELS {
            let mut previous = model.attenuation(1.0, 1.0, 20.0, 1.5);
            for step in 1..200 {
                let d = 1.0 + step as f32 * 0.25;
                let gain = model.attenuation(d, 1.0, 20.0, 1.5);
                assert!(gain <= previous + 1e-6, "{:?} rose at {}", model, d);
                previous = gain;
            }
            if model == DistanceModel::None {
                assert_eq!(previous, 1.0);
            }
        }
    }

    #[test]
    fn clamped_models_hold_outside_range() {
        let near = DistanceModel::InverseClamped.attenuation(0.1, 1.0, 10.0, 1.0);
        assert_eq!(near, 1.0);
        let far = DistanceModel::LinearClamped.attenuation(100.0, 1.0, 10.0, 1.0);
        assert_eq!(far, 0.0);
        let inverted = DistanceModel::ExponentClamped.attenuation(100.0, 10.0, 1.0, 1.0);
        assert_eq!(inverted, 1.0);
    }

    #[test]
    fn source_ahead_at_reference_distance_hits_front_at_unity() {
        let fixture = Fixture::new(ChannelLayout::X51);
        let source = SourceProperties {
            position: Vec3::new(0.0, 0.0, -1.0),
            distance_model: Some(DistanceModel::Inverse),
            ..Default::default()
        };

        let params = calc_source_params(&source, &fixture.inputs());
        let front = Channel::FrontCenter.index();
        assert!((params.dry_gains[front] - 1.0).abs() < 1e-5);
        for (c, g) in params.dry_gains.iter().enumerate() {
            if c != front {
                assert!(g.abs() < 1e-5, "channel {} got {}", c, g);
            }
        }
        assert_eq!(params.dry_coeff, 0.0);
        assert_eq!(params.pitch, 1.0);
    }

    #[test]
    fn listener_orientation_moves_the_image() {
        let mut fixture = Fixture::new(ChannelLayout::Stereo);
        fixture.listener.forward = Vec3::X;
        let source = SourceProperties {
            position: Vec3::new(0.0, 0.0, -3.0),
            ..Default::default()
        };
        // Facing +X, a source at -Z is on the listener's left.
        let params = calc_source_params(&source, &fixture.inputs());
        assert!(params.dry_gains[Channel::FrontLeft.index()] > 0.3);
        assert!(params.dry_gains[Channel::FrontRight.index()].abs() < 1e-5);
    }

    #[test]
    fn zero_doppler_factor_leaves_pitch_alone() {
        let mut fixture = Fixture::new(ChannelLayout::Stereo);
        fixture.context.doppler_factor = 0.0;
        let source = SourceProperties {
            position: Vec3::new(0.0, 0.0, -10.0),
            velocity: Vec3::new(0.0, 0.0, 200.0),
            pitch: 1.25,
            ..Default::default()
        };
        let params = calc_source_params(&source, &fixture.inputs());
        assert_eq!(params.pitch, 1.25);
    }

    #[test]
    fn doppler_approaches_but_never_reaches_the_singularity() {
        let fixture = Fixture::new(ChannelLayout::Stereo);
        let mut previous = 1.0;
        for speed in [100.0, 300.0, 343.0, 343.3, 1000.0, 1e9] {
            let source = SourceProperties {
                position: Vec3::new(0.0, 0.0, -10.0),
                velocity: Vec3::new(0.0, 0.0, speed),
                ..Default::default()
            };
            let pitch = calc_source_params(&source, &fixture.inputs()).pitch;
            assert!(pitch.is_finite() && pitch > 0.0);
            assert!(pitch >= previous);
            previous = pitch;
        }
        assert!((previous - 1024.0).abs() < 1.0);
    }

    #[test]
    fn receding_source_drops_pitch() {
        let fixture = Fixture::new(ChannelLayout::Stereo);
        let source = SourceProperties {
            position: Vec3::new(0.0, 0.0, -10.0),
            velocity: Vec3::new(0.0, 0.0, -34.33),
            ..Default::default()
        };
        let pitch = calc_source_params(&source, &fixture.inputs()).pitch;
        assert!((pitch - 1.0 / 1.1).abs() < 1e-4);
    }

    #[test]
    fn outside_the_outer_cone_uses_outer_gain() {
        let fixture = Fixture::new(ChannelLayout::Stereo);
        let source = SourceProperties {
            position: Vec3::new(0.0, 0.0, -1.0),
            // Facing away from the listener.
            direction: Vec3::new(0.0, 0.0, -1.0),
            cone_inner_angle: 30.0,
            cone_outer_angle: 90.0,
            cone_outer_gain: 0.25,
            ..Default::default()
        };
        let params = calc_source_params(&source, &fixture.inputs());
        let total: f32 = params.dry_gains.iter().map(|g| g * g).sum();
        assert!((total.sqrt() - 0.25).abs() < 1e-5);
    }

    #[test]
    fn air_absorption_only_touches_high_frequencies() {
        let fixture = Fixture::new(ChannelLayout::Stereo);
        let source = SourceProperties {
            position: Vec3::new(0.0, 0.0, -101.0),
            air_absorption_factor: 1.0,
            distance_model: Some(DistanceModel::None),
            ..Default::default()
        };
        let params = calc_source_params(&source, &fixture.inputs());
        // The None model measures no distance, so nothing is absorbed.
        assert_eq!(params.dry_coeff, 0.0);

        let source = SourceProperties {
            distance_model: Some(DistanceModel::Inverse),
            rolloff_factor: 0.0,
            ..source
        };
        let params = calc_source_params(&source, &fixture.inputs());
        assert!(params.dry_coeff > 0.0);
        let total: f32 = params.dry_gains.iter().map(|g| g * g).sum();
        assert!((total - 1.0).abs() < 1e-5);
    }

    #[test]
    fn sends_follow_slot_settings() {
        let mut fixture = Fixture::new(ChannelLayout::Stereo);
        fixture.listener.gain = 0.5;
        let reverb = SlotProps::new(
            0.8,
            true,
            EffectType::Reverb,
            EffectProps::Reverb(ReverbProps::default()),
        );
        let mut inputs = fixture.inputs();
        inputs.sends[0] = Some(SendSlotInfo::from_props(&reverb));
        inputs.sends[1] = Some(SendSlotInfo {
            aux_send_auto: false,
            ..SendSlotInfo::from_props(&reverb)
        });

        let source = SourceProperties {
            position: Vec3::new(0.0, 0.0, -4.0),
            ..Default::default()
        };
        let params = calc_source_params(&source, &inputs);

        // Manual send mirrors the clamped dry level. The slot's own gain is
        // left to its kernel.
        let dry_mix = 0.25_f32;
        assert!((params.wet_gains[1] - dry_mix * 0.5).abs() < 1e-5);
        // Automatic send: zero room rolloff keeps full level, scaled by sqrt(dry).
        assert!((params.wet_gains[0] - dry_mix.sqrt() * 0.5).abs() < 1e-5);
        assert_eq!(params.wet_gains[2], 0.0);
    }

    #[test]
    fn null_slot_sends_nothing() {
        let fixture = Fixture::new(ChannelLayout::Stereo);
        let mut inputs = fixture.inputs();
        inputs.sends[0] = Some(SendSlotInfo::from_props(&SlotProps::new(
            1.0,
            true,
            EffectType::Null,
            EffectProps::Null,
        )));
        let params = calc_source_params(&SourceProperties::default(), &inputs);
        assert_eq!(params.wet_gains[0], 0.0);
    }

    #[test]
    fn multichannel_bypasses_spatialization() {
        let fixture = Fixture::new(ChannelLayout::Stereo);
        let mut inputs = fixture.inputs();
        inputs.buffer_channels = 2;
        inputs.buffer_rate = 24000;
        let source = SourceProperties {
            position: Vec3::new(100.0, 0.0, 0.0),
            velocity: Vec3::new(-50.0, 0.0, 0.0),
            gain: 0.5,
            ..Default::default()
        };
        let params = calc_source_params(&source, &inputs);
        assert_eq!(params.pitch, 0.5);
        assert_eq!(params.dry_gains[Channel::FrontLeft.index()], 0.5);
        assert_eq!(params.dry_gains[Channel::FrontRight.index()], 0.5);
        assert_eq!(params.wet_gains, [0.0; MAX_SENDS]);
    }

    #[test]
    fn duplicated_stereo_keeps_unit_power_on_present_speakers() {
        let fixture = Fixture::new(ChannelLayout::X51);
        let mut inputs = fixture.inputs();
        inputs.buffer_channels = 2;
        let params = calc_source_params(&SourceProperties::default(), &inputs);

        let half = std::f32::consts::FRAC_1_SQRT_2;
        assert!((params.dry_gains[Channel::FrontLeft.index()] - half).abs() < 1e-6);
        assert!((params.dry_gains[Channel::BackLeft.index()] - half).abs() < 1e-6);
        assert_eq!(params.dry_gains[Channel::SideLeft.index()], 0.0);
        assert!((params.dry_gains[Channel::BackRight.index()] - half).abs() < 1e-6);

        let fixture = Fixture::new(ChannelLayout::X71);
        let mut inputs = fixture.inputs();
        inputs.buffer_channels = 2;
        let params = calc_source_params(&SourceProperties::default(), &inputs);
        let third = 1.0 / 3f32.sqrt();
        for channel in [Channel::FrontRight, Channel::BackRight, Channel::SideRight] {
            assert!((params.dry_gains[channel.index()] - third).abs() < 1e-6);
        }
    }
}
