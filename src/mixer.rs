//! The per-quantum mixing pass.
//!
//! For every playing source the mixer resolves parameters once per quantum,
//! then walks the source's queue with an 18.14 fixed-point cursor,
//! interpolating, filtering and accumulating into the dry buffer and the
//! wet buffers of the slots the source sends to. Buffer boundaries are
//! handed to the queue's transition rules. Nothing here allocates, blocks
//! or logs.

use crate::buffer::Buffer;
use crate::buffer_queue::{BufferQueue, Cursor, Transition};
use crate::config::Resampler;
use crate::context::ContextState;
use crate::effect_slot::SlotRuntime;
use crate::effects::EffectContext;
use crate::events::{MixerEvent, emit};
use crate::format::{Channel, DeviceFormat, MixFrame};
use crate::listener::Listener;
use crate::panning::PanningModel;
use crate::source::{MAX_SENDS, PlayState, Source, Voice};
use crate::source_params::{
    ContextParams, ParamInputs, SendSlotInfo, SourceParams, calc_source_params,
};
use crossbeam_channel::Sender;
use std::sync::Arc;

/// Largest number of frames mixed in one pass.
pub const BUFFERSIZE: usize = 4096;

pub const FRACTIONBITS: u32 = 14;
pub const FRACTIONONE: u32 = 1 << FRACTIONBITS;
pub const FRACTIONMASK: u32 = FRACTIONONE - 1;

/// Linear gain ramp towards a target over a fixed number of samples.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct GainRamp {
    current: f32,
    target: f32,
    step: f32,
    remaining: usize,
}

impl GainRamp {
    /// Jumps straight to `target`.
    pub fn snap(&mut self, target: f32) {
        self.current = target;
        self.target = target;
        self.step = 0.0;
        self.remaining = 0;
    }

    /// Starts a new ramp from the current gain when the target changes. An
    /// unchanged target lets a ramp in progress run on.
    pub fn set_target(&mut self, target: f32, length: usize) {
        if target == self.target {
            return;
        }
        self.target = target;
        if length == 0 {
            self.snap(target);
            return;
        }
        self.step = (target - self.current) / length as f32;
        self.remaining = length;
    }

    /// Gain for the next sample.
    #[inline]
    pub fn next(&mut self) -> f32 {
        if self.remaining > 0 {
            self.remaining -= 1;
            self.current = if self.remaining == 0 {
                self.target
            } else {
                self.current + self.step
            };
        }
        self.current
    }

    pub fn current(&self) -> f32 {
        self.current
    }

    pub fn is_settled(&self) -> bool {
        self.remaining == 0
    }
}

/// Device-wide values fixed at creation.
#[derive(Debug, Clone, Copy)]
pub struct MixSettings {
    pub format: DeviceFormat,
    pub ramp_length: usize,
    pub resampler: Resampler,
    pub max_pitch: u32,
    pub num_sends: usize,
}

/// Working-set channels each source channel feeds, per buffer channel
/// count. Mono content is panned instead and has no table.
pub fn channel_targets(
    channels: u16,
    duplicate_stereo: bool,
) -> Option<&'static [&'static [Channel]]> {
    use Channel::*;
    let table: &'static [&'static [Channel]] = match channels {
        2 if duplicate_stereo => &[
            &[FrontLeft, BackLeft, SideLeft],
            &[FrontRight, BackRight, SideRight],
        ],
        2 => &[&[FrontLeft], &[FrontRight]],
        4 => &[&[FrontLeft], &[FrontRight], &[BackLeft], &[BackRight]],
        6 => &[
            &[FrontLeft],
            &[FrontRight],
            &[FrontCenter],
            &[Lfe],
            &[BackLeft],
            &[BackRight],
        ],
        7 => &[
            &[FrontLeft],
            &[FrontRight],
            &[FrontCenter],
            &[Lfe],
            &[BackCenter],
            &[SideLeft],
            &[SideRight],
        ],
        8 => &[
            &[FrontLeft],
            &[FrontRight],
            &[FrontCenter],
            &[Lfe],
            &[BackLeft],
            &[BackRight],
            &[SideLeft],
            &[SideRight],
        ],
        _ => return None,
    };
    Some(table)
}

/// Fixed-point cursor increment for a resampling ratio.
pub fn pitch_step(pitch: f32, max_pitch: u32) -> u32 {
    let ratio = pitch.min(max_pitch as f32);
    // Negative and NaN ratios saturate to zero; the cursor always moves.
    ((ratio * FRACTIONONE as f32 + 0.5) as u32).max(1)
}

/// Output frames that fit before the cursor passes `frames`, rounded up.
fn samples_until_end(cursor: Cursor, frames: usize, step: u32) -> usize {
    let position = ((cursor.pos as u64) << FRACTIONBITS) | cursor.frac as u64;
    let end = (frames as u64) << FRACTIONBITS;
    if position >= end {
        return 0;
    }
    end.saturating_sub(position).div_ceil(step as u64) as usize
}

#[inline]
fn advance_cursor(cursor: &mut Cursor, step: u32) {
    cursor.frac += step;
    cursor.pos += (cursor.frac >> FRACTIONBITS) as usize;
    cursor.frac &= FRACTIONMASK;
}

#[inline]
fn read_sample(
    queue: &BufferQueue,
    buffer: &Buffer,
    cursor: Cursor,
    chan: usize,
    resampler: Resampler,
) -> f32 {
    let s0 = queue.sample(buffer, cursor.pos, chan);
    match resampler {
        Resampler::Point => s0,
        Resampler::Linear => {
            let s1 = queue.sample(buffer, cursor.pos + 1, chan);
            s0 + (s1 - s0) * (cursor.frac as f32 / FRACTIONONE as f32)
        }
    }
}

/// Mixes one context for `dry.len()` frames: applies pending slot updates,
/// mixes every active source, then runs the slots' effects into `dry`.
pub(crate) fn mix_context(
    state: &mut ContextState,
    settings: &MixSettings,
    panning: &PanningModel,
    dry: &mut [MixFrame],
    events: &Sender<MixerEvent>,
) {
    let ContextState {
        sources,
        active,
        slots,
        listener,
        params,
    } = state;

    let effect_context = EffectContext {
        format: settings.format,
        panning,
    };
    for slot in slots.iter_mut() {
        slot.apply_update(&effect_context);
    }

    for id in active.iter() {
        if let Some(source) = sources.get_mut(id) {
            mix_source(
                source, listener, params, slots, settings, panning, dry, events,
            );
        }
    }
    active.retain(|id| sources.get(id).is_some_and(Source::is_playing));

    for slot in slots.iter_mut() {
        slot.process(dry);
    }
}

#[allow(clippy::too_many_arguments)]
fn mix_source(
    source: &mut Source,
    listener: &Listener,
    context: &ContextParams,
    slots: &mut [SlotRuntime],
    settings: &MixSettings,
    panning: &PanningModel,
    dry: &mut [MixFrame],
    events: &Sender<MixerEvent>,
) {
    if source.state != PlayState::Playing {
        return;
    }
    let Some((channels, buffer_rate)) = source
        .queue
        .format_buffer()
        .map(|b| (b.channels(), b.sample_rate()))
    else {
        return;
    };

    let num_sends = settings.num_sends.min(MAX_SENDS);
    let mut send_slots = [None; MAX_SENDS];
    let mut send_info = [None; MAX_SENDS];
    for (i, send) in source.props.sends.iter().take(num_sends).enumerate() {
        let Some(target) = &send.slot else {
            continue;
        };
        if let Some(index) = slots.iter().position(|s| Arc::ptr_eq(s.slot(), target)) {
            send_slots[i] = Some(index);
            send_info[i] = Some(SendSlotInfo::from_props(slots[index].props()));
        }
    }

    let inputs = ParamInputs {
        listener,
        context,
        panning,
        device_rate: settings.format.sample_rate,
        buffer_rate,
        buffer_channels: channels,
        num_sends,
        sends: send_info,
    };
    let params = calc_source_params(&source.props, &inputs);
    apply_targets(&mut source.voice, &params, settings.ramp_length);

    let step = pitch_step(params.pitch, settings.max_pitch);
    let looping = source.props.looping;
    let source_id = source.id();
    let table = channel_targets(channels, panning.duplicate_stereo());

    let mut done = 0;
    while done < dry.len() {
        if source.voice.cursor.pos >= source.queue.current_frames() {
            match source.queue.advance(&mut source.voice.cursor, looping) {
                Transition::NextBuffer => {
                    if !looping {
                        emit(events, MixerEvent::BufferProcessed { source_id });
                    }
                    continue;
                }
                Transition::Looped => {
                    emit(events, MixerEvent::SourceLooped { source_id });
                    continue;
                }
                Transition::Stopped => {
                    source.state = PlayState::Stopped;
                    emit(events, MixerEvent::BufferProcessed { source_id });
                    emit(events, MixerEvent::SourceStopped { source_id });
                    break;
                }
                Transition::Empty => break,
            }
        }

        source.queue.refresh_pad(looping);
        let queue = &source.queue;
        let voice = &mut source.voice;
        let Some(buffer) = queue.current_buffer() else {
            break;
        };

        let count = samples_until_end(voice.cursor, buffer.frames(), step).min(dry.len() - done);
        let out = &mut dry[done..done + count];

        if channels == 1 {
            for (i, frame) in out.iter_mut().enumerate() {
                let value = read_sample(queue, buffer, voice.cursor, 0, settings.resampler);

                let filtered = voice.dry_filters[0].process4(value);
                for (c, sample) in frame.iter_mut().enumerate() {
                    *sample += filtered * voice.dry_ramps[c].next();
                }

                for s in 0..num_sends {
                    let Some(index) = send_slots[s] else {
                        continue;
                    };
                    let wet = voice.wet_filters[s].process2(value);
                    slots[index].wet_mut()[done + i] += wet * voice.wet_ramps[s].next();
                }

                advance_cursor(&mut voice.cursor, step);
            }
        } else if let Some(table) = table {
            let matrix = panning.downmix();
            for frame in out.iter_mut() {
                for (chan, targets) in table.iter().enumerate() {
                    let value = read_sample(queue, buffer, voice.cursor, chan, settings.resampler);
                    let filtered = voice.dry_filters[chan].process2(value);
                    for &target in targets.iter() {
                        let gain = voice.dry_ramps[target.index()].next();
                        let row = &matrix[target.index()];
                        for (sample, weight) in frame.iter_mut().zip(row.iter()) {
                            *sample += filtered * gain * weight;
                        }
                    }
                }
                advance_cursor(&mut voice.cursor, step);
            }
        } else {
            for _ in 0..count {
                advance_cursor(&mut voice.cursor, step);
            }
        }

        done += count;
    }
}

/// Points the voice's ramps and filters at a fresh set of targets. A
/// source's first quantum starts at its targets with nothing to ramp from.
fn apply_targets(voice: &mut Voice, params: &SourceParams, ramp_length: usize) {
    let first_start = std::mem::take(&mut voice.first_start);

    for (ramp, &gain) in voice.dry_ramps.iter_mut().zip(params.dry_gains.iter()) {
        if first_start {
            ramp.snap(gain);
        } else {
            ramp.set_target(gain, ramp_length);
        }
    }
    for (ramp, &gain) in voice.wet_ramps.iter_mut().zip(params.wet_gains.iter()) {
        if first_start {
            ramp.snap(gain);
        } else {
            ramp.set_target(gain, ramp_length);
        }
    }

    for filter in voice.dry_filters.iter_mut() {
        filter.coeff = params.dry_coeff;
    }
    for (filter, &coeff) in voice.wet_filters.iter_mut().zip(params.wet_coeffs.iter()) {
        filter.coeff = coeff;
    }
}
