//! Quantization of the mixed working set into the device's interleaved
//! byte layout.

use crate::format::{Channel, ChannelLayout, ChannelOrder, DeviceFormat, MixFrame, SampleType};

/// Post-processing hook for stereo output, run on the mixed frames before
/// they are quantized.
pub trait StereoCrossfeed: Send {
    fn process(&mut self, left: &mut [f32], right: &mut [f32]);
}

/// Interleaving order of the device's channels.
pub fn output_order(layout: ChannelLayout, order: ChannelOrder) -> &'static [Channel] {
    use Channel::*;
    match (layout, order) {
        (ChannelLayout::Mono, _) => &[FrontCenter],
        (ChannelLayout::Stereo, _) => &[FrontLeft, FrontRight],
        (ChannelLayout::Quad, _) => &[FrontLeft, FrontRight, BackLeft, BackRight],
        (ChannelLayout::X51, ChannelOrder::Alsa) => {
            &[FrontLeft, FrontRight, BackLeft, BackRight, FrontCenter, Lfe]
        }
        (ChannelLayout::X51, ChannelOrder::Wfx) => {
            &[FrontLeft, FrontRight, FrontCenter, Lfe, BackLeft, BackRight]
        }
        (ChannelLayout::X61, _) => &[
            FrontLeft,
            FrontRight,
            FrontCenter,
            Lfe,
            BackCenter,
            SideLeft,
            SideRight,
        ],
        (ChannelLayout::X71, ChannelOrder::Alsa) => &[
            FrontLeft,
            FrontRight,
            BackLeft,
            BackRight,
            FrontCenter,
            Lfe,
            SideLeft,
            SideRight,
        ],
        (ChannelLayout::X71, ChannelOrder::Wfx) => &[
            FrontLeft,
            FrontRight,
            FrontCenter,
            Lfe,
            BackLeft,
            BackRight,
            SideLeft,
            SideRight,
        ],
    }
}

#[inline]
fn to_i8(v: f32) -> i8 {
    (v.clamp(-1.0, 1.0) * 127.0) as i8
}

#[inline]
fn to_i16(v: f32) -> i16 {
    (v.clamp(-1.0, 1.0) * 32767.0) as i16
}

#[inline]
fn to_i32(v: f32) -> i32 {
    ((v.clamp(-1.0, 1.0) * 16_777_215.0) as i32) << 7
}

fn write_with<const N: usize>(
    frames: &[MixFrame],
    order: &[Channel],
    out: &mut [u8],
    convert: impl Fn(f32) -> [u8; N],
) {
    let block_align = order.len() * N;
    for (frame, bytes) in frames.iter().zip(out.chunks_exact_mut(block_align)) {
        for (channel, sample) in order.iter().zip(bytes.chunks_exact_mut(N)) {
            sample.copy_from_slice(&convert(frame[channel.index()]));
        }
    }
}

/// Writes `frames` into `out` as interleaved native-endian samples.
/// Writes `min(frames.len(), out.len() / block_align)` frames.
pub fn write_output(frames: &[MixFrame], format: &DeviceFormat, out: &mut [u8]) {
    let order = output_order(format.layout, format.channel_order);
    match format.sample_type {
        SampleType::I8 => write_with(frames, order, out, |v| to_i8(v).to_ne_bytes()),
        SampleType::U8 => write_with(frames, order, out, |v| {
            ((to_i8(v) as i16 + 128) as u8).to_ne_bytes()
        }),
        SampleType::I16 => write_with(frames, order, out, |v| to_i16(v).to_ne_bytes()),
        SampleType::U16 => write_with(frames, order, out, |v| {
            ((to_i16(v) as i32 + 32768) as u16).to_ne_bytes()
        }),
        SampleType::I32 => write_with(frames, order, out, |v| to_i32(v).to_ne_bytes()),
        SampleType::U32 => write_with(frames, order, out, |v| {
            ((to_i32(v) as i64 + (1 << 31)) as u32).to_ne_bytes()
        }),
        SampleType::F32 => write_with(frames, order, out, |v| v.to_ne_bytes()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::OUTPUT_CHANNELS;

    fn format(layout: ChannelLayout, sample_type: SampleType, order: ChannelOrder) -> DeviceFormat {
        DeviceFormat {
            layout,
            sample_type,
            sample_rate: 48000,
            channel_order: order,
        }
    }

    fn frame(values: &[(Channel, f32)]) -> MixFrame {
        let mut frame = [0.0; OUTPUT_CHANNELS];
        for &(c, v) in values {
            frame[c.index()] = v;
        }
        frame
    }

    #[test]
    fn integer_conversions_clamp_symmetrically() {
        let frames = [frame(&[(Channel::FrontLeft, 2.0), (Channel::FrontRight, -2.0)])];

        let mut out = [0u8; 4];
        write_output(&frames, &format(ChannelLayout::Stereo, SampleType::I16, ChannelOrder::Alsa), &mut out);
        assert_eq!(i16::from_ne_bytes([out[0], out[1]]), 32767);
        assert_eq!(i16::from_ne_bytes([out[2], out[3]]), -32767);

        let mut out = [0u8; 2];
        write_output(&frames, &format(ChannelLayout::Stereo, SampleType::U8, ChannelOrder::Alsa), &mut out);
        assert_eq!(out, [255, 1]);

        let mut out = [0u8; 8];
        write_output(&frames, &format(ChannelLayout::Stereo, SampleType::I32, ChannelOrder::Alsa), &mut out);
        assert_eq!(i32::from_ne_bytes([out[0], out[1], out[2], out[3]]), 16_777_215 << 7);
    }

    #[test]
    fn silence_is_mid_scale_for_unsigned_types() {
        let frames = [[0.0; OUTPUT_CHANNELS]];
        let mut out = [0u8; 4];
        write_output(&frames, &format(ChannelLayout::Stereo, SampleType::U16, ChannelOrder::Alsa), &mut out);
        assert_eq!(u16::from_ne_bytes([out[0], out[1]]), 32768);

        let mut out = [0u8; 8];
        write_output(&frames, &format(ChannelLayout::Stereo, SampleType::U32, ChannelOrder::Alsa), &mut out);
        assert_eq!(u32::from_ne_bytes([out[0], out[1], out[2], out[3]]), 1 << 31);
    }

    #[test]
    fn surround_order_depends_on_platform_convention() {
        let frames = [frame(&[(Channel::FrontCenter, 0.5), (Channel::BackLeft, -0.5)])];
        let read = |out: &[u8], i: usize| {
            f32::from_ne_bytes([out[i * 4], out[i * 4 + 1], out[i * 4 + 2], out[i * 4 + 3]])
        };

        let mut out = [0u8; 24];
        write_output(&frames, &format(ChannelLayout::X51, SampleType::F32, ChannelOrder::Alsa), &mut out);
        assert_eq!(read(&out, 2), -0.5);
        assert_eq!(read(&out, 4), 0.5);

        write_output(&frames, &format(ChannelLayout::X51, SampleType::F32, ChannelOrder::Wfx), &mut out);
        assert_eq!(read(&out, 2), 0.5);
        assert_eq!(read(&out, 4), -0.5);
    }

    #[test]
    fn short_output_is_not_overrun() {
        let frames = vec![[0.25; OUTPUT_CHANNELS]; 4];
        let mut out = [0u8; 3];
        write_output(&frames, &format(ChannelLayout::Mono, SampleType::U8, ChannelOrder::Alsa), &mut out);
        assert_eq!(out, [159, 159, 159]);
    }
}
