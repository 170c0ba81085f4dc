//! Channel, layout and sample representation types shared by the mixer,
//! the panning model and the output formatter.

/// Number of channels in the internal working set: eight positional
/// channels plus LFE.
pub const OUTPUT_CHANNELS: usize = 9;

/// One mix frame of the internal working set, indexed by [`Channel`].
pub type MixFrame = [f32; OUTPUT_CHANNELS];

/// Internal working-set channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(usize)]
pub enum Channel {
    FrontLeft = 0,
    FrontRight,
    FrontCenter,
    Lfe,
    BackLeft,
    BackRight,
    BackCenter,
    SideLeft,
    SideRight,
}

impl Channel {
    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }
}

/// Speaker layout of an output device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelLayout {
    Mono,
    Stereo,
    Quad,
    X51,
    X61,
    X71,
}

impl ChannelLayout {
    /// Physical channels present on the device, in mix order.
    pub fn channels(self) -> &'static [Channel] {
        use Channel::*;
        match self {
            Self::Mono => &[FrontCenter],
            Self::Stereo => &[FrontLeft, FrontRight],
            Self::Quad => &[FrontLeft, FrontRight, BackLeft, BackRight],
            Self::X51 => &[FrontLeft, FrontRight, FrontCenter, Lfe, BackLeft, BackRight],
            Self::X61 => &[
                FrontLeft,
                FrontRight,
                FrontCenter,
                Lfe,
                BackCenter,
                SideLeft,
                SideRight,
            ],
            Self::X71 => &[
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

    pub fn channel_count(self) -> usize {
        self.channels().len()
    }

    pub fn has_channel(self, channel: Channel) -> bool {
        self.channels().contains(&channel)
    }

    /// Whether the layout has speakers behind the front pair that a stereo
    /// source may be duplicated into.
    pub fn has_surround(self) -> bool {
        !matches!(self, Self::Mono | Self::Stereo)
    }
}

/// Output sample representation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SampleType {
    I8,
    U8,
    I16,
    U16,
    I32,
    U32,
    F32,
}

impl SampleType {
    pub fn bytes(self) -> usize {
        match self {
            Self::I8 | Self::U8 => 1,
            Self::I16 | Self::U16 => 2,
            Self::I32 | Self::U32 | Self::F32 => 4,
        }
    }
}

/// Interleaving order used for 5.1 and 7.1 output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelOrder {
    /// FL FR BL BR FC LFE [SL SR]
    Alsa,
    /// FL FR FC LFE BL BR [SL SR]
    Wfx,
}

impl ChannelOrder {
    pub fn platform_default() -> Self {
        if cfg!(windows) { Self::Wfx } else { Self::Alsa }
    }
}

/// Negotiated device format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceFormat {
    pub layout: ChannelLayout,
    pub sample_type: SampleType,
    pub sample_rate: u32,
    pub channel_order: ChannelOrder,
}

impl DeviceFormat {
    /// Bytes per interleaved output frame.
    pub fn block_align(&self) -> usize {
        self.layout.channel_count() * self.sample_type.bytes()
    }
}
