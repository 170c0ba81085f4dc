//! Speaker panning tables.
//!
//! The panning model is built once per device layout. It holds a polar
//! lookup table from a quantized horizontal angle to per-channel gains and a
//! downmix matrix that folds the internal working set into the channels the
//! device actually has.

use crate::format::{Channel, ChannelLayout, MixFrame, OUTPUT_CHANNELS};
use crate::math::{Vec3, lerp};
use std::f32::consts::{FRAC_1_SQRT_2, FRAC_PI_2, PI};

/// LUT entries per quarter circle.
pub const QUADRANT_NUM: usize = 128;
/// LUT entries over the full circle.
pub const LUT_NUM: usize = 4 * QUADRANT_NUM;

/// Nudge applied to a speaker that does not follow its predecessor.
const SPEAKER_NUDGE_DEGREES: f32 = 1.0;

/// Row-major `[source][destination]` fold-down matrix.
pub type DownmixMatrix = [MixFrame; OUTPUT_CHANNELS];

#[derive(Debug, Clone)]
pub struct PanningModel {
    layout: ChannelLayout,
    /// Speakers that take part in positional panning, ordered by angle
    /// (radians, 0 = ahead, positive = right).
    speakers: Vec<(Channel, f32)>,
    lut: Vec<MixFrame>,
    downmix: DownmixMatrix,
    duplicate_stereo: bool,
}

impl PanningModel {
    /// Builds the tables for `layout`.
    ///
    /// `overrides` replaces default speaker angles (degrees). Entries for
    /// channels the layout does not pan to, or outside [-180, 180], are
    /// ignored with a warning. Overrides that cannot be put in increasing
    /// order within (-180, 180] are dropped in favour of the defaults.
    pub fn new(
        layout: ChannelLayout,
        overrides: Option<&[(Channel, f32)]>,
        stereo_duplicate: bool,
    ) -> Self {
        let mut speakers: Vec<(Channel, f32)> = default_speakers(layout).to_vec();

        if let Some(overrides) = overrides {
            for &(channel, degrees) in overrides {
                if !(-180.0..=180.0).contains(&degrees) {
                    log::warn!(
                        "Ignoring {:?} angle {} for {:?}: out of range",
                        channel,
                        degrees,
                        layout
                    );
                    continue;
                }
                match speakers.iter_mut().find(|(ch, _)| *ch == channel) {
                    Some(speaker) => speaker.1 = degrees,
                    None => log::warn!("{:?} has no {:?} speaker to place", layout, channel),
                }
            }
            if !repair_speaker_order(layout, &mut speakers) {
                log::warn!(
                    "{:?}: speaker overrides do not fit in [-180, 180], using defaults",
                    layout
                );
                speakers = default_speakers(layout).to_vec();
            }
        }

        let speakers: Vec<(Channel, f32)> = speakers
            .into_iter()
            .map(|(ch, deg)| (ch, deg.to_radians()))
            .collect();

        let lut = build_lut(&speakers);
        let downmix = build_downmix(layout);
        let duplicate_stereo = stereo_duplicate && layout.has_surround();

        log::info!(
            "Panning initialized for {:?} ({} speakers, stereo duplication: {})",
            layout,
            speakers.len(),
            duplicate_stereo
        );

        Self {
            layout,
            speakers,
            lut,
            downmix,
            duplicate_stereo,
        }
    }

    pub fn layout(&self) -> ChannelLayout {
        self.layout
    }

    /// Speakers taking part in positional panning with their angle in radians.
    pub fn speakers(&self) -> &[(Channel, f32)] {
        &self.speakers
    }

    pub fn downmix(&self) -> &DownmixMatrix {
        &self.downmix
    }

    pub fn duplicate_stereo(&self) -> bool {
        self.duplicate_stereo
    }

    pub fn lut_gains(&self, index: usize) -> &MixFrame {
        &self.lut[index % LUT_NUM]
    }

    /// Quantizes a horizontal direction to a LUT index.
    ///
    /// `front` is the component straight ahead of the listener, `right` the
    /// component to the listener's right. A zero vector maps to index 0.
    pub fn lut_index(front: f32, right: f32) -> usize {
        let denom = front.abs() + right.abs();
        let mut pos = if denom > 0.0 {
            (QUADRANT_NUM as f32 * right.abs() / denom + 0.5) as usize
        } else {
            0
        };
        if front < 0.0 {
            pos = 2 * QUADRANT_NUM - pos;
        }
        if right < 0.0 {
            pos = LUT_NUM - pos;
        }
        pos % LUT_NUM
    }

    /// Per-channel gains for a listener-space direction.
    ///
    /// The direction should be unit length (or zero). Its horizontal part
    /// selects the LUT entry; whatever energy lies off the horizontal plane
    /// is spread evenly over all speakers, so sources above or below the
    /// listener fade towards a diffuse image instead of going silent.
    pub fn pan_gains(&self, dir: Vec3) -> MixFrame {
        let index = Self::lut_index(-dir.z, dir.x);
        let planar = (dir.x * dir.x + dir.z * dir.z).sqrt().min(1.0);
        let ambient = (1.0 / self.layout.channel_count() as f32).sqrt();
        let lut = &self.lut[index];

        let mut gains = [0.0; OUTPUT_CHANNELS];
        for &(channel, _) in &self.speakers {
            let c = channel.index();
            gains[c] = lerp(ambient, lut[c], planar);
        }
        gains
    }
}

fn default_speakers(layout: ChannelLayout) -> &'static [(Channel, f32)] {
    use Channel::*;
    match layout {
        ChannelLayout::Mono => &[(FrontCenter, 0.0)],
        ChannelLayout::Stereo => &[(FrontLeft, -90.0), (FrontRight, 90.0)],
        ChannelLayout::Quad => &[
            (BackLeft, -135.0),
            (FrontLeft, -45.0),
            (FrontRight, 45.0),
            (BackRight, 135.0),
        ],
        ChannelLayout::X51 => &[
            (BackLeft, -110.0),
            (FrontLeft, -30.0),
            (FrontCenter, 0.0),
            (FrontRight, 30.0),
            (BackRight, 110.0),
        ],
        ChannelLayout::X61 => &[
            (SideLeft, -90.0),
            (FrontLeft, -30.0),
            (FrontCenter, 0.0),
            (FrontRight, 30.0),
            (SideRight, 90.0),
            (BackCenter, 180.0),
        ],
        ChannelLayout::X71 => &[
            (BackLeft, -150.0),
            (SideLeft, -90.0),
            (FrontLeft, -30.0),
            (FrontCenter, 0.0),
            (FrontRight, 30.0),
            (SideRight, 90.0),
            (BackRight, 150.0),
        ],
    }
}

/// Speakers must increase monotonically around the circle. A speaker that
/// does not follow its predecessor is pushed just past it. Returns false
/// when that would take a speaker beyond 180 degrees.
fn repair_speaker_order(layout: ChannelLayout, speakers: &mut [(Channel, f32)]) -> bool {
    for i in 1..speakers.len() {
        let previous = speakers[i - 1].1;
        if speakers[i].1 <= previous {
            let repaired = previous + SPEAKER_NUDGE_DEGREES;
            if repaired > 180.0 {
                return false;
            }
            log::warn!(
                "{:?}: speaker {} of {} ({:?} at {}) does not follow the previous one, moving to {}",
                layout,
                i,
                speakers.len(),
                speakers[i].0,
                speakers[i].1,
                repaired
            );
            speakers[i].1 = repaired;
        }
    }
    true
}

/// Angle in radians represented by a LUT index, in [-PI, PI).
fn lut_angle(pos: usize) -> f32 {
    let q = QUADRANT_NUM as f32;
    let p = pos as f32;
    if pos < QUADRANT_NUM {
        (p / (q - p)).atan()
    } else if pos < 2 * QUADRANT_NUM {
        FRAC_PI_2 + ((p - q) / (2.0 * q - p)).atan()
    } else if pos < 3 * QUADRANT_NUM {
        ((p - 2.0 * q) / (3.0 * q - p)).atan() - PI
    } else {
        ((p - 3.0 * q) / (4.0 * q - p)).atan() - FRAC_PI_2
    }
}

fn build_lut(speakers: &[(Channel, f32)]) -> Vec<MixFrame> {
    let mut lut = vec![[0.0; OUTPUT_CHANNELS]; LUT_NUM];

    if speakers.len() == 1 {
        let c = speakers[0].0.index();
        for entry in lut.iter_mut() {
            entry[c] = 1.0;
        }
        return lut;
    }

    let last = speakers.len() - 1;
    for (pos, entry) in lut.iter_mut().enumerate() {
        let mut theta = lut_angle(pos);

        let bracket = speakers
            .windows(2)
            .find(|pair| theta >= pair[0].1 && theta < pair[1].1);
        match bracket {
            Some(pair) => {
                let (a, b) = (pair[0], pair[1]);
                let alpha = FRAC_PI_2 * (theta - a.1) / (b.1 - a.1);
                entry[a.0.index()] = alpha.cos();
                entry[b.0.index()] = alpha.sin();
            }
            None => {
                // Between the last speaker and, wrapping around, the first.
                let (a, b) = (speakers[last], speakers[0]);
                if theta < b.1 {
                    theta += 2.0 * PI;
                }
                let alpha = FRAC_PI_2 * (theta - a.1) / (2.0 * PI + b.1 - a.1);
                entry[a.0.index()] = alpha.cos();
                entry[b.0.index()] = alpha.sin();
            }
        }
    }
    lut
}

fn build_downmix(layout: ChannelLayout) -> DownmixMatrix {
    use Channel::*;

    let mut matrix = [[0.0; OUTPUT_CHANNELS]; OUTPUT_CHANNELS];
    for (i, row) in matrix.iter_mut().enumerate() {
        row[i] = 1.0;
    }

    let mut fold = |src: Channel, targets: &[(Channel, f32)]| {
        let row = &mut matrix[src.index()];
        *row = [0.0; OUTPUT_CHANNELS];
        for &(dst, gain) in targets {
            row[dst.index()] = gain;
        }
    };

    let half = FRAC_1_SQRT_2;
    match layout {
        ChannelLayout::Mono => {
            fold(FrontLeft, &[(FrontCenter, half)]);
            fold(FrontRight, &[(FrontCenter, half)]);
            fold(SideLeft, &[(FrontCenter, half)]);
            fold(SideRight, &[(FrontCenter, half)]);
            fold(BackLeft, &[(FrontCenter, half)]);
            fold(BackRight, &[(FrontCenter, half)]);
            fold(BackCenter, &[(FrontCenter, 1.0)]);
            fold(Lfe, &[]);
        }
        ChannelLayout::Stereo => {
            fold(FrontCenter, &[(FrontLeft, half), (FrontRight, half)]);
            fold(SideLeft, &[(FrontLeft, 1.0)]);
            fold(SideRight, &[(FrontRight, 1.0)]);
            fold(BackLeft, &[(FrontLeft, 1.0)]);
            fold(BackRight, &[(FrontRight, 1.0)]);
            fold(BackCenter, &[(FrontLeft, half), (FrontRight, half)]);
            fold(Lfe, &[]);
        }
        ChannelLayout::Quad => {
            fold(FrontCenter, &[(FrontLeft, half), (FrontRight, half)]);
            fold(SideLeft, &[(FrontLeft, half), (BackLeft, half)]);
            fold(SideRight, &[(FrontRight, half), (BackRight, half)]);
            fold(BackCenter, &[(BackLeft, half), (BackRight, half)]);
            fold(Lfe, &[]);
        }
        ChannelLayout::X51 => {
            fold(SideLeft, &[(FrontLeft, half), (BackLeft, half)]);
            fold(SideRight, &[(FrontRight, half), (BackRight, half)]);
            fold(BackCenter, &[(BackLeft, half), (BackRight, half)]);
        }
        ChannelLayout::X61 => {
            fold(BackLeft, &[(BackCenter, half), (SideLeft, half)]);
            fold(BackRight, &[(BackCenter, half), (SideRight, half)]);
        }
        ChannelLayout::X71 => {
            fold(BackCenter, &[(BackLeft, half), (BackRight, half)]);
        }
    }
    matrix
}
