//! The output device: owns the panning tables, the contexts and the mixer's
//! scratch buffers, and renders interleaved output on demand.

use crate::config::DeviceConfig;
use crate::context::Context;
use crate::effects::EffectRegistry;
use crate::error::Result;
use crate::events::{MixerEvent, emit};
use crate::format::{Channel, ChannelLayout, DeviceFormat, MixFrame, OUTPUT_CHANNELS};
use crate::mixer::{BUFFERSIZE, MixSettings, mix_context};
use crate::output::{StereoCrossfeed, write_output};
use crate::panning::PanningModel;
use crossbeam_channel::{Receiver, Sender};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

/// Buffers only the mixer touches.
struct MixerScratch {
    dry: Vec<MixFrame>,
    left: Vec<f32>,
    right: Vec<f32>,
    crossfeed: Option<Box<dyn StereoCrossfeed>>,
}

impl MixerScratch {
    fn new() -> Self {
        Self {
            dry: vec![[0.0; OUTPUT_CHANNELS]; BUFFERSIZE],
            left: vec![0.0; BUFFERSIZE],
            right: vec![0.0; BUFFERSIZE],
            crossfeed: None,
        }
    }

    fn apply_crossfeed(&mut self, frames: usize) {
        let Some(crossfeed) = self.crossfeed.as_mut() else {
            return;
        };
        let (fl, fr) = (Channel::FrontLeft.index(), Channel::FrontRight.index());
        let dry = &mut self.dry[..frames];
        let left = &mut self.left[..frames];
        let right = &mut self.right[..frames];
        for ((frame, l), r) in dry.iter().zip(left.iter_mut()).zip(right.iter_mut()) {
            *l = frame[fl];
            *r = frame[fr];
        }
        crossfeed.process(left, right);
        for ((frame, l), r) in dry.iter_mut().zip(left.iter()).zip(right.iter()) {
            frame[fl] = *l;
            frame[fr] = *r;
        }
    }
}

pub struct Device {
    config: DeviceConfig,
    settings: MixSettings,
    panning: PanningModel,
    registry: Arc<EffectRegistry>,
    contexts: Mutex<Vec<Arc<Context>>>,
    scratch: Mutex<MixerScratch>,
    connected: AtomicBool,
    frames_rendered: AtomicU64,
    events_tx: Sender<MixerEvent>,
    events_rx: Receiver<MixerEvent>,
}

impl std::fmt::Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Device")
            .field("format", &self.settings.format)
            .field("connected", &self.is_connected())
            .finish()
    }
}

impl Device {
    /// Creates a device with the built-in effect kernels.
    pub fn new(config: DeviceConfig) -> Result<Self> {
        Self::with_registry(config, EffectRegistry::with_builtin())
    }

    pub fn with_registry(config: DeviceConfig, registry: EffectRegistry) -> Result<Self> {
        config.validate()?;

        let format = config.format();
        let panning = PanningModel::new(
            config.layout,
            config.speaker_angles.get(&config.layout).map(Vec::as_slice),
            config.stereo_duplicate,
        );
        let settings = MixSettings {
            format,
            ramp_length: config.ramp_length(),
            resampler: config.resampler,
            max_pitch: config.max_pitch,
            num_sends: config.num_sends,
        };
        let (events_tx, events_rx) = crossbeam_channel::bounded(config.event_capacity.max(1));

        log::info!(
            "Device opened: {:?} {:?} @ {} Hz, {} sends, ramp {} samples",
            format.layout,
            format.sample_type,
            format.sample_rate,
            settings.num_sends,
            settings.ramp_length
        );

        Ok(Self {
            config,
            settings,
            panning,
            registry: Arc::new(registry),
            contexts: Mutex::new(Vec::new()),
            scratch: Mutex::new(MixerScratch::new()),
            connected: AtomicBool::new(true),
            frames_rendered: AtomicU64::new(0),
            events_tx,
            events_rx,
        })
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    pub fn format(&self) -> DeviceFormat {
        self.settings.format
    }

    pub fn panning(&self) -> &PanningModel {
        &self.panning
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    pub fn frames_rendered(&self) -> u64 {
        self.frames_rendered.load(Ordering::Relaxed)
    }

    pub fn create_context(&self) -> Arc<Context> {
        let context = Arc::new(Context::new(
            self.settings.format,
            Arc::clone(&self.registry),
            self.settings.num_sends,
            self.config.max_sources,
        ));
        self.contexts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::clone(&context));
        log::info!("Context created");
        context
    }

    pub fn remove_context(&self, context: &Arc<Context>) -> bool {
        let mut contexts = self.contexts.lock().unwrap_or_else(PoisonError::into_inner);
        let before = contexts.len();
        contexts.retain(|c| !Arc::ptr_eq(c, context));
        before != contexts.len()
    }

    /// Installs or clears the stereo crossfeed stage. Only used on stereo
    /// devices.
    pub fn set_crossfeed(&self, crossfeed: Option<Box<dyn StereoCrossfeed>>) {
        if crossfeed.is_some() && self.settings.format.layout != ChannelLayout::Stereo {
            log::warn!(
                "Crossfeed ignored on {:?} output",
                self.settings.format.layout
            );
            return;
        }
        self.scratch
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .crossfeed = crossfeed;
    }

    /// Fills `out` with `out.len() / block_align` frames of mixed output in
    /// the device format. Trailing bytes that do not make up a whole frame
    /// are left untouched.
    pub fn render(&self, out: &mut [u8]) {
        let format = self.settings.format;
        let block_align = format.block_align();
        let frames = out.len() / block_align;

        let mut scratch = self.scratch.lock().unwrap_or_else(PoisonError::into_inner);
        let mut written = 0;
        while written < frames {
            let count = (frames - written).min(BUFFERSIZE);
            let dry = &mut scratch.dry[..count];
            dry.fill([0.0; OUTPUT_CHANNELS]);

            if self.is_connected() {
                let contexts = self.contexts.lock().unwrap_or_else(PoisonError::into_inner);
                for context in contexts.iter() {
                    let mut state = context.lock();
                    mix_context(&mut state, &self.settings, &self.panning, dry, &self.events_tx);
                }
                drop(contexts);
                scratch.apply_crossfeed(count);
            }

            write_output(
                &scratch.dry[..count],
                &format,
                &mut out[written * block_align..(written + count) * block_align],
            );
            written += count;
        }
        self.frames_rendered
            .fetch_add(frames as u64, Ordering::Relaxed);
    }

    /// Reacts to the backend losing the device: every source in every
    /// context stops and later renders produce silence.
    pub fn handle_disconnect(&self) {
        if !self.connected.swap(false, Ordering::AcqRel) {
            return;
        }
        log::error!("Audio device disconnected, stopping all sources");

        let contexts = self.contexts.lock().unwrap_or_else(PoisonError::into_inner);
        for context in contexts.iter() {
            context.stop_all();
        }
        emit(&self.events_tx, MixerEvent::DeviceDisconnected);
    }

    /// Drains events reported by the mixer since the last call.
    pub fn poll_events(&self) -> Vec<MixerEvent> {
        self.events_rx.try_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::Buffer;
    use crate::format::SampleType;
    use crate::source::PlayState;

    fn read_f32(out: &[u8], index: usize) -> f32 {
        let i = index * 4;
        f32::from_ne_bytes([out[i], out[i + 1], out[i + 2], out[i + 3]])
    }

    #[test]
    fn render_loops_over_large_requests() {
        let device = Device::new(DeviceConfig::default()).unwrap();
        let context = device.create_context();
        let id = context.add_source();
        let samples = vec![0.5f32; BUFFERSIZE * 3];
        context
            .queue_buffers(id, [Some(Buffer::from_f32(&samples, 1, 48000).unwrap())])
            .unwrap();
        context.update_source(id, |p| p.position = -crate::math::Vec3::Z).unwrap();
        context.play(id).unwrap();

        let frames = BUFFERSIZE + 100;
        let mut out = vec![0u8; frames * device.format().block_align()];
        device.render(&mut out);

        let expected = 0.5 * std::f32::consts::FRAC_1_SQRT_2;
        assert!((read_f32(&out, 0) - expected).abs() < 1e-5);
        assert!((read_f32(&out, (frames - 1) * 2 + 1) - expected).abs() < 1e-5);
        assert_eq!(context.source_cursor(id).unwrap().pos, frames);
        assert_eq!(device.frames_rendered(), frames as u64);
    }

    #[test]
    fn disconnect_stops_everything_and_silences_output() {
        let config = DeviceConfig::default().sample_type(SampleType::U8);
        let device = Device::new(config).unwrap();
        let context = device.create_context();
        let id = context.add_source();
        context
            .queue_buffers(id, [Some(Buffer::from_f32(&[1.0; 64], 1, 48000).unwrap())])
            .unwrap();
        context.play(id).unwrap();

        device.handle_disconnect();
        device.handle_disconnect();
        assert!(!device.is_connected());
        assert_eq!(context.source_state(id).unwrap(), PlayState::Stopped);
        assert_eq!(device.poll_events(), vec![MixerEvent::DeviceDisconnected]);

        let mut out = vec![0u8; 32];
        device.render(&mut out);
        assert!(out.iter().all(|&b| b == 128));
    }

    struct Swap;

    impl StereoCrossfeed for Swap {
        fn process(&mut self, left: &mut [f32], right: &mut [f32]) {
            left.swap_with_slice(right);
        }
    }

    #[test]
    fn crossfeed_runs_on_stereo_output() {
        let device = Device::new(DeviceConfig::default()).unwrap();
        device.set_crossfeed(Some(Box::new(Swap)));
        let context = device.create_context();
        let id = context.add_source();
        context
            .queue_buffers(id, [Some(Buffer::from_f32(&[1.0; 64], 1, 48000).unwrap())])
            .unwrap();
        context
            .update_source(id, |p| p.position = crate::math::Vec3::new(-1.0, 0.0, 0.0))
            .unwrap();
        context.play(id).unwrap();

        let mut out = vec![0u8; 8 * 8];
        device.render(&mut out);
        assert!(read_f32(&out, 0).abs() < 1e-5);
        assert!(read_f32(&out, 1) > 0.9);
    }
}
