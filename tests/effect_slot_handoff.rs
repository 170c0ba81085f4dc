use spatialmix::effects::{ChorusProps, EchoProps};
use spatialmix::format::{DeviceFormat, MixFrame};
use spatialmix::{
    ChannelLayout, ChannelOrder, EffectContext, EffectProps, EffectRegistry, EffectSlot,
    EffectState, EffectStateFactory, EffectType, PanningModel, Result, SampleType, SlotProps,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicIsize, AtomicUsize, Ordering};
use std::thread;

static LIVE_KERNELS: AtomicIsize = AtomicIsize::new(0);
static MISMATCHED_UPDATES: AtomicUsize = AtomicUsize::new(0);

/// Kernel that tracks how many instances exist and checks it is only ever
/// fed snapshots of its own kind.
struct CountingState {
    kind: EffectType,
}

impl CountingState {
    fn new(kind: EffectType) -> Self {
        LIVE_KERNELS.fetch_add(1, Ordering::SeqCst);
        Self { kind }
    }
}

impl Drop for CountingState {
    fn drop(&mut self) {
        LIVE_KERNELS.fetch_sub(1, Ordering::SeqCst);
    }
}

impl EffectState for CountingState {
    fn device_update(&mut self, _format: &DeviceFormat) -> Result<()> {
        Ok(())
    }

    fn update(&mut self, _context: &EffectContext<'_>, slot: &SlotProps) {
        if slot.effect_type != self.kind || !slot.props.fits(self.kind) {
            MISMATCHED_UPDATES.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn process(&mut self, _input: &[f32], _output: &mut [MixFrame]) {}
}

struct CountingFactory(EffectType);

impl EffectStateFactory for CountingFactory {
    fn create(&self) -> Result<Box<dyn EffectState>> {
        Ok(Box::new(CountingState::new(self.0)))
    }
}

fn format() -> DeviceFormat {
    DeviceFormat {
        layout: ChannelLayout::Stereo,
        sample_type: SampleType::F32,
        sample_rate: 48000,
        channel_order: ChannelOrder::Alsa,
    }
}

#[test]
fn concurrent_edits_never_tear_or_leak_kernels() {
    let _ = env_logger::builder().is_test(true).try_init();

    let mut registry = EffectRegistry::with_builtin();
    registry.register(EffectType::Echo, Arc::new(CountingFactory(EffectType::Echo)));
    registry.register(EffectType::Chorus, Arc::new(CountingFactory(EffectType::Chorus)));

    let (slot, mut runtime) = EffectSlot::new(format(), Arc::new(registry)).unwrap();
    let done = Arc::new(AtomicBool::new(false));

    let consumer = {
        let done = Arc::clone(&done);
        thread::spawn(move || {
            let panning = PanningModel::new(ChannelLayout::Stereo, None, false);
            let context = EffectContext {
                format: format(),
                panning: &panning,
            };
            let mut dry: Vec<MixFrame> = vec![[0.0; 9]; 64];
            while !done.load(Ordering::Acquire) {
                runtime.apply_update(&context);
                let props = runtime.props();
                assert!(props.props.fits(props.effect_type));
                assert!((0.0..=1.0).contains(&props.gain));
                runtime.process(&mut dry);
                thread::yield_now();
            }
            runtime
        })
    };

    const EDITS: usize = 2000;
    for i in 0..EDITS {
        match i % 3 {
            0 => slot
                .set_effect(
                    EffectType::Echo,
                    EffectProps::Echo(EchoProps {
                        delay: (i % 100) as f32 * 0.001,
                        ..Default::default()
                    }),
                )
                .unwrap(),
            1 => slot
                .set_effect(EffectType::Chorus, EffectProps::Chorus(ChorusProps::default()))
                .unwrap(),
            _ => slot.set_gain((i % 10) as f32 / 10.0).unwrap(),
        }
        if i % 64 == 0 {
            thread::yield_now();
        }
    }
    // Leaves the slot on echo.
    slot.set_effect(EffectType::Echo, EffectProps::Echo(EchoProps::default()))
        .unwrap();

    done.store(true, Ordering::Release);
    let mut runtime = consumer.join().unwrap();

    let panning = PanningModel::new(ChannelLayout::Stereo, None, false);
    let context = EffectContext {
        format: format(),
        panning: &panning,
    };
    runtime.apply_update(&context);
    assert!(!slot.has_pending_update());
    assert_eq!(runtime.props().effect_type, EffectType::Echo);
    assert_eq!(runtime.props().props, EffectProps::Echo(EchoProps::default()));

    slot.release_retired_states();
    assert_eq!(LIVE_KERNELS.load(Ordering::SeqCst), 1);
    assert_eq!(MISMATCHED_UPDATES.load(Ordering::SeqCst), 0);
    assert_eq!(slot.allocated_snapshots(), slot.free_snapshots() + 1);

    drop(runtime);
    assert_eq!(LIVE_KERNELS.load(Ordering::SeqCst), 0);
}
