//! cpal output backend driving [`Device::render`].

use crate::device::Device;
use crate::error::{Result, SpatialMixError};
use crate::format::SampleType;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

fn sample_format(sample_type: SampleType) -> cpal::SampleFormat {
    match sample_type {
        SampleType::I8 => cpal::SampleFormat::I8,
        SampleType::U8 => cpal::SampleFormat::U8,
        SampleType::I16 => cpal::SampleFormat::I16,
        SampleType::U16 => cpal::SampleFormat::U16,
        SampleType::I32 => cpal::SampleFormat::I32,
        SampleType::U32 => cpal::SampleFormat::U32,
        SampleType::F32 => cpal::SampleFormat::F32,
    }
}

/// Plays a [`Device`] on the host's default output.
pub struct CpalBackend {
    device: Arc<Device>,
    stream: Option<cpal::Stream>,
    is_running: Arc<AtomicBool>,
}

impl CpalBackend {
    pub fn new(device: Arc<Device>) -> Self {
        Self {
            device,
            stream: None,
            is_running: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }

    /// Opens the default output device in the mixing device's format and
    /// starts pulling audio from it.
    pub fn start(&mut self) -> Result<()> {
        if self.is_running.load(Ordering::Relaxed) {
            return Ok(());
        }

        let host = cpal::default_host();
        let output = host.default_output_device().ok_or_else(|| {
            SpatialMixError::AudioDevice("No default output device available".into())
        })?;

        let format = self.device.format();
        let config = cpal::StreamConfig {
            channels: format.layout.channel_count() as u16,
            sample_rate: cpal::SampleRate(format.sample_rate),
            buffer_size: cpal::BufferSize::Fixed(self.device.config().update_size as u32),
        };

        let device = Arc::clone(&self.device);
        let is_running = Arc::clone(&self.is_running);
        let error_device = Arc::clone(&self.device);

        let stream = output
            .build_output_stream_raw(
                &config,
                sample_format(format.sample_type),
                move |data: &mut cpal::Data, _: &cpal::OutputCallbackInfo| {
                    if is_running.load(Ordering::Relaxed) {
                        device.render(data.bytes_mut());
                    } else {
                        data.bytes_mut().fill(0);
                    }
                },
                move |err| match err {
                    cpal::StreamError::DeviceNotAvailable => {
                        error_device.handle_disconnect();
                    }
                    other => log::error!("Audio stream error: {}", other),
                },
                None,
            )
            .map_err(|e| SpatialMixError::AudioDevice(format!("Failed to build stream: {}", e)))?;

        stream
            .play()
            .map_err(|e| SpatialMixError::AudioDevice(format!("Failed to start stream: {}", e)))?;

        self.stream = Some(stream);
        self.is_running.store(true, Ordering::Relaxed);
        log::info!(
            "Output stream started: {} channels @ {} Hz",
            config.channels,
            format.sample_rate
        );
        Ok(())
    }

    pub fn stop(&mut self) -> Result<()> {
        if let Some(stream) = self.stream.take() {
            self.is_running.store(false, Ordering::Relaxed);
            drop(stream);
            log::info!("Output stream stopped");
        }
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::Relaxed)
    }
}

impl Drop for CpalBackend {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}
