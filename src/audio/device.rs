//! Audio device lookup
//!
//! The relay always runs at a device's native format (no forced
//! resampling), so only the default devices and their default configs are
//! needed here.

use cpal::traits::{DeviceTrait, HostTrait};

use crate::audio::frame::FrameFormat;
use crate::error::AudioError;

/// Wrapper around a cpal device with its resolved native format
pub struct AudioDevice {
    inner: cpal::Device,
    pub name: String,
    pub format: FrameFormat,
}

impl AudioDevice {
    pub fn inner(&self) -> &cpal::Device {
        &self.inner
    }

    pub fn into_inner(self) -> cpal::Device {
        self.inner
    }

    /// Native stream config matching `self.format`
    pub fn stream_config(&self) -> cpal::StreamConfig {
        cpal::StreamConfig {
            channels: self.format.channels,
            sample_rate: cpal::SampleRate(self.format.sample_rate),
            buffer_size: cpal::BufferSize::Default,
        }
    }
}

/// Default input device at its native format
pub fn default_input_device() -> Result<AudioDevice, AudioError> {
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or_else(|| AudioError::DeviceUnavailable("no default input device".to_string()))?;
    let name = device.name().unwrap_or_else(|_| "Unknown".to_string());
    let config = device
        .default_input_config()
        .map_err(|e| AudioError::DeviceUnavailable(e.to_string()))?;
    let format = FrameFormat::native(config.sample_rate().0, config.channels());
    Ok(AudioDevice {
        inner: device,
        name,
        format,
    })
}

/// Default output device at its native format
pub fn default_output_device() -> Result<AudioDevice, AudioError> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| AudioError::DeviceUnavailable("no default output device".to_string()))?;
    let name = device.name().unwrap_or_else(|_| "Unknown".to_string());
    let config = device
        .default_output_config()
        .map_err(|e| AudioError::DeviceUnavailable(e.to_string()))?;
    let format = FrameFormat::native(config.sample_rate().0, config.channels());
    Ok(AudioDevice {
        inner: device,
        name,
        format,
    })
}
