//! Session configuration.

use framebridge_driver::{AudioSampleType, DisplayModeId, PixelFormat, SAMPLE_RATE_48KHZ};
use serde::{Deserialize, Serialize};

/// What a session binds to and how it captures.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Position of the device in the driver's enumeration
    pub device_index: u32,
    /// Display mode, as a FourCC string ("Hp50") or its numeric value
    pub display_mode: DisplayModeId,
    /// Pixel format, as a FourCC string ("2vuy") or its numeric value
    pub pixel_format: PixelFormat,
    /// Audio capture settings; no audio is captured when absent
    pub audio: Option<AudioConfig>,
}

/// Audio capture settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub sample_rate: u32,
    pub sample_type: AudioSampleType,
    pub channel_count: u32,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: SAMPLE_RATE_48KHZ,
            sample_type: AudioSampleType::Int16,
            channel_count: 2,
        }
    }
}

impl AudioConfig {
    /// Bytes per sample frame: one sample for every channel.
    pub fn sample_byte_factor(&self) -> usize {
        self.channel_count as usize * self.sample_type.bytes() as usize
    }
}
