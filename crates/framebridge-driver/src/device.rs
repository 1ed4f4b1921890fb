//! Device enumeration and input control.

use std::sync::Arc;

use crate::callbacks::InputCallback;
use crate::error::DriverResult;
use crate::types::{AudioSampleType, DisplayModeId, DisplayModeInfo, PixelFormat, VideoInputFlags};

/// Entry point into a capture driver.
pub trait Driver: Send + Sync {
    /// Enumerate attached devices in driver order.
    ///
    /// Fails when the driver API itself cannot be reached.
    fn devices(&self) -> DriverResult<Box<dyn Iterator<Item = Box<dyn Device>> + Send>>;
}

/// One enumerated capture device.
pub trait Device: Send {
    fn model_name(&self) -> String;

    /// Query the capture-input capability, `None` when the device has none.
    fn query_input(&self) -> Option<Arc<dyn DeviceInput>>;
}

/// Capture-input capability of a device.
pub trait DeviceInput: Send + Sync {
    /// Display modes this input can capture.
    fn display_modes(&self) -> DriverResult<Vec<DisplayModeInfo>>;

    fn enable_video_input(
        &self,
        mode: DisplayModeId,
        format: PixelFormat,
        flags: VideoInputFlags,
    ) -> DriverResult<()>;

    fn disable_video_input(&self) -> DriverResult<()>;

    /// Enable audio capture alongside video.
    ///
    /// Fails with `DriverError::InvalidArgument` when `channel_count` is not
    /// supported by the hardware.
    fn enable_audio_input(
        &self,
        sample_rate: u32,
        sample_type: AudioSampleType,
        channel_count: u32,
    ) -> DriverResult<()>;

    fn disable_audio_input(&self) -> DriverResult<()>;

    fn start_streams(&self) -> DriverResult<()>;

    fn stop_streams(&self) -> DriverResult<()>;

    /// Install or remove the frame-arrival callback.
    ///
    /// Removing the callback is synchronous: once `set_callback(None)`
    /// returns, no callback invocation is in progress or will start.
    fn set_callback(&self, callback: Option<Arc<dyn InputCallback>>) -> DriverResult<()>;
}
