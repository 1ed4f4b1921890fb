//! Frame handles and the frame-arrival callback interface.

use std::sync::Arc;

use crate::types::{DetectedSignalFlags, DisplayModeInfo, FormatChangedEvents, PixelFormat};

/// Explicit reference counting on driver-owned objects.
///
/// The driver keeps the memory behind a handle alive while its count is
/// above zero. Every `add_ref` must be paired with exactly one `release`.
pub trait RefCounted: Send + Sync {
    /// Increment the reference count, returning the new count.
    fn add_ref(&self) -> u32;

    /// Decrement the reference count, returning the new count.
    fn release(&self) -> u32;
}

/// A captured video frame owned by the driver.
pub trait VideoInputFrame: RefCounted {
    /// Pointer to the first byte of the frame buffer.
    ///
    /// The buffer holds `row_bytes() * height()` bytes and stays valid
    /// while the caller holds a reference on the frame.
    fn bytes(&self) -> *const u8;

    /// Stride of one row in bytes (may include padding).
    fn row_bytes(&self) -> usize;

    fn width(&self) -> usize;

    fn height(&self) -> usize;

    fn pixel_format(&self) -> PixelFormat;
}

/// A captured packet of interleaved audio samples owned by the driver.
pub trait AudioInputPacket: RefCounted {
    /// Pointer to the first sample.
    ///
    /// The packet holds `sample_frame_count()` sample frames; the byte size
    /// of one sample frame is fixed by the audio input configuration.
    fn bytes(&self) -> *const u8;

    /// Number of sample frames (one sample per channel) in the packet.
    fn sample_frame_count(&self) -> usize;
}

pub type VideoFrameRef = Arc<dyn VideoInputFrame>;
pub type AudioPacketRef = Arc<dyn AudioInputPacket>;

/// Callback interface the driver invokes on its own capture thread.
///
/// The driver never calls these methods concurrently with each other.
/// Handles are only borrowed for the duration of the call; an implementor
/// that keeps one must take its own reference first.
pub trait InputCallback: Send + Sync {
    /// Called when a frame and/or an audio packet is available.
    ///
    /// # Arguments
    /// * `video` - The captured video frame, if any
    /// * `audio` - The audio packet captured alongside it, if any
    fn on_frame_arrived(&self, video: Option<&VideoFrameRef>, audio: Option<&AudioPacketRef>);

    /// Called when format detection notices a different input signal.
    ///
    /// # Arguments
    /// * `events` - Which properties of the signal changed
    /// * `new_mode` - The display mode now detected on the input
    /// * `detected` - Colour and stereo flags of the detected signal
    fn on_format_changed(
        &self,
        events: FormatChangedEvents,
        new_mode: &DisplayModeInfo,
        detected: DetectedSignalFlags,
    );
}
