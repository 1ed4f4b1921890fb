//! Consumer side of the bridge: drain the slot once per wake and turn the
//! driver handles into owned byte buffers.

use std::sync::Arc;

use framebridge_driver::{AudioInputPacket, VideoInputFrame};
use tracing::{debug, trace, warn};

use crate::handle::{RetainedAudio, RetainedVideo};
use crate::notify::NotificationBridge;
use crate::slot::FrameSlot;

/// Owned copy of one delivery cycle.
///
/// `None` means the component did not arrive this cycle; it is never
/// represented as an empty buffer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapturedFrame {
    pub video: Option<Vec<u8>>,
    pub audio: Option<Vec<u8>>,
}

impl CapturedFrame {
    /// Copy bytes out of drained handles, releasing each handle afterwards.
    pub fn extract(
        video: Option<RetainedVideo>,
        audio: Option<RetainedAudio>,
        sample_byte_factor: usize,
    ) -> Self {
        Self {
            video: video.and_then(extract_video),
            audio: audio.and_then(|packet| extract_audio(packet, sample_byte_factor)),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.video.is_none() && self.audio.is_none()
    }
}

/// Copy `row_bytes × height` bytes out of a frame, then release it.
pub fn extract_video(frame: RetainedVideo) -> Option<Vec<u8>> {
    let Some(len) = frame.row_bytes().checked_mul(frame.height()) else {
        warn!(
            "Video frame size overflows ({} row bytes × {} rows)",
            frame.row_bytes(),
            frame.height()
        );
        return None;
    };
    copy_bytes(frame.bytes(), len, "video frame")
}

/// Copy `sample_frame_count × sample_byte_factor` bytes out of a packet,
/// then release it.
pub fn extract_audio(packet: RetainedAudio, sample_byte_factor: usize) -> Option<Vec<u8>> {
    let Some(len) = packet.sample_frame_count().checked_mul(sample_byte_factor) else {
        warn!(
            "Audio packet size overflows ({} sample frames × {} bytes)",
            packet.sample_frame_count(),
            sample_byte_factor
        );
        return None;
    };
    copy_bytes(packet.bytes(), len, "audio packet")
}

fn copy_bytes(ptr: *const u8, len: usize, what: &str) -> Option<Vec<u8>> {
    if len == 0 {
        return Some(Vec::new());
    }
    if ptr.is_null() {
        warn!("Driver returned a null buffer for a {} of {} bytes", what, len);
        return None;
    }
    // SAFETY: the caller holds a reference on the handle, which keeps the
    // driver buffer of `len` bytes alive until the handle is dropped.
    let bytes = unsafe { std::slice::from_raw_parts(ptr, len) };
    Some(bytes.to_vec())
}

/// State shared between the arrival callback and the consumer.
#[derive(Debug)]
pub(crate) struct Exchange {
    pub(crate) slot: FrameSlot,
    pub(crate) bridge: NotificationBridge,
    pub(crate) sample_byte_factor: usize,
}

impl Exchange {
    pub(crate) fn new(sample_byte_factor: usize) -> Arc<Self> {
        Arc::new(Self {
            slot: FrameSlot::new(),
            bridge: NotificationBridge::new(),
            sample_byte_factor,
        })
    }

    /// Close the bridge and release anything still pending.
    pub(crate) fn close(&self) {
        self.bridge.close();
        let (video, audio) = self.slot.drain();
        if video.is_some() || audio.is_some() {
            debug!("Releasing undelivered frame on close");
        }
    }
}

/// Receives frames for one streaming run of a session.
#[derive(Debug)]
pub struct FrameReceiver {
    exchange: Arc<Exchange>,
}

impl FrameReceiver {
    pub(crate) fn new(exchange: Arc<Exchange>) -> Self {
        Self { exchange }
    }

    /// Wait for the next wake and return what the slot held.
    ///
    /// Performs exactly one drain per wake; wakes that find the slot empty
    /// are skipped. Returns `None` once the session has stopped.
    pub async fn recv(&mut self) -> Option<CapturedFrame> {
        loop {
            if !self.exchange.bridge.wait().await {
                return None;
            }
            let (video, audio) = self.exchange.slot.drain();
            if video.is_none() && audio.is_none() {
                trace!("Wake with empty frame slot");
                continue;
            }
            return Some(CapturedFrame::extract(
                video,
                audio,
                self.exchange.sample_byte_factor,
            ));
        }
    }

    /// Counters for the slot behind this receiver.
    pub fn stats(&self) -> crate::SlotStats {
        self.exchange.slot.stats()
    }
}
