//! Capture session: binds a device, drives the enable/start/stop
//! transitions, and receives frames from the driver thread.

use std::fmt;
use std::sync::Arc;

use framebridge_driver::{
    AudioPacketRef, AudioSampleType, DetectedSignalFlags, DeviceInput, DisplayModeId, DisplayModeInfo, Driver,
    DriverError, FormatChangedEvents, InputCallback, PixelFormat, VideoFrameRef, VideoInputFlags,
    SUPPORTED_CHANNEL_COUNTS,
};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::config::{AudioConfig, SessionConfig};
use crate::delivery::{Exchange, FrameReceiver};
use crate::error::{CaptureError, CaptureResult};
use crate::handle::Retained;
use crate::slot::SlotStats;

/// Lifecycle of a [`CaptureSession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No device bound
    Idle,
    /// Device bound; audio may have been enabled
    Configured { audio_enabled: bool },
    /// Streams running, frames arriving
    Streaming,
    /// Streams stopped; bind a device again before restarting
    Stopped,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Idle => write!(f, "idle"),
            SessionState::Configured { audio_enabled: true } => write!(f, "configured (audio enabled)"),
            SessionState::Configured { audio_enabled: false } => write!(f, "configured"),
            SessionState::Streaming => write!(f, "streaming"),
            SessionState::Stopped => write!(f, "stopped"),
        }
    }
}

/// Registered with the driver; runs on the driver's capture thread.
struct FrameArrivalHandler {
    exchange: Arc<Exchange>,
}

impl InputCallback for FrameArrivalHandler {
    fn on_frame_arrived(&self, video: Option<&VideoFrameRef>, audio: Option<&AudioPacketRef>) {
        if video.is_none() && audio.is_none() {
            trace!("Frame arrival with neither video nor audio");
            return;
        }
        let video = video.map(Retained::retain);
        let audio = audio.map(Retained::retain);
        self.exchange.slot.store(video, audio);
        self.exchange.bridge.signal();
    }

    fn on_format_changed(
        &self,
        events: FormatChangedEvents,
        new_mode: &DisplayModeInfo,
        _detected: DetectedSignalFlags,
    ) {
        // Renegotiation is not supported: capture continues in the mode it
        // was started with.
        warn!(
            "Input format changed to {} ({}x{}, mode changed: {}); ignoring",
            new_mode.name, new_mode.width, new_mode.height, events.display_mode_changed
        );
    }
}

/// Bridges one capture device to a consumer on a tokio runtime.
pub struct CaptureSession {
    driver: Arc<dyn Driver>,
    config: SessionConfig,
    state: SessionState,
    device_name: Option<String>,
    input: Option<Arc<dyn DeviceInput>>,
    audio: Option<AudioConfig>,
    mode: Option<DisplayModeInfo>,
    exchange: Option<Arc<Exchange>>,
    receiver: Option<FrameReceiver>,
    delivery: Option<JoinHandle<()>>,
}

impl CaptureSession {
    pub fn new(driver: Arc<dyn Driver>, config: SessionConfig) -> Self {
        Self {
            driver,
            config,
            state: SessionState::Idle,
            device_name: None,
            input: None,
            audio: None,
            mode: None,
            exchange: None,
            receiver: None,
            delivery: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Model name of the bound device.
    pub fn device_name(&self) -> Option<&str> {
        self.device_name.as_deref()
    }

    /// Display mode resolved by the last successful `start`.
    pub fn display_mode(&self) -> Option<&DisplayModeInfo> {
        self.mode.as_ref()
    }

    pub fn audio_config(&self) -> Option<&AudioConfig> {
        self.audio.as_ref()
    }

    /// Bytes per audio sample frame, once audio is enabled.
    pub fn sample_byte_factor(&self) -> Option<usize> {
        self.audio.map(|a| a.sample_byte_factor())
    }

    /// Slot counters for the current (or last) streaming run.
    pub fn stats(&self) -> Option<SlotStats> {
        self.exchange.as_ref().map(|e| e.slot.stats())
    }

    /// Bind the device and enable audio as described by the session config.
    pub fn configure(&mut self) -> CaptureResult<()> {
        self.bind_device(self.config.device_index)?;
        if let Some(audio) = self.config.audio {
            self.enable_audio(audio.sample_rate, audio.sample_type, audio.channel_count)?;
        }
        Ok(())
    }

    /// Bind the `index`-th device of the driver's enumeration.
    pub fn bind_device(&mut self, index: u32) -> CaptureResult<()> {
        if self.state == SessionState::Streaming {
            return Err(CaptureError::InvalidState {
                operation: "bind a device",
                state: self.state,
            });
        }

        let device = self
            .driver
            .devices()
            .map_err(CaptureError::hardware("devices"))?
            .nth(index as usize)
            .ok_or(CaptureError::DeviceNotFound { index })?;
        let name = device.model_name();
        let input = device
            .query_input()
            .ok_or_else(|| CaptureError::InterfaceUnavailable(format!("{name} has no capture input")))?;

        self.disable_audio();
        info!("Bound capture device {}: {}", index, name);
        self.device_name = Some(name);
        self.input = Some(input);
        self.mode = None;
        self.state = SessionState::Configured { audio_enabled: false };
        Ok(())
    }

    /// Enable audio capture. Must happen before `start`.
    ///
    /// On failure the previous audio configuration is kept.
    pub fn enable_audio(
        &mut self,
        sample_rate: u32,
        sample_type: AudioSampleType,
        channel_count: u32,
    ) -> CaptureResult<()> {
        if !SUPPORTED_CHANNEL_COUNTS.contains(&channel_count) {
            return Err(CaptureError::InvalidArgument(format!(
                "audio channel count must be 2, 8 or 16 (got {channel_count})"
            )));
        }

        let input = match self.state {
            SessionState::Idle | SessionState::Configured { .. } => self
                .input
                .clone()
                .ok_or_else(|| CaptureError::InterfaceUnavailable("no device bound".into()))?,
            state => {
                return Err(CaptureError::InvalidState {
                    operation: "enable audio",
                    state,
                })
            }
        };

        input
            .enable_audio_input(sample_rate, sample_type, channel_count)
            .map_err(|e| match e {
                DriverError::InvalidArgument => CaptureError::InvalidArgument(format!(
                    "driver rejected audio setup ({sample_rate} Hz, {} bit, {channel_count} channels)",
                    sample_type.bits()
                )),
                other => CaptureError::HardwareCallFailed {
                    call: "enable_audio_input",
                    source: other,
                },
            })?;

        let audio = AudioConfig {
            sample_rate,
            sample_type,
            channel_count,
        };
        debug!(
            "Audio enabled: {} Hz, {} bit, {} channels ({} bytes per sample frame)",
            sample_rate,
            sample_type.bits(),
            channel_count,
            audio.sample_byte_factor()
        );
        self.audio = Some(audio);
        self.state = SessionState::Configured { audio_enabled: true };
        Ok(())
    }

    /// Resolve `mode`, register for frame arrival, enable video and start
    /// the streams. Any failure leaves the session configured, not streaming.
    pub fn start(&mut self, mode: DisplayModeId, format: PixelFormat) -> CaptureResult<()> {
        let input = match self.state {
            SessionState::Idle => return Err(CaptureError::DisplayModeNotSupported(mode)),
            SessionState::Configured { .. } => match &self.input {
                Some(input) => Arc::clone(input),
                None => return Err(CaptureError::DisplayModeNotSupported(mode)),
            },
            state => {
                return Err(CaptureError::InvalidState {
                    operation: "start",
                    state,
                })
            }
        };

        let info = input
            .display_modes()
            .map_err(CaptureError::hardware("display_modes"))?
            .into_iter()
            .find(|m| m.id == mode)
            .ok_or(CaptureError::DisplayModeNotSupported(mode))?;
        debug!(
            "Resolved display mode {}: {}x{}, {}/{}",
            mode, info.width, info.height, info.frame_duration, info.time_scale
        );

        let factor = self.sample_byte_factor().unwrap_or(0);
        let exchange = Exchange::new(factor);
        let handler: Arc<dyn InputCallback> = Arc::new(FrameArrivalHandler {
            exchange: Arc::clone(&exchange),
        });

        input
            .set_callback(Some(handler))
            .map_err(CaptureError::hardware("set_callback"))?;

        if let Err(e) = input.enable_video_input(mode, format, VideoInputFlags::default()) {
            clear_callback(input.as_ref());
            return Err(CaptureError::HardwareCallFailed {
                call: "enable_video_input",
                source: e,
            });
        }

        if let Err(e) = input.start_streams() {
            if let Err(e) = input.disable_video_input() {
                warn!("Failed to disable video input after start failure: {}", e);
            }
            clear_callback(input.as_ref());
            return Err(CaptureError::HardwareCallFailed {
                call: "start_streams",
                source: e,
            });
        }

        info!(
            "Capture streaming: {} ({}x{} @ {:.2} fps, format {})",
            info.name,
            info.width,
            info.height,
            info.frame_rate(),
            format
        );
        self.mode = Some(info);
        self.receiver = Some(FrameReceiver::new(Arc::clone(&exchange)));
        self.exchange = Some(exchange);
        self.state = SessionState::Streaming;
        Ok(())
    }

    /// Take the receiver for the current streaming run.
    ///
    /// Returns `None` when not streaming or when the receiver was already
    /// taken (including by `do_capture`).
    pub fn frames(&mut self) -> Option<FrameReceiver> {
        self.receiver.take()
    }

    /// Start streaming with the configured mode and format, delivering each
    /// wake's frame to `on_frame` on a task of the current tokio runtime.
    ///
    /// `on_frame` receives the video and audio bytes, `None` for a
    /// component that did not arrive.
    pub fn do_capture<F>(&mut self, mut on_frame: F) -> CaptureResult<()>
    where
        F: FnMut(Option<Vec<u8>>, Option<Vec<u8>>) + Send + 'static,
    {
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| CaptureError::NoRuntime)?;
        self.start(self.config.display_mode, self.config.pixel_format)?;

        let Some(mut receiver) = self.frames() else {
            return Ok(());
        };
        self.delivery = Some(runtime.spawn(async move {
            while let Some(frame) = receiver.recv().await {
                on_frame(frame.video, frame.audio);
            }
            debug!("Frame delivery loop ended");
        }));
        Ok(())
    }

    /// Trigger a consumer wake without a new arrival.
    pub fn signal(&self) {
        if let Some(exchange) = &self.exchange {
            exchange.bridge.signal();
        }
    }

    /// Stop streaming. Does nothing unless the session is streaming.
    ///
    /// Once this returns the driver no longer calls into the session and
    /// any undelivered frame has been released.
    pub fn stop(&mut self) {
        if self.state != SessionState::Streaming {
            debug!("Stop requested while {}; nothing to do", self.state);
            return;
        }
        if let Some(input) = &self.input {
            if let Err(e) = input.stop_streams() {
                warn!("Failed to stop streams: {}", e);
            }
            if let Err(e) = input.disable_video_input() {
                warn!("Failed to disable video input: {}", e);
            }
            clear_callback(input.as_ref());
        }
        if let Some(exchange) = &self.exchange {
            exchange.close();
        }
        self.receiver = None;
        // The delivery task sees the closed bridge and finishes on its own.
        self.delivery = None;
        self.state = SessionState::Stopped;
        info!("Capture stopped");
    }

    /// Turn off audio on the bound input, if this session enabled it.
    fn disable_audio(&mut self) {
        let Some(audio) = self.audio.take() else {
            return;
        };
        if let Some(input) = &self.input {
            match input.disable_audio_input() {
                Ok(()) => debug!("Audio disabled ({} channels)", audio.channel_count),
                Err(e) => warn!("Failed to disable audio input: {}", e),
            }
        }
    }
}

fn clear_callback(input: &dyn DeviceInput) {
    if let Err(e) = input.set_callback(None) {
        warn!("Failed to unregister frame callback: {}", e);
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        self.stop();
    }
}

impl fmt::Debug for CaptureSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CaptureSession")
            .field("config", &self.config)
            .field("state", &self.state)
            .field("device_name", &self.device_name)
            .field("audio", &self.audio)
            .field("mode", &self.mode)
            .finish()
    }
}
