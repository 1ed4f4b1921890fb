//! Software capture driver.
//!
//! Implements the full driver contract without hardware: a device list, a
//! display-mode table, input enable/start/stop, and a producer thread that
//! emits frames at the selected mode's rate. Every handle it hands out is
//! tracked in a [`RefLedger`] so callers can check that nothing leaked and
//! nothing was released twice.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::thread;
use std::time::Duration;

use tracing::{debug, info, trace, warn};

use crate::callbacks::{AudioInputPacket, AudioPacketRef, InputCallback, RefCounted, VideoFrameRef, VideoInputFrame};
use crate::device::{Device, DeviceInput, Driver};
use crate::error::{DriverError, DriverResult};
use crate::types::{
    AudioSampleType, DetectedSignalFlags, DisplayModeId, DisplayModeInfo, FormatChangedEvents, PixelFormat,
    VideoInputFlags, SAMPLE_RATE_48KHZ, SUPPORTED_CHANNEL_COUNTS,
};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Display modes every synthetic input reports.
pub fn standard_display_modes() -> Vec<DisplayModeInfo> {
    vec![
        DisplayModeInfo::new(DisplayModeId::NTSC, "NTSC", 720, 486, 1001, 30000),
        DisplayModeInfo::new(DisplayModeId::PAL, "PAL", 720, 576, 1000, 25000),
        DisplayModeInfo::new(DisplayModeId::HD720P50, "720p50", 1280, 720, 1000, 50000),
        DisplayModeInfo::new(DisplayModeId::HD1080I50, "1080i50", 1920, 1080, 1000, 25000),
        DisplayModeInfo::new(DisplayModeId::HD1080P25, "1080p25", 1920, 1080, 1000, 25000),
        DisplayModeInfo::new(DisplayModeId::HD1080P30, "1080p30", 1920, 1080, 1000, 30000),
        DisplayModeInfo::new(DisplayModeId::HD1080P50, "1080p50", 1920, 1080, 1000, 50000),
        DisplayModeInfo::new(DisplayModeId::HD1080P60, "1080p60", 1920, 1080, 1000, 60000),
    ]
}

// ─── Reference accounting ──────────────────────────────────────────────────

/// Counts the handles a synthetic input has created and how they ended.
#[derive(Debug, Default)]
pub struct RefLedger {
    created: AtomicU64,
    freed: AtomicU64,
    over_released: AtomicU64,
}

impl RefLedger {
    /// Handles whose reference count has not yet reached zero.
    pub fn live(&self) -> u64 {
        self.created.load(Ordering::SeqCst) - self.freed.load(Ordering::SeqCst)
    }

    pub fn created(&self) -> u64 {
        self.created.load(Ordering::SeqCst)
    }

    /// Number of `release` calls made on a handle whose count was already zero.
    pub fn over_released(&self) -> u64 {
        self.over_released.load(Ordering::SeqCst)
    }
}

/// Reference count starting at one, owned by whoever created the handle.
#[derive(Debug)]
struct RefCount {
    count: AtomicU32,
    ledger: Arc<RefLedger>,
}

impl RefCount {
    fn new(ledger: &Arc<RefLedger>) -> Self {
        ledger.created.fetch_add(1, Ordering::SeqCst);
        Self {
            count: AtomicU32::new(1),
            ledger: Arc::clone(ledger),
        }
    }

    fn add_ref(&self) -> u32 {
        self.count.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn release(&self) -> u32 {
        let result = self
            .count
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        match result {
            Ok(1) => {
                self.ledger.freed.fetch_add(1, Ordering::SeqCst);
                0
            }
            Ok(previous) => previous - 1,
            Err(_) => {
                self.ledger.over_released.fetch_add(1, Ordering::SeqCst);
                warn!("Synthetic handle released more times than referenced");
                0
            }
        }
    }

    fn current(&self) -> u32 {
        self.count.load(Ordering::SeqCst)
    }
}

/// Video frame backed by a heap buffer.
#[derive(Debug)]
pub struct SyntheticFrame {
    data: Vec<u8>,
    row_bytes: usize,
    width: usize,
    height: usize,
    format: PixelFormat,
    refs: RefCount,
}

impl SyntheticFrame {
    pub fn ref_count(&self) -> u32 {
        self.refs.current()
    }
}

impl RefCounted for SyntheticFrame {
    fn add_ref(&self) -> u32 {
        self.refs.add_ref()
    }

    fn release(&self) -> u32 {
        self.refs.release()
    }
}

impl VideoInputFrame for SyntheticFrame {
    fn bytes(&self) -> *const u8 {
        self.data.as_ptr()
    }

    fn row_bytes(&self) -> usize {
        self.row_bytes
    }

    fn width(&self) -> usize {
        self.width
    }

    fn height(&self) -> usize {
        self.height
    }

    fn pixel_format(&self) -> PixelFormat {
        self.format
    }
}

/// Audio packet backed by a heap buffer.
#[derive(Debug)]
pub struct SyntheticPacket {
    data: Vec<u8>,
    sample_frame_count: usize,
    refs: RefCount,
}

impl SyntheticPacket {
    pub fn ref_count(&self) -> u32 {
        self.refs.current()
    }
}

impl RefCounted for SyntheticPacket {
    fn add_ref(&self) -> u32 {
        self.refs.add_ref()
    }

    fn release(&self) -> u32 {
        self.refs.release()
    }
}

impl AudioInputPacket for SyntheticPacket {
    fn bytes(&self) -> *const u8 {
        self.data.as_ptr()
    }

    fn sample_frame_count(&self) -> usize {
        self.sample_frame_count
    }
}

// ─── Input ────────────────────────────────────────────────────────────────

/// Driver calls a synthetic input records and can be told to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyntheticCall {
    SetCallback,
    ClearCallback,
    EnableVideoInput,
    DisableVideoInput,
    EnableAudioInput,
    DisableAudioInput,
    StartStreams,
    StopStreams,
}

#[derive(Debug, Clone, Copy)]
struct VideoSetup {
    mode: DisplayModeId,
    format: PixelFormat,
}

#[derive(Debug, Clone, Copy)]
struct AudioSetup {
    sample_rate: u32,
    sample_type: AudioSampleType,
    channel_count: u32,
}

#[derive(Default)]
struct InputState {
    video: Option<VideoSetup>,
    audio: Option<AudioSetup>,
    streaming: bool,
    calls: Vec<SyntheticCall>,
    failures: HashMap<SyntheticCall, DriverError>,
}

struct Pacer {
    running: Arc<AtomicBool>,
    thread: thread::JoinHandle<()>,
}

/// Capture input of a synthetic device.
pub struct SyntheticInput {
    modes: Vec<DisplayModeInfo>,
    paced: bool,
    state: Mutex<InputState>,
    callback: RwLock<Option<Arc<dyn InputCallback>>>,
    ledger: Arc<RefLedger>,
    sequence: AtomicI64,
    pacer: Mutex<Option<Pacer>>,
}

impl SyntheticInput {
    /// Input that only produces frames through [`SyntheticInput::deliver`].
    pub fn manual() -> Arc<Self> {
        Arc::new(Self::build(false))
    }

    /// Input that runs a producer thread while streams are started.
    pub fn paced() -> Arc<Self> {
        Arc::new(Self::build(true))
    }

    fn build(paced: bool) -> Self {
        Self {
            modes: standard_display_modes(),
            paced,
            state: Mutex::new(InputState::default()),
            callback: RwLock::new(None),
            ledger: Arc::new(RefLedger::default()),
            sequence: AtomicI64::new(0),
            pacer: Mutex::new(None),
        }
    }

    pub fn ledger(&self) -> &RefLedger {
        &self.ledger
    }

    /// Driver calls made so far, in order.
    pub fn calls(&self) -> Vec<SyntheticCall> {
        lock(&self.state).calls.clone()
    }

    pub fn is_streaming(&self) -> bool {
        lock(&self.state).streaming
    }

    pub fn has_callback(&self) -> bool {
        self.callback
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Make the next invocation of `call` fail with `error`.
    pub fn fail_next(&self, call: SyntheticCall, error: DriverError) {
        lock(&self.state).failures.insert(call, error);
    }

    fn record(&self, call: SyntheticCall) -> DriverResult<MutexGuard<'_, InputState>> {
        let mut state = lock(&self.state);
        state.calls.push(call);
        match state.failures.remove(&call) {
            Some(err) => {
                debug!("Synthetic input: injected failure for {:?}", call);
                Err(err)
            }
            None => Ok(state),
        }
    }

    /// Create a video frame with the given geometry, filled with `fill`.
    ///
    /// The reported width equals `row_bytes`; callers that need a real pixel
    /// width go through [`SyntheticInput::deliver_next`].
    pub fn make_video_frame(&self, row_bytes: usize, height: usize, fill: u8) -> Arc<SyntheticFrame> {
        let format = lock(&self.state)
            .video
            .map(|v| v.format)
            .unwrap_or_default();
        Arc::new(SyntheticFrame {
            data: vec![fill; row_bytes * height],
            row_bytes,
            width: row_bytes,
            height,
            format,
            refs: RefCount::new(&self.ledger),
        })
    }

    /// Create an audio packet sized for the enabled audio configuration.
    ///
    /// Without audio enabled the packet assumes 16-bit stereo.
    pub fn make_audio_packet(&self, sample_frame_count: usize, fill: u8) -> Arc<SyntheticPacket> {
        let bytes_per_frame = lock(&self.state)
            .audio
            .map(|a| (a.channel_count * a.sample_type.bytes()) as usize)
            .unwrap_or(4);
        Arc::new(SyntheticPacket {
            data: vec![fill; sample_frame_count * bytes_per_frame],
            sample_frame_count,
            refs: RefCount::new(&self.ledger),
        })
    }

    /// Hand a frame and/or packet to the installed callback, as the capture
    /// thread would, then drop the driver's own reference on each.
    ///
    /// Returns `false` when no callback is installed.
    pub fn deliver(&self, video: Option<VideoFrameRef>, audio: Option<AudioPacketRef>) -> bool {
        let delivered = {
            let callback = self.callback.read().unwrap_or_else(PoisonError::into_inner);
            match callback.as_ref() {
                Some(cb) => {
                    cb.on_frame_arrived(video.as_ref(), audio.as_ref());
                    true
                }
                None => false,
            }
        };
        if let Some(frame) = &video {
            frame.release();
        }
        if let Some(packet) = &audio {
            packet.release();
        }
        delivered
    }

    /// Build one frame (and audio packet, when audio is enabled) for the
    /// enabled video mode and deliver it.
    pub fn deliver_next(&self) -> bool {
        let (video, audio) = {
            let state = lock(&self.state);
            (state.video, state.audio)
        };
        let Some(video) = video else {
            return false;
        };
        let Some(mode) = self.modes.iter().find(|m| m.id == video.mode) else {
            return false;
        };

        let seq = self.sequence.fetch_add(1, Ordering::Relaxed);
        let row_bytes = video.format.row_bytes(mode.width).unwrap_or(mode.width * 2) as usize;
        let frame: VideoFrameRef = Arc::new(SyntheticFrame {
            data: vec![seq as u8; row_bytes * mode.height as usize],
            row_bytes,
            width: mode.width as usize,
            height: mode.height as usize,
            format: video.format,
            refs: RefCount::new(&self.ledger),
        });
        let packet: Option<AudioPacketRef> = audio.map(|a| {
            let count = a.sample_rate as i64 * mode.frame_duration / mode.time_scale.max(1);
            self.make_audio_packet(count as usize, seq as u8) as AudioPacketRef
        });
        trace!("Synthetic input: delivering frame {}", seq);
        self.deliver(Some(frame), packet)
    }

    /// Report an input format change to the installed callback.
    pub fn announce_format_change(&self, mode: DisplayModeId) -> bool {
        let Some(info) = self.modes.iter().find(|m| m.id == mode) else {
            return false;
        };
        let callback = self.callback.read().unwrap_or_else(PoisonError::into_inner);
        match callback.as_ref() {
            Some(cb) => {
                cb.on_format_changed(
                    FormatChangedEvents::from_raw(1),
                    info,
                    DetectedSignalFlags::from_raw(1),
                );
                true
            }
            None => false,
        }
    }

    fn frame_interval(&self, mode: DisplayModeId) -> Duration {
        self.modes
            .iter()
            .find(|m| m.id == mode)
            .filter(|m| m.time_scale > 0)
            .map(|m| Duration::from_secs_f64(m.frame_duration as f64 / m.time_scale as f64))
            .unwrap_or(Duration::from_millis(20))
    }

    fn spawn_pacer(self: &Arc<Self>, interval: Duration) -> DriverResult<()> {
        let running = Arc::new(AtomicBool::new(true));
        let running_clone = running.clone();
        let input = Arc::clone(self);

        let thread = thread::Builder::new()
            .name("synthetic-capture".into())
            .spawn(move || {
                debug!("Synthetic capture thread running at {:?} per frame", interval);
                while running_clone.load(Ordering::Relaxed) {
                    thread::sleep(interval);
                    if !running_clone.load(Ordering::Relaxed) {
                        break;
                    }
                    input.deliver_next();
                }
                debug!("Synthetic capture thread ended");
            })
            .map_err(|_| DriverError::FAIL)?;

        *lock(&self.pacer) = Some(Pacer { running, thread });
        Ok(())
    }

    fn stop_pacer(&self) {
        let Some(pacer) = lock(&self.pacer).take() else {
            return;
        };
        pacer.running.store(false, Ordering::Relaxed);
        if pacer.thread.thread().id() != thread::current().id() && pacer.thread.join().is_err() {
            warn!("Synthetic capture thread panicked");
        }
    }
}

/// `DeviceInput` is implemented on the `Arc` so the producer thread can hold
/// the input it drives.
pub struct SyntheticInputHandle(Arc<SyntheticInput>);

impl DeviceInput for SyntheticInputHandle {
    fn display_modes(&self) -> DriverResult<Vec<DisplayModeInfo>> {
        Ok(self.0.modes.clone())
    }

    fn enable_video_input(
        &self,
        mode: DisplayModeId,
        format: PixelFormat,
        flags: VideoInputFlags,
    ) -> DriverResult<()> {
        let mut state = self.0.record(SyntheticCall::EnableVideoInput)?;
        if !self.0.modes.iter().any(|m| m.id == mode) || format.row_bytes(1).is_none() {
            return Err(DriverError::InvalidArgument);
        }
        debug!(
            "Synthetic input: video enabled ({} / {}, flags {:#x})",
            mode,
            format,
            flags.to_raw()
        );
        state.video = Some(VideoSetup { mode, format });
        Ok(())
    }

    fn disable_video_input(&self) -> DriverResult<()> {
        let mut state = self.0.record(SyntheticCall::DisableVideoInput)?;
        state.video = None;
        Ok(())
    }

    fn enable_audio_input(
        &self,
        sample_rate: u32,
        sample_type: AudioSampleType,
        channel_count: u32,
    ) -> DriverResult<()> {
        let mut state = self.0.record(SyntheticCall::EnableAudioInput)?;
        if sample_rate != SAMPLE_RATE_48KHZ || !SUPPORTED_CHANNEL_COUNTS.contains(&channel_count) {
            return Err(DriverError::InvalidArgument);
        }
        state.audio = Some(AudioSetup {
            sample_rate,
            sample_type,
            channel_count,
        });
        Ok(())
    }

    fn disable_audio_input(&self) -> DriverResult<()> {
        let mut state = self.0.record(SyntheticCall::DisableAudioInput)?;
        state.audio = None;
        Ok(())
    }

    fn start_streams(&self) -> DriverResult<()> {
        let mode = {
            let mut state = self.0.record(SyntheticCall::StartStreams)?;
            if state.streaming {
                return Err(DriverError::FAIL);
            }
            let Some(video) = state.video else {
                return Err(DriverError::FAIL);
            };
            state.streaming = true;
            video.mode
        };
        if self.0.paced {
            if let Err(e) = self.0.spawn_pacer(self.0.frame_interval(mode)) {
                lock(&self.0.state).streaming = false;
                return Err(e);
            }
        }
        info!("Synthetic input: streams started");
        Ok(())
    }

    fn stop_streams(&self) -> DriverResult<()> {
        {
            let mut state = self.0.record(SyntheticCall::StopStreams)?;
            state.streaming = false;
        }
        self.0.stop_pacer();
        info!("Synthetic input: streams stopped");
        Ok(())
    }

    fn set_callback(&self, callback: Option<Arc<dyn InputCallback>>) -> DriverResult<()> {
        let call = if callback.is_some() {
            SyntheticCall::SetCallback
        } else {
            SyntheticCall::ClearCallback
        };
        drop(self.0.record(call)?);
        // Taking the write lock waits out any callback still running.
        *self.0.callback.write().unwrap_or_else(PoisonError::into_inner) = callback;
        Ok(())
    }
}

// ─── Devices ──────────────────────────────────────────────────────────────

#[derive(Clone)]
struct DeviceEntry {
    name: String,
    input: Option<Arc<SyntheticInput>>,
}

struct SyntheticDevice(DeviceEntry);

impl Device for SyntheticDevice {
    fn model_name(&self) -> String {
        self.0.name.clone()
    }

    fn query_input(&self) -> Option<Arc<dyn DeviceInput>> {
        self.0
            .input
            .as_ref()
            .map(|input| Arc::new(SyntheticInputHandle(Arc::clone(input))) as Arc<dyn DeviceInput>)
    }
}

/// Driver over a fixed list of synthetic devices.
#[derive(Clone, Default)]
pub struct SyntheticDriver {
    devices: Vec<DeviceEntry>,
    unreachable: bool,
}

impl SyntheticDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a device with the given capture input.
    pub fn with_device(mut self, name: impl Into<String>, input: Arc<SyntheticInput>) -> Self {
        self.devices.push(DeviceEntry {
            name: name.into(),
            input: Some(input),
        });
        self
    }

    /// Add a device that exposes no capture input (e.g. a playout-only card).
    pub fn with_output_only_device(mut self, name: impl Into<String>) -> Self {
        self.devices.push(DeviceEntry {
            name: name.into(),
            input: None,
        });
        self
    }

    /// A driver whose API cannot be reached.
    pub fn unreachable() -> Self {
        Self {
            devices: Vec::new(),
            unreachable: true,
        }
    }
}

impl Driver for SyntheticDriver {
    fn devices(&self) -> DriverResult<Box<dyn Iterator<Item = Box<dyn Device>> + Send>> {
        if self.unreachable {
            return Err(DriverError::FAIL);
        }
        let devices = self.devices.clone();
        Ok(Box::new(
            devices
                .into_iter()
                .map(|entry| Box::new(SyntheticDevice(entry)) as Box<dyn Device>),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Counter(AtomicU64);

    impl InputCallback for Counter {
        fn on_frame_arrived(&self, _video: Option<&VideoFrameRef>, _audio: Option<&AudioPacketRef>) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }

        fn on_format_changed(&self, _: FormatChangedEvents, _: &DisplayModeInfo, _: DetectedSignalFlags) {}
    }

    fn first_input(driver: &SyntheticDriver) -> Arc<dyn DeviceInput> {
        driver.devices().unwrap().next().unwrap().query_input().unwrap()
    }

    #[test]
    fn test_enumerates_devices_in_order() {
        let driver = SyntheticDriver::new()
            .with_output_only_device("Playout")
            .with_device("Capture", SyntheticInput::manual());
        let devices: Vec<_> = driver.devices().unwrap().collect();
        assert_eq!(devices.len(), 2);
        assert_eq!(devices[0].model_name(), "Playout");
        assert!(devices[0].query_input().is_none());
        assert!(devices[1].query_input().is_some());
        assert!(SyntheticDriver::unreachable().devices().is_err());
    }

    #[test]
    fn test_rejects_unsupported_audio() {
        let driver = SyntheticDriver::new().with_device("Capture", SyntheticInput::manual());
        let input = first_input(&driver);
        assert_eq!(
            input.enable_audio_input(SAMPLE_RATE_48KHZ, AudioSampleType::Int16, 3),
            Err(DriverError::InvalidArgument)
        );
        assert!(input
            .enable_audio_input(SAMPLE_RATE_48KHZ, AudioSampleType::Int16, 8)
            .is_ok());
    }

    #[test]
    fn test_start_requires_video() {
        let synthetic = SyntheticInput::manual();
        let driver = SyntheticDriver::new().with_device("Capture", synthetic.clone());
        let input = first_input(&driver);
        assert!(input.start_streams().is_err());
        input
            .enable_video_input(DisplayModeId::PAL, PixelFormat::YUV_8BIT, VideoInputFlags::default())
            .unwrap();
        input.start_streams().unwrap();
        assert!(synthetic.is_streaming());
        input.stop_streams().unwrap();
        assert!(!synthetic.is_streaming());
    }

    #[test]
    fn test_deliver_releases_driver_reference() {
        let synthetic = SyntheticInput::manual();
        let driver = SyntheticDriver::new().with_device("Capture", synthetic.clone());
        let input = first_input(&driver);
        let counter = Arc::new(Counter(AtomicU64::new(0)));

        let frame = synthetic.make_video_frame(16, 2, 0);
        assert!(!synthetic.deliver(Some(frame), None));
        assert_eq!(synthetic.ledger().live(), 0);

        input.set_callback(Some(counter.clone() as Arc<dyn InputCallback>)).unwrap();
        let frame = synthetic.make_video_frame(16, 2, 0);
        assert!(synthetic.deliver(Some(frame), None));
        assert_eq!(counter.0.load(Ordering::SeqCst), 1);
        assert_eq!(synthetic.ledger().live(), 0);
        assert_eq!(synthetic.ledger().over_released(), 0);
    }

    #[test]
    fn test_over_release_is_counted() {
        let synthetic = SyntheticInput::manual();
        let packet = synthetic.make_audio_packet(4, 0);
        assert_eq!(packet.release(), 0);
        assert_eq!(packet.release(), 0);
        assert_eq!(synthetic.ledger().over_released(), 1);
    }

    #[test]
    fn test_injected_failure_applies_once() {
        let synthetic = SyntheticInput::manual();
        let driver = SyntheticDriver::new().with_device("Capture", synthetic.clone());
        let input = first_input(&driver);
        synthetic.fail_next(SyntheticCall::DisableVideoInput, DriverError::FAIL);
        assert_eq!(input.disable_video_input(), Err(DriverError::FAIL));
        assert!(input.disable_video_input().is_ok());
        assert_eq!(
            synthetic.calls(),
            vec![SyntheticCall::DisableVideoInput, SyntheticCall::DisableVideoInput]
        );
    }

    #[test]
    fn test_paced_input_produces_frames() {
        let synthetic = SyntheticInput::paced();
        let driver = SyntheticDriver::new().with_device("Capture", synthetic.clone());
        let input = first_input(&driver);
        let counter = Arc::new(Counter(AtomicU64::new(0)));

        input.set_callback(Some(counter.clone() as Arc<dyn InputCallback>)).unwrap();
        input
            .enable_video_input(DisplayModeId::HD720P50, PixelFormat::YUV_8BIT, VideoInputFlags::default())
            .unwrap();
        input.start_streams().unwrap();
        thread::sleep(Duration::from_millis(200));
        input.stop_streams().unwrap();
        input.set_callback(None).unwrap();

        assert!(counter.0.load(Ordering::SeqCst) > 0);
        assert_eq!(synthetic.ledger().live(), 0);
    }
}
