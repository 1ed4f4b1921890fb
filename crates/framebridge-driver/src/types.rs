//! Value types shared between the driver and the bridge.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Pack a four-character code the way the driver headers spell them ('Hp50').
pub const fn fourcc(code: &[u8; 4]) -> u32 {
    u32::from_be_bytes(*code)
}

/// Error returned when a FourCC string cannot be parsed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid four-character code: {0:?}")]
pub struct ParseFourCcError(pub String);

fn parse_code(s: &str) -> Result<u32, ParseFourCcError> {
    if let Some(hex) = s.strip_prefix("0x") {
        return u32::from_str_radix(hex, 16).map_err(|_| ParseFourCcError(s.to_string()));
    }
    if let Ok(n) = s.parse::<u32>() {
        return Ok(n);
    }
    let bytes: [u8; 4] = s
        .as_bytes()
        .try_into()
        .map_err(|_| ParseFourCcError(s.to_string()))?;
    if !bytes.iter().all(|b| b.is_ascii_graphic() || *b == b' ') {
        return Err(ParseFourCcError(s.to_string()));
    }
    Ok(fourcc(&bytes))
}

fn format_code(code: u32, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let bytes = code.to_be_bytes();
    if bytes.iter().all(|b| b.is_ascii_graphic() || *b == b' ') {
        write!(f, "{}", String::from_utf8_lossy(&bytes))
    } else {
        write!(f, "{code}")
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum CodeRepr {
    Number(u32),
    Text(String),
}

macro_rules! fourcc_newtype {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub struct $name(pub u32);

        impl $name {
            pub const fn raw(self) -> u32 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                format_code(self.0, f)
            }
        }

        impl FromStr for $name {
            type Err = ParseFourCcError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                parse_code(s).map($name)
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(&self.to_string())
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                match CodeRepr::deserialize(deserializer)? {
                    CodeRepr::Number(n) => Ok($name(n)),
                    CodeRepr::Text(s) => s.parse().map_err(serde::de::Error::custom),
                }
            }
        }
    };
}

fourcc_newtype!(
    /// Driver-defined display mode identifier (resolution, scan type and rate).
    DisplayModeId
);

fourcc_newtype!(
    /// Driver-defined pixel format identifier.
    PixelFormat
);

impl DisplayModeId {
    pub const NTSC: DisplayModeId = DisplayModeId(fourcc(b"ntsc"));
    pub const PAL: DisplayModeId = DisplayModeId(fourcc(b"pal "));
    pub const HD720P50: DisplayModeId = DisplayModeId(fourcc(b"hp50"));
    pub const HD1080I50: DisplayModeId = DisplayModeId(fourcc(b"Hi50"));
    pub const HD1080P25: DisplayModeId = DisplayModeId(fourcc(b"Hp25"));
    pub const HD1080P30: DisplayModeId = DisplayModeId(fourcc(b"Hp30"));
    pub const HD1080P50: DisplayModeId = DisplayModeId(fourcc(b"Hp50"));
    pub const HD1080P60: DisplayModeId = DisplayModeId(fourcc(b"Hp60"));
}

impl Default for DisplayModeId {
    fn default() -> Self {
        DisplayModeId::HD1080P50
    }
}

impl PixelFormat {
    /// 8-bit 4:2:2 YUV, 2 bytes per pixel.
    pub const YUV_8BIT: PixelFormat = PixelFormat(fourcc(b"2vuy"));
    /// 10-bit 4:2:2 YUV packed in 128-byte groups of 48 pixels.
    pub const YUV_10BIT: PixelFormat = PixelFormat(fourcc(b"v210"));
    /// 8-bit ARGB, 4 bytes per pixel.
    pub const ARGB_8BIT: PixelFormat = PixelFormat(32);
    /// 8-bit BGRA, 4 bytes per pixel.
    pub const BGRA_8BIT: PixelFormat = PixelFormat(fourcc(b"BGRA"));
    /// 10-bit RGB packed in 256-byte groups of 64 pixels.
    pub const RGB_10BIT: PixelFormat = PixelFormat(fourcc(b"r210"));

    /// Row stride the driver uses for a frame of `width` pixels, if known.
    pub fn row_bytes(self, width: u32) -> Option<u32> {
        match self {
            PixelFormat::YUV_8BIT => Some(width * 2),
            PixelFormat::YUV_10BIT => Some(width.div_ceil(48) * 128),
            PixelFormat::ARGB_8BIT | PixelFormat::BGRA_8BIT => Some(width * 4),
            PixelFormat::RGB_10BIT => Some(width.div_ceil(64) * 256),
            _ => None,
        }
    }
}

impl Default for PixelFormat {
    fn default() -> Self {
        PixelFormat::YUV_8BIT
    }
}

/// The only sample rate capture hardware of this family delivers.
pub const SAMPLE_RATE_48KHZ: u32 = 48_000;

/// Audio channel counts the driver accepts for capture.
pub const SUPPORTED_CHANNEL_COUNTS: [u32; 3] = [2, 8, 16];

/// Audio sample type, encoded as bits per sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub enum AudioSampleType {
    #[default]
    Int16 = 16,
    Int32 = 32,
}

impl AudioSampleType {
    pub fn bits(self) -> u32 {
        self as u32
    }

    pub fn bytes(self) -> u32 {
        self.bits() / 8
    }
}

impl TryFrom<u32> for AudioSampleType {
    type Error = String;

    fn try_from(bits: u32) -> Result<Self, Self::Error> {
        match bits {
            16 => Ok(AudioSampleType::Int16),
            32 => Ok(AudioSampleType::Int32),
            other => Err(format!("unsupported audio sample type: {other} bits")),
        }
    }
}

impl From<AudioSampleType> for u32 {
    fn from(ty: AudioSampleType) -> u32 {
        ty.bits()
    }
}

/// One entry of a device's display-mode enumeration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisplayModeInfo {
    pub id: DisplayModeId,
    pub name: String,
    pub width: u32,
    pub height: u32,
    /// Duration of one frame in `time_scale` units.
    pub frame_duration: i64,
    pub time_scale: i64,
}

impl DisplayModeInfo {
    pub fn new(
        id: DisplayModeId,
        name: impl Into<String>,
        width: u32,
        height: u32,
        frame_duration: i64,
        time_scale: i64,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            width,
            height,
            frame_duration,
            time_scale,
        }
    }

    /// Frames per second
    pub fn frame_rate(&self) -> f64 {
        if self.frame_duration == 0 {
            return 0.0;
        }
        self.time_scale as f64 / self.frame_duration as f64
    }
}

/// Flags passed to `enable_video_input`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct VideoInputFlags {
    /// Ask the driver to report input format changes
    pub enable_format_detection: bool,
    /// Capture both eyes of a stereoscopic signal
    pub dual_stream_3d: bool,
}

impl VideoInputFlags {
    pub fn from_raw(flags: u32) -> Self {
        Self {
            enable_format_detection: (flags & 1) != 0,
            dual_stream_3d: (flags & 2) != 0,
        }
    }

    pub fn to_raw(self) -> u32 {
        (self.enable_format_detection as u32) | ((self.dual_stream_3d as u32) << 1)
    }
}

/// What changed when the driver reports an input format change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FormatChangedEvents {
    pub display_mode_changed: bool,
    pub field_dominance_changed: bool,
    pub colorspace_changed: bool,
}

impl FormatChangedEvents {
    pub fn from_raw(events: u32) -> Self {
        Self {
            display_mode_changed: (events & 1) != 0,
            field_dominance_changed: (events & 2) != 0,
            colorspace_changed: (events & 4) != 0,
        }
    }
}

/// Signal properties detected on the input after a format change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DetectedSignalFlags {
    pub ycbcr_422: bool,
    pub rgb_444: bool,
    pub dual_stream_3d: bool,
}

impl DetectedSignalFlags {
    pub fn from_raw(flags: u32) -> Self {
        Self {
            ycbcr_422: (flags & 1) != 0,
            rgb_444: (flags & 2) != 0,
            dual_stream_3d: (flags & 4) != 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fourcc_matches_driver_constants() {
        assert_eq!(DisplayModeId::HD1080P50.raw(), 0x4870_3530);
        assert_eq!(PixelFormat::YUV_8BIT.raw(), 0x3276_7579);
        assert_eq!(DisplayModeId::HD1080P50.to_string(), "Hp50");
        assert_eq!(PixelFormat::ARGB_8BIT.to_string(), "32");
    }

    #[test]
    fn test_parse_codes() {
        assert_eq!("Hp50".parse::<DisplayModeId>().unwrap(), DisplayModeId::HD1080P50);
        assert_eq!("pal ".parse::<DisplayModeId>().unwrap(), DisplayModeId::PAL);
        assert_eq!("32".parse::<PixelFormat>().unwrap(), PixelFormat::ARGB_8BIT);
        assert_eq!("0x42475241".parse::<PixelFormat>().unwrap(), PixelFormat::BGRA_8BIT);
        assert!("toolong".parse::<DisplayModeId>().is_err());
    }

    #[test]
    fn test_serde_accepts_text_and_numbers() {
        let mode: DisplayModeId = serde_json::from_str("\"Hp50\"").unwrap();
        assert_eq!(mode, DisplayModeId::HD1080P50);
        let mode: DisplayModeId = serde_json::from_str("1215313200").unwrap();
        assert_eq!(mode, DisplayModeId::HD1080P50);
        assert_eq!(serde_json::to_string(&PixelFormat::YUV_10BIT).unwrap(), "\"v210\"");

        let ty: AudioSampleType = serde_json::from_str("32").unwrap();
        assert_eq!(ty, AudioSampleType::Int32);
        assert!(serde_json::from_str::<AudioSampleType>("24").is_err());
    }

    #[test]
    fn test_row_bytes() {
        assert_eq!(PixelFormat::BGRA_8BIT.row_bytes(1920), Some(7680));
        assert_eq!(PixelFormat::YUV_8BIT.row_bytes(1920), Some(3840));
        assert_eq!(PixelFormat::YUV_10BIT.row_bytes(1920), Some(5120));
        assert_eq!(PixelFormat(fourcc(b"zzzz")).row_bytes(1920), None);
    }

    #[test]
    fn test_flags_from_raw() {
        let flags = VideoInputFlags::from_raw(1);
        assert!(flags.enable_format_detection);
        assert!(!flags.dual_stream_3d);
        assert_eq!(flags.to_raw(), 1);

        let events = FormatChangedEvents::from_raw(5);
        assert!(events.display_mode_changed);
        assert!(!events.field_dominance_changed);
        assert!(events.colorspace_changed);
    }

    #[test]
    fn test_frame_rate() {
        let mode = DisplayModeInfo::new(DisplayModeId::NTSC, "NTSC", 720, 486, 1001, 30000);
        assert!((mode.frame_rate() - 29.97).abs() < 0.01);
    }
}
