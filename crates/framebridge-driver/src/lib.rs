//! Device-driver collaborator for the frame bridge.
//!
//! Capture hardware is reached through the traits in [`device`] and
//! [`callbacks`]. The [`synthetic`] module implements the same contract in
//! software so sessions can run without a capture card attached.

pub mod callbacks;
pub mod device;
pub mod error;
pub mod synthetic;
pub mod types;

pub use callbacks::{AudioInputPacket, AudioPacketRef, InputCallback, RefCounted, VideoFrameRef, VideoInputFrame};
pub use device::{Device, DeviceInput, Driver};
pub use error::{DriverError, DriverResult};
pub use types::*;
