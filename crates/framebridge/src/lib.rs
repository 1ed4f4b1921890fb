//! Hands live frames from a capture driver's thread to a tokio consumer.
//!
//! The driver thread stores each arrival in a single-entry [`FrameSlot`]
//! (newest frame wins) and raises a coalescing [`NotificationBridge`]
//! signal. The consumer wakes at most once per signal burst, drains the
//! slot and copies the bytes out after the lock is released.

pub mod config;
pub mod delivery;
pub mod error;
pub mod handle;
pub mod notify;
pub mod session;
pub mod slot;

pub use config::{AudioConfig, SessionConfig};
pub use delivery::{CapturedFrame, FrameReceiver};
pub use error::{CaptureError, CaptureResult};
pub use handle::{Retained, RetainedAudio, RetainedVideo};
pub use notify::NotificationBridge;
pub use session::{CaptureSession, SessionState};
pub use slot::{FrameSlot, SlotStats};
