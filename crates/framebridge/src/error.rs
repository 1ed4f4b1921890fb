use framebridge_driver::{DisplayModeId, DriverError};
use thiserror::Error;

use crate::session::SessionState;

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("No capture device at index {index}")]
    DeviceNotFound { index: u32 },

    #[error("Capture input unavailable: {0}")]
    InterfaceUnavailable(String),

    #[error("Display mode {0} is not supported by the device")]
    DisplayModeNotSupported(DisplayModeId),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Driver call {call} failed: {source}")]
    HardwareCallFailed {
        call: &'static str,
        #[source]
        source: DriverError,
    },

    #[error("Cannot {operation} while the session is {state}")]
    InvalidState {
        operation: &'static str,
        state: SessionState,
    },

    #[error("No tokio runtime available for frame delivery")]
    NoRuntime,
}

impl CaptureError {
    pub(crate) fn hardware(call: &'static str) -> impl FnOnce(DriverError) -> CaptureError {
        move |source| CaptureError::HardwareCallFailed { call, source }
    }
}

pub type CaptureResult<T> = Result<T, CaptureError>;
