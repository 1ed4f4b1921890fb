use thiserror::Error;

/// Status returned by a driver call that did not succeed.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverError {
    #[error("Invalid argument")]
    InvalidArgument,

    #[error("Operation not supported by the device")]
    Unsupported,

    #[error("Driver call failed (code {code:#010x})")]
    Failed { code: i32 },
}

impl DriverError {
    /// Generic failure, the driver equivalent of `E_FAIL`.
    pub const FAIL: DriverError = DriverError::Failed { code: 0x8000_4005_u32 as i32 };
}

pub type DriverResult<T> = Result<T, DriverError>;
