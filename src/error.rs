//! Error types for the motor layer.
//!
//! `MotorError` mirrors the fixed error vocabulary of the record framework so
//! that callers can tell a policy refusal (`WouldExceedLimit`, `Unsupported`)
//! apart from a hardware or transport failure (`DeviceIoError`,
//! `NetworkIoError`). Every variant carries a human readable message that
//! names the record involved.
//!
//! Use [`MotorError::code`] when a caller needs to branch on the kind of
//! failure without matching on message text.

use thiserror::Error;

use crate::config::ConfigError;

/// Convenience alias for results using the motor error type.
pub type MotorResult<T> = std::result::Result<T, MotorError>;

/// Discriminant of a [`MotorError`], comparable and copyable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// A required argument was missing or empty.
    NullArgument,
    /// Internal state is inconsistent or a reference could not be resolved.
    CorruptState,
    /// A value had a different type than expected.
    TypeMismatch,
    /// An argument was outside its allowed domain.
    IllegalArgument,
    /// A requested position lies outside the configured limits.
    WouldExceedLimit,
    /// The operation is not supported by this motor.
    Unsupported,
    /// A local device reported a failure.
    DeviceIoError,
    /// A remote server exchange failed or returned garbage.
    NetworkIoError,
    /// The operation has not been implemented yet.
    NotYetImplemented,
    /// A named record, field or server does not exist.
    NotFound,
    /// The operation was interrupted by an abort.
    Interrupted,
    /// Waiting for a motor to stop took too long.
    TimedOut,
    /// Configuration could not be loaded or validated.
    Config,
}

/// Primary error type for motor operations.
#[derive(Error, Debug)]
pub enum MotorError {
    #[error("Null argument: {0}")]
    NullArgument(String),

    #[error("Corrupt state: {0}")]
    CorruptState(String),

    #[error("Type mismatch: {0}")]
    TypeMismatch(String),

    #[error("Illegal argument: {0}")]
    IllegalArgument(String),

    #[error("Would exceed limit: {0}")]
    WouldExceedLimit(String),

    #[error("Unsupported: {0}")]
    Unsupported(String),

    #[error("Device I/O error: {0}")]
    DeviceIoError(String),

    #[error("Network I/O error: {0}")]
    NetworkIoError(String),

    #[error("Not yet implemented: {0}")]
    NotYetImplemented(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Interrupted: {0}")]
    Interrupted(String),

    #[error("Timed out: {0}")]
    TimedOut(String),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl MotorError {
    /// Returns the error code for this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            MotorError::NullArgument(_) => ErrorCode::NullArgument,
            MotorError::CorruptState(_) => ErrorCode::CorruptState,
            MotorError::TypeMismatch(_) => ErrorCode::TypeMismatch,
            MotorError::IllegalArgument(_) => ErrorCode::IllegalArgument,
            MotorError::WouldExceedLimit(_) => ErrorCode::WouldExceedLimit,
            MotorError::Unsupported(_) => ErrorCode::Unsupported,
            MotorError::DeviceIoError(_) => ErrorCode::DeviceIoError,
            MotorError::NetworkIoError(_) => ErrorCode::NetworkIoError,
            MotorError::NotYetImplemented(_) => ErrorCode::NotYetImplemented,
            MotorError::NotFound(_) => ErrorCode::NotFound,
            MotorError::Interrupted(_) => ErrorCode::Interrupted,
            MotorError::TimedOut(_) => ErrorCode::TimedOut,
            MotorError::Config(_) => ErrorCode::Config,
        }
    }

    /// Builds an `Unsupported` error for a parameter on a named motor.
    pub fn unsupported_parameter(motor: &str, parameter: &str) -> Self {
        MotorError::Unsupported(format!(
            "Parameter '{}' is not supported by motor '{}'",
            parameter, motor
        ))
    }
}
