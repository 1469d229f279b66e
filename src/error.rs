//! Error types for RC controller protocol operations.

use std::time::Duration;
use thiserror::Error;

/// Result type alias for controller operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Exception reported by the controller in place of a normal response.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct ModbusException {
    /// Function code of the request that failed (high bit cleared)
    pub original_function: u8,
    /// Raw exception code
    pub code: u8,
    /// Human readable exception description
    pub message: &'static str,
}

impl std::fmt::Display for ModbusException {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} (code {}, function {:#04x})",
            self.message, self.code, self.original_function
        )
    }
}

/// Failures while decoding a response frame.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Frame shorter than the layout requires
    #[error("Frame too short: expected at least {expected} bytes, got {actual}")]
    TooShort {
        /// Minimum number of bytes
        expected: usize,
        /// Number of bytes received
        actual: usize,
    },

    /// CRC trailer does not match the frame contents
    #[error("CRC mismatch: frame carries {presented:#06x}, computed {computed:#06x}")]
    CrcMismatch {
        /// CRC found in the frame
        presented: u16,
        /// CRC computed over the frame
        computed: u16,
    },

    /// Byte count field disagrees with the payload length
    #[error("Byte count mismatch: declared {declared}, payload has {actual}")]
    ByteCountMismatch {
        /// Value of the byte count field
        declared: usize,
        /// Actual payload length
        actual: usize,
    },

    /// Response carries a different function code than requested
    #[error("Unexpected function code: expected {expected:#04x}, got {actual:#04x}")]
    UnexpectedFunction {
        /// Function code of the request
        expected: u8,
        /// Function code of the response
        actual: u8,
    },

    /// Register payload has the wrong size for the requested block
    #[error("Unexpected payload length: expected {expected} bytes, got {actual}")]
    UnexpectedLength {
        /// Required payload length
        expected: usize,
        /// Actual payload length
        actual: usize,
    },

    /// Controller answered with an exception
    #[error("Controller exception: {0}")]
    Exception(ModbusException),

    /// Frame was parsed as an exception but the function code high bit is clear
    #[error("Response is not an exception (function code {0:#04x})")]
    NotAnException(u8),
}

/// Error types for controller communication.
#[derive(Error, Debug)]
pub enum Error {
    /// Response frame could not be decoded
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    /// Retry budget exhausted without an accepted response
    #[error("Command {command} failed after {retries} attempts")]
    CommandFailed {
        /// Name of the command
        command: String,
        /// Number of attempts made
        retries: u32,
    },

    /// Exclusive channel gate was not granted in time
    #[error("Channel busy: gate not acquired within {timeout:?}")]
    Busy {
        /// Acquisition timeout that elapsed
        timeout: Duration,
    },

    /// Home-complete flag never appeared
    #[error("Homing was not successful, waited for {waited:?}")]
    HomingFailed {
        /// Time spent waiting for the flag
        waited: Duration,
    },

    /// Serial channel failed or was closed
    #[error("Channel closed: {0}")]
    ChannelClosed(String),

    /// Serial port error
    #[error("Serial port error: {0}")]
    SerialPort(#[from] serialport::Error),

    /// Argument outside the range accepted by the controller
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Configuration could not be parsed or is inconsistent
    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// True when the underlying channel is gone and the session cannot recover.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Error::ChannelClosed(_) | Error::SerialPort(_))
    }
}
