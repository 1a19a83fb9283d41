//! Protocol error types

use thiserror::Error;

/// Errors produced while encoding or decoding CP2112 reports
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    /// Requested transfer length is outside the limits the chip supports
    #[error("Invalid {operation} length {len}: must be {min}..={max} bytes")]
    InvalidLength {
        operation: &'static str,
        len: usize,
        min: usize,
        max: usize,
    },

    /// I2C address does not fit in 7 bits
    #[error("Invalid I2C address {address:#04x}: must be 7-bit")]
    InvalidAddress { address: u8 },

    /// A response report carried a different ID than the one expected
    #[error("Unexpected report ID {actual:#04x} (expected {expected:#04x})")]
    UnexpectedReport { expected: u8, actual: u8 },

    /// A read-response chunk claimed more payload than a report can hold
    #[error("Read-response chunk length {len} exceeds the 61-byte report payload")]
    ChunkTooLong { len: usize },

    /// The device streamed more read data than the request asked for
    #[error("Read response overran the request: got {got} bytes, wanted {wanted}")]
    ResponseOverrun { got: usize, wanted: usize },

    /// Feature report was shorter than the fixed layout requires
    #[error("Short feature report: got {len} bytes, need {need}")]
    ShortReport { len: usize, need: usize },
}

/// Type alias for protocol results
pub type Result<T> = std::result::Result<T, ProtocolError>;
