//! Driver error types

use protocol::status::{status0_msg, status1_msg};
use std::time::Duration;
use thiserror::Error;

/// Errors surfaced by the transceiver bus driver
#[derive(Debug, Error)]
pub enum Error {
    /// Caller-supplied argument rejected before any I/O was attempted
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The device sent a report we were not expecting; the bridge is out
    /// of sync and must flush before the next transaction
    #[error("Bridge out of sync: unexpected report {report:#04x} while waiting on {operation}")]
    ProtocolDesync {
        operation: &'static str,
        report: u8,
    },

    /// The transfer's time budget ran out while polling
    #[error("Timed out waiting on {operation}")]
    TransferTimeout { operation: &'static str },

    /// The device reported an explicit transfer failure
    #[error("{operation} {}: {}", status0_msg(*.status0), status1_msg(*.status0, *.status1))]
    TransferFailed {
        operation: &'static str,
        status0: u8,
        status1: u8,
    },

    /// Shared-bus ownership could not be acquired within the retry budget
    #[error("Bus arbitration failed after {attempts} attempts")]
    Arbitration { attempts: u32 },

    /// Device reset requested too soon after the previous one
    #[error("Device reset throttled: last reset was {since_last:?} ago")]
    ResetThrottled { since_last: Duration },

    /// USB transport error
    #[error("USB error: {0}")]
    Usb(#[from] rusb::Error),

    /// Malformed report traffic
    #[error("Protocol error: {0}")]
    Protocol(#[from] protocol::ProtocolError),
}

impl Error {
    /// True if this is a USB-level timeout (as opposed to our own
    /// transfer-budget timeout)
    pub fn is_usb_timeout(&self) -> bool {
        matches!(self, Error::Usb(rusb::Error::Timeout))
    }
}

/// Type alias for driver results
pub type Result<T> = std::result::Result<T, Error>;
