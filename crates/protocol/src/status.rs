//! Transfer status model
//!
//! While a transaction is in flight the device reports a pair of status
//! bytes: `status0` is the transaction phase and `status1` a detail code
//! whose meaning depends on the phase.

/// Completion detail code for "address not acknowledged"
///
/// With the hardware retry limit capped, an absent I2C device fails fast
/// with this code, which is what presence probing keys off.
pub const COMPLETE_ADDRESS_NACK: u8 = 0;

/// Parsed transfer-status response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferStatus {
    /// Transaction phase (see [`Status0`])
    pub status0: u8,
    /// Phase-dependent detail code
    pub status1: u8,
    /// Number of bus retries the chip performed
    pub num_retries: u16,
    /// Number of bytes read from the bus so far
    pub bytes_read: u16,
}

/// Transaction phases reported in status0
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Status0 {
    Idle = 0,
    Busy = 1,
    Complete = 2,
    CompleteWithError = 3,
}

impl Status0 {
    /// Decode a raw status0 byte
    pub fn from_u8(raw: u8) -> Option<Status0> {
        match raw {
            0 => Some(Status0::Idle),
            1 => Some(Status0::Busy),
            2 => Some(Status0::Complete),
            3 => Some(Status0::CompleteWithError),
            _ => None,
        }
    }
}

impl TransferStatus {
    /// True if the device reported the transaction finished successfully
    pub fn succeeded(&self) -> bool {
        self.status0 == Status0::Complete as u8
    }

    /// True if the device reported the transaction failed
    pub fn failed(&self) -> bool {
        self.status0 == Status0::CompleteWithError as u8
    }
}

/// Human-readable description of a status0 byte
pub fn status0_msg(status0: u8) -> String {
    match status0 {
        0 => "idle".to_string(),
        1 => "busy".to_string(),
        2 => "succeeded".to_string(),
        3 => "failed".to_string(),
        other => format!("unexpected status0={}", other),
    }
}

/// Human-readable description of a status1 byte, given the phase
pub fn status1_msg(status0: u8, status1: u8) -> String {
    match status0 {
        // status1 is meaningless while idle
        0 => format!("status1={}", status1),
        1 => busy_status_msg(status1),
        2 | 3 => complete_status_msg(status1),
        _ => format!("unexpected status0={}, status1={}", status0, status1),
    }
}

/// Detail decode while the transaction is busy
pub fn busy_status_msg(status1: u8) -> String {
    match status1 {
        0 => "address acknowledged".to_string(),
        1 => "address not acknowledged".to_string(),
        2 => "read incomplete".to_string(),
        3 => "write incomplete".to_string(),
        other => format!("unexpected busy status={}", other),
    }
}

/// Detail decode once the transaction completed
pub fn complete_status_msg(status1: u8) -> String {
    match status1 {
        0 => "address not acknowledged".to_string(),
        1 => "bus not free".to_string(),
        2 => "arbitration lost".to_string(),
        3 => "read incomplete".to_string(),
        4 => "write incomplete".to_string(),
        5 => "succeeded".to_string(),
        other => format!("unexpected failure status={}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status0_decode() {
        assert_eq!(Status0::from_u8(0), Some(Status0::Idle));
        assert_eq!(Status0::from_u8(1), Some(Status0::Busy));
        assert_eq!(Status0::from_u8(2), Some(Status0::Complete));
        assert_eq!(Status0::from_u8(3), Some(Status0::CompleteWithError));
        assert_eq!(Status0::from_u8(4), None);
    }

    #[test]
    fn test_status_predicates() {
        let ok = TransferStatus {
            status0: 2,
            status1: 5,
            num_retries: 0,
            bytes_read: 8,
        };
        assert!(ok.succeeded());
        assert!(!ok.failed());

        let bad = TransferStatus {
            status0: 3,
            status1: 0,
            num_retries: 1,
            bytes_read: 0,
        };
        assert!(bad.failed());
    }

    #[test]
    fn test_status_messages() {
        assert_eq!(status0_msg(1), "busy");
        assert_eq!(busy_status_msg(2), "read incomplete");
        assert_eq!(complete_status_msg(0), "address not acknowledged");
        assert_eq!(complete_status_msg(2), "arbitration lost");
        assert_eq!(status1_msg(3, 1), "bus not free");
    }
}
