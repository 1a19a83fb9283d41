//! HID report identifiers and framing constants
//!
//! Report IDs follow the Silicon Labs AN495 interface specification. The
//! device accepts configuration through feature reports and carries all
//! data-phase traffic in fixed 64-byte interrupt reports on endpoint 1.

/// Every CP2112 interrupt transfer is exactly this many bytes
pub const REPORT_SIZE: usize = 64;

/// One interrupt report; byte 0 is the report ID
pub type Report = [u8; REPORT_SIZE];

/// CP2112 report IDs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ReportId {
    /// Reset the device (feature report; device re-enumerates)
    ResetDevice = 0x01,
    /// Get/set GPIO pin configuration (feature report)
    GpioConfig = 0x02,
    /// Read GPIO pin values (feature report)
    GetGpio = 0x03,
    /// Write GPIO pin values (feature report)
    SetGpio = 0x04,
    /// Read part number and version (feature report)
    GetVersion = 0x05,
    /// Get/set SMBus configuration (feature report)
    SmbusConfig = 0x06,
    /// Start an I2C read transaction
    ReadRequest = 0x10,
    /// Start a combined write-then-read transaction (repeated start)
    WriteReadRequest = 0x11,
    /// Prompt the device to push buffered read data to the host
    ReadForceSend = 0x12,
    /// One chunk of read data from the device
    ReadResponse = 0x13,
    /// Start an I2C write transaction
    Write = 0x14,
    /// Ask for the status of the transaction in flight
    TransferStatusRequest = 0x15,
    /// Status of the transaction in flight
    TransferStatusResponse = 0x16,
    /// Abort the transaction in flight
    CancelTransfer = 0x17,
}

impl ReportId {
    /// The raw report ID byte
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

impl From<ReportId> for u8 {
    fn from(id: ReportId) -> u8 {
        id as u8
    }
}
