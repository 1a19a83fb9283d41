//! Wire format for the CP2112 USB-to-I2C bridge
//!
//! The CP2112 speaks a HID-report protocol: every interrupt transfer is a
//! fixed 64-byte report whose first byte is the report ID, and device
//! configuration rides on HID feature reports over the control endpoint.
//! This crate defines the report layout, encoders for the requests the
//! driver issues, parsers for the responses it receives, and the
//! transfer-status model the device reports while a transaction is in
//! flight.
//!
//! Nothing here touches USB. The driver crate supplies the transport; this
//! crate is pure bytes, which keeps the whole wire format unit-testable.

pub mod codec;
pub mod config;
pub mod error;
pub mod report;
pub mod status;

pub use codec::{
    MAX_READ_LEN, MAX_WRITE_LEN, MAX_WRITE_READ_LEN, ReadChunk, encode_cancel_transfer,
    encode_force_send, encode_read_request, encode_status_request, encode_write,
    encode_write_read, parse_read_response, parse_transfer_status,
};
pub use config::{GpioConfig, SmbusConfig, VersionInfo};
pub use error::{ProtocolError, Result};
pub use report::{REPORT_SIZE, Report, ReportId};
pub use status::{Status0, TransferStatus};
