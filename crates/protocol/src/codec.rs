//! Report encoding and decoding
//!
//! Encoders fill a complete 64-byte interrupt report and validate transfer
//! limits before any byte reaches the wire. Multi-byte fields are
//! big-endian on the wire.
//!
//! All encoders take plain 7-bit I2C addresses; the left shift into the
//! read/write address byte the chip expects happens here and nowhere else.

use crate::error::{ProtocolError, Result};
use crate::report::{REPORT_SIZE, Report, ReportId};
use crate::status::TransferStatus;
use byteorder::{BigEndian, ByteOrder};

/// Largest read the chip supports in one transaction
pub const MAX_READ_LEN: usize = 512;

/// Largest write accepted in one transaction
pub const MAX_WRITE_LEN: usize = 60;

/// Largest write portion of a combined write-read transaction
pub const MAX_WRITE_READ_LEN: usize = 16;

/// Largest data payload one read-response report can carry
pub const MAX_CHUNK_LEN: usize = REPORT_SIZE - 3;

/// One chunk of read data parsed from a read-response report
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadChunk<'a> {
    /// Transfer status byte (same encoding as status0)
    pub status: u8,
    /// Payload bytes in this chunk (0..=61)
    pub data: &'a [u8],
}

fn wire_address(address: u8) -> Result<u8> {
    if address > 0x7f {
        return Err(ProtocolError::InvalidAddress { address });
    }
    Ok(address << 1)
}

/// Encode a read request for `len` bytes from a 7-bit address
pub fn encode_read_request(report: &mut Report, address: u8, len: usize) -> Result<()> {
    if len < 1 || len > MAX_READ_LEN {
        return Err(ProtocolError::InvalidLength {
            operation: "read",
            len,
            min: 1,
            max: MAX_READ_LEN,
        });
    }
    report.fill(0);
    report[0] = ReportId::ReadRequest.as_u8();
    report[1] = wire_address(address)?;
    BigEndian::write_u16(&mut report[2..4], len as u16);
    Ok(())
}

/// Encode a write of `data` to a 7-bit address
pub fn encode_write(report: &mut Report, address: u8, data: &[u8]) -> Result<()> {
    if data.is_empty() || data.len() > MAX_WRITE_LEN {
        return Err(ProtocolError::InvalidLength {
            operation: "write",
            len: data.len(),
            min: 1,
            max: MAX_WRITE_LEN,
        });
    }
    report.fill(0);
    report[0] = ReportId::Write.as_u8();
    report[1] = wire_address(address)?;
    report[2] = data.len() as u8;
    report[3..3 + data.len()].copy_from_slice(data);
    Ok(())
}

/// Encode a combined write-then-read (repeated start) transaction
pub fn encode_write_read(
    report: &mut Report,
    address: u8,
    write_data: &[u8],
    read_len: usize,
) -> Result<()> {
    if write_data.is_empty() || write_data.len() > MAX_WRITE_READ_LEN {
        return Err(ProtocolError::InvalidLength {
            operation: "write-read write portion",
            len: write_data.len(),
            min: 1,
            max: MAX_WRITE_READ_LEN,
        });
    }
    if read_len < 1 || read_len > MAX_READ_LEN {
        return Err(ProtocolError::InvalidLength {
            operation: "write-read read portion",
            len: read_len,
            min: 1,
            max: MAX_READ_LEN,
        });
    }
    report.fill(0);
    report[0] = ReportId::WriteReadRequest.as_u8();
    report[1] = wire_address(address)?;
    BigEndian::write_u16(&mut report[2..4], read_len as u16);
    report[4] = write_data.len() as u8;
    report[5..5 + write_data.len()].copy_from_slice(write_data);
    Ok(())
}

/// Encode a force-send request, prompting buffered read data onto the
/// interrupt-in endpoint
pub fn encode_force_send(report: &mut Report) {
    report.fill(0);
    report[0] = ReportId::ReadForceSend.as_u8();
    report[1] = 1;
}

/// Encode a cancel-transfer request
pub fn encode_cancel_transfer(report: &mut Report) {
    report.fill(0);
    report[0] = ReportId::CancelTransfer.as_u8();
    report[1] = 1;
}

/// Encode a transfer-status request
pub fn encode_status_request(report: &mut Report) {
    report.fill(0);
    report[0] = ReportId::TransferStatusRequest.as_u8();
    report[1] = 1;
}

/// Parse a read-response report into its status byte and payload
pub fn parse_read_response(report: &Report) -> Result<ReadChunk<'_>> {
    if report[0] != ReportId::ReadResponse.as_u8() {
        return Err(ProtocolError::UnexpectedReport {
            expected: ReportId::ReadResponse.as_u8(),
            actual: report[0],
        });
    }
    let len = report[2] as usize;
    if len > MAX_CHUNK_LEN {
        return Err(ProtocolError::ChunkTooLong { len });
    }
    Ok(ReadChunk {
        status: report[1],
        data: &report[3..3 + len],
    })
}

/// Parse a transfer-status response report
pub fn parse_transfer_status(report: &Report) -> Result<TransferStatus> {
    if report[0] != ReportId::TransferStatusResponse.as_u8() {
        return Err(ProtocolError::UnexpectedReport {
            expected: ReportId::TransferStatusResponse.as_u8(),
            actual: report[0],
        });
    }
    Ok(TransferStatus {
        status0: report[1],
        status1: report[2],
        num_retries: BigEndian::read_u16(&report[3..5]),
        bytes_read: BigEndian::read_u16(&report[5..7]),
    })
}
