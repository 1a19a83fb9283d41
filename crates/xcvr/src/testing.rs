//! Test doubles for the driver
//!
//! Two mocks cover the two seams: [`MockTransport`] stands in for the USB
//! HID transport underneath the bridge, and [`MockI2cBus`] stands in for a
//! whole bridge underneath the mux tree, arbiter, and facade. Both record
//! everything sent so tests can assert on exact traffic.

use crate::error::{Error, Result};
use crate::i2c::I2cBus;
use crate::transport::HidTransport;
use protocol::codec::MAX_CHUNK_LEN;
use protocol::{REPORT_SIZE, Report, ReportId};
use std::collections::{HashMap, VecDeque};
use std::time::Duration;

/// Build a transfer-status response report
pub fn status_report(status0: u8, status1: u8, num_retries: u16, bytes_read: u16) -> Report {
    let mut report = [0u8; REPORT_SIZE];
    report[0] = ReportId::TransferStatusResponse.as_u8();
    report[1] = status0;
    report[2] = status1;
    report[3..5].copy_from_slice(&num_retries.to_be_bytes());
    report[5..7].copy_from_slice(&bytes_read.to_be_bytes());
    report
}

/// Build a read-response report carrying `data`
pub fn read_chunk_report(status: u8, data: &[u8]) -> Report {
    assert!(data.len() <= MAX_CHUNK_LEN);
    let mut report = [0u8; REPORT_SIZE];
    report[0] = ReportId::ReadResponse.as_u8();
    report[1] = status;
    report[2] = data.len() as u8;
    report[3..3 + data.len()].copy_from_slice(data);
    report
}

/// Build a report with an arbitrary leading ID (desync scenarios)
pub fn raw_report(id: u8) -> Report {
    let mut report = [0u8; REPORT_SIZE];
    report[0] = id;
    report
}

/// Scripted HID transport
///
/// Reactive where the chip is reactive: a transfer-status request queues a
/// status response (scripted, or a default success), and a force-send
/// releases queued read chunks the way the chip streams them — every
/// consecutive full 61-byte chunk plus the first shorter one.
///
/// The first transaction on a fresh bridge flushes, which consumes one
/// status response; tests that script status sequences should call
/// `flush_transfers` explicitly first to get it out of the way.
pub struct MockTransport {
    pub opened: bool,
    /// Every interrupt-out report, in order
    pub sent: Vec<Report>,
    /// Reports the next interrupt-in calls will return
    pub inbox: VecDeque<Report>,
    /// Read chunks released by force-send requests
    pub read_chunks: VecDeque<Report>,
    /// Responses to transfer-status requests; empty means default success
    pub statuses: VecDeque<Report>,
    /// Feature report payloads by report ID
    pub feature_data: HashMap<u8, Vec<u8>>,
    /// Every feature report written, in order
    pub feature_out: Vec<(u8, Vec<u8>)>,
    /// Count of every USB transfer attempted, in or out
    pub transfers: u32,
}

impl MockTransport {
    pub fn new() -> MockTransport {
        MockTransport {
            opened: false,
            sent: Vec::new(),
            inbox: VecDeque::new(),
            read_chunks: VecDeque::new(),
            statuses: VecDeque::new(),
            feature_data: HashMap::new(),
            feature_out: Vec::new(),
            transfers: 0,
        }
    }

    /// Reports sent with the given leading ID
    pub fn sent_with_id(&self, id: ReportId) -> usize {
        self.sent.iter().filter(|r| r[0] == id.as_u8()).count()
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        MockTransport::new()
    }
}

impl HidTransport for MockTransport {
    fn open(&mut self) -> Result<()> {
        self.opened = true;
        Ok(())
    }

    fn close(&mut self) {
        self.opened = false;
    }

    fn interrupt_out(&mut self, report: &Report, _timeout: Duration) -> Result<()> {
        self.transfers += 1;
        self.sent.push(*report);

        if report[0] == ReportId::TransferStatusRequest.as_u8() {
            let response = self
                .statuses
                .pop_front()
                .unwrap_or_else(|| status_report(2, 5, 0, 0));
            self.inbox.push_back(response);
        } else if report[0] == ReportId::ReadForceSend.as_u8() {
            while let Some(chunk) = self.read_chunks.pop_front() {
                let len = usize::from(chunk[2]);
                self.inbox.push_back(chunk);
                if len < MAX_CHUNK_LEN {
                    break;
                }
            }
        }
        Ok(())
    }

    fn interrupt_in(&mut self, report: &mut Report, _timeout: Duration) -> Result<()> {
        self.transfers += 1;
        match self.inbox.pop_front() {
            Some(next) => {
                *report = next;
                Ok(())
            }
            None => Err(Error::Usb(rusb::Error::Timeout)),
        }
    }

    fn feature_report_in(&mut self, report: ReportId, buf: &mut [u8]) -> Result<usize> {
        self.transfers += 1;
        match self.feature_data.get(&report.as_u8()) {
            Some(data) => {
                let len = data.len().min(buf.len());
                buf[..len].copy_from_slice(&data[..len]);
                Ok(len)
            }
            None => Err(Error::Usb(rusb::Error::NotFound)),
        }
    }

    fn feature_report_out(&mut self, report: ReportId, buf: &[u8]) -> Result<()> {
        self.transfers += 1;
        self.feature_out.push((report.as_u8(), buf.to_vec()));
        Ok(())
    }
}

/// One scripted answer to an I2C read
pub enum ScriptedRead {
    /// Return these bytes (truncated or zero-padded to the request)
    Data(Vec<u8>),
    /// The device did not acknowledge its address
    AddressNack,
    /// The segment was busy
    BusBusy,
    /// The read's budget ran out
    Timeout,
    /// The bridge lost sync mid-read
    Desync,
}

/// Recording I2C bus, standing in for a whole bridge
///
/// Writes always succeed and are logged; reads pop from a script, falling
/// back to `default_read` (or zeroes) when it runs out.
pub struct MockI2cBus {
    pub opened: bool,
    /// Every write as (address, payload), in order
    pub writes: Vec<(u8, Vec<u8>)>,
    pub read_script: VecDeque<ScriptedRead>,
    pub default_read: Option<Vec<u8>>,
}

impl MockI2cBus {
    pub fn new() -> MockI2cBus {
        MockI2cBus {
            opened: false,
            writes: Vec::new(),
            read_script: VecDeque::new(),
            default_read: None,
        }
    }

    /// Number of writes issued so far
    pub fn write_count(&self) -> usize {
        self.writes.len()
    }

    /// Writes addressed to one device
    pub fn writes_to(&self, address: u8) -> Vec<&[u8]> {
        self.writes
            .iter()
            .filter(|(a, _)| *a == address)
            .map(|(_, d)| d.as_slice())
            .collect()
    }
}

impl Default for MockI2cBus {
    fn default() -> Self {
        MockI2cBus::new()
    }
}

fn fill_read(buf: &mut [u8], data: &[u8]) {
    buf.fill(0);
    let len = data.len().min(buf.len());
    buf[..len].copy_from_slice(&data[..len]);
}

impl I2cBus for MockI2cBus {
    fn open(&mut self) -> Result<()> {
        self.opened = true;
        Ok(())
    }

    fn close(&mut self) {
        self.opened = false;
    }

    fn read(&mut self, _address: u8, buf: &mut [u8], _timeout: Duration) -> Result<()> {
        match self.read_script.pop_front() {
            Some(ScriptedRead::Data(data)) => {
                fill_read(buf, &data);
                Ok(())
            }
            Some(ScriptedRead::AddressNack) => Err(Error::TransferFailed {
                operation: "read",
                status0: 3,
                status1: 0,
            }),
            Some(ScriptedRead::BusBusy) => Err(Error::TransferFailed {
                operation: "read",
                status0: 3,
                status1: 1,
            }),
            Some(ScriptedRead::Timeout) => Err(Error::TransferTimeout { operation: "read" }),
            Some(ScriptedRead::Desync) => Err(Error::ProtocolDesync {
                operation: "read",
                report: 0x16,
            }),
            None => {
                match &self.default_read {
                    Some(data) => {
                        let data = data.clone();
                        fill_read(buf, &data);
                    }
                    None => buf.fill(0),
                }
                Ok(())
            }
        }
    }

    fn write(&mut self, address: u8, data: &[u8], _timeout: Duration) -> Result<()> {
        self.writes.push((address, data.to_vec()));
        Ok(())
    }
}
