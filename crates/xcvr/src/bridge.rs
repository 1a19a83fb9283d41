//! CP2112 bridge protocol state machine
//!
//! The bridge chip has two properties that shape everything in this
//! module:
//!
//! - Its auto-send-read mode is broken (the vendor knowledge base confirms
//!   the first response byte comes back corrupted), so every read has to be
//!   pulled out of the device with explicit force-send requests.
//! - The wire protocol carries no transfer IDs. If we ever receive a report
//!   we were not expecting, we are out of sync with the device and every
//!   interpretation of subsequent reports is suspect; the only recovery is
//!   to drain and cancel everything before the next transaction.
//!
//! Hardware retry and timeout features are disabled at open; all timing is
//! owned here, as cooperative polling loops that recompute the remaining
//! budget after every sub-wait and fail deterministically on exhaustion.

use crate::error::{Error, Result};
use crate::i2c::I2cBus;
use crate::transport::HidTransport;
use protocol::codec::MAX_CHUNK_LEN;
use protocol::config::{GPIO_CONFIG_LEN, SMBUS_CONFIG_LEN};
use protocol::status::Status0;
use protocol::{
    GpioConfig, ProtocolError, REPORT_SIZE, Report, ReportId, SmbusConfig, TransferStatus,
    VersionInfo, encode_cancel_transfer, encode_force_send, encode_read_request,
    encode_status_request, encode_write, encode_write_read, parse_read_response,
    parse_transfer_status,
};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

/// Minimum spacing between device resets
pub const MIN_RESET_INTERVAL: Duration = Duration::from_secs(10);

/// Bus clock configured at open
///
/// The chip sometimes emits two back-to-back start conditions, which hangs
/// some transceivers; the fault reproduces less often at higher clock
/// speeds, hence 400kHz.
const BUS_SPEED_HZ: u32 = 400_000;

/// Sub-timeout for one interrupt-in poll while waiting on read data.
/// libusb handles timeouts much below this poorly.
const READ_POLL_TIMEOUT: Duration = Duration::from_millis(10);

/// Fixed wait for a status response; timing out mid-exchange would leave a
/// stale report behind to desynchronize a later call
const STATUS_RESPONSE_TIMEOUT: Duration = Duration::from_millis(20);

/// Poll interval while draining stale reports
const FLUSH_POLL_TIMEOUT: Duration = Duration::from_millis(3);

/// Floor for interrupt-out timeouts; a timeout inside libusb leaves us
/// unsure whether the request reached the device
const MIN_OUT_TIMEOUT: Duration = Duration::from_millis(5);

/// Floor for interrupt-in timeouts; libusb treats zero as "don't poll"
const MIN_IN_TIMEOUT: Duration = Duration::from_millis(1);

/// Longest sleep between poll iterations
const POLL_SLEEP: Duration = Duration::from_millis(10);

/// Driver for the CP2112 USB-to-I2C bridge
///
/// Blocking and single-owner; see the crate docs for the serialization
/// requirements when a handle is shared.
pub struct Cp2112<T: HidTransport> {
    transport: T,
    /// False once we have observed anything that puts our view of the
    /// device's report stream in doubt; forces a flush before the next
    /// transaction
    bus_good: bool,
    last_reset: Option<Instant>,
    min_reset_interval: Duration,
}

impl<T: HidTransport> Cp2112<T> {
    /// Create a bridge over the given transport; the device is not touched
    /// until [`open`](I2cBus::open)
    pub fn new(transport: T) -> Cp2112<T> {
        Cp2112 {
            transport,
            bus_good: false,
            last_reset: None,
            min_reset_interval: MIN_RESET_INTERVAL,
        }
    }

    /// Access the underlying transport (test inspection)
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Mutable access to the underlying transport (test scripting)
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// True if the bridge believes it is in sync with the device
    pub fn bus_good(&self) -> bool {
        self.bus_good
    }

    /// Read the device's part number and version
    pub fn version(&mut self) -> Result<VersionInfo> {
        let mut buf = [0u8; 3];
        self.full_feature_in(ReportId::GetVersion, &mut buf)?;
        Ok(VersionInfo {
            part_number: buf[1],
            device_version: buf[2],
        })
    }

    /// Read the SMBus configuration block
    pub fn smbus_config(&mut self) -> Result<SmbusConfig> {
        let mut buf = [0u8; SMBUS_CONFIG_LEN];
        self.full_feature_in(ReportId::SmbusConfig, &mut buf)?;
        Ok(SmbusConfig::decode(&buf)?)
    }

    /// Write the SMBus configuration block
    pub fn set_smbus_config(&mut self, config: SmbusConfig) -> Result<()> {
        // The chip ignores timeouts above 1000ms and retry limits at or
        // above 1000.
        debug_assert!(config.write_timeout_ms <= 1000);
        debug_assert!(config.read_timeout_ms <= 1000);
        debug_assert!(config.retry_limit < 1000);

        let mut buf = [0u8; SMBUS_CONFIG_LEN];
        config.encode(&mut buf);
        self.transport.feature_report_out(ReportId::SmbusConfig, &buf)
    }

    /// Read the GPIO pin configuration
    pub fn gpio_config(&mut self) -> Result<GpioConfig> {
        let mut buf = [0u8; GPIO_CONFIG_LEN];
        self.full_feature_in(ReportId::GpioConfig, &mut buf)?;
        Ok(GpioConfig::decode(&buf)?)
    }

    /// Write the GPIO pin configuration
    pub fn set_gpio_config(&mut self, config: GpioConfig) -> Result<()> {
        let mut buf = [0u8; GPIO_CONFIG_LEN];
        config.encode(&mut buf);
        self.transport.feature_report_out(ReportId::GpioConfig, &buf)
    }

    /// Read the current GPIO pin values
    pub fn gpio(&mut self) -> Result<u8> {
        let mut buf = [0u8; 2];
        self.full_feature_in(ReportId::GetGpio, &mut buf)?;
        Ok(buf[1])
    }

    /// Set the GPIO pins selected by `mask` to `values`
    pub fn set_gpio(&mut self, values: u8, mask: u8) -> Result<()> {
        let buf = [ReportId::SetGpio.as_u8(), values, mask];
        self.transport.feature_report_out(ReportId::SetGpio, &buf)
    }

    /// Reset the bridge chip
    ///
    /// Rate-limited: a request within [`MIN_RESET_INTERVAL`] of the
    /// previous reset fails with [`Error::ResetThrottled`] before any USB
    /// traffic. Repeated fast resets mean something deeper is wrong and a
    /// silent no-op would hide it.
    pub fn reset_device(&mut self) -> Result<()> {
        let now = Instant::now();
        if let Some(last) = self.last_reset {
            let since_last = now - last;
            if since_last < self.min_reset_interval {
                return Err(Error::ResetThrottled { since_last });
            }
        }
        debug!("resetting bridge device");
        self.last_reset = Some(now);

        let buf = [ReportId::ResetDevice.as_u8(), 1];
        match self.transport.feature_report_out(ReportId::ResetDevice, &buf) {
            // The device drops off the bus to re-enumerate, so a pipe
            // error is the expected outcome.
            Err(Error::Usb(rusb::Error::Pipe)) => Ok(()),
            other => other,
        }
    }

    /// Combined write-then-read in a single transaction (repeated start)
    ///
    /// # Hazard
    ///
    /// A timeout during the read phase of a combined transaction can wedge
    /// the chip in a state no software action recovers from; only a hard
    /// reset (power cycle or [`reset_device`](Cp2112::reset_device)) helps.
    /// Prefer a separate [`write`](I2cBus::write) followed by a
    /// [`read`](I2cBus::read) unless the target requires a repeated start.
    pub fn write_read_unsafe(
        &mut self,
        address: u8,
        write_data: &[u8],
        read_buf: &mut [u8],
        timeout: Duration,
    ) -> Result<()> {
        let mut report = [0u8; REPORT_SIZE];
        encode_write_read(&mut report, address, write_data, read_buf.len())
            .map_err(invalid_argument)?;
        self.ensure_good_state()?;

        self.intr_out("write-read request", &report, timeout)?;
        self.process_read_response("write-read", read_buf, timeout)
    }

    /// Abort the transaction in flight and return the resulting status
    pub fn cancel_transfer(&mut self) -> Result<TransferStatus> {
        let mut report = [0u8; REPORT_SIZE];
        encode_cancel_transfer(&mut report);
        self.intr_out("cancel transfer", &report, MIN_OUT_TIMEOUT)?;

        // Read the status back to clear out any failure state.
        self.get_transfer_status()
    }

    /// Query the status of the transaction in flight
    pub fn get_transfer_status(&mut self) -> Result<TransferStatus> {
        self.transfer_status("status query", STATUS_RESPONSE_TIMEOUT)
    }

    /// Drain stale interrupt reports and cancel any outstanding transfer
    ///
    /// Restores synchronization with the device: after this, any report we
    /// receive is in response to a request we sent afterwards.
    pub fn flush_transfers(&mut self) -> Result<()> {
        let mut report = [0u8; REPORT_SIZE];
        loop {
            match self.intr_in(&mut report, FLUSH_POLL_TIMEOUT) {
                Ok(()) => {
                    debug!("discarding stale interrupt report {:#04x}", report[0]);
                }
                Err(e) if e.is_usb_timeout() => {
                    self.bus_good = true;
                    break;
                }
                Err(e) => return Err(e),
            }
        }

        self.cancel_transfer()?;
        Ok(())
    }

    fn init_settings(&mut self) -> Result<()> {
        let current = self.smbus_config()?;
        let desired = SmbusConfig {
            speed: BUS_SPEED_HZ,
            // Broken in hardware: corrupts the first response byte.
            auto_send_read: 0,
            // Timeouts and retries are owned in software; one hardware
            // retry is the minimum the chip allows (zero retries forever).
            write_timeout_ms: 0,
            read_timeout_ms: 0,
            retry_limit: 1,
            scl_low_timeout: 1,
            ..current
        };
        if current != desired {
            self.set_smbus_config(desired)?;
        }
        Ok(())
    }

    fn ensure_good_state(&mut self) -> Result<()> {
        if self.bus_good {
            return Ok(());
        }
        debug!("flushing transfers to resync device state");
        self.flush_transfers()?;
        self.bus_good = true;
        Ok(())
    }

    /// Drive the force-send loop until the full read payload has arrived
    fn process_read_response(
        &mut self,
        operation: &'static str,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<()> {
        let end = Instant::now() + timeout;

        // Poll transfer status first. Any read-response report arriving
        // before this point is known to be extraneous, which we could not
        // tell if we polled with force-send alone.
        self.wait_for_transfer(operation, end)?;

        let mut report = [0u8; REPORT_SIZE];
        let mut bytes_read = 0usize;
        let mut send_read = true;
        loop {
            if send_read {
                encode_force_send(&mut report);
                self.intr_out("read force send", &report, MIN_OUT_TIMEOUT)?;
                send_read = false;
            }

            match self.intr_in(&mut report, READ_POLL_TIMEOUT) {
                Ok(()) => {}
                Err(e) if e.is_usb_timeout() => {
                    trace!("no read response yet, resending force-send");
                    let time_left = self.update_time_left(end, false);
                    if time_left.is_zero() {
                        return Err(Error::TransferTimeout { operation });
                    }
                    send_read = true;
                    self.bus_good = true;
                    continue;
                }
                Err(e) => return Err(e),
            }

            if report[0] != ReportId::ReadResponse.as_u8() {
                warn!(
                    "unexpected report {:#04x} while waiting on {} response",
                    report[0], operation
                );
                self.bus_good = false;
                return Err(Error::ProtocolDesync {
                    operation,
                    report: report[0],
                });
            }

            let chunk = match parse_read_response(&report) {
                Ok(chunk) => chunk,
                Err(e) => {
                    self.bus_good = false;
                    return Err(e.into());
                }
            };
            trace!(
                "read response: status={} length={}",
                chunk.status,
                chunk.data.len()
            );

            if bytes_read + chunk.data.len() > buf.len() {
                self.bus_good = false;
                return Err(ProtocolError::ResponseOverrun {
                    got: bytes_read + chunk.data.len(),
                    wanted: buf.len(),
                }
                .into());
            }
            buf[bytes_read..bytes_read + chunk.data.len()].copy_from_slice(chunk.data);
            bytes_read += chunk.data.len();

            match chunk.status {
                // Idle or complete. The device always finishes with a
                // zero-length response; keep reading until we have seen it
                // even once all payload bytes are in.
                0 | 2 => {
                    if bytes_read == buf.len() && chunk.data.is_empty() {
                        return Ok(());
                    }
                }
                // Busy: keep polling.
                1 => {}
                other => {
                    self.bus_good = false;
                    return Err(Error::TransferFailed {
                        operation,
                        status0: other,
                        status1: 0,
                    });
                }
            }

            // A chunk shorter than the full report payload means the device
            // has drained its buffer and wants another force-send before it
            // returns more; a full chunk means it is still streaming.
            // Empirical chip behavior, not documented anywhere.
            send_read = bytes_read < buf.len() && chunk.data.len() < MAX_CHUNK_LEN;

            let sleep = chunk.data.is_empty();
            let time_left = self.update_time_left(end, sleep);
            if time_left.is_zero() {
                return Err(Error::TransferTimeout { operation });
            }
        }
    }

    /// Poll transfer status until the transaction completes, fails, or the
    /// deadline passes; returns the remaining budget on success
    fn wait_for_transfer(&mut self, operation: &'static str, end: Instant) -> Result<Duration> {
        let mut time_left = end.saturating_duration_since(Instant::now());
        loop {
            let status = self.transfer_status(operation, time_left)?;
            trace!(
                "{} transfer status: status0={} status1={} retries={} bytes_read={}",
                operation, status.status0, status.status1, status.num_retries, status.bytes_read
            );

            match Status0::from_u8(status.status0) {
                Some(Status0::Complete) => return Ok(time_left),
                Some(Status0::CompleteWithError) => {
                    return Err(Error::TransferFailed {
                        operation,
                        status0: status.status0,
                        status1: status.status1,
                    });
                }
                Some(Status0::Busy) => {}
                // Idle (or garbage) while our transaction should be in
                // flight: we have lost track of the device state.
                _ => {
                    self.bus_good = false;
                    return Err(Error::TransferFailed {
                        operation,
                        status0: status.status0,
                        status1: status.status1,
                    });
                }
            }

            time_left = self.update_time_left(end, true);
            if time_left.is_zero() {
                self.cancel_transfer()?;
                return Err(Error::TransferTimeout { operation });
            }
        }
    }

    /// One status request/response exchange
    fn transfer_status(
        &mut self,
        operation: &'static str,
        timeout: Duration,
    ) -> Result<TransferStatus> {
        let mut report = [0u8; REPORT_SIZE];
        encode_status_request(&mut report);
        self.intr_out("transfer status request", &report, timeout)?;

        // Fixed short wait, independent of the caller's budget: the device
        // owes us a response, and abandoning it here would leave it queued
        // to confuse the next exchange.
        self.intr_in(&mut report, STATUS_RESPONSE_TIMEOUT)?;

        if report[0] == ReportId::ReadResponse.as_u8() {
            // A previous read may not have drained its final empty chunk;
            // it can surface here. Anything with payload is real desync.
            let stale_len = report[2];
            if stale_len != 0 {
                self.bus_good = false;
                return Err(Error::ProtocolDesync {
                    operation,
                    report: report[0],
                });
            }
            self.intr_in(&mut report, STATUS_RESPONSE_TIMEOUT)?;
        }

        if report[0] != ReportId::TransferStatusResponse.as_u8() {
            warn!(
                "unexpected report {:#04x} while waiting on {} transfer status",
                report[0], operation
            );
            self.bus_good = false;
            return Err(Error::ProtocolDesync {
                operation,
                report: report[0],
            });
        }

        Ok(parse_transfer_status(&report)?)
    }

    /// Recompute the remaining budget, optionally napping first to avoid
    /// spinning
    fn update_time_left(&self, end: Instant, sleep: bool) -> Duration {
        let mut time_left = end.saturating_duration_since(Instant::now());
        if sleep && !time_left.is_zero() {
            let nap = time_left.min(POLL_SLEEP);
            thread::sleep(nap);
            time_left = time_left.saturating_sub(nap);
        }
        time_left
    }

    fn intr_out(&mut self, name: &'static str, report: &Report, timeout: Duration) -> Result<()> {
        let timeout = timeout.max(MIN_OUT_TIMEOUT);
        if let Err(e) = self.transport.interrupt_out(report, timeout) {
            self.bus_good = false;
            warn!("failed to send {} report: {}", name, e);
            return Err(e);
        }
        Ok(())
    }

    fn intr_in(&mut self, report: &mut Report, timeout: Duration) -> Result<()> {
        let timeout = timeout.max(MIN_IN_TIMEOUT);
        if let Err(e) = self.transport.interrupt_in(report, timeout) {
            self.bus_good = false;
            return Err(e);
        }
        Ok(())
    }

    fn full_feature_in(&mut self, report: ReportId, buf: &mut [u8]) -> Result<()> {
        let read = self.transport.feature_report_in(report, buf)?;
        if read != buf.len() {
            return Err(ProtocolError::ShortReport {
                len: read,
                need: buf.len(),
            }
            .into());
        }
        Ok(())
    }
}

impl<T: HidTransport> I2cBus for Cp2112<T> {
    /// Claim the device, fix its configuration, and resynchronize
    fn open(&mut self) -> Result<()> {
        self.transport.open()?;
        let result = self.init_settings().and_then(|()| self.flush_transfers());
        if let Err(e) = result {
            self.close();
            return Err(e);
        }
        Ok(())
    }

    fn close(&mut self) {
        self.transport.close();
        self.bus_good = false;
    }

    fn read(&mut self, address: u8, buf: &mut [u8], timeout: Duration) -> Result<()> {
        let mut report = [0u8; REPORT_SIZE];
        encode_read_request(&mut report, address, buf.len()).map_err(invalid_argument)?;
        self.ensure_good_state()?;

        self.intr_out("read request", &report, timeout)?;
        self.process_read_response("read", buf, timeout)
    }

    fn write(&mut self, address: u8, data: &[u8], timeout: Duration) -> Result<()> {
        let mut report = [0u8; REPORT_SIZE];
        encode_write(&mut report, address, data).map_err(invalid_argument)?;
        self.ensure_good_state()?;

        debug!("writing {} bytes to i2c address {:#04x}", data.len(), address);
        let end = Instant::now() + timeout;
        self.intr_out("write request", &report, timeout)?;
        self.wait_for_transfer("write", end)?;
        Ok(())
    }
}

/// Length and address violations are caller mistakes, rejected before any
/// USB traffic
fn invalid_argument(e: ProtocolError) -> Error {
    Error::InvalidArgument(e.to_string())
}
