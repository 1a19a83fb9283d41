//! USB HID transport
//!
//! Thin resource wrapper around the bridge chip's USB interface: device
//! discovery, handle lifecycle, 64-byte interrupt transfers on endpoint 1,
//! and HID feature reports on the control endpoint. All protocol logic
//! lives a layer up in [`crate::bridge`].

use crate::error::{Error, Result};
use protocol::{REPORT_SIZE, Report, ReportId};
use rusb::{Context, DeviceHandle, UsbContext};
use std::time::Duration;
use tracing::{debug, trace, warn};

/// CP2112 USB vendor ID
pub const VENDOR_ID: u16 = 0x10c4;

/// CP2112 USB product ID
pub const PRODUCT_ID: u16 = 0xea90;

/// Interrupt endpoint number used for all report traffic
const INTERRUPT_ENDPOINT: u8 = 1;

/// HID class request: GET_REPORT
const HID_GET_REPORT: u8 = 1;

/// HID class request: SET_REPORT
const HID_SET_REPORT: u8 = 9;

/// HID report type selector for feature reports (high byte of wValue)
const REPORT_TYPE_FEATURE: u16 = 0x0300;

/// Timeout for feature-report control transfers
const FEATURE_TIMEOUT: Duration = Duration::from_secs(1);

/// Raw report-level access to the bridge chip
///
/// The bridge drives this trait; [`UsbTransport`] is the real
/// implementation and [`crate::testing::MockTransport`] the scripted one.
pub trait HidTransport {
    /// Claim the device
    fn open(&mut self) -> Result<()>;

    /// Release the device
    fn close(&mut self);

    /// Send one 64-byte report on the interrupt-out endpoint
    fn interrupt_out(&mut self, report: &Report, timeout: Duration) -> Result<()>;

    /// Receive one 64-byte report from the interrupt-in endpoint
    ///
    /// Fails unless exactly [`REPORT_SIZE`] bytes arrive.
    fn interrupt_in(&mut self, report: &mut Report, timeout: Duration) -> Result<()>;

    /// Read a feature report into `buf`, returning the byte count
    fn feature_report_in(&mut self, report: ReportId, buf: &mut [u8]) -> Result<usize>;

    /// Write a feature report
    fn feature_report_out(&mut self, report: ReportId, buf: &[u8]) -> Result<()>;
}

/// rusb-backed transport for the real bridge chip
pub struct UsbTransport {
    context: Context,
    handle: Option<DeviceHandle<Context>>,
}

impl UsbTransport {
    /// Create a transport with its own libusb context
    pub fn new() -> Result<UsbTransport> {
        Ok(UsbTransport {
            context: Context::new()?,
            handle: None,
        })
    }

    fn handle(&mut self) -> Result<&mut DeviceHandle<Context>> {
        self.handle
            .as_mut()
            .ok_or(Error::Usb(rusb::Error::NoDevice))
    }
}

impl HidTransport for UsbTransport {
    fn open(&mut self) -> Result<()> {
        if self.handle.is_some() {
            return Ok(());
        }

        let handle = self
            .context
            .open_device_with_vid_pid(VENDOR_ID, PRODUCT_ID)
            .ok_or(Error::Usb(rusb::Error::NotFound))?;

        // The kernel HID driver binds the chip by default; take it over.
        match handle.kernel_driver_active(0) {
            Ok(true) => {
                debug!("detaching kernel driver from bridge interface");
                if let Err(e) = handle.detach_kernel_driver(0) {
                    warn!("failed to detach kernel driver: {}", e);
                }
            }
            Ok(false) => {}
            Err(e) => debug!("could not check kernel driver status: {}", e),
        }
        handle.claim_interface(0)?;

        debug!("opened bridge device {:04x}:{:04x}", VENDOR_ID, PRODUCT_ID);
        self.handle = Some(handle);
        Ok(())
    }

    fn close(&mut self) {
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.release_interface(0) {
                warn!("failed to release bridge interface: {}", e);
            }
            if let Err(e) = handle.attach_kernel_driver(0) {
                debug!("could not reattach kernel driver: {}", e);
            }
            debug!("closed bridge device");
        }
    }

    fn interrupt_out(&mut self, report: &Report, timeout: Duration) -> Result<()> {
        trace!("intr out: {:02x?}", &report[..]);
        let handle = self.handle()?;
        let written =
            handle.write_interrupt(INTERRUPT_ENDPOINT, report, timeout)?;
        if written != REPORT_SIZE {
            return Err(Error::Usb(rusb::Error::Io));
        }
        Ok(())
    }

    fn interrupt_in(&mut self, report: &mut Report, timeout: Duration) -> Result<()> {
        let handle = self.handle()?;
        let read = handle.read_interrupt(0x80 | INTERRUPT_ENDPOINT, report, timeout)?;
        if read != REPORT_SIZE {
            return Err(Error::Usb(rusb::Error::Io));
        }
        trace!("intr in: {:02x?}", &report[..]);
        Ok(())
    }

    fn feature_report_in(&mut self, report: ReportId, buf: &mut [u8]) -> Result<usize> {
        let request_type = rusb::request_type(
            rusb::Direction::In,
            rusb::RequestType::Class,
            rusb::Recipient::Interface,
        );
        let value = REPORT_TYPE_FEATURE | u16::from(report.as_u8());
        let handle = self.handle()?;
        let read = handle.read_control(
            request_type,
            HID_GET_REPORT,
            value,
            0,
            buf,
            FEATURE_TIMEOUT,
        )?;
        Ok(read)
    }

    fn feature_report_out(&mut self, report: ReportId, buf: &[u8]) -> Result<()> {
        let request_type = rusb::request_type(
            rusb::Direction::Out,
            rusb::RequestType::Class,
            rusb::Recipient::Interface,
        );
        let value = REPORT_TYPE_FEATURE | u16::from(report.as_u8());
        let handle = self.handle()?;
        let written = handle.write_control(
            request_type,
            HID_SET_REPORT,
            value,
            0,
            buf,
            FEATURE_TIMEOUT,
        )?;
        if written != buf.len() {
            return Err(Error::Usb(rusb::Error::Io));
        }
        Ok(())
    }
}

impl Drop for UsbTransport {
    fn drop(&mut self) {
        self.close();
    }
}
