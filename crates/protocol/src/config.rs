//! Feature-report configuration payloads
//!
//! Device configuration travels in HID feature reports over the control
//! endpoint. Each struct here maps one report layout; encode functions
//! produce the full payload including the leading report ID.

use crate::error::{ProtocolError, Result};
use crate::report::ReportId;
use byteorder::{BigEndian, ByteOrder};

/// Size of the SMBus configuration feature report
pub const SMBUS_CONFIG_LEN: usize = 14;

/// Size of the GPIO configuration feature report
pub const GPIO_CONFIG_LEN: usize = 5;

/// SMBus configuration register block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SmbusConfig {
    /// Bus clock in Hz
    pub speed: u32,
    /// Our own (slave) address, already in wire form
    pub address: u8,
    /// Auto-send-read enable; broken in hardware, must stay 0
    pub auto_send_read: u8,
    /// Hardware write timeout in ms; chip ignores values above 1000
    pub write_timeout_ms: u16,
    /// Hardware read timeout in ms; chip ignores values above 1000
    pub read_timeout_ms: u16,
    /// Reset the bus on SCL held low
    pub scl_low_timeout: u8,
    /// Hardware retry limit; 0 retries indefinitely, must stay below 1000
    pub retry_limit: u16,
}

impl SmbusConfig {
    /// Decode from a feature report payload (report ID included)
    pub fn decode(buf: &[u8]) -> Result<SmbusConfig> {
        if buf.len() < SMBUS_CONFIG_LEN {
            return Err(ProtocolError::ShortReport {
                len: buf.len(),
                need: SMBUS_CONFIG_LEN,
            });
        }
        Ok(SmbusConfig {
            speed: BigEndian::read_u32(&buf[1..5]),
            address: buf[5],
            auto_send_read: buf[6],
            write_timeout_ms: BigEndian::read_u16(&buf[7..9]),
            read_timeout_ms: BigEndian::read_u16(&buf[9..11]),
            scl_low_timeout: buf[11],
            retry_limit: BigEndian::read_u16(&buf[12..14]),
        })
    }

    /// Encode into a feature report payload (report ID included)
    pub fn encode(&self, buf: &mut [u8; SMBUS_CONFIG_LEN]) {
        buf[0] = ReportId::SmbusConfig.as_u8();
        BigEndian::write_u32(&mut buf[1..5], self.speed);
        buf[5] = self.address;
        buf[6] = self.auto_send_read;
        BigEndian::write_u16(&mut buf[7..9], self.write_timeout_ms);
        BigEndian::write_u16(&mut buf[9..11], self.read_timeout_ms);
        buf[11] = self.scl_low_timeout;
        BigEndian::write_u16(&mut buf[12..14], self.retry_limit);
    }
}

/// GPIO pin configuration register block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GpioConfig {
    /// Per-pin direction bits (1 = output)
    pub direction: u8,
    /// Per-pin push-pull bits (1 = push-pull, 0 = open-drain)
    pub push_pull: u8,
    /// Special function enables
    pub special: u8,
    /// Clock output divider
    pub clock_divider: u8,
}

impl GpioConfig {
    /// Decode from a feature report payload (report ID included)
    pub fn decode(buf: &[u8]) -> Result<GpioConfig> {
        if buf.len() < GPIO_CONFIG_LEN {
            return Err(ProtocolError::ShortReport {
                len: buf.len(),
                need: GPIO_CONFIG_LEN,
            });
        }
        Ok(GpioConfig {
            direction: buf[1],
            push_pull: buf[2],
            special: buf[3],
            clock_divider: buf[4],
        })
    }

    /// Encode into a feature report payload (report ID included)
    pub fn encode(&self, buf: &mut [u8; GPIO_CONFIG_LEN]) {
        buf[0] = ReportId::GpioConfig.as_u8();
        buf[1] = self.direction;
        buf[2] = self.push_pull;
        buf[3] = self.special;
        buf[4] = self.clock_divider;
    }
}

/// Part number and version reported by the device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VersionInfo {
    pub part_number: u8,
    pub device_version: u8,
}
