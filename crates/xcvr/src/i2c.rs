//! Blocking I2C access trait
//!
//! This is the seam between the bridge and everything above it: the mux
//! tree, the arbiter, and the facade all talk to plain 7-bit I2C addresses
//! through this trait, and the tests substitute a recording mock for the
//! real bridge.

use crate::error::Result;
use std::time::Duration;

/// Default per-transaction time budget
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(500);

/// A blocking master on one I2C bus segment
///
/// Addresses are plain 7-bit values; the shift onto the wire is the
/// bridge's business. Every data call blocks until completion, explicit
/// failure, or exhaustion of the caller's time budget.
pub trait I2cBus {
    /// Claim the underlying device and bring the bus to a known state
    fn open(&mut self) -> Result<()>;

    /// Release the underlying device
    fn close(&mut self);

    /// Read `buf.len()` bytes from `address`
    fn read(&mut self, address: u8, buf: &mut [u8], timeout: Duration) -> Result<()>;

    /// Write `data` to `address`
    fn write(&mut self, address: u8, data: &[u8], timeout: Duration) -> Result<()>;
}
