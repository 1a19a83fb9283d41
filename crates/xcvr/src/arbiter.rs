//! Shared-bus arbitration
//!
//! Some platforms hang the mux tree off a bus segment shared with a second
//! upstream master through a PCA9541-style arbiter chip. Before any
//! downstream traffic we must hold the segment; the other master can
//! reclaim it between our operations, so ownership is re-confirmed at the
//! start of every top-level operation and never cached.

use crate::error::{Error, Result};
use crate::i2c::{DEFAULT_TIMEOUT, I2cBus};
use std::thread;
use std::time::Duration;
use tracing::{debug, trace};

/// Control register number
const REG_CONTROL: u8 = 0x01;

/// Control register bits, as seen by this master
const CTL_MYBUS: u8 = 0x01;
const CTL_NMYBUS: u8 = 0x02;
const CTL_BUSON: u8 = 0x04;
const CTL_NBUSON: u8 = 0x08;
const CTL_BUSINIT: u8 = 0x10;

/// Default bound on acquisition attempts
pub const DEFAULT_RETRY_LIMIT: u32 = 25;

/// Default pause between acquisition attempts
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(1);

/// The datasheet's bus-takeover state machine, collapsed to data: indexed
/// by the current low 4 control bits, yields the value to write to claim
/// ownership of a powered bus. Kept verbatim as a table; re-deriving it as
/// branching logic is how transcription bugs happen.
const TAKEOVER: [u8; 16] = [4, 0, 1, 5, 4, 4, 5, 5, 0, 0, 1, 1, 0, 4, 5, 1];

/// Decoded control register state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArbiterState {
    pub my_bus: bool,
    pub not_my_bus: bool,
    pub bus_on: bool,
    pub not_bus_on: bool,
    /// Transient: the chip is still initializing and the other bits are
    /// not yet meaningful
    pub bus_init: bool,
}

impl ArbiterState {
    /// Decode a raw control register value
    pub fn from_register(raw: u8) -> ArbiterState {
        ArbiterState {
            my_bus: raw & CTL_MYBUS != 0,
            not_my_bus: raw & CTL_NMYBUS != 0,
            bus_on: raw & CTL_BUSON != 0,
            not_bus_on: raw & CTL_NBUSON != 0,
            bus_init: raw & CTL_BUSINIT != 0,
        }
    }

    /// True if the downstream bus is powered on
    pub fn powered(&self) -> bool {
        self.bus_on != self.not_bus_on
    }

    fn owned(&self) -> bool {
        self.my_bus == self.not_my_bus
    }
}

/// Answer to "do we hold the bus right now?"
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ownership {
    /// We hold the segment and it is powered
    Owned,
    /// The other master holds it, or the bus is off
    NotOwned,
    /// The chip is mid-initialization; retry shortly, not a failure
    Indeterminate,
}

/// Arbiter for one shared bus segment
///
/// Stateless between calls apart from configuration: ownership can change
/// underneath us at any time, so there is deliberately nothing to cache.
#[derive(Debug, Clone)]
pub struct BusArbiter {
    address: u8,
    retry_limit: u32,
    retry_delay: Duration,
}

impl BusArbiter {
    /// Arbiter at the given I2C address with default retry budget
    pub fn new(address: u8) -> BusArbiter {
        BusArbiter {
            address,
            retry_limit: DEFAULT_RETRY_LIMIT,
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }

    /// Override the retry budget (tests use a tighter one)
    pub fn with_retries(mut self, retry_limit: u32, retry_delay: Duration) -> BusArbiter {
        self.retry_limit = retry_limit;
        self.retry_delay = retry_delay;
        self
    }

    /// Query current ownership without trying to change it
    pub fn ownership<B: I2cBus>(&self, bus: &mut B) -> Result<Ownership> {
        let state = self.read_state(bus)?;
        if state.bus_init {
            return Ok(Ownership::Indeterminate);
        }
        if state.owned() && state.powered() {
            Ok(Ownership::Owned)
        } else {
            Ok(Ownership::NotOwned)
        }
    }

    /// Take ownership of the segment, turning the bus on if needed
    ///
    /// Bounded: at most `retry_limit` read/write rounds with `retry_delay`
    /// pauses, so the wall-clock worst case is their product. Exhausting
    /// the budget is a hard failure; callers must not touch downstream
    /// hardware without ownership.
    pub fn acquire<B: I2cBus>(&self, bus: &mut B) -> Result<()> {
        for attempt in 0..self.retry_limit {
            let raw = self.read_register(bus)?;
            let state = ArbiterState::from_register(raw);
            trace!("arbiter control {:#07b} (attempt {})", raw, attempt);

            if state.bus_init {
                thread::sleep(self.retry_delay);
                continue;
            }
            if state.owned() && state.powered() {
                return Ok(());
            }

            // The table's only fixpoint is the owned-and-powered state
            // handled above, so every write here asks for a real change.
            let target = TAKEOVER[usize::from(raw & 0x0f)];
            debug!("arbiter takeover: control {:#04x} -> {:#04x}", raw, target);
            self.write_register(bus, target)?;
            thread::sleep(self.retry_delay);
        }

        Err(Error::Arbitration {
            attempts: self.retry_limit,
        })
    }

    fn read_state<B: I2cBus>(&self, bus: &mut B) -> Result<ArbiterState> {
        Ok(ArbiterState::from_register(self.read_register(bus)?))
    }

    fn read_register<B: I2cBus>(&self, bus: &mut B) -> Result<u8> {
        // Pointer write then read; the combined-transaction path is not
        // worth its wedge hazard for a one-byte register.
        bus.write(self.address, &[REG_CONTROL], DEFAULT_TIMEOUT)?;
        let mut value = [0u8; 1];
        bus.read(self.address, &mut value, DEFAULT_TIMEOUT)?;
        Ok(value[0])
    }

    fn write_register<B: I2cBus>(&self, bus: &mut B, value: u8) -> Result<()> {
        bus.write(self.address, &[REG_CONTROL, value], DEFAULT_TIMEOUT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_decoding() {
        let state = ArbiterState::from_register(CTL_MYBUS | CTL_NMYBUS | CTL_BUSON);
        assert!(state.my_bus && state.not_my_bus && state.bus_on);
        assert!(!state.not_bus_on && !state.bus_init);
        assert!(state.owned());
        assert!(state.powered());

        let state = ArbiterState::from_register(CTL_NMYBUS | CTL_BUSON);
        assert!(!state.owned());

        let state = ArbiterState::from_register(CTL_BUSON | CTL_NBUSON);
        assert!(!state.powered());
    }

    #[test]
    fn test_takeover_table_fixpoint_is_owned_and_powered() {
        // The acquire loop stops on ownership before consulting the
        // table, so any register value the table maps to itself must
        // already be an owned, powered state.
        for current in 0u8..16 {
            if TAKEOVER[usize::from(current)] == current {
                let state = ArbiterState::from_register(current);
                assert!(state.owned() && state.powered(), "entry {}", current);
            }
        }
    }

    #[test]
    fn test_takeover_table_targets_owned_and_powered() {
        // Writes only touch our MYBUS/BUSON bits; the other master's
        // mirror bits stay. Every non-fixpoint entry must move toward an
        // owned, powered state.
        for current in 0u8..16 {
            let write = TAKEOVER[usize::from(current)];
            assert!(write & !(CTL_MYBUS | CTL_BUSON) == 0, "entry {}", current);
        }
    }
}
