//! Transceiver bus facade
//!
//! Composes the bridge, the mux tree, and the optional arbiter into
//! module-scoped operations. Every operation follows the same shape:
//! re-confirm shared-bus ownership (the other master may have reclaimed it
//! since the last call), route the tree to the module, then do the I2C
//! transfer. The mux selection is deliberately left in place afterwards so
//! that back-to-back operations on one module cost no extra writes.

use crate::arbiter::BusArbiter;
use crate::error::{Error, Result};
use crate::i2c::{DEFAULT_TIMEOUT, I2cBus};
use crate::mux::{ModuleId, MuxTree};
use crate::platform::{PlatformDescriptor, ResetControl};
use protocol::codec::{MAX_READ_LEN, MAX_WRITE_LEN};
use protocol::status::{COMPLETE_ADDRESS_NACK, Status0};
use std::thread;
use std::time::Duration;
use tracing::{debug, warn};

/// Budget for a presence probe; an absent module fails addressing fast
const PROBE_TIMEOUT: Duration = Duration::from_millis(100);

/// How long the reset bit is held asserted
const RESET_HOLD: Duration = Duration::from_millis(10);

/// Per-module outcome of a presence probe
///
/// Absence is an expected, routine answer, not an error; the other
/// variants record why a probe could not give a definite one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModulePresence {
    Present,
    NotPresent,
    /// The bus segment was busy or contended; worth re-asking later
    Busy,
    /// The probe's time budget ran out
    Timeout,
    /// The bridge or bus misbehaved; channel state unknown
    ProtocolError,
}

/// Module-scoped access to every transceiver on one physical bridge
///
/// Owns the device handle; blocking and single-owner. Share between
/// threads only behind a mutex serializing whole operations.
pub struct TransceiverBus<B: I2cBus> {
    bridge: B,
    tree: MuxTree,
    arbiter: Option<BusArbiter>,
    module_address: u8,
    reset: Option<ResetControl>,
}

impl<B: I2cBus> TransceiverBus<B> {
    /// Build a bus from a bridge and a platform's wiring data
    pub fn new(bridge: B, descriptor: PlatformDescriptor) -> Result<TransceiverBus<B>> {
        Ok(TransceiverBus {
            bridge,
            tree: MuxTree::new(descriptor.topology)?,
            arbiter: descriptor.arbiter_address.map(BusArbiter::new),
            module_address: descriptor.module_address,
            reset: descriptor.reset,
        })
    }

    /// Open the bridge and force the mux tree to a known-clear state
    pub fn open(&mut self) -> Result<()> {
        self.bridge.open()?;
        if let Some(arbiter) = &self.arbiter {
            arbiter.acquire(&mut self.bridge)?;
        }
        self.tree.initialize(&mut self.bridge)
    }

    /// Release the bridge
    pub fn close(&mut self) {
        self.bridge.close();
    }

    /// Number of modules on this platform
    pub fn num_modules(&self) -> usize {
        self.tree.num_modules()
    }

    /// Module whose path is currently routed, if any
    pub fn selected(&self) -> Option<ModuleId> {
        self.tree.selected()
    }

    /// The underlying bridge (test inspection)
    pub fn bridge(&self) -> &B {
        &self.bridge
    }

    /// Mutable access to the underlying bridge (test scripting)
    pub fn bridge_mut(&mut self) -> &mut B {
        &mut self.bridge
    }

    /// The mux tree (test inspection)
    pub fn tree(&self) -> &MuxTree {
        &self.tree
    }

    /// Read `buf.len()` bytes from register `offset` of the device at
    /// `address` on `module`'s channel
    pub fn module_read(
        &mut self,
        module: ModuleId,
        address: u8,
        offset: u8,
        buf: &mut [u8],
    ) -> Result<()> {
        if buf.is_empty() || buf.len() > MAX_READ_LEN {
            return Err(Error::InvalidArgument(format!(
                "module read length {} out of range 1..={}",
                buf.len(),
                MAX_READ_LEN
            )));
        }
        self.route(module)?;

        // Set the register pointer with a separate write, then read. One
        // combined repeated-start transaction would be faster, but a
        // timeout there can wedge the bridge beyond software recovery.
        self.bridge.write(address, &[offset], DEFAULT_TIMEOUT)?;
        self.bridge.read(address, buf, DEFAULT_TIMEOUT)
    }

    /// Write `data` to register `offset` of the device at `address` on
    /// `module`'s channel
    pub fn module_write(
        &mut self,
        module: ModuleId,
        address: u8,
        offset: u8,
        data: &[u8],
    ) -> Result<()> {
        if data.is_empty() || data.len() > MAX_WRITE_LEN - 1 {
            return Err(Error::InvalidArgument(format!(
                "module write length {} out of range 1..={}",
                data.len(),
                MAX_WRITE_LEN - 1
            )));
        }
        self.route(module)?;

        let mut payload = Vec::with_capacity(1 + data.len());
        payload.push(offset);
        payload.extend_from_slice(data);
        self.bridge.write(address, &payload, DEFAULT_TIMEOUT)
    }

    /// Probe every module slot, isolating per-channel faults
    ///
    /// One glitchy module must not hide the other fifteen-plus, so probe
    /// failures are recorded per slot and never abort the scan.
    pub fn scan_presence(&mut self) -> Vec<ModulePresence> {
        // Topology validation caps the module count within ModuleId range.
        let count = u16::try_from(self.num_modules()).unwrap_or(u16::MAX);
        (1..=count)
            .map(|m| {
                // Slots are 1..=count, so the ID is always constructible.
                let module = ModuleId::new(m).expect("slot index is nonzero");
                let presence = self.probe(module);
                if presence != ModulePresence::Present {
                    debug!("module {}: {:?}", module, presence);
                }
                presence
            })
            .collect()
    }

    /// Probe one module slot
    pub fn is_present(&mut self, module: ModuleId) -> Result<bool> {
        if module.index() >= self.num_modules() {
            return Err(Error::InvalidArgument(format!(
                "module {} out of range 1..={}",
                module,
                self.num_modules()
            )));
        }
        Ok(self.probe(module) == ModulePresence::Present)
    }

    /// Pulse the platform's reset bit for `module`
    ///
    /// Read-modify-write: assert the bit, hold, release. The hold time is
    /// the minimum the module datasheets require.
    pub fn trigger_hard_reset(&mut self, module: ModuleId) -> Result<()> {
        let reset = self.reset.ok_or_else(|| {
            Error::InvalidArgument("platform has no reset control".to_string())
        })?;

        debug!("hard reset of module {}", module);
        let mut reg = [0u8; 1];
        self.module_read(module, reset.address, reset.offset, &mut reg)?;

        self.module_write(module, reset.address, reset.offset, &[reg[0] | reset.mask])?;
        thread::sleep(RESET_HOLD);
        self.module_write(module, reset.address, reset.offset, &[reg[0] & !reset.mask])
    }

    /// Re-confirm upstream ownership and route the tree to `module`
    fn route(&mut self, module: ModuleId) -> Result<()> {
        if let Some(arbiter) = &self.arbiter {
            arbiter.acquire(&mut self.bridge)?;
        }
        self.tree.select(&mut self.bridge, Some(module))
    }

    fn probe(&mut self, module: ModuleId) -> ModulePresence {
        let mut byte = [0u8; 1];
        let result = self.route(module).and_then(|()| {
            self.bridge
                .read(self.module_address, &mut byte, PROBE_TIMEOUT)
        });

        match result {
            Ok(()) => ModulePresence::Present,
            Err(Error::TransferFailed {
                status0, status1, ..
            }) if status0 == Status0::CompleteWithError as u8
                && status1 == COMPLETE_ADDRESS_NACK =>
            {
                ModulePresence::NotPresent
            }
            Err(Error::TransferFailed {
                status0, status1, ..
            }) if status0 == Status0::CompleteWithError as u8 && (status1 == 1 || status1 == 2) => {
                // Bus not free or arbitration lost on the segment.
                ModulePresence::Busy
            }
            Err(Error::TransferTimeout { .. }) | Err(Error::Usb(rusb::Error::Timeout)) => {
                ModulePresence::Timeout
            }
            Err(e) => {
                warn!("module {} probe failed: {}", module, e);
                ModulePresence::ProtocolError
            }
        }
    }
}
