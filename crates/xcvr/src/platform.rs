//! Platform wiring data
//!
//! Topology shapes, arbiter presence, and register layouts differ per
//! chassis but are pure data; one generic [`MuxTree`] consumes them all.
//! Register offsets and bit positions are owned by the platform layer that
//! supplies the descriptor, never hard-coded in the driver.

use crate::mux::{MuxLayer, MuxTopology};

/// Where a module's hard-reset bit lives, reachable once the module's mux
/// path is selected
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResetControl {
    /// I2C address of the device holding the reset register
    pub address: u8,
    /// Register offset
    pub offset: u8,
    /// Bit(s) to assert for reset
    pub mask: u8,
}

/// Everything the facade needs to drive one platform
#[derive(Debug, Clone)]
pub struct PlatformDescriptor {
    /// Mux tree shape, root layer first
    pub topology: MuxTopology,
    /// Arbiter address if the upstream segment is shared with another
    /// master
    pub arbiter_address: Option<u8>,
    /// I2C address modules answer on once selected
    pub module_address: u8,
    /// Reset register layout, if the platform wires one up
    pub reset: Option<ResetControl>,
}

/// Built-in platform variants
///
/// Callers with other chassis build a [`PlatformDescriptor`] directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    /// Eight modules behind a single mux on a bus we own outright
    SingleStage8,
    /// 256 modules behind a two-stage fanout whose upstream segment is
    /// shared with a second master
    SharedDualStage256,
}

impl Platform {
    /// The wiring data for this platform
    pub fn descriptor(self) -> PlatformDescriptor {
        match self {
            Platform::SingleStage8 => PlatformDescriptor {
                topology: MuxTopology::single(0x70, 8),
                arbiter_address: None,
                module_address: 0x50,
                reset: Some(ResetControl {
                    address: 0x62,
                    offset: 0x10,
                    mask: 0x01,
                }),
            },
            Platform::SharedDualStage256 => PlatformDescriptor {
                topology: MuxTopology {
                    layers: vec![
                        MuxLayer {
                            addresses: vec![0x70, 0x73],
                            width: 8,
                        },
                        // Two leaf chips per root channel; addresses only
                        // need to be distinct within one live segment.
                        MuxLayer {
                            addresses: std::iter::repeat([0x71, 0x72])
                                .take(16)
                                .flatten()
                                .collect(),
                            width: 8,
                        },
                    ],
                },
                arbiter_address: Some(0x74),
                module_address: 0x50,
                reset: Some(ResetControl {
                    address: 0x62,
                    offset: 0x10,
                    mask: 0x01,
                }),
            },
        }
    }
}
