//! Control-plane driver for transceiver modules behind a USB-to-I2C bridge
//!
//! A switch chassis exposes its pluggable transceiver modules on I2C buses
//! that are only reachable through a CP2112 USB-HID bridge and a tree of
//! hardware multiplexers; some platforms additionally share the upstream
//! bus segment with a second master through an arbiter chip. This crate
//! drives that path end to end:
//!
//! - [`bridge::Cp2112`] implements the bridge's HID-report protocol,
//!   including desync recovery and software-owned transfer timeouts.
//! - [`mux::MuxTree`] routes exactly one module at a time through the
//!   multiplexer tree with a minimal number of hardware writes.
//! - [`arbiter::BusArbiter`] claims the shared upstream segment before any
//!   downstream traffic on platforms that need it.
//! - [`bus::TransceiverBus`] composes the three into module-scoped
//!   read/write/presence/reset operations.
//!
//! Everything is blocking and single-owner: the wire protocol carries no
//! transaction IDs, so one `TransceiverBus` instance maps to one physical
//! device and concurrent callers must serialize whole operations (for
//! example behind a `Mutex`) rather than interleave them.

pub mod arbiter;
pub mod bridge;
pub mod bus;
pub mod error;
pub mod i2c;
pub mod logging;
pub mod mux;
pub mod platform;
pub mod testing;
pub mod transport;

pub use arbiter::{ArbiterState, BusArbiter, Ownership};
pub use bridge::Cp2112;
pub use bus::{ModulePresence, TransceiverBus};
pub use error::{Error, Result};
pub use i2c::{DEFAULT_TIMEOUT, I2cBus};
pub use logging::setup_logging;
pub use mux::{ModuleId, MuxLayer, MuxTopology, MuxTree};
pub use platform::{Platform, PlatformDescriptor, ResetControl};
pub use transport::{HidTransport, UsbTransport};
