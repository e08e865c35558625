//! Legacy virtio transport emulation.
//!
//! Presents the virtio register block to a guest driver and maps register
//! accesses onto a device-agnostic [`backend::VirtioBackend`]. Descriptor
//! processing, bus trapping and interrupt controllers are out of scope and
//! are reached only through the traits in [`backend`] and [`platform`].
//!
//! Typical wiring:
//!
//! 1. The host builds one [`emulator::VirtioPciEmulator`] with its
//!    [`platform::HostPlatform`] and [`backend::VirtioCore`].
//! 2. For every matching [`platform::DeviceNode`] the bus calls
//!    [`emulator::VirtioPciEmulator::probe`].
//! 3. Register traps go to [`emulator::EmulatedDevice::mmio_read`] /
//!    [`emulator::EmulatedDevice::mmio_write`]; backends signal completions
//!    through the [`transport::TransportHandle`] they were registered with.

pub mod backend;
pub mod config;
pub mod emulator;
pub mod error;
pub mod platform;
pub mod regs;
pub mod state;
pub mod transport;

pub use backend::{LegacyQueueSetup, VirtioBackend, VirtioCore, VirtioDeviceInfo};
pub use config::TransportConfig;
pub use emulator::{EmulatedDevice, VirtioPciEmulator};
pub use error::{ProbeError, QueueError, RegisterError};
pub use platform::{DeviceNode, Guest, GuestId, HostPlatform, IrqLog};
pub use state::{DeviceStatus, InterruptStatus, TransportState};
pub use transport::{TransportHandle, TransportOps, VirtioTransportDevice, VIRTIO_PCI_TRANSPORT};
