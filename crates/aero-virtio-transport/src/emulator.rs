//! Probe/reset/remove of transport instances on behalf of the bus framework.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::backend::{VirtioCore, VirtioDeviceInfo};
use crate::config::TransportConfig;
use crate::error::{ProbeError, RegisterError};
use crate::platform::{DeviceNode, Guest, HostPlatform};
use crate::transport::{TransportOps, VirtioTransportDevice, VIRTIO_PCI_TRANSPORT};

/// Device-tree property carrying the virtio device type.
pub const VIRTIO_TYPE_PROPERTY: &str = "virtio_type";

/// One entry of the emulator's match table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceMatch {
    pub device_type: &'static str,
    pub compatible: &'static str,
}

impl DeviceMatch {
    pub fn matches(&self, node: &DeviceNode) -> bool {
        node.device_type == self.device_type && node.is_compatible(self.compatible)
    }
}

pub const VIRTIO_PCI_MATCH_TABLE: &[DeviceMatch] = &[
    DeviceMatch {
        device_type: "virtio",
        compatible: "virtio,pci",
    },
    DeviceMatch {
        device_type: "virtio",
        compatible: "virtio,mmio",
    },
];

/// Bus-side handle for a declared device.
///
/// `transport` is the back-reference register traps go through; it is only
/// populated once probe has fully succeeded.
#[derive(Debug)]
pub struct EmulatedDevice {
    pub node: DeviceNode,
    transport: Option<Arc<VirtioTransportDevice>>,
}

impl EmulatedDevice {
    pub fn new(node: DeviceNode) -> Self {
        Self {
            node,
            transport: None,
        }
    }

    pub fn transport(&self) -> Option<&Arc<VirtioTransportDevice>> {
        self.transport.as_ref()
    }

    pub fn is_bound(&self) -> bool {
        self.transport.is_some()
    }

    /// Trapped guest read. Unbound devices read as zero.
    pub fn mmio_read(&self, offset: u64, data: &mut [u8]) {
        match &self.transport {
            Some(dev) => dev.read(offset, data),
            None => data.fill(0),
        }
    }

    /// Trapped guest write. Dropped while unbound.
    pub fn mmio_write(&self, offset: u64, data: &[u8]) {
        if let Some(dev) = &self.transport {
            dev.write(offset, data);
        }
    }
}

/// The virtio transport emulator registered with the bus framework.
///
/// Immutable after construction; every device it creates shares the same
/// [`TransportOps`] table.
pub struct VirtioPciEmulator {
    name: &'static str,
    match_table: &'static [DeviceMatch],
    ops: &'static TransportOps,
    platform: Arc<dyn HostPlatform>,
    core: Arc<dyn VirtioCore>,
    config: TransportConfig,
}

impl VirtioPciEmulator {
    pub fn new(platform: Arc<dyn HostPlatform>, core: Arc<dyn VirtioCore>) -> Self {
        Self::with_config(platform, core, TransportConfig::default())
    }

    pub fn with_config(
        platform: Arc<dyn HostPlatform>,
        core: Arc<dyn VirtioCore>,
        config: TransportConfig,
    ) -> Self {
        Self {
            name: "virtio-pci",
            match_table: VIRTIO_PCI_MATCH_TABLE,
            ops: &VIRTIO_PCI_TRANSPORT,
            platform,
            core,
            config,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn match_table(&self) -> &'static [DeviceMatch] {
        self.match_table
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    pub fn matches(&self, node: &DeviceNode) -> bool {
        self.match_table.iter().any(|m| m.matches(node))
    }

    /// Creates and registers a transport instance for `edev`.
    ///
    /// On error nothing is registered and `edev` stays unbound.
    pub fn probe(&self, edev: &mut EmulatedDevice, guest: &Guest) -> Result<(), ProbeError> {
        let result = self.try_probe(edev, guest);
        if let Err(err) = &result {
            warn!(emulator = self.name, node = %edev.node, %err, "probe failed");
        }
        result
    }

    fn try_probe(&self, edev: &mut EmulatedDevice, guest: &Guest) -> Result<(), ProbeError> {
        let node = &edev.node;
        if edev.transport.is_some() {
            return Err(ProbeError::AlreadyBound {
                node: node.name.clone(),
            });
        }
        if !self.matches(node) {
            return Err(ProbeError::Unmatched {
                node: node.name.clone(),
            });
        }

        let device_type = node
            .read_u32(VIRTIO_TYPE_PROPERTY)
            .ok_or_else(|| ProbeError::MissingProperty {
                node: node.name.clone(),
                property: VIRTIO_TYPE_PROPERTY,
            })?;
        let irq = node.irq(0).ok_or_else(|| ProbeError::MissingInterrupt {
            node: node.name.clone(),
            index: 0,
        })?;

        let info = VirtioDeviceInfo {
            name: format!("{}/{}", guest.name, node.name),
            device_type,
            guest: guest.id,
        };
        let dev = VirtioTransportDevice::new(
            info.clone(),
            irq,
            self.ops,
            Arc::clone(&self.platform),
            self.config.clone(),
        );

        // `dev` is dropped on the error path; the handle given to the core
        // then no longer upgrades.
        let backend = self
            .core
            .register_device(&info, dev.handle())
            .map_err(|source| match source {
                RegisterError::Exhausted => ProbeError::ResourceExhausted {
                    node: node.name.clone(),
                },
                source => ProbeError::Registration {
                    node: node.name.clone(),
                    source,
                },
            })?;
        dev.attach_backend(backend);

        debug!(
            emulator = self.name,
            device = %info.name,
            device_type,
            irq,
            "virtio transport bound"
        );
        edev.transport = Some(dev);
        Ok(())
    }

    /// Resets the bound device. Registration and the bus back-reference are
    /// left untouched.
    pub fn reset(&self, edev: &EmulatedDevice) {
        if let Some(dev) = &edev.transport {
            debug!(device = %dev.name(), "virtio transport reset");
            dev.reset();
        }
    }

    /// Unbinds and unregisters the device. A no-op for unbound devices.
    pub fn remove(&self, edev: &mut EmulatedDevice) {
        let Some(dev) = edev.transport.take() else {
            return;
        };
        self.core.unregister_device(dev.info());
        debug!(device = %dev.name(), "virtio transport removed");
    }
}

impl std::fmt::Debug for VirtioPciEmulator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VirtioPciEmulator")
            .field("name", &self.name)
            .field("match_table", &self.match_table)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
