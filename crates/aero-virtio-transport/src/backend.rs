//! Interfaces the transport consumes from the virtio core.

use crate::error::{QueueError, RegisterError};
use crate::platform::GuestId;
use crate::transport::TransportHandle;

/// Queue placement handed to the backend when the guest writes `QUEUE_PFN`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LegacyQueueSetup {
    pub page_size: u32,
    pub align: u32,
    pub pfn: u32,
}

impl LegacyQueueSetup {
    /// Guest-physical base address of the ring.
    pub fn base_address(&self) -> u64 {
        u64::from(self.pfn) * u64::from(self.page_size)
    }
}

/// Device backend behind one transport instance.
///
/// Calls are made with the owning device's lock held and must complete
/// without waiting on the guest. Implementations must not call back into
/// the owning [`TransportHandle`] from inside these methods; report
/// synchronous completions through the return value of
/// [`VirtioBackend::notify_queue`] instead.
pub trait VirtioBackend: Send {
    /// Full offered feature bitset. The transport pages it 32 bits at a time.
    fn host_features(&self) -> u64;

    /// Applies the guest's accepted features (page 0 only).
    fn set_guest_features(&mut self, features: u64);

    fn num_queues(&self) -> u16;

    fn max_queue_size(&self, queue: u16) -> u32;

    fn resize_queue(&mut self, queue: u16, size: u32) -> Result<(), QueueError>;

    /// Makes the queue usable at the address described by `setup`.
    fn finalize_queue(&mut self, queue: u16, setup: LegacyQueueSetup) -> Result<(), QueueError>;

    /// Last frame number the queue was finalized at, 0 if inactive.
    fn queue_pfn(&self, _queue: u16) -> u32 {
        0
    }

    /// Processes pending descriptors. Returns `true` if used entries were
    /// produced and the guest should be interrupted.
    fn notify_queue(&mut self, queue: u16) -> bool;

    fn reset(&mut self);

    /// Reads device-specific configuration space.
    fn read_config(&self, _offset: u64, data: &mut [u8]) {
        data.fill(0);
    }

    /// Writes device-specific configuration space. Returns `true` if the
    /// write changed the configuration and the guest should be told.
    fn write_config(&mut self, _offset: u64, _data: &[u8]) -> bool {
        false
    }
}

/// What the core learns about a transport instance when it registers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VirtioDeviceInfo {
    /// `"{guest}/{node}"`.
    pub name: String,
    pub device_type: u32,
    pub guest: GuestId,
}

/// Registry of device backends, keyed by virtio device type.
pub trait VirtioCore: Send + Sync {
    /// Binds a backend for `info.device_type`. `handle` is the callback
    /// surface the backend uses to signal the guest.
    fn register_device(
        &self,
        info: &VirtioDeviceInfo,
        handle: TransportHandle,
    ) -> Result<Box<dyn VirtioBackend>, RegisterError>;

    fn unregister_device(&self, info: &VirtioDeviceInfo);
}
