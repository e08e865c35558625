//! Register dispatch and interrupt signalling for one virtio device.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use tracing::{debug, trace};

use crate::backend::{LegacyQueueSetup, VirtioBackend, VirtioDeviceInfo};
use crate::config::TransportConfig;
use crate::platform::{GuestId, HostPlatform};
use crate::regs::{
    Register, REGISTER_WIDTH, VIRTIO_MMIO_CONFIG, VIRTIO_MMIO_LEGACY_VERSION, VIRTIO_MMIO_MAGIC,
    VIRTIO_MMIO_WINDOW_SIZE,
};
use crate::state::{InterruptStatus, TransportState};

/// Behaviour shared by every instance of one transport kind.
#[derive(Debug)]
pub struct TransportOps {
    pub name: &'static str,
}

impl TransportOps {
    /// Used-buffer notification from the core.
    pub fn notify(&self, dev: &VirtioTransportDevice, queue: u16) {
        dev.signal_used(queue);
    }

    /// Configuration-change notification from the core.
    pub fn config_changed(&self, dev: &VirtioTransportDevice) {
        dev.signal_config_change();
    }
}

pub static VIRTIO_PCI_TRANSPORT: TransportOps = TransportOps { name: "virtio_pci" };

/// Callback surface handed to the virtio core at registration.
///
/// Holds only a weak reference, so a backend outliving its device cannot
/// reach freed transport state.
#[derive(Debug, Clone)]
pub struct TransportHandle {
    device: Weak<VirtioTransportDevice>,
    ops: &'static TransportOps,
}

impl TransportHandle {
    /// Signals used buffers on `queue`. Returns `false` once the device has
    /// been removed.
    pub fn notify(&self, queue: u16) -> bool {
        match self.device.upgrade() {
            Some(dev) => {
                self.ops.notify(&dev, queue);
                true
            }
            None => false,
        }
    }

    pub fn notify_config_change(&self) -> bool {
        match self.device.upgrade() {
            Some(dev) => {
                self.ops.config_changed(&dev);
                true
            }
            None => false,
        }
    }

    pub fn is_attached(&self) -> bool {
        self.device.strong_count() > 0
    }

    pub fn transport_name(&self) -> &'static str {
        self.ops.name
    }
}

struct Inner {
    state: TransportState,
    backend: Option<Box<dyn VirtioBackend>>,
}

/// One guest-visible virtio device.
///
/// Every register access, notification and reset takes the device lock, so
/// they are totally ordered per device. Host interrupt calls are made with
/// the lock held.
pub struct VirtioTransportDevice {
    info: VirtioDeviceInfo,
    vendor_id: u32,
    irq: u32,
    ops: &'static TransportOps,
    platform: Arc<dyn HostPlatform>,
    config: TransportConfig,
    inner: Mutex<Inner>,
}

impl VirtioTransportDevice {
    /// Creates a device with no backend bound. Until [`Self::attach_backend`]
    /// runs, backend-derived registers read as zero and backend-bound writes
    /// are dropped.
    pub fn new(
        info: VirtioDeviceInfo,
        irq: u32,
        ops: &'static TransportOps,
        platform: Arc<dyn HostPlatform>,
        config: TransportConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            info,
            vendor_id: config.vendor_id,
            irq,
            ops,
            platform,
            inner: Mutex::new(Inner {
                state: TransportState::new(&config),
                backend: None,
            }),
            config,
        })
    }

    pub fn handle(self: &Arc<Self>) -> TransportHandle {
        TransportHandle {
            device: Arc::downgrade(self),
            ops: self.ops,
        }
    }

    pub fn attach_backend(&self, backend: Box<dyn VirtioBackend>) {
        self.lock().backend = Some(backend);
    }

    pub fn info(&self) -> &VirtioDeviceInfo {
        &self.info
    }

    pub fn name(&self) -> &str {
        &self.info.name
    }

    pub fn device_id(&self) -> u32 {
        self.info.device_type
    }

    pub fn vendor_id(&self) -> u32 {
        self.vendor_id
    }

    pub fn guest(&self) -> GuestId {
        self.info.guest
    }

    pub fn irq(&self) -> u32 {
        self.irq
    }

    pub fn ops(&self) -> &'static TransportOps {
        self.ops
    }

    /// Snapshot of the mutable transport state.
    pub fn state(&self) -> TransportState {
        self.lock().state.clone()
    }

    pub fn interrupt_status(&self) -> InterruptStatus {
        self.lock().state.interrupt_state
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Guest read of `data.len()` bytes at `offset`.
    pub fn read(&self, offset: u64, data: &mut [u8]) {
        if offset >= VIRTIO_MMIO_WINDOW_SIZE {
            data.fill(0);
            return;
        }
        if offset >= VIRTIO_MMIO_CONFIG {
            let inner = self.lock();
            match inner.backend.as_deref() {
                Some(backend) => backend.read_config(offset - VIRTIO_MMIO_CONFIG, data),
                None => data.fill(0),
            }
            return;
        }

        let Some((reg, lane)) = Register::containing(offset) else {
            trace!(device = %self.info.name, offset, "read of unimplemented register");
            data.fill(0);
            return;
        };
        if data.is_empty() || lane + data.len() > REGISTER_WIDTH || !reg.access().readable() {
            data.fill(0);
            return;
        }

        let value = {
            let inner = self.lock();
            self.read_register(&inner, reg)
        };
        let bytes = value.to_le_bytes();
        data.copy_from_slice(&bytes[lane..lane + data.len()]);
    }

    /// Convenience 32-bit read.
    pub fn read_u32(&self, offset: u64) -> u32 {
        let mut buf = [0u8; 4];
        self.read(offset, &mut buf);
        u32::from_le_bytes(buf)
    }

    /// Guest write of `data` at `offset`.
    pub fn write(&self, offset: u64, data: &[u8]) {
        if offset >= VIRTIO_MMIO_WINDOW_SIZE {
            return;
        }
        if offset >= VIRTIO_MMIO_CONFIG {
            let mut inner = self.lock();
            let Inner { state, backend } = &mut *inner;
            if let Some(backend) = backend.as_mut() {
                if backend.write_config(offset - VIRTIO_MMIO_CONFIG, data) {
                    self.raise(state, InterruptStatus::CONFIG);
                }
            }
            return;
        }

        let Some(reg) = Register::from_offset(offset) else {
            trace!(device = %self.info.name, offset, "write to unimplemented register ignored");
            return;
        };
        if data.is_empty() || data.len() > REGISTER_WIDTH || !reg.access().writable() {
            trace!(device = %self.info.name, ?reg, len = data.len(), "write ignored");
            return;
        }

        let value = read_le_bytes_u32(data);
        let mut inner = self.lock();
        self.write_register(&mut inner, reg, value);
    }

    /// Convenience 32-bit write.
    pub fn write_u32(&self, offset: u64, value: u32) {
        self.write(offset, &value.to_le_bytes());
    }

    /// Used-buffer notification: latch the cause, then raise the line.
    pub fn signal_used(&self, queue: u16) {
        let mut inner = self.lock();
        trace!(device = %self.info.name, queue, "used buffer notification");
        self.raise(&mut inner.state, InterruptStatus::VRING);
    }

    pub fn signal_config_change(&self) {
        let mut inner = self.lock();
        self.raise(&mut inner.state, InterruptStatus::CONFIG);
    }

    /// Management-initiated reset. The device stays registered and reachable.
    pub fn reset(&self) {
        let mut inner = self.lock();
        self.reset_locked(&mut inner);
    }

    fn read_register(&self, inner: &Inner, reg: Register) -> u32 {
        let state = &inner.state;
        let backend = inner.backend.as_deref();
        match reg {
            Register::MagicValue => VIRTIO_MMIO_MAGIC,
            Register::Version => VIRTIO_MMIO_LEGACY_VERSION,
            Register::DeviceId => self.info.device_type,
            Register::VendorId => self.vendor_id,
            Register::Status => state.status,
            Register::InterruptStatus => state.interrupt_state.bits(),
            Register::HostFeatures => backend
                .map(|b| state.host_features_page(b.host_features()))
                .unwrap_or(0),
            Register::QueueNumMax => match (backend, selected_queue(state, backend)) {
                (Some(b), Some(queue)) => b.max_queue_size(queue),
                _ => 0,
            },
            Register::QueuePfn => match (backend, selected_queue(state, backend)) {
                (Some(b), Some(queue)) => b.queue_pfn(queue),
                _ => 0,
            },
            _ => 0,
        }
    }

    fn write_register(&self, inner: &mut Inner, reg: Register, value: u32) {
        if reg == Register::Status && value == 0 {
            debug!(device = %self.info.name, "guest reset");
            self.reset_locked(inner);
            return;
        }

        let Inner { state, backend } = inner;
        match reg {
            Register::HostFeaturesSel => state.host_features_sel = value,
            Register::GuestFeaturesSel => state.guest_features_sel = value,
            Register::GuestFeatures => {
                if state.record_guest_features(value) {
                    if let Some(b) = backend.as_mut() {
                        b.set_guest_features(u64::from(value));
                    }
                }
            }
            Register::GuestPageSize => state.guest_page_size = value,
            Register::QueueAlign => state.queue_align = value,
            Register::Status => state.status = value,
            Register::QueueSel => {
                let num_queues = backend.as_deref().map_or(0, |b| b.num_queues());
                match u16::try_from(value) {
                    Ok(queue) if queue < num_queues => state.queue_sel = queue,
                    _ => {
                        trace!(device = %self.info.name, value, "queue select out of range");
                    }
                }
            }
            Register::QueueNum => {
                state.queue_num = value;
                let Some(queue) = selected_queue(state, backend.as_deref()) else {
                    return;
                };
                if let Some(b) = backend.as_mut() {
                    if let Err(err) = b.resize_queue(queue, value) {
                        debug!(device = %self.info.name, %err, "queue resize rejected");
                    }
                }
            }
            Register::QueuePfn => {
                state.queue_pfn = value;
                let Some(queue) = selected_queue(state, backend.as_deref()) else {
                    return;
                };
                let setup = LegacyQueueSetup {
                    page_size: state.guest_page_size,
                    align: state.queue_align,
                    pfn: value,
                };
                if let Some(b) = backend.as_mut() {
                    if let Err(err) = b.finalize_queue(queue, setup) {
                        debug!(device = %self.info.name, %err, "queue setup rejected");
                    }
                }
            }
            Register::QueueNotify => {
                let Some(b) = backend.as_mut() else {
                    return;
                };
                let queue = match u16::try_from(value) {
                    Ok(queue) if queue < b.num_queues() => queue,
                    _ => {
                        trace!(device = %self.info.name, value, "notify for unknown queue");
                        return;
                    }
                };
                if b.notify_queue(queue) {
                    self.raise(state, InterruptStatus::VRING);
                }
            }
            Register::InterruptAck => {
                if state.acknowledge(value) {
                    self.lower(state);
                }
            }
            // Read-only registers are filtered out before dispatch.
            Register::MagicValue
            | Register::Version
            | Register::DeviceId
            | Register::VendorId
            | Register::HostFeatures
            | Register::QueueNumMax
            | Register::InterruptStatus => {}
        }
    }

    fn reset_locked(&self, inner: &mut Inner) {
        inner.state.reset(&self.config);
        self.platform.deassert_irq(self.info.guest, self.irq);
        if let Some(backend) = inner.backend.as_mut() {
            backend.reset();
        }
    }

    fn raise(&self, state: &mut TransportState, cause: InterruptStatus) {
        state.interrupt_state |= cause;
        if !state.irq_asserted {
            self.platform.assert_irq(self.info.guest, self.irq);
            state.irq_asserted = true;
        }
    }

    fn lower(&self, state: &mut TransportState) {
        self.platform.deassert_irq(self.info.guest, self.irq);
        state.irq_asserted = false;
    }
}

impl fmt::Debug for VirtioTransportDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VirtioTransportDevice")
            .field("name", &self.info.name)
            .field("device_id", &self.info.device_type)
            .field("vendor_id", &self.vendor_id)
            .field("irq", &self.irq)
            .field("transport", &self.ops.name)
            .finish_non_exhaustive()
    }
}

fn selected_queue(state: &TransportState, backend: Option<&dyn VirtioBackend>) -> Option<u16> {
    let backend = backend?;
    (state.queue_sel < backend.num_queues()).then_some(state.queue_sel)
}

fn read_le_bytes_u32(src: &[u8]) -> u32 {
    let mut buf = [0u8; 4];
    let take = src.len().min(4);
    buf[..take].copy_from_slice(&src[..take]);
    u32::from_le_bytes(buf)
}
