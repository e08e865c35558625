//! Recording backend/core doubles shared by the integration tests.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use aero_virtio_transport::{
    DeviceNode, EmulatedDevice, Guest, IrqLog, LegacyQueueSetup, QueueError, RegisterError,
    TransportHandle, VirtioBackend, VirtioCore, VirtioDeviceInfo, VirtioPciEmulator,
};

pub const NET_TYPE: u32 = 1;
pub const BLK_TYPE: u32 = 2;
pub const IRQ: u32 = 40;
pub const HOST_FEATURES: u64 = (1 << 32) | (1 << 28) | (1 << 5) | 1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendCall {
    SetGuestFeatures(u64),
    ResizeQueue(u16, u32),
    FinalizeQueue(u16, LegacyQueueSetup),
    NotifyQueue(u16),
    Reset,
    WriteConfig(u64, Vec<u8>),
}

#[derive(Debug, Default)]
pub struct BackendLog {
    pub calls: Vec<BackendCall>,
    pub queue_sizes: BTreeMap<u16, u32>,
    pub queue_pfns: BTreeMap<u16, u32>,
    /// Value returned from `notify_queue`.
    pub complete_on_notify: bool,
    pub config: Vec<u8>,
}

impl BackendLog {
    pub fn count(&self, pred: impl Fn(&BackendCall) -> bool) -> usize {
        self.calls.iter().filter(|c| pred(c)).count()
    }
}

#[derive(Clone, Default)]
pub struct SharedLog(Arc<Mutex<BackendLog>>);

impl SharedLog {
    pub fn lock(&self) -> MutexGuard<'_, BackendLog> {
        self.0.lock().unwrap()
    }
}

pub struct RecordingBackend {
    pub log: SharedLog,
    pub num_queues: u16,
    pub max_queue_size: u32,
}

impl VirtioBackend for RecordingBackend {
    fn host_features(&self) -> u64 {
        HOST_FEATURES
    }

    fn set_guest_features(&mut self, features: u64) {
        self.log
            .lock()
            .calls
            .push(BackendCall::SetGuestFeatures(features));
    }

    fn num_queues(&self) -> u16 {
        self.num_queues
    }

    fn max_queue_size(&self, queue: u16) -> u32 {
        self.max_queue_size >> queue
    }

    fn resize_queue(&mut self, queue: u16, size: u32) -> Result<(), QueueError> {
        let mut log = self.log.lock();
        log.calls.push(BackendCall::ResizeQueue(queue, size));
        if size == 0 || size > self.max_queue_size >> queue {
            return Err(QueueError::InvalidSize { queue, size });
        }
        log.queue_sizes.insert(queue, size);
        Ok(())
    }

    fn finalize_queue(&mut self, queue: u16, setup: LegacyQueueSetup) -> Result<(), QueueError> {
        let mut log = self.log.lock();
        log.calls.push(BackendCall::FinalizeQueue(queue, setup));
        if setup.pfn == 0 {
            log.queue_pfns.remove(&queue);
            return Err(QueueError::InvalidAddress { queue, pfn: 0 });
        }
        log.queue_pfns.insert(queue, setup.pfn);
        Ok(())
    }

    fn queue_pfn(&self, queue: u16) -> u32 {
        self.log.lock().queue_pfns.get(&queue).copied().unwrap_or(0)
    }

    fn notify_queue(&mut self, queue: u16) -> bool {
        let mut log = self.log.lock();
        log.calls.push(BackendCall::NotifyQueue(queue));
        log.complete_on_notify
    }

    fn reset(&mut self) {
        let mut log = self.log.lock();
        log.calls.push(BackendCall::Reset);
        log.queue_sizes.clear();
        log.queue_pfns.clear();
    }

    fn read_config(&self, offset: u64, data: &mut [u8]) {
        let log = self.log.lock();
        for (i, b) in data.iter_mut().enumerate() {
            *b = log.config.get(offset as usize + i).copied().unwrap_or(0);
        }
    }

    fn write_config(&mut self, offset: u64, data: &[u8]) -> bool {
        let mut log = self.log.lock();
        log.calls.push(BackendCall::WriteConfig(offset, data.to_vec()));
        let end = offset as usize + data.len();
        if log.config.len() < end {
            return false;
        }
        let changed = log.config[offset as usize..end] != *data;
        log.config[offset as usize..end].copy_from_slice(data);
        changed
    }
}

#[derive(Default)]
struct CoreInner {
    registered: Vec<VirtioDeviceInfo>,
    handles: Vec<(String, TransportHandle)>,
    logs: Vec<(String, SharedLog)>,
    exhausted: bool,
}

/// A core that knows net and block backends.
#[derive(Default)]
pub struct RecordingCore {
    inner: Mutex<CoreInner>,
}

impl RecordingCore {
    pub fn set_exhausted(&self, exhausted: bool) {
        self.inner.lock().unwrap().exhausted = exhausted;
    }

    pub fn registered(&self) -> Vec<String> {
        let inner = self.inner.lock().unwrap();
        inner.registered.iter().map(|i| i.name.clone()).collect()
    }

    pub fn handle(&self, name: &str) -> TransportHandle {
        let inner = self.inner.lock().unwrap();
        inner
            .handles
            .iter()
            .rev()
            .find(|(n, _)| n == name)
            .map(|(_, h)| h.clone())
            .unwrap()
    }

    pub fn log(&self, name: &str) -> SharedLog {
        let inner = self.inner.lock().unwrap();
        inner
            .logs
            .iter()
            .rev()
            .find(|(n, _)| n == name)
            .map(|(_, l)| l.clone())
            .unwrap()
    }
}

impl VirtioCore for RecordingCore {
    fn register_device(
        &self,
        info: &VirtioDeviceInfo,
        handle: TransportHandle,
    ) -> Result<Box<dyn VirtioBackend>, RegisterError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.exhausted {
            return Err(RegisterError::Exhausted);
        }
        if inner.registered.iter().any(|i| i.name == info.name) {
            return Err(RegisterError::Duplicate {
                name: info.name.clone(),
            });
        }
        let (num_queues, max_queue_size) = match info.device_type {
            NET_TYPE => (2, 256),
            BLK_TYPE => (1, 128),
            device_type => return Err(RegisterError::NoBackend { device_type }),
        };

        let log = SharedLog::default();
        log.lock().config = vec![0; 8];
        inner.registered.push(info.clone());
        inner.handles.push((info.name.clone(), handle));
        inner.logs.push((info.name.clone(), log.clone()));
        Ok(Box::new(RecordingBackend {
            log,
            num_queues,
            max_queue_size,
        }))
    }

    fn unregister_device(&self, info: &VirtioDeviceInfo) {
        self.inner
            .lock()
            .unwrap()
            .registered
            .retain(|i| i.name != info.name);
    }
}

pub struct Harness {
    pub irqs: Arc<IrqLog>,
    pub core: Arc<RecordingCore>,
    pub emulator: VirtioPciEmulator,
    pub guest: Guest,
}

impl Harness {
    pub fn new() -> Self {
        let irqs = Arc::new(IrqLog::new());
        let core = Arc::new(RecordingCore::default());
        let emulator = VirtioPciEmulator::new(irqs.clone(), core.clone());
        Self {
            irqs,
            core,
            emulator,
            guest: Guest::new(3, "guest0"),
        }
    }

    /// Probes a fresh node and panics if probe fails.
    pub fn bind(&self, name: &str, device_type: u32) -> EmulatedDevice {
        let mut edev = EmulatedDevice::new(virtio_node(name, device_type));
        self.emulator.probe(&mut edev, &self.guest).unwrap();
        edev
    }

    pub fn device_name(&self, node: &str) -> String {
        format!("{}/{}", self.guest.name, node)
    }

    pub fn asserted(&self) -> bool {
        self.irqs.is_asserted(self.guest.id, IRQ)
    }
}

pub fn virtio_node(name: &str, device_type: u32) -> DeviceNode {
    DeviceNode::new(name, "virtio", "virtio,pci")
        .with_property("virtio_type", device_type)
        .with_interrupt(IRQ)
}

pub fn read_u32(edev: &EmulatedDevice, offset: u64) -> u32 {
    let mut buf = [0u8; 4];
    edev.mmio_read(offset, &mut buf);
    u32::from_le_bytes(buf)
}

pub fn write_u32(edev: &EmulatedDevice, offset: u64, value: u32) {
    edev.mmio_write(offset, &value.to_le_bytes());
}
