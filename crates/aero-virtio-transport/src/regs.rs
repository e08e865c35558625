//! Legacy virtio register block layout.
//!
//! Offsets are relative to the device base (MMIO window or PCI BAR). Every
//! register is 32 bits wide; device-specific configuration starts at
//! [`VIRTIO_MMIO_CONFIG`].

pub const VIRTIO_MMIO_MAGIC_VALUE: u64 = 0x000;
pub const VIRTIO_MMIO_VERSION: u64 = 0x004;
pub const VIRTIO_MMIO_DEVICE_ID: u64 = 0x008;
pub const VIRTIO_MMIO_VENDOR_ID: u64 = 0x00c;
pub const VIRTIO_MMIO_HOST_FEATURES: u64 = 0x010;
pub const VIRTIO_MMIO_HOST_FEATURES_SEL: u64 = 0x014;
pub const VIRTIO_MMIO_GUEST_FEATURES: u64 = 0x020;
pub const VIRTIO_MMIO_GUEST_FEATURES_SEL: u64 = 0x024;
pub const VIRTIO_MMIO_GUEST_PAGE_SIZE: u64 = 0x028;
pub const VIRTIO_MMIO_QUEUE_SEL: u64 = 0x030;
pub const VIRTIO_MMIO_QUEUE_NUM_MAX: u64 = 0x034;
pub const VIRTIO_MMIO_QUEUE_NUM: u64 = 0x038;
pub const VIRTIO_MMIO_QUEUE_ALIGN: u64 = 0x03c;
pub const VIRTIO_MMIO_QUEUE_PFN: u64 = 0x040;
pub const VIRTIO_MMIO_QUEUE_NOTIFY: u64 = 0x050;
pub const VIRTIO_MMIO_INTERRUPT_STATUS: u64 = 0x060;
pub const VIRTIO_MMIO_INTERRUPT_ACK: u64 = 0x064;
pub const VIRTIO_MMIO_STATUS: u64 = 0x070;
pub const VIRTIO_MMIO_CONFIG: u64 = 0x100;

/// Total size of the register window including a 256-byte config area.
pub const VIRTIO_MMIO_WINDOW_SIZE: u64 = 0x200;

pub const VIRTIO_MMIO_MAGIC: u32 = 0x7472_6976; // "virt"
pub const VIRTIO_MMIO_LEGACY_VERSION: u32 = 1;

/// Register width in bytes.
pub const REGISTER_WIDTH: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    ReadOnly,
    WriteOnly,
    ReadWrite,
}

impl Access {
    pub fn readable(self) -> bool {
        matches!(self, Access::ReadOnly | Access::ReadWrite)
    }

    pub fn writable(self) -> bool {
        matches!(self, Access::WriteOnly | Access::ReadWrite)
    }
}

/// One addressable transport register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Register {
    MagicValue,
    Version,
    DeviceId,
    VendorId,
    HostFeatures,
    HostFeaturesSel,
    GuestFeatures,
    GuestFeaturesSel,
    GuestPageSize,
    QueueSel,
    QueueNumMax,
    QueueNum,
    QueueAlign,
    QueuePfn,
    QueueNotify,
    InterruptStatus,
    InterruptAck,
    Status,
}

impl Register {
    pub const ALL: [Register; 18] = [
        Register::MagicValue,
        Register::Version,
        Register::DeviceId,
        Register::VendorId,
        Register::HostFeatures,
        Register::HostFeaturesSel,
        Register::GuestFeatures,
        Register::GuestFeaturesSel,
        Register::GuestPageSize,
        Register::QueueSel,
        Register::QueueNumMax,
        Register::QueueNum,
        Register::QueueAlign,
        Register::QueuePfn,
        Register::QueueNotify,
        Register::InterruptStatus,
        Register::InterruptAck,
        Register::Status,
    ];

    pub fn offset(self) -> u64 {
        match self {
            Register::MagicValue => VIRTIO_MMIO_MAGIC_VALUE,
            Register::Version => VIRTIO_MMIO_VERSION,
            Register::DeviceId => VIRTIO_MMIO_DEVICE_ID,
            Register::VendorId => VIRTIO_MMIO_VENDOR_ID,
            Register::HostFeatures => VIRTIO_MMIO_HOST_FEATURES,
            Register::HostFeaturesSel => VIRTIO_MMIO_HOST_FEATURES_SEL,
            Register::GuestFeatures => VIRTIO_MMIO_GUEST_FEATURES,
            Register::GuestFeaturesSel => VIRTIO_MMIO_GUEST_FEATURES_SEL,
            Register::GuestPageSize => VIRTIO_MMIO_GUEST_PAGE_SIZE,
            Register::QueueSel => VIRTIO_MMIO_QUEUE_SEL,
            Register::QueueNumMax => VIRTIO_MMIO_QUEUE_NUM_MAX,
            Register::QueueNum => VIRTIO_MMIO_QUEUE_NUM,
            Register::QueueAlign => VIRTIO_MMIO_QUEUE_ALIGN,
            Register::QueuePfn => VIRTIO_MMIO_QUEUE_PFN,
            Register::QueueNotify => VIRTIO_MMIO_QUEUE_NOTIFY,
            Register::InterruptStatus => VIRTIO_MMIO_INTERRUPT_STATUS,
            Register::InterruptAck => VIRTIO_MMIO_INTERRUPT_ACK,
            Register::Status => VIRTIO_MMIO_STATUS,
        }
    }

    pub fn access(self) -> Access {
        match self {
            Register::MagicValue
            | Register::Version
            | Register::DeviceId
            | Register::VendorId
            | Register::HostFeatures
            | Register::QueueNumMax
            | Register::InterruptStatus => Access::ReadOnly,
            Register::HostFeaturesSel
            | Register::GuestFeatures
            | Register::GuestFeaturesSel
            | Register::GuestPageSize
            | Register::QueueSel
            | Register::QueueNum
            | Register::QueueAlign
            | Register::QueueNotify
            | Register::InterruptAck => Access::WriteOnly,
            Register::QueuePfn | Register::Status => Access::ReadWrite,
        }
    }

    /// Decodes the register starting exactly at `offset`.
    pub fn from_offset(offset: u64) -> Option<Self> {
        let reg = match offset {
            VIRTIO_MMIO_MAGIC_VALUE => Register::MagicValue,
            VIRTIO_MMIO_VERSION => Register::Version,
            VIRTIO_MMIO_DEVICE_ID => Register::DeviceId,
            VIRTIO_MMIO_VENDOR_ID => Register::VendorId,
            VIRTIO_MMIO_HOST_FEATURES => Register::HostFeatures,
            VIRTIO_MMIO_HOST_FEATURES_SEL => Register::HostFeaturesSel,
            VIRTIO_MMIO_GUEST_FEATURES => Register::GuestFeatures,
            VIRTIO_MMIO_GUEST_FEATURES_SEL => Register::GuestFeaturesSel,
            VIRTIO_MMIO_GUEST_PAGE_SIZE => Register::GuestPageSize,
            VIRTIO_MMIO_QUEUE_SEL => Register::QueueSel,
            VIRTIO_MMIO_QUEUE_NUM_MAX => Register::QueueNumMax,
            VIRTIO_MMIO_QUEUE_NUM => Register::QueueNum,
            VIRTIO_MMIO_QUEUE_ALIGN => Register::QueueAlign,
            VIRTIO_MMIO_QUEUE_PFN => Register::QueuePfn,
            VIRTIO_MMIO_QUEUE_NOTIFY => Register::QueueNotify,
            VIRTIO_MMIO_INTERRUPT_STATUS => Register::InterruptStatus,
            VIRTIO_MMIO_INTERRUPT_ACK => Register::InterruptAck,
            VIRTIO_MMIO_STATUS => Register::Status,
            _ => return None,
        };
        Some(reg)
    }

    /// Decodes the register containing byte `offset`, returning the byte lane
    /// within it.
    pub fn containing(offset: u64) -> Option<(Self, usize)> {
        let base = offset & !(REGISTER_WIDTH as u64 - 1);
        let lane = (offset - base) as usize;
        Self::from_offset(base).map(|reg| (reg, lane))
    }
}
