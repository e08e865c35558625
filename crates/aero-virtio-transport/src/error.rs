use thiserror::Error;

/// Failure to bring up a transport instance. No device is published when
/// probe returns one of these.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ProbeError {
    #[error("device node {node}: missing `{property}` property")]
    MissingProperty { node: String, property: &'static str },

    #[error("device node {node}: no interrupt at index {index}")]
    MissingInterrupt { node: String, index: usize },

    #[error("device node {node} does not match any virtio transport entry")]
    Unmatched { node: String },

    #[error("device node {node} is already bound to a transport instance")]
    AlreadyBound { node: String },

    #[error("device node {node}: out of transport resources")]
    ResourceExhausted { node: String },

    #[error("device node {node}: virtio core registration failed: {source}")]
    Registration {
        node: String,
        #[source]
        source: RegisterError,
    },
}

impl ProbeError {
    /// True for declaration problems that a corrected device node can fix.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            ProbeError::MissingProperty { .. }
                | ProbeError::MissingInterrupt { .. }
                | ProbeError::Unmatched { .. }
        )
    }
}

/// Reported by a [`crate::backend::VirtioCore`] that cannot bind a backend.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegisterError {
    #[error("no backend registered for virtio device type {device_type}")]
    NoBackend { device_type: u32 },

    #[error("virtio core has no free device slots")]
    Exhausted,

    #[error("device {name} is already registered")]
    Duplicate { name: String },
}

/// Backend rejection of a queue operation. The transport absorbs these; the
/// guest never observes them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum QueueError {
    #[error("invalid virtqueue index {0}")]
    InvalidIndex(u16),

    #[error("invalid size {size} for virtqueue {queue}")]
    InvalidSize { queue: u16, size: u32 },

    #[error("invalid ring address (pfn {pfn:#x}) for virtqueue {queue}")]
    InvalidAddress { queue: u16, pfn: u32 },
}
