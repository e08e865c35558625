use bitflags::bitflags;

use crate::config::TransportConfig;

bitflags! {
    /// Pending interrupt causes reported through `INTERRUPT_STATUS`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct InterruptStatus: u32 {
        /// The device placed buffers on a used ring.
        const VRING = 1 << 0;
        /// Device-specific configuration changed.
        const CONFIG = 1 << 1;
    }
}

bitflags! {
    /// Driver handshake bits written to the `STATUS` register.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct DeviceStatus: u32 {
        const ACKNOWLEDGE = 1;
        const DRIVER = 2;
        const DRIVER_OK = 4;
        const FEATURES_OK = 8;
        const DEVICE_NEEDS_RESET = 0x40;
        const FAILED = 0x80;
    }
}

/// Mutable per-device transport state.
///
/// Identity (device/vendor ID) lives on the device itself; this block only
/// holds what register dispatch and notifications mutate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportState {
    pub status: u32,
    pub host_features_sel: u32,
    /// Guest features as recorded per page. Only page 0 is ever applied to
    /// the backend.
    pub guest_features: u64,
    pub guest_features_sel: u32,
    pub guest_page_size: u32,
    pub queue_sel: u16,
    pub queue_num: u32,
    pub queue_align: u32,
    pub queue_pfn: u32,
    pub interrupt_state: InterruptStatus,
    /// Level last driven onto the interrupt line.
    pub irq_asserted: bool,
}

impl TransportState {
    pub fn new(config: &TransportConfig) -> Self {
        Self {
            status: 0,
            host_features_sel: 0,
            guest_features: 0,
            guest_features_sel: 0,
            guest_page_size: config.default_page_size,
            queue_sel: 0,
            queue_num: 0,
            queue_align: config.default_queue_align,
            queue_pfn: 0,
            interrupt_state: InterruptStatus::empty(),
            irq_asserted: false,
        }
    }

    pub fn device_status(&self) -> DeviceStatus {
        DeviceStatus::from_bits_truncate(self.status)
    }

    /// Records a guest feature page write. Returns `true` when the write
    /// targets page 0 and must be applied to the backend.
    pub fn record_guest_features(&mut self, value: u32) -> bool {
        match self.guest_features_sel {
            0 => {
                self.guest_features =
                    (self.guest_features & 0xffff_ffff_0000_0000) | u64::from(value);
                true
            }
            1 => {
                self.guest_features =
                    (self.guest_features & 0x0000_0000_ffff_ffff) | (u64::from(value) << 32);
                false
            }
            _ => false,
        }
    }

    /// Selects the 32-bit page of `features` addressed by `HOST_FEATURES_SEL`.
    pub fn host_features_page(&self, features: u64) -> u32 {
        match self.host_features_sel {
            0 => (features & 0xffff_ffff) as u32,
            1 => (features >> 32) as u32,
            _ => 0,
        }
    }

    /// Clears the acknowledged causes and reports whether none remain.
    pub fn acknowledge(&mut self, value: u32) -> bool {
        self.interrupt_state &= !InterruptStatus::from_bits_retain(value);
        self.interrupt_state.is_empty()
    }

    /// Returns the state to its power-on values.
    pub fn reset(&mut self, config: &TransportConfig) {
        *self = Self::new(config);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> TransportState {
        TransportState::new(&TransportConfig::default())
    }

    #[test]
    fn guest_feature_pages_are_recorded_but_only_page_zero_applies() {
        let mut s = state();
        assert!(s.record_guest_features(0x0000_00ff));
        s.guest_features_sel = 1;
        assert!(!s.record_guest_features(0x1));
        assert_eq!(s.guest_features, 0x1_0000_00ff);

        s.guest_features_sel = 7;
        assert!(!s.record_guest_features(0xdead_beef));
        assert_eq!(s.guest_features, 0x1_0000_00ff);
    }

    #[test]
    fn host_feature_pages_split_the_bitset() {
        let mut s = state();
        let features = 0x0000_0001_1000_0020;
        assert_eq!(s.host_features_page(features), 0x1000_0020);
        s.host_features_sel = 1;
        assert_eq!(s.host_features_page(features), 0x1);
        s.host_features_sel = 2;
        assert_eq!(s.host_features_page(features), 0);
    }

    #[test]
    fn acknowledge_keeps_bits_not_written() {
        let mut s = state();
        s.interrupt_state = InterruptStatus::VRING | InterruptStatus::CONFIG;
        assert!(!s.acknowledge(InterruptStatus::VRING.bits()));
        assert_eq!(s.interrupt_state, InterruptStatus::CONFIG);
        assert!(s.acknowledge(0xffff_ffff));
    }

    #[test]
    fn reset_restores_defaults() {
        let cfg = TransportConfig::default();
        let mut s = state();
        s.status = 0xf;
        s.queue_sel = 1;
        s.guest_page_size = 0x1_0000;
        s.interrupt_state = InterruptStatus::VRING;
        s.irq_asserted = true;
        s.reset(&cfg);
        assert_eq!(s, TransportState::new(&cfg));
        assert_eq!(s.device_status(), DeviceStatus::empty());
    }
}
