use serde::{Deserialize, Serialize};

/// Default vendor ID reported through `VENDOR_ID` ("XVSR").
pub const DEFAULT_VENDOR_ID: u32 = 0x5253_5658;

/// Legacy vring layout page size and alignment.
pub const LEGACY_PAGE_SIZE: u32 = 4096;

/// Host-side tunables shared by every device created by one emulator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    pub vendor_id: u32,
    /// `GUEST_PAGE_SIZE` until the guest writes one.
    pub default_page_size: u32,
    /// `QUEUE_ALIGN` until the guest writes one.
    pub default_queue_align: u32,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            vendor_id: DEFAULT_VENDOR_ID,
            default_page_size: LEGACY_PAGE_SIZE,
            default_queue_align: LEGACY_PAGE_SIZE,
        }
    }
}
