//! Host platform primitives consumed by the transport.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GuestId(pub u32);

/// The guest a device is instantiated for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Guest {
    pub id: GuestId,
    pub name: String,
}

impl Guest {
    pub fn new(id: u32, name: impl Into<String>) -> Self {
        Self {
            id: GuestId(id),
            name: name.into(),
        }
    }
}

/// Interrupt injection into a guest.
///
/// Both calls must be idempotent: asserting an asserted line or deasserting
/// a deasserted one has no visible effect.
pub trait HostPlatform: Send + Sync {
    fn assert_irq(&self, guest: GuestId, irq: u32);
    fn deassert_irq(&self, guest: GuestId, irq: u32);
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct IrqLine {
    pub level: bool,
    pub assert_count: u64,
    pub deassert_count: u64,
}

/// A [`HostPlatform`] that records the level and call counts of every line.
#[derive(Debug, Default)]
pub struct IrqLog {
    lines: Mutex<HashMap<(GuestId, u32), IrqLine>>,
}

impl IrqLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn line(&self, guest: GuestId, irq: u32) -> IrqLine {
        self.lines
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(&(guest, irq))
            .copied()
            .unwrap_or_default()
    }

    pub fn is_asserted(&self, guest: GuestId, irq: u32) -> bool {
        self.line(guest, irq).level
    }

    fn update(&self, guest: GuestId, irq: u32, level: bool) {
        let mut lines = self
            .lines
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let line = lines.entry((guest, irq)).or_default();
        line.level = level;
        if level {
            line.assert_count += 1;
        } else {
            line.deassert_count += 1;
        }
    }
}

impl HostPlatform for IrqLog {
    fn assert_irq(&self, guest: GuestId, irq: u32) {
        self.update(guest, irq, true);
    }

    fn deassert_irq(&self, guest: GuestId, irq: u32) {
        self.update(guest, irq, false);
    }
}

/// A declared device as handed over by the bus framework at match time.
///
/// Mirrors a device-tree node: a type/compatible pair used for matching, a
/// flat table of `u32` properties and a list of interrupt specifiers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceNode {
    pub name: String,
    pub device_type: String,
    pub compatible: Vec<String>,
    pub properties: BTreeMap<String, u32>,
    pub interrupts: Vec<u32>,
}

impl DeviceNode {
    pub fn new(name: impl Into<String>, device_type: &str, compatible: &str) -> Self {
        Self {
            name: name.into(),
            device_type: device_type.to_string(),
            compatible: vec![compatible.to_string()],
            ..Default::default()
        }
    }

    pub fn with_property(mut self, name: &str, value: u32) -> Self {
        self.properties.insert(name.to_string(), value);
        self
    }

    pub fn with_interrupt(mut self, irq: u32) -> Self {
        self.interrupts.push(irq);
        self
    }

    pub fn read_u32(&self, name: &str) -> Option<u32> {
        self.properties.get(name).copied()
    }

    pub fn irq(&self, index: usize) -> Option<u32> {
        self.interrupts.get(index).copied()
    }

    pub fn is_compatible(&self, compatible: &str) -> bool {
        self.compatible.iter().any(|c| c == compatible)
    }
}

impl fmt::Display for DeviceNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}
