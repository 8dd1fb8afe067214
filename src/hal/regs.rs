//! GPIO controller register tables
//!
//! One table per controller generation. Offsets are only valid for the
//! generation they are listed under; a new SoC gets its own entry.
//!
//! | Register      | Offset | Banks                 |
//! |---------------|--------|-----------------------|
//! | GPFSEL0..5    | 0x00   | 10 pins x 3 bits each |
//! | GPSET0..1     | 0x1C   | 32 pins x 1 bit       |
//! | GPCLR0..1     | 0x28   | 32 pins x 1 bit       |
//! | GPLEV0..1     | 0x34   | 32 pins x 1 bit       |

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use super::window::{PhysicalAddressRange, PAGE_SIZE};
use crate::error::MapError;

/// Byte offsets of the first bank of each register role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterOffsets {
    pub function_select: usize,
    pub output_set: usize,
    pub output_clear: usize,
    pub level: usize,
}

/// BCM2835/BCM2836/BCM2837 GPIO register layout
pub const BCM283X_OFFSETS: RegisterOffsets = RegisterOffsets {
    function_select: 0x0000,
    output_set: 0x001C,
    output_clear: 0x0028,
    level: 0x0034,
};

/// BCM2711 GPIO register layout (pull control moved, core registers unchanged)
pub const BCM2711_OFFSETS: RegisterOffsets = RegisterOffsets {
    function_select: 0x0000,
    output_set: 0x001C,
    output_clear: 0x0028,
    level: 0x0034,
};

/// Controller generation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Generation {
    Bcm2835,
    Bcm2837,
    Bcm2711,
}

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Generation::Bcm2835 => write!(f, "BCM2835"),
            Generation::Bcm2837 => write!(f, "BCM2837"),
            Generation::Bcm2711 => write!(f, "BCM2711"),
        }
    }
}

/// Everything the driver needs to know about one GPIO controller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HardwareDescription {
    pub generation: Generation,
    /// Boards using this controller
    pub boards: &'static str,
    /// Start of the peripheral bus window (ARM physical address)
    pub peripheral_base: u64,
    /// GPIO block offset from the peripheral base
    pub gpio_offset: u64,
    /// Bytes mapped for the GPIO block
    pub block_length: usize,
    /// Number of GPIO lines
    pub pin_count: u8,
    pub offsets: RegisterOffsets,
}

impl HardwareDescription {
    /// Physical address of the GPIO block
    pub const fn gpio_base(&self) -> u64 {
        self.peripheral_base + self.gpio_offset
    }

    /// Physical range covering the whole GPIO block
    pub fn gpio_range(&self) -> Result<PhysicalAddressRange, MapError> {
        PhysicalAddressRange::new(self.gpio_base(), self.block_length)
    }

    /// Replace the peripheral base, e.g. for a board revision with a moved bus window
    pub fn with_peripheral_base(mut self, base: u64) -> Self {
        self.peripheral_base = base;
        self
    }

    /// Replace the GPIO block offset
    pub fn with_gpio_offset(mut self, offset: u64) -> Self {
        self.gpio_offset = offset;
        self
    }
}

/// Raspberry Pi 1 / Zero
pub static BCM2835: HardwareDescription = HardwareDescription {
    generation: Generation::Bcm2835,
    boards: "Raspberry Pi 1, Zero, Zero W",
    peripheral_base: 0x2000_0000,
    gpio_offset: 0x0020_0000,
    block_length: PAGE_SIZE,
    pin_count: 54,
    offsets: BCM283X_OFFSETS,
};

/// Raspberry Pi 3 / Zero 2
pub static BCM2837: HardwareDescription = HardwareDescription {
    generation: Generation::Bcm2837,
    boards: "Raspberry Pi 3, Zero 2 W",
    peripheral_base: 0x3F00_0000,
    gpio_offset: 0x0020_0000,
    block_length: PAGE_SIZE,
    pin_count: 54,
    offsets: BCM283X_OFFSETS,
};

/// Raspberry Pi 4 (low peripheral mode)
pub static BCM2711: HardwareDescription = HardwareDescription {
    generation: Generation::Bcm2711,
    boards: "Raspberry Pi 4, 400, CM4",
    peripheral_base: 0xFE00_0000,
    gpio_offset: 0x0020_0000,
    block_length: PAGE_SIZE,
    pin_count: 58,
    offsets: BCM2711_OFFSETS,
};

/// Registry of known controllers, keyed by generation name and board alias
pub static CONTROLLERS: Lazy<HashMap<&'static str, &'static HardwareDescription>> =
    Lazy::new(|| {
        let mut m = HashMap::new();
        m.insert("bcm2835", &BCM2835);
        m.insert("rpi1", &BCM2835);
        m.insert("rpi-zero", &BCM2835);
        m.insert("bcm2837", &BCM2837);
        m.insert("rpi3", &BCM2837);
        m.insert("bcm2711", &BCM2711);
        m.insert("rpi4", &BCM2711);
        m
    });

/// Look up a controller by generation name or board alias
pub fn lookup(name: &str) -> Option<&'static HardwareDescription> {
    CONTROLLERS.get(name.to_lowercase().as_str()).copied()
}

/// Canonical generation names (aliases excluded)
pub fn generation_names() -> Vec<&'static str> {
    vec!["bcm2711", "bcm2835", "bcm2837"]
}
