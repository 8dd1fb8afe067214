//! BCM283x/BCM2711 GPIO pin control
//!
//! Bit packing:
//!
//! | Register | Pins per bank | Field            |
//! |----------|---------------|------------------|
//! | GPFSELn  | 10            | 3 bits at 3*(p%10) |
//! | GPSETn   | 32            | bit p%32         |
//! | GPCLRn   | 32            | bit p%32         |
//! | GPLEVn   | 32            | bit p%32         |

use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};

use log::debug;

use super::regs::{HardwareDescription, RegisterOffsets};
use super::window::RegisterWindow;
use crate::error::GpioError;

/// Pins per function-select register
pub const PINS_PER_FSEL: u8 = 10;

/// Bits per pin in a function-select register
pub const FSEL_WIDTH: u8 = 3;

const FSEL_MASK: u32 = 0b111;

/// Pins per set/clear/level bank
pub const PINS_PER_BANK: u8 = 32;

/// Validated GPIO line number
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PinIndex(u8);

impl PinIndex {
    /// Check `index` against the controller's pin count
    pub fn new(index: u32, hw: &HardwareDescription) -> Result<Self, GpioError> {
        match u8::try_from(index) {
            Ok(pin) if pin < hw.pin_count => Ok(Self(pin)),
            _ => Err(GpioError::InvalidPinIndex {
                index,
                pin_count: hw.pin_count,
            }),
        }
    }

    pub const fn get(self) -> u8 {
        self.0
    }

    /// Function-select register offset and field shift
    const fn fsel(self, offsets: &RegisterOffsets) -> (usize, u32) {
        let reg = offsets.function_select + (self.0 / PINS_PER_FSEL) as usize * 4;
        let shift = (self.0 % PINS_PER_FSEL) as u32 * FSEL_WIDTH as u32;
        (reg, shift)
    }

    /// Bank register offset for a set/clear/level role starting at `first`
    const fn bank(self, first: usize) -> usize {
        first + (self.0 / PINS_PER_BANK) as usize * 4
    }

    const fn mask(self) -> u32 {
        1 << (self.0 % PINS_PER_BANK)
    }
}

impl fmt::Display for PinIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GPIO{}", self.0)
    }
}

/// Pin function as encoded in GPFSEL
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinFunction {
    Input,
    Output,
    Alt0,
    Alt1,
    Alt2,
    Alt3,
    Alt4,
    Alt5,
}

impl PinFunction {
    pub const fn bits(self) -> u32 {
        match self {
            PinFunction::Input => 0b000,
            PinFunction::Output => 0b001,
            PinFunction::Alt0 => 0b100,
            PinFunction::Alt1 => 0b101,
            PinFunction::Alt2 => 0b110,
            PinFunction::Alt3 => 0b111,
            PinFunction::Alt4 => 0b011,
            PinFunction::Alt5 => 0b010,
        }
    }

    pub const fn from_bits(bits: u32) -> Self {
        match bits & FSEL_MASK {
            0b000 => PinFunction::Input,
            0b001 => PinFunction::Output,
            0b100 => PinFunction::Alt0,
            0b101 => PinFunction::Alt1,
            0b110 => PinFunction::Alt2,
            0b111 => PinFunction::Alt3,
            0b011 => PinFunction::Alt4,
            _ => PinFunction::Alt5,
        }
    }
}

impl fmt::Display for PinFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PinFunction::Input => "input",
            PinFunction::Output => "output",
            PinFunction::Alt0 => "alt0",
            PinFunction::Alt1 => "alt1",
            PinFunction::Alt2 => "alt2",
            PinFunction::Alt3 => "alt3",
            PinFunction::Alt4 => "alt4",
            PinFunction::Alt5 => "alt5",
        };
        f.write_str(name)
    }
}

/// Serialises read-modify-write of the function-select registers
///
/// Set/clear writes are atomic in hardware and never take it.
#[derive(Debug, Default)]
pub struct FunctionSelectLock(Mutex<()>);

impl FunctionSelectLock {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, ()> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// One GPIO line, bound to a window for the duration of an operation
pub struct GpioPin<'w> {
    window: &'w RegisterWindow,
    offsets: RegisterOffsets,
    index: PinIndex,
    fsel_lock: &'w FunctionSelectLock,
}

impl<'w> GpioPin<'w> {
    /// `window` must cover the GPIO block that `offsets` describes
    pub fn new(
        window: &'w RegisterWindow,
        offsets: RegisterOffsets,
        index: PinIndex,
        fsel_lock: &'w FunctionSelectLock,
    ) -> Self {
        Self {
            window,
            offsets,
            index,
            fsel_lock,
        }
    }

    pub fn index(&self) -> PinIndex {
        self.index
    }

    fn set_function(&self, function: PinFunction) {
        let (reg, shift) = self.index.fsel(&self.offsets);
        let _guard = self.fsel_lock.lock();
        let value = self.window.modify32(reg, |v| {
            (v & !(FSEL_MASK << shift)) | (function.bits() << shift)
        });
        debug!(
            "{}: {} (GPFSEL{} = 0x{:08X})",
            self.index,
            function,
            self.index.get() / PINS_PER_FSEL,
            value
        );
    }

    /// Select the output function, leaving other pins' fields untouched
    pub fn configure_as_output(&self) {
        self.set_function(PinFunction::Output);
    }

    /// Select the input function, leaving other pins' fields untouched
    pub fn configure_as_input(&self) {
        self.set_function(PinFunction::Input);
    }

    /// Current function from GPFSEL
    pub fn function(&self) -> PinFunction {
        let (reg, shift) = self.index.fsel(&self.offsets);
        PinFunction::from_bits(self.window.read32(reg) >> shift)
    }

    /// Drive the line high
    pub fn set_high(&self) {
        let reg = self.index.bank(self.offsets.output_set);
        self.window.write32(reg, self.index.mask());
        debug!("{}: set", self.index);
    }

    /// Drive the line low
    pub fn set_low(&self) {
        let reg = self.index.bank(self.offsets.output_clear);
        self.window.write32(reg, self.index.mask());
        debug!("{}: clear", self.index);
    }

    /// Sample the line
    pub fn read_level(&self) -> bool {
        let reg = self.index.bank(self.offsets.level);
        self.window.read32(reg) & self.index.mask() != 0
    }

    /// Physical address and raw value of this pin's level bank
    pub fn level_register(&self) -> (u64, u32) {
        let reg = self.index.bank(self.offsets.level);
        (self.window.physical_address(reg), self.window.read32(reg))
    }
}
