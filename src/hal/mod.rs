//! Hardware Abstraction Layer for BCM283x/BCM2711 GPIO
//!
//! - `regs`: per-generation register tables
//! - `window`: scoped register mappings
//! - `gpio`: single-pin control on top of a window
//! - `devmem`: `/dev/mem` mapping provider
//! - `sim`: in-process controller model

#[cfg(unix)]
pub mod devmem;
pub mod gpio;
pub mod regs;
pub mod sim;
pub mod window;

#[cfg(unix)]
pub use devmem::DevMem;
pub use gpio::{FunctionSelectLock, GpioPin, PinFunction, PinIndex};
pub use regs::{Generation, HardwareDescription, RegisterOffsets};
pub use sim::SimulatedController;
pub use window::{MapProvider, Mapping, PhysicalAddressRange, RegisterWindow, PAGE_SIZE};
