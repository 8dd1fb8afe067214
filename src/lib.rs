//! # rpi-gpio-bridge
//!
//! Single-pin GPIO control for Raspberry Pi SoCs through memory-mapped
//! registers, exposed as an open/read/write/release device.
//!
//! Layers, leaf to root:
//!
//! - [`hal::RegisterWindow`]: one scoped mapping of the GPIO block with
//!   checked volatile 32-bit access
//! - [`hal::GpioPin`]: function select, set, clear, and level for one line
//! - [`bridge::DeviceBridge`]: `'0'`/`'1'` character protocol over a pin
//!
//! ## Example
//!
//! ```rust
//! use rpi_gpio_bridge::bridge::{DriverContext, WritePolicy};
//! use rpi_gpio_bridge::hal::{regs, SimulatedController};
//!
//! let sim = SimulatedController::new(&regs::BCM2837);
//! let ctx = DriverContext::attach(
//!     "led",
//!     regs::BCM2837.clone(),
//!     Box::new(sim),
//!     &[4],
//!     WritePolicy::Strict,
//! )
//! .unwrap();
//!
//! let mut dev = ctx.device(0).unwrap();
//! dev.open().unwrap();
//! dev.write(b"1").unwrap();
//!
//! let mut buf = [0u8; 1];
//! dev.read(&mut buf).unwrap();
//! assert_eq!(&buf, b"1");
//! dev.release();
//! ```

pub mod bridge;
pub mod config;
pub mod error;
pub mod hal;

pub use bridge::{BridgeState, DeviceBridge, DriverContext, WritePolicy};
pub use config::BridgeConfig;
pub use error::{BridgeError, ConfigError, GpioError, MapError, UnmapError};
