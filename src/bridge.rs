//! Character-device bridge
//!
//! Translates host lifecycle calls into pin operations. The host builds one
//! [`DriverContext`] at attach time and hands out a [`DeviceBridge`] per
//! open file. Every read, write, and open maps its own window and unmaps it
//! before returning, so nothing is held between calls.
//!
//! Wire protocol: a single ASCII byte, `'1'` for high and `'0'` for low.

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::error::{BridgeError, GpioError, MapError};
use crate::hal::{
    FunctionSelectLock, GpioPin, HardwareDescription, MapProvider, PinIndex, RegisterWindow,
};

/// Handling of bytes other than `'0'` and `'1'`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WritePolicy {
    /// Consume and ignore the byte
    #[default]
    Lenient,
    /// Reject with [`BridgeError::UnrecognizedByte`]
    Strict,
}

/// Driver state shared by every device instance
pub struct DriverContext {
    name: String,
    hw: HardwareDescription,
    provider: Box<dyn MapProvider>,
    fsel_lock: FunctionSelectLock,
    write_policy: WritePolicy,
    pins: Vec<PinIndex>,
}

impl DriverContext {
    /// Build the context, validating every instance's pin before any
    /// hardware is touched
    pub fn attach(
        name: impl Into<String>,
        hw: HardwareDescription,
        provider: Box<dyn MapProvider>,
        pins: &[u32],
        write_policy: WritePolicy,
    ) -> Result<Self, GpioError> {
        let pins = pins
            .iter()
            .map(|&p| PinIndex::new(p, &hw))
            .collect::<Result<Vec<_>, _>>()?;
        let name = name.into();
        info!(
            "[{}] attach: {} at 0x{:08X}, {} device(s)",
            name,
            hw.generation,
            hw.gpio_base(),
            pins.len()
        );
        Ok(Self {
            name,
            hw,
            provider,
            fsel_lock: FunctionSelectLock::new(),
            write_policy,
            pins,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn hardware(&self) -> &HardwareDescription {
        &self.hw
    }

    pub fn write_policy(&self) -> WritePolicy {
        self.write_policy
    }

    /// Number of device instances (minor numbers)
    pub fn device_count(&self) -> usize {
        self.pins.len()
    }

    /// Pin bound to a minor number
    pub fn pin(&self, minor: usize) -> Option<PinIndex> {
        self.pins.get(minor).copied()
    }

    /// Bridge for one device instance, initially closed
    pub fn device(&self, minor: usize) -> Result<DeviceBridge<'_>, BridgeError> {
        let pin = self.pin(minor).ok_or(BridgeError::NoSuchDevice(minor))?;
        Ok(DeviceBridge {
            ctx: self,
            minor,
            pin,
            state: BridgeState::Closed,
        })
    }

    /// Map the GPIO block, run `f` against `pin`, and unmap
    pub fn with_pin<R>(
        &self,
        pin: PinIndex,
        f: impl FnOnce(&GpioPin<'_>) -> R,
    ) -> Result<R, MapError> {
        let mut window = RegisterWindow::acquire(self.provider.as_ref(), self.hw.gpio_range()?)?;
        let result = f(&GpioPin::new(&window, self.hw.offsets, pin, &self.fsel_lock));
        window.release();
        Ok(result)
    }

    /// Tear down the context
    pub fn detach(self) {
        info!("[{}] detach", self.name);
    }
}

impl std::fmt::Debug for DriverContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DriverContext")
            .field("name", &self.name)
            .field("generation", &self.hw.generation)
            .field("write_policy", &self.write_policy)
            .field("pins", &self.pins)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeState {
    Closed,
    Opened,
}

/// One open handle on a device instance
#[derive(Debug)]
pub struct DeviceBridge<'c> {
    ctx: &'c DriverContext,
    minor: usize,
    pin: PinIndex,
    state: BridgeState,
}

impl<'c> DeviceBridge<'c> {
    pub fn state(&self) -> BridgeState {
        self.state
    }

    pub fn pin(&self) -> PinIndex {
        self.pin
    }

    /// Configure the pin as an output. A mapping failure leaves the bridge closed.
    pub fn open(&mut self) -> Result<(), BridgeError> {
        info!("[{}{}] open ({})", self.ctx.name, self.minor, self.pin);
        self.ctx.with_pin(self.pin, |p| p.configure_as_output())?;
        self.state = BridgeState::Opened;
        Ok(())
    }

    pub fn release(&mut self) {
        info!("[{}{}] release", self.ctx.name, self.minor);
        self.state = BridgeState::Closed;
    }

    fn ensure_open(&self) -> Result<(), BridgeError> {
        match self.state {
            BridgeState::Opened => Ok(()),
            BridgeState::Closed => Err(BridgeError::NotOpen),
        }
    }

    /// Write the pin level as `'0'`/`'1'` into `buf[0]`. Returns bytes written.
    pub fn read(&self, buf: &mut [u8]) -> Result<usize, BridgeError> {
        self.ensure_open()?;
        let Some(slot) = buf.first_mut() else {
            return Ok(0);
        };
        let level = self.ctx.with_pin(self.pin, |p| p.read_level())?;
        *slot = if level { b'1' } else { b'0' };
        debug!("[{}{}] read {}", self.ctx.name, self.minor, *slot as char);
        Ok(1)
    }

    /// Drive the pin from `buf[0]`. Returns bytes consumed.
    pub fn write(&self, buf: &[u8]) -> Result<usize, BridgeError> {
        self.ensure_open()?;
        let Some(&byte) = buf.first() else {
            return Ok(0);
        };
        debug!("[{}{}] write 0x{:02X}", self.ctx.name, self.minor, byte);

        let high = match byte {
            b'1' => true,
            b'0' => false,
            other => {
                return match self.ctx.write_policy {
                    WritePolicy::Lenient => {
                        debug!("[{}{}] ignoring 0x{:02X}", self.ctx.name, self.minor, other);
                        Ok(1)
                    }
                    WritePolicy::Strict => Err(BridgeError::UnrecognizedByte(other)),
                };
            }
        };

        self.ctx.with_pin(self.pin, |p| {
            if high {
                p.set_high();
            } else {
                p.set_low();
            }
            let (addr, value) = p.level_register();
            debug!("REG [0x{:08X}] = 0x{:08X}", addr, value);
        })?;
        Ok(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::regs::BCM2837;
    use crate::hal::sim::{Access, SimulatedController};
    use std::thread;

    fn attach(sim: &SimulatedController, pins: &[u32], policy: WritePolicy) -> DriverContext {
        DriverContext::attach("gpio", BCM2837.clone(), Box::new(sim.clone()), pins, policy).unwrap()
    }

    #[test]
    fn test_full_lifecycle_on_pin_4() {
        let sim = SimulatedController::new(&BCM2837);
        let ctx = attach(&sim, &[4], WritePolicy::Lenient);
        let mut dev = ctx.device(0).unwrap();
        let mut buf = [0u8; 8];

        dev.open().unwrap();
        assert_eq!(dev.state(), BridgeState::Opened);
        assert_eq!(sim.peek(0x00), 1 << 12);

        assert_eq!(dev.write(b"1").unwrap(), 1);
        assert_eq!(sim.writes_to(0x1C), vec![1 << 4]);
        assert_eq!(dev.read(&mut buf).unwrap(), 1);
        assert_eq!(buf[0], b'1');

        assert_eq!(dev.write(b"0").unwrap(), 1);
        assert_eq!(sim.writes_to(0x28), vec![1 << 4]);
        assert_eq!(dev.read(&mut buf).unwrap(), 1);
        assert_eq!(buf[0], b'0');

        dev.release();
        assert_eq!(dev.state(), BridgeState::Closed);
        assert_eq!(sim.outstanding_mappings(), 0);
        // open + 4 operations, each with its own window
        assert_eq!(sim.total_mappings(), 5);
    }

    #[test]
    fn test_write_consumes_only_first_byte() {
        let sim = SimulatedController::new(&BCM2837);
        let ctx = attach(&sim, &[17], WritePolicy::Lenient);
        let mut dev = ctx.device(0).unwrap();
        dev.open().unwrap();

        assert_eq!(dev.write(b"10\n").unwrap(), 1);
        let mut buf = [0u8; 1];
        dev.read(&mut buf).unwrap();
        assert_eq!(&buf, b"1");
        assert!(sim.writes_to(0x28).is_empty());
    }

    #[test]
    fn test_lenient_policy_ignores_unknown_bytes() {
        let sim = SimulatedController::new(&BCM2837);
        let ctx = attach(&sim, &[4], WritePolicy::Lenient);
        let mut dev = ctx.device(0).unwrap();
        dev.open().unwrap();
        sim.clear_log();

        assert_eq!(dev.write(b"x").unwrap(), 1);
        assert!(sim.accesses().is_empty());
    }

    #[test]
    fn test_strict_policy_rejects_unknown_bytes() {
        let sim = SimulatedController::new(&BCM2837);
        let ctx = attach(&sim, &[4], WritePolicy::Strict);
        let mut dev = ctx.device(0).unwrap();
        dev.open().unwrap();
        sim.clear_log();

        assert!(matches!(
            dev.write(b"2"),
            Err(BridgeError::UnrecognizedByte(b'2'))
        ));
        assert!(sim.accesses().is_empty());
    }

    #[test]
    fn test_empty_buffers() {
        let sim = SimulatedController::new(&BCM2837);
        let ctx = attach(&sim, &[4], WritePolicy::Strict);
        let mut dev = ctx.device(0).unwrap();
        dev.open().unwrap();
        sim.clear_log();

        assert_eq!(dev.write(&[]).unwrap(), 0);
        assert_eq!(dev.read(&mut []).unwrap(), 0);
        assert!(sim.accesses().is_empty());
    }

    #[test]
    fn test_closed_device_rejects_io() {
        let sim = SimulatedController::new(&BCM2837);
        let ctx = attach(&sim, &[4], WritePolicy::Lenient);
        let dev = ctx.device(0).unwrap();
        let mut buf = [0u8; 1];

        assert!(matches!(dev.read(&mut buf), Err(BridgeError::NotOpen)));
        assert!(matches!(dev.write(b"1"), Err(BridgeError::NotOpen)));
        assert_eq!(sim.total_mappings(), 0);
    }

    #[test]
    fn test_open_propagates_map_failure() {
        let sim = SimulatedController::new(&BCM2837);
        sim.fail_mappings(true);
        let ctx = attach(&sim, &[4], WritePolicy::Lenient);
        let mut dev = ctx.device(0).unwrap();

        let err = dev.open().unwrap_err();
        assert!(matches!(err, BridgeError::Gpio(GpioError::Map(_))));
        assert_eq!(dev.state(), BridgeState::Closed);
        assert_eq!(
            std::io::Error::from(err).kind(),
            std::io::ErrorKind::PermissionDenied
        );
    }

    #[test]
    fn test_map_failure_after_open_fails_io() {
        let sim = SimulatedController::new(&BCM2837);
        let ctx = attach(&sim, &[4], WritePolicy::Strict);
        let mut dev = ctx.device(0).unwrap();
        dev.open().unwrap();

        sim.fail_mappings(true);
        let write_err = dev.write(b"1").unwrap_err();
        assert!(matches!(write_err, BridgeError::Gpio(GpioError::Map(_))));

        let mut buf = [0u8; 1];
        let read_err = dev.read(&mut buf).unwrap_err();
        assert!(matches!(read_err, BridgeError::Gpio(GpioError::Map(_))));
        assert_eq!(buf, [0u8]);

        for err in [write_err, read_err] {
            let io_err = std::io::Error::from(err);
            assert_eq!(io_err.kind(), std::io::ErrorKind::PermissionDenied);
            assert!(io_err.to_string().contains("simulated map failure"));
        }
        assert_eq!(sim.outstanding_mappings(), 0);
        assert_eq!(dev.state(), BridgeState::Opened);

        sim.fail_mappings(false);
        assert_eq!(dev.write(b"1").unwrap(), 1);
        assert_eq!(dev.read(&mut buf).unwrap(), 1);
        assert_eq!(&buf, b"1");
        dev.release();
        assert_eq!(sim.outstanding_mappings(), 0);
    }

    #[test]
    fn test_invalid_pin_rejected_at_attach() {
        let sim = SimulatedController::new(&BCM2837);
        let result = DriverContext::attach(
            "gpio",
            BCM2837.clone(),
            Box::new(sim.clone()),
            &[4, 64],
            WritePolicy::Lenient,
        );
        assert!(matches!(
            result,
            Err(GpioError::InvalidPinIndex { index: 64, .. })
        ));
        assert!(sim.accesses().is_empty());
    }

    #[test]
    fn test_unknown_minor() {
        let sim = SimulatedController::new(&BCM2837);
        let ctx = attach(&sim, &[4, 17], WritePolicy::Lenient);
        assert_eq!(ctx.device_count(), 2);
        assert!(ctx.device(1).is_ok());
        assert!(matches!(ctx.device(2), Err(BridgeError::NoSuchDevice(2))));
    }

    #[test]
    fn test_instances_drive_their_own_pins() {
        let sim = SimulatedController::new(&BCM2837);
        let ctx = attach(&sim, &[4, 17], WritePolicy::Lenient);
        let mut a = ctx.device(0).unwrap();
        let mut b = ctx.device(1).unwrap();
        a.open().unwrap();
        b.open().unwrap();
        // Both fields set, GPFSEL0 and GPFSEL1
        assert_eq!(sim.peek(0x00), 1 << 12);
        assert_eq!(sim.peek(0x04), 1 << 21);

        b.write(b"1").unwrap();
        let mut buf = [0u8; 1];
        a.read(&mut buf).unwrap();
        assert_eq!(&buf, b"0");
        b.read(&mut buf).unwrap();
        assert_eq!(&buf, b"1");
    }

    #[test]
    fn test_concurrent_opens_share_context() {
        let sim = SimulatedController::new(&BCM2837);
        let pins: Vec<u32> = (0..10).collect();
        let ctx = attach(&sim, &pins, WritePolicy::Lenient);

        thread::scope(|s| {
            for minor in 0..ctx.device_count() {
                let ctx = &ctx;
                s.spawn(move || {
                    for _ in 0..20 {
                        let mut dev = ctx.device(minor).unwrap();
                        dev.open().unwrap();
                        dev.write(b"1").unwrap();
                        dev.release();
                    }
                });
            }
        });

        assert_eq!(sim.peek(0x00), 0x0924_9249);
        assert_eq!(sim.peek(0x34), 0x3FF);
        assert_eq!(sim.outstanding_mappings(), 0);
    }

    #[test]
    fn test_every_window_is_released() {
        let sim = SimulatedController::new(&BCM2837);
        let ctx = attach(&sim, &[4], WritePolicy::Strict);
        let mut dev = ctx.device(0).unwrap();
        dev.open().unwrap();
        let _ = dev.write(b"1");
        let _ = dev.write(b"?");
        let _ = dev.read(&mut [0u8; 1]);
        dev.release();

        let maps = sim
            .accesses()
            .iter()
            .filter(|a| matches!(a, Access::Map { .. }))
            .count();
        let unmaps = sim
            .accesses()
            .iter()
            .filter(|a| matches!(a, Access::Unmap { .. }))
            .count();
        assert_eq!(maps, unmaps);
        assert_eq!(sim.outstanding_mappings(), 0);
        ctx.detach();
    }
}
