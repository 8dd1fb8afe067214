//! Simulated GPIO controller
//!
//! In-process register model used by tests and by `--simulate`. Writes to
//! the set/clear banks update the level bank, set/clear read back as zero,
//! and level writes are dropped. Every mapping and register access is
//! recorded so callers can check what touched the hardware.

use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::regs::HardwareDescription;
use super::window::{MapProvider, Mapping, PhysicalAddressRange};
use crate::error::{MapError, UnmapError};

/// Number of 32-bit banks for set/clear/level
const BANKS: usize = 2;

/// Recorded access. Offsets are relative to the GPIO block base.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Map { base: u64, length: usize },
    Unmap { base: u64 },
    Read { offset: usize, value: u32 },
    Write { offset: usize, value: u32 },
}

#[derive(Debug)]
struct SimState {
    hw: HardwareDescription,
    regs: Mutex<Vec<u32>>,
    log: Mutex<Vec<Access>>,
    outstanding: AtomicUsize,
    total: AtomicUsize,
    fail_maps: AtomicBool,
}

fn locked<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl SimState {
    fn in_bank(&self, offset: usize, first: usize) -> Option<usize> {
        (offset >= first && offset < first + BANKS * 4).then(|| (offset - first) / 4)
    }

    fn record(&self, access: Access) {
        locked(&self.log).push(access);
    }
}

/// Handle to a simulated controller. Clones share the same registers.
#[derive(Debug, Clone)]
pub struct SimulatedController {
    state: Arc<SimState>,
}

impl SimulatedController {
    /// Zeroed register file laid out per `hw`
    pub fn new(hw: &HardwareDescription) -> Self {
        Self {
            state: Arc::new(SimState {
                hw: hw.clone(),
                regs: Mutex::new(vec![0; hw.block_length / 4]),
                log: Mutex::new(Vec::new()),
                outstanding: AtomicUsize::new(0),
                total: AtomicUsize::new(0),
                fail_maps: AtomicBool::new(false),
            }),
        }
    }

    /// Mappings handed out and not yet unmapped
    pub fn outstanding_mappings(&self) -> usize {
        self.state.outstanding.load(Ordering::SeqCst)
    }

    /// Mappings handed out since creation
    pub fn total_mappings(&self) -> usize {
        self.state.total.load(Ordering::SeqCst)
    }

    /// Everything recorded so far
    pub fn accesses(&self) -> Vec<Access> {
        locked(&self.state.log).clone()
    }

    /// Recorded register reads and writes, excluding map/unmap
    pub fn register_accesses(&self) -> Vec<Access> {
        self.accesses()
            .into_iter()
            .filter(|a| matches!(a, Access::Read { .. } | Access::Write { .. }))
            .collect()
    }

    /// Recorded writes to one register
    pub fn writes_to(&self, offset: usize) -> Vec<u32> {
        self.accesses()
            .into_iter()
            .filter_map(|a| match a {
                Access::Write { offset: o, value } if o == offset => Some(value),
                _ => None,
            })
            .collect()
    }

    pub fn clear_log(&self) {
        locked(&self.state.log).clear();
    }

    /// Make subsequent map requests fail
    pub fn fail_mappings(&self, fail: bool) {
        self.state.fail_maps.store(fail, Ordering::SeqCst);
    }

    /// Raw register value, bypassing the access log
    pub fn peek(&self, offset: usize) -> u32 {
        locked(&self.state.regs)[offset / 4]
    }

    /// Raw register store, bypassing the access log and set/clear semantics
    pub fn poke(&self, offset: usize, value: u32) {
        locked(&self.state.regs)[offset / 4] = value;
    }
}

impl MapProvider for SimulatedController {
    fn map(&self, range: PhysicalAddressRange) -> Result<Box<dyn Mapping>, MapError> {
        let hw = &self.state.hw;
        let block = hw.gpio_range()?;
        if !block.contains(&range) {
            return Err(MapError::OutOfDevice {
                base: range.base(),
                device: format!("simulated {} GPIO block", hw.generation),
            });
        }
        if self.state.fail_maps.load(Ordering::SeqCst) {
            return Err(MapError::Mmap {
                base: range.base(),
                length: range.length(),
                source: io::Error::new(io::ErrorKind::PermissionDenied, "simulated map failure"),
            });
        }

        self.state.outstanding.fetch_add(1, Ordering::SeqCst);
        self.state.total.fetch_add(1, Ordering::SeqCst);
        self.state.record(Access::Map {
            base: range.base(),
            length: range.length(),
        });

        Ok(Box::new(SimulatedMapping {
            state: Arc::clone(&self.state),
            range,
            start: (range.base() - block.base()) as usize,
        }))
    }
}

struct SimulatedMapping {
    state: Arc<SimState>,
    range: PhysicalAddressRange,
    start: usize,
}

impl Mapping for SimulatedMapping {
    fn len(&self) -> usize {
        self.range.length()
    }

    unsafe fn load(&self, offset: usize) -> u32 {
        let offset = self.start + offset;
        let offsets = self.state.hw.offsets;
        let write_only = self.state.in_bank(offset, offsets.output_set).is_some()
            || self.state.in_bank(offset, offsets.output_clear).is_some();
        let value = if write_only {
            0
        } else {
            locked(&self.state.regs)[offset / 4]
        };
        self.state.record(Access::Read { offset, value });
        value
    }

    unsafe fn store(&self, offset: usize, value: u32) {
        let offset = self.start + offset;
        let offsets = self.state.hw.offsets;
        {
            let mut regs = locked(&self.state.regs);
            if let Some(bank) = self.state.in_bank(offset, offsets.output_set) {
                regs[(offsets.level / 4) + bank] |= value;
            } else if let Some(bank) = self.state.in_bank(offset, offsets.output_clear) {
                regs[(offsets.level / 4) + bank] &= !value;
            } else if self.state.in_bank(offset, offsets.level).is_none() {
                regs[offset / 4] = value;
            }
        }
        self.state.record(Access::Write { offset, value });
    }

    fn unmap(self: Box<Self>) -> Result<(), UnmapError> {
        self.state.outstanding.fetch_sub(1, Ordering::SeqCst);
        self.state.record(Access::Unmap {
            base: self.range.base(),
        });
        Ok(())
    }
}
