//! Register windows over mapped physical memory
//!
//! A [`RegisterWindow`] owns exactly one mapping from a [`MapProvider`] and
//! is the only place that dereferences it. Every access is bounds and
//! alignment checked against the mapped range before it reaches the
//! provider's volatile load/store.

use log::{debug, warn};

use crate::error::{MapError, UnmapError};

/// Mapping granularity. Physical ranges must start on this boundary.
pub const PAGE_SIZE: usize = 4096;

/// Physical address span to map
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhysicalAddressRange {
    base: u64,
    length: usize,
}

impl PhysicalAddressRange {
    /// Create a range, rejecting empty or misaligned spans
    pub fn new(base: u64, length: usize) -> Result<Self, MapError> {
        if length == 0 {
            return Err(MapError::InvalidRange {
                base,
                length,
                reason: "length must be non-zero",
            });
        }
        if base % PAGE_SIZE as u64 != 0 {
            return Err(MapError::InvalidRange {
                base,
                length,
                reason: "base is not page aligned",
            });
        }
        if base.checked_add(length as u64).is_none() {
            return Err(MapError::InvalidRange {
                base,
                length,
                reason: "range wraps the address space",
            });
        }
        Ok(Self { base, length })
    }

    pub fn base(&self) -> u64 {
        self.base
    }

    pub fn length(&self) -> usize {
        self.length
    }

    /// First address past the range
    pub fn end(&self) -> u64 {
        self.base + self.length as u64
    }

    /// Whether `other` lies entirely inside this range
    pub fn contains(&self, other: &PhysicalAddressRange) -> bool {
        other.base >= self.base && other.end() <= self.end()
    }
}

/// A live mapping handed out by a [`MapProvider`]
///
/// Load and store are raw volatile accesses; only [`RegisterWindow`] calls
/// them, after checking the offset.
pub trait Mapping: Send {
    /// Mapped length in bytes
    fn len(&self) -> usize;

    /// Volatile 32-bit load
    ///
    /// # Safety
    /// `offset` must be 4-byte aligned and `offset + 4 <= self.len()`.
    unsafe fn load(&self, offset: usize) -> u32;

    /// Volatile 32-bit store
    ///
    /// # Safety
    /// `offset` must be 4-byte aligned and `offset + 4 <= self.len()`.
    unsafe fn store(&self, offset: usize, value: u32);

    /// Tear down the mapping
    fn unmap(self: Box<Self>) -> Result<(), UnmapError>;
}

/// Facility that maps physical ranges into the process
pub trait MapProvider: Send + Sync {
    fn map(&self, range: PhysicalAddressRange) -> Result<Box<dyn Mapping>, MapError>;
}

/// Scoped, exclusively owned register mapping
pub struct RegisterWindow {
    range: PhysicalAddressRange,
    mapping: Option<Box<dyn Mapping>>,
}

impl RegisterWindow {
    /// Map `range` through `provider`
    pub fn acquire(
        provider: &dyn MapProvider,
        range: PhysicalAddressRange,
    ) -> Result<Self, MapError> {
        let mapping = provider.map(range)?;
        debug!("mapped 0x{:08X}+0x{:X}", range.base(), range.length());
        Ok(Self {
            range,
            mapping: Some(mapping),
        })
    }

    pub fn range(&self) -> PhysicalAddressRange {
        self.range
    }

    pub fn is_mapped(&self) -> bool {
        self.mapping.is_some()
    }

    /// Physical address of a register in this window, for diagnostics
    pub fn physical_address(&self, offset: usize) -> u64 {
        self.range.base() + offset as u64
    }

    fn checked(&self, offset: usize) -> &dyn Mapping {
        let mapping = match self.mapping.as_deref() {
            Some(mapping) => mapping,
            None => panic!(
                "register access at +0x{:X} on released window 0x{:08X}",
                offset,
                self.range.base()
            ),
        };
        assert!(
            offset % 4 == 0 && offset + 4 <= mapping.len(),
            "register offset 0x{:X} outside window 0x{:08X}+0x{:X}",
            offset,
            self.range.base(),
            mapping.len()
        );
        mapping
    }

    /// Volatile 32-bit read at `offset`
    ///
    /// # Panics
    /// If `offset` is unaligned, out of range, or the window was released.
    pub fn read32(&self, offset: usize) -> u32 {
        let mapping = self.checked(offset);
        // SAFETY: offset checked against the mapping length and alignment above.
        unsafe { mapping.load(offset) }
    }

    /// Volatile 32-bit write at `offset`
    ///
    /// # Panics
    /// If `offset` is unaligned, out of range, or the window was released.
    pub fn write32(&self, offset: usize, value: u32) {
        let mapping = self.checked(offset);
        // SAFETY: offset checked against the mapping length and alignment above.
        unsafe { mapping.store(offset, value) }
    }

    /// Read, transform, and write back a register. Returns the written value.
    ///
    /// Not atomic; callers sharing the register must serialise.
    pub fn modify32<F>(&self, offset: usize, f: F) -> u32
    where
        F: FnOnce(u32) -> u32,
    {
        let value = f(self.read32(offset));
        self.write32(offset, value);
        value
    }

    /// Unmap the window. Calling it again is a no-op.
    pub fn release(&mut self) {
        if let Some(mapping) = self.mapping.take() {
            match mapping.unmap() {
                Ok(()) => debug!(
                    "unmapped 0x{:08X}+0x{:X}",
                    self.range.base(),
                    self.range.length()
                ),
                Err(err) => warn!("{}", err),
            }
        }
    }
}

impl Drop for RegisterWindow {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for RegisterWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisterWindow")
            .field("range", &self.range)
            .field("mapped", &self.is_mapped())
            .finish()
    }
}
