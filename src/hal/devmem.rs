//! `/dev/mem` and `/dev/gpiomem` mappings
//!
//! Maps physical ranges with `mmap(2)` on a memory device opened with
//! `O_SYNC`, so accesses are uncached. `/dev/gpiomem` exposes only the GPIO
//! block at file offset 0; set `file_base` to the GPIO base to use it.

use std::fs::OpenOptions;
use std::io;
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use std::ptr::{self, NonNull};

use log::debug;

use super::window::{MapProvider, Mapping, PhysicalAddressRange, PAGE_SIZE};
use crate::error::{MapError, UnmapError};

/// Full physical memory device
pub const DEV_MEM: &str = "/dev/mem";

/// GPIO-only device exposed by the Raspberry Pi kernel
pub const DEV_GPIOMEM: &str = "/dev/gpiomem";

/// Maps physical memory through a memory device file
#[derive(Debug, Clone)]
pub struct DevMem {
    path: PathBuf,
    file_base: u64,
}

impl DevMem {
    /// Map through `path`, where file offset 0 is physical address 0
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            file_base: 0,
        }
    }

    /// Map through `/dev/gpiomem`, whose offset 0 is `gpio_base`
    pub fn gpiomem(gpio_base: u64) -> Self {
        Self::new(DEV_GPIOMEM).with_file_base(gpio_base)
    }

    /// Physical address backing file offset 0
    pub fn with_file_base(mut self, file_base: u64) -> Self {
        self.file_base = file_base;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn file_offset(&self, range: &PhysicalAddressRange) -> Result<libc::off_t, MapError> {
        let out_of_device = || MapError::OutOfDevice {
            base: range.base(),
            device: self.path.display().to_string(),
        };
        let offset = range.base().checked_sub(self.file_base).ok_or_else(out_of_device)?;
        libc::off_t::try_from(offset).map_err(|_| out_of_device())
    }
}

impl MapProvider for DevMem {
    fn map(&self, range: PhysicalAddressRange) -> Result<Box<dyn Mapping>, MapError> {
        let offset = self.file_offset(&range)?;
        if offset as u64 % page_size() as u64 != 0 {
            return Err(MapError::InvalidRange {
                base: range.base(),
                length: range.length(),
                reason: "file offset is not aligned to the system page size",
            });
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_SYNC)
            .open(&self.path)
            .map_err(|source| MapError::Open {
                path: self.path.clone(),
                source,
            })?;

        // SAFETY: fresh shared mapping of a file we hold open; the kernel
        // validates the length and offset.
        let addr = unsafe {
            libc::mmap(
                ptr::null_mut(),
                range.length(),
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                file.as_raw_fd(),
                offset,
            )
        };
        if addr == libc::MAP_FAILED {
            return Err(MapError::Mmap {
                base: range.base(),
                length: range.length(),
                source: io::Error::last_os_error(),
            });
        }
        let base = NonNull::new(addr.cast::<u8>()).ok_or_else(|| MapError::Mmap {
            base: range.base(),
            length: range.length(),
            source: io::Error::new(io::ErrorKind::Other, "mmap returned a null address"),
        })?;

        debug!(
            "{}: 0x{:08X} mapped at {:p}",
            self.path.display(),
            range.base(),
            base
        );
        // The mapping outlives the descriptor; `file` closes here.
        Ok(Box::new(DevMemMapping { base, range }))
    }
}

/// Pointer-sized handle to an mmap'd span
struct DevMemMapping {
    base: NonNull<u8>,
    range: PhysicalAddressRange,
}

// SAFETY: the mapping is plain device memory with no thread affinity.
unsafe impl Send for DevMemMapping {}

impl Mapping for DevMemMapping {
    fn len(&self) -> usize {
        self.range.length()
    }

    unsafe fn load(&self, offset: usize) -> u32 {
        ptr::read_volatile(self.base.as_ptr().add(offset).cast::<u32>())
    }

    unsafe fn store(&self, offset: usize, value: u32) {
        ptr::write_volatile(self.base.as_ptr().add(offset).cast::<u32>(), value)
    }

    fn unmap(self: Box<Self>) -> Result<(), UnmapError> {
        // SAFETY: `base`/`len` are exactly what mmap returned and nothing
        // else references the span once the window gives it up.
        let rc = unsafe { libc::munmap(self.base.as_ptr().cast(), self.range.length()) };
        if rc != 0 {
            return Err(UnmapError {
                base: self.range.base(),
                length: self.range.length(),
                source: io::Error::last_os_error(),
            });
        }
        Ok(())
    }
}

/// System page size, falling back to [`PAGE_SIZE`]
pub fn page_size() -> usize {
    // SAFETY: sysconf has no preconditions.
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    usize::try_from(size).unwrap_or(PAGE_SIZE)
}
