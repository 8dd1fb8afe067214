//! Error types for mapping, pin access, and the device bridge

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Failure to establish a register mapping
#[derive(Debug, Error)]
pub enum MapError {
    /// Range is empty or not aligned to the page granularity
    #[error("invalid physical range 0x{base:08X}+0x{length:X}: {reason}")]
    InvalidRange {
        base: u64,
        length: usize,
        reason: &'static str,
    },

    /// Range lies below the physical address backing the mapping device
    #[error("physical address 0x{base:08X} is not reachable through {device}")]
    OutOfDevice { base: u64, device: String },

    /// Opening the mapping device failed (missing, permission denied)
    #[error("cannot open {}: {source}", .path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The mapping facility refused the request
    #[error("mmap of 0x{base:08X}+0x{length:X} failed: {source}")]
    Mmap {
        base: u64,
        length: usize,
        #[source]
        source: io::Error,
    },
}

/// Failure to tear down a mapping. Logged, never surfaced.
#[derive(Debug, Error)]
#[error("munmap of 0x{base:08X}+0x{length:X} failed: {source}")]
pub struct UnmapError {
    pub base: u64,
    pub length: usize,
    #[source]
    pub source: io::Error,
}

/// Pin-level errors
#[derive(Debug, Error)]
pub enum GpioError {
    #[error("GPIO {index} is out of range (controller has {pin_count} pins)")]
    InvalidPinIndex { index: u32, pin_count: u8 },

    #[error(transparent)]
    Map(#[from] MapError),
}

/// Errors reported to the host framework by the device bridge
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("no device bound to minor {0}")]
    NoSuchDevice(usize),

    #[error("device is not open")]
    NotOpen,

    #[error("unrecognized byte 0x{0:02X} (expected '0' or '1')")]
    UnrecognizedByte(u8),

    #[error(transparent)]
    Gpio(#[from] GpioError),
}

impl From<MapError> for BridgeError {
    fn from(err: MapError) -> Self {
        BridgeError::Gpio(GpioError::Map(err))
    }
}

impl From<BridgeError> for io::Error {
    fn from(err: BridgeError) -> Self {
        let kind = match &err {
            BridgeError::NoSuchDevice(_) => io::ErrorKind::NotFound,
            BridgeError::NotOpen => io::ErrorKind::NotConnected,
            BridgeError::UnrecognizedByte(_) => io::ErrorKind::InvalidInput,
            BridgeError::Gpio(GpioError::InvalidPinIndex { .. }) => io::ErrorKind::InvalidInput,
            BridgeError::Gpio(GpioError::Map(map)) => match map {
                MapError::Open { source, .. } | MapError::Mmap { source, .. } => source.kind(),
                MapError::InvalidRange { .. } => io::ErrorKind::InvalidInput,
                MapError::OutOfDevice { .. } => io::ErrorKind::AddrNotAvailable,
            },
        };
        io::Error::new(kind, err)
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("unknown controller generation: {0}")]
    UnknownGeneration(String),

    #[error("peripheral base 0x{0:08X} is not page aligned")]
    MisalignedBase(u64),

    #[error("no device instances configured")]
    NoDevices,

    #[error(transparent)]
    Gpio(#[from] GpioError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bridge_error_maps_to_io_kind() {
        let err: io::Error = BridgeError::UnrecognizedByte(b'x').into();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);

        let err: io::Error = BridgeError::NotOpen.into();
        assert_eq!(err.kind(), io::ErrorKind::NotConnected);
    }

    #[test]
    fn test_map_error_keeps_os_kind() {
        let err: io::Error = BridgeError::from(MapError::Open {
            path: PathBuf::from("/dev/gpiomem"),
            source: io::Error::from(io::ErrorKind::NotFound),
        })
        .into();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
        assert!(err.to_string().starts_with("cannot open /dev/gpiomem"));

        let err: io::Error = BridgeError::from(MapError::Mmap {
            base: 0x3F20_0000,
            length: 4096,
            source: io::Error::from(io::ErrorKind::PermissionDenied),
        })
        .into();
        assert_eq!(err.kind(), io::ErrorKind::PermissionDenied);

        let err: io::Error = BridgeError::from(MapError::InvalidRange {
            base: 0x3F20_0004,
            length: 4096,
            reason: "base is not page aligned",
        })
        .into();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }

    #[test]
    fn test_invalid_pin_message() {
        let err = GpioError::InvalidPinIndex { index: 64, pin_count: 54 };
        assert_eq!(
            err.to_string(),
            "GPIO 64 is out of range (controller has 54 pins)"
        );
    }
}
