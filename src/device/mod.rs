//! ZNS Device Command Surface
//!
//! Provides a minimal typed interface over a zoned namespace device, allowing
//! the FTL to work with different backing implementations (NVMe passthrough,
//! in-memory emulation) through a common trait.

use core::fmt;

pub mod mem;

/// Device geometry reported by the identify commands.
///
/// All sizes are in bytes except `pages_per_zone` and `num_zones`.
/// `max_transfer_size` bounds a single read (MDTS); `max_append_size` bounds a
/// single zone append (ZASL). Both are multiples of `page_size`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ZnsGeometry {
    /// Native page (LBA) size in bytes, typically 4096
    pub page_size: usize,
    /// Pages per zone
    pub pages_per_zone: u32,
    /// Total zones in the namespace
    pub num_zones: u32,
    /// Maximum bytes in one read command
    pub max_transfer_size: usize,
    /// Maximum bytes in one zone-append command
    pub max_append_size: usize,
}

impl ZnsGeometry {
    /// Capacity of one zone in bytes
    pub fn zone_capacity(&self) -> usize {
        self.pages_per_zone as usize * self.page_size
    }

    /// Total pages in the namespace
    pub fn total_pages(&self) -> u64 {
        self.num_zones as u64 * self.pages_per_zone as u64
    }

    /// Starting physical page address of a zone
    pub fn zone_sppa(&self, zone_index: u32) -> u64 {
        zone_index as u64 * self.pages_per_zone as u64
    }
}

/// Zoned namespace device interface
///
/// This trait is the complete command surface the FTL consumes: identify,
/// whole-page reads, zone appends, and zone resets. All commands are
/// submitted synchronously. Buffer lengths must be multiples of the page
/// size; the caller splits appends larger than `max_append_size`.
pub trait ZnsDevice: Send + Sync {
    /// Report the device geometry
    fn identify(&self) -> Result<ZnsGeometry, DeviceError>;

    /// Read whole pages starting at the given physical page address
    ///
    /// Reading pages that were never appended since the last reset yields
    /// zeros.
    ///
    /// # Errors
    /// Returns `DeviceError::OutOfRange` if the range exceeds the namespace,
    /// `DeviceError::Unaligned` if `buf.len()` is not page-aligned.
    fn read(&self, ppa: u64, buf: &mut [u8]) -> Result<(), DeviceError>;

    /// Append whole pages to the zone starting at `zone_sppa`
    ///
    /// Returns the physical page address the device allocated for the first
    /// page of the payload. The device advances the zone write pointer; the
    /// caller never chooses the placement.
    ///
    /// # Errors
    /// Returns `DeviceError::OutOfRange` if the append would cross the zone
    /// capacity, `DeviceError::Unaligned` for non-page-multiple payloads.
    fn append(&self, zone_sppa: u64, buf: &[u8]) -> Result<u64, DeviceError>;

    /// Reset the zone starting at `zone_sppa` to the empty state
    fn zone_reset(&self, zone_sppa: u64) -> Result<(), DeviceError>;
}

/// Errors reported by ZNS device commands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceError {
    /// Command failed at the device level
    Io,
    /// Address or length falls outside the namespace or zone capacity
    OutOfRange,
    /// Buffer length or address is not a whole number of pages
    Unaligned,
}

impl fmt::Display for DeviceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceError::Io => write!(f, "device I/O error"),
            DeviceError::OutOfRange => write!(f, "address out of range"),
            DeviceError::Unaligned => write!(f, "buffer not page-aligned"),
        }
    }
}
