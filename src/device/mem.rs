//! In-memory ZNS emulator
//!
//! Models the zone semantics the FTL depends on: per-zone write pointers
//! advanced only by appends, reset-to-empty, and zero-filled reads of pages
//! that were never written. Used by the test suite and for bring-up without
//! hardware.

use super::{DeviceError, ZnsDevice, ZnsGeometry};
use spin::Mutex;

struct ZoneBacking {
    data: Vec<u8>,
    /// Pages written since the last reset
    write_ptr: u32,
}

/// RAM-backed zoned namespace
pub struct MemZns {
    geometry: ZnsGeometry,
    zones: Vec<Mutex<ZoneBacking>>,
}

impl MemZns {
    /// Create an emulated namespace with the given geometry
    pub fn new(geometry: ZnsGeometry) -> Self {
        let zone_bytes = geometry.zone_capacity();
        let zones = (0..geometry.num_zones)
            .map(|_| {
                Mutex::new(ZoneBacking {
                    data: vec![0u8; zone_bytes],
                    write_ptr: 0,
                })
            })
            .collect();
        Self { geometry, zones }
    }

    /// Convenience geometry for small test namespaces
    pub fn with_dimensions(page_size: usize, pages_per_zone: u32, num_zones: u32) -> Self {
        Self::new(ZnsGeometry {
            page_size,
            pages_per_zone,
            num_zones,
            max_transfer_size: page_size * 64,
            max_append_size: page_size * 4,
        })
    }

    fn zone_of(&self, ppa: u64) -> Result<(usize, usize), DeviceError> {
        let ppz = self.geometry.pages_per_zone as u64;
        let zone = (ppa / ppz) as usize;
        let offset = (ppa % ppz) as usize;
        if zone >= self.zones.len() {
            return Err(DeviceError::OutOfRange);
        }
        Ok((zone, offset))
    }
}

impl ZnsDevice for MemZns {
    fn identify(&self) -> Result<ZnsGeometry, DeviceError> {
        Ok(self.geometry)
    }

    fn read(&self, ppa: u64, buf: &mut [u8]) -> Result<(), DeviceError> {
        let page = self.geometry.page_size;
        if buf.is_empty() || buf.len() % page != 0 {
            return Err(DeviceError::Unaligned);
        }
        let num_pages = (buf.len() / page) as u64;
        if ppa + num_pages > self.geometry.total_pages() {
            return Err(DeviceError::OutOfRange);
        }
        // A read may cross zone boundaries; serve it page by page.
        for i in 0..num_pages {
            let (zone, offset) = self.zone_of(ppa + i)?;
            let backing = self.zones[zone].lock();
            let src = &backing.data[offset * page..(offset + 1) * page];
            let dst_start = i as usize * page;
            buf[dst_start..dst_start + page].copy_from_slice(src);
        }
        Ok(())
    }

    fn append(&self, zone_sppa: u64, buf: &[u8]) -> Result<u64, DeviceError> {
        let page = self.geometry.page_size;
        if buf.is_empty() || buf.len() % page != 0 {
            return Err(DeviceError::Unaligned);
        }
        if buf.len() > self.geometry.max_append_size {
            return Err(DeviceError::OutOfRange);
        }
        let ppz = self.geometry.pages_per_zone;
        if zone_sppa % ppz as u64 != 0 {
            return Err(DeviceError::Unaligned);
        }
        let (zone, _) = self.zone_of(zone_sppa)?;
        let num_pages = (buf.len() / page) as u32;

        let mut backing = self.zones[zone].lock();
        if backing.write_ptr + num_pages > ppz {
            return Err(DeviceError::OutOfRange);
        }
        let start = backing.write_ptr as usize * page;
        backing.data[start..start + buf.len()].copy_from_slice(buf);
        let allocated = zone_sppa + backing.write_ptr as u64;
        backing.write_ptr += num_pages;
        Ok(allocated)
    }

    fn zone_reset(&self, zone_sppa: u64) -> Result<(), DeviceError> {
        if zone_sppa % self.geometry.pages_per_zone as u64 != 0 {
            return Err(DeviceError::Unaligned);
        }
        let (zone, _) = self.zone_of(zone_sppa)?;
        let mut backing = self.zones[zone].lock();
        backing.data.fill(0);
        backing.write_ptr = 0;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small() -> MemZns {
        MemZns::with_dimensions(512, 4, 3)
    }

    #[test]
    fn test_append_returns_allocated_ppa() {
        let dev = small();
        let buf = vec![0xAAu8; 512];
        assert_eq!(dev.append(4, &buf).unwrap(), 4, "first append lands at the zone start");
        assert_eq!(dev.append(4, &buf).unwrap(), 5, "second append advances the write pointer");
    }

    #[test]
    fn test_append_past_capacity_rejected() {
        let dev = small();
        let buf = vec![0u8; 512 * 2];
        dev.append(0, &buf).unwrap();
        dev.append(0, &buf).unwrap();
        assert_eq!(
            dev.append(0, &buf),
            Err(DeviceError::OutOfRange),
            "zone holds 4 pages, a fifth append must fail"
        );
    }

    #[test]
    fn test_reset_zeroes_zone() {
        let dev = small();
        let buf = vec![0x55u8; 512];
        dev.append(0, &buf).unwrap();
        dev.zone_reset(0).unwrap();
        let mut out = vec![0xFFu8; 512];
        dev.read(0, &mut out).unwrap();
        assert!(out.iter().all(|&b| b == 0), "reset zone reads back as zeros");
        assert_eq!(dev.append(0, &buf).unwrap(), 0, "write pointer rewinds on reset");
    }

    #[test]
    fn test_unwritten_pages_read_zero() {
        let dev = small();
        let mut out = vec![0xFFu8; 512];
        dev.read(7, &mut out).unwrap();
        assert!(out.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_unaligned_rejected() {
        let dev = small();
        let mut out = vec![0u8; 100];
        assert_eq!(dev.read(0, &mut out), Err(DeviceError::Unaligned));
        assert_eq!(dev.append(0, &out), Err(DeviceError::Unaligned));
        assert_eq!(dev.zone_reset(3), Err(DeviceError::Unaligned));
    }

    #[test]
    fn test_read_crosses_zone_boundary() {
        let dev = small();
        let a = vec![0x11u8; 512 * 4];
        let b = vec![0x22u8; 512 * 4];
        // Fill zone 0 and zone 1 (max_append_size is 4 pages here).
        dev.append(0, &a).unwrap();
        dev.append(4, &b).unwrap();
        let mut out = vec![0u8; 512 * 8];
        dev.read(0, &mut out).unwrap();
        assert!(out[..2048].iter().all(|&x| x == 0x11));
        assert!(out[2048..].iter().all(|&x| x == 0x22));
    }
}
