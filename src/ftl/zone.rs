//! Zone table and per-zone counters
//!
//! Every zone is identified by a small stable index into the table; mapping
//! entries and pool lists refer to zones by `ZoneId` only, never by pointer.
//! The two mutable counters sit behind one short-lived spinlock per zone and
//! obey the invariant `valid_pages <= write_ptr <= pages_per_zone`.

use crate::device::ZnsGeometry;
use spin::Mutex;

/// Stable identifier of a zone: its index in the [`ZoneTable`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ZoneId(pub u32);

#[derive(Debug, Clone, Copy, Default)]
struct ZoneCounters {
    /// Pages in this zone still referenced by the mapping
    valid_pages: u32,
    /// Next appendable page offset, increment-only until reset
    write_ptr: u32,
}

struct Zone {
    sppa: u64,
    counters: Mutex<ZoneCounters>,
}

/// Owns every `Zone` record; all counter access goes through the table
pub struct ZoneTable {
    zones: Vec<Zone>,
    pages_per_zone: u32,
}

impl ZoneTable {
    pub fn new(geometry: &ZnsGeometry) -> Self {
        let zones = (0..geometry.num_zones)
            .map(|i| Zone {
                sppa: geometry.zone_sppa(i),
                counters: Mutex::new(ZoneCounters::default()),
            })
            .collect();
        Self {
            zones,
            pages_per_zone: geometry.pages_per_zone,
        }
    }

    pub fn len(&self) -> usize {
        self.zones.len()
    }

    pub fn pages_per_zone(&self) -> u32 {
        self.pages_per_zone
    }

    /// Starting physical page address of the zone
    pub fn sppa(&self, id: ZoneId) -> u64 {
        self.zones[id.0 as usize].sppa
    }

    pub fn valid_pages(&self, id: ZoneId) -> u32 {
        self.zones[id.0 as usize].counters.lock().valid_pages
    }

    pub fn write_ptr(&self, id: ZoneId) -> u32 {
        self.zones[id.0 as usize].counters.lock().write_ptr
    }

    /// Increment `valid_pages`; every increment is paired with exactly one
    /// later [`sub_valid`](Self::sub_valid)
    pub fn add_valid(&self, id: ZoneId, pages: u32) {
        let mut c = self.zones[id.0 as usize].counters.lock();
        c.valid_pages += pages;
        debug_assert!(c.valid_pages <= self.pages_per_zone);
    }

    pub fn sub_valid(&self, id: ZoneId, pages: u32) {
        let mut c = self.zones[id.0 as usize].counters.lock();
        debug_assert!(c.valid_pages >= pages, "unbalanced valid_pages decrement");
        c.valid_pages -= pages;
    }

    /// Advance the tracked write pointer after reserving or appending pages
    pub fn advance_write_ptr(&self, id: ZoneId, pages: u32) {
        let mut c = self.zones[id.0 as usize].counters.lock();
        c.write_ptr += pages;
        debug_assert!(c.write_ptr <= self.pages_per_zone, "write pointer past zone capacity");
    }

    /// Zero both counters (zone was reset or freshly elected)
    pub fn reset_counters(&self, id: ZoneId) {
        *self.zones[id.0 as usize].counters.lock() = ZoneCounters::default();
    }

    /// Overwrite both counters (checkpoint restore)
    pub fn set_counters(&self, id: ZoneId, valid_pages: u32, write_ptr: u32) {
        *self.zones[id.0 as usize].counters.lock() = ZoneCounters {
            valid_pages,
            write_ptr,
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::ZnsGeometry;

    fn table() -> ZoneTable {
        ZoneTable::new(&ZnsGeometry {
            page_size: 4096,
            pages_per_zone: 8,
            num_zones: 4,
            max_transfer_size: 4096 * 64,
            max_append_size: 4096 * 2,
        })
    }

    #[test]
    fn test_sppa_is_zone_multiple() {
        let t = table();
        assert_eq!(t.sppa(ZoneId(0)), 0);
        assert_eq!(t.sppa(ZoneId(3)), 24);
    }

    #[test]
    fn test_counter_balance() {
        let t = table();
        let z = ZoneId(1);
        t.advance_write_ptr(z, 4);
        t.add_valid(z, 3);
        t.sub_valid(z, 1);
        assert_eq!(t.valid_pages(z), 2);
        assert_eq!(t.write_ptr(z), 4);
        assert!(t.valid_pages(z) <= t.write_ptr(z));
        t.reset_counters(z);
        assert_eq!(t.valid_pages(z), 0);
        assert_eq!(t.write_ptr(z), 0);
    }
}
