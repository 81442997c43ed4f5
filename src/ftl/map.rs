//! Logical-to-physical page mapping
//!
//! One `BlockMap` per logical block, guarded by a `std::sync::Mutex` in the
//! FTL. `page_maps` is kept sorted by strictly ascending LPA so a merge is a
//! single linear pass; `old_page_maps` is the snapshot a merge is draining,
//! still visible to readers.

use super::zone::{ZoneId, ZoneTable};

/// Location in a log zone of one rewritten page
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageMapEntry {
    pub lpa: u64,
    pub ppa: u64,
    /// Owner of the physical page, for `valid_pages` accounting
    pub zone: ZoneId,
}

/// Mapping state of one logical block
pub struct BlockMap {
    /// First LPA of this block's range
    pub base_lpa: u64,
    /// Live log entries, strictly ascending by LPA
    pub page_maps: Vec<PageMapEntry>,
    /// Snapshot taken at merge start; drained by the collector
    pub old_page_maps: Vec<PageMapEntry>,
    /// Zone holding the merged, offset-aligned snapshot, if any merge ran
    pub data_zone: Option<ZoneId>,
}

impl BlockMap {
    pub fn new(base_lpa: u64) -> Self {
        Self {
            base_lpa,
            page_maps: Vec::new(),
            old_page_maps: Vec::new(),
            data_zone: None,
        }
    }

    /// Resolve an LPA to the physical page currently backing it
    ///
    /// Search order: live log entries, then the merge-in-flight snapshot,
    /// then the data zone baseline at `sppa + offset` for offsets below the
    /// zone's write pointer. `None` means the page was never written; the
    /// read path substitutes zeros.
    pub fn lookup(&self, lpa: u64, zones: &ZoneTable) -> Option<u64> {
        if let Ok(i) = self.page_maps.binary_search_by_key(&lpa, |e| e.lpa) {
            return Some(self.page_maps[i].ppa);
        }
        if let Ok(i) = self.old_page_maps.binary_search_by_key(&lpa, |e| e.lpa) {
            return Some(self.old_page_maps[i].ppa);
        }
        let offset = lpa - self.base_lpa;
        self.data_zone
            .filter(|&z| offset < zones.write_ptr(z) as u64)
            .map(|z| zones.sppa(z) + offset)
    }

    /// Insert or update the entry for `lpa`, preserving ascending order
    ///
    /// An overwrite decrements the previous owner's `valid_pages`; the new
    /// owner's count is incremented unconditionally.
    pub fn install(&mut self, lpa: u64, ppa: u64, zone: ZoneId, zones: &ZoneTable) {
        match self.page_maps.binary_search_by_key(&lpa, |e| e.lpa) {
            Ok(i) => {
                let prev = self.page_maps[i];
                zones.sub_valid(prev.zone, 1);
                self.page_maps[i] = PageMapEntry { lpa, ppa, zone };
            }
            Err(i) => {
                self.page_maps.insert(i, PageMapEntry { lpa, ppa, zone });
            }
        }
        zones.add_valid(zone, 1);
    }

    /// Any live log entry with an LPA in `[lo, hi)`
    ///
    /// The fast path must not append a range the log still shadows: the log
    /// entry would keep winning lookups over the freshly appended baseline.
    pub fn has_live_entry_in(&self, lo: u64, hi: u64) -> bool {
        let start = self.page_maps.partition_point(|e| e.lpa < lo);
        self.page_maps.get(start).is_some_and(|e| e.lpa < hi)
    }

    /// Rotate the live entries into the merge snapshot
    ///
    /// Normally `old_page_maps` is empty here. After an aborted merge it is
    /// not; the leftovers fold in, a live entry shadowing a leftover for the
    /// same LPA (the leftover's owner loses its reference).
    pub fn rotate_for_merge(&mut self, zones: &ZoneTable) {
        let fresh = core::mem::take(&mut self.page_maps);
        if self.old_page_maps.is_empty() {
            self.old_page_maps = fresh;
            return;
        }
        let stale = core::mem::take(&mut self.old_page_maps);
        let mut merged = Vec::with_capacity(stale.len() + fresh.len());
        let (mut si, mut fi) = (0, 0);
        while si < stale.len() && fi < fresh.len() {
            if stale[si].lpa < fresh[fi].lpa {
                merged.push(stale[si]);
                si += 1;
            } else if stale[si].lpa > fresh[fi].lpa {
                merged.push(fresh[fi]);
                fi += 1;
            } else {
                zones.sub_valid(stale[si].zone, 1);
                merged.push(fresh[fi]);
                si += 1;
                fi += 1;
            }
        }
        merged.extend_from_slice(&stale[si..]);
        merged.extend_from_slice(&fresh[fi..]);
        self.old_page_maps = merged;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::ZnsGeometry;

    fn zones() -> ZoneTable {
        ZoneTable::new(&ZnsGeometry {
            page_size: 4096,
            pages_per_zone: 8,
            num_zones: 4,
            max_transfer_size: 4096 * 64,
            max_append_size: 4096 * 2,
        })
    }

    #[test]
    fn test_install_keeps_ascending_order() {
        let zt = zones();
        let mut map = BlockMap::new(0);
        for lpa in [5u64, 1, 3, 7, 0] {
            map.install(lpa, 100 + lpa, ZoneId(0), &zt);
        }
        let lpas: Vec<u64> = map.page_maps.iter().map(|e| e.lpa).collect();
        assert_eq!(lpas, vec![0, 1, 3, 5, 7]);
        assert!(lpas.windows(2).all(|w| w[0] < w[1]), "LPAs strictly ascending");
        assert_eq!(zt.valid_pages(ZoneId(0)), 5);
    }

    #[test]
    fn test_overwrite_moves_valid_count() {
        let zt = zones();
        let mut map = BlockMap::new(0);
        map.install(3, 103, ZoneId(0), &zt);
        map.install(3, 211, ZoneId(1), &zt);
        assert_eq!(map.lookup(3, &zt), Some(211));
        assert_eq!(zt.valid_pages(ZoneId(0)), 0, "old owner released");
        assert_eq!(zt.valid_pages(ZoneId(1)), 1);
        assert_eq!(map.page_maps.len(), 1);
    }

    #[test]
    fn test_lookup_falls_back_to_data_zone() {
        let zt = zones();
        let mut map = BlockMap::new(16);
        map.data_zone = Some(ZoneId(3));
        zt.advance_write_ptr(ZoneId(3), 4);
        assert_eq!(map.lookup(18, &zt), Some(zt.sppa(ZoneId(3)) + 2));
        map.install(18, 7, ZoneId(0), &zt);
        assert_eq!(map.lookup(18, &zt), Some(7), "log entry wins over baseline");
    }

    #[test]
    fn test_lookup_past_data_zone_write_ptr_is_unmapped() {
        let zt = zones();
        let mut map = BlockMap::new(16);
        map.data_zone = Some(ZoneId(3));
        zt.advance_write_ptr(ZoneId(3), 4);
        assert_eq!(
            map.lookup(20, &zt),
            None,
            "offset at the write pointer was never merged"
        );
        assert_eq!(map.lookup(23, &zt), None);
    }

    #[test]
    fn test_lookup_unmapped() {
        let zt = zones();
        let map = BlockMap::new(0);
        assert_eq!(map.lookup(4, &zt), None);
    }

    #[test]
    fn test_lookup_prefers_snapshot_over_data_zone() {
        let zt = zones();
        let mut map = BlockMap::new(0);
        map.install(2, 42, ZoneId(1), &zt);
        map.rotate_for_merge(&zt);
        map.data_zone = Some(ZoneId(3));
        assert!(map.page_maps.is_empty());
        assert_eq!(map.lookup(2, &zt), Some(42), "snapshot still serves reads");
    }

    #[test]
    fn test_has_live_entry_in() {
        let zt = zones();
        let mut map = BlockMap::new(0);
        map.install(2, 10, ZoneId(0), &zt);
        map.install(6, 11, ZoneId(0), &zt);
        assert!(map.has_live_entry_in(0, 3));
        assert!(map.has_live_entry_in(6, 8));
        assert!(!map.has_live_entry_in(3, 6), "gap between entries is clear");
        assert!(!map.has_live_entry_in(7, 20));
    }

    #[test]
    fn test_rotate_folds_aborted_snapshot() {
        let zt = zones();
        let mut map = BlockMap::new(0);
        map.install(1, 10, ZoneId(0), &zt);
        map.install(4, 11, ZoneId(0), &zt);
        map.rotate_for_merge(&zt);
        // Writers land new versions while the first merge is aborted.
        map.install(4, 20, ZoneId(1), &zt);
        map.install(6, 21, ZoneId(1), &zt);
        map.rotate_for_merge(&zt);
        let lpas: Vec<u64> = map.old_page_maps.iter().map(|e| e.lpa).collect();
        assert_eq!(lpas, vec![1, 4, 6]);
        assert_eq!(map.lookup(4, &zt), Some(20), "newer version shadows the leftover");
        assert_eq!(zt.valid_pages(ZoneId(0)), 1, "shadowed leftover released");
        assert_eq!(zt.valid_pages(ZoneId(1)), 2);
    }
}
