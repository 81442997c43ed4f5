//! Shutdown checkpoint
//!
//! The mapping state lives in memory; a graceful shutdown serializes it —
//! zone counters, pool membership, every block's data zone and page maps —
//! into one zone taken from the free list. Init scans zone start pages for
//! the checkpoint header and restores the state, then resets the checkpoint
//! zone back into the free pool.
//!
//! Layout, all fields little-endian:
//!
//! ```text
//! header page:
//!   @0   magic            u64  "ZLFSCKPT"
//!   @8   version          u32
//!   @12  num_zones        u32
//!   @16  pages_per_zone   u32
//!   @20  log_zones        u32
//!   @24  body_len         u64  bytes of body stream
//!   @32  body_checksum    u64  FNV-1a over the body
//!   @40  header_checksum  u64  FNV-1a over bytes 0..40
//! body stream (from the second page):
//!   per zone:   valid_pages u32, write_ptr u32
//!   free list:  count u32, zone ids u32...
//!   used list:  count u32, zone ids u32...
//!   current log zone: u32 (u32::MAX = none)
//!   per block:  data_zone u32 (u32::MAX = none),
//!               live entry count u32, entries (lpa u64, ppa u64, zone u32)...,
//!               snapshot entry count u32, entries likewise
//! ```
//!
//! Snapshot entries exist only when a merge was aborted by a device error;
//! they carry zone references the counters still account for, so they must
//! survive the restart.

use super::map::PageMapEntry;
use super::zone::ZoneId;
use super::{FtlError, FtlShared};

const MAGIC: u64 = u64::from_le_bytes(*b"ZLFSCKPT");
const VERSION: u32 = 1;
const HEADER_LEN: usize = 48;
const NO_ZONE: u32 = u32::MAX;

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash = 0xcbf29ce484222325u64;
    for &b in bytes {
        hash ^= b as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

struct Writer(Vec<u8>);

impl Writer {
    fn put_u32(&mut self, v: u32) {
        self.0.extend_from_slice(&v.to_le_bytes());
    }
    fn put_u64(&mut self, v: u64) {
        self.0.extend_from_slice(&v.to_le_bytes());
    }
    fn put_zone(&mut self, z: Option<ZoneId>) {
        self.put_u32(z.map(|z| z.0).unwrap_or(NO_ZONE));
    }
}

struct Reader<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, offset: 0 }
    }
    fn get_u32(&mut self) -> Option<u32> {
        let bytes = self.data.get(self.offset..self.offset + 4)?;
        self.offset += 4;
        Some(u32::from_le_bytes(bytes.try_into().unwrap()))
    }
    fn get_u64(&mut self) -> Option<u64> {
        let bytes = self.data.get(self.offset..self.offset + 8)?;
        self.offset += 8;
        Some(u64::from_le_bytes(bytes.try_into().unwrap()))
    }
    fn get_zone(&mut self) -> Option<Option<ZoneId>> {
        let raw = self.get_u32()?;
        Some(if raw == NO_ZONE { None } else { Some(ZoneId(raw)) })
    }
}

fn serialize_body(shared: &FtlShared) -> Vec<u8> {
    let mut w = Writer(Vec::new());
    for i in 0..shared.zones.len() as u32 {
        let id = ZoneId(i);
        w.put_u32(shared.zones.valid_pages(id));
        w.put_u32(shared.zones.write_ptr(id));
    }
    let (free, used, current) = shared.pool.dump();
    w.put_u32(free.len() as u32);
    for id in free {
        w.put_u32(id.0);
    }
    w.put_u32(used.len() as u32);
    for id in used {
        w.put_u32(id.0);
    }
    w.put_zone(current);
    for map in &shared.maps {
        let m = map.lock().unwrap();
        w.put_zone(m.data_zone);
        for list in [&m.page_maps, &m.old_page_maps] {
            w.put_u32(list.len() as u32);
            for e in list.iter() {
                w.put_u64(e.lpa);
                w.put_u64(e.ppa);
                w.put_u32(e.zone.0);
            }
        }
    }
    w.0
}

/// Write the checkpoint into a zone popped from the free list
///
/// Skipped with a warning when no free zone remains; the next init then
/// starts fresh, which is the documented best-effort contract.
pub(crate) fn write(shared: &FtlShared) -> Result<(), FtlError> {
    let Some(zone) = shared.pool.pop_free_for_gc() else {
        log::warn!("ftl: no free zone at shutdown, checkpoint skipped");
        return Ok(());
    };
    let page = shared.geometry.page_size;
    let body = serialize_body(shared);
    let body_pages = body.len().div_ceil(page);
    if 1 + body_pages > shared.geometry.pages_per_zone as usize {
        return Err(FtlError::CheckpointTooLarge);
    }

    let mut image = vec![0u8; (1 + body_pages) * page];
    image[0..8].copy_from_slice(&MAGIC.to_le_bytes());
    image[8..12].copy_from_slice(&VERSION.to_le_bytes());
    image[12..16].copy_from_slice(&shared.geometry.num_zones.to_le_bytes());
    image[16..20].copy_from_slice(&shared.geometry.pages_per_zone.to_le_bytes());
    image[20..24].copy_from_slice(&shared.config.log_zones.to_le_bytes());
    image[24..32].copy_from_slice(&(body.len() as u64).to_le_bytes());
    image[32..40].copy_from_slice(&fnv1a(&body).to_le_bytes());
    let header_checksum = fnv1a(&image[..40]);
    image[40..HEADER_LEN].copy_from_slice(&header_checksum.to_le_bytes());
    image[page..page + body.len()].copy_from_slice(&body);

    shared.append_to_data_zone(zone, &image)?;
    log::info!(
        "ftl: checkpoint written to zone {} ({} pages)",
        zone.0,
        1 + body_pages
    );
    Ok(())
}

/// Header fields parsed from a candidate start page
struct Header {
    log_zones: u32,
    body_len: usize,
    body_checksum: u64,
}

fn parse_header(page: &[u8], shared: &FtlShared) -> Option<Header> {
    let mut r = Reader::new(page);
    if r.get_u64()? != MAGIC || r.get_u32()? != VERSION {
        return None;
    }
    let num_zones = r.get_u32()?;
    let pages_per_zone = r.get_u32()?;
    let log_zones = r.get_u32()?;
    let body_len = r.get_u64()? as usize;
    let body_checksum = r.get_u64()?;
    let header_checksum = r.get_u64()?;
    if header_checksum != fnv1a(&page[..40]) {
        return None;
    }
    if num_zones != shared.geometry.num_zones || pages_per_zone != shared.geometry.pages_per_zone {
        log::warn!("ftl: checkpoint geometry mismatch, ignoring");
        return None;
    }
    Some(Header {
        log_zones,
        body_len,
        body_checksum,
    })
}

/// Scan for a checkpoint and restore it
///
/// Returns `true` when the previous state was restored.
pub(crate) fn load(shared: &FtlShared) -> Result<bool, FtlError> {
    let page = shared.geometry.page_size;
    let mut start_page = vec![0u8; page];
    for zi in 0..shared.geometry.num_zones {
        let sppa = shared.geometry.zone_sppa(zi);
        shared.device.read(sppa, &mut start_page)?;
        let Some(header) = parse_header(&start_page, shared) else {
            continue;
        };
        if header.log_zones != shared.config.log_zones {
            log::warn!(
                "ftl: checkpoint was taken with {} log zones, configured {}; ignoring",
                header.log_zones,
                shared.config.log_zones
            );
            continue;
        }
        let body_pages = header.body_len.div_ceil(page);
        let mut body = vec![0u8; body_pages * page];
        shared.device.read(sppa + 1, &mut body)?;
        body.truncate(header.body_len);
        if fnv1a(&body) != header.body_checksum {
            log::warn!("ftl: checkpoint body checksum mismatch, ignoring");
            continue;
        }
        let Some(state) = parse_body(shared, &body) else {
            log::warn!("ftl: truncated checkpoint body, ignoring");
            continue;
        };
        apply(shared, state);
        // The checkpoint zone itself goes back to the free pool.
        shared.device.zone_reset(sppa)?;
        shared.zones.reset_counters(ZoneId(zi));
        shared.pool.push_free(ZoneId(zi));
        log::info!("ftl: restored checkpoint from zone {}", zi);
        return Ok(true);
    }
    Ok(false)
}

/// Fully parsed checkpoint state, staged before any of it is applied
struct LoadedState {
    zone_counters: Vec<(u32, u32)>,
    free: Vec<ZoneId>,
    used: Vec<ZoneId>,
    current: Option<ZoneId>,
    blocks: Vec<(Option<ZoneId>, Vec<PageMapEntry>, Vec<PageMapEntry>)>,
}

fn parse_body(shared: &FtlShared, body: &[u8]) -> Option<LoadedState> {
    let mut r = Reader::new(body);
    let zone_counters = (0..shared.zones.len())
        .map(|_| Some((r.get_u32()?, r.get_u32()?)))
        .collect::<Option<Vec<_>>>()?;
    let free_len = r.get_u32()?;
    let free = (0..free_len)
        .map(|_| r.get_u32().map(ZoneId))
        .collect::<Option<Vec<_>>>()?;
    let used_len = r.get_u32()?;
    let used = (0..used_len)
        .map(|_| r.get_u32().map(ZoneId))
        .collect::<Option<Vec<_>>>()?;
    let current = r.get_zone()?;
    let mut blocks = Vec::with_capacity(shared.maps.len());
    for _ in 0..shared.maps.len() {
        let data_zone = r.get_zone()?;
        let mut lists = [Vec::new(), Vec::new()];
        for list in &mut lists {
            let count = r.get_u32()?;
            list.reserve(count as usize);
            for _ in 0..count {
                list.push(PageMapEntry {
                    lpa: r.get_u64()?,
                    ppa: r.get_u64()?,
                    zone: ZoneId(r.get_u32()?),
                });
            }
        }
        let [live, snapshot] = lists;
        blocks.push((data_zone, live, snapshot));
    }
    Some(LoadedState {
        zone_counters,
        free,
        used,
        current,
        blocks,
    })
}

fn apply(shared: &FtlShared, state: LoadedState) {
    for (i, (valid, write_ptr)) in state.zone_counters.into_iter().enumerate() {
        shared.zones.set_counters(ZoneId(i as u32), valid, write_ptr);
    }
    shared.pool.restore(state.free, state.used, state.current);
    for (map, (data_zone, live, snapshot)) in shared.maps.iter().zip(state.blocks) {
        let mut m = map.lock().unwrap();
        m.data_zone = data_zone;
        m.page_maps = live;
        m.old_page_maps = snapshot;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fnv1a_known_values() {
        // FNV-1a test vectors
        assert_eq!(fnv1a(b""), 0xcbf29ce484222325);
        assert_eq!(fnv1a(b"a"), 0xaf63dc4c8601ec8c);
    }

    #[test]
    fn test_reader_bounds() {
        let mut r = Reader::new(&[1, 0, 0, 0, 2, 0]);
        assert_eq!(r.get_u32(), Some(1));
        assert_eq!(r.get_u32(), None, "short read detected");
    }
}
