//! Host-managed flash translation layer for zoned namespaces
//!
//! Exposes a byte-addressable, random-write block space over a device that
//! only supports sequential appends within reset-only zones. Out-of-place
//! updates land in log zones and are tracked by per-block page maps; a
//! background collector merges log pages back into per-block data zones.

pub mod checkpoint;
pub mod gc;
pub mod map;
pub mod pool;
pub mod zone;

use crate::device::{DeviceError, ZnsDevice, ZnsGeometry};
use core::fmt;
use core::sync::atomic::{AtomicBool, Ordering};
use map::BlockMap;
use pool::{PoolCounts, ZonePool};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use zone::{ZoneId, ZoneTable};

/// FTL initialization parameters
#[derive(Debug, Clone, Copy)]
pub struct FtlConfig {
    /// Zones set aside for the append log
    pub log_zones: u32,
    /// GC runs while the count of unused log-zone slots is at or below this
    pub gc_trigger: u32,
    /// Reset every zone at init instead of looking for a shutdown checkpoint
    pub force_reset: bool,
}

impl Default for FtlConfig {
    fn default() -> Self {
        Self {
            log_zones: 3,
            gc_trigger: 1,
            force_reset: false,
        }
    }
}

/// FTL error conditions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FtlError {
    /// A device command failed
    Device(DeviceError),
    /// No free zone available
    NoFreeZone,
    /// Byte address or length is not page-aligned
    Unaligned,
    /// Address range exceeds the logical capacity
    OutOfRange,
    /// Rejected configuration (log zones vs namespace size, trigger)
    InvalidConfig,
    /// The GC worker thread could not be spawned
    WorkerSpawn,
    /// Mapping state does not fit one zone's checkpoint capacity
    CheckpointTooLarge,
}

impl fmt::Display for FtlError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FtlError::Device(e) => write!(f, "device error: {}", e),
            FtlError::NoFreeZone => write!(f, "no free zone"),
            FtlError::Unaligned => write!(f, "I/O not page-aligned"),
            FtlError::OutOfRange => write!(f, "address out of range"),
            FtlError::InvalidConfig => write!(f, "invalid FTL configuration"),
            FtlError::WorkerSpawn => write!(f, "failed to spawn GC worker"),
            FtlError::CheckpointTooLarge => write!(f, "checkpoint exceeds zone capacity"),
        }
    }
}

impl From<DeviceError> for FtlError {
    fn from(e: DeviceError) -> Self {
        FtlError::Device(e)
    }
}

/// State shared between callers and the GC worker
pub(crate) struct FtlShared {
    pub(crate) device: Arc<dyn ZnsDevice>,
    pub(crate) geometry: ZnsGeometry,
    pub(crate) config: FtlConfig,
    pub(crate) zones: ZoneTable,
    pub(crate) pool: ZonePool,
    /// One map per logical block, indexed by `lpa / pages_per_zone`
    pub(crate) maps: Vec<Mutex<BlockMap>>,
    pub(crate) run_gc: AtomicBool,
}

impl FtlShared {
    pub(crate) fn max_append_pages(&self) -> u32 {
        (self.geometry.max_append_size / self.geometry.page_size) as u32
    }

    /// Reset a zone on device, zero its counters, return it to the free tail
    pub(crate) fn release_empty_zone(&self, id: ZoneId) -> Result<(), FtlError> {
        self.device.zone_reset(self.zones.sppa(id))?;
        self.zones.reset_counters(id);
        self.pool.push_free(id);
        Ok(())
    }

    /// Append page-aligned data to a zone, splitting at the append limit,
    /// advancing the tracked write pointer chunk by chunk
    pub(crate) fn append_to_data_zone(&self, zone: ZoneId, data: &[u8]) -> Result<(), FtlError> {
        let sppa = self.zones.sppa(zone);
        for chunk in data.chunks(self.geometry.max_append_size) {
            self.device.append(sppa, chunk)?;
            self.zones
                .advance_write_ptr(zone, (chunk.len() / self.geometry.page_size) as u32);
        }
        Ok(())
    }
}

/// The translation layer: a random-write page space over log-structured zones
pub struct Ftl {
    shared: Arc<FtlShared>,
    gc_worker: Option<JoinHandle<()>>,
}

impl Ftl {
    /// Bring up the FTL over a device
    ///
    /// With `force_reset` every zone is wiped. Otherwise the zones are
    /// scanned for a shutdown checkpoint and the previous mapping state is
    /// restored; if none is found the device is treated as fresh.
    pub fn init(config: FtlConfig, device: Arc<dyn ZnsDevice>) -> Result<Self, FtlError> {
        let geometry = device.identify()?;
        // A zero trigger lets writers exhaust the free list without ever
        // waking the collector; at least one slot of headroom is required.
        if config.log_zones == 0
            || config.log_zones >= geometry.num_zones
            || config.gc_trigger == 0
            || config.gc_trigger > config.log_zones
        {
            return Err(FtlError::InvalidConfig);
        }
        let num_data_zones = geometry.num_zones - config.log_zones;
        let ppz = geometry.pages_per_zone as u64;

        let shared = Arc::new(FtlShared {
            zones: ZoneTable::new(&geometry),
            pool: ZonePool::new(config.log_zones as usize),
            maps: (0..num_data_zones)
                .map(|i| Mutex::new(BlockMap::new(i as u64 * ppz)))
                .collect(),
            device,
            geometry,
            config,
            run_gc: AtomicBool::new(true),
        });

        let restored = if config.force_reset {
            false
        } else {
            checkpoint::load(&shared)?
        };
        if !restored {
            if !config.force_reset {
                log::warn!("ftl: no checkpoint found, initializing fresh");
            }
            for i in 0..geometry.num_zones {
                shared.device.zone_reset(geometry.zone_sppa(i))?;
                shared.pool.push_free(ZoneId(i));
            }
            shared
                .pool
                .acquire_fresh_log_zone(&shared.zones)
                .ok_or(FtlError::NoFreeZone)?;
        }
        log::info!(
            "ftl: initialized, {} zones ({} log), {} pages/zone, page size {}",
            geometry.num_zones,
            config.log_zones,
            geometry.pages_per_zone,
            geometry.page_size
        );

        let worker_shared = Arc::clone(&shared);
        let gc_worker = std::thread::Builder::new()
            .name("zlfs-gc".into())
            .spawn(move || gc::run(worker_shared))
            .map_err(|_| FtlError::WorkerSpawn)?;

        Ok(Self {
            shared,
            gc_worker: Some(gc_worker),
        })
    }

    pub fn geometry(&self) -> &ZnsGeometry {
        &self.shared.geometry
    }

    pub fn num_data_zones(&self) -> u32 {
        self.shared.maps.len() as u32
    }

    /// Usable byte capacity of the logical address space
    pub fn capacity_bytes(&self) -> u64 {
        self.shared.maps.len() as u64 * self.shared.geometry.zone_capacity() as u64
    }

    fn check_range(&self, address: u64, len: usize) -> Result<(), FtlError> {
        let page = self.shared.geometry.page_size;
        if address % page as u64 != 0 || len % page != 0 {
            return Err(FtlError::Unaligned);
        }
        let end = address + len as u64;
        if end > self.capacity_bytes() {
            return Err(FtlError::OutOfRange);
        }
        Ok(())
    }

    /// Read page-aligned bytes from the logical space
    ///
    /// Pages never written read as zeros. The block lock is held across each
    /// page's device read so the collector cannot reset the resolved source
    /// zone mid-read (releasing a consumed source requires this lock).
    pub fn read(&self, address: u64, buf: &mut [u8]) -> Result<(), FtlError> {
        self.check_range(address, buf.len())?;
        let shared = &self.shared;
        let page = shared.geometry.page_size;
        let ppz = shared.geometry.pages_per_zone as u64;
        let first_lpa = address / page as u64;
        for (i, slot) in buf.chunks_mut(page).enumerate() {
            let lpa = first_lpa + i as u64;
            let block = (lpa / ppz) as usize;
            let guard = shared.maps[block].lock().unwrap();
            match guard.lookup(lpa, &shared.zones) {
                Some(ppa) => shared.device.read(ppa, slot)?,
                None => slot.fill(0),
            }
        }
        Ok(())
    }

    /// Write page-aligned bytes to the logical space
    ///
    /// The payload is split at logical-block boundaries; each block's slice
    /// takes the direct data-zone fast path when possible and the append log
    /// otherwise.
    pub fn write(&self, address: u64, buf: &[u8]) -> Result<(), FtlError> {
        self.check_range(address, buf.len())?;
        let page = self.shared.geometry.page_size;
        let ppz = self.shared.geometry.pages_per_zone as u64;
        let first_lpa = address / page as u64;
        let total_pages = buf.len() / page;
        let mut done = 0usize;
        while done < total_pages {
            let lpa = first_lpa + done as u64;
            let block = (lpa / ppz) as usize;
            let offset_in_block = (lpa % ppz) as u32;
            let take = (total_pages - done).min((ppz - offset_in_block as u64) as usize);
            self.write_block(block, lpa, offset_in_block, &buf[done * page..(done + take) * page])?;
            done += take;
        }
        Ok(())
    }

    /// Write one block's slice of the payload
    fn write_block(
        &self,
        block: usize,
        first_lpa: u64,
        offset_in_block: u32,
        payload: &[u8],
    ) -> Result<(), FtlError> {
        let shared = &self.shared;
        let page = shared.geometry.page_size;
        let ppz = shared.geometry.pages_per_zone;

        // Fast path: the block lock is held across the data-zone appends so
        // the write pointer cannot move under us and merges cannot rotate.
        {
            let guard = shared.maps[block].lock().unwrap();
            if guard.old_page_maps.is_empty() {
                if let Some(data_zone) = guard.data_zone {
                    let write_ptr = shared.zones.write_ptr(data_zone);
                    let pages = (payload.len() / page) as u64;
                    if write_ptr < ppz
                        && offset_in_block >= write_ptr
                        && !guard.has_live_entry_in(first_lpa, first_lpa + pages)
                    {
                        let pad_pages = offset_in_block - write_ptr;
                        if pad_pages > 0 {
                            let nulls = vec![0u8; pad_pages as usize * page];
                            shared.append_to_data_zone(data_zone, &nulls)?;
                        }
                        shared.append_to_data_zone(data_zone, payload)?;
                        return Ok(());
                    }
                }
            }
        }

        // Slow path: out-of-place appends to the current log zone.
        let total = payload.len() / page;
        let mut done = 0usize;
        let mut lpa = first_lpa;
        while done < total {
            let want = shared.max_append_pages().min((total - done) as u32);
            let chunk = shared.pool.reserve_log_chunk(&shared.zones, want);
            let take = chunk.pages as usize;
            let data = &payload[done * page..(done + take) * page];
            let appended = shared.device.append(shared.zones.sppa(chunk.zone), data);
            match appended {
                Ok(ppa) => {
                    let mut m = shared.maps[block].lock().unwrap();
                    for i in 0..take as u64 {
                        m.install(lpa + i, ppa + i, chunk.zone, &shared.zones);
                    }
                    drop(m);
                    if chunk.fills_zone {
                        shared.pool.retire_current_log_zone(chunk.zone);
                    }
                    done += take;
                    lpa += take as u64;
                }
                Err(e) => {
                    // Retire anyway so other writers do not wait on a zone
                    // whose reserved tail will never be appended.
                    if chunk.fills_zone {
                        shared.pool.retire_current_log_zone(chunk.zone);
                    }
                    return Err(e.into());
                }
            }
        }
        Ok(())
    }

    /// Resolve one LPA the way the read path would
    pub fn lookup(&self, lpa: u64) -> Option<u64> {
        let ppz = self.shared.geometry.pages_per_zone as u64;
        let block = (lpa / ppz) as usize;
        if block >= self.shared.maps.len() {
            return None;
        }
        self.shared.maps[block].lock().unwrap().lookup(lpa, &self.shared.zones)
    }

    /// Pool membership counters
    pub fn pool_counts(&self) -> PoolCounts {
        self.shared.pool.counts()
    }

    /// Index of the zone currently receiving log appends, if one is elected
    pub fn current_log_zone(&self) -> Option<u32> {
        self.shared.pool.current_log().map(|z| z.0)
    }

    /// `(valid_pages, write_ptr)` of a zone by index
    pub fn zone_counters(&self, zone_index: u32) -> (u32, u32) {
        let id = ZoneId(zone_index);
        (self.shared.zones.valid_pages(id), self.shared.zones.write_ptr(id))
    }

    /// Index of the zone serving as a block's merged baseline, if any
    pub fn data_zone_of_block(&self, block: usize) -> Option<u32> {
        self.shared.maps[block].lock().unwrap().data_zone.map(|z| z.0)
    }

    /// LPAs of a block's live log entries, in map order
    pub fn block_log_lpas(&self, block: usize) -> Vec<u64> {
        self.shared.maps[block]
            .lock()
            .unwrap()
            .page_maps
            .iter()
            .map(|e| e.lpa)
            .collect()
    }

    fn stop_gc(&mut self) {
        self.shared.run_gc.store(false, Ordering::Release);
        self.shared.pool.wake_all();
        if let Some(handle) = self.gc_worker.take() {
            let _ = handle.join();
        }
    }

    /// Graceful shutdown: stop the collector and checkpoint the mapping state
    pub fn deinit(mut self) -> Result<(), FtlError> {
        self.stop_gc();
        checkpoint::write(&self.shared)?;
        log::info!("ftl: deinitialized");
        Ok(())
    }
}

impl Drop for Ftl {
    fn drop(&mut self) {
        self.stop_gc();
    }
}
