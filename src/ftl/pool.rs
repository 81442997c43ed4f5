//! Zone pool: free list, current log zone, used-log list
//!
//! All list membership changes happen under one mutex; a single condition
//! variable is notified on every change and carries both back-pressure
//! directions (writers waiting for a free log slot, the collector waiting for
//! used zones to pile up).

use super::zone::{ZoneId, ZoneTable};
use core::sync::atomic::{AtomicBool, Ordering};
use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};
use std::time::Duration;

/// Free zones retained for the collector's compaction output
const GC_RESERVE: usize = 1;

/// Interval at which blocked pool waits re-check the shutdown flag
const WAIT_TICK: Duration = Duration::from_millis(50);

#[derive(Default)]
struct PoolInner {
    free: VecDeque<ZoneId>,
    used_log: VecDeque<ZoneId>,
    current_log: Option<ZoneId>,
}

/// Snapshot of the pool counters, for invariant checks and logging
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolCounts {
    pub num_free: usize,
    pub num_used_log: usize,
    pub current_log_present: bool,
}

pub struct ZonePool {
    inner: Mutex<PoolInner>,
    changed: Condvar,
    num_log_zones: usize,
}

/// Outcome of a log-capacity reservation
pub struct LogChunk {
    pub zone: ZoneId,
    /// Pages reserved, `1..=requested`
    pub pages: u32,
    /// The reservation consumed the zone's last pages; the caller retires the
    /// zone once its append and map installs are done
    pub fills_zone: bool,
}

impl ZonePool {
    pub fn new(num_log_zones: usize) -> Self {
        Self {
            inner: Mutex::new(PoolInner::default()),
            changed: Condvar::new(),
            num_log_zones,
        }
    }

    pub fn counts(&self) -> PoolCounts {
        let inner = self.inner.lock().unwrap();
        PoolCounts {
            num_free: inner.free.len(),
            num_used_log: inner.used_log.len(),
            current_log_present: inner.current_log.is_some(),
        }
    }

    pub fn current_log(&self) -> Option<ZoneId> {
        self.inner.lock().unwrap().current_log
    }

    /// Append a zone to the free tail and wake all waiters
    pub fn push_free(&self, id: ZoneId) {
        let mut inner = self.inner.lock().unwrap();
        inner.free.push_back(id);
        drop(inner);
        self.changed.notify_all();
    }

    /// Wake every waiter without changing state (shutdown)
    pub fn wake_all(&self) {
        self.changed.notify_all();
    }

    /// Move a free zone to current-log with zeroed counters
    ///
    /// Fails when taking a zone would leave fewer than the GC reserve free.
    pub fn acquire_fresh_log_zone(&self, zones: &ZoneTable) -> Option<ZoneId> {
        let mut inner = self.inner.lock().unwrap();
        debug_assert!(inner.current_log.is_none());
        if inner.free.len() <= GC_RESERVE {
            return None;
        }
        Some(Self::activate_locked(&mut inner, zones))
    }

    fn activate_locked(inner: &mut PoolInner, zones: &ZoneTable) -> ZoneId {
        let id = inner.free.pop_front().unwrap();
        zones.reset_counters(id);
        inner.current_log = Some(id);
        log::debug!("ftl: zone {} elected current log", id.0);
        id
    }

    /// Reserve up to `max_pages` of log-zone capacity for one append
    ///
    /// Blocks while every log slot is used (admission control: the collector
    /// signals when it reclaims a zone) and while a concurrent writer is
    /// filling the zone's last pages. Advancing the write pointer under the
    /// pool mutex is what keeps concurrent appends from overrunning the zone.
    pub fn reserve_log_chunk(&self, zones: &ZoneTable, max_pages: u32) -> LogChunk {
        debug_assert!(max_pages > 0);
        let ppz = zones.pages_per_zone();
        let mut inner = self.inner.lock().unwrap();
        loop {
            if inner.current_log.is_none() {
                if inner.used_log.len() == self.num_log_zones || inner.free.len() <= GC_RESERVE {
                    inner = self.changed.wait_timeout(inner, WAIT_TICK).unwrap().0;
                    continue;
                }
                Self::activate_locked(&mut inner, zones);
            }
            let zone = inner.current_log.unwrap();
            let write_ptr = zones.write_ptr(zone);
            let remaining = ppz - write_ptr;
            if remaining == 0 {
                // The filling writer has not retired the zone yet.
                inner = self.changed.wait_timeout(inner, WAIT_TICK).unwrap().0;
                continue;
            }
            let pages = remaining.min(max_pages);
            zones.advance_write_ptr(zone, pages);
            return LogChunk {
                zone,
                pages,
                fills_zone: pages == remaining,
            };
        }
    }

    /// Append the filled current-log zone to the used-log tail
    pub fn retire_current_log_zone(&self, id: ZoneId) {
        let mut inner = self.inner.lock().unwrap();
        debug_assert_eq!(inner.current_log, Some(id));
        inner.current_log = None;
        inner.used_log.push_back(id);
        log::debug!("ftl: log zone {} retired, {} used", id.0, inner.used_log.len());
        drop(inner);
        self.changed.notify_all();
    }

    /// Pop a free zone for the collector's merge output
    ///
    /// Not subject to the reserve: the reserve exists for exactly this call.
    pub fn pop_free_for_gc(&self) -> Option<ZoneId> {
        self.inner.lock().unwrap().free.pop_front()
    }

    /// Unlink every used-log zone whose pages are all stale
    ///
    /// The caller resets the returned zones on device and pushes them back to
    /// the free tail.
    pub fn take_empty_used_log(&self, zones: &ZoneTable) -> Vec<ZoneId> {
        let mut inner = self.inner.lock().unwrap();
        let mut emptied = Vec::new();
        inner.used_log.retain(|&id| {
            if zones.valid_pages(id) == 0 {
                emptied.push(id);
                false
            } else {
                true
            }
        });
        emptied
    }

    /// Block until the free-slot watermark drops to `gc_trigger`
    ///
    /// Returns `false` when `running` was cleared while waiting.
    pub fn wait_for_gc_trigger(&self, running: &AtomicBool, gc_trigger: u32) -> bool {
        let mut inner = self.inner.lock().unwrap();
        loop {
            if !running.load(Ordering::Acquire) {
                return false;
            }
            if (self.num_log_zones - inner.used_log.len()) as u32 <= gc_trigger {
                return true;
            }
            inner = self.changed.wait_timeout(inner, WAIT_TICK).unwrap().0;
        }
    }

    /// Brief wait for pool activity (victim scan came up empty)
    pub fn wait_brief(&self) {
        let inner = self.inner.lock().unwrap();
        let _ = self.changed.wait_timeout(inner, WAIT_TICK).unwrap();
    }

    /// Replace the pool membership wholesale (checkpoint restore)
    pub fn restore(&self, free: Vec<ZoneId>, used_log: Vec<ZoneId>, current_log: Option<ZoneId>) {
        let mut inner = self.inner.lock().unwrap();
        inner.free = free.into();
        inner.used_log = used_log.into();
        inner.current_log = current_log;
    }

    /// Dump the pool membership in list order (checkpoint write)
    pub fn dump(&self) -> (Vec<ZoneId>, Vec<ZoneId>, Option<ZoneId>) {
        let inner = self.inner.lock().unwrap();
        (
            inner.free.iter().copied().collect(),
            inner.used_log.iter().copied().collect(),
            inner.current_log,
        )
    }
}
