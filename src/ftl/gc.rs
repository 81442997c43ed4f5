//! Garbage collection worker
//!
//! A single background thread that waits for log zones to pile up, merges one
//! logical block's log pages (plus its previous data-zone baseline) into a
//! fresh data zone, and reclaims log zones whose pages are all stale.
//! Cancellation is cooperative: the shutdown flag is checked before every
//! blocking step.

use super::map::PageMapEntry;
use super::zone::ZoneId;
use super::{FtlError, FtlShared};
use core::sync::atomic::Ordering;
use std::sync::Arc;

/// Worker entry point; returns when the shutdown flag is cleared
pub(crate) fn run(shared: Arc<FtlShared>) {
    log::info!("gc: worker started, trigger {}", shared.config.gc_trigger);
    let mut cursor = 0usize;
    while shared.run_gc.load(Ordering::Acquire) {
        if !shared
            .pool
            .wait_for_gc_trigger(&shared.run_gc, shared.config.gc_trigger)
        {
            break;
        }
        reclaim(&shared);
        if !shared.run_gc.load(Ordering::Acquire) {
            break;
        }
        let Some(victim) = find_victim(&shared, &mut cursor) else {
            // Trigger held but nothing mergeable yet; wait for writer activity.
            shared.pool.wait_brief();
            continue;
        };
        let Some(new_zone) = shared.pool.pop_free_for_gc() else {
            shared.pool.wait_brief();
            continue;
        };
        match merge(&shared, victim, new_zone) {
            Ok(()) => {
                log::debug!("gc: merged block {} into zone {}", victim, new_zone.0);
            }
            Err(e) => {
                // The snapshot stays in old_page_maps and still serves reads;
                // the next merge of this block folds it back in.
                log::error!("gc: merge of block {} failed: {}", victim, e);
                if let Err(e) = shared.release_empty_zone(new_zone) {
                    log::error!("gc: failed to release merge output zone: {}", e);
                }
            }
        }
        reclaim(&shared);
    }
    log::info!("gc: worker stopped");
}

/// Reset and free every used-log zone with no valid pages left
fn reclaim(shared: &FtlShared) {
    let emptied = shared.pool.take_empty_used_log(&shared.zones);
    for id in emptied {
        match shared.release_empty_zone(id) {
            Ok(()) => log::debug!("gc: reclaimed log zone {}", id.0),
            Err(e) => log::error!("gc: failed to reclaim zone {}: {}", id.0, e),
        }
    }
}

/// Round-robin scan for the next block with live log entries
fn find_victim(shared: &FtlShared, cursor: &mut usize) -> Option<usize> {
    let num_blocks = shared.maps.len();
    for _ in 0..num_blocks {
        let index = *cursor;
        *cursor = (*cursor + 1) % num_blocks;
        if !shared.maps[index].lock().unwrap().page_maps.is_empty() {
            return Some(index);
        }
    }
    None
}

/// Merge one logical block into `new_zone`
///
/// The block lock is held only to rotate `page_maps` into `old_page_maps` and
/// again to publish the result; the copy loop runs without it. Readers keep
/// resolving through the snapshot and the old baseline for the whole merge.
pub(crate) fn merge(shared: &FtlShared, block: usize, new_zone: ZoneId) -> Result<(), FtlError> {
    let page = shared.geometry.page_size;
    let map = &shared.maps[block];

    let (entries, old_zone, base_lpa) = {
        let mut m = map.lock().unwrap();
        m.rotate_for_merge(&shared.zones);
        (m.old_page_maps.clone(), m.data_zone, m.base_lpa)
    };
    // Rotation disabled the fast path, so the old baseline cannot grow.
    let old_write_ptr = old_zone.map(|z| shared.zones.write_ptr(z)).unwrap_or(0);
    let old_sppa = old_zone.map(|z| shared.zones.sppa(z)).unwrap_or(0);

    let last_live = last_live_offset(&entries, base_lpa, old_write_ptr);
    let Some(last_live) = last_live else {
        // Victim had no sources after all (raced with a concurrent merge).
        shared.pool.push_free(new_zone);
        return Ok(());
    };

    let batch_pages = shared.max_append_pages() as usize;
    let mut batch = vec![0u8; batch_pages * page];
    let mut filled = 0usize;
    let mut next_entry = 0usize;
    let new_sppa = shared.zones.sppa(new_zone);

    for offset in 0..=last_live {
        let lpa = base_lpa + offset as u64;
        let slot = &mut batch[filled * page..(filled + 1) * page];
        if next_entry < entries.len() && entries[next_entry].lpa == lpa {
            shared.device.read(entries[next_entry].ppa, slot)?;
            next_entry += 1;
        } else if offset < old_write_ptr {
            shared.device.read(old_sppa + offset as u64, slot)?;
        }
        // else: a hole; the zero-filled slot stands in for the page.
        filled += 1;
        if filled == batch_pages || offset == last_live {
            shared.device.append(new_sppa, &batch[..filled * page])?;
            shared.zones.advance_write_ptr(new_zone, filled as u32);
            batch.fill(0);
            filled = 0;
        }
    }

    // Publish: every snapshot entry was consumed above.
    let prior = {
        let mut m = map.lock().unwrap();
        for entry in &m.old_page_maps {
            shared.zones.sub_valid(entry.zone, 1);
        }
        m.old_page_maps.clear();
        m.data_zone.replace(new_zone)
    };
    if let Some(prior) = prior {
        shared.release_empty_zone(prior)?;
    }
    Ok(())
}

/// Highest block offset covered by any merge source
fn last_live_offset(entries: &[PageMapEntry], base_lpa: u64, old_write_ptr: u32) -> Option<u32> {
    let from_log = entries.last().map(|e| (e.lpa - base_lpa) as u32);
    let from_data = old_write_ptr.checked_sub(1);
    match (from_log, from_data) {
        (Some(a), Some(b)) => Some(a.max(b)),
        (Some(a), None) => Some(a),
        (None, Some(b)) => Some(b),
        (None, None) => None,
    }
}
