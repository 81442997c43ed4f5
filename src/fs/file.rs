//! File data addressing and open-file handles
//!
//! `get_blocks_for_range` resolves a byte range to the data blocks backing
//! it, allocating any missing block and writing back every container it
//! dirties (the inode page, each touched indirect page). The three handle
//! types wrap that machinery for the access patterns of an embedded
//! key-value store: sequential scans, positional reads, buffered appends.

use super::error::FsError;
use super::layout::{IndirectBlock, Inode, D_DIRECT, INDIRECT_SLOTS, PAGE_SIZE};
use super::Lfs;
use std::sync::{Arc, Mutex};

impl Lfs {
    /// Data-block addresses covering `[offset, offset + size)`, in order
    ///
    /// Missing blocks are allocated into their slots; a dirtied indirect
    /// page is flushed before the walk moves past it and again at the end,
    /// and a dirtied inode page is flushed at the end.
    pub(crate) fn get_blocks_for_range(
        &self,
        inode: &mut Inode,
        offset: u64,
        size: usize,
    ) -> Result<Vec<u64>, FsError> {
        debug_assert!(size > 0);
        let first = (offset / PAGE_SIZE as u64) as usize;
        let last = ((offset + size as u64 - 1) / PAGE_SIZE as u64) as usize;
        let mut addrs = Vec::with_capacity(last - first + 1);
        let mut inode_dirty = false;

        // Cursor over the indirect chain; block indices only move forward.
        let mut chain: Option<(IndirectBlock, bool)> = None;
        let mut chain_index = 0usize;

        for index in first..=last {
            if index < D_DIRECT {
                if inode.direct[index] == 0 {
                    inode.direct[index] = self.alloc_data_block()?;
                    inode_dirty = true;
                }
                addrs.push(inode.direct[index]);
                continue;
            }
            let rel = index - D_DIRECT;
            let target_link = rel / INDIRECT_SLOTS;
            let slot = rel % INDIRECT_SLOTS;

            if chain.is_none() {
                chain = Some(if inode.indirect_ptr == 0 {
                    let addr = self.alloc_data_block()?;
                    inode.indirect_ptr = addr;
                    inode_dirty = true;
                    (IndirectBlock::new(addr), true)
                } else {
                    (self.load_indirect(inode.indirect_ptr)?, false)
                });
            }
            while chain_index < target_link {
                let (mut cur, cur_dirty) = chain.take().unwrap();
                chain = Some(if cur.next_indirect == 0 {
                    let addr = self.alloc_data_block()?;
                    cur.next_indirect = addr;
                    self.write_page(cur.current_addr, &cur.encode())?;
                    (IndirectBlock::new(addr), true)
                } else {
                    if cur_dirty {
                        self.write_page(cur.current_addr, &cur.encode())?;
                    }
                    (self.load_indirect(cur.next_indirect)?, false)
                });
                chain_index += 1;
            }
            let (cur, dirty) = chain.as_mut().unwrap();
            if cur.direct[slot] == 0 {
                cur.direct[slot] = self.alloc_data_block()?;
                *dirty = true;
            }
            addrs.push(cur.direct[slot]);
        }

        if let Some((cur, true)) = &chain {
            self.write_page(cur.current_addr, &cur.encode())?;
        }
        if inode_dirty {
            self.write_inode(inode)?;
        }
        Ok(addrs)
    }

    fn load_indirect(&self, addr: u64) -> Result<IndirectBlock, FsError> {
        let mut block = IndirectBlock::decode(&self.read_page(addr)?);
        // The stored self-address is zero for a link that was allocated but
        // never flushed; the address we loaded from is authoritative.
        block.current_addr = addr;
        Ok(block)
    }

    /// Return a file's data blocks and indirect chain to the allocator
    pub(crate) fn free_file_blocks(&self, inode: &Inode) -> Result<(), FsError> {
        for &addr in inode.direct.iter().filter(|&&a| a != 0) {
            self.free_data_block(addr);
        }
        let mut next = inode.indirect_ptr;
        while next != 0 {
            let block = self.load_indirect(next)?;
            for &addr in block.direct.iter().filter(|&&a| a != 0) {
                self.free_data_block(addr);
            }
            self.free_data_block(next);
            next = block.next_indirect;
        }
        Ok(())
    }
}

/// Shared core of the open-file handles
pub(crate) struct FileIo {
    fs: Arc<Lfs>,
    inode: Arc<Mutex<Inode>>,
}

impl FileIo {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize, FsError> {
        let mut inode = self.inode.lock().unwrap();
        let file_size = inode.file_size;
        if offset >= file_size || buf.is_empty() {
            return Ok(0);
        }
        let n = buf.len().min((file_size - offset) as usize);
        let addrs = self.fs.get_blocks_for_range(&mut inode, offset, n)?;
        drop(inode);
        let start = (offset % PAGE_SIZE as u64) as usize;
        let mut scratch = vec![0u8; addrs.len() * PAGE_SIZE];
        for (i, &addr) in addrs.iter().enumerate() {
            self.fs
                .ftl
                .read(addr, &mut scratch[i * PAGE_SIZE..(i + 1) * PAGE_SIZE])?;
        }
        buf[..n].copy_from_slice(&scratch[start..start + n]);
        Ok(n)
    }

    /// Write `data` at `offset`, read-modify-writing the first page only
    /// when the offset is not page-aligned
    fn append_at(&self, offset: u64, data: &[u8]) -> Result<(), FsError> {
        if data.is_empty() {
            return Ok(());
        }
        let mut inode = self.inode.lock().unwrap();
        let addrs = self.fs.get_blocks_for_range(&mut inode, offset, data.len())?;
        let start = (offset % PAGE_SIZE as u64) as usize;
        let mut pages = vec![0u8; addrs.len() * PAGE_SIZE];
        if start != 0 {
            self.fs.ftl.read(addrs[0], &mut pages[..PAGE_SIZE])?;
        }
        pages[start..start + data.len()].copy_from_slice(data);
        for (i, &addr) in addrs.iter().enumerate() {
            self.fs
                .ftl
                .write(addr, &pages[i * PAGE_SIZE..(i + 1) * PAGE_SIZE])?;
        }
        inode.file_size = inode.file_size.max(offset + data.len() as u64);
        Ok(())
    }

    fn size(&self) -> u64 {
        self.inode.lock().unwrap().file_size
    }
}

/// Cursor-based reader for sequential scans
pub struct SequentialFile {
    io: FileIo,
    offset: u64,
}

impl SequentialFile {
    pub(crate) fn new(fs: Arc<Lfs>, inode: Arc<Mutex<Inode>>) -> Self {
        Self {
            io: FileIo { fs, inode },
            offset: 0,
        }
    }

    /// Read up to `buf.len()` bytes at the cursor; returns the bytes read,
    /// zero at end of file
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize, FsError> {
        let n = self.io.read_at(self.offset, buf)?;
        self.offset += n as u64;
        Ok(n)
    }

    /// Advance the cursor without reading
    pub fn skip(&mut self, n: u64) -> Result<(), FsError> {
        if self.offset + n > self.io.size() {
            return Err(FsError::OutOfBounds);
        }
        self.offset += n;
        Ok(())
    }
}

/// Positional reader; usable from multiple threads through shared references
pub struct RandomAccessFile {
    io: FileIo,
}

impl RandomAccessFile {
    pub(crate) fn new(fs: Arc<Lfs>, inode: Arc<Mutex<Inode>>) -> Self {
        Self {
            io: FileIo { fs, inode },
        }
    }

    /// Read up to `buf.len()` bytes at `offset`; short reads clamp to the
    /// end of file
    pub fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize, FsError> {
        self.io.read_at(offset, buf)
    }
}

/// Append-only writer with coalescing
///
/// Appends below the configured limit are buffered in memory and written
/// out in one piece when the buffer crosses the limit, on `flush`, or on
/// close.
pub struct WritableFile {
    io: FileIo,
    cache: Vec<u8>,
    cache_limit: usize,
}

impl WritableFile {
    pub(crate) fn new(fs: Arc<Lfs>, inode: Arc<Mutex<Inode>>, cache_limit: usize) -> Self {
        Self {
            io: FileIo { fs, inode },
            cache: Vec::new(),
            cache_limit,
        }
    }

    /// Append bytes at the end of the file
    pub fn append(&mut self, data: &[u8]) -> Result<(), FsError> {
        if data.len() < self.cache_limit {
            self.cache.extend_from_slice(data);
            if self.cache.len() >= self.cache_limit {
                self.flush()?;
            }
            return Ok(());
        }
        // Large append: anything buffered goes out first to keep order.
        self.flush()?;
        self.io.append_at(self.io.size(), data)
    }

    /// Write out buffered appends
    pub fn flush(&mut self) -> Result<(), FsError> {
        if self.cache.is_empty() {
            return Ok(());
        }
        let data = core::mem::take(&mut self.cache);
        self.io.append_at(self.io.size(), &data)
    }

    /// Cut the file size; block allocations are kept for reuse
    pub fn truncate(&mut self, size: u64) -> Result<(), FsError> {
        self.flush()?;
        self.io.inode.lock().unwrap().file_size = size;
        Ok(())
    }

    /// File size including bytes still buffered
    pub fn file_size(&self) -> u64 {
        self.io.size() + self.cache.len() as u64
    }

    /// Flush and consume the handle
    pub fn close(mut self) -> Result<(), FsError> {
        self.flush()
    }
}

impl Drop for WritableFile {
    fn drop(&mut self) {
        if let Err(e) = self.flush() {
            log::error!("lfs: flush on close failed: {}", e);
        }
    }
}
