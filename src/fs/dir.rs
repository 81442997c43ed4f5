//! Directory block operations
//!
//! A directory file's data blocks hold 16 fixed-width `(name, inode)` slots
//! each; `file_size` on a directory inode counts entries ever appended,
//! including deletion sentinels. Entry `n` lives at slot `n % 16` of the
//! block at direct index `n / 16`; directories use the direct array only.

use super::error::FsError;
use super::layout::{DirBlock, DirSlot, Inode, DELETED_NAME, DIR_ENTRIES_PER_BLOCK, D_DIRECT};
use super::Lfs;

/// Direct-array index and in-block slot of directory entry `n`
fn entry_location(n: usize) -> (usize, usize) {
    (n / DIR_ENTRIES_PER_BLOCK, n % DIR_ENTRIES_PER_BLOCK)
}

impl Lfs {
    /// Scan a directory for a child by name
    pub(crate) fn find_child(&self, dir: &Inode, name: &str) -> Result<Option<u32>, FsError> {
        let count = dir.file_size as usize;
        let mut block = None;
        let mut loaded_index = usize::MAX;
        for n in 0..count {
            let (block_index, slot) = entry_location(n);
            if block_index != loaded_index {
                let addr = dir.direct[block_index];
                if addr == 0 {
                    return Ok(None);
                }
                block = Some(DirBlock::decode(&self.read_page(addr)?));
                loaded_index = block_index;
            }
            let entry = &block.as_ref().unwrap().slots[slot];
            if entry.name == name {
                return Ok(Some(entry.inode_no));
            }
        }
        Ok(None)
    }

    /// Append a child entry, allocating the tail block on first use
    pub(crate) fn update_parent(
        &self,
        dir: &mut Inode,
        name: &str,
        inode_no: u32,
    ) -> Result<(), FsError> {
        let count = dir.file_size as usize;
        let (block_index, slot) = entry_location(count);
        if block_index >= D_DIRECT {
            return Err(FsError::NoSpace);
        }
        let (addr, mut block) = if dir.direct[block_index] == 0 {
            let addr = self.alloc_data_block()?;
            dir.direct[block_index] = addr;
            (addr, DirBlock::empty())
        } else {
            let addr = dir.direct[block_index];
            (addr, DirBlock::decode(&self.read_page(addr)?))
        };
        block.slots[slot] = DirSlot {
            name: name.to_string(),
            inode_no,
        };
        self.write_page(addr, &block.encode())?;
        dir.file_size = count as u64 + 1;
        Ok(())
    }

    /// Rewrite a child's name field in place
    pub(crate) fn rename_child(&self, dir: &Inode, src: &str, dst: &str) -> Result<(), FsError> {
        self.rewrite_child_name(dir, src, dst)
    }

    /// Overwrite a child's name with the deletion sentinel
    ///
    /// The slot is never compacted; listing filters the sentinel out.
    pub(crate) fn remove_child(&self, dir: &Inode, name: &str) -> Result<(), FsError> {
        self.rewrite_child_name(dir, name, DELETED_NAME)
    }

    fn rewrite_child_name(&self, dir: &Inode, from: &str, to: &str) -> Result<(), FsError> {
        let count = dir.file_size as usize;
        for block_index in 0..count.div_ceil(DIR_ENTRIES_PER_BLOCK) {
            let addr = dir.direct[block_index];
            if addr == 0 {
                break;
            }
            let mut block = DirBlock::decode(&self.read_page(addr)?);
            let in_block = (count - block_index * DIR_ENTRIES_PER_BLOCK).min(DIR_ENTRIES_PER_BLOCK);
            for slot in &mut block.slots[..in_block] {
                if slot.name == from {
                    slot.name = to.to_string();
                    return self.write_page(addr, &block.encode());
                }
            }
        }
        Err(FsError::NotFound)
    }

    /// Collect live child names in entry order
    pub(crate) fn list_children(&self, dir: &Inode) -> Result<Vec<String>, FsError> {
        let count = dir.file_size as usize;
        let mut names = Vec::new();
        for block_index in 0..count.div_ceil(DIR_ENTRIES_PER_BLOCK) {
            let addr = dir.direct[block_index];
            if addr == 0 {
                break;
            }
            let block = DirBlock::decode(&self.read_page(addr)?);
            let in_block = (count - block_index * DIR_ENTRIES_PER_BLOCK).min(DIR_ENTRIES_PER_BLOCK);
            for slot in &block.slots[..in_block] {
                if !slot.name.is_empty() && !slot.is_deleted() {
                    names.push(slot.name.clone());
                }
            }
        }
        Ok(names)
    }
}
