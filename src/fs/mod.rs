//! Log-structured filesystem over the FTL's page space
//!
//! A flat hierarchy of directories and regular files sufficient to back an
//! embedded key-value store: sequential and random reads, append writes,
//! rename and delete. The superblock and inode table live at fixed pages;
//! file data lives in allocator-managed 4 KiB blocks addressed through each
//! inode's direct array and indirect chain.

pub mod alloc;
pub mod dir;
pub mod error;
pub mod file;
pub mod layout;
pub mod path;

use crate::ftl::Ftl;
use error::FsError;
use self::alloc::Bitmap;
use file::{RandomAccessFile, SequentialFile, WritableFile};
use layout::{
    Inode, Superblock, DATA_BITMAP_BYTES, DATA_BLOCKS_OFFSET, DELETED_NAME, MAX_INODE_COUNT,
    MAX_NAME_LEN, PAGE_SIZE,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Path of the root directory
pub const ROOT_PATH: &str = "/tmp";

/// Filesystem tunables
#[derive(Debug, Clone, Copy)]
pub struct LfsConfig {
    /// Writable handles buffer appends below this many bytes
    pub write_cache_limit: usize,
}

impl Default for LfsConfig {
    fn default() -> Self {
        Self {
            write_cache_limit: 4096 * 200,
        }
    }
}

/// Allocator state, guarded as one unit
struct FsState {
    inode_bitmap: Bitmap,
    data_bitmap: Bitmap,
    inode_ptr: usize,
    data_block_ptr: usize,
}

/// A mounted filesystem instance
pub struct Lfs {
    pub(crate) ftl: Ftl,
    config: LfsConfig,
    state: Mutex<FsState>,
    /// Absolute path → cached inode; present means authoritative
    cache: Mutex<HashMap<String, Arc<Mutex<Inode>>>>,
    root: Arc<Mutex<Inode>>,
}

impl Lfs {
    /// Mount the filesystem over an initialized FTL
    ///
    /// Reads the superblock; a set `persistent` flag loads the bitmaps,
    /// cursors, and root inode from the device, anything else initializes a
    /// fresh filesystem with inode 0 and data block 0 assigned to the root
    /// directory.
    pub fn mount(ftl: Ftl, config: LfsConfig) -> Result<Arc<Self>, FsError> {
        if ftl.geometry().page_size != PAGE_SIZE {
            return Err(FsError::Ftl(crate::ftl::FtlError::InvalidConfig));
        }
        let total_pages = ftl.capacity_bytes() / PAGE_SIZE as u64;
        if total_pages <= DATA_BLOCKS_OFFSET {
            return Err(FsError::NoSpace);
        }
        let data_block_count = (total_pages - DATA_BLOCKS_OFFSET) as usize;
        if data_block_count > DATA_BITMAP_BYTES * 8 {
            return Err(FsError::NoSpace);
        }

        let mut page = vec![0u8; PAGE_SIZE];
        ftl.read(0, &mut page)?;
        let bitmap_bytes = data_block_count.div_ceil(8);
        let loaded = Superblock::decode(&page, bitmap_bytes).filter(|sb| sb.persistent);

        let (state, root) = match loaded {
            Some(sb) => {
                let mut root_page = vec![0u8; PAGE_SIZE];
                ftl.read(Inode::table_addr(0), &mut root_page)?;
                let root = Inode::decode(&root_page);
                log::info!(
                    "lfs: mounted persistent filesystem, {} data blocks, root \"{}\"",
                    data_block_count,
                    root.name
                );
                (
                    FsState {
                        inode_bitmap: Bitmap::from_bytes(&sb.inode_bitmap, MAX_INODE_COUNT),
                        data_bitmap: Bitmap::from_bytes(&sb.data_bitmap, data_block_count),
                        inode_ptr: sb.inode_ptr as usize,
                        data_block_ptr: sb.data_block_ptr as usize,
                    },
                    root,
                )
            }
            None => {
                let mut inode_bitmap = Bitmap::new(MAX_INODE_COUNT);
                let mut data_bitmap = Bitmap::new(data_block_count);
                inode_bitmap.set(0);
                data_bitmap.set(0);
                let mut root = Inode::new_dir(0, "tmp");
                root.direct[0] = DATA_BLOCKS_OFFSET * PAGE_SIZE as u64;
                log::info!(
                    "lfs: initialized fresh filesystem, {} data blocks",
                    data_block_count
                );
                (
                    FsState {
                        inode_bitmap,
                        data_bitmap,
                        inode_ptr: 0,
                        data_block_ptr: 0,
                    },
                    root,
                )
            }
        };

        Ok(Arc::new(Self {
            ftl,
            config,
            state: Mutex::new(state),
            cache: Mutex::new(HashMap::new()),
            root: Arc::new(Mutex::new(root)),
        }))
    }

    /// Unmount: flush every cached inode and the superblock, then shut the
    /// FTL down
    ///
    /// Fails with `Busy` while file handles still hold the filesystem.
    pub fn unmount(self: Arc<Self>) -> Result<(), FsError> {
        let lfs = Arc::try_unwrap(self).map_err(|_| FsError::Busy)?;
        {
            let cache = lfs.cache.lock().unwrap();
            for inode in cache.values() {
                lfs.write_inode(&inode.lock().unwrap())?;
            }
        }
        lfs.write_inode(&lfs.root.lock().unwrap())?;
        {
            let state = lfs.state.lock().unwrap();
            let mut inode_bitmap = [0u8; 32];
            inode_bitmap.copy_from_slice(state.inode_bitmap.as_bytes());
            let sb = Superblock {
                persistent: true,
                inode_ptr: state.inode_ptr as u32,
                data_block_ptr: state.data_block_ptr as u64,
                inode_bitmap,
                data_bitmap: state.data_bitmap.as_bytes().to_vec(),
            };
            lfs.write_page(0, &sb.encode())?;
        }
        log::info!("lfs: unmounted");
        lfs.ftl.deinit()?;
        Ok(())
    }

    // ---- page and inode I/O -------------------------------------------------

    pub(crate) fn read_page(&self, addr: u64) -> Result<Vec<u8>, FsError> {
        let mut page = vec![0u8; PAGE_SIZE];
        self.ftl.read(addr, &mut page)?;
        Ok(page)
    }

    pub(crate) fn write_page(&self, addr: u64, page: &[u8]) -> Result<(), FsError> {
        self.ftl.write(addr, page)?;
        Ok(())
    }

    /// Write an inode back to its table slot
    pub(crate) fn write_inode(&self, inode: &Inode) -> Result<(), FsError> {
        self.write_page(Inode::table_addr(inode.inode_no), &inode.encode())
    }

    // ---- allocators ---------------------------------------------------------

    pub(crate) fn alloc_inode_no(&self) -> Result<u32, FsError> {
        let mut state = self.state.lock().unwrap();
        let index = state
            .inode_bitmap
            .next_free_from(state.inode_ptr)
            .ok_or(FsError::NoSpace)?;
        state.inode_bitmap.set(index);
        state.inode_ptr = index;
        Ok(index as u32)
    }

    pub(crate) fn free_inode_no(&self, inode_no: u32) {
        self.state.lock().unwrap().inode_bitmap.clear(inode_no as usize);
    }

    /// Allocate a data block; returns its device byte address
    pub(crate) fn alloc_data_block(&self) -> Result<u64, FsError> {
        let mut state = self.state.lock().unwrap();
        let index = state
            .data_bitmap
            .next_free_from(state.data_block_ptr)
            .ok_or(FsError::NoSpace)?;
        state.data_bitmap.set(index);
        state.data_block_ptr = index;
        Ok((DATA_BLOCKS_OFFSET + index as u64) * PAGE_SIZE as u64)
    }

    pub(crate) fn free_data_block(&self, addr: u64) {
        let index = addr / PAGE_SIZE as u64 - DATA_BLOCKS_OFFSET;
        self.state.lock().unwrap().data_bitmap.clear(index as usize);
    }

    // ---- path resolution ----------------------------------------------------

    /// Resolve a cleaned absolute path to its cached inode
    pub(crate) fn get_path_inode(&self, cpath: &str) -> Result<Arc<Mutex<Inode>>, FsError> {
        if cpath == ROOT_PATH {
            return Ok(Arc::clone(&self.root));
        }
        if let Some(cached) = self.cache.lock().unwrap().get(cpath) {
            return Ok(Arc::clone(cached));
        }
        let parent_path = path::parent_path(cpath);
        if parent_path.is_empty() {
            return Err(FsError::NotFound);
        }
        let parent_arc = self.get_path_inode(parent_path)?;
        let name = path::entity_name(cpath);
        let inode_no = {
            let parent = parent_arc.lock().unwrap();
            if !parent.is_dir {
                return Err(FsError::NotDirectory);
            }
            if parent.file_size == 0 {
                return Err(FsError::NotFound);
            }
            self.find_child(&parent, name)?.ok_or(FsError::NotFound)?
        };
        let page = self.read_page(Inode::table_addr(inode_no))?;
        let inode = Inode::decode(&page);
        let arc = Arc::new(Mutex::new(inode));
        self.cache
            .lock()
            .unwrap()
            .insert(cpath.to_string(), Arc::clone(&arc));
        Ok(arc)
    }

    fn validate_name(name: &str) -> Result<(), FsError> {
        if name.is_empty() || name == DELETED_NAME {
            return Err(FsError::InvalidPath);
        }
        if name.len() > MAX_NAME_LEN {
            return Err(FsError::NameTooLong);
        }
        Ok(())
    }

    /// Create a file or directory entity at a cleaned path
    fn create_entity(&self, cpath: &str, is_dir: bool) -> Result<Arc<Mutex<Inode>>, FsError> {
        let name = path::entity_name(cpath);
        Self::validate_name(name)?;
        let parent_path = path::parent_path(cpath);
        if parent_path.is_empty() {
            return Err(FsError::InvalidPath);
        }
        let parent_arc = self.get_path_inode(parent_path)?;
        let inode_no = self.alloc_inode_no()?;
        let inode = if is_dir {
            Inode::new_dir(inode_no, name)
        } else {
            Inode::new_file(inode_no, name)
        };
        {
            let mut parent = parent_arc.lock().unwrap();
            if !parent.is_dir {
                self.free_inode_no(inode_no);
                return Err(FsError::NotDirectory);
            }
            if let Err(e) = self.update_parent(&mut parent, name, inode_no) {
                self.free_inode_no(inode_no);
                return Err(e);
            }
        }
        self.write_inode(&inode)?;
        let arc = Arc::new(Mutex::new(inode));
        self.cache
            .lock()
            .unwrap()
            .insert(cpath.to_string(), Arc::clone(&arc));
        Ok(arc)
    }

    // ---- public API ---------------------------------------------------------

    /// Create a directory; the parent must exist
    pub fn create_dir(&self, dirname: &str) -> Result<(), FsError> {
        let cpath = path::clean_path(dirname)?;
        if self.get_path_inode(&cpath).is_ok() {
            return Err(FsError::AlreadyExists);
        }
        self.create_entity(&cpath, true)?;
        Ok(())
    }

    /// Create a directory unless it already exists
    pub fn create_dir_if_missing(&self, dirname: &str) -> Result<(), FsError> {
        let cpath = path::clean_path(dirname)?;
        match self.get_path_inode(&cpath) {
            Ok(existing) => {
                if existing.lock().unwrap().is_dir {
                    Ok(())
                } else {
                    Err(FsError::NotDirectory)
                }
            }
            Err(FsError::NotFound) => {
                self.create_entity(&cpath, true)?;
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Open an existing file for sequential reading
    pub fn new_sequential(self: &Arc<Self>, fname: &str) -> Result<SequentialFile, FsError> {
        let cpath = path::clean_path(fname)?;
        let inode = self.get_path_inode(&cpath)?;
        if inode.lock().unwrap().is_dir {
            return Err(FsError::IsDirectory);
        }
        Ok(SequentialFile::new(Arc::clone(self), inode))
    }

    /// Open an existing file for positional reads
    pub fn new_random_access(self: &Arc<Self>, fname: &str) -> Result<RandomAccessFile, FsError> {
        let cpath = path::clean_path(fname)?;
        let inode = self.get_path_inode(&cpath)?;
        if inode.lock().unwrap().is_dir {
            return Err(FsError::IsDirectory);
        }
        Ok(RandomAccessFile::new(Arc::clone(self), inode))
    }

    /// Open a file for appending, creating it or truncating an existing one
    pub fn new_writable(self: &Arc<Self>, fname: &str) -> Result<WritableFile, FsError> {
        let cpath = path::clean_path(fname)?;
        let inode = match self.get_path_inode(&cpath) {
            Ok(existing) => {
                let mut guard = existing.lock().unwrap();
                if guard.is_dir {
                    return Err(FsError::IsDirectory);
                }
                guard.file_size = 0;
                drop(guard);
                existing
            }
            Err(FsError::NotFound) => self.create_entity(&cpath, false)?,
            Err(e) => return Err(e),
        };
        Ok(WritableFile::new(
            Arc::clone(self),
            inode,
            self.config.write_cache_limit,
        ))
    }

    /// Delete a regular file: sentinel the parent entry, free the inode and
    /// its data blocks, drop it from the lookup cache
    pub fn delete_file(&self, fname: &str) -> Result<(), FsError> {
        let cpath = path::clean_path(fname)?;
        if cpath == ROOT_PATH {
            return Err(FsError::InvalidPath);
        }
        let arc = self.get_path_inode(&cpath)?;
        {
            let inode = arc.lock().unwrap();
            if inode.is_dir {
                return Err(FsError::IsDirectory);
            }
            self.free_file_blocks(&inode)?;
            self.free_inode_no(inode.inode_no);
        }
        let parent_arc = self.get_path_inode(path::parent_path(&cpath))?;
        {
            let parent = parent_arc.lock().unwrap();
            self.remove_child(&parent, path::entity_name(&cpath))?;
        }
        self.cache.lock().unwrap().remove(&cpath);
        log::debug!("lfs: deleted {}", cpath);
        Ok(())
    }

    /// Rename within one directory; an existing target is replaced
    pub fn rename_file(&self, src: &str, dst: &str) -> Result<(), FsError> {
        let csrc = path::clean_path(src)?;
        let cdst = path::clean_path(dst)?;
        if csrc == ROOT_PATH || cdst == ROOT_PATH {
            return Err(FsError::InvalidPath);
        }
        if csrc == cdst {
            return Ok(());
        }
        if path::parent_path(&csrc) != path::parent_path(&cdst) {
            return Err(FsError::InvalidPath);
        }
        let dst_name = path::entity_name(&cdst);
        Self::validate_name(dst_name)?;
        let src_arc = self.get_path_inode(&csrc)?;
        if self.get_path_inode(&cdst).is_ok() {
            self.delete_file(&cdst)?;
        }
        {
            let mut inode = src_arc.lock().unwrap();
            inode.name = dst_name.to_string();
            self.write_inode(&inode)?;
        }
        let parent_arc = self.get_path_inode(path::parent_path(&csrc))?;
        {
            let parent = parent_arc.lock().unwrap();
            self.rename_child(&parent, path::entity_name(&csrc), dst_name)?;
        }
        let mut cache = self.cache.lock().unwrap();
        cache.remove(&csrc);
        cache.insert(cdst.clone(), src_arc);
        log::debug!("lfs: renamed {} -> {}", csrc, cdst);
        Ok(())
    }

    /// Names of a directory's children, deletion sentinels filtered out
    pub fn get_children(&self, dirname: &str) -> Result<Vec<String>, FsError> {
        let cpath = path::clean_path(dirname)?;
        let arc = self.get_path_inode(&cpath)?;
        let dir = arc.lock().unwrap();
        if !dir.is_dir {
            return Err(FsError::NotDirectory);
        }
        self.list_children(&dir)
    }

    /// Whether the named entity exists
    pub fn file_exists(&self, fname: &str) -> bool {
        path::clean_path(fname)
            .and_then(|cpath| self.get_path_inode(&cpath))
            .is_ok()
    }

    /// Size in bytes of a file (entry count for a directory)
    pub fn file_size(&self, fname: &str) -> Result<u64, FsError> {
        let cpath = path::clean_path(fname)?;
        let arc = self.get_path_inode(&cpath)?;
        let size = arc.lock().unwrap().file_size;
        Ok(size)
    }

    /// Acquire an advisory file lock; a no-op token in single-process use
    pub fn lock_file(&self, fname: &str) -> Result<FileLock, FsError> {
        Ok(FileLock {
            path: path::clean_path(fname)?,
        })
    }

    /// Release an advisory file lock
    pub fn unlock_file(&self, lock: FileLock) -> Result<(), FsError> {
        let _ = lock;
        Ok(())
    }
}

/// Token for an advisory file lock
pub struct FileLock {
    #[allow(dead_code)]
    path: String,
}
