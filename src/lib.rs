//! zlfs — a host-managed FTL for zoned namespaces plus the log-structured
//! filesystem that runs on top of it
//!
//! The translation layer ([`ftl::Ftl`]) exposes a conventional,
//! byte-addressable, random-write page space over a ZNS device that only
//! permits sequential appends within reset-only zones. Host writes that
//! cannot extend a block's data zone land in log zones; a background
//! collector merges them back out and reclaims emptied zones.
//!
//! The filesystem ([`fs::Lfs`]) turns that flat space into a small directory
//! hierarchy of regular files — superblock, one-page inodes with direct and
//! chained-indirect block slots, bitmap allocators, and a path lookup cache —
//! enough to back an embedded key-value store issuing sequential reads,
//! random reads, append writes, renames, and deletes.
//!
//! ```no_run
//! use std::sync::Arc;
//! use zlfs::device::mem::MemZns;
//! use zlfs::ftl::{Ftl, FtlConfig};
//! use zlfs::fs::{Lfs, LfsConfig};
//!
//! # fn main() -> Result<(), zlfs::fs::error::FsError> {
//! let device = Arc::new(MemZns::with_dimensions(4096, 64, 32));
//! let ftl = Ftl::init(FtlConfig { force_reset: true, ..Default::default() }, device)?;
//! let fs = Lfs::mount(ftl, LfsConfig::default())?;
//! fs.create_dir("/tmp/db")?;
//! let mut f = fs.new_writable("/tmp/db/LOG")?;
//! f.append(b"hello")?;
//! f.close()?;
//! fs.unmount()?;
//! # Ok(())
//! # }
//! ```

pub mod device;
pub mod fs;
pub mod ftl;

pub use device::{DeviceError, ZnsDevice, ZnsGeometry};
pub use fs::error::FsError;
pub use fs::{Lfs, LfsConfig};
pub use ftl::{Ftl, FtlConfig, FtlError};
