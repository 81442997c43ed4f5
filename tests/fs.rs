//! Filesystem scenarios over the full stack (LFS → FTL → emulated ZNS)

use std::sync::Arc;
use zlfs::device::mem::MemZns;
use zlfs::fs::error::FsError;
use zlfs::fs::{Lfs, LfsConfig};
use zlfs::ftl::{Ftl, FtlConfig};

const PAGE: usize = 4096;

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// 64-page zones so the 256-page metadata region fits comfortably
fn device(num_zones: u32) -> Arc<MemZns> {
    Arc::new(MemZns::with_dimensions(PAGE, 64, num_zones))
}

fn mount(device: Arc<MemZns>, force_reset: bool, config: LfsConfig) -> Arc<Lfs> {
    let ftl = Ftl::init(
        FtlConfig {
            log_zones: 3,
            gc_trigger: 1,
            force_reset,
        },
        device,
    )
    .expect("ftl init");
    Lfs::mount(ftl, config).expect("mount")
}

fn read_all(fs: &Arc<Lfs>, path: &str, len: usize) -> Vec<u8> {
    let mut file = fs.new_sequential(path).expect("open sequential");
    let mut out = vec![0u8; len];
    let n = file.read(&mut out).expect("read");
    out.truncate(n);
    out
}

/// S5: create a directory, write three pages, read them back in order
#[test]
fn s5_create_write_read() {
    init_logger();
    let fs = mount(device(16), true, LfsConfig::default());
    fs.create_dir("/tmp/db").unwrap();

    let mut w = fs.new_writable("/tmp/db/a").unwrap();
    let (p1, p2, p3) = (vec![0x11u8; PAGE], vec![0x22u8; PAGE], vec![0x33u8; PAGE]);
    w.append(&p1).unwrap();
    w.append(&p2).unwrap();
    w.append(&p3).unwrap();
    w.close().unwrap();

    let data = read_all(&fs, "/tmp/db/a", 3 * PAGE);
    assert_eq!(data.len(), 3 * PAGE);
    assert_eq!(&data[..PAGE], &p1[..]);
    assert_eq!(&data[PAGE..2 * PAGE], &p2[..]);
    assert_eq!(&data[2 * PAGE..], &p3[..]);
    assert_eq!(fs.file_size("/tmp/db/a").unwrap(), 3 * PAGE as u64);
}

/// S6: a rename invalidates the old path, serves the new one, keeps bytes
#[test]
fn s6_rename_survives_lookup_cache() {
    init_logger();
    let fs = mount(device(16), true, LfsConfig::default());
    fs.create_dir("/tmp/db").unwrap();
    let mut w = fs.new_writable("/tmp/db/a").unwrap();
    w.append(&vec![0x5Au8; 2 * PAGE]).unwrap();
    w.close().unwrap();

    fs.rename_file("/tmp/db/a", "/tmp/db/b").unwrap();
    assert!(!fs.file_exists("/tmp/db/a"), "old name is gone");
    assert!(fs.file_exists("/tmp/db/b"), "new name resolves");
    assert_eq!(read_all(&fs, "/tmp/db/b", 2 * PAGE), vec![0x5Au8; 2 * PAGE]);
    assert_eq!(
        fs.new_sequential("/tmp/db/a").err(),
        Some(FsError::NotFound)
    );
}

/// Property 7: files survive unmount and a non-reset remount
#[test]
fn contents_survive_remount() {
    init_logger();
    let dev = device(16);
    {
        let fs = mount(Arc::clone(&dev), true, LfsConfig::default());
        fs.create_dir("/tmp/db").unwrap();
        let mut w = fs.new_writable("/tmp/db/current").unwrap();
        w.append(b"MANIFEST-000007").unwrap();
        w.close().unwrap();
        let mut w = fs.new_writable("/tmp/db/sst1").unwrap();
        w.append(&vec![0xABu8; 3 * PAGE + 100]).unwrap();
        w.close().unwrap();
        fs.rename_file("/tmp/db/sst1", "/tmp/db/000001.sst").unwrap();
        fs.unmount().unwrap();
    }
    {
        let fs = mount(Arc::clone(&dev), false, LfsConfig::default());
        assert!(fs.file_exists("/tmp/db"), "directory survived");
        assert_eq!(
            read_all(&fs, "/tmp/db/current", 64),
            b"MANIFEST-000007".to_vec()
        );
        assert_eq!(
            read_all(&fs, "/tmp/db/000001.sst", 4 * PAGE),
            vec![0xABu8; 3 * PAGE + 100]
        );
        assert_eq!(
            fs.file_size("/tmp/db/000001.sst").unwrap(),
            3 * PAGE as u64 + 100
        );
        let mut children = fs.get_children("/tmp/db").unwrap();
        children.sort();
        assert_eq!(children, vec!["000001.sst".to_string(), "current".into()]);
        fs.unmount().unwrap();
    }
}

/// Deleted entries are filtered from listings and stop resolving
#[test]
fn delete_filters_listing() {
    init_logger();
    let fs = mount(device(16), true, LfsConfig::default());
    fs.create_dir("/tmp/db").unwrap();
    for name in ["x", "y", "z"] {
        let mut w = fs.new_writable(&format!("/tmp/db/{}", name)).unwrap();
        w.append(name.as_bytes()).unwrap();
        w.close().unwrap();
    }
    fs.delete_file("/tmp/db/y").unwrap();
    assert_eq!(
        fs.get_children("/tmp/db").unwrap(),
        vec!["x".to_string(), "z".into()],
        "sentinel entry filtered, order preserved"
    );
    assert!(!fs.file_exists("/tmp/db/y"));
    // The name is reusable after deletion.
    let mut w = fs.new_writable("/tmp/db/y").unwrap();
    w.append(b"again").unwrap();
    w.close().unwrap();
    assert_eq!(read_all(&fs, "/tmp/db/y", 16), b"again".to_vec());
}

/// Root listing and directory error paths
#[test]
fn directory_operations() {
    init_logger();
    let fs = mount(device(16), true, LfsConfig::default());
    fs.create_dir("/tmp/db").unwrap();
    assert_eq!(fs.create_dir("/tmp/db"), Err(FsError::AlreadyExists));
    fs.create_dir_if_missing("/tmp/db").unwrap();
    fs.create_dir_if_missing("/tmp/logs").unwrap();
    assert_eq!(
        fs.create_dir("/tmp/missing/sub"),
        Err(FsError::NotFound),
        "parent must exist"
    );
    let mut children = fs.get_children("/tmp").unwrap();
    children.sort();
    assert_eq!(children, vec!["db".to_string(), "logs".into()]);
    assert_eq!(
        fs.get_children("/tmp/db").unwrap(),
        Vec::<String>::new(),
        "fresh directory is empty"
    );
    assert_eq!(fs.delete_file("/tmp/db"), Err(FsError::IsDirectory));
    assert_eq!(
        fs.rename_file("/tmp", "/tmp2"),
        Err(FsError::InvalidPath),
        "root cannot be renamed away"
    );
    assert_eq!(
        fs.rename_file("/tmp/db", "/tmp"),
        Err(FsError::InvalidPath),
        "nothing can be renamed onto the root"
    );
    assert!(fs.file_exists("/tmp"), "root untouched by rejected renames");
}

/// Appends below the cache limit coalesce; crossing it flushes
#[test]
fn write_coalescing() {
    init_logger();
    let fs = mount(
        device(16),
        true,
        LfsConfig {
            write_cache_limit: 2 * PAGE,
        },
    );
    let mut w = fs.new_writable("/tmp/f").unwrap();
    w.append(&vec![1u8; PAGE]).unwrap();
    assert_eq!(
        fs.file_size("/tmp/f").unwrap(),
        0,
        "small append still buffered"
    );
    w.append(&vec![2u8; PAGE]).unwrap();
    assert_eq!(
        fs.file_size("/tmp/f").unwrap(),
        2 * PAGE as u64,
        "crossing the limit flushed the buffer"
    );
    w.append(b"tail").unwrap();
    assert_eq!(w.file_size(), 2 * PAGE as u64 + 4, "handle counts buffered bytes");
    w.close().unwrap();
    assert_eq!(fs.file_size("/tmp/f").unwrap(), 2 * PAGE as u64 + 4);

    let data = read_all(&fs, "/tmp/f", 3 * PAGE);
    assert_eq!(&data[..PAGE], &vec![1u8; PAGE][..]);
    assert_eq!(&data[PAGE..2 * PAGE], &vec![2u8; PAGE][..]);
    assert_eq!(&data[2 * PAGE..], b"tail");
}

/// Unaligned appends read-modify-write only the first page
#[test]
fn unaligned_append_rmw() {
    init_logger();
    // Limit 1 disables coalescing so every append hits the device path.
    let fs = mount(device(16), true, LfsConfig { write_cache_limit: 1 });
    let mut w = fs.new_writable("/tmp/f").unwrap();
    w.append(b"hello ").unwrap();
    w.append(b"zoned ").unwrap();
    w.append(b"world").unwrap();
    w.close().unwrap();
    assert_eq!(read_all(&fs, "/tmp/f", 64), b"hello zoned world".to_vec());
}

/// Sequential cursor, skip, and positional reads
#[test]
fn read_modes() {
    init_logger();
    let fs = mount(device(16), true, LfsConfig::default());
    let payload: Vec<u8> = (0..3 * PAGE).map(|i| (i % 239) as u8).collect();
    let mut w = fs.new_writable("/tmp/f").unwrap();
    w.append(&payload).unwrap();
    w.close().unwrap();

    let mut seq = fs.new_sequential("/tmp/f").unwrap();
    let mut chunk = vec![0u8; 1000];
    assert_eq!(seq.read(&mut chunk).unwrap(), 1000);
    assert_eq!(chunk, payload[..1000]);
    seq.skip(500).unwrap();
    assert_eq!(seq.read(&mut chunk).unwrap(), 1000);
    assert_eq!(chunk, payload[1500..2500]);
    assert_eq!(
        seq.skip(3 * PAGE as u64),
        Err(FsError::OutOfBounds),
        "skip past end of file rejected"
    );

    let ra = fs.new_random_access("/tmp/f").unwrap();
    let mut buf = vec![0u8; 700];
    assert_eq!(ra.read_at(PAGE as u64 + 123, &mut buf).unwrap(), 700);
    assert_eq!(buf, payload[PAGE + 123..PAGE + 823]);
    assert_eq!(
        ra.read_at(payload.len() as u64 + 1, &mut buf).unwrap(),
        0,
        "read past end of file returns zero bytes"
    );
}

/// Truncate cuts the visible size without touching earlier bytes
#[test]
fn truncate_cuts_size() {
    init_logger();
    let fs = mount(device(16), true, LfsConfig { write_cache_limit: 1 });
    let mut w = fs.new_writable("/tmp/f").unwrap();
    w.append(&vec![9u8; 300]).unwrap();
    w.truncate(100).unwrap();
    w.close().unwrap();
    assert_eq!(fs.file_size("/tmp/f").unwrap(), 100);
    assert_eq!(read_all(&fs, "/tmp/f", 300), vec![9u8; 100]);
}

/// A file spanning the direct array into the indirect chain
#[test]
fn large_file_uses_indirect_chain() {
    init_logger();
    let fs = mount(device(40), true, LfsConfig::default());
    let pages = 481; // one past the 480-slot direct array
    let payload: Vec<u8> = (0..pages * PAGE).map(|i| (i % 251) as u8).collect();
    let mut w = fs.new_writable("/tmp/big").unwrap();
    w.append(&payload).unwrap();
    w.close().unwrap();
    assert_eq!(fs.file_size("/tmp/big").unwrap(), payload.len() as u64);

    let ra = fs.new_random_access("/tmp/big").unwrap();
    // Straddle the direct / indirect boundary at block index 480.
    let offset = 478 * PAGE + 100;
    let mut buf = vec![0u8; 2 * PAGE];
    assert_eq!(ra.read_at(offset as u64, &mut buf).unwrap(), 2 * PAGE);
    assert_eq!(buf, payload[offset..offset + 2 * PAGE]);
    // Tail of the file, deep in the first indirect block.
    let mut tail = vec![0u8; 512];
    let tail_offset = payload.len() - 512;
    assert_eq!(ra.read_at(tail_offset as u64, &mut tail).unwrap(), 512);
    assert_eq!(tail, payload[tail_offset..]);
}

/// Data-block exhaustion surfaces as NoSpace
#[test]
fn exhaustion_fails_hard() {
    init_logger();
    // 5 data zones * 64 pages - 256 metadata pages = 64 data blocks.
    let fs = mount(device(8), true, LfsConfig { write_cache_limit: 1 });
    let mut w = fs.new_writable("/tmp/f").unwrap();
    let big = vec![7u8; 70 * PAGE];
    assert_eq!(w.append(&big), Err(FsError::NoSpace));
}

/// Unmount refuses while handles are open, and advisory locks are no-ops
#[test]
fn unmount_busy_and_locks() {
    init_logger();
    let fs = mount(device(16), true, LfsConfig::default());
    let lock = fs.lock_file("/tmp/LOCK").unwrap();
    fs.unlock_file(lock).unwrap();

    let w = fs.new_writable("/tmp/f").unwrap();
    let holder = Arc::clone(&fs);
    assert!(matches!(holder.unmount(), Err(FsError::Busy)));
    drop(w);
    fs.unmount().unwrap();
}

/// Path hygiene: trailing and doubled separators, relative paths
#[test]
fn path_handling() {
    init_logger();
    let fs = mount(device(16), true, LfsConfig::default());
    fs.create_dir("/tmp/db/").unwrap();
    assert!(fs.file_exists("/tmp/db"));
    let mut w = fs.new_writable("/tmp/db//f").unwrap();
    w.append(b"x").unwrap();
    w.close().unwrap();
    assert!(fs.file_exists("/tmp/db/f"));
    assert_eq!(fs.file_size("relative").err(), Some(FsError::InvalidPath));
}
