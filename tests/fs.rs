//! 整卷集成测试：在内存块设备上格式化、读写、增删、移动。

use std::sync::{Arc, Mutex};

use contig_fs::{
    BlockDevice, FileSystem, FsError, OpenFlag, Whence, MAX_OPEN_FILES,
};

const BLOCK_SIZE: u64 = 512;
const NUM_BLOCKS: u64 = 2048;
/// ceil(52 entries * 112 bytes / 512)
const DIR_BLOCKS: u64 = 12;

/// RAM-backed block device.
struct MemDisk {
    data: Mutex<Vec<u8>>,
    block_size: u64,
}

impl MemDisk {
    fn new(num_blocks: u64, block_size: u64) -> Arc<Self> {
        Arc::new(Self {
            data: Mutex::new(vec![0u8; (num_blocks * block_size) as usize]),
            block_size,
        })
    }
}

impl BlockDevice for MemDisk {
    fn read_blocks(&self, buf: &mut [u8], count: u64, start_block: u64) -> u64 {
        let data = self.data.lock().unwrap();
        let from = (start_block * self.block_size) as usize;
        let len = (count * self.block_size) as usize;
        if from + len > data.len() || buf.len() < len {
            return 0;
        }
        buf[..len].copy_from_slice(&data[from..from + len]);
        count
    }

    fn write_blocks(&self, buf: &[u8], count: u64, start_block: u64) -> u64 {
        let mut data = self.data.lock().unwrap();
        let from = (start_block * self.block_size) as usize;
        let len = (count * self.block_size) as usize;
        if from + len > data.len() || buf.len() < len {
            return 0;
        }
        data[from..from + len].copy_from_slice(&buf[..len]);
        count
    }
}

fn fresh_fs() -> FileSystem {
    let _ = env_logger::builder().is_test(true).try_init();
    FileSystem::mount(MemDisk::new(NUM_BLOCKS, BLOCK_SIZE), NUM_BLOCKS, BLOCK_SIZE).unwrap()
}

fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

fn write_file(fs: &mut FileSystem, path: &str, data: &[u8]) {
    let fd = fs.open(path, OpenFlag::Write | OpenFlag::Create).unwrap();
    assert_eq!(fs.write(fd, data).unwrap(), data.len());
    fs.close(fd).unwrap();
}

fn read_file(fs: &mut FileSystem, path: &str) -> Vec<u8> {
    let size = fs.stat(path).unwrap().size as usize;
    let fd = fs.open(path, OpenFlag::Read.into()).unwrap();
    let mut buf = vec![0u8; size + 16];
    let n = fs.read(fd, &mut buf).unwrap();
    fs.close(fd).unwrap();
    buf.truncate(n);
    buf
}

#[test]
fn formats_and_reports_geometry() {
    let fs = fresh_fs();
    assert_eq!(fs.total_blocks(), NUM_BLOCKS);
    assert_eq!(fs.block_size(), BLOCK_SIZE);
    // vcb + 1 bitmap block + root directory
    assert_eq!(fs.free_blocks(), NUM_BLOCKS - 2 - DIR_BLOCKS);
    assert!(fs.is_dir("/"));
    assert_eq!(fs.cwd_path().unwrap(), "/");

    let names: Vec<_> = fs.read_dir("/").unwrap().map(|info| info.name).collect();
    assert_eq!(names, vec![".".to_string(), "..".to_string()]);
}

#[test]
fn write_then_read_1500_bytes() {
    let mut fs = fresh_fs();
    let free_before = fs.free_blocks();
    let data = pattern(1500);

    let fd = fs.open("/a", OpenFlag::Write | OpenFlag::Create).unwrap();
    assert_eq!(fs.write(fd, &data).unwrap(), 1500);
    fs.close(fd).unwrap();

    assert_eq!(fs.free_blocks(), free_before - 3);
    let stat = fs.stat("/a").unwrap();
    assert_eq!(stat.size, 1500);
    assert_eq!(stat.blocks, 3);

    let fd = fs.open("/a", OpenFlag::Read.into()).unwrap();
    let mut buf = vec![0u8; 2000];
    assert_eq!(fs.read(fd, &mut buf).unwrap(), 1500);
    assert_eq!(&buf[..1500], &data[..]);
    assert!(fs.is_stopped(fd));
    assert_eq!(fs.read(fd, &mut buf).unwrap(), 0);
    fs.close(fd).unwrap();
}

#[test]
fn block_boundary_round_trips() {
    let mut fs = fresh_fs();
    for len in [511usize, 512, 513] {
        let path = format!("/f{len}");
        let data = pattern(len);
        write_file(&mut fs, &path, &data);

        assert_eq!(fs.stat(&path).unwrap().size, len as u64);
        assert_eq!(read_file(&mut fs, &path), data);
    }
}

#[test]
fn contents_survive_a_remount() {
    let _ = env_logger::builder().is_test(true).try_init();
    let disk = MemDisk::new(NUM_BLOCKS, BLOCK_SIZE);
    let data = pattern(900);

    let mut fs = FileSystem::mount(disk.clone(), NUM_BLOCKS, BLOCK_SIZE).unwrap();
    write_file(&mut fs, "/keep", &data);
    fs.mkdir("/d").unwrap();
    let free_before = fs.free_blocks();
    drop(fs);

    let mut fs = FileSystem::mount(disk, NUM_BLOCKS, BLOCK_SIZE).unwrap();
    assert_eq!(fs.free_blocks(), free_before);
    assert!(fs.is_dir("/d"));
    assert_eq!(fs.stat("/keep").unwrap().size, 900);
    assert_eq!(read_file(&mut fs, "/keep"), data);
}

#[test]
fn seek_to_end_reads_nothing() {
    let mut fs = fresh_fs();
    write_file(&mut fs, "/f", b"hello");

    let fd = fs.open("/f", OpenFlag::Read.into()).unwrap();
    assert_eq!(fs.seek(fd, 0, Whence::End).unwrap(), 5);
    let mut buf = [0u8; 8];
    assert_eq!(fs.read(fd, &mut buf).unwrap(), 0);
    fs.close(fd).unwrap();
}

#[test]
fn seek_rejects_bad_offsets() {
    let mut fs = fresh_fs();
    write_file(&mut fs, "/f", b"hello");

    let fd = fs.open("/f", OpenFlag::Read.into()).unwrap();
    assert_eq!(fs.seek(fd, -1, Whence::Set), Err(FsError::InvalidArgument));
    assert_eq!(fs.seek(fd, -6, Whence::End), Err(FsError::InvalidArgument));
    assert_eq!(
        fs.seek(fd, (NUM_BLOCKS * BLOCK_SIZE) as i64, Whence::Set),
        Err(FsError::InvalidArgument)
    );
    fs.close(fd).unwrap();
}

#[test]
fn write_after_seek_past_end_continues_at_real_end() {
    let mut fs = fresh_fs();
    write_file(&mut fs, "/f", b"ab");

    let fd = fs.open("/f", OpenFlag::Write | OpenFlag::Append).unwrap();
    assert_eq!(fs.seek(fd, 100, Whence::Set).unwrap(), 100);
    assert_eq!(fs.write(fd, b"cd").unwrap(), 2);
    fs.close(fd).unwrap();

    // no hole: the offset snapped back to the end of the file
    assert_eq!(fs.stat("/f").unwrap().size, 4);
    assert_eq!(read_file(&mut fs, "/f"), b"abcd");
}

#[test]
fn append_continues_the_tail_block() {
    let mut fs = fresh_fs();
    write_file(&mut fs, "/greeting", b"hello");

    let fd = fs
        .open("/greeting", OpenFlag::Write | OpenFlag::Append)
        .unwrap();
    assert_eq!(fs.write(fd, b" world").unwrap(), 6);
    fs.close(fd).unwrap();

    assert_eq!(fs.stat("/greeting").unwrap().size, 11);
    assert_eq!(read_file(&mut fs, "/greeting"), b"hello world");
}

#[test]
fn plain_write_overwrites_in_place() {
    let mut fs = fresh_fs();
    write_file(&mut fs, "/f", b"AAAA");

    let fd = fs.open("/f", OpenFlag::Write.into()).unwrap();
    assert_eq!(fs.write(fd, b"BB").unwrap(), 2);
    fs.close(fd).unwrap();

    // bytes outside the written range survive the close-time merge
    assert_eq!(fs.stat("/f").unwrap().size, 4);
    assert_eq!(read_file(&mut fs, "/f"), b"BBAA");
}

#[test]
fn truncate_discards_old_contents() {
    let mut fs = fresh_fs();
    write_file(&mut fs, "/f", b"AAAA");
    let free_before = fs.free_blocks();

    let fd = fs.open("/f", OpenFlag::Write | OpenFlag::Truncate).unwrap();
    assert_eq!(fs.write(fd, b"XY").unwrap(), 2);
    fs.close(fd).unwrap();

    assert_eq!(fs.stat("/f").unwrap().size, 2);
    assert_eq!(read_file(&mut fs, "/f"), b"XY");
    assert_eq!(fs.free_blocks(), free_before);
}

#[test]
fn empty_file_owns_no_blocks() {
    let mut fs = fresh_fs();
    let free_before = fs.free_blocks();

    let fd = fs.open("/e", OpenFlag::Write | OpenFlag::Create).unwrap();
    fs.close(fd).unwrap();

    assert!(fs.is_file("/e"));
    let stat = fs.stat("/e").unwrap();
    assert_eq!(stat.size, 0);
    assert_eq!(stat.blocks, 0);
    assert_eq!(fs.free_blocks(), free_before);
    assert!(read_file(&mut fs, "/e").is_empty());
}

#[test]
fn delete_restores_the_free_count() {
    let mut fs = fresh_fs();
    let free_before = fs.free_blocks();
    write_file(&mut fs, "/big", &pattern(1500));
    assert_eq!(fs.free_blocks(), free_before - 3);

    fs.remove_file("/big").unwrap();
    assert_eq!(fs.free_blocks(), free_before);
    assert_eq!(fs.stat("/big"), Err(FsError::NotFound));
    assert_eq!(
        fs.open("/big", OpenFlag::Read.into()),
        Err(FsError::NotFound)
    );
}

#[test]
fn mkdir_and_rmdir_round_trip_free_blocks() {
    let mut fs = fresh_fs();
    let free_before = fs.free_blocks();

    fs.mkdir("/d").unwrap();
    let dir_blocks = fs.stat("/d").unwrap().blocks;
    assert_eq!(dir_blocks, DIR_BLOCKS);
    assert_eq!(fs.free_blocks(), free_before - dir_blocks);

    fs.rmdir("/d").unwrap();
    assert_eq!(fs.free_blocks(), free_before);
    assert_eq!(fs.rmdir("/d"), Err(FsError::NotFound));
}

#[test]
fn rmdir_refuses_root_and_non_empty() {
    let mut fs = fresh_fs();
    fs.mkdir("/d").unwrap();
    fs.mkdir("/d/e").unwrap();

    assert_eq!(fs.rmdir("/"), Err(FsError::PolicyViolation));
    assert_eq!(fs.rmdir("/d"), Err(FsError::PolicyViolation));

    fs.rmdir("/d/e").unwrap();
    fs.rmdir("/d").unwrap();
}

#[test]
fn delete_and_rmdir_check_entry_kinds() {
    let mut fs = fresh_fs();
    write_file(&mut fs, "/f", b"data");
    fs.mkdir("/d").unwrap();

    assert_eq!(fs.rmdir("/f"), Err(FsError::WrongEntryType));
    assert_eq!(fs.remove_file("/d"), Err(FsError::WrongEntryType));
}

#[test]
fn rename_in_place_changes_only_the_name() {
    let mut fs = fresh_fs();
    write_file(&mut fs, "/old", b"payload");
    let before = fs.stat("/old").unwrap();

    fs.rename("/old", "/new").unwrap();

    assert_eq!(fs.stat("/old"), Err(FsError::NotFound));
    let after = fs.stat("/new").unwrap();
    assert_eq!(after.size, before.size);
    assert_eq!(after.created, before.created);
    assert_eq!(after.modified, before.modified);
    assert_eq!(read_file(&mut fs, "/new"), b"payload");
}

#[test]
fn move_refuses_root_self_and_descendants() {
    let mut fs = fresh_fs();
    fs.mkdir("/a").unwrap();
    fs.mkdir("/a/b").unwrap();

    assert_eq!(fs.rename("/", "/x"), Err(FsError::PolicyViolation));
    assert_eq!(fs.rename("/a", "/a"), Err(FsError::PolicyViolation));
    assert_eq!(fs.rename("/a", "/a/b"), Err(FsError::PolicyViolation));
}

#[test]
fn move_under_a_fresh_name_inside_itself_is_refused() {
    let mut fs = fresh_fs();
    fs.mkdir("/a").unwrap();
    fs.mkdir("/a/b").unwrap();

    // the destination does not exist yet, but its parent lies inside
    // the moved subtree
    assert_eq!(fs.rename("/a", "/a/x"), Err(FsError::PolicyViolation));
    assert_eq!(fs.rename("/a", "/a/b/x"), Err(FsError::PolicyViolation));

    // the subtree is still attached to root
    assert!(fs.is_dir("/a"));
    assert!(fs.is_dir("/a/b"));
    fs.set_cwd("/a/b").unwrap();
    assert_eq!(fs.cwd_path().unwrap(), "/a/b");
}

#[test]
fn move_into_directory_keeps_the_source_name() {
    let mut fs = fresh_fs();
    write_file(&mut fs, "/f", b"cargo");
    fs.mkdir("/d").unwrap();

    fs.rename("/f", "/d").unwrap();

    assert_eq!(fs.stat("/f"), Err(FsError::NotFound));
    assert!(fs.is_file("/d/f"));
    assert_eq!(read_file(&mut fs, "/d/f"), b"cargo");
}

#[test]
fn move_overwrite_frees_the_victims_blocks() {
    let mut fs = fresh_fs();
    write_file(&mut fs, "/x", b"one");
    fs.mkdir("/d").unwrap();
    write_file(&mut fs, "/d/x", b"twotwo");
    let free_before = fs.free_blocks();

    fs.rename("/x", "/d").unwrap();

    // the overwritten file's single block came back
    assert_eq!(fs.free_blocks(), free_before + 1);
    assert_eq!(fs.stat("/x"), Err(FsError::NotFound));
    assert_eq!(read_file(&mut fs, "/d/x"), b"one");
}

#[test]
fn overwriting_across_kinds_is_refused() {
    let mut fs = fresh_fs();
    fs.mkdir("/d").unwrap();
    fs.mkdir("/dir").unwrap();
    write_file(&mut fs, "/d/f", b"data");
    write_file(&mut fs, "/f", b"data");

    // directory over file
    assert_eq!(fs.rename("/dir", "/f"), Err(FsError::WrongEntryType));
    // file over directory inside a container
    fs.mkdir("/d2").unwrap();
    fs.mkdir("/d2/f").unwrap();
    assert_eq!(fs.rename("/f", "/d2"), Err(FsError::WrongEntryType));
}

#[test]
fn moved_directory_points_back_at_its_new_parent() {
    let mut fs = fresh_fs();
    fs.mkdir("/a").unwrap();
    fs.mkdir("/b").unwrap();
    fs.mkdir("/a/c").unwrap();
    write_file(&mut fs, "/a/c/data", b"inside");

    fs.rename("/a/c", "/b").unwrap();

    assert!(fs.is_dir("/b/c"));
    assert_eq!(fs.stat("/a/c"), Err(FsError::NotFound));
    assert_eq!(read_file(&mut fs, "/b/c/data"), b"inside");

    // ".." of the moved directory now leads to /b
    fs.set_cwd("/b/c").unwrap();
    assert_eq!(fs.cwd_path().unwrap(), "/b/c");
    fs.set_cwd("..").unwrap();
    assert_eq!(fs.cwd_path().unwrap(), "/b");
}

#[test]
fn relative_paths_resolve_against_the_cwd() {
    let mut fs = fresh_fs();
    fs.mkdir("/w").unwrap();
    fs.set_cwd("/w").unwrap();
    assert_eq!(fs.cwd_path().unwrap(), "/w");

    write_file(&mut fs, "r", b"rel");
    assert!(fs.is_file("/w/r"));
    assert_eq!(fs.stat("r").unwrap().size, 3);

    // the working directory is pinned in place
    assert_eq!(fs.rmdir("/w"), Err(FsError::PolicyViolation));

    fs.set_cwd("..").unwrap();
    assert_eq!(fs.cwd_path().unwrap(), "/");
}

#[test]
fn moving_the_cwd_or_its_ancestor_is_refused() {
    let mut fs = fresh_fs();
    fs.mkdir("/m").unwrap();
    fs.mkdir("/m/inner").unwrap();
    fs.mkdir("/n").unwrap();

    fs.set_cwd("/m/inner").unwrap();
    assert_eq!(fs.rename("/m/inner", "/n"), Err(FsError::PolicyViolation));
    assert_eq!(fs.rename("/m", "/n"), Err(FsError::PolicyViolation));

    fs.set_cwd("/").unwrap();
    fs.rename("/m/inner", "/n").unwrap();
    assert!(fs.is_dir("/n/inner"));
}

#[test]
fn path_errors_are_distinct() {
    let mut fs = fresh_fs();
    write_file(&mut fs, "/f", b"data");

    assert_eq!(fs.stat("//a"), Err(FsError::InvalidPath));
    assert_eq!(fs.stat("/nope/x"), Err(FsError::NotFound));
    assert_eq!(fs.stat("/f/x"), Err(FsError::InvalidPath));
    assert_eq!(fs.mkdir("/"), Err(FsError::AlreadyExists));
    assert_eq!(fs.mkdir("/f"), Err(FsError::AlreadyExists));
    assert_eq!(
        fs.open("/", OpenFlag::Write | OpenFlag::Create),
        Err(FsError::WrongEntryType)
    );

    let long = "x".repeat(64);
    assert_eq!(fs.mkdir(&format!("/{long}")), Err(FsError::NameTooLong));
    assert_eq!(
        fs.open(&format!("/{long}"), OpenFlag::Write | OpenFlag::Create),
        Err(FsError::NameTooLong)
    );
}

#[test]
fn descriptor_pool_is_bounded() {
    let mut fs = fresh_fs();
    write_file(&mut fs, "/p", b"pool");

    let fds: Vec<_> = (0..MAX_OPEN_FILES)
        .map(|_| fs.open("/p", OpenFlag::Read.into()).unwrap())
        .collect();
    assert_eq!(
        fs.open("/p", OpenFlag::Read.into()),
        Err(FsError::DescriptorPoolExhausted)
    );

    for fd in fds {
        fs.close(fd).unwrap();
    }
    let fd = fs.open("/p", OpenFlag::Read.into()).unwrap();
    fs.close(fd).unwrap();
}

#[test]
fn write_stops_short_of_a_foreign_block() {
    let mut fs = fresh_fs();
    let first = pattern(1500);
    write_file(&mut fs, "/a", &first);
    // lands directly behind /a's three blocks
    let neighbour = pattern(512);
    write_file(&mut fs, "/b", &neighbour);

    let fd = fs.open("/a", OpenFlag::Write | OpenFlag::Append).unwrap();
    // only the 36 bytes left in the tail block fit
    assert_eq!(fs.write(fd, &pattern(600)).unwrap(), 36);
    assert!(fs.is_stopped(fd));
    assert_eq!(fs.write(fd, b"more").unwrap(), 0);
    fs.close(fd).unwrap();

    // the neighbour was never touched
    assert_eq!(read_file(&mut fs, "/b"), neighbour);
}

#[test]
fn read_dir_lists_used_entries() {
    let mut fs = fresh_fs();
    fs.mkdir("/docs").unwrap();
    write_file(&mut fs, "/notes", b"n");

    let mut names: Vec<_> = fs.read_dir("/").unwrap().map(|info| info.name).collect();
    names.sort();
    assert_eq!(names, vec![".", "..", "docs", "notes"]);

    assert_eq!(
        fs.read_dir("/notes").err(),
        Some(FsError::WrongEntryType)
    );
}
