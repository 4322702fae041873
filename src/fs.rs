//! 会话层：卷描述符、位图、连续块分配器、路径解析。
//!
//! [`FileSystem`] 是一次挂载的全部状态。挂载时读取0号块，魔数合法则沿用
//! 盘上几何信息，否则重新格式化整卷。
//!
//! Allocation is contiguous only. A rotating scan cursor remembers where
//! the previous search ended so consecutive allocations pack tightly
//! instead of rescanning the volume head every time.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::block_dev::BlockDevice;
use crate::dir::Directory;
use crate::error::{FsError, FsResult};
use crate::io::Fcb;
use crate::layout::{Bitmap, BlockStatus, DirEntry, EntryKind, Vcb};
use crate::{
    blocks_for, path, MAX_DIR_ENTRIES, MAX_OPEN_FILES, MAX_PATH_DEPTH, VCB_BLOCKS, VCB_START_BLOCK,
};

/// Seconds since the Unix epoch, for entry timestamps.
pub(crate) fn now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs() as i64)
        .unwrap_or_default()
}

/// 单卷挂载会话
pub struct FileSystem {
    device: Arc<dyn BlockDevice>,
    pub(crate) vcb: Vcb,
    pub(crate) bitmap: Bitmap,
    /// 分配扫描游标，总是落在 [free_space_start, num_blocks) 内
    pub(crate) scan_cursor: u64,
    pub(crate) cwd_start_block: u64,
    /// 打开文件描述符池，下标即 [`Fd`](crate::Fd)
    pub(crate) fcbs: Vec<Option<Fcb>>,
}

impl FileSystem {
    /// Mounts the volume on `device`, formatting it first when block 0
    /// does not carry a valid volume descriptor.
    pub fn mount(device: Arc<dyn BlockDevice>, num_blocks: u64, block_size: u64) -> FsResult<Self> {
        if (block_size as usize) < Vcb::SIZE || num_blocks < VCB_BLOCKS + 2 {
            return Err(FsError::InvalidArgument);
        }

        let mut buf = vec![0u8; block_size as usize];
        if device.read_blocks(&mut buf, VCB_BLOCKS, VCB_START_BLOCK) != VCB_BLOCKS {
            log::error!("mount: cannot read the volume descriptor block");
            return Err(FsError::BlockDeviceIo);
        }

        let mut vcb = Vcb::default();
        vcb.as_bytes_mut().copy_from_slice(&buf[..Vcb::SIZE]);
        if !vcb.is_valid() {
            log::info!("mount: no valid volume found, formatting {num_blocks} blocks");
            return Self::format(device, num_blocks, block_size);
        }

        let mut region = vec![0u8; (vcb.bitmap_blocks * vcb.block_size) as usize];
        if device.read_blocks(&mut region, vcb.bitmap_blocks, vcb.bitmap_start) != vcb.bitmap_blocks
        {
            log::error!("mount: cannot read the block bitmap");
            return Err(FsError::BlockDeviceIo);
        }
        let bitmap = Bitmap::from_bytes(region, vcb.num_blocks);

        log::info!(
            "mounted volume: {} blocks of {} bytes, {} free",
            vcb.num_blocks,
            vcb.block_size,
            vcb.num_free_blocks
        );
        Ok(Self {
            device,
            scan_cursor: vcb.free_space_start,
            cwd_start_block: vcb.root_dir_start,
            fcbs: (0..MAX_OPEN_FILES).map(|_| None).collect(),
            vcb,
            bitmap,
        })
    }

    /// 从零建卷：保留区 → 根目录 → 落盘
    fn format(device: Arc<dyn BlockDevice>, num_blocks: u64, block_size: u64) -> FsResult<Self> {
        let bitmap_start = VCB_START_BLOCK + VCB_BLOCKS;
        let bitmap_blocks = blocks_for(num_blocks.div_ceil(8), block_size);
        let dir_bytes = (MAX_DIR_ENTRIES * DirEntry::SIZE) as u64;
        let dir_blocks = blocks_for(dir_bytes, block_size);

        let reserved = bitmap_start + bitmap_blocks;
        if reserved + dir_blocks > num_blocks {
            return Err(FsError::OutOfContiguousSpace);
        }

        let mut bitmap = Bitmap::new(num_blocks, (bitmap_blocks * block_size) as usize);
        for block in 0..reserved {
            bitmap.set(block);
        }

        let vcb = Vcb::new(
            num_blocks,
            block_size,
            reserved,
            num_blocks - reserved,
            bitmap_start,
            bitmap_blocks,
            dir_blocks,
        );

        let mut fs = Self {
            device,
            scan_cursor: reserved,
            cwd_start_block: 0,
            fcbs: (0..MAX_OPEN_FILES).map(|_| None).collect(),
            vcb,
            bitmap,
        };

        let root_start = fs.find_contiguous_free(dir_blocks)?;
        fs.mark_used(root_start, dir_blocks);
        fs.vcb.root_dir_start = root_start;
        fs.vcb.free_space_start = root_start + dir_blocks;
        fs.vcb.num_free_blocks -= dir_blocks;
        fs.scan_cursor = fs.vcb.free_space_start;
        fs.cwd_start_block = root_start;

        Directory::new_root(root_start, dir_bytes, now()).store(&fs)?;
        fs.persist_bitmap()?;
        fs.persist_vcb()?;

        log::info!(
            "formatted volume: {num_blocks} blocks of {block_size} bytes, root at block {root_start}"
        );
        Ok(fs)
    }

    // ---- 设备访问 ----

    pub(crate) fn read_checked(
        &self,
        buf: &mut [u8],
        count: u64,
        start_block: u64,
        what: &str,
    ) -> FsResult<()> {
        if self.device.read_blocks(buf, count, start_block) != count {
            log::error!("{what}: short read of {count} block(s) at block {start_block}");
            return Err(FsError::BlockDeviceIo);
        }
        Ok(())
    }

    pub(crate) fn write_checked(
        &self,
        buf: &[u8],
        count: u64,
        start_block: u64,
        what: &str,
    ) -> FsResult<()> {
        if self.device.write_blocks(buf, count, start_block) != count {
            log::error!("{what}: short write of {count} block(s) at block {start_block}");
            return Err(FsError::BlockDeviceIo);
        }
        Ok(())
    }

    pub(crate) fn persist_vcb(&self) -> FsResult<()> {
        let mut buf = vec![0u8; self.vcb.block_size as usize];
        buf[..Vcb::SIZE].copy_from_slice(self.vcb.as_bytes());
        self.write_checked(&buf, VCB_BLOCKS, VCB_START_BLOCK, "volume descriptor store")
    }

    pub(crate) fn persist_bitmap(&self) -> FsResult<()> {
        self.write_checked(
            self.bitmap.as_bytes(),
            self.vcb.bitmap_blocks,
            self.vcb.bitmap_start,
            "bitmap store",
        )
    }

    // ---- 连续块分配器 ----

    pub(crate) fn mark_used(&mut self, start_block: u64, count: u64) {
        for block in start_block..start_block + count {
            self.bitmap.set(block);
        }
    }

    pub(crate) fn mark_free(&mut self, start_block: u64, count: u64) {
        for block in start_block..start_block + count {
            self.bitmap.clear(block);
        }
    }

    /// Finds `want` contiguous free blocks, scanning forward from the
    /// cursor and wrapping once back to the start of the free region.
    /// The cursor moves just past a successful run.
    ///
    /// 成功只说明找到了，这里不改位图。
    pub(crate) fn find_contiguous_free(&mut self, want: u64) -> FsResult<u64> {
        if want == 0 || want > self.vcb.num_free_blocks {
            return Err(FsError::OutOfContiguousSpace);
        }
        if self.scan_cursor < self.vcb.free_space_start || self.scan_cursor >= self.vcb.num_blocks {
            self.scan_cursor = self.vcb.free_space_start;
        }

        let mut cursor = self.scan_cursor;
        let mut run_start = cursor;
        let mut run_len = 0u64;
        for _ in 0..self.vcb.num_blocks {
            if cursor >= self.vcb.num_blocks {
                // a run may not straddle the wrap point
                cursor = self.vcb.free_space_start;
                run_start = cursor;
                run_len = 0;
            }
            if self.bitmap.status(cursor) == BlockStatus::Free {
                if run_len == 0 {
                    run_start = cursor;
                }
                run_len += 1;
                if run_len == want {
                    self.scan_cursor = cursor + 1;
                    return Ok(run_start);
                }
            } else {
                run_len = 0;
            }
            cursor += 1;
        }

        log::warn!("allocator: no run of {want} contiguous free blocks");
        Err(FsError::OutOfContiguousSpace)
    }

    /// Rewinds or advances the cursor; anything that would leave the free
    /// region snaps back to its start.
    pub(crate) fn shift_cursor(&mut self, delta: i64) {
        let moved = self.scan_cursor as i64 + delta;
        self.scan_cursor =
            if moved < self.vcb.free_space_start as i64 || moved >= self.vcb.num_blocks as i64 {
                self.vcb.free_space_start
            } else {
                moved as u64
            };
    }

    // ---- 路径解析 ----

    /// Walks every component but the last, answering the directory that
    /// holds the final component together with that component's name.
    /// `None` as the name means the path denotes root or the cwd itself.
    pub(crate) fn resolve_parent<'p>(
        &self,
        path: &'p str,
    ) -> FsResult<(Directory, Option<&'p str>)> {
        let comps = path::components(path)?;
        let start = if path::is_absolute(path) {
            self.vcb.root_dir_start
        } else {
            self.cwd_start_block
        };

        let mut dir = Directory::load(self, start)?;
        let Some((&last, intermediate)) = comps.split_last() else {
            return Ok((dir, None));
        };

        for &comp in intermediate {
            let index = dir.index_by_name(Some(comp)).ok_or(FsError::NotFound)?;
            let entry = &dir.entries[index];
            if !entry.is_dir() {
                return Err(FsError::InvalidPath);
            }
            dir = Directory::load(self, entry.start_block)?;
        }
        Ok((dir, Some(last)))
    }

    /// Resolves the whole path down to a (directory, slot) pair.
    pub(crate) fn resolve_entry(&self, path: &str) -> FsResult<(Directory, usize)> {
        let (dir, name) = self.resolve_parent(path)?;
        let index = dir.index_by_name(name).ok_or(FsError::NotFound)?;
        Ok((dir, index))
    }

    /// Absolute path of a directory, rebuilt by walking parent links up
    /// to root. Bounded so a corrupted parent cycle cannot hang us.
    pub(crate) fn dir_abs_path(&self, start_block: u64) -> FsResult<String> {
        let mut names = Vec::new();
        let mut dir = Directory::load(self, start_block)?;

        for _ in 0..MAX_PATH_DEPTH {
            if dir.start_block() == self.vcb.root_dir_start {
                let mut out = String::from("/");
                out.push_str(&names.iter().rev().cloned().collect::<Vec<_>>().join("/"));
                return Ok(out);
            }

            let parent = Directory::load(self, dir.parent_start_block())?;
            let index = parent
                .index_by_start_block(dir.start_block())
                .ok_or(FsError::NotFound)?;
            names.push(parent.entries[index].name().to_owned());
            dir = parent;
        }

        log::error!("parent-link walk exceeded {MAX_PATH_DEPTH} levels from block {start_block}");
        Err(FsError::InvalidPath)
    }

    /// Whether `dir_start` lies at or below `ancestor_start`.
    pub(crate) fn is_descendant_of(&self, dir_start: u64, ancestor_start: u64) -> FsResult<bool> {
        let mut current = dir_start;
        for _ in 0..MAX_PATH_DEPTH {
            if current == ancestor_start {
                return Ok(true);
            }
            if current == self.vcb.root_dir_start {
                return Ok(false);
            }
            current = Directory::load(self, current)?.parent_start_block();
        }

        log::error!("parent-link walk exceeded {MAX_PATH_DEPTH} levels from block {dir_start}");
        Err(FsError::InvalidPath)
    }

    // ---- 元信息查询 ----

    /// Metadata of the entry at `path`.
    pub fn stat(&self, path: &str) -> FsResult<Stat> {
        let (dir, index) = self.resolve_entry(path)?;
        let entry = &dir.entries[index];
        Ok(Stat {
            kind: entry.kind(),
            size: entry.size,
            blocks: blocks_for(entry.size, self.vcb.block_size),
            block_size: self.vcb.block_size,
            created: entry.created,
            modified: entry.modified,
            opened: entry.opened,
        })
    }

    /// Snapshot listing of the directory at `path`, self and parent
    /// descriptors included.
    pub fn read_dir(&self, path: &str) -> FsResult<ReadDir> {
        let (dir, index) = self.resolve_entry(path)?;
        let entry = &dir.entries[index];
        if !entry.is_dir() {
            return Err(FsError::WrongEntryType);
        }

        let listing = Directory::load(self, entry.start_block)?;
        let infos: Vec<_> = listing
            .entries
            .iter()
            .filter(|entry| !entry.is_free())
            .map(|entry| DirEntryInfo {
                name: entry.name().to_owned(),
                kind: entry.kind(),
                size: entry.size,
            })
            .collect();
        Ok(ReadDir {
            inner: infos.into_iter(),
        })
    }

    pub fn is_file(&self, path: &str) -> bool {
        self.stat(path)
            .is_ok_and(|stat| stat.kind == EntryKind::File)
    }

    pub fn is_dir(&self, path: &str) -> bool {
        self.stat(path)
            .is_ok_and(|stat| stat.kind == EntryKind::Directory)
    }

    #[inline]
    pub fn free_blocks(&self) -> u64 {
        self.vcb.num_free_blocks
    }

    #[inline]
    pub fn total_blocks(&self) -> u64 {
        self.vcb.num_blocks
    }

    #[inline]
    pub fn block_size(&self) -> u64 {
        self.vcb.block_size
    }

    #[inline]
    pub(crate) fn dir_blocks(&self) -> u64 {
        self.vcb.dir_blocks
    }

    #[inline]
    pub(crate) fn root_dir_start(&self) -> u64 {
        self.vcb.root_dir_start
    }
}

/// 一项的元信息快照
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stat {
    pub kind: EntryKind,
    /// 真实字节数
    pub size: u64,
    /// 按整块计的占用
    pub blocks: u64,
    pub block_size: u64,
    pub created: i64,
    pub modified: i64,
    pub opened: i64,
}

/// One row of a directory listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntryInfo {
    pub name: String,
    pub kind: EntryKind,
    pub size: u64,
}

/// Iterator over a directory snapshot, detached from the session.
pub struct ReadDir {
    inner: std::vec::IntoIter<DirEntryInfo>,
}

impl Iterator for ReadDir {
    type Item = DirEntryInfo;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next()
    }
}
