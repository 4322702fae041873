//! 缓冲文件描述符层。
//!
//! 每个打开的文件持有一个单块缓冲区，读写请求被拆成三段：
//! 先消耗缓冲区的剩余部分，然后整块直传，最后的零头重新经过缓冲区。
//! 只有整块会到达设备。
//!
//! Writes grow the extent one neighbouring block at a time and stop dead
//! when the next block belongs to another extent; the descriptor's stop
//! flag then turns every further write into a zero-byte transfer. None
//! of the bookkeeping reaches the directory, bitmap or volume descriptor
//! before `close`.

use enumflags2::{bitflags, BitFlags};

use crate::dir::Directory;
use crate::error::{FsError, FsResult};
use crate::fs::{now, FileSystem};
use crate::layout::{BlockStatus, EntryKind};
use crate::{blocks_for, MIN_RESERVE_BLOCKS, NAME_MAX_LEN};

/// Index into the session's descriptor pool.
pub type Fd = usize;

/// 打开模式的单个位
#[bitflags]
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenFlag {
    Read = 1 << 0,
    Write = 1 << 1,
    /// Start writing at the current end of the file.
    Append = 1 << 2,
    /// Create the file when it does not exist yet.
    Create = 1 << 3,
    /// Discard the existing contents first.
    Truncate = 1 << 4,
}

/// 打开模式，必须至少含 [`OpenFlag::Read`] 或 [`OpenFlag::Write`]
pub type OpenMode = BitFlags<OpenFlag>;

/// Origin of a [`FileSystem::seek`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Whence {
    /// 文件开头
    Set,
    /// 当前偏移
    Cur,
    /// 文件末尾
    End,
}

/// 打开文件的全部易失状态
pub(crate) struct Fcb {
    /// 单块缓冲区
    buf: Vec<u8>,
    buf_index: usize,
    /// 缓冲区内的有效字节数，只有读路径关心
    buf_valid: usize,

    /// 文件指针，字节计
    offset: u64,
    /// 当前真实大小，可能领先目录项
    size: u64,
    start_block: u64,
    /// 区段块数，在 `close` 之前不会进入位图
    num_blocks: u64,

    parent_start_block: u64,
    entry_index: usize,
    name: String,

    mode: OpenMode,
    new_file: bool,
    /// 下一块属于别的区段，或已到文件末尾
    stopped: bool,
    /// 设备故障后置位，`close` 将不再碰任何元数据
    poisoned: bool,
}

impl FileSystem {
    /// Opens `path` and returns a descriptor from the fixed pool.
    ///
    /// A write-capable open of a file without on-disk blocks eagerly
    /// locates [`MIN_RESERVE_BLOCKS`] contiguous free blocks and then
    /// rewinds the scan cursor over them, so an undersized file leaves
    /// the tail of its reservation to the next allocation. The blocks
    /// are not marked used until `close`.
    pub fn open(&mut self, path: &str, mode: OpenMode) -> FsResult<Fd> {
        if !mode.intersects(OpenFlag::Read | OpenFlag::Write) {
            return Err(FsError::InvalidArgument);
        }

        let (mut parent, basename) = self.resolve_parent(path)?;
        let file_name = basename.ok_or(FsError::WrongEntryType)?;
        let block_size = self.vcb.block_size;

        let mut buf = vec![0u8; block_size as usize];
        let mut buf_index = 0usize;
        let mut buf_valid = 0usize;
        let mut offset = 0u64;
        let mut size = 0u64;
        // every branch below settles on a start block
        let mut start_block;
        let mut num_blocks = 0u64;
        let entry_index;
        let mut new_file = false;

        let writable = mode.contains(OpenFlag::Write);

        if writable {
            if file_name.len() > NAME_MAX_LEN {
                return Err(FsError::NameTooLong);
            }
            buf_valid = block_size as usize;

            match parent.index_by_name(Some(file_name)) {
                Some(index) => {
                    if !parent.entries[index].is_file() {
                        return Err(FsError::WrongEntryType);
                    }
                    entry_index = index;
                    size = parent.entries[index].size;
                    start_block = parent.entries[index].start_block;
                    num_blocks = blocks_for(size, block_size);

                    if mode.contains(OpenFlag::Append) {
                        if size == 0 {
                            start_block = self.reserve_fresh()?;
                            num_blocks = 0;
                        } else {
                            let tail = start_block + size / block_size;
                            buf_index = (size % block_size) as usize;
                            offset = size;
                            // the tail block keeps earlier data that must
                            // survive the eventual merge
                            if buf_index > 0 {
                                self.read_checked(&mut buf, 1, tail, "open append tail")?;
                            }
                        }
                    } else if mode.contains(OpenFlag::Truncate) {
                        parent.entries[index].start_block = 0;
                        parent.entries[index].size = 0;
                        parent.store(self)?;

                        if num_blocks > 0 {
                            self.mark_free(start_block, num_blocks);
                            self.vcb.num_free_blocks += num_blocks;
                            self.persist_bitmap()?;
                            self.persist_vcb()?;
                        }

                        start_block = self.reserve_fresh()?;
                        size = 0;
                        num_blocks = 0;
                    } else if size == 0 {
                        // empty files own no blocks yet
                        start_block = self.reserve_fresh()?;
                        num_blocks = 0;
                    }
                    // otherwise overwrite in place from offset 0
                }
                None => {
                    if !mode.contains(OpenFlag::Create) {
                        return Err(FsError::NotFound);
                    }
                    entry_index = parent.first_free_index().ok_or(FsError::DirectoryFull)?;
                    start_block = self.reserve_fresh()?;
                    new_file = true;
                }
            }

            if mode.contains(OpenFlag::Read) {
                // the descriptor keeps the write-side geometry; only the
                // cursor state rewinds to the start of the file
                buf_index = 0;
                buf_valid = 0;
                offset = 0;
            }
        } else {
            let index = parent
                .index_by_name(Some(file_name))
                .ok_or(FsError::NotFound)?;
            if !parent.entries[index].is_file() {
                return Err(FsError::WrongEntryType);
            }
            entry_index = index;
            size = parent.entries[index].size;
            start_block = parent.entries[index].start_block;
            num_blocks = blocks_for(size, block_size);
        }

        let fd = self
            .fcbs
            .iter()
            .position(Option::is_none)
            .ok_or(FsError::DescriptorPoolExhausted)?;
        self.fcbs[fd] = Some(Fcb {
            buf,
            buf_index,
            buf_valid,
            offset,
            size,
            start_block,
            num_blocks,
            parent_start_block: parent.start_block(),
            entry_index,
            name: file_name.to_owned(),
            mode,
            new_file,
            stopped: false,
            poisoned: false,
        });
        log::debug!("opened '{file_name}' as fd {fd}, mode {mode:?}");
        Ok(fd)
    }

    /// Moves the file pointer. The new offset may land past the end of
    /// the file; reads there answer nothing and writes clamp back first.
    pub fn seek(&mut self, fd: Fd, offset: i64, whence: Whence) -> FsResult<u64> {
        let mut fcb = self.take_fcb(fd)?;
        let result = self.seek_inner(&mut fcb, offset, whence);
        self.fcbs[fd] = Some(fcb);
        result
    }

    /// Reads up to `buffer.len()` bytes at the file pointer. A short
    /// count means end of file.
    pub fn read(&mut self, fd: Fd, buffer: &mut [u8]) -> FsResult<usize> {
        let mut fcb = self.take_fcb(fd)?;
        let result = self.read_inner(&mut fcb, buffer);
        self.fcbs[fd] = Some(fcb);
        result
    }

    /// Writes `data` at the file pointer. A short count, or zero once
    /// the stop flag is up, means the extent hit a foreign block.
    pub fn write(&mut self, fd: Fd, data: &[u8]) -> FsResult<usize> {
        let mut fcb = self.take_fcb(fd)?;
        let result = self.write_inner(&mut fcb, data);
        self.fcbs[fd] = Some(fcb);
        result
    }

    /// Flushes the buffer, publishes the directory entry and marks the
    /// extent in the bitmap. Until here a written file is invisible.
    pub fn close(&mut self, fd: Fd) -> FsResult<()> {
        let mut fcb = self.take_fcb(fd)?;
        self.close_inner(&mut fcb)
    }

    /// Whether the descriptor has hit end of file, the edge of its
    /// contiguous space, or a device fault.
    pub fn is_stopped(&self, fd: Fd) -> bool {
        self.fcbs
            .get(fd)
            .and_then(Option::as_ref)
            .is_some_and(|fcb| fcb.stopped)
    }

    fn take_fcb(&mut self, fd: Fd) -> FsResult<Fcb> {
        self.fcbs
            .get_mut(fd)
            .ok_or(FsError::InvalidArgument)?
            .take()
            .ok_or(FsError::InvalidArgument)
    }

    /// 预定5个连续空闲块并回拨游标
    fn reserve_fresh(&mut self) -> FsResult<u64> {
        let start = self.find_contiguous_free(MIN_RESERVE_BLOCKS)?;
        // a file smaller than the reservation leaves its tail to the
        // next search
        self.shift_cursor(-(MIN_RESERVE_BLOCKS as i64));
        Ok(start)
    }

    fn seek_inner(&mut self, fcb: &mut Fcb, offset: i64, whence: Whence) -> FsResult<u64> {
        let block_size = self.vcb.block_size;

        let target = match whence {
            Whence::Set => offset,
            Whence::Cur => fcb.offset as i64 + offset,
            Whence::End => fcb.size as i64 + offset,
        };
        if target < 0 || target > i32::MAX as i64 {
            return Err(FsError::InvalidArgument);
        }
        let target = target as u64;
        if fcb.start_block + target / block_size >= self.vcb.num_blocks {
            return Err(FsError::InvalidArgument);
        }

        fcb.offset = target;

        // align the buffer with the new position while it still points
        // inside the file
        if fcb.offset <= fcb.size {
            fcb.buf_index = (fcb.offset % block_size) as usize;
            if fcb.buf_index > 0 {
                let current = fcb.start_block + fcb.offset / block_size;
                self.read_checked(&mut fcb.buf, 1, current, "seek buffer reload")?;
                fcb.buf_valid = block_size as usize;
            } else {
                fcb.buf_valid = 0;
            }
        }

        Ok(target)
    }

    fn read_inner(&mut self, fcb: &mut Fcb, buffer: &mut [u8]) -> FsResult<usize> {
        if !fcb.mode.contains(OpenFlag::Read) {
            return Err(FsError::InvalidArgument);
        }
        if buffer.is_empty() || fcb.offset >= fcb.size || fcb.stopped {
            return Ok(0);
        }

        let block_size = self.vcb.block_size as usize;
        let mut count = buffer.len();
        if fcb.offset + count as u64 > fcb.size {
            fcb.stopped = true;
            count = (fcb.size - fcb.offset) as usize;
        }

        let rem = fcb.buf_valid.saturating_sub(fcb.buf_index);
        let (part1, part2, part3, whole_blocks) = if count <= rem {
            (count, 0, 0, 0)
        } else {
            let rest = count - rem;
            let whole = rest / block_size;
            (rem, whole * block_size, rest % block_size, whole)
        };

        if part1 > 0 {
            buffer[..part1].copy_from_slice(&fcb.buf[fcb.buf_index..fcb.buf_index + part1]);
            fcb.buf_index += part1;
            fcb.offset += part1 as u64;
        }

        if part2 > 0 {
            let current = fcb.start_block + fcb.offset / block_size as u64;
            if let Err(err) = self.read_checked(
                &mut buffer[part1..part1 + part2],
                whole_blocks as u64,
                current,
                "file read",
            ) {
                fcb.stopped = true;
                return Err(err);
            }
            fcb.offset += part2 as u64;
        }

        if part3 > 0 {
            let current = fcb.start_block + fcb.offset / block_size as u64;
            if let Err(err) = self.read_checked(&mut fcb.buf, 1, current, "file read refill") {
                fcb.stopped = true;
                return Err(err);
            }
            fcb.buf_valid = block_size;
            buffer[part1 + part2..part1 + part2 + part3].copy_from_slice(&fcb.buf[..part3]);
            fcb.buf_index = part3;
            fcb.offset += part3 as u64;
        }

        Ok(part1 + part2 + part3)
    }

    fn write_inner(&mut self, fcb: &mut Fcb, data: &[u8]) -> FsResult<usize> {
        if !fcb.mode.contains(OpenFlag::Write) {
            return Err(FsError::InvalidArgument);
        }
        if data.is_empty() {
            return Ok(0);
        }
        if fcb.stopped {
            log::warn!(
                "write to '{}' suppressed, its contiguous space is exhausted",
                fcb.name
            );
            return Ok(0);
        }

        let block_size = self.vcb.block_size;

        // a seek may have left the pointer past the end; writing always
        // continues from the real end of the file, leaving no holes
        if fcb.offset > fcb.size {
            fcb.offset = fcb.size;
            fcb.buf_index = (fcb.offset % block_size) as usize;
            if fcb.buf_index > 0 {
                let current = fcb.start_block + fcb.offset / block_size;
                if let Err(err) = self.read_checked(&mut fcb.buf, 1, current, "write reposition") {
                    fcb.stopped = true;
                    fcb.poisoned = true;
                    return Err(err);
                }
            }
        }

        let count = data.len();
        let rem = block_size as usize - fcb.buf_index;
        let mut current = fcb.start_block + fcb.offset / block_size;
        let mut end_block = if fcb.num_blocks > 0 {
            fcb.start_block + fcb.num_blocks - 1
        } else {
            fcb.start_block
        };

        // the pointer already sits on a foreign block, nothing can go out
        if current > end_block && self.bitmap.status(current) == BlockStatus::Used {
            fcb.buf_index = 0;
            fcb.stopped = true;
            return Ok(0);
        }
        // the request would spill past the last block of the run into a
        // block that belongs to someone else
        if current == end_block
            && self.bitmap.status(end_block + 1) == BlockStatus::Used
            && count > rem
        {
            fcb.stopped = true;
        }

        let mut transferred = 0usize;

        // fill what is left of the current block, flush it, and report a
        // short write; everything after it is lost
        if fcb.stopped {
            fcb.buf[fcb.buf_index..].copy_from_slice(&data[..rem]);
            fcb.buf_index += rem;
            transferred += rem;

            if let Err(err) = self.write_checked(&fcb.buf, 1, current, "write final block") {
                fcb.poisoned = true;
                return Err(err);
            }
            fcb.offset += block_size;
            current = fcb.start_block + fcb.offset / block_size;
            fcb.buf_index = 0;
            if fcb.offset > fcb.size {
                fcb.size = fcb.offset;
            }
            if current > end_block && self.bitmap.status(current - 1) == BlockStatus::Free {
                fcb.num_blocks += 1;
            }
            return Ok(transferred);
        }

        let (part1, part2, part3, whole_blocks) = if count <= rem {
            (count, 0, 0, 0)
        } else {
            let rest = count - rem;
            let whole = rest / block_size as usize;
            (rem, whole * block_size as usize, rest % block_size as usize, whole)
        };

        if part1 > 0 {
            fcb.buf[fcb.buf_index..fcb.buf_index + part1].copy_from_slice(&data[..part1]);
            fcb.buf_index += part1;
            transferred += part1;
        }

        // part 2 enters with a full buffer: flush it, then stream whole
        // blocks straight from the caller
        if part2 > 0 {
            if let Err(err) = self.write_checked(&fcb.buf, 1, current, "write buffer flush") {
                fcb.stopped = true;
                fcb.poisoned = true;
                return Err(err);
            }
            fcb.offset += block_size;
            current = fcb.start_block + fcb.offset / block_size;
            fcb.buf_index = 0;
            if fcb.offset > fcb.size {
                fcb.size = fcb.offset;
            }
            if current > end_block && self.bitmap.status(current - 1) == BlockStatus::Free {
                fcb.num_blocks += 1;
                end_block += 1;
            }

            for chunk in 0..whole_blocks {
                if current > end_block && self.bitmap.status(current) == BlockStatus::Used {
                    fcb.buf_index = 0;
                    fcb.stopped = true;
                    return Ok(transferred);
                }

                let from = part1 + chunk * block_size as usize;
                if let Err(err) = self.write_checked(
                    &data[from..from + block_size as usize],
                    1,
                    current,
                    "write direct block",
                ) {
                    fcb.stopped = true;
                    fcb.poisoned = true;
                    return Err(err);
                }

                fcb.offset += block_size;
                current = fcb.start_block + fcb.offset / block_size;
                if fcb.offset > fcb.size {
                    fcb.size = fcb.offset;
                }
                if current > end_block && self.bitmap.status(current - 1) == BlockStatus::Free {
                    fcb.num_blocks += 1;
                    end_block += 1;
                }
                transferred += block_size as usize;
            }
        }

        // the residue goes back through the buffer
        if part3 > 0 {
            // without a part 2 the buffer is still full and must be
            // flushed first
            if part2 == 0 {
                if let Err(err) = self.write_checked(&fcb.buf, 1, current, "write buffer flush") {
                    fcb.stopped = true;
                    fcb.poisoned = true;
                    return Err(err);
                }
                fcb.offset += block_size;
                current = fcb.start_block + fcb.offset / block_size;
                fcb.buf_index = 0;
                if fcb.offset > fcb.size {
                    fcb.size = fcb.offset;
                }
                if current > end_block && self.bitmap.status(current - 1) == BlockStatus::Free {
                    fcb.num_blocks += 1;
                    end_block += 1;
                }
            }

            if current > end_block && self.bitmap.status(current) == BlockStatus::Used {
                fcb.buf_index = 0;
                fcb.stopped = true;
                return Ok(transferred);
            }

            fcb.buf[..part3].copy_from_slice(&data[part1 + part2..part1 + part2 + part3]);
            fcb.buf_index = part3;
            transferred += part3;
        }

        Ok(transferred)
    }

    fn close_inner(&mut self, fcb: &mut Fcb) -> FsResult<()> {
        let block_size = self.vcb.block_size;

        if !fcb.mode.contains(OpenFlag::Write) {
            // a plain read only refreshes the opened timestamp
            let mut parent = Directory::load(self, fcb.parent_start_block)?;
            parent.entries[fcb.entry_index].opened = now();
            return parent.store(self);
        }

        if fcb.poisoned {
            log::warn!(
                "close of '{}' after a device fault, metadata left untouched",
                fcb.name
            );
            return Ok(());
        }

        // flush whatever is still sitting in the buffer
        if fcb.buf_index > 0 {
            let end_block = if fcb.num_blocks > 0 {
                fcb.start_block + fcb.num_blocks - 1
            } else {
                fcb.start_block
            };
            let mut current = fcb.start_block + fcb.offset / block_size;

            if current > end_block {
                // the pointer is on a block of our reservation nobody has
                // touched, the buffer goes out as is
                self.write_checked(&fcb.buf, 1, current, "close tail flush")?;
                fcb.offset += fcb.buf_index as u64;
                fcb.buf_index = 0;
                if fcb.offset > fcb.size {
                    fcb.size = fcb.offset;
                }
                fcb.num_blocks += 1;
            } else {
                // the block already carries file data, merge instead of
                // clobbering the bytes outside the written range
                let mut merged = vec![0u8; block_size as usize];
                self.read_checked(&mut merged, 1, current, "close merge load")?;

                let start = (fcb.offset % block_size) as usize;
                let end = fcb.buf_index;
                merged[start..end].copy_from_slice(&fcb.buf[start..end]);
                self.write_checked(&merged, 1, current, "close merge store")?;

                fcb.offset += (end - start) as u64;
                current = fcb.start_block + fcb.offset / block_size;
                fcb.buf_index = 0;
                if fcb.offset > fcb.size {
                    fcb.size = fcb.offset;
                }
                if self.bitmap.status(current) == BlockStatus::Free {
                    fcb.num_blocks += 1;
                }
            }
        }

        let mut parent = Directory::load(self, fcb.parent_start_block)?;
        let previous_size = parent.entries[fcb.entry_index].size;
        let stamp = now();

        let entry = &mut parent.entries[fcb.entry_index];
        entry.set_name(&fcb.name);
        // empty files own no blocks
        entry.start_block = if fcb.size > 0 { fcb.start_block } else { 0 };
        entry.size = fcb.size;
        entry.set_kind(EntryKind::File);
        if fcb.new_file {
            entry.created = stamp;
        }
        entry.modified = stamp;
        entry.opened = stamp;

        if fcb.new_file {
            let root = self.root_dir_start();
            parent.touch(stamp, root);
        }
        parent.store(self)?;

        if fcb.num_blocks > 0 {
            self.mark_used(fcb.start_block, fcb.num_blocks);
            let claimed = if fcb.new_file {
                fcb.num_blocks
            } else {
                fcb.num_blocks - blocks_for(previous_size, block_size)
            };
            self.vcb.num_free_blocks -= claimed;
            self.persist_bitmap()?;
            self.persist_vcb()?;
        }

        log::debug!(
            "closed '{}': {} bytes in {} block(s) at block {}",
            fcb.name,
            fcb.size,
            fcb.num_blocks,
            fcb.start_block
        );
        Ok(())
    }
}
