//! 复合操作层：目录创建删除、文件删除、移动/重命名、工作目录。
//!
//! Every operation resolves its path, edits whole directories in memory
//! and persists in a fixed order: directory blocks first (child before
//! parent), then the bitmap, then the volume descriptor. A failure
//! aborts the rest of the sequence; earlier steps are not rolled back.

use crate::dir::Directory;
use crate::error::{FsError, FsResult};
use crate::fs::{now, FileSystem};
use crate::layout::DirEntry;
use crate::{blocks_for, MAX_DIR_ENTRIES, NAME_MAX_LEN, PARENT_ENTRY, SELF_ENTRY};

impl FileSystem {
    /// Creates an empty directory at `path`.
    pub fn mkdir(&mut self, path: &str) -> FsResult<()> {
        let (mut parent, basename) = self.resolve_parent(path)?;
        // 根目录天然存在
        let name = basename.ok_or(FsError::AlreadyExists)?;
        if name.len() > NAME_MAX_LEN {
            return Err(FsError::NameTooLong);
        }
        if parent.index_by_name(Some(name)).is_some() {
            return Err(FsError::AlreadyExists);
        }
        let slot = parent.first_free_index().ok_or(FsError::DirectoryFull)?;

        let dir_blocks = self.dir_blocks();
        let start = self.find_contiguous_free(dir_blocks)?;
        let dir_bytes = (MAX_DIR_ENTRIES * DirEntry::SIZE) as u64;
        let stamp = now();

        let child = Directory::new_child(start, dir_bytes, &parent.entries[SELF_ENTRY], stamp);
        child.store(self)?;

        parent.entries[slot] = child.entries[SELF_ENTRY].clone();
        parent.entries[slot].set_name(name);
        parent.touch(stamp, self.root_dir_start());
        parent.store(self)?;

        self.mark_used(start, dir_blocks);
        self.vcb.num_free_blocks -= dir_blocks;
        self.persist_bitmap()?;
        self.persist_vcb()?;

        log::debug!("mkdir '{name}' at block {start}");
        Ok(())
    }

    /// Removes the empty directory at `path`. Root, the working
    /// directory and non-empty directories are refused.
    pub fn rmdir(&mut self, path: &str) -> FsResult<()> {
        let (mut parent, basename) = self.resolve_parent(path)?;
        let name = basename.ok_or(FsError::PolicyViolation)?;
        let index = parent.index_by_name(Some(name)).ok_or(FsError::NotFound)?;

        let start = parent.entries[index].start_block;
        if start == self.root_dir_start() || start == self.cwd_start_block {
            return Err(FsError::PolicyViolation);
        }
        if !parent.entries[index].is_dir() {
            return Err(FsError::WrongEntryType);
        }

        let victim = Directory::load(self, start)?;
        if victim.next_used_index(2).is_some() {
            return Err(FsError::PolicyViolation);
        }

        parent.entries[index].clear();
        parent.touch(now(), self.root_dir_start());
        parent.store(self)?;

        let dir_blocks = self.dir_blocks();
        self.mark_free(start, dir_blocks);
        self.vcb.num_free_blocks += dir_blocks;
        self.persist_bitmap()?;
        self.persist_vcb()?;

        log::debug!("rmdir '{name}', freed {dir_blocks} block(s) at {start}");
        Ok(())
    }

    /// Deletes the file at `path` and releases its extent.
    pub fn remove_file(&mut self, path: &str) -> FsResult<()> {
        let (mut parent, basename) = self.resolve_parent(path)?;
        let name = basename.ok_or(FsError::WrongEntryType)?;
        let index = parent.index_by_name(Some(name)).ok_or(FsError::NotFound)?;
        if !parent.entries[index].is_file() {
            return Err(FsError::WrongEntryType);
        }

        let start = parent.entries[index].start_block;
        // an empty file owns no blocks
        let count = blocks_for(parent.entries[index].size, self.vcb.block_size);

        parent.entries[index].clear();
        parent.touch(now(), self.root_dir_start());
        parent.store(self)?;

        if count > 0 {
            self.mark_free(start, count);
            self.vcb.num_free_blocks += count;
            self.persist_bitmap()?;
            self.persist_vcb()?;
        }

        log::debug!("deleted '{name}', freed {count} block(s)");
        Ok(())
    }

    /// Moves or renames `src` to `dest`.
    ///
    /// A destination naming an existing directory acts as a container:
    /// the entry keeps its own name and lands inside it. Overwriting is
    /// allowed between equal kinds only, and an overwritten directory
    /// must be empty. Root never moves, and neither the working
    /// directory nor any of its ancestors may leave its place.
    pub fn rename(&mut self, src: &str, dest: &str) -> FsResult<()> {
        let (mut src_parent, src_name) = self.resolve_parent(src)?;
        let (mut dest_parent, dest_name) = self.resolve_parent(dest)?;

        if dest_name.is_some_and(|name| name.len() > NAME_MAX_LEN) {
            return Err(FsError::NameTooLong);
        }

        let src_index = src_parent.index_by_name(src_name).ok_or(FsError::NotFound)?;
        let mut dest_index = dest_parent.index_by_name(dest_name);

        // the same slot in the same directory is a refused no-op
        if src_parent.start_block() == dest_parent.start_block() && dest_index == Some(src_index) {
            return Err(FsError::PolicyViolation);
        }

        let src_start = src_parent.entries[src_index].start_block;
        let src_is_dir = src_parent.entries[src_index].is_dir();

        // a directory can never land on top of a file
        if let Some(di) = dest_index {
            if src_is_dir && !dest_parent.entries[di].is_dir() {
                return Err(FsError::WrongEntryType);
            }
        }

        if src_start == self.root_dir_start() {
            return Err(FsError::PolicyViolation);
        }

        // moving a directory into itself or its own descendant would
        // orphan the whole subtree
        if src_is_dir {
            if let Some(di) = dest_index {
                if dest_parent.entries[di].is_dir() {
                    let dest_start = dest_parent.entries[di].start_block;
                    if dest_start == src_start || self.is_descendant_of(dest_start, src_start)? {
                        return Err(FsError::PolicyViolation);
                    }
                }
            }
        }

        let mut final_name = match dest_name {
            Some(name) => name.to_owned(),
            None => src_parent.entries[src_index].name().to_owned(),
        };

        // an existing directory as destination is a container; the real
        // destination is the source's name inside it
        if let Some(di) = dest_index {
            if dest_parent.entries[di].is_dir() {
                let into = dest_parent.entries[di].start_block;
                dest_parent = Directory::load(self, into)?;
                final_name = src_parent.entries[src_index].name().to_owned();
                dest_index = dest_parent.index_by_name(Some(&final_name));

                if dest_parent.start_block() == src_parent.start_block()
                    && dest_index == Some(src_index)
                {
                    return Err(FsError::PolicyViolation);
                }
                if let Some(di) = dest_index {
                    if src_is_dir != dest_parent.entries[di].is_dir() {
                        return Err(FsError::WrongEntryType);
                    }
                }
            }
        }

        // the destination directory itself must not lie inside the moved
        // subtree, or the subtree would detach into an unreachable cycle
        if src_is_dir
            && (dest_parent.start_block() == src_start
                || self.is_descendant_of(dest_parent.start_block(), src_start)?)
        {
            return Err(FsError::PolicyViolation);
        }

        let stamp = now();
        let root = self.root_dir_start();
        let same_parent = src_parent.start_block() == dest_parent.start_block();

        if same_parent {
            match dest_index {
                // plain rename, only the name field changes
                None => {
                    src_parent.entries[src_index].set_name(&final_name);
                    src_parent.touch(stamp, root);
                    src_parent.store(self)?;
                }
                // overwrite a sibling file in place
                Some(di) => {
                    let victim_start = src_parent.entries[di].start_block;
                    let victim_blocks =
                        blocks_for(src_parent.entries[di].size, self.vcb.block_size);

                    src_parent.entries[di] = src_parent.entries[src_index].clone();
                    src_parent.entries[di].set_name(&final_name);
                    src_parent.entries[di].modified = stamp;
                    src_parent.entries[src_index].clear();
                    src_parent.touch(stamp, root);
                    src_parent.store(self)?;

                    if victim_blocks > 0 {
                        self.mark_free(victim_start, victim_blocks);
                        self.vcb.num_free_blocks += victim_blocks;
                        self.persist_bitmap()?;
                        self.persist_vcb()?;
                    }
                }
            }
            return Ok(());
        }

        // a true move must not displace the working directory or any
        // directory on its parent chain
        if self.is_descendant_of(self.cwd_start_block, src_start)? {
            return Err(FsError::PolicyViolation);
        }

        let mut freed = None;
        let slot = match dest_index {
            Some(di) => {
                if dest_parent.entries[di].is_dir() {
                    let victim = Directory::load(self, dest_parent.entries[di].start_block)?;
                    if victim.next_used_index(2).is_some()
                        || victim.start_block() == root
                        || victim.start_block() == self.cwd_start_block
                    {
                        return Err(FsError::PolicyViolation);
                    }
                }
                let victim_blocks = blocks_for(dest_parent.entries[di].size, self.vcb.block_size);
                if victim_blocks > 0 {
                    freed = Some((dest_parent.entries[di].start_block, victim_blocks));
                }
                di
            }
            None => dest_parent.first_free_index().ok_or(FsError::DirectoryFull)?,
        };

        dest_parent.entries[slot] = src_parent.entries[src_index].clone();
        dest_parent.entries[slot].set_name(&final_name);
        dest_parent.entries[slot].modified = stamp;
        dest_parent.touch(stamp, root);
        dest_parent.store(self)?;

        // a moved directory carries its parent pointer with it
        if src_is_dir {
            let mut moved = Directory::load(self, src_start)?;
            moved.entries[SELF_ENTRY].modified = stamp;
            moved.entries[PARENT_ENTRY] = dest_parent.entries[SELF_ENTRY].clone();
            moved.entries[PARENT_ENTRY].set_name("..");
            moved.store(self)?;
        }

        src_parent.entries[src_index].clear();
        src_parent.touch(stamp, root);
        src_parent.store(self)?;

        if let Some((start, count)) = freed {
            self.mark_free(start, count);
            self.vcb.num_free_blocks += count;
            self.persist_bitmap()?;
            self.persist_vcb()?;
        }
        Ok(())
    }

    /// Changes the working directory. `/` and the empty path both lead
    /// back to root.
    pub fn set_cwd(&mut self, path: &str) -> FsResult<()> {
        let (parent, basename) = self.resolve_parent(path)?;
        let Some(name) = basename else {
            self.cwd_start_block = self.root_dir_start();
            return Ok(());
        };

        let index = parent.index_by_name(Some(name)).ok_or(FsError::NotFound)?;
        if !parent.entries[index].is_dir() {
            return Err(FsError::WrongEntryType);
        }
        self.cwd_start_block = parent.entries[index].start_block;
        Ok(())
    }

    /// Absolute path of the working directory.
    pub fn cwd_path(&self) -> FsResult<String> {
        self.dir_abs_path(self.cwd_start_block)
    }
}
