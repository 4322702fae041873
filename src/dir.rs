//! 目录层。
//!
//! Directories occupy a fixed run of contiguous blocks holding a
//! fixed-capacity entry array, and are always read and rewritten whole;
//! there is no partial in-place update. Slot 0 describes the directory
//! itself, slot 1 its parent (root's parent is root).

use crate::error::FsResult;
use crate::fs::FileSystem;
use crate::layout::{DirEntry, EntryKind};
use crate::{MAX_DIR_ENTRIES, PARENT_ENTRY, SELF_ENTRY};

#[derive(Debug, Clone)]
pub(crate) struct Directory {
    pub entries: Vec<DirEntry>,
}

impl Directory {
    /// Reads all of the directory's blocks and decodes the entry array.
    pub fn load(fs: &FileSystem, start_block: u64) -> FsResult<Self> {
        let mut buf = vec![0u8; (fs.dir_blocks() * fs.block_size()) as usize];
        fs.read_checked(&mut buf, fs.dir_blocks(), start_block, "directory load")?;

        let entries = buf
            .chunks_exact(DirEntry::SIZE)
            .take(MAX_DIR_ENTRIES)
            .map(|chunk| {
                let mut entry = DirEntry::default();
                entry.as_bytes_mut().copy_from_slice(chunk);
                entry
            })
            .collect();

        Ok(Self { entries })
    }

    /// Writes the whole entry array back to the directory's own blocks.
    pub fn store(&self, fs: &FileSystem) -> FsResult<()> {
        let mut buf = vec![0u8; (fs.dir_blocks() * fs.block_size()) as usize];
        for (chunk, entry) in buf.chunks_exact_mut(DirEntry::SIZE).zip(&self.entries) {
            chunk.copy_from_slice(entry.as_bytes());
        }

        fs.write_checked(&buf, fs.dir_blocks(), self.start_block(), "directory store")
    }

    /// A freshly initialised directory: self and parent descriptors set,
    /// every other slot free.
    pub fn new_child(start_block: u64, dir_bytes: u64, parent_self: &DirEntry, now: i64) -> Self {
        let mut entries = vec![DirEntry::default(); MAX_DIR_ENTRIES];

        entries[SELF_ENTRY] =
            DirEntry::new(".", start_block, dir_bytes, EntryKind::Directory, now);
        entries[PARENT_ENTRY] = parent_self.clone();
        entries[PARENT_ENTRY].set_name("..");
        entries[PARENT_ENTRY].modified = now;

        Self { entries }
    }

    /// The root directory is its own parent.
    pub fn new_root(start_block: u64, dir_bytes: u64, now: i64) -> Self {
        let mut root = Self::new_child(
            start_block,
            dir_bytes,
            &DirEntry::new(".", start_block, dir_bytes, EntryKind::Directory, now),
            now,
        );
        root.entries[PARENT_ENTRY].created = now;
        root
    }

    #[inline]
    pub fn start_block(&self) -> u64 {
        self.entries[SELF_ENTRY].start_block
    }

    #[inline]
    pub fn parent_start_block(&self) -> u64 {
        self.entries[PARENT_ENTRY].start_block
    }

    /// Linear scan over the occupied slots. `None` means "self",
    /// answering slot 0; handy for the root, which has no name anywhere.
    pub fn index_by_name(&self, name: Option<&str>) -> Option<usize> {
        let name = match name {
            Some(name) => name,
            None => return Some(SELF_ENTRY),
        };

        self.entries
            .iter()
            .position(|entry| !entry.is_free() && entry.name() == name)
    }

    /// Finds the slot pointing at `start_block`. A directory stores its
    /// parent's location, not its own name, so this is how a child's own
    /// entry is recovered from the parent.
    pub fn index_by_start_block(&self, start_block: u64) -> Option<usize> {
        self.entries
            .iter()
            .position(|entry| !entry.is_free() && entry.start_block == start_block)
    }

    /// First free slot in index order; `None` means the directory is at
    /// capacity and the operation must fail, since directories never grow.
    pub fn first_free_index(&self) -> Option<usize> {
        self.entries.iter().position(DirEntry::is_free)
    }

    /// Next occupied slot at or after `start_index`.
    pub fn next_used_index(&self, start_index: usize) -> Option<usize> {
        self.entries[start_index..]
            .iter()
            .position(|entry| !entry.is_free())
            .map(|offset| start_index + offset)
    }

    /// Bumps the directory's own modified time. Root keeps a duplicate in
    /// its parent slot, being its own parent.
    pub fn touch(&mut self, now: i64, root_dir_start: u64) {
        self.entries[SELF_ENTRY].modified = now;
        if self.start_block() == root_dir_start {
            self.entries[PARENT_ENTRY].modified = now;
        }
    }
}
