use core::{mem, ptr, slice};

use crate::NAME_MAX_LEN;

// 最后一字节留给 \0
const NAME_CAP: usize = NAME_MAX_LEN + 1;

const KIND_FREE: i32 = -1;
const KIND_FILE: i32 = 0;
const KIND_DIRECTORY: i32 = 1;

/// What a directory slot currently describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EntryKind {
    File,
    Directory,
    /// The slot carries no entry and may be reused.
    #[default]
    Free,
}

/// 文件系统项的元信息，定长记录
///
/// Entries never relocate inside their directory once occupied, except
/// through an explicit rename/move.
#[derive(Debug, Clone)]
#[repr(C)]
pub struct DirEntry {
    name: [u8; NAME_CAP],
    pub start_block: u64,
    /// 以字节计的真实大小，从不记录预留大小
    pub size: u64,
    kind: i32,
    // explicit so the record has no hidden padding
    _pad: u32,
    pub created: i64,
    pub modified: i64,
    pub opened: i64,
}

impl DirEntry {
    /// 元信息大小恒为112字节
    pub const SIZE: usize = mem::size_of::<Self>();

    pub fn new(name: &str, start_block: u64, size: u64, kind: EntryKind, now: i64) -> Self {
        let mut entry = Self {
            start_block,
            size,
            created: now,
            modified: now,
            opened: now,
            ..Self::default()
        };
        entry.set_name(name);
        entry.set_kind(kind);
        entry
    }

    pub fn name(&self) -> &str {
        let len = self
            .name
            .iter()
            .position(|&c| c == 0)
            .unwrap_or(NAME_MAX_LEN);
        core::str::from_utf8(&self.name[..len]).unwrap_or_default()
    }

    /// 调用前必须保证名字长度合法
    pub fn set_name(&mut self, name: &str) {
        let bytes = name.as_bytes();
        debug_assert!(bytes.len() <= NAME_MAX_LEN);
        self.name = [0; NAME_CAP];
        self.name[..bytes.len()].copy_from_slice(bytes);
    }

    pub fn kind(&self) -> EntryKind {
        match self.kind {
            KIND_FILE => EntryKind::File,
            KIND_DIRECTORY => EntryKind::Directory,
            // KIND_FREE and anything unrecognised
            _ => EntryKind::Free,
        }
    }

    pub fn set_kind(&mut self, kind: EntryKind) {
        self.kind = match kind {
            EntryKind::File => KIND_FILE,
            EntryKind::Directory => KIND_DIRECTORY,
            EntryKind::Free => KIND_FREE,
        };
    }

    #[inline]
    pub fn is_free(&self) -> bool {
        self.kind() == EntryKind::Free
    }

    #[inline]
    pub fn is_file(&self) -> bool {
        self.kind() == EntryKind::File
    }

    #[inline]
    pub fn is_dir(&self) -> bool {
        self.kind() == EntryKind::Directory
    }

    /// Wipes every field back to the free state. Leftover metadata would
    /// confuse the linear searches, so all of it goes.
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        unsafe { slice::from_raw_parts(ptr::from_ref(self).cast(), Self::SIZE) }
    }

    #[inline]
    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        unsafe { slice::from_raw_parts_mut(ptr::from_mut(self).cast(), Self::SIZE) }
    }
}

impl Default for DirEntry {
    fn default() -> Self {
        Self {
            name: [0; NAME_CAP],
            start_block: 0,
            size: 0,
            kind: KIND_FREE,
            _pad: 0,
            created: 0,
            modified: 0,
            opened: 0,
        }
    }
}
