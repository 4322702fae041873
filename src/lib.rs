/* contig-fs 的整体架构，自上而下 */

// 复合操作层：目录创建删除、文件删除、移动/重命名、工作目录
mod ops;

// 缓冲文件描述符层：每个打开文件一个单块缓冲区
mod io;
pub use io::{Fd, OpenFlag, OpenMode, Whence};

// 会话层：卷描述符、位图、连续块分配器、路径解析
mod fs;
pub use fs::{DirEntryInfo, FileSystem, ReadDir, Stat};

// 目录层：整目录读写与目录项检索
mod dir;

// 路径层：路径合法性与组件拆分
mod path;

// 磁盘数据结构层
mod layout;
pub use layout::EntryKind;

// 磁盘块设备接口层：读写磁盘块设备的接口
mod block_dev;
pub use block_dev::BlockDevice;

mod error;
pub use error::{FsError, FsResult};

/// Volume signature marking a formatted volume.
pub const MAGIC: u64 = 0xDEADED;

/// The volume descriptor lives in the first block.
pub const VCB_START_BLOCK: u64 = 0;
pub const VCB_BLOCKS: u64 = 1;

/// Entry capacity of every directory; slots 0 and 1 hold the
/// self and parent descriptors. Directories never grow.
pub const MAX_DIR_ENTRIES: usize = 52;

/// Longest permitted entry name, in bytes (the on-disk field keeps
/// one trailing NUL).
pub const NAME_MAX_LEN: usize = 63;

/// Contiguous blocks reserved up front whenever a write-capable open
/// starts a file from scratch.
pub const MIN_RESERVE_BLOCKS: u64 = 5;

/// Size of the open-file descriptor pool.
pub const MAX_OPEN_FILES: usize = 20;

/// Bound on parent-link walks, guarding against corrupted or cyclic links.
pub const MAX_PATH_DEPTH: usize = 50;

/// Index of a directory's own descriptor.
pub(crate) const SELF_ENTRY: usize = 0;
/// Index of the parent descriptor (root's parent is itself).
pub(crate) const PARENT_ENTRY: usize = 1;

#[inline]
pub(crate) fn blocks_for(bytes: u64, block_size: u64) -> u64 {
    bytes.div_ceil(block_size)
}
