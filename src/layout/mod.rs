//! # 磁盘数据结构层
//!
//! contig-fs 的磁盘布局：
//! 卷描述符 | 块位图 | 根目录 | 空闲池与文件/目录区段

mod vcb;
pub use vcb::Vcb;

mod bitmap;
pub use bitmap::{Bitmap, BlockStatus};

/// 目录项，也属于磁盘文件系统数据结构
mod dir_entry;
pub use dir_entry::{DirEntry, EntryKind};
