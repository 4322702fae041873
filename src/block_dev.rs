//! # 块设备接口层
//!
//! 块设备是以**块**为单位存储数据的设备，例如磁盘、光盘、U盘等；
//! [`BlockDevice`] 就是对读写块设备的抽象，
//! 实现了此特质的类型称为**块设备驱动**。
//!
//! `contig-fs` 可以通过块设备驱动读写块设备。

use core::any::Any;

/// 块设备驱动特质
///
/// Transfers are whole blocks only. Both methods return the number of
/// blocks actually moved; every caller in this crate treats a short
/// transfer as a hard I/O error.
pub trait BlockDevice: Send + Sync + Any {
    fn read_blocks(&self, buf: &mut [u8], count: u64, start_block: u64) -> u64;
    fn write_blocks(&self, buf: &[u8], count: u64, start_block: u64) -> u64;
}
