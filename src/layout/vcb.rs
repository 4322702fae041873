use core::{mem, ptr, slice};

use crate::MAGIC;

/// 卷描述符：
/// - 提供文件系统合法性校验；
/// - 定位其它连续区域；
/// - 记录空闲块数量
///
/// Persisted at block 0, loaded at mount, rewritten on every change to
/// the free-space accounting.
#[derive(Debug, Default, Clone)]
#[repr(C)]
pub struct Vcb {
    /// 魔数：用于校验文件系统合法性
    signature: u64,
    /// 卷的总块数
    pub num_blocks: u64,
    /// 块大小（字节）
    pub block_size: u64,
    /// 空闲区域的起始块（根目录之后）
    pub free_space_start: u64,
    /// 剩余空闲块数量
    pub num_free_blocks: u64,
    /// 位图的起始块
    pub bitmap_start: u64,
    /// 位图占用块数
    pub bitmap_blocks: u64,
    /// 根目录的起始块
    pub root_dir_start: u64,
    /// 每个目录占用的块数
    pub dir_blocks: u64,
}

impl Vcb {
    pub const SIZE: usize = mem::size_of::<Self>();

    /// 新卷的描述符，生成即带合法魔数。
    /// `root_dir_start` 要等根目录分配完成后补填。
    pub fn new(
        num_blocks: u64,
        block_size: u64,
        free_space_start: u64,
        num_free_blocks: u64,
        bitmap_start: u64,
        bitmap_blocks: u64,
        dir_blocks: u64,
    ) -> Self {
        Self {
            signature: MAGIC,
            num_blocks,
            block_size,
            free_space_start,
            num_free_blocks,
            bitmap_start,
            bitmap_blocks,
            root_dir_start: 0,
            dir_blocks,
        }
    }

    #[inline]
    pub fn is_valid(&self) -> bool {
        self.signature == MAGIC
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
