//! 块位图：每块一位，常驻内存并镜像到磁盘的保留区域。
//!
//! 卷描述符、位图自身以及所有已链接区段的位必须为1。

/// Allocation state of one block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockStatus {
    Free,
    Used,
}

/// 位图区域，按字节寻址，低位在前
#[derive(Debug)]
pub struct Bitmap {
    bytes: Vec<u8>,
    /// 位图所指示的总块数
    num_blocks: u64,
}

impl Bitmap {
    /// An all-free bitmap whose byte buffer spans the whole reserved
    /// region, so persisting it always writes whole blocks.
    pub fn new(num_blocks: u64, region_bytes: usize) -> Self {
        debug_assert!(region_bytes as u64 * 8 >= num_blocks);
        Self {
            bytes: vec![0; region_bytes],
            num_blocks,
        }
    }

    /// Rebuilds the in-memory mirror from the on-disk region.
    pub fn from_bytes(bytes: Vec<u8>, num_blocks: u64) -> Self {
        Self { bytes, num_blocks }
    }

    /// 标记一块为已用。
    /// Out-of-range indices are ignored rather than corrupting a
    /// neighbouring bit.
    pub fn set(&mut self, block: u64) {
        if block >= self.num_blocks {
            log::warn!("bitmap: ignored out-of-range set of block {block}");
            return;
        }
        self.bytes[(block / 8) as usize] |= 1 << (block % 8);
    }

    /// 标记一块为空闲。越界同样被忽略。
    pub fn clear(&mut self, block: u64) {
        if block >= self.num_blocks {
            log::warn!("bitmap: ignored out-of-range clear of block {block}");
            return;
        }
        self.bytes[(block / 8) as usize] &= !(1 << (block % 8));
    }

    /// 查询一块的分配状态。
    /// Out-of-range reads answer `Used`, steering careless callers away
    /// from the reserved and past-the-end regions.
    pub fn status(&self, block: u64) -> BlockStatus {
        if block >= self.num_blocks {
            return BlockStatus::Used;
        }

        if self.bytes[(block / 8) as usize] & (1 << (block % 8)) != 0 {
            BlockStatus::Used
        } else {
            BlockStatus::Free
        }
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_tracks_latest_mark() {
        let mut bitmap = Bitmap::new(64, 8);
        assert_eq!(bitmap.status(9), BlockStatus::Free);

        bitmap.set(9);
        assert_eq!(bitmap.status(9), BlockStatus::Used);
        assert_eq!(bitmap.status(8), BlockStatus::Free);
        assert_eq!(bitmap.status(10), BlockStatus::Free);

        bitmap.clear(9);
        assert_eq!(bitmap.status(9), BlockStatus::Free);
    }

    #[test]
    fn out_of_range_is_used_and_ignored() {
        let mut bitmap = Bitmap::new(16, 2);
        assert_eq!(bitmap.status(16), BlockStatus::Used);
        assert_eq!(bitmap.status(u64::MAX), BlockStatus::Used);

        // neither call may touch any in-range bit
        bitmap.set(16);
        bitmap.clear(16);
        for block in 0..16 {
            assert_eq!(bitmap.status(block), BlockStatus::Free);
        }
    }

    #[test]
    fn mirror_round_trip() {
        let mut bitmap = Bitmap::new(32, 4);
        bitmap.set(0);
        bitmap.set(13);
        bitmap.set(31);

        let reloaded = Bitmap::from_bytes(bitmap.as_bytes().to_vec(), 32);
        for block in 0..32 {
            assert_eq!(reloaded.status(block), bitmap.status(block));
        }
    }
}
