// 分片规划：按固定分片大小切出有序字节区间

/// 默认分片大小
pub const CHUNK_SIZE: u64 = 512 * 1024;

/// 小文件阈值：不超过该值的文件走单分片路径
pub const CHUNK_THRESHOLD: u64 = 512 * 1024;

/// 一个分片的闭区间字节范围 `[start, end]`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkRange {
    /// 分片序号（0 起）
    pub index: u32,
    /// 起始字节（含）
    pub start: u64,
    /// 结束字节（含）
    pub end: u64,
}

impl ChunkRange {
    /// 分片字节数
    #[must_use]
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.end < self.start
    }
}

/// 按默认分片大小规划
#[must_use]
pub fn plan_chunks(total_size: u64) -> Vec<ChunkRange> {
    plan_chunks_with(total_size, CHUNK_SIZE)
}

/// 规划分片：`max(1, ceil(total_size / chunk_size))` 个分片，
/// 末片取剩余字节
#[must_use]
pub fn plan_chunks_with(total_size: u64, chunk_size: u64) -> Vec<ChunkRange> {
    let mut num_chunks = (total_size + chunk_size - 1) / chunk_size;
    if num_chunks == 0 {
        num_chunks = 1;
    }

    let mut chunks = Vec::with_capacity(num_chunks as usize);
    for i in 0..num_chunks {
        let start = i * chunk_size;
        let end = ((i + 1) * chunk_size).min(total_size).saturating_sub(1);
        chunks.push(ChunkRange { index: i as u32, start, end });
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_small_file_single_chunk() {
        let chunks = plan_chunks(400_000);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0], ChunkRange { index: 0, start: 0, end: 399_999 });
        assert_eq!(chunks[0].len(), 400_000);
    }

    #[test]
    fn test_exact_multiple_of_chunk_size() {
        let chunks = plan_chunks(2_097_152);
        assert_eq!(chunks.len(), 4);
        assert_eq!(chunks[0], ChunkRange { index: 0, start: 0, end: 524_287 });
        assert_eq!(chunks[1], ChunkRange { index: 1, start: 524_288, end: 1_048_575 });
        assert_eq!(chunks[2], ChunkRange { index: 2, start: 1_048_576, end: 1_572_863 });
        assert_eq!(chunks[3], ChunkRange { index: 3, start: 1_572_864, end: 2_097_151 });
    }

    #[test]
    fn test_last_chunk_takes_remainder() {
        let chunks = plan_chunks(CHUNK_SIZE + 100);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[1].start, CHUNK_SIZE);
        assert_eq!(chunks[1].end, CHUNK_SIZE + 99);
        assert_eq!(chunks[1].len(), 100);
    }

    #[test]
    fn test_one_byte_file() {
        let chunks = plan_chunks(1);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0], ChunkRange { index: 0, start: 0, end: 0 });
        assert_eq!(chunks[0].len(), 1);
    }

    #[test]
    fn test_threshold_boundary() {
        // 刚好等于分片大小：单分片
        assert_eq!(plan_chunks(CHUNK_SIZE).len(), 1);
        // 超过一个字节：两个分片
        assert_eq!(plan_chunks(CHUNK_SIZE + 1).len(), 2);
    }

    #[test]
    fn test_ranges_cover_file_without_overlap() {
        let total = 3 * CHUNK_SIZE + 12_345;
        let chunks = plan_chunks_with(total, CHUNK_SIZE);
        let mut expected_start = 0;
        for chunk in &chunks {
            assert_eq!(chunk.start, expected_start);
            expected_start = chunk.end + 1;
        }
        assert_eq!(expected_start, total);
    }
}
