//! Space usage reporting for the block allocator

use crate::chunk::CHUNK_SIZE;
use std::fmt;

/// Information about database space usage, as found by
/// [`Database::space_info`](crate::Database::space_info)
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SpaceInfo {
    /// Chunks in the file, the header chunk included
    pub total_chunks: u64,
    /// Blocks currently allocated
    pub allocated_blocks: usize,
    /// Bytes in allocated blocks, headers included
    pub allocated_bytes: u64,
    /// Blocks on the free lists
    pub free_blocks: usize,
    /// Bytes in free blocks
    pub free_bytes: u64,
    /// Size of the largest free block
    pub largest_free_block: usize,
}

impl SpaceInfo {
    /// Create an empty report for a file of `total_chunks`
    pub fn new(total_chunks: u64) -> Self {
        Self { total_chunks, ..Self::default() }
    }

    pub(crate) fn add_free_block(&mut self, size: usize) {
        self.free_blocks += 1;
        self.free_bytes += size as u64;
        self.largest_free_block = self.largest_free_block.max(size);
    }

    pub(crate) fn add_allocated_block(&mut self, size: usize) {
        self.allocated_blocks += 1;
        self.allocated_bytes += size as u64;
    }

    /// Database file size in bytes
    pub fn db_size_bytes(&self) -> u64 {
        self.total_chunks * CHUNK_SIZE as u64
    }

    /// Bytes available for allocation (everything but the header chunk)
    pub fn data_bytes(&self) -> u64 {
        self.total_chunks.saturating_sub(1) * CHUNK_SIZE as u64
    }

    /// Percentage of the data area that is allocated
    pub fn percent_used(&self) -> f64 {
        let data = self.data_bytes();
        if data == 0 {
            0.0
        } else {
            (self.allocated_bytes as f64 / data as f64) * 100.0
        }
    }
}

impl fmt::Display for SpaceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Database Space Usage:")?;
        writeln!(f, "  Total chunks: {} ({} KB)", self.total_chunks, self.db_size_bytes() / 1024)?;
        writeln!(
            f,
            "  Allocated: {} blocks, {} bytes ({:.1}%)",
            self.allocated_blocks,
            self.allocated_bytes,
            self.percent_used()
        )?;
        write!(
            f,
            "  Free: {} blocks, {} bytes (largest {})",
            self.free_blocks, self.free_bytes, self.largest_free_block
        )
    }
}
