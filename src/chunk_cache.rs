//! Shared LRU cache of chunks
//!
//! One cache may serve many databases, bounding the memory used by all of
//! them together. Chunks are handed out as `Arc<Chunk>`; a chunk is pinned
//! for as long as any of those handles is alive and is never evicted while
//! pinned. Dirty chunks are written back before they leave the cache.

use crate::chunk::{Chunk, CHUNK_SIZE};
use crate::error::Result;
use crate::io::ChunkFile;
use lru::LruCache;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{trace, warn};

/// Default cache size (4MB)
pub const DEFAULT_CACHE_SIZE: usize = 4 * 1024 * 1024;

/// Cache key: (file id, chunk index)
type ChunkKey = (u64, u64);

/// Cache statistics
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    /// Lookups served from memory
    pub hits: u64,
    /// Lookups that had to read the file
    pub misses: u64,
    /// Chunks dropped to make room
    pub evictions: u64,
    /// Chunks currently cached
    pub size: usize,
    /// Maximum number of chunks
    pub capacity: usize,
}

impl CacheStats {
    /// Fraction of lookups served from memory
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

struct CacheInner {
    /// Unbounded LRU order; capacity is enforced by `make_room` so that
    /// pinned chunks can be skipped
    chunks: LruCache<ChunkKey, Arc<Chunk>>,
    capacity: usize,
    stats: CacheStats,
}

/// LRU cache of chunks keyed by owning file and chunk index
pub struct ChunkCache {
    inner: Mutex<CacheInner>,
}

impl Default for ChunkCache {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_SIZE)
    }
}

impl ChunkCache {
    /// Create a cache holding at most `max_bytes` worth of chunks
    pub fn new(max_bytes: usize) -> Self {
        Self::with_capacity(max_bytes / CHUNK_SIZE)
    }

    /// Create a cache holding at most `chunks` chunks (at least one)
    pub fn with_capacity(chunks: usize) -> Self {
        let capacity = chunks.max(1);
        Self {
            inner: Mutex::new(CacheInner {
                chunks: LruCache::unbounded(),
                capacity,
                stats: CacheStats { capacity, ..CacheStats::default() },
            }),
        }
    }

    /// Maximum number of cached chunks
    pub fn capacity(&self) -> usize {
        self.inner.lock().capacity
    }

    /// Change the size limit, evicting as needed
    pub fn set_max_size(&self, max_bytes: usize) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.capacity = (max_bytes / CHUNK_SIZE).max(1);
        inner.stats.capacity = inner.capacity;
        while inner.chunks.len() > inner.capacity {
            if !Self::evict_one(&mut inner)? {
                break;
            }
        }
        inner.stats.size = inner.chunks.len();
        Ok(())
    }

    /// Snapshot of the cache statistics
    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock();
        CacheStats { size: inner.chunks.len(), ..inner.stats }
    }

    /// Return chunk `index` of `file`, reading it on a miss
    ///
    /// While cached, repeated requests return the same chunk object, so a
    /// write through one handle is visible through all of them.
    pub fn get_chunk(&self, file: &Arc<ChunkFile>, index: u64) -> Result<Arc<Chunk>> {
        let key = (file.id(), index);
        let mut inner = self.inner.lock();

        let hit = inner.chunks.get(&key).cloned();
        if let Some(chunk) = hit {
            inner.stats.hits += 1;
            return Ok(chunk);
        }

        inner.stats.misses += 1;
        Self::make_room(&mut inner)?;

        trace!(file = file.id(), index, "loading chunk");
        let chunk = Arc::new(Chunk::load(file.clone(), index)?);
        inner.chunks.put(key, chunk.clone());
        Ok(chunk)
    }

    /// Register a zeroed, dirty chunk that is not on disk yet
    pub(crate) fn insert_fresh(&self, file: &Arc<ChunkFile>, index: u64) -> Result<Arc<Chunk>> {
        let mut inner = self.inner.lock();
        Self::make_room(&mut inner)?;

        let chunk = Arc::new(Chunk::fresh(file.clone(), index));
        inner.chunks.put((file.id(), index), chunk.clone());
        Ok(chunk)
    }

    /// Write back every dirty chunk of `file`
    pub fn flush_file(&self, file_id: u64) -> Result<()> {
        let inner = self.inner.lock();
        for ((owner, _), chunk) in inner.chunks.iter() {
            if *owner == file_id {
                chunk.flush()?;
            }
        }
        Ok(())
    }

    /// Drop every chunk of `file`, flushing dirty ones first if `flush`
    pub fn remove_file(&self, file_id: u64, flush: bool) -> Result<()> {
        let mut inner = self.inner.lock();
        let keys: Vec<ChunkKey> =
            inner.chunks.iter().map(|(key, _)| *key).filter(|(owner, _)| *owner == file_id).collect();

        for key in keys {
            if let Some(chunk) = inner.chunks.pop(&key) {
                if flush {
                    chunk.flush()?;
                }
            }
        }
        Ok(())
    }

    /// Evict until there is room for one more chunk
    fn make_room(inner: &mut CacheInner) -> Result<()> {
        while inner.chunks.len() >= inner.capacity {
            if !Self::evict_one(inner)? {
                warn!(
                    size = inner.chunks.len(),
                    capacity = inner.capacity,
                    "all cached chunks are pinned, growing past capacity"
                );
                break;
            }
        }
        Ok(())
    }

    /// Evict the least recently used unpinned chunk
    ///
    /// Returns false when every chunk is pinned.
    fn evict_one(inner: &mut CacheInner) -> Result<bool> {
        // The cache itself holds one reference
        let victim = inner
            .chunks
            .iter()
            .rev()
            .find(|(_, chunk)| Arc::strong_count(chunk) == 1)
            .map(|(key, _)| *key);

        let Some(key) = victim else {
            return Ok(false);
        };

        if let Some(chunk) = inner.chunks.peek(&key) {
            // Keep the chunk cached if the write-back fails
            chunk.flush()?;
        }
        inner.chunks.pop(&key);
        inner.stats.evictions += 1;
        trace!(file = key.0, index = key.1, "evicted chunk");
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::{FileBackend, IoBackend};
    use tempfile::TempDir;

    fn file_with_chunks(dir: &TempDir, name: &str, chunks: u64) -> Arc<ChunkFile> {
        let backend = FileBackend::open(dir.path().join(name)).unwrap();
        backend.set_len(chunks * CHUNK_SIZE as u64).unwrap();
        Arc::new(ChunkFile::new(Box::new(backend)).unwrap())
    }

    #[test]
    fn test_same_chunk_object() {
        let dir = TempDir::new().unwrap();
        let file = file_with_chunks(&dir, "a.db", 2);
        let cache = ChunkCache::with_capacity(4);

        let first = cache.get_chunk(&file, 1).unwrap();
        first.put_i32(0, 42);
        let second = cache.get_chunk(&file, 1).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(second.get_i32(0), 42);

        let stats = cache.stats();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hits, 1);
    }

    #[test]
    fn test_lru_eviction_flushes_dirty() {
        let dir = TempDir::new().unwrap();
        let file = file_with_chunks(&dir, "b.db", 3);
        let cache = ChunkCache::with_capacity(2);

        cache.get_chunk(&file, 0).unwrap().put_i64(8, 77);
        cache.get_chunk(&file, 1).unwrap();
        // Touch chunk 0 so chunk 1 becomes the eviction victim
        cache.get_chunk(&file, 0).unwrap();
        cache.get_chunk(&file, 2).unwrap();

        let stats = cache.stats();
        assert_eq!(stats.evictions, 1);
        assert_eq!(stats.size, 2);

        // Chunk 0 survived, so it must still be the same dirty chunk
        let zero = cache.get_chunk(&file, 0).unwrap();
        assert!(zero.is_dirty());

        // Evict chunk 0 and confirm the value reached the disk
        drop(zero);
        cache.get_chunk(&file, 1).unwrap();
        cache.get_chunk(&file, 2).unwrap();
        let reread = Chunk::load(file.clone(), 0).unwrap();
        assert_eq!(reread.get_i64(8), 77);
    }

    #[test]
    fn test_pinned_chunks_are_not_evicted() {
        let dir = TempDir::new().unwrap();
        let file = file_with_chunks(&dir, "c.db", 3);
        let cache = ChunkCache::with_capacity(1);

        let pinned = cache.get_chunk(&file, 0).unwrap();
        let other = cache.get_chunk(&file, 1).unwrap();
        assert_eq!(cache.stats().size, 2);
        assert_eq!(cache.stats().evictions, 0);

        drop(other);
        cache.get_chunk(&file, 2).unwrap();
        // Chunk 1 was unpinned and went; chunk 0 is still the same object
        assert!(Arc::ptr_eq(&pinned, &cache.get_chunk(&file, 0).unwrap()));
    }

    #[test]
    fn test_shared_between_files() {
        let dir = TempDir::new().unwrap();
        let a = file_with_chunks(&dir, "a.db", 1);
        let b = file_with_chunks(&dir, "b.db", 1);
        let cache = ChunkCache::with_capacity(8);

        cache.get_chunk(&a, 0).unwrap().put_i32(0, 1);
        cache.get_chunk(&b, 0).unwrap().put_i32(0, 2);
        assert_eq!(cache.get_chunk(&a, 0).unwrap().get_i32(0), 1);
        assert_eq!(cache.get_chunk(&b, 0).unwrap().get_i32(0), 2);

        cache.remove_file(a.id(), true).unwrap();
        assert_eq!(cache.stats().size, 1);
        assert_eq!(Chunk::load(a, 0).unwrap().get_i32(0), 1);
    }

    #[test]
    fn test_shrinking_evicts() {
        let dir = TempDir::new().unwrap();
        let file = file_with_chunks(&dir, "d.db", 4);
        let cache = ChunkCache::with_capacity(4);
        for index in 0..4 {
            cache.get_chunk(&file, index).unwrap();
        }
        cache.set_max_size(2 * CHUNK_SIZE).unwrap();
        assert_eq!(cache.stats().size, 2);
        assert_eq!(cache.capacity(), 2);
    }
}
