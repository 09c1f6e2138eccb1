//! Chunk-granular file I/O

use crate::chunk::CHUNK_SIZE;
use crate::error::{Error, Result};
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

/// I/O backend trait
///
/// Backends move whole chunks. They know nothing about the allocator or
/// the chunk cache sitting above them.
pub trait IoBackend: Send + Sync {
    /// Read chunk `index` into `buf` (exactly `CHUNK_SIZE` bytes)
    fn read_chunk(&self, index: u64, buf: &mut [u8]) -> Result<()>;

    /// Write `buf` (exactly `CHUNK_SIZE` bytes) as chunk `index`
    fn write_chunk(&self, index: u64, buf: &[u8]) -> Result<()>;

    /// Sync data to disk
    fn sync(&self) -> Result<()>;

    /// Current length of the backing store in bytes
    fn len(&self) -> Result<u64>;

    /// Truncate or extend the backing store to `len` bytes
    fn set_len(&self, len: u64) -> Result<()>;

    /// Check whether the backing store is empty
    fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

/// Standard I/O backend over a regular file
pub struct FileBackend {
    /// The underlying file, seek+read/write happen under this lock
    file: Mutex<File>,
    /// File path, kept for diagnostics
    path: PathBuf,
}

impl FileBackend {
    /// Open or create the file at `path`
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| Error::Io(format!("{}: {}", path.display(), e)))?;

        Ok(Self { file: Mutex::new(file), path })
    }

    /// Path of the backing file
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl IoBackend for FileBackend {
    fn read_chunk(&self, index: u64, buf: &mut [u8]) -> Result<()> {
        debug_assert_eq!(buf.len(), CHUNK_SIZE);
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(index * CHUNK_SIZE as u64))?;
        file.read_exact(buf)?;
        Ok(())
    }

    fn write_chunk(&self, index: u64, buf: &[u8]) -> Result<()> {
        debug_assert_eq!(buf.len(), CHUNK_SIZE);
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(index * CHUNK_SIZE as u64))?;
        file.write_all(buf)?;
        Ok(())
    }

    fn sync(&self) -> Result<()> {
        self.file.lock().sync_data()?;
        Ok(())
    }

    fn len(&self) -> Result<u64> {
        Ok(self.file.lock().metadata()?.len())
    }

    fn set_len(&self, len: u64) -> Result<()> {
        self.file.lock().set_len(len)?;
        Ok(())
    }
}

static NEXT_FILE_ID: AtomicU64 = AtomicU64::new(1);

/// A backend plus the identity the chunk cache keys it by
///
/// `chunk_count` is the logical extent of the database. It may run ahead of
/// the physical file length while freshly appended chunks are still only in
/// the cache; they reach the disk when flushed or evicted.
pub struct ChunkFile {
    id: u64,
    backend: Box<dyn IoBackend>,
    chunk_count: AtomicU64,
}

impl ChunkFile {
    /// Wrap a backend, deriving the chunk count from its length
    pub fn new(backend: Box<dyn IoBackend>) -> Result<Self> {
        let len = backend.len()?;
        if len % CHUNK_SIZE as u64 != 0 {
            return Err(Error::corruption(format!(
                "file length {} is not a multiple of the chunk size {}",
                len, CHUNK_SIZE
            )));
        }

        Ok(Self {
            id: NEXT_FILE_ID.fetch_add(1, Ordering::Relaxed),
            backend,
            chunk_count: AtomicU64::new(len / CHUNK_SIZE as u64),
        })
    }

    /// Process-unique id of this file
    #[inline]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Number of chunks in the logical extent
    #[inline]
    pub fn chunk_count(&self) -> u64 {
        self.chunk_count.load(Ordering::Acquire)
    }

    /// Reserve the next chunk index at the end of the file
    pub(crate) fn append_chunk(&self) -> u64 {
        self.chunk_count.fetch_add(1, Ordering::AcqRel)
    }

    /// Shrink or grow the extent, physically truncating the file
    pub(crate) fn truncate(&self, chunks: u64) -> Result<()> {
        self.backend.set_len(chunks * CHUNK_SIZE as u64)?;
        self.chunk_count.store(chunks, Ordering::Release);
        Ok(())
    }

    /// The backend
    #[inline]
    pub fn backend(&self) -> &dyn IoBackend {
        self.backend.as_ref()
    }
}
