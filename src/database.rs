//! The paged database: allocator, typed accessors and locking
//!
//! A database is a growable file of [`CHUNK_SIZE`] chunks. Chunk 0 holds the
//! header (format version, magic, one free-list anchor per size class) and a
//! caller-owned data area starting at [`DATA_AREA`]. Every other chunk is
//! carved into blocks by [`Database::malloc`].
//!
//! Block layout:
//!
//! ```text
//! allocated: [-size: i32][payload ...........]
//!                        ^ record address
//! free:      [+size: i32][prev: u64][next: u64][...]
//! ```
//!
//! Block sizes are multiples of [`BLOCK_SIZE_DELTA`]; blocks never cross a
//! chunk boundary and tile each data chunk exactly.

use crate::chunk::{Chunk, CHUNK_SIZE};
use crate::chunk_cache::ChunkCache;
use crate::error::{Error, Record, Result};
use crate::io::{ChunkFile, FileBackend, IoBackend};
use crate::lock::{DbLock, LockSnapshot, ProgressMonitor, DEFAULT_CANCELLATION_CHECK_INTERVAL};
use crate::space_info::SpaceInfo;
use static_assertions::const_assert;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::ThreadId;
use std::time::Duration;
use tracing::{debug, warn};

/// Size of the block header preceding every record
pub const BLOCK_HEADER_SIZE: usize = 4;

/// Allocation granularity
pub const BLOCK_SIZE_DELTA: usize = 16;

/// Smallest block, in deltas (room for the free-list links)
pub const MIN_BLOCK_DELTAS: usize = 2;

/// Largest block, in deltas (a whole chunk)
pub const MAX_BLOCK_DELTAS: usize = CHUNK_SIZE / BLOCK_SIZE_DELTA;

/// Largest size `malloc` accepts
pub const MAX_MALLOC_SIZE: usize = MAX_BLOCK_DELTAS * BLOCK_SIZE_DELTA - BLOCK_HEADER_SIZE;

/// Size of a stored record pointer
pub const RECORD_SIZE: usize = 8;

/// Offset of the format version
pub const VERSION_OFFSET: u64 = 0;

/// Offset of the file magic
pub const MAGIC_OFFSET: u64 = 4;

/// Offset of the free-list anchor for `MIN_BLOCK_DELTAS`
pub const FREE_BLOCK_OFFSET: u64 = 8;

/// First byte of the caller-owned area in chunk 0
pub const DATA_AREA: u64 = 2048;

/// End (exclusive) of the caller-owned area
pub const DATA_AREA_END: u64 = CHUNK_SIZE as u64;

/// Magic number identifying database files
pub const MAGIC: u32 = 0x5044_4F4D;

/// Offset of the previous-block link inside a free block
pub const FREE_BLOCK_PREV: usize = 4;

/// Offset of the next-block link inside a free block
pub const FREE_BLOCK_NEXT: usize = 12;

const_assert!(FREE_BLOCK_NEXT + RECORD_SIZE <= MIN_BLOCK_DELTAS * BLOCK_SIZE_DELTA);
const_assert!(FREE_BLOCK_OFFSET as usize + (MAX_BLOCK_DELTAS - MIN_BLOCK_DELTAS + 1) * RECORD_SIZE <= DATA_AREA as usize);
const_assert!(CHUNK_SIZE % BLOCK_SIZE_DELTA == 0);

/// Number of deltas a request of `size` bytes occupies, header included
#[inline]
fn deltas_for(size: usize) -> usize {
    let deltas = (size + BLOCK_HEADER_SIZE).div_ceil(BLOCK_SIZE_DELTA);
    deltas.max(MIN_BLOCK_DELTAS)
}

/// Address of the free-list anchor for blocks of `deltas` deltas
#[inline]
pub fn free_list_anchor(deltas: usize) -> u64 {
    debug_assert!((MIN_BLOCK_DELTAS..=MAX_BLOCK_DELTAS).contains(&deltas));
    FREE_BLOCK_OFFSET + ((deltas - MIN_BLOCK_DELTAS) * RECORD_SIZE) as u64
}

#[inline]
fn local(offset: u64) -> usize {
    (offset % CHUNK_SIZE as u64) as usize
}

/// Allocation counters since the database was opened
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct AllocStats {
    /// Bytes handed out by `malloc`, block headers included
    pub malloced: u64,
    /// Bytes returned by `free`
    pub freed: u64,
}

impl AllocStats {
    /// Bytes allocated and not yet freed
    pub fn in_use(&self) -> u64 {
        self.malloced.saturating_sub(self.freed)
    }
}

/// Builder for opening databases
pub struct DatabaseBuilder {
    version: u32,
    exclusive: bool,
    cache: Option<Arc<ChunkCache>>,
    cache_size: usize,
    check_interval: Duration,
}

impl Default for DatabaseBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl DatabaseBuilder {
    /// Create a new database builder
    pub fn new() -> Self {
        Self {
            version: 0,
            exclusive: false,
            cache: None,
            cache_size: crate::chunk_cache::DEFAULT_CACHE_SIZE,
            check_interval: DEFAULT_CANCELLATION_CHECK_INTERVAL,
        }
    }

    /// Set the expected format version
    pub fn version(mut self, version: u32) -> Self {
        self.version = version;
        self
    }

    /// Open for exclusive single-threaded use: writes need no write lock
    pub fn exclusive(mut self, exclusive: bool) -> Self {
        self.exclusive = exclusive;
        self
    }

    /// Share an existing chunk cache
    pub fn cache(mut self, cache: Arc<ChunkCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Size of a private cache, ignored when a shared cache is set
    pub fn cache_size(mut self, bytes: usize) -> Self {
        self.cache_size = bytes;
        self
    }

    /// How often a blocked writer polls its progress monitor
    pub fn cancellation_check_interval(mut self, interval: Duration) -> Self {
        self.check_interval = interval;
        self
    }

    /// Open or create the database at `path`
    pub fn open(self, path: impl AsRef<Path>) -> Result<Database> {
        let cache = self.cache.unwrap_or_else(|| Arc::new(ChunkCache::new(self.cache_size)));
        Database::open_with(path.as_ref(), cache, self.version, self.exclusive, self.check_interval)
    }
}

/// A paged database file
pub struct Database {
    file: Arc<ChunkFile>,
    path: PathBuf,
    cache: Arc<ChunkCache>,
    lock: DbLock,
    exclusive: AtomicBool,
    malloced: AtomicU64,
    freed: AtomicU64,
    closed: AtomicBool,
}

impl Database {
    /// Create a database builder
    pub fn builder() -> DatabaseBuilder {
        DatabaseBuilder::new()
    }

    /// Open or create the database at `path`
    ///
    /// A new file is initialised with `version`. An existing file must carry
    /// the magic number and exactly `version`, otherwise
    /// `Error::InvalidDatabase` or `Error::VersionMismatch` is returned.
    pub fn open(path: impl AsRef<Path>, cache: Arc<ChunkCache>, version: u32, exclusive: bool) -> Result<Self> {
        Self::open_with(path.as_ref(), cache, version, exclusive, DEFAULT_CANCELLATION_CHECK_INTERVAL)
    }

    fn open_with(
        path: &Path,
        cache: Arc<ChunkCache>,
        version: u32,
        exclusive: bool,
        check_interval: Duration,
    ) -> Result<Self> {
        let backend = FileBackend::open(path)?;
        let file = Arc::new(ChunkFile::new(Box::new(backend))?);

        let db = Self {
            file,
            path: path.to_path_buf(),
            cache,
            lock: DbLock::new(check_interval),
            exclusive: AtomicBool::new(exclusive),
            malloced: AtomicU64::new(0),
            freed: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        };

        if db.file.chunk_count() == 0 {
            db.init_header(version)?;
            db.flush()?;
            debug!(path = %path.display(), version, "created database");
            return Ok(db);
        }

        let header = db.get_chunk(0)?;
        let magic = header.get_i32(MAGIC_OFFSET as usize) as u32;
        if magic != MAGIC {
            return Err(Error::InvalidDatabase);
        }
        let found = header.get_i32(VERSION_OFFSET as usize) as u32;
        if found != version {
            return Err(Error::VersionMismatch { expected: version, found });
        }

        debug!(path = %path.display(), version, chunks = db.file.chunk_count(), "opened database");
        Ok(db)
    }

    /// Write a fresh header into chunk 0 of an empty file
    fn init_header(&self, version: u32) -> Result<()> {
        let index = self.file.append_chunk();
        debug_assert_eq!(index, 0);
        let header = self.cache.insert_fresh(&self.file, index)?;
        header.put_i32(VERSION_OFFSET as usize, version as i32);
        header.put_i32(MAGIC_OFFSET as usize, MAGIC as i32);
        Ok(())
    }

    /// Path of the database file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The chunk cache this database uses
    pub fn cache(&self) -> &Arc<ChunkCache> {
        &self.cache
    }

    /// Number of chunks in the database
    pub fn chunk_count(&self) -> u64 {
        self.file.chunk_count()
    }

    /// Size of the database in bytes
    pub fn size(&self) -> u64 {
        self.chunk_count() * CHUNK_SIZE as u64
    }

    /// Format version stored in the header
    pub fn version(&self) -> Result<u32> {
        Ok(self.get_int(VERSION_OFFSET)? as u32)
    }

    /// Overwrite the format version stored in the header
    pub fn set_version(&self, version: u32) -> Result<()> {
        self.put_int(VERSION_OFFSET, version as i32)
    }

    /// Whether writes are allowed without the write lock
    pub fn is_exclusive(&self) -> bool {
        self.exclusive.load(Ordering::Acquire)
    }

    /// Switch exclusive single-threaded mode on or off
    pub fn set_exclusive(&self, exclusive: bool) {
        self.exclusive.store(exclusive, Ordering::Release);
    }

    /// Allocation counters
    pub fn alloc_stats(&self) -> AllocStats {
        AllocStats { malloced: self.malloced.load(Ordering::Relaxed), freed: self.freed.load(Ordering::Relaxed) }
    }

    #[inline]
    pub(crate) fn assert_writable(&self) {
        debug_assert!(
            self.is_exclusive() || self.lock.is_write_locked(),
            "database modified without holding the write lock"
        );
    }

    /// Resolve the chunk containing `offset`
    pub(crate) fn get_chunk(&self, offset: u64) -> Result<Arc<Chunk>> {
        let index = offset / CHUNK_SIZE as u64;
        if index >= self.file.chunk_count() {
            return Err(Error::corruption_at(
                Record(offset),
                format!("offset {} lies beyond the end of the database ({} bytes)", offset, self.size()),
            ));
        }
        self.cache.get_chunk(&self.file, index)
    }

    /// Resolve `len` bytes at `offset` to a chunk and a local offset
    fn locate(&self, offset: u64, len: usize) -> Result<(Arc<Chunk>, usize)> {
        let at = local(offset);
        if at + len > CHUNK_SIZE {
            return Err(Error::InvalidParameter("access crosses a chunk boundary"));
        }
        Ok((self.get_chunk(offset)?, at))
    }

    // ---- typed accessors ----

    /// Read a byte
    pub fn get_byte(&self, offset: u64) -> Result<u8> {
        let (chunk, at) = self.locate(offset, 1)?;
        Ok(chunk.get_u8(at))
    }

    /// Write a byte
    pub fn put_byte(&self, offset: u64, value: u8) -> Result<()> {
        self.assert_writable();
        let (chunk, at) = self.locate(offset, 1)?;
        chunk.put_u8(at, value);
        Ok(())
    }

    /// Read a 16-bit value
    pub fn get_short(&self, offset: u64) -> Result<i16> {
        let (chunk, at) = self.locate(offset, 2)?;
        Ok(chunk.get_i16(at))
    }

    /// Write a 16-bit value
    pub fn put_short(&self, offset: u64, value: i16) -> Result<()> {
        self.assert_writable();
        let (chunk, at) = self.locate(offset, 2)?;
        chunk.put_i16(at, value);
        Ok(())
    }

    /// Read a 32-bit value
    pub fn get_int(&self, offset: u64) -> Result<i32> {
        let (chunk, at) = self.locate(offset, 4)?;
        Ok(chunk.get_i32(at))
    }

    /// Write a 32-bit value
    pub fn put_int(&self, offset: u64, value: i32) -> Result<()> {
        self.assert_writable();
        let (chunk, at) = self.locate(offset, 4)?;
        chunk.put_i32(at, value);
        Ok(())
    }

    /// Read a 64-bit value
    pub fn get_long(&self, offset: u64) -> Result<i64> {
        let (chunk, at) = self.locate(offset, 8)?;
        Ok(chunk.get_i64(at))
    }

    /// Write a 64-bit value
    pub fn put_long(&self, offset: u64, value: i64) -> Result<()> {
        self.assert_writable();
        let (chunk, at) = self.locate(offset, 8)?;
        chunk.put_i64(at, value);
        Ok(())
    }

    /// Read a record pointer
    pub fn get_record(&self, offset: u64) -> Result<Record> {
        let (chunk, at) = self.locate(offset, RECORD_SIZE)?;
        Ok(Record(chunk.get_u64(at)))
    }

    /// Write a record pointer
    pub fn put_record(&self, offset: u64, record: Record) -> Result<()> {
        self.assert_writable();
        let (chunk, at) = self.locate(offset, RECORD_SIZE)?;
        chunk.put_u64(at, record.0);
        Ok(())
    }

    /// Fill `buf` from `offset`
    pub fn get_bytes(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        let (chunk, at) = self.locate(offset, buf.len())?;
        chunk.get_bytes(at, buf);
        Ok(())
    }

    /// Write `bytes` at `offset`
    pub fn put_bytes(&self, offset: u64, bytes: &[u8]) -> Result<()> {
        self.assert_writable();
        let (chunk, at) = self.locate(offset, bytes.len())?;
        chunk.put_bytes(at, bytes);
        Ok(())
    }

    /// Read `count` UTF-16 code units
    pub fn get_chars(&self, offset: u64, count: usize) -> Result<Vec<u16>> {
        let (chunk, at) = self.locate(offset, count * 2)?;
        Ok(chunk.get_chars(at, count))
    }

    /// Write UTF-16 code units
    pub fn put_chars(&self, offset: u64, chars: &[u16]) -> Result<()> {
        self.assert_writable();
        let (chunk, at) = self.locate(offset, chars.len() * 2)?;
        chunk.put_chars(at, chars);
        Ok(())
    }

    /// Zero `len` bytes at `offset`
    pub fn clear_bytes(&self, offset: u64, len: usize) -> Result<()> {
        self.assert_writable();
        let (chunk, at) = self.locate(offset, len)?;
        chunk.clear(at, len);
        Ok(())
    }

    // ---- allocator ----

    /// Allocate a zeroed record of at least `size` bytes
    ///
    /// # Panics
    ///
    /// Panics if `size` is zero or larger than [`MAX_MALLOC_SIZE`].
    pub fn malloc(&self, size: usize) -> Result<Record> {
        assert!(
            size > 0 && size <= MAX_MALLOC_SIZE,
            "malloc of {} bytes, must be within 1..={}",
            size,
            MAX_MALLOC_SIZE
        );
        self.assert_writable();

        let need = deltas_for(size);

        // Try the exact size class first, then larger ones
        let mut found = None;
        for deltas in need..=MAX_BLOCK_DELTAS {
            let block = self.first_free_block(deltas)?;
            if !block.is_null() {
                found = Some((block, deltas));
                break;
            }
        }

        let (block, mut use_deltas, chunk) = match found {
            Some((block, deltas)) => {
                let chunk = self.get_chunk(block.0)?;
                self.unlink_free_block(&chunk, block, deltas)?;
                (block, deltas, chunk)
            }
            None => {
                let chunk = self.create_new_chunk()?;
                (Record(chunk.address()), MAX_BLOCK_DELTAS, chunk)
            }
        };

        // Give back the tail if it can stand on its own
        let unused = use_deltas - need;
        if unused >= MIN_BLOCK_DELTAS {
            let tail = Record(block.0 + (need * BLOCK_SIZE_DELTA) as u64);
            self.link_free_block(&chunk, tail, unused)?;
            use_deltas = need;
        }

        let used = use_deltas * BLOCK_SIZE_DELTA;
        let at = local(block.0);
        chunk.put_i32(at, -(used as i32));
        chunk.clear(at + BLOCK_HEADER_SIZE, used - BLOCK_HEADER_SIZE);

        self.malloced.fetch_add(used as u64, Ordering::Relaxed);
        Ok(Record(block.0 + BLOCK_HEADER_SIZE as u64))
    }

    /// Return a record to the allocator
    ///
    /// # Panics
    ///
    /// Panics when freeing the null record, a header address, or a record
    /// that is already free.
    pub fn free(&self, record: Record) -> Result<()> {
        assert!(!record.is_null(), "free of the null record");
        assert!(
            record.0 >= (CHUNK_SIZE + BLOCK_HEADER_SIZE) as u64,
            "free of record {} inside the header chunk",
            record
        );
        self.assert_writable();

        let block = Record(record.0 - BLOCK_HEADER_SIZE as u64);
        let chunk = self.get_chunk(block.0)?;
        let at = local(block.0);
        let size = chunk.get_i32(at);
        assert!(size < 0, "double free of record {}", record);

        let size = size.unsigned_abs() as usize;
        if size % BLOCK_SIZE_DELTA != 0 || size < MIN_BLOCK_DELTAS * BLOCK_SIZE_DELTA || at + size > CHUNK_SIZE {
            return Err(Error::corruption_at(record, format!("allocated block has invalid size {}", size)));
        }

        self.link_free_block(&chunk, block, size / BLOCK_SIZE_DELTA)?;
        self.freed.fetch_add(size as u64, Ordering::Relaxed);
        Ok(())
    }

    /// Usable size of an allocated record
    pub fn record_size(&self, record: Record) -> Result<usize> {
        if record.0 < (CHUNK_SIZE + BLOCK_HEADER_SIZE) as u64 {
            return Err(Error::InvalidParameter("record lies inside the header chunk"));
        }
        let size = self.get_int(record.0 - BLOCK_HEADER_SIZE as u64)?;
        if size >= 0 {
            return Err(Error::corruption_at(record, "record is not allocated"));
        }
        Ok(size.unsigned_abs() as usize - BLOCK_HEADER_SIZE)
    }

    /// Head of the free list for `deltas`
    pub fn first_free_block(&self, deltas: usize) -> Result<Record> {
        self.get_record(free_list_anchor(deltas))
    }

    fn set_first_free_block(&self, deltas: usize, block: Record) -> Result<()> {
        self.put_record(free_list_anchor(deltas), block)
    }

    /// Append a chunk to the file; it holds a single free-sized block
    fn create_new_chunk(&self) -> Result<Arc<Chunk>> {
        let index = self.file.append_chunk();
        self.cache.insert_fresh(&self.file, index)
    }

    /// Remove `block` from the free list for `deltas`
    fn unlink_free_block(&self, chunk: &Chunk, block: Record, deltas: usize) -> Result<()> {
        let at = local(block.0);
        let size = chunk.get_i32(at);
        if size != (deltas * BLOCK_SIZE_DELTA) as i32 {
            return Err(Error::corruption_at(
                block,
                format!("free block of size {} found in the list for size {}", size, deltas * BLOCK_SIZE_DELTA),
            ));
        }

        let prev = Record(chunk.get_u64(at + FREE_BLOCK_PREV));
        let next = Record(chunk.get_u64(at + FREE_BLOCK_NEXT));
        if prev.is_null() {
            self.set_first_free_block(deltas, next)?;
        } else {
            self.put_record(prev.offset(FREE_BLOCK_NEXT), next)?;
        }
        if !next.is_null() {
            self.put_record(next.offset(FREE_BLOCK_PREV), prev)?;
        }
        Ok(())
    }

    /// Format `block` as a free block of `deltas` and push it on its list
    fn link_free_block(&self, chunk: &Chunk, block: Record, deltas: usize) -> Result<()> {
        let at = local(block.0);
        let head = self.first_free_block(deltas)?;

        chunk.put_i32(at, (deltas * BLOCK_SIZE_DELTA) as i32);
        chunk.put_u64(at + FREE_BLOCK_PREV, 0);
        chunk.put_u64(at + FREE_BLOCK_NEXT, head.0);
        if !head.is_null() {
            self.put_record(head.offset(FREE_BLOCK_PREV), block)?;
        }
        self.set_first_free_block(deltas, block)
    }

    /// Walk every data chunk and free list, verifying the allocator's
    /// invariants and summing up space usage
    pub fn space_info(&self) -> Result<SpaceInfo> {
        let mut info = SpaceInfo::new(self.chunk_count());

        for index in 1..self.chunk_count() {
            let chunk = self.cache.get_chunk(&self.file, index)?;
            let mut at = 0;
            while at < CHUNK_SIZE {
                let raw = chunk.get_i32(at);
                let size = raw.unsigned_abs() as usize;
                if size < MIN_BLOCK_DELTAS * BLOCK_SIZE_DELTA || size % BLOCK_SIZE_DELTA != 0 || at + size > CHUNK_SIZE
                {
                    return Err(Error::corruption_at(
                        Record(chunk.address() + at as u64),
                        format!("block of size {} breaks the tiling of chunk {}", raw, index),
                    ));
                }
                if raw > 0 {
                    info.add_free_block(size);
                } else {
                    info.add_allocated_block(size);
                }
                at += size;
            }
        }

        let mut linked = 0usize;
        for deltas in MIN_BLOCK_DELTAS..=MAX_BLOCK_DELTAS {
            let mut prev = Record::NULL;
            let mut block = self.first_free_block(deltas)?;
            while !block.is_null() {
                if block.0 < CHUNK_SIZE as u64 {
                    return Err(Error::corruption_at(block, "free list points into the header chunk"));
                }
                let size = self.get_int(block.0)?;
                if size != (deltas * BLOCK_SIZE_DELTA) as i32 {
                    return Err(Error::corruption_at(
                        block,
                        format!("free block of size {} linked in the list for size {}", size, deltas * BLOCK_SIZE_DELTA),
                    ));
                }
                if self.get_record(block.offset(FREE_BLOCK_PREV))? != prev {
                    return Err(Error::corruption_at(block, "free block has a wrong back link"));
                }
                linked += 1;
                if linked > info.free_blocks {
                    return Err(Error::corruption("free lists hold more blocks than the chunks do"));
                }
                prev = block;
                block = self.get_record(block.offset(FREE_BLOCK_NEXT))?;
            }
        }
        if linked != info.free_blocks {
            return Err(Error::corruption(format!(
                "{} free blocks in the chunks but {} on the free lists",
                info.free_blocks, linked
            )));
        }

        Ok(info)
    }

    // ---- lifecycle ----

    /// Write all dirty chunks of this database and sync the file
    pub fn flush(&self) -> Result<()> {
        self.cache.flush_file(self.file.id())?;
        self.file.backend().sync()
    }

    /// Reset to an empty database with `version`, discarding all content
    pub fn clear(&self, version: u32) -> Result<()> {
        self.assert_writable();
        self.cache.remove_file(self.file.id(), false)?;
        self.file.truncate(0)?;
        self.init_header(version)?;
        self.malloced.store(0, Ordering::Relaxed);
        self.freed.store(0, Ordering::Relaxed);
        self.flush()?;
        debug!(path = %self.path.display(), version, "cleared database");
        Ok(())
    }

    /// Copy the database to `path`
    ///
    /// The caller should hold a read or write lock so the copy is consistent.
    pub fn copy_to(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut out = OpenOptions::new().write(true).create(true).truncate(true).open(path.as_ref())?;
        let mut buf = vec![0u8; CHUNK_SIZE];
        for index in 0..self.chunk_count() {
            let chunk = self.cache.get_chunk(&self.file, index)?;
            chunk.get_bytes(0, &mut buf);
            out.write_all(&buf)?;
        }
        out.flush()?;
        out.sync_all()?;
        Ok(())
    }

    /// Flush and release the database
    pub fn close(self) -> Result<()> {
        self.flush()?;
        self.cache.remove_file(self.file.id(), false)?;
        self.closed.store(true, Ordering::Release);
        debug!(path = %self.path.display(), "closed database");
        Ok(())
    }

    // ---- locking ----

    /// Take a shared read lock, waiting while a writer is active
    ///
    /// Returns `Error::Interrupted` if [`Database::interrupt`] targets the
    /// waiting thread.
    pub fn acquire_read_lock(&self) -> Result<()> {
        self.lock.acquire_read()
    }

    /// Release one read lock of the calling thread
    pub fn release_read_lock(&self) {
        self.lock.release_read()
    }

    /// Take the exclusive write lock, converting the caller's
    /// `give_up_read_locks` read locks
    pub fn acquire_write_lock(&self, give_up_read_locks: usize, monitor: Option<&dyn ProgressMonitor>) -> Result<()> {
        self.lock.acquire_write(give_up_read_locks, monitor)
    }

    /// Release the write lock, optionally flushing first and keeping
    /// `establish_read_locks` read locks
    ///
    /// The lock is released even if the flush fails.
    pub fn release_write_lock(&self, establish_read_locks: usize, flush: bool) -> Result<()> {
        let flushed = if flush { self.flush() } else { Ok(()) };
        self.lock.release_write(establish_read_locks);
        flushed
    }

    /// Interrupt `thread` if it is blocked on this database's lock
    pub fn interrupt(&self, thread: ThreadId) {
        self.lock.interrupt(thread)
    }

    /// Lock counters
    pub fn lock_state(&self) -> LockSnapshot {
        self.lock.snapshot()
    }

    /// Whether the calling thread holds the write lock
    pub fn holds_write_lock(&self) -> bool {
        self.lock.holds_write_lock()
    }

    /// Read locks held by the calling thread
    pub fn read_locks_held(&self) -> usize {
        self.lock.read_locks_held()
    }

    /// Take a read lock released when the guard drops
    pub fn read(&self) -> Result<ReadGuard<'_>> {
        self.acquire_read_lock()?;
        Ok(ReadGuard { db: self })
    }

    /// Take the write lock, released (with a flush) when the guard drops
    pub fn write(&self, give_up_read_locks: usize, monitor: Option<&dyn ProgressMonitor>) -> Result<WriteGuard<'_>> {
        self.acquire_write_lock(give_up_read_locks, monitor)?;
        Ok(WriteGuard { db: self, released: false })
    }
}

impl Drop for Database {
    fn drop(&mut self) {
        if self.closed.load(Ordering::Acquire) {
            return;
        }
        if let Err(e) = self.flush() {
            warn!(path = %self.path.display(), error = %e, "failed to flush database on drop");
        }
        if let Err(e) = self.cache.remove_file(self.file.id(), false) {
            warn!(path = %self.path.display(), error = %e, "failed to release cached chunks");
        }
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("path", &self.path)
            .field("chunks", &self.chunk_count())
            .field("exclusive", &self.is_exclusive())
            .finish()
    }
}

/// Shared read lock held for the guard's lifetime
pub struct ReadGuard<'a> {
    db: &'a Database,
}

impl Drop for ReadGuard<'_> {
    fn drop(&mut self) {
        self.db.release_read_lock();
    }
}

/// Exclusive write lock held for the guard's lifetime
pub struct WriteGuard<'a> {
    db: &'a Database,
    released: bool,
}

impl WriteGuard<'_> {
    /// Release now, reporting a failed flush
    pub fn release(mut self, flush: bool) -> Result<()> {
        self.released = true;
        self.db.release_write_lock(0, flush)
    }
}

impl Drop for WriteGuard<'_> {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(e) = self.db.release_write_lock(0, true) {
            warn!(error = %e, "flush failed while releasing the write lock");
        }
    }
}
