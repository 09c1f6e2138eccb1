//! Chunks: the unit of caching and I/O
//!
//! A chunk is a fixed-size page of the database file. All typed access to
//! the database ends up here, at an offset local to one chunk. Values are
//! stored big-endian.

use crate::error::Result;
use crate::io::{ChunkFile, IoBackend};
use byteorder::{BigEndian, ByteOrder};
use parking_lot::RwLock;
use static_assertions::const_assert;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Size of a chunk in bytes
pub const CHUNK_SIZE: usize = 4096;

const_assert!(CHUNK_SIZE.is_power_of_two());
const_assert!(CHUNK_SIZE >= 1024);

/// A cached page of a database file
pub struct Chunk {
    /// File the chunk belongs to, needed to write it back
    file: Arc<ChunkFile>,
    /// Index of the chunk within the file
    index: u64,
    /// Page contents
    data: RwLock<Box<[u8]>>,
    /// Set when the contents differ from the file
    dirty: AtomicBool,
}

impl Chunk {
    /// Read chunk `index` of `file`
    pub(crate) fn load(file: Arc<ChunkFile>, index: u64) -> Result<Self> {
        let mut data = vec![0u8; CHUNK_SIZE].into_boxed_slice();
        file.backend().read_chunk(index, &mut data)?;
        Ok(Self { file, index, data: RwLock::new(data), dirty: AtomicBool::new(false) })
    }

    /// A zeroed chunk that does not exist on disk yet
    pub(crate) fn fresh(file: Arc<ChunkFile>, index: u64) -> Self {
        Self {
            file,
            index,
            data: RwLock::new(vec![0u8; CHUNK_SIZE].into_boxed_slice()),
            dirty: AtomicBool::new(true),
        }
    }

    /// Index of this chunk within its file
    #[inline]
    pub fn index(&self) -> u64 {
        self.index
    }

    /// Absolute file offset of the first byte
    #[inline]
    pub fn address(&self) -> u64 {
        self.index * CHUNK_SIZE as u64
    }

    /// Id of the owning file
    #[inline]
    pub fn file_id(&self) -> u64 {
        self.file.id()
    }

    /// Whether the chunk holds unflushed changes
    #[inline]
    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    /// Write the chunk back if it is dirty
    pub fn flush(&self) -> Result<()> {
        if !self.is_dirty() {
            return Ok(());
        }
        let data = self.data.read();
        self.file.backend().write_chunk(self.index, &data)?;
        self.dirty.store(false, Ordering::Release);
        Ok(())
    }

    #[inline]
    fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::Release);
    }

    /// Read a byte
    pub fn get_u8(&self, offset: usize) -> u8 {
        self.data.read()[offset]
    }

    /// Write a byte
    pub fn put_u8(&self, offset: usize, value: u8) {
        self.data.write()[offset] = value;
        self.mark_dirty();
    }

    /// Read a 16-bit value
    pub fn get_i16(&self, offset: usize) -> i16 {
        BigEndian::read_i16(&self.data.read()[offset..offset + 2])
    }

    /// Write a 16-bit value
    pub fn put_i16(&self, offset: usize, value: i16) {
        BigEndian::write_i16(&mut self.data.write()[offset..offset + 2], value);
        self.mark_dirty();
    }

    /// Read a 32-bit value
    pub fn get_i32(&self, offset: usize) -> i32 {
        BigEndian::read_i32(&self.data.read()[offset..offset + 4])
    }

    /// Write a 32-bit value
    pub fn put_i32(&self, offset: usize, value: i32) {
        BigEndian::write_i32(&mut self.data.write()[offset..offset + 4], value);
        self.mark_dirty();
    }

    /// Read a 64-bit value
    pub fn get_i64(&self, offset: usize) -> i64 {
        BigEndian::read_i64(&self.data.read()[offset..offset + 8])
    }

    /// Write a 64-bit value
    pub fn put_i64(&self, offset: usize, value: i64) {
        BigEndian::write_i64(&mut self.data.write()[offset..offset + 8], value);
        self.mark_dirty();
    }

    /// Read an unsigned 64-bit value (record pointers)
    pub fn get_u64(&self, offset: usize) -> u64 {
        BigEndian::read_u64(&self.data.read()[offset..offset + 8])
    }

    /// Write an unsigned 64-bit value (record pointers)
    pub fn put_u64(&self, offset: usize, value: u64) {
        BigEndian::write_u64(&mut self.data.write()[offset..offset + 8], value);
        self.mark_dirty();
    }

    /// Copy `buf.len()` bytes starting at `offset` into `buf`
    pub fn get_bytes(&self, offset: usize, buf: &mut [u8]) {
        buf.copy_from_slice(&self.data.read()[offset..offset + buf.len()]);
    }

    /// Copy `bytes` into the chunk at `offset`
    pub fn put_bytes(&self, offset: usize, bytes: &[u8]) {
        self.data.write()[offset..offset + bytes.len()].copy_from_slice(bytes);
        self.mark_dirty();
    }

    /// Read `count` UTF-16 code units
    pub fn get_chars(&self, offset: usize, count: usize) -> Vec<u16> {
        let data = self.data.read();
        let mut chars = vec![0u16; count];
        BigEndian::read_u16_into(&data[offset..offset + count * 2], &mut chars);
        chars
    }

    /// Write UTF-16 code units
    pub fn put_chars(&self, offset: usize, chars: &[u16]) {
        let mut data = self.data.write();
        BigEndian::write_u16_into(chars, &mut data[offset..offset + chars.len() * 2]);
        drop(data);
        self.mark_dirty();
    }

    /// Zero `len` bytes starting at `offset`
    pub fn clear(&self, offset: usize, len: usize) {
        self.data.write()[offset..offset + len].fill(0);
        self.mark_dirty();
    }
}

impl std::fmt::Debug for Chunk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Chunk")
            .field("file", &self.file.id())
            .field("index", &self.index)
            .field("dirty", &self.is_dirty())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::FileBackend;
    use tempfile::TempDir;

    fn scratch_file(dir: &TempDir) -> Arc<ChunkFile> {
        let backend = FileBackend::open(dir.path().join("chunk.db")).unwrap();
        Arc::new(ChunkFile::new(Box::new(backend)).unwrap())
    }

    #[test]
    fn test_typed_access() {
        let dir = TempDir::new().unwrap();
        let chunk = Chunk::fresh(scratch_file(&dir), 0);

        chunk.put_u8(0, 0xAB);
        chunk.put_i16(2, -2);
        chunk.put_i32(4, -123_456);
        chunk.put_i64(8, i64::MIN + 5);
        chunk.put_u64(16, u64::MAX - 1);
        chunk.put_chars(24, &[0x48, 0x20AC, 0xFFFF]);

        assert_eq!(chunk.get_u8(0), 0xAB);
        assert_eq!(chunk.get_i16(2), -2);
        assert_eq!(chunk.get_i32(4), -123_456);
        assert_eq!(chunk.get_i64(8), i64::MIN + 5);
        assert_eq!(chunk.get_u64(16), u64::MAX - 1);
        assert_eq!(chunk.get_chars(24, 3), vec![0x48, 0x20AC, 0xFFFF]);

        // Big-endian layout on disk
        let mut raw = [0u8; 4];
        chunk.get_bytes(4, &mut raw);
        assert_eq!(raw, (-123_456i32).to_be_bytes());
    }

    #[test]
    fn test_flush_and_reload() {
        let dir = TempDir::new().unwrap();
        let file = scratch_file(&dir);
        let index = file.append_chunk();

        let chunk = Chunk::fresh(file.clone(), index);
        assert!(chunk.is_dirty());
        chunk.put_bytes(CHUNK_SIZE - 3, b"end");
        chunk.flush().unwrap();
        assert!(!chunk.is_dirty());

        let reloaded = Chunk::load(file, index).unwrap();
        let mut tail = [0u8; 3];
        reloaded.get_bytes(CHUNK_SIZE - 3, &mut tail);
        assert_eq!(&tail, b"end");
        assert!(!reloaded.is_dirty());
    }

    #[test]
    fn test_clear_zeroes_range() {
        let dir = TempDir::new().unwrap();
        let chunk = Chunk::fresh(scratch_file(&dir), 0);
        chunk.put_bytes(100, &[1, 2, 3, 4, 5]);
        chunk.clear(101, 3);

        let mut buf = [0u8; 5];
        chunk.get_bytes(100, &mut buf);
        assert_eq!(buf, [1, 0, 0, 0, 5]);
    }
}
