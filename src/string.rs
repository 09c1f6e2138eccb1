//! Strings stored in database records
//!
//! Short strings live in one record:
//!
//! ```text
//! [len: i32][utf-8 bytes]
//! ```
//!
//! Strings longer than [`MAX_SHORT_LENGTH`] are split into a chain:
//!
//! ```text
//! first:        [len: i32][next: u64][bytes]
//! continuation: [next: u64][bytes]
//! ```
//!
//! Comparison is by bytes, which for UTF-8 is code point order.

use crate::database::{Database, MAX_MALLOC_SIZE, RECORD_SIZE};
use crate::error::{Error, Record, Result};
use std::cmp::Ordering;

const LENGTH: usize = 0;
const SHORT_BYTES: usize = 4;
const LONG_NEXT: usize = 4;
const LONG_BYTES: usize = LONG_NEXT + RECORD_SIZE;
const CONT_NEXT: usize = 0;
const CONT_BYTES: usize = CONT_NEXT + RECORD_SIZE;

/// Longest string stored in a single record
pub const MAX_SHORT_LENGTH: usize = MAX_MALLOC_SIZE - SHORT_BYTES;

const FIRST_SEGMENT: usize = MAX_MALLOC_SIZE - LONG_BYTES;
const CONT_SEGMENT: usize = MAX_MALLOC_SIZE - CONT_BYTES;

/// Handle to a string stored at a record
#[derive(Clone, Copy)]
pub struct DbString<'db> {
    db: &'db Database,
    record: Record,
}

impl Database {
    /// Store `value` and return a handle to it
    pub fn new_string(&self, value: &str) -> Result<DbString<'_>> {
        let bytes = value.as_bytes();
        let len = i32::try_from(bytes.len()).map_err(|_| Error::InvalidParameter("string too long"))?;

        if bytes.len() <= MAX_SHORT_LENGTH {
            let record = self.malloc(SHORT_BYTES + bytes.len())?;
            self.put_int(record.offset(LENGTH), len)?;
            self.put_bytes(record.offset(SHORT_BYTES), bytes)?;
            return Ok(DbString { db: self, record });
        }

        let record = self.malloc(MAX_MALLOC_SIZE)?;
        self.put_int(record.offset(LENGTH), len)?;
        self.put_bytes(record.offset(LONG_BYTES), &bytes[..FIRST_SEGMENT])?;

        let mut link = record.offset(LONG_NEXT);
        for segment in bytes[FIRST_SEGMENT..].chunks(CONT_SEGMENT) {
            let next = self.malloc(CONT_BYTES + segment.len())?;
            self.put_bytes(next.offset(CONT_BYTES), segment)?;
            self.put_record(link, next)?;
            link = next.offset(CONT_NEXT);
        }

        Ok(DbString { db: self, record })
    }

    /// Handle to the string stored at `record`
    pub fn string(&self, record: Record) -> DbString<'_> {
        DbString { db: self, record }
    }

    /// Store `value`, returning its record
    pub fn put_string(&self, value: &str) -> Result<Record> {
        Ok(self.new_string(value)?.record())
    }

    /// Read the string stored at `record`
    pub fn get_string(&self, record: Record) -> Result<String> {
        self.string(record).value()
    }
}

impl<'db> DbString<'db> {
    /// Record holding the string
    pub fn record(&self) -> Record {
        self.record
    }

    /// Length in bytes
    pub fn len(&self) -> Result<usize> {
        let len = self.db.get_int(self.record.offset(LENGTH))?;
        usize::try_from(len).map_err(|_| Error::corruption_at(self.record, format!("negative string length {}", len)))
    }

    /// Whether the string is empty
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Whether the string spans more than one record
    pub fn is_long(&self) -> Result<bool> {
        Ok(self.len()? > MAX_SHORT_LENGTH)
    }

    /// The string's UTF-8 bytes
    pub fn bytes(&self) -> Result<Vec<u8>> {
        let len = self.len()?;
        let mut bytes = vec![0u8; len];

        if len <= MAX_SHORT_LENGTH {
            self.db.get_bytes(self.record.offset(SHORT_BYTES), &mut bytes)?;
            return Ok(bytes);
        }

        self.db.get_bytes(self.record.offset(LONG_BYTES), &mut bytes[..FIRST_SEGMENT])?;
        let mut next = self.db.get_record(self.record.offset(LONG_NEXT))?;
        for segment in bytes[FIRST_SEGMENT..].chunks_mut(CONT_SEGMENT) {
            if next.is_null() {
                return Err(Error::corruption_at(self.record, "long string chain ends early"));
            }
            self.db.get_bytes(next.offset(CONT_BYTES), segment)?;
            next = self.db.get_record(next.offset(CONT_NEXT))?;
        }
        Ok(bytes)
    }

    /// The string's value
    pub fn value(&self) -> Result<String> {
        String::from_utf8(self.bytes()?)
            .map_err(|e| Error::corruption_at(self.record, format!("string is not valid UTF-8: {}", e)))
    }

    /// Order of this string relative to `other`
    pub fn compare(&self, other: &str) -> Result<Ordering> {
        Ok(self.bytes()?.as_slice().cmp(other.as_bytes()))
    }

    /// Order of this string relative to `other`, ignoring case
    pub fn compare_ignore_case(&self, other: &str) -> Result<Ordering> {
        let value = self.value()?;
        Ok(value.to_lowercase().cmp(&other.to_lowercase()))
    }

    /// Order of this string relative to another stored string
    pub fn compare_to(&self, other: &DbString<'_>) -> Result<Ordering> {
        if self.record == other.record {
            return Ok(Ordering::Equal);
        }
        Ok(self.bytes()?.cmp(&other.bytes()?))
    }

    /// Whether this string equals `other`
    pub fn equals(&self, other: &str) -> Result<bool> {
        // Lengths differ: no need to read the bytes
        if self.len()? != other.len() {
            return Ok(false);
        }
        Ok(self.compare(other)? == Ordering::Equal)
    }

    /// Free every record of the string
    pub fn delete(self) -> Result<()> {
        let long = self.is_long()?;
        let mut next = if long { self.db.get_record(self.record.offset(LONG_NEXT))? } else { Record::NULL };
        self.db.free(self.record)?;
        while !next.is_null() {
            let after = self.db.get_record(next.offset(CONT_NEXT))?;
            self.db.free(next)?;
            next = after;
        }
        Ok(())
    }
}

impl std::fmt::Debug for DbString<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DbString").field("record", &self.record).finish()
    }
}
