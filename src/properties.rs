//! Persistent string properties
//!
//! A property table is a header record holding the root of a B-tree of
//! entries. Each entry points at a key string and a value string:
//!
//! ```text
//! header: [index root: u64]
//! entry:  [key: u64][value: u64]
//! ```

use crate::btree::BTree;
use crate::comparator::RecordComparator;
use crate::database::{Database, RECORD_SIZE};
use crate::error::{Record, Result};
use crate::string_set::StringFinder;
use std::cmp::Ordering;

/// Minimum degree of the property index
pub const PROPERTIES_DEGREE: usize = 8;

const INDEX: usize = 0;
const HEADER_SIZE: usize = RECORD_SIZE;

const ENTRY_KEY: usize = 0;
const ENTRY_VALUE: usize = RECORD_SIZE;
const ENTRY_SIZE: usize = 2 * RECORD_SIZE;

fn entry_key(db: &Database, entry: Record) -> Result<Record> {
    db.get_record(entry.offset(ENTRY_KEY))
}

/// Orders entries by their key strings
#[derive(Debug, Clone, Copy)]
struct EntryComparator;

impl RecordComparator for EntryComparator {
    fn compare(&self, db: &Database, a: Record, b: Record) -> Result<Ordering> {
        db.string(entry_key(db, a)?).compare_to(&db.string(entry_key(db, b)?))
    }
}

/// A string-to-string property table stored in a database
#[derive(Debug, Clone, Copy)]
pub struct DbProperties<'db> {
    db: &'db Database,
    record: Record,
}

impl<'db> DbProperties<'db> {
    /// Allocate an empty table
    pub fn create(db: &'db Database) -> Result<Self> {
        let record = db.malloc(HEADER_SIZE)?;
        Ok(Self { db, record })
    }

    /// Open the table stored at `record`
    pub fn open(db: &'db Database, record: Record) -> Self {
        Self { db, record }
    }

    /// Record holding the table header
    pub fn record(&self) -> Record {
        self.record
    }

    fn index(&self) -> Result<BTree<'db, EntryComparator>> {
        BTree::new(self.db, self.record.offset(INDEX), PROPERTIES_DEGREE, EntryComparator)
    }

    fn find_entry(&self, key: &str) -> Result<Option<Record>> {
        let mut finder = StringFinder::new(key, entry_key);
        self.index()?.accept(&mut finder)?;
        Ok(finder.found)
    }

    /// Set `key` to `value`, replacing any previous value
    pub fn set_property(&self, key: &str, value: &str) -> Result<()> {
        if let Some(entry) = self.find_entry(key)? {
            let old = self.db.get_record(entry.offset(ENTRY_VALUE))?;
            let new = self.db.put_string(value)?;
            self.db.put_record(entry.offset(ENTRY_VALUE), new)?;
            return self.db.string(old).delete();
        }

        let entry = self.db.malloc(ENTRY_SIZE)?;
        self.db.put_record(entry.offset(ENTRY_KEY), self.db.put_string(key)?)?;
        self.db.put_record(entry.offset(ENTRY_VALUE), self.db.put_string(value)?)?;
        self.index()?.insert(entry)?;
        Ok(())
    }

    /// Value of `key`, if set
    pub fn get_property(&self, key: &str) -> Result<Option<String>> {
        match self.find_entry(key)? {
            Some(entry) => {
                let value = self.db.get_record(entry.offset(ENTRY_VALUE))?;
                Ok(Some(self.db.get_string(value)?))
            }
            None => Ok(None),
        }
    }

    /// Value of `key`, or `default` when it is not set
    pub fn get_property_or(&self, key: &str, default: &str) -> Result<String> {
        Ok(self.get_property(key)?.unwrap_or_else(|| default.to_owned()))
    }

    /// Remove `key`, returning whether it was set
    pub fn remove_property(&self, key: &str) -> Result<bool> {
        let Some(entry) = self.find_entry(key)? else {
            return Ok(false);
        };
        self.index()?.delete(entry)?;
        self.free_entry(entry)?;
        Ok(true)
    }

    /// All keys, in byte order
    pub fn keys(&self) -> Result<Vec<String>> {
        self.index()?
            .records()?
            .into_iter()
            .map(|entry| self.db.get_string(entry_key(self.db, entry)?))
            .collect()
    }

    /// Remove every property
    pub fn clear(&self) -> Result<()> {
        let index = self.index()?;
        for entry in index.records()? {
            self.free_entry(entry)?;
        }
        index.destroy()
    }

    /// Remove every property and free the table itself
    pub fn delete(self) -> Result<()> {
        self.clear()?;
        self.db.free(self.record)
    }

    fn free_entry(&self, entry: Record) -> Result<()> {
        self.db.string(self.db.get_record(entry.offset(ENTRY_KEY))?).delete()?;
        self.db.string(self.db.get_record(entry.offset(ENTRY_VALUE))?).delete()?;
        self.db.free(entry)
    }
}
