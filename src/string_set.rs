//! Persistent set of strings
//!
//! Strings are stored once and kept in a B-tree ordered by their bytes.
//! Lookups go through an in-memory map first.

use crate::btree::{BTree, BTreeVisitor};
use crate::comparator::StringComparator;
use crate::database::Database;
use crate::error::{Record, Result};
use parking_lot::Mutex;
use std::cmp::Ordering;
use std::collections::HashMap;

/// Minimum degree of the tree behind a string set
pub const STRING_SET_DEGREE: usize = 8;

/// Locates the entry whose string key equals `target`
///
/// `key_of` maps a tree entry to the record of its string key.
pub(crate) struct StringFinder<'a, F> {
    target: &'a str,
    key_of: F,
    pub(crate) found: Option<Record>,
}

impl<'a, F> StringFinder<'a, F>
where
    F: Fn(&Database, Record) -> Result<Record>,
{
    pub(crate) fn new(target: &'a str, key_of: F) -> Self {
        Self { target, key_of, found: None }
    }
}

impl<F> BTreeVisitor for StringFinder<'_, F>
where
    F: Fn(&Database, Record) -> Result<Record>,
{
    fn compare(&mut self, db: &Database, record: Record) -> Result<Ordering> {
        let key = (self.key_of)(db, record)?;
        db.string(key).compare(self.target)
    }

    fn visit(&mut self, _db: &Database, record: Record) -> Result<bool> {
        self.found = Some(record);
        Ok(false)
    }
}

fn identity(_: &Database, record: Record) -> Result<Record> {
    Ok(record)
}

/// A set of strings whose tree root lives at a fixed database offset
pub struct StringSet<'db> {
    db: &'db Database,
    root_pointer: u64,
    cache: Mutex<HashMap<String, Record>>,
}

impl<'db> StringSet<'db> {
    /// Open the set rooted at `root_pointer`
    pub fn new(db: &'db Database, root_pointer: u64) -> Self {
        Self { db, root_pointer, cache: Mutex::new(HashMap::new()) }
    }

    fn tree(&self) -> Result<BTree<'db, StringComparator>> {
        BTree::new(self.db, self.root_pointer, STRING_SET_DEGREE, StringComparator)
    }

    /// Add `value`, returning its record
    ///
    /// If the set already holds `value` its existing record is returned.
    pub fn add(&self, value: &str) -> Result<Record> {
        if let Some(record) = self.find(value)? {
            return Ok(record);
        }

        let record = self.db.put_string(value)?;
        self.tree()?.insert(record)?;
        self.cache.lock().insert(value.to_owned(), record);
        Ok(record)
    }

    /// Record of `value`, if present
    pub fn find(&self, value: &str) -> Result<Option<Record>> {
        if let Some(&record) = self.cache.lock().get(value) {
            return Ok(Some(record));
        }

        let mut finder = StringFinder::new(value, identity);
        self.tree()?.accept(&mut finder)?;
        if let Some(record) = finder.found {
            self.cache.lock().insert(value.to_owned(), record);
        }
        Ok(finder.found)
    }

    /// Whether the set holds `value`
    pub fn contains(&self, value: &str) -> Result<bool> {
        Ok(self.find(value)?.is_some())
    }

    /// Remove `value` and free its string
    pub fn remove(&self, value: &str) -> Result<bool> {
        let Some(record) = self.find(value)? else {
            return Ok(false);
        };
        self.cache.lock().remove(value);
        let removed = self.tree()?.delete(record)?;
        self.db.string(record).delete()?;
        Ok(removed)
    }

    /// All strings, in byte order
    pub fn strings(&self) -> Result<Vec<String>> {
        self.tree()?.records()?.into_iter().map(|record| self.db.get_string(record)).collect()
    }

    /// Number of strings
    pub fn len(&self) -> Result<usize> {
        self.tree()?.len()
    }

    /// Whether the set is empty
    pub fn is_empty(&self) -> Result<bool> {
        self.tree()?.is_empty()
    }

    /// Forget cached lookups, e.g. after the database was cleared
    pub fn clear_caches(&self) {
        self.cache.lock().clear();
    }

    /// Free every string and the tree itself
    pub fn destroy(&self) -> Result<()> {
        let tree = self.tree()?;
        for record in tree.records()? {
            self.db.string(record).delete()?;
        }
        tree.destroy()?;
        self.clear_caches();
        Ok(())
    }
}
