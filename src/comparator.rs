//! Record comparators for ordering B-tree entries
//!
//! A B-tree stores bare record pointers; the comparator gives them an order
//! by looking at what they point to. Closures of the right shape are
//! comparators too.

use crate::database::Database;
use crate::error::{Record, Result};
use std::cmp::Ordering;

/// Orders two records stored in the same database
pub trait RecordComparator {
    /// Compare the records `a` and `b`
    fn compare(&self, db: &Database, a: Record, b: Record) -> Result<Ordering>;
}

impl<F> RecordComparator for F
where
    F: Fn(&Database, Record, Record) -> Result<Ordering>,
{
    #[inline]
    fn compare(&self, db: &Database, a: Record, b: Record) -> Result<Ordering> {
        self(db, a, b)
    }
}

/// Records are strings, ordered by bytes
#[derive(Debug, Default, Clone, Copy)]
pub struct StringComparator;

impl RecordComparator for StringComparator {
    fn compare(&self, db: &Database, a: Record, b: Record) -> Result<Ordering> {
        db.string(a).compare_to(&db.string(b))
    }
}

/// Records are strings, ordered ignoring case with ties broken by bytes
#[derive(Debug, Default, Clone, Copy)]
pub struct CaseInsensitiveStringComparator;

impl RecordComparator for CaseInsensitiveStringComparator {
    fn compare(&self, db: &Database, a: Record, b: Record) -> Result<Ordering> {
        let right = db.get_string(b)?;
        match db.string(a).compare_ignore_case(&right)? {
            // Keep distinct strings distinct
            Ordering::Equal => db.string(a).compare(&right),
            order => Ok(order),
        }
    }
}

/// Records are 64-bit values stored at the record itself
#[derive(Debug, Default, Clone, Copy)]
pub struct LongComparator;

impl RecordComparator for LongComparator {
    fn compare(&self, db: &Database, a: Record, b: Record) -> Result<Ordering> {
        Ok(db.get_long(a.0)?.cmp(&db.get_long(b.0)?))
    }
}
