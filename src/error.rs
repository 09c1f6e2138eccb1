//! Error types for pdomdb

use std::borrow::Cow;
use std::fmt;
use std::io;
use thiserror::Error;

/// The main error type for pdomdb operations
#[derive(Error, Debug, Clone)]
pub enum Error {
    /// I/O error occurred
    #[error("I/O error: {0}")]
    Io(String),

    /// The file was written with a different format version
    #[error("Version mismatch: expected {expected}, found {found}")]
    VersionMismatch {
        /// Version the caller asked for
        expected: u32,
        /// Version stored in the file
        found: u32,
    },

    /// The file is not a pdomdb database
    #[error("Invalid database")]
    InvalidDatabase,

    /// Database corruption detected
    #[error("Corruption detected: {details}")]
    Corruption {
        /// Description of the corruption
        details: String,
        /// Record where corruption was detected
        record: Option<Record>,
    },

    /// Invalid parameter
    #[error("Invalid parameter: {0}")]
    InvalidParameter(&'static str),

    /// The thread was interrupted while waiting for a lock
    #[error("Interrupted while waiting for the database lock")]
    Interrupted,

    /// The progress monitor requested cancellation
    #[error("Operation canceled")]
    Canceled,

    /// Custom error, typically raised by comparators and visitors
    #[error("{0}")]
    Custom(Cow<'static, str>),
}

impl Error {
    /// Create a corruption error without an associated record
    pub fn corruption(details: impl Into<String>) -> Self {
        Error::Corruption { details: details.into(), record: None }
    }

    /// Create a corruption error pointing at `record`
    pub fn corruption_at(record: Record, details: impl Into<String>) -> Self {
        Error::Corruption { details: details.into(), record: Some(record) }
    }

    /// True for errors that mean a lock wait was abandoned on request
    pub fn is_interruption(&self) -> bool {
        matches!(self, Error::Interrupted | Error::Canceled)
    }
}

/// Address of a record inside a database file
///
/// A record is a plain byte offset. Zero is reserved as the null pointer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Record(pub u64);

impl Record {
    /// The null record
    pub const NULL: Record = Record(0);

    /// Check whether this is the null record
    #[inline]
    pub fn is_null(self) -> bool {
        self.0 == 0
    }

    /// Absolute address of a field `offset` bytes into the record
    #[inline]
    pub fn offset(self, offset: usize) -> u64 {
        self.0 + offset as u64
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Result type alias for pdomdb operations
pub type Result<T> = std::result::Result<T, Error>;

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Io(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_null() {
        assert!(Record::NULL.is_null());
        assert!(!Record(16).is_null());
        assert_eq!(Record(4100).offset(8), 4108);
    }

    #[test]
    fn test_interruption_kinds() {
        assert!(Error::Interrupted.is_interruption());
        assert!(Error::Canceled.is_interruption());
        assert!(!Error::InvalidDatabase.is_interruption());
    }

    #[test]
    fn test_io_conversion_keeps_message() {
        let err: Error = io::Error::new(io::ErrorKind::NotFound, "gone").into();
        assert!(matches!(err, Error::Io(ref msg) if msg.contains("gone")));
    }
}
