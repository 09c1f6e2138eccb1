//! Paged record storage with an on-disk B-tree
//!
//! This crate provides the storage core of an index database: a file of
//! fixed-size chunks served through a shared LRU [`ChunkCache`], a
//! size-class block allocator handing out [`Record`]s, a database-wide
//! reader/writer lock, and a [`BTree`] of records ordered by a
//! caller-supplied comparator.
//!
//! ```no_run
//! use pdomdb::{BTree, Database, StringComparator, DATA_AREA};
//!
//! # fn main() -> pdomdb::Result<()> {
//! let db = Database::builder().version(1).open("index.pdom")?;
//! let guard = db.write(0, None)?;
//! let tree = BTree::new(&db, DATA_AREA, 8, StringComparator)?;
//! tree.insert(db.put_string("main")?)?;
//! guard.release(true)?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![deny(unsafe_op_in_unsafe_fn)]

pub mod btree;
pub mod chunk;
pub mod chunk_cache;
pub mod comparator;
pub mod database;
pub mod error;
pub mod io;
pub mod lock;
pub mod properties;
pub mod space_info;
pub mod string;
pub mod string_set;

// Re-exports
pub use btree::{BTree, BTreeVisitor, CollectAll, MAX_DEGREE};
pub use chunk::{Chunk, CHUNK_SIZE};
pub use chunk_cache::{CacheStats, ChunkCache};
pub use comparator::{CaseInsensitiveStringComparator, LongComparator, RecordComparator, StringComparator};
pub use database::{
    AllocStats, Database, DatabaseBuilder, ReadGuard, WriteGuard, DATA_AREA, DATA_AREA_END, MAX_MALLOC_SIZE,
};
pub use error::{Error, Record, Result};
pub use lock::{CancelToken, LockSnapshot, ProgressMonitor};
pub use properties::DbProperties;
pub use space_info::SpaceInfo;
pub use string::DbString;
pub use string_set::StringSet;

/// Library version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
