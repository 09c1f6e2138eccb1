//! Reader/writer lock protecting a database
//!
//! Many readers or one writer. A thread holding read locks may upgrade by
//! declaring how many of its own read locks it gives up; those are released
//! before it waits, so concurrent upgraders take turns. Waits can be broken by [`DbLock::interrupt`]
//! or by a [`ProgressMonitor`] asking for cancellation; an abandoned wait
//! leaves the counters exactly as they were.
//!
//! Unbalanced or re-entrant use is a programming error and panics.

use crate::error::{Error, Result};
use parking_lot::{Condvar, Mutex};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, ThreadId};
use std::time::Duration;

/// How often a blocked writer polls its progress monitor
pub const DEFAULT_CANCELLATION_CHECK_INTERVAL: Duration = Duration::from_millis(500);

/// Cancellation source polled by long waits and long write operations
pub trait ProgressMonitor: Send + Sync {
    /// Whether the operation should be abandoned
    fn is_canceled(&self) -> bool;

    /// `Err(Error::Canceled)` once cancellation was requested
    fn check_canceled(&self) -> Result<()> {
        if self.is_canceled() {
            Err(Error::Canceled)
        } else {
            Ok(())
        }
    }
}

/// A shareable cancellation flag
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    /// Create a token that is not canceled
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Release);
    }

    /// Withdraw a cancellation request
    pub fn reset(&self) {
        self.flag.store(false, Ordering::Release);
    }
}

impl ProgressMonitor for CancelToken {
    fn is_canceled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}

/// Point-in-time view of the lock counters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockSnapshot {
    /// Read locks currently held, over all threads
    pub readers: usize,
    /// Whether a writer holds the lock
    pub write_locked: bool,
    /// Threads blocked in an acquire call
    pub waiting: usize,
}

#[derive(Default)]
struct LockState {
    /// Total read locks held
    readers: usize,
    /// Owner of the write lock
    writer: Option<ThreadId>,
    /// Read locks held per thread
    held: HashMap<ThreadId, usize>,
    /// Pending interrupt requests
    interrupted: HashSet<ThreadId>,
    /// Threads currently waiting
    waiting: usize,
}

/// The database-level reader/writer lock
pub struct DbLock {
    state: Mutex<LockState>,
    /// Signalled when the writer leaves
    no_writer: Condvar,
    /// Signalled when readers leave or the writer leaves
    no_readers: Condvar,
    /// Mirror of `writer.is_some()` for cheap assertions
    write_locked: AtomicBool,
    check_interval: Duration,
}

impl Default for DbLock {
    fn default() -> Self {
        Self::new(DEFAULT_CANCELLATION_CHECK_INTERVAL)
    }
}

impl DbLock {
    /// Create a lock whose writers poll their monitor every `check_interval`
    pub fn new(check_interval: Duration) -> Self {
        Self {
            state: Mutex::new(LockState::default()),
            no_writer: Condvar::new(),
            no_readers: Condvar::new(),
            write_locked: AtomicBool::new(false),
            check_interval,
        }
    }

    /// Take a shared read lock, waiting while a writer holds the lock
    pub fn acquire_read(&self) -> Result<()> {
        let me = thread::current().id();
        let mut state = self.state.lock();
        assert!(state.writer != Some(me), "read lock requested by the thread holding the write lock");

        if state.writer.is_some() {
            state.waiting += 1;
            while state.writer.is_some() {
                if state.interrupted.remove(&me) {
                    state.waiting -= 1;
                    return Err(Error::Interrupted);
                }
                self.no_writer.wait(&mut state);
            }
            state.waiting -= 1;
        }

        state.readers += 1;
        *state.held.entry(me).or_default() += 1;
        Ok(())
    }

    /// Give back one read lock of the calling thread
    pub fn release_read(&self) {
        let me = thread::current().id();
        let mut state = self.state.lock();

        let count = state.held.get_mut(&me).expect("read lock released by a thread that holds none");
        *count -= 1;
        if *count == 0 {
            state.held.remove(&me);
            state.interrupted.remove(&me);
        }
        state.readers -= 1;
        drop(state);

        self.no_readers.notify_all();
    }

    /// Take the exclusive write lock
    ///
    /// `give_up_read_locks` must equal the number of read locks the calling
    /// thread holds. They are released before waiting, so two threads
    /// upgrading at once do not block each other; one wins and the other
    /// follows once the winner leaves. If the wait is interrupted or
    /// canceled the read locks are re-established before returning.
    pub fn acquire_write(&self, give_up_read_locks: usize, monitor: Option<&dyn ProgressMonitor>) -> Result<()> {
        let me = thread::current().id();
        let mut state = self.state.lock();
        assert!(state.writer != Some(me), "write lock is not re-entrant");

        let held = state.held.get(&me).copied().unwrap_or(0);
        assert_eq!(
            held, give_up_read_locks,
            "a thread upgrading to the write lock must give up exactly the read locks it holds"
        );

        if give_up_read_locks > 0 {
            state.readers -= give_up_read_locks;
            state.held.remove(&me);
            self.no_readers.notify_all();
        }

        state.waiting += 1;
        let outcome = loop {
            if state.writer.is_none() && state.readers == 0 {
                break Ok(());
            }
            if state.interrupted.remove(&me) {
                break Err(Error::Interrupted);
            }
            if monitor.is_some_and(|m| m.is_canceled()) {
                break Err(Error::Canceled);
            }
            self.no_readers.wait_for(&mut state, self.check_interval);
        };
        state.waiting -= 1;

        match outcome {
            Ok(()) => {
                state.writer = Some(me);
                self.write_locked.store(true, Ordering::Release);
                Ok(())
            }
            Err(err) => {
                if give_up_read_locks > 0 {
                    // Not interruptible: the caller must get its read locks back
                    while state.writer.is_some() {
                        self.no_writer.wait(&mut state);
                    }
                    state.readers += give_up_read_locks;
                    state.held.insert(me, give_up_read_locks);
                }
                Err(err)
            }
        }
    }

    /// Give up the write lock, optionally keeping `establish_read_locks`
    /// read locks for the calling thread
    pub fn release_write(&self, establish_read_locks: usize) {
        let me = thread::current().id();
        let mut state = self.state.lock();
        assert_eq!(state.writer, Some(me), "write lock released by a thread that does not own it");

        state.writer = None;
        self.write_locked.store(false, Ordering::Release);
        if establish_read_locks > 0 {
            state.readers += establish_read_locks;
            state.held.insert(me, establish_read_locks);
        } else {
            state.interrupted.remove(&me);
        }
        drop(state);

        self.no_writer.notify_all();
        self.no_readers.notify_all();
    }

    /// Interrupt `thread`
    ///
    /// If it is blocked acquiring this lock it returns `Error::Interrupted`;
    /// otherwise its next blocking acquire does. A pending request is
    /// dropped when the thread releases the last lock it holds.
    pub fn interrupt(&self, thread: ThreadId) {
        self.state.lock().interrupted.insert(thread);
        self.no_writer.notify_all();
        self.no_readers.notify_all();
    }

    /// Drop a pending interrupt request for `thread`, returning whether
    /// there was one
    pub fn clear_interrupt(&self, thread: ThreadId) -> bool {
        self.state.lock().interrupted.remove(&thread)
    }

    /// Whether any thread holds the write lock
    #[inline]
    pub fn is_write_locked(&self) -> bool {
        self.write_locked.load(Ordering::Acquire)
    }

    /// Whether the calling thread holds the write lock
    pub fn holds_write_lock(&self) -> bool {
        self.state.lock().writer == Some(thread::current().id())
    }

    /// Read locks held by the calling thread
    pub fn read_locks_held(&self) -> usize {
        let me = thread::current().id();
        self.state.lock().held.get(&me).copied().unwrap_or(0)
    }

    /// Current counters
    pub fn snapshot(&self) -> LockSnapshot {
        let state = self.state.lock();
        LockSnapshot { readers: state.readers, write_locked: state.writer.is_some(), waiting: state.waiting }
    }
}
