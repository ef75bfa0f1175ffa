//! Read, modify and commit locks.
//!
//! Readers and committers share one reader/writer lock: readers take the
//! shared side and a commit takes the exclusive side, so no reader observes a
//! commit in progress. A separate exclusive lock admits one modify
//! transaction at a time. A reader and an uncommitted modify may coexist.
//!
//! Every acquisition waits at most the configured timeout and fails with
//! [`CoreError::RolledBack`]. The lock manager never retries. Release is
//! fair, so a long queue of readers cannot starve a committer.

use crate::error::{CoreError, CoreResult};
use parking_lot::{Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

/// Coordinates read transactions, modify transactions and commits.
#[derive(Debug)]
pub struct LockManager {
    rw: RwLock<()>,
    modify: Mutex<()>,
    timeout: Duration,
}

/// Shared lock held by a read transaction.
#[must_use = "the lock is released when dropped"]
pub struct ReadLock<'a>(RwLockReadGuard<'a, ()>);

/// Exclusive lock held while a commit publishes its pages.
#[must_use = "the lock is released when dropped"]
pub struct CommitLock<'a>(RwLockWriteGuard<'a, ()>);

/// Exclusive lock held by the single in-progress modify transaction.
#[must_use = "the lock is released when dropped"]
pub struct ModifyLock<'a>(MutexGuard<'a, ()>);

impl LockManager {
    /// Creates a lock manager with the given acquisition timeout.
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self {
            rw: RwLock::new(()),
            modify: Mutex::new(()),
            timeout,
        }
    }

    /// Returns the acquisition timeout.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Acquires the shared read lock.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::RolledBack`] if a commit holds the lock past the
    /// timeout.
    pub fn lock_read(&self) -> CoreResult<ReadLock<'_>> {
        self.rw
            .try_read_for(self.timeout)
            .map(ReadLock)
            .ok_or_else(|| self.timed_out("read"))
    }

    /// Acquires the exclusive commit lock, waiting for active readers.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::RolledBack`] if readers remain past the timeout.
    pub fn lock_commit(&self) -> CoreResult<CommitLock<'_>> {
        self.rw
            .try_write_for(self.timeout)
            .map(CommitLock)
            .ok_or_else(|| self.timed_out("commit"))
    }

    /// Acquires the exclusive modify lock.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::RolledBack`] if another modify transaction holds
    /// the lock past the timeout.
    pub fn lock_modify(&self) -> CoreResult<ModifyLock<'_>> {
        self.modify
            .try_lock_for(self.timeout)
            .map(ModifyLock)
            .ok_or_else(|| self.timed_out("modify"))
    }

    fn timed_out(&self, role: &str) -> CoreError {
        tracing::warn!(role, timeout_ms = self.timeout.as_millis() as u64, "lock wait timed out");
        CoreError::rolled_back(format!(
            "{role} lock not acquired within {:?}",
            self.timeout
        ))
    }
}

impl ReadLock<'_> {
    /// Releases the lock, handing it to the longest waiter.
    pub fn unlock(self) {
        RwLockReadGuard::unlock_fair(self.0);
    }
}

impl CommitLock<'_> {
    /// Releases the lock, handing it to the longest waiter.
    pub fn unlock(self) {
        RwLockWriteGuard::unlock_fair(self.0);
    }
}

impl ModifyLock<'_> {
    /// Releases the lock, handing it to the longest waiter.
    pub fn unlock(self) {
        MutexGuard::unlock_fair(self.0);
    }
}

impl std::fmt::Debug for ReadLock<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ReadLock")
    }
}

impl std::fmt::Debug for CommitLock<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("CommitLock")
    }
}

impl std::fmt::Debug for ModifyLock<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ModifyLock")
    }
}
