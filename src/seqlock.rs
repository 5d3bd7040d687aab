//! Optimistic-read, exclusive-write version lock.
//!
//! A [`SeqLock`] lets any number of readers observe a consistent snapshot of
//! associated data while a single writer mutates it, using a 32-bit version
//! counter instead of a mutex:
//!
//! - even version: stable, no writer active
//! - odd version: write in progress
//!
//! Readers never block. A read is valid only if the version observed before
//! and after copying the data is the same even value; on mismatch the reader
//! discards the snapshot and retries. Writers exclude each other with a CAS
//! from even `v` to `v | 1`.
//!
//! The primitive is independent of the data it guards so the concurrency
//! contract can be audited (and model-checked) separately from bucket logic.

use crate::sync::{fence, spin_loop, AtomicU32, Ordering};

/// Sequence lock over a 32-bit version counter.
pub struct SeqLock {
    version: AtomicU32,
}

impl SeqLock {
    /// Create an unlocked lock with version 0.
    pub fn new() -> Self {
        Self {
            version: AtomicU32::new(0),
        }
    }

    /// Begin an optimistic read.
    ///
    /// Spins until the version is observed even (no writer active) and
    /// returns that value. Pass the result to [`SeqLock::validate`] after
    /// copying out the guarded data.
    #[inline]
    pub fn read_begin(&self) -> u32 {
        loop {
            let v = self.version.load(Ordering::Acquire);
            if v & 1 == 0 {
                return v;
            }
            spin_loop();
        }
    }

    /// Finish an optimistic read, returning the current version.
    ///
    /// The fence orders the caller's data loads before the version re-read,
    /// so a version match proves no writer ran in between.
    #[inline]
    pub fn read_end(&self) -> u32 {
        fence(Ordering::Acquire);
        self.version.load(Ordering::Acquire)
    }

    /// Check that a read observed a stable snapshot.
    #[inline]
    pub fn validate(begin: u32, end: u32) -> bool {
        begin == end
    }

    /// Acquire the write lock.
    ///
    /// Transitions the version from an even value `v` to `v | 1` via CAS,
    /// retrying on contention. Returns an RAII guard that releases the lock
    /// on drop. At most one writer holds the lock at a time.
    #[inline]
    pub fn write_lock(&self) -> SeqLockWriteGuard<'_> {
        loop {
            let v = self.version.load(Ordering::Relaxed) & !1;
            if self
                .version
                .compare_exchange_weak(v, v | 1, Ordering::Acquire, Ordering::Relaxed)
                .is_ok()
            {
                return SeqLockWriteGuard { lock: self };
            }
            spin_loop();
        }
    }

    /// Release the write lock.
    ///
    /// Only the lock holder touches the version here, so a plain increment
    /// (with Release ordering) suffices; the prior state must have the low
    /// bit set.
    #[inline]
    fn write_unlock(&self) {
        let prev = self.version.fetch_add(1, Ordering::Release);
        debug_assert!(prev & 1 == 1, "unlock of a lock that was not held");
    }

    /// Current raw version value. Intended for assertions and tests.
    #[inline]
    pub fn version(&self) -> u32 {
        self.version.load(Ordering::Relaxed)
    }
}

impl Default for SeqLock {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII guard for the exclusive write side of a [`SeqLock`].
///
/// While the guard is alive the version is odd and readers will retry.
pub struct SeqLockWriteGuard<'a> {
    lock: &'a SeqLock,
}

impl Drop for SeqLockWriteGuard<'_> {
    fn drop(&mut self) {
        self.lock.write_unlock();
    }
}
