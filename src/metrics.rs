//! Operation statistics.
//!
//! Two counter groups mirror the two layers of the engine:
//!
//! - [`TableStats`] - per-segment operation outcomes (sets, gets, deletes)
//! - [`StoreStats`] - byte accounting for the segment's log blocks
//!
//! All counters are relaxed atomics; they can be shared across threads for
//! lock-free updates and read with [`TableStats::snapshot`].

use crate::sync::{AtomicU64, Ordering};

/// Per-segment operation counters.
#[derive(Debug, Default)]
pub struct TableStats {
    /// Live item count attributed to this segment.
    pub count: AtomicU64,
    /// SET operations that stored a new item.
    pub set_success: AtomicU64,
    /// SET operations that failed at the allocator or the bucket.
    pub set_fail: AtomicU64,
    /// SET operations that overwrote an existing key in place.
    pub set_inplace: AtomicU64,
    /// GET operations that found the key.
    pub get_found: AtomicU64,
    /// GET operations that missed.
    pub get_notfound: AtomicU64,
    /// DELETE operations that removed an entry.
    pub delete_found: AtomicU64,
    /// DELETE operations that missed.
    pub delete_notfound: AtomicU64,
}

impl TableStats {
    /// Create zeroed counters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot the current values.
    pub fn snapshot(&self) -> TableStatsSnapshot {
        TableStatsSnapshot {
            count: self.count.load(Ordering::Relaxed),
            set_success: self.set_success.load(Ordering::Relaxed),
            set_fail: self.set_fail.load(Ordering::Relaxed),
            set_inplace: self.set_inplace.load(Ordering::Relaxed),
            get_found: self.get_found.load(Ordering::Relaxed),
            get_notfound: self.get_notfound.load(Ordering::Relaxed),
            delete_found: self.delete_found.load(Ordering::Relaxed),
            delete_notfound: self.delete_notfound.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`TableStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TableStatsSnapshot {
    /// Live item count.
    pub count: u64,
    /// Successful sets.
    pub set_success: u64,
    /// Failed sets.
    pub set_fail: u64,
    /// In-place overwrites.
    pub set_inplace: u64,
    /// Get hits.
    pub get_found: u64,
    /// Get misses.
    pub get_notfound: u64,
    /// Delete hits.
    pub delete_found: u64,
    /// Delete misses.
    pub delete_notfound: u64,
}

impl TableStatsSnapshot {
    /// Hit rate over gets as a percentage (0.0 - 100.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.get_found + self.get_notfound;
        if total == 0 {
            0.0
        } else {
            (self.get_found as f64 / total as f64) * 100.0
        }
    }
}

/// Byte accounting for a segment's log blocks.
#[derive(Debug, Default)]
pub struct StoreStats {
    /// Bytes currently attributed to written records. Decremented when a
    /// block's contents are reclaimed by wraparound or block advance.
    pub actual_used_mem: AtomicU64,
}

impl StoreStats {
    /// Create zeroed counters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add written bytes.
    #[inline]
    pub fn add_used(&self, bytes: u64) {
        self.actual_used_mem.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Subtract reclaimed bytes, saturating at zero.
    #[inline]
    pub fn sub_used(&self, bytes: u64) {
        let _ = self
            .actual_used_mem
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| {
                Some(v.saturating_sub(bytes))
            });
    }

    /// Current used-byte estimate.
    pub fn used(&self) -> u64 {
        self.actual_used_mem.load(Ordering::Relaxed)
    }
}
