//! Page buckets and single-bucket probe/insert primitives.
//!
//! A [`PageBucket`] is one cache-line of hash index state: a seqlock version
//! word, an occupancy bitmap for early-out pruning, and seven packed
//! [`ItemRef`] slots. Buckets are pre-allocated as a fixed table and never
//! individually created or destroyed; slots are overwritten in place.
//!
//! The operations here are the single-bucket primitives the outer
//! displacement/resize driver composes: tag-filtered lookup, exact-reference
//! search, and insert-slot selection. Key comparison is delegated through
//! [`KeyResolver`] so bucket logic never dereferences log memory itself.
//!
//! # Concurrency
//!
//! Readers use the bucket's seqlock read protocol and must retry on version
//! mismatch. Writers hold the bucket write lock; slot stores use Release
//! ordering so a reader that validates its version also sees complete slot
//! values. A reader may still resolve a reference whose record has since
//! been overwritten; the resolver's clamped key comparison makes that a
//! mismatch rather than undefined behavior.

use crate::item_ref::ItemRef;
use crate::seqlock::{SeqLock, SeqLockWriteGuard};
use crate::sync::{AtomicU64, AtomicU8, Ordering};

/// Number of item slots per bucket (bucket width).
pub const ITEMS_PER_BUCKET: usize = 7;

/// Key comparison seam between the index and the log.
///
/// Given a reference read from a bucket slot, decide whether the record it
/// points at stores exactly `key`. Implementations must tolerate references
/// to overwritten records: validate the block number, clamp lengths, and
/// never read past block bounds.
pub trait KeyResolver {
    /// Return `true` if the record at `item_ref` stores exactly `key`.
    fn key_matches(&self, item_ref: ItemRef, key: &[u8]) -> bool;
}

/// A 64-byte, cache-line aligned hash bucket.
#[repr(C, align(64))]
pub struct PageBucket {
    lock: SeqLock,
    occupancy: AtomicU8,
    item_vec: [AtomicU64; ITEMS_PER_BUCKET],
}

#[cfg(not(feature = "loom"))]
const _: () = assert!(std::mem::size_of::<PageBucket>() == 64);
#[cfg(not(feature = "loom"))]
const _: () = assert!(std::mem::align_of::<PageBucket>() == 64);

impl PageBucket {
    /// Create an empty bucket.
    pub fn new() -> Self {
        Self {
            lock: SeqLock::new(),
            occupancy: AtomicU8::new(0),
            item_vec: std::array::from_fn(|_| AtomicU64::new(0)),
        }
    }

    /// Begin an optimistic read of this bucket (spins while a writer is
    /// active, returns an even version).
    #[inline]
    pub fn read_version_begin(&self) -> u32 {
        self.lock.read_begin()
    }

    /// Re-read the version after copying out bucket contents. The read is
    /// valid only if this equals the value from [`read_version_begin`].
    ///
    /// [`read_version_begin`]: PageBucket::read_version_begin
    #[inline]
    pub fn read_version_end(&self) -> u32 {
        self.lock.read_end()
    }

    /// Acquire this bucket's write lock. Cross-bucket writes are
    /// independent; within one bucket, writes are totally ordered by the
    /// lock's CAS.
    #[inline]
    pub fn write_lock(&self) -> SeqLockWriteGuard<'_> {
        self.lock.write_lock()
    }

    /// Load the reference in `slot`.
    #[inline]
    pub fn slot(&self, slot: usize) -> ItemRef {
        ItemRef::from_raw(self.item_vec[slot].load(Ordering::Relaxed))
    }

    /// Store a reference into `slot` and set its occupancy bit.
    ///
    /// Caller must hold the bucket write lock.
    #[inline]
    pub fn set_slot(&self, slot: usize, item_ref: ItemRef) {
        debug_assert!(!item_ref.is_empty());
        self.item_vec[slot].store(item_ref.as_raw(), Ordering::Release);
        self.occupancy.fetch_or(1 << slot, Ordering::Release);
    }

    /// Clear `slot` back to the empty sentinel.
    ///
    /// Caller must hold the bucket write lock.
    #[inline]
    pub fn clear_slot(&self, slot: usize) {
        self.item_vec[slot].store(ItemRef::EMPTY.as_raw(), Ordering::Release);
        self.occupancy.fetch_and(!(1 << slot), Ordering::Release);
    }

    /// Occupancy bitmap: bit N set means slot N holds a live reference.
    ///
    /// Exact under the write lock; under the read protocol it may lag the
    /// slots and is only a pruning hint.
    #[inline]
    pub fn occupied_bits(&self) -> u8 {
        self.occupancy.load(Ordering::Relaxed)
    }

    /// Count of occupied slots.
    pub fn occupied_count(&self) -> usize {
        self.occupied_bits().count_ones() as usize
    }
}

impl Default for PageBucket {
    fn default() -> Self {
        Self::new()
    }
}

/// Outcome of an insert-slot search.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertSearch {
    /// The key is already present in this slot; overwrite in place.
    Duplicate(usize),

    /// No duplicate; this is the first empty slot encountered.
    Empty(usize),

    /// No duplicate and no empty slot.
    Full,
}

/// Tag-filtered key lookup within one bucket.
///
/// Scans every slot; for each slot whose tag matches, resolves the reference
/// and compares the full key. Returns the matching slot index, or `None` if
/// no slot matches.
pub fn try_read_from_bucket(
    bucket: &PageBucket,
    tag: u16,
    key: &[u8],
    resolver: &impl KeyResolver,
) -> Option<usize> {
    let mut bits = bucket.occupied_bits();
    while bits != 0 {
        let slot = bits.trailing_zeros() as usize;
        bits &= bits - 1;

        let item_ref = bucket.slot(slot);
        if item_ref.is_empty() || item_ref.tag() != tag {
            continue;
        }

        // The record may have been overwritten by a racing writer; the
        // resolver's clamped comparison turns that into a mismatch.
        if resolver.key_matches(item_ref, key) {
            return Some(slot);
        }
    }
    None
}

/// Locate the slot holding a specific, already-known reference.
///
/// Matches on tag and item offset only, without a key comparison. Used to
/// verify or clear a reference obtained earlier.
pub fn try_find_slot(bucket: &PageBucket, tag: u16, offset: u64) -> Option<usize> {
    for slot in 0..ITEMS_PER_BUCKET {
        let item_ref = bucket.slot(slot);
        if item_ref.is_empty() {
            continue;
        }
        if item_ref.tag() == tag && item_ref.offset() == offset {
            return Some(slot);
        }
    }
    None
}

/// Single-pass insert-slot search.
///
/// Simultaneously records the first empty slot encountered and checks every
/// occupied slot with a matching tag for a duplicate key. A duplicate wins
/// immediately; otherwise the first empty slot is reported, or
/// [`InsertSearch::Full`] if the bucket has none.
///
/// Caller must hold the bucket write lock.
pub fn try_find_insert_bucket(
    bucket: &PageBucket,
    tag: u16,
    key: &[u8],
    resolver: &impl KeyResolver,
) -> InsertSearch {
    let mut empty_slot = None;
    for slot in 0..ITEMS_PER_BUCKET {
        let item_ref = bucket.slot(slot);
        if item_ref.is_empty() {
            if empty_slot.is_none() {
                empty_slot = Some(slot);
            }
        } else if item_ref.tag() == tag && resolver.key_matches(item_ref, key) {
            return InsertSearch::Duplicate(slot);
        }
    }
    match empty_slot {
        Some(slot) => InsertSearch::Empty(slot),
        None => InsertSearch::Full,
    }
}
