//! Multi-segment log store and resize orchestration.
//!
//! A [`Log`] owns every [`LogSegment`] plus the block pool backing them, and
//! performs segment-to-block rebalancing when an external capacity decision
//! adds or removes blocks. Expansion hands each incoming block to the next
//! segment in round-robin order; shrinking walks the same order in reverse so
//! it undoes the most recent expansion first.
//!
//! A mutex serializes resize calls, so at most one [`expand`] or [`shrink`]
//! is in flight. Block counts are atomics so writer threads can read them
//! concurrently with a resize; the round-robin pointer itself is only touched
//! under the mutex.
//!
//! [`expand`]: Log::expand
//! [`shrink`]: Log::shrink

use std::io::{Error, ErrorKind};

use parking_lot::Mutex;

use crate::bucket::KeyResolver;
use crate::item::{RawItem, ITEM_HEADER_SIZE};
use crate::item_ref::ItemRef;
use crate::pool::{BlockId, BlockPool};
use crate::segment::LogSegment;
use crate::sync::{AtomicU32, Ordering};

/// The log store: a block pool plus a fixed set of per-writer segments.
pub struct Log<P: BlockPool> {
    pool: P,
    segments: Box<[LogSegment]>,

    /// Total blocks across all segments.
    total_blocks: AtomicU32,

    /// Round-robin pointer naming the next segment to receive a block.
    /// Advanced only under `resize_lock`.
    resize_ptr: AtomicU32,

    /// Serializes expand/shrink; at most one resize runs at a time.
    resize_lock: Mutex<()>,
}

impl<P: BlockPool> Log<P> {
    /// Create a log with `num_segments` segments, distributing `init_blocks`
    /// blocks from `pool` round-robin across them.
    ///
    /// Every segment must start with at least one block, so `init_blocks`
    /// must be at least `num_segments` and the pool must be able to satisfy
    /// the allocation.
    pub fn new(pool: P, num_segments: usize, init_blocks: usize) -> Result<Self, Error> {
        if num_segments == 0 {
            log::error!("log construction failed: zero segments requested");
            return Err(Error::new(
                ErrorKind::InvalidInput,
                "log requires at least one segment",
            ));
        }
        if init_blocks < num_segments {
            log::error!(
                "log construction failed: {init_blocks} blocks cannot cover {num_segments} segments"
            );
            return Err(Error::new(
                ErrorKind::InvalidInput,
                "need at least one block per segment",
            ));
        }
        // Guard pools not built by HeapPoolBuilder: offsets inside a block
        // must fit the reference's 27-bit offset field.
        if pool.block_size() > crate::item_ref::MAX_ITEM_OFFSET as usize + 1 {
            log::error!(
                "log construction failed: block size {} exceeds the item offset field",
                pool.block_size()
            );
            return Err(Error::new(
                ErrorKind::InvalidInput,
                "block size exceeds the 27-bit item offset field",
            ));
        }

        let log = Self {
            pool,
            segments: (0..num_segments).map(|_| LogSegment::new()).collect(),
            total_blocks: AtomicU32::new(0),
            resize_ptr: AtomicU32::new(0),
            resize_lock: Mutex::new(()),
        };

        for _ in 0..init_blocks {
            let id = log.pool.alloc_block().ok_or_else(|| {
                log::error!("log construction failed: pool exhausted before {init_blocks} blocks");
                Error::new(ErrorKind::OutOfMemory, "block pool exhausted during init")
            })?;
            log.install_next(id);
        }

        Ok(log)
    }

    /// The backing block pool.
    #[inline]
    pub fn pool(&self) -> &P {
        &self.pool
    }

    /// Number of segments.
    #[inline]
    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    /// Access a segment by index.
    #[inline]
    pub fn segment(&self, index: usize) -> &LogSegment {
        &self.segments[index]
    }

    /// Total block count across all segments.
    #[inline]
    pub fn total_blocks(&self) -> u32 {
        self.total_blocks.load(Ordering::Acquire)
    }

    /// Advance the round-robin pointer and return the segment it named.
    fn next_resize_segment(&self) -> usize {
        let ptr = self.resize_ptr.load(Ordering::Relaxed);
        let next = (ptr + 1) % self.segments.len() as u32;
        self.resize_ptr.store(next, Ordering::Relaxed);
        ptr as usize
    }

    /// Step the round-robin pointer backwards and return the segment it now
    /// names. The reverse of [`next_resize_segment`].
    ///
    /// [`next_resize_segment`]: Log::next_resize_segment
    fn prev_resize_segment(&self) -> usize {
        let n = self.segments.len() as u32;
        let ptr = (self.resize_ptr.load(Ordering::Relaxed) + n - 1) % n;
        self.resize_ptr.store(ptr, Ordering::Relaxed);
        ptr as usize
    }

    fn install_next(&self, block_id: BlockId) {
        let index = self.next_resize_segment();
        self.segments[index].install_block(block_id, self.pool.block_ptr(block_id), self.pool.block_size());
        self.total_blocks.fetch_add(1, Ordering::Release);
    }

    /// Hand `blocks` to the segments, one per round-robin step.
    pub fn expand(&self, blocks: &[BlockId]) {
        let _resize = self.resize_lock.lock();
        log::debug!("expanding log by {} blocks", blocks.len());
        for &id in blocks {
            self.install_next(id);
        }
    }

    /// Reclaim up to `count` blocks from the segments, in reverse round-robin
    /// order, and return their ids to the caller for freeing or repurposing.
    ///
    /// A segment yields a block only if it retains more than one and the
    /// reclaimed block is not currently being written. Segments that cannot
    /// yield are skipped; the probe widens past the requested count but is
    /// bounded, so a log with nothing to give returns fewer than `count` ids
    /// instead of spinning.
    pub fn shrink(&self, count: usize) -> Vec<BlockId> {
        let _resize = self.resize_lock.lock();
        log::debug!("shrinking log by up to {count} blocks");
        let mut reclaimed = Vec::with_capacity(count);
        let max_attempts = count + self.segments.len();

        let mut attempts = 0;
        while reclaimed.len() < count && attempts < max_attempts {
            attempts += 1;
            let index = self.prev_resize_segment();
            if let Some((block_id, _ptr)) = self.segments[index].take_last_block() {
                self.total_blocks.fetch_sub(1, Ordering::Release);
                reclaimed.push(block_id);
            }
        }

        if reclaimed.len() < count {
            log::warn!(
                "shrink reclaimed {} of {} requested blocks",
                reclaimed.len(),
                count
            );
        }
        reclaimed
    }

    /// Claim an unclaimed segment for exclusive writing.
    ///
    /// Returns `None` when every segment already has a writer. The claim is
    /// released when the returned handle drops.
    pub fn claim_writer(&self) -> Option<SegmentWriter<'_, P>> {
        for (index, segment) in self.segments.iter().enumerate() {
            if segment
                .writer_claimed
                .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
                .is_ok()
            {
                return Some(SegmentWriter { log: self, index });
            }
        }
        None
    }

    /// Copy out the value of the record `item_ref` points at.
    ///
    /// Returns `None` for references outside the pool or block bounds.
    /// Lengths are clamped, so a reference gone stale through wraparound
    /// yields garbage bytes rather than an out-of-bounds read; callers detect
    /// staleness through the key comparison and the bucket's version check.
    pub fn read_value(&self, item_ref: ItemRef, out: &mut Vec<u8>) -> Option<usize> {
        self.read_record(item_ref, out).map(|(len, _)| len)
    }

    /// Like [`read_value`] but also reports the record's expiration
    /// timestamp (0 when the record never expires).
    ///
    /// [`read_value`]: Log::read_value
    pub fn read_record(&self, item_ref: ItemRef, out: &mut Vec<u8>) -> Option<(usize, u32)> {
        let block = item_ref.block();
        if block as usize >= self.pool.num_blocks() {
            return None;
        }
        let offset = item_ref.offset() as usize;
        let block_size = self.pool.block_size();
        if offset + ITEM_HEADER_SIZE > block_size {
            return None;
        }

        let readable = block_size - offset - ITEM_HEADER_SIZE;
        let ptr = self.pool.locate_item(block, item_ref.offset());
        // SAFETY: block and offset were bounds-checked against the pool, and
        // copy_value clamps the data read to `readable`.
        unsafe {
            let item = RawItem::from_ptr(ptr);
            let len = item.copy_value(out, readable);
            Some((len, item.expire_time()))
        }
    }
}

impl<P: BlockPool> KeyResolver for Log<P> {
    fn key_matches(&self, item_ref: ItemRef, key: &[u8]) -> bool {
        let block = item_ref.block();
        if block as usize >= self.pool.num_blocks() {
            return false;
        }
        let offset = item_ref.offset() as usize;
        let block_size = self.pool.block_size();
        if offset + ITEM_HEADER_SIZE > block_size {
            return false;
        }

        let readable = block_size - offset - ITEM_HEADER_SIZE;
        let ptr = self.pool.locate_item(block, item_ref.offset());
        // SAFETY: bounds-checked as in read_value; key_matches reads at most
        // `readable` bytes of the stored key.
        unsafe { RawItem::from_ptr(ptr).key_matches(key, readable) }
    }
}

/// Exclusive write handle over one segment.
///
/// Holding a `SegmentWriter` is the single-writer discipline: all appends to
/// the segment go through this handle, so the segment's cursor state needs no
/// lock. Reads may come from any thread.
pub struct SegmentWriter<'a, P: BlockPool> {
    log: &'a Log<P>,
    index: usize,
}

impl<'a, P: BlockPool> SegmentWriter<'a, P> {
    /// Index of the claimed segment.
    #[inline]
    pub fn index(&self) -> usize {
        self.index
    }

    /// The claimed segment.
    #[inline]
    pub fn segment(&self) -> &'a LogSegment {
        &self.log.segments[self.index]
    }

    /// Append a record, returning its `(block, offset)` location.
    pub fn append(
        &self,
        key_hash: u64,
        key: &[u8],
        value: &[u8],
        expire_time: u32,
    ) -> crate::error::ItemResult<(BlockId, u64)> {
        self.segment()
            .set_log(self.log.pool(), key_hash, key, value, expire_time)
    }

    /// Current write position of the claimed segment.
    pub fn tail(&self) -> u64 {
        self.segment().get_tail(self.log.pool().block_size())
    }
}

impl<P: BlockPool> Drop for SegmentWriter<'_, P> {
    fn drop(&mut self) {
        self.log.segments[self.index]
            .writer_claimed
            .store(false, Ordering::Release);
    }
}

#[cfg(all(test, not(feature = "loom")))]
mod tests {
    use super::*;
    use crate::item_ref::calc_tag;
    use crate::pool::{HeapPool, HeapPoolBuilder};

    fn create_log(blocks: usize, segments: usize, init: usize) -> Log<HeapPool> {
        let pool = HeapPoolBuilder::new()
            .block_size(1024)
            .heap_size(1024 * blocks)
            .build()
            .expect("pool");
        Log::new(pool, segments, init).expect("log")
    }

    #[test]
    fn test_new_distributes_round_robin() {
        let log = create_log(8, 3, 7);
        assert_eq!(log.total_blocks(), 7);
        // 7 blocks over 3 segments: 3, 2, 2.
        assert_eq!(log.segment(0).block_count(), 3);
        assert_eq!(log.segment(1).block_count(), 2);
        assert_eq!(log.segment(2).block_count(), 2);
    }

    #[test]
    fn test_new_rejects_underprovisioned_log() {
        let pool = HeapPoolBuilder::new()
            .block_size(1024)
            .heap_size(1024 * 4)
            .build()
            .expect("pool");
        assert!(Log::new(pool, 4, 3).is_err());

        let pool = HeapPoolBuilder::new()
            .block_size(1024)
            .heap_size(1024 * 4)
            .build()
            .expect("pool");
        // More init blocks than the pool holds.
        assert!(Log::new(pool, 2, 6).is_err());
    }

    #[test]
    fn test_new_rejects_block_size_beyond_offset_field() {
        // A pool implementation whose blocks are wider than the reference's
        // 27-bit offset field must be refused at construction.
        struct OversizedPool;

        impl BlockPool for OversizedPool {
            fn alloc_block(&self) -> Option<BlockId> {
                None
            }
            fn free_block(&self, _id: BlockId) {}
            fn block_ptr(&self, _id: BlockId) -> *mut u8 {
                std::ptr::null_mut()
            }
            fn block_size(&self) -> usize {
                2 * (crate::item_ref::MAX_ITEM_OFFSET as usize + 1)
            }
            fn num_blocks(&self) -> usize {
                1
            }
        }

        assert!(Log::new(OversizedPool, 1, 1).is_err());
    }

    #[test]
    fn test_expand_then_shrink_restores_totals() {
        let log = create_log(10, 2, 2);
        assert_eq!(log.total_blocks(), 2);

        let mut added = Vec::new();
        for _ in 0..4 {
            added.push(log.pool().alloc_block().expect("block"));
        }
        log.expand(&added);
        assert_eq!(log.total_blocks(), 6);
        assert_eq!(log.segment(0).block_count(), 3);
        assert_eq!(log.segment(1).block_count(), 3);

        let reclaimed = log.shrink(4);
        assert_eq!(reclaimed.len(), 4);
        assert_eq!(log.total_blocks(), 2);
        assert_eq!(log.segment(0).block_count(), 1);
        assert_eq!(log.segment(1).block_count(), 1);

        for id in reclaimed {
            log.pool().free_block(id);
        }
    }

    #[test]
    fn test_shrink_is_bounded_when_nothing_reclaimable() {
        // One block per segment: nothing can be reclaimed, and the widening
        // probe must terminate rather than spin.
        let log = create_log(4, 2, 2);
        let reclaimed = log.shrink(3);
        assert!(reclaimed.is_empty());
        assert_eq!(log.total_blocks(), 2);
    }

    #[test]
    fn test_claim_writer_exclusive() {
        let log = create_log(4, 2, 2);

        let w0 = log.claim_writer().expect("first claim");
        let w1 = log.claim_writer().expect("second claim");
        assert_ne!(w0.index(), w1.index());
        assert!(log.claim_writer().is_none());

        drop(w0);
        let w2 = log.claim_writer().expect("reclaim after drop");
        assert_ne!(w2.index(), w1.index());
    }

    #[test]
    fn test_append_and_read_value() {
        let log = create_log(4, 1, 2);
        let writer = log.claim_writer().expect("writer");

        let key = b"answer";
        let hash = 0x1234_5678_u64;
        let (block, offset) = writer.append(hash, key, b"42", 0).expect("append");

        let item_ref = ItemRef::new(calc_tag(hash), block, offset);
        assert!(log.key_matches(item_ref, key));
        assert!(!log.key_matches(item_ref, b"question"));

        let mut out = Vec::new();
        let len = log.read_value(item_ref, &mut out).expect("in bounds");
        assert_eq!(len, 2);
        assert_eq!(&out, b"42");
    }

    #[test]
    fn test_read_value_rejects_out_of_bounds_refs() {
        let log = create_log(4, 1, 2);
        let mut out = Vec::new();

        // Block number past the pool.
        let bad_block = ItemRef::new(1, 1000, 0);
        assert!(log.read_value(bad_block, &mut out).is_none());
        assert!(!log.key_matches(bad_block, b"k"));

        // Offset leaving no room for a header.
        let bad_offset = ItemRef::new(1, 0, 1020);
        assert!(log.read_value(bad_offset, &mut out).is_none());
    }

    #[test]
    fn test_writer_appends_go_to_claimed_segment() {
        let log = create_log(6, 2, 4);
        let writer = log.claim_writer().expect("writer");

        let before = writer.tail();
        writer.append(7, b"k", b"v", 0).expect("append");
        assert!(writer.tail() > before);

        let other = 1 - writer.index();
        assert_eq!(log.segment(other).get_tail(1024), 0);
    }
}
