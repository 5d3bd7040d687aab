//! Per-writer log segments.
//!
//! A [`LogSegment`] is one writer thread's private append-only log, composed
//! of up to [`BLOCK_MAX_NUM`] fixed-size blocks owned exclusively by the
//! segment (ownership transfers only during log resize). The segment owns an
//! allocation cursor (`using_block`, `offset`), a wraparound counter
//! (`round`), per-block residue counters, and running statistics.
//!
//! Allocation is a bump-pointer advance within the active block. When the
//! active block cannot fit a record, the cursor advances to the next block;
//! past the last block it wraps to block 0 and increments `round`. The
//! wraparound is the engine's implicit eviction: records in the reused block
//! become unreachable as they are overwritten, and surviving bucket
//! references to them go stale. The index detects stale references lazily on
//! access; the allocator does not invalidate them.
//!
//! # Concurrency
//!
//! One thread owns each segment's append path, so allocation needs no lock.
//! Block counts are atomics because the resize driver mutates them while
//! other threads read them; cursor fields are atomics only so the struct can
//! be shared, and are documented single-writer.

use crate::error::{ItemError, ItemResult};
use crate::item::{item_size_for, RawItem, ITEM_HEADER_SIZE, MAX_KEY_LEN, MAX_VALUE_LEN};
use crate::metrics::{StoreStats, TableStats};
use crate::pool::{BlockId, BlockPool};
use crate::sync::{AtomicBool, AtomicPtr, AtomicU32, AtomicU64, Ordering};

/// Maximum number of blocks a single segment can own.
pub const BLOCK_MAX_NUM: usize = 64;

/// One fixed-size block owned by a segment.
///
/// `residue` counts the bytes remaining before the block is full. It is
/// read-only for everything except the owning segment's allocation path and
/// the serialized resize driver.
pub(crate) struct LogBlock {
    block_id: AtomicU32,
    ptr: AtomicPtr<u8>,
    residue: AtomicU32,
}

impl LogBlock {
    fn empty() -> Self {
        Self {
            block_id: AtomicU32::new(0),
            ptr: AtomicPtr::new(std::ptr::null_mut()),
            residue: AtomicU32::new(0),
        }
    }
}

/// A per-writer append-only log over a set of blocks.
pub struct LogSegment {
    blocks: Box<[LogBlock]>,

    /// Number of blocks currently owned. Mutated only by the resize driver.
    block_count: AtomicU32,

    /// Index of the block the allocation cursor is in. Single-writer.
    using_block: AtomicU32,

    /// Byte offset of the next record within the active block. Single-writer.
    offset: AtomicU64,

    /// Wraparound counter: number of times the cursor wrapped to block 0.
    round: AtomicU32,

    /// Moving average record size (f64 bits). Single-writer.
    avg_item_size: AtomicU64,

    /// Set when a writer handle has been claimed for this segment.
    pub(crate) writer_claimed: AtomicBool,

    /// Operation counters.
    pub table_stats: TableStats,

    /// Byte accounting.
    pub store_stats: StoreStats,
}

impl LogSegment {
    /// Create a segment with no blocks.
    pub fn new() -> Self {
        Self {
            blocks: (0..BLOCK_MAX_NUM).map(|_| LogBlock::empty()).collect(),
            block_count: AtomicU32::new(0),
            using_block: AtomicU32::new(0),
            offset: AtomicU64::new(0),
            round: AtomicU32::new(0),
            avg_item_size: AtomicU64::new(0f64.to_bits()),
            writer_claimed: AtomicBool::new(false),
            table_stats: TableStats::new(),
            store_stats: StoreStats::new(),
        }
    }

    /// Number of blocks this segment owns.
    #[inline]
    pub fn block_count(&self) -> u32 {
        self.block_count.load(Ordering::Acquire)
    }

    /// Index of the block currently being written.
    #[inline]
    pub fn using_block(&self) -> u32 {
        self.using_block.load(Ordering::Relaxed)
    }

    /// Wraparound count.
    #[inline]
    pub fn round(&self) -> u32 {
        self.round.load(Ordering::Relaxed)
    }

    /// Moving average record size in bytes.
    pub fn avg_item_size(&self) -> f64 {
        f64::from_bits(self.avg_item_size.load(Ordering::Relaxed))
    }

    /// Pool block id of the segment-local block at `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index` is not below the current block count.
    pub fn get_block_id(&self, index: u32) -> BlockId {
        assert!(index < self.block_count(), "block index out of range");
        self.blocks[index as usize].block_id.load(Ordering::Relaxed)
    }

    /// Find the segment-local index owning the pool block `block_id`.
    pub fn find_block_index(&self, block_id: BlockId) -> Option<u32> {
        let count = self.block_count();
        (0..count).find(|&i| self.blocks[i as usize].block_id.load(Ordering::Relaxed) == block_id)
    }

    /// Write position of the allocation cursor, as a byte offset from the
    /// start of the segment's block array.
    pub fn get_tail(&self, block_size: usize) -> u64 {
        u64::from(self.using_block()) * block_size as u64 + self.offset.load(Ordering::Relaxed)
    }

    /// Hand a block to this segment (log construction or expand).
    ///
    /// The block becomes visible to the owning writer once the count store
    /// publishes it. Must only be called by the serialized resize path.
    pub(crate) fn install_block(&self, block_id: BlockId, ptr: *mut u8, block_size: usize) {
        let count = self.block_count.load(Ordering::Relaxed) as usize;
        assert!(count < BLOCK_MAX_NUM, "segment block array is full");

        let block = &self.blocks[count];
        block.block_id.store(block_id, Ordering::Relaxed);
        block.ptr.store(ptr, Ordering::Relaxed);
        block.residue.store(block_size as u32, Ordering::Relaxed);

        self.block_count.fetch_add(1, Ordering::Release);
    }

    /// Reclaim this segment's last block for the resize driver.
    ///
    /// Succeeds only if the segment retains more than one block and the
    /// reclaimed block is not the one currently being written. Must only be
    /// called by the serialized resize path.
    pub(crate) fn take_last_block(&self) -> Option<(BlockId, *mut u8)> {
        let count = self.block_count.load(Ordering::Relaxed);
        if count <= 1 || self.using_block() >= count - 1 {
            return None;
        }

        let removed = (self.block_count.fetch_sub(1, Ordering::Release) - 1) as usize;
        let block = &self.blocks[removed];
        Some((
            block.block_id.load(Ordering::Relaxed),
            block.ptr.load(Ordering::Relaxed),
        ))
    }

    /// Reserve space for a record of `item_size` bytes.
    ///
    /// Returns the record's byte offset within the active block. Advances to
    /// the next block when the active block's residue is insufficient, and
    /// wraps to block 0 (incrementing `round`) past the last block. Single
    /// writer only.
    ///
    /// # Errors
    ///
    /// - [`ItemError::BatchTooSmall`] if the record can never fit a block
    /// - [`ItemError::Full`] if the segment owns no blocks
    pub fn alloc_item(&self, block_size: usize, item_size: u64) -> ItemResult<u64> {
        if item_size > block_size as u64 {
            return Err(ItemError::BatchTooSmall);
        }
        let count = self.block_count();
        if count == 0 {
            return Err(ItemError::Full);
        }

        let mut using = self.using_block.load(Ordering::Relaxed);
        if u64::from(self.blocks[using as usize].residue.load(Ordering::Relaxed)) < item_size {
            self.offset.store(0, Ordering::Relaxed);
            if using + 1 < count {
                using += 1;
                self.using_block.store(using, Ordering::Relaxed);
                if self.round.load(Ordering::Relaxed) > 0 {
                    // Past the first pass, the next block still holds old
                    // records; reclaim its accounting before reuse.
                    self.reclaim_block(using as usize, block_size);
                }
            } else {
                using = 0;
                self.using_block.store(0, Ordering::Relaxed);
                let round = self.round.fetch_add(1, Ordering::Relaxed) + 1;
                self.reclaim_block(0, block_size);
                log::debug!("log segment wrapped to block 0, round {round}");
            }
        }

        let item_offset = self.offset.load(Ordering::Relaxed);
        self.offset.store(item_offset + item_size, Ordering::Relaxed);
        self.blocks[using as usize]
            .residue
            .fetch_sub(item_size as u32, Ordering::Relaxed);

        // Moving average over successful sets so far.
        let sets = self.table_stats.set_success.load(Ordering::Relaxed);
        let avg = f64::from_bits(self.avg_item_size.load(Ordering::Relaxed));
        let new_avg = (avg * sets as f64 + item_size as f64) / (sets as f64 + 1.0);
        self.avg_item_size.store(new_avg.to_bits(), Ordering::Relaxed);

        Ok(item_offset)
    }

    /// Reset a block's residue to full capacity, releasing the used-byte
    /// accounting of the records being abandoned in it.
    fn reclaim_block(&self, index: usize, block_size: usize) {
        let residue = self.blocks[index].residue.load(Ordering::Relaxed);
        self.store_stats
            .sub_used(block_size as u64 - u64::from(residue));
        self.blocks[index]
            .residue
            .store(block_size as u32, Ordering::Relaxed);
    }

    /// Append an encoded record and return its `(block, offset)` location.
    ///
    /// Validates lengths, reserves space with [`alloc_item`], writes the
    /// record, and updates statistics. The returned pair is what the index
    /// layer packs into a bucket's item reference. Single writer only.
    ///
    /// [`alloc_item`]: LogSegment::alloc_item
    pub fn set_log<P: BlockPool>(
        &self,
        pool: &P,
        key_hash: u64,
        key: &[u8],
        value: &[u8],
        expire_time: u32,
    ) -> ItemResult<(BlockId, u64)> {
        if key.len() > MAX_KEY_LEN || value.len() > MAX_VALUE_LEN {
            self.table_stats.set_fail.fetch_add(1, Ordering::Relaxed);
            return Err(ItemError::BatchTooSmall);
        }

        let item_size = item_size_for(key.len(), value.len());
        let item_offset = match self.alloc_item(pool.block_size(), item_size) {
            Ok(offset) => offset,
            Err(e) => {
                self.table_stats.set_fail.fetch_add(1, Ordering::Relaxed);
                return Err(e);
            }
        };

        let block_id = self.get_block_id(self.using_block());
        let ptr = pool.locate_item(block_id, item_offset);
        // SAFETY: alloc_item reserved item_size bytes at this 8-aligned
        // offset inside a live block, and this thread is the only writer.
        unsafe {
            RawItem::from_ptr(ptr).write(key_hash, key, value, expire_time);
        }

        self.store_stats.add_used(item_size);
        self.table_stats.set_success.fetch_add(1, Ordering::Relaxed);

        Ok((block_id, item_offset))
    }

    /// Copy out the value of the record at `(block_id, offset)`.
    ///
    /// Lengths are clamped defensively: a reference that has gone stale
    /// through wraparound may yield garbage bytes, but never a read past the
    /// block. Returns the (clamped) value length.
    pub fn get_log<P: BlockPool>(
        &self,
        pool: &P,
        block_id: BlockId,
        offset: u64,
        out: &mut Vec<u8>,
    ) -> usize {
        let block_size = pool.block_size();
        if offset as usize + ITEM_HEADER_SIZE > block_size {
            out.clear();
            return 0;
        }
        let readable = block_size - offset as usize - ITEM_HEADER_SIZE;
        let ptr = pool.locate_item(block_id, offset);

        // SAFETY: offset leaves at least a header inside the block, and
        // copy_value clamps the data read to `readable`.
        let len = unsafe { RawItem::from_ptr(ptr).copy_value(out, readable) };
        self.table_stats.get_found.fetch_add(1, Ordering::Relaxed);
        len
    }
}

impl Default for LogSegment {
    fn default() -> Self {
        Self::new()
    }
}
