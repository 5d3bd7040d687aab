//! Block pool seam and in-memory implementation.
//!
//! The log does not allocate memory itself: it is handed fixed-size blocks by
//! a pool and resolves `(block, offset)` references through it. [`BlockPool`]
//! is that contract. [`HeapPool`] is the in-memory implementation used by
//! tests and default wiring: one contiguous heap partitioned into blocks,
//! with a lock-free free list.

use std::cell::UnsafeCell;

use crate::item_ref::{MAX_BLOCK_NUMBER, MAX_ITEM_OFFSET};
use crossbeam_deque::{Injector, Steal};

/// Identifier of a block within a pool.
pub type BlockId = u32;

/// Provider of fixed-size raw memory blocks.
///
/// Addresses returned for a block must remain valid for the lifetime of the
/// pool; the engine assumes resolution is infallible after a successful
/// allocation.
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync`; readers resolve references
/// concurrently from many threads.
pub trait BlockPool: Send + Sync {
    /// Allocate a free block, or `None` if the pool is exhausted.
    fn alloc_block(&self) -> Option<BlockId>;

    /// Return a block to the free list.
    fn free_block(&self, id: BlockId);

    /// Base address of a block.
    fn block_ptr(&self, id: BlockId) -> *mut u8;

    /// Fixed block size in bytes.
    fn block_size(&self) -> usize;

    /// Number of blocks managed by this pool.
    fn num_blocks(&self) -> usize;

    /// Resolve a `(block, offset)` pair to a record address.
    #[inline]
    fn locate_item(&self, id: BlockId, offset: u64) -> *mut u8 {
        debug_assert!((offset as usize) < self.block_size());
        // SAFETY of the resulting pointer is the caller's concern; the
        // address itself stays within the block.
        unsafe { self.block_ptr(id).add(offset as usize) }
    }
}

/// In-memory block pool backed by one contiguous heap allocation.
///
/// The heap is allocated as `u64` words so every block (and therefore every
/// 8-aligned record offset) is 8-byte aligned. Segments write records through
/// pointers handed out by [`block_ptr`] while other threads hold `&HeapPool`,
/// so the storage sits behind an `UnsafeCell` and every block pointer derives
/// from the raw base captured at construction, never from a reference.
///
/// [`block_ptr`]: BlockPool::block_ptr
pub struct HeapPool {
    /// Owns the allocation; all access goes through `base`.
    _heap: UnsafeCell<Box<[u64]>>,

    /// Raw base of the heap. Stable for the pool's lifetime.
    base: *mut u64,

    /// Lock-free free list of block ids.
    free_queue: Injector<BlockId>,

    block_size: usize,
    num_blocks: usize,
}

// SAFETY: the heap is allocated once and never moved until drop; mutation
// happens only through `base` (interior mutability via the UnsafeCell), under
// the single-writer-per-block discipline the segments enforce, and the free
// queue is already Send + Sync.
unsafe impl Send for HeapPool {}
unsafe impl Sync for HeapPool {}

impl BlockPool for HeapPool {
    fn alloc_block(&self) -> Option<BlockId> {
        loop {
            match self.free_queue.steal() {
                Steal::Success(id) => return Some(id),
                Steal::Empty => return None,
                Steal::Retry => continue,
            }
        }
    }

    fn free_block(&self, id: BlockId) {
        assert!((id as usize) < self.num_blocks, "invalid block id: {id}");
        self.free_queue.push(id);
    }

    fn block_ptr(&self, id: BlockId) -> *mut u8 {
        assert!((id as usize) < self.num_blocks, "invalid block id: {id}");
        let word_offset = (id as usize * self.block_size) / 8;
        // SAFETY: the bounds assert keeps the offset inside the allocation.
        unsafe { self.base.add(word_offset) as *mut u8 }
    }

    fn block_size(&self) -> usize {
        self.block_size
    }

    fn num_blocks(&self) -> usize {
        self.num_blocks
    }
}

impl HeapPool {
    /// Number of blocks currently on the free list.
    pub fn free_count(&self) -> usize {
        self.free_queue.len()
    }
}

/// Builder for a [`HeapPool`].
pub struct HeapPoolBuilder {
    block_size: usize,
    heap_size: usize,
}

impl HeapPoolBuilder {
    /// Create a builder with 64KB blocks and a 4MB heap.
    pub fn new() -> Self {
        Self {
            block_size: 64 * 1024,
            heap_size: 4 * 1024 * 1024,
        }
    }

    /// Set the block size in bytes (must be a multiple of 8).
    pub fn block_size(mut self, size: usize) -> Self {
        self.block_size = size;
        self
    }

    /// Set the total heap size in bytes.
    ///
    /// The number of blocks is `heap_size / block_size`.
    pub fn heap_size(mut self, size: usize) -> Self {
        self.heap_size = size;
        self
    }

    /// Build the pool.
    pub fn build(self) -> Result<HeapPool, std::io::Error> {
        if self.block_size == 0 || self.block_size % 8 != 0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "block_size must be a non-zero multiple of 8",
            ));
        }
        // Record offsets within a block must fit the reference's 27-bit
        // offset field; a larger block would let offsets silently wrap.
        if self.block_size > MAX_ITEM_OFFSET as usize + 1 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "block_size exceeds the 27-bit item offset field",
            ));
        }

        let num_blocks = self.heap_size / self.block_size;
        if num_blocks == 0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "heap_size must be >= block_size",
            ));
        }
        if num_blocks > MAX_BLOCK_NUMBER as usize + 1 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "too many blocks for the 21-bit block number field",
            ));
        }

        let mut heap = vec![0u64; num_blocks * self.block_size / 8].into_boxed_slice();
        let base = heap.as_mut_ptr();

        let free_queue = Injector::new();
        for id in 0..num_blocks {
            free_queue.push(id as BlockId);
        }

        Ok(HeapPool {
            _heap: UnsafeCell::new(heap),
            base,
            free_queue,
            block_size: self.block_size,
            num_blocks,
        })
    }
}

impl Default for HeapPoolBuilder {
    fn default() -> Self {
        Self::new()
    }
}
