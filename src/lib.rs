//! roundcache: an in-memory key-value cache engine built from a tag-indexed
//! hash index over a log-structured value store.
//!
//! The crate provides the core building blocks:
//!
//! - **ItemRef**: packed `(tag, block, offset)` reference stored in a bucket slot
//! - **SeqLock / PageBucket**: optimistic per-bucket concurrency, one cache line per bucket
//! - **Bucket operations**: tag-filtered lookup and single-pass insert-slot search
//! - **Log / LogSegment**: per-writer append-only segments of fixed-size blocks,
//!   with wraparound as the implicit eviction policy
//! - **RoundHash**: linear-hashing bucket ownership that grows and shrinks one
//!   bucket at a time
//! - **CacheTable**: the public set/get/delete surface tying index and log together
//!
//! # Architecture
//!
//! ```text
//!        +-----------------------------+
//!        |         CacheTable          |
//!        |  (hash, bucket ownership)   |
//!        +--------------+--------------+
//!                       |
//!            +----------+----------+
//!            v                     v
//!    +---------------+    +----------------+
//!    |  PageBucket[] |    |      Log       |
//!    | seqlock + tag |--->| segment/blocks |
//!    |   ItemRefs    |    |  (BlockPool)   |
//!    +---------------+    +----------------+
//! ```
//!
//! Readers probe buckets under the seqlock read protocol and resolve matching
//! references through the log; a version change mid-read discards the probe
//! and retries. Each writer thread claims one segment for its appends, so the
//! allocation path is lock-free.
//!
//! # Example
//!
//! ```
//! use roundcache::{CacheTable, HeapPoolBuilder, Log};
//!
//! let pool = HeapPoolBuilder::new()
//!     .block_size(64 * 1024)
//!     .heap_size(4 * 1024 * 1024)
//!     .build()
//!     .unwrap();
//! let log = Log::new(pool, 4, 16).unwrap();
//! let table = CacheTable::new(log, 1024).unwrap();
//!
//! let writer = table.log().claim_writer().unwrap();
//! table.set(&writer, b"key", b"value", 0).unwrap();
//!
//! let mut out = Vec::new();
//! assert_eq!(table.get(b"key", &mut out), Ok(5));
//! assert_eq!(&out, b"value");
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

// Core types
mod error;
mod item_ref;
mod sync;

// Index layer
mod bucket;
mod seqlock;

// Log layer
mod item;
mod log;
mod pool;
mod segment;

// Orchestration
mod metrics;
mod roundhash;
mod table;

// Re-exports
pub use error::{ItemError, ItemResult, TableError, TableResult};
pub use item_ref::{calc_tag, ItemRef, MAX_BLOCK_NUMBER, MAX_ITEM_OFFSET, TAG_MASK};

// Index re-exports
pub use bucket::{
    try_find_insert_bucket, try_find_slot, try_read_from_bucket, InsertSearch, KeyResolver,
    PageBucket, ITEMS_PER_BUCKET,
};
pub use seqlock::{SeqLock, SeqLockWriteGuard};

// Log re-exports
pub use item::{item_size_for, ITEM_HEADER_SIZE, MAX_KEY_LEN, MAX_VALUE_LEN};
pub use log::{Log, SegmentWriter};
pub use pool::{BlockId, BlockPool, HeapPool, HeapPoolBuilder};
pub use segment::{LogSegment, BLOCK_MAX_NUM};

// Orchestration re-exports
pub use metrics::{StoreStats, TableStats, TableStatsSnapshot};
pub use roundhash::RoundHash;
pub use table::{CacheBuilder, CacheTable};
