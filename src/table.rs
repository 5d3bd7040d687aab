//! The cache table: hash index over the log store.
//!
//! [`CacheTable`] ties the pieces together: it hashes keys, maps them to
//! buckets, runs the bucket probe/insert primitives under the seqlock
//! protocol, and stores values through the log. Writers append through a
//! claimed [`SegmentWriter`]; readers resolve bucket references through the
//! log from any thread.
//!
//! Bucket ownership normally comes from masking the key hash over a
//! power-of-two bucket count. While an incremental resize is in progress the
//! table consults an installed [`RoundHash`] instead, so ownership moves one
//! bucket at a time; the migration driver itself lives outside the table.

use std::hash::BuildHasher;
use std::time::{SystemTime, UNIX_EPOCH};

use ahash::RandomState;
use parking_lot::RwLock;

use crate::bucket::{
    try_find_insert_bucket, try_read_from_bucket, InsertSearch, PageBucket,
};
use crate::error::{TableError, TableResult};
use crate::item_ref::{calc_tag, ItemRef};
use crate::log::{Log, SegmentWriter};
use crate::metrics::{TableStats, TableStatsSnapshot};
use crate::pool::BlockPool;
use crate::roundhash::RoundHash;
use crate::sync::Ordering;

/// Seconds since the Unix epoch, saturating to 0 on clock failure.
fn unix_now() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as u32)
        .unwrap_or(0)
}

/// Concurrent hash table over a log store.
pub struct CacheTable<P: BlockPool> {
    hasher: RandomState,
    buckets: Box<[PageBucket]>,
    mask: u64,
    log: Log<P>,

    /// Installed while an incremental resize is in progress.
    resize_map: RwLock<Option<RoundHash>>,

    stats: TableStats,
}

impl<P: BlockPool> CacheTable<P> {
    /// Create a table with `num_buckets` buckets over `log`.
    ///
    /// `num_buckets` must be a power of two so the static hash-to-bucket
    /// mapping is a mask.
    pub fn new(log: Log<P>, num_buckets: usize) -> TableResult<Self> {
        Self::with_hasher(log, num_buckets, RandomState::new())
    }

    /// Create a table with an explicit hasher state (deterministic hashing
    /// for tests and reproducible benchmarks).
    pub fn with_hasher(
        log: Log<P>,
        num_buckets: usize,
        hasher: RandomState,
    ) -> TableResult<Self> {
        if num_buckets == 0 || !num_buckets.is_power_of_two() {
            return Err(TableError::Failure);
        }
        Ok(Self {
            hasher,
            buckets: (0..num_buckets).map(|_| PageBucket::new()).collect(),
            mask: num_buckets as u64 - 1,
            log,
            resize_map: RwLock::new(None),
            stats: TableStats::new(),
        })
    }

    /// The underlying log store.
    #[inline]
    pub fn log(&self) -> &Log<P> {
        &self.log
    }

    /// Number of buckets.
    #[inline]
    pub fn num_buckets(&self) -> usize {
        self.buckets.len()
    }

    /// Table-level operation counters.
    pub fn stats(&self) -> TableStatsSnapshot {
        self.stats.snapshot()
    }

    /// Hash a key.
    #[inline]
    pub fn hash_key(&self, key: &[u8]) -> u64 {
        self.hasher.hash_one(key)
    }

    /// Owning bucket for a hash: the installed [`RoundHash`] during a
    /// resize, the static mask otherwise.
    fn bucket_index(&self, hash: u64) -> usize {
        match *self.resize_map.read() {
            Some(rh) => rh.hash_to_bucket(hash) as usize,
            None => (hash & self.mask) as usize,
        }
    }

    /// Install a [`RoundHash`] and switch bucket ownership to it.
    ///
    /// The mapping must not address more buckets than the table has. Fails
    /// with [`TableError::UnderExpansion`] if a resize is already installed.
    pub fn begin_resize(&self, map: RoundHash) -> TableResult<()> {
        if map.num_buckets() as usize > self.buckets.len() {
            return Err(TableError::Failure);
        }
        let mut guard = self.resize_map.write();
        if guard.is_some() {
            return Err(TableError::UnderExpansion);
        }
        *guard = Some(map);
        Ok(())
    }

    /// Remove the installed resize mapping, returning ownership to the
    /// static mask.
    pub fn end_resize(&self) -> Option<RoundHash> {
        self.resize_map.write().take()
    }

    /// Whether a resize mapping is installed.
    pub fn is_resizing(&self) -> bool {
        self.resize_map.read().is_some()
    }

    /// Store a key/value pair through `writer`'s segment.
    ///
    /// An existing key is overwritten in place: the new record is appended
    /// to the log and the bucket slot repointed, leaving the old record to
    /// age out through wraparound. `expire_time` is an absolute Unix
    /// timestamp in seconds, 0 for no expiry.
    pub fn set(
        &self,
        writer: &SegmentWriter<'_, P>,
        key: &[u8],
        value: &[u8],
        expire_time: u32,
    ) -> TableResult<()> {
        let hash = self.hash_key(key);
        let tag = calc_tag(hash);
        let bucket = &self.buckets[self.bucket_index(hash)];

        let _guard = bucket.write_lock();
        match try_find_insert_bucket(bucket, tag, key, &self.log) {
            InsertSearch::Duplicate(slot) => {
                let (block, offset) = writer
                    .append(hash, key, value, expire_time)
                    .map_err(|_| TableError::Failure)?;
                bucket.set_slot(slot, ItemRef::new(tag, block, offset));
                self.stats.set_inplace.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            InsertSearch::Empty(slot) => {
                let (block, offset) = writer
                    .append(hash, key, value, expire_time)
                    .map_err(|_| TableError::Failure)?;
                bucket.set_slot(slot, ItemRef::new(tag, block, offset));
                self.stats.count.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            InsertSearch::Full => Err(TableError::TableFull),
        }
    }

    /// Look up `key`, copying its value into `out` and returning the value
    /// length.
    ///
    /// Runs the seqlock read protocol: the bucket is probed and the value
    /// copied optimistically, then the version is revalidated; a concurrent
    /// write to the bucket discards the read and retries. Expired entries
    /// report [`TableError::KeyNotFound`].
    pub fn get(&self, key: &[u8], out: &mut Vec<u8>) -> TableResult<usize> {
        let hash = self.hash_key(key);
        let tag = calc_tag(hash);
        let bucket = &self.buckets[self.bucket_index(hash)];

        loop {
            let version = bucket.read_version_begin();
            let found = try_read_from_bucket(bucket, tag, key, &self.log);

            let result = match found {
                Some(slot) => {
                    let item_ref = bucket.slot(slot);
                    self.log
                        .read_record(item_ref, out)
                        .ok_or(TableError::KeyNotFound)
                }
                None => Err(TableError::KeyNotFound),
            };

            if bucket.read_version_end() != version {
                continue;
            }

            return match result {
                Ok((len, expire_time)) => {
                    if expire_time != 0 && expire_time <= unix_now() {
                        self.stats.get_notfound.fetch_add(1, Ordering::Relaxed);
                        Err(TableError::KeyNotFound)
                    } else {
                        self.stats.get_found.fetch_add(1, Ordering::Relaxed);
                        Ok(len)
                    }
                }
                Err(e) => {
                    self.stats.get_notfound.fetch_add(1, Ordering::Relaxed);
                    Err(e)
                }
            };
        }
    }

    /// Remove `key`'s bucket entry.
    ///
    /// The log record is left behind to age out through wraparound; only the
    /// index entry is cleared.
    pub fn delete(&self, key: &[u8]) -> TableResult<()> {
        let hash = self.hash_key(key);
        let tag = calc_tag(hash);
        let bucket = &self.buckets[self.bucket_index(hash)];

        let _guard = bucket.write_lock();
        match try_read_from_bucket(bucket, tag, key, &self.log) {
            Some(slot) => {
                bucket.clear_slot(slot);
                self.stats.delete_found.fetch_add(1, Ordering::Relaxed);
                let _ = self
                    .stats
                    .count
                    .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| {
                        Some(v.saturating_sub(1))
                    });
                Ok(())
            }
            None => {
                self.stats.delete_notfound.fetch_add(1, Ordering::Relaxed);
                Err(TableError::KeyNotFound)
            }
        }
    }
}

/// Builder wiring a [`HeapPool`], a [`Log`], and a [`CacheTable`] together.
///
/// Covers the common single-process setup; embedders with their own
/// [`BlockPool`] construct the layers directly.
///
/// [`HeapPool`]: crate::pool::HeapPool
pub struct CacheBuilder {
    block_size: usize,
    heap_size: usize,
    segments: usize,
    init_blocks: Option<usize>,
    num_buckets: usize,
}

impl CacheBuilder {
    /// Create a builder with 64KB blocks, a 4MB heap, 4 segments, and 1024
    /// buckets.
    pub fn new() -> Self {
        Self {
            block_size: 64 * 1024,
            heap_size: 4 * 1024 * 1024,
            segments: 4,
            init_blocks: None,
            num_buckets: 1024,
        }
    }

    /// Set the log block size in bytes.
    pub fn block_size(mut self, size: usize) -> Self {
        self.block_size = size;
        self
    }

    /// Set the total heap size in bytes.
    pub fn heap_size(mut self, size: usize) -> Self {
        self.heap_size = size;
        self
    }

    /// Set the number of log segments (one per writer thread).
    pub fn segments(mut self, segments: usize) -> Self {
        self.segments = segments;
        self
    }

    /// Set how many pool blocks the log claims up front. Defaults to the
    /// whole pool.
    pub fn init_blocks(mut self, blocks: usize) -> Self {
        self.init_blocks = Some(blocks);
        self
    }

    /// Set the bucket count (must be a power of two).
    pub fn num_buckets(mut self, buckets: usize) -> Self {
        self.num_buckets = buckets;
        self
    }

    /// Build the pool, log, and table.
    pub fn build(self) -> Result<CacheTable<crate::pool::HeapPool>, std::io::Error> {
        let pool = crate::pool::HeapPoolBuilder::new()
            .block_size(self.block_size)
            .heap_size(self.heap_size)
            .build()?;
        let init_blocks = self.init_blocks.unwrap_or_else(|| pool.num_blocks());
        let log = Log::new(pool, self.segments, init_blocks)?;
        CacheTable::new(log, self.num_buckets).map_err(|e| {
            std::io::Error::new(std::io::ErrorKind::InvalidInput, e.to_string())
        })
    }
}

impl Default for CacheBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(all(test, not(feature = "loom")))]
mod tests {
    use super::*;
    use crate::pool::{HeapPool, HeapPoolBuilder};

    fn create_table(buckets: usize) -> CacheTable<HeapPool> {
        let pool = HeapPoolBuilder::new()
            .block_size(4096)
            .heap_size(4096 * 8)
            .build()
            .expect("pool");
        let log = Log::new(pool, 2, 4).expect("log");
        CacheTable::with_hasher(log, buckets, RandomState::with_seeds(1, 2, 3, 4))
            .expect("table")
    }

    #[test]
    fn test_rejects_non_power_of_two_buckets() {
        let pool = HeapPoolBuilder::new()
            .block_size(4096)
            .heap_size(4096 * 4)
            .build()
            .expect("pool");
        let log = Log::new(pool, 1, 1).expect("log");
        assert!(CacheTable::new(log, 12).is_err());
    }

    #[test]
    fn test_set_get_delete() {
        let table = create_table(16);
        let writer = table.log().claim_writer().expect("writer");

        table.set(&writer, b"alpha", b"one", 0).expect("set");
        table.set(&writer, b"beta", b"two", 0).expect("set");

        let mut out = Vec::new();
        assert_eq!(table.get(b"alpha", &mut out), Ok(3));
        assert_eq!(&out, b"one");
        assert_eq!(table.get(b"beta", &mut out), Ok(3));
        assert_eq!(&out, b"two");
        assert_eq!(table.get(b"gamma", &mut out), Err(TableError::KeyNotFound));

        table.delete(b"alpha").expect("delete");
        assert_eq!(table.get(b"alpha", &mut out), Err(TableError::KeyNotFound));
        assert_eq!(table.delete(b"alpha"), Err(TableError::KeyNotFound));

        let stats = table.stats();
        assert_eq!(stats.count, 1);
        assert_eq!(stats.get_found, 2);
        assert_eq!(stats.get_notfound, 2);
        assert_eq!(stats.delete_found, 1);
        assert_eq!(stats.delete_notfound, 1);
    }

    #[test]
    fn test_overwrite_in_place() {
        let table = create_table(16);
        let writer = table.log().claim_writer().expect("writer");

        table.set(&writer, b"key", b"old-value", 0).expect("set");
        table.set(&writer, b"key", b"new", 0).expect("set");

        let mut out = Vec::new();
        assert_eq!(table.get(b"key", &mut out), Ok(3));
        assert_eq!(&out, b"new");

        let stats = table.stats();
        assert_eq!(stats.count, 1);
        assert_eq!(stats.set_inplace, 1);
    }

    #[test]
    fn test_expired_entry_misses() {
        let table = create_table(16);
        let writer = table.log().claim_writer().expect("writer");

        // An expiry one hour in the past.
        let past = unix_now() - 3600;
        table.set(&writer, b"stale", b"v", past).expect("set");
        table.set(&writer, b"fresh", b"v", unix_now() + 3600).expect("set");

        let mut out = Vec::new();
        assert_eq!(table.get(b"stale", &mut out), Err(TableError::KeyNotFound));
        assert_eq!(table.get(b"fresh", &mut out), Ok(1));
    }

    #[test]
    fn test_cache_builder() {
        let table = CacheBuilder::new()
            .block_size(4096)
            .heap_size(4096 * 8)
            .segments(2)
            .num_buckets(64)
            .build()
            .expect("builder");
        assert_eq!(table.num_buckets(), 64);
        assert_eq!(table.log().segment_count(), 2);
        // Default init claims the whole pool.
        assert_eq!(table.log().total_blocks(), 8);

        assert!(CacheBuilder::new().num_buckets(100).build().is_err());
        assert!(CacheBuilder::new()
            .segments(8)
            .init_blocks(4)
            .build()
            .is_err());
    }

    #[test]
    fn test_resize_mapping_lifecycle() {
        let table = create_table(16);

        assert!(!table.is_resizing());
        table.begin_resize(RoundHash::new(10)).expect("begin");
        assert!(table.is_resizing());
        assert_eq!(
            table.begin_resize(RoundHash::new(10)),
            Err(TableError::UnderExpansion)
        );

        let map = table.end_resize().expect("installed");
        assert_eq!(map.num_buckets(), 10);
        assert!(!table.is_resizing());

        // A mapping wider than the bucket array is refused.
        assert_eq!(
            table.begin_resize(RoundHash::new(64)),
            Err(TableError::Failure)
        );
    }

    #[test]
    fn test_reads_work_during_resize() {
        let table = create_table(16);
        let writer = table.log().claim_writer().expect("writer");

        // With 16 buckets the static mask and a 16-bucket RoundHash agree,
        // so installing the mapping must not move any key.
        for i in 0..32u32 {
            let key = format!("key-{i}");
            table.set(&writer, key.as_bytes(), b"v", 0).expect("set");
        }
        table.begin_resize(RoundHash::new(16)).expect("begin");

        let mut out = Vec::new();
        for i in 0..32u32 {
            let key = format!("key-{i}");
            assert_eq!(table.get(key.as_bytes(), &mut out), Ok(1));
        }
    }
}
