//! Incremental bucket-ownership mapping.
//!
//! [`RoundHash`] maps a 64-bit hash to an owning bucket under a bucket count
//! that changes one bucket at a time, using a linear-hashing split scheme.
//! The hash space is divided into arcs of two widths: a "long" arc covers the
//! hash range of an unsplit bucket, and a split bucket's range is covered by
//! a group of two "short" arcs (the bucket and its split partner). Growing by
//! one bucket splits exactly the arc named by the split pointer, so only that
//! one bucket's keys migrate; every other bucket's mapping is untouched.
//!
//! The whole structure is three words of bookkeeping:
//!
//! - `buckets`: current bucket count
//! - `level`: current doubling level, so unsplit buckets hash mod `2^level`
//! - `split`: the split pointer, always `< 2^level`
//!
//! with the invariant `buckets == 2^level + split`. The struct is a plain
//! state machine with no interior mutability; the resize driver that owns it
//! serializes mutation.

/// Linear-hashing bucket-count state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoundHash {
    buckets: u64,
    level: u32,
    split: u64,
}

impl RoundHash {
    /// Create a mapping over `num` buckets.
    ///
    /// # Panics
    ///
    /// Panics if `num` is 0.
    pub fn new(num: u64) -> Self {
        assert!(num > 0, "bucket count must be positive");
        let level = 63 - num.leading_zeros();
        let state = Self {
            buckets: num,
            level,
            split: num - (1 << level),
        };
        state.check_invariants();
        state
    }

    #[inline]
    fn check_invariants(&self) {
        debug_assert!(self.split < (1 << self.level) || (self.level == 0 && self.split == 0));
        debug_assert_eq!(self.buckets, (1u64 << self.level) + self.split);
    }

    /// Current bucket count.
    #[inline]
    pub fn num_buckets(&self) -> u64 {
        self.buckets
    }

    /// Number of long (unsplit) arcs: one per bucket the split pointer has
    /// not yet reached.
    pub fn num_long_arcs(&self) -> u64 {
        (1 << self.level) - self.split
    }

    /// Number of short-arc groups: one per split bucket pair.
    pub fn num_short_arc_groups(&self) -> u64 {
        self.split
    }

    /// Number of short arcs: two per group.
    pub fn num_short_arcs(&self) -> u64 {
        2 * self.split
    }

    /// Which arc a hash falls into at the current level. Arcs index the hash
    /// space at the finer (post-split) granularity, `2^(level+1)` divisions.
    #[inline]
    pub fn hash_to_arc(&self, hash: u64) -> u64 {
        hash & ((1 << (self.level + 1)) - 1)
    }

    /// The bucket owning an arc.
    ///
    /// An arc whose low `level` bits fall below the split pointer belongs to
    /// a split pair, so the full arc index is the bucket; otherwise the
    /// bucket is still unsplit and owns both arcs that share its low bits.
    #[inline]
    pub fn arc_to_bucket(&self, arc: u64) -> u64 {
        let low = arc & ((1 << self.level) - 1);
        if low < self.split {
            arc
        } else {
            low
        }
    }

    /// The in-use arc a hash falls into at the current bucket count.
    ///
    /// Short arcs keep their fine (`level + 1` bit) index; the two halves of
    /// an unsplit bucket's range collapse into one long arc identified by its
    /// low bits. `arc_to_bucket(arc_num(h))` equals `hash_to_bucket(h)`.
    pub fn arc_num(&self, hash: u64) -> u64 {
        let arc = self.hash_to_arc(hash);
        let low = arc & ((1 << self.level) - 1);
        if low < self.split {
            arc
        } else {
            low
        }
    }

    /// Map a hash to its owning bucket, always in `[0, num_buckets)`.
    #[inline]
    pub fn hash_to_bucket(&self, hash: u64) -> u64 {
        self.arc_to_bucket(self.hash_to_arc(hash))
    }

    /// Grow by one bucket, splitting the arc at the split pointer.
    pub fn new_bucket(&mut self) {
        self.split += 1;
        self.buckets += 1;
        if self.split == (1 << self.level) {
            self.level += 1;
            self.split = 0;
        }
        self.check_invariants();
    }

    /// Shrink by one bucket, exactly reversing the most recent
    /// [`new_bucket`].
    ///
    /// # Panics
    ///
    /// Panics if the bucket count is already 1.
    ///
    /// [`new_bucket`]: RoundHash::new_bucket
    pub fn del_bucket(&mut self) {
        assert!(self.buckets > 1, "cannot shrink below one bucket");
        if self.split == 0 {
            self.level -= 1;
            self.split = (1 << self.level) - 1;
        } else {
            self.split -= 1;
        }
        self.buckets -= 1;
        self.check_invariants();
    }

    /// Bucket indices whose keys must migrate for the next [`new_bucket`]:
    /// the bucket at the split pointer, whose upper-arc keys move to the new
    /// bucket.
    ///
    /// [`new_bucket`]: RoundHash::new_bucket
    pub fn parts_to_add(&self) -> [u64; 1] {
        [self.split]
    }

    /// Bucket indices whose keys must migrate for the next [`del_bucket`]:
    /// the last bucket, whose keys merge back into its split partner.
    ///
    /// [`del_bucket`]: RoundHash::del_bucket
    pub fn parts_to_remove(&self) -> [u64; 1] {
        [self.buckets - 1]
    }
}
