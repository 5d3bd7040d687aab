//! Log record encoding.
//!
//! A record is the unit stored in a log block: a fixed header followed by the
//! key bytes and then the value bytes, each independently rounded up to 8-byte
//! alignment.
//!
//! ```text
//! [0..4]   kv_length_vec: (key_len << 24) | value_len
//! [4..8]   item_size: total record size in bytes
//! [8..16]  key_hash
//! [16..20] expire_time
//! [20..24] (padding)
//! [24..]   key bytes, rounded up to 8, then value bytes
//! ```
//!
//! Records may be overwritten in place by the segment's wraparound, so a
//! reader racing a writer can observe garbage. Every read accessor clamps
//! lengths to the configured maxima before touching data; a clamped read can
//! return a wrong answer (caught by the tag/key check or the seqlock retry)
//! but never runs past initialized memory.

/// Maximum key length in bytes (8-bit length field).
pub const MAX_KEY_LEN: usize = 255;

/// Maximum value length in bytes (24-bit length field).
pub const MAX_VALUE_LEN: usize = (1 << 24) - 1;

/// Size of the fixed record header, including padding to 8-byte alignment.
pub const ITEM_HEADER_SIZE: usize = 24;

/// Round a length up to the next multiple of 8.
#[inline]
pub const fn round_up_8(len: usize) -> usize {
    (len + 7) & !7
}

/// Pack key and value lengths into the combined length field.
#[inline]
pub fn pack_kv_length(key_len: usize, value_len: usize) -> u32 {
    assert!(key_len <= MAX_KEY_LEN, "key length exceeds 255 bytes");
    assert!(value_len <= MAX_VALUE_LEN, "value length exceeds 24 bits");
    ((key_len as u32) << 24) | value_len as u32
}

/// Extract the key length from a packed length field, clamped to the maximum.
#[inline]
pub fn key_length(kv_length_vec: u32) -> usize {
    // The 8-bit field cannot exceed MAX_KEY_LEN, but keep the clamp explicit
    // so a change to the field widths cannot silently remove it.
    ((kv_length_vec >> 24) as usize).min(MAX_KEY_LEN)
}

/// Extract the value length from a packed length field, clamped to the maximum.
#[inline]
pub fn value_length(kv_length_vec: u32) -> usize {
    ((kv_length_vec & 0x00FF_FFFF) as usize).min(MAX_VALUE_LEN)
}

/// Total record size for a key/value pair.
#[inline]
pub fn item_size_for(key_len: usize, value_len: usize) -> u64 {
    (ITEM_HEADER_SIZE + round_up_8(key_len) + round_up_8(value_len)) as u64
}

/// View over a record at a raw address inside a log block.
///
/// All methods are unsafe: the caller must guarantee the address points at
/// least `ITEM_HEADER_SIZE` readable bytes inside a live block, 8-byte
/// aligned. Field reads use volatile loads because a racing writer may be
/// overwriting the block; the clamping in [`key_length`]/[`value_length`]
/// keeps subsequent data reads in bounds.
#[derive(Clone, Copy)]
pub(crate) struct RawItem {
    ptr: *mut u8,
}

impl RawItem {
    /// Wrap a record address.
    ///
    /// # Safety
    ///
    /// `ptr` must be 8-byte aligned and point at a record region inside a
    /// live block.
    #[inline]
    pub unsafe fn from_ptr(ptr: *mut u8) -> Self {
        debug_assert!(ptr as usize % 8 == 0, "record address must be 8-aligned");
        Self { ptr }
    }

    /// Write a full record: header, key, and value.
    ///
    /// # Safety
    ///
    /// The caller must own `item_size_for(key.len(), value.len())` bytes at
    /// `ptr` and be the only writer (single-writer-per-segment discipline).
    pub unsafe fn write(self, key_hash: u64, key: &[u8], value: &[u8], expire_time: u32) {
        let kv_length_vec = pack_kv_length(key.len(), value.len());
        let item_size = item_size_for(key.len(), value.len()) as u32;

        (self.ptr as *mut u32).write_volatile(kv_length_vec);
        (self.ptr.add(4) as *mut u32).write_volatile(item_size);
        (self.ptr.add(8) as *mut u64).write_volatile(key_hash);
        (self.ptr.add(16) as *mut u32).write_volatile(expire_time);
        (self.ptr.add(20) as *mut u32).write_volatile(0);

        let data = self.ptr.add(ITEM_HEADER_SIZE);
        std::ptr::copy_nonoverlapping(key.as_ptr(), data, key.len());
        std::ptr::copy_nonoverlapping(
            value.as_ptr(),
            data.add(round_up_8(key.len())),
            value.len(),
        );
    }

    /// Read the packed length field.
    ///
    /// # Safety
    ///
    /// Header must be readable (see type docs).
    #[inline]
    pub unsafe fn kv_length_vec(self) -> u32 {
        (self.ptr as *const u32).read_volatile()
    }

    /// Read the stored key hash.
    ///
    /// # Safety
    ///
    /// Header must be readable.
    #[inline]
    pub unsafe fn key_hash(self) -> u64 {
        (self.ptr.add(8) as *const u64).read_volatile()
    }

    /// Read the expiration timestamp.
    ///
    /// # Safety
    ///
    /// Header must be readable.
    #[inline]
    pub unsafe fn expire_time(self) -> u32 {
        (self.ptr.add(16) as *const u32).read_volatile()
    }

    /// Address of the key bytes.
    ///
    /// # Safety
    ///
    /// Header must be readable.
    #[inline]
    pub unsafe fn key_ptr(self) -> *const u8 {
        self.ptr.add(ITEM_HEADER_SIZE)
    }

    /// Address of the value bytes for a given (clamped) key length.
    ///
    /// # Safety
    ///
    /// Header must be readable.
    #[inline]
    pub unsafe fn value_ptr(self, key_len: usize) -> *const u8 {
        self.ptr.add(ITEM_HEADER_SIZE + round_up_8(key_len))
    }

    /// Compare the stored key against `key`.
    ///
    /// Lengths must match exactly; the byte comparison reads at most
    /// `readable` bytes of the stored key, so a garbage length field cannot
    /// drive the read out of the block.
    ///
    /// # Safety
    ///
    /// At least `min(stored key length, readable)` bytes must be readable at
    /// the key address.
    pub unsafe fn key_matches(self, key: &[u8], readable: usize) -> bool {
        let stored_len = key_length(self.kv_length_vec());
        if stored_len != key.len() || stored_len > readable {
            return false;
        }
        let stored = std::slice::from_raw_parts(self.key_ptr(), stored_len);
        stored == key
    }

    /// Copy the value bytes into `out`, returning the value length.
    ///
    /// The copy length is clamped both by the length-field maxima and by
    /// `readable` (bytes remaining in the block past the record header).
    ///
    /// # Safety
    ///
    /// At least `readable` bytes must be readable past the record header.
    pub unsafe fn copy_value(self, out: &mut Vec<u8>, readable: usize) -> usize {
        let kv = self.kv_length_vec();
        let key_len = key_length(kv);
        let mut value_len = value_length(kv);

        let data_start = round_up_8(key_len);
        if data_start >= readable {
            out.clear();
            return 0;
        }
        value_len = value_len.min(readable - data_start);

        out.clear();
        out.reserve(value_len);
        let src = self.value_ptr(key_len);
        out.extend_from_slice(std::slice::from_raw_parts(src, value_len));
        value_len
    }
}
