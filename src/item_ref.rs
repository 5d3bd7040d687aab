//! Packed item references and tag derivation.
//!
//! An [`ItemRef`] is the value stored in a bucket slot. It packs three fields
//! into a single 64-bit word so a slot can be read and written atomically:
//!
//! ```text
//! +--------+---------------------+---------------------------+
//! | 63..48 |       47..27        |          26..0            |
//! |  tag   |    block number     |        byte offset        |
//! | 16 bits|      21 bits        |         27 bits           |
//! +--------+---------------------+---------------------------+
//! ```
//!
//! The all-zero word is reserved as the empty-slot sentinel. Because
//! [`calc_tag`] never returns 0, a legitimate reference can never collide
//! with the sentinel even when it points at block 0, offset 0.

use std::fmt;

/// Mask for the 15-bit tag value extracted from a key hash.
pub const TAG_MASK: u64 = (1 << 15) - 1;

const TAG_SHIFT: u32 = 48;
const BLOCK_SHIFT: u32 = 27;
const BLOCK_MASK: u64 = (1 << 21) - 1;
const OFFSET_MASK: u64 = (1 << 27) - 1;

/// Maximum byte offset representable in a reference (2^27 - 1).
pub const MAX_ITEM_OFFSET: u64 = OFFSET_MASK;

/// Maximum block number representable in a reference (2^21 - 1).
pub const MAX_BLOCK_NUMBER: u32 = BLOCK_MASK as u32;

/// Derive the slot tag from a 64-bit key hash.
///
/// Extracts bits 16-30 of the hash and widens to u16. The result is never 0:
/// when the extracted field is 0 the tag is 1, preserving 0 as the bucket's
/// empty-slot sentinel.
#[inline]
pub fn calc_tag(key_hash: u64) -> u16 {
    let tag = ((key_hash >> 16) & TAG_MASK) as u16;
    if tag == 0 {
        1
    } else {
        tag
    }
}

/// Packed (tag, block, offset) reference to a record in the log.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ItemRef(u64);

impl ItemRef {
    /// The empty-slot sentinel (all bits zero).
    pub const EMPTY: Self = Self(0);

    /// Pack a reference from its parts.
    ///
    /// # Panics
    ///
    /// Panics in debug mode if `tag` is 0, `block` exceeds 21 bits, or
    /// `offset` exceeds 27 bits. A zero tag would make a reference at
    /// block 0, offset 0 indistinguishable from an empty slot.
    #[inline]
    pub fn new(tag: u16, block: u32, offset: u64) -> Self {
        debug_assert!(tag != 0, "tag 0 is reserved for the empty sentinel");
        debug_assert!(u64::from(block) <= BLOCK_MASK, "block exceeds 21 bits");
        debug_assert!(offset <= OFFSET_MASK, "offset exceeds 27 bits");
        Self((u64::from(tag) << TAG_SHIFT) | (u64::from(block) << BLOCK_SHIFT) | offset)
    }

    /// Reinterpret a raw slot word as a reference.
    #[inline]
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Get the raw slot word.
    #[inline]
    pub fn as_raw(self) -> u64 {
        self.0
    }

    /// Check whether this is the empty sentinel.
    #[inline]
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Extract the tag field.
    #[inline]
    pub fn tag(self) -> u16 {
        (self.0 >> TAG_SHIFT) as u16
    }

    /// Extract the block number.
    #[inline]
    pub fn block(self) -> u32 {
        ((self.0 >> BLOCK_SHIFT) & BLOCK_MASK) as u32
    }

    /// Extract the byte offset within the block.
    #[inline]
    pub fn offset(self) -> u64 {
        self.0 & OFFSET_MASK
    }
}

impl fmt::Debug for ItemRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            write!(f, "ItemRef::EMPTY")
        } else {
            write!(
                f,
                "ItemRef {{ tag: 0x{:04x}, block: {}, offset: {} }}",
                self.tag(),
                self.block(),
                self.offset()
            )
        }
    }
}

#[cfg(all(test, not(feature = "loom")))]
mod tests {
    use super::*;

    #[test]
    fn test_calc_tag_never_zero() {
        // Hashes whose bits 16-30 are zero must still yield a non-zero tag.
        assert_eq!(calc_tag(0), 1);
        assert_eq!(calc_tag(0xFFFF), 1); // only low 16 bits set
        assert_eq!(calc_tag(0x8000_0000), 1); // bit 31 is outside the field
        assert_ne!(calc_tag(0x1_0000), 0);
    }

    #[test]
    fn test_calc_tag_uses_bits_16_to_30() {
        // Two hashes differing only outside bits 16-30 produce equal tags.
        let a = 0x1234_5678_9ABC_DEF0_u64;
        let b = a ^ 0xFFFF_FFFF_8000_FFFF; // flip everything outside the field
        assert_eq!(calc_tag(a), calc_tag(b));

        // And a hash differing inside the field produces a different tag.
        let c = a ^ (1 << 20);
        assert_ne!(calc_tag(a), calc_tag(c));
    }

    #[test]
    fn test_pack_roundtrip() {
        let r = ItemRef::new(0x7FFF, MAX_BLOCK_NUMBER, MAX_ITEM_OFFSET);
        assert_eq!(r.tag(), 0x7FFF);
        assert_eq!(r.block(), MAX_BLOCK_NUMBER);
        assert_eq!(r.offset(), MAX_ITEM_OFFSET);
        assert!(!r.is_empty());
    }

    #[test]
    fn test_zero_offset_zero_block_is_not_empty() {
        // The non-zero tag keeps a (0, 0) location distinct from the sentinel.
        let r = ItemRef::new(1, 0, 0);
        assert!(!r.is_empty());
        assert_eq!(r.block(), 0);
        assert_eq!(r.offset(), 0);
    }

    #[test]
    fn test_empty_sentinel() {
        assert!(ItemRef::EMPTY.is_empty());
        assert_eq!(ItemRef::EMPTY.as_raw(), 0);
        assert!(ItemRef::from_raw(0).is_empty());
    }

    #[test]
    #[should_panic(expected = "tag 0 is reserved")]
    #[cfg(debug_assertions)]
    fn test_zero_tag_panics() {
        ItemRef::new(0, 1, 1);
    }

    #[test]
    fn test_debug_format() {
        assert_eq!(format!("{:?}", ItemRef::EMPTY), "ItemRef::EMPTY");
        let r = ItemRef::new(0x12, 3, 40);
        let s = format!("{:?}", r);
        assert!(s.contains("0x0012"));
        assert!(s.contains("block: 3"));
    }
}
