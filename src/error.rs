//! Error types for table and log operations.
//!
//! Two taxonomies exist side by side, mirroring the two layers of the engine:
//!
//! - [`TableError`] - returned by bucket/table-level operations
//! - [`ItemError`] - returned by the log/allocation path
//!
//! Allocation failures ([`ItemError::Full`], [`ItemError::BatchTooSmall`]) are
//! local and recoverable: the caller updates failure statistics and decides
//! whether to retry or surface the failure. Invariant violations (seqlock
//! state, length bounds) are assertions, not errors.

use std::fmt;

/// Errors from bucket/table-level operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableError {
    /// Generic failure (e.g. the log append behind a set failed).
    Failure,

    /// Key not found (for GET/DELETE operations).
    KeyNotFound,

    /// Key already present (for ADD-style operations).
    KeyDuplicated,

    /// The owning bucket has no empty slot left.
    TableFull,

    /// The bucket is being migrated by the resize driver.
    UnderExpansion,
}

impl fmt::Display for TableError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Failure => write!(f, "operation failed"),
            Self::KeyNotFound => write!(f, "key not found"),
            Self::KeyDuplicated => write!(f, "key already exists"),
            Self::TableFull => write!(f, "bucket full"),
            Self::UnderExpansion => write!(f, "bucket under expansion"),
        }
    }
}

impl std::error::Error for TableError {}

/// Result type for table operations.
pub type TableResult<T> = Result<T, TableError>;

/// Errors from the log/allocation path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemError {
    /// Generic item error.
    Error,

    /// The segment's blocks are exhausted and the record cannot be placed.
    Full,

    /// Item already exists.
    Exist,

    /// Item not found at the given location.
    NotFound,

    /// Only part of the value could be read.
    PartialValue,

    /// The operation was not processed.
    NotProcessed,

    /// The record is larger than the maximum record size and can never fit
    /// a block.
    BatchTooSmall,
}

impl fmt::Display for ItemError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Error => write!(f, "item error"),
            Self::Full => write!(f, "batch full"),
            Self::Exist => write!(f, "item already exists"),
            Self::NotFound => write!(f, "item not found"),
            Self::PartialValue => write!(f, "partial value"),
            Self::NotProcessed => write!(f, "item not processed"),
            Self::BatchTooSmall => write!(f, "batch too small for record"),
        }
    }
}

impl std::error::Error for ItemError {}

/// Result type for log/item operations.
pub type ItemResult<T> = Result<T, ItemError>;

#[cfg(all(test, not(feature = "loom")))]
mod tests {
    use super::*;

    #[test]
    fn test_table_error_display() {
        assert_eq!(format!("{}", TableError::Failure), "operation failed");
        assert_eq!(format!("{}", TableError::KeyNotFound), "key not found");
        assert_eq!(format!("{}", TableError::KeyDuplicated), "key already exists");
        assert_eq!(format!("{}", TableError::TableFull), "bucket full");
        assert_eq!(
            format!("{}", TableError::UnderExpansion),
            "bucket under expansion"
        );
    }

    #[test]
    fn test_item_error_display() {
        assert_eq!(format!("{}", ItemError::Full), "batch full");
        assert_eq!(
            format!("{}", ItemError::BatchTooSmall),
            "batch too small for record"
        );
    }

    #[test]
    fn test_error_traits() {
        fn assert_error<E: std::error::Error>() {}
        assert_error::<TableError>();
        assert_error::<ItemError>();
    }

    #[test]
    fn test_distinct_allocator_failures() {
        // The two allocator failure modes must stay distinguishable.
        assert_ne!(ItemError::Full, ItemError::BatchTooSmall);
    }
}
