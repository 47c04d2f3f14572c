//! Value store on top of the B+Tree.
//!
//! `BTreeIndex` keeps byte values next to the tree in the same file:
//!
//! - `pointer`: packing of `(data page, slot)` into the tree's `u64` pointers
//! - `data_page`: slotted tuple pages with stable slot numbers
//! - `free_list`: best-fit tracking of data pages with spare room
//! - `value_index`: the index itself, unique, with duplicates, or multi-value
//!
//! # Usage
//!
//! ```ignore
//! use bptree::index::BTreeIndex;
//!
//! let index = BTreeIndex::create(path, &StoreConfig::default(), false)?;
//! index.add_value("apple".into(), b"red")?;
//! assert_eq!(index.get_value(&"apple".into())?, Some(b"red".to_vec()));
//! index.close()?;
//! ```

mod data_page;
mod free_list;
pub mod pointer;
mod value_index;

pub use data_page::{DataPage, MAX_TUPLE_LEN};
pub use free_list::{FreeList, MAX_PERSISTED, MIN_LEFT_FREE};
pub use value_index::{BTreeIndex, IndexCore};

use crate::config::ConfigError;
use crate::storage::{BTreeError, PageId, StorageError};

/// Errors that can occur in the value store.
#[derive(Debug)]
pub enum IndexError {
    /// Error from the underlying tree, including rejected arguments.
    Tree(BTreeError),
    /// Page store error.
    Storage(StorageError),
    /// Page id or slot too large to pack into a pointer.
    InvalidPointer { page_id: PageId, slot: usize },
    /// Data page content or a pointer that does not add up.
    Corrupt(String),
}

impl std::fmt::Display for IndexError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Tree(e) => write!(f, "tree error: {e}"),
            Self::Storage(e) => write!(f, "storage error: {e}"),
            Self::InvalidPointer { page_id, slot } => {
                write!(f, "cannot address page {page_id} slot {slot}")
            }
            Self::Corrupt(msg) => write!(f, "value store corrupt: {msg}"),
        }
    }
}

impl std::error::Error for IndexError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Tree(e) => Some(e),
            Self::Storage(e) => Some(e),
            Self::InvalidPointer { .. } | Self::Corrupt(_) => None,
        }
    }
}

impl From<BTreeError> for IndexError {
    fn from(e: BTreeError) -> Self {
        Self::Tree(e)
    }
}

impl From<StorageError> for IndexError {
    fn from(e: StorageError) -> Self {
        Self::Storage(e)
    }
}

impl From<ConfigError> for IndexError {
    fn from(e: ConfigError) -> Self {
        Self::Tree(BTreeError::InvalidArgument(e))
    }
}
