//! Paged storage engine.
//!
//! A single-file B+Tree store built from small layers:
//!
//! - `io`: byte-level backends (`FileStorage`, `MemoryStorage`)
//! - `page` / `header`: page and file header layouts
//! - `file`: the `PageStore` (page I/O, free-page chain, overflow values)
//! - `cache`: the bounded `NodeCache` with batched two-phase eviction
//! - `btree`: the B+Tree itself
//!
//! # File Format
//!
//! - Bytes 0-4095: file header (page size, page counts, free chain, tree root)
//! - Page 0: root node of the tree
//! - Remaining pages: tree nodes, data pages, overflow pages, free pages
//!
//! # Usage
//!
//! ```ignore
//! use bptree::storage::BTree;
//! use bptree::StoreConfig;
//!
//! let tree = BTree::create(path, &StoreConfig::default(), false)?;
//! tree.add_value("key".into(), 42)?;
//! assert_eq!(tree.find_value(&"key".into())?, Some(42));
//! tree.close()?;
//! ```

pub mod btree;
mod cache;
mod file;
mod header;
mod io;
mod page;
mod varint;

pub use btree::{BTree, BTreeError, BTreeNode, TreeCore};
pub use cache::{Cacheable, NodeCache};
pub use file::PageStore;
pub use header::{
    FILE_HEADER_REGION, FileHeader, FreeSpaceRecord, MAX_PAGE_SIZE, MIN_PAGE_SIZE,
    ValueStoreHeader,
};
pub use io::{FileStorage, MemoryStorage, Storage, StorageError};
pub use page::{
    ByteReader, DEFAULT_PAGE_HEADER_SIZE, DEFAULT_PAGE_SIZE, NO_PAGE, Page, PageHeader, PageId,
    PageStatus,
};
pub use varint::{MAX_VARINT_LEN, VarintError, decode_varint, encode_varint, varint_len};
