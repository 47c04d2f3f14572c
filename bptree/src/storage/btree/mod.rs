//! B+Tree over the page store.
//!
//! # Structure
//!
//! - Branch nodes: separator keys and child page ids (one more child than keys)
//! - Leaf nodes: keys and `u64` pointers, doubly linked for range scans
//!
//! The root always lives on the page recorded in the file header. When it
//! splits, its halves move to two new pages and the root becomes a branch.
//!
//! # Duplicates
//!
//! A tree created with duplicates allowed keeps equal keys in insertion
//! order. A run of equal keys may span several leaves; the `left_lookup`
//! field of a leaf records that the run continues on the previous leaf.
//!
//! # Usage
//!
//! ```ignore
//! use bptree::storage::BTree;
//! use bptree::query::IndexQuery;
//!
//! let tree = BTree::create(path, &StoreConfig::default(), true)?;
//! tree.add_value("apple".into(), 1)?;
//! tree.add_value("apple".into(), 2)?;
//! tree.search(&IndexQuery::eq("apple"), |key, ptr| {
//!     println!("{key:?} -> {ptr}");
//!     true
//! })?;
//! ```

mod node;
mod scan;
mod tree;

pub use node::{BTreeNode, LEAST_KEYS, MAX_KEYS, NodeError, NodeType, SplitOff};
pub use tree::{BTree, BTreeError, TreeCore};
