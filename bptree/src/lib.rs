// Layers, bottom up:
// 1. Storage backends (file, memory) behind the `Storage` trait
// 2. Page store: fixed-size pages, file header, free-page chain, overflow chains
// 3. Node cache: bounded LRU with batched eviction and write-back
// 4. B+Tree: keys to u64 pointers, optional duplicates, range scans
// 5. Value index: byte values on slotted data pages, addressed by pointers
//
// Every tree or index owns one file and serializes its operations on a
// single lock. All I/O is synchronous.

pub mod config;
pub mod index;
pub mod query;
pub mod storage;
pub mod types;

mod e2e_tests;
#[cfg(test)]
mod testing;

pub use config::{ConfigError, StoreConfig};
pub use index::{BTreeIndex, IndexError};
pub use query::{IndexQuery, Operator, QueryError};
pub use storage::{BTree, BTreeError, MemoryStorage, Storage, StorageError};
pub use types::Value;
