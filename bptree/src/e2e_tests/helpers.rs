//! Common helpers for end-to-end tests.

use std::path::PathBuf;

use tempfile::TempDir;

use crate::config::StoreConfig;
use crate::index::BTreeIndex;
use crate::query::IndexQuery;
use crate::storage::BTree;
use crate::testing::init_tracing;
use crate::types::Value;

/// A scratch directory holding one store file, removed on drop.
pub struct TestFile {
    _dir: TempDir,
    pub path: PathBuf,
    pub config: StoreConfig,
}

impl TestFile {
    /// Scratch file with the stock configuration (4 KiB pages).
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(StoreConfig::default())
    }

    #[must_use]
    pub fn with_config(config: StoreConfig) -> Self {
        init_tracing();
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let path = dir.path().join("store.db");
        Self {
            _dir: dir,
            path,
            config,
        }
    }

    pub fn create_tree(&self, duplicates: bool) -> BTree {
        BTree::create(&self.path, &self.config, duplicates).expect("Failed to create tree")
    }

    pub fn open_tree(&self) -> BTree {
        BTree::open(&self.path, &self.config).expect("Failed to open tree")
    }

    pub fn create_index(&self, duplicates: bool) -> BTreeIndex {
        BTreeIndex::create(&self.path, &self.config, duplicates).expect("Failed to create index")
    }

    pub fn open_index(&self) -> BTreeIndex {
        BTreeIndex::open(&self.path, &self.config).expect("Failed to open index")
    }
}

/// Zero-padded key, so byte order matches numeric order.
pub fn padded(prefix: &str, i: usize) -> Value {
    Value::from(format!("{prefix}{i:03}"))
}

/// Run `query` to completion and collect every entry.
pub fn scan(tree: &BTree, query: &IndexQuery) -> Vec<(Value, u64)> {
    let mut out = Vec::new();
    tree.search(query, |key, ptr| {
        out.push((key.clone(), ptr));
        true
    })
    .expect("Scan failed");
    out
}

/// Pointers only, in scan order.
pub fn scan_ptrs(tree: &BTree, query: &IndexQuery) -> Vec<u64> {
    scan(tree, query).into_iter().map(|(_, ptr)| ptr).collect()
}
