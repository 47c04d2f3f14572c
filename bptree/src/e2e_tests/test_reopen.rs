//! Close and reopen a tree file.

use crate::config::StoreConfig;
use crate::e2e_tests::helpers::*;
use crate::query::IndexQuery;

#[test]
fn test_reopen_keeps_every_key() {
    let file = TestFile::new();
    let tree = file.create_tree(false);
    for i in 0..1000 {
        tree.add_value(padded("k", i), i as u64).expect("add");
    }
    tree.close().expect("close");

    let tree = file.open_tree();
    assert!(!tree.duplicates_allowed());
    for i in 0..1000 {
        assert_eq!(tree.find_value(&padded("k", i)).expect("find"), Some(i as u64));
    }
    assert_eq!(scan_ptrs(&tree, &IndexQuery::any()), (0..1000).collect::<Vec<u64>>());
}

#[test]
fn test_reopen_with_small_caches_after_growth() {
    // Tiny pages and caches: deep tree, every node evicted many times.
    let config = StoreConfig {
        page_size: 512,
        node_cache_size: 8,
        node_cache_purge_unit: 2,
        page_cache_size: 4,
        ..StoreConfig::default()
    };
    let file = TestFile::with_config(config);

    let tree = file.create_tree(false);
    for i in 0..500 {
        tree.add_value(padded("key-", i * 2), i as u64).expect("add");
    }
    tree.close().expect("close");

    // Second session inserts between the existing keys.
    let tree = file.open_tree();
    for i in 0..500 {
        tree.add_value(padded("key-", i * 2 + 1), (1000 + i) as u64).expect("add");
    }
    tree.close().expect("close");

    let tree = file.open_tree();
    let entries = scan(&tree, &IndexQuery::any());
    assert_eq!(entries.len(), 1000);
    assert!(entries.windows(2).all(|w| w[0].0 < w[1].0));
    assert_eq!(tree.find_value(&padded("key-", 999)).expect("find"), Some(1499));
}

#[test]
fn test_flush_then_reopen_without_close() {
    let file = TestFile::new();
    {
        let tree = file.create_tree(true);
        for i in 0..200 {
            tree.add_value(padded("d", i % 20), i as u64).expect("add");
        }
        tree.flush(true, false).expect("flush");
        // Dropped without close: the flushed state must be complete.
    }

    let tree = file.open_tree();
    assert!(tree.duplicates_allowed());
    let ptrs = scan_ptrs(&tree, &IndexQuery::eq(padded("d", 7)));
    assert_eq!(ptrs, (0..10).map(|n| n * 20 + 7).collect::<Vec<u64>>());
}

#[test]
fn test_open_or_create() {
    let file = TestFile::new();
    let tree = crate::storage::BTree::open_or_create(&file.path, &file.config, true)
        .expect("create");
    tree.add_value(padded("k", 1), 1).expect("add");
    tree.close().expect("close");

    let tree = crate::storage::BTree::open_or_create(&file.path, &file.config, false)
        .expect("open");
    // The stored flag wins over the argument.
    assert!(tree.duplicates_allowed());
    assert_eq!(tree.find_value(&padded("k", 1)).expect("find"), Some(1));
}
