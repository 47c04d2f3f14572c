//! Duplicate keys, accepted or rejected per tree.

use std::collections::BTreeMap;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::config::StoreConfig;
use crate::e2e_tests::helpers::*;
use crate::query::IndexQuery;
use crate::storage::BTreeError;
use crate::testing::small_config;
use crate::types::Value;

#[test]
fn test_duplicates_rejected_in_unique_tree() {
    let file = TestFile::new();
    let tree = file.create_tree(false);
    tree.add_value(Value::from("same"), 1).expect("add");

    let err = tree.add_value(Value::from("same"), 2).expect_err("duplicate");
    assert!(matches!(err, BTreeError::DuplicateKey(ref k) if *k == Value::from("same")));
    assert_eq!(scan_ptrs(&tree, &IndexQuery::eq("same")), vec![1]);
}

#[test]
fn test_duplicate_entries_both_returned() {
    let file = TestFile::new();
    let tree = file.create_tree(true);
    assert_eq!(tree.add_value(Value::from("same"), 1).expect("add"), None);
    assert_eq!(tree.add_value(Value::from("same"), 2).expect("add"), Some(1));

    assert_eq!(tree.find_value(&Value::from("same")).expect("find"), Some(1));
    assert_eq!(scan_ptrs(&tree, &IndexQuery::eq("same")), vec![1, 2]);
}

#[test]
fn test_long_duplicate_runs_span_leaves() {
    let config = StoreConfig {
        page_size: 512,
        node_cache_size: 16,
        node_cache_purge_unit: 4,
        ..StoreConfig::default()
    };
    let file = TestFile::with_config(config);
    let tree = file.create_tree(true);

    // Interleave three runs so each crosses several leaf splits.
    for i in 0..900u64 {
        let key = ["apple", "banana", "cherry"][(i % 3) as usize];
        tree.add_value(Value::from(key), i).expect("add");
    }
    tree.close().expect("close");

    let tree = file.open_tree();
    let bananas = scan_ptrs(&tree, &IndexQuery::eq("banana"));
    assert_eq!(bananas, (0..300).map(|n| n * 3 + 1).collect::<Vec<u64>>());

    assert_eq!(tree.find_value(&Value::from("cherry")).expect("find"), Some(2));
    assert_eq!(scan(&tree, &IndexQuery::lt("banana")).len(), 300);
    assert_eq!(scan(&tree, &IndexQuery::le("banana")).len(), 600);
    assert_eq!(scan(&tree, &IndexQuery::ne("banana")).len(), 600);
    assert_eq!(scan(&tree, &IndexQuery::gt("apple")).len(), 600);

    let not_in = IndexQuery::not_in_set(["apple", "cherry"]).expect("query");
    assert_eq!(scan_ptrs(&tree, &not_in), bananas);

    assert_eq!(
        tree.remove_value_with_pointer(&Value::from("apple"), 0)
            .expect("remove"),
        1
    );
    assert_eq!(tree.find_value(&Value::from("apple")).expect("find"), Some(3));
}

#[test]
fn test_remove_run_front_to_back() {
    let file = TestFile::with_config(small_config());
    let tree = file.create_tree(true);
    for i in 0..20u64 {
        tree.add_value(Value::from("a"), i).expect("add");
    }
    for i in 0..600u64 {
        tree.add_value(Value::from("b"), 1000 + i).expect("add");
    }
    for i in 0..20u64 {
        tree.add_value(Value::from("c"), 2000 + i).expect("add");
    }

    // Removing from the front empties the leaves the lookup lands on first,
    // while the rest of the run sits further right.
    let key = Value::from("b");
    for i in 0..600u64 {
        assert_eq!(tree.find_value(&key).expect("find"), Some(1000 + i));
        assert_eq!(tree.remove_value(&key).expect("remove"), Some(1000 + i));
    }
    assert_eq!(tree.find_value(&key).expect("find"), None);
    assert_eq!(tree.remove_value(&key).expect("remove"), None);
    assert!(scan(&tree, &IndexQuery::eq("b")).is_empty());
    assert_eq!(scan(&tree, &IndexQuery::any()).len(), 40);
    assert_eq!(tree.find_value(&Value::from("c")).expect("find"), Some(2000));
}

#[test]
fn test_remove_with_pointer_after_front_emptied() {
    let file = TestFile::with_config(small_config());
    let tree = file.create_tree(true);
    tree.add_value(Value::from("a"), 0).expect("add");
    for i in 0..500u64 {
        tree.add_value(Value::from("b"), i % 2).expect("add");
    }
    for _ in 0..300 {
        tree.remove_value(&Value::from("b")).expect("remove");
    }

    assert_eq!(
        tree.remove_value_with_pointer(&Value::from("b"), 1).expect("remove"),
        100
    );
    assert_eq!(scan_ptrs(&tree, &IndexQuery::eq("b")), vec![0; 100]);
}

#[test]
fn test_random_duplicate_workload_matches_model() {
    let file = TestFile::with_config(small_config());
    let mut rng = StdRng::seed_from_u64(0);
    let mut model: BTreeMap<Value, Vec<u64>> = BTreeMap::new();
    let mut tree = file.create_tree(true);

    for _ in 0..3 {
        for _ in 0..2500 {
            let key = padded("key", rng.random_range(0..8));
            match rng.random_range(0..10) {
                0..=4 => {
                    let ptr = rng.random_range(0..40u64);
                    tree.add_value(key.clone(), ptr).expect("add");
                    model.entry(key).or_default().push(ptr);
                }
                5 | 6 => {
                    let removed = tree.remove_value(&key).expect("remove");
                    let expected = model.get_mut(&key).map(|ptrs| ptrs.remove(0));
                    model.retain(|_, ptrs| !ptrs.is_empty());
                    assert_eq!(removed, expected, "remove {key:?}");
                }
                7 => {
                    let ptr = rng.random_range(0..40u64);
                    let removed = tree
                        .remove_value_with_pointer(&key, ptr)
                        .expect("remove");
                    let expected = model.get_mut(&key).map_or(0, |ptrs| {
                        let before = ptrs.len();
                        ptrs.retain(|&p| p != ptr);
                        before - ptrs.len()
                    });
                    model.retain(|_, ptrs| !ptrs.is_empty());
                    assert_eq!(removed, expected, "remove {key:?} -> {ptr}");
                }
                _ => {
                    let expected = model.get(&key).and_then(|ptrs| ptrs.first().copied());
                    assert_eq!(tree.find_value(&key).expect("find"), expected, "find {key:?}");
                }
            }
        }

        let all: Vec<(Value, u64)> = model
            .iter()
            .flat_map(|(k, ptrs)| ptrs.iter().map(move |&p| (k.clone(), p)))
            .collect();
        assert_eq!(scan(&tree, &IndexQuery::any()), all);
        for (key, ptrs) in &model {
            assert_eq!(&scan_ptrs(&tree, &IndexQuery::eq(key.clone())), ptrs);
        }

        tree.close().expect("close");
        tree = file.open_tree();
    }
}

#[test]
fn test_index_remove_takes_whole_run() {
    let file = TestFile::with_config(small_config());
    let index = file.create_index(true);
    for i in 0..10 {
        index.add_value(Value::from("a"), format!("a{i}").as_bytes()).expect("add");
    }
    for i in 0..400 {
        index.add_value(Value::from("tag"), format!("v{i}").as_bytes()).expect("add");
    }
    for i in 0..10 {
        index.add_value(Value::from("z"), format!("z{i}").as_bytes()).expect("add");
    }
    assert_eq!(index.get_values(&Value::from("tag")).expect("get").len(), 400);

    let removed = index.remove(&Value::from("tag")).expect("remove");
    let expected: Vec<Vec<u8>> = (0..400).map(|i| format!("v{i}").into_bytes()).collect();
    assert_eq!(removed, expected);
    assert!(index.get_values(&Value::from("tag")).expect("get").is_empty());
    index.close().expect("close");

    let index = file.open_index();
    assert!(index.get_values(&Value::from("tag")).expect("get").is_empty());
    assert_eq!(index.get_value(&Value::from("tag")).expect("get"), None);
    assert_eq!(index.get_values(&Value::from("a")).expect("get").len(), 10);
    assert_eq!(index.get_values(&Value::from("z")).expect("get").len(), 10);
}
