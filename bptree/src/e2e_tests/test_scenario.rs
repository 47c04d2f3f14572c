//! A thousand keys with 4 KiB pages: point lookups and a tail range.

use crate::e2e_tests::helpers::*;
use crate::query::IndexQuery;
use crate::types::Value;

#[test]
fn test_thousand_keys_find_and_range() {
    let file = TestFile::new();
    let tree = file.create_tree(false);

    for i in 0..1000 {
        tree.add_value(padded("k", i), i as u64).expect("add");
    }

    assert_eq!(tree.find_value(&Value::from("k500")).expect("find"), Some(500));
    assert_eq!(tree.find_value(&Value::from("k1000")).expect("find"), None);

    let ptrs = scan_ptrs(&tree, &IndexQuery::ge("k900"));
    assert_eq!(ptrs, (900..1000).collect::<Vec<u64>>());
}

#[test]
fn test_unpadded_keys_follow_byte_order() {
    let file = TestFile::new();
    let tree = file.create_tree(false);

    let mut model = std::collections::BTreeMap::new();
    for i in 0..1000u64 {
        let key = format!("k{i}");
        tree.add_value(Value::from(key.as_str()), i).expect("add");
        model.insert(key, i);
    }

    assert_eq!(tree.find_value(&Value::from("k500")).expect("find"), Some(500));

    // "k91" sorts after "k900", so the tail holds more than 900..=999.
    let expected: Vec<u64> = model
        .range("k900".to_string()..)
        .map(|(_, &ptr)| ptr)
        .collect();
    let ptrs = scan_ptrs(&tree, &IndexQuery::ge("k900"));
    assert_eq!(ptrs, expected);
    assert!(ptrs.contains(&91));
    assert!(!ptrs.contains(&9));
}

#[test]
fn test_range_queries_on_loaded_tree() {
    let file = TestFile::new();
    let tree = file.create_tree(false);
    for i in (0..1000).rev() {
        tree.add_value(padded("k", i), i as u64).expect("add");
    }

    let between = IndexQuery::between("k100", "k199").expect("query");
    assert_eq!(scan_ptrs(&tree, &between), (100..200).collect::<Vec<u64>>());

    let below = scan_ptrs(&tree, &IndexQuery::lt("k010"));
    assert_eq!(below, (0..10).collect::<Vec<u64>>());

    let prefix = scan_ptrs(&tree, &IndexQuery::start_with("k42"));
    assert_eq!(prefix, (420..430).collect::<Vec<u64>>());

    let set = IndexQuery::in_set(["k777", "k003", "k999", "k5000"]).expect("query");
    assert_eq!(scan_ptrs(&tree, &set), vec![3, 777, 999]);

    let like = IndexQuery::like("k", b"_5_").expect("query");
    let ptrs = scan_ptrs(&tree, &like);
    assert_eq!(ptrs.len(), 100);
    assert!(ptrs.iter().all(|p| (p / 10) % 10 == 5));
}
