//! Removing keys from a loaded tree.

use crate::e2e_tests::helpers::*;
use crate::query::IndexQuery;
use crate::types::Value;

#[test]
fn test_remove_then_find_is_none() {
    let file = TestFile::new();
    let tree = file.create_tree(false);
    for i in 0..1000 {
        tree.add_value(padded("k", i), i as u64).expect("add");
    }

    for i in (0..1000).step_by(2) {
        assert_eq!(tree.remove_value(&padded("k", i)).expect("remove"), Some(i as u64));
    }
    assert_eq!(tree.remove_value(&padded("k", 0)).expect("remove"), None);
    assert_eq!(tree.remove_value(&Value::from("absent")).expect("remove"), None);

    for i in 0..1000 {
        let expected = (i % 2 == 1).then_some(i as u64);
        assert_eq!(tree.find_value(&padded("k", i)).expect("find"), expected);
    }
    let odd: Vec<u64> = (0..1000).filter(|i| i % 2 == 1).collect();
    assert_eq!(scan_ptrs(&tree, &IndexQuery::any()), odd);
}

#[test]
fn test_remove_everything_then_reinsert() {
    let file = TestFile::new();
    let tree = file.create_tree(false);
    for i in 0..600 {
        tree.add_value(padded("k", i), i as u64).expect("add");
    }
    for i in 0..600 {
        tree.remove_value(&padded("k", i)).expect("remove");
    }
    assert!(scan(&tree, &IndexQuery::any()).is_empty());
    assert!(scan(&tree, &IndexQuery::ge("k300")).is_empty());

    // Empty leaves stay linked; inserts land in them again.
    for i in 0..600 {
        tree.add_value(padded("k", i), (i + 10_000) as u64).expect("add");
    }
    tree.close().expect("close");

    let tree = file.open_tree();
    assert_eq!(tree.find_value(&padded("k", 599)).expect("find"), Some(10_599));
    assert_eq!(scan(&tree, &IndexQuery::any()).len(), 600);
}

#[test]
fn test_remove_with_pointer_counts_matches() {
    let file = TestFile::new();
    let tree = file.create_tree(true);
    for i in 0..50u64 {
        tree.add_value(Value::from("dup"), i % 5).expect("add");
    }

    assert_eq!(
        tree.remove_value_with_pointer(&Value::from("dup"), 3).expect("remove"),
        10
    );
    assert_eq!(
        tree.remove_value_with_pointer(&Value::from("dup"), 3).expect("remove"),
        0
    );
    let left = scan_ptrs(&tree, &IndexQuery::eq("dup"));
    assert_eq!(left.len(), 40);
    assert!(!left.contains(&3));
}
