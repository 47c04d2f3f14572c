//! Value index files: free-space reuse, overwrites and multi-value keys.

use crate::e2e_tests::helpers::*;
use crate::index::{BTreeIndex, pointer};
use crate::query::IndexQuery;
use crate::types::Value;

#[test]
fn test_freed_data_page_is_reused() {
    let file = TestFile::new();
    let index = file.create_index(false);

    // Each value nearly fills a 4 KiB data page.
    let big = vec![0xAB; 3900];
    let first = index.add_value(padded("v", 1), &big).expect("add");
    let second = index.add_value(padded("v", 2), &big).expect("add");
    assert_ne!(pointer::unpack(first).0, pointer::unpack(second).0);

    index.remove(&padded("v", 1)).expect("remove");
    let third = index.add_value(padded("v", 3), &big).expect("add");
    assert_eq!(pointer::unpack(third).0, pointer::unpack(first).0);
    index.close().expect("close");

    let index = file.open_index();
    assert_eq!(index.get_value(&padded("v", 1)).expect("get"), None);
    assert_eq!(index.get_value(&padded("v", 2)).expect("get"), Some(big.clone()));
    assert_eq!(index.get_value(&padded("v", 3)).expect("get"), Some(big));
}

#[test]
fn test_free_list_survives_reopen() {
    let file = TestFile::new();
    let index = file.create_index(false);
    let first = index.add_value(padded("v", 1), b"small").expect("add");
    index.close().expect("close");

    // The half-empty page is still offered after reopening.
    let index = file.open_index();
    let second = index.add_value(padded("v", 2), b"also small").expect("add");
    assert_eq!(pointer::unpack(second).0, pointer::unpack(first).0);
}

#[test]
fn test_put_value_across_sessions() {
    let file = TestFile::new();
    let index = file.create_index(false);
    for i in 0..300 {
        index
            .put_value(padded("user", i), format!("v1-{i}").as_bytes())
            .expect("put");
    }
    index.close().expect("close");

    let index = file.open_index();
    for i in (0..300).step_by(10) {
        index
            .put_value(padded("user", i), format!("v2-{i}-longer").as_bytes())
            .expect("put");
    }
    index.close().expect("close");

    let index = file.open_index();
    for i in 0..300 {
        let expected = if i % 10 == 0 {
            format!("v2-{i}-longer")
        } else {
            format!("v1-{i}")
        };
        assert_eq!(
            index.get_value(&padded("user", i)).expect("get"),
            Some(expected.into_bytes())
        );
    }
}

#[test]
fn test_multi_value_file() {
    let file = TestFile::new();
    let index = BTreeIndex::create_multi_value(&file.path, &file.config).expect("create");
    for i in 0..200 {
        let tag = ["red", "green", "blue", "cyan"][i % 4];
        index
            .add_value(Value::from(tag), format!("item-{i}").as_bytes())
            .expect("add");
    }
    index.close().expect("close");

    let index = file.open_index();
    assert!(index.is_multi_value());
    let greens = index.get_values(&Value::from("green")).expect("get");
    assert_eq!(greens.len(), 50);
    assert_eq!(greens[0], b"item-1".to_vec());
    assert_eq!(greens[49], b"item-197".to_vec());

    let mut keys = Vec::new();
    index
        .search_values(&IndexQuery::start_with("b"), |k, _| {
            keys.push(k.clone());
            true
        })
        .expect("scan");
    assert_eq!(keys.len(), 50);
    assert!(keys.iter().all(|k| *k == Value::from("blue")));

    assert_eq!(index.remove(&Value::from("red")).expect("remove").len(), 50);
    assert!(index.get_values(&Value::from("red")).expect("get").is_empty());
    assert_eq!(index.get_values(&Value::from("cyan")).expect("get").len(), 50);
}
