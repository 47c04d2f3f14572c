//! One tree or index shared by several threads.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::thread;

use crate::e2e_tests::helpers::*;
use crate::index::BTreeIndex;
use crate::query::IndexQuery;
use crate::storage::BTree;
use crate::testing::small_config;
use crate::types::Value;

const WORKERS: usize = 4;
const PER_WORKER: usize = 250;

const fn assert_send_sync<T: Send + Sync>() {}
const _: () = assert_send_sync::<BTree>();
const _: () = assert_send_sync::<BTreeIndex>();

fn worker_key(worker: usize, i: usize) -> Value {
    Value::from(format!("w{worker}-{i:04}"))
}

fn tree_ptr(worker: usize, i: usize) -> u64 {
    (worker * 10_000 + i) as u64
}

/// State every worker leaves behind, computed without threads.
fn tree_model() -> (BTreeMap<Value, u64>, Vec<u64>) {
    let mut own = BTreeMap::new();
    let mut shared = Vec::new();
    for worker in 0..WORKERS {
        for i in 0..PER_WORKER {
            shared.push(tree_ptr(worker, i));
            if i % 3 != 0 {
                own.insert(worker_key(worker, i), tree_ptr(worker, i));
            }
        }
    }
    shared.sort_unstable();
    (own, shared)
}

fn check_tree(tree: &BTree) {
    let (own, shared) = tree_model();
    let mut seen_shared = Vec::new();
    let mut seen_own = Vec::new();
    for (key, ptr) in scan(tree, &IndexQuery::any()) {
        if key == Value::from("shared") {
            seen_shared.push(ptr);
        } else {
            seen_own.push((key, ptr));
        }
    }
    seen_shared.sort_unstable();
    assert_eq!(seen_shared, shared);
    assert_eq!(seen_own, own.into_iter().collect::<Vec<_>>());
}

#[test]
fn test_shared_tree_across_threads() {
    let file = TestFile::with_config(small_config());
    let tree = Arc::new(file.create_tree(true));

    thread::scope(|s| {
        for worker in 0..WORKERS {
            let tree = Arc::clone(&tree);
            s.spawn(move || {
                for i in 0..PER_WORKER {
                    let key = worker_key(worker, i);
                    let ptr = tree_ptr(worker, i);
                    tree.add_value(key.clone(), ptr).expect("add");
                    tree.add_value(Value::from("shared"), ptr).expect("add");
                    assert_eq!(tree.find_value(&key).expect("find"), Some(ptr));
                    if i % 3 == 0 {
                        assert_eq!(tree.remove_value(&key).expect("remove"), Some(ptr));
                        assert_eq!(tree.find_value(&key).expect("find"), None);
                    }
                }
            });
        }

        let reader = Arc::clone(&tree);
        s.spawn(move || {
            for _ in 0..20 {
                let keys: Vec<Value> = scan(&reader, &IndexQuery::any())
                    .into_iter()
                    .map(|(key, _)| key)
                    .collect();
                assert!(keys.windows(2).all(|pair| pair[0] <= pair[1]));
            }
        });
    });

    check_tree(&tree);
    let tree = Arc::into_inner(tree).expect("no other handles");
    tree.close().expect("close");
    check_tree(&file.open_tree());
}

fn index_value(worker: usize, i: usize, updated: bool) -> Vec<u8> {
    if updated {
        format!("{worker}-{i}-updated").into_bytes()
    } else {
        format!("{worker}-{i}").into_bytes()
    }
}

#[test]
fn test_shared_index_across_threads() {
    let file = TestFile::with_config(small_config());
    let index = Arc::new(file.create_index(false));

    thread::scope(|s| {
        for worker in 0..WORKERS {
            let index = Arc::clone(&index);
            s.spawn(move || {
                for i in 0..PER_WORKER {
                    let key = worker_key(worker, i);
                    let value = index_value(worker, i, false);
                    index.put_value(key.clone(), &value).expect("put");
                    assert_eq!(index.get_value(&key).expect("get"), Some(value.clone()));

                    if i % 4 == 0 {
                        let value = index_value(worker, i, true);
                        index.put_value(key.clone(), &value).expect("put");
                        assert_eq!(index.get_value(&key).expect("get"), Some(value));
                    } else if i % 3 == 0 {
                        assert_eq!(index.remove(&key).expect("remove"), vec![value]);
                        assert_eq!(index.get_value(&key).expect("get"), None);
                    }
                }
            });
        }
    });

    let mut model = BTreeMap::new();
    for worker in 0..WORKERS {
        for i in 0..PER_WORKER {
            if i % 4 == 0 {
                model.insert(worker_key(worker, i), index_value(worker, i, true));
            } else if i % 3 != 0 {
                model.insert(worker_key(worker, i), index_value(worker, i, false));
            }
        }
    }

    let index = Arc::into_inner(index).expect("no other handles");
    index.close().expect("close");
    let index = file.open_index();
    let mut seen = Vec::new();
    index
        .search_values(&IndexQuery::any(), |key, value| {
            seen.push((key.clone(), value.to_vec()));
            true
        })
        .expect("scan");
    assert_eq!(seen, model.into_iter().collect::<Vec<_>>());
}
