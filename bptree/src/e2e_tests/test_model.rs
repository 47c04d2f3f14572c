//! Random workloads checked against an in-memory `BTreeMap`.

use std::collections::BTreeMap;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::config::StoreConfig;
use crate::e2e_tests::helpers::*;
use crate::query::IndexQuery;
use crate::types::Value;

fn small_pages() -> StoreConfig {
    StoreConfig {
        page_size: 1024,
        node_cache_size: 32,
        node_cache_purge_unit: 8,
        data_cache_size: 8,
        data_cache_purge_unit: 2,
        page_cache_size: 16,
    }
}

fn random_key(rng: &mut StdRng) -> String {
    let len = rng.random_range(1..12);
    (0..len)
        .map(|_| char::from(b'a' + rng.random_range(0..6u8)))
        .collect()
}

#[test]
fn test_random_tree_workload_matches_model() {
    let file = TestFile::with_config(small_pages());
    let mut rng = StdRng::seed_from_u64(0x5eed);
    let mut model: BTreeMap<String, u64> = BTreeMap::new();
    let mut tree = file.create_tree(false);

    for round in 0..4 {
        for n in 0..1500u64 {
            let key = random_key(&mut rng);
            if rng.random_range(0..4) == 0 {
                let removed = tree.remove_value(&Value::from(key.as_str())).expect("remove");
                assert_eq!(removed, model.remove(&key));
            } else if !model.contains_key(&key) {
                let ptr = round * 10_000 + n;
                tree.add_value(Value::from(key.as_str()), ptr).expect("add");
                model.insert(key, ptr);
            }
        }
        tree.close().expect("close");
        tree = file.open_tree();

        let all: Vec<(Value, u64)> = model
            .iter()
            .map(|(k, &v)| (Value::from(k.as_str()), v))
            .collect();
        assert_eq!(scan(&tree, &IndexQuery::any()), all);

        let lo = random_key(&mut rng);
        let hi = random_key(&mut rng);
        let (lo, hi) = if lo <= hi { (lo, hi) } else { (hi, lo) };
        let query = IndexQuery::between(lo.as_str(), hi.as_str()).expect("query");
        let expected: Vec<u64> = model.range(lo..=hi).map(|(_, &v)| v).collect();
        assert_eq!(scan_ptrs(&tree, &query), expected);

        let prefix = random_key(&mut rng);
        let expected: Vec<u64> = model
            .iter()
            .filter(|(k, _)| k.starts_with(prefix.as_str()))
            .map(|(_, &v)| v)
            .collect();
        assert_eq!(
            scan_ptrs(&tree, &IndexQuery::start_with(prefix.as_str())),
            expected
        );
    }
}

#[test]
fn test_random_index_workload_matches_model() {
    let file = TestFile::with_config(small_pages());
    let mut rng = StdRng::seed_from_u64(42);
    let mut model: BTreeMap<String, Vec<u8>> = BTreeMap::new();
    let mut index = file.create_index(false);

    for _ in 0..3 {
        for _ in 0..800 {
            let key = random_key(&mut rng);
            match rng.random_range(0..5) {
                0 => {
                    let removed = index.remove(&Value::from(key.as_str())).expect("remove");
                    let expected: Vec<Vec<u8>> = model.remove(&key).into_iter().collect();
                    assert_eq!(removed, expected);
                }
                1 => {
                    let len = rng.random_range(0..600);
                    let value = vec![rng.random::<u8>(); len];
                    index.put_value(Value::from(key.as_str()), &value).expect("put");
                    model.insert(key, value);
                }
                _ => {
                    let len = rng.random_range(0..40);
                    let value: Vec<u8> = (0..len).map(|_| rng.random()).collect();
                    index.add_value(Value::from(key.as_str()), &value).expect("add");
                    model.insert(key, value);
                }
            }
        }
        index.close().expect("close");
        index = file.open_index();

        for (key, value) in &model {
            assert_eq!(
                index.get_value(&Value::from(key.as_str())).expect("get").as_ref(),
                Some(value)
            );
        }
        let mut seen = Vec::new();
        index
            .search_values(&IndexQuery::any(), |k, v| {
                seen.push((k.clone(), v.to_vec()));
                true
            })
            .expect("scan");
        let expected: Vec<(Value, Vec<u8>)> = model
            .iter()
            .map(|(k, v)| (Value::from(k.as_str()), v.clone()))
            .collect();
        assert_eq!(seen, expected);
    }
}
