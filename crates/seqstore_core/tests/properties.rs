//! Property tests for key ordering and top-K collection.

use proptest::prelude::*;
use seqstore_core::{Config, SequentialStore};
use seqstore_storage::RamDirectory;
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Debug, Clone)]
enum Operation {
    Add { id: u8, data: Vec<u8> },
    Delete { id: u8 },
    Refresh,
}

fn operation_strategy() -> impl Strategy<Value = Operation> {
    prop_oneof![
        6 => (0u8..24, prop::collection::vec(any::<u8>(), 0..8))
            .prop_map(|(id, data)| Operation::Add { id, data }),
        2 => (0u8..24).prop_map(|id| Operation::Delete { id }),
        1 => Just(Operation::Refresh),
    ]
}

/// Small segments and eager merges, so short runs cover overlapping
/// segments, tombstones and merged segments.
fn small_store() -> SequentialStore {
    let config = Config::default()
        .max_buffered_docs(5)
        .max_segments(4)
        .merge_factor(2)
        .sync_on_commit(false);
    SequentialStore::open_with_directory(Arc::new(RamDirectory::new()), config).unwrap()
}

/// Applies `ops` to a store and to a model of identifier -> (key, data).
fn apply(store: &SequentialStore, ops: &[Operation]) -> BTreeMap<u8, (u64, Vec<u8>)> {
    let mut model = BTreeMap::new();
    let mut last_key = 0;
    for op in ops {
        match op {
            Operation::Add { id, data } => {
                let key = store.add(&[*id], data).unwrap().as_u64();
                assert!(key > last_key, "key {key} not above {last_key}");
                last_key = key;
                model.insert(*id, (key, data.clone()));
            }
            Operation::Delete { id } => {
                store.delete(&[*id]).unwrap();
                model.remove(id);
            }
            Operation::Refresh => {
                store.refresh().unwrap();
            }
        }
    }
    store.refresh().unwrap();
    model
}

/// The model's records in key order as `(key, identifier, data)`.
fn ordered(model: &BTreeMap<u8, (u64, Vec<u8>)>) -> Vec<(u64, Vec<u8>, Vec<u8>)> {
    let mut records: Vec<_> = model
        .iter()
        .map(|(id, (key, data))| (*key, vec![*id], data.clone()))
        .collect();
    records.sort();
    records
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn items_follow_assignment_order(ops in prop::collection::vec(operation_strategy(), 0..120)) {
        let store = small_store();
        let model = apply(&store, &ops);

        let items: Vec<_> = store
            .items()
            .unwrap()
            .map(|record| {
                let record = record.unwrap();
                (record.key.as_u64(), record.identifier, record.data)
            })
            .collect();
        prop_assert_eq!(items, ordered(&model));
        prop_assert_eq!(store.len().unwrap(), model.len());
    }

    #[test]
    fn top_k_matches_sorted_prefix(
        ops in prop::collection::vec(operation_strategy(), 0..120),
        k in 0usize..12,
    ) {
        let store = small_store();
        let model = apply(&store, &ops);
        let expected: Vec<u64> = ordered(&model).iter().map(|r| r.0).take(k).collect();

        for count_all in [true, false] {
            let top = store.top_k(k, count_all).unwrap();
            let keys: Vec<u64> = top.records.iter().map(|r| r.key.as_u64()).collect();
            prop_assert_eq!(&keys, &expected);
            prop_assert_eq!(top.more_available, model.len() > k);
            if count_all {
                prop_assert_eq!(top.total, Some(model.len()));
            } else {
                prop_assert_eq!(top.total, None);
            }
        }
    }

    #[test]
    fn top_k_in_range_matches_filter(
        ops in prop::collection::vec(operation_strategy(), 0..120),
        k in 1usize..8,
        start in 0u64..60,
        width in 0u64..60,
    ) {
        let store = small_store();
        let model = apply(&store, &ops);
        let stop = start + width;
        let in_range: Vec<u64> = ordered(&model)
            .iter()
            .map(|r| r.0)
            .filter(|key| (start..stop).contains(key))
            .collect();

        let top = store.top_k_in(start..stop, k, true).unwrap();
        let keys: Vec<u64> = top.records.iter().map(|r| r.key.as_u64()).collect();
        prop_assert_eq!(keys, in_range.iter().copied().take(k).collect::<Vec<_>>());
        prop_assert_eq!(top.total, Some(in_range.len()));

        let scanned: Vec<u64> = store
            .range(Some(start), Some(stop), false)
            .unwrap()
            .sequence_keys()
            .map(|key| key.unwrap().as_u64())
            .collect();
        prop_assert_eq!(scanned, in_range);
    }

    #[test]
    fn keys_survive_reopen(ops in prop::collection::vec(operation_strategy(), 1..60)) {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("store");
        let (model, newest) = {
            let store = SequentialStore::open(&path).unwrap();
            let model = apply(&store, &ops);
            store.commit().unwrap();
            (model, store.newest_key().unwrap())
        };

        let store = SequentialStore::open(&path).unwrap();
        let items: Vec<_> = store
            .items()
            .unwrap()
            .map(|record| {
                let record = record.unwrap();
                (record.key.as_u64(), record.identifier, record.data)
            })
            .collect();
        prop_assert_eq!(items, ordered(&model));

        let next = store.add(b"fresh", b"").unwrap();
        prop_assert_eq!(next.as_u64(), newest.as_u64() + 1);
    }
}
