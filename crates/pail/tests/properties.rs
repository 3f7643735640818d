//! Property tests for trie put/get/del and listing
//!
//! These cover the invariants every trie must keep regardless of the order
//! keys arrive in:
//!  - get after put returns the value
//!  - del after put restores the previous listing
//!  - re-putting an identical value changes nothing
//!  - listing is sorted, and a prefix listing is the matching subset

use std::collections::BTreeMap;

use cid::Cid as IpldCid;
use pail::shard::cursor;
use pail::shard::tree;
use pail::shard::{EntriesOptions, PutOptions, ShardBlock, ShardConfig, ShardPatch};
use pail::storage::MemoryBlockStore;
use pail::{DAG_CBOR_CID_CODEC, SHA2_256};
use proptest::prelude::*;

fn test_cid(n: u8) -> IpldCid {
    let data = vec![n; 32];
    let mh = multihash::Multihash::wrap(SHA2_256, &data).unwrap();
    IpldCid::new_v1(DAG_CBOR_CID_CODEC, mh)
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .build()
        .unwrap()
}

fn empty_root(store: &MemoryBlockStore) -> IpldCid {
    let block = ShardBlock::create(ShardConfig::default()).unwrap();
    store.put_block(block.cid, block.bytes).unwrap();
    block.cid
}

fn persist(store: &MemoryBlockStore, patch: &ShardPatch) {
    store
        .put_many(patch.additions.iter().map(|b| (b.cid, b.bytes.clone())))
        .unwrap();
}

async fn put_all(store: &MemoryBlockStore, root: IpldCid, kvs: &[(String, u8)]) -> IpldCid {
    let mut root = root;
    for (k, v) in kvs {
        let patch = tree::put(store, &root, k, test_cid(*v), &PutOptions::default())
            .await
            .unwrap();
        persist(store, &patch);
        root = patch.root;
    }
    root
}

async fn list(store: &MemoryBlockStore, root: &IpldCid, prefix: Option<&str>) -> Vec<(String, IpldCid)> {
    let options = match prefix {
        Some(p) => EntriesOptions::default().with_prefix(p),
        None => EntriesOptions::default(),
    };
    cursor::entries(store, root, options)
        .collect_all()
        .await
        .unwrap()
}

/// Keys drawn from a small alphabet so prefixes are shared often, with
/// lengths that cross the per-shard key limit
fn key_strategy() -> impl Strategy<Value = String> {
    prop_oneof![
        "[a-c/]{1,6}",
        "[a-c]{60,70}",
        "[ -~]{1,20}",
    ]
}

fn entries_strategy() -> impl Strategy<Value = Vec<(String, u8)>> {
    prop::collection::vec((key_strategy(), any::<u8>()), 1..24)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn put_then_get(kvs in entries_strategy()) {
        runtime().block_on(async {
            let store = MemoryBlockStore::new();
            let root = put_all(&store, empty_root(&store), &kvs).await;

            let expected: BTreeMap<&str, u8> = kvs.iter().map(|(k, v)| (k.as_str(), *v)).collect();
            for (k, v) in expected {
                assert_eq!(tree::get(&store, &root, k).await.unwrap(), Some(test_cid(v)), "key {:?}", k);
            }
        });
    }

    #[test]
    fn listing_is_sorted_and_complete(kvs in entries_strategy()) {
        runtime().block_on(async {
            let store = MemoryBlockStore::new();
            let root = put_all(&store, empty_root(&store), &kvs).await;

            let expected: Vec<(String, IpldCid)> = kvs
                .iter()
                .map(|(k, v)| (k.clone(), *v))
                .collect::<BTreeMap<_, _>>()
                .into_iter()
                .map(|(k, v)| (k, test_cid(v)))
                .collect();
            assert_eq!(list(&store, &root, None).await, expected);
        });
    }

    #[test]
    fn prefix_listing_is_subset(kvs in entries_strategy(), prefix in "[a-c]{1,3}") {
        runtime().block_on(async {
            let store = MemoryBlockStore::new();
            let root = put_all(&store, empty_root(&store), &kvs).await;

            let all = list(&store, &root, None).await;
            let expected: Vec<_> = all.into_iter().filter(|(k, _)| k.starts_with(&prefix)).collect();
            assert_eq!(list(&store, &root, Some(prefix.as_str())).await, expected);
        });
    }

    #[test]
    fn del_restores_listing(kvs in entries_strategy(), key in key_strategy(), v in any::<u8>()) {
        runtime().block_on(async {
            let store = MemoryBlockStore::new();
            let kvs: Vec<_> = kvs.into_iter().filter(|(k, _)| *k != key).collect();
            let root = put_all(&store, empty_root(&store), &kvs).await;
            let before = list(&store, &root, None).await;

            let added = tree::put(&store, &root, &key, test_cid(v), &PutOptions::default()).await.unwrap();
            persist(&store, &added);
            let removed = tree::del(&store, &added.root, &key).await.unwrap();
            persist(&store, &removed);

            assert_eq!(tree::get(&store, &removed.root, &key).await.unwrap(), None);
            assert_eq!(list(&store, &removed.root, None).await, before);
        });
    }

    #[test]
    fn put_is_idempotent(kvs in entries_strategy()) {
        runtime().block_on(async {
            let store = MemoryBlockStore::new();
            let root = put_all(&store, empty_root(&store), &kvs).await;

            let last: BTreeMap<&str, u8> = kvs.iter().map(|(k, v)| (k.as_str(), *v)).collect();
            for (k, v) in last {
                let patch = tree::put(&store, &root, k, test_cid(v), &PutOptions::default()).await.unwrap();
                assert_eq!(patch.root, root);
                assert!(patch.additions.is_empty());
                assert!(patch.removals.is_empty());
            }
        });
    }

    #[test]
    fn insertion_order_does_not_matter(kvs in entries_strategy()) {
        runtime().block_on(async {
            let store = MemoryBlockStore::new();
            let unique: Vec<(String, u8)> = kvs
                .into_iter()
                .collect::<BTreeMap<_, _>>()
                .into_iter()
                .collect();
            let reversed: Vec<_> = unique.iter().rev().cloned().collect();

            let forward = put_all(&store, empty_root(&store), &unique).await;
            let backward = put_all(&store, empty_root(&store), &reversed).await;
            assert_eq!(list(&store, &forward, None).await, list(&store, &backward, None).await);
        });
    }
}

#[tokio::test]
async fn test_list_in_insertion_independent_order() {
    let store = MemoryBlockStore::new();
    let kvs: Vec<(String, u8)> = ["c", "a", "d", "b"]
        .iter()
        .enumerate()
        .map(|(i, k)| (k.to_string(), i as u8))
        .collect();
    let root = put_all(&store, empty_root(&store), &kvs).await;

    let keys: Vec<String> = list(&store, &root, None).await.into_iter().map(|(k, _)| k).collect();
    assert_eq!(keys, vec!["a", "b", "c", "d"]);
}

#[tokio::test]
async fn test_list_with_prefix() {
    let store = MemoryBlockStore::new();
    let kvs: Vec<(String, u8)> = ["cccc", "deee", "dooo", "beee"]
        .iter()
        .enumerate()
        .map(|(i, k)| (k.to_string(), i as u8))
        .collect();
    let root = put_all(&store, empty_root(&store), &kvs).await;

    let keys: Vec<String> = list(&store, &root, Some("d"))
        .await
        .into_iter()
        .map(|(k, _)| k)
        .collect();
    assert_eq!(keys, vec!["deee", "dooo"]);
}

#[tokio::test]
async fn test_long_key_spans_shards() {
    let store = MemoryBlockStore::new();
    let long = format!("{}/{}", "p".repeat(100), "q".repeat(60));
    let root = empty_root(&store);

    let patch = tree::put(&store, &root, &long, test_cid(7), &PutOptions::default())
        .await
        .unwrap();
    persist(&store, &patch);

    // 161 bytes over 64-byte levels: two chained shards plus the new root
    assert_eq!(patch.additions.len(), 3);
    assert_eq!(tree::get(&store, &patch.root, &long).await.unwrap(), Some(test_cid(7)));
    assert_eq!(tree::get(&store, &patch.root, &long[..64]).await.unwrap(), None);

    let removed = tree::del(&store, &patch.root, &long).await.unwrap();
    assert_eq!(removed.root, root);
}
