//! Structural difference between two trie roots

use super::ShardFetcher;
use super::node::{ShardBlock, ShardEntry};
use crate::error::Result;
use crate::storage::BlockFetcher;
use cid::Cid as IpldCid;
use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;

/// Old and new value of a key
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KeyChange {
    /// Value in the first tree, `None` if absent
    pub old: Option<IpldCid>,
    /// Value in the second tree, `None` if absent
    pub new: Option<IpldCid>,
}

/// Difference between two tries
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShardDifference {
    /// Changed keys, sorted by key
    pub keys: Vec<(String, KeyChange)>,
    /// Shards reachable from the second root but not the first
    pub additions: Vec<ShardBlock>,
    /// Shards reachable from the first root but not the second
    pub removals: Vec<ShardBlock>,
}

impl ShardDifference {
    /// Check if the tries are identical
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty() && self.additions.is_empty() && self.removals.is_empty()
    }
}

#[derive(Default)]
struct DiffState {
    keys: BTreeMap<String, KeyChange>,
    additions: BTreeMap<IpldCid, ShardBlock>,
    removals: BTreeMap<IpldCid, ShardBlock>,
}

impl DiffState {
    // A key can sit at different depths in the two tries, so its old and new
    // values may be discovered at different levels of the walk.
    fn removed(&mut self, key: String, old: IpldCid) {
        self.keys.entry(key).or_default().old = Some(old);
    }

    fn added(&mut self, key: String, new: IpldCid) {
        self.keys.entry(key).or_default().new = Some(new);
    }
}

/// Compute the changes that turn the trie at `a` into the trie at `b`
///
/// Both tries are walked in lock-step by shard prefix. Subtrees linked by the
/// same CID on both sides are skipped without fetching.
pub async fn difference<S: BlockFetcher + Sync>(
    blocks: S,
    a: &IpldCid,
    b: &IpldCid,
) -> Result<ShardDifference> {
    if a == b {
        return Ok(ShardDifference::default());
    }

    let shards = ShardFetcher::new(blocks);
    let mut state = DiffState::default();
    diff_level(&shards, *a, *b, String::new(), &mut state).await?;

    let DiffState {
        keys,
        mut additions,
        mut removals,
    } = state;

    let common: Vec<IpldCid> = removals
        .keys()
        .filter(|cid| additions.contains_key(cid))
        .copied()
        .collect();
    for cid in &common {
        additions.remove(cid);
        removals.remove(cid);
    }

    let keys: Vec<(String, KeyChange)> = keys
        .into_iter()
        .filter(|(_, change)| change.old != change.new)
        .collect();

    tracing::debug!(
        %a,
        %b,
        keys = keys.len(),
        added = additions.len(),
        removed = removals.len(),
        "difference"
    );

    Ok(ShardDifference {
        keys,
        additions: additions.into_values().collect(),
        removals: removals.into_values().collect(),
    })
}

fn diff_level<'a, S: BlockFetcher + Sync>(
    shards: &'a ShardFetcher<S>,
    a: IpldCid,
    b: IpldCid,
    prefix: String,
    state: &'a mut DiffState,
) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
    Box::pin(async move {
        if a == b {
            return Ok(());
        }

        let (ashard, bshard) = n0_future::future::zip(shards.get(&a, &prefix), shards.get(&b, &prefix)).await;
        let (ashard, bshard) = (ashard?, bshard?);

        // Entries only in A
        for aentry in &ashard.value.entries {
            if bshard.value.get(&aentry.key).is_none() {
                let key = format!("{}{}", prefix, aentry.key);
                if let Some(v) = aentry.value.value() {
                    state.removed(key.clone(), *v);
                }
                if let Some(link) = aentry.value.link() {
                    for s in collect(shards, link, &key).await? {
                        each_value(&s, |k, v| state.removed(k, v));
                        state.removals.insert(s.cid, s);
                    }
                }
            }
        }

        // Entries added or changed in B
        for bentry in &bshard.value.entries {
            let key = format!("{}{}", prefix, bentry.key);
            let aentry = ashard.value.get(&bentry.key);

            let old = aentry.and_then(|e| e.value.value().copied());
            let new = bentry.value.value().copied();
            if old != new {
                if let Some(o) = old {
                    state.removed(key.clone(), o);
                }
                if let Some(n) = new {
                    state.added(key.clone(), n);
                }
            }

            match (aentry.and_then(|e| e.value.link().copied()), bentry.value.link().copied()) {
                (Some(alink), Some(blink)) => {
                    diff_level(shards, alink, blink, key, state).await?;
                }
                (Some(alink), None) => {
                    for s in collect(shards, &alink, &key).await? {
                        each_value(&s, |k, v| state.removed(k, v));
                        state.removals.insert(s.cid, s);
                    }
                }
                (None, Some(blink)) => {
                    for s in collect(shards, &blink, &key).await? {
                        each_value(&s, |k, v| state.added(k, v));
                        state.additions.insert(s.cid, s);
                    }
                }
                (None, None) => {}
            }
        }

        state.removals.insert(ashard.cid, ashard);
        state.additions.insert(bshard.cid, bshard);
        Ok(())
    })
}

/// Call `f` with the full key and value of every valued entry in `shard`
fn each_value(shard: &ShardBlock, mut f: impl FnMut(String, IpldCid)) {
    for ShardEntry { key, value } in &shard.value.entries {
        if let Some(v) = value.value() {
            f(format!("{}{}", shard.prefix(), key), *v);
        }
    }
}

/// Fetch every shard in the subtree rooted at `cid`
async fn collect<S: BlockFetcher + Sync>(
    shards: &ShardFetcher<S>,
    cid: &IpldCid,
    prefix: &str,
) -> Result<Vec<ShardBlock>> {
    let mut out = Vec::new();
    let mut stack = vec![(*cid, prefix.to_string())];

    while let Some((cid, prefix)) = stack.pop() {
        let shard = shards.get(&cid, &prefix).await?;
        for entry in &shard.value.entries {
            if let Some(link) = entry.value.link() {
                stack.push((*link, format!("{}{}", prefix, entry.key)));
            }
        }
        out.push(shard);
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shard::tree::{PutOptions, ShardPatch, del, put};
    use crate::shard::{Shard, ShardConfig, ShardValue};
    use crate::storage::MemoryBlockStore;
    use crate::{DAG_CBOR_CID_CODEC, SHA2_256};
    use smol_str::SmolStr;

    fn test_cid(n: u8) -> IpldCid {
        let data = vec![n; 32];
        let mh = multihash::Multihash::wrap(SHA2_256, &data).unwrap();
        IpldCid::new_v1(DAG_CBOR_CID_CODEC, mh)
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

    async fn put_all(
        store: &MemoryBlockStore,
        root: IpldCid,
        kvs: &[(&str, IpldCid)],
        options: &PutOptions,
    ) -> IpldCid {
        let mut root = root;
        for (k, v) in kvs {
            let patch = put(store, &root, k, *v, options).await.unwrap();
            persist(store, &patch);
            root = patch.root;
        }
        root
    }

    fn small_shards() -> PutOptions {
        let entries = ["aa", "ab", "ac", "ad"]
            .iter()
            .map(|k| ShardEntry::new(SmolStr::new(k), ShardValue::Value(test_cid(0))))
            .collect();
        let size = ShardBlock::encode(Shard::new(ShardConfig::default(), entries, ""))
            .unwrap()
            .bytes
            .len();
        PutOptions::default().with_max_shard_size(size)
    }

    fn change(old: Option<u8>, new: Option<u8>) -> KeyChange {
        KeyChange {
            old: old.map(test_cid),
            new: new.map(test_cid),
        }
    }

    #[tokio::test]
    async fn test_identical_roots() {
        let store = MemoryBlockStore::new();
        let root = empty_root(&store);
        let diff = difference(&store, &root, &root).await.unwrap();
        assert!(diff.is_empty());
    }

    #[tokio::test]
    async fn test_flat_changes() {
        let store = MemoryBlockStore::new();
        let empty = empty_root(&store);
        let opts = PutOptions::default();
        let a = put_all(&store, empty, &[("a", test_cid(1)), ("b", test_cid(2))], &opts).await;
        let b = put_all(&store, a, &[("b", test_cid(3)), ("c", test_cid(4))], &opts).await;
        let patch = del(&store, &b, "a").await.unwrap();
        persist(&store, &patch);
        let b = patch.root;

        let diff = difference(&store, &a, &b).await.unwrap();
        assert_eq!(
            diff.keys,
            vec![
                ("a".to_string(), change(Some(1), None)),
                ("b".to_string(), change(Some(2), Some(3))),
                ("c".to_string(), change(None, Some(4))),
            ]
        );
        assert_eq!(diff.additions.len(), 1);
        assert_eq!(diff.additions[0].cid, b);
        assert_eq!(diff.removals.len(), 1);
        assert_eq!(diff.removals[0].cid, a);
    }

    #[tokio::test]
    async fn test_reverse_difference_swaps_changes() {
        let store = MemoryBlockStore::new();
        let empty = empty_root(&store);
        let opts = PutOptions::default();
        let a = put_all(&store, empty, &[("x", test_cid(1))], &opts).await;
        let b = put_all(&store, a, &[("y", test_cid(2))], &opts).await;

        let forward = difference(&store, &a, &b).await.unwrap();
        let backward = difference(&store, &b, &a).await.unwrap();
        assert_eq!(forward.keys, vec![("y".to_string(), change(None, Some(2)))]);
        assert_eq!(backward.keys, vec![("y".to_string(), change(Some(2), None))]);
        assert_eq!(forward.additions, backward.removals);
    }

    #[tokio::test]
    async fn test_new_subtree() {
        let store = MemoryBlockStore::new();
        let empty = empty_root(&store);
        let opts = small_shards();

        let kvs = [
            ("aa", test_cid(1)),
            ("ab", test_cid(2)),
            ("ac", test_cid(3)),
            ("ad", test_cid(4)),
            ("ae", test_cid(5)),
        ];
        let b = put_all(&store, empty, &kvs, &opts).await;

        let diff = difference(&store, &empty, &b).await.unwrap();
        let keys: Vec<_> = diff.keys.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["aa", "ab", "ac", "ad", "ae"]);
        assert!(diff.keys.iter().all(|(_, c)| c.old.is_none() && c.new.is_some()));
        // new root plus the split child
        assert_eq!(diff.additions.len(), 2);
        assert_eq!(diff.removals.len(), 1);
        assert_eq!(diff.removals[0].cid, empty);

        let back = difference(&store, &b, &empty).await.unwrap();
        assert_eq!(back.keys.len(), 5);
        assert!(back.keys.iter().all(|(_, c)| c.new.is_none()));
        assert_eq!(back.removals.len(), 2);
    }

    #[tokio::test]
    async fn test_change_inside_subtree() {
        let store = MemoryBlockStore::new();
        let empty = empty_root(&store);
        let opts = small_shards();

        // "ac" splits "aa", "ab", "ac" below "a", leaving "x1" and "y1" at the root
        let kvs = [
            ("x1", test_cid(1)),
            ("y1", test_cid(2)),
            ("aa", test_cid(3)),
            ("ab", test_cid(4)),
            ("ac", test_cid(5)),
        ];
        let a = put_all(&store, empty, &kvs, &opts).await;
        let b = put_all(&store, a, &[("ab", test_cid(9))], &opts).await;

        let diff = difference(&store, &a, &b).await.unwrap();
        assert_eq!(diff.keys, vec![("ab".to_string(), change(Some(4), Some(9)))]);
        assert_eq!(diff.additions.len(), 2);
        assert_eq!(diff.removals.len(), 2);
    }

    #[tokio::test]
    async fn test_key_moved_between_levels_is_unchanged() {
        let store = MemoryBlockStore::new();
        let empty = empty_root(&store);
        let opts = small_shards();

        // "aa".."ad" at the root, then "ae" triggers a split moving them below "a"
        let a = put_all(
            &store,
            empty,
            &[
                ("aa", test_cid(1)),
                ("ab", test_cid(2)),
                ("ac", test_cid(3)),
                ("ad", test_cid(4)),
            ],
            &opts,
        )
        .await;
        let b = put_all(&store, a, &[("ae", test_cid(5))], &opts).await;

        let diff = difference(&store, &a, &b).await.unwrap();
        assert_eq!(diff.keys, vec![("ae".to_string(), change(None, Some(5)))]);
    }
}
