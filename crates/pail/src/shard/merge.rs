//! N-way merge of tries by replaying key differences

use std::collections::BTreeMap;

use cid::Cid as IpldCid;

use super::diff::{self, KeyChange};
use super::node::ShardBlock;
use super::tree::{self, PutOptions, ShardPatch};
use crate::error::Result;
use crate::storage::{BlockFetcher, LayeredFetcher, MemoryBlockStore};

/// Result of [`merge`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeResult {
    /// Merged root
    pub root: IpldCid,
    /// Shards to write
    pub additions: Vec<ShardBlock>,
    /// Shards no longer referenced by the merged root
    pub removals: Vec<ShardBlock>,
}

/// Sequence of trie mutations whose intermediate blocks live in memory
///
/// Every recorded patch is written to an in-memory overlay, so the next
/// mutation can read the shards the previous one produced. The caller's
/// fetcher is only ever read. A block created and later superseded within the
/// same replay appears in neither list, and neither does a block that was
/// superseded and then recreated.
pub(crate) struct Replay<S: BlockFetcher> {
    overlay: MemoryBlockStore,
    fetcher: LayeredFetcher<MemoryBlockStore, S>,
    additions: BTreeMap<IpldCid, ShardBlock>,
    removals: BTreeMap<IpldCid, ShardBlock>,
}

impl<S: BlockFetcher + Sync> Replay<S> {
    pub(crate) fn new(blocks: S) -> Self {
        let overlay = MemoryBlockStore::new();
        Self {
            fetcher: LayeredFetcher::new(overlay.clone(), blocks),
            overlay,
            additions: BTreeMap::new(),
            removals: BTreeMap::new(),
        }
    }

    /// Fetcher reading the overlay first, then the caller's blocks
    pub(crate) fn fetcher(&self) -> &LayeredFetcher<MemoryBlockStore, S> {
        &self.fetcher
    }

    /// Make a block readable during the replay without recording it
    pub(crate) fn stage(&self, cid: IpldCid, bytes: bytes::Bytes) -> Result<()> {
        self.overlay.put_block(cid, bytes)
    }

    /// Record a newly created shard
    pub(crate) fn add(&mut self, block: ShardBlock) -> Result<()> {
        self.overlay.put_block(block.cid, block.bytes.clone())?;
        if self.removals.remove(&block.cid).is_none() {
            self.additions.insert(block.cid, block);
        }
        Ok(())
    }

    /// Record a superseded shard
    pub(crate) fn remove(&mut self, block: ShardBlock) {
        if self.additions.remove(&block.cid).is_none() {
            self.removals.insert(block.cid, block);
        }
    }

    /// Record a mutation, returning its root
    pub(crate) fn record(&mut self, patch: ShardPatch) -> Result<IpldCid> {
        for block in patch.additions {
            self.add(block)?;
        }
        for block in patch.removals {
            self.remove(block);
        }
        Ok(patch.root)
    }

    /// Apply one key change on top of `root`
    pub(crate) async fn apply(
        &mut self,
        root: &IpldCid,
        key: &str,
        value: Option<IpldCid>,
        options: &PutOptions,
    ) -> Result<IpldCid> {
        let patch = match value {
            Some(value) => tree::put(&self.fetcher, root, key, value, options).await?,
            None => tree::del(&self.fetcher, root, key).await?,
        };
        self.record(patch)
    }

    /// Accumulated patch as `(additions, removals)`
    pub(crate) fn finish(self) -> (Vec<ShardBlock>, Vec<ShardBlock>) {
        (
            self.additions.into_values().collect(),
            self.removals.into_values().collect(),
        )
    }
}

/// Merge the changes of every target into `base`
///
/// Each target's [`difference`](diff::difference) from `base` is computed
/// concurrently. The key changes are then applied to `base` one target at a
/// time, in the order given: a key whose new value is absent is deleted,
/// otherwise it is put. When targets disagree on a key, the last target wins.
pub async fn merge<S: BlockFetcher + Sync>(
    blocks: S,
    base: &IpldCid,
    targets: &[IpldCid],
) -> Result<MergeResult> {
    let diffs = n0_future::join_all(
        targets
            .iter()
            .map(|target| diff::difference(blocks.clone(), base, target)),
    )
    .await;

    let options = PutOptions::default();
    let mut replay = Replay::new(blocks);
    let mut root = *base;

    for changes in diffs {
        for (key, KeyChange { new, .. }) in changes?.keys {
            root = replay.apply(&root, &key, new, &options).await?;
        }
    }

    let (additions, removals) = replay.finish();
    tracing::debug!(
        %base,
        %root,
        targets = targets.len(),
        added = additions.len(),
        removed = removals.len(),
        "merge"
    );

    Ok(MergeResult {
        root,
        additions,
        removals,
    })
}
