//! Conflict-free key/value bucket over a merkle clock
//!
//! Every mutation is recorded as a clock event carrying the key, the value and
//! the trie root it produced. A single-event head resolves to that event's
//! root. With several concurrent head events, the events since their common
//! ancestor are replayed on the ancestor's root in a deterministic order, so
//! every replica that has seen the same events resolves the same root.
//!
//! Replay blocks never touch the caller's store: they are held in an
//! in-memory overlay and returned as a patch for the caller to persist.

use cid::Cid as IpldCid;

use crate::clock::{self, EventBlock, EventFetcher, find_common_ancestor, find_sorted_events};
use crate::error::{ClockError, Result};
use crate::shard::cursor::{self, EntriesOptions, ShardEntries};
use crate::shard::merge::Replay;
use crate::shard::{PutOptions, ShardBlock, ShardConfig, tree};
use crate::storage::{BlockFetcher, LayeredFetcher, MemoryBlockStore};

/// Payload of a bucket event
///
/// Fields are declared in DAG-CBOR canonical order (key, root, type, value).
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct EventData {
    /// Key the mutation applies to
    pub key: String,
    /// Trie root after the mutation
    pub root: IpldCid,
    /// Mutation type, `put` or `del`
    #[serde(rename = "type")]
    pub kind: String,
    /// Value written by a `put`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<IpldCid>,
}

/// Decoded mutation of an [`EventData`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    /// Set the key to a value
    Put(IpldCid),
    /// Remove the key
    Del,
}

impl EventData {
    /// Data for a put event
    pub fn put(key: impl Into<String>, value: IpldCid, root: IpldCid) -> Self {
        Self {
            key: key.into(),
            root,
            kind: "put".to_string(),
            value: Some(value),
        }
    }

    /// Data for a del event
    pub fn del(key: impl Into<String>, root: IpldCid) -> Self {
        Self {
            key: key.into(),
            root,
            kind: "del".to_string(),
            value: None,
        }
    }

    /// Parse the mutation type
    pub fn operation(&self) -> Result<Operation> {
        match self.kind.as_str() {
            "put" => self.value.map(Operation::Put).ok_or_else(|| {
                ClockError::MissingValue {
                    key: self.key.clone(),
                }
                .into()
            }),
            "del" => Ok(Operation::Del),
            other => Err(ClockError::UnknownEventType(other.to_string()).into()),
        }
    }
}

/// Result of a bucket mutation
#[derive(Debug, Clone)]
pub struct CrdtResult {
    /// Trie root after the mutation
    pub root: IpldCid,
    /// Clock head after the mutation
    pub head: Vec<IpldCid>,
    /// Event recording the mutation
    pub event: EventBlock<EventData>,
    /// Shards to write
    pub additions: Vec<ShardBlock>,
    /// Shards no longer referenced
    pub removals: Vec<ShardBlock>,
}

/// Result of resolving the root of a head
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RootResult {
    /// Effective trie root
    pub root: IpldCid,
    /// Shards created while replaying concurrent events
    pub additions: Vec<ShardBlock>,
    /// Shards superseded while replaying concurrent events
    pub removals: Vec<ShardBlock>,
}

/// Resolve the effective root of a non-empty head, replaying into `replay`
async fn resolve<S: BlockFetcher + Sync>(replay: &mut Replay<S>, head: &[IpldCid]) -> Result<IpldCid> {
    let events = EventFetcher::<_, EventData>::new(replay.fetcher().clone());

    if let [only] = head {
        return Ok(events.get(only).await?.value.data.root);
    }

    let ancestor = find_common_ancestor(&events, head)
        .await?
        .ok_or(ClockError::NoCommonAncestor)?;
    let mut root = events.get(&ancestor).await?.value.data.root;

    let sorted = find_sorted_events(&events, head, &ancestor).await?;
    tracing::debug!(%ancestor, events = sorted.len(), heads = head.len(), "replaying concurrent events");

    let options = PutOptions::default();
    for event in &sorted {
        let data = &event.value.data;
        let value = match data.operation()? {
            Operation::Put(value) => Some(value),
            Operation::Del => None,
        };
        tracing::trace!(event = %event.cid, key = %data.key, kind = %data.kind, "replay");
        root = replay.apply(&root, &data.key, value, &options).await?;
    }

    Ok(root)
}

/// Record the mutation as a new event on top of `head`
async fn commit<S: BlockFetcher + Sync>(
    replay: Replay<S>,
    head: &[IpldCid],
    data: EventData,
) -> Result<CrdtResult> {
    let root = data.root;
    let event = EventBlock::create(data, head.to_vec())?;
    replay.stage(event.cid, event.bytes.clone())?;

    let head = clock::advance(replay.fetcher(), head, &event.cid).await?;
    let (additions, removals) = replay.finish();

    Ok(CrdtResult {
        root,
        head,
        event,
        additions,
        removals,
    })
}

/// Put a value for `key`, overwriting any existing value
///
/// With an empty head a new history is started from an empty trie.
pub async fn put<S: BlockFetcher + Sync>(
    blocks: S,
    head: &[IpldCid],
    key: &str,
    value: IpldCid,
    options: &PutOptions,
) -> Result<CrdtResult> {
    let mut replay = Replay::new(blocks);

    let root = if head.is_empty() {
        let shard = ShardBlock::create(ShardConfig::default())?;
        let cid = shard.cid;
        replay.add(shard)?;
        cid
    } else {
        resolve(&mut replay, head).await?
    };

    let root = replay.apply(&root, key, Some(value), options).await?;
    let result = commit(replay, head, EventData::put(key, value, root)).await?;
    tracing::debug!(key, root = %result.root, event = %result.event.cid, "crdt put");
    Ok(result)
}

/// Delete the value for `key`
///
/// An event is recorded even if the key was absent.
pub async fn del<S: BlockFetcher + Sync>(
    blocks: S,
    head: &[IpldCid],
    key: &str,
) -> Result<CrdtResult> {
    if head.is_empty() {
        return Err(ClockError::Headless.into());
    }

    let mut replay = Replay::new(blocks);
    let root = resolve(&mut replay, head).await?;
    let root = replay.apply(&root, key, None, &PutOptions::default()).await?;

    let result = commit(replay, head, EventData::del(key, root)).await?;
    tracing::debug!(key, root = %result.root, event = %result.event.cid, "crdt del");
    Ok(result)
}

/// Determine the effective trie root for a clock head
///
/// Multi-event heads may return blocks that were created or superseded while
/// replaying events from their common ancestor.
pub async fn root<S: BlockFetcher + Sync>(blocks: S, head: &[IpldCid]) -> Result<RootResult> {
    if head.is_empty() {
        return Err(ClockError::Headless.into());
    }

    let mut replay = Replay::new(blocks);
    let root = resolve(&mut replay, head).await?;
    let (additions, removals) = replay.finish();

    Ok(RootResult {
        root,
        additions,
        removals,
    })
}

/// Get the value stored at `key` under the effective root of `head`
pub async fn get<S: BlockFetcher + Sync>(
    blocks: S,
    head: &[IpldCid],
    key: &str,
) -> Result<Option<IpldCid>> {
    if head.is_empty() {
        return Ok(None);
    }

    let mut replay = Replay::new(blocks);
    let root = resolve(&mut replay, head).await?;
    tree::get(replay.fetcher(), &root, key).await
}

/// List the entries under the effective root of `head`
///
/// The returned cursor reads replayed shards from its own overlay.
pub async fn entries<S: BlockFetcher + Sync>(
    blocks: S,
    head: &[IpldCid],
    options: EntriesOptions,
) -> Result<ShardEntries<LayeredFetcher<MemoryBlockStore, S>>> {
    let mut replay = Replay::new(blocks);

    let root = if head.is_empty() {
        let shard = ShardBlock::create(ShardConfig::default())?;
        replay.stage(shard.cid, shard.bytes)?;
        shard.cid
    } else {
        resolve(&mut replay, head).await?
    };

    Ok(cursor::entries(replay.fetcher().clone(), &root, options))
}
