//! Immutable shard trie operations
//!
//! Every operation takes a root CID and returns a new root plus the blocks it
//! created and superseded. Nothing is written to the block fetcher; callers
//! persist the returned patch.

use super::node::{Shard, ShardBlock, ShardEntry, ShardValue};
use super::util;
use super::{MAX_SHARD_SIZE, ShardFetcher};
use crate::error::{PailError, Result, ShardError};
use crate::storage::BlockFetcher;
use cid::Cid as IpldCid;
use smol_str::SmolStr;

/// Options for [`put`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PutOptions {
    /// Encoded size above which the target shard is split
    pub max_shard_size: usize,
}

impl Default for PutOptions {
    fn default() -> Self {
        Self {
            max_shard_size: MAX_SHARD_SIZE,
        }
    }
}

impl PutOptions {
    /// Set the split threshold
    pub fn with_max_shard_size(mut self, max_shard_size: usize) -> Self {
        self.max_shard_size = max_shard_size;
        self
    }
}

/// Result of a trie mutation
///
/// `additions` are ordered innermost first, so the last addition (if any) is
/// the new root. `removals` is the superseded path, root first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardPatch {
    /// Root after the mutation
    pub root: IpldCid,
    /// Newly created shard blocks
    pub additions: Vec<ShardBlock>,
    /// Shard blocks no longer referenced by the new root
    pub removals: Vec<ShardBlock>,
}

impl ShardPatch {
    fn unchanged(root: IpldCid) -> Self {
        Self {
            root,
            additions: Vec::new(),
            removals: Vec::new(),
        }
    }

    /// Check if the mutation changed nothing
    pub fn is_empty(&self) -> bool {
        self.additions.is_empty() && self.removals.is_empty()
    }
}

/// Path from the root to the shard responsible for a key
pub(crate) struct Traversal {
    /// Shards above the target, root first
    pub ancestors: Vec<ShardBlock>,
    /// Shard that holds (or would hold) the key
    pub target: ShardBlock,
    /// Key local to the target shard
    pub skey: String,
}

/// Walk from `shard` towards `key`
///
/// At each level the first entry that either equals the remaining key, or is a
/// link whose key prefixes it, decides the step: equality stops, a prefixing
/// link descends.
pub(crate) async fn traverse<S: BlockFetcher + Sync>(
    shards: &ShardFetcher<S>,
    shard: ShardBlock,
    key: &str,
) -> Result<Traversal> {
    let mut ancestors = Vec::new();
    let mut shard = shard;
    let mut skey = key.to_string();

    loop {
        let mut next = None;
        for entry in &shard.value.entries {
            if entry.key == skey {
                break;
            }
            if let Some(link) = entry.value.link() {
                if let Some(rest) = skey.strip_prefix(entry.key.as_str()) {
                    next = Some((*link, format!("{}{}", shard.prefix(), entry.key), rest.to_string()));
                    break;
                }
            }
        }

        let Some((link, prefix, rest)) = next else {
            return Ok(Traversal {
                ancestors,
                target: shard,
                skey,
            });
        };

        tracing::trace!(%link, prefix = %prefix, "descending into shard");
        let child = shards.get(&link, &prefix).await?;
        ancestors.push(shard);
        shard = child;
        skey = rest;
    }
}

/// Rewrite each ancestor's link to point at the new child, innermost first
///
/// Returns the CID of the new root.
fn propagate(
    ancestors: &[ShardBlock],
    child: ShardBlock,
    additions: &mut Vec<ShardBlock>,
) -> Result<IpldCid> {
    let mut child = child;

    for parent in ancestors.iter().rev() {
        let key = child
            .prefix()
            .strip_prefix(parent.prefix())
            .ok_or_else(|| {
                PailError::malformed(format!(
                    "shard prefix {:?} is not below {:?}",
                    child.prefix(),
                    parent.prefix()
                ))
            })?
            .to_string();

        let entries = parent
            .value
            .entries
            .iter()
            .map(|e| {
                if e.key != key {
                    return Ok(e.clone());
                }
                if !e.value.is_link() {
                    return Err(ShardError::NotALink {
                        key: key.clone(),
                        cid: parent.cid,
                    });
                }
                Ok(ShardEntry::new(e.key.clone(), e.value.relink(child.cid)))
            })
            .collect::<std::result::Result<Vec<_>, ShardError>>()?;

        child = ShardBlock::encode(Shard::new(
            parent.value.config.clone(),
            entries,
            parent.prefix(),
        ))?;
        additions.push(child.clone());
    }

    Ok(child.cid)
}

/// Get the value stored at `key`
///
/// Returns `None` when the key is absent or only names a shard link.
pub async fn get<S: BlockFetcher + Sync>(
    blocks: S,
    root: &IpldCid,
    key: &str,
) -> Result<Option<IpldCid>> {
    let shards = ShardFetcher::new(blocks);
    let rshard = shards.get(root, "").await?;
    let Traversal { target, skey, .. } = traverse(&shards, rshard, key).await?;

    Ok(target.value.get(&skey).and_then(|e| e.value.value().copied()))
}

/// Put a value at `key`
///
/// Keys longer than the shard's `max_key_size` are written through a chain
/// of single-entry shards. If the target shard then encodes larger than
/// `max_shard_size`, one group of entries sharing a prefix is moved into a new
/// child shard. Re-putting an identical value is a no-op with an empty patch.
pub async fn put<S: BlockFetcher + Sync>(
    blocks: S,
    root: &IpldCid,
    key: &str,
    value: IpldCid,
    options: &PutOptions,
) -> Result<ShardPatch> {
    util::validate_key(key)?;

    let shards = ShardFetcher::new(blocks);
    let rshard = shards.get(root, "").await?;
    let Traversal {
        ancestors,
        target,
        skey,
    } = traverse(&shards, rshard, key).await?;

    let config = target.value.config.clone();
    let mut additions = Vec::new();
    let mut entry = ShardEntry::new(SmolStr::new(&skey), ShardValue::Value(value));

    if skey.len() > config.max_key_size {
        let segments = util::key_segments(&skey, config.max_key_size);

        let mut chain: Option<ShardBlock> = None;
        for &(offset, segment) in segments.iter().skip(1).rev() {
            let value = match &chain {
                Some(child) => ShardValue::Link(child.cid),
                None => ShardValue::Value(value),
            };
            let block = ShardBlock::encode(Shard::new(
                config.clone(),
                vec![ShardEntry::new(SmolStr::new(segment), value)],
                format!("{}{}", target.prefix(), &skey[..offset]),
            ))?;
            additions.push(block.clone());
            chain = Some(block);
        }

        if let (Some(child), Some((_, first))) = (&chain, segments.first()) {
            tracing::debug!(key, levels = segments.len(), "writing long key through shard chain");
            entry = ShardEntry::new(SmolStr::new(first), ShardValue::Link(child.cid));
        }
    }

    let entries = util::put_entry(&target.value.entries, entry.clone());
    let mut child = ShardBlock::encode(Shard::new(config.clone(), entries, target.prefix()))?;

    if child.cid == target.cid {
        tracing::trace!(key, "put unchanged");
        return Ok(ShardPatch::unchanged(*root));
    }

    if child.bytes.len() > options.max_shard_size {
        let common = util::find_common_prefix(&child.value.entries, &entry.key).ok_or(
            ShardError::LimitReached {
                size: child.bytes.len(),
                max: options.max_shard_size,
            },
        )?;
        let prefix = common.prefix;

        let moved = common
            .matches
            .iter()
            .filter_map(|m| {
                m.key
                    .strip_prefix(prefix.as_str())
                    .filter(|rest| !rest.is_empty())
                    .map(|rest| ShardEntry::new(SmolStr::new(rest), m.value))
            })
            .collect();
        let split = ShardBlock::encode(Shard::new(
            config.clone(),
            moved,
            format!("{}{}", target.prefix(), prefix),
        ))?;

        let link = match common.matches.iter().find(|m| m.key == prefix) {
            Some(ShardEntry {
                value: ShardValue::Value(v),
                ..
            }) => ShardValue::LinkValue(split.cid, *v),
            Some(_) => return Err(ShardError::PrefixIsLink { prefix }.into()),
            None => ShardValue::Link(split.cid),
        };

        tracing::debug!(
            prefix = %prefix,
            moved = common.matches.len(),
            size = child.bytes.len(),
            "splitting shard"
        );

        let remaining: Vec<ShardEntry> = child
            .value
            .entries
            .iter()
            .filter(|e| !common.matches.iter().any(|m| m.key == e.key))
            .cloned()
            .collect();
        additions.push(split);

        child = ShardBlock::encode(Shard::new(
            config,
            util::put_entry(&remaining, ShardEntry::new(SmolStr::new(&prefix), link)),
            target.prefix(),
        ))?;
    }

    additions.push(child.clone());
    let root = propagate(&ancestors, child, &mut additions)?;

    let mut removals = ancestors;
    removals.push(target);

    tracing::debug!(key, %root, added = additions.len(), removed = removals.len(), "put");
    Ok(ShardPatch {
        root,
        additions,
        removals,
    })
}

/// Delete the value at `key`
///
/// Deleting an absent key, or a key that only names a shard link, is a no-op.
/// A link+value entry keeps its link. Removing a leaf that empties a shard
/// removes that shard's link from its parent, repeatedly, stopping at the
/// root or at a parent entry that still carries a value.
pub async fn del<S: BlockFetcher + Sync>(
    blocks: S,
    root: &IpldCid,
    key: &str,
) -> Result<ShardPatch> {
    let shards = ShardFetcher::new(blocks);
    let rshard = shards.get(root, "").await?;
    let Traversal {
        mut ancestors,
        target,
        skey,
    } = traverse(&shards, rshard, key).await?;

    let Some(idx) = target.value.entries.iter().position(|e| e.key == skey) else {
        tracing::trace!(key, "del of absent key");
        return Ok(ShardPatch::unchanged(*root));
    };

    let mut removals = ancestors.clone();
    removals.push(target.clone());

    let mut entries = target.value.entries.clone();
    let mut shard = match entries[idx].value {
        ShardValue::Link(_) => return Ok(ShardPatch::unchanged(*root)),
        ShardValue::LinkValue(link, _) => {
            entries[idx].value = ShardValue::Link(link);
            Shard::new(target.value.config.clone(), entries, target.prefix())
        }
        ShardValue::Value(_) => {
            entries.remove(idx);
            Shard::new(target.value.config.clone(), entries, target.prefix())
        }
    };

    // Collapse emptied shards into their parents
    while shard.entries.is_empty() {
        let Some(parent) = ancestors.pop() else {
            break;
        };
        let ckey = shard.prefix.strip_prefix(parent.prefix()).unwrap_or_default();

        let mut entries = parent.value.entries.clone();
        if let Some(i) = entries.iter().position(|e| e.key == ckey) {
            match entries[i].value {
                ShardValue::LinkValue(_, v) => entries[i].value = ShardValue::Value(v),
                _ => {
                    entries.remove(i);
                }
            }
        }

        tracing::trace!(prefix = %shard.prefix, "collapsing empty shard");
        shard = Shard::new(parent.value.config.clone(), entries, parent.prefix());
    }

    let child = ShardBlock::encode(shard)?;
    let mut additions = vec![child.clone()];
    let root = propagate(&ancestors, child, &mut additions)?;

    tracing::debug!(key, %root, added = additions.len(), removed = removals.len(), "del");
    Ok(ShardPatch {
        root,
        additions,
        removals,
    })
}
