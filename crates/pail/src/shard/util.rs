//! Shard utility functions

use super::node::{ShardEntry, ShardValue};
use crate::error::{PailError, Result, ShardError};
use crate::{DAG_CBOR_CID_CODEC, SHA2_256};
use bytes::Bytes;
use cid::Cid as IpldCid;
use sha2::{Digest, Sha256};

/// Compute CID from raw bytes
///
/// Uses SHA-256 hash and DAG-CBOR codec. Assumes data is already DAG-CBOR encoded.
pub fn compute_cid(data: &[u8]) -> Result<IpldCid> {
    let hash = Sha256::digest(data);
    let mh = multihash::Multihash::<64>::wrap(SHA2_256, hash.as_slice())
        .map_err(PailError::serialization)?;

    Ok(IpldCid::new_v1(DAG_CBOR_CID_CODEC, mh))
}

/// Serialize a value to DAG-CBOR and compute its CID
pub fn encode<T: serde::Serialize>(value: &T) -> Result<(IpldCid, Bytes)> {
    let cbor = serde_ipld_dagcbor::to_vec(value).map_err(PailError::serialization)?;
    let cid = compute_cid(&cbor)?;
    Ok((cid, Bytes::from(cbor)))
}

/// Validate a key against the `ascii` key alphabet
///
/// Keys must be non-empty and contain only printable ASCII (0x20..=0x7e).
/// Restricting to single-byte characters also means byte offsets used to
/// split keys across shard levels always fall on character boundaries.
pub fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(ShardError::EmptyKey.into());
    }

    if !key.bytes().all(|b| (0x20..=0x7e).contains(&b)) {
        return Err(ShardError::InvalidKeyChars {
            key: key.to_string(),
        }
        .into());
    }

    Ok(())
}

/// Drop the final character of a string
pub(crate) fn drop_last_char(s: &str) -> &str {
    match s.char_indices().next_back() {
        Some((i, _)) => &s[..i],
        None => s,
    }
}

/// Split a shard-local key into segments of at most `max` bytes
///
/// Returns `(offset, segment)` pairs. The key must be ASCII.
pub(crate) fn key_segments(key: &str, max: usize) -> Vec<(usize, &str)> {
    let max = max.max(1);
    (0..key.len())
        .step_by(max)
        .map(|start| (start, &key[start..(start + max).min(key.len())]))
        .collect()
}

/// Insert or overwrite an entry, keeping entries sorted by key
///
/// Merge rules when the key already exists:
/// - new link onto an existing value (or link+value) keeps the existing value
/// - new value onto an existing link (or link+value) becomes link+value
/// - otherwise the new entry replaces the old one
pub fn put_entry(target: &[ShardEntry], entry: ShardEntry) -> Vec<ShardEntry> {
    let mut shard = target.to_vec();

    if let Some(i) = shard.iter().position(|e| e.key == entry.key) {
        let value = match (shard[i].value, entry.value) {
            (ShardValue::Value(v) | ShardValue::LinkValue(_, v), ShardValue::Link(link)) => {
                ShardValue::LinkValue(link, v)
            }
            (ShardValue::Link(link) | ShardValue::LinkValue(link, _), ShardValue::Value(v)) => {
                ShardValue::LinkValue(link, v)
            }
            (_, value) => value,
        };
        shard[i] = ShardEntry::new(entry.key, value);
        return shard;
    }

    let idx = shard.partition_point(|e| e.key.as_str() < entry.key.as_str());
    shard.insert(idx, entry);
    shard
}

/// Entries sharing a prefix, chosen to be split out into a child shard
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommonPrefix {
    /// The shared prefix
    pub prefix: String,
    /// Every entry whose key starts with `prefix`
    pub matches: Vec<ShardEntry>,
}

/// Find the longest prefix shared by more than one entry, starting at `skey`
///
/// Starting from the entry with key `skey`, successively shorter proper
/// prefixes of its key are tried until one is shared by at least two entries.
/// If none is, the search moves on to the next entry (wrapping around) until
/// it arrives back at the start. Returns `None` when nothing can be split out.
pub fn find_common_prefix(shard: &[ShardEntry], skey: &str) -> Option<CommonPrefix> {
    let start = shard.iter().position(|e| e.key == skey)?;
    let mut i = start;

    loop {
        let mut pfx = drop_last_char(shard[i].key.as_str());
        while !pfx.is_empty() {
            let matches: Vec<ShardEntry> = shard
                .iter()
                .filter(|e| e.key.starts_with(pfx))
                .cloned()
                .collect();
            if matches.len() > 1 {
                return Some(CommonPrefix {
                    prefix: pfx.to_string(),
                    matches,
                });
            }
            pfx = drop_last_char(pfx);
        }

        i = (i + 1) % shard.len();
        if i == start {
            return None;
        }
    }
}
