//! Shard data structures and block codec

use bytes::Bytes;
use cid::Cid as IpldCid;
use ipld_core::ipld::Ipld;
use smol_str::SmolStr;

use super::util;
use super::{MAX_KEY_LENGTH, SHARD_VERSION};
use crate::error::{PailError, Result, ShardError};

/// Value half of a shard entry
///
/// The wire format distinguishes the three shapes structurally (a bare CID,
/// a one-element list, a two-element list). In memory they are an explicit
/// tagged variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShardValue {
    /// Leaf value
    Value(IpldCid),

    /// Link to a child shard, no value at this exact key
    Link(IpldCid),

    /// Link to a child shard plus a value at this exact key
    LinkValue(IpldCid, IpldCid),
}

impl ShardValue {
    /// Value CID stored at this exact key, if any
    pub fn value(&self) -> Option<&IpldCid> {
        match self {
            ShardValue::Value(v) | ShardValue::LinkValue(_, v) => Some(v),
            ShardValue::Link(_) => None,
        }
    }

    /// Child shard CID, if this entry links to one
    pub fn link(&self) -> Option<&IpldCid> {
        match self {
            ShardValue::Link(l) | ShardValue::LinkValue(l, _) => Some(l),
            ShardValue::Value(_) => None,
        }
    }

    /// Check if this entry links to a child shard
    pub fn is_link(&self) -> bool {
        self.link().is_some()
    }

    /// Same entry pointing at a different child shard, value preserved
    pub(crate) fn relink(&self, child: IpldCid) -> Self {
        match self.value() {
            Some(v) => ShardValue::LinkValue(child, *v),
            None => ShardValue::Link(child),
        }
    }

    fn to_ipld(self) -> Ipld {
        match self {
            ShardValue::Value(v) => Ipld::Link(v),
            ShardValue::Link(l) => Ipld::List(vec![Ipld::Link(l)]),
            ShardValue::LinkValue(l, v) => Ipld::List(vec![Ipld::Link(l), Ipld::Link(v)]),
        }
    }

    fn from_ipld(key: &str, ipld: Ipld) -> std::result::Result<Self, ShardError> {
        let invalid = || ShardError::InvalidEntry {
            key: key.to_string(),
        };
        match ipld {
            Ipld::Link(v) => Ok(ShardValue::Value(v)),
            Ipld::List(items) => match items.as_slice() {
                [Ipld::Link(l)] => Ok(ShardValue::Link(*l)),
                [Ipld::Link(l), Ipld::Link(v)] => Ok(ShardValue::LinkValue(*l, *v)),
                _ => Err(invalid()),
            },
            _ => Err(invalid()),
        }
    }
}

/// One `(key suffix, value)` pair of a shard
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ShardEntry {
    /// Key suffix local to the shard (the shard prefix is not included)
    pub key: SmolStr,
    /// Leaf, link or link+value
    pub value: ShardValue,
}

impl ShardEntry {
    /// Create a new entry
    pub fn new(key: SmolStr, value: ShardValue) -> Self {
        Self { key, value }
    }
}

/// Shard parameters carried by every shard and inherited by its children
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardConfig {
    /// Format version
    pub version: u64,
    /// Permitted key alphabet
    pub key_chars: SmolStr,
    /// Maximum key bytes encoded by a single shard level
    pub max_key_size: usize,
}

impl Default for ShardConfig {
    fn default() -> Self {
        Self {
            version: SHARD_VERSION,
            key_chars: SmolStr::new_static("ascii"),
            max_key_size: MAX_KEY_LENGTH,
        }
    }
}

/// Decoded shard
///
/// `prefix` is the key path from the root to this shard. It is not part of the
/// encoded block; readers carry it alongside the decoded value while
/// traversing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Shard {
    /// Shard parameters
    pub config: ShardConfig,
    /// Entries sorted by key
    pub entries: Vec<ShardEntry>,
    /// Accumulated key prefix of this shard
    pub prefix: String,
}

impl Shard {
    /// Create a shard with the given entries and config
    pub fn new(config: ShardConfig, entries: Vec<ShardEntry>, prefix: impl Into<String>) -> Self {
        Self {
            config,
            entries,
            prefix: prefix.into(),
        }
    }

    /// Find an entry by local key
    pub fn get(&self, key: &str) -> Option<&ShardEntry> {
        self.entries.iter().find(|e| e.key == key)
    }
}

// Wire format
//
// Field order matches DAG-CBOR canonical map key order (length first, then
// bytewise): entries, version, keyChars, maxKeySize.

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
struct ShardData {
    entries: Vec<(String, Ipld)>,
    version: u64,
    #[serde(rename = "keyChars")]
    key_chars: String,
    #[serde(rename = "maxKeySize")]
    max_key_size: u64,
}

/// Encoded shard: CID, canonical bytes and decoded value
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardBlock {
    /// Content identifier of `bytes`
    pub cid: IpldCid,
    /// Canonical DAG-CBOR bytes
    pub bytes: Bytes,
    /// Decoded shard
    pub value: Shard,
}

impl ShardBlock {
    /// Create the canonical empty root shard block
    pub fn create(config: ShardConfig) -> Result<Self> {
        Self::encode(Shard::new(config, Vec::new(), ""))
    }

    /// Encode a shard into a block
    pub fn encode(shard: Shard) -> Result<Self> {
        let data = ShardData {
            entries: shard
                .entries
                .iter()
                .map(|e| (e.key.to_string(), e.value.to_ipld()))
                .collect(),
            version: shard.config.version,
            key_chars: shard.config.key_chars.to_string(),
            max_key_size: shard.config.max_key_size as u64,
        };
        let (cid, bytes) = util::encode(&data)?;
        Ok(Self {
            cid,
            bytes,
            value: shard,
        })
    }

    /// Decode block bytes, attaching the caller-tracked prefix
    pub fn decode(cid: IpldCid, bytes: Bytes, prefix: impl Into<String>) -> Result<Self> {
        let data: ShardData = serde_ipld_dagcbor::from_slice(&bytes)
            .map_err(|e| PailError::decode(e).with_context(format!("shard {}", cid)))?;

        if data.version != SHARD_VERSION {
            return Err(ShardError::UnsupportedVersion(data.version).into());
        }

        let entries = data
            .entries
            .into_iter()
            .map(|(key, value)| {
                let value = ShardValue::from_ipld(&key, value)?;
                Ok(ShardEntry::new(SmolStr::new(key), value))
            })
            .collect::<std::result::Result<Vec<_>, ShardError>>()?;

        let max_key_size = usize::try_from(data.max_key_size)
            .map_err(|e| PailError::decode(e).with_context(format!("shard {}", cid)))?;

        let config = ShardConfig {
            version: data.version,
            key_chars: SmolStr::new(data.key_chars),
            max_key_size,
        };

        Ok(Self {
            cid,
            bytes,
            value: Shard::new(config, entries, prefix),
        })
    }

    /// Accumulated key prefix of this shard
    pub fn prefix(&self) -> &str {
        &self.value.prefix
    }
}
