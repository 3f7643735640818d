//! Prefix-sharded trie implementation

pub mod cursor;
pub mod diff;
pub mod merge;
pub mod node;
pub mod tree;
pub mod util;

pub use cursor::{EntriesOptions, ShardEntries};
pub use diff::{KeyChange, ShardDifference};
pub use merge::MergeResult;
pub use node::{Shard, ShardBlock, ShardConfig, ShardEntry, ShardValue};
pub use tree::{PutOptions, ShardPatch};

use crate::error::{PailError, Result};
use crate::storage::BlockFetcher;
use cid::Cid as IpldCid;

/// Shard format version
pub const SHARD_VERSION: u64 = 1;

/// Maximum key bytes encoded by a single shard level
///
/// Longer keys are split across a chain of single-entry shards.
pub const MAX_KEY_LENGTH: usize = 64;

/// Default maximum encoded shard size before a split is attempted
pub const MAX_SHARD_SIZE: usize = 512 * 1024;

/// Fetches and decodes shard blocks
#[derive(Debug, Clone)]
pub struct ShardFetcher<S> {
    blocks: S,
}

impl<S: BlockFetcher + Sync> ShardFetcher<S> {
    /// Wrap a block fetcher
    pub fn new(blocks: S) -> Self {
        Self { blocks }
    }

    /// Fetch and decode a shard, attaching the prefix it was reached by
    ///
    /// A block the fetcher does not know is an error: every shard reachable
    /// from a root is expected to be retrievable.
    pub async fn get(&self, cid: &IpldCid, prefix: &str) -> Result<ShardBlock> {
        let bytes = self
            .blocks
            .get(cid)
            .await?
            .ok_or_else(|| PailError::missing_block("shard", cid))?;
        ShardBlock::decode(*cid, bytes, prefix)
    }
}
