//! Lazy depth-first listing of trie entries

use super::ShardFetcher;
use super::node::{ShardBlock, ShardValue};
use crate::error::Result;
use crate::storage::BlockFetcher;
use cid::Cid as IpldCid;
use n0_future::Stream;

/// Options for [`entries`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntriesOptions {
    /// Only list keys starting with this prefix
    pub prefix: Option<String>,
}

impl EntriesOptions {
    /// Restrict listing to keys starting with `prefix`
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }
}

/// Cursor over the `(key, value)` pairs of a trie in key order
///
/// Shards are fetched as the cursor reaches them, so abandoning a listing
/// early only costs the blocks already visited. A cursor is consumed once;
/// call [`entries`] again for a fresh listing.
///
/// # Example
///
/// ```rust,ignore
/// let mut cursor = pail::shard::cursor::entries(&store, &root, EntriesOptions::default());
///
/// while let Some((key, value)) = cursor.next().await? {
///     println!("{} -> {}", key, value);
/// }
/// ```
#[derive(Debug, Clone)]
pub struct ShardEntries<S> {
    shards: ShardFetcher<S>,
    prefix: Option<String>,

    /// Root not yet fetched
    root: Option<IpldCid>,

    /// Shards being walked and the index of the next entry in each
    stack: Vec<(ShardBlock, usize)>,
}

/// List the entries of the trie at `root`
pub fn entries<S: BlockFetcher + Sync>(
    blocks: S,
    root: &IpldCid,
    options: EntriesOptions,
) -> ShardEntries<S> {
    ShardEntries {
        shards: ShardFetcher::new(blocks),
        prefix: options.prefix.filter(|p| !p.is_empty()),
        root: Some(*root),
        stack: Vec::new(),
    }
}

impl<S: BlockFetcher + Sync> ShardEntries<S> {
    fn matches(&self, key: &str) -> bool {
        self.prefix.as_deref().is_none_or(|p| key.starts_with(p))
    }

    /// Whether keys below `key` could still match the prefix
    fn descends(&self, key: &str) -> bool {
        match self.prefix.as_deref() {
            None => true,
            Some(p) if p.len() <= key.len() => key.starts_with(p),
            Some(p) => p.starts_with(key),
        }
    }

    /// Get the next entry
    ///
    /// Returns `None` when the listing is exhausted.
    pub async fn next(&mut self) -> Result<Option<(String, IpldCid)>> {
        if let Some(root) = self.root.take() {
            let shard = self.shards.get(&root, "").await?;
            self.stack.push((shard, 0));
        }

        loop {
            let next = match self.stack.last_mut() {
                None => return Ok(None),
                Some((shard, idx)) => {
                    let next = shard
                        .value
                        .entries
                        .get(*idx)
                        .map(|e| (format!("{}{}", shard.prefix(), e.key), e.value));
                    *idx += 1;
                    next
                }
            };

            let Some((key, value)) = next else {
                self.stack.pop();
                continue;
            };

            if let Some(link) = value.link() {
                if self.descends(&key) {
                    let child = self.shards.get(link, &key).await?;
                    self.stack.push((child, 0));
                }
            }

            // A link+value yields its own key before anything below it
            if let Some(v) = value.value() {
                if self.matches(&key) {
                    return Ok(Some((key, *v)));
                }
            }
        }
    }

    /// Drain the cursor into a vector
    pub async fn collect_all(mut self) -> Result<Vec<(String, IpldCid)>> {
        let mut out = Vec::new();
        while let Some(entry) = self.next().await? {
            out.push(entry);
        }
        Ok(out)
    }

    /// Convert into a stream of entries
    ///
    /// The stream ends after the first error.
    pub fn into_stream(self) -> impl Stream<Item = Result<(String, IpldCid)>> {
        n0_future::stream::unfold(Some(self), |state| async move {
            let mut cursor = state?;
            match cursor.next().await {
                Ok(Some(entry)) => Some((Ok(entry), Some(cursor))),
                Ok(None) => None,
                Err(e) => Some((Err(e), None)),
            }
        })
    }
}
