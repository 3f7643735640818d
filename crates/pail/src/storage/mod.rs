//! Block fetching abstraction for shard and event blocks

use crate::error::Result;
use bytes::Bytes;
use cid::Cid as IpldCid;
use std::sync::Arc;

/// Async block fetch capability
///
/// The only thing the trie, clock and CRDT layers ever ask of storage is
/// "give me the bytes for this CID". They never write: every operation returns
/// a patch of added/removed blocks and the caller decides how to persist it.
///
/// Implementations might be:
/// - In-memory map ([`MemoryBlockStore`])
/// - An overlay of two fetchers ([`LayeredFetcher`])
/// - A CAR archive, a database, or a network peer (user-provided)
///
/// Clone is required so listing cursors and overlays can hold their own handle.
///
/// # WASM Compatibility
///
/// The trait uses `trait_variant` to require `Send` futures, so fetchers can be
/// driven from multi-threaded executors.
///
/// # Example
///
/// ```rust,ignore
/// use pail::storage::{BlockFetcher, MemoryBlockStore};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let storage = MemoryBlockStore::new();
/// let cid = storage.put(b"hello world")?;
///
/// if let Some(bytes) = storage.get(&cid).await? {
///     assert_eq!(&bytes[..], b"hello world");
/// }
/// # Ok(())
/// # }
/// ```
#[trait_variant::make(Send)]
pub trait BlockFetcher: Clone {
    /// Get a block by CID
    ///
    /// Returns `None` if the block is not known to this fetcher.
    async fn get(&self, cid: &IpldCid) -> Result<Option<Bytes>>;
}

impl<T: BlockFetcher + Sync> BlockFetcher for &T {
    async fn get(&self, cid: &IpldCid) -> Result<Option<Bytes>> {
        (**self).get(cid).await
    }
}

impl<T: BlockFetcher + Sync + Send> BlockFetcher for Arc<T> {
    async fn get(&self, cid: &IpldCid) -> Result<Option<Bytes>> {
        self.as_ref().get(cid).await
    }
}

pub mod layered;
pub mod memory;

pub use layered::LayeredFetcher;
pub use memory::MemoryBlockStore;
