//! Layered block fetching for replay overlays
//!
//! Provides a two-layer fetcher that reads from an overlay first, then falls
//! back to a base fetcher. The base is never written to.
//!
//! Replaying concurrent clock events produces intermediate shards that only
//! exist in memory. Layering lets the trie engine read them without copying
//! anything into, or mutating, the caller's store.

use crate::error::Result;
use crate::storage::BlockFetcher;
use bytes::Bytes;
use cid::Cid as IpldCid;

/// Layered fetcher with an overlay and a read-only base
///
/// Reads check the overlay first, then fall back to the base layer.
///
/// # Example
///
/// ```rust,ignore
/// use pail::storage::{LayeredFetcher, MemoryBlockStore};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let base = MemoryBlockStore::new(); // caller's bucket storage
/// let overlay = MemoryBlockStore::new(); // blocks produced during replay
///
/// let layered = LayeredFetcher::new(overlay.clone(), &base);
///
/// // Reads check overlay first, then base
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct LayeredFetcher<W: BlockFetcher, B: BlockFetcher> {
    overlay: W,
    base: B,
}

impl<W: BlockFetcher, B: BlockFetcher> LayeredFetcher<W, B> {
    /// Create a new layered fetcher
    ///
    /// - `overlay`: Top layer, consulted first
    /// - `base`: Bottom layer for fallback reads
    pub fn new(overlay: W, base: B) -> Self {
        Self { overlay, base }
    }

    /// Get reference to the overlay layer
    pub fn overlay(&self) -> &W {
        &self.overlay
    }

    /// Get reference to the base layer
    pub fn base(&self) -> &B {
        &self.base
    }
}

impl<W: BlockFetcher + Sync, B: BlockFetcher + Sync> BlockFetcher for LayeredFetcher<W, B> {
    async fn get(&self, cid: &IpldCid) -> Result<Option<Bytes>> {
        if let Some(data) = self.overlay.get(cid).await? {
            return Ok(Some(data));
        }

        self.base.get(cid).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryBlockStore;

    #[tokio::test]
    async fn test_layered_read_from_overlay() {
        let base = MemoryBlockStore::new();
        let overlay = MemoryBlockStore::new();

        let cid = overlay.put(b"test data").unwrap();

        let layered = LayeredFetcher::new(overlay, &base);

        let data = layered.get(&cid).await.unwrap();
        assert_eq!(&*data.unwrap(), b"test data");
    }

    #[tokio::test]
    async fn test_layered_fallback_to_base() {
        let base = MemoryBlockStore::new();
        let overlay = MemoryBlockStore::new();

        let cid = base.put(b"base data").unwrap();

        let layered = LayeredFetcher::new(overlay, &base);

        let data = layered.get(&cid).await.unwrap();
        assert_eq!(&*data.unwrap(), b"base data");
    }

    #[tokio::test]
    async fn test_layered_overlay_is_live() {
        let base = MemoryBlockStore::new();
        let overlay = MemoryBlockStore::new();
        let layered = LayeredFetcher::new(overlay.clone(), &base);

        // Blocks added to the overlay after construction are visible
        let cid = overlay.put(b"late").unwrap();
        assert!(layered.get(&cid).await.unwrap().is_some());

        // and never leak into the base
        assert!(!base.has(&cid).unwrap());
    }

    #[tokio::test]
    async fn test_layered_missing_in_both() {
        let layered = LayeredFetcher::new(MemoryBlockStore::new(), MemoryBlockStore::new());
        assert_eq!(layered.get(&IpldCid::default()).await.unwrap(), None);
    }
}
