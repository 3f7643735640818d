//! In-memory block storage implementation

use crate::error::{PailError, Result};
use crate::shard::util::compute_cid;
use crate::storage::BlockFetcher;
use bytes::Bytes;
use cid::Cid as IpldCid;
use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};

/// In-memory block storage using BTreeMap
///
/// Useful for:
/// - Testing
/// - Overlays holding blocks produced while replaying events
/// - Small buckets that fit in memory
///
/// Uses `Bytes` for efficient reference-counted storage with cheap cloning.
/// Clones share the same underlying map.
///
/// # Example
///
/// ```rust,ignore
/// use pail::storage::{BlockFetcher, MemoryBlockStore};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let storage = MemoryBlockStore::new();
///
/// let data = b"hello world";
/// let cid = storage.put(data)?;
///
/// let retrieved = storage.get(&cid).await?;
/// assert_eq!(retrieved.as_deref(), Some(&data[..]));
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct MemoryBlockStore {
    blocks: Arc<RwLock<BTreeMap<IpldCid, Bytes>>>,
}

fn poisoned<T>(_: PoisonError<T>) -> PailError {
    PailError::storage(std::io::Error::other("memory block store lock poisoned"))
}

impl MemoryBlockStore {
    /// Create new empty memory store
    pub fn new() -> Self {
        Self {
            blocks: Arc::new(RwLock::new(BTreeMap::new())),
        }
    }

    /// Create new memory store from a map of blocks
    pub fn new_from_blocks(blocks: BTreeMap<IpldCid, Bytes>) -> Self {
        Self {
            blocks: Arc::new(RwLock::new(blocks)),
        }
    }

    /// Get number of blocks stored
    pub fn len(&self) -> Result<usize> {
        Ok(self.blocks.read().map_err(poisoned)?.len())
    }

    /// Check if store is empty
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Clear all blocks
    pub fn clear(&self) -> Result<()> {
        self.blocks.write().map_err(poisoned)?.clear();
        Ok(())
    }

    /// Check if a block exists without retrieving it
    pub fn has(&self, cid: &IpldCid) -> Result<bool> {
        Ok(self.blocks.read().map_err(poisoned)?.contains_key(cid))
    }

    /// Put raw DAG-CBOR bytes, return their CID
    pub fn put(&self, data: &[u8]) -> Result<IpldCid> {
        let cid = compute_cid(data)?;
        self.put_block(cid, Bytes::copy_from_slice(data))?;
        Ok(cid)
    }

    /// Put a block whose CID has already been computed
    ///
    /// The CID is trusted as-is; callers pass CIDs produced by the shard and
    /// event encoders.
    pub fn put_block(&self, cid: IpldCid, data: impl Into<Bytes>) -> Result<()> {
        self.blocks
            .write()
            .map_err(poisoned)?
            .insert(cid, data.into());
        Ok(())
    }

    /// Put many blocks at once
    pub fn put_many(&self, blocks: impl IntoIterator<Item = (IpldCid, Bytes)>) -> Result<()> {
        let mut store = self.blocks.write().map_err(poisoned)?;
        for (cid, data) in blocks {
            store.insert(cid, data);
        }
        Ok(())
    }

    /// Persist a patch produced by a put, del, root or merge
    ///
    /// Additions are written first, then removals deleted. A CID appearing in
    /// both lists ends up deleted.
    pub fn apply_patch(
        &self,
        additions: impl IntoIterator<Item = (IpldCid, Bytes)>,
        removals: impl IntoIterator<Item = IpldCid>,
    ) -> Result<()> {
        let mut store = self.blocks.write().map_err(poisoned)?;
        for (cid, data) in additions {
            store.insert(cid, data);
        }
        for cid in removals {
            store.remove(&cid);
        }
        Ok(())
    }
}

impl Default for MemoryBlockStore {
    fn default() -> Self {
        Self::new()
    }
}

impl BlockFetcher for MemoryBlockStore {
    async fn get(&self, cid: &IpldCid) -> Result<Option<Bytes>> {
        Ok(self.blocks.read().map_err(poisoned)?.get(cid).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_and_get() {
        let store = MemoryBlockStore::new();
        let data = b"test data";

        let cid = store.put(data).unwrap();
        let retrieved = store.get(&cid).await.unwrap();

        assert_eq!(retrieved.as_deref(), Some(&data[..]));
    }

    #[tokio::test]
    async fn test_has() {
        let store = MemoryBlockStore::new();
        let cid = store.put(b"test data").unwrap();
        assert!(store.has(&cid).unwrap());

        let fake_cid = IpldCid::default();
        assert!(!store.has(&fake_cid).unwrap());
        assert_eq!(store.get(&fake_cid).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_put_many() {
        let store = MemoryBlockStore::new();

        let data1 = b"data1";
        let data2 = b"data2";
        let cid1 = compute_cid(data1).unwrap();
        let cid2 = compute_cid(data2).unwrap();

        store
            .put_many(vec![
                (cid1, Bytes::from_static(data1)),
                (cid2, Bytes::from_static(data2)),
            ])
            .unwrap();

        assert_eq!(store.len().unwrap(), 2);
        assert!(store.has(&cid1).unwrap());
        assert!(store.has(&cid2).unwrap());
    }

    #[tokio::test]
    async fn test_apply_patch_writes_then_deletes() {
        let store = MemoryBlockStore::new();
        let old = store.put(b"old").unwrap();
        let new = compute_cid(b"new").unwrap();

        store
            .apply_patch(vec![(new, Bytes::from_static(b"new"))], vec![old])
            .unwrap();

        assert!(store.has(&new).unwrap());
        assert!(!store.has(&old).unwrap());
        assert_eq!(store.len().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_clear() {
        let store = MemoryBlockStore::new();
        store.put(b"data").unwrap();

        assert_eq!(store.len().unwrap(), 1);
        store.clear().unwrap();
        assert_eq!(store.len().unwrap(), 0);
        assert!(store.is_empty().unwrap());
    }

    #[tokio::test]
    async fn test_clone_shares_storage() {
        let store1 = MemoryBlockStore::new();
        let store2 = store1.clone();

        let cid = store1.put(b"test").unwrap();
        assert!(store2.has(&cid).unwrap());
    }

    #[tokio::test]
    async fn test_poisoned_lock_is_an_error() {
        let store = MemoryBlockStore::new();
        store.put(b"data").unwrap();

        let shared = store.clone();
        let _ = std::thread::spawn(move || {
            let _guard = shared.blocks.write().unwrap();
            panic!("poison");
        })
        .join();

        assert!(store.len().is_err());
        assert!(store.is_empty().is_err());
        assert!(store.has(&compute_cid(b"data").unwrap()).is_err());
    }
}
