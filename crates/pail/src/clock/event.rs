//! Clock event blocks

use std::marker::PhantomData;

use bytes::Bytes;
use cid::Cid as IpldCid;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::{PailError, Result};
use crate::shard::util;
use crate::storage::BlockFetcher;

/// A node in the causal history
///
/// `parents` are the head events the writer knew about when it created this
/// event; the first event of a clock has none.
///
/// Fields are declared in DAG-CBOR canonical order (data, parents).
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Event<T> {
    /// Event payload
    pub data: T,
    /// Parent event CIDs
    pub parents: Vec<IpldCid>,
}

impl<T> Event<T> {
    /// Create a new event
    pub fn new(data: T, parents: Vec<IpldCid>) -> Self {
        Self { data, parents }
    }
}

/// Encoded event: CID, canonical bytes and decoded value
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventBlock<T> {
    /// Content identifier of `bytes`
    pub cid: IpldCid,
    /// Canonical DAG-CBOR bytes
    pub bytes: Bytes,
    /// Decoded event
    pub value: Event<T>,
}

impl<T: Serialize> EventBlock<T> {
    /// Encode a new event with the given parents
    pub fn create(data: T, parents: Vec<IpldCid>) -> Result<Self> {
        let value = Event::new(data, parents);
        let (cid, bytes) = util::encode(&value)?;
        Ok(Self { cid, bytes, value })
    }
}

impl<T: DeserializeOwned> EventBlock<T> {
    /// Decode event bytes
    pub fn decode(cid: IpldCid, bytes: Bytes) -> Result<Self> {
        let value: Event<T> = serde_ipld_dagcbor::from_slice(&bytes)
            .map_err(|e| PailError::decode(e).with_context(format!("event {}", cid)))?;
        Ok(Self { cid, bytes, value })
    }
}

/// Fetches and decodes event blocks with payload type `T`
#[derive(Debug)]
pub struct EventFetcher<S, T> {
    blocks: S,
    _data: PhantomData<fn() -> T>,
}

impl<S: Clone, T> Clone for EventFetcher<S, T> {
    fn clone(&self) -> Self {
        Self {
            blocks: self.blocks.clone(),
            _data: PhantomData,
        }
    }
}

impl<S: BlockFetcher + Sync, T: DeserializeOwned> EventFetcher<S, T> {
    /// Wrap a block fetcher
    pub fn new(blocks: S) -> Self {
        Self {
            blocks,
            _data: PhantomData,
        }
    }

    /// Fetch and decode an event, failing if the block is not available
    pub async fn get(&self, cid: &IpldCid) -> Result<EventBlock<T>> {
        self.try_get(cid)
            .await?
            .ok_or_else(|| PailError::missing_block("event", cid))
    }

    /// Fetch and decode an event, returning `None` if the block is not available
    pub async fn try_get(&self, cid: &IpldCid) -> Result<Option<EventBlock<T>>> {
        match self.blocks.get(cid).await? {
            Some(bytes) => Ok(Some(EventBlock::decode(*cid, bytes)?)),
            None => Ok(None),
        }
    }
}
