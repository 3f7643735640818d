//! Sharded content-addressed key/value storage
//!
//! This crate provides a key/value bucket built from immutable, hash-linked
//! blocks:
//!
//! - **Shards**: A prefix-sharded trie mapping printable string keys to CIDs
//! - **Merkle clock**: A causal history of events for replicating mutations
//! - **CRDT**: Resolves a single effective trie root from concurrent clock heads
//! - **Diff/merge**: Key and block level differences between tries, and N-way merges
//! - **Storage**: Pluggable block fetching with in-memory and layered implementations
//!
//! # Design Philosophy
//!
//! - Operations never mutate blocks; every mutation returns a new root plus a
//!   patch of added and removed blocks
//! - Storage is read-only from the crate's point of view; callers persist patches
//! - Deterministic encoding, so equal contents always produce equal CIDs
//!
//! # Example
//!
//! ```rust,ignore
//! use pail::shard::{ShardBlock, ShardConfig, PutOptions, tree};
//! use pail::MemoryBlockStore;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let storage = MemoryBlockStore::new();
//! let empty = ShardBlock::create(ShardConfig::default())?;
//! storage.put_block(empty.cid, empty.bytes.clone())?;
//!
//! let value = /* ... */;
//! let patch = tree::put(&storage, &empty.cid, "app/settings", value, &PutOptions::default()).await?;
//! storage.apply_patch(
//!     patch.additions.iter().map(|b| (b.cid, b.bytes.clone())),
//!     patch.removals.iter().map(|b| b.cid),
//! )?;
//!
//! if let Some(value) = tree::get(&storage, &patch.root, "app/settings").await? {
//!     println!("Found: {}", value);
//! }
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

/// Merkle clock events, head advancement and causal ordering
pub mod clock;
/// Key/value bucket over a merkle clock
pub mod crdt;
pub mod error;
/// Prefix-sharded trie
pub mod shard;
/// Block fetching abstraction
pub mod storage;

pub use crdt::{CrdtResult, EventData, RootResult};
pub use error::{ClockError, PailError, PailErrorKind, Result, ShardError};
pub use shard::diff::difference;
pub use shard::merge::merge;
pub use shard::{EntriesOptions, PutOptions, ShardBlock, ShardDifference, ShardPatch};
pub use storage::{BlockFetcher, LayeredFetcher, MemoryBlockStore};

/// DAG-CBOR codec identifier for CIDs (0x71)
pub const DAG_CBOR_CID_CODEC: u64 = 0x71;

/// SHA2-256 multihash code (0x12)
pub const SHA2_256: u64 = 0x12;
