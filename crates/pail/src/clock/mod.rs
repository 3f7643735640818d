//! Merkle clock
//!
//! An append-only causal history of events. Each event links to the head
//! events its writer had seen; the head is the set of events no other known
//! event descends from. More than one head event means unmerged concurrent
//! branches.

pub mod ancestor;
pub mod event;

pub use ancestor::{find_common_ancestor, find_sorted_events};
pub use event::{Event, EventBlock, EventFetcher};

use std::collections::{HashSet, VecDeque};

use cid::Cid as IpldCid;
use ipld_core::ipld::Ipld;

use crate::error::Result;
use crate::storage::BlockFetcher;

/// Advance the clock head with a new event
///
/// Head members the event descends from are dropped and the event is appended
/// once after the survivors. If the event is already in the head, or is an
/// ancestor of some head member, the head is returned unchanged. Otherwise the
/// event starts a new concurrent branch alongside the existing head.
///
/// Ancestry is checked by walking parents; blocks that are not available are
/// treated as unknown, so events whose history has not fully arrived are still
/// accepted.
pub async fn advance<S: BlockFetcher + Sync>(
    blocks: S,
    head: &[IpldCid],
    event: &IpldCid,
) -> Result<Vec<IpldCid>> {
    if head.contains(event) {
        return Ok(head.to_vec());
    }

    let events = EventFetcher::<S, Ipld>::new(blocks);

    let mut survivors = Vec::with_capacity(head.len() + 1);
    let mut superseded = false;
    for h in head {
        if contains(&events, event, h).await? {
            superseded = true;
        } else {
            survivors.push(*h);
        }
    }

    if superseded {
        survivors.push(*event);
        tracing::debug!(%event, head = survivors.len(), "advanced head");
        return Ok(survivors);
    }

    for h in head {
        if contains(&events, h, event).await? {
            tracing::trace!(%event, "event already in history");
            return Ok(head.to_vec());
        }
    }

    let mut next = head.to_vec();
    next.push(*event);
    tracing::debug!(%event, head = next.len(), "new concurrent head");
    Ok(next)
}

/// Check if event `a` descends from (or is) event `b`
pub async fn contains<S: BlockFetcher + Sync>(
    events: &EventFetcher<S, Ipld>,
    a: &IpldCid,
    b: &IpldCid,
) -> Result<bool> {
    if a == b {
        return Ok(true);
    }

    let Some(aevent) = events.try_get(a).await? else {
        return Ok(false);
    };

    let mut links: VecDeque<IpldCid> = aevent.value.parents.into_iter().collect();
    let mut seen = HashSet::new();

    while let Some(link) = links.pop_front() {
        if link == *b {
            return Ok(true);
        }
        if !seen.insert(link) {
            continue;
        }
        if let Some(event) = events.try_get(&link).await? {
            links.extend(event.value.parents);
        }
    }

    Ok(false)
}
