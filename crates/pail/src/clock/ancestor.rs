//! Common ancestor search and causal ordering of concurrent events

use std::cmp::Reverse;
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::pin::Pin;

use cid::Cid as IpldCid;
use serde::de::DeserializeOwned;

use super::event::{EventBlock, EventFetcher};
use crate::error::Result;
use crate::storage::BlockFetcher;

/// Find the nearest event that every one of `children` descends from
///
/// One candidate path is kept per child. In rounds, each path is extended by
/// one ancestor step: the single parent of its last event, or for a merge
/// event the common ancestor of its parents. After every step, the first event
/// present in all paths is returned. Returns `None` once no path can be
/// extended, which happens when the children do not share a history.
///
/// A single child is its own common ancestor.
pub fn find_common_ancestor<'a, S, T>(
    events: &'a EventFetcher<S, T>,
    children: &'a [IpldCid],
) -> Pin<Box<dyn Future<Output = Result<Option<IpldCid>>> + Send + 'a>>
where
    S: BlockFetcher + Sync,
    T: DeserializeOwned + Send + 'a,
{
    Box::pin(async move {
        match children {
            [] => return Ok(None),
            [child] => return Ok(Some(*child)),
            _ => {}
        }

        let mut candidates: Vec<Vec<IpldCid>> = children.iter().map(|c| vec![*c]).collect();

        loop {
            let mut changed = false;

            for i in 0..candidates.len() {
                let Some(last) = candidates[i].last().copied() else {
                    continue;
                };
                let Some(candidate) = find_ancestor_candidate(events, &last).await? else {
                    continue;
                };

                changed = true;
                candidates[i].push(candidate);

                if let Some(ancestor) = find_common(&candidates) {
                    tracing::trace!(%ancestor, "found common ancestor");
                    return Ok(Some(ancestor));
                }
            }

            if !changed {
                return Ok(None);
            }
        }
    })
}

/// Next step up the history from `cid`
async fn find_ancestor_candidate<S, T>(
    events: &EventFetcher<S, T>,
    cid: &IpldCid,
) -> Result<Option<IpldCid>>
where
    S: BlockFetcher + Sync,
    T: DeserializeOwned + Send,
{
    let event = events.get(cid).await?;
    match event.value.parents.as_slice() {
        [] => Ok(None),
        [parent] => Ok(Some(*parent)),
        parents => find_common_ancestor(events, parents).await,
    }
}

/// First item present in every list
fn find_common(lists: &[Vec<IpldCid>]) -> Option<IpldCid> {
    lists.iter().enumerate().find_map(|(i, list)| {
        list.iter().copied().find(|item| {
            lists
                .iter()
                .enumerate()
                .all(|(j, other)| i == j || other.contains(item))
        })
    })
}

/// Every event between `head` and `tail` in deterministic replay order
///
/// Each event below a head (excluding `tail` itself) is weighted by the sum of
/// its depths over every path from every head that reaches it. Heavier events
/// come first; equal weights are ordered by the CID's string form.
pub async fn find_sorted_events<S, T>(
    events: &EventFetcher<S, T>,
    head: &[IpldCid],
    tail: &IpldCid,
) -> Result<Vec<EventBlock<T>>>
where
    S: BlockFetcher + Sync,
    T: DeserializeOwned + Clone + Send,
{
    if head == [*tail] {
        return Ok(Vec::new());
    }

    let walks = n0_future::join_all(head.iter().map(|h| find_events(events, h, tail))).await;

    let mut weights: BTreeMap<IpldCid, (EventBlock<T>, usize)> = BTreeMap::new();
    for walk in walks {
        for (event, depth) in walk? {
            weights.entry(event.cid).or_insert((event, 0)).1 += depth;
        }
    }

    let mut sorted: Vec<(EventBlock<T>, usize)> = weights.into_values().collect();
    sorted.sort_by_cached_key(|(event, weight)| (Reverse(*weight), event.cid.to_string()));

    tracing::debug!(%tail, events = sorted.len(), "sorted events for replay");
    Ok(sorted.into_iter().map(|(event, _)| event).collect())
}

/// Walk every path from `start` back to `end`, recording each visit with its depth
///
/// An event reachable by several paths is recorded once per path. `end` is
/// never visited.
async fn find_events<S, T>(
    events: &EventFetcher<S, T>,
    start: &IpldCid,
    end: &IpldCid,
) -> Result<Vec<(EventBlock<T>, usize)>>
where
    S: BlockFetcher + Sync,
    T: DeserializeOwned + Clone + Send,
{
    let mut visits = Vec::new();
    if start == end {
        return Ok(visits);
    }

    let mut fetched: HashMap<IpldCid, EventBlock<T>> = HashMap::new();
    let mut stack = vec![(*start, 0usize)];

    while let Some((cid, depth)) = stack.pop() {
        let event = match fetched.get(&cid) {
            Some(event) => event.clone(),
            None => {
                let event = events.get(&cid).await?;
                fetched.insert(cid, event.clone());
                event
            }
        };

        for parent in &event.value.parents {
            if parent != end {
                stack.push((*parent, depth + 1));
            }
        }
        visits.push((event, depth));
    }

    Ok(visits)
}
