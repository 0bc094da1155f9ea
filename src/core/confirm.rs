//! Fork choice and confirmation walk over the pending buffer.

use std::collections::HashMap;

use num_bigint::BigUint;
use num_traits::Zero;

use crate::core::preheaders::PreHeaders;
use crate::core::types::Header;

/// Work summed along `hash`'s ancestry inside the pending buffer.
///
/// Results are memoized per hash so that scoring every entry stays linear.
pub fn chain_work(pre: &PreHeaders, memo: &mut HashMap<String, BigUint>, hash: &str) -> BigUint {
    let mut path = Vec::new();
    let mut cursor = hash.to_string();
    let mut base = BigUint::zero();

    loop {
        if let Some(work) = memo.get(&cursor) {
            base = work.clone();
            break;
        }
        match pre.get(&cursor) {
            Some(header) => {
                let parent = hex::encode(header.prev_hash);
                path.push((cursor, header.work()));
                cursor = parent;
            }
            None => break,
        }
    }

    for (key, work) in path.into_iter().rev() {
        base += work;
        memo.insert(key, base.clone());
    }
    base
}

/// Whether `hash`'s pending ancestry reaches `anchor_hash`.
///
/// The walk ends at the first hash missing from the buffer or at the first entry at
/// or below `highest_height`; the branch is connected when that hash is the anchor.
pub fn reaches_anchor(
    pre: &PreHeaders,
    memo: &mut HashMap<String, bool>,
    hash: &str,
    highest_height: u64,
    anchor_hash: &str,
) -> bool {
    let mut path = Vec::new();
    let mut cursor = hash.to_string();

    let connected = loop {
        if let Some(connected) = memo.get(&cursor) {
            break *connected;
        }
        match pre.get(&cursor) {
            Some(header) if header.height > highest_height => {
                let parent = hex::encode(header.prev_hash);
                path.push(cursor);
                cursor = parent;
            }
            _ => break cursor == anchor_hash,
        }
    };

    for key in path {
        memo.insert(key, connected);
    }
    connected
}

/// Pick the pending tip among the branches that reach the anchor: greatest height,
/// then greatest cumulative work, then the greatest hash so the choice never depends
/// on iteration order.
pub fn select_tip<'a>(
    pre: &'a PreHeaders,
    highest_height: u64,
    anchor_hash: &str,
) -> Option<(&'a String, &'a Header)> {
    let mut work_memo = HashMap::new();
    let mut link_memo = HashMap::new();
    let mut best: Option<(&String, &Header, BigUint)> = None;
    let mut detached = 0usize;

    for (hash, header) in pre.iter() {
        if header.height <= highest_height {
            continue;
        }
        if !reaches_anchor(pre, &mut link_memo, hash, highest_height, anchor_hash) {
            detached += 1;
            continue;
        }
        let work = chain_work(pre, &mut work_memo, hash);
        let better = match &best {
            None => true,
            Some((best_hash, best_header, best_work)) => {
                (header.height, &work, hash) > (best_header.height, best_work, *best_hash)
            }
        };
        if better {
            best = Some((hash, header, work));
        }
    }

    if detached > 0 {
        tracing::warn!("Ignoring {} pending headers detached from {}", detached, anchor_hash);
    }
    best.map(|(hash, header, _)| (hash, header))
}

/// Collect the headers buried at least `validity_depth` deep under the tip, lowest first.
///
/// The tip sits at depth 0. The walk follows parent hashes downwards until it leaves
/// the buffer or meets an entry at or below `highest_height`, which is already part
/// of the confirmed record. Since the tip reaches the anchor, the lowest candidate
/// always builds on `anchor_hash`.
pub fn collect_confirmable(
    pre: &PreHeaders,
    validity_depth: u64,
    highest_height: u64,
    anchor_hash: &str,
) -> Vec<(String, Header)> {
    let Some((tip_hash, tip)) = select_tip(pre, highest_height, anchor_hash) else {
        return Vec::new();
    };
    tracing::debug!("Pending tip {} at height {}", tip_hash, tip.height);

    let mut candidates = Vec::new();
    let mut depth = 0u64;
    let mut cursor = tip_hash.clone();

    while let Some(header) = pre.get(&cursor).filter(|h| h.height > highest_height) {
        let parent = hex::encode(header.prev_hash);
        if depth >= validity_depth {
            candidates.push((cursor, header.clone()));
        }
        depth += 1;
        cursor = parent;
    }

    candidates.reverse();
    candidates
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(n: u8) -> String {
        hex::encode([n; 32])
    }

    fn header(parent: u8, height: u64, target_shift: usize) -> Header {
        let target = BigUint::from(0xFFFFu32) << target_shift;
        Header {
            prev_hash: [parent; 32],
            timestamp: 0,
            merkle_root: [0u8; 32],
            period_target: target.clone(),
            raw_target: target,
            height,
            raw: String::new(),
        }
    }

    /// Linear chain 1 <- 2 <- ... <- n built on top of anchor 0.
    fn linear(n: u8) -> PreHeaders {
        let mut pre = PreHeaders::new();
        for i in 1..=n {
            pre.insert(key(i), header(i - 1, i as u64, 208));
        }
        pre
    }

    #[test]
    fn test_tip_is_highest() {
        let pre = linear(5);
        let (hash, tip) = select_tip(&pre, 0, &key(0)).unwrap();
        assert_eq!(hash, &key(5));
        assert_eq!(tip.height, 5);
    }

    #[test]
    fn test_equal_height_prefers_more_work() {
        let mut pre = linear(2);
        // Two competing children of 2; 0xB0 carries a harder target.
        pre.insert(key(0xA0), header(2, 3, 208));
        pre.insert(key(0xB0), header(2, 3, 200));
        let (hash, _) = select_tip(&pre, 0, &key(0)).unwrap();
        assert_eq!(hash, &key(0xB0));
    }

    #[test]
    fn test_full_tie_breaks_on_hash() {
        let mut pre = linear(2);
        pre.insert(key(0xB0), header(2, 3, 208));
        pre.insert(key(0xA0), header(2, 3, 208));
        let (hash, _) = select_tip(&pre, 0, &key(0)).unwrap();
        assert_eq!(hash, &key(0xB0));
    }

    #[test]
    fn test_chain_work_accumulates() {
        let pre = linear(4);
        let mut memo = HashMap::new();
        assert_eq!(chain_work(&pre, &mut memo, &key(4)), BigUint::from(4u32));
        assert_eq!(memo.get(&key(2)), Some(&BigUint::from(2u32)));
        assert_eq!(chain_work(&pre, &mut memo, &key(0)), BigUint::zero());
    }

    #[test]
    fn test_depth_zero_confirms_tip() {
        let pre = linear(3);
        let heights: Vec<u64> = collect_confirmable(&pre, 0, 0, &key(0)).iter().map(|(_, h)| h.height).collect();
        assert_eq!(heights, vec![1, 2, 3]);
    }

    #[test]
    fn test_validity_depth_holds_back_top() {
        let pre = linear(9);
        let heights: Vec<u64> = collect_confirmable(&pre, 6, 0, &key(0)).iter().map(|(_, h)| h.height).collect();
        assert_eq!(heights, vec![1, 2, 3]);
    }

    #[test]
    fn test_walk_stops_at_confirmed_height() {
        let pre = linear(6);
        let heights: Vec<u64> = collect_confirmable(&pre, 1, 3, &key(3)).iter().map(|(_, h)| h.height).collect();
        assert_eq!(heights, vec![4, 5]);
    }

    #[test]
    fn test_shallow_buffer_confirms_nothing() {
        let pre = linear(2);
        assert!(collect_confirmable(&pre, 6, 0, &key(0)).is_empty());
        assert!(collect_confirmable(&PreHeaders::new(), 0, 0, &key(0)).is_empty());
    }

    #[test]
    fn test_detached_branch_is_never_tip() {
        // 1 <- 2 <- 3 confirmed up to 3; a stale branch 0xC4 <- 0xC5 <- 0xC6 hangs off
        // a pruned header and is taller than the live branch 4.
        let mut pre = linear(4);
        pre.insert(key(0xC5), header(0xC4, 5, 208));
        pre.insert(key(0xC6), header(0xC5, 6, 208));

        let (hash, _) = select_tip(&pre, 3, &key(3)).unwrap();
        assert_eq!(hash, &key(4));
        let heights: Vec<u64> = collect_confirmable(&pre, 0, 3, &key(3)).iter().map(|(_, h)| h.height).collect();
        assert_eq!(heights, vec![4]);
    }

    #[test]
    fn test_no_connected_branch_confirms_nothing() {
        let mut pre = PreHeaders::new();
        pre.insert(key(0xC5), header(0xC4, 5, 208));
        assert!(select_tip(&pre, 3, &key(3)).is_none());
        assert!(collect_confirmable(&pre, 0, 3, &key(3)).is_empty());
    }

    #[test]
    fn test_reaches_anchor_through_pending_entry() {
        // The anchor itself may still sit in the buffer at the confirmed height.
        let pre = linear(3);
        let mut memo = HashMap::new();
        assert!(reaches_anchor(&pre, &mut memo, &key(3), 1, &key(1)));
        assert_eq!(memo.get(&key(2)), Some(&true));
        assert!(!reaches_anchor(&pre, &mut HashMap::new(), &key(3), 1, &key(0xEE)));
    }
}
