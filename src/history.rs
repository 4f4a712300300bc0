//! Packet history (C2): duplicate suppression over recently observed
//! `(src, id)` pairs, grounded on the original's `PacketHistory`.
//!
//! A fixed-capacity LRU ring: `was_seen` both tests and records in one
//! call (mirroring the original's combined check-and-insert), and
//! inserting past capacity evicts the least-recently-observed pair. An
//! entry's position is refreshed on every repeat observation, not just
//! on insertion, so a neighbor that keeps re-announcing the same id
//! (e.g. a HELLO relay loop) stays pinned near the front instead of
//! aging out from underneath an otherwise idle node.
//!
//! `id == 0` is never recorded as seen: it's the sentinel emitted by
//! `PacketCodec` for packets that don't carry a dedup id (HELLO beacons,
//! freshly built control replies before an id is assigned), and treating
//! it as a real id would let every such packet suppress every other one.

use std::collections::VecDeque;

use crate::types::Address;

const WARN_FILL_RATIO: f32 = 0.9;

/// Remembers the last `capacity` distinct `(src, id)` pairs seen.
pub struct PacketHistory {
    capacity: usize,
    // Most-recently-seen at the back, least-recently-seen at the front.
    entries: VecDeque<(Address, u32)>,
    warned_near_capacity: bool,
}

impl PacketHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: VecDeque::with_capacity(capacity),
            warned_near_capacity: false,
        }
    }

    /// Returns `true` if `(src, id)` was already recorded (a duplicate to
    /// drop); otherwise records it and returns `false`. `id == 0` is
    /// never a duplicate and is never recorded.
    pub fn was_seen(&mut self, src: Address, id: u32) -> bool {
        if id == 0 {
            return false;
        }

        if let Some(pos) = self.entries.iter().position(|&e| e == (src, id)) {
            let entry = self.entries.remove(pos).expect("position just located");
            self.entries.push_back(entry);
            return true;
        }

        if self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back((src, id));

        let fill_ratio = self.entries.len() as f32 / self.capacity as f32;
        if fill_ratio >= WARN_FILL_RATIO && !self.warned_near_capacity {
            log::warn!(
                "packet history at {:.0}% of capacity ({}/{}); older duplicates may no longer be suppressed",
                fill_ratio * 100.0,
                self.entries.len(),
                self.capacity
            );
            self.warned_near_capacity = true;
        } else if fill_ratio < WARN_FILL_RATIO {
            self.warned_near_capacity = false;
        }

        false
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_observation_is_not_a_duplicate() {
        let mut history = PacketHistory::new(4);
        assert!(!history.was_seen(1, 10));
    }

    #[test]
    fn repeat_observation_is_a_duplicate() {
        let mut history = PacketHistory::new(4);
        assert!(!history.was_seen(1, 10));
        assert!(history.was_seen(1, 10));
    }

    #[test]
    fn zero_id_is_never_a_duplicate() {
        let mut history = PacketHistory::new(4);
        assert!(!history.was_seen(1, 0));
        assert!(!history.was_seen(1, 0));
        assert_eq!(history.len(), 0);
    }

    #[test]
    fn different_sources_with_same_id_are_distinct() {
        let mut history = PacketHistory::new(4);
        assert!(!history.was_seen(1, 10));
        assert!(!history.was_seen(2, 10));
    }

    #[test]
    fn evicts_least_recently_seen_past_capacity() {
        let mut history = PacketHistory::new(2);
        history.was_seen(1, 1);
        history.was_seen(1, 2);
        history.was_seen(1, 3); // evicts (1, 1)
        assert!(!history.was_seen(1, 1));
        assert!(history.was_seen(1, 2));
    }

    #[test]
    fn repeat_observation_refreshes_recency() {
        let mut history = PacketHistory::new(2);
        history.was_seen(1, 1);
        history.was_seen(1, 2);
        history.was_seen(1, 1); // refresh 1, now 2 is the oldest
        history.was_seen(1, 3); // evicts (1, 2), not (1, 1)
        assert!(history.was_seen(1, 1));
        assert!(!history.was_seen(1, 2));
    }
}
