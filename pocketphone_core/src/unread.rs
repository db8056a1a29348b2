//! Per-peer unread counters with last-viewed timestamps.
//!
//! Every mutation follows the same sequence: update the in-memory maps,
//! persist both maps, then broadcast a full `UnreadSnapshot`. Persistence
//! failures are logged and the in-memory state keeps serving.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::chat::Timestamped;
use crate::clock::Clock;
use crate::events::{Broadcaster, UnreadSnapshot};
use crate::store::{load_json, save_json, StateStore};

pub const UNREAD_COUNTS_KEY: &str = "unread_counts";
pub const LAST_VIEWED_KEY: &str = "unread_last_viewed";

/// How `batch_recompute` treats a peer with no messages newer than its
/// last-viewed time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnreadRecomputePolicy {
    /// Leave the stored count alone when nothing new arrived.
    #[default]
    OverwriteWhenNonzero,
    /// Always replace the stored count, including with zero.
    OverwriteAlways,
}

impl UnreadRecomputePolicy {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "overwrite_when_nonzero" | "nonzero" => Some(Self::OverwriteWhenNonzero),
            "overwrite_always" | "always" => Some(Self::OverwriteAlways),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnreadStats {
    pub total: u64,
    pub peers_with_unread: usize,
    pub counts: BTreeMap<String, u64>,
}

#[derive(Debug, Default)]
struct UnreadState {
    counts: BTreeMap<String, u64>,
    last_viewed: BTreeMap<String, i64>,
}

impl UnreadState {
    fn total(&self) -> u64 {
        self.counts
            .values()
            .fold(0u64, |acc, count| acc.saturating_add(*count))
    }
}

pub struct UnreadTracker {
    state: Mutex<UnreadState>,
    store: Arc<dyn StateStore>,
    clock: Arc<dyn Clock>,
    policy: UnreadRecomputePolicy,
    updates: Broadcaster<UnreadSnapshot>,
}

impl UnreadTracker {
    /// Restore both maps from `store`. Missing or corrupt data starts empty.
    pub fn load(
        store: Arc<dyn StateStore>,
        clock: Arc<dyn Clock>,
        policy: UnreadRecomputePolicy,
    ) -> Self {
        let counts: BTreeMap<String, u64> =
            load_json(store.as_ref(), UNREAD_COUNTS_KEY).unwrap_or_default();
        let last_viewed: BTreeMap<String, i64> =
            load_json(store.as_ref(), LAST_VIEWED_KEY).unwrap_or_default();

        tracing::info!(
            "Unread tracker loaded ({} counters, {} view times)",
            counts.len(),
            last_viewed.len()
        );

        Self {
            state: Mutex::new(UnreadState {
                counts,
                last_viewed,
            }),
            store,
            clock,
            policy,
            updates: Broadcaster::new(),
        }
    }

    pub fn subscribe(&self) -> flume::Receiver<UnreadSnapshot> {
        self.updates.subscribe()
    }

    pub fn policy(&self) -> UnreadRecomputePolicy {
        self.policy
    }

    fn lock_state(&self) -> MutexGuard<'_, UnreadState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(e) => e.into_inner(),
        }
    }

    pub fn increment(&self, peer_id: &str) -> u64 {
        if peer_id.is_empty() {
            return 0;
        }
        let count = {
            let mut state = self.lock_state();
            let count = state.counts.entry(peer_id.to_string()).or_insert(0);
            *count = count.saturating_add(1);
            *count
        };
        tracing::debug!("Unread +1 for {} (now {})", peer_id, count);
        self.commit();
        count
    }

    /// Mark a peer as read now.
    pub fn clear(&self, peer_id: &str) {
        if peer_id.is_empty() {
            return;
        }
        let now = self.clock.now_millis();
        let previous = {
            let mut state = self.lock_state();
            let previous = state.counts.insert(peer_id.to_string(), 0).unwrap_or(0);
            let viewed = state.last_viewed.entry(peer_id.to_string()).or_insert(now);
            *viewed = (*viewed).max(now);
            previous
        };
        tracing::debug!("Cleared unread for {} (was {})", peer_id, previous);
        self.commit();
    }

    /// Overwrite a peer's count; negative values clamp to zero.
    pub fn set_absolute(&self, peer_id: &str, count: i64) {
        if peer_id.is_empty() {
            return;
        }
        let count = count.max(0) as u64;
        self.lock_state().counts.insert(peer_id.to_string(), count);
        self.commit();
    }

    pub fn get(&self, peer_id: &str) -> u64 {
        self.lock_state().counts.get(peer_id).copied().unwrap_or(0)
    }

    pub fn total(&self) -> u64 {
        self.lock_state().total()
    }

    pub fn has_unread(&self, peer_id: &str) -> bool {
        self.get(peer_id) > 0
    }

    pub fn last_viewed(&self, peer_id: &str) -> i64 {
        self.lock_state()
            .last_viewed
            .get(peer_id)
            .copied()
            .unwrap_or(0)
    }

    pub fn stats(&self) -> UnreadStats {
        let state = self.lock_state();
        UnreadStats {
            total: state.total(),
            peers_with_unread: state.counts.values().filter(|c| **c > 0).count(),
            counts: state.counts.clone(),
        }
    }

    /// Recount unread messages per peer from `peer_messages`.
    ///
    /// A message counts when its timestamp is strictly after the peer's
    /// last-viewed time. Under `OverwriteWhenNonzero` a peer with nothing
    /// new keeps its stored count. Persists and broadcasts once, only if
    /// some count changed. Returns whether anything changed.
    pub fn batch_recompute<M: Timestamped>(&self, peer_messages: &HashMap<String, Vec<M>>) -> bool {
        let mut changed = false;
        {
            let mut state = self.lock_state();
            for (peer_id, messages) in peer_messages {
                if peer_id.is_empty() {
                    continue;
                }
                let viewed = state.last_viewed.get(peer_id).copied().unwrap_or(0);
                let fresh = messages
                    .iter()
                    .filter(|m| m.timestamp_millis() > viewed)
                    .count() as u64;

                if fresh == 0 && self.policy == UnreadRecomputePolicy::OverwriteWhenNonzero {
                    continue;
                }

                let stored = state.counts.get(peer_id).copied();
                if stored == Some(fresh) || (stored.is_none() && fresh == 0) {
                    continue;
                }
                state.counts.insert(peer_id.clone(), fresh);
                changed = true;
                tracing::debug!("Peer {} has {} unread after recompute", peer_id, fresh);
            }
        }

        if changed {
            self.commit();
        }
        changed
    }

    pub fn clear_all(&self) {
        self.lock_state().counts.clear();
        tracing::info!("Cleared all unread counters");
        self.commit();
    }

    pub fn snapshot(&self) -> UnreadSnapshot {
        let state = self.lock_state();
        UnreadSnapshot {
            counts: state.counts.clone(),
            total: state.total(),
            timestamp: self.clock.now_millis(),
        }
    }

    /// Write both maps to the store. Failures are logged, never raised.
    pub fn persist(&self) {
        let (counts, last_viewed) = {
            let state = self.lock_state();
            (state.counts.clone(), state.last_viewed.clone())
        };

        if let Err(e) = save_json(self.store.as_ref(), UNREAD_COUNTS_KEY, &counts) {
            tracing::error!("Failed to persist unread counts: {}", e);
        }
        if let Err(e) = save_json(self.store.as_ref(), LAST_VIEWED_KEY, &last_viewed) {
            tracing::error!("Failed to persist last-viewed times: {}", e);
        }
    }

    fn commit(&self) {
        self.persist();
        self.updates.publish(&self.snapshot());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::ChatMessage;
    use crate::clock::ManualClock;
    use crate::store::MemoryStateStore;
    use anyhow::Result;

    fn tracker_with(
        store: Arc<dyn StateStore>,
        policy: UnreadRecomputePolicy,
    ) -> (UnreadTracker, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::at_millis(100));
        let tracker = UnreadTracker::load(store, clock.clone(), policy);
        (tracker, clock)
    }

    fn tracker() -> (UnreadTracker, Arc<ManualClock>) {
        tracker_with(
            Arc::new(MemoryStateStore::new()),
            UnreadRecomputePolicy::OverwriteWhenNonzero,
        )
    }

    fn messages_at(timestamps: &[i64]) -> Vec<ChatMessage> {
        timestamps
            .iter()
            .enumerate()
            .map(|(i, ts)| ChatMessage::new(i, "msg", false, *ts))
            .collect()
    }

    #[test]
    fn increment_creates_and_counts() {
        let (tracker, _) = tracker();
        assert_eq!(tracker.get("p1"), 0);
        tracker.increment("p1");
        tracker.increment("p1");
        tracker.increment("p2");

        assert_eq!(tracker.get("p1"), 2);
        assert_eq!(tracker.total(), 3);
        assert!(tracker.has_unread("p2"));
        assert!(!tracker.has_unread("p3"));
    }

    #[test]
    fn empty_peer_id_is_ignored() {
        let (tracker, _) = tracker();
        let rx = tracker.subscribe();
        tracker.increment("");
        tracker.set_absolute("", 4);
        tracker.clear("");

        assert_eq!(tracker.total(), 0);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn set_absolute_clamps_negative() {
        let (tracker, _) = tracker();
        tracker.set_absolute("p1", 7);
        assert_eq!(tracker.get("p1"), 7);
        tracker.set_absolute("p1", -3);
        assert_eq!(tracker.get("p1"), 0);
    }

    #[test]
    fn clear_resets_and_stamps_view_time() {
        let (tracker, clock) = tracker();
        tracker.set_absolute("p1", 4);
        clock.advance_millis(50);
        tracker.clear("p1");

        assert_eq!(tracker.get("p1"), 0);
        assert_eq!(tracker.last_viewed("p1"), 150);
    }

    #[test]
    fn last_viewed_never_moves_backwards() {
        let store: Arc<dyn StateStore> = Arc::new(MemoryStateStore::new());
        let mut later = BTreeMap::new();
        later.insert("p1".to_string(), 10_000i64);
        save_json(store.as_ref(), LAST_VIEWED_KEY, &later).unwrap();

        let (tracker, _) = tracker_with(store, UnreadRecomputePolicy::OverwriteWhenNonzero);
        tracker.clear("p1");
        assert_eq!(tracker.last_viewed("p1"), 10_000);
    }

    #[test]
    fn clear_then_empty_recompute_stays_zero() {
        let (tracker, clock) = tracker();
        tracker.set_absolute("p1", 3);
        clock.advance_millis(100);
        tracker.clear("p1");

        let mut input = HashMap::new();
        input.insert("p1".to_string(), messages_at(&[50, 120]));
        tracker.batch_recompute(&input);

        assert_eq!(tracker.get("p1"), 0);
    }

    #[test]
    fn recompute_counts_messages_after_last_view() {
        let (tracker, _) = tracker();
        // Clock starts at 100, so this stamps last_viewed = 100.
        tracker.clear("P");
        tracker.set_absolute("P", 9);

        let mut input = HashMap::new();
        input.insert("P".to_string(), messages_at(&[50, 150, 200]));

        assert!(tracker.batch_recompute(&input));
        assert_eq!(tracker.get("P"), 2);
    }

    #[test]
    fn recompute_keeps_stale_count_when_nothing_new() {
        let (tracker, _) = tracker();
        tracker.clear("Q");
        tracker.set_absolute("Q", 5);
        let rx = tracker.subscribe();

        let mut input = HashMap::new();
        input.insert("Q".to_string(), messages_at(&[10, 100]));

        assert!(!tracker.batch_recompute(&input));
        assert_eq!(tracker.get("Q"), 5);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn overwrite_always_policy_zeroes_stale_count() {
        let (tracker, _) = tracker_with(
            Arc::new(MemoryStateStore::new()),
            UnreadRecomputePolicy::OverwriteAlways,
        );
        tracker.clear("Q");
        tracker.set_absolute("Q", 5);

        let mut input = HashMap::new();
        input.insert("Q".to_string(), messages_at(&[10]));

        assert!(tracker.batch_recompute(&input));
        assert_eq!(tracker.get("Q"), 0);
    }

    #[test]
    fn recompute_broadcasts_once_for_many_peers() {
        let (tracker, _) = tracker();
        let rx = tracker.subscribe();

        let mut input = HashMap::new();
        input.insert("a".to_string(), messages_at(&[200]));
        input.insert("b".to_string(), messages_at(&[300, 400]));
        tracker.batch_recompute(&input);

        let snapshot = rx.try_recv().expect("one snapshot");
        assert_eq!(snapshot.total, 3);
        assert_eq!(snapshot.counts["b"], 2);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn every_mutation_broadcasts_full_snapshot() {
        let (tracker, _) = tracker();
        let rx = tracker.subscribe();

        tracker.increment("a");
        tracker.increment("b");
        tracker.clear("a");

        let snapshots: Vec<UnreadSnapshot> = rx.try_iter().collect();
        assert_eq!(snapshots.len(), 3);
        let last = snapshots.last().unwrap();
        assert_eq!(last.counts["a"], 0);
        assert_eq!(last.counts["b"], 1);
        assert_eq!(last.total, 1);
        assert_eq!(last.timestamp, 100);
    }

    #[test]
    fn clear_all_empties_counts_and_stats() {
        let (tracker, _) = tracker();
        tracker.set_absolute("a", 2);
        tracker.set_absolute("b", 0);
        assert_eq!(tracker.stats().peers_with_unread, 1);

        tracker.clear_all();
        let stats = tracker.stats();
        assert_eq!(stats.total, 0);
        assert!(stats.counts.is_empty());
    }

    #[test]
    fn state_is_restored_from_store() {
        let store: Arc<dyn StateStore> = Arc::new(MemoryStateStore::new());
        {
            let (tracker, _) = tracker_with(store.clone(), UnreadRecomputePolicy::default());
            tracker.set_absolute("500002", 4);
            tracker.clear("g7");
        }

        let (restored, _) = tracker_with(store, UnreadRecomputePolicy::default());
        assert_eq!(restored.get("500002"), 4);
        assert_eq!(restored.last_viewed("g7"), 100);
    }

    #[test]
    fn corrupt_store_starts_empty() {
        let store: Arc<dyn StateStore> = Arc::new(MemoryStateStore::new());
        store.set_state(UNREAD_COUNTS_KEY, "[[[").unwrap();

        let (tracker, _) = tracker_with(store, UnreadRecomputePolicy::default());
        assert_eq!(tracker.total(), 0);
    }

    struct FailingStore;

    impl StateStore for FailingStore {
        fn get_state(&self, _key: &str) -> Result<Option<String>> {
            anyhow::bail!("disk unavailable")
        }

        fn set_state(&self, _key: &str, _value: &str) -> Result<()> {
            anyhow::bail!("disk unavailable")
        }
    }

    #[test]
    fn storage_failures_do_not_stop_the_tracker() {
        let (tracker, _) = tracker_with(Arc::new(FailingStore), UnreadRecomputePolicy::default());
        let rx = tracker.subscribe();

        tracker.increment("p1");
        assert_eq!(tracker.get("p1"), 1);
        assert_eq!(rx.try_recv().unwrap().total, 1);
    }

    #[test]
    fn huge_counts_saturate_instead_of_overflowing() {
        let (tracker, _) = tracker();
        let rx = tracker.subscribe();
        for peer in ["a", "b", "c"] {
            tracker.set_absolute(peer, i64::MAX);
        }

        assert_eq!(tracker.total(), u64::MAX);
        assert_eq!(tracker.stats().total, u64::MAX);
        assert_eq!(rx.try_iter().last().unwrap().total, u64::MAX);

        tracker.increment("a");
        assert_eq!(tracker.get("a"), i64::MAX as u64 + 1);
    }

    #[test]
    fn policy_parses_from_text() {
        assert_eq!(
            UnreadRecomputePolicy::parse("overwrite_always"),
            Some(UnreadRecomputePolicy::OverwriteAlways)
        );
        assert_eq!(
            UnreadRecomputePolicy::parse(" Nonzero "),
            Some(UnreadRecomputePolicy::OverwriteWhenNonzero)
        );
        assert_eq!(UnreadRecomputePolicy::parse("sometimes"), None);
    }
}
