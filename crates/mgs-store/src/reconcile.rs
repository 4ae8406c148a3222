//! Churn reconciliation.
//!
//! When nodes or partitions join or leave, the summary stores are brought in
//! line with a fresh membership list: newcomers get a placeholder entry so
//! that merges see a defined identity value instead of a hole, and entries for
//! ids that left are dropped.

use crate::summary::SummaryStore;
use std::collections::HashSet;
use std::fmt::Debug;
use std::hash::Hash;
use tracing::{debug, trace};

/// Ids touched by one reconciliation pass.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReconcileReport<K> {
    /// Ids that received a placeholder.
    pub added: Vec<K>,
    /// Ids whose entry was dropped.
    pub removed: Vec<K>,
}

impl<K> ReconcileReport<K> {
    /// Nothing was added or removed.
    pub fn is_noop(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

impl<K> Default for ReconcileReport<K> {
    fn default() -> Self {
        ReconcileReport {
            added: Vec::new(),
            removed: Vec::new(),
        }
    }
}

/// Align `store` with `fresh`.
///
/// Every id of `fresh` without an entry receives `placeholder(id)`; every
/// entry whose id is not in `fresh` is removed and handed to `on_remove`. Both
/// sides are decided against one set built from `fresh`, so no id is added and
/// removed in the same pass. Placeholders never count as reported.
pub fn reconcile<K, V, A, R>(
    store: &SummaryStore<K, V>,
    fresh: &[K],
    placeholder: A,
    mut on_remove: R,
) -> ReconcileReport<K>
where
    K: Eq + Hash + Clone + Debug,
    V: Clone,
    A: Fn(&K) -> V,
    R: FnMut(&K, V),
{
    let wanted: HashSet<&K> = fresh.iter().collect();
    let mut report = ReconcileReport::default();

    for &id in &wanted {
        if !store.contains(id) && store.insert_if_absent(id.clone(), placeholder(id)) {
            trace!(id = ?id, "placeholder inserted");
            report.added.push(id.clone());
        }
    }

    for id in store.keys() {
        if wanted.contains(&id) {
            continue;
        }
        if let Some(value) = store.remove(&id) {
            trace!(id = ?id, "entry removed");
            on_remove(&id, value);
            report.removed.push(id);
        }
    }

    if !report.is_noop() {
        debug!(
            added = report.added.len(),
            removed = report.removed.len(),
            "store reconciled"
        );
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use mgs_core::{NodeId, PartitionId};

    #[test]
    fn test_adds_and_removes() {
        let store: SummaryStore<PartitionId, u64> = SummaryStore::new();
        store.put(PartitionId::new(1), 10);
        store.put(PartitionId::new(2), 20);

        let mut dropped = Vec::new();
        let report = reconcile(
            &store,
            &[PartitionId::new(2), PartitionId::new(3)],
            |_| 0,
            |id, value| dropped.push((*id, value)),
        );

        assert_eq!(report.added, vec![PartitionId::new(3)]);
        assert_eq!(report.removed, vec![PartitionId::new(1)]);
        assert_eq!(dropped, vec![(PartitionId::new(1), 10)]);
        assert_eq!(store.get(&PartitionId::new(2), 0), 20);
        assert_eq!(store.get(&PartitionId::new(3), 99), 0);
    }

    #[test]
    fn test_existing_values_are_not_reset() {
        let store: SummaryStore<NodeId, u64> = SummaryStore::new();
        store.put(NodeId::new("b"), 42);

        let report = reconcile(&store, &[NodeId::new("b")], |_| 0, |_, _| {});

        assert!(report.is_noop());
        assert_eq!(store.get(&NodeId::new("b"), 0), 42);
    }

    #[test]
    fn test_duplicate_ids_in_fresh_list() {
        let store: SummaryStore<NodeId, u64> = SummaryStore::new();
        let fresh = vec![NodeId::new("b"), NodeId::new("b")];

        let report = reconcile(&store, &fresh, |_| 0, |_, _| {});

        assert_eq!(report.added, vec![NodeId::new("b")]);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_placeholder_does_not_hide_pending_peer() {
        let store: SummaryStore<NodeId, u64> = SummaryStore::new();
        store.put(NodeId::new("b"), 3);

        let fresh = vec![NodeId::new("b"), NodeId::new("c")];
        reconcile(&store, &fresh, |_| 0, |_, _| {});

        assert!(store.is_reported(&NodeId::new("b")));
        assert_eq!(store.unreported(&fresh), vec![NodeId::new("c")]);
        assert_eq!(reconcile(&store, &[], |_| 0, |_, _| {}).removed.len(), 2);
    }
}
