//! Concurrent summary stores.

use dashmap::DashMap;
use mgs_core::{NodeId, PartitionId};
use std::collections::HashMap;
use std::hash::Hash;

/// Latest value per local partition.
pub type LocalSummaryStore<V> = SummaryStore<PartitionId, V>;

/// Last summary received per peer node.
pub type RemoteSummaryStore<V> = SummaryStore<NodeId, V>;

/// A key/value table with per-key atomic upsert, lookup and delete.
///
/// Each entry remembers whether it was written by its owner through
/// [`SummaryStore::put`] or only holds a placeholder from
/// [`SummaryStore::insert_if_absent`]. Reads of the whole table
/// ([`SummaryStore::snapshot`]) observe some interleaving of concurrent
/// writes; no cross-key consistency is promised.
pub struct SummaryStore<K, V>
where
    K: Eq + Hash,
{
    entries: DashMap<K, Slot<V>>,
}

struct Slot<V> {
    value: V,
    reported: bool,
}

impl<K, V> SummaryStore<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    /// Create an empty store.
    pub fn new() -> Self {
        SummaryStore {
            entries: DashMap::new(),
        }
    }

    /// Upsert the value for `key` and mark it reported.
    pub fn put(&self, key: K, value: V) {
        self.entries.insert(
            key,
            Slot {
                value,
                reported: true,
            },
        );
    }

    /// The value for `key`, or `default` if absent.
    pub fn get(&self, key: &K, default: V) -> V {
        self.entries
            .get(key)
            .map(|slot| slot.value.clone())
            .unwrap_or(default)
    }

    /// Delete the entry for `key`, returning it if it was present.
    pub fn remove(&self, key: &K) -> Option<V> {
        self.entries.remove(key).map(|(_, slot)| slot.value)
    }

    /// Insert a placeholder `value` only if `key` is absent. Returns whether
    /// it was inserted.
    ///
    /// A concurrent `put` for the same key is never overwritten.
    pub fn insert_if_absent(&self, key: K, value: V) -> bool {
        match self.entries.entry(key) {
            dashmap::mapref::entry::Entry::Occupied(_) => false,
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                vacant.insert(Slot {
                    value,
                    reported: false,
                });
                true
            }
        }
    }

    /// Check whether `key` has an entry.
    pub fn contains(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    /// Whether `key` holds a value written through [`put`](Self::put).
    pub fn is_reported(&self, key: &K) -> bool {
        self.entries
            .get(key)
            .map(|slot| slot.reported)
            .unwrap_or(false)
    }

    /// The ids of `keys` that are absent or still hold a placeholder.
    pub fn unreported(&self, keys: &[K]) -> Vec<K> {
        keys.iter()
            .filter(|key| !self.is_reported(key))
            .cloned()
            .collect()
    }

    /// Copy of every entry.
    pub fn snapshot(&self) -> HashMap<K, V> {
        self.entries
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().value.clone()))
            .collect()
    }

    /// Every key currently present.
    pub fn keys(&self) -> Vec<K> {
        self.entries.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K, V> Default for SummaryStore<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}
