//! Vector clock keyed by datacenter.
//!
//! Each partition reports, per datacenter, the commit time up to which it has
//! received every transaction from that datacenter. Collapsing clocks across
//! partitions and nodes with a pointwise minimum yields the time below which
//! reads are safe everywhere.

use crate::ids::DcId;
use crate::lattice::Lattice;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A vector clock mapping datacenters to times.
///
/// A missing key reads as 0 through [`VectorClock::get`], but it is kept
/// distinct from an explicit 0 by [`VectorClock::entry`]: merges treat a
/// missing key as "no information" rather than as a lower bound.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VectorClock {
    entries: BTreeMap<DcId, u64>,
}

impl VectorClock {
    /// Create an empty vector clock.
    pub fn new() -> Self {
        VectorClock {
            entries: BTreeMap::new(),
        }
    }

    /// Create a vector clock from `(dc, time)` pairs.
    pub fn from_entries(entries: impl IntoIterator<Item = (DcId, u64)>) -> Self {
        VectorClock {
            entries: entries.into_iter().collect(),
        }
    }

    /// Time for a datacenter, 0 if absent.
    pub fn get(&self, dc: &DcId) -> u64 {
        self.entry(dc).unwrap_or(0)
    }

    /// Time for a datacenter, `None` if absent.
    pub fn entry(&self, dc: &DcId) -> Option<u64> {
        self.entries.get(dc).copied()
    }

    /// Overwrite the time for a datacenter.
    pub fn set(&mut self, dc: DcId, time: u64) {
        self.entries.insert(dc, time);
    }

    /// Raise the time for a datacenter; lower values are ignored.
    pub fn advance(&mut self, dc: DcId, time: u64) {
        let current = self.entries.entry(dc).or_insert(time);
        *current = (*current).max(time);
    }

    /// Merge with another clock (pointwise max).
    pub fn merge(&mut self, other: &VectorClock) {
        for (dc, &time) in &other.entries {
            self.advance(dc.clone(), time);
        }
    }

    /// Create a merged clock without modifying self.
    pub fn merged_with(&self, other: &VectorClock) -> VectorClock {
        let mut result = self.clone();
        result.merge(other);
        result
    }

    /// Pointwise minimum over the keys present in either clock.
    ///
    /// A key present in only one clock keeps that clock's time, so the empty
    /// clock is the identity of this operation.
    pub fn meet_present(&self, other: &VectorClock) -> VectorClock {
        let mut result = self.clone();
        for (dc, &time) in &other.entries {
            result
                .entries
                .entry(dc.clone())
                .and_modify(|current| *current = (*current).min(time))
                .or_insert(time);
        }
        result
    }

    /// Iterate over all entries.
    pub fn iter(&self) -> impl Iterator<Item = (&DcId, &u64)> {
        self.entries.iter()
    }

    /// Number of datacenters tracked.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the clock is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Lattice for VectorClock {
    fn bottom() -> Self {
        Self::new()
    }

    fn join(&self, other: &Self) -> Self {
        self.merged_with(other)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vc(entries: &[(&str, u64)]) -> VectorClock {
        VectorClock::from_entries(entries.iter().map(|(dc, t)| (DcId::new(*dc), *t)))
    }

    #[test]
    fn test_vector_clock_basic() {
        let mut clock = VectorClock::new();
        assert_eq!(clock.get(&DcId::new("dc1")), 0);
        assert_eq!(clock.entry(&DcId::new("dc1")), None);

        clock.set(DcId::new("dc1"), 0);
        assert_eq!(clock.entry(&DcId::new("dc1")), Some(0));

        clock.advance(DcId::new("dc1"), 7);
        clock.advance(DcId::new("dc1"), 3);
        assert_eq!(clock.get(&DcId::new("dc1")), 7);
    }

    #[test]
    fn test_vector_clock_order() {
        let a = vc(&[("dc1", 5), ("dc2", 3)]);
        let b = vc(&[("dc1", 3), ("dc2", 3)]);
        let c = vc(&[("dc1", 3), ("dc2", 5)]);

        assert!(b.leq(&a));
        assert!(!a.leq(&b));
        assert!(!a.leq(&c) && !c.leq(&a));
    }

    #[test]
    fn test_meet_present_keeps_one_sided_keys() {
        let a = vc(&[("dc1", 10), ("dc2", 5)]);
        let b = vc(&[("dc1", 5), ("dc3", 8)]);

        let met = a.meet_present(&b);
        assert_eq!(met, vc(&[("dc1", 5), ("dc2", 5), ("dc3", 8)]));
        assert_eq!(a.meet_present(&VectorClock::new()), a);
    }

    #[test]
    fn test_merge_is_pointwise_max() {
        let a = vc(&[("dc1", 5), ("dc2", 3)]);
        let b = vc(&[("dc1", 3), ("dc2", 7)]);
        assert_eq!(a.merged_with(&b), vc(&[("dc1", 5), ("dc2", 7)]));
        assert!(a.leq(&a.join(&b)));
    }

    #[test]
    fn test_vector_clock_serialization() {
        let clock = vc(&[("dc1", 5), ("dc2", 10)]);
        let json = serde_json::to_string(&clock).unwrap();
        let decoded: VectorClock = serde_json::from_str(&json).unwrap();
        assert_eq!(clock, decoded);
    }
}
