//! Scalar global stable time.
//!
//! Instead of one time per datacenter, each partition reports a single
//! physical time below which it has seen everything. The cluster-wide value is
//! the minimum over every reporting partition of every node.

use crate::feed::FeedBehavior;
use crate::ids::{NodeId, PartitionId};
use crate::lattice::Lattice;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Feed name under which nodes register [`GlobalStableTimeFeed`].
pub const GLOBAL_STABLE_TIME_FEED: &str = "global_stable_time";

/// A global stable time, unset until some partition reports.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GlobalTime(Option<u64>);

impl GlobalTime {
    pub fn unset() -> Self {
        GlobalTime(None)
    }

    pub fn at(time: u64) -> Self {
        GlobalTime(Some(time))
    }

    pub fn time(&self) -> Option<u64> {
        self.0
    }

    /// Minimum of two times; an unset side does not bound the result.
    pub fn meet_present(&self, other: &GlobalTime) -> GlobalTime {
        match (self.0, other.0) {
            (Some(a), Some(b)) => GlobalTime(Some(a.min(b))),
            (Some(a), None) | (None, Some(a)) => GlobalTime(Some(a)),
            (None, None) => GlobalTime(None),
        }
    }
}

impl Lattice for GlobalTime {
    fn bottom() -> Self {
        GlobalTime::unset()
    }

    fn join(&self, other: &Self) -> Self {
        match (self.0, other.0) {
            (Some(a), Some(b)) => GlobalTime(Some(a.max(b))),
            (Some(a), None) | (None, Some(a)) => GlobalTime(Some(a)),
            (None, None) => GlobalTime(None),
        }
    }
}

/// Feed computing the scalar global stable time.
#[derive(Clone, Copy, Debug, Default)]
pub struct GlobalStableTimeFeed;

impl FeedBehavior for GlobalStableTimeFeed {
    type Value = GlobalTime;
    type Key = ();
    type Entry = u64;

    fn default_value(&self) -> GlobalTime {
        GlobalTime::unset()
    }

    fn initial_local(&self) -> GlobalTime {
        GlobalTime::unset()
    }

    fn initial_stable(&self) -> GlobalTime {
        GlobalTime::unset()
    }

    fn merge_local(&self, local: &HashMap<PartitionId, GlobalTime>) -> GlobalTime {
        local
            .values()
            .fold(GlobalTime::unset(), |acc, time| acc.meet_present(time))
    }

    fn merge_remote(&self, remote: &HashMap<NodeId, GlobalTime>) -> GlobalTime {
        remote
            .values()
            .fold(GlobalTime::unset(), |acc, time| acc.meet_present(time))
    }

    fn is_advance(&self, previous: Option<&u64>, candidate: &u64) -> bool {
        previous.map_or(true, |previous| candidate > previous)
    }

    fn lookup(&self, _key: &(), value: &GlobalTime) -> Option<u64> {
        value.time()
    }

    fn accumulate(&self, _key: (), entry: u64, _acc: GlobalTime) -> GlobalTime {
        GlobalTime::at(entry)
    }

    fn fold<A, G>(&self, value: &GlobalTime, init: A, mut f: G) -> A
    where
        G: FnMut(A, (), &u64) -> A,
    {
        match &value.0 {
            Some(time) => f(init, (), time),
            None => init,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_ignores_unset_partitions() {
        let feed = GlobalStableTimeFeed;
        let mut local = HashMap::new();
        local.insert(PartitionId::new(1), GlobalTime::at(40));
        local.insert(PartitionId::new(2), GlobalTime::unset());
        local.insert(PartitionId::new(3), GlobalTime::at(25));

        assert_eq!(feed.merge_local(&local), GlobalTime::at(25));
    }

    #[test]
    fn test_stabilize_scalar() {
        let feed = GlobalStableTimeFeed;
        let (changed, stable) = feed.stabilize(&GlobalTime::unset(), &GlobalTime::at(10));
        assert!(changed);
        assert_eq!(stable, GlobalTime::at(10));

        let (changed, stable) = feed.stabilize(&stable, &GlobalTime::at(8));
        assert!(!changed);
        assert_eq!(stable, GlobalTime::at(10));

        let (changed, stable) = feed.stabilize(&stable, &GlobalTime::unset());
        assert!(!changed);
        assert_eq!(stable, GlobalTime::at(10));
    }

    #[test]
    fn test_global_time_order() {
        assert!(GlobalTime::unset().leq(&GlobalTime::at(0)));
        assert!(GlobalTime::at(3).leq(&GlobalTime::at(4)));
        assert!(!GlobalTime::at(4).leq(&GlobalTime::at(3)));
    }
}
