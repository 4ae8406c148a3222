//! Per-datacenter stable time.
//!
//! Every partition reports a [`VectorClock`] of the times up to which it has
//! applied remote transactions. A node can only vouch for the least advanced
//! of its partitions, and the cluster can only vouch for the least advanced
//! of its nodes, so both merges are a pointwise minimum. The stable clock
//! then moves each datacenter forward independently.

use crate::feed::FeedBehavior;
use crate::ids::{DcId, NodeId, PartitionId};
use crate::vector_clock::VectorClock;
use std::collections::HashMap;

/// Feed name under which nodes register [`StableTimeFeed`].
pub const STABLE_TIME_FEED: &str = "stable_time";

/// Feed computing the per-DC stable snapshot time.
#[derive(Clone, Copy, Debug, Default)]
pub struct StableTimeFeed;

impl StableTimeFeed {
    fn meet_all<'a>(clocks: impl Iterator<Item = &'a VectorClock>) -> VectorClock {
        clocks.fold(VectorClock::new(), |acc, clock| acc.meet_present(clock))
    }
}

impl FeedBehavior for StableTimeFeed {
    type Value = VectorClock;
    type Key = DcId;
    type Entry = u64;

    fn default_value(&self) -> VectorClock {
        VectorClock::new()
    }

    fn initial_local(&self) -> VectorClock {
        VectorClock::new()
    }

    fn initial_stable(&self) -> VectorClock {
        VectorClock::new()
    }

    fn merge_local(&self, local: &HashMap<PartitionId, VectorClock>) -> VectorClock {
        Self::meet_all(local.values())
    }

    fn merge_remote(&self, remote: &HashMap<NodeId, VectorClock>) -> VectorClock {
        Self::meet_all(remote.values())
    }

    fn is_advance(&self, previous: Option<&u64>, candidate: &u64) -> bool {
        match previous {
            None => true,
            Some(previous) => candidate > previous,
        }
    }

    fn lookup(&self, key: &DcId, value: &VectorClock) -> Option<u64> {
        value.entry(key)
    }

    fn accumulate(&self, key: DcId, entry: u64, mut acc: VectorClock) -> VectorClock {
        acc.set(key, entry);
        acc
    }

    fn fold<A, G>(&self, value: &VectorClock, init: A, mut f: G) -> A
    where
        G: FnMut(A, DcId, &u64) -> A,
    {
        value
            .iter()
            .fold(init, |acc, (dc, time)| f(acc, dc.clone(), time))
    }
}
