//! The capability set a feed owner supplies to the gossip core.
//!
//! The core never inspects a feed's value. It collapses local partition
//! values with [`FeedBehavior::merge_local`], collapses per-node summaries with
//! [`FeedBehavior::merge_remote`], and decides what to publish by walking the
//! candidate key by key with [`FeedBehavior::fold`], comparing each entry
//! against the previous stable value through [`FeedBehavior::lookup`] and
//! [`FeedBehavior::is_advance`], and writing accepted entries back with
//! [`FeedBehavior::accumulate`].
//!
//! Every method must be pure and total: empty maps and values that look
//! inconsistent (a node that has not reported yet, a partition that has just
//! moved) must produce a sensible value, never a panic.

use crate::ids::{NodeId, PartitionId};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt::Debug;

pub trait FeedBehavior: Send + Sync + 'static {
    /// The value stored per partition, per node, and as the stable snapshot.
    type Value: Clone + Debug + PartialEq + Send + Sync + Serialize + DeserializeOwned + 'static;

    /// Key addressing one component of a value.
    type Key: Clone + Debug;

    /// One component of a value.
    type Entry: Clone + Debug;

    /// Placeholder for a peer node seen in membership before it has
    /// broadcast anything. Must be the identity of [`merge_remote`](Self::merge_remote).
    fn default_value(&self) -> Self::Value;

    /// Placeholder for a local partition that has not written yet. Must be
    /// the identity of [`merge_local`](Self::merge_local).
    fn initial_local(&self) -> Self::Value;

    /// Value the stable snapshot holds before the first publication.
    fn initial_stable(&self) -> Self::Value;

    /// Collapse every local partition's value into this node's contribution.
    fn merge_local(&self, local: &HashMap<PartitionId, Self::Value>) -> Self::Value;

    /// Collapse every node's contribution, this node's included.
    fn merge_remote(&self, remote: &HashMap<NodeId, Self::Value>) -> Self::Value;

    /// Whether `candidate` should replace `previous` for one key. `previous`
    /// is `None` when the stable value has no entry for that key.
    fn is_advance(&self, previous: Option<&Self::Entry>, candidate: &Self::Entry) -> bool;

    /// The entry for `key` in `value`, if any.
    fn lookup(&self, key: &Self::Key, value: &Self::Value) -> Option<Self::Entry>;

    /// Store `entry` under `key` in `acc`.
    fn accumulate(&self, key: Self::Key, entry: Self::Entry, acc: Self::Value) -> Self::Value;

    /// Visit every `(key, entry)` of `value`.
    fn fold<A, G>(&self, value: &Self::Value, init: A, f: G) -> A
    where
        G: FnMut(A, Self::Key, &Self::Entry) -> A;

    /// Compare a merged candidate against the last stable value.
    ///
    /// For every key of `candidate`, the candidate's entry is taken when
    /// [`is_advance`](Self::is_advance) accepts it and the previous entry is
    /// kept otherwise. Keys only present in `previous` are kept. Returns
    /// whether any key was taken from the candidate, and the resulting value.
    fn stabilize(&self, previous: &Self::Value, candidate: &Self::Value) -> (bool, Self::Value) {
        self.fold(
            candidate,
            (false, previous.clone()),
            |(changed, acc), key, entry| {
                let old = self.lookup(&key, previous);
                if self.is_advance(old.as_ref(), entry) {
                    (true, self.accumulate(key, entry.clone(), acc))
                } else {
                    (changed, acc)
                }
            },
        )
    }
}
