//! Per-node state of one registered feed.

use mgs_core::{FeedBehavior, FeedName, NodeId, PartitionId};
use mgs_store::{LocalSummaryStore, RemoteSummaryStore, StableSnapshot};
use tracing::trace;

/// What a feed owner hands to [`MetadataNode::register_feed`](crate::MetadataNode::register_feed).
///
/// Placeholders and the first stable value default to what the behaviour
/// reports and can be overridden per registration.
pub struct FeedRegistration<F: FeedBehavior> {
    pub name: FeedName,
    pub behavior: F,
    /// Placeholder for newly observed peer nodes.
    pub default: F::Value,
    /// Placeholder for newly observed local partitions.
    pub initial_local: F::Value,
    pub initial_stable: F::Value,
}

impl<F: FeedBehavior> FeedRegistration<F> {
    pub fn new(name: impl Into<FeedName>, behavior: F) -> Self {
        Self {
            name: name.into(),
            default: behavior.default_value(),
            initial_local: behavior.initial_local(),
            initial_stable: behavior.initial_stable(),
            behavior,
        }
    }

    pub fn with_initial_stable(mut self, value: F::Value) -> Self {
        self.initial_stable = value;
        self
    }
}

/// Stores and published value of one feed on one node.
///
/// Partition owners write through [`Feed::put_local`]; the receive path writes
/// through [`Feed::receive`]; readers call [`Feed::stable`]. Only the gossip
/// state machine publishes.
pub struct Feed<F: FeedBehavior> {
    name: FeedName,
    behavior: F,
    default: F::Value,
    initial_local: F::Value,
    pub(crate) local: LocalSummaryStore<F::Value>,
    pub(crate) remote: RemoteSummaryStore<F::Value>,
    pub(crate) stable: StableSnapshot<F::Value>,
}

impl<F: FeedBehavior> Feed<F> {
    pub fn new(registration: FeedRegistration<F>) -> Self {
        Self {
            name: registration.name,
            behavior: registration.behavior,
            default: registration.default,
            initial_local: registration.initial_local,
            local: LocalSummaryStore::new(),
            remote: RemoteSummaryStore::new(),
            stable: StableSnapshot::new(registration.initial_stable),
        }
    }

    pub fn name(&self) -> &FeedName {
        &self.name
    }

    pub fn behavior(&self) -> &F {
        &self.behavior
    }

    /// Placeholder used for peers.
    pub fn default_value(&self) -> &F::Value {
        &self.default
    }

    /// Placeholder used for local partitions.
    pub fn initial_local(&self) -> &F::Value {
        &self.initial_local
    }

    /// Record the latest value reported by a local partition.
    pub fn put_local(&self, partition: PartitionId, value: F::Value) {
        self.local.put(partition, value);
    }

    pub fn get_local(&self, partition: PartitionId) -> F::Value {
        self.local.get(&partition, self.initial_local.clone())
    }

    pub fn remove_local(&self, partition: PartitionId) -> Option<F::Value> {
        self.local.remove(&partition)
    }

    /// Record the summary last received from `origin`.
    pub fn receive(&self, origin: NodeId, value: F::Value) {
        trace!(feed = %self.name, origin = %origin, "summary received");
        self.remote.put(origin, value);
    }

    pub fn get_remote(&self, node: &NodeId) -> F::Value {
        self.remote.get(node, self.default.clone())
    }

    /// Peers with an entry in the remote store.
    pub fn known_peers(&self) -> Vec<NodeId> {
        let mut peers = self.remote.keys();
        peers.sort();
        peers
    }

    /// The members of `peers` that have not sent a summary yet.
    pub fn pending_peers(&self, peers: &[NodeId]) -> Vec<NodeId> {
        self.remote.unreported(peers)
    }

    /// Last published stable value.
    pub fn stable(&self) -> F::Value {
        self.stable.get()
    }

    /// Number of publications so far.
    pub fn stable_revision(&self) -> u64 {
        self.stable.revision()
    }
}
