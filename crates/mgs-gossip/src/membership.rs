//! Membership sources.
//!
//! The gossip core never owns membership; it asks a [`Membership`]
//! implementation for the current peers and local partitions whenever a round
//! reconciles. Production wires in the ring; tests inject
//! [`StaticMembership`] or views of a shared [`ClusterDirectory`].

use crate::error::MembershipError;
use mgs_core::{NodeId, PartitionId};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// One consistent read of membership.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MembershipSnapshot {
    /// Peer nodes, self excluded.
    pub nodes: Vec<NodeId>,
    /// Partitions owned by this node.
    pub partitions: Vec<PartitionId>,
    /// Whether membership is expected to keep changing.
    pub will_change: bool,
}

/// Source of cluster membership as seen from one node.
///
/// The two lists may change between calls; no transactional guarantee
/// across them is expected.
pub trait Membership: Send + Sync + 'static {
    /// Peer nodes, self excluded.
    fn peer_nodes(&self) -> Result<Vec<NodeId>, MembershipError>;

    /// Partitions currently owned by this node.
    fn local_partitions(&self) -> Result<Vec<PartitionId>, MembershipError>;

    /// Whether another reconciliation will likely be needed soon.
    fn will_change(&self) -> bool;

    fn snapshot(&self) -> Result<MembershipSnapshot, MembershipError> {
        Ok(MembershipSnapshot {
            nodes: self.peer_nodes()?,
            partitions: self.local_partitions()?,
            will_change: self.will_change(),
        })
    }
}

/// Fixed membership table for a single node.
#[derive(Debug, Default)]
pub struct StaticMembership {
    table: RwLock<MembershipSnapshot>,
    unavailable: AtomicBool,
}

impl StaticMembership {
    pub fn new(nodes: Vec<NodeId>, partitions: Vec<PartitionId>) -> Self {
        Self {
            table: RwLock::new(MembershipSnapshot {
                nodes,
                partitions,
                will_change: false,
            }),
            unavailable: AtomicBool::new(false),
        }
    }

    /// A node alone in the cluster owning `partitions`.
    pub fn solo(partitions: impl IntoIterator<Item = u64>) -> Self {
        Self::new(
            Vec::new(),
            partitions.into_iter().map(PartitionId::new).collect(),
        )
    }

    pub fn set_nodes(&self, nodes: Vec<NodeId>) {
        self.table.write().nodes = nodes;
    }

    pub fn set_partitions(&self, partitions: Vec<PartitionId>) {
        self.table.write().partitions = partitions;
    }

    pub fn add_partition(&self, partition: PartitionId) {
        let mut table = self.table.write();
        if !table.partitions.contains(&partition) {
            table.partitions.push(partition);
        }
    }

    pub fn remove_partition(&self, partition: PartitionId) {
        self.table.write().partitions.retain(|p| *p != partition);
    }

    pub fn set_will_change(&self, will_change: bool) {
        self.table.write().will_change = will_change;
    }

    /// Make every query fail until called again with `false`.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::Release);
    }

    fn check_available(&self) -> Result<(), MembershipError> {
        if self.unavailable.load(Ordering::Acquire) {
            Err(MembershipError::Unavailable(
                "static membership disabled".to_string(),
            ))
        } else {
            Ok(())
        }
    }
}

impl Membership for StaticMembership {
    fn peer_nodes(&self) -> Result<Vec<NodeId>, MembershipError> {
        self.check_available()?;
        Ok(self.table.read().nodes.clone())
    }

    fn local_partitions(&self) -> Result<Vec<PartitionId>, MembershipError> {
        self.check_available()?;
        Ok(self.table.read().partitions.clone())
    }

    fn will_change(&self) -> bool {
        self.table.read().will_change
    }

    fn snapshot(&self) -> Result<MembershipSnapshot, MembershipError> {
        self.check_available()?;
        Ok(self.table.read().clone())
    }
}

/// Shared node → partitions table for an in-process cluster.
#[derive(Clone, Debug, Default)]
pub struct ClusterDirectory {
    owners: Arc<RwLock<BTreeMap<NodeId, Vec<PartitionId>>>>,
    will_change: Arc<AtomicBool>,
}

impl ClusterDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a directory of `nodes` nodes named `node-<i>`, with `partitions`
    /// partitions dealt round-robin.
    pub fn uniform(nodes: usize, partitions: u64) -> Self {
        let directory = Self::new();
        let ids: Vec<NodeId> = (0..nodes).map(|i| NodeId::new(format!("node-{}", i))).collect();
        for id in &ids {
            directory.join(id.clone(), Vec::new());
        }
        if !ids.is_empty() {
            for p in 0..partitions {
                let owner = &ids[(p as usize) % ids.len()];
                directory.assign(PartitionId::new(p), owner);
            }
        }
        directory
    }

    /// Add a node, or replace its partitions if already present.
    pub fn join(&self, node: NodeId, partitions: Vec<PartitionId>) {
        self.owners.write().insert(node, partitions);
    }

    /// Remove a node and every partition it owned.
    pub fn leave(&self, node: &NodeId) -> Option<Vec<PartitionId>> {
        self.owners.write().remove(node)
    }

    /// Make `owner` the only node owning `partition`.
    pub fn assign(&self, partition: PartitionId, owner: &NodeId) {
        let mut owners = self.owners.write();
        for partitions in owners.values_mut() {
            partitions.retain(|p| *p != partition);
        }
        if let Some(partitions) = owners.get_mut(owner) {
            partitions.push(partition);
        }
    }

    pub fn nodes(&self) -> Vec<NodeId> {
        self.owners.read().keys().cloned().collect()
    }

    pub fn partitions_of(&self, node: &NodeId) -> Vec<PartitionId> {
        self.owners.read().get(node).cloned().unwrap_or_default()
    }

    pub fn set_will_change(&self, will_change: bool) {
        self.will_change.store(will_change, Ordering::Release);
    }

    /// Membership as seen from `node`.
    pub fn view(&self, node: NodeId) -> ClusterView {
        ClusterView {
            directory: self.clone(),
            node,
        }
    }
}

/// One node's view of a [`ClusterDirectory`].
#[derive(Clone, Debug)]
pub struct ClusterView {
    directory: ClusterDirectory,
    node: NodeId,
}

impl Membership for ClusterView {
    fn peer_nodes(&self) -> Result<Vec<NodeId>, MembershipError> {
        Ok(self
            .directory
            .owners
            .read()
            .keys()
            .filter(|id| **id != self.node)
            .cloned()
            .collect())
    }

    fn local_partitions(&self) -> Result<Vec<PartitionId>, MembershipError> {
        Ok(self.directory.partitions_of(&self.node))
    }

    fn will_change(&self) -> bool {
        self.directory.will_change.load(Ordering::Acquire)
    }
}
