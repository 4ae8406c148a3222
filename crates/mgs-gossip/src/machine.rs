//! The per-feed gossip state machine.
//!
//! Each round collapses the local partitions into this node's contribution,
//! broadcasts it, merges it with the last summary of every peer, and publishes
//! the merged value wherever it moves the stable snapshot forward.
//!
//! ```text
//!   Idle ──start──▶ Active ──round──▶ Active
//!                      │
//!                      ├─ reconcile (policy / recheck flag)
//!                      ├─ merge_local ─▶ broadcast to peers
//!                      ├─ not ready until every peer has reported
//!                      ├─ merge_remote (peers + self)
//!                      └─ stabilize ─▶ publish if changed
//! ```

use crate::config::ReconcilePolicy;
use crate::feed::Feed;
use crate::membership::Membership;
use crate::transport::{SummaryEnvelope, SummaryTransport};
use mgs_core::{FeedBehavior, NodeId, PartitionId};
use mgs_store::reconcile;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, trace, warn};

/// Lifecycle of a state machine.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MachineState {
    Idle,
    Active,
}

/// What one round observed and decided.
#[derive(Clone, Debug, PartialEq)]
pub struct RoundReport<V> {
    /// Whether the stable snapshot was overwritten.
    pub changed: bool,
    /// Stable value after the round.
    pub stable: V,
    /// This node's merged local value, as broadcast.
    pub local: V,
    /// Merge of every node's contribution.
    pub candidate: V,
    pub peers_contacted: usize,
    pub send_failures: usize,
    /// Whether the round re-read membership.
    pub reconciled: bool,
}

/// Outcome of a round.
#[derive(Clone, Debug, PartialEq)]
pub enum RoundOutcome<V> {
    /// The machine is idle, has no view of the cluster yet, or some peer has
    /// not sent a summary yet; nothing was merged or published.
    NotReady,
    Completed(RoundReport<V>),
}

impl<V> RoundOutcome<V> {
    pub fn is_ready(&self) -> bool {
        matches!(self, RoundOutcome::Completed(_))
    }

    pub fn report(&self) -> Option<&RoundReport<V>> {
        match self {
            RoundOutcome::NotReady => None,
            RoundOutcome::Completed(report) => Some(report),
        }
    }

    /// True only for a completed round that published.
    pub fn changed(&self) -> bool {
        self.report().map(|r| r.changed).unwrap_or(false)
    }
}

struct Control {
    state: MachineState,
    recheck: bool,
    reconciled_once: bool,
    nodes: Vec<NodeId>,
    partitions: Vec<PartitionId>,
}

/// Drives gossip rounds for one feed on one node.
///
/// Rounds take `&self`; the small amount of mutable control state sits behind
/// a mutex that is never held across an await.
pub struct GossipStateMachine<F: FeedBehavior> {
    node_id: NodeId,
    feed: Arc<Feed<F>>,
    membership: Arc<dyn Membership>,
    transport: Arc<dyn SummaryTransport>,
    policy: ReconcilePolicy,
    control: Mutex<Control>,
}

impl<F: FeedBehavior> GossipStateMachine<F> {
    pub fn new(
        node_id: NodeId,
        feed: Arc<Feed<F>>,
        membership: Arc<dyn Membership>,
        transport: Arc<dyn SummaryTransport>,
        policy: ReconcilePolicy,
    ) -> Self {
        Self {
            node_id,
            feed,
            membership,
            transport,
            policy,
            control: Mutex::new(Control {
                state: MachineState::Idle,
                recheck: false,
                reconciled_once: false,
                nodes: Vec::new(),
                partitions: Vec::new(),
            }),
        }
    }

    pub fn node_id(&self) -> &NodeId {
        &self.node_id
    }

    pub fn feed(&self) -> &Arc<Feed<F>> {
        &self.feed
    }

    pub fn state(&self) -> MachineState {
        self.control.lock().state
    }

    /// Move to `Active` and request a reconciliation on the next round.
    pub fn start(&self) {
        let mut control = self.control.lock();
        control.state = MachineState::Active;
        control.recheck = true;
    }

    pub fn stop(&self) {
        self.control.lock().state = MachineState::Idle;
    }

    /// Reconcile on the next round regardless of policy.
    pub fn force_recheck(&self) {
        self.control.lock().recheck = true;
    }

    /// Peers as of the last reconciliation.
    pub fn cached_nodes(&self) -> Vec<NodeId> {
        self.control.lock().nodes.clone()
    }

    /// Local partitions as of the last reconciliation.
    pub fn cached_partitions(&self) -> Vec<PartitionId> {
        self.control.lock().partitions.clone()
    }

    /// Run one round.
    pub async fn round(&self) -> RoundOutcome<F::Value> {
        let (nodes, reconciled) = match self.prepare() {
            Some(prepared) => prepared,
            None => return RoundOutcome::NotReady,
        };

        let behavior = self.feed.behavior();
        let local = behavior.merge_local(&self.feed.local.snapshot());

        let send_failures = self.broadcast(&nodes, &local).await;

        let waiting = self.feed.pending_peers(&nodes);
        if !waiting.is_empty() {
            trace!(
                feed = %self.feed.name(),
                node = %self.node_id,
                waiting = ?waiting,
                "waiting for peer summaries"
            );
            return RoundOutcome::NotReady;
        }

        let mut remote = self.feed.remote.snapshot();
        remote.insert(self.node_id.clone(), local.clone());
        let candidate = behavior.merge_remote(&remote);

        let (changed, stable) = self
            .feed
            .stable
            .advance(|previous| behavior.stabilize(previous, &candidate));

        if changed {
            info!(
                feed = %self.feed.name(),
                node = %self.node_id,
                stable = ?stable,
                "stable value advanced"
            );
        } else {
            trace!(feed = %self.feed.name(), node = %self.node_id, "no advance");
        }

        RoundOutcome::Completed(RoundReport {
            changed,
            stable,
            local,
            candidate,
            peers_contacted: nodes.len(),
            send_failures,
            reconciled,
        })
    }

    /// Reconcile if due. Returns the peer list to broadcast to and whether a
    /// reconciliation ran, or `None` when the round cannot proceed.
    fn prepare(&self) -> Option<(Vec<NodeId>, bool)> {
        let mut control = self.control.lock();
        if control.state == MachineState::Idle {
            return None;
        }

        let due = control.recheck || self.policy == ReconcilePolicy::Always;
        if !due {
            return Some((control.nodes.clone(), false));
        }

        match self.membership.snapshot() {
            Ok(snapshot) => {
                let initial_local = self.feed.initial_local().clone();
                let local = reconcile(
                    &self.feed.local,
                    &snapshot.partitions,
                    |_| initial_local.clone(),
                    |partition, _| trace!(partition = %partition, "partition dropped"),
                );

                let peers: Vec<NodeId> = snapshot
                    .nodes
                    .into_iter()
                    .filter(|node| *node != self.node_id)
                    .collect();
                let default = self.feed.default_value().clone();
                let remote = reconcile(
                    &self.feed.remote,
                    &peers,
                    |_| default.clone(),
                    |node, _| trace!(peer = %node, "peer dropped"),
                );

                if !local.is_noop() || !remote.is_noop() {
                    debug!(
                        feed = %self.feed.name(),
                        node = %self.node_id,
                        partitions_added = local.added.len(),
                        partitions_removed = local.removed.len(),
                        peers_added = remote.added.len(),
                        peers_removed = remote.removed.len(),
                        "membership reconciled"
                    );
                }

                control.nodes = peers;
                control.partitions = snapshot.partitions;
                control.recheck = snapshot.will_change;
                control.reconciled_once = true;
                Some((control.nodes.clone(), true))
            }
            Err(e) => {
                warn!(
                    feed = %self.feed.name(),
                    node = %self.node_id,
                    error = %e,
                    "membership unavailable, using cached lists"
                );
                control.recheck = true;
                if control.reconciled_once {
                    Some((control.nodes.clone(), false))
                } else {
                    None
                }
            }
        }
    }

    /// Send `local` to every peer. Returns the number of failed sends.
    async fn broadcast(&self, nodes: &[NodeId], local: &F::Value) -> usize {
        if nodes.is_empty() {
            return 0;
        }

        let envelope =
            match SummaryEnvelope::encode(self.feed.name().clone(), self.node_id.clone(), local) {
                Ok(envelope) => envelope,
                Err(e) => {
                    warn!(feed = %self.feed.name(), error = %e, "failed to encode summary");
                    return nodes.len();
                }
            };

        let mut failures = 0;
        for peer in nodes {
            if let Err(e) = self.transport.send_summary(peer, envelope.clone()).await {
                warn!(
                    feed = %self.feed.name(),
                    node = %self.node_id,
                    peer = %peer,
                    error = %e,
                    "summary send failed"
                );
                failures += 1;
            }
        }
        failures
    }

    /// Start the machine and run a round every `period` until `shutdown`
    /// turns true or its sender is dropped. The machine is idle afterwards.
    pub async fn run(self: Arc<Self>, period: Duration, mut shutdown: watch::Receiver<bool>) {
        self.start();
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        debug!(feed = %self.feed.name(), node = %self.node_id, "gossip actor started");
        loop {
            if *shutdown.borrow_and_update() {
                break;
            }
            tokio::select! {
                _ = ticker.tick() => {
                    if let RoundOutcome::NotReady = self.round().await {
                        trace!(feed = %self.feed.name(), node = %self.node_id, "round not ready");
                    }
                }
                res = shutdown.changed() => {
                    if res.is_err() {
                        break;
                    }
                }
            }
        }
        self.stop();
        debug!(feed = %self.feed.name(), node = %self.node_id, "gossip actor stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::FeedRegistration;
    use crate::membership::StaticMembership;
    use crate::transport::MemoryNetwork;
    use mgs_core::{DcId, StableTimeFeed, VectorClock};

    fn vc(entries: &[(&str, u64)]) -> VectorClock {
        VectorClock::from_entries(entries.iter().map(|(dc, t)| (DcId::new(*dc), *t)))
    }

    fn machine(
        membership: Arc<StaticMembership>,
        policy: ReconcilePolicy,
    ) -> GossipStateMachine<StableTimeFeed> {
        let network = MemoryNetwork::new(16);
        let feed = Arc::new(Feed::new(FeedRegistration::new("stable_time", StableTimeFeed)));
        GossipStateMachine::new(
            NodeId::new("a"),
            feed,
            membership,
            Arc::new(network.transport(NodeId::new("a"))),
            policy,
        )
    }

    #[tokio::test]
    async fn test_idle_round_is_not_ready() {
        let m = machine(Arc::new(StaticMembership::solo([1])), ReconcilePolicy::Always);
        assert_eq!(m.state(), MachineState::Idle);
        assert_eq!(m.round().await, RoundOutcome::NotReady);
    }

    #[tokio::test]
    async fn test_first_round_reconciles() {
        let m = machine(Arc::new(StaticMembership::solo([1, 2])), ReconcilePolicy::WhenFlagged);
        m.start();

        let report = m.round().await.report().cloned().unwrap();
        assert!(report.reconciled);
        assert_eq!(m.feed().local.len(), 2);

        let report = m.round().await.report().cloned().unwrap();
        assert!(!report.reconciled);
    }

    #[tokio::test]
    async fn test_when_flagged_follows_will_change() {
        let membership = Arc::new(StaticMembership::solo([1]));
        membership.set_will_change(true);
        let m = machine(membership.clone(), ReconcilePolicy::WhenFlagged);
        m.start();

        assert!(m.round().await.report().unwrap().reconciled);
        membership.set_will_change(false);
        assert!(m.round().await.report().unwrap().reconciled);
        assert!(!m.round().await.report().unwrap().reconciled);

        m.force_recheck();
        assert!(m.round().await.report().unwrap().reconciled);
    }

    #[tokio::test]
    async fn test_membership_failure_before_first_reconcile() {
        let membership = Arc::new(StaticMembership::solo([1]));
        membership.set_unavailable(true);
        let m = machine(membership.clone(), ReconcilePolicy::Always);
        m.start();

        assert_eq!(m.round().await, RoundOutcome::NotReady);

        membership.set_unavailable(false);
        assert!(m.round().await.is_ready());

        membership.set_unavailable(true);
        let report = m.round().await.report().cloned().unwrap();
        assert!(!report.reconciled);
        assert_eq!(m.cached_partitions(), vec![PartitionId::new(1)]);
    }

    #[tokio::test]
    async fn test_round_publishes_advance() {
        let m = machine(Arc::new(StaticMembership::solo([1])), ReconcilePolicy::Always);
        m.start();
        m.feed().put_local(PartitionId::new(1), vc(&[("dc1", 4)]));

        let outcome = m.round().await;
        assert!(outcome.changed());
        assert_eq!(m.feed().stable(), vc(&[("dc1", 4)]));

        assert!(!m.round().await.changed());
    }

    #[tokio::test]
    async fn test_round_waits_for_every_peer() {
        let network = MemoryNetwork::new(16);
        let mut inbox_b = network.register(NodeId::new("b"));
        let _inbox_c = network.register(NodeId::new("c"));
        let feed = Arc::new(Feed::new(FeedRegistration::new("stable_time", StableTimeFeed)));
        let m = GossipStateMachine::new(
            NodeId::new("a"),
            feed,
            Arc::new(StaticMembership::new(
                vec![NodeId::new("b"), NodeId::new("c")],
                vec![PartitionId::new(1)],
            )),
            Arc::new(network.transport(NodeId::new("a"))),
            ReconcilePolicy::Always,
        );
        m.start();
        m.feed().put_local(PartitionId::new(1), vc(&[("dc1", 100)]));

        assert_eq!(m.round().await, RoundOutcome::NotReady);
        assert!(inbox_b.try_recv().is_ok());
        assert_eq!(m.feed().stable_revision(), 0);

        m.feed().receive(NodeId::new("b"), vc(&[("dc1", 10)]));
        assert_eq!(m.round().await, RoundOutcome::NotReady);

        m.feed().receive(NodeId::new("c"), vc(&[("dc1", 50)]));
        let report = m.round().await.report().cloned().unwrap();
        assert!(report.changed);
        assert_eq!(report.stable, vc(&[("dc1", 10)]));
    }

    #[tokio::test]
    async fn test_run_exits_when_shutdown_already_signalled() {
        let m = Arc::new(machine(
            Arc::new(StaticMembership::solo([1])),
            ReconcilePolicy::Always,
        ));
        let (tx, _) = watch::channel(false);
        tx.send_replace(true);

        let handle = tokio::spawn(m.clone().run(Duration::from_millis(5), tx.subscribe()));
        let finished = tokio::time::timeout(Duration::from_millis(200), handle).await;

        assert!(finished.is_ok());
        assert_eq!(m.state(), MachineState::Idle);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let m = Arc::new(machine(
            Arc::new(StaticMembership::solo([1])),
            ReconcilePolicy::Always,
        ));
        m.feed().put_local(PartitionId::new(1), vc(&[("dc1", 2)]));

        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(m.clone().run(Duration::from_millis(5), rx));

        tokio::time::sleep(Duration::from_millis(50)).await;
        tx.send(true).unwrap();
        handle.await.unwrap();

        assert_eq!(m.state(), MachineState::Idle);
        assert_eq!(m.feed().stable(), vc(&[("dc1", 2)]));
    }
}
