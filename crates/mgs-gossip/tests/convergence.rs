//! Multi-node convergence tests.
//!
//! These tests verify that a cluster of nodes exchanging summaries over the
//! in-memory network agrees on one stable value, keeps agreeing through
//! membership churn, and reports no advance once it has converged.

use mgs_core::{DcId, NodeId, PartitionId, StableTimeFeed, VectorClock, STABLE_TIME_FEED};
use mgs_gossip::{
    create_network, ClusterDirectory, FeedRegistration, GossipConfigBuilder, Inbox, MemoryNetwork,
    MetadataNode, RoundOutcome,
};
use std::sync::Arc;
use std::time::Duration;

fn vc(entries: &[(&str, u64)]) -> VectorClock {
    VectorClock::from_entries(entries.iter().map(|(dc, t)| (DcId::new(*dc), *t)))
}

struct Member {
    node: Arc<MetadataNode>,
    inbox: Option<Inbox>,
}

struct Cluster {
    network: MemoryNetwork,
    directory: ClusterDirectory,
    members: Vec<Member>,
}

impl Cluster {
    /// `nodes` nodes with `partitions` partitions dealt round-robin, every
    /// partition starting at time 0 in each of `dcs`.
    fn new(nodes: usize, partitions: u64, dcs: &[&str], round_interval_ms: u64) -> Self {
        let directory = ClusterDirectory::uniform(nodes, partitions);
        let (network, transports) = create_network(nodes, 256);
        let config = GossipConfigBuilder::new()
            .round_interval(round_interval_ms)
            .build()
            .unwrap();
        let zero = VectorClock::from_entries(dcs.iter().map(|dc| (DcId::new(*dc), 0)));

        let members = transports
            .into_iter()
            .map(|(id, transport, inbox)| {
                let node = MetadataNode::new(
                    id.clone(),
                    Arc::new(directory.view(id.clone())),
                    Arc::new(transport),
                    config.clone(),
                );
                let feed = node
                    .register_feed(FeedRegistration::new(STABLE_TIME_FEED, StableTimeFeed))
                    .unwrap();
                for partition in directory.partitions_of(&id) {
                    feed.put_local(partition, zero.clone());
                }
                Member {
                    node,
                    inbox: Some(inbox),
                }
            })
            .collect();

        Cluster {
            network,
            directory,
            members,
        }
    }

    fn start_machines(&self) {
        for member in &self.members {
            member
                .node
                .state_machine::<StableTimeFeed>(STABLE_TIME_FEED)
                .unwrap()
                .start();
        }
    }

    fn node(&self, index: usize) -> &Arc<MetadataNode> {
        &self.members[index].node
    }

    fn put(&self, index: usize, partition: u64, clock: VectorClock) {
        self.node(index)
            .feed::<StableTimeFeed>(STABLE_TIME_FEED)
            .unwrap()
            .put_local(PartitionId::new(partition), clock);
    }

    fn stable(&self, index: usize) -> VectorClock {
        self.node(index)
            .get_stable::<StableTimeFeed>(STABLE_TIME_FEED, VectorClock::new())
    }

    fn drain(&mut self) {
        for member in &mut self.members {
            if let Some(inbox) = member.inbox.as_mut() {
                while let Ok(envelope) = inbox.try_recv() {
                    member.node.deliver(envelope).unwrap();
                }
            }
        }
    }

    /// One round on each listed node, delivering summaries after each.
    async fn pass(&mut self, indices: &[usize]) -> Vec<RoundOutcome<VectorClock>> {
        let mut outcomes = Vec::new();
        for &i in indices {
            let machine = self
                .node(i)
                .state_machine::<StableTimeFeed>(STABLE_TIME_FEED)
                .unwrap();
            outcomes.push(machine.round().await);
            self.drain();
        }
        outcomes
    }

    fn remove(&mut self, index: usize) {
        let id = self.node(index).node_id().clone();
        self.directory.leave(&id);
        self.network.unregister(&id);
        self.members[index].inbox = None;
    }
}

// ============================================================================
// Manually driven rounds
// ============================================================================

#[tokio::test]
async fn test_fixed_cluster_converges_then_stops_advancing() {
    let mut cluster = Cluster::new(3, 6, &["dc1", "dc2"], 100);
    cluster.start_machines();
    let all = [0, 1, 2];
    cluster.pass(&all).await;

    for partition in 0..6u64 {
        let owner = (partition % 3) as usize;
        cluster.put(
            owner,
            partition,
            vc(&[("dc1", 10 + partition), ("dc2", 20 - partition)]),
        );
    }

    for _ in 0..3 {
        cluster.pass(&all).await;
    }

    let expected = vc(&[("dc1", 10), ("dc2", 15)]);
    for i in all {
        assert_eq!(cluster.stable(i), expected);
    }

    let outcomes = cluster.pass(&all).await;
    for outcome in outcomes {
        let report = outcome.report().unwrap();
        assert!(!report.changed);
        assert_eq!(report.candidate, expected);
    }
}

#[tokio::test]
async fn test_unequal_start_converges() {
    let mut cluster = Cluster::new(2, 2, &["dc1"], 100);
    cluster.put(0, 0, vc(&[("dc1", 100)]));
    cluster.put(1, 1, vc(&[("dc1", 10)]));
    cluster.start_machines();

    // node-0 goes first and has heard nothing from node-1 yet.
    let first = cluster.pass(&[0]).await;
    assert_eq!(first[0], RoundOutcome::NotReady);
    assert!(cluster.stable(0).is_empty());

    for _ in 0..5 {
        cluster.pass(&[0, 1]).await;
    }

    assert_eq!(cluster.stable(0), vc(&[("dc1", 10)]));
    assert_eq!(cluster.stable(1), vc(&[("dc1", 10)]));
}

#[tokio::test]
async fn test_stable_never_exceeds_slowest_partition() {
    let mut cluster = Cluster::new(2, 4, &["dc1"], 100);
    cluster.start_machines();
    cluster.pass(&[0, 1]).await;

    cluster.put(0, 0, vc(&[("dc1", 100)]));
    cluster.put(0, 2, vc(&[("dc1", 100)]));
    for step in 0..5 {
        cluster.pass(&[0, 1]).await;
        for i in 0..2 {
            assert!(cluster.stable(i).get(&DcId::new("dc1")) == 0, "step {}", step);
        }
    }

    cluster.put(1, 1, vc(&[("dc1", 60)]));
    cluster.put(1, 3, vc(&[("dc1", 70)]));
    cluster.pass(&[0, 1]).await;
    cluster.pass(&[0, 1]).await;

    assert_eq!(cluster.stable(0), vc(&[("dc1", 60)]));
    assert_eq!(cluster.stable(1), vc(&[("dc1", 60)]));
}

#[tokio::test]
async fn test_departed_node_stops_holding_back_stable_time() {
    let mut cluster = Cluster::new(3, 6, &["dc1"], 100);
    cluster.start_machines();
    cluster.pass(&[0, 1, 2]).await;

    for partition in 0..6u64 {
        let owner = (partition % 3) as usize;
        let time = if owner == 2 { 5 } else { 50 };
        cluster.put(owner, partition, vc(&[("dc1", time)]));
    }
    for _ in 0..3 {
        cluster.pass(&[0, 1, 2]).await;
    }
    assert_eq!(cluster.stable(0), vc(&[("dc1", 5)]));

    // node-2 leaves; its partitions move to the survivors
    cluster.remove(2);
    cluster
        .directory
        .assign(PartitionId::new(2), &NodeId::new("node-0"));
    cluster
        .directory
        .assign(PartitionId::new(5), &NodeId::new("node-1"));
    cluster.put(0, 2, vc(&[("dc1", 40)]));
    cluster.put(1, 5, vc(&[("dc1", 45)]));

    for _ in 0..3 {
        cluster.pass(&[0, 1]).await;
    }

    let machine = cluster
        .node(1)
        .state_machine::<StableTimeFeed>(STABLE_TIME_FEED)
        .unwrap();
    assert_eq!(machine.cached_nodes(), vec![NodeId::new("node-0")]);
    assert_eq!(
        machine.cached_partitions(),
        vec![PartitionId::new(1), PartitionId::new(4), PartitionId::new(5)]
    );
    assert_eq!(cluster.stable(0), vc(&[("dc1", 40)]));
    assert_eq!(cluster.stable(1), vc(&[("dc1", 40)]));
}

// ============================================================================
// Spawned actors
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_spawned_nodes_converge() {
    let mut cluster = Cluster::new(3, 6, &["dc1"], 10);
    for member in &mut cluster.members {
        let inbox = member.inbox.take().unwrap();
        member.node.spawn(inbox).unwrap();
    }

    // Wait until every node holds a real summary from every peer.
    let peers_reported = |cluster: &Cluster| {
        cluster.members.iter().all(|member| {
            let feed = member
                .node
                .feed::<StableTimeFeed>(STABLE_TIME_FEED)
                .unwrap();
            let peers = feed.known_peers();
            peers.len() == 2 && feed.pending_peers(&peers).is_empty()
        })
    };
    let mut waited = 0;
    while !peers_reported(&cluster) && waited < 200 {
        tokio::time::sleep(Duration::from_millis(10)).await;
        waited += 1;
    }
    assert!(peers_reported(&cluster));

    for partition in 0..6u64 {
        cluster.put((partition % 3) as usize, partition, vc(&[("dc1", 30 + partition)]));
    }

    let expected = vc(&[("dc1", 30)]);
    let converged = |cluster: &Cluster| (0..3).all(|i| cluster.stable(i) == expected);
    let mut waited = 0;
    while !converged(&cluster) && waited < 300 {
        tokio::time::sleep(Duration::from_millis(10)).await;
        waited += 1;
    }

    for member in &cluster.members {
        member.node.shutdown().await;
    }
    assert!(converged(&cluster));
}
