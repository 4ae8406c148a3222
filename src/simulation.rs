use async_stream::stream;
use colored::*;
use futures::stream::Stream;
use futures::stream::StreamExt;
use mgs_core::{DcId, NodeId, PartitionId, StableTimeFeed, VectorClock, STABLE_TIME_FEED};
use mgs_gossip::{
    create_network, ClusterDirectory, FeedRegistration, GossipConfig, GossipError, MemoryNetwork,
    MetadataNode,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Parameters of one simulated cluster run
#[derive(Clone, Debug)]
pub struct SimulationConfig {
    pub nodes: usize,
    pub partitions: u64,
    pub datacenters: Vec<DcId>,
    /// Number of partition clock advances to apply
    pub updates: usize,
    /// Largest single clock advance, in microseconds
    pub max_step_us: u64,
    /// Pause after every batch of `nodes` advances
    pub update_pause: Duration,
    /// Remove the last node halfway through and hand its partitions over
    pub churn: bool,
    pub seed: Option<u64>,
    /// How long to wait for the cluster to agree once updates stop
    pub settle_timeout: Duration,
    pub gossip: GossipConfig,
}

impl SimulationConfig {
    fn validate(&self) -> Result<(), GossipError> {
        if self.nodes == 0 || self.partitions == 0 || self.datacenters.is_empty() {
            return Err(GossipError::InvalidConfig(
                "simulation needs at least one node, partition and datacenter".to_string(),
            ));
        }
        if self.max_step_us == 0 {
            return Err(GossipError::InvalidConfig(
                "max_step_us must be positive".to_string(),
            ));
        }
        self.gossip.validate()
    }
}

/// Statistics collected during a simulation run
#[derive(Clone, Debug)]
pub struct SimulationStats {
    pub nodes_started: usize,
    pub nodes_live: usize,
    pub partitions: u64,
    pub datacenters: usize,
    pub updates_applied: usize,
    pub total_time: Duration,
    pub settle_time: Option<Duration>,
    pub base_time_us: u64,
    pub expected: VectorClock,
    pub stable: Vec<(NodeId, VectorClock)>,
}

impl SimulationStats {
    pub fn converged(&self) -> bool {
        self.settle_time.is_some()
    }

    pub fn print(&self) {
        println!("\n╔════════════════════════════════════════════════════════════╗");
        println!("║              Gossip Simulation Statistics                  ║");
        println!("╠════════════════════════════════════════════════════════════╣");
        println!("║  Nodes Started:             {:>30} ║", self.nodes_started);
        println!("║  Nodes Live:                {:>30} ║", self.nodes_live);
        println!("║  Partitions:                {:>30} ║", self.partitions);
        println!("║  Datacenters:               {:>30} ║", self.datacenters);
        println!("║  Clock Advances:            {:>30} ║", self.updates_applied);
        println!("║  Total Time:                {:>29}s ║", format!("{:.3}", self.total_time.as_secs_f64()));
        match self.settle_time {
            Some(settle) => println!(
                "║  Settle Time:               {:>28}ms ║",
                format!("{:.1}", settle.as_secs_f64() * 1000.0)
            ),
            None => println!("║  Settle Time:               {:>30} ║", "timed out"),
        }
        println!("╚════════════════════════════════════════════════════════════╝");

        println!("\n  Stable time per node (µs past {}):", self.base_time_us);
        for (node, stable) in &self.stable {
            let marker = if *stable == self.expected {
                "✓".green()
            } else {
                "✗".red()
            };
            println!("    {} {:<10} {}", marker, node.to_string().bold(), self.describe(stable));
        }
        println!("    {} {:<10} {}", "=".dimmed(), "expected".dimmed(), self.describe(&self.expected));

        if self.converged() {
            println!("\n{}", "✓ Cluster converged on the expected stable time".green().bold());
        } else {
            println!("\n{}", "✗ Cluster did not converge before the timeout".red().bold());
        }
    }

    fn describe(&self, clock: &VectorClock) -> String {
        clock
            .iter()
            .map(|(dc, time)| format!("{}:+{}", dc, time.saturating_sub(self.base_time_us)))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Generator that yields partition clock advances
fn clock_advance_generator(
    partitions: u64,
    datacenters: Vec<DcId>,
    updates: usize,
    max_step_us: u64,
    seed: Option<u64>,
) -> impl Stream<Item = (PartitionId, DcId, u64)> {
    stream! {
        let mut rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        for _ in 0..updates {
            let partition = PartitionId::new(rng.gen_range(0..partitions));
            let dc = datacenters[rng.gen_range(0..datacenters.len())].clone();
            let step = rng.gen_range(1..=max_step_us);
            yield (partition, dc, step);
        }
    }
}

struct SimNode {
    node: Arc<MetadataNode>,
    live: bool,
}

impl SimNode {
    fn put(&self, partition: PartitionId, clock: VectorClock) -> Result<(), GossipError> {
        self.node
            .feed::<StableTimeFeed>(STABLE_TIME_FEED)?
            .put_local(partition, clock);
        Ok(())
    }

    fn stable(&self) -> VectorClock {
        self.node
            .get_stable::<StableTimeFeed>(STABLE_TIME_FEED, VectorClock::new())
    }

    /// Whether every peer has sent at least one real summary.
    fn heard_from_peers(&self, peers: usize) -> bool {
        match self.node.feed::<StableTimeFeed>(STABLE_TIME_FEED) {
            Ok(feed) => {
                let known = feed.known_peers();
                known.len() == peers && feed.pending_peers(&known).is_empty()
            }
            Err(_) => false,
        }
    }
}

struct Simulation {
    directory: ClusterDirectory,
    network: MemoryNetwork,
    nodes: Vec<SimNode>,
    owners: BTreeMap<PartitionId, usize>,
    truth: BTreeMap<PartitionId, VectorClock>,
}

impl Simulation {
    fn live(&self) -> impl Iterator<Item = &SimNode> {
        self.nodes.iter().filter(|n| n.live)
    }

    fn expected(&self) -> VectorClock {
        let mut clocks = self.truth.values();
        let first = clocks.next().cloned().unwrap_or_default();
        clocks.fold(first, |acc, clock| acc.meet_present(clock))
    }

    fn converged(&self) -> bool {
        let expected = self.expected();
        self.live().all(|n| n.stable() == expected)
    }

    fn advance(&mut self, partition: PartitionId, dc: DcId, step: u64) -> Result<(), GossipError> {
        let clock = self.truth.entry(partition).or_default();
        let time = clock.get(&dc) + step;
        clock.set(dc, time);
        let clock = clock.clone();

        if let Some(&owner) = self.owners.get(&partition) {
            self.nodes[owner].put(partition, clock)?;
        }
        Ok(())
    }

    /// Stop the last live node and deal its partitions to the survivors.
    ///
    /// The node stays in the directory until every partition has a new owner
    /// holding its clock, so its last summary keeps bounding the merge.
    async fn remove_last_node(&mut self) -> Result<(), GossipError> {
        let leaving = match self.nodes.iter().rposition(|n| n.live) {
            Some(index) => index,
            None => return Ok(()),
        };
        let survivors: Vec<usize> = (0..self.nodes.len())
            .filter(|&i| i != leaving && self.nodes[i].live)
            .collect();
        if survivors.is_empty() {
            return Ok(());
        }

        let id = self.nodes[leaving].node.node_id().clone();
        info!(node = %id, "removing node");
        self.nodes[leaving].node.shutdown().await;
        self.nodes[leaving].live = false;

        let orphaned: Vec<PartitionId> = self
            .owners
            .iter()
            .filter(|(_, &owner)| owner == leaving)
            .map(|(partition, _)| *partition)
            .collect();
        for (i, partition) in orphaned.into_iter().enumerate() {
            let heir = survivors[i % survivors.len()];
            let heir_id = self.nodes[heir].node.node_id().clone();
            self.directory.assign(partition, &heir_id);
            self.owners.insert(partition, heir);
            let clock = self.truth.get(&partition).cloned().unwrap_or_default();
            self.nodes[heir].put(partition, clock)?;
            debug!(partition = %partition, heir = %heir_id, "partition reassigned");
        }

        self.directory.leave(&id);
        self.network.unregister(&id);
        Ok(())
    }

    async fn wait_until<F>(&self, timeout: Duration, poll: Duration, done: F) -> Option<Duration>
    where
        F: Fn(&Self) -> bool,
    {
        let start = Instant::now();
        while start.elapsed() < timeout {
            if done(self) {
                return Some(start.elapsed());
            }
            tokio::time::sleep(poll).await;
        }
        if done(self) {
            Some(start.elapsed())
        } else {
            None
        }
    }

    async fn shutdown(&self) {
        for n in self.live() {
            n.node.shutdown().await;
        }
    }
}

/// Run an in-memory cluster gossiping the per-DC stable time
pub async fn run_simulation(config: SimulationConfig) -> Result<SimulationStats, GossipError> {
    config.validate()?;

    println!("\n╔════════════════════════════════════════════════════════════╗");
    println!("║        Stable Time Gossip Simulation                       ║");
    println!(
        "║  Nodes: {} | Partitions: {} | DCs: {} | Advances: {}",
        config.nodes,
        config.partitions,
        config.datacenters.len(),
        config.updates
    );
    println!("╚════════════════════════════════════════════════════════════╝");

    let start = Instant::now();
    let base_time_us = chrono::Utc::now().timestamp_micros().max(0) as u64;
    let base = VectorClock::from_entries(config.datacenters.iter().map(|dc| (dc.clone(), base_time_us)));

    let directory = ClusterDirectory::uniform(config.nodes, config.partitions);
    let (network, members) = create_network(config.nodes, config.gossip.inbox_capacity);

    let mut sim = Simulation {
        directory: directory.clone(),
        network,
        nodes: Vec::with_capacity(config.nodes),
        owners: BTreeMap::new(),
        truth: BTreeMap::new(),
    };

    println!("\n[Phase 1/3] Starting nodes...");
    for (index, (id, transport, inbox)) in members.into_iter().enumerate() {
        let node = MetadataNode::new(
            id.clone(),
            Arc::new(directory.view(id.clone())),
            Arc::new(transport),
            config.gossip.clone(),
        );
        let feed = node.register_feed(FeedRegistration::new(STABLE_TIME_FEED, StableTimeFeed))?;
        for partition in directory.partitions_of(&id) {
            feed.put_local(partition, base.clone());
            sim.owners.insert(partition, index);
            sim.truth.insert(partition, base.clone());
        }
        node.spawn(inbox)?;
        sim.nodes.push(SimNode { node, live: true });
    }

    let peers = config.nodes - 1;
    let poll = config.gossip.round_interval();
    if sim
        .wait_until(config.settle_timeout, poll, |s| s.live().all(|n| n.heard_from_peers(peers)))
        .await
        .is_none()
    {
        println!("{}", "  ! not every node heard from every peer".yellow());
    }
    println!("[Phase 1/3] ✓ Completed");

    println!("[Phase 2/3] Advancing partition clocks...");
    let mut advances = Box::pin(clock_advance_generator(
        config.partitions,
        config.datacenters.clone(),
        config.updates,
        config.max_step_us,
        config.seed,
    ));
    let churn_at = config.updates / 2;
    let mut applied = 0;
    while let Some((partition, dc, step)) = advances.next().await {
        if config.churn && applied == churn_at {
            sim.remove_last_node().await?;
        }
        sim.advance(partition, dc, step)?;
        applied += 1;

        if applied % config.nodes == 0 {
            tokio::time::sleep(config.update_pause).await;
        }
        if applied % 500 == 0 {
            println!("  Advances applied: {}/{}", applied, config.updates);
        }
    }
    println!("[Phase 2/3] ✓ Completed");

    println!("[Phase 3/3] Waiting for the cluster to settle...");
    let settle_time = sim
        .wait_until(config.settle_timeout, poll, |s| s.converged())
        .await;
    println!("[Phase 3/3] ✓ Completed");

    let stats = SimulationStats {
        nodes_started: config.nodes,
        nodes_live: sim.live().count(),
        partitions: config.partitions,
        datacenters: config.datacenters.len(),
        updates_applied: applied,
        total_time: start.elapsed(),
        settle_time,
        base_time_us,
        expected: sim.expected(),
        stable: sim
            .live()
            .map(|n| (n.node.node_id().clone(), n.stable()))
            .collect(),
    };
    sim.shutdown().await;
    Ok(stats)
}

/// Run the simulation for growing cluster sizes
pub async fn run_scaling(
    base: SimulationConfig,
    max_nodes: usize,
    step_size: usize,
) -> Result<(), GossipError> {
    println!("\n╔════════════════════════════════════════════════════════════╗");
    println!("║      Scaling Analysis - Settle Time vs Nodes               ║");
    println!("╚════════════════════════════════════════════════════════════╝");

    let step_size = step_size.max(1);
    let mut nodes = step_size;
    while nodes <= max_nodes {
        let config = SimulationConfig {
            nodes,
            partitions: base.partitions.max(nodes as u64),
            ..base.clone()
        };
        let stats = run_simulation(config).await?;
        stats.print();
        nodes += step_size;
    }
    Ok(())
}
