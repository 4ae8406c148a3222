//! Node service hosting every feed of one node.

use crate::config::GossipConfig;
use crate::error::{GossipError, Result};
use crate::feed::{Feed, FeedRegistration};
use crate::machine::GossipStateMachine;
use crate::membership::Membership;
use crate::transport::{Inbox, SummaryEnvelope, SummaryTransport};
use mgs_core::{FeedBehavior, FeedName, NodeId};
use parking_lot::{Mutex, RwLock};
use std::any::Any;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

/// Type-erased view of a registered feed.
trait FeedRuntime: Send + Sync {
    fn name(&self) -> &FeedName;

    /// Decode the payload and store it as the origin's summary.
    fn deliver(&self, envelope: &SummaryEnvelope) -> Result<()>;

    fn spawn_actor(&self, period: Duration, shutdown: watch::Receiver<bool>) -> JoinHandle<()>;

    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

struct FeedSlot<F: FeedBehavior> {
    feed: Arc<Feed<F>>,
    machine: Arc<GossipStateMachine<F>>,
}

impl<F: FeedBehavior> FeedRuntime for FeedSlot<F> {
    fn name(&self) -> &FeedName {
        self.feed.name()
    }

    fn deliver(&self, envelope: &SummaryEnvelope) -> Result<()> {
        let value: F::Value = envelope.decode()?;
        self.feed.receive(envelope.origin.clone(), value);
        Ok(())
    }

    fn spawn_actor(&self, period: Duration, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(self.machine.clone().run(period, shutdown))
    }

    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

/// One node of the cluster: its feeds, their gossip actors and the receive
/// loop feeding them.
///
/// # Example
///
/// ```rust
/// use mgs_core::{StableTimeFeed, VectorClock, PartitionId, DcId, STABLE_TIME_FEED};
/// use mgs_gossip::{FeedRegistration, GossipConfig, MemoryNetwork, MetadataNode, StaticMembership};
/// use std::sync::Arc;
///
/// # tokio_test::block_on(async {
/// let network = MemoryNetwork::default();
/// let id = mgs_core::NodeId::new("a");
/// let node = MetadataNode::new(
///     id.clone(),
///     Arc::new(StaticMembership::solo([1])),
///     Arc::new(network.transport(id)),
///     GossipConfig::default(),
/// );
///
/// let feed = node.register_feed(FeedRegistration::new(STABLE_TIME_FEED, StableTimeFeed)).unwrap();
/// feed.put_local(PartitionId::new(1), VectorClock::from_entries([(DcId::new("dc1"), 3)]));
///
/// let machine = node.state_machine::<StableTimeFeed>(STABLE_TIME_FEED).unwrap();
/// machine.start();
/// machine.round().await;
///
/// let stable = node.get_stable::<StableTimeFeed>(STABLE_TIME_FEED, VectorClock::new());
/// assert_eq!(stable.get(&DcId::new("dc1")), 3);
/// # });
/// ```
pub struct MetadataNode {
    node_id: NodeId,
    membership: Arc<dyn Membership>,
    transport: Arc<dyn SummaryTransport>,
    config: GossipConfig,
    feeds: RwLock<HashMap<FeedName, Arc<dyn FeedRuntime>>>,
    shutdown_tx: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    running: AtomicBool,
}

impl MetadataNode {
    pub fn new(
        node_id: NodeId,
        membership: Arc<dyn Membership>,
        transport: Arc<dyn SummaryTransport>,
        config: GossipConfig,
    ) -> Arc<Self> {
        let (shutdown_tx, _) = watch::channel(false);
        Arc::new(Self {
            node_id,
            membership,
            transport,
            config,
            feeds: RwLock::new(HashMap::new()),
            shutdown_tx,
            tasks: Mutex::new(Vec::new()),
            running: AtomicBool::new(false),
        })
    }

    pub fn node_id(&self) -> &NodeId {
        &self.node_id
    }

    pub fn config(&self) -> &GossipConfig {
        &self.config
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Register a feed. If the node is already running its actor starts
    /// immediately.
    pub fn register_feed<F: FeedBehavior>(
        &self,
        registration: FeedRegistration<F>,
    ) -> Result<Arc<Feed<F>>> {
        let name = registration.name.clone();
        let mut feeds = self.feeds.write();
        if feeds.contains_key(&name) {
            return Err(GossipError::DuplicateFeed(name));
        }

        let feed = Arc::new(Feed::new(registration));
        let machine = Arc::new(GossipStateMachine::new(
            self.node_id.clone(),
            feed.clone(),
            self.membership.clone(),
            self.transport.clone(),
            self.config.reconcile_policy,
        ));
        let slot: Arc<dyn FeedRuntime> = Arc::new(FeedSlot {
            feed: feed.clone(),
            machine,
        });

        if self.is_running() {
            let handle = slot.spawn_actor(self.config.round_interval(), self.shutdown_tx.subscribe());
            self.tasks.lock().push(handle);
        }
        feeds.insert(name.clone(), slot);

        info!(node = %self.node_id, feed = %name, "feed registered");
        Ok(feed)
    }

    pub fn feed_names(&self) -> Vec<FeedName> {
        let mut names: Vec<_> = self.feeds.read().keys().cloned().collect();
        names.sort();
        names
    }

    fn slot<F: FeedBehavior>(&self, name: &FeedName) -> Result<Arc<FeedSlot<F>>> {
        let runtime = self
            .feeds
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| GossipError::UnknownFeed(name.clone()))?;
        runtime
            .as_any()
            .downcast::<FeedSlot<F>>()
            .map_err(|_| GossipError::FeedTypeMismatch(name.clone()))
    }

    /// The feed registered under `name` with behaviour `F`.
    pub fn feed<F: FeedBehavior>(&self, name: impl Into<FeedName>) -> Result<Arc<Feed<F>>> {
        Ok(self.slot::<F>(&name.into())?.feed.clone())
    }

    /// The state machine of the feed registered under `name`, for driving
    /// rounds by hand.
    pub fn state_machine<F: FeedBehavior>(
        &self,
        name: impl Into<FeedName>,
    ) -> Result<Arc<GossipStateMachine<F>>> {
        Ok(self.slot::<F>(&name.into())?.machine.clone())
    }

    /// Last stable value of feed `name`, or `default` when no such feed is
    /// registered with behaviour `F`.
    pub fn get_stable<F: FeedBehavior>(
        &self,
        name: impl Into<FeedName>,
        default: F::Value,
    ) -> F::Value {
        self.feed::<F>(name)
            .map(|feed| feed.stable())
            .unwrap_or(default)
    }

    /// Store a received summary in its feed's remote store.
    pub fn deliver(&self, envelope: SummaryEnvelope) -> Result<()> {
        if envelope.origin == self.node_id {
            trace!(node = %self.node_id, "ignoring own summary");
            return Ok(());
        }
        let runtime = self
            .feeds
            .read()
            .get(&envelope.feed)
            .cloned()
            .ok_or_else(|| GossipError::UnknownFeed(envelope.feed.clone()))?;
        runtime.deliver(&envelope)
    }

    /// Start one gossip actor per registered feed and a loop draining
    /// `inbox` into [`deliver`](Self::deliver).
    pub fn spawn(self: &Arc<Self>, mut inbox: Inbox) -> Result<()> {
        // `register_feed` checks `running` under this lock.
        let feeds = self.feeds.write();
        if self.running.swap(true, Ordering::AcqRel) {
            return Err(GossipError::AlreadyRunning);
        }
        self.shutdown_tx.send_replace(false);

        let period = self.config.round_interval();
        let mut handles: Vec<JoinHandle<()>> = feeds
            .values()
            .map(|runtime| {
                debug!(node = %self.node_id, feed = %runtime.name(), "starting actor");
                runtime.spawn_actor(period, self.shutdown_tx.subscribe())
            })
            .collect();
        drop(feeds);

        let node = Arc::clone(self);
        let mut shutdown = self.shutdown_tx.subscribe();
        handles.push(tokio::spawn(async move {
            loop {
                if *shutdown.borrow_and_update() {
                    break;
                }
                tokio::select! {
                    received = inbox.recv() => match received {
                        Some(envelope) => {
                            if let Err(e) = node.deliver(envelope) {
                                warn!(node = %node.node_id, error = %e, "dropping summary");
                            }
                        }
                        None => break,
                    },
                    res = shutdown.changed() => {
                        if res.is_err() {
                            break;
                        }
                    }
                }
            }
        }));

        self.tasks.lock().extend(handles);
        info!(node = %self.node_id, "node started");
        Ok(())
    }

    /// Stop every actor and the receive loop, and wait for them to finish.
    pub async fn shutdown(&self) {
        self.shutdown_tx.send_replace(true);
        let handles = std::mem::take(&mut *self.tasks.lock());
        for handle in handles {
            if let Err(e) = handle.await {
                warn!(node = %self.node_id, error = %e, "task ended abnormally");
            }
        }
        self.running.store(false, Ordering::Release);
        info!(node = %self.node_id, "node stopped");
    }
}
