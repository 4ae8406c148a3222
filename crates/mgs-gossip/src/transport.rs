//! Transport abstractions for summary broadcast.
//!
//! A round hands one [`SummaryEnvelope`] per peer to a [`SummaryTransport`]
//! and never waits for an answer. The receiving side pulls envelopes from its
//! inbox and passes them to [`MetadataNode::deliver`](crate::MetadataNode::deliver).

use crate::error::{Result, TransportError};
use async_trait::async_trait;
use mgs_core::{FeedName, NodeId};
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::trace;

/// One node's merged value for one feed, as sent over the wire.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummaryEnvelope {
    pub feed: FeedName,
    pub origin: NodeId,
    /// `serde_json` encoding of the feed value.
    pub payload: Vec<u8>,
}

impl SummaryEnvelope {
    pub fn encode<V: Serialize>(feed: FeedName, origin: NodeId, value: &V) -> Result<Self> {
        Ok(Self {
            feed,
            origin,
            payload: serde_json::to_vec(value)?,
        })
    }

    pub fn decode<V: DeserializeOwned>(&self) -> Result<V> {
        Ok(serde_json::from_slice(&self.payload)?)
    }

    /// Pub/sub topic of this envelope. The feed name is the prefix, so a
    /// subscriber filters a stream by prefix alone.
    pub fn topic(&self) -> String {
        format!("{}/{}", self.feed, self.origin)
    }
}

/// Outbound side of the summary exchange.
#[async_trait]
pub trait SummaryTransport: Send + Sync + 'static {
    /// Hand `envelope` to `target`. Delivery is best effort.
    async fn send_summary(
        &self,
        target: &NodeId,
        envelope: SummaryEnvelope,
    ) -> std::result::Result<(), TransportError>;
}

/// Receiving end of a node's summary queue.
pub type Inbox = mpsc::Receiver<SummaryEnvelope>;

type SharedInboxes = Arc<RwLock<HashMap<NodeId, mpsc::Sender<SummaryEnvelope>>>>;

/// In-process network connecting every registered node to every other.
#[derive(Clone)]
pub struct MemoryNetwork {
    inboxes: SharedInboxes,
    isolated: Arc<RwLock<HashSet<NodeId>>>,
    capacity: usize,
}

impl MemoryNetwork {
    /// Create a network whose inboxes hold at most `capacity` envelopes.
    pub fn new(capacity: usize) -> Self {
        Self {
            inboxes: Arc::new(RwLock::new(HashMap::new())),
            isolated: Arc::new(RwLock::new(HashSet::new())),
            capacity: capacity.max(1),
        }
    }

    /// Attach `node` and return its inbox. Re-registering replaces the inbox.
    pub fn register(&self, node: NodeId) -> Inbox {
        let (tx, rx) = mpsc::channel(self.capacity);
        self.inboxes.write().insert(node, tx);
        rx
    }

    pub fn unregister(&self, node: &NodeId) {
        self.inboxes.write().remove(node);
    }

    /// Outbound transport for `node`.
    pub fn transport(&self, node: NodeId) -> MemoryTransport {
        MemoryTransport {
            local_id: node,
            network: self.clone(),
        }
    }

    /// Cut `node` off: nothing it sends or is sent arrives until [`heal`](Self::heal).
    pub fn isolate(&self, node: &NodeId) {
        self.isolated.write().insert(node.clone());
    }

    pub fn heal(&self, node: &NodeId) {
        self.isolated.write().remove(node);
    }

    pub fn is_isolated(&self, node: &NodeId) -> bool {
        self.isolated.read().contains(node)
    }
}

impl Default for MemoryNetwork {
    fn default() -> Self {
        Self::new(1024)
    }
}

/// One node's handle on a [`MemoryNetwork`].
#[derive(Clone)]
pub struct MemoryTransport {
    local_id: NodeId,
    network: MemoryNetwork,
}

impl MemoryTransport {
    pub fn local_id(&self) -> &NodeId {
        &self.local_id
    }
}

#[async_trait]
impl SummaryTransport for MemoryTransport {
    async fn send_summary(
        &self,
        target: &NodeId,
        envelope: SummaryEnvelope,
    ) -> std::result::Result<(), TransportError> {
        if self.network.is_isolated(&self.local_id) || self.network.is_isolated(target) {
            return Err(TransportError::Unreachable(target.clone()));
        }

        let tx = {
            let inboxes = self.network.inboxes.read();
            inboxes.get(target).cloned()
        };
        let tx = tx.ok_or_else(|| TransportError::PeerNotFound(target.clone()))?;

        tx.try_send(envelope).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => TransportError::InboxFull(target.clone()),
            mpsc::error::TrySendError::Closed(_) => TransportError::Closed,
        })?;
        trace!(from = %self.local_id, to = %target, "summary sent");
        Ok(())
    }
}

/// Create a network of `count` nodes named `node-<i>`, returning each node's
/// id, transport and inbox.
pub fn create_network(
    count: usize,
    capacity: usize,
) -> (MemoryNetwork, Vec<(NodeId, MemoryTransport, Inbox)>) {
    let network = MemoryNetwork::new(capacity);
    let members = (0..count)
        .map(|i| {
            let id = NodeId::new(format!("node-{}", i));
            let inbox = network.register(id.clone());
            let transport = network.transport(id.clone());
            (id, transport, inbox)
        })
        .collect();
    (network, members)
}
