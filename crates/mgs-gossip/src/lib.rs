//! # mgs-gossip
//!
//! Periodic gossip of metadata feeds between the nodes of a cluster.
//!
//! This crate provides:
//! - The per-feed gossip state machine and its round algorithm
//! - Membership sources the state machine reconciles against
//! - A summary transport trait with an in-memory implementation
//! - [`MetadataNode`], which hosts a node's feeds, runs one actor per feed
//!   and feeds received summaries into the remote stores
//! - Configuration and error types
//!
//! ## Architecture
//!
//! ```text
//!  partition owners ──put_local──▶ LocalSummaryStore ─┐
//!                                                     │ merge_local
//!                                                     ▼
//!  inbox ──deliver──▶ RemoteSummaryStore ──▶ merge_remote(peers + self)
//!                                                     │ stabilize
//!                                                     ▼
//!  readers ◀──get_stable── StableSnapshot ◀── publish if advanced
//! ```
//!
//! Every node reaches the same stable value once the cluster stops changing,
//! because each node merges the same set of contributions with an
//! order-independent merge.

pub mod config;
pub mod error;
pub mod feed;
pub mod machine;
pub mod membership;
pub mod node;
pub mod transport;

pub use config::{GossipConfig, GossipConfigBuilder, ReconcilePolicy};
pub use error::{GossipError, MembershipError, Result, TransportError};
pub use feed::{Feed, FeedRegistration};
pub use machine::{GossipStateMachine, MachineState, RoundOutcome, RoundReport};
pub use membership::{ClusterDirectory, ClusterView, Membership, MembershipSnapshot, StaticMembership};
pub use node::MetadataNode;
pub use transport::{
    create_network, Inbox, MemoryNetwork, MemoryTransport, SummaryEnvelope, SummaryTransport,
};
