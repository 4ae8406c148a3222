//! Error types for the gossip layer.

use mgs_core::{FeedName, NodeId};
use thiserror::Error;

/// Errors raised by a transport when handing a summary to a peer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Peer not found: {0}")]
    PeerNotFound(NodeId),

    #[error("Peer unreachable: {0}")]
    Unreachable(NodeId),

    #[error("Inbox of {0} is full")]
    InboxFull(NodeId),

    #[error("Transport closed")]
    Closed,
}

/// Errors raised by a membership source.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MembershipError {
    #[error("Membership unavailable: {0}")]
    Unavailable(String),
}

/// Errors that can occur in gossip operations.
///
/// None of these ever escape a gossip round; they surface from registration,
/// the receive path and configuration loading.
#[derive(Error, Debug)]
pub enum GossipError {
    #[error("Feed not registered: {0}")]
    UnknownFeed(FeedName),

    #[error("Feed already registered: {0}")]
    DuplicateFeed(FeedName),

    #[error("Feed {0} is registered with a different behaviour type")]
    FeedTypeMismatch(FeedName),

    #[error("Codec error: {0}")]
    Codec(String),

    #[error("Node is already running")]
    AlreadyRunning,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl From<serde_json::Error> for GossipError {
    fn from(err: serde_json::Error) -> Self {
        GossipError::Codec(err.to_string())
    }
}

/// Result type for gossip operations.
pub type Result<T> = std::result::Result<T, GossipError>;
