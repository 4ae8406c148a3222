//! # mgs-core
//!
//! Value types and merge behaviours for the Stillwater MGS (Metadata Gossip
//! Stabilizer).
//!
//! This crate provides:
//! - Identifiers for nodes, partitions, datacenters and feeds
//! - A join-semilattice trait used to reason about monotonic progress
//! - Vector clocks keyed by datacenter
//! - The [`FeedBehavior`] capability trait a feed owner implements
//! - Two concrete feeds: per-DC stable time and scalar global stable time
//!
//! ## Example
//!
//! ```rust
//! use mgs_core::{DcId, FeedBehavior, PartitionId, StableTimeFeed, VectorClock};
//! use std::collections::HashMap;
//!
//! let feed = StableTimeFeed;
//! let mut local = HashMap::new();
//! local.insert(PartitionId::new(1), VectorClock::from_entries([(DcId::new("dc1"), 10)]));
//! local.insert(PartitionId::new(2), VectorClock::from_entries([(DcId::new("dc1"), 5)]));
//!
//! let merged = feed.merge_local(&local);
//! assert_eq!(merged.get(&DcId::new("dc1")), 5);
//! ```

pub mod feed;
pub mod global_time;
pub mod ids;
pub mod lattice;
pub mod stable_time;
pub mod vector_clock;

pub use feed::FeedBehavior;
pub use global_time::{GlobalStableTimeFeed, GlobalTime, GLOBAL_STABLE_TIME_FEED};
pub use ids::{DcId, FeedName, NodeId, PartitionId};
pub use lattice::Lattice;
pub use stable_time::{StableTimeFeed, STABLE_TIME_FEED};
pub use vector_clock::VectorClock;
