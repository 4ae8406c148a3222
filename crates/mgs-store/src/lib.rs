//! # mgs-store
//!
//! In-memory state owned by one feed on one node.
//!
//! This crate provides:
//! - Summary stores: per-key atomic tables of partition or peer values
//! - Stable snapshots: the single published value of a feed
//! - Churn reconciliation: aligning a store with a fresh membership list
//!
//! ## Architecture
//!
//! Nothing here is persisted. Partition owners and the network receive path
//! write to the summary stores concurrently; only the gossip state machine
//! reads them as a whole and only it publishes the stable snapshot. Each store
//! is a sharded concurrent map, so writers to different keys never contend on
//! a shared lock.
//!
//! ## Example
//!
//! ```rust
//! use mgs_core::{NodeId, VectorClock};
//! use mgs_store::{reconcile, RemoteSummaryStore};
//!
//! let remote: RemoteSummaryStore<VectorClock> = RemoteSummaryStore::new();
//! let peers = vec![NodeId::new("b"), NodeId::new("c")];
//!
//! let report = reconcile(&remote, &peers, |_| VectorClock::new(), |_, _| {});
//! assert_eq!(report.added.len(), 2);
//! assert_eq!(remote.unreported(&peers).len(), 2);
//! ```

mod reconcile;
mod stable;
mod summary;

pub use reconcile::{reconcile, ReconcileReport};
pub use stable::StableSnapshot;
pub use summary::{LocalSummaryStore, RemoteSummaryStore, SummaryStore};
