//! The single published value of a feed.

use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};

/// Holds the last stable value of a feed.
///
/// Readers take a short read lock and clone. The gossip state machine is the
/// only writer and goes through [`StableSnapshot::advance`], which decides and
/// publishes under one write lock.
pub struct StableSnapshot<V> {
    value: RwLock<V>,
    /// Number of publications since creation.
    revision: AtomicU64,
}

impl<V: Clone> StableSnapshot<V> {
    pub fn new(initial: V) -> Self {
        StableSnapshot {
            value: RwLock::new(initial),
            revision: AtomicU64::new(0),
        }
    }

    /// The current stable value.
    pub fn get(&self) -> V {
        self.value.read().clone()
    }

    /// Number of times a new value has been published.
    pub fn revision(&self) -> u64 {
        self.revision.load(Ordering::Acquire)
    }

    /// Run `decide` against the current value and publish its result when it
    /// reports a change. Returns `decide`'s verdict and the value now stored.
    pub fn advance<F>(&self, decide: F) -> (bool, V)
    where
        F: FnOnce(&V) -> (bool, V),
    {
        let mut current = self.value.write();
        let (changed, next) = decide(&current);
        if changed {
            *current = next;
            self.revision.fetch_add(1, Ordering::AcqRel);
        }
        (changed, current.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_advance_publishes_only_on_change() {
        let stable = StableSnapshot::new(5u64);

        let (changed, value) = stable.advance(|&prev| (3 > prev, 3));
        assert!(!changed);
        assert_eq!(value, 5);
        assert_eq!(stable.revision(), 0);

        let (changed, value) = stable.advance(|&prev| (9 > prev, 9));
        assert!(changed);
        assert_eq!(value, 9);
        assert_eq!(stable.get(), 9);
        assert_eq!(stable.revision(), 1);
    }
}
