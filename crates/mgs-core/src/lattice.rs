//! Join-semilattice trait used to state monotonic progress.
//!
//! A join-semilattice (S, ⊔) satisfies:
//! - Commutativity: a ⊔ b = b ⊔ a
//! - Associativity: (a ⊔ b) ⊔ c = a ⊔ (b ⊔ c)
//! - Idempotence:  a ⊔ a = a
//!
//! Stable values published by a feed only ever move up this order, so
//! `published[k].leq(&published[k + 1])` holds for every pair of consecutive
//! publications.

/// A value ordered by its join.
pub trait Lattice: Clone + PartialEq {
    /// The bottom element (identity for join)
    fn bottom() -> Self;

    /// Least upper bound. Must be commutative, associative and idempotent.
    fn join(&self, other: &Self) -> Self;

    /// `self ≤ other` iff `self ⊔ other = other`
    fn leq(&self, other: &Self) -> bool {
        &self.join(other) == other
    }
}
