#![forbid(unsafe_code)]

//! Promoted feature identity and immutable membership sets.
//!
//! # Invariants
//!
//! 1. An [`IdSet`] is never mutated after construction. A filter change
//!    always builds a fresh set.
//! 2. Membership is O(1) average regardless of set size, so result sets in
//!    the thousands do not degrade filter evaluation.
//! 3. [`IdSet::literal`] is sorted and duplicate-free, which keeps the
//!    generated style expression deterministic.

use std::fmt;

use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};

/// Stable user identity, promoted from the `id` feature property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub i64);

impl UserId {
    /// Raw numeric value.
    #[must_use]
    pub const fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for UserId {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

/// Immutable set of user IDs used by a membership filter.
#[derive(Debug, Clone, Default)]
pub struct IdSet {
    members: FxHashSet<UserId>,
    literal: Vec<UserId>,
}

impl IdSet {
    /// Whether `id` is a member.
    #[inline]
    #[must_use]
    pub fn contains(&self, id: UserId) -> bool {
        self.members.contains(&id)
    }

    /// Number of distinct members.
    #[must_use]
    pub fn len(&self) -> usize {
        self.literal.len()
    }

    /// Whether the set has no members.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.literal.is_empty()
    }

    /// Sorted, duplicate-free members as they appear in the style literal.
    #[must_use]
    pub fn literal(&self) -> &[UserId] {
        &self.literal
    }

    /// Iterate members in literal order.
    pub fn iter(&self) -> impl Iterator<Item = UserId> + '_ {
        self.literal.iter().copied()
    }
}

impl PartialEq for IdSet {
    fn eq(&self, other: &Self) -> bool {
        self.literal == other.literal
    }
}

impl Eq for IdSet {}

impl FromIterator<UserId> for IdSet {
    fn from_iter<I: IntoIterator<Item = UserId>>(iter: I) -> Self {
        let members: FxHashSet<UserId> = iter.into_iter().collect();
        let mut literal: Vec<UserId> = members.iter().copied().collect();
        literal.sort_unstable();
        Self { members, literal }
    }
}

impl<'a> FromIterator<&'a UserId> for IdSet {
    fn from_iter<I: IntoIterator<Item = &'a UserId>>(iter: I) -> Self {
        iter.into_iter().copied().collect()
    }
}
