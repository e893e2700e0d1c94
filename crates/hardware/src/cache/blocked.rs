//! Blocked-cause tracking.
//!
//! A cache stops accepting new work while any [`BlockedCause`] is set and resumes only
//! once every cause has been cleared.

use std::fmt;

use serde::Serialize;

/// Reason a cache (or interconnect interface) refuses new work.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum BlockedCause {
    /// Every miss MSHR is allocated.
    NoMshrs,
    /// An MSHR's target list is full.
    NoTargets,
    /// Every write buffer is allocated.
    NoWbBuffers,
    /// Waiting on a coherence action.
    Coherence,
    /// A block copy is in progress.
    Copy,
}

impl BlockedCause {
    /// Every cause, in a fixed order.
    pub const ALL: [Self; 5] = [
        Self::NoMshrs,
        Self::NoTargets,
        Self::NoWbBuffers,
        Self::Coherence,
        Self::Copy,
    ];

    /// Position of the cause in [`BlockedCause::ALL`].
    pub const fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for BlockedCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::NoMshrs => "Blocked_NoMSHRs",
            Self::NoTargets => "Blocked_NoTargets",
            Self::NoWbBuffers => "Blocked_NoWBBuffers",
            Self::Coherence => "Blocked_Coherence",
            Self::Copy => "Blocked_Copy",
        };
        f.write_str(name)
    }
}

/// Set of active [`BlockedCause`]s.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct BlockedSet {
    causes: [bool; 5],
}

impl BlockedSet {
    /// Creates an empty set.
    pub const fn new() -> Self {
        Self { causes: [false; 5] }
    }

    /// Returns `true` if `cause` is set.
    pub const fn contains(&self, cause: BlockedCause) -> bool {
        self.causes[cause.index()]
    }

    /// Sets `cause`.
    ///
    /// # Returns
    ///
    /// `true` if the set was empty before, i.e. this call transitioned to blocked.
    pub fn insert(&mut self, cause: BlockedCause) -> bool {
        let was_blocked = self.is_blocked();
        self.causes[cause.index()] = true;
        !was_blocked
    }

    /// Clears `cause`.
    ///
    /// # Returns
    ///
    /// `true` if this call transitioned to unblocked (the last cause was removed).
    pub fn remove(&mut self, cause: BlockedCause) -> bool {
        let had = self.contains(cause);
        self.causes[cause.index()] = false;
        had && !self.is_blocked()
    }

    /// Returns `true` if any cause is set.
    pub fn is_blocked(&self) -> bool {
        self.causes.iter().any(|&c| c)
    }

    /// Iterates over the causes currently set.
    pub fn iter(&self) -> impl Iterator<Item = BlockedCause> + '_ {
        BlockedCause::ALL
            .into_iter()
            .filter(|&cause| self.contains(cause))
    }
}

impl fmt::Display for BlockedSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<String> = self.iter().map(|c| c.to_string()).collect();
        if names.is_empty() {
            f.write_str("unblocked")
        } else {
            f.write_str(&names.join("|"))
        }
    }
}
