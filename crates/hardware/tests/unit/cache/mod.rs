//! Cache component tests.

/// Blocked-cause latching.
pub mod blocked;


/// Cache controller behaviour in isolation.
pub mod controller;


/// LRU tag store and way partitioning.
pub mod tags;
