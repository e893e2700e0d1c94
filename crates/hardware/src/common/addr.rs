//! Address, tick and requester types.
//!
//! This module defines the strong types shared by every component of the memory
//! hierarchy. It provides the following:
//! 1. **Type Safety:** Physical addresses are wrapped so they cannot be mixed with
//!    tick counts or way indices.
//! 2. **Block Arithmetic:** Helpers for block alignment, block offsets and DRAM page numbers.
//! 3. **Identifiers:** Aliases for logical time and the requester (core) issuing a request.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Logical simulation time. Only the ordering of ticks matters, never wall-clock time.
pub type Tick = u64;

/// Identifier of the agent (core / hardware thread) on whose behalf a request travels.
///
/// Partition quotas, interference accounting and NFQ virtual time are all keyed by it.
pub type RequesterId = usize;

/// Address-space identifier; block matches in MSHR queues compare it alongside the address.
pub type Asid = u16;

/// A physical address in the simulated memory system.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PhysAddr(pub u64);

impl PhysAddr {
    /// Creates a new physical address from a raw 64-bit value.
    #[inline(always)]
    pub const fn new(addr: u64) -> Self {
        Self(addr)
    }

    /// Returns the raw 64-bit address value.
    #[inline(always)]
    pub const fn val(self) -> u64 {
        self.0
    }

    /// Aligns the address down to the start of its block.
    ///
    /// # Arguments
    ///
    /// * `blk_size` - Block size in bytes; must be a power of two.
    ///
    /// # Returns
    ///
    /// The block-aligned address.
    #[inline(always)]
    pub const fn block_align(self, blk_size: u64) -> Self {
        Self(self.0 & !(blk_size - 1))
    }

    /// Returns the byte offset of the address within its block.
    #[inline(always)]
    pub const fn block_offset(self, blk_size: u64) -> u64 {
        self.0 & (blk_size - 1)
    }

    /// Returns the DRAM page number this address falls into.
    #[inline(always)]
    pub const fn page(self, page_size: u64) -> u64 {
        self.0 / page_size
    }
}

impl fmt::Display for PhysAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

impl From<u64> for PhysAddr {
    fn from(addr: u64) -> Self {
        Self(addr)
    }
}

/// Returns `log2(value)` for a power of two, or `None` otherwise.
pub const fn exact_log2(value: u64) -> Option<u32> {
    if value.is_power_of_two() {
        Some(value.trailing_zeros())
    } else {
        None
    }
}
