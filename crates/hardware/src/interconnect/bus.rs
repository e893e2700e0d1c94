//! Split-transaction bus.
//!
//! One shared data path: a transfer holds the bus for `ceil(bytes / width)` ticks and
//! is delivered after the bus latency on top of that. Requests and responses are
//! separate transactions, so the bus is free again while the response is produced.

use super::{IfaceId, Topology};
use crate::common::Tick;

/// Shared bus with a single token.
#[derive(Clone, Debug)]
pub struct SplitBus {
    /// Bus width in bytes; used to compute transfer cycles.
    pub width_bytes: u64,
    /// Base latency in ticks per transaction.
    pub latency: Tick,
    busy_until: Tick,
}

impl SplitBus {
    /// Creates an idle bus.
    ///
    /// # Arguments
    ///
    /// * `width_bytes` - Transfer width in bytes (e.g., 8).
    /// * `latency` - Base ticks per transaction.
    pub const fn new(width_bytes: u64, latency: Tick) -> Self {
        Self {
            width_bytes,
            latency,
            busy_until: 0,
        }
    }

    /// Number of bus cycles a payload of `bytes` occupies.
    pub const fn transfers(&self, bytes: u64) -> u64 {
        bytes.div_ceil(self.width_bytes)
    }

    /// Returns the number of ticks to transfer the given number of bytes on this bus.
    ///
    /// # Returns
    ///
    /// Base latency plus `ceil(bytes / width_bytes)` transfers.
    pub const fn calculate_transit_time(&self, bytes: u64) -> Tick {
        self.latency + self.transfers(bytes)
    }
}

impl Topology for SplitBus {
    fn name(&self) -> &'static str {
        "bus"
    }

    fn try_reserve(&mut self, _from: IfaceId, _to: IfaceId, bytes: u64, now: Tick) -> Option<Tick> {
        if self.busy_until > now {
            return None;
        }
        self.busy_until = now + self.transfers(bytes);
        Some(self.calculate_transit_time(bytes))
    }
}
