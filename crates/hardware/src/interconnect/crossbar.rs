//! Crossbar.
//!
//! Any source may talk to any destination in parallel as long as neither endpoint is
//! already busy. Master-to-master traffic (directory messages between L1s) has no
//! crossbar column of its own and shares a single bus token instead.

use super::{IfaceId, Topology};
use crate::common::Tick;

/// Crossbar with per-node occupancy.
#[derive(Clone, Debug)]
pub struct Crossbar {
    node_busy: Vec<Tick>,
    shared_busy: Tick,
    masters: usize,
    transfer_delay: Tick,
    width_bytes: u64,
}

impl Crossbar {
    /// Creates an idle crossbar.
    ///
    /// # Arguments
    ///
    /// * `ifaces` - Total interfaces.
    /// * `masters` - Interfaces `0..masters` are masters.
    /// * `transfer_delay` - Fixed grant-to-delivery delay.
    /// * `width_bytes` - Bytes moved per tick on one link.
    pub fn new(ifaces: usize, masters: usize, transfer_delay: Tick, width_bytes: u64) -> Self {
        Self {
            node_busy: vec![0; ifaces],
            shared_busy: 0,
            masters,
            transfer_delay,
            width_bytes: width_bytes.max(1),
        }
    }

    const fn is_master(&self, iface: IfaceId) -> bool {
        iface < self.masters
    }
}

impl Topology for Crossbar {
    fn name(&self) -> &'static str {
        "crossbar"
    }

    fn try_reserve(&mut self, from: IfaceId, to: IfaceId, bytes: u64, now: Tick) -> Option<Tick> {
        let occupancy = bytes.div_ceil(self.width_bytes);
        let master_to_master = self.is_master(from) && self.is_master(to);
        if master_to_master && self.shared_busy > now {
            return None;
        }
        if *self.node_busy.get(from)? > now || *self.node_busy.get(to)? > now {
            return None;
        }
        let until = now + occupancy;
        self.node_busy[from] = until;
        self.node_busy[to] = until;
        if master_to_master {
            self.shared_busy = until;
        }
        Some(self.transfer_delay + occupancy)
    }
}
