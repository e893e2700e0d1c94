//! On-chip interconnect between the L1 caches (masters) and the L2 banks (slaves).
//!
//! Every topology shares one protocol: request, arbitrate, grant, transfer, deliver.
//! 1. **Request:** an interface enqueues `(time, iface)`; the queue stays sorted by time
//!    and then interface id, with at most one entry per interface.
//! 2. **Arbitrate:** entries older than the arbitration delay are visited oldest first.
//!    An entry whose destination is blocked is skipped until the destination unblocks;
//!    otherwise the [`Topology`] tries to reserve the path. A granted entry leaves the
//!    queue; a refused one is retried on the next tick.
//! 3. **Deliver:** granted transfers wait in a queue sorted by ready tick. A delivery to
//!    a blocked destination stays queued in place, so FIFO order among deferred
//!    deliveries is preserved.
//!
//! Interfaces `0..masters` are masters, the rest are slaves. Blocking is latched per
//! cause: an interface unblocks only once every cause that blocked it is cleared.

/// Split-transaction bus.
pub mod bus;

/// Multi-stage butterfly network.
pub mod butterfly;

/// Crossbar with pairwise node occupancy.
pub mod crossbar;

use std::collections::VecDeque;
use std::fmt;

use tracing::{debug, trace};

use crate::cache::blocked::{BlockedCause, BlockedSet};
use crate::common::{SimError, SimResult, Tick};
use crate::config::{InterconnectConfig, InterconnectKind};
use crate::request::{MemCmd, MemRequest, ReqId};
use crate::stats::InterconnectStats;

pub use self::bus::SplitBus;
pub use self::butterfly::Butterfly;
pub use self::crossbar::Crossbar;

/// Interface index on the interconnect.
pub type IfaceId = usize;

/// What an interface wants to send next.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Transfer {
    /// Request to carry.
    pub req: ReqId,
    /// Destination interface.
    pub dest: IfaceId,
    /// Bytes on the wire.
    pub bytes: u64,
}

/// Access to the sending side of the interfaces.
///
/// Arbitration asks the owner of an interface what it would send ([`Ports::peek`]) and
/// commits the send only after the path is reserved ([`Ports::take`]).
pub trait Ports {
    /// Next transfer of `iface`, if it has one.
    fn peek(&self, iface: IfaceId) -> SimResult<Option<Transfer>>;

    /// Dequeues the transfer last returned by [`Ports::peek`] for `iface`.
    fn take(&mut self, iface: IfaceId, now: Tick) -> SimResult<ReqId>;
}

/// Path reservation of one topology.
pub trait Topology: fmt::Debug + Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Reserves every resource between `from` and `to` for a transfer of `bytes`.
    ///
    /// Reservation is all-or-nothing: on refusal no resource changes.
    ///
    /// # Returns
    ///
    /// The grant-to-delivery time, or `None` if some resource is busy at `now`.
    fn try_reserve(&mut self, from: IfaceId, to: IfaceId, bytes: u64, now: Tick) -> Option<Tick>;
}

/// Bytes a request occupies on the wire: address-only messages cost a header, the
/// rest carry their payload.
pub fn message_bytes(req: &MemRequest, header_bytes: u32) -> u64 {
    let header = u64::from(header_bytes);
    let carries_data = match req.cmd {
        MemCmd::Read | MemCmd::ReadEx | MemCmd::Prefetch => req.satisfied,
        MemCmd::Directory(_) => u64::from(req.size) > header,
        _ => true,
    };
    if carries_data {
        u64::from(req.size).max(header)
    } else {
        header
    }
}

/// A granted transfer in flight.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Delivery {
    /// Request carried.
    pub req: ReqId,
    /// Sending interface.
    pub from: IfaceId,
    /// Receiving interface.
    pub to: IfaceId,
    /// Grant tick.
    pub granted_at: Tick,
    /// Earliest delivery tick.
    pub ready_at: Tick,
    deferred: bool,
}

/// Outcome of one arbitration pass.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Arbitration {
    /// Granted transfers, in grant order.
    pub granted: Vec<Delivery>,
    /// Tick of the next useful arbitration, if any entry is still waiting on time or
    /// on a busy resource.
    pub next: Option<Tick>,
}

/// The interconnect.
#[derive(Debug)]
pub struct Interconnect {
    topology: Box<dyn Topology>,
    masters: usize,
    arbitration_delay: Tick,
    requests: Vec<(Tick, IfaceId)>,
    deliveries: VecDeque<Delivery>,
    blocked: Vec<BlockedSet>,
    stats: InterconnectStats,
}

impl Interconnect {
    /// Builds an interconnect from its configuration.
    ///
    /// # Arguments
    ///
    /// * `config` - Interconnect configuration.
    /// * `masters` - Number of master interfaces (one per L1).
    /// * `slaves` - Number of slave interfaces (one per L2 bank).
    ///
    /// # Errors
    ///
    /// [`SimError::Config`] for a zero bus width or a topology that cannot connect the
    /// requested interfaces.
    pub fn new(config: &InterconnectConfig, masters: usize, slaves: usize) -> SimResult<Self> {
        if config.width_bytes == 0 {
            return Err(SimError::config("interconnect", "width must be positive"));
        }
        let ifaces = masters + slaves;
        let topology: Box<dyn Topology> = match config.kind {
            InterconnectKind::Crossbar => Box::new(Crossbar::new(
                ifaces,
                masters,
                config.transfer_delay,
                config.width_bytes,
            )),
            InterconnectKind::Butterfly => Box::new(Butterfly::new(
                ifaces,
                config.link_delay,
                config.transfer_delay,
                config.width_bytes,
            )?),
            InterconnectKind::Bus => {
                Box::new(SplitBus::new(config.width_bytes, config.transfer_delay))
            }
        };
        Ok(Self::with_topology(topology, masters, slaves, config.arbitration_delay))
    }

    /// Builds an interconnect around an explicit topology.
    pub fn with_topology(
        topology: Box<dyn Topology>,
        masters: usize,
        slaves: usize,
        arbitration_delay: Tick,
    ) -> Self {
        Self {
            topology,
            masters,
            arbitration_delay,
            requests: Vec::new(),
            deliveries: VecDeque::new(),
            blocked: vec![BlockedSet::new(); masters + slaves],
            stats: InterconnectStats::default(),
        }
    }

    /// Number of master interfaces.
    pub const fn masters(&self) -> usize {
        self.masters
    }

    /// Total number of interfaces.
    pub fn ifaces(&self) -> usize {
        self.blocked.len()
    }

    /// Topology name.
    pub fn topology(&self) -> &'static str {
        self.topology.name()
    }

    /// Queues a send request for `from`.
    ///
    /// # Returns
    ///
    /// The tick at which an arbitration should run, or `None` if `from` was already queued.
    pub fn request(&mut self, from: IfaceId, now: Tick) -> Option<Tick> {
        if self.requests.iter().any(|&(_, iface)| iface == from) {
            return None;
        }
        let pos = self
            .requests
            .partition_point(|&(time, iface)| (time, iface) <= (now, from));
        self.requests.insert(pos, (now, from));
        self.stats.requests += 1;
        trace!(iface = from, now, "interconnect request");
        Some(now + self.arbitration_delay)
    }

    /// Returns `true` if `iface` has a queued request.
    pub fn is_requesting(&self, iface: IfaceId) -> bool {
        self.requests.iter().any(|&(_, i)| i == iface)
    }

    /// Runs one arbitration pass at `now`.
    ///
    /// Eligible requests are visited oldest first; ties go to the lower interface id.
    ///
    /// # Errors
    ///
    /// Propagates errors from [`Ports`].
    pub fn arbitrate(&mut self, now: Tick, ports: &mut dyn Ports) -> SimResult<Arbitration> {
        let mut result = Arbitration::default();
        let mut resource_busy = false;
        let mut i = 0;
        while i < self.requests.len() {
            let (time, from) = self.requests[i];
            let eligible_at = time + self.arbitration_delay;
            if eligible_at > now {
                result.next = Some(result.next.map_or(eligible_at, |n: Tick| n.min(eligible_at)));
                i += 1;
                continue;
            }
            let Some(transfer) = ports.peek(from)? else {
                let _ = self.requests.remove(i);
                continue;
            };
            if self.is_blocked(transfer.dest) {
                self.stats.deferred_arbitrations += 1;
                i += 1;
                continue;
            }
            let Some(latency) = self
                .topology
                .try_reserve(from, transfer.dest, transfer.bytes, now)
            else {
                self.stats.resource_conflicts += 1;
                resource_busy = true;
                i += 1;
                continue;
            };
            let req = ports.take(from, now)?;
            let _ = self.requests.remove(i);
            self.stats.grants += 1;
            self.stats.total_queue_ticks += now - time;
            self.stats.total_transfer_ticks += latency;
            let delivery = Delivery {
                req,
                from,
                to: transfer.dest,
                granted_at: now,
                ready_at: now + latency,
                deferred: false,
            };
            trace!(from, to = transfer.dest, req = %req, ready_at = delivery.ready_at, "grant");
            self.push_delivery(delivery);
            result.granted.push(delivery);
        }
        if resource_busy {
            let retry = now + 1;
            result.next = Some(result.next.map_or(retry, |n| n.min(retry)));
        }
        Ok(result)
    }

    fn push_delivery(&mut self, delivery: Delivery) {
        let pos = self
            .deliveries
            .partition_point(|d| d.ready_at <= delivery.ready_at);
        self.deliveries.insert(pos, delivery);
    }

    /// Dequeues the oldest delivery that is due at `now` and whose destination is not
    /// blocked. Deliveries to blocked destinations stay queued in place.
    pub fn next_delivery(&mut self, now: Tick) -> Option<Delivery> {
        let mut found = None;
        for (i, d) in self.deliveries.iter_mut().enumerate() {
            if d.ready_at > now {
                break;
            }
            if self.blocked[d.to].is_blocked() {
                if !d.deferred {
                    d.deferred = true;
                    self.stats.deferred_deliveries += 1;
                }
                continue;
            }
            found = Some(i);
            break;
        }
        let delivery = self.deliveries.remove(found?)?;
        self.stats.deliveries += 1;
        Some(delivery)
    }

    /// Puts back a delivery its destination refused on arrival. It is retried, ahead of
    /// other deliveries due the same tick, once the destination unblocks.
    pub fn defer(&mut self, mut delivery: Delivery) {
        self.stats.deliveries = self.stats.deliveries.saturating_sub(1);
        if !delivery.deferred {
            delivery.deferred = true;
            self.stats.deferred_deliveries += 1;
        }
        let pos = self
            .deliveries
            .partition_point(|d| d.ready_at < delivery.ready_at);
        self.deliveries.insert(pos, delivery);
    }

    /// Earliest ready tick among queued deliveries.
    pub fn next_delivery_tick(&self) -> Option<Tick> {
        self.deliveries.front().map(|d| d.ready_at)
    }

    /// Blocks `iface` for `cause`.
    ///
    /// # Returns
    ///
    /// `true` if the interface went from unblocked to blocked.
    pub fn set_blocked(&mut self, iface: IfaceId, cause: BlockedCause) -> bool {
        let Some(set) = self.blocked.get_mut(iface) else {
            return false;
        };
        let changed = set.insert(cause);
        if changed {
            debug!(iface, %cause, "interconnect interface blocked");
        }
        changed
    }

    /// Clears `cause` on `iface`.
    ///
    /// # Returns
    ///
    /// `true` if the interface became unblocked; pending arbitrations and deliveries
    /// toward it should be rescheduled.
    pub fn clear_blocked(&mut self, iface: IfaceId, cause: BlockedCause) -> bool {
        let Some(set) = self.blocked.get_mut(iface) else {
            return false;
        };
        let unblocked = set.remove(cause);
        if unblocked {
            debug!(iface, %cause, "interconnect interface unblocked");
        }
        unblocked
    }

    /// Returns `true` while `iface` is blocked for any cause.
    pub fn is_blocked(&self, iface: IfaceId) -> bool {
        self.blocked.get(iface).is_some_and(BlockedSet::is_blocked)
    }

    /// Causes currently blocking `iface`.
    pub fn blocked_causes(&self, iface: IfaceId) -> BlockedSet {
        self.blocked.get(iface).copied().unwrap_or_default()
    }

    /// Returns `true` when no request or delivery is pending.
    pub fn is_idle(&self) -> bool {
        self.requests.is_empty() && self.deliveries.is_empty()
    }

    /// Counters.
    pub fn stats(&self) -> &InterconnectStats {
        &self.stats
    }
}
