//! Discrete-event scheduler.
//!
//! All components interact through one ordered queue keyed by logical tick. Events
//! scheduled for the same tick fire in scheduling order, which keeps the simulation
//! deterministic without any notion of wall-clock time.
//!
//! The queue also owns the [`SimulationClock`]; components receive `now` through the
//! context they are called with instead of reading a global clock.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use crate::cache::CacheId;
use crate::common::Tick;
use crate::request::ReqId;

/// Work items understood by [`MemorySystem`](crate::sim::MemorySystem).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Event {
    /// A cache finished servicing `req` and reports it upstream.
    CacheRespond {
        /// Cache reporting the completion.
        cache: CacheId,
        /// Completed request.
        req: ReqId,
    },
    /// A cache wants its downstream link (interconnect or memory bus).
    CacheSend {
        /// Requesting cache.
        cache: CacheId,
    },
    /// Interconnect arbitration.
    Arbitrate,
    /// Interconnect delivery.
    Deliver,
    /// The memory controller may issue its next DRAM command.
    MemoryIssue,
    /// DRAM finished the column access of `req`.
    MemoryDone {
        /// Serviced request.
        req: ReqId,
    },
    /// Partitioning epoch boundary.
    PartitionEpoch,
    /// A core retries its oldest rejected access.
    CoreRetry {
        /// Core index.
        core: usize,
    },
}

/// Logical simulation clock.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SimulationClock {
    now: Tick,
}

impl SimulationClock {
    /// Returns the current tick.
    pub const fn now(self) -> Tick {
        self.now
    }
}

#[derive(Debug, PartialEq, Eq)]
struct Scheduled {
    tick: Tick,
    seq: u64,
    event: Event,
}

impl Ord for Scheduled {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed for min-heap behaviour: earliest tick, then earliest scheduled.
        other
            .tick
            .cmp(&self.tick)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for Scheduled {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Tick-ordered event queue.
#[derive(Debug, Default)]
pub struct EventQueue {
    heap: BinaryHeap<Scheduled>,
    clock: SimulationClock,
    seq: u64,
    dispatched: u64,
}

impl EventQueue {
    /// Creates an empty queue at tick 0.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the current tick.
    pub const fn now(&self) -> Tick {
        self.clock.now
    }

    /// Returns the clock.
    pub const fn clock(&self) -> SimulationClock {
        self.clock
    }

    /// Schedules `event` at an absolute tick.
    ///
    /// A tick in the past is clamped to the current tick; events never travel backwards.
    pub fn schedule(&mut self, tick: Tick, event: Event) {
        debug_assert!(tick >= self.clock.now, "event {event:?} scheduled in the past");
        let tick = tick.max(self.clock.now);
        self.seq += 1;
        self.heap.push(Scheduled {
            tick,
            seq: self.seq,
            event,
        });
    }

    /// Schedules `event` `delay` ticks from now.
    pub fn schedule_in(&mut self, delay: Tick, event: Event) {
        self.schedule(self.clock.now + delay, event);
    }

    /// Returns the tick of the earliest pending event.
    pub fn peek_tick(&self) -> Option<Tick> {
        self.heap.peek().map(|s| s.tick)
    }

    /// Pops the earliest event if it fires at or before `limit`, advancing the clock to it.
    pub fn pop_until(&mut self, limit: Tick) -> Option<(Tick, Event)> {
        if self.heap.peek()?.tick > limit {
            return None;
        }
        let next = self.heap.pop()?;
        self.clock.now = next.tick;
        self.dispatched += 1;
        Some((next.tick, next.event))
    }

    /// Advances the clock without dispatching (used when a run ends at an idle tick).
    pub fn advance_to(&mut self, tick: Tick) {
        if tick > self.clock.now {
            self.clock.now = tick;
        }
    }

    /// Returns `true` if no event is pending.
    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Number of pending events.
    pub fn len(&self) -> usize {
        self.heap.len()
    }

    /// Number of events dispatched so far.
    pub const fn dispatched(&self) -> u64 {
        self.dispatched
    }
}
