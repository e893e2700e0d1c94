//! Top-level memory system.
//!
//! [`MemorySystem`] wires the hierarchy together and drives it from one
//! [`EventQueue`]:
//!
//! ```text
//! core i -> L1 i (iface i) ==interconnect==> L2 bank b (iface cores + b) -> memory bus -> DRAM
//! ```
//!
//! Request handles flow between components; every component registers its own
//! [`Holder`] on a request while it keeps the handle, and the transport holders
//! (`Interconnect`, `MemoryQueue`) are released by the system once the receiving side
//! has registered its own.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use tracing::{debug, trace};

use crate::cache::blocked::BlockedCause;
use crate::cache::coherence::Peers;
use crate::cache::miss::BufferKind;
use crate::cache::shadow::{HitCurve, ShadowTags};
use crate::cache::tags::{Geometry, TagStore};
use crate::cache::{AccessOutcome, CacheController, CacheId, FillResult, Level, SnoopResult};
use crate::common::{PhysAddr, RequesterId, SimError, SimResult, Tick};
use crate::config::Config;
use crate::interconnect::{Delivery, IfaceId, Interconnect, Ports, Transfer, message_bytes};
use crate::memory::{DramCommand, DramDevice, MemoryController, build_controller};
use crate::partition::PartitionController;
use crate::request::{Holder, MemCmd, MemRequest, ReqId, RequestArena};
use crate::stats::{CoreStats, SimStats};

use super::event::{Event, EventQueue};

/// A core access that finished.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Completion {
    /// Issuing core.
    pub core: usize,
    /// Handle the access was issued under (no longer live).
    pub req: ReqId,
    /// Command.
    pub cmd: MemCmd,
    /// Address.
    pub addr: PhysAddr,
    /// Issue tick.
    pub issued_at: Tick,
    /// Completion tick.
    pub completed_at: Tick,
}

impl Completion {
    /// Issue-to-completion latency.
    pub const fn latency(&self) -> Tick {
        self.completed_at - self.issued_at
    }
}

/// Receiver of completed core accesses (the pipeline model).
pub trait CompletionSink {
    /// Called once per completed access, in completion order.
    fn complete(&mut self, completion: Completion);
}

impl CompletionSink for Vec<Completion> {
    fn complete(&mut self, completion: Completion) {
        self.push(completion);
    }
}

/// Sink that drops every completion.
#[derive(Clone, Copy, Debug, Default)]
pub struct IgnoreCompletions;

impl CompletionSink for IgnoreCompletions {
    fn complete(&mut self, _completion: Completion) {}
}

/// Result of an external invalidation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Invalidation {
    /// Copies invalidated across the hierarchy.
    pub invalidated: usize,
    /// Some invalidated copy held dirty data.
    pub dirty_supplied: bool,
}

#[derive(Debug, Default)]
struct CoreState {
    /// Accesses refused by a blocked L1, oldest first.
    pending: VecDeque<ReqId>,
    retry_scheduled: bool,
    stats: CoreStats,
}

/// Bank serving `addr` among `banks` block-interleaved banks.
const fn bank_of(addr: PhysAddr, blk_size: u64, banks: usize) -> usize {
    ((addr.val() / blk_size) % banks as u64) as usize
}

/// Traffic class of a request at the memory controller: its core, or the writeback
/// pseudo-requester `cores`.
fn memory_class(req: &MemRequest, cores: usize) -> RequesterId {
    if req.cmd == MemCmd::Writeback || req.requester >= cores {
        cores
    } else {
        req.requester
    }
}

/// Sending side of the interconnect interfaces.
struct Links<'a> {
    l1: &'a mut [CacheController],
    l2: &'a mut [CacheController],
    arena: &'a mut RequestArena,
    header_bytes: u32,
    blk_size: u64,
    /// L1 caches that freed a write-buffer slot during arbitration.
    freed_write_slots: Vec<usize>,
}

impl Links<'_> {
    fn cores(&self) -> usize {
        self.l1.len()
    }

    fn outgoing(&self, iface: IfaceId) -> Option<ReqId> {
        if iface < self.cores() {
            self.l1[iface].peek_send().map(|(_, packet)| packet)
        } else {
            self.l2.get(iface - self.cores())?.peek_response()
        }
    }
}

impl Ports for Links<'_> {
    fn peek(&self, iface: IfaceId) -> SimResult<Option<Transfer>> {
        let Some(id) = self.outgoing(iface) else {
            return Ok(None);
        };
        let req = self.arena.get(id)?;
        let cores = self.cores();
        let dest = if iface < cores {
            match req.cmd {
                MemCmd::Directory(_) => req.dir_target.ok_or_else(|| {
                    SimError::invariant("interconnect", format!("directory message {id} has no target"))
                })?,
                _ => cores + bank_of(req.addr, self.blk_size, self.l2.len()),
            }
        } else {
            match req.origin {
                Some(CacheId {
                    level: Level::L1,
                    index,
                }) => index,
                _ => {
                    return Err(SimError::invariant(
                        "interconnect",
                        format!("response {id} did not come from an L1"),
                    ));
                }
            }
        };
        Ok(Some(Transfer {
            req: id,
            dest,
            bytes: message_bytes(req, self.header_bytes),
        }))
    }

    fn take(&mut self, iface: IfaceId, now: Tick) -> SimResult<ReqId> {
        let cores = self.cores();
        if iface < cores {
            let (slot, _) = self.l1[iface].peek_send().ok_or_else(|| {
                SimError::invariant("interconnect", format!("iface {iface} granted with nothing to send"))
            })?;
            let sent = self.l1[iface].take_send(self.arena, slot, Holder::Interconnect, now)?;
            if sent.kind == BufferKind::Write {
                self.freed_write_slots.push(iface);
            }
            Ok(sent.packet)
        } else {
            self.l2[iface - cores]
                .take_response(self.arena, Holder::Interconnect)?
                .ok_or_else(|| {
                    SimError::invariant("interconnect", format!("iface {iface} granted with no response"))
                })
        }
    }
}

/// The simulated memory hierarchy.
#[derive(Debug)]
pub struct MemorySystem {
    events: EventQueue,
    arena: RequestArena,
    l1: Vec<CacheController>,
    l2: Vec<CacheController>,
    interconnect: Interconnect,
    memory: Box<dyn MemoryController>,
    dram: DramDevice,
    partition: Option<PartitionController>,
    cores: Vec<CoreState>,
    blk_size: u64,
    header_bytes: u32,
    bus_latency: Tick,
    arbitrate_at: Option<Tick>,
    memory_issue_at: Option<Tick>,
    l2_send_scheduled: Vec<bool>,
    /// Banks holding a packet back because the memory controller is blocked.
    l2_waiting_memory: Vec<bool>,
    memory_blocked: bool,
}

impl MemorySystem {
    /// Builds the hierarchy described by `config`.
    ///
    /// # Errors
    ///
    /// [`SimError::Config`] for any configuration no component can be built from, and
    /// [`SimError::Io`] if a partition trace file cannot be created.
    pub fn new(config: &Config) -> SimResult<Self> {
        config.validate()?;
        let cores = config.system.cores;
        let banks = config.l2.banks;
        let partitioning = config.partitioning.enabled();

        let l1 = (0..cores)
            .map(|core| {
                let geometry = Geometry::new(config.l1.size_bytes, config.l1.assoc, config.l1.block_size)?;
                CacheController::new(CacheId::l1(core), &config.l1, geometry, cores, None)
            })
            .collect::<SimResult<Vec<_>>>()?;
        let l2 = (0..banks)
            .map(|bank| {
                let geometry = Geometry::banked(
                    config.l2.bank_size(),
                    config.l2.assoc,
                    config.l2.block_size,
                    banks,
                    bank,
                )?;
                let shadow = partitioning
                    .then(|| ShadowTags::new(geometry, cores, config.partitioning.sample_interval));
                CacheController::new(CacheId::l2(bank), &config.l2, geometry, cores, shadow)
            })
            .collect::<SimResult<Vec<_>>>()?;

        let interconnect = Interconnect::new(&config.interconnect, cores, banks)?;
        let memory = build_controller(&config.memory, cores)?;
        let dram = DramDevice::new(&config.memory, cores + 1);
        let partition = PartitionController::new(&config.partitioning, cores, config.l2.assoc)?;

        let mut events = EventQueue::new();
        if let Some(p) = &partition {
            events.schedule(p.first_boundary(0), Event::PartitionEpoch);
        }
        debug!(
            cores,
            banks,
            topology = interconnect.topology(),
            scheduler = memory.name(),
            partitioning,
            "memory system built"
        );
        Ok(Self {
            events,
            arena: RequestArena::new(),
            l1,
            l2,
            interconnect,
            memory,
            dram,
            partition,
            cores: (0..cores).map(|_| CoreState::default()).collect(),
            blk_size: config.l2.block_size,
            header_bytes: config.interconnect.header_bytes,
            bus_latency: config.memory.bus_latency,
            arbitrate_at: None,
            memory_issue_at: None,
            l2_send_scheduled: vec![false; banks],
            l2_waiting_memory: vec![false; banks],
            memory_blocked: false,
        })
    }

    /// Current tick.
    pub const fn now(&self) -> Tick {
        self.events.now()
    }

    /// Number of cores.
    pub fn num_cores(&self) -> usize {
        self.cores.len()
    }

    /// Request arena (read-only view for inspection).
    pub const fn arena(&self) -> &RequestArena {
        &self.arena
    }

    /// L1 of `core`.
    pub fn l1(&self, core: usize) -> Option<&CacheController> {
        self.l1.get(core)
    }

    /// L2 bank `bank`.
    pub fn l2_bank(&self, bank: usize) -> Option<&CacheController> {
        self.l2.get(bank)
    }

    /// Bank that serves `addr`.
    pub const fn bank_for(&self, addr: PhysAddr) -> usize {
        bank_of(addr, self.blk_size, self.l2.len())
    }

    /// The interconnect.
    pub const fn interconnect(&self) -> &Interconnect {
        &self.interconnect
    }

    /// The memory controller.
    pub fn memory(&self) -> &dyn MemoryController {
        self.memory.as_ref()
    }

    /// The partitioning controller, if partitioning is enabled.
    pub const fn partition(&self) -> Option<&PartitionController> {
        self.partition.as_ref()
    }

    /// Issues a core access at the current tick.
    ///
    /// # Arguments
    ///
    /// * `core` - Issuing core.
    /// * `cmd` - `Read`, `ReadEx`, `Write` or `Prefetch`.
    /// * `addr` - Physical address.
    /// * `size` - Access size in bytes.
    ///
    /// # Returns
    ///
    /// The handle of the new request. A request refused by a blocked L1 is queued and
    /// retried when the L1 unblocks.
    pub fn issue(&mut self, core: usize, cmd: MemCmd, addr: PhysAddr, size: u32) -> SimResult<ReqId> {
        let req = MemRequest::new(cmd, addr, size, core, self.now());
        self.issue_request(core, req)
    }

    /// Issues a prepared request (uncacheable accesses, payloads, address spaces).
    ///
    /// # Errors
    ///
    /// [`SimError::Config`] for an unknown core, [`SimError::Invariant`] for a command a
    /// core cannot issue.
    pub fn issue_request(&mut self, core: usize, mut req: MemRequest) -> SimResult<ReqId> {
        if core >= self.cores.len() {
            return Err(SimError::config("system", format!("core {core} does not exist")));
        }
        if !matches!(req.cmd, MemCmd::Read | MemCmd::ReadEx | MemCmd::Write | MemCmd::Prefetch) {
            return Err(SimError::invariant(
                "system",
                format!("cores cannot issue {} requests", req.cmd),
            ));
        }
        let now = self.now();
        req.requester = core;
        req.issued_at = now;
        req.flags.expects_response = true;
        let id = self.arena.insert(req, Holder::Issuer);
        self.cores[core].stats.issued += 1;
        if self.cores[core].pending.is_empty() {
            if !self.try_core_access(core, id)? {
                self.cores[core].pending.push_back(id);
            }
        } else {
            self.cores[core].stats.rejected += 1;
            self.cores[core].pending.push_back(id);
        }
        Ok(id)
    }

    /// Presents a core request to its L1; `false` if the L1 refused it.
    fn try_core_access(&mut self, core: usize, id: ReqId) -> SimResult<bool> {
        let now = self.now();
        let outcome = self.l1[core].access(&mut self.arena, id, now)?;
        match outcome {
            AccessOutcome::Hit { ready_at, respond } => {
                if respond {
                    self.events.schedule(ready_at, Event::CacheRespond { cache: CacheId::l1(core), req: id });
                }
            }
            AccessOutcome::WriteBuffered { ready_at, respond } => {
                if respond {
                    self.events.schedule(ready_at, Event::CacheRespond { cache: CacheId::l1(core), req: id });
                }
                self.request_l1_send(core);
            }
            AccessOutcome::Miss => self.request_l1_send(core),
            AccessOutcome::MshrHit => {}
            AccessOutcome::Blocked(cause) => {
                self.cores[core].stats.rejected += 1;
                trace!(core, req = %id, %cause, "core access refused");
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Runs every event up to and including `limit`; the clock ends at `limit`.
    ///
    /// # Errors
    ///
    /// The first fatal condition raised by a component; the system must not be used
    /// afterwards.
    pub fn run_until(&mut self, limit: Tick, sink: &mut dyn CompletionSink) -> SimResult<()> {
        while let Some((tick, event)) = self.events.pop_until(limit) {
            self.dispatch(tick, event, sink)?;
        }
        self.events.advance_to(limit);
        Ok(())
    }

    /// Runs until every outstanding request has completed.
    ///
    /// # Errors
    ///
    /// [`SimError::Invariant`] if requests remain but no event is left to make progress.
    pub fn drain(&mut self, sink: &mut dyn CompletionSink) -> SimResult<()> {
        while !self.is_idle() {
            let Some((tick, event)) = self.events.pop_until(Tick::MAX) else {
                return Err(SimError::invariant(
                    "system",
                    format!("{} requests outstanding with no pending event", self.arena.len()),
                ));
            };
            self.dispatch(tick, event, sink)?;
        }
        Ok(())
    }

    /// Returns `true` when no request is in flight anywhere.
    pub fn is_idle(&self) -> bool {
        self.arena.is_empty()
            && self.cores.iter().all(|c| c.pending.is_empty())
            && self.l1.iter().chain(&self.l2).all(CacheController::is_idle)
            && self.interconnect.is_idle()
            && !self.memory.has_more_requests()
    }

    fn dispatch(&mut self, now: Tick, event: Event, sink: &mut dyn CompletionSink) -> SimResult<()> {
        #[cfg(feature = "always-trace")]
        tracing::info!(tick = now, ?event, "dispatch");
        #[cfg(not(feature = "always-trace"))]
        trace!(tick = now, ?event, "dispatch");

        match event {
            Event::CacheRespond { cache, req } => match cache.level {
                Level::L1 => self.complete_core_access(cache.index, req, sink),
                Level::L2 => self.queue_l2_response(cache.index, req),
            },
            Event::CacheSend { cache } => match cache.level {
                Level::L1 => {
                    self.request_l1_send(cache.index);
                    Ok(())
                }
                Level::L2 => self.send_l2_downstream(cache.index),
            },
            Event::Arbitrate => self.arbitrate(),
            Event::Deliver => self.deliver(),
            Event::MemoryIssue => self.issue_memory_command(),
            Event::MemoryDone { req } => self.memory_done(req),
            Event::PartitionEpoch => self.partition_epoch(),
            Event::CoreRetry { core } => self.retry_core(core),
        }
    }

    fn complete_core_access(&mut self, core: usize, id: ReqId, sink: &mut dyn CompletionSink) -> SimResult<()> {
        let now = self.now();
        let req = self.arena.get_mut(id)?;
        req.satisfied = true;
        req.completed_at = Some(now);
        let completion = Completion {
            core,
            req: id,
            cmd: req.cmd,
            addr: req.addr,
            issued_at: req.issued_at,
            completed_at: now,
        };
        let _ = self.arena.release(id, Holder::Response)?;
        let _ = self.arena.release(id, Holder::Issuer)?;
        let stats = &mut self.cores[core].stats;
        stats.completed += 1;
        stats.total_latency += completion.latency();
        if completion.cmd != MemCmd::Prefetch {
            sink.complete(completion);
        }
        Ok(())
    }

    fn queue_l2_response(&mut self, bank: usize, id: ReqId) -> SimResult<()> {
        let now = self.now();
        let req = self.arena.get_mut(id)?;
        req.satisfied = true;
        req.completed_at = Some(now);
        self.l2[bank].push_response(id);
        self.request_interconnect(self.cores.len() + bank);
        Ok(())
    }

    fn schedule_arbitrate(&mut self, tick: Tick) {
        if self.arbitrate_at.is_none_or(|at| tick < at) {
            self.arbitrate_at = Some(tick);
            self.events.schedule(tick, Event::Arbitrate);
        }
    }

    fn schedule_memory_issue(&mut self, tick: Tick) {
        if self.memory_issue_at.is_none_or(|at| tick < at) {
            self.memory_issue_at = Some(tick);
            self.events.schedule(tick, Event::MemoryIssue);
        }
    }

    fn schedule_l2_send(&mut self, bank: usize, tick: Tick) {
        if !self.l2_send_scheduled[bank] {
            self.l2_send_scheduled[bank] = true;
            self.events.schedule(tick, Event::CacheSend { cache: CacheId::l2(bank) });
        }
    }

    fn request_interconnect(&mut self, iface: IfaceId) {
        let now = self.now();
        if let Some(at) = self.interconnect.request(iface, now) {
            self.schedule_arbitrate(at);
        }
    }

    fn request_l1_send(&mut self, core: usize) {
        if self.l1[core].peek_send().is_some() {
            self.request_interconnect(core);
        }
    }

    fn schedule_core_retry(&mut self, core: usize) {
        let state = &mut self.cores[core];
        if !state.pending.is_empty() && !state.retry_scheduled && !self.l1[core].is_blocked() {
            state.retry_scheduled = true;
            self.events.schedule(self.events.now(), Event::CoreRetry { core });
        }
    }

    fn retry_core(&mut self, core: usize) -> SimResult<()> {
        self.cores[core].retry_scheduled = false;
        while let Some(&id) = self.cores[core].pending.front() {
            if self.l1[core].is_blocked() || !self.try_core_access(core, id)? {
                break;
            }
            let _ = self.cores[core].pending.pop_front();
        }
        Ok(())
    }

    fn arbitrate(&mut self) -> SimResult<()> {
        let now = self.now();
        if self.arbitrate_at == Some(now) {
            self.arbitrate_at = None;
        }
        let mut links = Links {
            l1: &mut self.l1,
            l2: &mut self.l2,
            arena: &mut self.arena,
            header_bytes: self.header_bytes,
            blk_size: self.blk_size,
            freed_write_slots: Vec::new(),
        };
        let result = self.interconnect.arbitrate(now, &mut links)?;
        let freed = links.freed_write_slots;

        for delivery in &result.granted {
            self.events.schedule(delivery.ready_at, Event::Deliver);
            let more = if delivery.from < self.cores.len() {
                self.l1[delivery.from].peek_send().is_some()
            } else {
                self.l2[delivery.from - self.cores.len()].peek_response().is_some()
            };
            if more {
                self.request_interconnect(delivery.from);
            }
        }
        if let Some(next) = result.next {
            self.schedule_arbitrate(next);
        }
        for core in freed {
            self.retry_deferred_l1_fills(core)?;
            self.schedule_core_retry(core);
        }
        Ok(())
    }

    fn deliver(&mut self) -> SimResult<()> {
        let now = self.now();
        while let Some(delivery) = self.interconnect.next_delivery(now) {
            if delivery.to < self.cores.len() {
                self.deliver_to_l1(delivery)?;
            } else if !self.deliver_to_l2(delivery)? {
                self.interconnect.defer(delivery);
            }
        }
        Ok(())
    }

    fn deliver_to_l1(&mut self, delivery: Delivery) -> SimResult<()> {
        let core = delivery.to;
        let id = delivery.req;
        if matches!(self.arena.get(id)?.cmd, MemCmd::Directory(_)) {
            self.l1[core].absorb_directory(&self.arena, id)?;
            let _ = self.arena.release(id, Holder::Interconnect)?;
            return Ok(());
        }
        let result = self.fill_l1(core, id)?;
        if !result.deferred {
            let _ = self.arena.release(id, Holder::Interconnect)?;
        }
        self.after_l1_fill(core, &result);
        Ok(())
    }

    /// Presents a delivered request to its L2 bank; `false` if the bank refused it.
    fn deliver_to_l2(&mut self, delivery: Delivery) -> SimResult<bool> {
        let bank = delivery.to - self.cores.len();
        let id = delivery.req;
        let now = self.now();
        let outcome = self.l2[bank].access(&mut self.arena, id, now)?;
        let accepted = match outcome {
            AccessOutcome::Hit { ready_at, respond } => {
                if respond {
                    self.events.schedule(ready_at, Event::CacheRespond { cache: CacheId::l2(bank), req: id });
                }
                true
            }
            AccessOutcome::WriteBuffered { ready_at, respond } => {
                if respond {
                    self.events.schedule(ready_at, Event::CacheRespond { cache: CacheId::l2(bank), req: id });
                }
                self.schedule_l2_send(bank, now);
                true
            }
            AccessOutcome::Miss => {
                self.schedule_l2_send(bank, now);
                true
            }
            AccessOutcome::MshrHit => true,
            AccessOutcome::Blocked(cause) => {
                trace!(bank, req = %id, %cause, "delivery refused by L2 bank");
                false
            }
        };
        if accepted {
            let _ = self.arena.release(id, Holder::Interconnect)?;
        }
        self.sync_l2_blocked(bank);
        Ok(accepted)
    }

    /// Mirrors the blocked causes of an L2 bank onto its interconnect interface.
    fn sync_l2_blocked(&mut self, bank: usize) {
        let iface = self.cores.len() + bank;
        let causes = self.l2[bank].blocked();
        let mut unblocked = false;
        for cause in BlockedCause::ALL {
            if causes.contains(cause) {
                let _ = self.interconnect.set_blocked(iface, cause);
            } else {
                unblocked |= self.interconnect.clear_blocked(iface, cause);
            }
        }
        if unblocked {
            let now = self.now();
            self.schedule_arbitrate(now);
            self.events.schedule(now, Event::Deliver);
        }
    }

    fn fill_l1(&mut self, core: usize, fetch: ReqId) -> SimResult<FillResult> {
        let now = self.events.now();
        if !self.l1[core].coherence().is_directory_and_l1_data_cache() {
            return self.l1[core].handle_fill(&mut self.arena, fetch, now, None);
        }
        let (before, rest) = self.l1.split_at_mut(core);
        let Some((me, after)) = rest.split_first_mut() else {
            return Err(SimError::invariant("system", format!("no L1 for core {core}")));
        };
        let others: Vec<(RequesterId, &mut dyn TagStore)> = before
            .iter_mut()
            .enumerate()
            .chain(after.iter_mut().enumerate().map(|(i, c)| (core + 1 + i, c)))
            .map(|(i, c)| (i, c.tags_mut()))
            .collect();
        let mut peers = Peers::new(core, others);
        me.handle_fill(&mut self.arena, fetch, now, Some(&mut peers))
    }

    fn after_l1_fill(&mut self, core: usize, result: &FillResult) {
        for &(id, ready) in &result.responses {
            self.events.schedule(ready, Event::CacheRespond { cache: CacheId::l1(core), req: id });
        }
        self.request_l1_send(core);
        self.schedule_core_retry(core);
    }

    fn retry_deferred_l1_fills(&mut self, core: usize) -> SimResult<()> {
        while let Some(fetch) = self.l1[core].pop_deferred_fill() {
            let result = self.fill_l1(core, fetch)?;
            if result.deferred {
                break;
            }
            let _ = self.arena.release(fetch, Holder::Interconnect)?;
            self.after_l1_fill(core, &result);
        }
        Ok(())
    }

    fn retry_deferred_l2_fills(&mut self, bank: usize) -> SimResult<()> {
        let now = self.now();
        while let Some(fetch) = self.l2[bank].pop_deferred_fill() {
            let result = self.l2[bank].handle_fill(&mut self.arena, fetch, now, None)?;
            if result.deferred {
                break;
            }
            let _ = self.arena.release(fetch, Holder::MemoryQueue)?;
            self.after_l2_fill(bank, &result);
        }
        Ok(())
    }

    fn after_l2_fill(&mut self, bank: usize, result: &FillResult) {
        for &(id, ready) in &result.responses {
            self.events.schedule(ready, Event::CacheRespond { cache: CacheId::l2(bank), req: id });
        }
        let now = self.now();
        if self.l2[bank].peek_send().is_some() {
            self.schedule_l2_send(bank, now);
        }
        self.sync_l2_blocked(bank);
    }

    /// Moves the next packet of an L2 bank onto the memory bus.
    fn send_l2_downstream(&mut self, bank: usize) -> SimResult<()> {
        self.l2_send_scheduled[bank] = false;
        let Some((slot, packet)) = self.l2[bank].peek_send() else {
            return Ok(());
        };
        let class = memory_class(self.arena.get(packet)?, self.cores.len());
        if self.memory.is_blocked_for(class) {
            self.l2_waiting_memory[bank] = true;
            trace!(bank, class, "memory blocked; packet held in the bank");
            return Ok(());
        }
        let now = self.now();
        let sent = self.l2[bank].take_send(&mut self.arena, slot, Holder::MemoryQueue, now)?;
        self.memory.insert_request(sent.packet, self.arena.get(sent.packet)?, now)?;
        self.note_memory_occupancy();
        self.schedule_memory_issue(now + self.bus_latency);

        if sent.kind == BufferKind::Write {
            self.retry_deferred_l2_fills(bank)?;
        }
        self.sync_l2_blocked(bank);
        if self.l2[bank].peek_send().is_some() {
            self.schedule_l2_send(bank, now + 1);
        }
        Ok(())
    }

    fn note_memory_occupancy(&mut self) {
        let queued = self.memory.queued();
        let blocked = self.memory.is_blocked();
        let stats = self.dram.stats_mut();
        stats.max_queue = stats.max_queue.max(queued);
        if blocked && !self.memory_blocked {
            stats.blocked_events += 1;
            debug!(queued, "memory controller blocked");
        }
        self.memory_blocked = blocked;
    }

    fn issue_memory_command(&mut self) -> SimResult<()> {
        let now = self.now();
        if self.memory_issue_at == Some(now) {
            self.memory_issue_at = None;
        }
        if self.dram.is_busy(now) {
            self.schedule_memory_issue(self.dram.busy_until());
            return Ok(());
        }
        let Some(cmd) = self.memory.get_request(now)? else {
            return Ok(());
        };
        let done = self.dram.execute(&cmd, now);
        trace!(?cmd, done, "dram command");
        if let DramCommand::Access { req, .. } = cmd {
            self.events.schedule(done + self.bus_latency, Event::MemoryDone { req });
            self.note_memory_occupancy();
            for bank in 0..self.l2.len() {
                if std::mem::take(&mut self.l2_waiting_memory[bank]) {
                    self.schedule_l2_send(bank, now);
                }
            }
        }
        self.schedule_memory_issue(done);
        Ok(())
    }

    fn memory_done(&mut self, id: ReqId) -> SimResult<()> {
        let now = self.now();
        let req = self.arena.get_mut(id)?;
        req.satisfied = true;
        req.completed_at = Some(now);
        let fill_bank = match req.origin {
            Some(CacheId {
                level: Level::L2,
                index,
            }) if req.cmd.is_read() && req.mshr.is_some() => Some(index),
            _ => None,
        };
        let Some(bank) = fill_bank else {
            let _ = self.arena.release(id, Holder::MemoryQueue)?;
            return Ok(());
        };
        let result = self.l2[bank].handle_fill(&mut self.arena, id, now, None)?;
        if !result.deferred {
            let _ = self.arena.release(id, Holder::MemoryQueue)?;
        }
        self.after_l2_fill(bank, &result);
        Ok(())
    }

    fn partition_epoch(&mut self) -> SimResult<()> {
        let now = self.now();
        let Some(partition) = &mut self.partition else {
            return Ok(());
        };
        let mut curves = vec![HitCurve::default(); self.cores.len()];
        for bank in &self.l2 {
            for (sum, curve) in curves.iter_mut().zip(bank.shadow_curves().unwrap_or_default()) {
                sum.accumulate(curve);
            }
        }
        let action = partition.on_epoch(now, &curves)?;
        for bank in &mut self.l2 {
            bank.set_quotas(Some(action.quotas.clone()));
            if action.reset_shadow {
                bank.reset_shadow();
            }
        }
        self.events.schedule(action.next, Event::PartitionEpoch);
        Ok(())
    }

    /// Drops every waiting access of `core`: its queued retries and its targets on
    /// MSHRs that have not been sent yet. Accesses already in service complete normally.
    ///
    /// # Returns
    ///
    /// The squashed requests (no longer live).
    pub fn squash(&mut self, core: usize) -> SimResult<Vec<ReqId>> {
        if core >= self.cores.len() {
            return Err(SimError::config("system", format!("core {core} does not exist")));
        }
        let now = self.now();
        let mut squashed: Vec<ReqId> = self.cores[core].pending.drain(..).collect();
        squashed.extend(self.l1[core].squash(&mut self.arena, core, now)?);
        for &id in &squashed {
            let _ = self.arena.release(id, Holder::Issuer)?;
        }
        self.cores[core].stats.squashed += squashed.len() as u64;
        debug!(core, squashed = squashed.len(), "core squashed");
        Ok(squashed)
    }

    /// Applies an externally snooped invalidate of the block at `addr`.
    ///
    /// The owning L2 bank sees it first; when its protocol forwards invalidates toward
    /// the cores, every L1 applies it too.
    pub fn invalidate(&mut self, addr: PhysAddr) -> SimResult<Invalidation> {
        let addr = addr.block_align(self.blk_size);
        let bank = self.bank_for(addr);
        let mut out = Invalidation::default();
        let mut note = |r: SnoopResult| {
            out.invalidated += usize::from(r.invalidated);
            out.dirty_supplied |= r.dirty_supplied;
        };
        let l2 = self.l2[bank].snoop_invalidate(addr)?;
        note(l2);
        if l2.forward_upward {
            for cache in &mut self.l1 {
                note(cache.snoop_invalidate(addr)?);
            }
        }
        Ok(out)
    }

    /// Writes every cache's tag array into `dir`.
    pub fn checkpoint(&self, dir: &Path) -> SimResult<Vec<PathBuf>> {
        self.l1.iter().chain(&self.l2).map(|c| c.checkpoint(dir)).collect()
    }

    /// Restores every cache's tag array from `dir`.
    ///
    /// # Returns
    ///
    /// Total valid blocks restored.
    pub fn restore(&mut self, dir: &Path) -> SimResult<usize> {
        let mut restored = 0;
        for cache in self.l1.iter_mut().chain(&mut self.l2) {
            restored += cache.restore(dir)?;
        }
        Ok(restored)
    }

    /// Statistics snapshot.
    pub fn stats(&self) -> SimStats {
        let now = self.now();
        SimStats {
            ticks: now,
            events: self.events.dispatched(),
            requests_created: self.arena.created(),
            cores: self.cores.iter().map(|c| c.stats.clone()).collect(),
            l1: self.l1.iter().map(|c| c.stats(now)).collect(),
            l2: self.l2.iter().map(|c| c.stats(now)).collect(),
            interconnect: self.interconnect.stats().clone(),
            memory: self.dram.stats().clone(),
            partition: self
                .partition
                .as_ref()
                .map(PartitionController::stats)
                .unwrap_or_default(),
        }
    }
}
