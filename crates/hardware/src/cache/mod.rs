//! Cache controller.
//!
//! A [`CacheController`] orchestrates one cache (a private L1 or one bank of the shared
//! L2) out of three pluggable strategies chosen at construction time:
//!
//! 1. **Tags:** [`TagStore`] (set-associative LRU with way partitioning).
//! 2. **Miss handling:** [`MissHandling`] (addressable MSHR queue or a blocking buffer).
//! 3. **Coherence:** [`Coherence`] (uniprocessor pass-through or directory).
//!
//! The controller owns no clock and no links. The system calls [`CacheController::access`]
//! when a request arrives, [`CacheController::handle_fill`] when a fetch returns, and
//! drains outgoing packets with [`CacheController::peek_send`] /
//! [`CacheController::take_send`] (and, on the L2, responses with
//! [`CacheController::take_response`]). Capacity exhaustion never fails: it sets a
//! [`BlockedCause`] and the cache refuses accesses until every cause is cleared.

/// Blocked causes and the cause set.
pub mod blocked;

/// Cache block metadata.
pub mod block;

/// Tag-array checkpoints.
pub mod checkpoint;

/// Coherence protocols.
pub mod coherence;

/// Miss and write-buffer handling strategies.
pub mod miss;

/// MSHRs and the MSHR queue.
pub mod mshr;

/// Shadow tags for miss-curve sampling.
pub mod shadow;

/// Tag store and partition-aware LRU replacement.
pub mod tags;

use std::collections::VecDeque;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, trace, warn};

use self::block::{CacheBlock, DirState};
use self::blocked::{BlockedCause, BlockedSet};
use self::coherence::{
    Coherence, DirectoryCoherence, EvictAction, Peers, UniCoherence, plain_eviction,
};
use self::miss::{BlockingBuffer, BufferKind, MissHandling, MissQueue, Slot};
use self::mshr::MshrId;
use self::shadow::{HitCurve, ShadowTags};
use self::tags::{Geometry, Lookup, LruTags, TagStore};
use crate::common::{PhysAddr, RequesterId, SimError, SimResult, Tick};
use crate::config::{CacheConfig, CoherenceKind, MissHandlingKind};
use crate::request::{DirectoryMsg, Holder, MemCmd, MemRequest, ReqId, RequestArena};
use crate::stats::CacheStats;

/// Size in bytes of a directory message that carries no data.
const CONTROL_MSG_BYTES: u32 = 8;

/// Hierarchy level of a cache.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum Level {
    /// Private per-core cache.
    L1,
    /// Shared cache bank.
    L2,
}

/// Identity of a cache in the system.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct CacheId {
    /// Level.
    pub level: Level,
    /// Core index for an L1, bank index for an L2.
    pub index: usize,
}

impl CacheId {
    /// The L1 of `core`.
    pub const fn l1(core: usize) -> Self {
        Self {
            level: Level::L1,
            index: core,
        }
    }

    /// L2 bank `bank`.
    pub const fn l2(bank: usize) -> Self {
        Self {
            level: Level::L2,
            index: bank,
        }
    }
}

impl fmt::Display for CacheId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.level {
            Level::L1 => write!(f, "l1.{}", self.index),
            Level::L2 => write!(f, "l2.bank{}", self.index),
        }
    }
}

/// Result of presenting a request to a cache.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AccessOutcome {
    /// Serviced from the array.
    Hit {
        /// Tick the data is available.
        ready_at: Tick,
        /// The cache took a `Response` reference and a completion must be scheduled.
        respond: bool,
    },
    /// Joined an outstanding MSHR as a target.
    MshrHit,
    /// Allocated a new MSHR; its fetch waits in the miss queue.
    Miss,
    /// Placed in the write buffer without allocating.
    WriteBuffered {
        /// Tick the write is considered done by the issuer.
        ready_at: Tick,
        /// The cache took a `Response` reference and a completion must be scheduled.
        respond: bool,
    },
    /// Refused; the request stays with its issuer.
    Blocked(BlockedCause),
}

/// Result of a fill.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FillResult {
    /// Resolved targets with their ready ticks, in FIFO order. Each carries a
    /// `Response` reference for the caller to consume.
    pub responses: Vec<(ReqId, Tick)>,
    /// The fill waits for a write-buffer slot; the fetch stays with its current holder.
    pub deferred: bool,
    /// A write target met a read-only fill and the MSHR was re-issued exclusive.
    pub reissued: bool,
    /// Address of the block evicted by the fill.
    pub evicted: Option<PhysAddr>,
}

/// A packet handed to the downstream link.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Sent {
    /// The request sent.
    pub packet: ReqId,
    /// Buffer the packet came from.
    pub kind: BufferKind,
}

/// Result of a snooped invalidate.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SnoopResult {
    /// A local copy was invalidated.
    pub invalidated: bool,
    /// The invalidated copy was dirty; its data goes to the invalidator.
    pub dirty_supplied: bool,
    /// The invalidate must be passed toward the cores.
    pub forward_upward: bool,
}

/// Timing and policy parameters of a cache.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CacheParams {
    /// Hit latency in ticks.
    pub hit_latency: Tick,
    /// Allocate on a write miss.
    pub write_allocate: bool,
    /// Bytes delivered per tick on the fill path.
    pub fill_bus_width: u64,
    /// Closest cache to the cores.
    pub top_level: bool,
    /// Requesters tracked in the statistics.
    pub requesters: usize,
}

/// One cache with its MSHRs, write buffer and coherence logic.
pub struct CacheController {
    id: CacheId,
    name: String,
    tags: Box<dyn TagStore>,
    miss: Box<dyn MissHandling>,
    coherence: Box<dyn Coherence>,
    shadow: Option<ShadowTags>,
    blocked: BlockedSet,
    blocked_since: [Tick; 5],
    no_targets_mshr: Option<MshrId>,
    deferred_fills: VecDeque<ReqId>,
    responses: VecDeque<ReqId>,
    params: CacheParams,
    blk_size: u64,
    stats: CacheStats,
}

impl fmt::Debug for CacheController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheController")
            .field("name", &self.name)
            .field("miss", &self.miss.name())
            .field("coherence", &self.coherence.name())
            .field("blocked", &self.blocked.to_string())
            .finish_non_exhaustive()
    }
}

impl CacheController {
    /// Builds a cache from its configuration.
    ///
    /// # Arguments
    ///
    /// * `id` - Identity of the cache.
    /// * `config` - Level configuration.
    /// * `geometry` - Geometry of this cache (one bank for the L2).
    /// * `requesters` - Number of cores.
    /// * `shadow` - Shadow tags to feed, if partitioning is active.
    ///
    /// # Errors
    ///
    /// [`SimError::Config`] if the miss-handling parameters are rejected.
    pub fn new(
        id: CacheId,
        config: &CacheConfig,
        geometry: Geometry,
        requesters: usize,
        shadow: Option<ShadowTags>,
    ) -> SimResult<Self> {
        let tags: Box<dyn TagStore> =
            Box::new(LruTags::new(geometry, config.max_use_ways, requesters));
        let miss: Box<dyn MissHandling> = match config.miss_handling {
            MissHandlingKind::Queue => Box::new(MissQueue::new(
                config.mshrs,
                config.mshr_reserve,
                config.max_targets,
                config.write_buffers,
            )?),
            MissHandlingKind::Blocking => Box::new(BlockingBuffer::new()?),
        };
        let coherence: Box<dyn Coherence> = match config.coherence {
            CoherenceKind::Uni => Box::new(UniCoherence),
            CoherenceKind::Directory => Box::new(DirectoryCoherence),
        };
        let params = CacheParams {
            hit_latency: config.hit_latency,
            write_allocate: config.write_allocate,
            fill_bus_width: config.fill_bus_width,
            top_level: id.level == Level::L1,
            requesters,
        };
        let mut cache = Self::from_parts(id, tags, miss, coherence, params);
        cache.shadow = shadow;
        Ok(cache)
    }

    /// Assembles a cache from explicit strategies.
    pub fn from_parts(
        id: CacheId,
        tags: Box<dyn TagStore>,
        miss: Box<dyn MissHandling>,
        coherence: Box<dyn Coherence>,
        params: CacheParams,
    ) -> Self {
        let name = id.to_string();
        let blk_size = tags.geometry().blk_size;
        Self {
            stats: CacheStats::new(name.clone(), params.requesters),
            id,
            name,
            tags,
            miss,
            coherence,
            shadow: None,
            blocked: BlockedSet::new(),
            blocked_since: [0; 5],
            no_targets_mshr: None,
            deferred_fills: VecDeque::new(),
            responses: VecDeque::new(),
            params,
            blk_size,
        }
    }

    /// Identity.
    pub const fn id(&self) -> CacheId {
        self.id
    }

    /// Name used in logs, statistics and checkpoint files.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Block size in bytes.
    pub const fn block_size(&self) -> u64 {
        self.blk_size
    }

    /// Hit latency in ticks.
    pub const fn hit_latency(&self) -> Tick {
        self.params.hit_latency
    }

    /// Current blocked causes.
    pub const fn blocked(&self) -> BlockedSet {
        self.blocked
    }

    /// Returns `true` while any blocked cause is set.
    pub fn is_blocked(&self) -> bool {
        self.blocked.is_blocked()
    }

    /// Tag store.
    pub fn tags(&self) -> &dyn TagStore {
        self.tags.as_ref()
    }

    /// Tag store, mutably (directory peers, partition quotas).
    pub fn tags_mut(&mut self) -> &mut dyn TagStore {
        self.tags.as_mut()
    }

    /// Miss handling strategy.
    pub fn miss_handling(&self) -> &dyn MissHandling {
        self.miss.as_ref()
    }

    /// Coherence protocol.
    pub fn coherence(&self) -> &dyn Coherence {
        self.coherence.as_ref()
    }

    /// Sampled hit curves, if shadow tags are attached.
    pub fn shadow_curves(&self) -> Option<&[HitCurve]> {
        self.shadow.as_ref().map(ShadowTags::curves)
    }

    /// Clears the shadow-tag counters.
    pub fn reset_shadow(&mut self) {
        if let Some(shadow) = &mut self.shadow {
            shadow.reset();
        }
    }

    /// Installs (or removes) partition quotas.
    pub fn set_quotas(&mut self, quotas: Option<Vec<usize>>) {
        debug!(cache = %self.id, ?quotas, "partition quotas installed");
        self.tags.set_quotas(quotas);
    }

    /// Returns `true` when nothing is outstanding in the cache.
    pub fn is_idle(&self) -> bool {
        self.miss.outstanding() == 0 && self.responses.is_empty() && self.deferred_fills.is_empty()
    }

    /// Statistics snapshot; open blocked intervals are counted up to `now`.
    pub fn stats(&self, now: Tick) -> CacheStats {
        let mut stats = self.stats.clone();
        stats.interference = self.tags.interference().to_vec();
        for cause in self.blocked.iter() {
            stats.blocked_ticks[cause.index()] +=
                now.saturating_sub(self.blocked_since[cause.index()]);
        }
        stats
    }

    fn set_blocked(&mut self, cause: BlockedCause, now: Tick) {
        if self.blocked.contains(cause) {
            return;
        }
        let _ = self.blocked.insert(cause);
        self.blocked_since[cause.index()] = now;
        self.stats.blocked_events[cause.index()] += 1;
        debug!(cache = %self.id, %cause, blocked = %self.blocked, "cache blocked");
    }

    fn clear_blocked(&mut self, cause: BlockedCause, now: Tick) {
        if !self.blocked.contains(cause) {
            return;
        }
        let unblocked = self.blocked.remove(cause);
        self.stats.blocked_ticks[cause.index()] +=
            now.saturating_sub(self.blocked_since[cause.index()]);
        debug!(cache = %self.id, %cause, unblocked, "blocked cause cleared");
    }

    fn refuse(&mut self, cause: BlockedCause, now: Tick) -> AccessOutcome {
        self.set_blocked(cause, now);
        self.stats.blocked_rejections += 1;
        AccessOutcome::Blocked(cause)
    }

    fn record_lookup(&mut self, addr: PhysAddr, requester: RequesterId, hit: bool) {
        self.stats.accesses += 1;
        if hit {
            self.stats.hits += 1;
            if let Some(c) = self.stats.hits_by_requester.get_mut(requester) {
                *c += 1;
            }
        } else {
            self.stats.misses += 1;
            if let Some(c) = self.stats.misses_by_requester.get_mut(requester) {
                *c += 1;
            }
        }
        if let Some(shadow) = &mut self.shadow {
            let _ = shadow.access(addr, requester);
        }
    }

    /// Presents a request to the cache.
    ///
    /// On acceptance the cache registers its own reference to `id` (`Target` for MSHR
    /// targets, `Response` for completions it will report, `Issuer` for writebacks it
    /// forwards); the caller keeps whatever reference it already held.
    ///
    /// # Arguments
    ///
    /// * `arena` - Request arena.
    /// * `id` - Request to service.
    /// * `now` - Current tick.
    ///
    /// # Returns
    ///
    /// How the request was handled, or which cause refused it.
    ///
    /// # Errors
    ///
    /// [`SimError::Invariant`] for commands a cache cannot service and for arena
    /// inconsistencies.
    pub fn access(
        &mut self,
        arena: &mut RequestArena,
        id: ReqId,
        now: Tick,
    ) -> SimResult<AccessOutcome> {
        if let Some(cause) = self.blocked.iter().next() {
            self.stats.blocked_rejections += 1;
            return Ok(AccessOutcome::Blocked(cause));
        }
        let req = arena.get_mut(id)?;
        req.arrived_at = now;
        let (cmd, addr, asid, requester, uncacheable) =
            (req.cmd, req.addr, req.asid, req.requester, req.flags.uncacheable);
        trace!(cache = %self.id, req = %id, %cmd, %addr, "access");

        match cmd {
            MemCmd::Writeback => return self.absorb_writeback(arena, id, now),
            MemCmd::Read | MemCmd::ReadEx | MemCmd::Write | MemCmd::Prefetch => {}
            other => {
                return Err(SimError::invariant(
                    &self.name,
                    format!("{other} request {id} cannot be serviced by a cache"),
                ));
            }
        }

        if uncacheable {
            self.stats.uncacheable += 1;
            return if cmd.is_write() {
                self.buffer_write(arena, id, now)
            } else {
                self.allocate_miss(arena, id, None, now)
            };
        }

        let lookup = self.tags.lookup(addr, requester);
        let mut present = None;
        if let Lookup::Hit { set, pos } = lookup {
            let blk = self.tags.block(set, pos).cloned();
            if !cmd.needs_exclusive() || blk.as_ref().is_some_and(CacheBlock::is_writable) {
                return self.hit(arena, id, set, pos, now);
            }
            present = blk;
        }

        let mshr_queue = self.miss.queue(BufferKind::Miss);
        if let Some(mshr) = mshr_queue.find_match(addr, asid, self.blk_size) {
            if mshr_queue.targets_full(mshr) {
                self.no_targets_mshr = Some(mshr);
                return Ok(self.refuse(BlockedCause::NoTargets, now));
            }
            self.record_lookup(addr, requester, false);
            self.miss
                .queue_mut(BufferKind::Miss)
                .allocate_target(mshr, id)?;
            arena.retain(id, Holder::Target)?;
            arena.get_mut(id)?.waiting_on = Some(mshr);
            self.stats.mshr_hits += 1;
            if self.miss.queue(BufferKind::Miss).targets_full(mshr) {
                self.no_targets_mshr = Some(mshr);
                self.set_blocked(BlockedCause::NoTargets, now);
            }
            return Ok(AccessOutcome::MshrHit);
        }

        if cmd == MemCmd::Write && !self.params.write_allocate {
            if self.miss.write_buffer_full() {
                return Ok(self.refuse(BlockedCause::NoWbBuffers, now));
            }
            self.record_lookup(addr, requester, false);
            return self.buffer_write(arena, id, now);
        }
        if self.miss.mshrs_full() {
            return Ok(self.refuse(BlockedCause::NoMshrs, now));
        }
        self.record_lookup(addr, requester, false);
        if present.is_some() {
            self.stats.upgrades += 1;
        }
        self.allocate_miss(arena, id, present.as_ref(), now)
    }

    fn hit(
        &mut self,
        arena: &mut RequestArena,
        id: ReqId,
        set: usize,
        pos: usize,
        now: Tick,
    ) -> SimResult<AccessOutcome> {
        let req = arena.get(id)?;
        let (addr, requester, is_write, respond) =
            (req.addr, req.requester, req.cmd.is_write(), req.needs_response());
        self.record_lookup(addr, requester, true);
        let ready_at = self
            .tags
            .block(set, pos)
            .map_or(now, |b| b.ready_at)
            .max(now + self.params.hit_latency);
        self.tags.touch(set, pos);
        if is_write {
            if let Some(blk) = self.tags.block_mut(set, 0) {
                blk.dirty = true;
            }
        }
        if respond {
            arena.retain(id, Holder::Response)?;
        }
        Ok(AccessOutcome::Hit { ready_at, respond })
    }

    fn absorb_writeback(
        &mut self,
        arena: &mut RequestArena,
        id: ReqId,
        now: Tick,
    ) -> SimResult<AccessOutcome> {
        let addr = arena.get(id)?.addr;
        if let Some((set, pos)) = self.tags.probe(addr) {
            self.stats.writebacks_received += 1;
            if let Some(blk) = self.tags.block_mut(set, pos) {
                blk.dirty = true;
            }
            return Ok(AccessOutcome::Hit {
                ready_at: now,
                respond: false,
            });
        }
        if self.miss.write_buffer_full() {
            return Ok(self.refuse(BlockedCause::NoWbBuffers, now));
        }
        self.stats.writebacks_received += 1;
        arena.retain(id, Holder::Issuer)?;
        let mshr = self
            .miss
            .queue_mut(BufferKind::Write)
            .allocate_packet(id, arena.get(id)?, self.blk_size)?;
        arena.get_mut(id)?.mshr = Some(mshr);
        if self.miss.write_buffer_full() {
            self.set_blocked(BlockedCause::NoWbBuffers, now);
        }
        Ok(AccessOutcome::WriteBuffered {
            ready_at: now,
            respond: false,
        })
    }

    fn buffer_write(
        &mut self,
        arena: &mut RequestArena,
        id: ReqId,
        now: Tick,
    ) -> SimResult<AccessOutcome> {
        if self.miss.write_buffer_full() {
            return Ok(self.refuse(BlockedCause::NoWbBuffers, now));
        }
        let req = arena.get(id)?;
        let respond = req.needs_response();
        let mut write = MemRequest::new(MemCmd::Write, req.addr, req.size, req.requester, now)
            .with_asid(req.asid);
        write.flags.uncacheable = req.flags.uncacheable;
        write.flags.expects_response = false;
        write.origin = Some(self.id);
        write.data.clone_from(&req.data);
        self.push_write_packet(arena, write, now)?;
        self.stats.buffered_writes += 1;
        if respond {
            arena.retain(id, Holder::Response)?;
        }
        Ok(AccessOutcome::WriteBuffered {
            ready_at: now + self.params.hit_latency,
            respond,
        })
    }

    fn allocate_miss(
        &mut self,
        arena: &mut RequestArena,
        id: ReqId,
        present: Option<&CacheBlock>,
        now: Tick,
    ) -> SimResult<AccessOutcome> {
        if self.miss.mshrs_full() {
            return Ok(self.refuse(BlockedCause::NoMshrs, now));
        }
        let req = arena.get(id)?;
        let uncacheable = req.flags.uncacheable;
        let (fetch_cmd, addr, size) = if uncacheable {
            (MemCmd::Read, req.addr, req.size)
        } else {
            (
                self.coherence.get_mem_cmd(req.cmd, present),
                req.addr.block_align(self.blk_size),
                self.blk_size as u32,
            )
        };
        let mut fetch = MemRequest::new(fetch_cmd, addr, size, req.requester, now).with_asid(req.asid);
        fetch.origin = Some(self.id);
        fetch.flags.cache_line_fill = !uncacheable;
        fetch.flags.uncacheable = uncacheable;

        let mshr = self
            .miss
            .queue_mut(BufferKind::Miss)
            .allocate(id, req, self.blk_size, size)?;
        fetch.mshr = Some(mshr);
        let fetch_id = arena.insert(fetch, Holder::Issuer);
        self.miss
            .queue_mut(BufferKind::Miss)
            .set_packet(mshr, fetch_id)?;
        arena.retain(id, Holder::Target)?;
        arena.get_mut(id)?.waiting_on = Some(mshr);
        self.stats.mshr_misses += 1;
        trace!(cache = %self.id, mshr = mshr.0, fetch = %fetch_id, %fetch_cmd, "miss allocated");
        if self.miss.mshrs_full() {
            self.set_blocked(BlockedCause::NoMshrs, now);
        }
        Ok(AccessOutcome::Miss)
    }

    fn push_write_packet(
        &mut self,
        arena: &mut RequestArena,
        req: MemRequest,
        now: Tick,
    ) -> SimResult<ReqId> {
        if self.miss.write_buffer_full() {
            return Err(SimError::invariant(
                &self.name,
                format!("{} for {} issued into a full write buffer", req.cmd, req.addr),
            ));
        }
        let id = arena.insert(req, Holder::Issuer);
        let mshr = self
            .miss
            .queue_mut(BufferKind::Write)
            .allocate_packet(id, arena.get(id)?, self.blk_size)?;
        arena.get_mut(id)?.mshr = Some(mshr);
        if self.miss.write_buffer_full() {
            self.set_blocked(BlockedCause::NoWbBuffers, now);
        }
        Ok(id)
    }

    fn send_directory(
        &mut self,
        arena: &mut RequestArena,
        msg: DirectoryMsg,
        addr: PhysAddr,
        to: RequesterId,
        present: u64,
        now: Tick,
    ) -> SimResult<bool> {
        // The sibling state is already updated; a message that finds no slot is elided.
        if self.miss.write_buffer_full() {
            debug!(cache = %self.id, ?msg, %addr, to, "directory message elided");
            return Ok(false);
        }
        let size = if msg == DirectoryMsg::OwnerWriteback {
            self.blk_size as u32
        } else {
            CONTROL_MSG_BYTES
        };
        let mut req = MemRequest::new(MemCmd::Directory(msg), addr, size, self.id.index, now);
        req.origin = Some(self.id);
        req.dir_target = Some(to);
        req.present = present;
        let _ = self.push_write_packet(arena, req, now)?;
        self.stats.directory_sent += 1;
        Ok(true)
    }

    /// Handles a directory message delivered from a sibling cache.
    ///
    /// Sibling state was already applied when the message was generated, so only the
    /// arrival is accounted; the caller keeps and releases its reference.
    pub fn absorb_directory(&mut self, arena: &RequestArena, id: ReqId) -> SimResult<()> {
        let req = arena.get(id)?;
        if !matches!(req.cmd, MemCmd::Directory(_)) {
            return Err(SimError::invariant(
                &self.name,
                format!("{} delivered as a directory message", req.cmd),
            ));
        }
        self.stats.directory_received += 1;
        trace!(cache = %self.id, req = %id, cmd = %req.cmd, "directory message received");
        Ok(())
    }

    /// Installs the block returned by `fetch` and resolves its MSHR targets.
    ///
    /// Targets are resolved in FIFO order. Ready ticks follow critical-word-first
    /// ordering: the first target's word arrives first and every other target waits for
    /// its offset to stream in over the fill bus. If a write target meets a read-only
    /// fill, the remaining targets stay on the MSHR and an exclusive fetch is re-issued.
    ///
    /// When the victim needs a writeback or directory message and the write buffer is
    /// full, the fill is deferred (see [`Self::pop_deferred_fill`]) and nothing changes.
    ///
    /// # Arguments
    ///
    /// * `arena` - Request arena.
    /// * `fetch` - The returning fetch; the cache releases its `Issuer` reference.
    /// * `now` - Current tick.
    /// * `peers` - Sibling tag stores, required under directory coherence.
    ///
    /// # Errors
    ///
    /// [`SimError::Invariant`] if the fetch does not belong to an MSHR of this cache,
    /// [`SimError::Coherence`] for directory violations.
    pub fn handle_fill(
        &mut self,
        arena: &mut RequestArena,
        fetch: ReqId,
        now: Tick,
        peers: Option<&mut Peers<'_>>,
    ) -> SimResult<FillResult> {
        let f = arena.get(fetch)?;
        let mshr_id = f.mshr.ok_or_else(|| {
            SimError::invariant(&self.name, format!("fill {fetch} carries no MSHR"))
        })?;
        let (fetch_cmd, install) = (f.cmd, f.flags.cache_line_fill);
        let mshr = self.miss.queue(BufferKind::Miss).get(mshr_id)?;
        if mshr.packet != Some(fetch) {
            return Err(SimError::invariant(
                &self.name,
                format!("fill {fetch} does not match the packet of {mshr_id:?}"),
            ));
        }
        let (addr, asid, thread) = (mshr.addr, mshr.asid, mshr.thread);

        let mut result = FillResult::default();
        let mut writable = true;
        if install {
            match self.install(arena, fetch, addr, thread, fetch_cmd, now, peers)? {
                Some((w, evicted)) => {
                    writable = w;
                    result.evicted = evicted;
                }
                None => {
                    result.deferred = true;
                    return Ok(result);
                }
            }
        }

        let width = self.params.fill_bus_width.max(1);
        let mut critical = None;
        let mut prev_ready = now;
        let mut reissue = false;
        loop {
            let Some(target) = self.miss.queue(BufferKind::Miss).get(mshr_id)?.front_target() else {
                break;
            };
            let Ok(treq) = arena.get(target) else {
                let _ = self.miss.queue_mut(BufferKind::Miss).pop_target(mshr_id)?;
                self.stats.dropped_targets += 1;
                warn!(cache = %self.id, req = %target, "target vanished before its fill");
                continue;
            };
            if install && treq.cmd.needs_exclusive() && !writable {
                reissue = true;
                break;
            }
            let offset = treq.addr.block_offset(self.blk_size);
            let (is_write, respond, arrived) =
                (treq.cmd.is_write(), treq.needs_response(), treq.arrived_at);
            let _ = self.miss.queue_mut(BufferKind::Miss).pop_target(mshr_id)?;

            let critical_offset = *critical.get_or_insert(offset);
            let delay = ((offset + self.blk_size - critical_offset) % self.blk_size) / width;
            let ready = prev_ready.max(now + self.params.hit_latency + delay);
            prev_ready = ready;
            self.stats.total_miss_latency += ready.saturating_sub(arrived);

            if is_write && install {
                if let Some(blk) = self
                    .tags
                    .probe(addr)
                    .and_then(|(set, pos)| self.tags.block_mut(set, pos))
                {
                    blk.dirty = true;
                }
            }
            arena.get_mut(target)?.waiting_on = None;
            if respond {
                arena.hand_off(target, Holder::Target, Holder::Response)?;
                result.responses.push((target, ready));
            } else {
                let _ = arena.release(target, Holder::Target)?;
            }
        }

        if reissue {
            let mut upgrade = MemRequest::new(MemCmd::ReadEx, addr, self.blk_size as u32, thread, now)
                .with_asid(asid);
            upgrade.origin = Some(self.id);
            upgrade.flags.cache_line_fill = true;
            upgrade.mshr = Some(mshr_id);
            let upgrade_id = arena.insert(upgrade, Holder::Issuer);
            let queue = self.miss.queue_mut(BufferKind::Miss);
            queue.mark_pending(mshr_id)?;
            queue.set_packet(mshr_id, upgrade_id)?;
            queue.get_mut(mshr_id)?.cmd = MemCmd::ReadEx;
            self.stats.upgrades += 1;
            result.reissued = true;
            debug!(cache = %self.id, %addr, "write targets re-issued as exclusive fetch");
        } else if self.miss.queue_mut(BufferKind::Miss).deallocate(mshr_id)? {
            self.clear_blocked(BlockedCause::NoMshrs, now);
        }
        if let Some(blocked_on) = self.no_targets_mshr {
            if !self.miss.queue(BufferKind::Miss).targets_full(blocked_on) {
                self.no_targets_mshr = None;
                self.clear_blocked(BlockedCause::NoTargets, now);
            }
        }
        let _ = arena.release(fetch, Holder::Issuer)?;
        Ok(result)
    }

    /// Picks a frame, evicts its occupant and installs the block at `addr`.
    ///
    /// Returns `None` when the fill must wait for a write-buffer slot, otherwise the
    /// write permission of the new copy and the evicted address.
    #[allow(clippy::too_many_arguments)]
    fn install(
        &mut self,
        arena: &mut RequestArena,
        fetch: ReqId,
        addr: PhysAddr,
        thread: RequesterId,
        fetch_cmd: MemCmd,
        now: Tick,
        mut peers: Option<&mut Peers<'_>>,
    ) -> SimResult<Option<(bool, Option<PhysAddr>)>> {
        let geometry = self.tags.geometry();
        let directory = self.coherence.is_directory_and_l1_data_cache();
        let (set, pos, reused) = match self.tags.probe(addr) {
            Some((set, pos)) => (set, pos, true),
            None => (geometry.set_of(addr), self.tags.find_victim(addr, thread), false),
        };
        let victim = if reused {
            None
        } else {
            self.tags.block(set, pos).filter(|b| b.valid).cloned()
        };

        if let Some(v) = &victim {
            let needs_packet = v.dirty || (directory && v.dir != DirState::OwnedExclusive);
            if needs_packet && self.miss.write_buffer_full() {
                self.deferred_fills.push_back(fetch);
                self.stats.deferred_fills += 1;
                self.set_blocked(BlockedCause::NoWbBuffers, now);
                debug!(cache = %self.id, %addr, "fill deferred for a write-buffer slot");
                return Ok(None);
            }
        }

        let mut action = EvictAction::Silent;
        let victim_addr = victim.as_ref().map(|v| geometry.addr_of(v.tag, set));
        if let (Some(v), Some(vaddr)) = (&victim, victim_addr) {
            action = if directory {
                peers
                    .as_deref_mut()
                    .ok_or_else(|| {
                        SimError::invariant(&self.name, "directory eviction without peers")
                    })?
                    .evict(vaddr, v)?
            } else {
                plain_eviction(v)
            };
        }
        let fill = if directory {
            Some(
                peers
                    .as_deref_mut()
                    .ok_or_else(|| SimError::invariant(&self.name, "directory fill without peers"))?
                    .prepare_fill(addr, fetch_cmd.needs_exclusive())?,
            )
        } else {
            None
        };

        let kept_dirty = reused && self.tags.block(set, pos).is_some_and(|b| b.dirty);
        let _ = self.tags.replace(set, pos, addr, thread, now);
        let writable = fill.map_or_else(|| self.coherence.fill_writable(fetch_cmd), |f| f.writable);
        if let Some(blk) = self.tags.block_mut(set, 0) {
            blk.writable = writable;
            blk.dirty = kept_dirty;
            if let Some(f) = fill {
                blk.dir = f.dir;
                blk.owner = Some(f.owner);
                blk.present = f.present;
                blk.dirty |= f.inherited_dirty;
            }
        }
        self.stats.fills += 1;

        if let (Some(v), Some(vaddr)) = (&victim, victim_addr) {
            let owner = v.requester.unwrap_or(thread);
            match action {
                EvictAction::Silent => {}
                EvictAction::Writeback => {
                    let mut wb =
                        MemRequest::new(MemCmd::Writeback, vaddr, self.blk_size as u32, owner, now);
                    wb.origin = Some(self.id);
                    let _ = self.push_write_packet(arena, wb, now)?;
                    self.stats.writebacks += 1;
                }
                EvictAction::Directory { msg, to, present } => {
                    let _ = self.send_directory(arena, msg, vaddr, to, present, now)?;
                }
            }
            trace!(cache = %self.id, victim = %vaddr, ?action, "block evicted");
        }
        if let Some(previous) = fill.and_then(|f| f.previous_owner) {
            if previous != self.id.index {
                let _ =
                    self.send_directory(arena, DirectoryMsg::OwnerTransfer, addr, previous, 0, now)?;
            }
        }
        Ok(Some((writable, victim_addr)))
    }

    /// Returns `true` if fills wait for a write-buffer slot.
    pub fn has_deferred_fills(&self) -> bool {
        !self.deferred_fills.is_empty()
    }

    /// Takes the oldest deferred fill if a write-buffer slot is free.
    pub fn pop_deferred_fill(&mut self) -> Option<ReqId> {
        if self.miss.write_buffer_full() {
            return None;
        }
        self.deferred_fills.pop_front()
    }

    /// Next packet to send downstream, if any.
    pub fn peek_send(&self) -> Option<(Slot, ReqId)> {
        let slot = self.miss.next_to_send()?;
        let packet = self.miss.queue(slot.kind).get(slot.mshr).ok()?.packet?;
        Some((slot, packet))
    }

    /// Marks the packet of `slot` as sent and registers `transport` as its holder.
    ///
    /// Fetches stay referenced by their MSHR; write-buffer packets move to `transport`
    /// and free their slot.
    pub fn take_send(
        &mut self,
        arena: &mut RequestArena,
        slot: Slot,
        transport: Holder,
        now: Tick,
    ) -> SimResult<Sent> {
        let packet = self
            .miss
            .queue(slot.kind)
            .get(slot.mshr)?
            .packet
            .ok_or_else(|| SimError::invariant(&self.name, format!("{slot:?} has no packet")))?;
        let unblocked = self.miss.queue_mut(slot.kind).mark_in_service(slot.mshr)?;
        match slot.kind {
            BufferKind::Miss => arena.retain(packet, transport)?,
            BufferKind::Write => {
                arena.hand_off(packet, Holder::Issuer, transport)?;
                arena.get_mut(packet)?.mshr = None;
                if unblocked {
                    self.clear_blocked(BlockedCause::NoWbBuffers, now);
                }
            }
        }
        trace!(cache = %self.id, req = %packet, kind = ?slot.kind, "packet sent");
        Ok(Sent {
            packet,
            kind: slot.kind,
        })
    }

    /// Queues a completed request for the upstream link. The request must carry a
    /// `Response` reference.
    pub fn push_response(&mut self, id: ReqId) {
        self.responses.push_back(id);
    }

    /// Oldest queued response.
    pub fn peek_response(&self) -> Option<ReqId> {
        self.responses.front().copied()
    }

    /// Dequeues the oldest response and moves its reference to `transport`.
    pub fn take_response(
        &mut self,
        arena: &mut RequestArena,
        transport: Holder,
    ) -> SimResult<Option<ReqId>> {
        let Some(id) = self.responses.pop_front() else {
            return Ok(None);
        };
        arena.hand_off(id, Holder::Response, transport)?;
        Ok(Some(id))
    }

    /// Applies a snooped invalidate.
    ///
    /// # Errors
    ///
    /// [`SimError::Coherence`] if the local copy is in an impossible directory state.
    pub fn snoop_invalidate(&mut self, addr: PhysAddr) -> SimResult<SnoopResult> {
        let blk = self
            .tags
            .probe(addr)
            .and_then(|(set, pos)| self.tags.block(set, pos));
        let action =
            self.coherence
                .handle_bus_request(MemCmd::Invalidate, addr, blk, self.params.top_level)?;
        let mut result = SnoopResult {
            forward_upward: action.forward_upward,
            ..SnoopResult::default()
        };
        if action.invalidate {
            if let Some(old) = self.tags.invalidate(addr) {
                result.invalidated = true;
                result.dirty_supplied = old.dirty;
                self.stats.snoop_invalidations += 1;
                debug!(cache = %self.id, %addr, dirty = old.dirty, "snoop invalidated block");
            }
        }
        Ok(result)
    }

    /// Drops every waiting target issued by `thread`.
    ///
    /// # Returns
    ///
    /// The removed targets; the cache released its `Target` reference on each.
    pub fn squash(
        &mut self,
        arena: &mut RequestArena,
        thread: RequesterId,
        now: Tick,
    ) -> SimResult<Vec<ReqId>> {
        let outcome = {
            let view: &RequestArena = arena;
            self.miss
                .queue_mut(BufferKind::Miss)
                .squash(thread, |id| view.get(id).ok().map(|r| r.requester))?
        };
        for &target in &outcome.removed_targets {
            arena.get_mut(target)?.waiting_on = None;
            let _ = arena.release(target, Holder::Target)?;
        }
        for &packet in &outcome.freed_packets {
            let _ = arena.release(packet, Holder::Issuer)?;
        }
        self.stats.squashed_targets += outcome.removed_targets.len() as u64;
        if outcome.unblocked {
            self.clear_blocked(BlockedCause::NoMshrs, now);
        }
        if let Some(blocked_on) = self.no_targets_mshr {
            if !self.miss.queue(BufferKind::Miss).targets_full(blocked_on) {
                self.no_targets_mshr = None;
                self.clear_blocked(BlockedCause::NoTargets, now);
            }
        }
        debug!(cache = %self.id, thread, removed = outcome.removed_targets.len(), "squash");
        Ok(outcome.removed_targets)
    }

    /// Writes the tag array to `<dir>/<name>-content.bin`.
    pub fn checkpoint(&self, dir: &Path) -> SimResult<PathBuf> {
        checkpoint::save(dir, &self.name, self.tags.as_ref())
    }

    /// Restores the tag array from `<dir>/<name>-content.bin`.
    ///
    /// # Returns
    ///
    /// The number of valid blocks restored.
    pub fn restore(&mut self, dir: &Path) -> SimResult<usize> {
        checkpoint::load(dir, &self.name, self.tags.as_mut())
    }
}
