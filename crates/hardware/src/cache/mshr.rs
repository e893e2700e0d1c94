//! Miss Status Holding Registers.
//!
//! An [`Mshr`] tracks one outstanding block-granularity transaction and the FIFO of
//! requests ("targets") waiting for it. An [`MshrQueue`] is a fixed pool of MSHRs
//! split into allocated, pending (not yet sent downstream) and free lists.
//!
//! A full queue or a full target list is not an error: the owning cache observes
//! [`MshrQueue::is_full`] / [`MshrQueue::targets_full`] and blocks. Calling
//! [`MshrQueue::allocate`] on a full queue is a caller defect and is rejected.

use std::collections::VecDeque;

use serde::Serialize;
use tracing::trace;

use crate::common::{Asid, PhysAddr, RequesterId, SimError, SimResult};
use crate::request::{MemCmd, MemRequest, ReqId};

/// Index of an MSHR inside its queue.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct MshrId(pub usize);

/// One outstanding transaction.
#[derive(Clone, Debug, Default)]
pub struct Mshr {
    /// Block address.
    pub addr: PhysAddr,
    /// Address-space identifier.
    pub asid: Asid,
    /// Transfer size in bytes.
    pub size: u32,
    /// Sent downstream and awaiting completion.
    pub in_service: bool,
    /// Requester of the first target.
    pub thread: RequesterId,
    /// Command of the request that allocated the MSHR.
    pub cmd: MemCmd,
    /// Request sent downstream on behalf of this MSHR.
    pub packet: Option<ReqId>,
    /// A response is expected for `packet`.
    pub needs_response: bool,
    targets: VecDeque<ReqId>,
    valid: bool,
}

impl Mshr {
    /// Number of waiting targets.
    pub fn num_targets(&self) -> usize {
        self.targets.len()
    }

    /// Returns `true` if any target waits.
    pub fn has_targets(&self) -> bool {
        !self.targets.is_empty()
    }

    /// Waiting targets in FIFO order.
    pub fn targets(&self) -> impl Iterator<Item = ReqId> + '_ {
        self.targets.iter().copied()
    }

    /// Oldest waiting target.
    pub fn front_target(&self) -> Option<ReqId> {
        self.targets.front().copied()
    }
}

/// Result of [`MshrQueue::squash`].
#[derive(Debug, Default, PartialEq, Eq)]
pub struct SquashOutcome {
    /// Targets removed from their MSHRs; the caller releases them.
    pub removed_targets: Vec<ReqId>,
    /// Packets of MSHRs deallocated by the squash; the caller releases them.
    pub freed_packets: Vec<ReqId>,
    /// The queue went from full to not full.
    pub unblocked: bool,
}

/// Fixed-capacity pool of MSHRs.
#[derive(Debug)]
pub struct MshrQueue {
    slots: Vec<Mshr>,
    allocated: Vec<MshrId>,
    pending: VecDeque<MshrId>,
    free: Vec<MshrId>,
    num_mshrs: usize,
    reserve: usize,
    max_targets: usize,
    allocated_targets: usize,
    in_service: usize,
}

impl MshrQueue {
    /// Creates a queue.
    ///
    /// # Arguments
    ///
    /// * `num_mshrs` - Total MSHRs.
    /// * `reserve` - MSHRs held back from normal allocation.
    /// * `max_targets` - Maximum targets per MSHR.
    ///
    /// # Errors
    ///
    /// [`SimError::Config`] when no MSHR would be usable or `max_targets` is zero.
    pub fn new(num_mshrs: usize, reserve: usize, max_targets: usize) -> SimResult<Self> {
        if num_mshrs == 0 || reserve >= num_mshrs {
            return Err(SimError::config(
                "mshr queue",
                format!("{num_mshrs} MSHRs with {reserve} reserved leaves none usable"),
            ));
        }
        if max_targets == 0 {
            return Err(SimError::config("mshr queue", "max targets must be positive"));
        }
        Ok(Self {
            slots: vec![Mshr::default(); num_mshrs],
            allocated: Vec::with_capacity(num_mshrs),
            pending: VecDeque::with_capacity(num_mshrs),
            free: (0..num_mshrs).rev().map(MshrId).collect(),
            num_mshrs,
            reserve,
            max_targets,
            allocated_targets: 0,
            in_service: 0,
        })
    }

    /// Usable MSHRs (`num_mshrs - reserve`).
    pub const fn capacity(&self) -> usize {
        self.num_mshrs - self.reserve
    }

    /// Maximum targets per MSHR.
    pub const fn max_targets(&self) -> usize {
        self.max_targets
    }

    /// Number of allocated MSHRs.
    pub fn len(&self) -> usize {
        self.allocated.len()
    }

    /// Returns `true` if nothing is allocated.
    pub fn is_empty(&self) -> bool {
        self.allocated.is_empty()
    }

    /// Returns `true` exactly when every usable MSHR is allocated.
    pub fn is_full(&self) -> bool {
        self.allocated.len() == self.capacity()
    }

    /// Number of MSHRs currently in service.
    pub const fn in_service(&self) -> usize {
        self.in_service
    }

    /// Number of targets across all MSHRs.
    pub const fn allocated_targets(&self) -> usize {
        self.allocated_targets
    }

    /// Returns `true` if some MSHR waits to be sent downstream.
    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Returns the MSHR to send downstream next.
    pub fn next_pending(&self) -> Option<MshrId> {
        self.pending.front().copied()
    }

    /// Allocated MSHRs in allocation order.
    pub fn allocated(&self) -> impl Iterator<Item = MshrId> + '_ {
        self.allocated.iter().copied()
    }

    /// Returns an allocated MSHR.
    pub fn get(&self, id: MshrId) -> SimResult<&Mshr> {
        match self.slots.get(id.0) {
            Some(mshr) if mshr.valid => Ok(mshr),
            _ => Err(SimError::invariant("mshr queue", format!("{id:?} is not allocated"))),
        }
    }

    /// Returns an allocated MSHR, mutably.
    pub fn get_mut(&mut self, id: MshrId) -> SimResult<&mut Mshr> {
        match self.slots.get_mut(id.0) {
            Some(mshr) if mshr.valid => Ok(mshr),
            _ => Err(SimError::invariant("mshr queue", format!("{id:?} is not allocated"))),
        }
    }

    /// Allocates a fetch MSHR for the block containing `req`, with `req` as its first
    /// and only target. The downstream packet is attached later with [`Self::set_packet`].
    ///
    /// # Arguments
    ///
    /// * `id` - Handle of `req`.
    /// * `req` - The missing request.
    /// * `blk_size` - Block size used to align the address.
    /// * `size` - Transfer size of the downstream packet.
    ///
    /// # Errors
    ///
    /// [`SimError::Invariant`] if the queue is full; callers must check [`Self::is_full`].
    pub fn allocate(
        &mut self,
        id: ReqId,
        req: &MemRequest,
        blk_size: u64,
        size: u32,
    ) -> SimResult<MshrId> {
        let mshr_id = self.claim(req, blk_size, size, true)?;
        self.slots[mshr_id.0].targets.push_back(id);
        self.allocated_targets += 1;
        Ok(mshr_id)
    }

    /// Allocates an MSHR whose packet is `req` itself and which expects no response
    /// (writebacks, buffered writes, directory messages).
    ///
    /// # Errors
    ///
    /// [`SimError::Invariant`] if the queue is full.
    pub fn allocate_packet(
        &mut self,
        id: ReqId,
        req: &MemRequest,
        blk_size: u64,
    ) -> SimResult<MshrId> {
        let mshr_id = self.claim(req, blk_size, req.size, false)?;
        self.slots[mshr_id.0].packet = Some(id);
        Ok(mshr_id)
    }

    fn claim(
        &mut self,
        req: &MemRequest,
        blk_size: u64,
        size: u32,
        needs_response: bool,
    ) -> SimResult<MshrId> {
        if self.is_full() {
            return Err(SimError::invariant(
                "mshr queue",
                format!("allocate for {} on a full queue", req.addr),
            ));
        }
        let mshr_id = self
            .free
            .pop()
            .ok_or_else(|| SimError::invariant("mshr queue", "free list empty below capacity"))?;
        self.slots[mshr_id.0] = Mshr {
            addr: req.addr.block_align(blk_size),
            asid: req.asid,
            size,
            in_service: false,
            thread: req.requester,
            cmd: req.cmd,
            packet: None,
            needs_response,
            targets: VecDeque::with_capacity(self.max_targets),
            valid: true,
        };
        self.allocated.push(mshr_id);
        self.pending.push_back(mshr_id);
        trace!(mshr = mshr_id.0, addr = %req.addr, cmd = %req.cmd, "mshr allocated");
        Ok(mshr_id)
    }

    /// Attaches the downstream packet of a fetch MSHR.
    pub fn set_packet(&mut self, mshr: MshrId, packet: ReqId) -> SimResult<()> {
        self.get_mut(mshr)?.packet = Some(packet);
        Ok(())
    }

    /// Returns `true` when the MSHR cannot take another target.
    pub fn targets_full(&self, id: MshrId) -> bool {
        self.get(id).is_ok_and(|m| m.targets.len() >= self.max_targets)
    }

    /// Appends a target to an MSHR.
    ///
    /// # Errors
    ///
    /// [`SimError::Invariant`] if the target list is already full.
    pub fn allocate_target(&mut self, mshr: MshrId, id: ReqId) -> SimResult<()> {
        let max = self.max_targets;
        let entry = self.get_mut(mshr)?;
        if entry.targets.len() >= max {
            return Err(SimError::invariant(
                "mshr queue",
                format!("target list of {mshr:?} ({}) is full", entry.addr),
            ));
        }
        entry.targets.push_back(id);
        self.allocated_targets += 1;
        Ok(())
    }

    /// Pops the oldest target of an MSHR.
    pub fn pop_target(&mut self, mshr: MshrId) -> SimResult<Option<ReqId>> {
        let target = self.get_mut(mshr)?.targets.pop_front();
        if target.is_some() {
            self.allocated_targets -= 1;
        }
        Ok(target)
    }

    /// Finds the MSHR tracking the block containing `addr`.
    pub fn find_match(&self, addr: PhysAddr, asid: Asid, blk_size: u64) -> Option<MshrId> {
        let blk = addr.block_align(blk_size);
        self.allocated.iter().copied().find(|id| {
            let m = &self.slots[id.0];
            m.addr == blk && m.asid == asid
        })
    }

    /// Marks an MSHR as sent downstream.
    ///
    /// An MSHR whose packet expects no response is deallocated immediately.
    ///
    /// # Returns
    ///
    /// `true` if the queue went from full to not full.
    pub fn mark_in_service(&mut self, mshr: MshrId) -> SimResult<bool> {
        let needs_response = self.get(mshr)?.needs_response;
        if let Some(pos) = self.pending.iter().position(|&m| m == mshr) {
            let _ = self.pending.remove(pos);
        }
        if !needs_response {
            return self.deallocate(mshr);
        }
        let entry = self.get_mut(mshr)?;
        if entry.in_service {
            return Err(SimError::invariant(
                "mshr queue",
                format!("{mshr:?} marked in service twice"),
            ));
        }
        entry.in_service = true;
        self.in_service += 1;
        Ok(false)
    }

    /// Returns an in-service MSHR to the pending list (downstream refused it, or an
    /// upgrade must be re-issued).
    pub fn mark_pending(&mut self, mshr: MshrId) -> SimResult<()> {
        let entry = self.get_mut(mshr)?;
        if entry.in_service {
            entry.in_service = false;
            self.in_service -= 1;
        }
        if !self.pending.contains(&mshr) {
            self.pending.push_back(mshr);
        }
        Ok(())
    }

    /// Frees an MSHR. All targets must have been popped.
    ///
    /// # Returns
    ///
    /// `true` if the queue went from full to not full.
    pub fn deallocate(&mut self, mshr: MshrId) -> SimResult<bool> {
        let was_full = self.is_full();
        let entry = self.get_mut(mshr)?;
        if entry.has_targets() {
            return Err(SimError::invariant(
                "mshr queue",
                format!(
                    "deallocating {mshr:?} ({}) with {} targets left",
                    entry.addr,
                    entry.num_targets()
                ),
            ));
        }
        let in_service = entry.in_service;
        entry.valid = false;
        entry.in_service = false;
        entry.packet = None;
        if in_service {
            self.in_service -= 1;
        }
        self.allocated.retain(|&m| m != mshr);
        if let Some(pos) = self.pending.iter().position(|&m| m == mshr) {
            let _ = self.pending.remove(pos);
        }
        self.free.push(mshr);
        trace!(mshr = mshr.0, "mshr deallocated");
        Ok(was_full && !self.is_full())
    }

    /// Removes every target issued by `thread`.
    ///
    /// MSHRs not yet in service that end up without targets are deallocated; MSHRs in
    /// service keep running and simply find fewer targets at fill time.
    pub fn squash(
        &mut self,
        thread: RequesterId,
        requester_of: impl Fn(ReqId) -> Option<RequesterId>,
    ) -> SimResult<SquashOutcome> {
        let was_full = self.is_full();
        let mut outcome = SquashOutcome::default();
        let ids: Vec<MshrId> = self.allocated.clone();
        for id in ids {
            let entry = &mut self.slots[id.0];
            if !entry.needs_response {
                continue;
            }
            let before = entry.targets.len();
            let (removed, kept): (VecDeque<ReqId>, VecDeque<ReqId>) = entry
                .targets
                .drain(..)
                .partition(|&t| requester_of(t) == Some(thread));
            entry.targets = kept;
            self.allocated_targets -= before - entry.targets.len();
            outcome.removed_targets.extend(removed);
            if !entry.in_service && entry.targets.is_empty() {
                if let Some(packet) = entry.packet.take() {
                    outcome.freed_packets.push(packet);
                }
                let _ = self.deallocate(id)?;
            }
        }
        outcome.unblocked = was_full && !self.is_full();
        Ok(outcome)
    }
}
