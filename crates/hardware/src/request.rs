//! Memory requests and the request arena.
//!
//! Every in-flight transaction is a [`MemRequest`] stored in a [`RequestArena`] and
//! addressed by a stable [`ReqId`] handle. Queues throughout the hierarchy (MSHR
//! target lists, interconnect delivery queues, memory-controller queues) store handles,
//! never the request itself. Ownership is tracked explicitly: each subsystem that keeps
//! a handle registers itself as a [`Holder`], and the request is destroyed when the last
//! holder releases it.

use std::fmt;

use serde::Serialize;

use crate::cache::CacheId;
use crate::cache::mshr::MshrId;
use crate::common::{Asid, PhysAddr, RequesterId, SimError, SimResult, Tick};

/// Directory protocol messages carried by [`MemCmd::Directory`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum DirectoryMsg {
    /// The owner evicts a block that other caches still share; carries the presence map.
    OwnerWriteback,
    /// A read-only sharer evicts its copy and tells the owner to clear its presence bit.
    SharerWriteback,
    /// Ownership moves to a writer; the previous owner drops its copy.
    OwnerTransfer,
}

/// Memory command of a request.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize)]
pub enum MemCmd {
    /// Read for a shared (read-only) copy.
    #[default]
    Read,
    /// Read for an exclusive, writable copy.
    ReadEx,
    /// Store from a core.
    Write,
    /// Dirty block written back to the next level.
    Writeback,
    /// Snooped invalidation.
    Invalidate,
    /// DRAM page activation.
    Activate,
    /// DRAM page close (precharge).
    Close,
    /// Block copy between two addresses.
    Copy,
    /// Hardware prefetch; completes like a read but no core waits for it.
    Prefetch,
    /// Directory protocol message.
    Directory(DirectoryMsg),
}

impl MemCmd {
    /// Returns `true` for commands that read a block.
    pub const fn is_read(self) -> bool {
        matches!(self, Self::Read | Self::ReadEx | Self::Prefetch)
    }

    /// Returns `true` for commands that modify a block.
    pub const fn is_write(self) -> bool {
        matches!(self, Self::Write | Self::Writeback | Self::Copy)
    }

    /// Returns `true` when the command requires a writable copy of the block.
    pub const fn needs_exclusive(self) -> bool {
        matches!(self, Self::ReadEx | Self::Write | Self::Copy)
    }

    /// Returns `true` for DRAM page-management commands.
    pub const fn is_page_command(self) -> bool {
        matches!(self, Self::Activate | Self::Close)
    }
}

impl fmt::Display for MemCmd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Directory(msg) => write!(f, "Directory({msg:?})"),
            other => write!(f, "{other:?}"),
        }
    }
}

/// Per-request attribute flags.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct RequestFlags {
    /// Bypass the cache array.
    pub uncacheable: bool,
    /// The response installs a block into the cache (set on fetches).
    pub cache_line_fill: bool,
    /// The issuer waits for a response.
    pub expects_response: bool,
}

/// One in-flight memory transaction.
#[derive(Clone, Debug, Serialize)]
pub struct MemRequest {
    /// Physical address.
    pub addr: PhysAddr,
    /// Virtual address as seen by the issuing core (informational).
    pub vaddr: u64,
    /// Address-space identifier.
    pub asid: Asid,
    /// Access size in bytes.
    pub size: u32,
    /// Command.
    pub cmd: MemCmd,
    /// Requester on whose behalf the request travels.
    pub requester: RequesterId,
    /// Tick the request was created.
    pub issued_at: Tick,
    /// Tick the request arrived at its current component.
    pub arrived_at: Tick,
    /// Tick the request was completed, once satisfied.
    pub completed_at: Option<Tick>,
    /// Set once the request has been serviced.
    pub satisfied: bool,
    /// MSHR whose downstream packet this request is, in the cache that created it.
    pub mshr: Option<MshrId>,
    /// MSHR the request waits on as a target in the cache currently servicing it.
    pub waiting_on: Option<MshrId>,
    /// Cache that created the request (fetches, writebacks, directory messages).
    pub origin: Option<CacheId>,
    /// Destination requester for master-to-master directory messages.
    pub dir_target: Option<RequesterId>,
    /// Presence bitmap carried by owner writebacks.
    pub present: u64,
    /// Attribute flags.
    pub flags: RequestFlags,
    /// Optional payload; timing never depends on it.
    #[serde(skip)]
    pub data: Option<Vec<u8>>,
}

impl MemRequest {
    /// Creates a request issued by a core.
    ///
    /// # Arguments
    ///
    /// * `cmd` - Command.
    /// * `addr` - Physical address.
    /// * `size` - Access size in bytes.
    /// * `requester` - Issuing core.
    /// * `now` - Current tick.
    pub fn new(cmd: MemCmd, addr: PhysAddr, size: u32, requester: RequesterId, now: Tick) -> Self {
        Self {
            addr,
            vaddr: addr.val(),
            asid: 0,
            size,
            cmd,
            requester,
            issued_at: now,
            arrived_at: now,
            completed_at: None,
            satisfied: false,
            mshr: None,
            waiting_on: None,
            origin: None,
            dir_target: None,
            present: 0,
            flags: RequestFlags {
                expects_response: !matches!(cmd, MemCmd::Writeback | MemCmd::Directory(_)),
                ..RequestFlags::default()
            },
            data: None,
        }
    }

    /// Sets the uncacheable flag.
    #[must_use]
    pub const fn uncacheable(mut self) -> Self {
        self.flags.uncacheable = true;
        self
    }

    /// Sets the address-space identifier.
    #[must_use]
    pub const fn with_asid(mut self, asid: Asid) -> Self {
        self.asid = asid;
        self
    }

    /// Attaches a payload.
    #[must_use]
    pub fn with_data(mut self, data: Vec<u8>) -> Self {
        self.data = Some(data);
        self
    }

    /// Returns `true` when someone waits for a response to this request.
    pub const fn needs_response(&self) -> bool {
        self.flags.expects_response
    }
}

/// Stable handle to a request in a [`RequestArena`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ReqId {
    index: u32,
    generation: u32,
}

impl fmt::Display for ReqId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}.{}", self.index, self.generation)
    }
}

/// Subsystem holding a request handle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Holder {
    /// The core or cache that created the request and waits for it.
    Issuer,
    /// An MSHR target list.
    Target,
    /// An interconnect arbitration or delivery queue.
    Interconnect,
    /// A memory-controller queue or the DRAM device.
    MemoryQueue,
    /// A pending response (scheduled completion or cache response queue).
    Response,
}

impl Holder {
    const fn bit(self) -> u8 {
        1 << self as u8
    }
}

#[derive(Debug)]
struct Entry {
    req: MemRequest,
    holders: u8,
}

#[derive(Debug, Default)]
struct Slot {
    generation: u32,
    entry: Option<Entry>,
}

/// Arena of in-flight requests with explicit holder tracking.
#[derive(Debug, Default)]
pub struct RequestArena {
    slots: Vec<Slot>,
    free: Vec<u32>,
    live: usize,
    created: u64,
}

impl RequestArena {
    /// Creates an empty arena.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a request; the caller becomes its first holder.
    ///
    /// # Arguments
    ///
    /// * `req` - The request to store.
    /// * `holder` - The subsystem taking the first reference.
    ///
    /// # Returns
    ///
    /// The handle of the stored request.
    pub fn insert(&mut self, req: MemRequest, holder: Holder) -> ReqId {
        let entry = Entry {
            req,
            holders: holder.bit(),
        };
        self.live += 1;
        self.created += 1;
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.entry = Some(entry);
            ReqId {
                index,
                generation: slot.generation,
            }
        } else {
            let index = self.slots.len() as u32;
            self.slots.push(Slot {
                generation: 0,
                entry: Some(entry),
            });
            ReqId {
                index,
                generation: 0,
            }
        }
    }

    fn entry(&self, id: ReqId) -> SimResult<&Entry> {
        self.slots
            .get(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.entry.as_ref())
            .ok_or_else(|| SimError::UnknownRequest(id.to_string()))
    }

    fn entry_mut(&mut self, id: ReqId) -> SimResult<&mut Entry> {
        self.slots
            .get_mut(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.entry.as_mut())
            .ok_or_else(|| SimError::UnknownRequest(id.to_string()))
    }

    /// Returns the request behind a handle.
    pub fn get(&self, id: ReqId) -> SimResult<&MemRequest> {
        self.entry(id).map(|e| &e.req)
    }

    /// Returns the request behind a handle, mutably.
    pub fn get_mut(&mut self, id: ReqId) -> SimResult<&mut MemRequest> {
        self.entry_mut(id).map(|e| &mut e.req)
    }

    /// Returns `true` if the handle refers to a live request.
    pub fn contains(&self, id: ReqId) -> bool {
        self.entry(id).is_ok()
    }

    /// Returns `true` if `holder` currently holds the request.
    pub fn is_held_by(&self, id: ReqId, holder: Holder) -> bool {
        self.entry(id).is_ok_and(|e| e.holders & holder.bit() != 0)
    }

    /// Registers an additional holder.
    ///
    /// Holding the same request twice from one subsystem is an invariant violation.
    pub fn retain(&mut self, id: ReqId, holder: Holder) -> SimResult<()> {
        let entry = self.entry_mut(id)?;
        if entry.holders & holder.bit() != 0 {
            return Err(SimError::invariant(
                "request arena",
                format!("{id} already held by {holder:?}"),
            ));
        }
        entry.holders |= holder.bit();
        Ok(())
    }

    /// Drops one holder; destroys the request when no holder remains.
    ///
    /// # Returns
    ///
    /// `true` if the request was destroyed.
    pub fn release(&mut self, id: ReqId, holder: Holder) -> SimResult<bool> {
        let entry = self.entry_mut(id)?;
        if entry.holders & holder.bit() == 0 {
            return Err(SimError::invariant(
                "request arena",
                format!("{id} released by {holder:?} which does not hold it"),
            ));
        }
        entry.holders &= !holder.bit();
        if entry.holders != 0 {
            return Ok(false);
        }
        let slot = &mut self.slots[id.index as usize];
        slot.entry = None;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index);
        self.live -= 1;
        Ok(true)
    }

    /// Moves a request from one holder to another.
    pub fn hand_off(&mut self, id: ReqId, from: Holder, to: Holder) -> SimResult<()> {
        self.retain(id, to)?;
        let _ = self.release(id, from)?;
        Ok(())
    }

    /// Number of live requests.
    pub fn len(&self) -> usize {
        self.live
    }

    /// Returns `true` when no request is live.
    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// Total number of requests ever created.
    pub fn created(&self) -> u64 {
        self.created
    }
}
