//! Coherence protocols.
//!
//! Two variants sit behind [`Coherence`]:
//!
//! - [`UniCoherence`]: pass-through. Fills are always writable and a snooped
//!   invalidate is forwarded toward the cores unless the cache is the top level.
//! - [`DirectoryCoherence`]: L1 data caches track an owner and a presence bitmap per
//!   block. Sibling caches are updated synchronously through [`Peers`] at the tick of
//!   the fill or eviction; the directory messages themselves still travel through the
//!   interconnect so their traffic is modelled.
//!
//! Plain and directory evictions are separate state machines, selected by
//! [`Coherence::is_directory_and_l1_data_cache`].

use std::fmt;

use tracing::debug;

use super::block::{CacheBlock, DirState};
use super::tags::TagStore;
use crate::common::{PhysAddr, RequesterId, SimError, SimResult};
use crate::request::{DirectoryMsg, MemCmd};

/// Reaction to a snooped bus request.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SnoopAction {
    /// Invalidate the local copy.
    pub invalidate: bool,
    /// Pass the request on toward the cores.
    pub forward_upward: bool,
}

/// Coherence capability of a cache.
pub trait Coherence: fmt::Debug + Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Command used to fetch a block for an access.
    ///
    /// # Arguments
    ///
    /// * `cmd` - Command of the missing access.
    /// * `blk` - The local copy, if one exists (an upgrade miss).
    fn get_mem_cmd(&self, cmd: MemCmd, blk: Option<&CacheBlock>) -> MemCmd;

    /// Whether a block filled by `fetch_cmd` may be written without a further action.
    fn fill_writable(&self, fetch_cmd: MemCmd) -> bool;

    /// Decides how to react to a snooped request.
    ///
    /// # Errors
    ///
    /// [`SimError::Coherence`] if the local copy is in an impossible state.
    fn handle_bus_request(
        &self,
        cmd: MemCmd,
        addr: PhysAddr,
        blk: Option<&CacheBlock>,
        top_level: bool,
    ) -> SimResult<SnoopAction>;

    /// `true` for L1 data caches running the directory protocol.
    fn is_directory_and_l1_data_cache(&self) -> bool {
        false
    }
}

/// Uniprocessor pass-through coherence.
#[derive(Clone, Copy, Debug, Default)]
pub struct UniCoherence;

impl Coherence for UniCoherence {
    fn name(&self) -> &'static str {
        "uni"
    }

    fn get_mem_cmd(&self, cmd: MemCmd, _blk: Option<&CacheBlock>) -> MemCmd {
        if cmd.needs_exclusive() {
            MemCmd::ReadEx
        } else {
            MemCmd::Read
        }
    }

    fn fill_writable(&self, _fetch_cmd: MemCmd) -> bool {
        true
    }

    fn handle_bus_request(
        &self,
        cmd: MemCmd,
        _addr: PhysAddr,
        blk: Option<&CacheBlock>,
        top_level: bool,
    ) -> SimResult<SnoopAction> {
        if cmd != MemCmd::Invalidate {
            return Ok(SnoopAction::default());
        }
        Ok(SnoopAction {
            invalidate: blk.is_some_and(CacheBlock::is_valid),
            forward_upward: !top_level,
        })
    }
}

/// Directory coherence for L1 data caches.
#[derive(Clone, Copy, Debug, Default)]
pub struct DirectoryCoherence;

impl Coherence for DirectoryCoherence {
    fn name(&self) -> &'static str {
        "directory"
    }

    fn get_mem_cmd(&self, cmd: MemCmd, _blk: Option<&CacheBlock>) -> MemCmd {
        if cmd.needs_exclusive() {
            MemCmd::ReadEx
        } else {
            MemCmd::Read
        }
    }

    fn fill_writable(&self, fetch_cmd: MemCmd) -> bool {
        fetch_cmd.needs_exclusive()
    }

    fn handle_bus_request(
        &self,
        cmd: MemCmd,
        addr: PhysAddr,
        blk: Option<&CacheBlock>,
        _top_level: bool,
    ) -> SimResult<SnoopAction> {
        if cmd != MemCmd::Invalidate {
            return Ok(SnoopAction::default());
        }
        if let Some(b) = blk {
            if b.dir.is_owned() && b.owner.is_none() {
                return Err(SimError::coherence(addr, "owned block without an owner"));
            }
        }
        Ok(SnoopAction {
            invalidate: blk.is_some_and(CacheBlock::is_valid),
            forward_upward: false,
        })
    }

    fn is_directory_and_l1_data_cache(&self) -> bool {
        true
    }
}

/// State assigned to a block filled under the directory protocol.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DirectoryFill {
    /// Directory state of the new copy.
    pub dir: DirState,
    /// Write permission of the new copy.
    pub writable: bool,
    /// Owner after the fill.
    pub owner: RequesterId,
    /// Presence bitmap after the fill.
    pub present: u64,
    /// Dirty data taken over from an invalidated owner.
    pub inherited_dirty: bool,
    /// Previous owner that lost the block to this fill.
    pub previous_owner: Option<RequesterId>,
}

/// What an eviction must send.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EvictAction {
    /// Nothing; the block was clean and unshared.
    Silent,
    /// Plain writeback to the next level.
    Writeback,
    /// Directory message to a sibling cache.
    Directory {
        /// Message kind.
        msg: DirectoryMsg,
        /// Sibling receiving it.
        to: RequesterId,
        /// Presence bitmap carried by the message.
        present: u64,
    },
}

/// Plain eviction: write back dirty data, drop clean data.
pub const fn plain_eviction(blk: &CacheBlock) -> EvictAction {
    if blk.dirty {
        EvictAction::Writeback
    } else {
        EvictAction::Silent
    }
}

const fn bit(requester: RequesterId) -> u64 {
    1u64 << requester
}

/// Mutable view of the sibling L1 tag stores of one cache.
pub struct Peers<'a> {
    me: RequesterId,
    others: Vec<(RequesterId, &'a mut dyn TagStore)>,
}

impl fmt::Debug for Peers<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Peers")
            .field("me", &self.me)
            .field("others", &self.others.iter().map(|(id, _)| *id).collect::<Vec<_>>())
            .finish()
    }
}

impl<'a> Peers<'a> {
    /// Creates a view.
    ///
    /// # Arguments
    ///
    /// * `me` - Requester id of the cache the view belongs to.
    /// * `others` - Sibling tag stores keyed by their requester id.
    pub fn new(me: RequesterId, others: Vec<(RequesterId, &'a mut dyn TagStore)>) -> Self {
        Self { me, others }
    }

    fn holders(&mut self, addr: PhysAddr) -> Vec<(RequesterId, &mut CacheBlock)> {
        self.others
            .iter_mut()
            .filter_map(|(id, tags)| {
                let (set, pos) = tags.probe(addr)?;
                tags.block_mut(set, pos).map(|blk| (*id, blk))
            })
            .collect()
    }

    /// Updates siblings for a fill and returns the state of the new copy.
    ///
    /// An exclusive fill invalidates every sibling copy and inherits dirty data from
    /// the previous owner (which may be the filling cache itself on an upgrade). A
    /// shared fill joins the existing sharers, or becomes the exclusive owner when no
    /// sibling holds the block.
    ///
    /// # Errors
    ///
    /// [`SimError::Coherence`] if sibling copies exist without a consistent owner.
    pub fn prepare_fill(&mut self, addr: PhysAddr, exclusive: bool) -> SimResult<DirectoryFill> {
        let me = self.me;
        let mut holders = self.holders(addr);
        if holders.is_empty() {
            return Ok(DirectoryFill {
                dir: DirState::OwnedExclusive,
                writable: true,
                owner: me,
                present: bit(me),
                inherited_dirty: false,
                previous_owner: None,
            });
        }
        if exclusive {
            let previous_owner = holders
                .iter()
                .find(|(_, blk)| blk.dir.is_owned())
                .map(|(id, _)| *id);
            let mut inherited_dirty = false;
            for (id, blk) in &mut holders {
                inherited_dirty |= blk.dirty;
                debug!(%addr, sibling = *id, "directory invalidates sibling copy");
                blk.invalidate();
            }
            return Ok(DirectoryFill {
                dir: DirState::OwnedExclusive,
                writable: true,
                owner: me,
                present: bit(me),
                inherited_dirty,
                previous_owner,
            });
        }

        let owner = holders
            .iter()
            .find(|(_, blk)| blk.dir.is_owned())
            .map(|(id, blk)| (*id, blk.owner))
            .ok_or_else(|| SimError::coherence(addr, "shared copies without an owner"))?;
        if owner.1 != Some(owner.0) {
            return Err(SimError::coherence(
                addr,
                format!("owner {} records owner {:?}", owner.0, owner.1),
            ));
        }
        let owner = owner.0;

        let present = holders.iter().fold(bit(me), |acc, (id, _)| acc | bit(*id));
        for (id, blk) in &mut holders {
            blk.present = present;
            if *id == owner {
                blk.dir = DirState::OwnedNonExclusive;
                blk.writable = false;
            }
        }
        Ok(DirectoryFill {
            dir: DirState::Shared,
            writable: false,
            owner,
            present,
            inherited_dirty: false,
            previous_owner: None,
        })
    }

    /// Updates siblings for the eviction of `blk` and returns what must be sent.
    ///
    /// # Errors
    ///
    /// [`SimError::Coherence`] for an owned block without an owner, an owner with no
    /// surviving sharer to hand over to, or a sharer whose owner holds no copy.
    pub fn evict(&mut self, addr: PhysAddr, blk: &CacheBlock) -> SimResult<EvictAction> {
        let me = self.me;
        match blk.dir {
            DirState::Invalid => Ok(plain_eviction(blk)),
            DirState::OwnedExclusive | DirState::OwnedNonExclusive if blk.owner.is_none() => {
                Err(SimError::coherence(addr, "owned block without an owner"))
            }
            DirState::OwnedExclusive => {
                if !self.holders(addr).is_empty() {
                    return Err(SimError::coherence(addr, "exclusive block has sharers"));
                }
                Ok(plain_eviction(blk))
            }
            DirState::OwnedNonExclusive => {
                let mut holders = self.holders(addr);
                let remaining = holders.iter().fold(0u64, |acc, (id, _)| acc | bit(*id));
                let new_owner = holders.iter().map(|(id, _)| *id).min().ok_or_else(|| {
                    SimError::coherence(addr, "owner evicted with no sharer left to take over")
                })?;
                let single = remaining == bit(new_owner);
                for (id, peer) in &mut holders {
                    peer.present = remaining;
                    peer.owner = Some(new_owner);
                    if *id == new_owner {
                        peer.dir = if single {
                            DirState::OwnedExclusive
                        } else {
                            DirState::OwnedNonExclusive
                        };
                        peer.writable = single;
                        peer.dirty |= blk.dirty;
                    }
                }
                debug!(%addr, from = me, to = new_owner, "directory ownership handed over");
                Ok(EvictAction::Directory {
                    msg: DirectoryMsg::OwnerWriteback,
                    to: new_owner,
                    present: remaining,
                })
            }
            DirState::Shared => {
                let owner = blk
                    .owner
                    .ok_or_else(|| SimError::coherence(addr, "sharer without an owner"))?;
                let mut holders = self.holders(addr);
                if !holders
                    .iter()
                    .any(|(id, peer)| *id == owner && peer.dir.is_owned())
                {
                    return Err(SimError::coherence(
                        addr,
                        format!("owner {owner} of a shared block holds no owned copy"),
                    ));
                }
                let remaining = blk.present & !bit(me);
                for (id, peer) in &mut holders {
                    peer.present &= !bit(me);
                    if *id == owner && peer.present == bit(owner) {
                        peer.dir = DirState::OwnedExclusive;
                        peer.writable = true;
                    }
                }
                Ok(EvictAction::Directory {
                    msg: DirectoryMsg::SharerWriteback,
                    to: owner,
                    present: remaining,
                })
            }
        }
    }
}
