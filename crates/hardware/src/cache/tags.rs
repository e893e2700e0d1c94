//! Set-associative tag store with LRU replacement and way partitioning.
//!
//! Each set is a recency stack of [`CacheBlock`] frames: position 0 is the most
//! recently used, the last position the least recently used. Every set always holds
//! exactly `assoc` frames; invalid frames sink to the LRU end so an empty frame is
//! always the first replacement candidate.
//!
//! # Partitioning
//!
//! With quotas installed ([`TagStore::set_quotas`]) a requester sees at most its quota
//! of its own most recently used blocks in a set. A tag match outside that range is
//! reported as [`Lookup::Hidden`]: a miss whose fill reuses the same frame, so a set
//! never holds duplicate tags. Victim selection:
//!
//! 1. requester below its quota in the set: global LRU frame;
//! 2. otherwise: the requester's own LRU frame;
//! 3. otherwise: the first frame, from the LRU end, owned by a requester over its quota;
//! 4. otherwise: global LRU frame.
//!
//! Evicting a block of requester A on behalf of requester B counts one interference
//! event `[A][B]`.

use std::fmt;

use super::block::CacheBlock;
use crate::common::addr::exact_log2;
use crate::common::{PhysAddr, RequesterId, SimError, SimResult, Tick};

/// Cache geometry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Geometry {
    /// Number of sets.
    pub sets: usize,
    /// Ways per set.
    pub assoc: usize,
    /// Block size in bytes.
    pub blk_size: u64,
    set_shift: u32,
    tag_shift: u32,
    /// Bank index bits re-inserted by [`Geometry::addr_of`].
    bank_base: u64,
}

impl Geometry {
    /// Derives the geometry of a cache.
    ///
    /// # Arguments
    ///
    /// * `size` - Capacity in bytes.
    /// * `assoc` - Associativity.
    /// * `blk_size` - Block size in bytes.
    ///
    /// # Errors
    ///
    /// [`SimError::Config`] when the block size or set count is not a power of two,
    /// the associativity is zero, or the size does not divide evenly.
    pub fn new(size: u64, assoc: usize, blk_size: u64) -> SimResult<Self> {
        let set_shift = exact_log2(blk_size).ok_or_else(|| {
            SimError::config("tags", format!("block size {blk_size} is not a power of two"))
        })?;
        if assoc == 0 {
            return Err(SimError::config("tags", "associativity must be positive"));
        }
        let frame_bytes = blk_size * assoc as u64;
        if size == 0 || size % frame_bytes != 0 {
            return Err(SimError::config(
                "tags",
                format!("size {size} is not a multiple of {assoc} ways x {blk_size} bytes"),
            ));
        }
        let sets = size / frame_bytes;
        let set_bits = exact_log2(sets).ok_or_else(|| {
            SimError::config("tags", format!("set count {sets} is not a power of two"))
        })?;
        Ok(Self {
            sets: sets as usize,
            assoc,
            blk_size,
            set_shift,
            tag_shift: set_shift + set_bits,
            bank_base: 0,
        })
    }

    /// Geometry of bank `bank` out of `banks` block-interleaved banks of `size` bytes
    /// each. The bank-select bits sit right above the block offset and are skipped
    /// when indexing sets.
    ///
    /// # Errors
    ///
    /// As [`Geometry::new`], plus a bank count that is not a power of two or a bank
    /// index out of range.
    pub fn banked(size: u64, assoc: usize, blk_size: u64, banks: usize, bank: usize) -> SimResult<Self> {
        let mut geometry = Self::new(size, assoc, blk_size)?;
        let bank_bits = exact_log2(banks as u64).ok_or_else(|| {
            SimError::config("tags", format!("bank count {banks} is not a power of two"))
        })?;
        if bank >= banks {
            return Err(SimError::config("tags", format!("bank {bank} of {banks} out of range")));
        }
        geometry.bank_base = (bank as u64) << geometry.set_shift;
        geometry.set_shift += bank_bits;
        geometry.tag_shift += bank_bits;
        Ok(geometry)
    }

    /// Set index of an address.
    pub const fn set_of(&self, addr: PhysAddr) -> usize {
        ((addr.val() >> self.set_shift) as usize) & (self.sets - 1)
    }

    /// Tag of an address.
    pub const fn tag_of(&self, addr: PhysAddr) -> u64 {
        addr.val() >> self.tag_shift
    }

    /// Block address of a tag in a set.
    pub const fn addr_of(&self, tag: u64, set: usize) -> PhysAddr {
        PhysAddr::new((tag << self.tag_shift) | ((set as u64) << self.set_shift) | self.bank_base)
    }
}

/// Result of a tag lookup.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Lookup {
    /// Visible match at a stack position.
    Hit {
        /// Set index.
        set: usize,
        /// Recency position.
        pos: usize,
    },
    /// Match outside the requester's visible range; behaves as a miss.
    Hidden {
        /// Set index.
        set: usize,
        /// Recency position.
        pos: usize,
    },
    /// No match.
    Miss {
        /// Set index.
        set: usize,
    },
}

/// A valid block displaced by a replacement.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Evicted {
    /// Block address.
    pub addr: PhysAddr,
    /// The block's state at eviction.
    pub block: CacheBlock,
}

/// Tag store capability used by [`CacheController`](super::CacheController).
pub trait TagStore: fmt::Debug + Send + Sync {
    /// Geometry of the store.
    fn geometry(&self) -> Geometry;

    /// Looks `addr` up on behalf of `requester`, honouring visibility limits.
    fn lookup(&self, addr: PhysAddr, requester: RequesterId) -> Lookup;

    /// Finds the frame holding `addr` regardless of visibility.
    fn probe(&self, addr: PhysAddr) -> Option<(usize, usize)>;

    /// Returns the frame at a recency position.
    fn block(&self, set: usize, pos: usize) -> Option<&CacheBlock>;

    /// Returns the frame at a recency position, mutably.
    fn block_mut(&mut self, set: usize, pos: usize) -> Option<&mut CacheBlock>;

    /// Moves a frame to the MRU position.
    fn touch(&mut self, set: usize, pos: usize);

    /// Picks the frame `requester` should replace in the set of `addr`.
    fn find_victim(&self, addr: PhysAddr, requester: RequesterId) -> usize;

    /// Installs `addr` into the frame at `pos`, moving it to MRU.
    ///
    /// # Returns
    ///
    /// The displaced block, when the frame held a different valid block.
    fn replace(
        &mut self,
        set: usize,
        pos: usize,
        addr: PhysAddr,
        requester: RequesterId,
        now: Tick,
    ) -> Option<Evicted>;

    /// Invalidates `addr`, moving its frame to the LRU end.
    fn invalidate(&mut self, addr: PhysAddr) -> Option<CacheBlock>;

    /// Installs (or with `None` removes) per-requester way quotas.
    fn set_quotas(&mut self, quotas: Option<Vec<usize>>);

    /// Current quotas.
    fn quotas(&self) -> Option<&[usize]>;

    /// Number of valid blocks brought in by `requester`.
    fn occupancy(&self, requester: RequesterId) -> usize;

    /// Interference matrix, `[victim][interferer]`.
    fn interference(&self) -> &[Vec<u64>];

    /// Every frame, set by set in recency order.
    fn frames(&self) -> Vec<&CacheBlock>;

    /// Replaces the contents of every set with restored frames.
    fn restore(&mut self, frames: Vec<CacheBlock>) -> SimResult<()>;
}

/// LRU tag store with optional way partitioning.
#[derive(Debug)]
pub struct LruTags {
    geometry: Geometry,
    sets: Vec<Vec<CacheBlock>>,
    max_use_ways: usize,
    quotas: Option<Vec<usize>>,
    interference: Vec<Vec<u64>>,
}

impl LruTags {
    /// Creates an empty tag store.
    ///
    /// # Arguments
    ///
    /// * `geometry` - Cache geometry.
    /// * `max_use_ways` - Recency positions visible to lookups and replacement; `0`
    ///   means the full associativity.
    /// * `num_requesters` - Size of the interference matrix.
    pub fn new(geometry: Geometry, max_use_ways: usize, num_requesters: usize) -> Self {
        let max_use_ways = if max_use_ways == 0 {
            geometry.assoc
        } else {
            max_use_ways.min(geometry.assoc)
        };
        let sets = (0..geometry.sets)
            .map(|set| (0..geometry.assoc).map(|way| CacheBlock::empty(set, way)).collect())
            .collect();
        Self {
            geometry,
            sets,
            max_use_ways,
            quotas: None,
            interference: vec![vec![0; num_requesters]; num_requesters],
        }
    }

    fn quota_of(&self, requester: RequesterId) -> Option<usize> {
        self.quotas
            .as_ref()
            .map(|q| q.get(requester).copied().unwrap_or(0))
    }

    fn usage_in_set(set: &[CacheBlock], requester: RequesterId) -> usize {
        set.iter()
            .filter(|b| b.valid && b.requester == Some(requester))
            .count()
    }

    fn visible(&self, set: &[CacheBlock], pos: usize, requester: RequesterId) -> bool {
        if pos >= self.max_use_ways {
            return false;
        }
        let Some(quota) = self.quota_of(requester) else {
            return true;
        };
        if set[pos].requester != Some(requester) {
            return true;
        }
        let own_rank = set[..pos]
            .iter()
            .filter(|b| b.valid && b.requester == Some(requester))
            .count();
        own_rank < quota
    }

    fn lru_pos(&self) -> usize {
        self.max_use_ways - 1
    }
}

impl TagStore for LruTags {
    fn geometry(&self) -> Geometry {
        self.geometry
    }

    fn lookup(&self, addr: PhysAddr, requester: RequesterId) -> Lookup {
        let set = self.geometry.set_of(addr);
        let tag = self.geometry.tag_of(addr);
        let frames = &self.sets[set];
        match frames.iter().position(|b| b.valid && b.tag == tag) {
            Some(pos) if self.visible(frames, pos, requester) => Lookup::Hit { set, pos },
            Some(pos) => Lookup::Hidden { set, pos },
            None => Lookup::Miss { set },
        }
    }

    fn probe(&self, addr: PhysAddr) -> Option<(usize, usize)> {
        let set = self.geometry.set_of(addr);
        let tag = self.geometry.tag_of(addr);
        self.sets[set]
            .iter()
            .position(|b| b.valid && b.tag == tag)
            .map(|pos| (set, pos))
    }

    fn block(&self, set: usize, pos: usize) -> Option<&CacheBlock> {
        self.sets.get(set).and_then(|s| s.get(pos))
    }

    fn block_mut(&mut self, set: usize, pos: usize) -> Option<&mut CacheBlock> {
        self.sets.get_mut(set).and_then(|s| s.get_mut(pos))
    }

    fn touch(&mut self, set: usize, pos: usize) {
        let stack = &mut self.sets[set];
        if pos < stack.len() && pos != 0 {
            let blk = stack.remove(pos);
            stack.insert(0, blk);
        }
    }

    fn find_victim(&self, addr: PhysAddr, requester: RequesterId) -> usize {
        let set = &self.sets[self.geometry.set_of(addr)];
        let global_lru = self.lru_pos();
        let candidates = &set[..self.max_use_ways];
        if !candidates[global_lru].valid {
            return global_lru;
        }
        let Some(quota) = self.quota_of(requester) else {
            return global_lru;
        };
        if Self::usage_in_set(set, requester) < quota {
            return global_lru;
        }
        if let Some(pos) = candidates
            .iter()
            .rposition(|b| b.valid && b.requester == Some(requester))
        {
            return pos;
        }
        candidates
            .iter()
            .enumerate()
            .rev()
            .find(|(_, b)| {
                b.requester.is_some_and(|owner| {
                    self.quota_of(owner)
                        .is_some_and(|q| Self::usage_in_set(set, owner) > q)
                })
            })
            .map_or(global_lru, |(pos, _)| pos)
    }

    fn replace(
        &mut self,
        set: usize,
        pos: usize,
        addr: PhysAddr,
        requester: RequesterId,
        now: Tick,
    ) -> Option<Evicted> {
        let tag = self.geometry.tag_of(addr);
        let frame = &mut self.sets[set][pos];
        let evicted = (frame.valid && frame.tag != tag).then(|| Evicted {
            addr: self.geometry.addr_of(frame.tag, set),
            block: frame.clone(),
        });
        if let Some(victim) = evicted.as_ref().and_then(|e| e.block.requester) {
            if victim != requester {
                if let Some(cell) = self
                    .interference
                    .get_mut(victim)
                    .and_then(|row| row.get_mut(requester))
                {
                    *cell += 1;
                }
            }
        }
        let way = frame.way;
        *frame = CacheBlock {
            tag,
            valid: true,
            requester: Some(requester),
            ready_at: now,
            ..CacheBlock::empty(set, way)
        };
        self.touch(set, pos);
        evicted
    }

    fn invalidate(&mut self, addr: PhysAddr) -> Option<CacheBlock> {
        let (set, pos) = self.probe(addr)?;
        let stack = &mut self.sets[set];
        let mut blk = stack.remove(pos);
        let old = blk.clone();
        blk.invalidate();
        // A frame freed inside the visible ways becomes their next victim.
        let to = if pos < self.max_use_ways { self.max_use_ways - 1 } else { stack.len() };
        stack.insert(to, blk);
        Some(old)
    }

    fn set_quotas(&mut self, quotas: Option<Vec<usize>>) {
        self.quotas = quotas;
    }

    fn quotas(&self) -> Option<&[usize]> {
        self.quotas.as_deref()
    }

    fn occupancy(&self, requester: RequesterId) -> usize {
        self.sets
            .iter()
            .map(|set| Self::usage_in_set(set, requester))
            .sum()
    }

    fn interference(&self) -> &[Vec<u64>] {
        &self.interference
    }

    fn frames(&self) -> Vec<&CacheBlock> {
        self.sets.iter().flatten().collect()
    }

    fn restore(&mut self, frames: Vec<CacheBlock>) -> SimResult<()> {
        let mut sets: Vec<Vec<CacheBlock>> = vec![Vec::with_capacity(self.geometry.assoc); self.geometry.sets];
        for blk in frames {
            let set = sets.get_mut(blk.set).ok_or_else(|| {
                SimError::invariant("tags", format!("restored block in set {} out of range", blk.set))
            })?;
            set.push(blk);
        }
        for (index, set) in sets.iter_mut().enumerate() {
            if set.len() != self.geometry.assoc {
                return Err(SimError::invariant(
                    "tags",
                    format!("restored set {index} has {} frames, expected {}", set.len(), self.geometry.assoc),
                ));
            }
            let mut ways: Vec<usize> = set.iter().map(|b| b.way).collect();
            ways.sort_unstable();
            ways.dedup();
            if ways.len() != self.geometry.assoc || ways.last().is_some_and(|&w| w >= self.geometry.assoc) {
                return Err(SimError::invariant(
                    "tags",
                    format!("restored set {index} has duplicate or out-of-range ways"),
                ));
            }
        }
        self.sets = sets;
        Ok(())
    }
}
