//! Cache block metadata.

use serde::Serialize;

use crate::common::{RequesterId, Tick};

/// Directory state of a block held in an L1 data cache.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize)]
pub enum DirState {
    /// Not tracked by the directory.
    #[default]
    Invalid,
    /// Read-only copy; another cache owns the block.
    Shared,
    /// Owned and no other cache holds a copy.
    OwnedExclusive,
    /// Owned while other caches hold read-only copies.
    OwnedNonExclusive,
}

impl DirState {
    /// Returns `true` for the two owned states.
    pub const fn is_owned(self) -> bool {
        matches!(self, Self::OwnedExclusive | Self::OwnedNonExclusive)
    }

    /// On-disk encoding.
    pub const fn to_byte(self) -> u8 {
        match self {
            Self::Invalid => 0,
            Self::Shared => 1,
            Self::OwnedExclusive => 2,
            Self::OwnedNonExclusive => 3,
        }
    }

    /// Decodes [`DirState::to_byte`]; unknown values decode as `Invalid`.
    pub const fn from_byte(byte: u8) -> Self {
        match byte {
            1 => Self::Shared,
            2 => Self::OwnedExclusive,
            3 => Self::OwnedNonExclusive,
            _ => Self::Invalid,
        }
    }
}

/// One block frame of a set.
///
/// `way` is the physical frame index and never changes; the frame's position in the
/// set's recency stack does.
#[allow(clippy::struct_excessive_bools)]
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct CacheBlock {
    /// Tag bits of the address.
    pub tag: u64,
    /// Set index.
    pub set: usize,
    /// Physical way (frame) index.
    pub way: usize,
    /// Holds a block.
    pub valid: bool,
    /// May be written without a coherence action.
    pub writable: bool,
    /// Modified with respect to the next level.
    pub dirty: bool,
    /// Stored compressed (carried for checkpoints; no timing effect).
    pub compressed: bool,
    /// Requester that brought the block in; drives partition accounting.
    pub requester: Option<RequesterId>,
    /// Tick at which the data becomes usable.
    pub ready_at: Tick,
    /// Directory state (L1 data caches under directory coherence).
    pub dir: DirState,
    /// Directory owner.
    pub owner: Option<RequesterId>,
    /// Directory presence bitmap, one bit per requester.
    pub present: u64,
}

impl CacheBlock {
    /// Creates an invalid frame.
    pub fn empty(set: usize, way: usize) -> Self {
        Self {
            set,
            way,
            ..Self::default()
        }
    }

    /// Clears every state bit, keeping the frame position.
    pub fn invalidate(&mut self) {
        *self = Self::empty(self.set, self.way);
    }

    /// Returns `true` if the frame holds a block.
    pub const fn is_valid(&self) -> bool {
        self.valid
    }

    /// Returns `true` if a write may hit this block.
    pub const fn is_writable(&self) -> bool {
        self.valid && self.writable
    }

    /// Packs the status bits for checkpoints.
    pub const fn flags(&self) -> u8 {
        (self.valid as u8)
            | ((self.writable as u8) << 1)
            | ((self.dirty as u8) << 2)
            | ((self.compressed as u8) << 3)
    }

    /// Restores status bits packed by [`CacheBlock::flags`].
    pub fn set_flags(&mut self, flags: u8) {
        self.valid = flags & 1 != 0;
        self.writable = flags & 2 != 0;
        self.dirty = flags & 4 != 0;
        self.compressed = flags & 8 != 0;
    }
}
