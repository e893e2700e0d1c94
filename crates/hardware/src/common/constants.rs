//! Global simulator constants.
//!
//! This module defines constants shared across components. It includes:
//! 1. **Geometry limits:** Maximum requesters tracked in presence bitmaps.
//! 2. **Checkpoint format:** File suffix and record size of the tag-array blob.
//! 3. **Sentinels:** Values used where an identifier is absent on disk.

/// Maximum number of requesters a directory presence bitmap can track.
pub const MAX_REQUESTERS: usize = 64;

/// Suffix appended to a cache name to form its checkpoint file (`<name>-content.bin`).
pub const CHECKPOINT_SUFFIX: &str = "-content.bin";

/// Size in bytes of one block record in a checkpoint blob.
///
/// Layout: set (u32), way (u32), tag (u64), flags (u8), state (u8), owner (u32),
/// requester (u32), present bitmap (u64), ready tick (u64).
pub const CHECKPOINT_RECORD_BYTES: usize = 4 + 4 + 8 + 1 + 1 + 4 + 4 + 8 + 8;

/// On-disk encoding of an absent owner or requester.
pub const NO_OWNER: u32 = u32::MAX;
