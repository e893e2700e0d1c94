//! Tag-array checkpoints.
//!
//! A cache's tag array is dumped to `<name>-content.bin`: a little-endian `u64` frame
//! count followed by one fixed-size record per frame (see
//! [`CHECKPOINT_RECORD_BYTES`]). Frames are written set by set in recency order, so a
//! restore reproduces the LRU stacks exactly.

use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use tracing::debug;

use super::block::{CacheBlock, DirState};
use super::tags::TagStore;
use crate::common::constants::{CHECKPOINT_RECORD_BYTES, CHECKPOINT_SUFFIX, NO_OWNER};
use crate::common::{SimError, SimResult};

/// Path of the checkpoint file of cache `name` inside `dir`.
pub fn checkpoint_path(dir: &Path, name: &str) -> PathBuf {
    dir.join(format!("{name}{CHECKPOINT_SUFFIX}"))
}

fn encode(blk: &CacheBlock, out: &mut Vec<u8>) {
    out.extend_from_slice(&(blk.set as u32).to_le_bytes());
    out.extend_from_slice(&(blk.way as u32).to_le_bytes());
    out.extend_from_slice(&blk.tag.to_le_bytes());
    out.push(blk.flags());
    out.push(blk.dir.to_byte());
    let owner = blk.owner.map_or(NO_OWNER, |o| o as u32);
    out.extend_from_slice(&owner.to_le_bytes());
    let requester = blk.requester.map_or(NO_OWNER, |r| r as u32);
    out.extend_from_slice(&requester.to_le_bytes());
    out.extend_from_slice(&blk.present.to_le_bytes());
    out.extend_from_slice(&blk.ready_at.to_le_bytes());
}

fn read_u32(rec: &[u8], at: usize) -> u32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(&rec[at..at + 4]);
    u32::from_le_bytes(buf)
}

fn read_u64(rec: &[u8], at: usize) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&rec[at..at + 8]);
    u64::from_le_bytes(buf)
}

fn decode(rec: &[u8]) -> CacheBlock {
    let mut blk = CacheBlock::empty(read_u32(rec, 0) as usize, read_u32(rec, 4) as usize);
    blk.tag = read_u64(rec, 8);
    blk.set_flags(rec[16]);
    blk.dir = DirState::from_byte(rec[17]);
    let owner = read_u32(rec, 18);
    blk.owner = (owner != NO_OWNER).then_some(owner as usize);
    let requester = read_u32(rec, 22);
    blk.requester = (requester != NO_OWNER).then_some(requester as usize);
    blk.present = read_u64(rec, 26);
    blk.ready_at = read_u64(rec, 34);
    blk
}

/// Writes the tag array of a cache.
///
/// # Arguments
///
/// * `dir` - Checkpoint directory.
/// * `name` - Cache name.
/// * `tags` - Tag store to dump.
///
/// # Returns
///
/// The path written.
pub fn save(dir: &Path, name: &str, tags: &dyn TagStore) -> SimResult<PathBuf> {
    let frames = tags.frames();
    let path = checkpoint_path(dir, name);
    let mut out = Vec::with_capacity(8 + frames.len() * CHECKPOINT_RECORD_BYTES);
    out.extend_from_slice(&(frames.len() as u64).to_le_bytes());
    for blk in frames {
        encode(blk, &mut out);
    }
    let mut writer = BufWriter::new(fs::File::create(&path)?);
    writer.write_all(&out)?;
    writer.flush()?;
    debug!(cache = name, path = %path.display(), bytes = out.len(), "checkpoint written");
    Ok(path)
}

/// Restores the tag array of a cache.
///
/// # Returns
///
/// The number of valid blocks restored. Ready ticks belong to the run that wrote the
/// checkpoint, so restored blocks are ready immediately.
///
/// # Errors
///
/// [`SimError::Io`] if the file cannot be read, [`SimError::Invariant`] if it is
/// truncated or does not match the cache geometry.
pub fn load(dir: &Path, name: &str, tags: &mut dyn TagStore) -> SimResult<usize> {
    let path = checkpoint_path(dir, name);
    let bytes = fs::read(&path)?;
    if bytes.len() < 8 {
        return Err(SimError::invariant(name, "checkpoint shorter than its header"));
    }
    let count = read_u64(&bytes, 0) as usize;
    let body = &bytes[8..];
    if body.len() != count * CHECKPOINT_RECORD_BYTES {
        return Err(SimError::invariant(
            name,
            format!(
                "checkpoint holds {} bytes for {count} records",
                body.len()
            ),
        ));
    }
    let geometry = tags.geometry();
    if count != geometry.sets * geometry.assoc {
        return Err(SimError::invariant(
            name,
            format!(
                "checkpoint has {count} frames, cache has {}",
                geometry.sets * geometry.assoc
            ),
        ));
    }
    let frames: Vec<CacheBlock> = body
        .chunks_exact(CHECKPOINT_RECORD_BYTES)
        .map(|rec| CacheBlock {
            ready_at: 0,
            ..decode(rec)
        })
        .collect();
    let valid = frames.iter().filter(|b| b.valid).count();
    tags.restore(frames)?;
    debug!(cache = name, valid, "checkpoint restored");
    Ok(valid)
}
