//! Miss and write-buffer handling strategies.
//!
//! A cache owns exactly one [`MissHandling`] strategy, chosen at construction:
//!
//! - [`MissQueue`]: addressable MSHRs (secondary misses coalesce into targets) plus a
//!   separate write buffer.
//! - [`BlockingBuffer`]: a blocking cache; one outstanding miss with one target and a
//!   single write-back slot.
//!
//! Both are thin policies over two [`MshrQueue`]s. The policy decides capacity and
//! which buffered transaction is sent downstream next.

use std::fmt;

use super::mshr::{MshrId, MshrQueue};
use crate::common::{SimError, SimResult};

/// Which of the two queues an entry lives in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BufferKind {
    /// Fetch MSHRs.
    Miss,
    /// Write buffer (writebacks, buffered writes, directory messages).
    Write,
}

/// An entry in one of the queues.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Slot {
    /// Queue the entry lives in.
    pub kind: BufferKind,
    /// Entry index inside that queue.
    pub mshr: MshrId,
}

/// Strategy owning a cache's miss MSHRs and write buffer.
pub trait MissHandling: fmt::Debug + Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Returns one of the queues.
    fn queue(&self, kind: BufferKind) -> &MshrQueue;

    /// Returns one of the queues, mutably.
    fn queue_mut(&mut self, kind: BufferKind) -> &mut MshrQueue;

    /// Picks the entry to send downstream next, if any is pending.
    fn next_to_send(&self) -> Option<Slot>;

    /// Returns `true` if every miss MSHR is allocated.
    fn mshrs_full(&self) -> bool {
        self.queue(BufferKind::Miss).is_full()
    }

    /// Returns `true` if every write buffer is allocated.
    fn write_buffer_full(&self) -> bool {
        self.queue(BufferKind::Write).is_full()
    }

    /// Number of allocated entries across both queues.
    fn outstanding(&self) -> usize {
        self.queue(BufferKind::Miss).len() + self.queue(BufferKind::Write).len()
    }
}

/// Addressable miss queue with a separate write buffer.
#[derive(Debug)]
pub struct MissQueue {
    mshrs: MshrQueue,
    write_buffer: MshrQueue,
}

impl MissQueue {
    /// Creates a miss queue.
    ///
    /// # Arguments
    ///
    /// * `num_mshrs` - Miss MSHRs.
    /// * `reserve` - MSHRs held back from normal allocation.
    /// * `max_targets` - Targets per MSHR; must exceed one for coalescing to mean anything.
    /// * `write_buffers` - Write-buffer entries.
    ///
    /// # Errors
    ///
    /// [`SimError::Config`] for `max_targets < 2`, zero write buffers, or an unusable
    /// MSHR count.
    pub fn new(
        num_mshrs: usize,
        reserve: usize,
        max_targets: usize,
        write_buffers: usize,
    ) -> SimResult<Self> {
        if max_targets < 2 {
            return Err(SimError::config(
                "miss queue",
                "an addressable miss queue needs at least two targets per MSHR",
            ));
        }
        if write_buffers == 0 {
            return Err(SimError::config("miss queue", "at least one write buffer is required"));
        }
        Ok(Self {
            mshrs: MshrQueue::new(num_mshrs, reserve, max_targets)?,
            write_buffer: MshrQueue::new(write_buffers, 0, 1)?,
        })
    }
}

impl MissHandling for MissQueue {
    fn name(&self) -> &'static str {
        "miss_queue"
    }

    fn queue(&self, kind: BufferKind) -> &MshrQueue {
        match kind {
            BufferKind::Miss => &self.mshrs,
            BufferKind::Write => &self.write_buffer,
        }
    }

    fn queue_mut(&mut self, kind: BufferKind) -> &mut MshrQueue {
        match kind {
            BufferKind::Miss => &mut self.mshrs,
            BufferKind::Write => &mut self.write_buffer,
        }
    }

    fn next_to_send(&self) -> Option<Slot> {
        let write = self.write_buffer.next_pending().map(|mshr| Slot {
            kind: BufferKind::Write,
            mshr,
        });
        // Drain a full write buffer before it stalls fills.
        if self.write_buffer.is_full() && write.is_some() {
            return write;
        }
        self.mshrs
            .next_pending()
            .map(|mshr| Slot {
                kind: BufferKind::Miss,
                mshr,
            })
            .or(write)
    }
}

/// Blocking cache buffer: one outstanding miss with a single target.
#[derive(Debug)]
pub struct BlockingBuffer {
    miss: MshrQueue,
    writeback: MshrQueue,
}

impl BlockingBuffer {
    /// Creates the buffer.
    pub fn new() -> SimResult<Self> {
        Ok(Self {
            miss: MshrQueue::new(1, 0, 1)?,
            writeback: MshrQueue::new(1, 0, 1)?,
        })
    }
}

impl MissHandling for BlockingBuffer {
    fn name(&self) -> &'static str {
        "blocking_buffer"
    }

    fn queue(&self, kind: BufferKind) -> &MshrQueue {
        match kind {
            BufferKind::Miss => &self.miss,
            BufferKind::Write => &self.writeback,
        }
    }

    fn queue_mut(&mut self, kind: BufferKind) -> &mut MshrQueue {
        match kind {
            BufferKind::Miss => &mut self.miss,
            BufferKind::Write => &mut self.writeback,
        }
    }

    fn next_to_send(&self) -> Option<Slot> {
        self.writeback
            .next_pending()
            .map(|mshr| Slot {
                kind: BufferKind::Write,
                mshr,
            })
            .or_else(|| {
                self.miss.next_pending().map(|mshr| Slot {
                    kind: BufferKind::Miss,
                    mshr,
                })
            })
    }
}
