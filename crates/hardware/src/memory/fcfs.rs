//! First-come first-served schedulers.
//!
//! This module provides:
//! 1. **Fcfs:** Strict arrival order with a closed-page policy. The page of the oldest
//!    request is activated, accessed and closed again once the next request targets a
//!    different page.
//! 2. **ReadFirst:** Separate read, write and writeback queues with open-page
//!    management. Reads win over writes, row hits win over activations, and a page is
//!    only closed when no queued request targets it.

use std::collections::VecDeque;

use tracing::trace;

use crate::common::{SimError, SimResult, Tick};
use crate::config::MemoryConfig;
use crate::request::{MemCmd, MemRequest, ReqId};

use super::{DramCommand, MemoryController, OpenPages, Queued};

/// Closed-page first-come first-served scheduler.
#[derive(Debug)]
pub struct Fcfs {
    queue: VecDeque<Queued>,
    pages: OpenPages,
    capacity: usize,
    page_size: u64,
    cores: usize,
    seq: u64,
}

impl Fcfs {
    /// Creates an empty scheduler.
    pub fn new(config: &MemoryConfig, cores: usize) -> Self {
        Self {
            queue: VecDeque::new(),
            pages: OpenPages::new(1),
            capacity: config.queue_size,
            page_size: config.page_size,
            cores,
            seq: 0,
        }
    }
}

impl MemoryController for Fcfs {
    fn name(&self) -> &'static str {
        "fcfs"
    }

    fn insert_request(&mut self, id: ReqId, req: &MemRequest, now: Tick) -> SimResult<()> {
        if self.is_blocked() {
            return Err(SimError::invariant("memory", format!("insert of {id} into a full queue")));
        }
        let entry = Queued::classify(id, req, self.page_size, self.cores, now, self.seq)?;
        self.seq += 1;
        self.queue.push_back(entry);
        Ok(())
    }

    fn has_more_requests(&self) -> bool {
        !self.queue.is_empty()
    }

    fn get_request(&mut self, _now: Tick) -> SimResult<Option<DramCommand>> {
        let Some(front) = self.queue.front().copied() else {
            // Closed page: nothing stays open once the queue drains.
            let open = self.pages.pages().next();
            if let Some(page) = open {
                self.pages.close(page)?;
                return Ok(Some(DramCommand::Close { page }));
            }
            return Ok(None);
        };
        if self.pages.is_open(front.page) {
            let _ = self.queue.pop_front();
            return Ok(Some(front.access()));
        }
        let open = self.pages.pages().next();
        if let Some(page) = open {
            self.pages.close(page)?;
            return Ok(Some(DramCommand::Close { page }));
        }
        self.pages.open(front.page)?;
        Ok(Some(DramCommand::Activate { page: front.page }))
    }

    fn is_blocked(&self) -> bool {
        self.queue.len() >= self.capacity
    }

    fn queued(&self) -> usize {
        self.queue.len()
    }
}

/// Read-priority first-come first-served scheduler with open-page management.
#[derive(Debug)]
pub struct ReadFirst {
    reads: VecDeque<Queued>,
    writes: VecDeque<Queued>,
    writebacks: VecDeque<Queued>,
    pages: OpenPages,
    capacity: usize,
    page_size: u64,
    cores: usize,
    seq: u64,
}

impl ReadFirst {
    /// Creates an empty scheduler.
    pub fn new(config: &MemoryConfig, cores: usize) -> Self {
        Self {
            reads: VecDeque::new(),
            writes: VecDeque::new(),
            writebacks: VecDeque::new(),
            pages: OpenPages::new(config.open_page_slots),
            capacity: config.queue_size,
            page_size: config.page_size,
            cores,
            seq: 0,
        }
    }

    fn referenced(&self, page: u64) -> bool {
        self.reads
            .iter()
            .chain(&self.writes)
            .chain(&self.writebacks)
            .any(|q| q.page == page)
    }

    /// Oldest queued write or writeback whose page satisfies `pred`.
    fn oldest_write(&self, pred: impl Fn(&Queued) -> bool) -> Option<(bool, usize)> {
        let write = self.writes.iter().position(&pred).map(|i| (false, i));
        let writeback = self.writebacks.iter().position(&pred).map(|i| (true, i));
        match (write, writeback) {
            (Some(w), Some(b)) => {
                if self.writes[w.1].seq < self.writebacks[b.1].seq {
                    Some(w)
                } else {
                    Some(b)
                }
            }
            (w, b) => w.or(b),
        }
    }

    fn take_write(&mut self, (writeback, index): (bool, usize)) -> Option<Queued> {
        if writeback {
            self.writebacks.remove(index)
        } else {
            self.writes.remove(index)
        }
    }
}

impl MemoryController for ReadFirst {
    fn name(&self) -> &'static str {
        "read-first"
    }

    fn insert_request(&mut self, id: ReqId, req: &MemRequest, now: Tick) -> SimResult<()> {
        if self.is_blocked() {
            return Err(SimError::invariant("memory", format!("insert of {id} into a full queue")));
        }
        let entry = Queued::classify(id, req, self.page_size, self.cores, now, self.seq)?;
        self.seq += 1;
        match req.cmd {
            MemCmd::Writeback => self.writebacks.push_back(entry),
            cmd if cmd.is_write() => self.writes.push_back(entry),
            _ => self.reads.push_back(entry),
        }
        Ok(())
    }

    fn has_more_requests(&self) -> bool {
        !(self.reads.is_empty() && self.writes.is_empty() && self.writebacks.is_empty())
    }

    fn get_request(&mut self, _now: Tick) -> SimResult<Option<DramCommand>> {
        if let Some(i) = self.reads.iter().position(|q| self.pages.is_open(q.page))
            && let Some(read) = self.reads.remove(i)
        {
            return Ok(Some(read.access()));
        }
        if self.pages.has_free()
            && let Some(read) = self.reads.front()
        {
            let page = read.page;
            self.pages.open(page)?;
            trace!(page, "activate for read");
            return Ok(Some(DramCommand::Activate { page }));
        }
        if let Some(slot) = self.oldest_write(|q| self.pages.is_open(q.page))
            && let Some(write) = self.take_write(slot)
        {
            return Ok(Some(write.access()));
        }
        if self.pages.has_free()
            && let Some(slot) = self.oldest_write(|_| true)
        {
            let page = if slot.0 {
                self.writebacks[slot.1].page
            } else {
                self.writes[slot.1].page
            };
            self.pages.open(page)?;
            trace!(page, "activate for write");
            return Ok(Some(DramCommand::Activate { page }));
        }
        if let Some(page) = self.pages.victim(|p| self.referenced(p)) {
            let referenced = self.referenced(page);
            self.pages.close_unreferenced(page, referenced)?;
            return Ok(Some(DramCommand::Close { page }));
        }
        if self.has_more_requests() {
            return Err(SimError::invariant(
                "memory",
                "every open page is referenced yet no queued request hits one",
            ));
        }
        Ok(None)
    }

    fn is_blocked(&self) -> bool {
        self.queued() >= self.capacity
    }

    fn queued(&self) -> usize {
        self.reads.len() + self.writes.len() + self.writebacks.len()
    }
}
