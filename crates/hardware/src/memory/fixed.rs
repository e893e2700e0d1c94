//! Fixed-bandwidth scheduler.
//!
//! Each core owns a bounded queue of `per_core_queue` entries; writebacks and traffic
//! from non-core requesters share an "other" queue of `queue_size` entries. A full queue
//! blocks only its own requester. Row hits are served first (oldest across all queues);
//! otherwise the queues take turns activating pages in round-robin order.

use std::collections::VecDeque;

use crate::common::{RequesterId, SimError, SimResult, Tick};
use crate::config::MemoryConfig;
use crate::request::{MemRequest, ReqId};

use super::{DramCommand, MemoryController, OpenPages, Queued};

/// Strictly partitioned DRAM scheduler.
#[derive(Debug)]
pub struct FixedBandwidth {
    /// Core queues followed by the shared "other" queue.
    queues: Vec<VecDeque<Queued>>,
    per_core: usize,
    other: usize,
    next: usize,
    pages: OpenPages,
    page_size: u64,
    cores: usize,
    seq: u64,
}

impl FixedBandwidth {
    /// Creates an empty scheduler.
    ///
    /// # Errors
    ///
    /// [`SimError::Config`] for a zero per-core queue size.
    pub fn new(config: &MemoryConfig, cores: usize) -> SimResult<Self> {
        if config.per_core_queue == 0 {
            return Err(SimError::config("memory", "per-core queue size must be positive"));
        }
        Ok(Self {
            queues: vec![VecDeque::new(); cores + 1],
            per_core: config.per_core_queue,
            other: config.queue_size,
            next: 0,
            pages: OpenPages::new(config.open_page_slots),
            page_size: config.page_size,
            cores,
            seq: 0,
        })
    }

    const fn limit(&self, queue: usize) -> usize {
        if queue < self.cores { self.per_core } else { self.other }
    }

    fn queue_full(&self, queue: usize) -> bool {
        self.queues[queue].len() >= self.limit(queue)
    }

    fn referenced(&self, page: u64) -> bool {
        self.queues.iter().flatten().any(|q| q.page == page)
    }

    fn oldest_row_hit(&self) -> Option<(usize, usize)> {
        self.queues
            .iter()
            .enumerate()
            .filter_map(|(qi, queue)| {
                queue
                    .iter()
                    .position(|q| self.pages.is_open(q.page))
                    .map(|i| (qi, i, queue[i].seq))
            })
            .min_by_key(|&(_, _, seq)| seq)
            .map(|(qi, i, _)| (qi, i))
    }
}

impl MemoryController for FixedBandwidth {
    fn name(&self) -> &'static str {
        "fixed-bandwidth"
    }

    fn insert_request(&mut self, id: ReqId, req: &MemRequest, now: Tick) -> SimResult<()> {
        let entry = Queued::classify(id, req, self.page_size, self.cores, now, self.seq)?;
        if self.queue_full(entry.class) {
            return Err(SimError::invariant(
                "memory",
                format!("insert of {id} into the full queue {}", entry.class),
            ));
        }
        self.seq += 1;
        self.queues[entry.class].push_back(entry);
        Ok(())
    }

    fn has_more_requests(&self) -> bool {
        self.queues.iter().any(|q| !q.is_empty())
    }

    fn get_request(&mut self, _now: Tick) -> SimResult<Option<DramCommand>> {
        if let Some((qi, i)) = self.oldest_row_hit()
            && let Some(hit) = self.queues[qi].remove(i)
        {
            return Ok(Some(hit.access()));
        }
        if self.pages.has_free() {
            let n = self.queues.len();
            let turn = (0..n)
                .map(|k| (self.next + k) % n)
                .find(|&qi| !self.queues[qi].is_empty());
            if let Some(qi) = turn
                && let Some(front) = self.queues[qi].front()
            {
                let page = front.page;
                self.pages.open(page)?;
                self.next = (qi + 1) % n;
                return Ok(Some(DramCommand::Activate { page }));
            }
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

    /// Blocked when any queue is full; use [`MemoryController::is_blocked_for`] for the
    /// per-requester view.
    fn is_blocked(&self) -> bool {
        (0..self.queues.len()).any(|q| self.queue_full(q))
    }

    fn is_blocked_for(&self, requester: RequesterId) -> bool {
        self.queue_full(requester.min(self.cores))
    }

    fn queued(&self) -> usize {
        self.queues.iter().map(VecDeque::len).sum()
    }
}
