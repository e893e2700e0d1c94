//! Network fair queueing scheduler.
//!
//! Every requester (each core, plus one pseudo-requester for writebacks) owns a virtual
//! finish time. A request queued by requester `r` receives
//!
//! ```text
//! start  = max(virtual_clock, last_finish[r])
//! finish = start + t_cas / weight[r]
//! ```
//!
//! where `virtual_clock` is the smallest start tag still queued (or the last serviced
//! start tag once the queue drains). Servicing in start-tag order hands out DRAM
//! bandwidth in proportion to the weights.
//!
//! A request is *due* when its start tag lies within one service quantum (the smallest
//! per-access increment) of the smallest queued start tag. Row hits are preferred only
//! among due requests, so an open page cannot hold the bus while another requester's
//! tags fall behind.
//!
//! Selection order: (1) the due request with the smallest start tag whose page is open,
//! (2) activation of the page of the smallest-start-tag request when an open-page slot
//! is free, (3) closing an open page no queued request targets, then an open page no due
//! request targets.

use tracing::trace;

use crate::common::{SimError, SimResult, Tick};
use crate::config::MemoryConfig;
use crate::request::{MemRequest, ReqId};

use super::{DramCommand, MemoryController, OpenPages, Queued};

#[derive(Clone, Copy, Debug)]
struct Tagged {
    entry: Queued,
    start: f64,
}

/// Network fair queueing DRAM scheduler.
#[derive(Debug)]
pub struct Nfq {
    queue: Vec<Tagged>,
    pages: OpenPages,
    /// Virtual-time increment per access, per requester.
    increments: Vec<f64>,
    last_finish: Vec<f64>,
    virtual_clock: f64,
    capacity: usize,
    page_size: u64,
    cores: usize,
    seq: u64,
}

impl Nfq {
    /// Creates an empty scheduler.
    ///
    /// # Arguments
    ///
    /// * `config` - Memory configuration; supplies weights and `t_cas`.
    /// * `cores` - Number of cores.
    ///
    /// # Errors
    ///
    /// [`SimError::Config`] if the weight list does not match the core count or a weight
    /// is not positive.
    pub fn new(config: &MemoryConfig, cores: usize) -> SimResult<Self> {
        let weights = config.weights(cores);
        if weights.len() != cores + 1 {
            return Err(SimError::config(
                "memory",
                format!("{} NFQ weights for {cores} cores", weights.len() - 1),
            ));
        }
        if weights.iter().any(|w| w.is_nan() || *w <= 0.0) {
            return Err(SimError::config("memory", "NFQ weights must be positive"));
        }
        let base = config.t_cas.max(1) as f64;
        Ok(Self {
            queue: Vec::new(),
            pages: OpenPages::new(config.open_page_slots),
            increments: weights.iter().map(|w| base / w).collect(),
            last_finish: vec![0.0; cores + 1],
            virtual_clock: 0.0,
            capacity: config.queue_size,
            page_size: config.page_size,
            cores,
            seq: 0,
        })
    }

    /// Current virtual clock.
    pub const fn virtual_clock(&self) -> f64 {
        self.virtual_clock
    }

    fn referenced(&self, page: u64) -> bool {
        self.queue.iter().any(|t| t.entry.page == page)
    }

    /// Index of the smallest start tag among entries matching `pred`; ties go to the
    /// earlier arrival.
    fn smallest_start(&self, pred: impl Fn(&Tagged) -> bool) -> Option<usize> {
        self.queue
            .iter()
            .enumerate()
            .filter(|(_, t)| pred(t))
            .min_by(|(_, a), (_, b)| a.start.total_cmp(&b.start).then(a.entry.seq.cmp(&b.entry.seq)))
            .map(|(i, _)| i)
    }

    /// Start tags below this bound are due for service.
    fn due_horizon(&self) -> f64 {
        let quantum = self.increments.iter().copied().min_by(f64::total_cmp).unwrap_or(0.0);
        self.queue
            .iter()
            .map(|t| t.start)
            .min_by(f64::total_cmp)
            .map_or(f64::NEG_INFINITY, |min| min + quantum)
    }

    fn due_on(&self, page: u64, horizon: f64) -> bool {
        self.queue.iter().any(|t| t.entry.page == page && t.start < horizon)
    }

    fn advance_clock(&mut self, serviced_start: f64) {
        let floor = self
            .queue
            .iter()
            .map(|t| t.start)
            .min_by(f64::total_cmp)
            .unwrap_or(serviced_start);
        self.virtual_clock = self.virtual_clock.max(floor);
    }
}

impl MemoryController for Nfq {
    fn name(&self) -> &'static str {
        "nfq"
    }

    fn insert_request(&mut self, id: ReqId, req: &MemRequest, now: Tick) -> SimResult<()> {
        if self.is_blocked() {
            return Err(SimError::invariant("memory", format!("insert of {id} into a full queue")));
        }
        let entry = Queued::classify(id, req, self.page_size, self.cores, now, self.seq)?;
        self.seq += 1;
        let class = entry.class;
        let start = self.virtual_clock.max(self.last_finish[class]);
        self.last_finish[class] = start + self.increments[class];
        trace!(%id, class, start, finish = self.last_finish[class], "nfq tag");
        self.queue.push(Tagged { entry, start });
        Ok(())
    }

    fn has_more_requests(&self) -> bool {
        !self.queue.is_empty()
    }

    fn get_request(&mut self, _now: Tick) -> SimResult<Option<DramCommand>> {
        let horizon = self.due_horizon();
        if let Some(i) = self.smallest_start(|t| t.start < horizon && self.pages.is_open(t.entry.page)) {
            let tagged = self.queue.remove(i);
            self.advance_clock(tagged.start);
            return Ok(Some(tagged.entry.access()));
        }
        if self.pages.has_free()
            && let Some(i) = self.smallest_start(|_| true)
        {
            let page = self.queue[i].entry.page;
            self.pages.open(page)?;
            return Ok(Some(DramCommand::Activate { page }));
        }
        if let Some(page) = self.pages.victim(|p| self.referenced(p)) {
            let referenced = self.referenced(page);
            self.pages.close_unreferenced(page, referenced)?;
            return Ok(Some(DramCommand::Close { page }));
        }
        // Only requests that are not yet due still target the open pages.
        if let Some(page) = self.pages.victim(|p| self.due_on(p, horizon)) {
            trace!(page, horizon, "nfq closes a page ahead of its tags");
            self.pages.close(page)?;
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
        self.queue.len() >= self.capacity
    }

    fn queued(&self) -> usize {
        self.queue.len()
    }
}
