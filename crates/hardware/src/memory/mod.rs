//! DRAM memory controllers.
//!
//! The memory side of the hierarchy is split in two halves:
//! 1. **Schedulers:** [`MemoryController`] implementations that own the request queues and
//!    decide which DRAM command to issue next (page activation, page close or column access).
//! 2. **Device:** [`DramDevice`], which charges CAS, RAS and precharge latencies and keeps
//!    the device busy while a command is in flight.
//!
//! Schedulers never see time beyond the tick they are asked for a command; the device
//! decides when the next command may start.

/// DRAM device timing model.
pub mod dram;

/// First-come first-served schedulers (closed page and read-first open page).
pub mod fcfs;

/// Strictly partitioned per-core queues.
pub mod fixed;

/// Network fair queueing.
pub mod nfq;

/// Open-page bookkeeping shared by the schedulers.
pub mod page;

pub use dram::DramDevice;
pub use fcfs::{Fcfs, ReadFirst};
pub use fixed::FixedBandwidth;
pub use nfq::Nfq;
pub use page::OpenPages;

use crate::common::{RequesterId, SimError, SimResult, Tick};
use crate::config::{MemoryConfig, SchedulerKind};
use crate::request::{MemCmd, MemRequest, ReqId};

/// Command issued by a scheduler to the DRAM device.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DramCommand {
    /// Open (activate) a page.
    Activate {
        /// Page number.
        page: u64,
    },
    /// Close (precharge) a page.
    Close {
        /// Page number.
        page: u64,
    },
    /// Column access to an open page.
    Access {
        /// Request being serviced.
        req: ReqId,
        /// Traffic class the access is accounted to (cores, then writebacks).
        requester: RequesterId,
        /// Page number.
        page: u64,
        /// Write or writeback access.
        is_write: bool,
        /// Bytes transferred.
        size: u32,
    },
}

/// Trait for DRAM schedulers.
///
/// A controller accepts requests until one of its queues reaches its occupancy
/// threshold, after which [`MemoryController::is_blocked`] reports `true` and the
/// L2 banks hold further traffic back.
pub trait MemoryController: Send + Sync {
    /// Short name used in statistics output.
    fn name(&self) -> &'static str;

    /// Queues a request.
    ///
    /// # Arguments
    ///
    /// * `id` - Handle of the request.
    /// * `req` - The request itself.
    /// * `now` - Arrival tick.
    ///
    /// # Errors
    ///
    /// [`SimError::Unimplemented`] for block copies, [`SimError::Invariant`] for commands
    /// that never reach memory or for insertion into a full queue.
    fn insert_request(&mut self, id: ReqId, req: &MemRequest, now: Tick) -> SimResult<()>;

    /// Returns `true` while a request is queued.
    fn has_more_requests(&self) -> bool;

    /// Picks the next DRAM command.
    ///
    /// # Returns
    ///
    /// `None` only when no request is queued and no page needs closing.
    ///
    /// # Errors
    ///
    /// [`SimError::Invariant`] when page management would close a page that a queued
    /// request still targets.
    fn get_request(&mut self, now: Tick) -> SimResult<Option<DramCommand>>;

    /// Returns `true` when the controller accepts no further requests.
    fn is_blocked(&self) -> bool;

    /// Returns `true` when a request of `requester` would be rejected.
    fn is_blocked_for(&self, requester: RequesterId) -> bool {
        let _ = requester;
        self.is_blocked()
    }

    /// Number of queued requests.
    fn queued(&self) -> usize;
}

impl std::fmt::Debug for dyn MemoryController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryController")
            .field("name", &self.name())
            .field("queued", &self.queued())
            .finish()
    }
}

/// A request waiting in a scheduler queue.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Queued {
    pub id: ReqId,
    pub class: RequesterId,
    pub page: u64,
    pub is_write: bool,
    pub size: u32,
    pub arrived_at: Tick,
    pub seq: u64,
}

impl Queued {
    /// Classifies a request for a scheduler with `cores` core queues.
    ///
    /// Writebacks and traffic from non-core requesters share the pseudo-requester
    /// `cores`.
    pub fn classify(
        id: ReqId,
        req: &MemRequest,
        page_size: u64,
        cores: usize,
        now: Tick,
        seq: u64,
    ) -> SimResult<Self> {
        match req.cmd {
            MemCmd::Copy => return Err(SimError::Unimplemented("block copy in the memory controller")),
            MemCmd::Invalidate | MemCmd::Activate | MemCmd::Close | MemCmd::Directory(_) => {
                return Err(SimError::invariant(
                    "memory",
                    format!("{} request {id} reached the memory controller", req.cmd),
                ));
            }
            _ => {}
        }
        let class = if req.cmd == MemCmd::Writeback || req.requester >= cores {
            cores
        } else {
            req.requester
        };
        Ok(Self {
            id,
            class,
            page: req.addr.page(page_size),
            is_write: req.cmd.is_write(),
            size: req.size,
            arrived_at: now,
            seq,
        })
    }

    pub const fn access(&self) -> DramCommand {
        DramCommand::Access {
            req: self.id,
            requester: self.class,
            page: self.page,
            is_write: self.is_write,
            size: self.size,
        }
    }
}

/// Builds the scheduler selected by `config`.
///
/// # Arguments
///
/// * `config` - Memory configuration.
/// * `cores` - Number of cores; the writeback pseudo-requester follows them.
///
/// # Errors
///
/// [`SimError::Config`] for an unusable queue or page configuration.
pub fn build_controller(config: &MemoryConfig, cores: usize) -> SimResult<Box<dyn MemoryController>> {
    if config.queue_size == 0 {
        return Err(SimError::config("memory", "queue size must be positive"));
    }
    if config.open_page_slots == 0 {
        return Err(SimError::config("memory", "at least one open page slot is required"));
    }
    Ok(match config.scheduler {
        SchedulerKind::Fcfs => Box::new(Fcfs::new(config, cores)),
        SchedulerKind::ReadFirst => Box::new(ReadFirst::new(config, cores)),
        SchedulerKind::Nfq => Box::new(Nfq::new(config, cores)?),
        SchedulerKind::FixedBandwidth => Box::new(FixedBandwidth::new(config, cores)?),
    })
}
