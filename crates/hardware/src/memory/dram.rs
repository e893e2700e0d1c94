//! DRAM device timing.
//!
//! Row-buffer-aware latencies: an activation costs `t_ras`, a close (precharge) costs
//! `t_pre`, and a column access costs `t_cas` plus the data burst over the DRAM bus.
//! The device executes one command at a time.

use crate::common::{RequesterId, Tick};
use crate::config::MemoryConfig;
use crate::stats::MemoryStats;

use super::DramCommand;

/// DRAM device executing scheduler commands.
#[derive(Clone, Debug)]
pub struct DramDevice {
    t_cas: u64,
    t_ras: u64,
    t_pre: u64,
    bus_width: u64,
    busy_until: Tick,
    /// Pages activated but not yet accessed; the first access to such a page is no row hit.
    fresh: Vec<u64>,
    stats: MemoryStats,
}

impl DramDevice {
    /// Creates an idle device.
    ///
    /// # Arguments
    ///
    /// * `config` - Memory configuration supplying the timing parameters.
    /// * `requesters` - Number of accounting classes (cores plus writebacks).
    pub fn new(config: &MemoryConfig, requesters: usize) -> Self {
        Self {
            t_cas: config.t_cas,
            t_ras: config.t_ras,
            t_pre: config.t_pre,
            bus_width: config.bus_width.max(1),
            busy_until: 0,
            fresh: Vec::new(),
            stats: MemoryStats {
                service_ticks: vec![0; requesters],
                ..MemoryStats::default()
            },
        }
    }

    /// Returns `true` while a command is in flight at `now`.
    pub const fn is_busy(&self, now: Tick) -> bool {
        now < self.busy_until
    }

    /// Tick at which the device becomes free.
    pub const fn busy_until(&self) -> Tick {
        self.busy_until
    }

    /// Latency of a command.
    ///
    /// # Returns
    ///
    /// Ticks the device stays busy.
    pub const fn latency(&self, cmd: &DramCommand) -> u64 {
        match *cmd {
            DramCommand::Activate { .. } => self.t_ras,
            DramCommand::Close { .. } => self.t_pre,
            DramCommand::Access { size, .. } => self.t_cas + (size as u64).div_ceil(self.bus_width),
        }
    }

    /// Starts `cmd` at `now` (or when the device frees up, if later).
    ///
    /// # Returns
    ///
    /// The completion tick.
    pub fn execute(&mut self, cmd: &DramCommand, now: Tick) -> Tick {
        let start = now.max(self.busy_until);
        let latency = self.latency(cmd);
        let done = start + latency;
        self.busy_until = done;
        self.stats.busy_ticks += latency;
        match *cmd {
            DramCommand::Activate { page } => {
                self.stats.activates += 1;
                self.fresh.push(page);
            }
            DramCommand::Close { page } => {
                self.stats.closes += 1;
                self.fresh.retain(|&p| p != page);
            }
            DramCommand::Access {
                requester,
                page,
                is_write,
                ..
            } => {
                if is_write {
                    self.stats.writes += 1;
                } else {
                    self.stats.reads += 1;
                }
                if let Some(pos) = self.fresh.iter().position(|&p| p == page) {
                    let _ = self.fresh.swap_remove(pos);
                } else {
                    self.stats.row_hits += 1;
                }
                self.account(requester, latency);
            }
        }
        done
    }

    fn account(&mut self, requester: RequesterId, ticks: u64) {
        if requester >= self.stats.service_ticks.len() {
            self.stats.service_ticks.resize(requester + 1, 0);
        }
        self.stats.service_ticks[requester] += ticks;
    }

    /// Device counters.
    pub const fn stats(&self) -> &MemoryStats {
        &self.stats
    }

    /// Device counters, mutably (queue statistics are folded in by the owner).
    pub const fn stats_mut(&mut self) -> &mut MemoryStats {
        &mut self.stats
    }
}
