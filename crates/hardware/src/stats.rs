//! Simulation statistics collection and reporting.
//!
//! This module tracks performance metrics of the memory hierarchy. It provides:
//! 1. **Cores:** Issued, completed and rejected accesses with round-trip latency.
//! 2. **Caches:** Hits, misses, MSHR hits, writebacks, blocking and interference, per
//!    L1 and per L2 bank.
//! 3. **Interconnect:** Grants, deferrals and queueing delay.
//! 4. **Memory:** DRAM commands, row hits and per-requester service time.
//! 5. **Partitioning:** Epochs, repartitions and the quotas in force.
//!
//! Every struct is `Serialize` so the whole tree can be dumped as JSON.

use serde::Serialize;

use crate::cache::blocked::BlockedCause;
use crate::common::Tick;

/// Per-core access counters.
#[derive(Clone, Debug, Default, Serialize)]
pub struct CoreStats {
    /// Accesses handed to the hierarchy.
    pub issued: u64,
    /// Accesses completed.
    pub completed: u64,
    /// Times an access was refused by a blocked L1 and queued for retry.
    pub rejected: u64,
    /// Accesses dropped by a squash.
    pub squashed: u64,
    /// Sum of issue-to-completion latencies.
    pub total_latency: u64,
}

impl CoreStats {
    /// Mean issue-to-completion latency.
    pub fn avg_latency(&self) -> f64 {
        if self.completed == 0 {
            0.0
        } else {
            self.total_latency as f64 / self.completed as f64
        }
    }
}

/// Counters of one cache (an L1 or an L2 bank).
#[derive(Clone, Debug, Default, Serialize)]
pub struct CacheStats {
    /// Cache name.
    pub name: String,
    /// Accesses looked up in the tag array.
    pub accesses: u64,
    /// Hits.
    pub hits: u64,
    /// Misses (including hidden matches and permission misses).
    pub misses: u64,
    /// Hits per requester.
    pub hits_by_requester: Vec<u64>,
    /// Misses per requester.
    pub misses_by_requester: Vec<u64>,
    /// Misses that joined an outstanding MSHR.
    pub mshr_hits: u64,
    /// Misses that allocated a new MSHR.
    pub mshr_misses: u64,
    /// Misses on a present but read-only block.
    pub upgrades: u64,
    /// Writes routed to the write buffer without allocating.
    pub buffered_writes: u64,
    /// Uncacheable accesses.
    pub uncacheable: u64,
    /// Writebacks generated by evictions.
    pub writebacks: u64,
    /// Writebacks received from above.
    pub writebacks_received: u64,
    /// Directory messages sent.
    pub directory_sent: u64,
    /// Directory messages received.
    pub directory_received: u64,
    /// Blocks installed.
    pub fills: u64,
    /// Fills postponed for lack of a write buffer.
    pub deferred_fills: u64,
    /// Targets that vanished before their fill.
    pub dropped_targets: u64,
    /// Targets removed by squashes.
    pub squashed_targets: u64,
    /// Blocks invalidated by snoops.
    pub snoop_invalidations: u64,
    /// Accesses refused while blocked.
    pub blocked_rejections: u64,
    /// Times each blocked cause was raised, indexed like [`BlockedCause::ALL`].
    pub blocked_events: [u64; 5],
    /// Ticks spent with each blocked cause set.
    pub blocked_ticks: [u64; 5],
    /// Sum of miss latencies (MSHR allocation to fill).
    pub total_miss_latency: u64,
    /// Interference matrix `[victim][interferer]`, copied at report time.
    pub interference: Vec<Vec<u64>>,
}

impl CacheStats {
    /// Creates zeroed counters.
    pub fn new(name: impl Into<String>, requesters: usize) -> Self {
        Self {
            name: name.into(),
            hits_by_requester: vec![0; requesters],
            misses_by_requester: vec![0; requesters],
            ..Self::default()
        }
    }

    /// Miss rate in percent.
    pub fn miss_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            100.0 * self.misses as f64 / total as f64
        }
    }

    /// Adds `other` into `self` (used to total the L2 banks).
    pub fn accumulate(&mut self, other: &Self) {
        self.accesses += other.accesses;
        self.hits += other.hits;
        self.misses += other.misses;
        for (dst, src) in self.hits_by_requester.iter_mut().zip(&other.hits_by_requester) {
            *dst += src;
        }
        for (dst, src) in self.misses_by_requester.iter_mut().zip(&other.misses_by_requester) {
            *dst += src;
        }
        self.mshr_hits += other.mshr_hits;
        self.mshr_misses += other.mshr_misses;
        self.upgrades += other.upgrades;
        self.buffered_writes += other.buffered_writes;
        self.uncacheable += other.uncacheable;
        self.writebacks += other.writebacks;
        self.writebacks_received += other.writebacks_received;
        self.directory_sent += other.directory_sent;
        self.directory_received += other.directory_received;
        self.fills += other.fills;
        self.deferred_fills += other.deferred_fills;
        self.dropped_targets += other.dropped_targets;
        self.squashed_targets += other.squashed_targets;
        self.snoop_invalidations += other.snoop_invalidations;
        self.blocked_rejections += other.blocked_rejections;
        for i in 0..BlockedCause::ALL.len() {
            self.blocked_events[i] += other.blocked_events[i];
            self.blocked_ticks[i] += other.blocked_ticks[i];
        }
        self.total_miss_latency += other.total_miss_latency;
        if self.interference.len() < other.interference.len() {
            self.interference = vec![vec![0; other.interference.len()]; other.interference.len()];
        }
        for (row, src) in self.interference.iter_mut().zip(&other.interference) {
            for (cell, v) in row.iter_mut().zip(src) {
                *cell += v;
            }
        }
    }
}

/// Interconnect counters.
#[derive(Clone, Debug, Default, Serialize)]
pub struct InterconnectStats {
    /// Requests enqueued for arbitration.
    pub requests: u64,
    /// Grants issued.
    pub grants: u64,
    /// Arbitrations skipped because the destination was blocked.
    pub deferred_arbitrations: u64,
    /// Arbitrations lost to a channel conflict.
    pub resource_conflicts: u64,
    /// Deliveries postponed because the destination was blocked.
    pub deferred_deliveries: u64,
    /// Deliveries completed.
    pub deliveries: u64,
    /// Sum of request-to-grant waiting times.
    pub total_queue_ticks: u64,
    /// Sum of grant-to-delivery times.
    pub total_transfer_ticks: u64,
}

/// Memory controller and DRAM counters.
#[derive(Clone, Debug, Default, Serialize)]
pub struct MemoryStats {
    /// Read accesses serviced.
    pub reads: u64,
    /// Write and writeback accesses serviced.
    pub writes: u64,
    /// Page activations.
    pub activates: u64,
    /// Page closes.
    pub closes: u64,
    /// Accesses to an already open page without an activation of their own.
    pub row_hits: u64,
    /// Ticks the device was busy.
    pub busy_ticks: u64,
    /// Access service ticks per requester (cores, then writebacks).
    pub service_ticks: Vec<u64>,
    /// Times the controller became blocked.
    pub blocked_events: u64,
    /// Largest queue occupancy seen.
    pub max_queue: usize,
}

/// Partitioning controller counters.
#[derive(Clone, Debug, Default, Serialize)]
pub struct PartitionStats {
    /// Completed collection phases.
    pub epochs: u64,
    /// Quota changes pushed to the tag stores.
    pub repartitions: u64,
    /// Quotas in force, if any.
    pub current: Option<Vec<usize>>,
}

/// All statistics of one run.
#[derive(Clone, Debug, Default, Serialize)]
pub struct SimStats {
    /// Current simulated tick.
    pub ticks: Tick,
    /// Events dispatched.
    pub events: u64,
    /// Requests created.
    pub requests_created: u64,
    /// Per-core counters.
    pub cores: Vec<CoreStats>,
    /// Per-L1 counters.
    pub l1: Vec<CacheStats>,
    /// Per-L2-bank counters.
    pub l2: Vec<CacheStats>,
    /// Interconnect counters.
    pub interconnect: InterconnectStats,
    /// Memory counters.
    pub memory: MemoryStats,
    /// Partitioning counters.
    pub partition: PartitionStats,
}

/// Section names for selective stats output.
///
/// Pass an empty slice to [`SimStats::print_sections`] to print all sections.
pub const STATS_SECTIONS: &[&str] = &["summary", "cores", "caches", "interconnect", "memory", "partition"];

fn pct(part: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        100.0 * part as f64 / total as f64
    }
}

fn print_cache(stats: &CacheStats) {
    println!(
        "  {:<8} accesses: {:<10} | hits: {:<10} | miss_rate: {:.2}%",
        stats.name,
        stats.hits + stats.misses,
        stats.hits,
        stats.miss_rate()
    );
    println!(
        "           mshr_hits: {:<9} | mshr_misses: {:<7} | writebacks: {}",
        stats.mshr_hits, stats.mshr_misses, stats.writebacks
    );
    let blocked: Vec<String> = BlockedCause::ALL
        .iter()
        .filter(|c| stats.blocked_events[c.index()] > 0)
        .map(|c| {
            format!(
                "{c}={}/{}t",
                stats.blocked_events[c.index()],
                stats.blocked_ticks[c.index()]
            )
        })
        .collect();
    if !blocked.is_empty() {
        println!("           blocked: {}", blocked.join(" "));
    }
}

impl SimStats {
    /// Totals over all L2 banks.
    pub fn l2_total(&self) -> CacheStats {
        let requesters = self.cores.len();
        let mut total = CacheStats::new("L2", requesters);
        for bank in &self.l2 {
            total.accumulate(bank);
        }
        total
    }

    /// Prints only the requested statistics sections to stdout.
    ///
    /// Each element of `sections` should be one of [`STATS_SECTIONS`]. Pass an empty
    /// slice to print all sections (same as `print()`).
    ///
    /// # Arguments
    ///
    /// * `sections` - Slice of section names to print, or empty for all.
    pub fn print_sections(&self, sections: &[String]) {
        let want = |s: &str| sections.is_empty() || sections.iter().any(|x| x == s);

        if want("summary") {
            let issued: u64 = self.cores.iter().map(|c| c.issued).sum();
            let completed: u64 = self.cores.iter().map(|c| c.completed).sum();
            println!("\n==========================================================");
            println!("MEMORY HIERARCHY SIMULATION STATISTICS");
            println!("==========================================================");
            println!("sim_ticks                {}", self.ticks);
            println!("sim_events               {}", self.events);
            println!("sim_requests             {}", self.requests_created);
            println!("accesses.issued          {issued}");
            println!("accesses.completed       {completed}");
            println!("----------------------------------------------------------");
        }
        if want("cores") {
            println!("CORES");
            for (i, core) in self.cores.iter().enumerate() {
                println!(
                    "  core{i:<3} issued: {:<10} | completed: {:<10} | avg_latency: {:.2}",
                    core.issued,
                    core.completed,
                    core.avg_latency()
                );
                if core.rejected + core.squashed > 0 {
                    println!(
                        "           rejected: {:<9} | squashed: {}",
                        core.rejected, core.squashed
                    );
                }
            }
            println!("----------------------------------------------------------");
        }
        if want("caches") {
            println!("CACHES");
            for l1 in &self.l1 {
                print_cache(l1);
            }
            for bank in &self.l2 {
                print_cache(bank);
            }
            if self.l2.len() > 1 {
                print_cache(&self.l2_total());
            }
            let total = self.l2_total();
            for (victim, row) in total.interference.iter().enumerate() {
                for (interferer, &count) in row.iter().enumerate() {
                    if count > 0 {
                        println!("  interference.{victim}<-{interferer}   {count}");
                    }
                }
            }
            println!("----------------------------------------------------------");
        }
        if want("interconnect") {
            let ic = &self.interconnect;
            println!("INTERCONNECT");
            println!("  grants                 {}", ic.grants);
            println!("  deferred.arbitration   {}", ic.deferred_arbitrations);
            println!("  deferred.delivery      {}", ic.deferred_deliveries);
            println!("  conflicts              {}", ic.resource_conflicts);
            let grants = ic.grants.max(1);
            println!(
                "  avg_queue_ticks        {:.2}",
                ic.total_queue_ticks as f64 / grants as f64
            );
            println!(
                "  avg_transfer_ticks     {:.2}",
                ic.total_transfer_ticks as f64 / grants as f64
            );
            println!("----------------------------------------------------------");
        }
        if want("memory") {
            let m = &self.memory;
            let accesses = m.reads + m.writes;
            println!("MEMORY");
            println!("  reads                  {}", m.reads);
            println!("  writes                 {}", m.writes);
            println!("  activates              {}", m.activates);
            println!("  closes                 {}", m.closes);
            println!(
                "  row_hits               {} ({:.2}%)",
                m.row_hits,
                pct(m.row_hits, accesses)
            );
            println!(
                "  busy                   {} ({:.2}%)",
                m.busy_ticks,
                pct(m.busy_ticks, self.ticks)
            );
            let service: u64 = m.service_ticks.iter().sum();
            for (r, &ticks) in m.service_ticks.iter().enumerate() {
                let label = if r + 1 == m.service_ticks.len() {
                    "writeback".to_string()
                } else {
                    format!("core{r}")
                };
                println!(
                    "  service.{label:<14} {ticks} ({:.2}%)",
                    pct(ticks, service)
                );
            }
            println!("----------------------------------------------------------");
        }
        if want("partition") && (self.partition.epochs > 0 || self.partition.current.is_some()) {
            println!("PARTITIONING");
            println!("  epochs                 {}", self.partition.epochs);
            println!("  repartitions           {}", self.partition.repartitions);
            if let Some(quotas) = &self.partition.current {
                println!("  quotas                 {quotas:?}");
            }
            println!("----------------------------------------------------------");
        }
        println!("==========================================================");
    }

    /// Prints all statistics sections to stdout.
    ///
    /// Equivalent to `print_sections(&[])`.
    pub fn print(&self) {
        self.print_sections(&[]);
    }

    /// Serializes the statistics as pretty-printed JSON.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}
