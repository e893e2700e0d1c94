//! Configuration system for the memory hierarchy simulator.
//!
//! This module defines every structure and enum used to parameterize the simulator.
//! It provides:
//! 1. **Defaults:** Baseline hardware constants (geometry, MSHRs, DRAM timing, epochs).
//! 2. **Structures:** Hierarchical config for the system, both cache levels, the
//!    interconnect, the memory controller and the partitioning controller.
//! 3. **Enums:** Miss handling, coherence, interconnect, DRAM scheduler and
//!    partitioning policy selection.
//! 4. **Validation:** [`Config::validate`] rejects impossible configurations before
//!    any component is built.
//!
//! Configuration is supplied as JSON; every field has a default, so
//! `Config::default()` is a runnable two-core system.

use serde::{Deserialize, Serialize};

use crate::common::addr::exact_log2;
use crate::common::constants::MAX_REQUESTERS;
use crate::common::{SimError, SimResult};

/// Default configuration constants for the simulator.
///
/// These values define the baseline hardware when a JSON configuration does not
/// override them.
mod defaults {
    /// Number of cores (each with a private L1).
    pub const CORES: usize = 2;

    /// Cache block size in bytes.
    pub const BLOCK_SIZE: u64 = 64;

    /// L1 capacity in bytes (32 KiB).
    pub const L1_SIZE: u64 = 32 * 1024;

    /// L1 associativity.
    pub const L1_ASSOC: usize = 4;

    /// L1 hit latency in ticks.
    pub const L1_HIT_LATENCY: u64 = 2;

    /// L1 miss MSHRs.
    pub const L1_MSHRS: usize = 8;

    /// Shared L2 capacity in bytes (1 MiB across all banks).
    pub const L2_SIZE: u64 = 1024 * 1024;

    /// L2 associativity.
    pub const L2_ASSOC: usize = 16;

    /// L2 hit latency in ticks.
    pub const L2_HIT_LATENCY: u64 = 10;

    /// L2 miss MSHRs per bank.
    pub const L2_MSHRS: usize = 16;

    /// L2 banks.
    pub const L2_BANKS: usize = 1;

    /// Targets per MSHR.
    pub const MAX_TARGETS: usize = 4;

    /// Write-buffer entries per cache.
    pub const WRITE_BUFFERS: usize = 8;

    /// Width in bytes of the path delivering a fill; drives critical-word-first timing.
    pub const FILL_BUS_WIDTH: u64 = 16;

    /// Interconnect arbitration delay in ticks.
    pub const ARBITRATION_DELAY: u64 = 1;

    /// Interconnect transfer delay in ticks.
    pub const TRANSFER_DELAY: u64 = 4;

    /// Butterfly per-hop link delay in ticks.
    pub const LINK_DELAY: u64 = 1;

    /// Interconnect width in bytes (split-transaction bus transit time).
    pub const INTERCONNECT_WIDTH: u64 = 16;

    /// Bytes of an address-only message.
    pub const HEADER_BYTES: u32 = 8;

    /// Memory controller queue entries.
    pub const MEMORY_QUEUE: usize = 32;

    /// Per-core queue entries of the fixed-bandwidth controller.
    pub const PER_CORE_QUEUE: usize = 8;

    /// DRAM page size in bytes.
    pub const PAGE_SIZE: u64 = 2048;

    /// Simultaneously open DRAM pages.
    pub const OPEN_PAGE_SLOTS: usize = 4;

    /// CAS latency in ticks.
    pub const T_CAS: u64 = 14;

    /// RAS latency in ticks.
    pub const T_RAS: u64 = 14;

    /// Precharge latency in ticks.
    pub const T_PRE: u64 = 14;

    /// DRAM data bus width in bytes.
    pub const DRAM_BUS_WIDTH: u64 = 8;

    /// Memory bus latency between the L2 and the controller, in ticks.
    pub const MEMORY_BUS_LATENCY: u64 = 4;

    /// NFQ weight of writeback traffic relative to a core weight of 1.0.
    pub const WRITEBACK_WEIGHT: f64 = 0.5;

    /// Partitioning epoch in ticks.
    pub const EPOCH: u64 = 500_000;

    /// Ticks before the first collection phase.
    pub const WARMUP: u64 = 100_000;

    /// Shadow tags sample every n-th set.
    pub const SAMPLE_INTERVAL: usize = 32;

    /// Fraction of its full-cache hits a requester must reach with its equal share
    /// to be classified as a supplier by the time-shared policy.
    pub const MTP_THRESHOLD: f64 = 0.95;
}

/// Miss handling strategy of a cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum MissHandlingKind {
    /// Addressable MSHRs with target coalescing and a write buffer.
    #[default]
    Queue,
    /// Blocking cache: one outstanding miss with one target.
    Blocking,
}

/// Coherence protocol of a cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum CoherenceKind {
    /// Uniprocessor pass-through.
    #[default]
    Uni,
    /// Directory protocol among the L1 data caches.
    Directory,
}

/// Interconnect topology.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum InterconnectKind {
    /// Full crossbar with per-port occupancy.
    #[default]
    Crossbar,
    /// Multistage butterfly with destination-tag routing.
    Butterfly,
    /// Split-transaction bus with a single token.
    Bus,
}

/// DRAM scheduling policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum SchedulerKind {
    /// First-come first-served, closed page.
    Fcfs,
    /// First-come first-served with read priority and open-page management.
    #[default]
    #[serde(alias = "RdFcfs")]
    ReadFirst,
    /// Network fair queueing over requesters.
    Nfq,
    /// Strictly partitioned per-core queues.
    FixedBandwidth,
}

/// Cache partitioning policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum PartitionPolicyKind {
    /// No partitioning; plain LRU.
    #[default]
    None,
    /// Utility-based, exhaustive search.
    UcpExhaustive,
    /// Utility-based, lookahead greedy search.
    UcpLookahead,
    /// Time-multiplexed partitioning.
    Mtp,
}

/// Root configuration structure.
///
/// # Examples
///
/// ```
/// use memsim_core::config::{Config, SchedulerKind};
///
/// let json = r#"{
///     "system": { "cores": 4 },
///     "l2": { "size_bytes": 262144, "assoc": 8, "banks": 2 },
///     "memory": { "scheduler": "Nfq", "nfq_weights": [1.0, 1.0, 2.0, 2.0] }
/// }"#;
///
/// let config = Config::from_json(json).unwrap();
/// assert_eq!(config.system.cores, 4);
/// assert_eq!(config.memory.scheduler, SchedulerKind::Nfq);
/// assert_eq!(config.l1.assoc, 4);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// System-wide settings.
    #[serde(default)]
    pub system: SystemConfig,
    /// Private per-core L1 caches.
    #[serde(default = "CacheConfig::default_l1")]
    pub l1: CacheConfig,
    /// Shared, banked L2 cache.
    #[serde(default = "CacheConfig::default_l2")]
    pub l2: CacheConfig,
    /// Interconnect between the L1s and the L2 banks.
    #[serde(default)]
    pub interconnect: InterconnectConfig,
    /// Memory controller and DRAM timing.
    #[serde(default)]
    pub memory: MemoryConfig,
    /// Shared-cache partitioning.
    #[serde(default)]
    pub partitioning: PartitionConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            system: SystemConfig::default(),
            l1: CacheConfig::default_l1(),
            l2: CacheConfig::default_l2(),
            interconnect: InterconnectConfig::default(),
            memory: MemoryConfig::default(),
            partitioning: PartitionConfig::default(),
        }
    }
}

/// System-wide settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemConfig {
    /// Number of cores
    #[serde(default = "SystemConfig::default_cores")]
    pub cores: usize,
}

impl SystemConfig {
    /// Returns the default number of cores.
    fn default_cores() -> usize {
        defaults::CORES
    }
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            cores: defaults::CORES,
        }
    }
}

/// One cache level.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Capacity in bytes (across all banks for the L2)
    #[serde(default = "CacheConfig::default_size")]
    pub size_bytes: u64,

    /// Associativity (number of ways)
    #[serde(default = "CacheConfig::default_assoc")]
    pub assoc: usize,

    /// Block size in bytes
    #[serde(default = "CacheConfig::default_block_size")]
    pub block_size: u64,

    /// Hit latency in ticks
    #[serde(default = "CacheConfig::default_hit_latency")]
    pub hit_latency: u64,

    /// Miss MSHRs
    #[serde(default = "CacheConfig::default_mshrs")]
    pub mshrs: usize,

    /// MSHRs held back from normal allocation
    #[serde(default)]
    pub mshr_reserve: usize,

    /// Targets per MSHR
    #[serde(default = "CacheConfig::default_max_targets")]
    pub max_targets: usize,

    /// Write-buffer entries
    #[serde(default = "CacheConfig::default_write_buffers")]
    pub write_buffers: usize,

    /// Allocate a block on a write miss
    #[serde(default = "CacheConfig::default_write_allocate")]
    pub write_allocate: bool,

    /// Miss handling strategy
    #[serde(default)]
    pub miss_handling: MissHandlingKind,

    /// Coherence protocol
    #[serde(default)]
    pub coherence: CoherenceKind,

    /// Number of banks (L2 only; the L1 always has one)
    #[serde(default = "CacheConfig::default_banks")]
    pub banks: usize,

    /// Recency positions visible to lookups; 0 means full associativity
    #[serde(default)]
    pub max_use_ways: usize,

    /// Width in bytes of the fill path (critical-word-first spacing)
    #[serde(default = "CacheConfig::default_fill_bus_width")]
    pub fill_bus_width: u64,
}

impl CacheConfig {
    /// Returns the default L1 configuration.
    pub fn default_l1() -> Self {
        Self::default()
    }

    /// Returns the default L2 configuration.
    pub fn default_l2() -> Self {
        Self {
            size_bytes: defaults::L2_SIZE,
            assoc: defaults::L2_ASSOC,
            hit_latency: defaults::L2_HIT_LATENCY,
            mshrs: defaults::L2_MSHRS,
            banks: defaults::L2_BANKS,
            ..Self::default()
        }
    }

    fn default_size() -> u64 {
        defaults::L1_SIZE
    }

    fn default_assoc() -> usize {
        defaults::L1_ASSOC
    }

    fn default_block_size() -> u64 {
        defaults::BLOCK_SIZE
    }

    fn default_hit_latency() -> u64 {
        defaults::L1_HIT_LATENCY
    }

    fn default_mshrs() -> usize {
        defaults::L1_MSHRS
    }

    fn default_max_targets() -> usize {
        defaults::MAX_TARGETS
    }

    fn default_write_buffers() -> usize {
        defaults::WRITE_BUFFERS
    }

    fn default_write_allocate() -> bool {
        true
    }

    fn default_banks() -> usize {
        1
    }

    fn default_fill_bus_width() -> u64 {
        defaults::FILL_BUS_WIDTH
    }

    /// Capacity of one bank.
    pub const fn bank_size(&self) -> u64 {
        self.size_bytes / self.banks as u64
    }

    fn validate(&self, level: &str) -> SimResult<()> {
        if exact_log2(self.banks as u64).is_none() {
            return Err(SimError::config(
                level,
                format!("bank count {} is not a positive power of two", self.banks),
            ));
        }
        if exact_log2(self.block_size).is_none() {
            return Err(SimError::config(
                level,
                format!("block size {} is not a power of two", self.block_size),
            ));
        }
        if self.assoc == 0 {
            return Err(SimError::config(level, "associativity must be positive"));
        }
        let frame = self.block_size * self.assoc as u64 * self.banks as u64;
        if self.size_bytes == 0 || self.size_bytes % frame != 0 {
            return Err(SimError::config(
                level,
                format!(
                    "size {} is not divisible into {} banks of {} ways of {} bytes",
                    self.size_bytes, self.banks, self.assoc, self.block_size
                ),
            ));
        }
        let sets = self.size_bytes / frame;
        if exact_log2(sets).is_none() {
            return Err(SimError::config(
                level,
                format!("set count {sets} is not a power of two"),
            ));
        }
        if self.mshr_reserve >= self.mshrs {
            return Err(SimError::config(
                level,
                format!(
                    "{} MSHRs with {} reserved leaves none usable",
                    self.mshrs, self.mshr_reserve
                ),
            ));
        }
        if self.miss_handling == MissHandlingKind::Queue && self.max_targets < 2 {
            return Err(SimError::config(
                level,
                "an addressable miss queue needs at least two targets per MSHR",
            ));
        }
        if self.write_buffers == 0 {
            return Err(SimError::config(level, "at least one write buffer is required"));
        }
        if self.fill_bus_width == 0 {
            return Err(SimError::config(level, "fill bus width must be positive"));
        }
        Ok(())
    }
}

impl Default for CacheConfig {
    /// Creates the default L1 configuration.
    fn default() -> Self {
        Self {
            size_bytes: defaults::L1_SIZE,
            assoc: defaults::L1_ASSOC,
            block_size: defaults::BLOCK_SIZE,
            hit_latency: defaults::L1_HIT_LATENCY,
            mshrs: defaults::L1_MSHRS,
            mshr_reserve: 0,
            max_targets: defaults::MAX_TARGETS,
            write_buffers: defaults::WRITE_BUFFERS,
            write_allocate: true,
            miss_handling: MissHandlingKind::Queue,
            coherence: CoherenceKind::Uni,
            banks: 1,
            max_use_ways: 0,
            fill_bus_width: defaults::FILL_BUS_WIDTH,
        }
    }
}

/// Interconnect configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterconnectConfig {
    /// Topology
    #[serde(default)]
    pub kind: InterconnectKind,

    /// Ticks a request waits before it may be arbitrated
    #[serde(default = "InterconnectConfig::default_arbitration_delay")]
    pub arbitration_delay: u64,

    /// Ticks from grant to delivery (crossbar; added to hop time for the butterfly)
    #[serde(default = "InterconnectConfig::default_transfer_delay")]
    pub transfer_delay: u64,

    /// Butterfly per-hop link delay
    #[serde(default = "InterconnectConfig::default_link_delay")]
    pub link_delay: u64,

    /// Bus width in bytes (split-transaction bus)
    #[serde(default = "InterconnectConfig::default_width")]
    pub width_bytes: u64,

    /// Size of an address-only message
    #[serde(default = "InterconnectConfig::default_header_bytes")]
    pub header_bytes: u32,
}

impl InterconnectConfig {
    fn default_arbitration_delay() -> u64 {
        defaults::ARBITRATION_DELAY
    }

    fn default_transfer_delay() -> u64 {
        defaults::TRANSFER_DELAY
    }

    fn default_link_delay() -> u64 {
        defaults::LINK_DELAY
    }

    fn default_width() -> u64 {
        defaults::INTERCONNECT_WIDTH
    }

    fn default_header_bytes() -> u32 {
        defaults::HEADER_BYTES
    }
}

impl Default for InterconnectConfig {
    fn default() -> Self {
        Self {
            kind: InterconnectKind::default(),
            arbitration_delay: defaults::ARBITRATION_DELAY,
            transfer_delay: defaults::TRANSFER_DELAY,
            link_delay: defaults::LINK_DELAY,
            width_bytes: defaults::INTERCONNECT_WIDTH,
            header_bytes: defaults::HEADER_BYTES,
        }
    }
}

/// Memory controller and DRAM configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Scheduling policy
    #[serde(default)]
    pub scheduler: SchedulerKind,

    /// Total queue entries before the controller blocks
    #[serde(default = "MemoryConfig::default_queue_size")]
    pub queue_size: usize,

    /// Per-core queue entries (fixed-bandwidth scheduler)
    #[serde(default = "MemoryConfig::default_per_core_queue")]
    pub per_core_queue: usize,

    /// DRAM page size in bytes
    #[serde(default = "MemoryConfig::default_page_size")]
    pub page_size: u64,

    /// Simultaneously open pages
    #[serde(default = "MemoryConfig::default_open_page_slots")]
    pub open_page_slots: usize,

    /// CAS latency (column access strobe)
    #[serde(default = "MemoryConfig::default_t_cas")]
    pub t_cas: u64,

    /// RAS latency (row access strobe)
    #[serde(default = "MemoryConfig::default_t_ras")]
    pub t_ras: u64,

    /// Precharge latency
    #[serde(default = "MemoryConfig::default_t_pre")]
    pub t_pre: u64,

    /// DRAM data bus width in bytes
    #[serde(default = "MemoryConfig::default_bus_width")]
    pub bus_width: u64,

    /// Latency of the bus between the L2 banks and the controller
    #[serde(default = "MemoryConfig::default_bus_latency")]
    pub bus_latency: u64,

    /// NFQ weight per core; empty means equal weights
    #[serde(default)]
    pub nfq_weights: Vec<f64>,

    /// NFQ weight of writeback traffic
    #[serde(default = "MemoryConfig::default_writeback_weight")]
    pub writeback_weight: f64,
}

impl MemoryConfig {
    fn default_queue_size() -> usize {
        defaults::MEMORY_QUEUE
    }

    fn default_per_core_queue() -> usize {
        defaults::PER_CORE_QUEUE
    }

    fn default_page_size() -> u64 {
        defaults::PAGE_SIZE
    }

    fn default_open_page_slots() -> usize {
        defaults::OPEN_PAGE_SLOTS
    }

    fn default_t_cas() -> u64 {
        defaults::T_CAS
    }

    fn default_t_ras() -> u64 {
        defaults::T_RAS
    }

    fn default_t_pre() -> u64 {
        defaults::T_PRE
    }

    fn default_bus_width() -> u64 {
        defaults::DRAM_BUS_WIDTH
    }

    fn default_bus_latency() -> u64 {
        defaults::MEMORY_BUS_LATENCY
    }

    fn default_writeback_weight() -> f64 {
        defaults::WRITEBACK_WEIGHT
    }

    /// NFQ weights for `cores` cores followed by the writeback pseudo-requester.
    pub fn weights(&self, cores: usize) -> Vec<f64> {
        let mut weights = if self.nfq_weights.is_empty() {
            vec![1.0; cores]
        } else {
            self.nfq_weights.clone()
        };
        weights.push(self.writeback_weight);
        weights
    }
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            scheduler: SchedulerKind::default(),
            queue_size: defaults::MEMORY_QUEUE,
            per_core_queue: defaults::PER_CORE_QUEUE,
            page_size: defaults::PAGE_SIZE,
            open_page_slots: defaults::OPEN_PAGE_SLOTS,
            t_cas: defaults::T_CAS,
            t_ras: defaults::T_RAS,
            t_pre: defaults::T_PRE,
            bus_width: defaults::DRAM_BUS_WIDTH,
            bus_latency: defaults::MEMORY_BUS_LATENCY,
            nfq_weights: Vec::new(),
            writeback_weight: defaults::WRITEBACK_WEIGHT,
        }
    }
}

/// Shared-cache partitioning configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartitionConfig {
    /// Partitioning policy
    #[serde(default)]
    pub policy: PartitionPolicyKind,

    /// Ticks per collection or enforcement phase
    #[serde(default = "PartitionConfig::default_epoch")]
    pub epoch: u64,

    /// Ticks before the first collection phase
    #[serde(default = "PartitionConfig::default_warmup")]
    pub warmup: u64,

    /// Shadow tags sample every n-th set
    #[serde(default = "PartitionConfig::default_sample_interval")]
    pub sample_interval: usize,

    /// Supplier threshold of the time-shared policy
    #[serde(default = "PartitionConfig::default_mtp_threshold")]
    pub mtp_threshold: f64,

    /// CSV file receiving one line per quota change
    #[serde(default)]
    pub allocation_trace: Option<String>,

    /// CSV file receiving the hit curves of every collection phase
    #[serde(default)]
    pub hit_curve_trace: Option<String>,
}

impl PartitionConfig {
    fn default_epoch() -> u64 {
        defaults::EPOCH
    }

    fn default_warmup() -> u64 {
        defaults::WARMUP
    }

    fn default_sample_interval() -> usize {
        defaults::SAMPLE_INTERVAL
    }

    fn default_mtp_threshold() -> f64 {
        defaults::MTP_THRESHOLD
    }

    /// Returns `true` when a partitioning policy is selected.
    pub fn enabled(&self) -> bool {
        self.policy != PartitionPolicyKind::None
    }
}

impl Default for PartitionConfig {
    fn default() -> Self {
        Self {
            policy: PartitionPolicyKind::None,
            epoch: defaults::EPOCH,
            warmup: defaults::WARMUP,
            sample_interval: defaults::SAMPLE_INTERVAL,
            mtp_threshold: defaults::MTP_THRESHOLD,
            allocation_trace: None,
            hit_curve_trace: None,
        }
    }
}

impl Config {
    /// Parses and validates a JSON configuration.
    ///
    /// # Errors
    ///
    /// [`SimError::Config`] for malformed JSON or a rejected configuration.
    pub fn from_json(json: &str) -> SimResult<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| SimError::config("config", format!("invalid JSON: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Checks the configuration for values no component can be built from.
    ///
    /// # Errors
    ///
    /// [`SimError::Config`] naming the offending section.
    pub fn validate(&self) -> SimResult<()> {
        let cores = self.system.cores;
        if cores == 0 {
            return Err(SimError::config("system", "at least one core is required"));
        }
        if cores >= MAX_REQUESTERS {
            return Err(SimError::config(
                "system",
                format!("at most {} cores are supported", MAX_REQUESTERS - 1),
            ));
        }
        self.l1.validate("l1")?;
        self.l2.validate("l2")?;
        if self.l1.banks != 1 {
            return Err(SimError::config("l1", "private L1 caches have exactly one bank"));
        }
        if self.l1.block_size != self.l2.block_size {
            return Err(SimError::config(
                "l2",
                "L1 and L2 block sizes must match",
            ));
        }
        if self.l2.coherence == CoherenceKind::Directory {
            return Err(SimError::config(
                "l2",
                "the directory protocol runs among the L1 data caches only",
            ));
        }
        if self.interconnect.width_bytes == 0 {
            return Err(SimError::config("interconnect", "width must be positive"));
        }
        let m = &self.memory;
        if m.queue_size == 0 || m.open_page_slots == 0 {
            return Err(SimError::config(
                "memory",
                "queue size and open page slots must be positive",
            ));
        }
        if exact_log2(m.page_size).is_none() || m.page_size < self.l2.block_size {
            return Err(SimError::config(
                "memory",
                format!("page size {} must be a power of two of at least one block", m.page_size),
            ));
        }
        if m.bus_width == 0 {
            return Err(SimError::config("memory", "bus width must be positive"));
        }
        if m.scheduler == SchedulerKind::FixedBandwidth && m.per_core_queue == 0 {
            return Err(SimError::config("memory", "per-core queue must be positive"));
        }
        if !m.nfq_weights.is_empty() && m.nfq_weights.len() != cores {
            return Err(SimError::config(
                "memory",
                format!("{} NFQ weights for {cores} cores", m.nfq_weights.len()),
            ));
        }
        if m.nfq_weights.iter().chain([&m.writeback_weight]).any(|w| w.is_nan() || *w <= 0.0) {
            return Err(SimError::config("memory", "NFQ weights must be positive"));
        }
        let p = &self.partitioning;
        if p.enabled() {
            if p.epoch == 0 {
                return Err(SimError::config("partitioning", "epoch must be positive"));
            }
            if self.l2.assoc < cores {
                return Err(SimError::config(
                    "partitioning",
                    format!("{} ways cannot give {cores} cores one way each", self.l2.assoc),
                ));
            }
            if !(0.0..=1.0).contains(&p.mtp_threshold) {
                return Err(SimError::config(
                    "partitioning",
                    "MTP threshold must lie in [0, 1]",
                ));
            }
        }
        Ok(())
    }
}
