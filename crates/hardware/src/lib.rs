//! Cycle-level memory hierarchy simulator library.
//!
//! This crate models the memory side of a multi-core system at tick granularity:
//! 1. **Caches:** Private L1s and a banked, shared L2 with MSHRs, write buffers, LRU tags,
//!    way partitioning, shadow tags, and uniprocessor or directory coherence.
//! 2. **Interconnect:** Crossbar, butterfly and split-bus topologies with FCFS arbitration.
//! 3. **Memory:** DRAM controllers (FCFS, read-first, network fair queuing, fixed bandwidth)
//!    in front of a page-aware DRAM timing model.
//! 4. **Partitioning:** Utility-based and time-multiplexed way allocation of the L2.
//! 5. **Simulation:** The event queue, the request arena, configuration, checkpoints and
//!    statistics.
//!
//! ```
//! use memsim_core::{Config, MemCmd, MemorySystem, PhysAddr};
//!
//! let mut system = MemorySystem::new(&Config::default()).unwrap();
//! let _ = system.issue(0, MemCmd::Read, PhysAddr::new(0x1000), 8).unwrap();
//! let mut done = Vec::new();
//! system.drain(&mut done).unwrap();
//! assert_eq!(done.len(), 1);
//! ```

/// Cache controllers, tag stores, miss handling and coherence.
pub mod cache;
/// Common types and constants (addresses, ticks, errors).
pub mod common;
/// Simulator configuration (defaults, enums, hierarchical config structures).
pub mod config;
/// Interconnect between the L1 caches and the L2 banks.
pub mod interconnect;
/// DRAM memory controllers and device timing.
pub mod memory;
/// Shared-cache partitioning policies and their epoch controller.
pub mod partition;
/// Memory requests and the request arena.
pub mod request;
/// Event scheduler and the top-level memory system.
pub mod sim;
/// Simulation statistics collection and reporting.
pub mod stats;

/// Address and tick types, fatal errors and the crate result alias.
pub use crate::common::{PhysAddr, SimError, SimResult, Tick};
/// Root configuration type; use `Config::default()` or deserialize from JSON.
pub use crate::config::Config;
/// Request commands, handles and the arena they live in.
pub use crate::request::{MemCmd, MemRequest, ReqId, RequestArena};
/// Top-level system; construct with `MemorySystem::new`.
pub use crate::sim::{Completion, CompletionSink, MemorySystem};
/// Statistics snapshot returned by `MemorySystem::stats`.
pub use crate::stats::SimStats;
