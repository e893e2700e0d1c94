//! Simulation driver.
//!
//! Provides the discrete-event scheduler and the [`MemorySystem`] that wires the
//! caches, the interconnect and the memory controller onto it.

/// Event queue and logical clock.
pub mod event;

/// Top-level memory system.
pub mod system;

pub use event::{Event, EventQueue, SimulationClock};
pub use system::{Completion, CompletionSink, IgnoreCompletions, Invalidation, MemorySystem};
