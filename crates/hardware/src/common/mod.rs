//! Common utilities and types used throughout the memory hierarchy simulator.
//!
//! This module provides fundamental building blocks that are shared across all components
//! of the simulator. It includes:
//! 1. **Address Types:** Physical addresses, ticks and requester identifiers.
//! 2. **Constants:** Checkpoint layout and presence-bitmap limits.
//! 3. **Error Handling:** The fatal error taxonomy and the crate result alias.

/// Address, tick and requester type definitions.
pub mod addr;

/// Common constants used throughout the simulator.
pub mod constants;

/// Error types.
pub mod error;

pub use addr::{Asid, PhysAddr, RequesterId, Tick};
pub use error::{SimError, SimResult};
