//! Simulator error definitions.
//!
//! This module defines the fatal conditions of the memory hierarchy. It provides:
//! 1. **Configuration errors:** Rejected at construction time, before any tick is simulated.
//! 2. **Invariant violations:** Inconsistent MSHR, DRAM page or coherence state; the
//!    simulation must halt because further timing results would be meaningless.
//! 3. **Unimplemented paths:** Placeholder scheduling paths reached by an incomplete configuration.
//! 4. **I/O errors:** Checkpoint and trace output.
//!
//! Capacity exhaustion (full MSHR queue, full target list, full write buffer) is not an
//! error; it is reported through [`BlockedSet`](crate::cache::blocked::BlockedSet).

use thiserror::Error;

use super::addr::PhysAddr;

/// Fatal simulator conditions.
///
/// Every variant carries a diagnostic message; the driver turns an `Err` into an
/// immediate halt with that message.
#[derive(Debug, Error)]
pub enum SimError {
    /// Invalid configuration detected while constructing a component.
    #[error("configuration error in `{component}`: {reason}")]
    Config {
        /// Component whose parameters were rejected (e.g. `"l2"`, `"memory"`).
        component: String,
        /// Human readable reason.
        reason: String,
    },

    /// An internal invariant was violated.
    #[error("invariant violated in `{component}`: {reason}")]
    Invariant {
        /// Component that detected the violation.
        component: String,
        /// Human readable reason.
        reason: String,
    },

    /// A coherence rule was broken (e.g. an owned block without an owner).
    #[error("coherence violation at {addr}: {reason}")]
    Coherence {
        /// Block address involved.
        addr: PhysAddr,
        /// Human readable reason.
        reason: String,
    },

    /// A request handle did not refer to a live request.
    #[error("unknown request handle {0}")]
    UnknownRequest(String),

    /// A scheduling path with no implementation was reached.
    #[error("not implemented: {0}")]
    Unimplemented(&'static str),

    /// Checkpoint or trace I/O failure.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl SimError {
    /// Builds a [`SimError::Config`].
    pub fn config(component: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Config {
            component: component.into(),
            reason: reason.into(),
        }
    }

    /// Builds a [`SimError::Invariant`].
    pub fn invariant(component: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Invariant {
            component: component.into(),
            reason: reason.into(),
        }
    }

    /// Builds a [`SimError::Coherence`].
    pub fn coherence(addr: PhysAddr, reason: impl Into<String>) -> Self {
        Self::Coherence {
            addr,
            reason: reason.into(),
        }
    }
}

/// Result alias used throughout the crate.
pub type SimResult<T> = Result<T, SimError>;
