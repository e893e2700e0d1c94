//! Shared test infrastructure.

/// Configuration and request builders.
pub mod builder;

/// Memory system harness.
pub mod harness;
