//! Output Module
//!
//! Per-task staging of emitted records.
//!
//! ## Core Concepts
//! - **Collector**: `OutputCollector` is what task code emits into. Addressed emit (to a
//!   named downstream vertex) is part of the interface but optional; callers check
//!   `supports_addressed_emit()` first.
//! - **Drain**: `drain_and_reset` swaps the live buffer for an empty one under the same
//!   lock `emit` takes, so a drained batch never overlaps the next one.

pub mod buffer;

#[cfg(test)]
mod tests;

use crate::error::RuntimeResult;

pub trait OutputCollector<T>: Send + Sync {
    /// Appends to the default output.
    fn emit(&self, record: T);

    /// Appends to the output feeding `destination`.
    fn emit_to(&self, destination: &str, record: T) -> RuntimeResult<()>;

    fn supports_addressed_emit(&self) -> bool;
}
