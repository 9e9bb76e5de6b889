//! Cluster Module
//!
//! The master's view of the executor fleet.
//!
//! ## Core Concepts
//! - **Capacity**: `CapacityRegistry` holds per-executor slot counters. Slots are taken with
//!   a non-blocking compare-and-swap and handed out as RAII `SlotReservation` guards.
//! - **Membership**: `ClusterMembership` registers and deregisters executors and runs an
//!   Alive -> Suspect -> Dead failure detector fed by heartbeats.
//! - **Fan-out**: executor loss is published once as `ClusterEvent::ExecutorLost` on a
//!   broadcast channel; every component that owns state tied to an executor subscribes.

pub mod capacity;
pub mod service;
pub mod types;

#[cfg(test)]
mod tests;
