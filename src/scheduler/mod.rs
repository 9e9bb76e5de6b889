//! Scheduler Module
//!
//! Runs the task groups of one job on the cluster's slots.
//!
//! ## Core Concepts
//! - **Plan**: `PhysicalPlan` is an ordered list of stages; each stage has `parallelism`
//!   task groups and a fixed output partitioner.
//! - **Attempts**: a task group moves `Pending -> Scheduled -> Running -> Completed`. A
//!   failed attempt (handler error, scheduling timeout, lost executor, failed dispatch)
//!   goes back to `Pending` with the next attempt number until `max_schedule_attempt`
//!   is exhausted, which aborts the job.
//! - **Placement**: a `SchedulingPolicy` orders candidate executors; the first one whose
//!   slot can be reserved wins. Default is first-fit by ascending executor id.
//! - **Gating**: a stage is eligible once all of its parent stages have completed.
//!   Completed outputs lost with their executor are recomputed while still needed.

pub mod dispatch;
pub mod plan;
pub mod policy;
pub mod scheduler;
pub mod types;

#[cfg(test)]
mod tests;
