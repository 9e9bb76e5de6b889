//! Master Module
//!
//! The entry points of the runtime: executor registration, job submission and the
//! HTTP surface over both.
//!
//! ## Submodules
//! - **`job`**: `JobMaster`, which wires membership, the block directory and a dispatcher
//!   together and runs one scheduler per submitted job.
//! - **`local`**: `LocalCluster`, a master plus N in-process executors.
//! - **`handlers`** / **`protocol`**: the axum routes and their JSON bodies.

pub mod handlers;
pub mod job;
pub mod local;
pub mod protocol;
