//! Distributed Dataflow Runtime Library
//!
//! The control plane and data-shuffle layer of a dataflow engine: runs a physical plan
//! of parallel task groups across a fleet of executors and moves their partitioned
//! intermediate results between them. It is the foundation for the `dataflow-node`
//! binary (`main.rs`).
//!
//! ## Architecture Modules
//! - **`cluster`**: executor membership, failure detection and per-executor slot capacity.
//! - **`scheduler`**: the per-job control loop. Places pending task groups on free slots,
//!   retries failed attempts up to a bound and enforces scheduling timeouts.
//! - **`shuffle`**: hash partitioning with a range multiplier, block storage, the master's
//!   block directory, and the writer/reader pair moving records through blocks.
//! - **`transport`**: the length-framed TCP protocol executors fetch blocks with, its
//!   multi-threaded server and the pooled, retrying client.
//! - **`output`**: per-task staging buffers for emitted records.
//! - **`executor`**: runs launched attempts against registered stage handlers.
//! - **`master`**: job submission, executor registration, the HTTP surface and an
//!   in-process cluster harness.
//! - **`config`** / **`error`**: the runtime configuration and the error taxonomy.

pub mod cluster;
pub mod config;
pub mod error;
pub mod executor;
pub mod master;
pub mod output;
pub mod scheduler;
pub mod shuffle;
pub mod transport;
