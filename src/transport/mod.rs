//! Partition Transport Module
//!
//! Moves committed blocks between executors over plain TCP.
//!
//! ## Core Concepts
//! - **Server**: `PartitionTransportServer` binds with a configurable backlog, runs a fixed
//!   number of accept loops and a fixed worker pool, and answers requests from the local
//!   `BlockStore`.
//! - **Client**: `PartitionTransportClient` bounds in-flight requests, pools idle
//!   connections per endpoint and retries connection failures with exponential backoff.
//! - **Protocol**: length-framed request and response messages (see `protocol`). A missing
//!   block is answered with an explicit `NotFound` status, so a fetch never hangs on it.

pub mod client;
pub mod protocol;
pub mod server;
