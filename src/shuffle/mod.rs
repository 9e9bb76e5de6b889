//! Shuffle Module
//!
//! Intermediate results between stages.
//!
//! ## Core Concepts
//! - **Sub-ranges**: a stage's output is hashed into `multiplier × downstream parallelism`
//!   sub-ranges, fixed when the plan is built (`HashPartitioner`).
//! - **Blocks**: one immutable block per (producer task group, sub-range), committed to the
//!   executor-local `BlockStore` by the `ShuffleWriter`.
//! - **Spans**: a consumer reads a contiguous span of sub-ranges from every producer and
//!   concatenates the blocks (`ShuffleReader`); nothing is re-hashed on the read side.
//! - **Locations**: the master's `BlockDirectory` records which executor holds whose blocks
//!   and forgets them when that executor is lost.

pub mod directory;
pub mod partitioner;
pub mod reader;
pub mod store;
pub mod types;
pub mod writer;


use crate::error::RuntimeResult;
use types::Record;

/// Encodes one block payload.
pub fn encode_records(records: &[Record]) -> RuntimeResult<Vec<u8>> {
    Ok(bincode::serialize(records)?)
}

/// Decodes one block payload.
pub fn decode_records(payload: &[u8]) -> RuntimeResult<Vec<Record>> {
    Ok(bincode::deserialize(payload)?)
}
