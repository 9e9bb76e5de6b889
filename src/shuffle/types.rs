use crate::cluster::types::ExecutorId;
use crate::scheduler::types::TaskGroupId;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;
use std::ops::Range;

/// Identity of a committed block: the task group that produced it and its sub-range.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId {
    pub producer: TaskGroupId,
    pub sub_range: u32,
}

impl BlockId {
    pub fn new(producer: TaskGroupId, sub_range: u32) -> Self {
        Self {
            producer,
            sub_range,
        }
    }

    /// File-system friendly name, used by the file block store.
    pub fn file_name(&self) -> String {
        format!(
            "{}-{}-{}.block",
            self.producer.stage.0, self.producer.index, self.sub_range
        )
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.producer, self.sub_range)
    }
}

/// Half-open range `[start, end)` of sub-range ids read by one consumer.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct SubRangeSpan {
    pub start: u32,
    pub end: u32,
}

impl SubRangeSpan {
    pub fn new(start: u32, end: u32) -> Self {
        Self { start, end }
    }

    /// Span covering exactly one sub-range.
    pub fn single(sub_range: u32) -> Self {
        Self {
            start: sub_range,
            end: sub_range + 1,
        }
    }

    pub fn len(&self) -> u32 {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, sub_range: u32) -> bool {
        self.start <= sub_range && sub_range < self.end
    }

    pub fn range(&self) -> Range<u32> {
        self.start..self.end
    }
}

impl fmt::Display for SubRangeSpan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

/// The unit a task emits. The key drives hash partitioning; the value is opaque.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Record {
    pub key: String,
    pub value: Vec<u8>,
}

impl Record {
    pub fn new(key: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Where a producer's committed blocks can be fetched from.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BlockLocation {
    pub producer: TaskGroupId,
    pub executor: ExecutorId,
    pub endpoint: SocketAddr,
    pub sub_range_count: u32,
}
