use super::types::SubRangeSpan;
use crate::error::{RuntimeError, RuntimeResult};

use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

/// Assigns records to the sub-ranges of one stage's output.
///
/// The output is cut into `multiplier × downstream_parallelism` sub-ranges when the plan
/// is built. Consumers read contiguous spans of sub-ranges, so changing how many consumers
/// there are only changes the spans; committed blocks are never re-hashed.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct HashPartitioner {
    multiplier: u32,
    downstream_parallelism: u32,
    sub_range_count: u32,
}

impl HashPartitioner {
    pub fn new(multiplier: u32, downstream_parallelism: u32) -> RuntimeResult<Self> {
        if multiplier == 0 {
            return Err(RuntimeError::InvalidPlan(
                "hash range multiplier must be >= 1".to_string(),
            ));
        }
        if downstream_parallelism == 0 {
            return Err(RuntimeError::InvalidPlan(
                "downstream parallelism must be >= 1".to_string(),
            ));
        }
        let sub_range_count = multiplier.checked_mul(downstream_parallelism).ok_or_else(|| {
            RuntimeError::InvalidPlan(format!(
                "{} x {} sub-ranges overflows",
                multiplier, downstream_parallelism
            ))
        })?;

        Ok(Self {
            multiplier,
            downstream_parallelism,
            sub_range_count,
        })
    }

    pub fn multiplier(&self) -> u32 {
        self.multiplier
    }

    pub fn downstream_parallelism(&self) -> u32 {
        self.downstream_parallelism
    }

    pub fn sub_range_count(&self) -> u32 {
        self.sub_range_count
    }

    pub fn sub_range_of<K: Hash + ?Sized>(&self, key: &K) -> u32 {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() % self.sub_range_count as u64) as u32
    }

    /// Span read by consumer `task_index` at the planned parallelism:
    /// `[i × multiplier, (i + 1) × multiplier)`.
    pub fn span_for(&self, task_index: u32) -> RuntimeResult<SubRangeSpan> {
        if task_index >= self.downstream_parallelism {
            return Err(RuntimeError::InvalidPlan(format!(
                "consumer index {} out of parallelism {}",
                task_index, self.downstream_parallelism
            )));
        }
        let start = task_index * self.multiplier;
        Ok(SubRangeSpan::new(start, start + self.multiplier))
    }

    /// Span read by consumer `task_index` when the consumer count became `parallelism`.
    ///
    /// Sub-ranges are split into `parallelism` contiguous spans; the first
    /// `count % parallelism` spans take one extra sub-range. At the planned parallelism this
    /// gives the same spans as [`span_for`](Self::span_for).
    pub fn span_for_parallelism(
        &self,
        task_index: u32,
        parallelism: u32,
    ) -> RuntimeResult<SubRangeSpan> {
        if parallelism == 0 || parallelism > self.sub_range_count {
            return Err(RuntimeError::InvalidPlan(format!(
                "cannot split {} sub-ranges across {} consumers",
                self.sub_range_count, parallelism
            )));
        }
        if task_index >= parallelism {
            return Err(RuntimeError::InvalidPlan(format!(
                "consumer index {} out of parallelism {}",
                task_index, parallelism
            )));
        }

        let base = self.sub_range_count / parallelism;
        let extra = self.sub_range_count % parallelism;
        let start = task_index * base + task_index.min(extra);
        let len = base + u32::from(task_index < extra);
        Ok(SubRangeSpan::new(start, start + len))
    }

    /// Buckets records by sub-range. Always returns `sub_range_count` buckets (empty ones
    /// included) and keeps the emission order inside each bucket.
    pub fn partition<R, K, F>(&self, records: Vec<R>, key_of: F) -> Vec<Vec<R>>
    where
        K: Hash + ?Sized,
        F: Fn(&R) -> &K,
    {
        let mut buckets: Vec<Vec<R>> = (0..self.sub_range_count).map(|_| Vec::new()).collect();
        for record in records {
            let sub_range = self.sub_range_of(key_of(&record));
            buckets[sub_range as usize].push(record);
        }
        buckets
    }
}
