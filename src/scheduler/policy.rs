use super::types::TaskGroupId;
use crate::cluster::capacity::SlotUsage;
use crate::cluster::types::ExecutorId;

use std::collections::BTreeMap;

/// Decides where a pending task group may go.
///
/// The scheduler tries the returned executors in order and takes the first slot it can
/// reserve, so an empty list leaves the task group pending until the next pass.
pub trait SchedulingPolicy: Send + Sync {
    fn candidates(
        &self,
        task_group: &TaskGroupId,
        snapshot: &BTreeMap<ExecutorId, SlotUsage>,
    ) -> Vec<ExecutorId>;
}

/// Executors with a free slot, ascending executor id.
#[derive(Debug, Default, Clone, Copy)]
pub struct FirstFitPolicy;

impl SchedulingPolicy for FirstFitPolicy {
    fn candidates(
        &self,
        _task_group: &TaskGroupId,
        snapshot: &BTreeMap<ExecutorId, SlotUsage>,
    ) -> Vec<ExecutorId> {
        snapshot
            .iter()
            .filter(|(_, usage)| usage.free() > 0)
            .map(|(id, _)| id.clone())
            .collect()
    }
}

/// Executors with a free slot, most free slots first; ties by ascending executor id.
#[derive(Debug, Default, Clone, Copy)]
pub struct LeastLoadedPolicy;

impl SchedulingPolicy for LeastLoadedPolicy {
    fn candidates(
        &self,
        _task_group: &TaskGroupId,
        snapshot: &BTreeMap<ExecutorId, SlotUsage>,
    ) -> Vec<ExecutorId> {
        let mut free: Vec<(&ExecutorId, usize)> = snapshot
            .iter()
            .map(|(id, usage)| (id, usage.free()))
            .filter(|(_, free)| *free > 0)
            .collect();
        // Stable sort keeps id order among equals.
        free.sort_by(|a, b| b.1.cmp(&a.1));
        free.into_iter().map(|(id, _)| id.clone()).collect()
    }
}
