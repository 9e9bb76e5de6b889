use super::runtime::ExecutorRuntime;
use crate::cluster::types::ExecutorId;
use crate::error::{RuntimeError, RuntimeResult};
use crate::scheduler::dispatch::TaskGroupDispatcher;
use crate::scheduler::types::{JobId, TaskGroupId, TaskGroupLaunch};

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;

/// Dispatcher for executors living in the same process as the master.
///
/// Launching on an executor that is not attached fails with `ExecutorLost`; the scheduler
/// then deregisters that executor so later attempts land elsewhere.
#[derive(Default)]
pub struct LocalDispatcher {
    executors: DashMap<ExecutorId, Arc<ExecutorRuntime>>,
}

impl LocalDispatcher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add(&self, runtime: Arc<ExecutorRuntime>) {
        self.executors.insert(runtime.id().clone(), runtime);
    }

    pub fn remove(&self, id: &ExecutorId) -> Option<Arc<ExecutorRuntime>> {
        self.executors.remove(id).map(|(_, runtime)| runtime)
    }

    pub fn get(&self, id: &ExecutorId) -> Option<Arc<ExecutorRuntime>> {
        self.executors.get(id).map(|entry| entry.value().clone())
    }

    pub fn executor_ids(&self) -> Vec<ExecutorId> {
        let mut ids: Vec<ExecutorId> = self.executors.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }
}

#[async_trait]
impl TaskGroupDispatcher for LocalDispatcher {
    async fn dispatch(&self, launch: TaskGroupLaunch) -> RuntimeResult<()> {
        let runtime = self
            .get(&launch.executor)
            .ok_or_else(|| RuntimeError::ExecutorLost(launch.executor.clone()))?;
        runtime.launch(launch)
    }

    async fn cancel(
        &self,
        job_id: &JobId,
        executor: &ExecutorId,
        task_group: TaskGroupId,
        attempt: u32,
    ) {
        if let Some(runtime) = self.get(executor) {
            runtime.cancel(job_id, task_group, attempt);
        }
    }
}
