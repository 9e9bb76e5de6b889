use super::types::{JobId, TaskGroupId, TaskGroupLaunch};
use crate::cluster::types::ExecutorId;
use crate::error::RuntimeResult;

use async_trait::async_trait;

/// Delivers launches to executors.
///
/// `dispatch` returning `Ok` only means the executor accepted the launch; progress is
/// reported through the launch's `reports` channel. On `Err` the scheduler releases the
/// slot it reserved and counts a failed attempt.
#[async_trait]
pub trait TaskGroupDispatcher: Send + Sync {
    async fn dispatch(&self, launch: TaskGroupLaunch) -> RuntimeResult<()>;

    /// Best-effort stop of a running attempt. Its results are discarded either way.
    async fn cancel(
        &self,
        job_id: &JobId,
        executor: &ExecutorId,
        task_group: TaskGroupId,
        attempt: u32,
    );
}
