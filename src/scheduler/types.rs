use crate::cluster::types::ExecutorId;
use crate::error::{ErrorKind, RuntimeError};
use crate::shuffle::partitioner::HashPartitioner;
use crate::shuffle::types::{BlockLocation, SubRangeSpan};

use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::mpsc;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct JobId(pub String);

impl JobId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Position of a stage in the physical plan. Plan order is ascending `StageId`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StageId(pub u32);

impl fmt::Display for StageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "stage-{}", self.0)
    }
}

/// One parallel instance of a stage. Also identifies the producer of a block set.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskGroupId {
    pub stage: StageId,
    pub index: u32,
}

impl TaskGroupId {
    pub fn new(stage: u32, index: u32) -> Self {
        Self {
            stage: StageId(stage),
            index,
        }
    }
}

impl fmt::Display for TaskGroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/tg-{}", self.stage, self.index)
    }
}

/// Scheduling state of a task group.
///
/// `Pending -> Scheduled -> Running -> Completed | Failed`; a failed attempt goes back to
/// `Pending` while attempts remain, otherwise to `Aborted`. `Cancelled` is where
/// non-terminal task groups end up when their job stops early.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum TaskGroupState {
    Pending,
    Scheduled,
    Running,
    Completed,
    Failed,
    Aborted,
    Cancelled,
}

impl TaskGroupState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskGroupState::Aborted | TaskGroupState::Cancelled
        )
    }

    /// Holds a slot on some executor.
    pub fn is_active(&self) -> bool {
        matches!(self, TaskGroupState::Scheduled | TaskGroupState::Running)
    }
}

/// Why one attempt of a task group did not complete.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AttemptRecord {
    pub attempt: u32,
    pub executor: Option<ExecutorId>,
    pub error: ErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskGroupStatus {
    pub id: TaskGroupId,
    pub state: TaskGroupState,
    pub attempt: u32,
    pub executor: Option<ExecutorId>,
}

/// Snapshot published by the scheduler after every state change.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobStatus {
    pub job_id: JobId,
    pub task_groups: Vec<TaskGroupStatus>,
    pub finished: bool,
}

impl JobStatus {
    pub fn count_in(&self, state: TaskGroupState) -> usize {
        self.task_groups
            .iter()
            .filter(|status| status.state == state)
            .count()
    }

    pub fn get(&self, id: &TaskGroupId) -> Option<&TaskGroupStatus> {
        self.task_groups.iter().find(|status| &status.id == id)
    }
}

/// Report of a failed job: the task group that exhausted its attempts and why each one failed.
#[derive(Debug, Clone)]
pub struct JobFailure {
    pub task_group: TaskGroupId,
    pub attempts: Vec<AttemptRecord>,
    pub error: RuntimeError,
}

impl JobFailure {
    pub fn last_error_kind(&self) -> Option<ErrorKind> {
        self.attempts.last().map(|record| record.error)
    }
}

impl fmt::Display for JobFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.error)?;
        for record in &self.attempts {
            writeln!(
                f,
                "  attempt {} on {}: {:?} ({})",
                record.attempt,
                record
                    .executor
                    .as_ref()
                    .map(|id| id.0.as_str())
                    .unwrap_or("<unassigned>"),
                record.error,
                record.message
            )?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub enum JobOutcome {
    Completed,
    Failed(JobFailure),
    Cancelled,
}

impl JobOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, JobOutcome::Completed)
    }
}

/// Lifecycle reports from executors to the scheduler. Each names the attempt it is about.
#[derive(Debug, Clone)]
pub enum SchedulerEvent {
    Running {
        task_group: TaskGroupId,
        attempt: u32,
    },
    Completed {
        task_group: TaskGroupId,
        attempt: u32,
        output: BlockLocation,
    },
    Failed {
        task_group: TaskGroupId,
        attempt: u32,
        error: RuntimeError,
    },
}

/// Blocks a task group reads from one parent stage.
#[derive(Debug, Clone)]
pub struct InputSpec {
    pub stage: StageId,
    /// Where each producer of the parent stage committed its output, in task index order.
    pub producers: Vec<BlockLocation>,
    /// Sub-ranges of every producer's output that belong to this consumer.
    pub span: SubRangeSpan,
}

/// Everything an executor needs to run one attempt of a task group.
#[derive(Debug, Clone)]
pub struct TaskGroupLaunch {
    pub job_id: JobId,
    pub task_group: TaskGroupId,
    pub attempt: u32,
    pub executor: ExecutorId,
    /// Name of the registered handler implementing the stage.
    pub handler: String,
    pub inputs: Vec<InputSpec>,
    /// How the output is cut into sub-ranges. Sink stages get a single sub-range.
    pub output: HashPartitioner,
    /// Where lifecycle events for this attempt are sent.
    pub reports: mpsc::UnboundedSender<SchedulerEvent>,
}
