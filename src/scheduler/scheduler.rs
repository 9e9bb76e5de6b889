//! TaskGroup Scheduler
//!
//! The control loop of one job. It owns every task group's state and is the only place
//! that changes it; executors and the cluster talk to it through channels.
//!
//! ## Loop
//! Each iteration runs a scheduling pass, then waits for one of:
//! - a lifecycle event from an executor (`SchedulerEvent`),
//! - a cluster event (`ExecutorLost`),
//! - the periodic tick, which also sweeps scheduling timeouts,
//! - cancellation.

use super::dispatch::TaskGroupDispatcher;
use super::plan::PhysicalPlan;
use super::policy::{FirstFitPolicy, SchedulingPolicy};
use super::types::*;
use crate::cluster::capacity::SlotReservation;
use crate::cluster::service::ClusterMembership;
use crate::cluster::types::{ClusterEvent, ExecutorId};
use crate::config::SchedulerConfig;
use crate::error::{RuntimeError, RuntimeResult};
use crate::shuffle::directory::BlockDirectory;
use crate::shuffle::types::{BlockId, SubRangeSpan};

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{Notify, broadcast, mpsc, watch};
use tokio::time::MissedTickBehavior;

struct TaskGroupEntry {
    state: TaskGroupState,
    attempt: u32,
    executor: Option<ExecutorId>,
    /// Held while the task group occupies a slot; dropping it releases the slot.
    slot: Option<SlotReservation>,
    dispatched_at: Option<Instant>,
    history: Vec<AttemptRecord>,
}

impl TaskGroupEntry {
    fn new() -> Self {
        Self {
            state: TaskGroupState::Pending,
            attempt: 1,
            executor: None,
            slot: None,
            dispatched_at: None,
            history: Vec::new(),
        }
    }
}

enum Wake {
    Event(SchedulerEvent),
    Cluster(Result<ClusterEvent, RecvError>),
    Tick,
    Cancel,
}

pub struct TaskGroupScheduler {
    job_id: JobId,
    plan: Arc<PhysicalPlan>,
    config: SchedulerConfig,
    membership: Arc<ClusterMembership>,
    directory: Arc<BlockDirectory>,
    dispatcher: Arc<dyn TaskGroupDispatcher>,
    policy: Box<dyn SchedulingPolicy>,
    entries: BTreeMap<TaskGroupId, TaskGroupEntry>,
    spans: BTreeMap<(TaskGroupId, StageId), SubRangeSpan>,
    events_tx: mpsc::UnboundedSender<SchedulerEvent>,
    events_rx: mpsc::UnboundedReceiver<SchedulerEvent>,
    cluster_events: broadcast::Receiver<ClusterEvent>,
    status_tx: watch::Sender<JobStatus>,
    cancel: Arc<Notify>,
    failure: Option<JobFailure>,
}

impl TaskGroupScheduler {
    pub fn new(
        job_id: JobId,
        plan: Arc<PhysicalPlan>,
        config: SchedulerConfig,
        membership: Arc<ClusterMembership>,
        directory: Arc<BlockDirectory>,
        dispatcher: Arc<dyn TaskGroupDispatcher>,
    ) -> RuntimeResult<Self> {
        if config.max_schedule_attempt == 0 {
            return Err(RuntimeError::InvalidConfig(
                "max_schedule_attempt must be >= 1".to_string(),
            ));
        }

        let mut entries = BTreeMap::new();
        let mut spans = BTreeMap::new();
        for stage in plan.stages() {
            for task_group in stage.task_groups() {
                entries.insert(task_group, TaskGroupEntry::new());
                for parent in &stage.parents {
                    spans.insert((task_group, *parent), plan.input_span(task_group, *parent)?);
                }
            }
        }

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (status_tx, _) = watch::channel(JobStatus {
            job_id: job_id.clone(),
            task_groups: Vec::new(),
            finished: false,
        });
        // Subscribe now so a loss between construction and `run` is not missed.
        let cluster_events = membership.subscribe();

        let scheduler = Self {
            job_id,
            plan,
            config,
            membership,
            directory,
            dispatcher,
            policy: Box::new(FirstFitPolicy),
            entries,
            spans,
            events_tx,
            events_rx,
            cluster_events,
            status_tx,
            cancel: Arc::new(Notify::new()),
            failure: None,
        };
        scheduler.publish_status(false);
        Ok(scheduler)
    }

    pub fn with_policy(mut self, policy: Box<dyn SchedulingPolicy>) -> Self {
        self.policy = policy;
        self
    }

    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }

    pub fn status(&self) -> watch::Receiver<JobStatus> {
        self.status_tx.subscribe()
    }

    /// Sender executors report lifecycle events on. Every launch carries a clone.
    pub fn event_sender(&self) -> mpsc::UnboundedSender<SchedulerEvent> {
        self.events_tx.clone()
    }

    /// Notifying this stops the job with `JobOutcome::Cancelled`.
    pub fn canceller(&self) -> Arc<Notify> {
        self.cancel.clone()
    }

    /// Drives the job to completion, failure or cancellation.
    pub async fn run(mut self) -> JobOutcome {
        tracing::info!(
            "Job {} started: {} task groups in {} stages",
            self.job_id,
            self.entries.len(),
            self.plan.stages().len()
        );

        let mut ticker = tokio::time::interval(self.config.tick_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let cancel = self.cancel.clone();
        let mut cluster_open = true;

        loop {
            self.schedule().await;
            if let Some(outcome) = self.outcome() {
                return self.finish(outcome).await;
            }
            self.publish_status(false);

            let wake = tokio::select! {
                Some(event) = self.events_rx.recv() => Wake::Event(event),
                event = self.cluster_events.recv(), if cluster_open => Wake::Cluster(event),
                _ = ticker.tick() => Wake::Tick,
                _ = cancel.notified() => Wake::Cancel,
            };

            match wake {
                Wake::Event(event) => self.handle_event(event),
                Wake::Cluster(Ok(ClusterEvent::ExecutorLost(executor))) => {
                    self.handle_executor_lost(&executor);
                }
                Wake::Cluster(Ok(ClusterEvent::ExecutorRegistered(executor))) => {
                    tracing::debug!("Executor {} joined; capacity available next pass", executor);
                }
                Wake::Cluster(Err(RecvError::Lagged(skipped))) => {
                    tracing::warn!(
                        "Job {} missed {} cluster events, reconciling with membership",
                        self.job_id,
                        skipped
                    );
                    self.reconcile_membership();
                }
                Wake::Cluster(Err(RecvError::Closed)) => cluster_open = false,
                Wake::Tick => self.check_timeouts(Instant::now()).await,
                Wake::Cancel => {
                    tracing::warn!("Job {} cancelled", self.job_id);
                    return self.finish(JobOutcome::Cancelled).await;
                }
            }
        }
    }

    // --- Scheduling pass ---

    /// Visits pending task groups in plan order and dispatches those that are eligible
    /// and can get a slot.
    async fn schedule(&mut self) {
        let pending: Vec<TaskGroupId> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.state == TaskGroupState::Pending)
            .map(|(id, _)| *id)
            .collect();

        for task_group in pending {
            if self.failure.is_some() {
                return;
            }
            // Earlier iterations may have sent a parent back to pending.
            if !self.stage_ready(task_group.stage) {
                continue;
            }

            let inputs = match self.build_inputs(task_group) {
                Ok(inputs) => inputs,
                Err(missing) => {
                    for producer in missing {
                        self.recompute_lost_output(producer);
                    }
                    continue;
                }
            };

            let Some(slot) = self.reserve_slot(&task_group) else {
                tracing::trace!("No free slot for {}, leaving it pending", task_group);
                continue;
            };
            self.launch(task_group, slot, inputs).await;
        }
    }

    /// A stage may run once every task group of every parent stage has completed.
    fn stage_ready(&self, stage: StageId) -> bool {
        let Some(planned) = self.plan.stage(stage) else {
            return false;
        };
        planned.parents.iter().all(|parent| {
            self.entries
                .range(TaskGroupId::new(parent.0, 0)..=TaskGroupId::new(parent.0, u32::MAX))
                .all(|(_, entry)| entry.state == TaskGroupState::Completed)
        })
    }

    /// Input locations for `task_group`, or the producers whose output is gone.
    fn build_inputs(&self, task_group: TaskGroupId) -> Result<Vec<InputSpec>, Vec<TaskGroupId>> {
        let Some(stage) = self.plan.stage(task_group.stage) else {
            return Ok(Vec::new());
        };

        let mut inputs = Vec::with_capacity(stage.parents.len());
        let mut missing = Vec::new();
        for parent in &stage.parents {
            let Some(span) = self.spans.get(&(task_group, *parent)).copied() else {
                continue;
            };
            let Some(parent_stage) = self.plan.stage(*parent) else {
                continue;
            };

            let mut producers = Vec::with_capacity(parent_stage.parallelism as usize);
            for producer in parent_stage.task_groups() {
                match self.directory.location(&producer) {
                    Some(location) if self.membership.is_alive(&location.executor) => {
                        producers.push(location);
                    }
                    _ => missing.push(producer),
                }
            }
            inputs.push(InputSpec {
                stage: *parent,
                producers,
                span,
            });
        }

        if missing.is_empty() {
            Ok(inputs)
        } else {
            Err(missing)
        }
    }

    fn reserve_slot(&self, task_group: &TaskGroupId) -> Option<SlotReservation> {
        let capacity = self.membership.capacity();
        let snapshot = capacity.snapshot();

        self.policy
            .candidates(task_group, &snapshot)
            .into_iter()
            .filter(|executor| self.membership.is_schedulable(executor))
            .find_map(|executor| capacity.try_reserve(&executor))
    }

    async fn launch(&mut self, task_group: TaskGroupId, slot: SlotReservation, inputs: Vec<InputSpec>) {
        let Some(stage) = self.plan.stage(task_group.stage) else {
            return;
        };
        let (handler, output) = (stage.handler.clone(), stage.output);
        let Some(entry) = self.entries.get_mut(&task_group) else {
            return;
        };

        let executor = slot.executor().clone();
        entry.state = TaskGroupState::Scheduled;
        entry.executor = Some(executor.clone());
        entry.slot = Some(slot);
        entry.dispatched_at = Some(Instant::now());
        let attempt = entry.attempt;

        tracing::info!(
            "Dispatching {} attempt {} to executor {}",
            task_group,
            attempt,
            executor
        );

        let launch = TaskGroupLaunch {
            job_id: self.job_id.clone(),
            task_group,
            attempt,
            executor: executor.clone(),
            handler,
            inputs,
            output,
            reports: self.events_tx.clone(),
        };
        if let Err(e) = self.dispatcher.dispatch(launch).await {
            tracing::warn!(
                "Dispatch of {} attempt {} to {} failed: {}",
                task_group,
                attempt,
                executor,
                e
            );
            match &e {
                RuntimeError::ExecutorLost(lost) => {
                    // The loss event that follows fails anything else placed there.
                    if let Err(err) = self.membership.deregister_executor(lost) {
                        tracing::debug!("Could not deregister {}: {}", lost, err);
                    }
                }
                RuntimeError::TransportConnectFailure { .. } => {
                    self.membership.report_unreachable(&executor);
                }
                _ => {}
            }
            self.fail_attempt(task_group, attempt, e);
        }
    }

    // --- Events ---

    fn current_attempt(&mut self, task_group: TaskGroupId, attempt: u32) -> Option<&mut TaskGroupEntry> {
        let entry = self
            .entries
            .get_mut(&task_group)
            .filter(|entry| entry.attempt == attempt && entry.state.is_active());
        if entry.is_none() {
            tracing::debug!(
                "Ignoring stale event for {} attempt {}",
                task_group,
                attempt
            );
        }
        entry
    }

    fn handle_event(&mut self, event: SchedulerEvent) {
        match event {
            SchedulerEvent::Running {
                task_group,
                attempt,
            } => {
                if let Some(entry) = self.current_attempt(task_group, attempt)
                    && entry.state == TaskGroupState::Scheduled
                {
                    entry.state = TaskGroupState::Running;
                    tracing::info!("{} attempt {} running", task_group, attempt);
                }
            }
            SchedulerEvent::Completed {
                task_group,
                attempt,
                output,
            } => {
                if self.current_attempt(task_group, attempt).is_none() {
                    return;
                }
                if !self.membership.is_alive(&output.executor) {
                    let executor = output.executor;
                    self.fail_attempt(task_group, attempt, RuntimeError::ExecutorLost(executor));
                    return;
                }

                self.directory.register(output);
                if let Some(entry) = self.entries.get_mut(&task_group) {
                    entry.state = TaskGroupState::Completed;
                    entry.slot = None;
                    entry.dispatched_at = None;
                }
                tracing::info!("{} attempt {} completed", task_group, attempt);
            }
            SchedulerEvent::Failed {
                task_group,
                attempt,
                error,
            } => {
                if self.current_attempt(task_group, attempt).is_none() {
                    return;
                }
                if let RuntimeError::BlockNotFound(block) = &error {
                    self.recompute_lost_output(block.producer);
                }
                self.fail_attempt(task_group, attempt, error);
            }
        }
    }

    /// Records a failed attempt, releases its slot and either requeues the task group or
    /// aborts the job.
    fn fail_attempt(&mut self, task_group: TaskGroupId, attempt: u32, error: RuntimeError) {
        let max_attempts = self.config.max_schedule_attempt;
        let Some(entry) = self.entries.get_mut(&task_group) else {
            return;
        };
        if entry.attempt != attempt {
            return;
        }

        entry.slot = None;
        entry.dispatched_at = None;
        entry.state = TaskGroupState::Failed;
        entry.history.push(AttemptRecord {
            attempt,
            executor: entry.executor.clone(),
            error: error.kind(),
            message: error.to_string(),
        });

        if let RuntimeError::TransportConnectFailure { endpoint, .. } = &error
            && let Some(peer) = self
                .membership
                .alive_executors()
                .into_iter()
                .find(|member| member.endpoint == *endpoint)
        {
            self.membership.report_unreachable(&peer.id);
        }

        if attempt < max_attempts {
            entry.attempt += 1;
            entry.state = TaskGroupState::Pending;
            entry.executor = None;
            tracing::warn!(
                "{} attempt {} failed: {}; retrying as attempt {}",
                task_group,
                attempt,
                error,
                entry.attempt
            );
        } else {
            entry.state = TaskGroupState::Aborted;
            tracing::error!(
                "{} failed {} times, aborting job {}: {}",
                task_group,
                attempt,
                self.job_id,
                error
            );
            self.failure = Some(JobFailure {
                task_group,
                attempts: entry.history.clone(),
                error: RuntimeError::MaxAttemptsExceeded {
                    task_group,
                    max_attempts,
                },
            });
        }
    }

    // --- Executor loss ---

    fn handle_executor_lost(&mut self, executor: &ExecutorId) {
        tracing::warn!("Job {} handling loss of executor {}", self.job_id, executor);

        let active: Vec<(TaskGroupId, u32)> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.state.is_active() && entry.executor.as_ref() == Some(executor))
            .map(|(id, entry)| (*id, entry.attempt))
            .collect();
        for (task_group, attempt) in active {
            self.fail_attempt(task_group, attempt, RuntimeError::ExecutorLost(executor.clone()));
        }

        self.directory.invalidate_executor(executor);

        let completed: Vec<TaskGroupId> = self
            .entries
            .iter()
            .filter(|(_, entry)| {
                entry.state == TaskGroupState::Completed && entry.executor.as_ref() == Some(executor)
            })
            .map(|(id, _)| *id)
            .collect();
        for task_group in completed {
            if self.output_still_needed(task_group) {
                self.recompute_lost_output(task_group);
            }
        }
    }

    /// Output of a sink stage is the job's result; anything else matters only while a
    /// consumer stage has not fully completed.
    fn output_still_needed(&self, task_group: TaskGroupId) -> bool {
        let Some(stage) = self.plan.stage(task_group.stage) else {
            return false;
        };
        stage.is_sink()
            || stage.children.iter().any(|child| {
                self.entries
                    .range(TaskGroupId::new(child.0, 0)..=TaskGroupId::new(child.0, u32::MAX))
                    .any(|(_, entry)| entry.state != TaskGroupState::Completed)
            })
    }

    /// Sends a completed producer whose blocks are gone back through the retry rule.
    fn recompute_lost_output(&mut self, producer: TaskGroupId) {
        let Some(entry) = self.entries.get(&producer) else {
            return;
        };
        if entry.state != TaskGroupState::Completed {
            return;
        }

        let attempt = entry.attempt;
        let error = match &entry.executor {
            Some(executor) if !self.membership.is_alive(executor) => {
                RuntimeError::ExecutorLost(executor.clone())
            }
            _ => RuntimeError::BlockNotFound(BlockId::new(producer, 0)),
        };
        tracing::warn!("Output of {} lost ({}), recomputing", producer, error);

        self.directory.remove(&producer);
        self.fail_attempt(producer, attempt, error);
    }

    fn reconcile_membership(&mut self) {
        let lost: BTreeSet<ExecutorId> = self
            .entries
            .values()
            .filter(|entry| entry.state.is_active() || entry.state == TaskGroupState::Completed)
            .filter_map(|entry| entry.executor.clone())
            .filter(|executor| !self.membership.is_alive(executor))
            .collect();
        for executor in lost {
            self.handle_executor_lost(&executor);
        }
    }

    // --- Timeouts ---

    async fn check_timeouts(&mut self, now: Instant) {
        let timeout = self.config.scheduler_timeout();
        let expired: Vec<(TaskGroupId, u32, Option<ExecutorId>)> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.state == TaskGroupState::Scheduled)
            .filter(|(_, entry)| {
                entry
                    .dispatched_at
                    .is_some_and(|at| now.saturating_duration_since(at) >= timeout)
            })
            .map(|(id, entry)| (*id, entry.attempt, entry.executor.clone()))
            .collect();

        for (task_group, attempt, executor) in expired {
            if let Some(executor) = &executor {
                self.dispatcher
                    .cancel(&self.job_id, executor, task_group, attempt)
                    .await;
            }
            self.fail_attempt(
                task_group,
                attempt,
                RuntimeError::SchedulingTimeout {
                    task_group,
                    attempt,
                    timeout_ms: self.config.scheduler_timeout_ms,
                },
            );
        }
    }

    // --- Outcome ---

    fn outcome(&self) -> Option<JobOutcome> {
        if let Some(failure) = &self.failure {
            return Some(JobOutcome::Failed(failure.clone()));
        }
        self.entries
            .values()
            .all(|entry| entry.state == TaskGroupState::Completed)
            .then_some(JobOutcome::Completed)
    }

    async fn finish(mut self, outcome: JobOutcome) -> JobOutcome {
        if !outcome.is_completed() {
            let to_cancel: Vec<(TaskGroupId, u32, Option<ExecutorId>, bool)> = self
                .entries
                .iter()
                .filter(|(_, entry)| {
                    !entry.state.is_terminal() && entry.state != TaskGroupState::Completed
                })
                .map(|(id, entry)| (*id, entry.attempt, entry.executor.clone(), entry.state.is_active()))
                .collect();

            for (task_group, attempt, executor, active) in to_cancel {
                if active && let Some(executor) = &executor {
                    self.dispatcher
                        .cancel(&self.job_id, executor, task_group, attempt)
                        .await;
                }
                if let Some(entry) = self.entries.get_mut(&task_group) {
                    entry.slot = None;
                    entry.dispatched_at = None;
                    entry.state = TaskGroupState::Cancelled;
                }
            }
        }

        self.publish_status(true);
        match &outcome {
            JobOutcome::Completed => tracing::info!("Job {} completed", self.job_id),
            JobOutcome::Failed(failure) => {
                tracing::error!("Job {} failed: {}", self.job_id, failure)
            }
            JobOutcome::Cancelled => tracing::info!("Job {} stopped after cancellation", self.job_id),
        }
        outcome
    }

    fn publish_status(&self, finished: bool) {
        let task_groups = self
            .entries
            .iter()
            .map(|(id, entry)| TaskGroupStatus {
                id: *id,
                state: entry.state,
                attempt: entry.attempt,
                executor: entry.executor.clone(),
            })
            .collect();
        self.status_tx.send_replace(JobStatus {
            job_id: self.job_id.clone(),
            task_groups,
            finished,
        });
    }
}
