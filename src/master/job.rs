//! Job Master
//!
//! Owns the cluster-wide state of the master process (membership, capacity, block
//! directory) and starts one scheduler per submitted job.

use crate::cluster::capacity::CapacityRegistry;
use crate::cluster::service::ClusterMembership;
use crate::cluster::types::ExecutorId;
use crate::config::RuntimeConfig;
use crate::error::{RuntimeError, RuntimeResult};
use crate::scheduler::dispatch::TaskGroupDispatcher;
use crate::scheduler::plan::PhysicalPlan;
use crate::scheduler::scheduler::TaskGroupScheduler;
use crate::scheduler::types::{JobId, JobOutcome, JobStatus, StageId};
use crate::shuffle::directory::BlockDirectory;
use crate::shuffle::reader::ShuffleReader;
use crate::shuffle::types::{BlockLocation, Record, SubRangeSpan};
use crate::transport::client::PartitionTransportClient;

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tokio::sync::{Notify, watch};
use tokio::task::JoinHandle;

pub struct JobMaster {
    config: RuntimeConfig,
    membership: Arc<ClusterMembership>,
    directory: Arc<BlockDirectory>,
    dispatcher: Arc<dyn TaskGroupDispatcher>,
    client: Arc<PartitionTransportClient>,
    latest_job: Mutex<Option<watch::Receiver<JobStatus>>>,
    background: Mutex<Vec<JoinHandle<()>>>,
}

/// A submitted job. Dropping the handle does not stop the job.
pub struct JobHandle {
    job_id: JobId,
    plan: Arc<PhysicalPlan>,
    status: watch::Receiver<JobStatus>,
    cancel: Arc<Notify>,
    task: JoinHandle<JobOutcome>,
}

impl JobMaster {
    /// Validates `config` and starts the failure detector and the block directory's
    /// loss watcher. Must be called inside a Tokio runtime.
    pub fn new(
        config: RuntimeConfig,
        dispatcher: Arc<dyn TaskGroupDispatcher>,
    ) -> RuntimeResult<Arc<Self>> {
        config.validate()?;

        let membership = ClusterMembership::new(config.cluster.clone(), CapacityRegistry::new());
        let directory = BlockDirectory::new();

        let background = vec![
            directory
                .clone()
                .start(membership.subscribe(), membership.clone()),
            membership.clone().start_failure_detection(),
        ];

        Ok(Arc::new(Self {
            client: PartitionTransportClient::new(&config.transport),
            config,
            membership,
            directory,
            dispatcher,
            latest_job: Mutex::new(None),
            background: Mutex::new(background),
        }))
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn membership(&self) -> &Arc<ClusterMembership> {
        &self.membership
    }

    pub fn directory(&self) -> &Arc<BlockDirectory> {
        &self.directory
    }

    pub fn register_executor(
        &self,
        id: ExecutorId,
        capacity: usize,
        endpoint: SocketAddr,
    ) -> RuntimeResult<()> {
        self.membership.register_executor(id, capacity, endpoint)
    }

    /// Removes the executor; its blocks are forgotten and its running task groups fail.
    pub fn deregister_executor(&self, id: &ExecutorId) -> RuntimeResult<()> {
        self.membership.deregister_executor(id)
    }

    /// Starts scheduling `plan` as a new job.
    pub fn submit(&self, plan: PhysicalPlan) -> RuntimeResult<JobHandle> {
        let job_id = JobId::new();
        let plan = Arc::new(plan);
        let scheduler = TaskGroupScheduler::new(
            job_id.clone(),
            plan.clone(),
            self.config.scheduler.clone(),
            self.membership.clone(),
            self.directory.clone(),
            self.dispatcher.clone(),
        )?;

        let status = scheduler.status();
        let cancel = scheduler.canceller();
        *self
            .latest_job
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(status.clone());

        tracing::info!(
            "Submitted job {} ({} stages, {} task groups)",
            job_id,
            plan.stages().len(),
            plan.task_group_count()
        );
        let task = tokio::spawn(scheduler.run());

        Ok(JobHandle {
            job_id,
            plan,
            status,
            cancel,
            task,
        })
    }

    /// Latest status of the most recently submitted job.
    pub fn latest_job_status(&self) -> Option<JobStatus> {
        self.latest_job
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .as_ref()
            .map(|rx| rx.borrow().clone())
    }

    /// Every record a completed stage committed, task groups in index order.
    pub async fn read_stage_output(
        &self,
        plan: &PhysicalPlan,
        stage: StageId,
    ) -> RuntimeResult<Vec<Record>> {
        let planned = plan
            .stage(stage)
            .ok_or_else(|| RuntimeError::InvalidPlan(format!("no {} in plan", stage)))?;

        let producers: Vec<BlockLocation> = planned
            .task_groups()
            .map(|task_group| {
                self.directory.location(&task_group).ok_or_else(|| {
                    RuntimeError::InvalidPlan(format!("no committed output for {}", task_group))
                })
            })
            .collect::<RuntimeResult<_>>()?;

        let reader = ShuffleReader::new(self.client.clone(), self.membership.clone());
        let mut records = Vec::new();
        for location in &producers {
            let span = SubRangeSpan::new(0, location.sub_range_count);
            for payload in reader.fetch_span(location, span).await? {
                records.extend(crate::shuffle::decode_records(&payload)?);
            }
        }
        Ok(records)
    }

    pub fn shutdown(&self) {
        let tasks: Vec<JoinHandle<()>> = self
            .background
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .drain(..)
            .collect();
        for task in tasks {
            task.abort();
        }
    }
}

impl JobHandle {
    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }

    pub fn plan(&self) -> &Arc<PhysicalPlan> {
        &self.plan
    }

    pub fn status(&self) -> watch::Receiver<JobStatus> {
        self.status.clone()
    }

    /// Stops the job; it finishes with `JobOutcome::Cancelled`.
    pub fn cancel(&self) {
        // notify_one keeps a permit if the scheduler is not waiting right now.
        self.cancel.notify_one();
    }

    pub async fn join(self) -> RuntimeResult<JobOutcome> {
        self.task.await.map_err(|e| {
            if e.is_cancelled() {
                RuntimeError::JobCancelled
            } else {
                RuntimeError::TaskExecution(format!("scheduler of job {} panicked: {}", self.job_id, e))
            }
        })
    }
}
