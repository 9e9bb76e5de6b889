//! Executor Runtime
//!
//! One executor process: a block store, the partition transport server exposing it, a
//! transport client for reading other executors' blocks, and the handler registry.
//!
//! ## Attempt lifecycle
//! 1. **Launch**: the attempt is spawned and registered so it can be cancelled.
//! 2. **Running**: acknowledged to the scheduler before the handler starts.
//! 3. **Execution**: the handler reads its inputs and emits records.
//! 4. **Commit**: the last batch is flushed and one block per sub-range is committed.
//! 5. **Report**: `Completed` with the block location, or `Failed` with the error.

use super::context::TaskContext;
use super::registry::TaskHandlerRegistry;
use crate::cluster::service::ClusterMembership;
use crate::cluster::types::ExecutorId;
use crate::config::{RuntimeConfig, StorageBackend};
use crate::error::{RuntimeError, RuntimeResult};
use crate::scheduler::types::{JobId, SchedulerEvent, TaskGroupId, TaskGroupLaunch};
use crate::shuffle::reader::ShuffleReader;
use crate::shuffle::store::{BlockStore, FileBlockStore, MemoryBlockStore};
use crate::shuffle::types::BlockLocation;
use crate::transport::client::PartitionTransportClient;
use crate::transport::server::PartitionTransportServer;

use dashmap::DashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::{AbortHandle, JoinHandle};

type AttemptKey = (JobId, TaskGroupId, u32);

pub struct ExecutorRuntime {
    id: ExecutorId,
    endpoint: SocketAddr,
    store: Arc<dyn BlockStore>,
    server: Mutex<PartitionTransportServer>,
    client: Arc<PartitionTransportClient>,
    handlers: Arc<TaskHandlerRegistry>,
    membership: Arc<ClusterMembership>,
    ser_threads: usize,
    max_block_bytes: u32,
    running: DashMap<AttemptKey, AbortHandle>,
    heartbeat: Mutex<Option<JoinHandle<()>>>,
}

impl ExecutorRuntime {
    /// Opens the block store and starts the transport server on `bind_ip`.
    pub async fn start(
        id: ExecutorId,
        config: &RuntimeConfig,
        bind_ip: IpAddr,
        handlers: Arc<TaskHandlerRegistry>,
        membership: Arc<ClusterMembership>,
    ) -> RuntimeResult<Arc<Self>> {
        let store: Arc<dyn BlockStore> = match config.storage.backend {
            StorageBackend::Memory => MemoryBlockStore::new(),
            StorageBackend::File => {
                FileBlockStore::new(config.storage.file_directory.join(&id.0)).await?
            }
        };
        let server = PartitionTransportServer::start(bind_ip, &config.transport, store.clone()).await?;
        let endpoint = server.local_addr();

        tracing::info!("Executor {} started, serving blocks on {}", id, endpoint);

        Ok(Arc::new(Self {
            id,
            endpoint,
            store,
            server: Mutex::new(server),
            client: PartitionTransportClient::new(&config.transport),
            handlers,
            membership,
            ser_threads: config.scheduler.schedule_ser_threads,
            max_block_bytes: config.transport.max_frame_bytes,
            running: DashMap::new(),
            heartbeat: Mutex::new(None),
        }))
    }

    pub fn id(&self) -> &ExecutorId {
        &self.id
    }

    pub fn endpoint(&self) -> SocketAddr {
        self.endpoint
    }

    pub fn store(&self) -> &Arc<dyn BlockStore> {
        &self.store
    }

    pub fn running_attempts(&self) -> usize {
        self.running.len()
    }

    /// Reports liveness to the cluster every `interval` until shutdown.
    pub fn start_heartbeats(self: &Arc<Self>, interval: Duration) {
        let runtime = self.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                runtime.membership.heartbeat(&runtime.id);
            }
        });

        let previous = self
            .heartbeat
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .replace(handle);
        if let Some(previous) = previous {
            previous.abort();
        }
    }

    /// Spawns one attempt. Progress is reported on the launch's channel.
    pub fn launch(self: &Arc<Self>, launch: TaskGroupLaunch) -> RuntimeResult<()> {
        if launch.executor != self.id {
            return Err(RuntimeError::Protocol(format!(
                "launch for {} delivered to {}",
                launch.executor, self.id
            )));
        }

        let key: AttemptKey = (launch.job_id.clone(), launch.task_group, launch.attempt);
        let (registered_tx, registered_rx) = oneshot::channel::<()>();
        let runtime = self.clone();
        let task_key = key.clone();

        let handle = tokio::spawn(async move {
            // Wait until the abort handle is registered so the removal below cannot race it.
            let _ = registered_rx.await;

            let (task_group, attempt) = (launch.task_group, launch.attempt);
            let _ = launch.reports.send(SchedulerEvent::Running {
                task_group,
                attempt,
            });

            let event = match runtime.run_attempt(&launch).await {
                Ok(output) => SchedulerEvent::Completed {
                    task_group,
                    attempt,
                    output,
                },
                Err(error) => {
                    tracing::warn!(
                        "{} attempt {} failed on {}: {}",
                        task_group,
                        attempt,
                        runtime.id,
                        error
                    );
                    SchedulerEvent::Failed {
                        task_group,
                        attempt,
                        error,
                    }
                }
            };

            runtime.running.remove(&task_key);
            let _ = launch.reports.send(event);
        });

        self.running.insert(key, handle.abort_handle());
        let _ = registered_tx.send(());
        Ok(())
    }

    /// Aborts a running attempt. Nothing is reported for it afterwards.
    pub fn cancel(&self, job_id: &JobId, task_group: TaskGroupId, attempt: u32) -> bool {
        match self.running.remove(&(job_id.clone(), task_group, attempt)) {
            Some((_, handle)) => {
                handle.abort();
                tracing::info!("Cancelled {} attempt {} on {}", task_group, attempt, self.id);
                true
            }
            None => false,
        }
    }

    async fn run_attempt(&self, launch: &TaskGroupLaunch) -> RuntimeResult<BlockLocation> {
        // Blocks left by an earlier attempt on this executor must not shadow this one's.
        let stale = self.store.remove_producer(&launch.task_group).await;
        if stale > 0 {
            tracing::debug!("Dropped {} stale blocks of {}", stale, launch.task_group);
        }

        let reader = ShuffleReader::new(self.client.clone(), self.membership.clone());
        let ctx = Arc::new(TaskContext::new(launch, reader));

        self.handlers.execute(&launch.handler, ctx.clone()).await?;

        ctx.flush();
        let summary = ctx
            .take_writer()
            .commit(self.store.as_ref(), self.ser_threads, self.max_block_bytes)
            .await?;

        tracing::info!(
            "{} attempt {} committed {} records in {} blocks on {}",
            launch.task_group,
            launch.attempt,
            summary.records,
            summary.blocks,
            self.id
        );

        Ok(BlockLocation {
            producer: launch.task_group,
            executor: self.id.clone(),
            endpoint: self.endpoint,
            sub_range_count: launch.output.sub_range_count(),
        })
    }

    /// Stops everything this executor runs and drops its blocks.
    pub async fn shutdown(&self) {
        let heartbeat = self
            .heartbeat
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(handle) = heartbeat {
            handle.abort();
        }

        let keys: Vec<AttemptKey> = self.running.iter().map(|entry| entry.key().clone()).collect();
        for key in keys {
            if let Some((_, handle)) = self.running.remove(&key) {
                handle.abort();
            }
        }

        self.server
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .shutdown();
        let dropped = self.store.clear().await;

        tracing::info!("Executor {} shut down, dropped {} blocks", self.id, dropped);
    }
}
