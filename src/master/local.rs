//! Local Cluster
//!
//! A master and N executors in one process. Every executor still serves its blocks over
//! a real TCP partition transport server, so shuffles take the same path as on a cluster.

use super::job::{JobHandle, JobMaster};
use crate::cluster::types::{ClusterEvent, ExecutorId};
use crate::config::{ExecutorResource, RuntimeConfig};
use crate::error::{RuntimeError, RuntimeResult};
use crate::executor::dispatcher::LocalDispatcher;
use crate::executor::registry::TaskHandlerRegistry;
use crate::executor::runtime::ExecutorRuntime;
use crate::scheduler::plan::PhysicalPlan;

use std::net::{IpAddr, Ipv4Addr};
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

const LOCALHOST: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

pub struct LocalCluster {
    master: Arc<JobMaster>,
    dispatcher: Arc<LocalDispatcher>,
    handlers: Arc<TaskHandlerRegistry>,
    watchers: Mutex<Vec<JoinHandle<()>>>,
}

impl LocalCluster {
    /// Starts `executors` executors with random ids and the configured default capacity.
    pub async fn start(
        config: RuntimeConfig,
        handlers: Arc<TaskHandlerRegistry>,
        executors: usize,
    ) -> RuntimeResult<Self> {
        let capacity = config.cluster.executor_capacity;
        let resources: Vec<ExecutorResource> = (0..executors)
            .map(|_| ExecutorResource {
                id: ExecutorId::new().0,
                capacity,
                memory_mb: 0,
            })
            .collect();
        Self::start_with(config, handlers, &resources).await
    }

    /// Starts one executor per resource entry.
    pub async fn start_with(
        config: RuntimeConfig,
        handlers: Arc<TaskHandlerRegistry>,
        resources: &[ExecutorResource],
    ) -> RuntimeResult<Self> {
        let dispatcher = LocalDispatcher::new();
        let master = JobMaster::new(config, dispatcher.clone())?;
        let cluster = Self {
            master,
            dispatcher,
            handlers,
            watchers: Mutex::new(Vec::new()),
        };

        for resource in resources {
            cluster.add_executor(resource).await?;
        }
        tracing::info!("Local cluster up with {} executors", resources.len());
        Ok(cluster)
    }

    pub fn master(&self) -> &Arc<JobMaster> {
        &self.master
    }

    pub fn handlers(&self) -> &Arc<TaskHandlerRegistry> {
        &self.handlers
    }

    pub fn executor(&self, id: &ExecutorId) -> Option<Arc<ExecutorRuntime>> {
        self.dispatcher.get(id)
    }

    pub fn executor_ids(&self) -> Vec<ExecutorId> {
        self.dispatcher.executor_ids()
    }

    /// Starts an executor runtime and registers it with the master.
    ///
    /// The runtime shuts itself down once the cluster declares it lost, whether through
    /// deregistration or missed heartbeats.
    pub async fn add_executor(
        &self,
        resource: &ExecutorResource,
    ) -> RuntimeResult<Arc<ExecutorRuntime>> {
        if resource.capacity == 0 {
            return Err(RuntimeError::InvalidConfig(format!(
                "executor {} has no slots",
                resource.id
            )));
        }

        let id = ExecutorId(resource.id.clone());
        let config = self.master.config();
        let runtime = ExecutorRuntime::start(
            id.clone(),
            config,
            LOCALHOST,
            self.handlers.clone(),
            self.master.membership().clone(),
        )
        .await?;

        let mut events = self.master.membership().subscribe();
        if let Err(e) = self
            .master
            .register_executor(id.clone(), resource.capacity, runtime.endpoint())
        {
            runtime.shutdown().await;
            return Err(e);
        }
        self.dispatcher.add(runtime.clone());
        runtime.start_heartbeats(config.cluster.heartbeat_interval());

        let dispatcher = self.dispatcher.clone();
        let membership = self.master.membership().clone();
        let watched = runtime.clone();
        let watcher = tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(ClusterEvent::ExecutorLost(lost)) if &lost == watched.id() => break,
                    Ok(_) => {}
                    // The loss may be among the skipped events.
                    Err(RecvError::Lagged(_)) if !membership.is_alive(watched.id()) => break,
                    Err(RecvError::Lagged(_)) => {}
                    Err(RecvError::Closed) => return,
                }
            }
            dispatcher.remove(watched.id());
            watched.shutdown().await;
        });
        self.watchers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(watcher);

        Ok(runtime)
    }

    /// Simulates an executor crash: deregisters it and tears its runtime down at once.
    pub async fn kill_executor(&self, id: &ExecutorId) -> RuntimeResult<()> {
        self.master.deregister_executor(id)?;
        if let Some(runtime) = self.dispatcher.remove(id) {
            runtime.shutdown().await;
        }
        Ok(())
    }

    pub fn submit(&self, plan: PhysicalPlan) -> RuntimeResult<JobHandle> {
        self.master.submit(plan)
    }

    pub async fn shutdown(&self) {
        let watchers: Vec<JoinHandle<()>> = self
            .watchers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .drain(..)
            .collect();
        for watcher in watchers {
            watcher.abort();
        }

        for id in self.dispatcher.executor_ids() {
            if let Some(runtime) = self.dispatcher.remove(&id) {
                runtime.shutdown().await;
            }
        }
        self.master.shutdown();
        tracing::info!("Local cluster shut down");
    }
}
