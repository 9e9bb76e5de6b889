use super::types::BlockLocation;
use crate::cluster::service::ClusterMembership;
use crate::cluster::types::{ClusterEvent, ExecutorId};
use crate::scheduler::types::TaskGroupId;

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

/// Master-side map from producer task group to the executor holding its blocks.
pub struct BlockDirectory {
    locations: DashMap<TaskGroupId, BlockLocation>,
}

impl BlockDirectory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            locations: DashMap::new(),
        })
    }

    pub fn register(&self, location: BlockLocation) {
        tracing::debug!(
            "Blocks of {} available on {} ({} sub-ranges)",
            location.producer,
            location.executor,
            location.sub_range_count
        );
        self.locations.insert(location.producer, location);
    }

    pub fn location(&self, producer: &TaskGroupId) -> Option<BlockLocation> {
        self.locations.get(producer).map(|entry| entry.value().clone())
    }

    pub fn remove(&self, producer: &TaskGroupId) -> Option<BlockLocation> {
        self.locations.remove(producer).map(|(_, location)| location)
    }

    /// Forgets every location on `executor`. Returns the producers whose output was lost.
    pub fn invalidate_executor(&self, executor: &ExecutorId) -> Vec<TaskGroupId> {
        let mut lost: Vec<TaskGroupId> = self
            .locations
            .iter()
            .filter(|entry| &entry.value().executor == executor)
            .map(|entry| *entry.key())
            .collect();
        lost.sort();

        for producer in &lost {
            self.locations.remove(producer);
        }

        if !lost.is_empty() {
            tracing::warn!(
                "Invalidated block locations of {} producers on lost executor {}",
                lost.len(),
                executor
            );
        }
        lost
    }

    /// Forgets every location on an executor membership no longer counts as alive.
    pub fn invalidate_dead(&self, membership: &ClusterMembership) -> Vec<TaskGroupId> {
        let mut dead: Vec<ExecutorId> = self
            .locations
            .iter()
            .map(|entry| entry.value().executor.clone())
            .filter(|executor| !membership.is_alive(executor))
            .collect();
        dead.sort();
        dead.dedup();

        dead.iter()
            .flat_map(|executor| self.invalidate_executor(executor))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.locations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locations.is_empty()
    }

    /// Consumes executor loss events for as long as the cluster publishes them. After
    /// missing events it reconciles against `membership` instead.
    pub fn start(
        self: Arc<Self>,
        mut events: broadcast::Receiver<ClusterEvent>,
        membership: Arc<ClusterMembership>,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(ClusterEvent::ExecutorLost(executor)) => {
                        self.invalidate_executor(&executor);
                    }
                    Ok(ClusterEvent::ExecutorRegistered(_)) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!("Block directory missed {} cluster events", skipped);
                        self.invalidate_dead(&membership);
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }
}
