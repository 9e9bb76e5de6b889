use super::capacity::CapacityRegistry;
use super::types::{ClusterEvent, ExecutorId, ExecutorInfo, ExecutorState};
use crate::config::ClusterConfig;
use crate::error::{RuntimeError, RuntimeResult};

use dashmap::DashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::broadcast;

const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Executor registration and failure detection.
///
/// This is the single publisher of [`ClusterEvent::ExecutorLost`]: however a loss is
/// detected (explicit deregistration or heartbeat silence), the event goes out exactly once
/// and every consumer (scheduler, block directory, shuffle readers, the lost executor's
/// own runtime) reacts to that one event.
pub struct ClusterMembership {
    members: DashMap<ExecutorId, ExecutorInfo>,
    capacity: Arc<CapacityRegistry>,
    events: broadcast::Sender<ClusterEvent>,
    config: ClusterConfig,
}

impl ClusterMembership {
    pub fn new(config: ClusterConfig, capacity: Arc<CapacityRegistry>) -> Arc<Self> {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Arc::new(Self {
            members: DashMap::new(),
            capacity,
            events,
            config,
        })
    }

    /// Admits an executor with `capacity` slots serving blocks at `endpoint`.
    ///
    /// An id that was previously declared dead may rejoin; its old blocks stay lost.
    pub fn register_executor(
        &self,
        id: ExecutorId,
        capacity: usize,
        endpoint: SocketAddr,
    ) -> RuntimeResult<()> {
        if let Some(existing) = self.members.get(&id)
            && existing.state != ExecutorState::Dead
        {
            return Err(RuntimeError::DuplicateExecutor(id));
        }

        self.capacity.add_executor(id.clone(), capacity)?;
        self.members.insert(
            id.clone(),
            ExecutorInfo {
                id: id.clone(),
                capacity,
                endpoint,
                state: ExecutorState::Alive,
                last_seen: Some(Instant::now()),
            },
        );

        tracing::info!(
            "Executor {} registered ({} slots, transport at {})",
            id,
            capacity,
            endpoint
        );
        self.publish(ClusterEvent::ExecutorRegistered(id));
        Ok(())
    }

    /// Removes an executor and publishes `ExecutorLost`.
    ///
    /// Repeated calls for an executor that is already dead are no-ops, so the loss is
    /// only ever announced once.
    pub fn deregister_executor(&self, id: &ExecutorId) -> RuntimeResult<()> {
        {
            let mut member = self
                .members
                .get_mut(id)
                .ok_or_else(|| RuntimeError::UnknownExecutor(id.clone()))?;

            if member.state == ExecutorState::Dead {
                tracing::debug!("Executor {} already deregistered", id);
                return Ok(());
            }
            member.state = ExecutorState::Dead;
        }

        self.capacity.remove_executor(id);

        tracing::warn!(
            "Executor {} deregistered; {} alive executors remain",
            id,
            self.alive_executors().len()
        );
        self.publish(ClusterEvent::ExecutorLost(id.clone()));
        Ok(())
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ClusterEvent> {
        self.events.subscribe()
    }

    pub fn capacity(&self) -> &Arc<CapacityRegistry> {
        &self.capacity
    }

    /// Records a liveness signal. A suspect executor that heartbeats is alive again.
    ///
    /// Returns `false` when the executor is unknown or already dead; it has to register
    /// again before it counts as a member.
    pub fn heartbeat(&self, id: &ExecutorId) -> bool {
        match self.members.get_mut(id) {
            Some(mut member) => match member.state {
                ExecutorState::Dead => {
                    tracing::debug!("Heartbeat from dead executor {} ignored", id);
                    false
                }
                ExecutorState::Suspect => {
                    tracing::info!("Executor {} refuted suspicion", id);
                    member.state = ExecutorState::Alive;
                    member.last_seen = Some(Instant::now());
                    true
                }
                ExecutorState::Alive => {
                    member.last_seen = Some(Instant::now());
                    true
                }
            },
            None => {
                tracing::debug!("Heartbeat from unknown executor {}", id);
                false
            }
        }
    }

    /// Marks an executor suspect after a peer failed to reach it.
    ///
    /// Suspicion alone does not remove anything; the failure detector declares the
    /// executor lost only if it also stays silent past the dead timeout.
    pub fn report_unreachable(&self, id: &ExecutorId) {
        if let Some(mut member) = self.members.get_mut(id)
            && member.state == ExecutorState::Alive
        {
            tracing::warn!("Executor {} suspected (unreachable from a peer)", id);
            member.state = ExecutorState::Suspect;
        }
    }

    pub fn get_member(&self, id: &ExecutorId) -> Option<ExecutorInfo> {
        self.members.get(id).map(|entry| entry.value().clone())
    }

    pub fn endpoint(&self, id: &ExecutorId) -> Option<SocketAddr> {
        self.members
            .get(id)
            .filter(|entry| entry.state != ExecutorState::Dead)
            .map(|entry| entry.endpoint)
    }

    pub fn is_alive(&self, id: &ExecutorId) -> bool {
        self.members
            .get(id)
            .map(|entry| entry.state != ExecutorState::Dead)
            .unwrap_or(false)
    }

    /// Whether new work may be placed on the executor. Suspect executors keep serving the
    /// blocks they hold but receive no launches until they heartbeat again.
    pub fn is_schedulable(&self, id: &ExecutorId) -> bool {
        self.members
            .get(id)
            .map(|entry| entry.state == ExecutorState::Alive)
            .unwrap_or(false)
    }

    /// Executors not yet declared dead, ordered by id.
    pub fn alive_executors(&self) -> Vec<ExecutorInfo> {
        let mut alive: Vec<ExecutorInfo> = self
            .members
            .iter()
            .filter(|entry| entry.value().state != ExecutorState::Dead)
            .map(|entry| entry.value().clone())
            .collect();
        alive.sort_by(|a, b| a.id.cmp(&b.id));
        alive
    }

    pub fn start_failure_detection(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.config.heartbeat_interval());

            loop {
                interval.tick().await;
                self.detect_failures(Instant::now());
            }
        })
    }

    /// One sweep of the Alive -> Suspect -> Dead model. Returns the executors declared lost.
    pub fn detect_failures(&self, now: Instant) -> Vec<ExecutorId> {
        let mut lost = Vec::new();

        for mut entry in self.members.iter_mut() {
            let member = entry.value_mut();

            let Some(last_seen) = member.last_seen else {
                member.last_seen = Some(now);
                continue;
            };
            let elapsed = now.saturating_duration_since(last_seen);

            match member.state {
                ExecutorState::Alive => {
                    if elapsed > self.config.suspect_timeout() {
                        tracing::warn!(
                            "Executor {} suspected (no heartbeat for {:?})",
                            member.id,
                            elapsed
                        );
                        member.state = ExecutorState::Suspect;
                    }
                }
                ExecutorState::Suspect => {
                    if elapsed > self.config.dead_timeout() {
                        tracing::warn!(
                            "Executor {} declared dead (no heartbeat for {:?})",
                            member.id,
                            elapsed
                        );
                        lost.push(member.id.clone());
                    }
                }
                ExecutorState::Dead => {}
            }
        }

        // Deregistration takes its own map guards, so it must run after the sweep.
        for id in &lost {
            if let Err(e) = self.deregister_executor(id) {
                tracing::error!("Failed to deregister executor {}: {}", id, e);
            }
        }

        lost
    }

    fn publish(&self, event: ClusterEvent) {
        // No subscribers is fine: nothing is running that cares yet.
        if self.events.send(event.clone()).is_err() {
            tracing::trace!("No subscribers for {:?}", event);
        }
    }
}
