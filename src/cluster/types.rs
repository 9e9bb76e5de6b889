use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;
use std::time::Instant;

/// Identifier of an executor process.
///
/// Ordered so that placement decisions can break ties by ascending id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ExecutorId(pub String);

impl ExecutorId {
    /// Generates a new random UUID v4-based ExecutorId.
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

impl Default for ExecutorId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<&str> for ExecutorId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for ExecutorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ExecutorState {
    Alive,
    Suspect,
    Dead,
}

/// A registered executor as seen by the master.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorInfo {
    pub id: ExecutorId,
    /// Number of task group slots.
    pub capacity: usize,
    /// Partition transport endpoint.
    pub endpoint: SocketAddr,
    pub state: ExecutorState,

    #[serde(skip)]
    pub last_seen: Option<Instant>,
}

/// Cluster-wide notifications, published once and consumed by every interested component.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClusterEvent {
    ExecutorRegistered(ExecutorId),
    /// The executor is gone together with every block it held.
    ExecutorLost(ExecutorId),
}
