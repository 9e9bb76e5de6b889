//! Master HTTP Protocol
//!
//! Endpoints and JSON bodies of the master's status and registration surface, used by
//! the bootstrap layer to add and remove executors and by operators to watch a job.

use crate::cluster::types::ExecutorState;
use crate::scheduler::types::JobStatus;

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;

// --- API Endpoints ---

/// Capacity and state of every known executor.
pub const ENDPOINT_EXECUTORS: &str = "/executors";
pub const ENDPOINT_REGISTER: &str = "/executors/register";
/// Takes the executor id as a path parameter.
pub const ENDPOINT_DEREGISTER: &str = "/executors/:id/deregister";
/// Liveness signal of an executor registered over HTTP.
pub const ENDPOINT_HEARTBEAT: &str = "/executors/:id/heartbeat";
/// Status of the most recently submitted job.
pub const ENDPOINT_JOB_STATUS: &str = "/job/status";

// --- Data Transfer Objects ---

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExecutorView {
    pub id: String,
    pub state: ExecutorState,
    pub endpoint: SocketAddr,
    pub used_slots: usize,
    pub capacity: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ExecutorsResponse {
    pub executors: Vec<ExecutorView>,
}

/// Admits an executor whose partition transport server listens on `endpoint`.
#[derive(Debug, Serialize, Deserialize)]
pub struct RegisterExecutorRequest {
    pub id: String,
    pub capacity: usize,
    pub endpoint: SocketAddr,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RegistrationResponse {
    pub success: bool,
    pub error: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct JobStatusResponse {
    pub status: Option<JobStatus>,
}
