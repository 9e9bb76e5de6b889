//! Runtime Error Taxonomy
//!
//! Every failure the scheduler, the shuffle layer and the transport can produce.
//! Transient kinds (`SchedulingTimeout`, `TransportConnectFailure`, `Timeout`) are retried
//! inside the component that saw them; once a bound is exhausted the error becomes a
//! task-group failure event and the scheduler decides what happens to the job.

use crate::cluster::types::ExecutorId;
use crate::scheduler::types::TaskGroupId;
use crate::shuffle::types::BlockId;

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use thiserror::Error;

/// Result type used across the library.
pub type RuntimeResult<T> = std::result::Result<T, RuntimeError>;

#[derive(Debug, Clone, Error)]
pub enum RuntimeError {
    /// A dispatched task group was not acknowledged as running in time.
    #[error("Task group {task_group} attempt {attempt} was not started within {timeout_ms} ms")]
    SchedulingTimeout {
        task_group: TaskGroupId,
        attempt: u32,
        timeout_ms: u64,
    },

    #[error("Task group {task_group} exceeded {max_attempts} schedule attempts")]
    MaxAttemptsExceeded {
        task_group: TaskGroupId,
        max_attempts: u32,
    },

    #[error("Executor {0} lost")]
    ExecutorLost(ExecutorId),

    #[error("Could not connect to partition transport at {endpoint} after {attempts} attempts: {reason}")]
    TransportConnectFailure {
        endpoint: SocketAddr,
        attempts: usize,
        reason: String,
    },

    #[error("Partition transport request to {endpoint} timed out after {timeout_ms} ms")]
    Timeout { endpoint: SocketAddr, timeout_ms: u64 },

    #[error("Block {0} not found")]
    BlockNotFound(BlockId),

    /// A block payload the partition transport could not frame.
    #[error("Block {block} is {bytes} bytes, over the {limit} byte frame limit")]
    BlockTooLarge {
        block: BlockId,
        bytes: usize,
        limit: u32,
    },

    #[error("Operation not supported by this implementation: {0}")]
    CapabilityNotSupported(String),

    #[error("Unknown executor {0}")]
    UnknownExecutor(ExecutorId),

    #[error("Executor {0} is already registered")]
    DuplicateExecutor(ExecutorId),

    #[error("Invalid physical plan: {0}")]
    InvalidPlan(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Unknown task handler: {0}")]
    UnknownHandler(String),

    /// A user handler failed with an error that is not a runtime error.
    #[error("Task execution failed: {0}")]
    TaskExecution(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("Codec error: {0}")]
    Codec(String),

    #[error("Job cancelled")]
    JobCancelled,
}

/// Fieldless mirror of [`RuntimeError`], kept in attempt histories and status views.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    SchedulingTimeout,
    MaxAttemptsExceeded,
    ExecutorLost,
    TransportConnectFailure,
    Timeout,
    BlockNotFound,
    BlockTooLarge,
    CapabilityNotSupported,
    UnknownExecutor,
    DuplicateExecutor,
    InvalidPlan,
    InvalidConfig,
    UnknownHandler,
    TaskExecution,
    Protocol,
    Io,
    Codec,
    JobCancelled,
}

impl RuntimeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RuntimeError::SchedulingTimeout { .. } => ErrorKind::SchedulingTimeout,
            RuntimeError::MaxAttemptsExceeded { .. } => ErrorKind::MaxAttemptsExceeded,
            RuntimeError::ExecutorLost(_) => ErrorKind::ExecutorLost,
            RuntimeError::TransportConnectFailure { .. } => ErrorKind::TransportConnectFailure,
            RuntimeError::Timeout { .. } => ErrorKind::Timeout,
            RuntimeError::BlockNotFound(_) => ErrorKind::BlockNotFound,
            RuntimeError::BlockTooLarge { .. } => ErrorKind::BlockTooLarge,
            RuntimeError::CapabilityNotSupported(_) => ErrorKind::CapabilityNotSupported,
            RuntimeError::UnknownExecutor(_) => ErrorKind::UnknownExecutor,
            RuntimeError::DuplicateExecutor(_) => ErrorKind::DuplicateExecutor,
            RuntimeError::InvalidPlan(_) => ErrorKind::InvalidPlan,
            RuntimeError::InvalidConfig(_) => ErrorKind::InvalidConfig,
            RuntimeError::UnknownHandler(_) => ErrorKind::UnknownHandler,
            RuntimeError::TaskExecution(_) => ErrorKind::TaskExecution,
            RuntimeError::Protocol(_) => ErrorKind::Protocol,
            RuntimeError::Io(_) => ErrorKind::Io,
            RuntimeError::Codec(_) => ErrorKind::Codec,
            RuntimeError::JobCancelled => ErrorKind::JobCancelled,
        }
    }

    /// Transient errors are retried locally before they are escalated.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            RuntimeError::SchedulingTimeout { .. }
                | RuntimeError::TransportConnectFailure { .. }
                | RuntimeError::Timeout { .. }
        )
    }

    /// Recovers a typed runtime error from a handler's `anyhow::Error`.
    ///
    /// Handlers that bubble up a shuffle read failure with `?` keep its kind (so an
    /// `ExecutorLost` stays an `ExecutorLost`); anything else becomes `TaskExecution`.
    pub fn from_handler_error(err: anyhow::Error) -> Self {
        match err.downcast::<RuntimeError>() {
            Ok(runtime) => runtime,
            Err(other) => RuntimeError::TaskExecution(format!("{:#}", other)),
        }
    }
}

impl From<std::io::Error> for RuntimeError {
    fn from(e: std::io::Error) -> Self {
        RuntimeError::Io(e.to_string())
    }
}

impl From<bincode::Error> for RuntimeError {
    fn from(e: bincode::Error) -> Self {
        RuntimeError::Codec(e.to_string())
    }
}

impl From<serde_json::Error> for RuntimeError {
    fn from(e: serde_json::Error) -> Self {
        RuntimeError::Codec(e.to_string())
    }
}
