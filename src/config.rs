//! Runtime Configuration
//!
//! One explicit structure enumerating every runtime option. It is built once at startup
//! (defaults, optionally overridden from JSON) and handed to each component by reference.

use crate::error::{RuntimeError, RuntimeResult};

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Top-level configuration for a job and the cluster it runs on.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Job identifier. Generated when not provided.
    pub job_id: String,
    pub scheduler: SchedulerConfig,
    pub transport: TransportConfig,
    pub cluster: ClusterConfig,
    pub storage: StorageConfig,
}

/// Scheduler timing and retry bounds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// How long a dispatched task group may go without a running acknowledgement.
    pub scheduler_timeout_ms: u64,
    /// Maximum number of attempts for a task group before the job fails.
    pub max_schedule_attempt: u32,
    /// Number of threads encoding launch descriptors and block payloads.
    pub schedule_ser_threads: usize,
    /// Output sub-range count is this factor times the downstream parallelism.
    pub hash_range_multiplier: u32,
    /// Interval of the periodic scheduling pass and timeout sweep.
    pub tick_interval_ms: u64,
}

/// Partition transport server and client settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Port the transport server binds. 0 requests an ephemeral port.
    pub port: u16,
    /// Maximum length of the pending connection queue.
    pub backlog: u32,
    pub num_listening_threads: usize,
    pub num_working_threads: usize,
    pub num_client_threads: usize,
    /// Connection attempts before a fetch surfaces `TransportConnectFailure`.
    pub client_connect_retries: usize,
    pub retry_backoff_base_ms: u64,
    pub retry_backoff_max_ms: u64,
    /// Upper bound for a single request/response exchange.
    pub fetch_timeout_ms: u64,
    /// Server-side idle limit between requests on one connection.
    pub connection_idle_timeout_ms: u64,
    pub max_frame_bytes: u32,
}

/// Executor defaults and failure detection timing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// Slots per executor when the resource description does not say otherwise.
    pub executor_capacity: usize,
    pub heartbeat_interval_ms: u64,
    /// Silence after which an alive executor becomes suspect.
    pub suspect_timeout_ms: u64,
    /// Silence after which a suspect executor is declared lost.
    pub dead_timeout_ms: u64,
}

/// Where executors keep committed blocks.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    /// Root directory for the file backend. Each executor gets a subdirectory.
    pub file_directory: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Memory,
    File,
}

/// One entry of the externally supplied resource layout.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExecutorResource {
    pub id: String,
    pub capacity: usize,
    pub memory_mb: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            job_id: uuid::Uuid::new_v4().to_string(),
            scheduler: SchedulerConfig::default(),
            transport: TransportConfig::default(),
            cluster: ClusterConfig::default(),
            storage: StorageConfig::default(),
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            scheduler_timeout_ms: 10_000,
            max_schedule_attempt: 3,
            schedule_ser_threads: 8,
            hash_range_multiplier: 10,
            tick_interval_ms: 50,
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            port: 0,
            backlog: 128,
            num_listening_threads: 3,
            num_working_threads: 10,
            num_client_threads: 10,
            client_connect_retries: 3,
            retry_backoff_base_ms: 150,
            retry_backoff_max_ms: 1200,
            fetch_timeout_ms: 5_000,
            connection_idle_timeout_ms: 1_000,
            // 64 MiB
            max_frame_bytes: 64 * 1024 * 1024,
        }
    }
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            executor_capacity: 1,
            heartbeat_interval_ms: 500,
            suspect_timeout_ms: 5_000,
            dead_timeout_ms: 10_000,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Memory,
            file_directory: PathBuf::from("./files"),
        }
    }
}

impl RuntimeConfig {
    /// Parses a (possibly partial) JSON document; missing fields keep their defaults.
    pub fn from_json_str(json: &str) -> RuntimeResult<Self> {
        let config: RuntimeConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> RuntimeResult<()> {
        let s = &self.scheduler;
        let t = &self.transport;
        let checks: [(bool, &str); 10] = [
            (s.hash_range_multiplier >= 1, "hash_range_multiplier must be >= 1"),
            (s.max_schedule_attempt >= 1, "max_schedule_attempt must be >= 1"),
            (s.scheduler_timeout_ms > 0, "scheduler_timeout_ms must be > 0"),
            (s.schedule_ser_threads > 0, "schedule_ser_threads must be > 0"),
            (t.backlog > 0, "backlog must be > 0"),
            (t.num_listening_threads > 0, "num_listening_threads must be > 0"),
            (t.num_working_threads > 0, "num_working_threads must be > 0"),
            (t.num_client_threads > 0, "num_client_threads must be > 0"),
            (t.client_connect_retries > 0, "client_connect_retries must be > 0"),
            (
                self.cluster.suspect_timeout_ms < self.cluster.dead_timeout_ms,
                "suspect_timeout_ms must be < dead_timeout_ms",
            ),
        ];

        for (ok, message) in checks {
            if !ok {
                return Err(RuntimeError::InvalidConfig(message.to_string()));
            }
        }
        Ok(())
    }
}

impl SchedulerConfig {
    pub fn scheduler_timeout(&self) -> Duration {
        Duration::from_millis(self.scheduler_timeout_ms)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms.max(1))
    }
}

impl TransportConfig {
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }

    pub fn connection_idle_timeout(&self) -> Duration {
        Duration::from_millis(self.connection_idle_timeout_ms)
    }
}

impl ClusterConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms.max(1))
    }

    pub fn suspect_timeout(&self) -> Duration {
        Duration::from_millis(self.suspect_timeout_ms)
    }

    pub fn dead_timeout(&self) -> Duration {
        Duration::from_millis(self.dead_timeout_ms)
    }
}
