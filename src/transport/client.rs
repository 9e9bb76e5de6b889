use super::protocol::{self, PartitionRequest, PartitionResponse};
use crate::config::TransportConfig;
use crate::error::{RuntimeError, RuntimeResult};
use crate::scheduler::types::TaskGroupId;
use crate::shuffle::types::{BlockId, SubRangeSpan};

use dashmap::DashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::Semaphore;

/// Fetches blocks from remote partition transport servers.
///
/// At most `num_client_threads` requests are in flight at once. Connections are kept open
/// after a successful exchange and reused for the next request to the same endpoint; a
/// pooled connection the server has since closed is discarded without costing a retry.
pub struct PartitionTransportClient {
    config: TransportConfig,
    permits: Semaphore,
    idle: DashMap<SocketAddr, Vec<TcpStream>>,
}

impl PartitionTransportClient {
    pub fn new(config: &TransportConfig) -> Arc<Self> {
        Arc::new(Self {
            permits: Semaphore::new(config.num_client_threads.max(1)),
            config: config.clone(),
            idle: DashMap::new(),
        })
    }

    /// Fetches a single block.
    pub async fn fetch(&self, endpoint: SocketAddr, block: &BlockId) -> RuntimeResult<Vec<u8>> {
        let mut blocks = self
            .fetch_span(endpoint, block.producer, SubRangeSpan::single(block.sub_range))
            .await
            .map_err(|e| match e {
                RuntimeError::BlockNotFound(_) => RuntimeError::BlockNotFound(*block),
                other => other,
            })?;

        blocks
            .pop()
            .ok_or_else(|| RuntimeError::Protocol(format!("empty response for block {}", block)))
    }

    /// Fetches every block of `producer` in `span`, in sub-range order.
    ///
    /// Connection failures and timeouts are retried with exponential backoff; a missing
    /// block is reported immediately as `BlockNotFound`.
    pub async fn fetch_span(
        &self,
        endpoint: SocketAddr,
        producer: TaskGroupId,
        span: SubRangeSpan,
    ) -> RuntimeResult<Vec<Vec<u8>>> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| RuntimeError::Protocol("transport client closed".to_string()))?;

        let request = PartitionRequest { producer, span };
        let attempts = self.config.client_connect_retries.max(1);
        let mut delay_ms = self.config.retry_backoff_base_ms;
        let mut last_error = None;

        for attempt in 0..attempts {
            match self.exchange(endpoint, &request).await {
                Ok(PartitionResponse::Blocks(blocks)) => {
                    if blocks.len() != span.len() as usize {
                        return Err(RuntimeError::Protocol(format!(
                            "expected {} blocks for {} {}, got {}",
                            span.len(),
                            producer,
                            span,
                            blocks.len()
                        )));
                    }
                    return Ok(blocks);
                }
                Ok(PartitionResponse::NotFound) => {
                    return Err(RuntimeError::BlockNotFound(BlockId::new(producer, span.start)));
                }
                Ok(PartitionResponse::BadRequest) => {
                    return Err(RuntimeError::Protocol(format!(
                        "{} rejected request for {} {}",
                        endpoint, producer, span
                    )));
                }
                Err(e) if e.is_transient() => {
                    tracing::debug!(
                        "Fetch of {} {} from {} failed (attempt {}/{}): {}",
                        producer,
                        span,
                        endpoint,
                        attempt + 1,
                        attempts,
                        e
                    );
                    last_error = Some(e);
                    if attempt + 1 == attempts {
                        break;
                    }
                    let jitter = rand::random::<u64>() % 50;
                    tokio::time::sleep(Duration::from_millis(delay_ms + jitter)).await;
                    delay_ms = (delay_ms * 2).min(self.config.retry_backoff_max_ms);
                }
                Err(e) => return Err(e),
            }
        }

        Err(match last_error {
            Some(RuntimeError::TransportConnectFailure { reason, .. }) => {
                RuntimeError::TransportConnectFailure {
                    endpoint,
                    attempts,
                    reason,
                }
            }
            Some(other) => other,
            None => RuntimeError::TransportConnectFailure {
                endpoint,
                attempts,
                reason: "retry attempts exhausted".to_string(),
            },
        })
    }

    /// Drops pooled connections to `endpoint`, e.g. after its executor was lost.
    pub fn close_endpoint(&self, endpoint: &SocketAddr) {
        self.idle.remove(endpoint);
    }

    pub fn idle_connections(&self, endpoint: &SocketAddr) -> usize {
        self.idle.get(endpoint).map(|pool| pool.len()).unwrap_or(0)
    }

    async fn exchange(
        &self,
        endpoint: SocketAddr,
        request: &PartitionRequest,
    ) -> RuntimeResult<PartitionResponse> {
        let timeout = self.config.fetch_timeout();

        while let Some(mut stream) = self.take_idle(&endpoint) {
            match tokio::time::timeout(timeout, self.round_trip(&mut stream, request)).await {
                Ok(Ok(response)) => {
                    self.keep_idle(endpoint, stream, &response);
                    return Ok(response);
                }
                Ok(Err(e)) => {
                    tracing::trace!("Discarding stale connection to {}: {}", endpoint, e);
                }
                Err(_) => return Err(self.timeout_error(endpoint)),
            }
        }

        let mut stream = match tokio::time::timeout(timeout, TcpStream::connect(endpoint)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => return Err(connect_failure(endpoint, e.to_string())),
            Err(_) => return Err(self.timeout_error(endpoint)),
        };
        let _ = stream.set_nodelay(true);

        match tokio::time::timeout(timeout, self.round_trip(&mut stream, request)).await {
            Ok(Ok(response)) => {
                self.keep_idle(endpoint, stream, &response);
                Ok(response)
            }
            Ok(Err(RuntimeError::Io(reason))) => Err(connect_failure(endpoint, reason)),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(self.timeout_error(endpoint)),
        }
    }

    async fn round_trip(
        &self,
        stream: &mut TcpStream,
        request: &PartitionRequest,
    ) -> RuntimeResult<PartitionResponse> {
        protocol::write_request(stream, request).await?;
        protocol::read_response(stream, self.config.max_frame_bytes).await
    }

    fn take_idle(&self, endpoint: &SocketAddr) -> Option<TcpStream> {
        self.idle.get_mut(endpoint).and_then(|mut pool| pool.pop())
    }

    fn keep_idle(&self, endpoint: SocketAddr, stream: TcpStream, response: &PartitionResponse) {
        // The server closes the connection after a bad request.
        if matches!(response, PartitionResponse::BadRequest) {
            return;
        }
        let mut pool = self.idle.entry(endpoint).or_default();
        if pool.len() < self.config.num_client_threads {
            pool.push(stream);
        }
    }

    fn timeout_error(&self, endpoint: SocketAddr) -> RuntimeError {
        RuntimeError::Timeout {
            endpoint,
            timeout_ms: self.config.fetch_timeout_ms,
        }
    }
}

fn connect_failure(endpoint: SocketAddr, reason: String) -> RuntimeError {
    RuntimeError::TransportConnectFailure {
        endpoint,
        attempts: 1,
        reason,
    }
}
