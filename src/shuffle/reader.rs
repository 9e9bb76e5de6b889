use super::decode_records;
use super::types::{BlockLocation, Record, SubRangeSpan};
use crate::cluster::service::ClusterMembership;
use crate::cluster::types::ClusterEvent;
use crate::error::{RuntimeError, RuntimeResult};
use crate::scheduler::types::InputSpec;
use crate::transport::client::PartitionTransportClient;

use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;

/// Reads a consumer's span from every producer of a parent stage.
///
/// A fetch from an executor that is declared lost while the fetch is in flight is
/// abandoned at once with `ExecutorLost` instead of waiting for transport retries.
pub struct ShuffleReader {
    client: Arc<PartitionTransportClient>,
    membership: Arc<ClusterMembership>,
}

impl ShuffleReader {
    pub fn new(client: Arc<PartitionTransportClient>, membership: Arc<ClusterMembership>) -> Self {
        Self { client, membership }
    }

    /// Every record of the input, producers in task index order, each producer's
    /// sub-ranges in ascending order.
    pub async fn read(&self, input: &InputSpec) -> RuntimeResult<Vec<Record>> {
        let mut records = Vec::new();
        for location in &input.producers {
            for payload in self.fetch_span(location, input.span).await? {
                records.extend(decode_records(&payload)?);
            }
        }

        tracing::debug!(
            "Read {} records of {} from {} producers, span {}",
            records.len(),
            input.stage,
            input.producers.len(),
            input.span
        );
        Ok(records)
    }

    /// Raw block payloads of one producer's span.
    pub async fn fetch_span(
        &self,
        location: &BlockLocation,
        span: SubRangeSpan,
    ) -> RuntimeResult<Vec<Vec<u8>>> {
        if span.end > location.sub_range_count {
            return Err(RuntimeError::InvalidPlan(format!(
                "span {} exceeds the {} sub-ranges of {}",
                span, location.sub_range_count, location.producer
            )));
        }

        // Subscribe before the liveness check so a loss in between is not missed.
        let mut events = self.membership.subscribe();
        if !self.membership.is_alive(&location.executor) {
            return Err(RuntimeError::ExecutorLost(location.executor.clone()));
        }

        let fetch = self
            .client
            .fetch_span(location.endpoint, location.producer, span);
        tokio::pin!(fetch);

        let result = loop {
            tokio::select! {
                result = &mut fetch => break result,
                event = events.recv() => match event {
                    Ok(ClusterEvent::ExecutorLost(id)) if id == location.executor => {
                        tracing::warn!(
                            "Abandoning fetch of {} from lost executor {}",
                            location.producer,
                            id
                        );
                        self.client.close_endpoint(&location.endpoint);
                        return Err(RuntimeError::ExecutorLost(id));
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(_)) => {
                        if !self.membership.is_alive(&location.executor) {
                            return Err(RuntimeError::ExecutorLost(location.executor.clone()));
                        }
                    }
                    Err(RecvError::Closed) => break (&mut fetch).await,
                }
            }
        };

        match result {
            Err(RuntimeError::TransportConnectFailure { .. })
                if !self.membership.is_alive(&location.executor) =>
            {
                Err(RuntimeError::ExecutorLost(location.executor.clone()))
            }
            other => other,
        }
    }
}
