use super::partitioner::HashPartitioner;
use super::store::BlockStore;
use super::types::{BlockId, Record};
use super::encode_records;
use crate::error::{RuntimeError, RuntimeResult};
use crate::scheduler::types::TaskGroupId;

/// Accumulates a task's drained output batches, bucketed by sub-range, and commits one
/// block per sub-range when the task finishes.
pub struct ShuffleWriter {
    producer: TaskGroupId,
    partitioner: HashPartitioner,
    buckets: Vec<Vec<Record>>,
    records: usize,
}

/// What a commit wrote.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommitSummary {
    pub blocks: usize,
    pub records: usize,
    pub bytes: usize,
}

impl ShuffleWriter {
    pub fn new(producer: TaskGroupId, partitioner: HashPartitioner) -> Self {
        let buckets = (0..partitioner.sub_range_count())
            .map(|_| Vec::new())
            .collect();
        Self {
            producer,
            partitioner,
            buckets,
            records: 0,
        }
    }

    pub fn partitioner(&self) -> &HashPartitioner {
        &self.partitioner
    }

    /// Partitions one drained batch and appends it behind earlier batches.
    pub fn write_batch(&mut self, batch: Vec<Record>) {
        if batch.is_empty() {
            return;
        }
        self.records += batch.len();

        let partitioned = self.partitioner.partition(batch, |record| record.key.as_str());
        for (bucket, records) in self.buckets.iter_mut().zip(partitioned) {
            bucket.extend(records);
        }
    }

    pub fn records_written(&self) -> usize {
        self.records
    }

    /// Encodes every sub-range (empty ones too) and commits it.
    ///
    /// Encoding is spread over at most `ser_threads` blocking workers. Blocks are committed
    /// only after all of them encoded successfully and each fits in `max_block_bytes`, so
    /// nothing is committed that consumers could not fetch.
    pub async fn commit(
        self,
        store: &dyn BlockStore,
        ser_threads: usize,
        max_block_bytes: u32,
    ) -> RuntimeResult<CommitSummary> {
        let producer = self.producer;
        let records = self.records;
        let encoded = encode_buckets(self.buckets, ser_threads.max(1)).await?;

        if let Some((sub_range, payload)) = encoded
            .iter()
            .enumerate()
            .find(|(_, payload)| payload.len() as u64 > max_block_bytes as u64)
        {
            return Err(RuntimeError::BlockTooLarge {
                block: BlockId::new(producer, sub_range as u32),
                bytes: payload.len(),
                limit: max_block_bytes,
            });
        }

        let mut bytes = 0;
        for (sub_range, payload) in encoded.into_iter().enumerate() {
            bytes += payload.len();
            store
                .commit(BlockId::new(producer, sub_range as u32), payload)
                .await?;
        }

        let summary = CommitSummary {
            blocks: self.partitioner.sub_range_count() as usize,
            records,
            bytes,
        };
        tracing::debug!(
            "Committed {} blocks for {} ({} records, {} bytes)",
            summary.blocks,
            producer,
            summary.records,
            summary.bytes
        );
        Ok(summary)
    }
}

async fn encode_buckets(
    buckets: Vec<Vec<Record>>,
    ser_threads: usize,
) -> RuntimeResult<Vec<Vec<u8>>> {
    let chunk_size = buckets.len().div_ceil(ser_threads).max(1);

    let mut chunks: Vec<Vec<Vec<Record>>> = Vec::new();
    let mut iter = buckets.into_iter().peekable();
    while iter.peek().is_some() {
        chunks.push(iter.by_ref().take(chunk_size).collect());
    }

    let handles: Vec<_> = chunks
        .into_iter()
        .map(|chunk| {
            tokio::task::spawn_blocking(move || {
                chunk
                    .iter()
                    .map(|bucket| encode_records(bucket))
                    .collect::<RuntimeResult<Vec<Vec<u8>>>>()
            })
        })
        .collect();

    let mut encoded = Vec::new();
    for handle in handles {
        let chunk = handle
            .await
            .map_err(|e| RuntimeError::Codec(format!("block encoder panicked: {}", e)))??;
        encoded.extend(chunk);
    }
    Ok(encoded)
}
