use crate::error::{RuntimeError, RuntimeResult};
use crate::output::OutputCollector;
use crate::output::buffer::OutputBuffer;
use crate::scheduler::types::{InputSpec, JobId, TaskGroupId, TaskGroupLaunch};
use crate::shuffle::partitioner::HashPartitioner;
use crate::shuffle::reader::ShuffleReader;
use crate::shuffle::types::Record;
use crate::shuffle::writer::ShuffleWriter;

use std::sync::{Mutex, MutexGuard};

/// What a stage handler sees of one attempt: its inputs and its output.
///
/// Records emitted through [`emit`](Self::emit) are staged in an `OutputBuffer`.
/// [`flush`](Self::flush) marks a batch boundary and moves the staged batch to the
/// partitioned writer; the runtime flushes once more after the handler returns.
pub struct TaskContext {
    job_id: JobId,
    task_group: TaskGroupId,
    attempt: u32,
    inputs: Vec<InputSpec>,
    reader: ShuffleReader,
    output: OutputBuffer<Record>,
    partitioner: HashPartitioner,
    writer: Mutex<ShuffleWriter>,
}

impl TaskContext {
    pub fn new(launch: &TaskGroupLaunch, reader: ShuffleReader) -> Self {
        Self {
            job_id: launch.job_id.clone(),
            task_group: launch.task_group,
            attempt: launch.attempt,
            inputs: launch.inputs.clone(),
            reader,
            output: OutputBuffer::new(),
            partitioner: launch.output,
            writer: Mutex::new(ShuffleWriter::new(launch.task_group, launch.output)),
        }
    }

    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }

    pub fn task_group(&self) -> TaskGroupId {
        self.task_group
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn input_count(&self) -> usize {
        self.inputs.len()
    }

    pub fn emit(&self, record: Record) {
        self.output.emit(record);
    }

    /// The attempt's output collector. It has a single destination.
    pub fn output(&self) -> &dyn OutputCollector<Record> {
        &self.output
    }

    /// Drains the staged batch into the writer. Returns how many records it moved.
    pub fn flush(&self) -> usize {
        let batch = self.output.drain_and_reset();
        let count = batch.len();
        self.writer().write_batch(batch);
        count
    }

    /// Records of the `index`-th parent stage that belong to this task group.
    pub async fn read_input(&self, index: usize) -> RuntimeResult<Vec<Record>> {
        let input = self.inputs.get(index).ok_or_else(|| {
            RuntimeError::InvalidPlan(format!(
                "{} has {} inputs, no input {}",
                self.task_group,
                self.inputs.len(),
                index
            ))
        })?;
        self.reader.read(input).await
    }

    /// Records of every parent stage, in parent order.
    pub async fn read_all_inputs(&self) -> RuntimeResult<Vec<Record>> {
        let mut records = Vec::new();
        for input in &self.inputs {
            records.extend(self.reader.read(input).await?);
        }
        Ok(records)
    }

    /// Takes the writer with everything flushed so far, leaving an empty one behind.
    pub(crate) fn take_writer(&self) -> ShuffleWriter {
        std::mem::replace(
            &mut *self.writer(),
            ShuffleWriter::new(self.task_group, self.partitioner),
        )
    }

    fn writer(&self) -> MutexGuard<'_, ShuffleWriter> {
        self.writer
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
