use std::time::{Duration, Instant};

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::BatchError;

use super::{
    build_name,
    item::{ItemReader, ItemWriter},
};

/// Number of items committed together when no chunk size is configured.
pub const DEFAULT_CHUNK_SIZE: usize = 400;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepStatus {
    /// The step has been created but not executed yet.
    Starting,
    /// The step is reading and writing chunks.
    Started,
    /// Every chunk was written.
    Success,
    /// A read or a write failed; chunks written before the failure stay committed.
    Failed,
}

#[derive(Debug, PartialEq)]
enum ChunkStatus {
    /// The chunk reached its configured size, more items may follow.
    Full,
    /// The reader is exhausted.
    Finished,
}

/// Execution details of one step run.
#[derive(Debug)]
pub struct StepExecution {
    /// Unique identifier for this step run
    pub id: Uuid,
    /// Human-readable name for the step
    pub name: String,
    /// Current status of the step execution
    pub status: StepStatus,
    pub start_time: Option<Instant>,
    pub end_time: Option<Instant>,
    pub duration: Duration,
    /// Number of items successfully read
    pub read_count: usize,
    /// Number of items written in committed chunks
    pub write_count: usize,
    /// Number of chunks committed by the writer
    pub commit_count: usize,
}

impl StepExecution {
    pub fn new(name: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.to_string(),
            status: StepStatus::Starting,
            start_time: None,
            end_time: None,
            duration: Duration::default(),
            read_count: 0,
            write_count: 0,
            commit_count: 0,
        }
    }
}

pub trait Step {
    /// Executes the step.
    ///
    /// # Returns
    /// - `Ok(())`: the step completed successfully
    /// - `Err(BatchError)`: the error that stopped the step; `step_execution`
    ///   still holds the counters reached before the failure
    fn execute(&self, step_execution: &mut StepExecution) -> Result<(), BatchError>;

    fn get_name(&self) -> &str;
}

/// A step that reads items one at a time and writes them in chunks.
///
/// The step is fail-fast: the first read error or write error stops it.
/// Each chunk is handed to the writer in a single `write` call, so a failure
/// loses at most the chunk being written.
pub struct ChunkOrientedStep<'a, I> {
    name: String,
    /// Component responsible for reading items from the source
    reader: &'a dyn ItemReader<I>,
    /// Component responsible for writing items to the destination
    writer: &'a dyn ItemWriter<I>,
    /// Number of items to write in each chunk
    chunk_size: usize,
}

impl<I> Step for ChunkOrientedStep<'_, I> {
    fn execute(&self, step_execution: &mut StepExecution) -> Result<(), BatchError> {
        let start_time = Instant::now();
        step_execution.start_time = Some(start_time);
        step_execution.status = StepStatus::Started;

        info!(
            "Start of step: {}, id: {}",
            step_execution.name, step_execution.id
        );

        let result = self
            .writer
            .open()
            .and_then(|()| self.process_chunks(step_execution));

        if let Err(error) = self.writer.close() {
            warn!("Non-fatal error while closing writer: {}", error);
        }

        step_execution.status = match result {
            Ok(()) => StepStatus::Success,
            Err(_) => StepStatus::Failed,
        };
        step_execution.end_time = Some(Instant::now());
        step_execution.duration = start_time.elapsed();

        info!(
            "End of step: {}, id: {}, status: {:?}, written: {}",
            step_execution.name, step_execution.id, step_execution.status, step_execution.write_count
        );

        result
    }

    fn get_name(&self) -> &str {
        &self.name
    }
}

impl<I> ChunkOrientedStep<'_, I> {
    fn process_chunks(&self, step_execution: &mut StepExecution) -> Result<(), BatchError> {
        loop {
            let (items, status) = self.read_chunk(step_execution)?;

            self.write_chunk(step_execution, &items)?;

            if status == ChunkStatus::Finished {
                return Ok(());
            }
        }
    }

    /// Reads up to `chunk_size` items.
    ///
    /// Stops on a full chunk, on the end of input, or on the first read error.
    fn read_chunk(
        &self,
        step_execution: &mut StepExecution,
    ) -> Result<(Vec<I>, ChunkStatus), BatchError> {
        debug!("Start reading chunk");

        let mut read_items = Vec::with_capacity(self.chunk_size);

        while read_items.len() < self.chunk_size {
            match self.reader.read() {
                Ok(Some(item)) => {
                    read_items.push(item);
                    step_execution.read_count += 1;
                }
                Ok(None) => return Ok((read_items, ChunkStatus::Finished)),
                Err(error) => {
                    warn!("Error reading item: {}", error);
                    return Err(error);
                }
            }
        }

        Ok((read_items, ChunkStatus::Full))
    }

    fn write_chunk(&self, step_execution: &mut StepExecution, items: &[I]) -> Result<(), BatchError> {
        if items.is_empty() {
            debug!("No items to write, skipping write call");
            return Ok(());
        }

        debug!("Writing chunk of {} items", items.len());

        match self.writer.write(items).and_then(|()| self.writer.flush()) {
            Ok(()) => {
                step_execution.write_count += items.len();
                step_execution.commit_count += 1;
                Ok(())
            }
            Err(error) => {
                warn!("Error writing chunk of {} items: {}", items.len(), error);
                Err(error)
            }
        }
    }
}

pub struct StepBuilder<'a, I> {
    /// Name of the step (generated randomly if not specified)
    name: Option<String>,
    reader: Option<&'a dyn ItemReader<I>>,
    writer: Option<&'a dyn ItemWriter<I>>,
    chunk_size: usize,
}

impl<I> Default for StepBuilder<'_, I> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a, I> StepBuilder<'a, I> {
    pub fn new() -> Self {
        Self {
            name: None,
            reader: None,
            writer: None,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    pub fn name(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }

    pub fn reader(mut self, reader: &'a dyn ItemReader<I>) -> Self {
        self.reader = Some(reader);
        self
    }

    pub fn writer(mut self, writer: &'a dyn ItemWriter<I>) -> Self {
        self.writer = Some(writer);
        self
    }

    pub fn chunk(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn build(self) -> Result<ChunkOrientedStep<'a, I>, BatchError> {
        let reader = self
            .reader
            .ok_or_else(|| BatchError::Configuration("Reader is required for building a step".to_string()))?;
        let writer = self
            .writer
            .ok_or_else(|| BatchError::Configuration("Writer is required for building a step".to_string()))?;

        if self.chunk_size == 0 {
            return Err(BatchError::Configuration(
                "Chunk size must be greater than zero".to_string(),
            ));
        }

        Ok(ChunkOrientedStep {
            name: self.name.unwrap_or_else(build_name),
            reader,
            writer,
            chunk_size: self.chunk_size,
        })
    }
}
