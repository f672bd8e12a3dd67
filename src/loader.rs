use std::path::Path;

use log::info;

use crate::{
    BatchError,
    core::{
        item::ItemWriterFactory,
        partition::{Partition, PartitionLauncher, StepExecutionResult},
        step::{DEFAULT_CHUNK_SIZE, Step, StepBuilder, StepExecution},
    },
    domain::CustomerRecord,
    item::csv::customer_reader::CustomerItemReaderBuilder,
};

/// Loads one partition file into the sink, chunk by chunk.
///
/// Every run reads its own file and writes through a writer obtained from the
/// factory for that run only. The first malformed row or failed chunk ends the
/// run; chunks committed before it are kept.
pub struct RecordTransformLoader {
    writer_factory: Box<dyn ItemWriterFactory<CustomerRecord>>,
    chunk_size: usize,
    delimiter: u8,
}

impl RecordTransformLoader {
    pub fn builder() -> RecordTransformLoaderBuilder {
        RecordTransformLoaderBuilder::new()
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Loads a single file as partition 0.
    pub fn run(&self, file: &Path) -> StepExecutionResult {
        self.run_partition(&Partition {
            index: 0,
            file: file.to_path_buf(),
        })
    }

    /// Loads the file of `partition` and reports how many records were written.
    pub fn run_partition(&self, partition: &Partition) -> StepExecutionResult {
        let name = format!("load-partition-{}", partition.index);
        let mut step_execution = StepExecution::new(&name);

        match self.execute(partition, &name, &mut step_execution) {
            Ok(()) => {
                info!(
                    "Loaded {} record(s) from {} in {} chunk(s)",
                    step_execution.write_count,
                    partition.file.display(),
                    step_execution.commit_count
                );
                StepExecutionResult::success(partition.index, step_execution.write_count)
            }
            Err(error) => {
                StepExecutionResult::failed(partition.index, step_execution.write_count, error)
            }
        }
    }

    fn execute(
        &self,
        partition: &Partition,
        name: &str,
        step_execution: &mut StepExecution,
    ) -> Result<(), BatchError> {
        let reader = CustomerItemReaderBuilder::new()
            .delimiter(self.delimiter)
            .from_path(&partition.file)?;
        let writer = self.writer_factory.create(partition)?;

        let step = StepBuilder::new()
            .name(name)
            .reader(&reader)
            .writer(writer.as_ref())
            .chunk(self.chunk_size)
            .build()?;

        step.execute(step_execution)
    }
}

/// Runs partitions in the calling process.
impl PartitionLauncher for RecordTransformLoader {
    fn launch(&self, partition: &Partition) -> Result<StepExecutionResult, BatchError> {
        Ok(self.run_partition(partition))
    }
}

pub struct RecordTransformLoaderBuilder {
    writer_factory: Option<Box<dyn ItemWriterFactory<CustomerRecord>>>,
    chunk_size: usize,
    delimiter: u8,
}

impl Default for RecordTransformLoaderBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordTransformLoaderBuilder {
    pub fn new() -> Self {
        Self {
            writer_factory: None,
            chunk_size: DEFAULT_CHUNK_SIZE,
            delimiter: b',',
        }
    }

    /// Sets the factory creating one writer per run. Required.
    pub fn writer_factory<F>(mut self, writer_factory: F) -> Self
    where
        F: ItemWriterFactory<CustomerRecord> + 'static,
    {
        self.writer_factory = Some(Box::new(writer_factory));
        self
    }

    pub fn chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn delimiter(mut self, delimiter: u8) -> Self {
        self.delimiter = delimiter;
        self
    }

    /// # Errors
    /// `BatchError::Configuration` without a writer factory or with a zero chunk size.
    pub fn build(self) -> Result<RecordTransformLoader, BatchError> {
        let writer_factory = self.writer_factory.ok_or_else(|| {
            BatchError::Configuration("A writer factory is mandatory".to_string())
        })?;
        if self.chunk_size == 0 {
            return Err(BatchError::Configuration(
                "Chunk size must be greater than zero".to_string(),
            ));
        }

        Ok(RecordTransformLoader {
            writer_factory,
            chunk_size: self.chunk_size,
            delimiter: self.delimiter,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::{
        fmt::Write as _,
        fs,
        sync::{Arc, Mutex},
    };

    use tempfile::TempDir;

    use super::*;
    use crate::core::{item::ItemWriter, step::StepStatus};

    /// Records every chunk it receives; fails on the chunk number `fail_on`.
    struct ChunkRecorder {
        chunks: Arc<Mutex<Vec<usize>>>,
        fail_on: Option<usize>,
    }

    impl ItemWriter<CustomerRecord> for ChunkRecorder {
        fn write(&self, items: &[CustomerRecord]) -> Result<(), BatchError> {
            let mut chunks = self.chunks.lock().unwrap();
            if self.fail_on == Some(chunks.len()) {
                return Err(BatchError::Write("sink unavailable".to_string()));
            }
            chunks.push(items.len());
            Ok(())
        }
    }

    fn recorder_factory(
        chunks: &Arc<Mutex<Vec<usize>>>,
        fail_on: Option<usize>,
    ) -> impl ItemWriterFactory<CustomerRecord> + use<> {
        let chunks = Arc::clone(chunks);
        move |_: &Partition| -> Result<Box<dyn ItemWriter<CustomerRecord>>, BatchError> {
            Ok(Box::new(ChunkRecorder {
                chunks: Arc::clone(&chunks),
                fail_on,
            }))
        }
    }

    fn customers_file(dir: &Path, rows: usize) -> std::path::PathBuf {
        let mut content = String::from("firstName,lastName,address,city,zip,phone\n");
        for i in 0..rows {
            writeln!(content, "First{i},Last{i},{i} Main St,Springfield,12345,555-{i:04}").unwrap();
        }
        let path = dir.join("customers.csv");
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn writes_401_rows_as_two_chunks() {
        let temp_dir = TempDir::new().unwrap();
        let file = customers_file(temp_dir.path(), 401);
        let chunks = Arc::new(Mutex::new(Vec::new()));

        let loader = RecordTransformLoader::builder()
            .writer_factory(recorder_factory(&chunks, None))
            .build()
            .unwrap();
        let result = loader.run(&file);

        assert_eq!(result.status, StepStatus::Success);
        assert_eq!(result.write_count, 401);
        assert_eq!(*chunks.lock().unwrap(), vec![400, 1]);
    }

    #[test]
    fn malformed_row_fails_with_its_row_number() {
        let temp_dir = TempDir::new().unwrap();
        let mut content = String::from("firstName,lastName,address,city,zip,phone\n");
        for i in 1..=49 {
            writeln!(content, "F{i},L{i},A,C,Z,P{i}").unwrap();
        }
        content.push_str("F50,L50,A,C,Z\n");
        let file = temp_dir.path().join("bad.csv");
        fs::write(&file, content).unwrap();
        let chunks = Arc::new(Mutex::new(Vec::new()));

        let loader = RecordTransformLoader::builder()
            .writer_factory(recorder_factory(&chunks, None))
            .build()
            .unwrap();
        let result = loader.run(&file);

        assert_eq!(result.status, StepStatus::Failed);
        assert!(matches!(result.error, Some(BatchError::Parse { row: 50, .. })));
        assert!(chunks.lock().unwrap().is_empty());
    }

    #[test]
    fn failed_chunk_keeps_earlier_chunks() {
        let temp_dir = TempDir::new().unwrap();
        let file = customers_file(temp_dir.path(), 25);
        let chunks = Arc::new(Mutex::new(Vec::new()));

        let loader = RecordTransformLoader::builder()
            .writer_factory(recorder_factory(&chunks, Some(1)))
            .chunk_size(10)
            .build()
            .unwrap();
        let result = loader.run(&file);

        assert!(!result.is_success());
        assert_eq!(result.write_count, 10);
        assert!(matches!(result.error, Some(BatchError::Write(_))));
        assert_eq!(*chunks.lock().unwrap(), vec![10]);
    }

    #[test]
    fn missing_file_fails_the_partition() {
        let chunks = Arc::new(Mutex::new(Vec::new()));
        let loader = RecordTransformLoader::builder()
            .writer_factory(recorder_factory(&chunks, None))
            .build()
            .unwrap();

        let result = loader.run_partition(&Partition {
            index: 7,
            file: "/nonexistent/customers.csv".into(),
        });

        assert_eq!(result.partition_index, 7);
        assert!(matches!(result.error, Some(BatchError::Io(_))));
    }

    #[test]
    fn builder_requires_a_writer_factory() {
        let result = RecordTransformLoader::builder().build();
        assert!(matches!(result, Err(BatchError::Configuration(_))));

        let chunks = Arc::new(Mutex::new(Vec::new()));
        let result = RecordTransformLoader::builder()
            .writer_factory(recorder_factory(&chunks, None))
            .chunk_size(0)
            .build();
        assert!(matches!(result, Err(BatchError::Configuration(_))));
    }
}
