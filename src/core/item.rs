use crate::{core::partition::Partition, error::BatchError};

/// Result of a single read: `Ok(None)` once the source is exhausted.
pub type ItemReaderResult<I> = Result<Option<I>, BatchError>;

/// Result of writing one chunk.
pub type ItemWriterResult = Result<(), BatchError>;

/// Retrieves input for a step, one item at a time.
pub trait ItemReader<I> {
    fn read(&self) -> ItemReaderResult<I>;
}

/// Writes the output of a step, one chunk at a time.
///
/// A call to `write` is the unit of commit: an implementation must either
/// persist every item of the slice or none of them.
pub trait ItemWriter<O> {
    fn write(&self, items: &[O]) -> ItemWriterResult;
    fn flush(&self) -> ItemWriterResult {
        Ok(())
    }
    fn open(&self) -> ItemWriterResult {
        Ok(())
    }
    fn close(&self) -> ItemWriterResult {
        Ok(())
    }
}

/// Creates one writer per partition run, so concurrent partitions never share
/// a connection or a transaction.
pub trait ItemWriterFactory<O>: Send + Sync {
    fn create(&self, partition: &Partition) -> Result<Box<dyn ItemWriter<O>>, BatchError>;
}

impl<O, F> ItemWriterFactory<O> for F
where
    F: Fn(&Partition) -> Result<Box<dyn ItemWriter<O>>, BatchError> + Send + Sync,
{
    fn create(&self, partition: &Partition) -> Result<Box<dyn ItemWriter<O>>, BatchError> {
        self(partition)
    }
}
