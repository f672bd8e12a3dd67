use std::fmt::Debug;

use log::info;

use crate::{
    BatchError,
    core::{
        item::{ItemWriter, ItemWriterFactory},
        partition::Partition,
    },
};

/// Logs every record instead of storing it.
#[derive(Default)]
pub struct LoggerWriter {
    partition: Option<usize>,
}

impl<T> ItemWriter<T> for LoggerWriter
where
    T: Debug,
{
    fn write(&self, items: &[T]) -> Result<(), BatchError> {
        match self.partition {
            Some(index) => items
                .iter()
                .for_each(|item| info!("Partition {} record:{:?}", index, item)),
            None => items.iter().for_each(|item| info!("Record:{:?}", item)),
        }
        Ok(())
    }
}

/// Hands out a [`LoggerWriter`] per partition, for dry runs.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggerWriterFactory;

impl<T: Debug + 'static> ItemWriterFactory<T> for LoggerWriterFactory {
    fn create(&self, partition: &Partition) -> Result<Box<dyn ItemWriter<T>>, BatchError> {
        Ok(Box::new(LoggerWriter {
            partition: Some(partition.index),
        }))
    }
}
