//! Shared fixtures of the integration tests
#![allow(dead_code)]

use std::{
    fmt::Write as _,
    fs::File,
    io::Write,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

use batch_import::{
    BatchError,
    core::{item::ItemWriter, item::ItemWriterFactory, partition::Partition},
    domain::CustomerRecord,
};
use zip::{ZipWriter, write::SimpleFileOptions};

pub const HEADER: &str = "firstName,lastName,address,city,zip,phone";

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Header line followed by `rows` well-formed customers, phone numbers prefixed by `tag`.
pub fn customers_csv(tag: &str, rows: usize) -> String {
    let mut content = format!("{HEADER}\n");
    for i in 0..rows {
        writeln!(
            content,
            "First{i},Last{i},{i} Main Street,Springfield,12345,{tag}-{i:04}"
        )
        .unwrap();
    }
    content
}

/// Writes a zip archive holding `entries` in the given order.
pub fn write_zip(path: &Path, entries: &[(&str, String)]) -> PathBuf {
    let mut writer = ZipWriter::new(File::create(path).unwrap());
    for (name, content) in entries {
        writer
            .start_file(*name, SimpleFileOptions::default())
            .unwrap();
        writer.write_all(content.as_bytes()).unwrap();
    }
    writer.finish().unwrap();
    path.to_path_buf()
}

/// Chunks received by one writer, keyed by the partition's file name.
#[derive(Debug, Clone)]
pub struct WrittenChunk {
    pub file_name: String,
    pub records: Vec<CustomerRecord>,
}

/// Collects every chunk written by any partition.
#[derive(Default, Clone)]
pub struct RecordingSink {
    chunks: Arc<Mutex<Vec<WrittenChunk>>>,
}

impl RecordingSink {
    pub fn chunks(&self) -> Vec<WrittenChunk> {
        self.chunks.lock().unwrap().clone()
    }

    pub fn record_count(&self) -> usize {
        self.chunks().iter().map(|chunk| chunk.records.len()).sum()
    }

    pub fn chunk_sizes(&self, file_name: &str) -> Vec<usize> {
        self.chunks()
            .iter()
            .filter(|chunk| chunk.file_name == file_name)
            .map(|chunk| chunk.records.len())
            .collect()
    }
}

struct RecordingWriter {
    file_name: String,
    chunks: Arc<Mutex<Vec<WrittenChunk>>>,
}

impl ItemWriter<CustomerRecord> for RecordingWriter {
    fn write(&self, items: &[CustomerRecord]) -> Result<(), BatchError> {
        self.chunks.lock().unwrap().push(WrittenChunk {
            file_name: self.file_name.clone(),
            records: items.to_vec(),
        });
        Ok(())
    }
}

impl ItemWriterFactory<CustomerRecord> for RecordingSink {
    fn create(&self, partition: &Partition) -> Result<Box<dyn ItemWriter<CustomerRecord>>, BatchError> {
        let file_name = partition
            .file
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();

        Ok(Box::new(RecordingWriter {
            file_name,
            chunks: Arc::clone(&self.chunks),
        }))
    }
}
