use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
/// Batch error
pub enum BatchError {
    /// The archive could not be opened, is not a valid zip, or an entry could not be written.
    #[error("Extraction of {archive} failed: {reason}")]
    Extraction { archive: PathBuf, reason: String },

    /// The partition input directory could not be read.
    #[error("Partitioning of {directory} failed: {reason}")]
    Partition { directory: PathBuf, reason: String },

    /// A delimited row could not be mapped to a record. `row` is 1-based, header excluded.
    #[error("Parse error at row {row}: {reason}")]
    Parse { row: usize, reason: String },

    /// A chunk could not be written to the sink.
    #[error("Write error: {0}")]
    Write(String),

    /// A partition worker could not be launched at all.
    #[error("Dispatch of partition {index} failed: {reason}")]
    Dispatch { index: usize, reason: String },

    /// A partition worker process ran and reported a failure.
    #[error("Partition {index} failed in its worker: {reason}")]
    Worker { index: usize, reason: String },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Step {0} failed")]
    Step(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
