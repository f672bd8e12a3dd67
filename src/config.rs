//! Configuration of the import job

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::{
    BatchError,
    core::{partition::PartitionDispatcher, step::DEFAULT_CHUNK_SIZE},
    extract::DEFAULT_METADATA_PREFIX,
    pipeline::DEFAULT_INPUT_PATTERN,
};

/// Default directory scanned for inbound archives
pub const DEFAULT_INBOUND_DIRECTORY: &str = "/tmp/inbound";

/// Settings of the import job. Every field has a default, so a JSON file only
/// needs the values it overrides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImportConfig {
    /// Maximum number of partitions loaded at the same time
    pub max_workers: usize,
    /// Number of records committed together
    pub chunk_size: usize,
    /// Glob selecting the files to partition
    pub input_pattern: String,
    /// Directory to partition; the archives' own directories when absent
    pub input_directory: Option<PathBuf>,
    /// Field delimiter of the input files
    pub delimiter: char,
    /// Archive entries starting with this prefix are not extracted
    pub metadata_prefix: String,
    /// Target table
    pub table: String,
    /// SQLx connection URL of the sink
    pub database_url: String,
    /// Directory the poller scans for archives
    pub inbound_directory: PathBuf,
    /// Remote folder synchronized into the inbound directory before each poll
    pub ftp: Option<FtpConfig>,
}

/// Connection settings of the remote inbound folder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FtpConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub remote_folder: String,
    pub passive_mode: bool,
}

impl Default for FtpConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: 21,
            username: String::new(),
            password: String::new(),
            remote_folder: String::new(),
            passive_mode: true,
        }
    }
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            max_workers: PartitionDispatcher::DEFAULT_MAX_WORKERS,
            chunk_size: DEFAULT_CHUNK_SIZE,
            input_pattern: DEFAULT_INPUT_PATTERN.to_string(),
            input_directory: None,
            delimiter: ',',
            metadata_prefix: DEFAULT_METADATA_PREFIX.to_string(),
            table: "CUSTOMER".to_string(),
            database_url: "sqlite://customers.db?mode=rwc".to_string(),
            inbound_directory: PathBuf::from(DEFAULT_INBOUND_DIRECTORY),
            ftp: None,
        }
    }
}

impl ImportConfig {
    /// Loads and validates a JSON configuration file.
    pub fn load(path: &Path) -> Result<Self, BatchError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            BatchError::Configuration(format!(
                "Failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        let config: ImportConfig = serde_json::from_str(&content).map_err(|e| {
            BatchError::Configuration(format!(
                "Failed to parse config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Validates every field and reports all problems at once.
    pub fn validate(&self) -> Result<(), BatchError> {
        let mut errors: Vec<String> = Vec::new();

        if self.max_workers == 0 {
            errors.push("max_workers must be positive".to_string());
        }
        if self.chunk_size == 0 {
            errors.push("chunk_size must be positive".to_string());
        }
        if self.input_pattern.trim().is_empty() {
            errors.push("input_pattern must not be empty".to_string());
        }
        if !self.delimiter.is_ascii() {
            errors.push("delimiter must be a single ASCII character".to_string());
        }
        // Interpolated into INSERT statements
        if self.table.is_empty()
            || !self
                .table
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            errors.push("table must be a plain SQL identifier".to_string());
        }
        if let Some(ftp) = &self.ftp {
            if ftp.host.trim().is_empty() {
                errors.push("ftp.host must not be empty".to_string());
            }
            if ftp.username.is_empty() {
                errors.push("ftp.username must not be empty".to_string());
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(BatchError::Configuration(errors.join("; ")))
        }
    }

    /// The delimiter as the byte the CSV reader expects.
    pub fn delimiter_byte(&self) -> u8 {
        // validate() guarantees ASCII
        self.delimiter as u8
    }
}
