//! # Import pipeline
//!
//! The orchestrator of an import run. It drives one [`ImportRequest`] through
//! four phases and records the outcome in a [`JobRunState`]:
//!
//! 1. **Extracting**: every archive of the request is unpacked next to itself.
//! 2. **Partitioning**: the input directory is scanned and each matching file
//!    becomes one partition.
//! 3. **Dispatching**: partitions are run through the [`PartitionLauncher`],
//!    never more than the dispatcher's bound at once.
//! 4. **Completed** when every partition succeeded, **Failed** otherwise.
//!
//! A phase error ends the run immediately with that error as its cause. A
//! failed partition never stops its siblings.
//!
//! ```rust,no_run
//! use batch_import::core::job::{ImportRequest, RunProfile};
//! use batch_import::item::logger::LoggerWriterFactory;
//! use batch_import::loader::RecordTransformLoader;
//! use batch_import::pipeline::ImportPipeline;
//!
//! # fn example() -> Result<(), batch_import::BatchError> {
//! let loader = RecordTransformLoader::builder()
//!     .writer_factory(LoggerWriterFactory)
//!     .build()?;
//!
//! let pipeline = ImportPipeline::builder()
//!     .name("customer-import")
//!     .launcher(loader)
//!     .build()?;
//!
//! let request = ImportRequest::parse("file:///tmp/inbound/customers.zip", RunProfile::Orchestrator)?;
//! let state = pipeline.run(&request);
//! println!("{:?}: {} record(s)", state.phase(), state.write_count());
//! # Ok(())
//! # }
//! ```

use std::{
    fs,
    path::{Path, PathBuf},
    sync::Arc,
};

use log::info;

use crate::{
    BatchError,
    config::ImportConfig,
    core::{
        job::{ImportRequest, JobPhase, JobRunState, RunProfile, resolve_location},
        partition::{FileSetPartitioner, Partition, PartitionDispatcher, PartitionLauncher},
    },
    extract::{ArchiveExtractor, ZipExtractor},
};

/// Default glob selecting the files to partition.
pub const DEFAULT_INPUT_PATTERN: &str = "*.csv";

pub struct ImportPipeline {
    name: Option<String>,
    extractor: Box<dyn ArchiveExtractor>,
    partitioner: FileSetPartitioner,
    dispatcher: PartitionDispatcher,
    launcher: Arc<dyn PartitionLauncher>,
    input_pattern: String,
    input_directory: Option<PathBuf>,
}

impl ImportPipeline {
    pub fn builder() -> ImportPipelineBuilder {
        ImportPipelineBuilder::new()
    }

    /// Runs `request` to a terminal phase.
    ///
    /// Every call starts a fresh [`JobRunState`]; nothing is carried over from
    /// a previous run of the same pipeline.
    pub fn run(&self, request: &ImportRequest) -> JobRunState {
        let mut state = JobRunState::new(self.name.as_deref());

        info!(
            "Import job {} received {} archive(s): {}",
            state.name(),
            request.resources().len(),
            request.joined_resources()
        );

        if let Err(error) = self.execute(request, &mut state) {
            state.fail(error);
        }

        state
    }

    fn execute(&self, request: &ImportRequest, state: &mut JobRunState) -> Result<(), BatchError> {
        if request.profile() == RunProfile::Worker {
            return Err(BatchError::Configuration(
                "A worker request cannot be run by the import pipeline".to_string(),
            ));
        }

        state.advance(JobPhase::Extracting)?;
        let archives = request
            .resources()
            .iter()
            .map(|location| resolve_location(location))
            .collect::<Result<Vec<_>, _>>()?;
        for archive in &archives {
            let files = self.extractor.extract(archive)?;
            state.record_extraction(files);
        }

        state.advance(JobPhase::Partitioning)?;
        let partitions = self.partition(&archives)?;
        state.record_partitions(partitions.clone());

        state.advance(JobPhase::Dispatching)?;
        let dispatch = self
            .dispatcher
            .dispatch(&partitions, Arc::clone(&self.launcher));
        let failed = dispatch.failures().count();
        let total = dispatch.results.len();
        state.record_results(dispatch.results);

        if failed > 0 {
            return Err(BatchError::Step(format!(
                "{} ({} of {} partition(s) failed)",
                state.name(),
                failed,
                total
            )));
        }

        state.advance(JobPhase::Completed)
    }

    /// Partitions the input directories, indexing partitions across all of them.
    fn partition(&self, archives: &[PathBuf]) -> Result<Vec<Partition>, BatchError> {
        let directories = match &self.input_directory {
            Some(directory) => vec![canonical_directory(directory)?],
            None => input_directories(archives)?,
        };

        let mut partitions = Vec::new();
        for directory in &directories {
            let offset = partitions.len();
            let found = self.partitioner.partition(directory, &self.input_pattern)?;
            partitions.extend(found.into_iter().map(|partition| Partition {
                index: offset + partition.index,
                file: partition.file,
            }));
        }

        Ok(partitions)
    }
}

/// Distinct parent directories of the archives, in request order.
///
/// Directories are compared by canonical path: two spellings of one directory
/// are partitioned once.
fn input_directories(archives: &[PathBuf]) -> Result<Vec<PathBuf>, BatchError> {
    let mut directories: Vec<PathBuf> = Vec::new();
    for archive in archives {
        let parent = archive
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let directory = canonical_directory(parent)?;
        if !directories.contains(&directory) {
            directories.push(directory);
        }
    }
    Ok(directories)
}

fn canonical_directory(directory: &Path) -> Result<PathBuf, BatchError> {
    fs::canonicalize(directory).map_err(|e| BatchError::Partition {
        directory: directory.to_path_buf(),
        reason: e.to_string(),
    })
}

/// Builder for [`ImportPipeline`].
///
/// Only the launcher is required. The extractor defaults to [`ZipExtractor`],
/// the dispatcher to two workers, and the input pattern to `*.csv`.
pub struct ImportPipelineBuilder {
    name: Option<String>,
    extractor: Option<Box<dyn ArchiveExtractor>>,
    partitioner: FileSetPartitioner,
    dispatcher: PartitionDispatcher,
    launcher: Option<Arc<dyn PartitionLauncher>>,
    input_pattern: String,
    input_directory: Option<PathBuf>,
}

impl Default for ImportPipelineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ImportPipelineBuilder {
    pub fn new() -> Self {
        Self {
            name: None,
            extractor: None,
            partitioner: FileSetPartitioner::new(),
            dispatcher: PartitionDispatcher::default(),
            launcher: None,
            input_pattern: DEFAULT_INPUT_PATTERN.to_string(),
            input_directory: None,
        }
    }

    /// Applies the dispatcher bound, extractor prefix and input selection of `config`.
    ///
    /// # Errors
    /// `BatchError::Configuration` when the configuration is invalid.
    pub fn config(mut self, config: &ImportConfig) -> Result<Self, BatchError> {
        config.validate()?;
        self.dispatcher = PartitionDispatcher::new(config.max_workers)?;
        self.extractor = Some(Box::new(
            ZipExtractor::new().metadata_prefix(config.metadata_prefix.as_str()),
        ));
        self.input_pattern = config.input_pattern.clone();
        self.input_directory = config.input_directory.clone();
        Ok(self)
    }

    /// Names the runs of this pipeline; a random name is generated otherwise.
    pub fn name(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }

    pub fn extractor<E: ArchiveExtractor + 'static>(mut self, extractor: E) -> Self {
        self.extractor = Some(Box::new(extractor));
        self
    }

    pub fn partitioner(mut self, partitioner: FileSetPartitioner) -> Self {
        self.partitioner = partitioner;
        self
    }

    pub fn dispatcher(mut self, dispatcher: PartitionDispatcher) -> Self {
        self.dispatcher = dispatcher;
        self
    }

    pub fn launcher<L: PartitionLauncher + 'static>(mut self, launcher: L) -> Self {
        self.launcher = Some(Arc::new(launcher));
        self
    }

    pub fn input_pattern(mut self, pattern: &str) -> Self {
        self.input_pattern = pattern.to_string();
        self
    }

    /// Partitions this directory instead of the archives' own directories.
    pub fn input_directory<P: Into<PathBuf>>(mut self, directory: P) -> Self {
        self.input_directory = Some(directory.into());
        self
    }

    /// # Errors
    /// `BatchError::Configuration` when no launcher was given.
    pub fn build(self) -> Result<ImportPipeline, BatchError> {
        let launcher = self
            .launcher
            .ok_or_else(|| BatchError::Configuration("A partition launcher is mandatory".to_string()))?;

        let extractor: Box<dyn ArchiveExtractor> = match self.extractor {
            Some(extractor) => extractor,
            None => Box::new(ZipExtractor::new()),
        };

        Ok(ImportPipeline {
            name: self.name,
            extractor,
            partitioner: self.partitioner,
            dispatcher: self.dispatcher,
            launcher,
            input_pattern: self.input_pattern,
            input_directory: self.input_directory,
        })
    }
}
