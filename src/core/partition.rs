//! # Partitioning
//!
//! A partitioned step splits its input into independent units of work, one
//! [`Partition`] per input file, and runs one worker per partition.
//!
//! - [`FileSetPartitioner`] discovers the files of a directory matching a glob.
//! - [`PartitionDispatcher`] runs the workers with bounded concurrency and
//!   collects one [`StepExecutionResult`] per partition.
//! - [`PartitionLauncher`] is the seam between the dispatcher and whatever runs
//!   a partition: a thread of the current process or a separate process.

use std::{
    fs,
    path::{Path, PathBuf},
    sync::Arc,
};

use log::{debug, error, info, warn};
use serde::Serialize;
use tokio::{
    runtime::Builder,
    sync::Semaphore,
    task::{self, JoinError, JoinSet},
};

use crate::BatchError;

use super::step::StepStatus;

/// One independently processable input file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Partition {
    /// Zero-based position of the partition in the partition set
    pub index: usize,
    /// Canonical path of the input file
    pub file: PathBuf,
}

/// Outcome of one partition worker.
#[derive(Debug)]
pub struct StepExecutionResult {
    pub partition_index: usize,
    pub status: StepStatus,
    /// Items written in committed chunks, also set when the partition failed
    pub write_count: usize,
    pub error: Option<BatchError>,
}

impl StepExecutionResult {
    pub fn success(partition_index: usize, write_count: usize) -> Self {
        Self {
            partition_index,
            status: StepStatus::Success,
            write_count,
            error: None,
        }
    }

    pub fn failed(partition_index: usize, write_count: usize, error: BatchError) -> Self {
        Self {
            partition_index,
            status: StepStatus::Failed,
            write_count,
            error: Some(error),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == StepStatus::Success
    }
}

/// Discovers the input files of a directory and assigns one partition to each.
#[derive(Debug, Default, Clone, Copy)]
pub struct FileSetPartitioner;

impl FileSetPartitioner {
    pub fn new() -> Self {
        Self
    }

    /// Lists the regular files of `directory` whose name matches `pattern`.
    ///
    /// Partitions are sorted by file name and indexed from zero. Files are
    /// recorded by their canonical path, so one file always has one spelling.
    /// A directory without matching files yields an empty list.
    ///
    /// # Errors
    /// `BatchError::Partition` when the directory cannot be read.
    pub fn partition(&self, directory: &Path, pattern: &str) -> Result<Vec<Partition>, BatchError> {
        let partition_error = |error: std::io::Error| BatchError::Partition {
            directory: directory.to_path_buf(),
            reason: error.to_string(),
        };

        let mut files = Vec::new();
        for entry in fs::read_dir(directory).map_err(partition_error)? {
            let entry = entry.map_err(partition_error)?;
            if !entry.file_type().map_err(partition_error)?.is_file() {
                continue;
            }

            let file_name = entry.file_name();
            if matches_pattern(&file_name.to_string_lossy(), pattern) {
                files.push(fs::canonicalize(entry.path()).map_err(partition_error)?);
            } else {
                debug!("Ignoring {}: does not match {}", entry.path().display(), pattern);
            }
        }

        files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));

        let partitions: Vec<Partition> = files
            .into_iter()
            .enumerate()
            .map(|(index, file)| Partition { index, file })
            .collect();

        if partitions.is_empty() {
            warn!(
                "No file matching {} in {}, nothing to import",
                pattern,
                directory.display()
            );
        } else {
            info!(
                "{} partition(s) found in {} for {}",
                partitions.len(),
                directory.display(),
                pattern
            );
        }

        Ok(partitions)
    }
}

/// Glob matching on a file name: `*` matches any run of characters, `?` a single one.
pub fn matches_pattern(name: &str, pattern: &str) -> bool {
    let name: Vec<char> = name.chars().collect();
    let pattern: Vec<char> = pattern.chars().collect();

    let (mut n, mut p) = (0, 0);
    // Position of the last `*` and the name position it is currently matched up to
    let mut backtrack: Option<(usize, usize)> = None;

    while n < name.len() {
        match pattern.get(p).copied() {
            Some('*') => {
                backtrack = Some((p, n));
                p += 1;
            }
            Some(c) if c == '?' || c == name[n] => {
                n += 1;
                p += 1;
            }
            _ => match backtrack {
                Some((star, matched)) => {
                    p = star + 1;
                    n = matched + 1;
                    backtrack = Some((star, matched + 1));
                }
                None => return false,
            },
        }
    }

    pattern[p..].iter().all(|&c| c == '*')
}

/// Runs one partition and waits for its result.
///
/// `Err` means the worker could not be started at all; a worker that ran and
/// failed reports `Ok` with a failed [`StepExecutionResult`]. Launches run on
/// the blocking thread pool of the dispatcher.
pub trait PartitionLauncher: Send + Sync {
    fn launch(&self, partition: &Partition) -> Result<StepExecutionResult, BatchError>;
}

impl<T: PartitionLauncher + ?Sized> PartitionLauncher for Arc<T> {
    fn launch(&self, partition: &Partition) -> Result<StepExecutionResult, BatchError> {
        (**self).launch(partition)
    }
}

/// Aggregated outcome of a dispatch.
#[derive(Debug)]
pub struct DispatchResult {
    /// One result per partition, ordered by partition index
    pub results: Vec<StepExecutionResult>,
}

impl DispatchResult {
    pub fn is_success(&self) -> bool {
        self.results.iter().all(StepExecutionResult::is_success)
    }

    pub fn status(&self) -> StepStatus {
        if self.is_success() {
            StepStatus::Success
        } else {
            StepStatus::Failed
        }
    }

    pub fn write_count(&self) -> usize {
        self.results.iter().map(|result| result.write_count).sum()
    }

    pub fn failures(&self) -> impl Iterator<Item = &StepExecutionResult> {
        self.results.iter().filter(|result| !result.is_success())
    }
}

/// Runs every partition through a launcher, never more than `max_workers` at once.
///
/// A failed partition does not cancel the others: every partition runs to its
/// own completion or failure before `dispatch` returns.
#[derive(Debug, Clone, Copy)]
pub struct PartitionDispatcher {
    max_workers: usize,
}

impl PartitionDispatcher {
    pub const DEFAULT_MAX_WORKERS: usize = 2;

    /// # Errors
    /// `BatchError::Configuration` when `max_workers` is zero.
    pub fn new(max_workers: usize) -> Result<Self, BatchError> {
        if max_workers == 0 {
            return Err(BatchError::Configuration(
                "The partition dispatcher needs at least one worker".to_string(),
            ));
        }
        Ok(Self { max_workers })
    }

    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    /// Runs `partitions` and waits until every one of them has reported.
    ///
    /// Each launch runs on a blocking task of a runtime owned by this call, so
    /// `dispatch` must not be called from an async context.
    pub fn dispatch(
        &self,
        partitions: &[Partition],
        launcher: Arc<dyn PartitionLauncher>,
    ) -> DispatchResult {
        info!(
            "Dispatching {} partition(s) on {} worker(s)",
            partitions.len(),
            self.max_workers.min(partitions.len())
        );
        if partitions.is_empty() {
            return DispatchResult {
                results: Vec::new(),
            };
        }

        let runtime = match Builder::new_current_thread().enable_all().build() {
            Ok(runtime) => runtime,
            Err(e) => {
                error!("Cannot start the dispatch runtime: {}", e);
                let results = partitions
                    .iter()
                    .map(|partition| {
                        StepExecutionResult::failed(
                            partition.index,
                            0,
                            BatchError::Dispatch {
                                index: partition.index,
                                reason: e.to_string(),
                            },
                        )
                    })
                    .collect();
                return DispatchResult { results };
            }
        };

        runtime.block_on(self.dispatch_all(partitions, launcher))
    }

    async fn dispatch_all(
        &self,
        partitions: &[Partition],
        launcher: Arc<dyn PartitionLauncher>,
    ) -> DispatchResult {
        let semaphore = Arc::new(Semaphore::new(self.max_workers));
        let mut join_set = JoinSet::new();

        for (slot, partition) in partitions.iter().enumerate() {
            let Ok(permit) = Arc::clone(&semaphore).acquire_owned().await else {
                break;
            };
            let launcher = Arc::clone(&launcher);
            let partition = partition.clone();

            join_set.spawn(async move {
                // Held until the launch has reported
                let _permit = permit;
                let index = partition.index;
                debug!(
                    "Launching partition {} ({})",
                    index,
                    partition.file.display()
                );
                let launched = task::spawn_blocking(move || launcher.launch(&partition)).await;
                (slot, Self::settle(index, launched))
            });
        }

        let mut slots: Vec<Option<StepExecutionResult>> = partitions.iter().map(|_| None).collect();
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((slot, result)) => slots[slot] = Some(result),
                Err(e) => error!("Dispatch task failed: {}", e),
            }
        }

        let results = slots
            .into_iter()
            .zip(partitions)
            .map(|(result, partition)| {
                result.unwrap_or_else(|| {
                    StepExecutionResult::failed(
                        partition.index,
                        0,
                        BatchError::Worker {
                            index: partition.index,
                            reason: "terminated abruptly".to_string(),
                        },
                    )
                })
            })
            .collect();

        DispatchResult { results }
    }

    fn settle(
        index: usize,
        launched: Result<Result<StepExecutionResult, BatchError>, JoinError>,
    ) -> StepExecutionResult {
        let result = match launched {
            Ok(Ok(result)) => result,
            Ok(Err(error)) => {
                let error = match error {
                    BatchError::Dispatch { .. } => error,
                    other => BatchError::Dispatch {
                        index,
                        reason: other.to_string(),
                    },
                };
                StepExecutionResult::failed(index, 0, error)
            }
            Err(join_error) => {
                let reason = if join_error.is_panic() {
                    "terminated abruptly".to_string()
                } else {
                    format!("was cancelled: {}", join_error)
                };
                StepExecutionResult::failed(index, 0, BatchError::Worker { index, reason })
            }
        };

        if result.is_success() {
            info!(
                "Partition {} completed: {} item(s) written",
                index, result.write_count
            );
        } else {
            warn!(
                "Partition {} failed after {} item(s) written: {}",
                index,
                result.write_count,
                result
                    .error
                    .as_ref()
                    .map(ToString::to_string)
                    .unwrap_or_default()
            );
        }

        result
    }
}

impl Default for PartitionDispatcher {
    fn default() -> Self {
        Self {
            max_workers: Self::DEFAULT_MAX_WORKERS,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        fs,
        sync::atomic::{AtomicUsize, Ordering},
        thread,
        time::Duration,
    };

    use tempfile::TempDir;

    use super::*;

    #[test]
    fn pattern_matching() {
        assert!(matches_pattern("x.csv", "*.csv"));
        assert!(matches_pattern(".csv", "*.csv"));
        assert!(!matches_pattern("x.csv.bak", "*.csv"));
        assert!(!matches_pattern("x.txt", "*.csv"));
        assert!(matches_pattern("customers-01.csv", "customers-??.csv"));
        assert!(!matches_pattern("customers-1.csv", "customers-??.csv"));
        assert!(matches_pattern("a.b.csv", "*.*.csv"));
        assert!(matches_pattern("anything", "*"));
        assert!(matches_pattern("exact.csv", "exact.csv"));
    }

    #[test]
    fn partitions_sorted_by_name() {
        let dir = TempDir::new().unwrap();
        for name in ["z.csv", "x.csv", "notes.txt", "y.csv"] {
            fs::write(dir.path().join(name), "header\n").unwrap();
        }
        fs::create_dir(dir.path().join("nested.csv")).unwrap();

        let partitions = FileSetPartitioner::new().partition(dir.path(), "*.csv").unwrap();

        let names: Vec<_> = partitions
            .iter()
            .map(|p| p.file.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["x.csv", "y.csv", "z.csv"]);
        assert_eq!(
            partitions.iter().map(|p| p.index).collect::<Vec<_>>(),
            vec![0, 1, 2]
        );
        assert!(partitions.iter().all(|p| p.file.is_absolute()));
    }

    #[test]
    fn no_match_is_an_empty_partition_set() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("readme.md"), "").unwrap();

        let partitions = FileSetPartitioner::new().partition(dir.path(), "*.csv").unwrap();

        assert!(partitions.is_empty());
    }

    #[test]
    fn unreadable_directory_is_a_partition_error() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("missing");

        let result = FileSetPartitioner::new().partition(&missing, "*.csv");

        assert!(matches!(result, Err(BatchError::Partition { directory, .. }) if directory == missing));
    }

    #[test]
    fn dispatcher_rejects_zero_workers() {
        assert!(PartitionDispatcher::new(0).is_err());
        assert_eq!(PartitionDispatcher::default().max_workers(), 2);
    }

    struct SleepyLauncher {
        running: AtomicUsize,
        peak: AtomicUsize,
    }

    impl PartitionLauncher for SleepyLauncher {
        fn launch(&self, partition: &Partition) -> Result<StepExecutionResult, BatchError> {
            let running = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(running, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(20));
            self.running.fetch_sub(1, Ordering::SeqCst);
            Ok(StepExecutionResult::success(partition.index, 1))
        }
    }

    fn partitions(count: usize) -> Vec<Partition> {
        (0..count)
            .map(|index| Partition {
                index,
                file: PathBuf::from(format!("/tmp/inbound/{index}.csv")),
            })
            .collect()
    }

    #[test]
    fn dispatcher_respects_the_worker_bound() {
        let launcher = Arc::new(SleepyLauncher {
            running: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        });

        let result = PartitionDispatcher::new(2)
            .unwrap()
            .dispatch(&partitions(6), launcher.clone());

        assert!(result.is_success());
        assert_eq!(result.results.len(), 6);
        assert_eq!(result.write_count(), 6);
        assert!(launcher.peak.load(Ordering::SeqCst) <= 2);
    }

    #[test]
    fn dispatching_nothing_succeeds() {
        let launcher = Arc::new(SleepyLauncher {
            running: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        });

        let result = PartitionDispatcher::default().dispatch(&[], launcher);

        assert!(result.results.is_empty());
        assert_eq!(result.status(), StepStatus::Success);
    }

    struct PanickingLauncher;

    impl PartitionLauncher for PanickingLauncher {
        fn launch(&self, partition: &Partition) -> Result<StepExecutionResult, BatchError> {
            if partition.index == 1 {
                panic!("worker killed");
            }
            Ok(StepExecutionResult::success(partition.index, 10))
        }
    }

    #[test]
    fn abrupt_worker_termination_is_a_failed_partition() {
        let result = PartitionDispatcher::new(2)
            .unwrap()
            .dispatch(&partitions(3), Arc::new(PanickingLauncher));

        assert_eq!(result.status(), StepStatus::Failed);
        assert!(result.results[0].is_success());
        match &result.results[1].error {
            Some(BatchError::Worker { index, reason }) => {
                assert_eq!(*index, 1);
                assert_eq!(reason, "terminated abruptly");
            }
            other => panic!("expected a worker error, got {other:?}"),
        }
        assert!(result.results[2].is_success());
    }

    struct UnlaunchableLauncher;

    impl PartitionLauncher for UnlaunchableLauncher {
        fn launch(&self, partition: &Partition) -> Result<StepExecutionResult, BatchError> {
            Err(BatchError::Io(std::io::Error::other(format!(
                "no worker for {}",
                partition.index
            ))))
        }
    }

    #[test]
    fn launch_failure_is_a_dispatch_error() {
        let result = PartitionDispatcher::default().dispatch(&partitions(2), Arc::new(UnlaunchableLauncher));

        assert_eq!(result.failures().count(), 2);
        assert!(matches!(
            result.results[1].error,
            Some(BatchError::Dispatch { index: 1, .. })
        ));
    }

    #[test]
    fn partition_files_are_canonical() {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        fs::write(dir.path().join("data.csv"), "header\n").unwrap();

        let partitions = FileSetPartitioner::new()
            .partition(&dir.path().join("sub").join(".."), "*.csv")
            .unwrap();

        assert_eq!(partitions.len(), 1);
        assert_eq!(
            partitions[0].file,
            fs::canonicalize(dir.path().join("data.csv")).unwrap()
        );
    }
}
