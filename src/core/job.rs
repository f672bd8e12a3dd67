use std::{fmt, path::PathBuf, str::FromStr};

use chrono::{DateTime, Utc};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::BatchError;

use super::{
    build_name,
    partition::{Partition, StepExecutionResult},
    step::StepStatus,
};

/// Tag telling an invocation of the import job which role it plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunProfile {
    /// Extracts, partitions and dispatches the workers.
    #[serde(alias = "master")]
    Orchestrator,
    /// Loads a single partition.
    Worker,
}

impl RunProfile {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunProfile::Orchestrator => "orchestrator",
            RunProfile::Worker => "worker",
        }
    }
}

impl fmt::Display for RunProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunProfile {
    type Err = BatchError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "orchestrator" | "master" => Ok(RunProfile::Orchestrator),
            "worker" => Ok(RunProfile::Worker),
            other => Err(BatchError::Configuration(format!(
                "Unknown run profile: {other}"
            ))),
        }
    }
}

/// Parameters of one import run: the archives to import and the run profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportRequest {
    resources: Vec<String>,
    profile: RunProfile,
}

impl ImportRequest {
    /// # Errors
    /// `BatchError::Configuration` when `resources` is empty or holds a blank location.
    pub fn new(resources: Vec<String>, profile: RunProfile) -> Result<Self, BatchError> {
        if resources.is_empty() {
            return Err(BatchError::Configuration(
                "An import request needs at least one archive".to_string(),
            ));
        }
        if resources.iter().any(|resource| resource.trim().is_empty()) {
            return Err(BatchError::Configuration(
                "Archive locations cannot be blank".to_string(),
            ));
        }
        Ok(Self { resources, profile })
    }

    /// Parses a comma-joined list of archive locations, as carried by launch requests.
    pub fn parse(resources: &str, profile: RunProfile) -> Result<Self, BatchError> {
        let resources = resources
            .split(',')
            .map(str::trim)
            .filter(|resource| !resource.is_empty())
            .map(str::to_string)
            .collect();
        Self::new(resources, profile)
    }

    pub fn resources(&self) -> &[String] {
        &self.resources
    }

    pub fn profile(&self) -> RunProfile {
        self.profile
    }

    /// Comma-joined form of the archive locations.
    pub fn joined_resources(&self) -> String {
        self.resources.join(",")
    }
}

/// Resolves an archive location to a local path.
///
/// Accepts plain paths and `file:` URIs (`file:/tmp/a.zip`, `file:///tmp/a.zip`).
pub fn resolve_location(location: &str) -> Result<PathBuf, BatchError> {
    let location = location.trim();
    match location.strip_prefix("file:") {
        Some(path) => {
            let path = match path.strip_prefix("//") {
                // `file://host/path` is not supported, only an empty authority
                Some(rest) if rest.starts_with('/') => rest,
                Some(_) => {
                    return Err(BatchError::Configuration(format!(
                        "Only local file URIs are supported: {location}"
                    )));
                }
                None => path,
            };
            Ok(PathBuf::from(path))
        }
        None if location.contains("://") => Err(BatchError::Configuration(format!(
            "Unsupported archive location: {location}"
        ))),
        None => Ok(PathBuf::from(location)),
    }
}

/// Phases of an import run. Runs only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobPhase {
    Received,
    Extracting,
    Partitioning,
    Dispatching,
    Completed,
    Failed,
}

impl JobPhase {
    fn rank(self) -> u8 {
        match self {
            JobPhase::Received => 0,
            JobPhase::Extracting => 1,
            JobPhase::Partitioning => 2,
            JobPhase::Dispatching => 3,
            JobPhase::Completed | JobPhase::Failed => 4,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, JobPhase::Completed | JobPhase::Failed)
    }
}

/// Aggregate state of one import run, owned by the orchestrator.
#[derive(Debug)]
pub struct JobRunState {
    id: Uuid,
    name: String,
    phase: JobPhase,
    started_at: DateTime<Utc>,
    ended_at: Option<DateTime<Utc>>,
    extracted_files: Vec<PathBuf>,
    partitions: Vec<Partition>,
    results: Vec<StepExecutionResult>,
    cause: Option<BatchError>,
}

impl JobRunState {
    pub fn new(name: Option<&str>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.map(str::to_string).unwrap_or_else(build_name),
            phase: JobPhase::Received,
            started_at: Utc::now(),
            ended_at: None,
            extracted_files: Vec::new(),
            partitions: Vec::new(),
            results: Vec::new(),
            cause: None,
        }
    }

    /// Moves the run to `next`.
    ///
    /// # Errors
    /// `BatchError::Configuration` when `next` is not strictly after the current
    /// phase or the run already reached a terminal phase.
    pub fn advance(&mut self, next: JobPhase) -> Result<(), BatchError> {
        if self.phase.is_terminal() || next.rank() <= self.phase.rank() {
            return Err(BatchError::Configuration(format!(
                "Illegal transition of job {} from {:?} to {:?}",
                self.name, self.phase, next
            )));
        }

        info!("Job {} ({}): {:?} -> {:?}", self.name, self.id, self.phase, next);
        self.phase = next;
        if next.is_terminal() {
            self.ended_at = Some(Utc::now());
        }
        Ok(())
    }

    /// Ends the run as failed with `cause`. A run already terminal keeps its outcome.
    pub fn fail(&mut self, cause: BatchError) {
        if self.phase.is_terminal() {
            warn!("Job {} already ended, ignoring failure: {}", self.name, cause);
            return;
        }
        warn!("Job {} failed during {:?}: {}", self.name, self.phase, cause);
        self.cause = Some(cause);
        self.phase = JobPhase::Failed;
        self.ended_at = Some(Utc::now());
    }

    pub(crate) fn record_extraction(&mut self, files: Vec<PathBuf>) {
        self.extracted_files.extend(files);
    }

    pub(crate) fn record_partitions(&mut self, partitions: Vec<Partition>) {
        self.partitions = partitions;
    }

    pub(crate) fn record_results(&mut self, results: Vec<StepExecutionResult>) {
        self.results = results;
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn phase(&self) -> JobPhase {
        self.phase
    }

    pub fn is_completed(&self) -> bool {
        self.phase == JobPhase::Completed
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn ended_at(&self) -> Option<DateTime<Utc>> {
        self.ended_at
    }

    pub fn extracted_files(&self) -> &[PathBuf] {
        &self.extracted_files
    }

    pub fn partitions(&self) -> &[Partition] {
        &self.partitions
    }

    /// Per-partition results, ordered by partition index.
    pub fn results(&self) -> &[StepExecutionResult] {
        &self.results
    }

    pub fn cause(&self) -> Option<&BatchError> {
        self.cause.as_ref()
    }

    pub fn write_count(&self) -> usize {
        self.results.iter().map(|result| result.write_count).sum()
    }

    pub fn summary(&self) -> JobRunSummary {
        JobRunSummary {
            id: self.id,
            name: self.name.clone(),
            phase: self.phase,
            started_at: self.started_at,
            ended_at: self.ended_at,
            extracted_files: self.extracted_files.clone(),
            write_count: self.write_count(),
            partitions: self
                .results
                .iter()
                .map(|result| PartitionSummary {
                    index: result.partition_index,
                    file: self
                        .partitions
                        .iter()
                        .find(|partition| partition.index == result.partition_index)
                        .map(|partition| partition.file.clone()),
                    status: result.status,
                    write_count: result.write_count,
                    error: result.error.as_ref().map(ToString::to_string),
                })
                .collect(),
            cause: self.cause.as_ref().map(ToString::to_string),
        }
    }
}

/// Serializable snapshot of a [`JobRunState`].
#[derive(Debug, Clone, Serialize)]
pub struct JobRunSummary {
    pub id: Uuid,
    pub name: String,
    pub phase: JobPhase,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub extracted_files: Vec<PathBuf>,
    pub write_count: usize,
    pub partitions: Vec<PartitionSummary>,
    pub cause: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PartitionSummary {
    pub index: usize,
    pub file: Option<PathBuf>,
    pub status: StepStatus,
    pub write_count: usize,
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phases_only_move_forward() {
        let mut state = JobRunState::new(Some("import"));
        assert_eq!(state.phase(), JobPhase::Received);

        state.advance(JobPhase::Extracting).unwrap();
        state.advance(JobPhase::Partitioning).unwrap();
        assert!(state.advance(JobPhase::Extracting).is_err());
        assert!(state.advance(JobPhase::Partitioning).is_err());

        state.advance(JobPhase::Dispatching).unwrap();
        state.advance(JobPhase::Completed).unwrap();
        assert!(state.ended_at().is_some());

        assert!(state.advance(JobPhase::Failed).is_err());
        state.fail(BatchError::Step("late".to_string()));
        assert_eq!(state.phase(), JobPhase::Completed);
        assert!(state.cause().is_none());
    }

    #[test]
    fn failing_records_the_cause() {
        let mut state = JobRunState::new(None);
        state.advance(JobPhase::Extracting).unwrap();
        state.fail(BatchError::Extraction {
            archive: PathBuf::from("/tmp/inbound/a.zip"),
            reason: "not a zip".to_string(),
        });

        assert_eq!(state.phase(), JobPhase::Failed);
        assert!(matches!(state.cause(), Some(BatchError::Extraction { .. })));
        assert_eq!(state.name().len(), 8);

        let summary = state.summary();
        assert_eq!(summary.phase, JobPhase::Failed);
        assert!(summary.cause.unwrap().contains("not a zip"));
    }

    #[test]
    fn parse_comma_joined_resources() {
        let request = ImportRequest::parse(
            "file:/tmp/inbound/a.zip, file:/tmp/inbound/b.zip,",
            RunProfile::Orchestrator,
        )
        .unwrap();

        assert_eq!(
            request.resources(),
            ["file:/tmp/inbound/a.zip", "file:/tmp/inbound/b.zip"]
        );
        assert_eq!(
            request.joined_resources(),
            "file:/tmp/inbound/a.zip,file:/tmp/inbound/b.zip"
        );
        assert!(ImportRequest::parse(" , ", RunProfile::Orchestrator).is_err());
    }

    #[test]
    fn resolve_file_locations() {
        assert_eq!(
            resolve_location("file:/tmp/inbound/a.zip").unwrap(),
            PathBuf::from("/tmp/inbound/a.zip")
        );
        assert_eq!(
            resolve_location("file:///tmp/inbound/a.zip").unwrap(),
            PathBuf::from("/tmp/inbound/a.zip")
        );
        assert_eq!(
            resolve_location("relative/a.zip").unwrap(),
            PathBuf::from("relative/a.zip")
        );
        assert!(resolve_location("file://ftp-host/a.zip").is_err());
        assert!(resolve_location("https://example.com/a.zip").is_err());
    }

    #[test]
    fn run_profiles() {
        assert_eq!("master".parse::<RunProfile>().unwrap(), RunProfile::Orchestrator);
        assert_eq!("Worker".parse::<RunProfile>().unwrap(), RunProfile::Worker);
        assert!("hello".parse::<RunProfile>().is_err());
        assert_eq!(RunProfile::Worker.to_string(), "worker");
    }
}
