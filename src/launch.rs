//! # Task launching
//!
//! The import job runs as separate OS processes: the inbound poller asks for an
//! orchestrator run, and the orchestrator asks for one worker run per
//! partition. Both requests are a [`TaskLaunchRequest`], a plain value carrying
//! the command arguments and the environment of the new process.
//!
//! - [`TaskLauncher`] starts a task and waits for it; [`CommandTaskLauncher`]
//!   spawns a local process.
//! - [`ProcessPartitionLauncher`] is a [`PartitionLauncher`] running every
//!   partition in its own worker process. The worker reports its outcome as one
//!   JSON [`WorkerReport`] line on stdout.
//! - [`LaunchRequestSink`] receives requests produced by the poller.
//! - [`TaskSink`] consumes requests from a channel and launches each of them;
//!   [`read_launch_requests`] feeds that channel from JSON lines.

use std::{
    collections::BTreeMap,
    io::BufRead,
    path::PathBuf,
    process::{Command, Stdio},
    sync::Arc,
};

use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use tokio::{
    sync::mpsc::{UnboundedReceiver, UnboundedSender},
    task,
};

use crate::{
    BatchError,
    core::{
        job::{ImportRequest, RunProfile},
        partition::{Partition, PartitionLauncher, StepExecutionResult},
        step::StepStatus,
    },
};

/// Comma-joined archive locations of an orchestrator run.
pub const IMPORT_JOB_RESOURCES: &str = "IMPORT_JOB_RESOURCES";
/// Run profile of the launched process.
pub const IMPORT_JOB_PROFILE: &str = "IMPORT_JOB_PROFILE";
/// Absolute path of the file a worker loads.
pub const PARTITION_FILE: &str = "PARTITION_FILE";
/// Index of the partition a worker loads.
pub const PARTITION_INDEX: &str = "PARTITION_INDEX";

/// Name of the task started by launch requests.
pub const IMPORT_TASK_NAME: &str = "import-job";

/// A request to start one task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskLaunchRequest {
    pub task_name: String,
    pub args: Vec<String>,
    pub environment: BTreeMap<String, String>,
}

impl TaskLaunchRequest {
    /// Request for an orchestrator run importing `request`.
    pub fn import(request: &ImportRequest) -> Self {
        let mut environment = BTreeMap::new();
        environment.insert(IMPORT_JOB_RESOURCES.to_string(), request.joined_resources());
        environment.insert(IMPORT_JOB_PROFILE.to_string(), request.profile().to_string());

        Self {
            task_name: IMPORT_TASK_NAME.to_string(),
            args: vec!["run".to_string()],
            environment,
        }
    }

    /// Request for a worker run loading `partition`.
    pub fn worker(partition: &Partition) -> Self {
        let mut environment = BTreeMap::new();
        environment.insert(
            PARTITION_FILE.to_string(),
            partition.file.display().to_string(),
        );
        environment.insert(PARTITION_INDEX.to_string(), partition.index.to_string());
        environment.insert(
            IMPORT_JOB_PROFILE.to_string(),
            RunProfile::Worker.to_string(),
        );

        Self {
            task_name: IMPORT_TASK_NAME.to_string(),
            args: vec!["worker".to_string()],
            environment,
        }
    }

    /// Reads back the import request carried by an orchestrator request.
    ///
    /// # Errors
    /// `BatchError::Configuration` when the resources are missing or empty,
    /// or the profile is unknown.
    pub fn import_request(&self) -> Result<ImportRequest, BatchError> {
        let resources = self.environment.get(IMPORT_JOB_RESOURCES).ok_or_else(|| {
            BatchError::Configuration(format!("{IMPORT_JOB_RESOURCES} is not set"))
        })?;
        let profile = match self.environment.get(IMPORT_JOB_PROFILE) {
            Some(profile) => profile.parse()?,
            None => RunProfile::Orchestrator,
        };
        ImportRequest::parse(resources, profile)
    }
}

/// How a launched task ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskOutcome {
    pub success: bool,
    /// Exit code, absent when the process was killed by a signal
    pub code: Option<i32>,
    pub stdout: String,
}

/// Starts a task and waits for it to end.
pub trait TaskLauncher: Send + Sync {
    /// # Errors
    /// Any error means the task could not be started.
    fn launch(&self, request: &TaskLaunchRequest) -> Result<TaskOutcome, BatchError>;
}

/// Launches tasks as local processes of the same program.
///
/// The request's arguments are appended to `base_args` and its environment is
/// added to the inherited one. Stdout is captured, stderr is inherited so
/// worker logs reach the console.
#[derive(Debug, Clone)]
pub struct CommandTaskLauncher {
    program: PathBuf,
    base_args: Vec<String>,
}

impl CommandTaskLauncher {
    pub fn new<P: Into<PathBuf>>(program: P) -> Self {
        Self {
            program: program.into(),
            base_args: Vec::new(),
        }
    }

    /// The program currently running, so workers use the same binary.
    pub fn current_exe() -> Result<Self, BatchError> {
        Ok(Self::new(std::env::current_exe()?))
    }

    pub fn arg<S: Into<String>>(mut self, arg: S) -> Self {
        self.base_args.push(arg.into());
        self
    }
}

impl TaskLauncher for CommandTaskLauncher {
    fn launch(&self, request: &TaskLaunchRequest) -> Result<TaskOutcome, BatchError> {
        debug!(
            "Launching {} {:?} {:?}",
            self.program.display(),
            self.base_args,
            request.args
        );

        let output = Command::new(&self.program)
            .args(&self.base_args)
            .args(&request.args)
            .envs(&request.environment)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .output()?;

        Ok(TaskOutcome {
            success: output.status.success(),
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        })
    }
}

/// Outcome of a worker run, printed by the worker as one JSON line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerReport {
    pub partition_index: usize,
    pub status: StepStatus,
    pub write_count: usize,
    pub error: Option<String>,
}

impl WorkerReport {
    pub fn to_line(&self) -> Result<String, BatchError> {
        serde_json::to_string(self)
            .map_err(|e| BatchError::Configuration(format!("Cannot encode worker report: {e}")))
    }

    /// Finds the last report line of a worker's stdout.
    pub fn from_output(stdout: &str) -> Option<Self> {
        stdout
            .lines()
            .rev()
            .find_map(|line| serde_json::from_str(line.trim()).ok())
    }

    pub fn into_result(self) -> StepExecutionResult {
        if self.status == StepStatus::Success {
            return StepExecutionResult::success(self.partition_index, self.write_count);
        }

        StepExecutionResult::failed(
            self.partition_index,
            self.write_count,
            BatchError::Worker {
                index: self.partition_index,
                reason: self.error.unwrap_or_else(|| "no error reported".to_string()),
            },
        )
    }
}

impl From<&StepExecutionResult> for WorkerReport {
    fn from(result: &StepExecutionResult) -> Self {
        Self {
            partition_index: result.partition_index,
            status: result.status,
            write_count: result.write_count,
            error: result.error.as_ref().map(ToString::to_string),
        }
    }
}

/// Runs every partition in a worker process started by a [`TaskLauncher`].
pub struct ProcessPartitionLauncher<L> {
    launcher: L,
}

impl<L: TaskLauncher> ProcessPartitionLauncher<L> {
    pub fn new(launcher: L) -> Self {
        Self { launcher }
    }
}

impl<L: TaskLauncher> PartitionLauncher for ProcessPartitionLauncher<L> {
    fn launch(&self, partition: &Partition) -> Result<StepExecutionResult, BatchError> {
        let request = TaskLaunchRequest::worker(partition);
        let outcome = self.launcher.launch(&request).map_err(|e| BatchError::Dispatch {
            index: partition.index,
            reason: e.to_string(),
        })?;

        // The worker started: from here on every failure is the worker's own
        let Some(report) = WorkerReport::from_output(&outcome.stdout) else {
            let exit = outcome
                .code
                .map_or_else(|| "a signal".to_string(), |code| format!("code {code}"));
            return Ok(StepExecutionResult::failed(
                partition.index,
                0,
                BatchError::Worker {
                    index: partition.index,
                    reason: format!("terminated abruptly with {exit} without reporting"),
                },
            ));
        };

        if report.partition_index != partition.index {
            return Ok(StepExecutionResult::failed(
                partition.index,
                0,
                BatchError::Worker {
                    index: partition.index,
                    reason: format!("reported partition {} instead", report.partition_index),
                },
            ));
        }

        if report.status == StepStatus::Success && !outcome.success {
            warn!(
                "Worker of partition {} reported success but exited with {:?}",
                partition.index, outcome.code
            );
        }

        Ok(report.into_result())
    }
}

/// Receives launch requests emitted by the inbound poller.
pub trait LaunchRequestSink {
    fn send(&self, request: TaskLaunchRequest) -> Result<(), BatchError>;
}

impl LaunchRequestSink for UnboundedSender<TaskLaunchRequest> {
    fn send(&self, request: TaskLaunchRequest) -> Result<(), BatchError> {
        UnboundedSender::send(self, request)
            .map_err(|_| BatchError::Configuration("Launch request channel is closed".to_string()))
    }
}

/// Launches every received request right away and waits for it.
pub struct LaunchingSink<L> {
    launcher: L,
}

impl<L: TaskLauncher> LaunchingSink<L> {
    pub fn new(launcher: L) -> Self {
        Self { launcher }
    }
}

impl<L: TaskLauncher> LaunchRequestSink for LaunchingSink<L> {
    fn send(&self, request: TaskLaunchRequest) -> Result<(), BatchError> {
        info!("Launching task {}", request.task_name);
        let outcome = self.launcher.launch(&request)?;
        if outcome.success {
            Ok(())
        } else {
            Err(BatchError::Step(format!(
                "{} (exit code {:?})",
                request.task_name, outcome.code
            )))
        }
    }
}

/// Counts of a drained request channel.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SinkReport {
    pub launched: usize,
    pub failed: usize,
}

/// Launches the requests of a channel one after the other.
///
/// A request that cannot be launched, or whose task fails, is logged and
/// counted; the next request is launched regardless.
pub struct TaskSink<L> {
    launcher: Arc<L>,
}

impl<L: TaskLauncher + 'static> TaskSink<L> {
    pub fn new(launcher: L) -> Self {
        Self {
            launcher: Arc::new(launcher),
        }
    }

    /// Consumes `receiver` until every sender is dropped.
    pub async fn drain(&self, mut receiver: UnboundedReceiver<TaskLaunchRequest>) -> SinkReport {
        let mut report = SinkReport::default();

        while let Some(request) = receiver.recv().await {
            let task_name = request.task_name.clone();
            info!("Launching task {}", task_name);

            let launcher = Arc::clone(&self.launcher);
            match task::spawn_blocking(move || launcher.launch(&request)).await {
                Ok(Ok(outcome)) if outcome.success => {
                    info!("Task {} completed", task_name);
                    report.launched += 1;
                }
                Ok(Ok(outcome)) => {
                    warn!("Task {} failed with exit code {:?}", task_name, outcome.code);
                    report.failed += 1;
                }
                Ok(Err(e)) => {
                    error!("Cannot launch task {}: {}", task_name, e);
                    report.failed += 1;
                }
                Err(e) => {
                    error!("Launch of task {} aborted: {}", task_name, e);
                    report.failed += 1;
                }
            }
        }

        report
    }
}

/// Sends every JSON launch request line of `input` to `sender`.
///
/// Blank lines are ignored and malformed lines are logged and skipped.
/// Returns the number of requests sent.
///
/// # Errors
/// `BatchError::Io` when `input` cannot be read, `BatchError::Configuration`
/// when the channel is closed.
pub fn read_launch_requests<R: BufRead>(
    input: R,
    sender: &UnboundedSender<TaskLaunchRequest>,
) -> Result<usize, BatchError> {
    let mut sent = 0;
    for line in input.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<TaskLaunchRequest>(&line) {
            Ok(request) => {
                LaunchRequestSink::send(sender, request)?;
                sent += 1;
            }
            Err(e) => warn!("Ignoring malformed launch request {:?}: {}", line, e),
        }
    }
    Ok(sent)
}
