//! # Inbound polling
//!
//! Watches the inbound directory for archives and asks for one import run
//! covering all of them. The directory can first be synchronized from a remote
//! source through an [`InboundSynchronizer`].

use std::{
    fs, io,
    path::{Path, PathBuf},
};

use log::{debug, info};

use crate::{
    BatchError,
    core::{
        job::{ImportRequest, RunProfile},
        partition::matches_pattern,
    },
    launch::{LaunchRequestSink, TaskLaunchRequest},
};

/// This module contains the FTP synchronizer.
#[cfg(feature = "ftp")]
pub mod ftp;

/// Default glob selecting inbound archives.
pub const DEFAULT_ARCHIVE_PATTERN: &str = "*.zip";

/// Copies remote files into a local directory.
pub trait InboundSynchronizer {
    /// Returns the number of files copied.
    fn synchronize(&self, local_directory: &Path) -> Result<usize, BatchError>;
}

pub struct InboundPoller<'a> {
    directory: PathBuf,
    pattern: String,
    synchronizer: Option<Box<dyn InboundSynchronizer + 'a>>,
}

impl<'a> InboundPoller<'a> {
    pub fn new<P: Into<PathBuf>>(directory: P) -> Self {
        Self {
            directory: directory.into(),
            pattern: DEFAULT_ARCHIVE_PATTERN.to_string(),
            synchronizer: None,
        }
    }

    pub fn pattern(mut self, pattern: &str) -> Self {
        self.pattern = pattern.to_string();
        self
    }

    pub fn synchronizer<S: InboundSynchronizer + 'a>(mut self, synchronizer: S) -> Self {
        self.synchronizer = Some(Box::new(synchronizer));
        self
    }

    /// Synchronizes the directory, then builds an orchestrator request for the
    /// archives it holds. `None` when there is no archive.
    pub fn poll(&self) -> Result<Option<ImportRequest>, BatchError> {
        if let Some(synchronizer) = &self.synchronizer {
            fs::create_dir_all(&self.directory)?;
            let copied = synchronizer.synchronize(&self.directory)?;
            info!(
                "Synchronized {} file(s) into {}",
                copied,
                self.directory.display()
            );
        }

        let archives = self.archives()?;
        if archives.is_empty() {
            debug!("No archive in {}", self.directory.display());
            return Ok(None);
        }

        let resources = archives
            .iter()
            .map(|archive| format!("file:{}", archive.display()))
            .collect();

        ImportRequest::new(resources, RunProfile::Orchestrator).map(Some)
    }

    /// Polls once and hands the resulting launch request to `sink`.
    pub fn poll_and_send(
        &self,
        sink: &dyn LaunchRequestSink,
    ) -> Result<Option<TaskLaunchRequest>, BatchError> {
        let Some(request) = self.poll()? else {
            return Ok(None);
        };

        let launch_request = TaskLaunchRequest::import(&request);
        info!(
            "Requesting import of {} archive(s)",
            request.resources().len()
        );
        sink.send(launch_request.clone())?;

        Ok(Some(launch_request))
    }

    fn archives(&self) -> Result<Vec<PathBuf>, BatchError> {
        let entries = match fs::read_dir(&self.directory) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut archives = Vec::new();
        for entry in entries {
            let entry = entry?;
            if entry.file_type()?.is_file()
                && matches_pattern(&entry.file_name().to_string_lossy(), &self.pattern)
            {
                archives.push(std::path::absolute(entry.path())?);
            }
        }
        archives.sort();

        Ok(archives)
    }
}

#[cfg(test)]
mod tests {
    use mockall::mock;
    use tempfile::TempDir;

    use super::*;
    use crate::launch::IMPORT_JOB_RESOURCES;

    mock! {
        Synchronizer {}
        impl InboundSynchronizer for Synchronizer {
            fn synchronize(&self, local_directory: &Path) -> Result<usize, BatchError>;
        }
    }

    #[test]
    fn no_archive_no_request() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join("notes.txt"), "").unwrap();

        let poller = InboundPoller::new(temp_dir.path());

        assert!(poller.poll().unwrap().is_none());
    }

    #[test]
    fn missing_directory_is_empty() {
        let temp_dir = TempDir::new().unwrap();

        let poller = InboundPoller::new(temp_dir.path().join("inbound"));

        assert!(poller.poll().unwrap().is_none());
    }

    #[test]
    fn one_request_for_all_archives() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join("b.zip"), "").unwrap();
        fs::write(temp_dir.path().join("a.zip"), "").unwrap();
        fs::write(temp_dir.path().join("c.csv"), "").unwrap();

        let request = InboundPoller::new(temp_dir.path()).poll().unwrap().unwrap();

        assert_eq!(request.profile(), RunProfile::Orchestrator);
        assert_eq!(request.resources().len(), 2);
        assert!(request.resources()[0].starts_with("file:"));
        assert!(request.resources()[0].ends_with("a.zip"));
        assert!(request.resources()[1].ends_with("b.zip"));
    }

    #[test]
    fn synchronizes_before_scanning() {
        let temp_dir = TempDir::new().unwrap();
        let inbound = temp_dir.path().join("inbound");

        let mut synchronizer = MockSynchronizer::new();
        synchronizer.expect_synchronize().times(1).returning(|dir| {
            fs::write(dir.join("remote.zip"), "").unwrap();
            Ok(1)
        });

        let (sender, mut receiver) = tokio::sync::mpsc::unbounded_channel();
        let poller = InboundPoller::new(&inbound).synchronizer(synchronizer);
        let sent = poller.poll_and_send(&sender).unwrap().unwrap();

        let received = receiver.try_recv().unwrap();
        assert_eq!(received, sent);
        assert!(received.environment[IMPORT_JOB_RESOURCES].ends_with("remote.zip"));
    }

    #[test]
    fn synchronizer_failure_is_propagated() {
        let temp_dir = TempDir::new().unwrap();
        let mut synchronizer = MockSynchronizer::new();
        synchronizer
            .expect_synchronize()
            .returning(|_| Err(BatchError::Configuration("FTP login failed".to_string())));

        let poller = InboundPoller::new(temp_dir.path()).synchronizer(synchronizer);

        assert!(matches!(poller.poll(), Err(BatchError::Configuration(_))));
    }
}
