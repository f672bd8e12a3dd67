//! Import job - command line entry point
//!
//! One binary plays every role of the import:
//! - `run` orchestrates an import: extract, partition, dispatch workers
//! - `worker` loads a single partition and prints its report on stdout
//! - `poll` looks for inbound archives and requests an import run
//! - `sink` launches the requests printed by `poll`, read from stdin

use std::io;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use batch_import::{
    config::{FtpConfig, ImportConfig},
    core::{
        job::{ImportRequest, RunProfile},
        partition::Partition,
    },
    inbound::{InboundPoller, ftp::FtpSynchronizerBuilder},
    item::{
        logger::LoggerWriterFactory,
        rdbc::{SqliteWriterFactory, create_customer_table},
    },
    launch::{
        CommandTaskLauncher, IMPORT_JOB_PROFILE, IMPORT_JOB_RESOURCES, LaunchRequestSink,
        LaunchingSink, PARTITION_FILE, PARTITION_INDEX, ProcessPartitionLauncher,
        TaskLaunchRequest, TaskSink, WorkerReport, read_launch_requests,
    },
    loader::RecordTransformLoader,
    pipeline::ImportPipeline,
    BatchError,
};
use clap::{Parser, Subcommand};
use log::info;
use sqlx::sqlite::SqlitePoolOptions;
use tokio::runtime::Runtime;

/// Command-line arguments for import-job
#[derive(Parser, Debug)]
#[command(name = "import-job")]
#[command(about = "Imports zipped customer files into a database")]
#[command(version)]
struct Args {
    /// JSON configuration file
    #[arg(short, long, env = "IMPORT_JOB_CONFIG")]
    config: Option<PathBuf>,

    /// SQLx URL of the target database, overrides the configuration
    #[arg(long, env = "DATABASE_URL")]
    database_url: Option<String>,

    /// Maximum number of concurrent partition workers, overrides the configuration
    #[arg(long, env = "IMPORT_JOB_MAX_WORKERS")]
    max_workers: Option<usize>,

    /// Log records instead of writing them to the database
    #[arg(long)]
    dry_run: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Runs an import of the given archives
    Run {
        /// Comma-joined archive locations
        #[arg(long, env = IMPORT_JOB_RESOURCES)]
        resources: String,

        #[arg(long, env = IMPORT_JOB_PROFILE, default_value = "orchestrator")]
        profile: String,

        /// Loads partitions on threads of this process instead of worker processes
        #[arg(long)]
        in_process: bool,
    },
    /// Loads one partition
    Worker {
        #[arg(long, env = PARTITION_FILE)]
        partition_file: PathBuf,

        #[arg(long, env = PARTITION_INDEX)]
        partition_index: usize,
    },
    /// Requests an import of the archives found in the inbound directory
    Poll {
        /// Directory to scan, overrides the configuration
        #[arg(long, env = "IMPORT_JOB_INBOUND_DIR")]
        inbound_dir: Option<PathBuf>,

        /// Starts the import right away instead of printing the request
        #[arg(long)]
        launch: bool,

        #[command(flatten)]
        ftp: FtpArgs,
    },
    /// Launches every JSON launch request read from stdin
    Sink,
}

/// Remote folder synchronized into the inbound directory before polling
#[derive(clap::Args, Debug)]
struct FtpArgs {
    /// FTP server, overrides the configuration
    #[arg(long, env = "FTP_HOST")]
    ftp_host: Option<String>,

    #[arg(long, env = "FTP_PORT")]
    ftp_port: Option<u16>,

    #[arg(long, env = "FTP_USER")]
    ftp_user: Option<String>,

    #[arg(long, env = "FTP_PASSWORD", hide_env_values = true)]
    ftp_password: Option<String>,

    /// Remote folder holding the archives
    #[arg(long, env = "FTP_DIR")]
    ftp_dir: Option<String>,
}

impl FtpArgs {
    fn apply(&self, config: &mut ImportConfig) {
        if self.ftp_host.is_none()
            && self.ftp_port.is_none()
            && self.ftp_user.is_none()
            && self.ftp_password.is_none()
            && self.ftp_dir.is_none()
        {
            return;
        }

        let ftp = config.ftp.get_or_insert_with(FtpConfig::default);
        if let Some(host) = &self.ftp_host {
            ftp.host = host.clone();
        }
        if let Some(port) = self.ftp_port {
            ftp.port = port;
        }
        if let Some(user) = &self.ftp_user {
            ftp.username = user.clone();
        }
        if let Some(password) = &self.ftp_password {
            ftp.password = password.clone();
        }
        if let Some(dir) = &self.ftp_dir {
            ftp.remote_folder = dir.clone();
        }
    }
}

/// Prints launch requests as JSON lines for an external launcher.
struct StdoutSink;

impl LaunchRequestSink for StdoutSink {
    fn send(&self, request: TaskLaunchRequest) -> Result<(), BatchError> {
        let line = serde_json::to_string(&request)
            .map_err(|e| BatchError::Configuration(format!("Cannot encode launch request: {e}")))?;
        println!("{line}");
        Ok(())
    }
}

fn main() -> Result<ExitCode> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => ImportConfig::load(path).context("Failed to load configuration")?,
        None => ImportConfig::default(),
    };
    if let Some(database_url) = &args.database_url {
        config.database_url = database_url.clone();
    }
    if let Some(max_workers) = args.max_workers {
        config.max_workers = max_workers;
    }
    if let Command::Poll { ftp, .. } = &args.command {
        ftp.apply(&mut config);
    }
    config.validate().context("Invalid configuration")?;

    match &args.command {
        Command::Run {
            resources,
            profile,
            in_process,
        } => run(&args, &config, resources, profile, *in_process),
        Command::Worker {
            partition_file,
            partition_index,
        } => worker(&args, &config, partition_file, *partition_index),
        Command::Poll {
            inbound_dir,
            launch,
            ..
        } => poll(&args, &config, inbound_dir.clone(), *launch),
        Command::Sink => sink(&args),
    }
}

fn run(
    args: &Args,
    config: &ImportConfig,
    resources: &str,
    profile: &str,
    in_process: bool,
) -> Result<ExitCode> {
    let profile: RunProfile = profile.parse()?;
    let request = ImportRequest::parse(resources, profile)?;

    let state = if in_process {
        let runtime = Runtime::new().context("Failed to start the async runtime")?;
        let loader = loader(args, config, &runtime)?;
        let pipeline = ImportPipeline::builder()
            .config(config)?
            .launcher(loader)
            .build()?;
        pipeline.run(&request)
    } else {
        let pipeline = ImportPipeline::builder()
            .config(config)?
            .launcher(ProcessPartitionLauncher::new(self_launcher(args)?))
            .build()?;
        pipeline.run(&request)
    };

    let summary = serde_json::to_string_pretty(&state.summary())?;
    println!("{summary}");

    if state.is_completed() {
        info!("Import {} completed: {} record(s)", state.name(), state.write_count());
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::FAILURE)
    }
}

fn worker(
    args: &Args,
    config: &ImportConfig,
    partition_file: &Path,
    partition_index: usize,
) -> Result<ExitCode> {
    let runtime = Runtime::new().context("Failed to start the async runtime")?;
    let loader = loader(args, config, &runtime)?;

    let result = loader.run_partition(&Partition {
        index: partition_index,
        file: partition_file.to_path_buf(),
    });

    println!("{}", WorkerReport::from(&result).to_line()?);

    Ok(if result.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn poll(args: &Args, config: &ImportConfig, inbound_dir: Option<PathBuf>, launch: bool) -> Result<ExitCode> {
    let directory = inbound_dir.unwrap_or_else(|| config.inbound_directory.clone());
    let mut poller = InboundPoller::new(directory);
    if let Some(ftp) = &config.ftp {
        poller = poller.synchronizer(FtpSynchronizerBuilder::from_config(ftp).build()?);
    }

    let sent = if launch {
        poller.poll_and_send(&LaunchingSink::new(self_launcher(args)?))?
    } else {
        poller.poll_and_send(&StdoutSink)?
    };

    if sent.is_none() {
        info!("Nothing to import");
    }
    Ok(ExitCode::SUCCESS)
}

fn sink(args: &Args) -> Result<ExitCode> {
    let runtime = Runtime::new().context("Failed to start the async runtime")?;
    let (sender, receiver) = tokio::sync::mpsc::unbounded_channel();

    let task_sink = TaskSink::new(self_launcher(args)?);
    let consumer = runtime.spawn(async move { task_sink.drain(receiver).await });

    let read = read_launch_requests(io::stdin().lock(), &sender);
    drop(sender);
    let report = runtime.block_on(consumer)?;
    let read = read.context("Failed to read launch requests")?;

    info!(
        "{} request(s) read: {} task(s) completed, {} failed",
        read, report.launched, report.failed
    );
    Ok(if report.failed == 0 {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

/// Launches this same binary with the global options of the current invocation.
fn self_launcher(args: &Args) -> Result<CommandTaskLauncher> {
    let mut launcher = CommandTaskLauncher::current_exe()?;
    if let Some(config) = &args.config {
        launcher = launcher.arg("--config").arg(config.display().to_string());
    }
    if let Some(database_url) = &args.database_url {
        launcher = launcher.arg("--database-url").arg(database_url.as_str());
    }
    if let Some(max_workers) = args.max_workers {
        launcher = launcher.arg("--max-workers").arg(max_workers.to_string());
    }
    if args.dry_run {
        launcher = launcher.arg("--dry-run");
    }
    Ok(launcher)
}

fn loader(args: &Args, config: &ImportConfig, runtime: &Runtime) -> Result<RecordTransformLoader> {
    let builder = RecordTransformLoader::builder()
        .chunk_size(config.chunk_size)
        .delimiter(config.delimiter_byte());

    let builder = if args.dry_run {
        builder.writer_factory(LoggerWriterFactory)
    } else {
        let max_connections = u32::try_from(config.max_workers)
            .with_context(|| format!("max_workers {} is too large", config.max_workers))?;
        let pool = runtime
            .block_on(
                SqlitePoolOptions::new()
                    .max_connections(max_connections)
                    .connect(&config.database_url),
            )
            .with_context(|| format!("Failed to connect to {}", config.database_url))?;
        runtime.block_on(create_customer_table(&pool, &config.table))?;
        builder.writer_factory(SqliteWriterFactory::customers(
            pool,
            runtime.handle().clone(),
            &config.table,
        ))
    };

    Ok(builder.build()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn poll_config(argv: &[&str]) -> ImportConfig {
        let args = Args::try_parse_from(argv).unwrap();
        let mut config = ImportConfig::default();
        if let Command::Poll { ftp, .. } = &args.command {
            ftp.apply(&mut config);
        }
        config
    }

    #[test]
    fn ftp_flags_fill_the_configuration() {
        let config = poll_config(&[
            "import-job",
            "poll",
            "--ftp-host",
            "ftp.example.com",
            "--ftp-user",
            "import",
            "--ftp-password",
            "secret",
            "--ftp-dir",
            "/outbound",
        ]);

        let ftp = config.ftp.clone().unwrap();
        assert_eq!(ftp.host, "ftp.example.com");
        assert_eq!(ftp.username, "import");
        assert_eq!(ftp.remote_folder, "/outbound");
        assert_eq!(ftp.port, 21);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn sink_takes_no_arguments() {
        let args = Args::try_parse_from(["import-job", "--dry-run", "sink"]).unwrap();

        assert!(matches!(args.command, Command::Sink));
        assert!(args.dry_run);
    }
}
