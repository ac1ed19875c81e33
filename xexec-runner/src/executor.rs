use crate::capture::spawn_reader;
use crate::handle::{Canceller, Execution, RunHandle};
use crate::process::ProcessConfig;
use crate::results_file::ResultsFile;
use crate::sink::{NullSink, OutputSink};
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::process::ExitStatus;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::process::Child;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use xexec_core::{
    ChunkSource, CommandSpec, OutputChunk, Result, RunFailure, RunResult, XexecError,
};

/// Launches external commands and collects their output
#[derive(Clone)]
pub struct ProcessRunner {
    work_dir: Option<PathBuf>,
}

impl ProcessRunner {
    pub fn new() -> Self {
        Self { work_dir: None }
    }

    /// Working directory used for specs that do not name one
    pub fn with_work_dir<P: AsRef<Path>>(mut self, dir: P) -> Self {
        self.work_dir = Some(dir.as_ref().to_path_buf());
        self
    }

    /// Launch `spec`, streaming every chunk to `sink` as it is captured.
    ///
    /// Invalid specs are rejected with an error before anything is started.
    /// Everything that goes wrong after that (launch, timeout, results file)
    /// is recorded on the returned `RunResult` instead.
    ///
    /// With `wait_for_completion` the call resolves only after the process has
    /// exited. Otherwise it returns a `RunHandle` right after launch.
    pub async fn run(&self, spec: CommandSpec, sink: Arc<dyn OutputSink>) -> Result<Execution> {
        self.run_cancellable(spec, sink, Canceller::default()).await
    }

    /// Like `run`, with a caller-held `Canceller` that also reaches runs waiting for completion
    pub async fn run_cancellable(
        &self,
        mut spec: CommandSpec,
        sink: Arc<dyn OutputSink>,
        canceller: Canceller,
    ) -> Result<Execution> {
        if spec.working_directory.is_none() {
            spec.working_directory = self.work_dir.clone();
        }
        spec.validate()?;

        let mut collector = Collector::new(spec.display_command(), sink);

        info!(
            command = %collector.result.command,
            wait = spec.wait_for_completion,
            "Running command"
        );

        if let Some(message) = &spec.initial_message {
            collector
                .append(OutputChunk::new(ChunkSource::InitialMessage, message.clone()))
                .await;
        }

        let results_file = match ResultsFile::for_spec(&spec).await {
            Ok(file) => file,
            Err(e) => return Ok(Execution::Completed(collector.launch_failed(e))),
        };

        let spawned = ProcessConfig::prepare(&spec, results_file.as_ref().map(ResultsFile::path))
            .and_then(|config| spawn(&config));

        let child = match spawned {
            Ok(child) => child,
            Err(e) => {
                if let Some(file) = results_file {
                    file.cleanup().await;
                }
                return Ok(Execution::Completed(collector.launch_failed(e)));
            }
        };

        let pid = child.id();
        info!(pid = ?pid, command = %collector.result.command, "Process started");

        let task = tokio::spawn(drive(
            child,
            collector,
            results_file,
            spec.timeout(),
            canceller.clone(),
        ));
        let handle = RunHandle::new(pid, canceller, task);

        if spec.wait_for_completion {
            Ok(Execution::Completed(handle.wait().await?))
        } else {
            Ok(Execution::Running(handle))
        }
    }

    /// Run and wait for the result, discarding the live chunk stream
    pub async fn run_to_completion(&self, spec: CommandSpec) -> Result<RunResult> {
        self.run(spec, Arc::new(NullSink)).await?.into_result().await
    }
}

impl Default for ProcessRunner {
    fn default() -> Self {
        Self::new()
    }
}

fn spawn(config: &ProcessConfig) -> Result<Child> {
    config.command().spawn().map_err(|e| {
        XexecError::LaunchError(format!("{}: {}", config.program.display(), e))
    })
}

/// Builds the RunResult and mirrors every appended chunk to the sink
struct Collector {
    result: RunResult,
    sink: Arc<dyn OutputSink>,
    start: Instant,
}

impl Collector {
    fn new(command: String, sink: Arc<dyn OutputSink>) -> Self {
        Self {
            result: RunResult::new(command, Utc::now()),
            sink,
            start: Instant::now(),
        }
    }

    async fn append(&mut self, chunk: OutputChunk) {
        self.sink.on_chunk(&chunk).await;
        self.result.output.push(chunk);
    }

    async fn append_results_file(&mut self, file: &ResultsFile) {
        match file.read_once().await {
            Ok(Some(text)) => {
                debug!(path = %file.path().display(), bytes = text.len(), "Appending results file");
                self.append(OutputChunk::new(ChunkSource::ResultsFile, text))
                    .await;
            }
            Ok(None) => {
                debug!(path = %file.path().display(), "No results file was produced");
            }
            Err(e) => {
                warn!(error = %e, "Results file could not be read");
                self.result.results_file_error = Some(e.to_string());
            }
        }
    }

    fn launch_failed(mut self, err: XexecError) -> RunResult {
        error!(
            command = %self.result.command,
            error = %err,
            "Failed to launch process"
        );
        self.result.failure = Some(RunFailure::Launch {
            message: err.to_string(),
        });
        self.finish()
    }

    fn finish(mut self) -> RunResult {
        self.result.duration_ms = self.start.elapsed().as_millis() as u64;
        self.result.completed_at = Some(Utc::now());
        self.result
    }
}

enum ExitOutcome {
    Exited(ExitStatus),
    TimedOut(Duration),
    Cancelled,
    WaitFailed(String),
}

/// Collect output until the process has exited and both streams are drained,
/// then read the results file
async fn drive(
    mut child: Child,
    mut collector: Collector,
    results_file: Option<ResultsFile>,
    timeout: Option<Duration>,
    canceller: Canceller,
) -> RunResult {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut readers = Vec::with_capacity(2);
    if let Some(stdout) = child.stdout.take() {
        readers.push(spawn_reader(stdout, ChunkSource::Stdout, tx.clone()));
    }
    if let Some(stderr) = child.stderr.take() {
        readers.push(spawn_reader(stderr, ChunkSource::Stderr, tx.clone()));
    }
    drop(tx);

    let exit = wait_for_exit(&mut child, timeout, &canceller);
    tokio::pin!(exit);

    let mut outcome = None;
    let mut streams_open = true;
    while streams_open || outcome.is_none() {
        tokio::select! {
            chunk = rx.recv(), if streams_open => match chunk {
                Some(chunk) => collector.append(chunk).await,
                None => streams_open = false,
            },
            finished = &mut exit, if outcome.is_none() => {
                if !matches!(finished, ExitOutcome::Exited(_)) {
                    // killed: descendants may still hold the pipes open
                    for reader in &readers {
                        reader.abort();
                    }
                }
                outcome = Some(finished);
            }
        }
    }

    let outcome = outcome
        .unwrap_or_else(|| ExitOutcome::WaitFailed("process state unknown".to_string()));

    match outcome {
        ExitOutcome::Exited(status) => {
            collector.result.exit_code = status.code();
            info!(
                command = %collector.result.command,
                exit_code = ?status.code(),
                "Process exited"
            );
            if let Some(file) = &results_file {
                collector.append_results_file(file).await;
            }
        }
        ExitOutcome::TimedOut(limit) => {
            warn!(command = %collector.result.command, timeout = ?limit, "Process timed out");
            collector.result.failure = Some(RunFailure::TimedOut {
                after_ms: limit.as_millis() as u64,
            });
        }
        ExitOutcome::Cancelled => {
            info!(command = %collector.result.command, "Process cancelled");
            collector.result.failure = Some(RunFailure::Cancelled);
        }
        ExitOutcome::WaitFailed(message) => {
            error!(command = %collector.result.command, error = %message, "Lost track of process");
            collector.result.failure = Some(RunFailure::Wait { message });
        }
    }

    if let Some(file) = results_file {
        file.cleanup().await;
    }

    collector.finish()
}

async fn wait_for_exit(
    child: &mut Child,
    timeout: Option<Duration>,
    canceller: &Canceller,
) -> ExitOutcome {
    let deadline = async {
        match timeout {
            Some(limit) => {
                tokio::time::sleep(limit).await;
                limit
            }
            None => std::future::pending::<Duration>().await,
        }
    };

    let outcome = tokio::select! {
        status = child.wait() => match status {
            Ok(status) => ExitOutcome::Exited(status),
            Err(e) => ExitOutcome::WaitFailed(e.to_string()),
        },
        limit = deadline => ExitOutcome::TimedOut(limit),
        _ = canceller.cancelled() => ExitOutcome::Cancelled,
    };

    if matches!(outcome, ExitOutcome::TimedOut(_) | ExitOutcome::Cancelled) {
        if let Err(e) = child.kill().await {
            warn!(error = %e, "Failed to kill process");
        }
    }

    outcome
}
