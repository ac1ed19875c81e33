use anyhow::Context;
use async_trait::async_trait;
use clap::{Args, Parser, Subcommand};
use std::fs;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{info, warn};
use xexec_core::{ChunkSource, CommandSpec, OutputChunk, RunFailure, RunResult};
use xexec_runner::{Canceller, Execution, NullSink, OutputSink, ProcessRunner};

#[derive(Parser)]
#[command(name = "xexec")]
#[command(about = "Run an external command and collect its output", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Print the run result as JSON instead of streaming output
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a command described by flags
    Run(RunArgs),

    /// Run a command described by a JSON document of exec arguments
    Exec {
        /// Path to the JSON document
        #[arg(short, long)]
        spec: PathBuf,
    },
}

#[derive(Args)]
struct RunArgs {
    /// Working directory for the command
    #[arg(long)]
    cwd: Option<PathBuf>,

    /// Environment overlay entry (NAME=VALUE), may be repeated
    #[arg(short, long = "env", value_parser = parse_env_pair)]
    env: Vec<(String, String)>,

    /// PATH for the command; may reference $PATH
    #[arg(long)]
    path: Option<String>,

    /// Text shown before any command output
    #[arg(long)]
    initial_message: Option<String>,

    /// File whose contents are appended after the command exits
    #[arg(long)]
    results_file: Option<PathBuf>,

    /// Do not pass the platform startup hint that hides console windows
    #[arg(long)]
    no_startup_info: bool,

    /// Start the command and follow it through a handle instead of blocking in the runner
    #[arg(long)]
    no_wait: bool,

    /// Kill the command after this many seconds
    #[arg(long)]
    timeout: Option<u64>,

    /// Shell command line, run through the platform shell
    #[arg(long, conflicts_with = "argv")]
    shell: Option<String>,

    /// Program and arguments
    #[arg(last = true, required_unless_present = "shell")]
    argv: Vec<String>,
}

impl RunArgs {
    fn into_spec(self) -> CommandSpec {
        let mut spec = match self.shell {
            Some(line) => CommandSpec::shell(line),
            None => CommandSpec::new(self.argv),
        };

        for (name, value) in self.env {
            spec = spec.with_env(name, value);
        }
        if let Some(dir) = self.cwd {
            spec = spec.with_working_directory(dir);
        }
        if let Some(path) = self.path {
            spec = spec.with_path(path);
        }
        if let Some(message) = self.initial_message {
            spec = spec.with_initial_message(message);
        }
        if let Some(file) = self.results_file {
            spec = spec.with_results_file(file);
        }
        if let Some(secs) = self.timeout {
            spec = spec.with_timeout(Duration::from_secs(secs));
        }

        spec.with_suppressed_startup_info(self.no_startup_info)
            .with_wait(!self.no_wait)
    }
}

fn parse_env_pair(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((name, value)) if !name.is_empty() => Ok((name.to_string(), value.to_string())),
        _ => Err(format!("expected NAME=VALUE, got '{}'", raw)),
    }
}

/// Writes chunks to the terminal as they arrive
struct TerminalSink;

#[async_trait]
impl OutputSink for TerminalSink {
    async fn on_chunk(&self, chunk: &OutputChunk) {
        let written = match chunk.source {
            ChunkSource::Stderr => write_text(tokio::io::stderr(), &chunk.text).await,
            ChunkSource::InitialMessage if !chunk.text.ends_with('\n') => {
                write_text(tokio::io::stdout(), &format!("{}\n", chunk.text)).await
            }
            _ => write_text(tokio::io::stdout(), &chunk.text).await,
        };
        if let Err(e) = written {
            warn!(error = %e, "Failed to write output");
        }
    }
}

async fn write_text<W: AsyncWrite + Unpin>(mut out: W, text: &str) -> std::io::Result<()> {
    out.write_all(text.as_bytes()).await?;
    out.flush().await
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let spec = match cli.command {
        Commands::Run(args) => args.into_spec(),
        Commands::Exec { spec } => load_spec(&spec)?,
    };

    let result = execute(spec, cli.json).await?;

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print_summary(&result);
    }

    process::exit(exit_status(&result));
}

fn load_spec(path: &Path) -> anyhow::Result<CommandSpec> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read spec at {}", path.display()))?;
    CommandSpec::from_json(&content)
        .with_context(|| format!("Invalid command spec in {}", path.display()))
}

async fn execute(spec: CommandSpec, json: bool) -> anyhow::Result<RunResult> {
    execute_until(spec, json, async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Ctrl-C handler unavailable");
            std::future::pending::<()>().await;
        }
    })
    .await
}

/// Run `spec`, cancelling the command if `interrupt` resolves first
async fn execute_until<F>(spec: CommandSpec, json: bool, interrupt: F) -> anyhow::Result<RunResult>
where
    F: Future<Output = ()> + Send + 'static,
{
    let sink: Arc<dyn OutputSink> = if json {
        Arc::new(NullSink)
    } else {
        Arc::new(TerminalSink)
    };

    let canceller = Canceller::default();
    let on_interrupt = canceller.clone();
    let watcher = tokio::spawn(async move {
        interrupt.await;
        info!("Interrupted, cancelling command");
        on_interrupt.cancel();
    });

    let runner = ProcessRunner::new();
    let finished = match runner.run_cancellable(spec, sink, canceller).await {
        Ok(Execution::Completed(result)) => Ok(result),
        Ok(Execution::Running(handle)) => {
            info!(pid = ?handle.pid(), "Following background process");
            handle.wait().await
        }
        Err(e) => Err(e),
    };
    watcher.abort();

    Ok(finished?)
}

fn print_summary(result: &RunResult) {
    if let Some(last) = result.output.last() {
        if last.source != ChunkSource::InitialMessage && !last.text.ends_with('\n') {
            println!();
        }
    }
    if let Some(error) = &result.results_file_error {
        eprintln!("[{}]", error);
    }
    println!("{}", footer(result));
}

fn footer(result: &RunResult) -> String {
    let secs = result.duration_ms as f64 / 1000.0;
    match &result.failure {
        Some(RunFailure::Launch { message }) => format!("{}\n[Finished]", message),
        Some(RunFailure::TimedOut { after_ms }) => {
            format!("[Timed out after {:.1}s]", *after_ms as f64 / 1000.0)
        }
        Some(RunFailure::Cancelled) => "[Cancelled]".to_string(),
        Some(RunFailure::Wait { message }) => format!("[Failed: {}]", message),
        None => match result.exit_code {
            Some(code) if code != 0 => {
                format!("[Finished in {:.1}s with exit code {}]", secs, code)
            }
            _ => format!("[Finished in {:.1}s]", secs),
        },
    }
}

fn exit_status(result: &RunResult) -> i32 {
    match (&result.failure, result.exit_code) {
        (None, Some(code)) => code,
        _ => 1,
    }
}
