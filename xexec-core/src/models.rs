use crate::error::{Result, XexecError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// What to launch: an argument vector, or a single line handed to the platform shell
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum CommandLine {
    #[serde(rename = "cmd")]
    Argv(Vec<String>),
    #[serde(rename = "shell_cmd")]
    Shell(String),
}

impl CommandLine {
    /// Human readable rendering used in logs and result records
    pub fn display(&self) -> String {
        match self {
            CommandLine::Argv(argv) => argv.join(" "),
            CommandLine::Shell(line) => line.clone(),
        }
    }
}

/// A launch request for a single external command
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(try_from = "RawCommandSpec")]
pub struct CommandSpec {
    #[serde(flatten)]
    pub command: CommandLine,
    pub working_directory: Option<PathBuf>,
    /// Overlaid on the inherited environment; values may reference `$VAR` / `${VAR}`
    pub environment: BTreeMap<String, String>,
    /// Replaces PATH for the child
    pub path: Option<String>,
    pub initial_message: Option<String>,
    pub results_file_path: Option<PathBuf>,
    pub suppress_platform_startup_info: bool,
    pub wait_for_completion: bool,
    pub timeout_ms: Option<u64>,
}

/// Exec arguments as they arrive over JSON, where `cmd` and `shell_cmd` may both be present
#[derive(Deserialize)]
struct RawCommandSpec {
    #[serde(default)]
    cmd: Option<Vec<String>>,
    #[serde(default)]
    shell_cmd: Option<String>,
    #[serde(default, alias = "working_dir")]
    working_directory: Option<PathBuf>,
    #[serde(default, alias = "env")]
    environment: BTreeMap<String, String>,
    #[serde(default)]
    path: Option<String>,
    #[serde(default)]
    initial_message: Option<String>,
    #[serde(default)]
    results_file_path: Option<PathBuf>,
    #[serde(default)]
    suppress_platform_startup_info: bool,
    #[serde(default, alias = "wait")]
    wait_for_completion: bool,
    #[serde(default)]
    timeout_ms: Option<u64>,
}

impl TryFrom<RawCommandSpec> for CommandSpec {
    type Error = String;

    /// A non-empty `shell_cmd` overrides `cmd`
    fn try_from(raw: RawCommandSpec) -> std::result::Result<Self, Self::Error> {
        let command = match (raw.shell_cmd, raw.cmd) {
            (Some(line), _) if !line.is_empty() => CommandLine::Shell(line),
            (_, Some(argv)) => CommandLine::Argv(argv),
            (Some(line), None) => CommandLine::Shell(line),
            (None, None) => return Err("either `cmd` or `shell_cmd` is required".to_string()),
        };

        Ok(Self {
            command,
            working_directory: raw.working_directory,
            environment: raw.environment,
            path: raw.path,
            initial_message: raw.initial_message,
            results_file_path: raw.results_file_path,
            suppress_platform_startup_info: raw.suppress_platform_startup_info,
            wait_for_completion: raw.wait_for_completion,
            timeout_ms: raw.timeout_ms,
        })
    }
}

impl CommandSpec {
    pub fn new<I, S>(argv: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::from_command(CommandLine::Argv(argv.into_iter().map(Into::into).collect()))
    }

    pub fn shell(line: impl Into<String>) -> Self {
        Self::from_command(CommandLine::Shell(line.into()))
    }

    fn from_command(command: CommandLine) -> Self {
        Self {
            command,
            working_directory: None,
            environment: BTreeMap::new(),
            path: None,
            initial_message: None,
            results_file_path: None,
            suppress_platform_startup_info: false,
            wait_for_completion: false,
            timeout_ms: None,
        }
    }

    /// Parse exec keyword arguments handed over as a JSON object
    pub fn from_json(input: &str) -> Result<Self> {
        Ok(serde_json::from_str(input)?)
    }

    pub fn with_working_directory<P: AsRef<Path>>(mut self, dir: P) -> Self {
        self.working_directory = Some(dir.as_ref().to_path_buf());
        self
    }

    pub fn with_env(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.environment.insert(name.into(), value.into());
        self
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn with_initial_message(mut self, message: impl Into<String>) -> Self {
        self.initial_message = Some(message.into());
        self
    }

    pub fn with_results_file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.results_file_path = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn with_suppressed_startup_info(mut self, suppress: bool) -> Self {
        self.suppress_platform_startup_info = suppress;
        self
    }

    pub fn with_wait(mut self, wait: bool) -> Self {
        self.wait_for_completion = wait;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }

    pub fn display_command(&self) -> String {
        self.command.display()
    }

    /// Reject requests that can never be launched, before any process is started
    pub fn validate(&self) -> Result<()> {
        match &self.command {
            CommandLine::Argv(argv) => match argv.first() {
                None => {
                    return Err(XexecError::InvalidSpecError(
                        "command argument list is empty".to_string(),
                    ))
                }
                Some(program) if program.trim().is_empty() => {
                    return Err(XexecError::InvalidSpecError(
                        "program name is blank".to_string(),
                    ))
                }
                Some(_) => {}
            },
            CommandLine::Shell(line) => {
                if line.trim().is_empty() {
                    return Err(XexecError::InvalidSpecError(
                        "shell command is blank".to_string(),
                    ));
                }
            }
        }

        if let Some(dir) = &self.working_directory {
            if !dir.is_dir() {
                return Err(XexecError::InvalidSpecError(format!(
                    "working directory does not exist: {}",
                    dir.display()
                )));
            }
        }

        Ok(())
    }
}

/// Where a chunk of output came from
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ChunkSource {
    InitialMessage,
    Stdout,
    Stderr,
    ResultsFile,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OutputChunk {
    pub source: ChunkSource,
    pub text: String,
}

impl OutputChunk {
    pub fn new(source: ChunkSource, text: impl Into<String>) -> Self {
        Self {
            source,
            text: text.into(),
        }
    }
}

/// Why a run did not end with the process exiting on its own
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RunFailure {
    Launch { message: String },
    TimedOut { after_ms: u64 },
    Cancelled,
    Wait { message: String },
}

/// Overall status of a run, derived from its result
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum RunStatus {
    Success,
    Failed,
    LaunchFailed,
    TimedOut,
    Cancelled,
}

/// Outcome of running a CommandSpec
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunResult {
    pub command: String,
    pub exit_code: Option<i32>,
    pub output: Vec<OutputChunk>,
    pub failure: Option<RunFailure>,
    /// Set when the results file existed but could not be read
    pub results_file_error: Option<String>,
    pub duration_ms: u64,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl RunResult {
    pub fn new(command: String, started_at: DateTime<Utc>) -> Self {
        Self {
            command,
            exit_code: None,
            output: Vec::new(),
            failure: None,
            results_file_error: None,
            duration_ms: 0,
            started_at,
            completed_at: None,
        }
    }

    /// True when the process could not be started or did not exit on its own
    pub fn timed_out_or_failed(&self) -> bool {
        self.failure.is_some()
    }

    pub fn success(&self) -> bool {
        self.failure.is_none() && self.exit_code == Some(0)
    }

    pub fn status(&self) -> RunStatus {
        match &self.failure {
            Some(RunFailure::Launch { .. }) => RunStatus::LaunchFailed,
            Some(RunFailure::TimedOut { .. }) => RunStatus::TimedOut,
            Some(RunFailure::Cancelled) => RunStatus::Cancelled,
            Some(RunFailure::Wait { .. }) => RunStatus::Failed,
            None if self.exit_code == Some(0) => RunStatus::Success,
            None => RunStatus::Failed,
        }
    }

    pub fn chunk_texts(&self) -> Vec<&str> {
        self.output.iter().map(|c| c.text.as_str()).collect()
    }

    pub fn combined_text(&self) -> String {
        self.output.iter().map(|c| c.text.as_str()).collect()
    }
}
