use std::sync::Arc;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use xexec_core::{Result, RunResult, XexecError};

/// Requests termination of a running process. Cheap to clone.
#[derive(Debug, Clone, Default)]
pub struct Canceller {
    notify: Arc<Notify>,
}

impl Canceller {
    pub fn cancel(&self) {
        // notify_one stores a permit, so a cancel issued before the runner
        // starts waiting is not lost
        self.notify.notify_one();
    }

    pub(crate) async fn cancelled(&self) {
        self.notify.notified().await
    }
}

/// A process started without waiting for completion
#[derive(Debug)]
pub struct RunHandle {
    pid: Option<u32>,
    canceller: Canceller,
    task: JoinHandle<RunResult>,
}

impl RunHandle {
    pub(crate) fn new(pid: Option<u32>, canceller: Canceller, task: JoinHandle<RunResult>) -> Self {
        Self {
            pid,
            canceller,
            task,
        }
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    pub fn canceller(&self) -> Canceller {
        self.canceller.clone()
    }

    /// Kill the process. The result resolves as cancelled.
    pub fn cancel(&self) {
        self.canceller.cancel();
    }

    /// Resolve once the process has exited and all output has been collected
    pub async fn wait(self) -> Result<RunResult> {
        self.task
            .await
            .map_err(|e| XexecError::ExecutionError(format!("Run task failed: {}", e)))
    }
}

/// What `ProcessRunner::run` hands back
#[derive(Debug)]
pub enum Execution {
    /// The process has exited (or never started)
    Completed(RunResult),
    Running(RunHandle),
}

impl Execution {
    pub fn is_completed(&self) -> bool {
        matches!(self, Execution::Completed(_))
    }

    pub async fn into_result(self) -> Result<RunResult> {
        match self {
            Execution::Completed(result) => Ok(result),
            Execution::Running(handle) => handle.wait().await,
        }
    }
}
