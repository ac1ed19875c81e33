use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;
use xexec_core::{CommandLine, CommandSpec, Result, XexecError};
use xexec_template::contains_placeholder;

const DELETE_ATTEMPTS: u32 = 50;
const DELETE_RETRY_DELAY: Duration = Duration::from_millis(100);

/// A file the launched command may write its results to.
///
/// Either supplied by the caller, or allocated in the temp dir when the command
/// mentions `<result_file>` without naming a path. Only allocated files are
/// deleted afterwards.
#[derive(Debug)]
pub struct ResultsFile {
    path: PathBuf,
    owned: bool,
}

impl ResultsFile {
    pub async fn for_spec(spec: &CommandSpec) -> Result<Option<Self>> {
        if let Some(path) = &spec.results_file_path {
            return Ok(Some(Self {
                path: path.clone(),
                owned: false,
            }));
        }

        let wants_file = match &spec.command {
            CommandLine::Argv(argv) => argv.iter().any(|arg| contains_placeholder(arg)),
            CommandLine::Shell(line) => contains_placeholder(line),
        };
        if !wants_file {
            return Ok(None);
        }

        let path = std::env::temp_dir().join(format!("xexec-{}.txt", Uuid::new_v4()));
        tokio::fs::File::create(&path).await?;
        debug!(path = %path.display(), "Created results file");

        Ok(Some(Self { path, owned: true }))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_owned(&self) -> bool {
        self.owned
    }

    /// Read the whole file as text. A missing file yields `None`.
    pub async fn read_once(&self) -> Result<Option<String>> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => Ok(Some(String::from_utf8_lossy(&bytes).into_owned())),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(XexecError::ResultsFileReadError {
                path: self.path.clone(),
                message: e.to_string(),
            }),
        }
    }

    /// Delete the file if this runner allocated it, retrying while something still holds it
    pub async fn cleanup(self) {
        if !self.owned {
            return;
        }

        for _ in 0..DELETE_ATTEMPTS {
            match tokio::fs::remove_file(&self.path).await {
                Ok(()) => {
                    debug!(path = %self.path.display(), "Deleted results file");
                    return;
                }
                Err(e) if e.kind() == ErrorKind::NotFound => return,
                Err(e) if e.kind() == ErrorKind::PermissionDenied => {
                    tokio::time::sleep(DELETE_RETRY_DELAY).await;
                }
                Err(e) => {
                    warn!(path = %self.path.display(), error = %e, "Failed to delete results file");
                    return;
                }
            }
        }

        warn!(
            path = %self.path.display(),
            "Gave up deleting results file after {:?}",
            DELETE_RETRY_DELAY * DELETE_ATTEMPTS
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_no_results_file_without_path_or_placeholder() {
        let spec = CommandSpec::new(["echo", "hello"]);
        assert!(ResultsFile::for_spec(&spec).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_caller_supplied_path_is_not_owned() {
        let spec = CommandSpec::new(["echo", "<result_file>"]).with_results_file("/tmp/mine.txt");
        let file = ResultsFile::for_spec(&spec).await.unwrap().unwrap();
        assert_eq!(file.path(), Path::new("/tmp/mine.txt"));
        assert!(!file.is_owned());
    }

    #[tokio::test]
    async fn test_placeholder_allocates_and_cleanup_deletes() {
        let spec = CommandSpec::shell("echo done > <result_file>");
        let file = ResultsFile::for_spec(&spec).await.unwrap().unwrap();
        assert!(file.is_owned());
        assert!(file.path().exists());

        let path = file.path().to_path_buf();
        file.cleanup().await;
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_cleanup_keeps_caller_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("results.txt");
        std::fs::write(&path, "keep me").unwrap();

        let spec = CommandSpec::new(["true"]).with_results_file(&path);
        let file = ResultsFile::for_spec(&spec).await.unwrap().unwrap();
        file.cleanup().await;
        assert!(path.exists());
    }

    #[tokio::test]
    async fn test_read_once_missing_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let spec = CommandSpec::new(["true"]).with_results_file(dir.path().join("absent.txt"));
        let file = ResultsFile::for_spec(&spec).await.unwrap().unwrap();
        assert_eq!(file.read_once().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_read_once_returns_full_contents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("results.txt");
        std::fs::write(&path, "line one\nline two\n").unwrap();

        let spec = CommandSpec::new(["true"]).with_results_file(&path);
        let file = ResultsFile::for_spec(&spec).await.unwrap().unwrap();
        assert_eq!(
            file.read_once().await.unwrap().as_deref(),
            Some("line one\nline two\n")
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_read_once_reports_unreadable_file() {
        let dir = tempfile::tempdir().unwrap();
        // a directory exists but cannot be read as a file
        let spec = CommandSpec::new(["true"]).with_results_file(dir.path());
        let file = ResultsFile::for_spec(&spec).await.unwrap().unwrap();
        let err = file.read_once().await.unwrap_err();
        assert!(matches!(err, XexecError::ResultsFileReadError { .. }));
    }
}
