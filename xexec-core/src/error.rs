use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum XexecError {
    #[error("Invalid command spec: {0}")]
    InvalidSpecError(String),

    #[error("Launch error: {0}")]
    LaunchError(String),

    #[error("Could not read results file {}: {message}", .path.display())]
    ResultsFileReadError { path: PathBuf, message: String },

    #[error("Template error: {0}")]
    TemplateError(String),

    #[error("Execution error: {0}")]
    ExecutionError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, XexecError>;
