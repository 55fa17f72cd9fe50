//! Error taxonomy for the execution pipeline

use std::time::Duration;
use thiserror::Error;

/// Errors that abort a run before any attempt is recorded
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Exercise path not found in workspace or course runtime: {path}")]
    PathNotFound { path: String },

    #[error("No runnable entry file in exercise directory: {path}")]
    NoEntryFile { path: String },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Unknown exercise: {id}")]
    UnknownExercise { id: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Strategy-level failures. These never escape the pipeline as errors; each
/// one is rendered into a failed run report.
#[derive(Error, Debug)]
pub enum ExecutionFailure {
    #[error("Container runtime unavailable: {reason}")]
    RuntimeUnavailable { reason: String },

    #[error("Image build failed for {tag}")]
    BuildFailed { tag: String, output: String },

    #[error("Docker Compose error: {message}")]
    ComposeError { message: String, output: String },

    #[error("Failed to spawn '{command}': {source}")]
    SpawnError {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Execution timed out after {}s", .after.as_secs())]
    Timeout { after: Duration, partial_output: String },
}

impl ExecutionFailure {
    /// Short heading used in the rendered report
    pub fn title(&self) -> &'static str {
        match self {
            ExecutionFailure::RuntimeUnavailable { .. } => "Docker Error",
            ExecutionFailure::BuildFailed { .. } => "Build Error",
            ExecutionFailure::ComposeError { .. } => "Compose Error",
            ExecutionFailure::SpawnError { .. } => "Spawn Error",
            ExecutionFailure::Timeout { .. } => "Timeout",
        }
    }

    /// Captured tool output, preserved verbatim for diagnosis
    pub fn captured_output(&self) -> &str {
        match self {
            ExecutionFailure::BuildFailed { output, .. } => output,
            ExecutionFailure::ComposeError { output, .. } => output,
            ExecutionFailure::Timeout { partial_output, .. } => partial_output,
            _ => "",
        }
    }

    /// Human remediation hint shown under the heading
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            ExecutionFailure::RuntimeUnavailable { .. } => {
                Some("Docker is not running. Please install or start Docker Desktop and try again.")
            }
            ExecutionFailure::BuildFailed { .. } => {
                Some("The course environment image could not be built. Check the Dockerfile output below.")
            }
            ExecutionFailure::SpawnError { .. } => {
                Some("The runner command could not be started. Make sure the toolchain is installed and on PATH.")
            }
            ExecutionFailure::Timeout { .. } => {
                Some("Your program ran longer than allowed. Look for infinite loops or blocking input.")
            }
            ExecutionFailure::ComposeError { .. } => None,
        }
    }
}

/// Errors from reading or writing the progress aggregate
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Progress file I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Progress data is not valid JSON: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Progress service request failed: {0}")]
    Http(String),

    #[error("Progress service returned status {status}")]
    Status { status: u16 },
}
