//! Error taxonomy for a single orchestration run.
//!
//! Any error raised after provisioning leaves persisted instance state
//! behind for `cleanup`. Chunking failures only affect the one input they
//! were computed for.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ScanError {
    /// The provider could not create an instance. No teardown is needed.
    #[error("instance could not be provisioned: {0}")]
    ProvisionFailed(String),

    /// The scan job could not be confirmed running after injection.
    #[error("scan could not be started on {endpoint}: {reason}")]
    LaunchFailed { endpoint: String, reason: String },

    /// A bulk transfer never produced the expected output.
    #[error("transfer failed after {attempts} attempts: {command}")]
    TransferFailed { command: String, attempts: u32 },

    /// Neither a done marker nor a scan process was found on the instance.
    #[error("no scan process running at {endpoint}")]
    ProcessDied { endpoint: String },

    /// The remote job output contained a panic signature.
    #[error("panic detected at {endpoint}")]
    PanicDetected { endpoint: String },

    /// The configured iteration cap or deadline was reached while polling.
    #[error("polling {endpoint} gave up after {iterations} iterations")]
    PollTimedOut { endpoint: String, iterations: u64 },

    #[error("failed to delete instance {id}: {reason}")]
    TeardownFailed { id: String, reason: String },

    #[error("cannot split {}: {reason}", path.display())]
    SplitError { path: PathBuf, reason: String },

    #[error("invalid input {}: {reason}", path.display())]
    InvalidInput { path: PathBuf, reason: String },

    #[error("workflow resolution failed: {0}")]
    Workflow(String),

    #[error("configuration error: {0}")]
    Config(String),

    /// Resume was asked for an instance whose scan never started.
    #[error("instance {0} never launched a scan, nothing to resume")]
    NotLaunched(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ScanError>;
