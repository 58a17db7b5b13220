//! Remote command execution.
//!
//! `RemoteExecutor` runs commands on an instance over ssh through the
//! injected `CommandRunner`. Connection timeouts are kept apart from every
//! other failure: a timeout is the one condition the orchestrator answers
//! by booting the instance and trying again.

use std::sync::Arc;

use thiserror::Error;
use tracing::debug;

use super::config::SshEndpoint;
use crate::infrastructure::runner::CommandRunner;


// ---------------------------------------------------------------------------
// RemoteError
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoteError {
    /// The ssh connection or the command timed out.
    #[error("timed out: {0}")]
    Timeout(String),
    /// Any other failure, with the combined command output.
    #[error("{0}")]
    Failed(String),
}

impl RemoteError {
    /// Sort a raw failure message into `Timeout` or `Failed`.
    pub fn classify(message: String) -> Self {
        if is_timeout(&message) {
            RemoteError::Timeout(message)
        } else {
            RemoteError::Failed(message)
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, RemoteError::Timeout(_))
    }

    pub fn message(&self) -> &str {
        match self {
            RemoteError::Timeout(m) | RemoteError::Failed(m) => m,
        }
    }
}

/// Whether an ssh error message describes a timeout.
pub fn is_timeout(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    lower.contains("timed out") || lower.contains("time out") || lower.contains("timeout")
}


// ---------------------------------------------------------------------------
// RemoteExecutor
// ---------------------------------------------------------------------------

/// Executes commands against instance endpoints.
#[derive(Clone)]
pub struct RemoteExecutor {
    runner: Arc<dyn CommandRunner>,
}

impl RemoteExecutor {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        RemoteExecutor { runner }
    }

    /// Run `command` on `endpoint` and return its combined output.
    pub fn exec(&self, endpoint: &SshEndpoint, command: &str) -> Result<String, RemoteError> {
        debug!(endpoint = %endpoint, command, "remote exec");
        self.runner
            .run(&endpoint.ssh_command(command))
            .map_err(RemoteError::classify)
    }
}
