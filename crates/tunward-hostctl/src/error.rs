//! Error types for host collaborator calls.

use thiserror::Error;

/// Result type alias for collaborator operations.
pub type HostResult<T> = Result<T, HostError>;

/// Errors from driving an external tool.
#[derive(Debug, Error)]
pub enum HostError {
    /// The tool binary is not installed or not on PATH. Callers treat this
    /// as skip-for-the-run, not retry-every-tick.
    #[error("tool not found: {0}")]
    ToolMissing(String),

    #[error("{command} exited with {status}: {stderr}")]
    CommandFailed {
        command: String,
        status: String,
        stderr: String,
    },

    #[error("{command} timed out after {timeout_secs}s")]
    Timeout {
        command: String,
        timeout_secs: u64,
    },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("unparseable output from {source_tool}: {detail}")]
    Parse {
        source_tool: String,
        detail: String,
    },
}
