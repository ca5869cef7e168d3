//! Bounded shell execution for collaborator adapters.

use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tracing::debug;

use crate::error::{HostError, HostResult};

/// Captured output of one tool invocation.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Run an external tool to completion within `timeout`.
///
/// A non-zero exit becomes [`HostError::CommandFailed`], a missing binary
/// becomes [`HostError::ToolMissing`], and a hung tool is killed at the
/// deadline and reported as [`HostError::Timeout`].
pub async fn run_tool(bin: &str, args: &[&str], timeout: Duration) -> HostResult<CommandOutput> {
    let rendered = render(bin, args);
    debug!(command = %rendered, "running tool");

    let child = Command::new(bin)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => HostError::ToolMissing(bin.to_string()),
            _ => HostError::Io(e),
        })?;

    let output = tokio::time::timeout(timeout, child.wait_with_output())
        .await
        .map_err(|_| HostError::Timeout {
            command: rendered.clone(),
            timeout_secs: timeout.as_secs(),
        })??;

    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

    if output.status.success() {
        Ok(CommandOutput { stdout, stderr })
    } else {
        Err(HostError::CommandFailed {
            command: rendered,
            status: output.status.to_string(),
            stderr: stderr.trim().to_string(),
        })
    }
}

fn render(bin: &str, args: &[&str]) -> String {
    let mut s = bin.to_string();
    for a in args {
        s.push(' ');
        s.push_str(a);
    }
    s
}
