//! Single-probe execution with a bounded timeout.

use std::time::Duration;

use tracing::debug;

use tunward_hostctl::HostError;
use tunward_state::{HealthSignal, ProbeKind};

/// Result of attempting one probe.
#[derive(Debug)]
pub enum ProbeRun {
    /// The probe executed (pass or fail) and produced a signal.
    Signal(HealthSignal),
    /// The probe's tool is not installed; drop it for the rest of the run.
    ToolMissing { probe: String, tool: String },
}

/// Drive one probe future to a [`HealthSignal`] within `timeout`.
///
/// The future yields `Ok((passed, detail))` on execution, or a
/// [`HostError`] when the underlying tool misbehaves. Everything except a
/// missing tool folds into a signal; nothing escapes as a fault.
pub async fn run_probe<F>(
    name: &str,
    kind: ProbeKind,
    timeout: Duration,
    observed_at: u64,
    fut: F,
) -> ProbeRun
where
    F: Future<Output = Result<(bool, String), HostError>>,
{
    let outcome = tokio::time::timeout(timeout, fut).await;

    let (passed, detail) = match outcome {
        Ok(Ok((passed, detail))) => (passed, detail),
        Ok(Err(HostError::ToolMissing(tool))) => {
            return ProbeRun::ToolMissing {
                probe: name.to_string(),
                tool,
            };
        }
        Ok(Err(e)) => (false, format!("probe execution failed: {e}")),
        Err(_) => (false, format!("timed out after {}s", timeout.as_secs())),
    };

    if !passed {
        debug!(probe = %name, %detail, "probe failed");
    }

    ProbeRun::Signal(HealthSignal {
        name: name.to_string(),
        kind,
        passed,
        detail,
        observed_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn passing_probe_yields_signal() {
        let run = run_probe("dns", ProbeKind::Advisory, Duration::from_secs(1), 100, async {
            Ok((true, "resolved".to_string()))
        })
        .await;

        match run {
            ProbeRun::Signal(sig) => {
                assert!(sig.passed);
                assert_eq!(sig.name, "dns");
                assert_eq!(sig.observed_at, 100);
            }
            ProbeRun::ToolMissing { .. } => panic!("unexpected skip"),
        }
    }

    #[tokio::test]
    async fn hung_probe_times_out_as_failure() {
        let run = run_probe(
            "peer",
            ProbeKind::Advisory,
            Duration::from_millis(50),
            100,
            async {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok((true, String::new()))
            },
        )
        .await;

        match run {
            ProbeRun::Signal(sig) => {
                assert!(!sig.passed);
                assert!(sig.detail.contains("timed out"), "detail: {}", sig.detail);
            }
            ProbeRun::ToolMissing { .. } => panic!("unexpected skip"),
        }
    }

    #[tokio::test]
    async fn tool_error_folds_into_failure() {
        let run = run_probe(
            "daemon",
            ProbeKind::Critical,
            Duration::from_secs(1),
            100,
            async {
                Err(HostError::CommandFailed {
                    command: "vpn status".to_string(),
                    status: "exit status: 1".to_string(),
                    stderr: "socket refused".to_string(),
                })
            },
        )
        .await;

        match run {
            ProbeRun::Signal(sig) => {
                assert!(!sig.passed);
                assert!(sig.detail.contains("socket refused"));
            }
            ProbeRun::ToolMissing { .. } => panic!("unexpected skip"),
        }
    }

    #[tokio::test]
    async fn missing_tool_is_a_skip() {
        let run = run_probe(
            "peer",
            ProbeKind::Advisory,
            Duration::from_secs(1),
            100,
            async { Err(HostError::ToolMissing("ping".to_string())) },
        )
        .await;

        assert!(matches!(run, ProbeRun::ToolMissing { ref tool, .. } if tool == "ping"));
    }
}
