//! Snapshot assembly.

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use tunward_hostctl::{HostError, VpnControl, run_tool};
use tunward_state::{DiagBlock, DiagnosticsSnapshot, EscalationState, HealthVerdict};

/// Lines kept from the noisier tool outputs.
const PROCESS_LINES: usize = 15;
const FILTER_LINES: usize = 20;

/// Gathers one [`DiagnosticsSnapshot`] per escalation entry.
pub struct DiagnosticsRecorder<V> {
    vpn: Arc<V>,
    timeout: Duration,
}

impl<V: VpnControl> DiagnosticsRecorder<V> {
    pub fn new(vpn: Arc<V>, timeout: Duration) -> Self {
        Self { vpn, timeout }
    }

    /// Capture the evidence blocks. Individual gather failures become
    /// "unavailable" entries rather than aborting the snapshot.
    pub async fn snapshot(
        &self,
        escalation: &EscalationState,
        recent_verdicts: &[HealthVerdict],
        now: u64,
    ) -> DiagnosticsSnapshot {
        info!(
            failures = escalation.consecutive_failures,
            "capturing diagnostics snapshot"
        );

        let (vpn_status, processes, interfaces, routes, filter_rules) = tokio::join!(
            self.vpn_status_block(),
            tool_block("ps", &["axo", "pid,comm,%cpu,%mem", "--sort=-%cpu"], self.timeout),
            tool_block("ip", &["-brief", "addr"], self.timeout),
            tool_block("ip", &["route"], self.timeout),
            tool_block("iptables", &["-S"], self.timeout),
        );

        let blocks = vec![
            DiagBlock {
                label: "vpn status".to_string(),
                content: vpn_status,
            },
            DiagBlock {
                label: "processes".to_string(),
                content: head(&processes, PROCESS_LINES),
            },
            DiagBlock {
                label: "interfaces".to_string(),
                content: interfaces,
            },
            DiagBlock {
                label: "routes".to_string(),
                content: routes,
            },
            DiagBlock {
                label: "filter rules".to_string(),
                content: head(&filter_rules, FILTER_LINES),
            },
            DiagBlock {
                label: "recent verdicts".to_string(),
                content: render_verdicts(recent_verdicts),
            },
        ];

        DiagnosticsSnapshot {
            taken_at: now,
            consecutive_failures: escalation.consecutive_failures,
            tier: escalation.last_escalation_tier,
            blocks,
        }
    }

    async fn vpn_status_block(&self) -> String {
        match self.vpn.status().await {
            Ok(s) => format!(
                "running={} authenticated={} exit_node_active={} peers={}",
                s.running, s.authenticated, s.exit_node_active, s.peer_count
            ),
            Err(e) => unavailable(&e),
        }
    }
}

async fn tool_block(bin: &str, args: &[&str], timeout: Duration) -> String {
    match run_tool(bin, args, timeout).await {
        Ok(out) => out.stdout,
        Err(e) => unavailable(&e),
    }
}

fn unavailable(e: &HostError) -> String {
    format!("unavailable: {e}")
}

fn head(text: &str, lines: usize) -> String {
    text.lines()
        .take(lines)
        .collect::<Vec<_>>()
        .join("\n")
}

fn render_verdicts(verdicts: &[HealthVerdict]) -> String {
    if verdicts.is_empty() {
        return "(no verdicts yet)".to_string();
    }
    verdicts
        .iter()
        .map(|v| {
            if v.passed {
                format!("{} pass", v.observed_at)
            } else {
                format!("{} FAIL [{}]", v.observed_at, v.failing_signals.join(", "))
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}
