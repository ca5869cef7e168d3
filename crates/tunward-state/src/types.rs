//! Domain types for the tunnel supervisor.
//!
//! Health signals and verdicts are per-tick values, created and consumed
//! within one scheduler pass. The usage ledger and status report are the
//! durable records; both serialize to JSON for the file store.

use std::time::SystemTime;

use serde::{Deserialize, Serialize};

// ── Health ─────────────────────────────────────────────────────────

/// Classification of a liveness probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeKind {
    /// Failure of any critical probe fails the whole verdict.
    Critical,
    /// Advisory probes are individually flaky; they count via quorum.
    Advisory,
}

/// One probe's verdict for a single tick. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthSignal {
    pub name: String,
    pub kind: ProbeKind,
    pub passed: bool,
    pub detail: String,
    /// Unix timestamp (seconds) when the probe ran.
    pub observed_at: u64,
}

/// Aggregate of one tick's health signals, consumed once by the
/// escalation state machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthVerdict {
    pub passed: bool,
    /// Names of failing signals, in probe order.
    pub failing_signals: Vec<String>,
    /// Full per-signal detail, kept for the status artifact and snapshots.
    pub signals: Vec<HealthSignal>,
    pub observed_at: u64,
}

impl HealthVerdict {
    /// A passing verdict with no signals (used by forced-remediation paths).
    pub fn passing(observed_at: u64) -> Self {
        Self {
            passed: true,
            failing_signals: Vec::new(),
            signals: Vec::new(),
            observed_at,
        }
    }
}

// ── Escalation ─────────────────────────────────────────────────────

/// Ordered remediation ladder; each step has a larger blast radius.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemediationTier {
    None,
    SoftRestart,
    CredentialRefresh,
    HardRestart,
    FullReset,
}

impl RemediationTier {
    /// First tier attempted when an episode opens.
    pub fn first() -> Self {
        RemediationTier::SoftRestart
    }

    /// The next rung of the ladder. After `FullReset` the episode cycles
    /// back to `SoftRestart`; the cycle is bounded only by recovery or
    /// process lifetime.
    pub fn next_in_ladder(self) -> Self {
        match self {
            RemediationTier::None => RemediationTier::SoftRestart,
            RemediationTier::SoftRestart => RemediationTier::CredentialRefresh,
            RemediationTier::CredentialRefresh => RemediationTier::HardRestart,
            RemediationTier::HardRestart => RemediationTier::FullReset,
            RemediationTier::FullReset => RemediationTier::SoftRestart,
        }
    }
}

impl std::fmt::Display for RemediationTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RemediationTier::None => "none",
            RemediationTier::SoftRestart => "soft_restart",
            RemediationTier::CredentialRefresh => "credential_refresh",
            RemediationTier::HardRestart => "hard_restart",
            RemediationTier::FullReset => "full_reset",
        };
        f.write_str(s)
    }
}

/// Process-lifetime record owned by the escalation state machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscalationState {
    /// Trailing run of failing verdicts since the last passing one.
    pub consecutive_failures: u32,
    /// Unix timestamp of the last passing verdict (process start if none yet).
    pub last_success_at: u64,
    pub last_escalation_tier: RemediationTier,
    pub total_remediations: u64,
}

impl EscalationState {
    pub fn new(started_at: u64) -> Self {
        Self {
            consecutive_failures: 0,
            last_success_at: started_at,
            last_escalation_tier: RemediationTier::None,
            total_remediations: 0,
        }
    }
}

// ── Usage ──────────────────────────────────────────────────────────

/// Durable egress accounting record for one billing period.
///
/// `accumulated_bytes` only grows within a period and resets to 0 on
/// rollover. Interface counters are cumulative since boot, so the ledger
/// keeps its own checkpoint (`last_counter_total`) and an hour marker that
/// debounces accumulation to once per hour.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageLedger {
    /// Calendar period string, e.g. "2025-03".
    pub billing_period: String,
    pub accumulated_bytes: u64,
    /// Unix timestamp of the last sample.
    pub last_sample_at: u64,
    /// Raw interface counter total at the last accumulation.
    pub last_counter_total: u64,
    /// Hour index (unix seconds / 3600) of the last accumulation.
    pub last_accumulated_hour: Option<u64>,
}

impl UsageLedger {
    pub fn new(billing_period: String) -> Self {
        Self {
            billing_period,
            accumulated_bytes: 0,
            last_sample_at: 0,
            last_counter_total: 0,
            last_accumulated_hour: None,
        }
    }
}

/// Format the billing period for a point in time, e.g. "2025-03".
pub fn period_for(now: SystemTime) -> String {
    let dt: chrono::DateTime<chrono::Utc> = now.into();
    dt.format("%Y-%m").to_string()
}

/// Egress throttle tier derived from ledger accumulation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThrottleTier {
    Normal,
    Warning,
    Throttled,
    /// Tunnel stopped; terminal until period rollover.
    Exceeded,
}

/// Derived shaping state, recomputed each usage tick. Never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThrottleState {
    pub tier: ThrottleTier,
    /// Active rate cap, if any.
    pub cap_kbit_per_sec: Option<u32>,
}

impl ThrottleState {
    pub fn inactive() -> Self {
        Self {
            tier: ThrottleTier::Normal,
            cap_kbit_per_sec: None,
        }
    }
}

// ── Status artifact ────────────────────────────────────────────────

/// Machine-readable supervisor status, refreshed every liveness tick for
/// the status-page collaborator. Atomic overwrite in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusReport {
    pub verdict: HealthVerdict,
    pub escalation: EscalationState,
    pub throttle: ThrottleState,
    pub written_at: u64,
}

// ── Diagnostics ────────────────────────────────────────────────────

/// One labeled evidence block within a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiagBlock {
    pub label: String,
    pub content: String,
}

/// Write-once evidence capture, taken exactly once per escalation entry
/// and appended to the snapshot log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiagnosticsSnapshot {
    pub taken_at: u64,
    pub consecutive_failures: u32,
    pub tier: RemediationTier,
    pub blocks: Vec<DiagBlock>,
}

impl DiagnosticsSnapshot {
    /// Render the snapshot as plain text for the append-only log.
    pub fn render(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!(
            "==== snapshot @ {} (failures={}, tier={}) ====\n",
            self.taken_at, self.consecutive_failures, self.tier
        ));
        for block in &self.blocks {
            out.push_str(&format!("---- {} ----\n", block.label));
            out.push_str(&self.trimmed(&block.content));
            out.push('\n');
        }
        out
    }

    fn trimmed(&self, content: &str) -> String {
        let t = content.trim_end();
        if t.is_empty() {
            "(empty)".to_string()
        } else {
            t.to_string()
        }
    }
}
