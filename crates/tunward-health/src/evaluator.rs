//! Verdict aggregation over the probe set.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::{debug, error};

use tunward_core::ProbeTargets;
use tunward_hostctl::{Reachability, VpnControl};
use tunward_state::{HealthSignal, HealthVerdict, ProbeKind};

use crate::probe::{ProbeRun, run_probe};

const DAEMON_PROBE: &str = "daemon-running";
const AUTH_PROBE: &str = "session-auth";
const DNS_PROBE: &str = "dns-resolve";
const PEER_PROBE: &str = "peer-reachable";
const EGRESS_PROBE: &str = "egress-reachable";

/// Runs the probe multiset and reduces it to a [`HealthVerdict`].
///
/// Pure observation: no probe mutates tunnel state. Probes whose tool is
/// missing are dropped from the quorum denominator for the remainder of
/// the process after a single loud log.
pub struct Evaluator<V, R> {
    vpn: Arc<V>,
    reach: Arc<R>,
    targets: ProbeTargets,
    probe_timeout: Duration,
    deadline: Duration,
    skipped: Mutex<HashSet<String>>,
}

impl<V: VpnControl, R: Reachability> Evaluator<V, R> {
    pub fn new(
        vpn: Arc<V>,
        reach: Arc<R>,
        targets: ProbeTargets,
        probe_timeout: Duration,
        deadline: Duration,
    ) -> Self {
        Self {
            vpn,
            reach,
            targets,
            probe_timeout,
            deadline,
            skipped: Mutex::new(HashSet::new()),
        }
    }

    /// Run one evaluation pass. Never fails; every problem folds into the
    /// verdict.
    pub async fn evaluate(&self, now: u64) -> HealthVerdict {
        let runs = match tokio::time::timeout(self.deadline, self.run_all(now)).await {
            Ok(runs) => runs,
            Err(_) => {
                error!(
                    deadline_secs = self.deadline.as_secs(),
                    "evaluator deadline exceeded"
                );
                let signal = HealthSignal {
                    name: "evaluator".to_string(),
                    kind: ProbeKind::Critical,
                    passed: false,
                    detail: format!("deadline exceeded after {}s", self.deadline.as_secs()),
                    observed_at: now,
                };
                return fold(vec![signal], now);
            }
        };

        let mut signals = Vec::new();
        for run in runs.into_iter().flatten() {
            match run {
                ProbeRun::Signal(sig) => signals.push(sig),
                ProbeRun::ToolMissing { probe, tool } => {
                    error!(
                        %probe,
                        %tool,
                        "probe tool missing, skipping this probe for the rest of the run"
                    );
                    self.skipped.lock().unwrap().insert(probe);
                }
            }
        }

        let verdict = fold(signals, now);
        debug!(
            passed = verdict.passed,
            failing = verdict.failing_signals.len(),
            "health verdict"
        );
        verdict
    }

    async fn run_all(&self, now: u64) -> [Option<ProbeRun>; 5] {
        let (daemon, auth, dns, peer, egress) = tokio::join!(
            self.probe_daemon(now),
            self.probe_auth(now),
            self.probe_dns(now),
            self.probe_peer(now),
            self.probe_egress(now),
        );
        [daemon, auth, dns, peer, egress]
    }

    fn is_skipped(&self, probe: &str) -> bool {
        self.skipped.lock().unwrap().contains(probe)
    }

    async fn probe_daemon(&self, now: u64) -> Option<ProbeRun> {
        if self.is_skipped(DAEMON_PROBE) {
            return None;
        }
        let vpn = self.vpn.clone();
        Some(
            run_probe(DAEMON_PROBE, ProbeKind::Critical, self.probe_timeout, now, async move {
                let status = vpn.status().await?;
                let detail = if status.running {
                    format!("backend running, {} peers", status.peer_count)
                } else {
                    "backend not running".to_string()
                };
                Ok((status.running, detail))
            })
            .await,
        )
    }

    async fn probe_auth(&self, now: u64) -> Option<ProbeRun> {
        if self.is_skipped(AUTH_PROBE) {
            return None;
        }
        let vpn = self.vpn.clone();
        Some(
            run_probe(AUTH_PROBE, ProbeKind::Critical, self.probe_timeout, now, async move {
                let status = vpn.status().await?;
                let detail = if status.authenticated {
                    "session authenticated".to_string()
                } else {
                    "session needs login".to_string()
                };
                Ok((status.authenticated, detail))
            })
            .await,
        )
    }

    async fn probe_dns(&self, now: u64) -> Option<ProbeRun> {
        if self.is_skipped(DNS_PROBE) {
            return None;
        }
        let reach = self.reach.clone();
        let name = self.targets.dns_name.clone();
        let timeout = self.probe_timeout;
        Some(
            run_probe(DNS_PROBE, ProbeKind::Advisory, self.probe_timeout, now, async move {
                let ok = reach.resolve(&name, timeout).await?;
                let detail = if ok {
                    format!("{name} resolved")
                } else {
                    format!("{name} did not resolve")
                };
                Ok((ok, detail))
            })
            .await,
        )
    }

    async fn probe_peer(&self, now: u64) -> Option<ProbeRun> {
        if self.is_skipped(PEER_PROBE) {
            return None;
        }
        self.ping_probe(PEER_PROBE, self.targets.peer_host.clone(), now)
            .await
    }

    async fn probe_egress(&self, now: u64) -> Option<ProbeRun> {
        if self.is_skipped(EGRESS_PROBE) {
            return None;
        }
        self.ping_probe(EGRESS_PROBE, self.targets.egress_host.clone(), now)
            .await
    }

    async fn ping_probe(&self, probe: &str, target: String, now: u64) -> Option<ProbeRun> {
        let reach = self.reach.clone();
        let timeout = self.probe_timeout;
        Some(
            run_probe(probe, ProbeKind::Advisory, self.probe_timeout, now, async move {
                let ok = reach.ping(&target, timeout).await?;
                let detail = if ok {
                    format!("{target} reachable")
                } else {
                    format!("{target} unreachable")
                };
                Ok((ok, detail))
            })
            .await,
        )
    }
}

/// Reduce signals to a verdict: all critical probes must pass, and at
/// least half of the attempted advisory probes.
fn fold(signals: Vec<HealthSignal>, now: u64) -> HealthVerdict {
    let critical_ok = signals
        .iter()
        .filter(|s| s.kind == ProbeKind::Critical)
        .all(|s| s.passed);

    let attempted_advisory = signals
        .iter()
        .filter(|s| s.kind == ProbeKind::Advisory)
        .count();
    let passing_advisory = signals
        .iter()
        .filter(|s| s.kind == ProbeKind::Advisory && s.passed)
        .count();
    let advisory_ok = attempted_advisory == 0 || passing_advisory * 2 >= attempted_advisory;

    let failing_signals: Vec<String> = signals
        .iter()
        .filter(|s| !s.passed)
        .map(|s| s.name.clone())
        .collect();

    HealthVerdict {
        passed: critical_ok && advisory_ok,
        failing_signals,
        signals,
        observed_at: now,
    }
}
