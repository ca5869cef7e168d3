//! The supervisor's two control loops.
//!
//! The liveness loop ticks the evaluator, feeds the verdict into the
//! escalation tracker, snapshots diagnostics on episode entry, runs the
//! selected remediation tier, and refreshes the status artifact. The
//! usage loop samples the ledger and reconciles the throttle. The loops
//! mutate disjoint resources (tunnel state vs. egress shaping), so the
//! only coupling is a watch channel carrying the latest throttle state
//! into the status artifact.
//!
//! Ticks are strictly sequential within each loop: a remediation attempt
//! finishes before the next verdict is taken, because overlapping
//! attempts against the same session would race destructively. While an
//! episode is open the loop cadence follows the tracker's backoff delay
//! instead of the regular tick interval.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::sync::watch;
use tracing::{error, info, warn};

use tunward_core::SupervisorConfig;
use tunward_diag::DiagnosticsRecorder;
use tunward_escalate::{EscalationTracker, Remediator, TickAction, Watchdog};
use tunward_health::Evaluator;
use tunward_hostctl::{
    InterfaceCounters, PacketFilter, Reachability, ServiceSupervisor, TrafficShaper, VpnControl,
};
use tunward_state::{
    HealthVerdict, StateFiles, StatusReport, ThrottleState, ThrottleTier, period_for,
};
use tunward_usage::{ThrottleController, UsageSampler};

/// Verdicts kept for the snapshot's recent-history block.
const VERDICT_HISTORY: usize = 10;

/// Settle pause between teardown and bring-up within one remediation.
const REMEDIATION_PAUSE: Duration = Duration::from_secs(2);

/// Owns the collaborators and runs both loops until shutdown.
pub struct Supervisor<V, R, S, F, T, C> {
    config: SupervisorConfig,
    files: StateFiles,
    vpn: Arc<V>,
    reach: Arc<R>,
    service: Arc<S>,
    filter: Arc<F>,
    shaper: Arc<T>,
    counters: Arc<C>,
}

impl<V, R, S, F, T, C> Supervisor<V, R, S, F, T, C>
where
    V: VpnControl,
    R: Reachability,
    S: ServiceSupervisor,
    F: PacketFilter,
    T: TrafficShaper,
    C: InterfaceCounters,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: SupervisorConfig,
        files: StateFiles,
        vpn: Arc<V>,
        reach: Arc<R>,
        service: Arc<S>,
        filter: Arc<F>,
        shaper: Arc<T>,
        counters: Arc<C>,
    ) -> Self {
        Self {
            config,
            files,
            vpn,
            reach,
            service,
            filter,
            shaper,
            counters,
        }
    }

    /// Run both loops until the shutdown signal flips.
    pub async fn run(&self, shutdown: watch::Receiver<bool>) {
        let (throttle_tx, throttle_rx) = watch::channel(ThrottleState::inactive());

        tokio::join!(
            self.liveness_loop(shutdown.clone(), throttle_rx),
            self.usage_loop(shutdown, throttle_tx),
        );

        info!("supervisor stopped");
    }

    // ── Liveness / escalation ──────────────────────────────────────

    async fn liveness_loop(
        &self,
        mut shutdown: watch::Receiver<bool>,
        throttle: watch::Receiver<ThrottleState>,
    ) {
        let evaluator = Evaluator::new(
            self.vpn.clone(),
            self.reach.clone(),
            self.config.probes.clone(),
            self.config.probe_timeout,
            self.config.evaluator_deadline,
        );
        let remediator = Remediator::new(
            self.vpn.clone(),
            self.service.clone(),
            self.config.vpn.daemon_service.clone(),
            self.config.vpn.auth_key_file.clone(),
            REMEDIATION_PAUSE,
        );
        let recorder = DiagnosticsRecorder::new(self.vpn.clone(), self.config.probe_timeout);
        let mut tracker = EscalationTracker::new(
            self.config.failure_threshold,
            self.config.tier_delay,
            self.config.max_tier_delay,
            epoch_secs(),
        );
        let mut watchdog = Watchdog::new(self.config.stale_threshold);
        let mut recent = VecDeque::with_capacity(VERDICT_HISTORY);

        info!(
            interval_secs = self.config.tick_interval.as_secs(),
            threshold = self.config.failure_threshold,
            "liveness loop started"
        );

        loop {
            let interval = if tracker.in_episode() {
                tracker.next_delay()
            } else {
                self.config.tick_interval
            };

            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    self.liveness_tick(
                        &evaluator,
                        &remediator,
                        &recorder,
                        &mut tracker,
                        &mut watchdog,
                        &mut recent,
                        &throttle,
                    )
                    .await;
                }
                _ = shutdown.changed() => {
                    info!("liveness loop shutting down");
                    break;
                }
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn liveness_tick(
        &self,
        evaluator: &Evaluator<V, R>,
        remediator: &Remediator<V, S>,
        recorder: &DiagnosticsRecorder<V>,
        tracker: &mut EscalationTracker,
        watchdog: &mut Watchdog,
        recent: &mut VecDeque<HealthVerdict>,
        throttle: &watch::Receiver<ThrottleState>,
    ) {
        let now = epoch_secs();
        let throttle_state = *throttle.borrow();
        let verdict = evaluator.evaluate(now).await;

        if recent.len() == VERDICT_HISTORY {
            recent.pop_front();
        }
        recent.push_back(verdict.clone());

        match tracker.observe(&verdict, now) {
            TickAction::None => {}
            TickAction::Recovered => {
                watchdog.reset();
            }
            TickAction::Remediate {
                tier,
                first_of_episode,
            } => {
                // The exceeded tier stopped the tunnel on purpose; bringing
                // it back up would defeat the cap. Remediation resumes after
                // period rollover clears the tier.
                if throttle_state.tier == ThrottleTier::Exceeded {
                    info!("remediation suspended while monthly usage cap is exceeded");
                } else {
                    if first_of_episode {
                        let snapshot = recorder
                            .snapshot(tracker.state(), recent.make_contiguous(), now)
                            .await;
                        if let Err(e) = self.files.append_snapshot(&snapshot) {
                            error!(error = %e, "failed to append diagnostics snapshot");
                        }
                    }
                    let ok = remediator.attempt(tier).await;
                    tracker.record_attempt(ok);
                }
            }
        }

        if !verdict.passed && watchdog.should_fire(tracker.state().last_success_at, now) {
            watchdog
                .repair(self.filter.as_ref(), self.reach.as_ref())
                .await;
        }

        let report = StatusReport {
            verdict,
            escalation: tracker.state().clone(),
            throttle: throttle_state,
            written_at: now,
        };
        if let Err(e) = self.files.save_status(&report) {
            error!(error = %e, "failed to write status artifact");
        }
        if let Err(e) = self.files.touch_last_tick(now) {
            warn!(error = %e, "failed to update last-tick marker");
        }
    }

    // ── Usage / throttle ───────────────────────────────────────────

    async fn usage_loop(
        &self,
        mut shutdown: watch::Receiver<bool>,
        throttle_tx: watch::Sender<ThrottleState>,
    ) {
        let sampler = UsageSampler::new(self.counters.clone());
        let mut controller = ThrottleController::new(
            self.shaper.clone(),
            self.vpn.clone(),
            self.config.usage.clone(),
        );
        let mut ledger = self
            .files
            .load_ledger_or_default(&period_for(SystemTime::now()));

        info!(
            interval_secs = self.config.usage.interval.as_secs(),
            period = %ledger.billing_period,
            accumulated_bytes = ledger.accumulated_bytes,
            "usage loop started"
        );

        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.config.usage.interval) => {
                    let now = epoch_secs();
                    let period = period_for(SystemTime::now());
                    let outcome = sampler.tick(ledger.clone(), now, &period);
                    ledger = outcome.ledger;

                    // The ledger file changes hourly at most, plus the
                    // one-time checkpoint anchor after a fresh start.
                    if outcome.accumulated || outcome.rolled_over || outcome.anchored {
                        if let Err(e) = self.files.save_ledger(&ledger) {
                            error!(error = %e, "failed to persist usage ledger");
                        }
                    }

                    let state = controller.reconcile(&ledger).await;
                    let _ = throttle_tx.send(state);
                }
                _ = shutdown.changed() => {
                    // The active cap is deliberately left in place: cap
                    // lifecycle follows usage tiers, not process lifetime.
                    info!("usage loop shutting down");
                    break;
                }
            }
        }
    }
}

pub fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
