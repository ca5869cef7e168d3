//! Escalation state machine.
//!
//! Tracks the trailing run of failing verdicts, opens an escalation
//! episode when the run crosses the failure threshold, walks the
//! remediation ladder one rung per failed attempt, and resets the moment
//! a single passing verdict arrives. Recovery is edge-triggered on
//! purpose: a false "still broken" costs more than one spurious healthy
//! blip.

use std::time::Duration;

use tracing::{info, warn};

use tunward_state::{EscalationState, HealthVerdict, RemediationTier};

/// What the liveness loop should do after feeding in a verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickAction {
    /// Below threshold (or healthy and already healthy): nothing to do.
    None,
    /// Attempt remediation at the given tier. `first_of_episode` is true
    /// exactly once per episode and gates the diagnostics snapshot.
    Remediate {
        tier: RemediationTier,
        first_of_episode: bool,
    },
    /// A passing verdict ended a failing run; state has been reset.
    Recovered,
}

/// Owns the [`EscalationState`] record; mutated only by [`observe`] and
/// [`record_attempt`].
///
/// [`observe`]: EscalationTracker::observe
/// [`record_attempt`]: EscalationTracker::record_attempt
#[derive(Debug)]
pub struct EscalationTracker {
    state: EscalationState,
    threshold: u32,
    tier_delay: Duration,
    max_tier_delay: Duration,
    current_tier: RemediationTier,
    in_episode: bool,
    /// Attempts in the current unbroken failure run. Drives the
    /// exponential inter-attempt backoff and deliberately carries across
    /// the FullReset → SoftRestart wrap, so repeated destructive cycling
    /// slows to `max_tier_delay`.
    attempts_in_run: u32,
    /// An attempt whose commands succeeded is awaiting confirmation by
    /// the next verdict; if that verdict still fails, the tier advances.
    awaiting_verification: bool,
}

impl EscalationTracker {
    pub fn new(
        threshold: u32,
        tier_delay: Duration,
        max_tier_delay: Duration,
        started_at: u64,
    ) -> Self {
        Self {
            state: EscalationState::new(started_at),
            threshold,
            tier_delay,
            max_tier_delay,
            current_tier: RemediationTier::None,
            in_episode: false,
            attempts_in_run: 0,
            awaiting_verification: false,
        }
    }

    /// Feed one verdict into the machine.
    pub fn observe(&mut self, verdict: &HealthVerdict, now: u64) -> TickAction {
        if verdict.passed {
            let was_failing = self.state.consecutive_failures > 0 || self.in_episode;
            self.state.consecutive_failures = 0;
            self.state.last_success_at = now;
            self.current_tier = RemediationTier::None;
            self.in_episode = false;
            self.attempts_in_run = 0;
            self.awaiting_verification = false;
            return if was_failing {
                info!("tunnel recovered, escalation reset");
                TickAction::Recovered
            } else {
                TickAction::None
            };
        }

        self.state.consecutive_failures += 1;

        if self.state.consecutive_failures < self.threshold {
            return TickAction::None;
        }

        let first_of_episode = !self.in_episode;
        if first_of_episode {
            self.in_episode = true;
            self.current_tier = RemediationTier::first();
            warn!(
                failures = self.state.consecutive_failures,
                threshold = self.threshold,
                "failure threshold crossed, escalating"
            );
        } else if self.awaiting_verification {
            // The last attempt's commands succeeded but the tunnel is
            // still failing: the tier has been attempted and failed.
            self.advance_tier();
        }
        self.awaiting_verification = false;

        TickAction::Remediate {
            tier: self.current_tier,
            first_of_episode,
        }
    }

    /// Record the outcome of the attempt the last [`TickAction::Remediate`]
    /// requested.
    pub fn record_attempt(&mut self, success: bool) {
        self.state.last_escalation_tier = self.current_tier;
        self.state.total_remediations += 1;
        self.attempts_in_run += 1;
        if success {
            self.awaiting_verification = true;
        } else {
            self.advance_tier();
        }
    }

    /// Delay to wait before the next attempt: `tier_delay` doubled per
    /// attempt in the current failure run, capped at `max_tier_delay`.
    pub fn next_delay(&self) -> Duration {
        let exp = self.attempts_in_run.min(16);
        let scaled = self.tier_delay.saturating_mul(1u32 << exp);
        scaled.min(self.max_tier_delay)
    }

    pub fn state(&self) -> &EscalationState {
        &self.state
    }

    pub fn in_episode(&self) -> bool {
        self.in_episode
    }

    fn advance_tier(&mut self) {
        let next = self.current_tier.next_in_ladder();
        if next < self.current_tier {
            warn!("remediation ladder exhausted, cycling back to soft restart");
        }
        self.current_tier = next;
    }
}
