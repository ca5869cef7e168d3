//! Throttle controller.
//!
//! Tier selection is a pure function of ledger accumulation and the three
//! configured thresholds. Reconciliation against the traffic shaper is
//! idempotent: re-applying the active tier issues no commands, and the
//! exceeded tier's tunnel stop fires exactly once per billing period.

use std::sync::Arc;

use tracing::{debug, info, warn};

use tunward_core::UsageConfig;
use tunward_hostctl::{TrafficShaper, VpnControl};
use tunward_state::{ThrottleState, ThrottleTier, UsageLedger};

/// Pure tier selection: accumulated bytes against the three configured
/// thresholds, in units of `config.unit_bytes`.
pub fn tier_for(config: &UsageConfig, accumulated_bytes: u64) -> ThrottleTier {
    let units = accumulated_bytes / config.unit_bytes;
    if units >= config.limit_units {
        ThrottleTier::Exceeded
    } else if units >= config.throttle_units {
        ThrottleTier::Throttled
    } else if units >= config.warn_units {
        ThrottleTier::Warning
    } else {
        ThrottleTier::Normal
    }
}

/// Drives the shaper (and, at the limit, the tunnel itself) from ledger
/// accumulation.
pub struct ThrottleController<T, V> {
    shaper: Arc<T>,
    vpn: Arc<V>,
    config: UsageConfig,
    /// Last tier successfully applied to the host.
    applied: Option<ThrottleTier>,
    /// Billing period in which the exceeded stop already fired.
    stopped_period: Option<String>,
}

impl<T: TrafficShaper, V: VpnControl> ThrottleController<T, V> {
    pub fn new(shaper: Arc<T>, vpn: Arc<V>, config: UsageConfig) -> Self {
        Self {
            shaper,
            vpn,
            config,
            applied: None,
            stopped_period: None,
        }
    }

    /// Reconcile host shaping state with the ledger's tier.
    pub async fn reconcile(&mut self, ledger: &UsageLedger) -> ThrottleState {
        let tier = tier_for(&self.config, ledger.accumulated_bytes);
        let iface = self.config.interface.clone();

        if self.applied != Some(tier) {
            let applied_ok = match tier {
                ThrottleTier::Normal => match self.shaper.clear_cap(&iface).await {
                    Ok(()) => {
                        debug!(%iface, "egress cap cleared");
                        true
                    }
                    Err(e) => {
                        warn!(error = %e, "failed to clear egress cap");
                        false
                    }
                },
                ThrottleTier::Warning => self.apply_cap(&iface, self.config.soft_cap_kbit).await,
                ThrottleTier::Throttled | ThrottleTier::Exceeded => {
                    self.apply_cap(&iface, self.config.hard_cap_kbit).await
                }
            };
            if applied_ok {
                self.applied = Some(tier);
            }
        }

        if tier == ThrottleTier::Exceeded
            && self.stopped_period.as_deref() != Some(ledger.billing_period.as_str())
        {
            info!(
                period = %ledger.billing_period,
                accumulated_bytes = ledger.accumulated_bytes,
                "monthly cap exceeded, stopping tunnel for the rest of the period"
            );
            match self.vpn.down().await {
                Ok(()) => self.stopped_period = Some(ledger.billing_period.clone()),
                Err(e) => warn!(error = %e, "tunnel stop failed, will retry next tick"),
            }
        }

        ThrottleState {
            tier,
            cap_kbit_per_sec: match tier {
                ThrottleTier::Normal => None,
                ThrottleTier::Warning => Some(self.config.soft_cap_kbit),
                ThrottleTier::Throttled | ThrottleTier::Exceeded => {
                    Some(self.config.hard_cap_kbit)
                }
            },
        }
    }

    async fn apply_cap(&self, iface: &str, kbit: u32) -> bool {
        match self.shaper.set_cap(iface, kbit).await {
            Ok(()) => {
                info!(%iface, kbit, "egress cap applied");
                true
            }
            Err(e) => {
                warn!(error = %e, kbit, "failed to apply egress cap");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tunward_hostctl::mock::{MockShaper, MockVpn};

    const GIB: u64 = 1 << 30;

    fn config() -> UsageConfig {
        UsageConfig {
            interval: std::time::Duration::from_secs(60),
            interface: "eth0".to_string(),
            unit_bytes: GIB,
            warn_units: 30,
            throttle_units: 32,
            limit_units: 35,
            soft_cap_kbit: 512,
            hard_cap_kbit: 128,
        }
    }

    fn controller() -> (
        Arc<MockShaper>,
        Arc<MockVpn>,
        ThrottleController<MockShaper, MockVpn>,
    ) {
        let shaper = Arc::new(MockShaper::default());
        let vpn = Arc::new(MockVpn::healthy());
        let controller = ThrottleController::new(shaper.clone(), vpn.clone(), config());
        (shaper, vpn, controller)
    }

    fn ledger(units: u64) -> UsageLedger {
        let mut l = UsageLedger::new("2025-03".to_string());
        l.accumulated_bytes = units * GIB;
        l
    }

    #[test]
    fn tier_is_pure_in_usage_and_thresholds() {
        let config = config();
        assert_eq!(tier_for(&config, 29 * GIB), ThrottleTier::Normal);
        assert_eq!(tier_for(&config, 31 * GIB), ThrottleTier::Warning);
        assert_eq!(tier_for(&config, 33 * GIB), ThrottleTier::Throttled);
        assert_eq!(tier_for(&config, 36 * GIB), ThrottleTier::Exceeded);
    }

    #[test]
    fn tier_boundaries_are_inclusive() {
        let config = config();
        assert_eq!(tier_for(&config, 30 * GIB), ThrottleTier::Warning);
        assert_eq!(tier_for(&config, 32 * GIB), ThrottleTier::Throttled);
        assert_eq!(tier_for(&config, 35 * GIB), ThrottleTier::Exceeded);
    }

    #[tokio::test]
    async fn warning_applies_soft_cap() {
        let (shaper, _v, mut c) = controller();
        let state = c.reconcile(&ledger(31)).await;

        assert_eq!(state.tier, ThrottleTier::Warning);
        assert_eq!(state.cap_kbit_per_sec, Some(512));
        assert_eq!(shaper.calls(), vec!["set eth0 512"]);
    }

    #[tokio::test]
    async fn repeated_ticks_at_same_tier_are_noops() {
        let (shaper, _v, mut c) = controller();
        c.reconcile(&ledger(33)).await;
        c.reconcile(&ledger(33)).await;
        c.reconcile(&ledger(34)).await;

        // One set, despite three ticks in the throttled tier.
        assert_eq!(shaper.calls(), vec!["set eth0 128"]);
    }

    #[tokio::test]
    async fn dropping_back_to_normal_clears_cap_once() {
        let (shaper, _v, mut c) = controller();
        c.reconcile(&ledger(31)).await;
        c.reconcile(&ledger(0)).await;
        c.reconcile(&ledger(0)).await;

        assert_eq!(shaper.calls(), vec!["set eth0 512", "clear eth0"]);
    }

    #[tokio::test]
    async fn exceeded_stops_tunnel_exactly_once() {
        let (_s, vpn, mut c) = controller();
        let state = c.reconcile(&ledger(36)).await;
        assert_eq!(state.tier, ThrottleTier::Exceeded);

        c.reconcile(&ledger(36)).await;
        c.reconcile(&ledger(37)).await;

        let downs = vpn.calls().iter().filter(|c| *c == "down").count();
        assert_eq!(downs, 1);
    }

    #[tokio::test]
    async fn failed_stop_retries_next_tick() {
        let (_s, vpn, mut c) = controller();
        vpn.fail_down.store(true, std::sync::atomic::Ordering::SeqCst);
        c.reconcile(&ledger(36)).await;

        vpn.fail_down.store(false, std::sync::atomic::Ordering::SeqCst);
        c.reconcile(&ledger(36)).await;
        c.reconcile(&ledger(36)).await;

        let downs = vpn.calls().iter().filter(|c| *c == "down").count();
        // One failed attempt, one successful, then quiet.
        assert_eq!(downs, 2);
    }

    #[tokio::test]
    async fn rollover_rearms_the_stop() {
        let (_s, vpn, mut c) = controller();
        c.reconcile(&ledger(36)).await;
        assert_eq!(vpn.calls().iter().filter(|c| *c == "down").count(), 1);

        // Fresh period, fresh accumulation: cap clears, stop rearms.
        let fresh = UsageLedger::new("2025-04".to_string());
        let state = c.reconcile(&fresh).await;
        assert_eq!(state.tier, ThrottleTier::Normal);

        // Exceeding again in the new period stops again.
        let mut over = UsageLedger::new("2025-04".to_string());
        over.accumulated_bytes = 36 * GIB;
        c.reconcile(&over).await;
        assert_eq!(vpn.calls().iter().filter(|c| *c == "down").count(), 2);
    }

    #[tokio::test]
    async fn failed_cap_application_retries_next_tick() {
        let (shaper, _v, mut c) = controller();
        shaper.fail.store(true, std::sync::atomic::Ordering::SeqCst);
        c.reconcile(&ledger(31)).await;

        shaper.fail.store(false, std::sync::atomic::Ordering::SeqCst);
        c.reconcile(&ledger(31)).await;
        c.reconcile(&ledger(31)).await;

        // Failed set, successful set, then idempotent quiet.
        assert_eq!(shaper.calls(), vec!["set eth0 512", "set eth0 512"]);
    }
}
