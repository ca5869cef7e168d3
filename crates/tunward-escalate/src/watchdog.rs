//! Long-failure watchdog.
//!
//! When the time since the last passing verdict exceeds the stale
//! threshold, the watchdog invokes the packet-filter and DNS
//! collaborators' own repair entry points, independent of where tier
//! progression stands. Firing is debounced to once per stale window so a
//! long outage does not hammer the collaborators every tick.

use std::time::Duration;

use tracing::{info, warn};

use tunward_hostctl::{PacketFilter, Reachability};

/// Tracks when the side-channel repair last fired.
#[derive(Debug)]
pub struct Watchdog {
    stale_threshold: Duration,
    last_fired_at: Option<u64>,
}

impl Watchdog {
    pub fn new(stale_threshold: Duration) -> Self {
        Self {
            stale_threshold,
            last_fired_at: None,
        }
    }

    /// Whether the repair should fire now, given the last success time.
    /// Marks the firing when it returns true.
    pub fn should_fire(&mut self, last_success_at: u64, now: u64) -> bool {
        let stale_secs = self.stale_threshold.as_secs();
        if now.saturating_sub(last_success_at) < stale_secs {
            return false;
        }
        if let Some(fired) = self.last_fired_at
            && now.saturating_sub(fired) < stale_secs
        {
            return false;
        }
        self.last_fired_at = Some(now);
        true
    }

    /// Reset after recovery so the next outage gets a fresh window.
    pub fn reset(&mut self) {
        self.last_fired_at = None;
    }

    /// Run the side-channel repair. Collaborator failures are logged and
    /// swallowed; the watchdog is best-effort by design of the callers'
    /// own repair entry points.
    pub async fn repair<F: PacketFilter, R: Reachability>(&self, filter: &F, reach: &R) {
        info!("long-failure watchdog firing side-channel repair");
        if let Err(e) = filter.apply_baseline_rules().await {
            warn!(error = %e, "baseline filter rules could not be applied");
        }
        if let Err(e) = reach.flush_dns_cache().await {
            warn!(error = %e, "dns cache flush failed");
        }
    }
}
