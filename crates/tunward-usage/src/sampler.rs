//! Ledger accumulation from interface counters.

use std::sync::Arc;

use tracing::{debug, info, warn};

use tunward_hostctl::InterfaceCounters;
use tunward_state::UsageLedger;

/// Result of one sampling tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleOutcome {
    pub ledger: UsageLedger,
    /// The billing period changed and accumulation was reset to 0.
    pub rolled_over: bool,
    /// This tick actually added a delta (at most once per hour).
    pub accumulated: bool,
    /// This tick anchored a fresh counter checkpoint.
    pub anchored: bool,
}

/// Folds cumulative interface counters into the ledger.
///
/// Counters are cumulative since boot, so the sampler keeps its own
/// checkpoint in the ledger and adds only the delta. A counter total
/// below the checkpoint means the counters reset (reboot); the
/// checkpoint re-anchors without charging a delta.
pub struct UsageSampler<C> {
    counters: Arc<C>,
}

impl<C: InterfaceCounters> UsageSampler<C> {
    pub fn new(counters: Arc<C>) -> Self {
        Self { counters }
    }

    /// One sampling tick: detect rollover, then accumulate if an hour
    /// boundary has passed since the last accumulation.
    ///
    /// Pure in everything but the counter read; `now` is unix seconds and
    /// `period` the current billing-period string, both supplied by the
    /// caller so the ledger logic stays clock-free.
    pub fn tick(&self, mut ledger: UsageLedger, now: u64, period: &str) -> SampleOutcome {
        let mut rolled_over = false;
        if ledger.billing_period != period {
            info!(
                from = %ledger.billing_period,
                to = %period,
                discarded_bytes = ledger.accumulated_bytes,
                "billing period rollover, accumulation reset"
            );
            ledger = UsageLedger::new(period.to_string());
            rolled_over = true;
        }

        ledger.last_sample_at = now;
        let hour = now / 3600;
        let mut accumulated = false;
        let mut anchored = false;

        match self.counters.total_bytes() {
            Ok(total) => match ledger.last_accumulated_hour {
                None => {
                    // First sighting of the counters: anchor without
                    // charging pre-existing traffic to this ledger.
                    ledger.last_counter_total = total;
                    ledger.last_accumulated_hour = Some(hour);
                    anchored = true;
                    debug!(total, "counter checkpoint anchored");
                }
                Some(last_hour) if hour > last_hour => {
                    let delta = if total >= ledger.last_counter_total {
                        total - ledger.last_counter_total
                    } else {
                        debug!(
                            total,
                            checkpoint = ledger.last_counter_total,
                            "counter reset detected, re-anchoring"
                        );
                        0
                    };
                    ledger.accumulated_bytes += delta;
                    ledger.last_counter_total = total;
                    ledger.last_accumulated_hour = Some(hour);
                    accumulated = true;
                    debug!(
                        delta,
                        accumulated_bytes = ledger.accumulated_bytes,
                        "usage accumulated"
                    );
                }
                // Same hour: debounced, nothing to add.
                Some(_) => {}
            },
            Err(e) => {
                warn!(error = %e, "interface counters unreadable, usage unchanged this tick");
            }
        }

        SampleOutcome {
            ledger,
            rolled_over,
            accumulated,
            anchored,
        }
    }
}
