//! tunward-usage — metering monthly egress and enforcing the cap.
//!
//! The [`UsageSampler`] folds the host's cumulative interface counters
//! into the durable ledger, debounced to one accumulation per hour and
//! anchored to its own checkpoint so the same counters are never counted
//! twice. The [`ThrottleController`] turns ledger accumulation into one
//! of four tiers and drives the traffic shaper idempotently; the
//! "exceeded" tier stops the tunnel once and stays terminal until the
//! billing period rolls over.

pub mod sampler;
pub mod throttle;

pub use sampler::{SampleOutcome, UsageSampler};
pub use throttle::{ThrottleController, tier_for};
