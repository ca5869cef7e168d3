//! tunward-health — tunnel liveness evaluation.
//!
//! One evaluation pass runs every probe concurrently, each bounded by a
//! per-probe timeout, and folds the results into a single
//! [`tunward_state::HealthVerdict`]:
//!
//! - **critical** probes (daemon running, session authenticated) must all
//!   pass;
//! - **advisory** probes (DNS, peer, egress reachability) are individually
//!   flaky and count via quorum: at least half of those attempted must pass.
//!
//! Probes never error out of [`Evaluator::evaluate`]. A timeout or failed
//! execution folds in as `passed = false` with a detail string; a missing
//! tool drops the probe from the rest of the run after one loud log.

pub mod evaluator;
pub mod probe;

pub use evaluator::Evaluator;
pub use probe::{ProbeRun, run_probe};
