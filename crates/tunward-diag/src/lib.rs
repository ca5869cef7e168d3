//! tunward-diag — evidence capture at escalation time.
//!
//! When the state machine opens an escalation episode, one snapshot of
//! host state is taken for the post-mortem: processes, interfaces,
//! routes, a filter-rule sample, the VPN client's own view, and the
//! recent verdict history. Blocks that cannot be gathered are recorded
//! inline as unavailable; the snapshot itself never fails.

pub mod recorder;

pub use recorder::DiagnosticsRecorder;
