//! tunward-core — configuration for the tunnel supervisor.
//!
//! All thresholds, intervals, and tier delays are explicit named fields on
//! [`SupervisorConfig`], loaded from `tunward.toml` and validated once at
//! startup. Components receive the resolved config by value; nothing reads
//! ambient environment state at decision time.

pub mod config;
pub mod duration;

pub use config::{FilterConfig, ProbeTargets, SupervisorConfig, UsageConfig, VpnConfig};
pub use duration::parse_duration;
