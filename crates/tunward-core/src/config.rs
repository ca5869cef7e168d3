//! tunward.toml configuration parser.
//!
//! The on-disk format keeps durations as strings ("30s", "5m"); loading
//! resolves them into [`std::time::Duration`] and validates the result.
//! A missing or unreadable auth key file is the one fatal startup error:
//! without it the credential-refresh tier cannot run.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, bail};
use serde::{Deserialize, Serialize};

use crate::duration::parse_duration;

/// Raw `tunward.toml` contents. All fields optional; defaults applied
/// during [`SupervisorConfig::resolve`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigFile {
    pub supervisor: Option<SupervisorSection>,
    pub usage: Option<UsageSection>,
    pub vpn: Option<VpnSection>,
    pub filter: Option<FilterSection>,
    pub probes: Option<ProbesSection>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SupervisorSection {
    pub data_dir: Option<PathBuf>,
    pub failure_threshold: Option<u32>,
    pub tick_interval: Option<String>,
    pub tier_delay: Option<String>,
    pub max_tier_delay: Option<String>,
    pub probe_timeout: Option<String>,
    pub evaluator_deadline: Option<String>,
    pub stale_threshold: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UsageSection {
    pub interval: Option<String>,
    pub interface: Option<String>,
    /// Size of one accounting unit in bytes (default 1 GiB).
    pub unit_bytes: Option<u64>,
    pub warn_units: Option<u64>,
    pub throttle_units: Option<u64>,
    pub limit_units: Option<u64>,
    pub soft_cap_kbit: Option<u32>,
    pub hard_cap_kbit: Option<u32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VpnSection {
    pub client_bin: Option<String>,
    pub daemon_service: Option<String>,
    pub state_file: Option<PathBuf>,
    pub auth_key_file: Option<PathBuf>,
    pub up_flags: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FilterSection {
    pub baseline_rules: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProbesSection {
    pub dns_name: Option<String>,
    pub peer_host: Option<String>,
    pub egress_host: Option<String>,
}

/// Resolved supervisor configuration. Every threshold, interval, and tier
/// delay the control loops consult lives here as a named field.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    pub data_dir: PathBuf,
    /// Consecutive failing verdicts before remediation starts.
    pub failure_threshold: u32,
    /// Liveness loop tick interval.
    pub tick_interval: Duration,
    /// Base delay between remediation attempts within an episode.
    pub tier_delay: Duration,
    /// Cap for the exponential inter-attempt backoff.
    pub max_tier_delay: Duration,
    /// Per-probe execution bound.
    pub probe_timeout: Duration,
    /// Overall bound for one evaluation pass; must stay below the tick.
    pub evaluator_deadline: Duration,
    /// Time without a passing verdict before the watchdog repair fires.
    pub stale_threshold: Duration,
    pub usage: UsageConfig,
    pub vpn: VpnConfig,
    pub filter: FilterConfig,
    pub probes: ProbeTargets,
}

#[derive(Debug, Clone)]
pub struct FilterConfig {
    /// Ruleset restored by the watchdog's baseline repair.
    pub baseline_rules: PathBuf,
}

#[derive(Debug, Clone)]
pub struct UsageConfig {
    /// Usage loop tick interval.
    pub interval: Duration,
    /// Interface the traffic cap is applied to.
    pub interface: String,
    pub unit_bytes: u64,
    /// Tier thresholds in units; strictly increasing.
    pub warn_units: u64,
    pub throttle_units: u64,
    pub limit_units: u64,
    pub soft_cap_kbit: u32,
    pub hard_cap_kbit: u32,
}

#[derive(Debug, Clone)]
pub struct VpnConfig {
    pub client_bin: String,
    pub daemon_service: String,
    /// Persisted client session state, deleted by a full reset.
    pub state_file: PathBuf,
    pub auth_key_file: PathBuf,
    pub up_flags: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct ProbeTargets {
    /// Name resolved by the DNS advisory probe.
    pub dns_name: String,
    /// Tunnel peer pinged by the peer advisory probe.
    pub peer_host: String,
    /// Public target pinged through the tunnel by the egress probe.
    pub egress_host: String,
}

impl SupervisorConfig {
    /// Load and resolve configuration from a `tunward.toml` file.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let raw: ConfigFile =
            toml::from_str(&content).with_context(|| format!("parsing {}", path.display()))?;
        Self::resolve(raw)
    }

    /// Apply defaults and validate a raw config.
    pub fn resolve(raw: ConfigFile) -> anyhow::Result<Self> {
        let sup = raw.supervisor.unwrap_or_default();
        let usage = raw.usage.unwrap_or_default();
        let vpn = raw.vpn.unwrap_or_default();
        let filter = raw.filter.unwrap_or_default();
        let probes = raw.probes.unwrap_or_default();

        let auth_key_file = vpn
            .auth_key_file
            .context("vpn.auth_key_file is required (credential refresh cannot run without it)")?;
        if !auth_key_file.is_file() {
            bail!(
                "vpn.auth_key_file {} does not exist or is not readable",
                auth_key_file.display()
            );
        }

        let config = Self {
            data_dir: sup
                .data_dir
                .unwrap_or_else(|| PathBuf::from("/var/lib/tunward")),
            failure_threshold: sup.failure_threshold.unwrap_or(3),
            tick_interval: resolve_duration(&sup.tick_interval, "supervisor.tick_interval", 30)?,
            tier_delay: resolve_duration(&sup.tier_delay, "supervisor.tier_delay", 15)?,
            max_tier_delay: resolve_duration(&sup.max_tier_delay, "supervisor.max_tier_delay", 120)?,
            probe_timeout: resolve_duration(&sup.probe_timeout, "supervisor.probe_timeout", 5)?,
            evaluator_deadline: resolve_duration(
                &sup.evaluator_deadline,
                "supervisor.evaluator_deadline",
                20,
            )?,
            stale_threshold: resolve_duration(&sup.stale_threshold, "supervisor.stale_threshold", 300)?,
            usage: UsageConfig {
                interval: resolve_duration(&usage.interval, "usage.interval", 60)?,
                interface: usage.interface.unwrap_or_else(|| "eth0".to_string()),
                unit_bytes: usage.unit_bytes.unwrap_or(1 << 30),
                warn_units: usage.warn_units.unwrap_or(30),
                throttle_units: usage.throttle_units.unwrap_or(32),
                limit_units: usage.limit_units.unwrap_or(35),
                soft_cap_kbit: usage.soft_cap_kbit.unwrap_or(512),
                hard_cap_kbit: usage.hard_cap_kbit.unwrap_or(128),
            },
            vpn: VpnConfig {
                client_bin: vpn.client_bin.unwrap_or_else(|| "tailscale".to_string()),
                daemon_service: vpn
                    .daemon_service
                    .unwrap_or_else(|| "tailscaled".to_string()),
                state_file: vpn
                    .state_file
                    .unwrap_or_else(|| PathBuf::from("/var/lib/tailscale/tailscaled.state")),
                auth_key_file,
                up_flags: vpn.up_flags.unwrap_or_default(),
            },
            filter: FilterConfig {
                baseline_rules: filter
                    .baseline_rules
                    .unwrap_or_else(|| PathBuf::from("/etc/iptables/rules.v4")),
            },
            probes: ProbeTargets {
                dns_name: probes.dns_name.unwrap_or_else(|| "example.com".to_string()),
                peer_host: probes.peer_host.unwrap_or_else(|| "100.64.0.1".to_string()),
                egress_host: probes.egress_host.unwrap_or_else(|| "1.1.1.1".to_string()),
            },
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        let u = &self.usage;
        if !(u.warn_units < u.throttle_units && u.throttle_units < u.limit_units) {
            bail!(
                "usage thresholds must be strictly increasing (warn {} / throttle {} / limit {})",
                u.warn_units,
                u.throttle_units,
                u.limit_units
            );
        }
        if u.unit_bytes == 0 {
            bail!("usage.unit_bytes must be positive");
        }
        if self.evaluator_deadline >= self.tick_interval {
            bail!(
                "evaluator_deadline ({:?}) must be shorter than tick_interval ({:?})",
                self.evaluator_deadline,
                self.tick_interval
            );
        }
        if self.tier_delay > self.max_tier_delay {
            bail!("tier_delay must not exceed max_tier_delay");
        }
        Ok(())
    }
}

fn resolve_duration(
    raw: &Option<String>,
    field: &str,
    default_secs: u64,
) -> anyhow::Result<Duration> {
    match raw {
        Some(s) => {
            parse_duration(s).with_context(|| format!("invalid duration for {field}: {s:?}"))
        }
        None => Ok(Duration::from_secs(default_secs)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn key_file(dir: &tempfile::TempDir) -> PathBuf {
        let path = dir.path().join("authkey");
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(f, "ts-authkey-test").unwrap();
        path
    }

    fn minimal_raw(dir: &tempfile::TempDir) -> ConfigFile {
        ConfigFile {
            vpn: Some(VpnSection {
                auth_key_file: Some(key_file(dir)),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn defaults_applied() {
        let dir = tempfile::tempdir().unwrap();
        let config = SupervisorConfig::resolve(minimal_raw(&dir)).unwrap();

        assert_eq!(config.failure_threshold, 3);
        assert_eq!(config.tick_interval, Duration::from_secs(30));
        assert_eq!(config.usage.interval, Duration::from_secs(60));
        assert_eq!(config.usage.warn_units, 30);
        assert_eq!(config.usage.throttle_units, 32);
        assert_eq!(config.usage.limit_units, 35);
        assert_eq!(config.stale_threshold, Duration::from_secs(300));
        assert_eq!(
            config.filter.baseline_rules,
            PathBuf::from("/etc/iptables/rules.v4")
        );
    }

    #[test]
    fn missing_auth_key_is_fatal() {
        let raw = ConfigFile::default();
        assert!(SupervisorConfig::resolve(raw).is_err());
    }

    #[test]
    fn nonexistent_auth_key_is_fatal() {
        let raw = ConfigFile {
            vpn: Some(VpnSection {
                auth_key_file: Some(PathBuf::from("/nonexistent/authkey")),
                ..Default::default()
            }),
            ..Default::default()
        };
        assert!(SupervisorConfig::resolve(raw).is_err());
    }

    #[test]
    fn unordered_thresholds_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut raw = minimal_raw(&dir);
        raw.usage = Some(UsageSection {
            warn_units: Some(35),
            throttle_units: Some(32),
            limit_units: Some(30),
            ..Default::default()
        });
        assert!(SupervisorConfig::resolve(raw).is_err());
    }

    #[test]
    fn deadline_must_fit_in_tick() {
        let dir = tempfile::tempdir().unwrap();
        let mut raw = minimal_raw(&dir);
        raw.supervisor = Some(SupervisorSection {
            tick_interval: Some("10s".to_string()),
            evaluator_deadline: Some("20s".to_string()),
            ..Default::default()
        });
        assert!(SupervisorConfig::resolve(raw).is_err());
    }

    #[test]
    fn parse_full_file() {
        let dir = tempfile::tempdir().unwrap();
        let key = key_file(&dir);
        let toml_str = format!(
            r#"
[supervisor]
failure_threshold = 5
tick_interval = "45s"
stale_threshold = "10m"

[usage]
interface = "ens3"
warn_units = 20
throttle_units = 25
limit_units = 28

[vpn]
auth_key_file = "{}"
up_flags = ["--advertise-exit-node"]

[probes]
dns_name = "ts.net"
"#,
            key.display()
        );
        let path = dir.path().join("tunward.toml");
        std::fs::write(&path, toml_str).unwrap();

        let config = SupervisorConfig::from_file(&path).unwrap();
        assert_eq!(config.failure_threshold, 5);
        assert_eq!(config.tick_interval, Duration::from_secs(45));
        assert_eq!(config.stale_threshold, Duration::from_secs(600));
        assert_eq!(config.usage.interface, "ens3");
        assert_eq!(config.usage.limit_units, 28);
        assert_eq!(config.vpn.up_flags, vec!["--advertise-exit-node"]);
        assert_eq!(config.probes.dns_name, "ts.net");
        assert_eq!(config.probes.egress_host, "1.1.1.1");
    }

    #[test]
    fn bad_duration_string_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut raw = minimal_raw(&dir);
        raw.supervisor = Some(SupervisorSection {
            tick_interval: Some("whenever".to_string()),
            ..Default::default()
        });
        assert!(SupervisorConfig::resolve(raw).is_err());
    }
}
