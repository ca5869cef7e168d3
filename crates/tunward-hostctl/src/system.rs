//! Host-side collaborators: service supervision, packet filtering,
//! traffic shaping, and reachability probes.

use std::path::PathBuf;
use std::time::Duration;

use tracing::debug;

use crate::command::run_tool;
use crate::error::{HostError, HostResult};

/// Process supervision collaborator (systemd-shaped).
pub trait ServiceSupervisor {
    fn restart(&self, service: &str) -> impl Future<Output = HostResult<()>> + Send;
}

/// Packet-filter collaborator. The supervisor only knows two repair entry
/// points; rule semantics stay with the filter tooling.
pub trait PacketFilter {
    fn apply_baseline_rules(&self) -> impl Future<Output = HostResult<()>> + Send;
    fn remove_rule(&self, rule_spec: &str) -> impl Future<Output = HostResult<()>> + Send;
}

/// Traffic-shaping collaborator. Both operations are idempotent.
pub trait TrafficShaper {
    fn set_cap(&self, interface: &str, kbit: u32) -> impl Future<Output = HostResult<()>> + Send;
    fn clear_cap(&self, interface: &str) -> impl Future<Output = HostResult<()>> + Send;
}

/// Generic reachability tests used by the advisory probes, plus the DNS
/// repair entry point used by the long-failure watchdog.
pub trait Reachability {
    fn ping(
        &self,
        target: &str,
        timeout: Duration,
    ) -> impl Future<Output = HostResult<bool>> + Send;
    fn resolve(
        &self,
        name: &str,
        timeout: Duration,
    ) -> impl Future<Output = HostResult<bool>> + Send;
    fn flush_dns_cache(&self) -> impl Future<Output = HostResult<()>> + Send;
}

// ── Shell adapters ─────────────────────────────────────────────────

/// `systemctl`-backed service supervision.
#[derive(Debug, Clone)]
pub struct SystemdSupervisor {
    timeout: Duration,
}

impl SystemdSupervisor {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl ServiceSupervisor for SystemdSupervisor {
    async fn restart(&self, service: &str) -> HostResult<()> {
        run_tool("systemctl", &["restart", service], self.timeout).await?;
        debug!(%service, "service restarted");
        Ok(())
    }
}

/// `iptables`-backed packet filter control. The baseline ruleset lives in
/// a file owned by the filter tooling; applying it is a single restore.
#[derive(Debug, Clone)]
pub struct ShellPacketFilter {
    baseline_rules: PathBuf,
    timeout: Duration,
}

impl ShellPacketFilter {
    pub fn new(baseline_rules: PathBuf, timeout: Duration) -> Self {
        Self {
            baseline_rules,
            timeout,
        }
    }
}

impl PacketFilter for ShellPacketFilter {
    async fn apply_baseline_rules(&self) -> HostResult<()> {
        let path = self.baseline_rules.display().to_string();
        run_tool("iptables-restore", &[path.as_str()], self.timeout).await?;
        debug!(rules = %path, "baseline filter rules applied");
        Ok(())
    }

    async fn remove_rule(&self, rule_spec: &str) -> HostResult<()> {
        let mut args = vec!["-D"];
        args.extend(rule_spec.split_whitespace());
        run_tool("iptables", &args, self.timeout).await?;
        debug!(rule = %rule_spec, "filter rule removed");
        Ok(())
    }
}

/// `tc`-backed egress shaping: one token-bucket qdisc on the interface
/// root. `replace` makes apply idempotent; clearing an absent qdisc is
/// treated as already clear.
#[derive(Debug, Clone)]
pub struct TcShaper {
    timeout: Duration,
}

impl TcShaper {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl TrafficShaper for TcShaper {
    async fn set_cap(&self, interface: &str, kbit: u32) -> HostResult<()> {
        let rate = format!("{kbit}kbit");
        run_tool(
            "tc",
            &[
                "qdisc", "replace", "dev", interface, "root", "tbf", "rate", &rate, "burst",
                "32kbit", "latency", "400ms",
            ],
            self.timeout,
        )
        .await?;
        debug!(%interface, %rate, "egress cap applied");
        Ok(())
    }

    async fn clear_cap(&self, interface: &str) -> HostResult<()> {
        match run_tool("tc", &["qdisc", "del", "dev", interface, "root"], self.timeout).await {
            Ok(_) => {
                debug!(%interface, "egress cap cleared");
                Ok(())
            }
            Err(HostError::CommandFailed { stderr, .. })
                if stderr.contains("No such file or directory")
                    || stderr.contains("Invalid handle") =>
            {
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

/// Reachability via `ping` and in-process DNS resolution.
#[derive(Debug, Clone)]
pub struct ShellReachability;

impl Reachability for ShellReachability {
    async fn ping(&self, target: &str, timeout: Duration) -> HostResult<bool> {
        let wait = timeout.as_secs().max(1).to_string();
        match run_tool("ping", &["-c", "1", "-W", &wait, target], timeout).await {
            Ok(_) => Ok(true),
            Err(HostError::CommandFailed { .. }) | Err(HostError::Timeout { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn resolve(&self, name: &str, timeout: Duration) -> HostResult<bool> {
        let lookup = tokio::net::lookup_host((name, 443));
        match tokio::time::timeout(timeout, lookup).await {
            Ok(Ok(mut addrs)) => Ok(addrs.next().is_some()),
            Ok(Err(_)) | Err(_) => Ok(false),
        }
    }

    async fn flush_dns_cache(&self) -> HostResult<()> {
        run_tool("resolvectl", &["flush-caches"], Duration::from_secs(5)).await?;
        debug!("dns caches flushed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn resolve_localhost_succeeds() {
        let r = ShellReachability;
        assert!(r.resolve("localhost", Duration::from_secs(5)).await.unwrap());
    }

    #[tokio::test]
    async fn resolve_invalid_name_is_false_not_error() {
        let r = ShellReachability;
        let ok = r
            .resolve("definitely-not-a-real-host.invalid", Duration::from_secs(5))
            .await
            .unwrap();
        assert!(!ok);
    }

    #[tokio::test]
    async fn ping_unreachable_is_false_not_error() {
        let r = ShellReachability;
        // 192.0.2.0/24 is TEST-NET-1, guaranteed unrouted.
        match r.ping("192.0.2.1", Duration::from_secs(1)).await {
            Ok(reached) => assert!(!reached),
            // ping itself may be absent in minimal containers.
            Err(HostError::ToolMissing(_)) => {}
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
}
