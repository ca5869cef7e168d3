//! Scriptable in-memory collaborators.
//!
//! Decision logic (escalation, throttling, probing) is tested against
//! these instead of real tools, so no test needs a network or privilege.
//! Each mock records the calls it receives and can be scripted to fail,
//! hang, or report a missing tool.

use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use crate::counters::InterfaceCounters;
use crate::error::{HostError, HostResult};
use crate::system::{PacketFilter, Reachability, ServiceSupervisor, TrafficShaper};
use crate::vpn::{VpnControl, VpnStatus};

fn failed(command: &str) -> HostError {
    HostError::CommandFailed {
        command: command.to_string(),
        status: "exit status: 1".to_string(),
        stderr: "mock failure".to_string(),
    }
}

// ── VPN ────────────────────────────────────────────────────────────

#[derive(Debug)]
pub struct MockVpn {
    /// Statuses returned in order; falls back to `default_status` when empty.
    pub status_queue: Mutex<VecDeque<VpnStatus>>,
    pub default_status: Mutex<VpnStatus>,
    pub fail_status: AtomicBool,
    pub fail_up: AtomicBool,
    pub fail_up_forced: AtomicBool,
    pub fail_down: AtomicBool,
    pub fail_reauth: AtomicBool,
    pub calls: Mutex<Vec<String>>,
}

impl Default for MockVpn {
    fn default() -> Self {
        Self::healthy()
    }
}

impl MockVpn {
    /// A client that reports a fully healthy tunnel unless scripted otherwise.
    pub fn healthy() -> Self {
        Self {
            status_queue: Mutex::new(VecDeque::new()),
            default_status: Mutex::new(VpnStatus {
                running: true,
                authenticated: true,
                exit_node_active: true,
                peer_count: 2,
            }),
            fail_status: AtomicBool::new(false),
            fail_up: AtomicBool::new(false),
            fail_up_forced: AtomicBool::new(false),
            fail_down: AtomicBool::new(false),
            fail_reauth: AtomicBool::new(false),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn push_status(&self, status: VpnStatus) {
        self.status_queue.lock().unwrap().push_back(status);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: &str) {
        self.calls.lock().unwrap().push(call.to_string());
    }
}

impl VpnControl for MockVpn {
    async fn status(&self) -> HostResult<VpnStatus> {
        self.record("status");
        if self.fail_status.load(Ordering::SeqCst) {
            return Err(failed("vpn status"));
        }
        let queued = self.status_queue.lock().unwrap().pop_front();
        Ok(queued.unwrap_or_else(|| *self.default_status.lock().unwrap()))
    }

    async fn up(&self) -> HostResult<()> {
        self.record("up");
        if self.fail_up.load(Ordering::SeqCst) {
            return Err(failed("vpn up"));
        }
        Ok(())
    }

    async fn up_forced(&self) -> HostResult<()> {
        self.record("up_forced");
        if self.fail_up_forced.load(Ordering::SeqCst) {
            return Err(failed("vpn up --reset"));
        }
        Ok(())
    }

    async fn down(&self) -> HostResult<()> {
        self.record("down");
        if self.fail_down.load(Ordering::SeqCst) {
            return Err(failed("vpn down"));
        }
        Ok(())
    }

    async fn reauth(&self, key_file: &Path) -> HostResult<()> {
        self.record(&format!("reauth {}", key_file.display()));
        if self.fail_reauth.load(Ordering::SeqCst) {
            return Err(failed("vpn reauth"));
        }
        Ok(())
    }

    async fn clear_session_state(&self) -> HostResult<()> {
        self.record("clear_session_state");
        Ok(())
    }
}

// ── Service supervision ────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct MockSupervisor {
    pub fail: AtomicBool,
    pub calls: Mutex<Vec<String>>,
}

impl MockSupervisor {
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

impl ServiceSupervisor for MockSupervisor {
    async fn restart(&self, service: &str) -> HostResult<()> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("restart {service}"));
        if self.fail.load(Ordering::SeqCst) {
            return Err(failed("systemctl restart"));
        }
        Ok(())
    }
}

// ── Packet filter ──────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct MockFilter {
    pub fail: AtomicBool,
    pub calls: Mutex<Vec<String>>,
}

impl MockFilter {
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

impl PacketFilter for MockFilter {
    async fn apply_baseline_rules(&self) -> HostResult<()> {
        self.calls.lock().unwrap().push("baseline".to_string());
        if self.fail.load(Ordering::SeqCst) {
            return Err(failed("iptables-restore"));
        }
        Ok(())
    }

    async fn remove_rule(&self, rule_spec: &str) -> HostResult<()> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("remove {rule_spec}"));
        if self.fail.load(Ordering::SeqCst) {
            return Err(failed("iptables -D"));
        }
        Ok(())
    }
}

// ── Traffic shaper ─────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct MockShaper {
    pub fail: AtomicBool,
    pub calls: Mutex<Vec<String>>,
}

impl MockShaper {
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

impl TrafficShaper for MockShaper {
    async fn set_cap(&self, interface: &str, kbit: u32) -> HostResult<()> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("set {interface} {kbit}"));
        if self.fail.load(Ordering::SeqCst) {
            return Err(failed("tc qdisc replace"));
        }
        Ok(())
    }

    async fn clear_cap(&self, interface: &str) -> HostResult<()> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("clear {interface}"));
        if self.fail.load(Ordering::SeqCst) {
            return Err(failed("tc qdisc del"));
        }
        Ok(())
    }
}

// ── Reachability ───────────────────────────────────────────────────

#[derive(Debug)]
pub struct MockReachability {
    /// Per-target ping results; unlisted targets succeed.
    pub ping_results: Mutex<HashMap<String, bool>>,
    pub resolve_ok: AtomicBool,
    /// Delay injected before every ping answer (for deadline tests).
    pub ping_delay: Mutex<Option<Duration>>,
    /// Report the ping tool as missing entirely.
    pub ping_tool_missing: AtomicBool,
    pub calls: Mutex<Vec<String>>,
}

impl Default for MockReachability {
    fn default() -> Self {
        Self {
            ping_results: Mutex::new(HashMap::new()),
            resolve_ok: AtomicBool::new(true),
            ping_delay: Mutex::new(None),
            ping_tool_missing: AtomicBool::new(false),
            calls: Mutex::new(Vec::new()),
        }
    }
}

impl MockReachability {
    pub fn set_ping(&self, target: &str, reachable: bool) {
        self.ping_results
            .lock()
            .unwrap()
            .insert(target.to_string(), reachable);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

impl Reachability for MockReachability {
    async fn ping(&self, target: &str, _timeout: Duration) -> HostResult<bool> {
        self.calls.lock().unwrap().push(format!("ping {target}"));
        if self.ping_tool_missing.load(Ordering::SeqCst) {
            return Err(HostError::ToolMissing("ping".to_string()));
        }
        let delay = *self.ping_delay.lock().unwrap();
        if let Some(d) = delay {
            tokio::time::sleep(d).await;
        }
        let result = self
            .ping_results
            .lock()
            .unwrap()
            .get(target)
            .copied()
            .unwrap_or(true);
        Ok(result)
    }

    async fn resolve(&self, name: &str, _timeout: Duration) -> HostResult<bool> {
        self.calls.lock().unwrap().push(format!("resolve {name}"));
        Ok(self.resolve_ok.load(Ordering::SeqCst))
    }

    async fn flush_dns_cache(&self) -> HostResult<()> {
        self.calls.lock().unwrap().push("flush_dns".to_string());
        Ok(())
    }
}

// ── Counters ───────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct MockCounters {
    pub total: AtomicU64,
    pub fail: AtomicBool,
}

impl MockCounters {
    pub fn with_total(total: u64) -> Self {
        Self {
            total: AtomicU64::new(total),
            fail: AtomicBool::new(false),
        }
    }

    pub fn set_total(&self, total: u64) {
        self.total.store(total, Ordering::SeqCst);
    }
}

impl InterfaceCounters for MockCounters {
    fn total_bytes(&self) -> HostResult<u64> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(HostError::Parse {
                source_tool: "/proc/net/dev".to_string(),
                detail: "mock failure".to_string(),
            });
        }
        Ok(self.total.load(Ordering::SeqCst))
    }
}
