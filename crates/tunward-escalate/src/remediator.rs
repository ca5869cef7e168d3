//! Remediation executor.
//!
//! Each tier is a fixed command sequence against the VPN client and the
//! service supervisor. An attempt succeeds when its commands all exit
//! successfully; whether the tunnel actually came back is the next
//! scheduler tick's question, which keeps remediation and verification
//! from double-escalating each other.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use tunward_hostctl::{HostResult, ServiceSupervisor, VpnControl};
use tunward_state::RemediationTier;

/// Applies one remediation tier at a time, strictly in ladder order as
/// driven by the tracker.
pub struct Remediator<V, S> {
    vpn: Arc<V>,
    supervisor: Arc<S>,
    daemon_service: String,
    auth_key_file: PathBuf,
    /// Settle pause between teardown and bring-up steps.
    pause: Duration,
}

impl<V: VpnControl, S: ServiceSupervisor> Remediator<V, S> {
    pub fn new(
        vpn: Arc<V>,
        supervisor: Arc<S>,
        daemon_service: String,
        auth_key_file: PathBuf,
        pause: Duration,
    ) -> Self {
        Self {
            vpn,
            supervisor,
            daemon_service,
            auth_key_file,
            pause,
        }
    }

    /// Run one tier's command sequence. Returns whether the commands all
    /// succeeded. Never panics and never escalates on its own.
    pub async fn attempt(&self, tier: RemediationTier) -> bool {
        info!(%tier, "remediation attempt starting");
        let result = match tier {
            RemediationTier::None => Ok(()),
            RemediationTier::SoftRestart => self.soft_restart().await,
            RemediationTier::CredentialRefresh => self.credential_refresh().await,
            RemediationTier::HardRestart => self.hard_restart().await,
            RemediationTier::FullReset => self.full_reset().await,
        };

        match result {
            Ok(()) => {
                info!(%tier, "remediation commands succeeded");
                true
            }
            Err(e) => {
                warn!(%tier, error = %e, "remediation attempt failed");
                false
            }
        }
    }

    /// Bring the tunnel down, pause, bring it up with standard flags.
    async fn soft_restart(&self) -> HostResult<()> {
        self.vpn.down().await?;
        tokio::time::sleep(self.pause).await;
        self.vpn.up().await
    }

    /// Re-authenticate without tearing the session down.
    async fn credential_refresh(&self) -> HostResult<()> {
        self.vpn.reauth(&self.auth_key_file).await
    }

    /// Restart the daemon process, then reconnect.
    async fn hard_restart(&self) -> HostResult<()> {
        self.supervisor.restart(&self.daemon_service).await?;
        tokio::time::sleep(self.pause).await;
        self.vpn.up().await
    }

    /// Stop the tunnel, delete persisted session state, restart the
    /// daemon, reconnect with the forced-reset flag.
    async fn full_reset(&self) -> HostResult<()> {
        self.vpn.down().await?;
        self.vpn.clear_session_state().await?;
        self.supervisor.restart(&self.daemon_service).await?;
        tokio::time::sleep(self.pause).await;
        self.vpn.up_forced().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::Ordering;
    use tunward_hostctl::mock::{MockSupervisor, MockVpn};

    fn remediator(
        vpn: Arc<MockVpn>,
        supervisor: Arc<MockSupervisor>,
    ) -> Remediator<MockVpn, MockSupervisor> {
        Remediator::new(
            vpn,
            supervisor,
            "tailscaled".to_string(),
            PathBuf::from("/etc/tunward/authkey"),
            Duration::from_millis(1),
        )
    }

    #[tokio::test]
    async fn soft_restart_is_down_then_up() {
        let vpn = Arc::new(MockVpn::healthy());
        let sup = Arc::new(MockSupervisor::default());
        let r = remediator(vpn.clone(), sup);

        assert!(r.attempt(RemediationTier::SoftRestart).await);
        assert_eq!(vpn.calls(), vec!["down", "up"]);
    }

    #[tokio::test]
    async fn credential_refresh_reauths_in_place() {
        let vpn = Arc::new(MockVpn::healthy());
        let sup = Arc::new(MockSupervisor::default());
        let r = remediator(vpn.clone(), sup);

        assert!(r.attempt(RemediationTier::CredentialRefresh).await);
        let calls = vpn.calls();
        assert_eq!(calls.len(), 1);
        assert!(calls[0].starts_with("reauth"));
        // No teardown happened.
        assert!(!calls.iter().any(|c| c == "down"));
    }

    #[tokio::test]
    async fn hard_restart_restarts_daemon_then_reconnects() {
        let vpn = Arc::new(MockVpn::healthy());
        let sup = Arc::new(MockSupervisor::default());
        let r = remediator(vpn.clone(), sup.clone());

        assert!(r.attempt(RemediationTier::HardRestart).await);
        assert_eq!(sup.calls(), vec!["restart tailscaled"]);
        assert_eq!(vpn.calls(), vec!["up"]);
    }

    #[tokio::test]
    async fn full_reset_clears_state_and_forces_up() {
        let vpn = Arc::new(MockVpn::healthy());
        let sup = Arc::new(MockSupervisor::default());
        let r = remediator(vpn.clone(), sup.clone());

        assert!(r.attempt(RemediationTier::FullReset).await);
        assert_eq!(
            vpn.calls(),
            vec!["down", "clear_session_state", "up_forced"]
        );
        assert_eq!(sup.calls(), vec!["restart tailscaled"]);
    }

    #[tokio::test]
    async fn failed_command_reports_false() {
        let vpn = Arc::new(MockVpn::healthy());
        vpn.fail_up.store(true, Ordering::SeqCst);
        let sup = Arc::new(MockSupervisor::default());
        let r = remediator(vpn, sup);

        assert!(!r.attempt(RemediationTier::SoftRestart).await);
    }

    #[tokio::test]
    async fn failed_down_short_circuits_soft_restart() {
        let vpn = Arc::new(MockVpn::healthy());
        vpn.fail_down.store(true, Ordering::SeqCst);
        let sup = Arc::new(MockSupervisor::default());
        let r = remediator(vpn.clone(), sup);

        assert!(!r.attempt(RemediationTier::SoftRestart).await);
        // Up was never issued after the failed down.
        assert_eq!(vpn.calls(), vec!["down"]);
    }

    #[tokio::test]
    async fn failed_restart_short_circuits_full_reset() {
        let vpn = Arc::new(MockVpn::healthy());
        let sup = Arc::new(MockSupervisor::default());
        sup.fail.store(true, Ordering::SeqCst);
        let r = remediator(vpn.clone(), sup);

        assert!(!r.attempt(RemediationTier::FullReset).await);
        assert_eq!(vpn.calls(), vec!["down", "clear_session_state"]);
    }

    #[tokio::test]
    async fn tier_none_is_a_noop_success() {
        let vpn = Arc::new(MockVpn::healthy());
        let sup = Arc::new(MockSupervisor::default());
        let r = remediator(vpn.clone(), sup);

        assert!(r.attempt(RemediationTier::None).await);
        assert!(vpn.calls().is_empty());
    }
}
