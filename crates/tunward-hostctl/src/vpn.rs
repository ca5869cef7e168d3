//! VPN client control interface.
//!
//! The tunnel is managed by an external client CLI (`tailscale`-shaped:
//! `status --json`, `up`, `down`, `logout`). The supervisor only issues
//! commands and reads status; it never implements tunneling itself.

use std::path::Path;
use std::time::Duration;

use tracing::debug;

use tunward_core::VpnConfig;

use crate::command::run_tool;
use crate::error::{HostError, HostResult};

/// Condensed client status, parsed from the client's JSON output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VpnStatus {
    /// The client backend reports a live tunnel.
    pub running: bool,
    /// The session holds valid credentials.
    pub authenticated: bool,
    /// This host is advertising itself as an exit node.
    pub exit_node_active: bool,
    /// Known tunnel peers.
    pub peer_count: usize,
}

/// Control surface of the VPN client collaborator.
pub trait VpnControl {
    fn status(&self) -> impl Future<Output = HostResult<VpnStatus>> + Send;
    /// Bring the tunnel up with the standard flags.
    fn up(&self) -> impl Future<Output = HostResult<()>> + Send;
    /// Bring the tunnel up with the forced-reset flag (used by a full reset).
    fn up_forced(&self) -> impl Future<Output = HostResult<()>> + Send;
    fn down(&self) -> impl Future<Output = HostResult<()>> + Send;
    /// Re-authenticate in place, without tearing the session down.
    fn reauth(&self, key_file: &Path) -> impl Future<Output = HostResult<()>> + Send;
    /// Delete the client's persisted session state (full reset only).
    fn clear_session_state(&self) -> impl Future<Output = HostResult<()>> + Send;
}

/// Shell adapter driving the client CLI.
#[derive(Debug, Clone)]
pub struct ShellVpn {
    config: VpnConfig,
    timeout: Duration,
}

impl ShellVpn {
    pub fn new(config: VpnConfig, timeout: Duration) -> Self {
        Self { config, timeout }
    }

    fn flags(&self) -> Vec<&str> {
        self.config.up_flags.iter().map(String::as_str).collect()
    }
}

impl VpnControl for ShellVpn {
    async fn status(&self) -> HostResult<VpnStatus> {
        let out = run_tool(
            &self.config.client_bin,
            &["status", "--json"],
            self.timeout,
        )
        .await?;
        parse_status(&self.config.client_bin, &out.stdout)
    }

    async fn up(&self) -> HostResult<()> {
        let mut args = vec!["up"];
        args.extend(self.flags());
        run_tool(&self.config.client_bin, &args, self.timeout).await?;
        debug!("tunnel up issued");
        Ok(())
    }

    async fn up_forced(&self) -> HostResult<()> {
        let mut args = vec!["up", "--reset", "--force-reauth"];
        args.extend(self.flags());
        run_tool(&self.config.client_bin, &args, self.timeout).await?;
        debug!("forced tunnel up issued");
        Ok(())
    }

    async fn down(&self) -> HostResult<()> {
        run_tool(&self.config.client_bin, &["down"], self.timeout).await?;
        debug!("tunnel down issued");
        Ok(())
    }

    async fn reauth(&self, key_file: &Path) -> HostResult<()> {
        let key_arg = format!("--auth-key=file:{}", key_file.display());
        let mut args = vec!["up", key_arg.as_str()];
        args.extend(self.flags());
        run_tool(&self.config.client_bin, &args, self.timeout).await?;
        debug!("re-authentication issued");
        Ok(())
    }

    async fn clear_session_state(&self) -> HostResult<()> {
        let path = &self.config.state_file;
        match std::fs::remove_file(path) {
            Ok(()) => {
                debug!(?path, "session state deleted");
                Ok(())
            }
            // Already gone counts as cleared.
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(HostError::Io(e)),
        }
    }
}

/// Parse the client's `status --json` output into a [`VpnStatus`].
fn parse_status(tool: &str, stdout: &str) -> HostResult<VpnStatus> {
    let value: serde_json::Value =
        serde_json::from_str(stdout).map_err(|e| HostError::Parse {
            source_tool: tool.to_string(),
            detail: e.to_string(),
        })?;

    let backend = value
        .get("BackendState")
        .and_then(|v| v.as_str())
        .unwrap_or("Unknown");

    let running = backend == "Running";
    let authenticated = !matches!(backend, "NeedsLogin" | "NeedsMachineAuth");
    let exit_node_active = value
        .pointer("/Self/ExitNodeOption")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);
    let peer_count = value
        .get("Peer")
        .and_then(|v| v.as_object())
        .map(|m| m.len())
        .unwrap_or(0);

    Ok(VpnStatus {
        running,
        authenticated,
        exit_node_active,
        peer_count,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_running_status() {
        let json = r#"{
            "BackendState": "Running",
            "Self": {"Online": true, "ExitNodeOption": true},
            "Peer": {"k1": {}, "k2": {}, "k3": {}}
        }"#;
        let status = parse_status("tailscale", json).unwrap();
        assert!(status.running);
        assert!(status.authenticated);
        assert!(status.exit_node_active);
        assert_eq!(status.peer_count, 3);
    }

    #[test]
    fn parse_needs_login() {
        let json = r#"{"BackendState": "NeedsLogin", "Self": {}, "Peer": {}}"#;
        let status = parse_status("tailscale", json).unwrap();
        assert!(!status.running);
        assert!(!status.authenticated);
        assert_eq!(status.peer_count, 0);
    }

    #[test]
    fn parse_stopped_backend() {
        let json = r#"{"BackendState": "Stopped"}"#;
        let status = parse_status("tailscale", json).unwrap();
        assert!(!status.running);
        // Stopped is not an auth failure.
        assert!(status.authenticated);
        assert!(!status.exit_node_active);
    }

    #[test]
    fn parse_garbage_is_parse_error() {
        let err = parse_status("tailscale", "not json at all").unwrap_err();
        assert!(matches!(err, HostError::Parse { .. }));
    }

    #[tokio::test]
    async fn clear_session_state_tolerates_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = VpnConfig {
            client_bin: "tailscale".to_string(),
            daemon_service: "tailscaled".to_string(),
            state_file: dir.path().join("absent.state"),
            auth_key_file: dir.path().join("authkey"),
            up_flags: vec![],
        };
        let vpn = ShellVpn::new(config, Duration::from_secs(2));
        vpn.clear_session_state().await.unwrap();
    }

    #[tokio::test]
    async fn clear_session_state_deletes_file() {
        let dir = tempfile::tempdir().unwrap();
        let state = dir.path().join("client.state");
        std::fs::write(&state, b"session").unwrap();

        let config = VpnConfig {
            client_bin: "tailscale".to_string(),
            daemon_service: "tailscaled".to_string(),
            state_file: state.clone(),
            auth_key_file: dir.path().join("authkey"),
            up_flags: vec![],
        };
        let vpn = ShellVpn::new(config, Duration::from_secs(2));
        vpn.clear_session_state().await.unwrap();
        assert!(!state.exists());
    }
}
