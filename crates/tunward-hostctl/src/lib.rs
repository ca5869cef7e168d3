//! tunward-hostctl — narrow capability interfaces over the host's tools.
//!
//! The supervisor decides and commands; the VPN client, service manager,
//! packet filter, and traffic shaper do the actual work. Each of those
//! collaborators is abstracted behind a small trait here, with one shell
//! adapter per trait and scriptable in-memory implementations in [`mock`]
//! so the decision logic is testable without a real network or privileged
//! operations.
//!
//! Shell adapters run external tools with a bounded timeout. A missing
//! tool surfaces as [`HostError::ToolMissing`], which callers log once and
//! then skip for the rest of the run rather than retrying every tick.

pub mod command;
pub mod counters;
pub mod error;
pub mod mock;
pub mod system;
pub mod vpn;

pub use command::{CommandOutput, run_tool};
pub use counters::{InterfaceCounters, ProcNetDev};
pub use error::{HostError, HostResult};
pub use system::{
    PacketFilter, Reachability, ServiceSupervisor, ShellPacketFilter, ShellReachability,
    SystemdSupervisor, TcShaper, TrafficShaper,
};
pub use vpn::{ShellVpn, VpnControl, VpnStatus};
