//! Interface byte counters for usage accounting.
//!
//! Counters are cumulative since boot. The usage ledger tracks its own
//! delta checkpoint against the total returned here.

use std::path::PathBuf;

use crate::error::{HostError, HostResult};

/// Source of the cumulative transfer counter across non-loopback interfaces.
pub trait InterfaceCounters {
    /// Sum of rx + tx bytes over all non-loopback interfaces since boot.
    fn total_bytes(&self) -> HostResult<u64>;
}

/// Linux `/proc/net/dev` reader.
#[derive(Debug, Clone)]
pub struct ProcNetDev {
    path: PathBuf,
}

impl ProcNetDev {
    pub fn new() -> Self {
        Self {
            path: PathBuf::from("/proc/net/dev"),
        }
    }

    pub fn with_path(path: PathBuf) -> Self {
        Self { path }
    }
}

impl Default for ProcNetDev {
    fn default() -> Self {
        Self::new()
    }
}

impl InterfaceCounters for ProcNetDev {
    fn total_bytes(&self) -> HostResult<u64> {
        let text = std::fs::read_to_string(&self.path)?;
        parse_proc_net_dev(&text)
    }
}

/// Parse `/proc/net/dev`, summing rx and tx bytes of every interface
/// except loopback.
///
/// Format per line: `iface: rx_bytes rx_packets ... tx_bytes tx_packets ...`
/// with tx_bytes at field index 8 after the colon.
fn parse_proc_net_dev(text: &str) -> HostResult<u64> {
    let mut total: u64 = 0;
    // First two lines are headers.
    for line in text.lines().skip(2) {
        let Some((iface, rest)) = line.split_once(':') else {
            continue;
        };
        let iface = iface.trim();
        if iface == "lo" {
            continue;
        }
        let fields: Vec<&str> = rest.split_whitespace().collect();
        if fields.len() < 9 {
            return Err(HostError::Parse {
                source_tool: "/proc/net/dev".to_string(),
                detail: format!("short line for {iface}"),
            });
        }
        let rx: u64 = fields[0].parse().map_err(|_| HostError::Parse {
            source_tool: "/proc/net/dev".to_string(),
            detail: format!("bad rx_bytes for {iface}"),
        })?;
        let tx: u64 = fields[8].parse().map_err(|_| HostError::Parse {
            source_tool: "/proc/net/dev".to_string(),
            detail: format!("bad tx_bytes for {iface}"),
        })?;
        total = total.saturating_add(rx).saturating_add(tx);
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
Inter-|   Receive                                                |  Transmit
 face |bytes    packets errs drop fifo frame compressed multicast|bytes    packets errs drop fifo colls carrier compressed
    lo: 1000000    9999    0    0    0     0          0         0  1000000    9999    0    0    0     0       0          0
  eth0: 5000000   40000    0    0    0     0          0         0  3000000   20000    0    0    0     0       0          0
tailscale0:  200000    1500    0    0    0     0          0         0   100000     800    0    0    0     0       0          0
";

    #[test]
    fn sums_non_loopback_rx_and_tx() {
        let total = parse_proc_net_dev(SAMPLE).unwrap();
        // eth0: 5e6 + 3e6, tailscale0: 2e5 + 1e5; lo excluded.
        assert_eq!(total, 8_300_000);
    }

    #[test]
    fn empty_after_headers_is_zero() {
        let text = "header1\nheader2\n";
        assert_eq!(parse_proc_net_dev(text).unwrap(), 0);
    }

    #[test]
    fn malformed_line_is_parse_error() {
        let text = "h1\nh2\n  eth0: 12 34\n";
        assert!(parse_proc_net_dev(text).is_err());
    }

    #[test]
    fn reads_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("net-dev");
        std::fs::write(&path, SAMPLE).unwrap();

        let counters = ProcNetDev::with_path(path);
        assert_eq!(counters.total_bytes().unwrap(), 8_300_000);
    }
}
