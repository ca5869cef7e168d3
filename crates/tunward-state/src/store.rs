//! StateFiles — file-backed persistence for the supervisor.
//!
//! The data directory holds:
//! - `ledger.json` — the usage ledger, atomic overwrite.
//! - `status.json` — the per-tick status artifact, atomic overwrite.
//! - `last-tick` — timestamp of the last completed liveness tick.
//! - `snapshots.log` — append-only diagnostics snapshot log.
//!
//! Overwrites go through a temp file in the same directory followed by a
//! rename, so a crash mid-write leaves the previous record intact.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tracing::{debug, warn};

use crate::error::{StateError, StateResult};
use crate::types::{DiagnosticsSnapshot, StatusReport, UsageLedger};

const LEDGER_FILE: &str = "ledger.json";
const STATUS_FILE: &str = "status.json";
const LAST_TICK_FILE: &str = "last-tick";
const SNAPSHOT_LOG: &str = "snapshots.log";

/// Handle on the supervisor's data directory.
#[derive(Debug, Clone)]
pub struct StateFiles {
    dir: PathBuf,
}

impl StateFiles {
    /// Open (creating if needed) the data directory.
    pub fn open(dir: &Path) -> StateResult<Self> {
        std::fs::create_dir_all(dir)?;
        debug!(?dir, "state directory opened");
        Ok(Self {
            dir: dir.to_path_buf(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    // ── Ledger ─────────────────────────────────────────────────────

    /// Load the usage ledger if a readable one exists.
    pub fn load_ledger(&self) -> StateResult<Option<UsageLedger>> {
        let path = self.dir.join(LEDGER_FILE);
        if !path.exists() {
            return Ok(None);
        }
        let bytes = std::fs::read(&path)?;
        let ledger = serde_json::from_slice(&bytes)
            .map_err(|e| StateError::Deserialize(e.to_string()))?;
        Ok(Some(ledger))
    }

    /// Load the ledger, falling back to a fresh record for `period` when
    /// the file is absent or unreadable. Usage becomes "unknown" rather
    /// than the process crashing on a bad file.
    pub fn load_ledger_or_default(&self, period: &str) -> UsageLedger {
        match self.load_ledger() {
            Ok(Some(ledger)) => ledger,
            Ok(None) => {
                debug!(%period, "no ledger on disk, starting fresh");
                UsageLedger::new(period.to_string())
            }
            Err(e) => {
                warn!(error = %e, %period, "ledger unreadable, re-initializing");
                UsageLedger::new(period.to_string())
            }
        }
    }

    /// Persist the ledger with atomic replace.
    pub fn save_ledger(&self, ledger: &UsageLedger) -> StateResult<()> {
        let bytes = serde_json::to_vec_pretty(ledger)
            .map_err(|e| StateError::Serialize(e.to_string()))?;
        self.write_atomic(LEDGER_FILE, &bytes)
    }

    // ── Status artifact ────────────────────────────────────────────

    /// Persist the per-tick status report with atomic replace.
    pub fn save_status(&self, report: &StatusReport) -> StateResult<()> {
        let bytes = serde_json::to_vec_pretty(report)
            .map_err(|e| StateError::Serialize(e.to_string()))?;
        self.write_atomic(STATUS_FILE, &bytes)
    }

    /// Read back the last written status report.
    pub fn load_status(&self) -> StateResult<Option<StatusReport>> {
        let path = self.dir.join(STATUS_FILE);
        if !path.exists() {
            return Ok(None);
        }
        let bytes = std::fs::read(&path)?;
        let report = serde_json::from_slice(&bytes)
            .map_err(|e| StateError::Deserialize(e.to_string()))?;
        Ok(Some(report))
    }

    // ── Tick marker ────────────────────────────────────────────────

    /// Record the timestamp of the last completed liveness tick.
    pub fn touch_last_tick(&self, ts: u64) -> StateResult<()> {
        self.write_atomic(LAST_TICK_FILE, format!("{ts}\n").as_bytes())
    }

    /// Read the last-tick marker, if present and parseable.
    pub fn last_tick(&self) -> StateResult<Option<u64>> {
        let path = self.dir.join(LAST_TICK_FILE);
        if !path.exists() {
            return Ok(None);
        }
        let text = std::fs::read_to_string(&path)?;
        Ok(text.trim().parse::<u64>().ok())
    }

    // ── Diagnostics log ────────────────────────────────────────────

    /// Append a rendered snapshot to the diagnostics log.
    pub fn append_snapshot(&self, snapshot: &DiagnosticsSnapshot) -> StateResult<()> {
        let path = self.dir.join(SNAPSHOT_LOG);
        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
        file.write_all(snapshot.render().as_bytes())?;
        file.write_all(b"\n")?;
        debug!(
            failures = snapshot.consecutive_failures,
            tier = %snapshot.tier,
            "diagnostics snapshot appended"
        );
        Ok(())
    }

    // ── Internals ──────────────────────────────────────────────────

    fn write_atomic(&self, name: &str, bytes: &[u8]) -> StateResult<()> {
        let mut tmp = NamedTempFile::new_in(&self.dir)?;
        tmp.write_all(bytes)?;
        tmp.as_file().sync_all()?;
        tmp.persist(self.dir.join(name))
            .map_err(|e| StateError::Persist(e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::*;

    fn open_temp() -> (tempfile::TempDir, StateFiles) {
        let dir = tempfile::tempdir().unwrap();
        let files = StateFiles::open(dir.path()).unwrap();
        (dir, files)
    }

    fn test_ledger() -> UsageLedger {
        UsageLedger {
            billing_period: "2025-03".to_string(),
            accumulated_bytes: 12_345,
            last_sample_at: 1000,
            last_counter_total: 99_999,
            last_accumulated_hour: Some(484_000),
        }
    }

    #[test]
    fn ledger_roundtrip() {
        let (_dir, files) = open_temp();
        let ledger = test_ledger();

        files.save_ledger(&ledger).unwrap();
        let loaded = files.load_ledger().unwrap();
        assert_eq!(loaded, Some(ledger));
    }

    #[test]
    fn missing_ledger_is_none() {
        let (_dir, files) = open_temp();
        assert!(files.load_ledger().unwrap().is_none());
    }

    #[test]
    fn missing_ledger_defaults_fresh() {
        let (_dir, files) = open_temp();
        let ledger = files.load_ledger_or_default("2025-04");
        assert_eq!(ledger.billing_period, "2025-04");
        assert_eq!(ledger.accumulated_bytes, 0);
    }

    #[test]
    fn corrupt_ledger_reinitializes() {
        let (dir, files) = open_temp();
        std::fs::write(dir.path().join(LEDGER_FILE), b"{not json").unwrap();

        let ledger = files.load_ledger_or_default("2025-04");
        assert_eq!(ledger.billing_period, "2025-04");
        assert_eq!(ledger.accumulated_bytes, 0);
    }

    #[test]
    fn save_overwrites_in_place() {
        let (_dir, files) = open_temp();
        let mut ledger = test_ledger();
        files.save_ledger(&ledger).unwrap();

        ledger.accumulated_bytes = 99_999;
        files.save_ledger(&ledger).unwrap();

        let loaded = files.load_ledger().unwrap().unwrap();
        assert_eq!(loaded.accumulated_bytes, 99_999);
    }

    #[test]
    fn status_roundtrip() {
        let (_dir, files) = open_temp();
        let report = StatusReport {
            verdict: HealthVerdict::passing(1000),
            escalation: EscalationState::new(1000),
            throttle: ThrottleState::inactive(),
            written_at: 1000,
        };

        files.save_status(&report).unwrap();
        let loaded = files.load_status().unwrap();
        assert_eq!(loaded, Some(report));
    }

    #[test]
    fn last_tick_roundtrip() {
        let (_dir, files) = open_temp();
        assert!(files.last_tick().unwrap().is_none());

        files.touch_last_tick(1_742_000_000).unwrap();
        assert_eq!(files.last_tick().unwrap(), Some(1_742_000_000));
    }

    #[test]
    fn snapshot_log_appends() {
        let (dir, files) = open_temp();
        let snap = DiagnosticsSnapshot {
            taken_at: 1000,
            consecutive_failures: 3,
            tier: RemediationTier::SoftRestart,
            blocks: vec![DiagBlock {
                label: "vpn status".to_string(),
                content: "running".to_string(),
            }],
        };

        files.append_snapshot(&snap).unwrap();
        files.append_snapshot(&snap).unwrap();

        let log = std::fs::read_to_string(dir.path().join(SNAPSHOT_LOG)).unwrap();
        assert_eq!(log.matches("==== snapshot @ 1000").count(), 2);
        assert!(log.contains("---- vpn status ----"));
    }

    #[test]
    fn open_creates_directory() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a/b/tunward");
        let files = StateFiles::open(&nested).unwrap();
        assert!(nested.is_dir());
        files.touch_last_tick(1).unwrap();
    }
}
