//! Implementation of `hands status`.
//!
//! Reads the lockfile without taking it. A lock whose holder is gone is
//! reported as stale and left in place; the next runtime reclaims it.

use std::fmt::Write;
use std::path::{Path, PathBuf};

use anyhow::Result;
use serde::Serialize;

use crate::core::lock_path_for;
use crate::runtime::lockfile::{lock_status, LockStatus, ProcessProbe, RuntimeLock};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    Running,
    Stale,
    Stopped,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    pub workbook_dir: PathBuf,
    pub state: RunState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lock: Option<RuntimeLock>,
}

/// Status of the runtime for the workbook rooted at `root`.
pub fn status(root: &Path, probe: &dyn ProcessProbe) -> Result<StatusReport> {
    let (state, lock) = match lock_status(&lock_path_for(root), probe)? {
        LockStatus::Unlocked => (RunState::Stopped, None),
        LockStatus::Active(lock) => (RunState::Running, Some(lock)),
        LockStatus::Stale(lock) => (RunState::Stale, Some(lock)),
    };
    Ok(StatusReport {
        workbook_dir: root.to_path_buf(),
        state,
        lock,
    })
}

pub fn format_status(report: &StatusReport) -> String {
    let mut out = String::new();
    match (&report.state, &report.lock) {
        (RunState::Running, Some(lock)) => {
            writeln!(out, "runtime for `{}` is running", lock.workbook_id).unwrap();
            writeln!(out, "  pid:      {}", lock.pid).unwrap();
            writeln!(out, "  runtime:  127.0.0.1:{}", lock.runtime_port).unwrap();
            writeln!(out, "  database: 127.0.0.1:{}", lock.postgres_port).unwrap();
            writeln!(out, "  worker:   http://127.0.0.1:{}", lock.worker_port).unwrap();
            writeln!(out, "  since:    {}", lock.started_at.to_rfc3339()).unwrap();
        }
        (RunState::Stale, Some(lock)) => {
            writeln!(
                out,
                "stale lock: pid {} is no longer running (started {})",
                lock.pid,
                lock.started_at.to_rfc3339()
            )
            .unwrap();
        }
        _ => {
            writeln!(out, "no runtime is running for {}", report.workbook_dir.display()).unwrap();
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::lockfile::{acquire_lock, SystemProbe};
    use crate::runtime::ports::Ports;
    use tempfile::TempDir;

    struct DeadProbe;

    impl ProcessProbe for DeadProbe {
        fn is_alive(&self, _pid: u32) -> bool {
            false
        }
    }

    fn ports() -> Ports {
        Ports {
            runtime: 55001,
            database: 55100,
            worker: 55200,
        }
    }

    #[test]
    fn test_no_lock_is_stopped() {
        let tmp = TempDir::new().unwrap();
        let report = status(tmp.path(), &SystemProbe).unwrap();
        assert_eq!(report.state, RunState::Stopped);
        assert!(format_status(&report).starts_with("no runtime"));
    }

    #[test]
    fn test_live_and_stale_locks() {
        let tmp = TempDir::new().unwrap();
        let lock_path = lock_path_for(tmp.path());
        let _guard = acquire_lock(ports(), "wb-1234", tmp.path(), &lock_path, &SystemProbe).unwrap();

        let live = status(tmp.path(), &SystemProbe).unwrap();
        assert_eq!(live.state, RunState::Running);
        assert!(format_status(&live).contains("worker:   http://127.0.0.1:55200"));

        let stale = status(tmp.path(), &DeadProbe).unwrap();
        assert_eq!(stale.state, RunState::Stale);
        assert!(lock_path.exists());

        let json = serde_json::to_value(&stale).unwrap();
        assert_eq!(json["state"], "stale");
        assert_eq!(json["lock"]["postgresPort"], 55100);
    }
}
