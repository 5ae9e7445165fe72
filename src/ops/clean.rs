//! Implementation of `hands clean`.

use std::path::{Path, PathBuf};

use anyhow::Result;

use crate::core::Workbook;
use crate::runtime::lockfile::{lock_status, LockError, LockStatus, ProcessProbe};
use crate::util::fs::remove_dir_all_if_exists;

#[derive(Debug, Clone, Copy, Default)]
pub struct CleanOptions {
    /// Also remove the database cluster
    pub all: bool,
}

/// Remove generated output for the workbook at `dir`.
///
/// Refuses while a live runtime holds the workbook. Returns the removed
/// directories.
pub fn clean(dir: &Path, options: CleanOptions, probe: &dyn ProcessProbe) -> Result<Vec<PathBuf>> {
    let workbook = Workbook::open(dir)?;

    if let LockStatus::Active(lock) = lock_status(&workbook.lock_path(), probe)? {
        return Err(LockError::RuntimeAlreadyActive {
            dir: workbook.root().to_path_buf(),
            holder_pid: lock.pid,
            runtime_port: lock.runtime_port,
        }
        .into());
    }

    let mut targets = vec![workbook.build_dir()];
    if options.all {
        targets.push(workbook.database_dir());
    }

    let mut removed = Vec::new();
    for target in targets {
        if target.exists() {
            remove_dir_all_if_exists(&target)?;
            tracing::debug!("removed {}", target.display());
            removed.push(target);
        }
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::lockfile::{acquire_lock, SystemProbe};
    use crate::runtime::ports::Ports;
    use std::fs;
    use tempfile::TempDir;

    fn workbook() -> TempDir {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("hands.toml"), "name = \"wb\"\n").unwrap();
        fs::create_dir_all(tmp.path().join(".hands/build")).unwrap();
        fs::write(tmp.path().join(".hands/build/worker.js"), "").unwrap();
        fs::create_dir_all(tmp.path().join(".hands/postgres")).unwrap();
        tmp
    }

    #[test]
    fn test_clean_keeps_database() {
        let tmp = workbook();
        let removed = clean(tmp.path(), CleanOptions::default(), &SystemProbe).unwrap();
        assert_eq!(removed.len(), 1);
        assert!(!tmp.path().join(".hands/build").exists());
        assert!(tmp.path().join(".hands/postgres").exists());
    }

    #[test]
    fn test_clean_all() {
        let tmp = workbook();
        clean(tmp.path(), CleanOptions { all: true }, &SystemProbe).unwrap();
        assert!(!tmp.path().join(".hands/postgres").exists());
        assert!(tmp.path().join("hands.toml").exists());
    }

    #[test]
    fn test_refuses_while_running() {
        let tmp = workbook();
        let wb = Workbook::open(tmp.path()).unwrap();
        let ports = Ports {
            runtime: 55001,
            database: 55100,
            worker: 55200,
        };
        let _guard = acquire_lock(ports, wb.id(), wb.root(), &wb.lock_path(), &SystemProbe).unwrap();

        let err = clean(tmp.path(), CleanOptions::default(), &SystemProbe).unwrap_err();
        assert!(err.to_string().contains("already active"));
        assert!(tmp.path().join(".hands/build").exists());
    }
}
