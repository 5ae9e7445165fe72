//! The per-workbook runtime lock.
//!
//! At most one runtime may own a workbook directory. Ownership is recorded
//! in `.hands/runtime.lock` as JSON naming the holder's pid and ports, so
//! other tools can find a running instance.
//!
//! The lock is published with a hard link from a fully written temp file,
//! so a concurrent reader never sees a half-written lock and at most one
//! of several concurrent acquirers succeeds. An existing lock whose holder
//! pid is no longer alive is stale and gets reclaimed.

use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use sysinfo::{Pid, ProcessStatus, ProcessesToUpdate, System};
use thiserror::Error;

use crate::runtime::ports::Ports;
use crate::util::fs::{ensure_dir, write_atomic};

/// Contents of the lockfile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeLock {
    pub workbook_id: String,
    pub workbook_dir: PathBuf,
    pub pid: u32,
    pub runtime_port: u16,
    pub postgres_port: u16,
    pub worker_port: u16,
    pub started_at: DateTime<Utc>,
}

impl RuntimeLock {
    pub fn ports(&self) -> Ports {
        Ports {
            runtime: self.runtime_port,
            database: self.postgres_port,
            worker: self.worker_port,
        }
    }

    fn same_holder(&self, other: &RuntimeLock) -> bool {
        self.pid == other.pid && self.started_at == other.started_at
    }
}

/// Fields of a held lock that may change while the runtime runs.
#[derive(Debug, Clone, Copy, Default)]
pub struct LockUpdate {
    pub runtime_port: Option<u16>,
    pub postgres_port: Option<u16>,
    pub worker_port: Option<u16>,
}

/// Errors acquiring or maintaining the lock.
#[derive(Debug, Error, Diagnostic)]
pub enum LockError {
    #[error("a runtime is already active for {} (pid {holder_pid}, port {runtime_port})", .dir.display())]
    #[diagnostic(
        code(hands::lock::active),
        help("run `hands status` to see the running instance")
    )]
    RuntimeAlreadyActive {
        dir: PathBuf,
        holder_pid: u32,
        runtime_port: u16,
    },

    #[error("lockfile {} is corrupt: {message}", .path.display())]
    #[diagnostic(
        code(hands::lock::corrupt),
        help("delete `.hands/runtime.lock` if no runtime is running")
    )]
    Corrupt { path: PathBuf, message: String },

    #[error("lockfile {} is no longer held by this runtime", .path.display())]
    #[diagnostic(code(hands::lock::lost))]
    Lost { path: PathBuf },

    #[error("lockfile {} changed hands while a stale lock was being reclaimed", .path.display())]
    #[diagnostic(
        code(hands::lock::contention),
        help("another runtime is starting for this workbook; run `hands status`")
    )]
    Contention { path: PathBuf, displaced: PathBuf },

    #[error("failed to access lockfile {}", .path.display())]
    #[diagnostic(code(hands::lock::io))]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Checks whether a pid belongs to a live process.
pub trait ProcessProbe: Send + Sync {
    fn is_alive(&self, pid: u32) -> bool;
}

/// Process probe backed by the OS process table.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemProbe;

impl ProcessProbe for SystemProbe {
    fn is_alive(&self, pid: u32) -> bool {
        let pid = Pid::from_u32(pid);
        let mut system = System::new();
        system.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
        match system.process(pid) {
            Some(process) => !matches!(process.status(), ProcessStatus::Zombie | ProcessStatus::Dead),
            None => false,
        }
    }
}

/// State of a lockfile as seen by a reader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockStatus {
    Unlocked,
    Active(RuntimeLock),
    Stale(RuntimeLock),
}

/// Read the lockfile at `path`, if any.
pub fn read_lock(path: &Path) -> Result<Option<RuntimeLock>, LockError> {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(LockError::Io {
                path: path.to_path_buf(),
                source,
            })
        }
    };
    serde_json::from_str(&text)
        .map(Some)
        .map_err(|e| LockError::Corrupt {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
}

/// Inspect the lockfile without acquiring it.
pub fn lock_status(path: &Path, probe: &dyn ProcessProbe) -> Result<LockStatus, LockError> {
    Ok(match read_lock(path)? {
        None => LockStatus::Unlocked,
        Some(lock) if probe.is_alive(lock.pid) => LockStatus::Active(lock),
        Some(lock) => LockStatus::Stale(lock),
    })
}

/// A held lock. Dropping it releases the lock.
#[derive(Debug)]
pub struct LockGuard {
    path: PathBuf,
    lock: RuntimeLock,
    released: bool,
}

/// Acquire the lock for `dir`, reclaiming it if the recorded holder is dead.
pub fn acquire_lock(
    ports: Ports,
    workbook_id: &str,
    dir: &Path,
    lock_path: &Path,
    probe: &dyn ProcessProbe,
) -> Result<LockGuard, LockError> {
    let io = |source| LockError::Io {
        path: lock_path.to_path_buf(),
        source,
    };

    let lock = RuntimeLock {
        workbook_id: workbook_id.to_string(),
        workbook_dir: dir.to_path_buf(),
        pid: std::process::id(),
        runtime_port: ports.runtime,
        postgres_port: ports.database,
        worker_port: ports.worker,
        started_at: Utc::now(),
    };
    let contents = serde_json::to_string_pretty(&lock).map_err(|e| LockError::Corrupt {
        path: lock_path.to_path_buf(),
        message: e.to_string(),
    })?;

    let parent = lock_path.parent().unwrap_or(Path::new("."));
    ensure_dir(parent).map_err(|e| io(std::io::Error::other(format!("{:#}", e))))?;

    // One reclaim per acquisition; a second conflict means another runtime won.
    for _ in 0..2 {
        if publish(lock_path, parent, &contents).map_err(io)? {
            tracing::debug!("acquired {}", lock_path.display());
            return Ok(LockGuard {
                path: lock_path.to_path_buf(),
                lock,
                released: false,
            });
        }

        let existing = match read_lock(lock_path)? {
            Some(existing) => existing,
            // Released between our attempt and the read.
            None => continue,
        };

        if probe.is_alive(existing.pid) {
            return Err(LockError::RuntimeAlreadyActive {
                dir: dir.to_path_buf(),
                holder_pid: existing.pid,
                runtime_port: existing.runtime_port,
            });
        }

        tracing::info!(
            "reclaiming stale lock from pid {} (started {})",
            existing.pid,
            existing.started_at
        );
        remove_if_holder(lock_path, &existing)?;
    }

    match read_lock(lock_path)? {
        Some(existing) => Err(LockError::RuntimeAlreadyActive {
            dir: dir.to_path_buf(),
            holder_pid: existing.pid,
            runtime_port: existing.runtime_port,
        }),
        None => Err(LockError::Lost {
            path: lock_path.to_path_buf(),
        }),
    }
}

/// Atomically create `lock_path` with `contents`. Returns `false` if it exists.
fn publish(lock_path: &Path, dir: &Path, contents: &str) -> std::io::Result<bool> {
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(contents.as_bytes())?;
    tmp.as_file().sync_all()?;

    match fs::hard_link(tmp.path(), lock_path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(false),
        Err(e) => {
            // Filesystems without hard links: fall back to exclusive create.
            tracing::debug!("hard link unavailable ({}), using exclusive create", e);
            match fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(lock_path)
            {
                Ok(mut file) => {
                    file.write_all(contents.as_bytes())?;
                    file.sync_all()?;
                    Ok(true)
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(false),
                Err(e) => Err(e),
            }
        }
    }
}

/// Remove the lockfile only if it still records `holder`.
///
/// The file is first moved aside, so two runtimes reclaiming the same
/// stale lock cannot delete each other's fresh lock. If what was moved
/// turns out to be someone else's lock, it is put back.
fn remove_if_holder(lock_path: &Path, holder: &RuntimeLock) -> Result<(), LockError> {
    let aside = lock_path.with_extension(format!("lock.{}", std::process::id()));
    match fs::rename(lock_path, &aside) {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
        Err(source) => {
            return Err(LockError::Io {
                path: lock_path.to_path_buf(),
                source,
            })
        }
    }

    match read_lock(&aside).ok().flatten() {
        // Not the stale lock we inspected.
        Some(moved) if !moved.same_holder(holder) => put_back(&aside, lock_path),
        _ => {
            if let Err(e) = fs::remove_file(&aside) {
                tracing::debug!("failed to remove {}: {}", aside.display(), e);
            }
            Ok(())
        }
    }
}

/// Restore a lock that was moved aside by mistake.
///
/// If yet another lock was published in the meantime, the moved lock is
/// left at `aside` and [`LockError::Contention`] is returned.
fn put_back(aside: &Path, lock_path: &Path) -> Result<(), LockError> {
    match fs::hard_link(aside, lock_path) {
        Ok(()) => {
            if let Err(e) = fs::remove_file(aside) {
                tracing::debug!("failed to remove {}: {}", aside.display(), e);
            }
            Ok(())
        }
        Err(e) if e.kind() == ErrorKind::AlreadyExists => {
            tracing::warn!(
                "lock {} was replaced while reclaiming; displaced lock kept at {}",
                lock_path.display(),
                aside.display()
            );
            Err(LockError::Contention {
                path: lock_path.to_path_buf(),
                displaced: aside.to_path_buf(),
            })
        }
        Err(source) => Err(LockError::Io {
            path: lock_path.to_path_buf(),
            source,
        }),
    }
}

impl LockGuard {
    pub fn lock(&self) -> &RuntimeLock {
        &self.lock
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Apply `update` and rewrite the lockfile.
    pub fn update(&mut self, update: LockUpdate) -> Result<&RuntimeLock, LockError> {
        match read_lock(&self.path)? {
            Some(on_disk) if on_disk.same_holder(&self.lock) => {}
            _ => {
                return Err(LockError::Lost {
                    path: self.path.clone(),
                })
            }
        }

        if let Some(port) = update.runtime_port {
            self.lock.runtime_port = port;
        }
        if let Some(port) = update.postgres_port {
            self.lock.postgres_port = port;
        }
        if let Some(port) = update.worker_port {
            self.lock.worker_port = port;
        }

        let contents = serde_json::to_string_pretty(&self.lock).map_err(|e| LockError::Corrupt {
            path: self.path.clone(),
            message: e.to_string(),
        })?;
        write_atomic(&self.path, &contents).map_err(|e| LockError::Io {
            path: self.path.clone(),
            source: std::io::Error::other(format!("{:#}", e)),
        })?;
        Ok(&self.lock)
    }

    /// Release the lock. Safe to call more than once.
    pub fn release(&mut self) -> Result<(), LockError> {
        if self.released {
            return Ok(());
        }
        self.released = true;

        match read_lock(&self.path) {
            Ok(Some(on_disk)) if on_disk.same_holder(&self.lock) => {
                fs::remove_file(&self.path).map_err(|source| LockError::Io {
                    path: self.path.clone(),
                    source,
                })?;
                tracing::debug!("released {}", self.path.display());
                Ok(())
            }
            // Someone else's lock now, or already gone: nothing of ours to remove.
            Ok(_) => Ok(()),
            Err(e) => Err(e),
        }
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            tracing::warn!("failed to release runtime lock: {}", e);
        }
    }
}
