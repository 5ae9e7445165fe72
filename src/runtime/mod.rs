//! The runtime orchestrator.
//!
//! Supervises one workbook's database and worker, guards the workbook with
//! a lockfile, schedules data-source syncs, and reports everything through
//! typed event channels.

pub mod database;
pub mod events;
pub mod lockfile;
pub mod ports;
pub mod retry;
pub mod service;
pub mod state;
pub mod sync;
pub mod watcher;
pub mod worker;

pub use database::{DatabaseBackend, DatabaseManager, DatabaseStats};
pub use events::{EventBus, SyncProgress, SyncStatus, Topic};
pub use lockfile::{acquire_lock, lock_status, read_lock, LockError, LockGuard, LockStatus, RuntimeLock};
pub use ports::{allocate_ports, Ports};
pub use service::{ServiceState, ServiceStatus};
pub use state::{init_runtime, RuntimeServices, RuntimeState, RuntimeStatus};
pub use sync::{Connector, ConnectorRegistry, SyncManager};
pub use watcher::{watch_workbook, FileWatcher};
pub use worker::{WorkerLauncher, WorkerManager};
