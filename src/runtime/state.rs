//! Runtime state.
//!
//! [`RuntimeState`] owns everything one runtime needs: the workbook, its
//! lock, the event bus, and the database, worker and sync managers. It is
//! created once by [`init_runtime`] and torn down once by
//! [`RuntimeState::stop_services`].
//!
//! # Startup Order
//!
//! 1. `init_runtime`: open the workbook, allocate ports, take the lock
//! 2. `start_postgres`: database, change listener, sync scheduler
//! 3. `start_worker`: build, then launch the worker
//!
//! `stop_services` runs these in reverse and releases the lock.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Serialize;
use tokio::task::JoinHandle;

use crate::builder::build::{BuildOptions, BuildResult, Builder};
use crate::builder::bundler::{Bundler, EsbuildBundler};
use crate::builder::diagnostics::{ErrorClassifier, EsbuildClassifier};
use crate::core::Workbook;
use crate::runtime::database::{
    connection_string, DatabaseBackend, DatabaseManager, DatabaseSettings, PostgresBackend,
    PostgresTools,
};
use crate::runtime::events::{BuildEvent, DatabaseEvent, EventBus, ManifestEvent, SyncProgress};
use crate::runtime::lockfile::{acquire_lock, LockGuard, LockUpdate, ProcessProbe, RuntimeLock, SystemProbe};
use crate::runtime::ports::{allocate_ports, Ports};
use crate::runtime::service::ServiceStatus;
use crate::runtime::sync::{ConnectorRegistry, PgSyncStore, SyncManager, SyncStore};
use crate::runtime::worker::{run_build, WorkerLauncher, WorkerManager, WorkerSettings, WranglerLauncher};
use crate::util::config::Config;
use crate::util::process::resolve_tool;

/// The pluggable pieces of a runtime.
pub struct RuntimeServices {
    pub bundler: Arc<dyn Bundler>,
    pub classifier: Arc<dyn ErrorClassifier>,
    pub database: Arc<dyn DatabaseBackend>,
    pub launcher: Arc<dyn WorkerLauncher>,
    pub connectors: Arc<ConnectorRegistry>,
    pub probe: Arc<dyn ProcessProbe>,
}

impl RuntimeServices {
    /// The real toolchain for the workbook at `dir`.
    ///
    /// A tool that cannot be found is looked up by bare name at spawn
    /// time, so the failure lands in that service's status.
    pub fn from_config(config: &Config, dir: &Path, database_dir: &Path) -> Self {
        let tool = |name: &str, configured: Option<&PathBuf>| {
            resolve_tool(name, configured.map(PathBuf::as_path), dir).unwrap_or_else(|e| {
                tracing::debug!("{:#}", e);
                PathBuf::from(name)
            })
        };

        let postgres = PostgresTools {
            postgres: tool("postgres", config.tools.postgres.as_ref()),
            initdb: tool("initdb", config.tools.initdb.as_ref()),
        };

        RuntimeServices {
            bundler: Arc::new(EsbuildBundler::new(
                tool("esbuild", config.tools.esbuild.as_ref()),
                config.timeouts.bundle(),
            )),
            classifier: Arc::new(EsbuildClassifier),
            database: Arc::new(PostgresBackend::new(
                postgres,
                database_dir,
                config.database.max_connections,
                config.timeouts.spawn(),
            )),
            launcher: Arc::new(WranglerLauncher::new(tool(
                "wrangler",
                config.tools.wrangler.as_ref(),
            ))),
            connectors: Arc::new(ConnectorRegistry::with_builtins()),
            probe: Arc::new(SystemProbe),
        }
    }
}

/// Point-in-time view of a runtime.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeStatus {
    pub workbook_id: String,
    pub workbook_dir: PathBuf,
    pub ports: Ports,
    pub database: ServiceStatus,
    pub worker: ServiceStatus,
    pub scheduling: bool,
}

pub struct RuntimeState {
    workbook: Workbook,
    config: Config,
    lock: LockGuard,
    events: EventBus,
    builder: Arc<Builder>,
    connectors: Arc<ConnectorRegistry>,
    build_options: BuildOptions,
    database: DatabaseManager,
    worker: WorkerManager,
    sync: Option<SyncManager>,
}

/// Open the workbook at `dir`, allocate ports, and take its lock.
///
/// Fails if the manifest is missing or invalid, or if another live runtime
/// holds the lock. Nothing is spawned.
pub fn init_runtime(
    dir: &Path,
    config: Config,
    services: RuntimeServices,
    build_options: BuildOptions,
) -> Result<RuntimeState> {
    let workbook = Workbook::open(dir)?;
    let ports = allocate_ports(&config.ports)?;
    let lock = acquire_lock(
        ports,
        workbook.id(),
        workbook.root(),
        &workbook.lock_path(),
        services.probe.as_ref(),
    )?;
    tracing::info!(
        "runtime for `{}` on port {} (pid {})",
        workbook.id(),
        ports.runtime,
        lock.lock().pid
    );

    let events = EventBus::new();
    let builder = Arc::new(Builder::new(services.bundler, services.classifier));

    let database = DatabaseManager::new(
        services.database,
        DatabaseSettings {
            port: ports.database,
            probe: config.database.probe_policy(),
            spawn_timeout: config.timeouts.spawn(),
            stop_timeout: config.timeouts.stop(),
        },
        events.clone(),
    );

    let worker = WorkerManager::new(
        Arc::clone(&builder),
        services.launcher,
        workbook.clone(),
        WorkerSettings {
            port: ports.worker,
            database_url: connection_string(ports.database),
            spawn_timeout: config.timeouts.spawn(),
            stop_timeout: config.timeouts.stop(),
            build: build_options,
        },
        events.clone(),
    );

    Ok(RuntimeState {
        workbook,
        config,
        lock,
        events,
        builder,
        connectors: services.connectors,
        build_options,
        database,
        worker,
        sync: None,
    })
}

impl RuntimeState {
    pub fn workbook(&self) -> &Workbook {
        &self.workbook
    }

    pub fn lock(&self) -> &RuntimeLock {
        self.lock.lock()
    }

    pub fn ports(&self) -> Ports {
        self.lock.lock().ports()
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn database(&self) -> &DatabaseManager {
        &self.database
    }

    pub fn worker(&self) -> &WorkerManager {
        &self.worker
    }

    pub fn sync(&self) -> Option<&SyncManager> {
        self.sync.as_ref()
    }

    pub fn status(&self) -> RuntimeStatus {
        RuntimeStatus {
            workbook_id: self.workbook.id().to_string(),
            workbook_dir: self.workbook.root().to_path_buf(),
            ports: self.ports(),
            database: self.database.status().clone(),
            worker: self.worker.status().clone(),
            scheduling: self.sync.as_ref().is_some_and(SyncManager::is_scheduling),
        }
    }

    /// Start the database, then the sync scheduler if the database
    /// answered its probe.
    pub async fn start_postgres(&mut self) -> &ServiceStatus {
        self.database.start().await;
        if !self.database.is_verified() {
            if self.database.status().is_running() {
                tracing::warn!("database not verified; sync scheduler not started");
            }
            return self.database.status();
        }

        let store = self
            .database
            .pool()
            .map(|pool| Arc::new(PgSyncStore::new(pool)) as Arc<dyn SyncStore>);
        let mut sync = SyncManager::new(
            Arc::clone(&self.connectors),
            store,
            self.events.sync.clone(),
            self.workbook.root(),
            Some(self.database.connection_string()),
            self.config.timeouts.sync(),
        );
        sync.set_sources(self.workbook.manifest()).await;
        if let Err(e) = sync.init().await {
            tracing::warn!("sync bookkeeping unavailable: {:#}", e);
        }
        sync.start_scheduler();
        self.sync = Some(sync);

        self.database.status()
    }

    /// Run a build without touching the worker.
    pub async fn build_workbook(&mut self) -> Result<BuildResult> {
        self.workbook.reload()?;
        run_build(
            Arc::clone(&self.builder),
            self.workbook.clone(),
            self.build_options,
            &self.events.build,
        )
        .await
    }

    /// Build and start the worker, recording a changed worker port in the lock.
    pub async fn start_worker(&mut self) -> &ServiceStatus {
        self.worker.start().await;
        self.record_worker_port();
        self.worker.status()
    }

    /// Rebuild and restart the worker.
    pub async fn restart_worker(&mut self) -> &ServiceStatus {
        self.worker.restart().await;
        self.record_worker_port();
        self.worker.status()
    }

    fn record_worker_port(&mut self) {
        let port = self.worker.port();
        if port == self.lock.lock().worker_port {
            return;
        }
        let update = LockUpdate {
            worker_port: Some(port),
            ..LockUpdate::default()
        };
        if let Err(e) = self.lock.update(update) {
            tracing::warn!("failed to record worker port: {}", e);
        }
    }

    /// Adopt a reloaded manifest: reschedule sources.
    pub async fn apply_manifest(&mut self) -> Result<()> {
        let manifest = self.workbook.reload().context("failed to reload manifest")?.clone();
        if let Some(sync) = self.sync.as_mut() {
            sync.set_sources(&manifest).await;
        }
        Ok(())
    }

    /// Stop sync, worker, and database, then release the lock.
    pub async fn stop_services(&mut self) -> Result<()> {
        if let Some(mut sync) = self.sync.take() {
            sync.stop_scheduler().await;
        }
        self.worker.stop().await;
        self.database.stop().await;
        self.lock.release()?;
        tracing::info!("runtime for `{}` stopped", self.workbook.id());
        Ok(())
    }

    pub fn on_build<F>(&self, listener: F) -> JoinHandle<()>
    where
        F: FnMut(BuildEvent) + Send + 'static,
    {
        self.events.build.listen(listener)
    }

    pub fn on_database_change<F>(&self, listener: F) -> JoinHandle<()>
    where
        F: FnMut(DatabaseEvent) + Send + 'static,
    {
        self.events.database.listen(listener)
    }

    pub fn on_sync_progress<F>(&self, listener: F) -> JoinHandle<()>
    where
        F: FnMut(SyncProgress) + Send + 'static,
    {
        self.events.sync.listen(listener)
    }

    pub fn on_manifest<F>(&self, listener: F) -> JoinHandle<()>
    where
        F: FnMut(ManifestEvent) + Send + 'static,
    {
        self.events.manifest.listen(listener)
    }
}
