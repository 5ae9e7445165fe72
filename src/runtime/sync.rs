//! Data-source sync.
//!
//! Each enabled source with a schedule gets its own scheduler task. A run
//! publishes `running` then `completed` or `failed` progress; a failing,
//! panicking or hung connector is reported and never stops the scheduler.
//! Runs are cut off after the configured timeout. Manual runs share the
//! same path.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPool;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::core::{Manifest, Schedule, SourceConfig};
use crate::runtime::events::{SyncProgress, SyncStatus, Topic};
use crate::util::process::ProcessBuilder;

/// Everything a connector gets for one run.
#[derive(Debug, Clone)]
pub struct SyncContext {
    pub source: String,
    pub workbook_root: PathBuf,
    pub options: toml::Table,
    pub database_url: Option<String>,
    pub timeout: Duration,
}

/// Pulls data for one kind of source. Returns the number of rows synced.
#[async_trait]
pub trait Connector: Send + Sync {
    fn name(&self) -> &str;

    async fn sync(&self, cx: &SyncContext) -> Result<u64>;
}

/// Does nothing. Useful for wiring up schedules before a connector exists.
#[derive(Debug, Default)]
pub struct NoopConnector;

#[async_trait]
impl Connector for NoopConnector {
    fn name(&self) -> &str {
        "noop"
    }

    async fn sync(&self, _cx: &SyncContext) -> Result<u64> {
        Ok(0)
    }
}

/// Runs `options.command` through the shell in the workbook directory and
/// counts non-empty stdout lines as rows.
#[derive(Debug, Default)]
pub struct CommandConnector;

#[async_trait]
impl Connector for CommandConnector {
    fn name(&self) -> &str {
        "command"
    }

    async fn sync(&self, cx: &SyncContext) -> Result<u64> {
        let Some(command) = cx.options.get("command").and_then(|v| v.as_str()) else {
            bail!("source `{}` needs `options.command`", cx.source);
        };

        let mut cmd = ProcessBuilder::new("sh")
            .arg("-c")
            .arg(command)
            .cwd(&cx.workbook_root)
            .env("HANDS_SOURCE", &cx.source);
        if let Some(url) = &cx.database_url {
            cmd = cmd.env("DATABASE_URL", url);
        }

        let timeout = cx.timeout;
        let output = tokio::task::spawn_blocking(move || cmd.exec_and_check(timeout))
            .await
            .context("sync command task panicked")??;
        Ok(output.stdout.lines().filter(|l| !l.trim().is_empty()).count() as u64)
    }
}

/// Connectors by name.
#[derive(Default)]
pub struct ConnectorRegistry {
    connectors: BTreeMap<String, Arc<dyn Connector>>,
}

impl ConnectorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the `noop` and `command` connectors.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(NoopConnector));
        registry.register(Arc::new(CommandConnector));
        registry
    }

    pub fn register(&mut self, connector: Arc<dyn Connector>) {
        self.connectors.insert(connector.name().to_string(), connector);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Connector>> {
        self.connectors.get(name).cloned()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.connectors.keys().map(String::as_str)
    }
}

/// Bookkeeping for sync runs.
#[async_trait]
pub trait SyncStore: Send + Sync {
    /// Create bookkeeping tables if absent.
    async fn init(&self) -> Result<()>;

    /// Record a finished run.
    async fn record(&self, progress: &SyncProgress) -> Result<()>;
}

/// Stores runs in the workbook database.
pub struct PgSyncStore {
    pool: PgPool,
}

impl PgSyncStore {
    pub fn new(pool: PgPool) -> Self {
        PgSyncStore { pool }
    }
}

#[async_trait]
impl SyncStore for PgSyncStore {
    async fn init(&self) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS hands_sync_runs (
                id BIGSERIAL PRIMARY KEY,
                source TEXT NOT NULL,
                status TEXT NOT NULL,
                rows BIGINT NOT NULL DEFAULT 0,
                message TEXT,
                finished_at TIMESTAMPTZ NOT NULL DEFAULT now()
            )",
        )
        .execute(&self.pool)
        .await
        .context("failed to create sync bookkeeping table")?;
        Ok(())
    }

    async fn record(&self, progress: &SyncProgress) -> Result<()> {
        let (status, message) = match &progress.status {
            SyncStatus::Running => return Ok(()),
            SyncStatus::Completed => ("completed", None),
            SyncStatus::Failed { message } => ("failed", Some(message.as_str())),
        };
        sqlx::query("INSERT INTO hands_sync_runs (source, status, rows, message) VALUES ($1, $2, $3, $4)")
            .bind(&progress.source)
            .bind(status)
            .bind(progress.rows as i64)
            .bind(message)
            .execute(&self.pool)
            .await
            .context("failed to record sync run")?;
        Ok(())
    }
}

/// Shared by manual runs and scheduler tasks.
struct Runner {
    registry: Arc<ConnectorRegistry>,
    store: Option<Arc<dyn SyncStore>>,
    events: Topic<SyncProgress>,
    workbook_root: PathBuf,
    database_url: Option<String>,
    timeout: Duration,
}

impl Runner {
    fn publish(&self, source: &str, rows: u64, status: SyncStatus) -> SyncProgress {
        let progress = SyncProgress {
            source: source.to_string(),
            rows,
            status,
            at: Utc::now(),
        };
        self.events.publish(progress.clone());
        progress
    }

    async fn run(&self, name: &str, config: &SourceConfig) -> SyncProgress {
        self.publish(name, 0, SyncStatus::Running);
        tracing::info!("syncing source `{}`", name);

        let connector_name = config.connector_name(name);
        let outcome = match self.registry.get(connector_name) {
            Some(connector) => {
                let cx = SyncContext {
                    source: name.to_string(),
                    workbook_root: self.workbook_root.clone(),
                    options: config.options.clone(),
                    database_url: self.database_url.clone(),
                    timeout: self.timeout,
                };
                // A panicking connector ends only its own task.
                let mut task = tokio::spawn(async move { connector.sync(&cx).await });
                match tokio::time::timeout(self.timeout, &mut task).await {
                    Ok(Ok(result)) => result.map_err(|e| format!("{:#}", e)),
                    Ok(Err(e)) if e.is_panic() => Err("connector panicked".to_string()),
                    Ok(Err(e)) => Err(e.to_string()),
                    Err(_) => {
                        task.abort();
                        Err(format!("timed out after {}s", self.timeout.as_secs()))
                    }
                }
            }
            None => Err(format!("unknown connector `{}`", connector_name)),
        };

        let progress = match outcome {
            Ok(rows) => {
                tracing::info!("synced {} rows for `{}`", rows, name);
                self.publish(name, rows, SyncStatus::Completed)
            }
            Err(message) => {
                tracing::warn!("sync of `{}` failed: {}", name, message);
                self.publish(name, 0, SyncStatus::Failed { message })
            }
        };

        if let Some(store) = &self.store {
            if let Err(e) = store.record(&progress).await {
                tracing::warn!("{:#}", e);
            }
        }
        progress
    }
}

struct Scheduler {
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

pub struct SyncManager {
    runner: Arc<Runner>,
    sources: BTreeMap<String, SourceConfig>,
    scheduler: Option<Scheduler>,
}

impl SyncManager {
    pub fn new(
        registry: Arc<ConnectorRegistry>,
        store: Option<Arc<dyn SyncStore>>,
        events: Topic<SyncProgress>,
        workbook_root: &Path,
        database_url: Option<String>,
        timeout: Duration,
    ) -> Self {
        SyncManager {
            runner: Arc::new(Runner {
                registry,
                store,
                events,
                workbook_root: workbook_root.to_path_buf(),
                database_url,
                timeout,
            }),
            sources: BTreeMap::new(),
            scheduler: None,
        }
    }

    /// Create bookkeeping tables if absent.
    pub async fn init(&self) -> Result<()> {
        match &self.runner.store {
            Some(store) => store.init().await,
            None => Ok(()),
        }
    }

    /// Replace the configured sources. A running scheduler is restarted
    /// with the new set.
    pub async fn set_sources(&mut self, manifest: &Manifest) {
        self.sources = manifest.sources.clone();
        if self.is_scheduling() {
            self.stop_scheduler().await;
            self.start_scheduler();
        }
    }

    pub fn is_scheduling(&self) -> bool {
        self.scheduler.is_some()
    }

    /// Spawn one task per enabled, scheduled source.
    pub fn start_scheduler(&mut self) {
        if self.scheduler.is_some() {
            return;
        }

        let (shutdown, _) = watch::channel(false);
        let mut tasks = Vec::new();
        for (name, config) in &self.sources {
            if !config.enabled {
                continue;
            }
            let Some(expr) = config.schedule.as_deref() else {
                continue;
            };
            let schedule = match Schedule::parse(expr) {
                Ok(schedule) => schedule,
                Err(e) => {
                    tracing::warn!("not scheduling `{}`: {}", name, e);
                    continue;
                }
            };
            tracing::debug!("scheduling `{}` at `{}`", name, schedule);
            tasks.push(tokio::spawn(schedule_loop(
                Arc::clone(&self.runner),
                name.clone(),
                config.clone(),
                schedule,
                shutdown.subscribe(),
            )));
        }

        tracing::info!("sync scheduler started with {} sources", tasks.len());
        self.scheduler = Some(Scheduler { shutdown, tasks });
    }

    /// Stop scheduling. A run in progress finishes first.
    pub async fn stop_scheduler(&mut self) {
        let Some(scheduler) = self.scheduler.take() else {
            return;
        };
        let _ = scheduler.shutdown.send(true);
        for task in scheduler.tasks {
            if let Err(e) = task.await {
                tracing::warn!("sync scheduler task ended abnormally: {}", e);
            }
        }
        tracing::debug!("sync scheduler stopped");
    }

    /// Register a progress listener.
    pub fn on_progress<F>(&self, listener: F) -> JoinHandle<()>
    where
        F: FnMut(SyncProgress) + Send + 'static,
    {
        self.runner.events.listen(listener)
    }

    /// Run one source now, whether or not it has a schedule.
    ///
    /// Returns `Err` for unknown or disabled sources; connector failures are
    /// reported in the returned progress.
    pub async fn run_source(&self, name: &str) -> Result<SyncProgress> {
        let config = self
            .sources
            .get(name)
            .with_context(|| format!("no source named `{}` in the manifest", name))?;
        if !config.enabled {
            bail!("source `{}` is disabled", name);
        }
        Ok(self.runner.run(name, config).await)
    }
}

/// Fire times come from the wall clock but are waited on with tokio's
/// clock, anchored once at start.
async fn schedule_loop(
    runner: Arc<Runner>,
    name: String,
    config: SourceConfig,
    schedule: Schedule,
    mut shutdown: watch::Receiver<bool>,
) {
    let anchor_wall = Utc::now();
    let anchor = tokio::time::Instant::now();
    let mut after: DateTime<Utc> = anchor_wall;

    loop {
        let Some(next) = schedule.next_after(after) else {
            tracing::warn!("schedule for `{}` never fires again", name);
            return;
        };
        let offset = (next - anchor_wall).to_std().unwrap_or_default();

        tokio::select! {
            _ = tokio::time::sleep_until(anchor + offset) => {}
            _ = shutdown.changed() => return,
        }

        runner.run(&name, &config).await;
        after = next;
    }
}
