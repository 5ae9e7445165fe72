//! Implementation of `hands sync`.
//!
//! Runs one data source against the database of the workbook's running
//! runtime, recording the run like a scheduled one.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use sqlx::postgres::PgPoolOptions;

use crate::core::Workbook;
use crate::runtime::database::connection_string;
use crate::runtime::events::{SyncProgress, Topic};
use crate::runtime::lockfile::{lock_status, LockStatus, SystemProbe};
use crate::runtime::sync::{ConnectorRegistry, PgSyncStore, SyncManager};
use crate::util::config::Config;

/// Run `source` once for the workbook at `dir`.
pub async fn sync_source(config: &Config, dir: &Path, source: &str) -> Result<SyncProgress> {
    let workbook = Workbook::open(dir)?;
    let lock = match lock_status(&workbook.lock_path(), &SystemProbe)? {
        LockStatus::Active(lock) => lock,
        _ => bail!(
            "no runtime is running for {}; start one with `hands dev`",
            workbook.root().display()
        ),
    };

    let url = connection_string(lock.postgres_port);
    let pool = PgPoolOptions::new()
        .max_connections(1)
        .acquire_timeout(Duration::from_secs(5))
        .connect(&url)
        .await
        .with_context(|| format!("failed to connect to the runtime database on port {}", lock.postgres_port))?;

    let mut manager = SyncManager::new(
        Arc::new(ConnectorRegistry::with_builtins()),
        Some(Arc::new(PgSyncStore::new(pool.clone()))),
        Topic::new("sync", 16),
        workbook.root(),
        Some(url),
        config.timeouts.sync(),
    );
    manager.set_sources(workbook.manifest()).await;
    manager.init().await?;

    let progress = manager.run_source(source).await;
    pool.close().await;
    progress
}
