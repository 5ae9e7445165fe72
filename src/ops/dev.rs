//! Implementation of `hands dev`.
//!
//! Starts a full runtime for the workbook, rebuilds and restarts the
//! worker when sources change, and tears everything down on Ctrl-C.

use std::future::Future;
use std::path::Path;

use anyhow::Result;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::broadcast::Receiver;

use crate::builder::build::BuildOptions;
use crate::core::Workbook;
use crate::runtime::events::{DatabaseEvent, FileEvent, ManifestEvent};
use crate::runtime::service::{ServiceState, ServiceStatus};
use crate::runtime::state::{init_runtime, RuntimeServices, RuntimeState, RuntimeStatus};
use crate::runtime::watcher::watch_workbook;
use crate::util::config::Config;
use crate::util::diagnostic::suggestions;
use crate::util::shell::{Shell, Status};

#[derive(Debug, Clone, Copy)]
pub struct DevOptions {
    pub build: BuildOptions,

    /// Rebuild on file changes
    pub watch: bool,
}

impl Default for DevOptions {
    fn default() -> Self {
        DevOptions {
            build: BuildOptions {
                dev: true,
                verbose: false,
            },
            watch: true,
        }
    }
}

/// Run the workbook at `dir` until interrupted.
pub async fn dev(config: Config, dir: &Path, options: DevOptions, shell: &Shell) -> Result<RuntimeStatus> {
    let workbook = Workbook::open(dir)?;
    let services = RuntimeServices::from_config(&config, workbook.root(), &workbook.database_dir());
    let mut state = init_runtime(workbook.root(), config, services, options.build)?;
    let ports = state.ports();

    let changes = state.on_database_change(|event| {
        if let DatabaseEvent::Changed { channel, payload } = event {
            tracing::debug!("{}: {}", channel, payload);
        }
    });

    let spinner = shell.spinner(Status::Starting, format!("database on port {}", ports.database));
    let database = state.start_postgres().await.clone();
    drop(spinner);
    report(shell, "database", &database);

    shell.status(Status::Building, state.workbook().id());
    report(shell, "worker", state.start_worker().await);

    let _watcher = if options.watch {
        Some(watch_workbook(state.workbook(), state.events().clone())?)
    } else {
        None
    };
    let mut files = state.events().files.subscribe();
    let mut manifests = state.events().manifest.subscribe();
    shell.status(Status::Watching, "press Ctrl-C to stop");

    let interrupted = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!("failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };
    run_until(&mut state, shell, &mut files, &mut manifests, interrupted).await;

    shell.status(Status::Stopping, state.workbook().id());
    changes.abort();
    state.stop_services().await?;
    shell.status(Status::Stopped, "runtime");
    Ok(state.status())
}

/// React to file and manifest changes until `shutdown` resolves or both
/// feeds close. `shutdown` is polled across iterations, so a signal that
/// lands mid-restart is not lost.
async fn run_until(
    state: &mut RuntimeState,
    shell: &Shell,
    files: &mut Receiver<FileEvent>,
    manifests: &mut Receiver<ManifestEvent>,
    shutdown: impl Future<Output = ()>,
) {
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            _ = &mut shutdown => return,
            event = files.recv() => match event {
                Ok(FileEvent::Changed { paths }) => {
                    shell.status(Status::Building, format!("{} changed files", paths.len()));
                    report(shell, "worker", state.restart_worker().await);
                }
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => return,
            },
            event = manifests.recv() => match event {
                Ok(_) => {
                    if let Err(e) = state.apply_manifest().await {
                        shell.warn(format!("{:#}", e));
                    }
                }
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => return,
            },
        }
    }
}

fn report(shell: &Shell, name: &str, status: &ServiceStatus) {
    match status.state {
        ServiceState::Running => {
            let port = status.port.unwrap_or_default();
            if name == "worker" {
                shell.status(Status::Ready, format!("{} at http://127.0.0.1:{}", name, port));
            } else {
                shell.status(Status::Ready, format!("{} on port {}", name, port));
            }
            if let Some(warning) = &status.last_error {
                shell.warn(format!("{}: {}", name, warning));
            }
        }
        ServiceState::Failed => {
            shell.error(format!(
                "{} failed: {}",
                name,
                status.last_error.as_deref().unwrap_or("unknown error")
            ));
            for error in status.build_errors.iter().flatten() {
                shell.note(error.summary());
            }
            if status.build_errors.is_some() {
                shell.note(suggestions::BUILD_FAILED);
            }
        }
        other => tracing::debug!("{} is {:?}", name, other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::sync::Arc;
    use std::time::Duration;

    use tempfile::TempDir;

    use crate::builder::bundler::testing::FakeBundler;
    use crate::builder::diagnostics::EsbuildClassifier;
    use crate::runtime::database::testing::FakeBackend;
    use crate::runtime::events::ServiceEvent;
    use crate::runtime::lockfile::SystemProbe;
    use crate::runtime::sync::ConnectorRegistry;
    use crate::runtime::worker::testing::FakeLauncher;

    #[tokio::test]
    async fn test_shutdown_during_restart_ends_loop() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("hands.toml"), "name = \"ledger\"\n").unwrap();
        fs::create_dir_all(dir.path().join("pages")).unwrap();
        fs::write(dir.path().join("pages/index.md"), "# Ledger\n").unwrap();

        let launcher = Arc::new(FakeLauncher::new());
        let services = RuntimeServices {
            bundler: Arc::new(FakeBundler::succeeding()),
            classifier: Arc::new(EsbuildClassifier),
            database: Arc::new(FakeBackend::new(0)),
            launcher: launcher.clone(),
            connectors: Arc::new(ConnectorRegistry::with_builtins()),
            probe: Arc::new(SystemProbe),
        };
        let mut state = init_runtime(dir.path(), Config::default(), services, BuildOptions::default()).unwrap();
        state.start_worker().await;

        let (files_tx, mut files) = tokio::sync::broadcast::channel(16);
        let (_manifests_tx, mut manifests) = tokio::sync::broadcast::channel(16);
        let mut service_events = state.events().service.subscribe();
        // Fires on the Ready event published while the restart is in flight.
        let shutdown = async move {
            while let Ok(event) = service_events.recv().await {
                if matches!(event, ServiceEvent::Ready { .. }) {
                    return;
                }
            }
        };

        files_tx
            .send(FileEvent::Changed {
                paths: vec![dir.path().join("pages/index.md")],
            })
            .unwrap();
        let shell = Shell::json();
        tokio::time::timeout(
            Duration::from_secs(10),
            run_until(&mut state, &shell, &mut files, &mut manifests, shutdown),
        )
        .await
        .expect("loop should stop once shutdown resolves");

        assert_eq!(launcher.launches().len(), 2);
        assert_eq!(state.status().worker.restart_count, 1);
        state.stop_services().await.unwrap();
    }
}
