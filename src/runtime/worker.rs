//! Worker manager.
//!
//! Every start builds the workbook first and launches the worker only if
//! the build has no errors, so a running worker always serves the bundle
//! of the manifest it was started with. Launch failures are classified
//! into [`BuildError`]s the same way bundler output is.

use std::collections::BTreeMap;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use tokio::net::TcpStream;
use tokio::process::Child;

use crate::builder::build::{BuildOptions, BuildResult, Builder};
use crate::builder::diagnostics::BuildError;
use crate::core::Workbook;
use crate::runtime::database::terminate;
use crate::runtime::events::{BuildEvent, EventBus, ServiceEvent, ServiceKind, Topic};
use crate::runtime::ports::{find_free_port, is_port_free, WORKER_PORTS};
use crate::runtime::service::{forward_output, OutputRing, ServiceStatus};
use crate::util::process::ProcessBuilder;

/// Interval between readiness checks on a launching worker.
const READY_POLL: Duration = Duration::from_millis(200);

/// What a launcher needs to start one worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    pub config_path: PathBuf,
    pub cwd: PathBuf,
    pub port: u16,
    /// Bindings injected into the worker at spawn time
    pub env: BTreeMap<String, String>,
}

/// Starts worker processes.
#[async_trait]
pub trait WorkerLauncher: Send + Sync {
    fn name(&self) -> &str;

    async fn launch(&self, spec: &LaunchSpec) -> Result<Box<dyn WorkerProcess>>;
}

/// A launched worker.
#[async_trait]
pub trait WorkerProcess: Send {
    fn pid(&self) -> Option<u32>;

    /// Wait until the worker accepts connections.
    async fn wait_ready(&mut self, timeout: Duration) -> Result<()>;

    /// Recent output, for error reports.
    fn output(&self) -> String;

    async fn stop(&mut self, grace: Duration) -> Result<()>;
}

/// Launches `wrangler dev` in local mode.
#[derive(Debug, Clone)]
pub struct WranglerLauncher {
    program: PathBuf,
}

impl WranglerLauncher {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        WranglerLauncher {
            program: program.into(),
        }
    }

    pub fn command(&self, spec: &LaunchSpec) -> ProcessBuilder {
        let mut cmd = ProcessBuilder::new(&self.program)
            .arg("dev")
            .arg("--config")
            .arg(&spec.config_path)
            .arg("--port")
            .arg(spec.port.to_string())
            .args(["--ip", "127.0.0.1", "--local"])
            .cwd(&spec.cwd);
        for (key, value) in &spec.env {
            cmd = cmd.arg("--var").arg(format!("{}:{}", key, value));
        }
        cmd
    }
}

#[async_trait]
impl WorkerLauncher for WranglerLauncher {
    fn name(&self) -> &str {
        "wrangler"
    }

    async fn launch(&self, spec: &LaunchSpec) -> Result<Box<dyn WorkerProcess>> {
        let cmd = self.command(spec);
        tracing::debug!("running {}", cmd.display_command());
        let mut child = cmd
            .to_tokio_command()
            .spawn()
            .with_context(|| format!("failed to spawn `{}`", self.program.display()))?;

        let output = OutputRing::new();
        if let Some(stdout) = child.stdout.take() {
            forward_output(ServiceKind::Worker, stdout, output.clone());
        }
        if let Some(stderr) = child.stderr.take() {
            forward_output(ServiceKind::Worker, stderr, output.clone());
        }

        Ok(Box::new(WranglerProcess {
            child,
            output,
            port: spec.port,
        }))
    }
}

struct WranglerProcess {
    child: Child,
    output: OutputRing,
    port: u16,
}

#[async_trait]
impl WorkerProcess for WranglerProcess {
    fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    async fn wait_ready(&mut self, timeout: Duration) -> Result<()> {
        let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, self.port));
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Some(status) = self.child.try_wait().context("failed to poll worker")? {
                bail!("worker exited with {}", status);
            }
            if TcpStream::connect(addr).await.is_ok() {
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                bail!(
                    "worker did not accept connections on port {} within {}s",
                    self.port,
                    timeout.as_secs()
                );
            }
            tokio::time::sleep(READY_POLL).await;
        }
    }

    fn output(&self) -> String {
        self.output.contents()
    }

    async fn stop(&mut self, grace: Duration) -> Result<()> {
        terminate(&mut self.child, grace).await
    }
}

/// Build `workbook` off the async threads, publishing build events.
pub(crate) async fn run_build(
    builder: Arc<Builder>,
    workbook: Workbook,
    options: BuildOptions,
    events: &Topic<BuildEvent>,
) -> Result<BuildResult> {
    let workbook_id = workbook.id().to_string();
    events.publish(BuildEvent::Started {
        workbook_id: workbook_id.clone(),
    });

    let built = tokio::task::spawn_blocking(move || builder.build_workbook(&workbook, &options))
        .await
        .context("build task panicked")?;

    match &built {
        Ok(result) if result.success => {
            events.publish(BuildEvent::Completed {
                workbook_id,
                fingerprint: result.fingerprint.clone(),
                pages: result.pages.len(),
                blocks: result.blocks.len(),
                duration_ms: result.duration.as_millis() as u64,
            });
        }
        Ok(result) => {
            events.publish(BuildEvent::Failed {
                workbook_id,
                errors: result.errors.clone(),
            });
        }
        Err(e) => {
            events.publish(BuildEvent::Failed {
                workbook_id,
                errors: vec![BuildError::other(format!("{:#}", e))],
            });
        }
    }
    built
}

/// Settings for [`WorkerManager`].
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    /// Preferred port; another port in the worker band is used if busy
    pub port: u16,
    pub database_url: String,
    pub spawn_timeout: Duration,
    pub stop_timeout: Duration,
    pub build: BuildOptions,
}

pub struct WorkerManager {
    builder: Arc<Builder>,
    launcher: Arc<dyn WorkerLauncher>,
    workbook: Workbook,
    settings: WorkerSettings,
    events: EventBus,
    status: ServiceStatus,
    process: Option<Box<dyn WorkerProcess>>,
    last_build: Option<BuildResult>,
}

impl WorkerManager {
    pub fn new(
        builder: Arc<Builder>,
        launcher: Arc<dyn WorkerLauncher>,
        workbook: Workbook,
        settings: WorkerSettings,
        events: EventBus,
    ) -> Self {
        WorkerManager {
            builder,
            launcher,
            workbook,
            settings,
            events,
            status: ServiceStatus::default(),
            process: None,
            last_build: None,
        }
    }

    pub fn status(&self) -> &ServiceStatus {
        &self.status
    }

    /// Port the worker binds, or will bind on next start.
    pub fn port(&self) -> u16 {
        self.settings.port
    }

    pub fn workbook(&self) -> &Workbook {
        &self.workbook
    }

    /// Result of the most recent build attempt.
    pub fn last_build(&self) -> Option<&BuildResult> {
        self.last_build.as_ref()
    }

    /// Build the workbook, then launch the worker if the build succeeded.
    ///
    /// Failures are recorded in [`status`](Self::status) rather than returned.
    pub async fn start(&mut self) -> &ServiceStatus {
        if self.status.is_running() {
            return &self.status;
        }

        self.status.starting();
        self.events.service.publish(ServiceEvent::Starting {
            service: ServiceKind::Worker,
        });

        let result = match self.build().await {
            Ok(result) => result,
            Err(e) => {
                let message = format!("{:#}", e);
                return self.fail(message.clone(), vec![BuildError::other(message)]);
            }
        };
        if !result.success {
            let errors = result.errors.clone();
            self.last_build = Some(result);
            return self.fail(format!("build failed with {} errors", errors.len()), errors);
        }
        let spec = match self.launch_spec(&result) {
            Ok(spec) => spec,
            Err(e) => {
                let message = format!("{:#}", e);
                self.last_build = Some(result);
                return self.fail(message.clone(), vec![BuildError::other(message)]);
            }
        };
        self.last_build = Some(result);

        tracing::info!("starting worker on port {}", spec.port);
        let mut process = match self.launcher.launch(&spec).await {
            Ok(process) => process,
            Err(e) => return self.fail_launch(format!("{:#}", e), String::new()),
        };

        if let Err(e) = process.wait_ready(self.settings.spawn_timeout).await {
            let output = process.output();
            if let Err(stop_err) = process.stop(self.settings.stop_timeout).await {
                tracing::debug!("cleanup after failed launch: {:#}", stop_err);
            }
            return self.fail_launch(format!("{:#}", e), output);
        }

        self.status.running(spec.port, process.pid());
        self.process = Some(process);
        self.events.service.publish(ServiceEvent::Ready {
            service: ServiceKind::Worker,
            port: spec.port,
        });
        tracing::info!("worker ready at http://127.0.0.1:{}", spec.port);
        &self.status
    }

    /// Stop the worker. Idempotent.
    pub async fn stop(&mut self) {
        self.shutdown_process().await;
        self.status.stopped();
        self.events.service.publish(ServiceEvent::Stopped {
            service: ServiceKind::Worker,
        });
    }

    /// Stop, then start again with a fresh build.
    pub async fn restart(&mut self) -> &ServiceStatus {
        tracing::info!("restarting worker");
        self.status.restarting();
        self.shutdown_process().await;
        self.events.service.publish(ServiceEvent::Stopped {
            service: ServiceKind::Worker,
        });
        self.start().await
    }

    /// Stop, point at the workbook in `dir`, and start.
    ///
    /// Returns `Err` only when `dir` holds no valid manifest; the worker is
    /// left stopped in that case.
    pub async fn switch_workbook(&mut self, dir: &Path) -> Result<&ServiceStatus> {
        self.stop().await;
        let workbook = Workbook::open(dir)?;
        tracing::info!("switching to workbook `{}`", workbook.id());
        self.workbook = workbook;
        self.last_build = None;
        Ok(self.start().await)
    }

    async fn build(&mut self) -> Result<BuildResult> {
        self.workbook.reload()?;
        run_build(
            Arc::clone(&self.builder),
            self.workbook.clone(),
            self.settings.build,
            &self.events.build,
        )
        .await
    }

    fn launch_spec(&mut self, result: &BuildResult) -> Result<LaunchSpec> {
        if !is_port_free(self.settings.port) {
            let port = find_free_port(WORKER_PORTS).context("no free worker port")?;
            tracing::warn!("worker port {} is busy, using {}", self.settings.port, port);
            self.settings.port = port;
        }

        let mut env = BTreeMap::new();
        env.insert("DATABASE_URL".to_string(), self.settings.database_url.clone());
        env.insert("ENVIRONMENT".to_string(), "development".to_string());

        Ok(LaunchSpec {
            config_path: result.config_path(),
            cwd: result.out_dir.clone(),
            port: self.settings.port,
            env,
        })
    }

    fn fail(&mut self, message: String, errors: Vec<BuildError>) -> &ServiceStatus {
        tracing::error!("worker failed to start: {}", message);
        self.events.service.publish(ServiceEvent::Error {
            service: ServiceKind::Worker,
            message: message.clone(),
        });
        self.status.failed(message, Some(errors));
        &self.status
    }

    fn fail_launch(&mut self, message: String, output: String) -> &ServiceStatus {
        let combined = if output.is_empty() {
            message.clone()
        } else {
            format!("{}\n{}", output, message)
        };
        let errors = self.builder.classifier().classify_failure(&combined);
        self.fail(message, errors)
    }

    async fn shutdown_process(&mut self) {
        if let Some(mut process) = self.process.take() {
            if let Err(e) = process.stop(self.settings.stop_timeout).await {
                tracing::warn!("failed to stop worker: {:#}", e);
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::Mutex;

    /// Launcher that records specs and hands out scripted processes.
    #[derive(Default)]
    pub struct FakeLauncher {
        launches: Mutex<Vec<LaunchSpec>>,
        failure: Mutex<Option<String>>,
    }

    impl FakeLauncher {
        pub fn new() -> Self {
            Self::default()
        }

        /// Make launched workers exit before becoming ready with `output`.
        pub fn fail_with(&self, output: &str) {
            *self.failure.lock().unwrap() = Some(output.to_string());
        }

        pub fn launches(&self) -> Vec<LaunchSpec> {
            self.launches.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl WorkerLauncher for FakeLauncher {
        fn name(&self) -> &str {
            "fake"
        }

        async fn launch(&self, spec: &LaunchSpec) -> Result<Box<dyn WorkerProcess>> {
            self.launches.lock().unwrap().push(spec.clone());
            Ok(Box::new(FakeProcess {
                failure: self.failure.lock().unwrap().clone(),
            }))
        }
    }

    struct FakeProcess {
        failure: Option<String>,
    }

    #[async_trait]
    impl WorkerProcess for FakeProcess {
        fn pid(&self) -> Option<u32> {
            Some(7)
        }

        async fn wait_ready(&mut self, _timeout: Duration) -> Result<()> {
            match &self.failure {
                Some(_) => bail!("worker exited with exit status: 1"),
                None => Ok(()),
            }
        }

        fn output(&self) -> String {
            self.failure.clone().unwrap_or_default()
        }

        async fn stop(&mut self, _grace: Duration) -> Result<()> {
            Ok(())
        }
    }
}
