//! Service status shared by the database and worker managers.
//!
//! A [`ServiceStatus`] is owned by exactly one manager and changes only
//! through the transition methods here, which keep `up`, `state` and the
//! timestamps consistent.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::task::JoinHandle;

use crate::builder::diagnostics::BuildError;
use crate::runtime::events::ServiceKind;

/// Lines of child output retained for error reports.
pub const OUTPUT_RING_LINES: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceState {
    #[default]
    Stopped,
    Starting,
    Running,
    Failed,
    Restarting,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceStatus {
    pub state: ServiceState,
    pub up: bool,
    pub port: Option<u16>,
    pub pid: Option<u32>,
    pub last_error: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub restart_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub build_errors: Option<Vec<BuildError>>,
}

impl ServiceStatus {
    pub fn is_running(&self) -> bool {
        self.state == ServiceState::Running
    }

    pub(crate) fn starting(&mut self) {
        self.state = ServiceState::Starting;
        self.up = false;
        self.last_error = None;
        self.build_errors = None;
    }

    pub(crate) fn running(&mut self, port: u16, pid: Option<u32>) {
        self.state = ServiceState::Running;
        self.up = true;
        self.port = Some(port);
        self.pid = pid;
        self.started_at = Some(Utc::now());
    }

    pub(crate) fn failed(&mut self, message: impl Into<String>, build_errors: Option<Vec<BuildError>>) {
        self.state = ServiceState::Failed;
        self.up = false;
        self.pid = None;
        self.last_error = Some(message.into());
        self.build_errors = build_errors;
    }

    pub(crate) fn restarting(&mut self) {
        self.state = ServiceState::Restarting;
        self.restart_count += 1;
    }

    pub(crate) fn stopped(&mut self) {
        self.state = ServiceState::Stopped;
        self.up = false;
        self.pid = None;
        self.started_at = None;
    }
}

/// Bounded buffer of the most recent output lines of a child process.
#[derive(Debug, Clone, Default)]
pub struct OutputRing {
    lines: Arc<Mutex<VecDeque<String>>>,
}

impl OutputRing {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, line: String) {
        let Ok(mut lines) = self.lines.lock() else {
            return;
        };
        if lines.len() == OUTPUT_RING_LINES {
            lines.pop_front();
        }
        lines.push_back(line);
    }

    /// Retained lines joined with newlines.
    pub fn contents(&self) -> String {
        match self.lines.lock() {
            Ok(lines) => lines.iter().cloned().collect::<Vec<_>>().join("\n"),
            Err(_) => String::new(),
        }
    }

    pub fn clear(&self) {
        if let Ok(mut lines) = self.lines.lock() {
            lines.clear();
        }
    }
}

/// Forward a child's output stream into tracing and `ring`, line by line.
pub fn forward_output<R>(service: ServiceKind, stream: R, ring: OutputRing) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(stream).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            match service {
                ServiceKind::Database => tracing::debug!(target: "hands::database", "{}", line),
                ServiceKind::Worker => tracing::info!(target: "hands::worker", "{}", line),
            }
            ring.push(line);
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transitions() {
        let mut status = ServiceStatus::default();
        assert_eq!(status.state, ServiceState::Stopped);

        status.starting();
        assert_eq!(status.state, ServiceState::Starting);
        assert!(!status.up);

        status.running(55200, Some(42));
        assert!(status.is_running());
        assert!(status.up);
        assert!(status.started_at.is_some());

        status.restarting();
        status.starting();
        status.failed("boom", Some(vec![BuildError::other("x")]));
        assert_eq!(status.state, ServiceState::Failed);
        assert_eq!(status.restart_count, 1);
        assert_eq!(status.last_error.as_deref(), Some("boom"));
        assert_eq!(status.pid, None);

        status.stopped();
        assert_eq!(status.state, ServiceState::Stopped);
        assert_eq!(status.restart_count, 1);
    }

    #[test]
    fn test_output_ring_is_bounded() {
        let ring = OutputRing::new();
        for i in 0..(OUTPUT_RING_LINES + 5) {
            ring.push(format!("line {}", i));
        }
        let contents = ring.contents();
        assert!(!contents.contains("line 4\n"));
        assert!(contents.starts_with("line 5\n"));
        assert!(contents.ends_with(&format!("line {}", OUTPUT_RING_LINES + 4)));
    }

    #[tokio::test]
    async fn test_forward_output() {
        let ring = OutputRing::new();
        let input: &[u8] = b"ready on 8787\nsecond line\n";
        forward_output(ServiceKind::Worker, input, ring.clone())
            .await
            .unwrap();
        assert_eq!(ring.contents(), "ready on 8787\nsecond line");
    }
}
