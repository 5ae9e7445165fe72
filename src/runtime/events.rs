//! Typed in-process event channels.
//!
//! Each event kind has its own [`Topic`], a broadcast channel with any
//! number of subscribers. Publishing never blocks and never fails: an
//! event with no subscribers is dropped, and a subscriber that falls
//! behind skips ahead rather than stalling the publisher.
//!
//! # Event Kinds
//!
//! - [`ServiceEvent`]: database and worker lifecycle
//! - [`BuildEvent`]: build started/completed/failed
//! - [`DatabaseEvent`]: connection state and change notifications
//! - [`ManifestEvent`]: the manifest was reloaded
//! - [`SyncProgress`]: data-source sync progress
//! - [`FileEvent`]: debounced file changes

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::builder::diagnostics::BuildError;
use crate::core::Manifest;

const DEFAULT_CAPACITY: usize = 256;

/// One strongly-typed broadcast channel.
#[derive(Debug)]
pub struct Topic<T> {
    name: &'static str,
    tx: broadcast::Sender<T>,
}

impl<T> Clone for Topic<T> {
    fn clone(&self) -> Self {
        Topic {
            name: self.name,
            tx: self.tx.clone(),
        }
    }
}

impl<T: Clone + Send + 'static> Topic<T> {
    pub fn new(name: &'static str, capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Topic { name, tx }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Publish an event. Returns how many subscribers will see it.
    pub fn publish(&self, event: T) -> usize {
        self.tx.send(event).unwrap_or(0)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<T> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Run `handler` for every event on its own task.
    ///
    /// The subscription is taken before this returns, so no event
    /// published afterwards is missed. A handler that panics ends only its
    /// own task.
    pub fn listen<F>(&self, mut handler: F) -> JoinHandle<()>
    where
        F: FnMut(T) + Send + 'static,
    {
        let mut rx = self.subscribe();
        let name = self.name;
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => handler(event),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!("{} listener lagged, skipped {} events", name, skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }
}

/// Supervised services.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceKind {
    Database,
    Worker,
}

impl ServiceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceKind::Database => "database",
            ServiceKind::Worker => "worker",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum ServiceEvent {
    Starting { service: ServiceKind },
    Ready { service: ServiceKind, port: u16 },
    Error { service: ServiceKind, message: String },
    Stopped { service: ServiceKind },
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum BuildEvent {
    Started {
        workbook_id: String,
    },
    Completed {
        workbook_id: String,
        fingerprint: String,
        pages: usize,
        blocks: usize,
        duration_ms: u64,
    },
    Failed {
        workbook_id: String,
        errors: Vec<BuildError>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum DatabaseEvent {
    Connected { port: u16 },
    Disconnected,
    Changed { channel: String, payload: String },
}

#[derive(Debug, Clone)]
pub enum ManifestEvent {
    Updated { manifest: Arc<Manifest> },
}

/// Status of one data-source sync run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum SyncStatus {
    Running,
    Completed,
    Failed { message: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncProgress {
    pub source: String,
    pub rows: u64,
    #[serde(flatten)]
    pub status: SyncStatus,
    pub at: DateTime<Utc>,
}

impl SyncProgress {
    pub fn is_error(&self) -> bool {
        matches!(self.status, SyncStatus::Failed { .. })
    }

    pub fn is_finished(&self) -> bool {
        !matches!(self.status, SyncStatus::Running)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileEvent {
    Changed { paths: Vec<PathBuf> },
}

/// All runtime topics.
#[derive(Debug, Clone)]
pub struct EventBus {
    pub service: Topic<ServiceEvent>,
    pub build: Topic<BuildEvent>,
    pub database: Topic<DatabaseEvent>,
    pub manifest: Topic<ManifestEvent>,
    pub sync: Topic<SyncProgress>,
    pub files: Topic<FileEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        EventBus {
            service: Topic::new("service", capacity),
            build: Topic::new("build", capacity),
            database: Topic::new("database", capacity),
            manifest: Topic::new("manifest", capacity),
            sync: Topic::new("sync", capacity),
            files: Topic::new("files", capacity),
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn test_publish_without_subscribers() {
        let topic: Topic<u32> = Topic::new("numbers", 4);
        assert_eq!(topic.publish(1), 0);
    }

    #[tokio::test]
    async fn test_every_subscriber_sees_each_event() {
        let bus = EventBus::new();
        let mut a = bus.service.subscribe();
        let mut b = bus.service.subscribe();

        let event = ServiceEvent::Ready {
            service: ServiceKind::Database,
            port: 55100,
        };
        assert_eq!(bus.service.publish(event.clone()), 2);

        assert_eq!(a.recv().await.unwrap(), event);
        assert_eq!(b.recv().await.unwrap(), event);
    }

    #[tokio::test]
    async fn test_panicking_listener_is_isolated() {
        let topic: Topic<u32> = Topic::new("numbers", 16);
        let seen = Arc::new(AtomicUsize::new(0));

        let bad = topic.listen(|_| panic!("listener bug"));
        let counter = seen.clone();
        let good = topic.listen(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        topic.publish(1);
        topic.publish(2);

        assert!(bad.await.unwrap_err().is_panic());
        for _ in 0..100 {
            if seen.load(Ordering::SeqCst) == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(seen.load(Ordering::SeqCst), 2);
        assert!(!good.is_finished());
        good.abort();
    }

    #[test]
    fn test_sync_progress_json() {
        let progress = SyncProgress {
            source: "stripe".to_string(),
            rows: 12,
            status: SyncStatus::Failed {
                message: "timeout".to_string(),
            },
            at: Utc::now(),
        };
        let json = serde_json::to_value(&progress).unwrap();
        assert_eq!(json["status"], "failed");
        assert_eq!(json["message"], "timeout");
        assert_eq!(json["rows"], 12);
        assert!(progress.is_error());
    }
}
