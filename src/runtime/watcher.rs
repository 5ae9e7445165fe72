//! Workbook file watching.
//!
//! `notify-debouncer-full` batches filesystem notifications; each batch
//! that touches a source is published as [`FileEvent::Changed`]. A batch
//! that touches the manifest also reloads it and publishes
//! [`ManifestEvent::Updated`].

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode};
use notify_debouncer_full::{new_debouncer, DebounceEventResult, Debouncer, RecommendedCache};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::core::{Manifest, Workbook, STATE_DIR};
use crate::runtime::events::{EventBus, FileEvent, ManifestEvent};

/// Quiet period that ends a batch.
pub const DEBOUNCE: Duration = Duration::from_millis(200);

/// Which paths of a workbook are worth reacting to.
#[derive(Debug, Clone)]
pub struct WatchTargets {
    root: PathBuf,
    manifest: PathBuf,
    pages: PathBuf,
    blocks: PathBuf,
    out_dir: PathBuf,
}

impl WatchTargets {
    pub fn for_workbook(workbook: &Workbook) -> Self {
        WatchTargets {
            root: workbook.root().to_path_buf(),
            manifest: workbook.manifest_path(),
            pages: workbook.pages_dir(),
            blocks: workbook.blocks_dir(),
            out_dir: workbook.out_dir(),
        }
    }

    /// Sources and the manifest are relevant; generated output and runtime
    /// state are not, or every build would trigger another.
    pub fn is_relevant(&self, path: &Path) -> bool {
        if path.starts_with(&self.out_dir) || path.starts_with(self.root.join(STATE_DIR)) {
            return false;
        }
        if path.components().any(|c| c.as_os_str() == "node_modules") {
            return false;
        }
        path == self.manifest || path.starts_with(&self.pages) || path.starts_with(&self.blocks)
    }

    pub fn is_manifest(&self, path: &Path) -> bool {
        path == self.manifest
    }
}

/// Relevant paths touched by one debounced batch, sorted and deduplicated.
pub fn batch_paths<'a>(events: impl IntoIterator<Item = &'a Event>, targets: &WatchTargets) -> Vec<PathBuf> {
    let mut paths = BTreeSet::new();
    for event in events {
        if !matches!(
            event.kind,
            EventKind::Modify(_) | EventKind::Create(_) | EventKind::Remove(_)
        ) {
            continue;
        }
        for path in &event.paths {
            if targets.is_relevant(path) {
                paths.insert(path.clone());
            }
        }
    }
    paths.into_iter().collect()
}

/// Publish one batch, reloading the manifest first when it changed.
pub fn publish_batch(paths: Vec<PathBuf>, targets: &WatchTargets, events: &EventBus) {
    tracing::debug!("{} files changed", paths.len());
    if paths.iter().any(|p| targets.is_manifest(p)) {
        match Manifest::load(&targets.manifest) {
            Ok(manifest) => {
                tracing::info!("manifest reloaded");
                events.manifest.publish(ManifestEvent::Updated {
                    manifest: Arc::new(manifest),
                });
            }
            Err(e) => tracing::warn!("ignoring manifest change: {}", e),
        }
    }
    events.files.publish(FileEvent::Changed { paths });
}

/// Keeps the watcher alive; dropping it stops watching.
pub struct FileWatcher {
    _debouncer: Debouncer<RecommendedWatcher, RecommendedCache>,
    task: JoinHandle<()>,
}

impl Drop for FileWatcher {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Watch `workbook`'s manifest, pages and blocks, publishing to `events`.
pub fn watch_workbook(workbook: &Workbook, events: EventBus) -> Result<FileWatcher> {
    let targets = WatchTargets::for_workbook(workbook);
    let (tx, mut rx) = mpsc::unbounded_channel::<DebounceEventResult>();

    let mut debouncer = new_debouncer(DEBOUNCE, None, move |result: DebounceEventResult| {
        let _ = tx.send(result);
    })
    .context("failed to create file watcher")?;

    // The root is watched shallowly so a manifest replaced by rename is seen.
    debouncer
        .watch(&targets.root, RecursiveMode::NonRecursive)
        .with_context(|| format!("failed to watch {}", targets.root.display()))?;
    for dir in [&targets.pages, &targets.blocks] {
        if dir.is_dir() {
            debouncer
                .watch(dir, RecursiveMode::Recursive)
                .with_context(|| format!("failed to watch {}", dir.display()))?;
        }
    }
    tracing::debug!("watching {}", targets.root.display());

    let task = tokio::spawn(async move {
        while let Some(result) = rx.recv().await {
            match result {
                Ok(batch) => {
                    let paths = batch_paths(batch.iter().map(|e| &e.event), &targets);
                    if !paths.is_empty() {
                        publish_batch(paths, &targets, &events);
                    }
                }
                Err(errors) => {
                    for e in errors {
                        tracing::warn!("file watch error: {}", e);
                    }
                }
            }
        }
    });

    Ok(FileWatcher {
        _debouncer: debouncer,
        task,
    })
}
