//! Thin file-watch handle the container's `add_watch_file` talks to.
//!
//! Owns a `notify` watcher and forwards raw events as
//! [`WatchChangeKind`]-tagged changes over a channel. The environment routes
//! those into the container's `watch_change` hook.

use std::path::{Path, PathBuf};

use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::Mutex;
use rustc_hash::FxHashSet;
use skiff_common::{Error, Result};
use tokio::sync::mpsc;

use crate::plugin::WatchChangeKind;

/// A change reported by the watcher.
#[derive(Debug, Clone)]
pub struct FileChange {
    pub path: PathBuf,
    pub kind: WatchChangeKind,
}

pub struct WatchHandle {
    watcher: Mutex<RecommendedWatcher>,
    watched: Mutex<FxHashSet<PathBuf>>,
}

impl WatchHandle {
    /// Create a watcher delivering changes over the returned channel.
    pub fn new() -> Result<(Self, mpsc::Receiver<FileChange>)> {
        let (tx, rx) = mpsc::channel(256);

        let watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
            let Ok(event) = res else { return };
            let kind = match event.kind {
                notify::EventKind::Create(_) => WatchChangeKind::Create,
                notify::EventKind::Modify(_) => WatchChangeKind::Update,
                notify::EventKind::Remove(_) => WatchChangeKind::Delete,
                _ => return,
            };
            for path in event.paths {
                let _ = tx.blocking_send(FileChange {
                    path: path.clone(),
                    kind,
                });
            }
        })
        .map_err(|e| Error::Custom(format!("failed to create file watcher: {}", e)))?;

        Ok((
            Self {
                watcher: Mutex::new(watcher),
                watched: Mutex::new(FxHashSet::default()),
            },
            rx,
        ))
    }

    /// Start watching a single path. Idempotent per path; missing paths are
    /// ignored so plugins can register files that appear later.
    pub fn watch_path(&self, path: &Path) {
        if !self.watched.lock().insert(path.to_path_buf()) {
            return;
        }
        if !path.exists() {
            return;
        }
        if let Err(e) = self
            .watcher
            .lock()
            .watch(path, RecursiveMode::NonRecursive)
        {
            tracing::debug!("failed to watch {}: {}", path.display(), e);
        }
    }

    /// Paths registered so far, watched or pending.
    pub fn watched_paths(&self) -> Vec<PathBuf> {
        self.watched.lock().iter().cloned().collect()
    }
}
