//! Watch mode: filesystem notifications → debounced, coalesced
//! [`Indexer::apply_changes`] calls.
//!
//! Notifications are debounced by `notify-debouncer-mini`; every window
//! becomes one deduplicated change list. Windows that queue up while a
//! previous batch is still being applied are merged before the next
//! apply, so a path touched several times is indexed once. A removed
//! directory cannot be expanded into file notifications, so it triggers a
//! regular incremental pass instead.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use notify_debouncer_mini::{new_debouncer, DebouncedEvent, DebouncedEventKind};
use tokio::sync::mpsc;

use kontext_core::models::{ChangeKind, FileChange, Language};

use crate::config::CTX_DIR;
use crate::discovery::relative_path;
use crate::indexer::Indexer;

/// One debounce window's worth of work.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct WatchBatch {
    pub changes: Vec<FileChange>,
    /// Something vanished that is not a source file (e.g. a directory).
    pub rescan: bool,
}

impl WatchBatch {
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty() && !self.rescan
    }

    /// Fold `later` into `self`; for a repeated path the later kind wins.
    pub fn merge(&mut self, later: WatchBatch) {
        let mut by_path: BTreeMap<String, ChangeKind> = self
            .changes
            .drain(..)
            .chain(later.changes)
            .map(|c| (c.path, c.kind))
            .collect();
        self.changes = std::mem::take(&mut by_path)
            .into_iter()
            .map(|(path, kind)| FileChange { path, kind })
            .collect();
        self.rescan |= later.rescan;
    }
}

/// Map raw notification paths under `root` to index changes.
///
/// Paths outside the root or inside the `.ctx` directory are ignored.
/// Existing files with a known language become `Modified` (the indexer
/// treats added and modified alike); missing ones become `Deleted`.
pub fn batch_from_paths<I>(root: &Path, paths: I) -> WatchBatch
where
    I: IntoIterator<Item = PathBuf>,
{
    let mut batch = WatchBatch::default();
    let mut seen: BTreeMap<String, ChangeKind> = BTreeMap::new();

    for path in paths {
        let Some(rel) = relative_path(root, &path) else {
            continue;
        };
        if rel == CTX_DIR || rel.starts_with(&format!("{CTX_DIR}/")) {
            continue;
        }
        let exists = path.exists();
        if Language::from_path(&rel).is_none() {
            if !exists {
                batch.rescan = true;
            }
            continue;
        }
        let kind = if exists {
            ChangeKind::Modified
        } else {
            ChangeKind::Deleted
        };
        seen.insert(rel, kind);
    }

    batch.changes = seen
        .into_iter()
        .map(|(path, kind)| FileChange { path, kind })
        .collect();
    batch
}

/// Background watcher bound to one [`Indexer`]. Dropping it stops
/// watching.
pub struct IndexWatcher {
    handle: tokio::task::JoinHandle<()>,
}

impl IndexWatcher {
    /// # Errors
    ///
    /// Returns an error if the filesystem watcher cannot be initialized.
    pub fn start(indexer: Indexer, debounce: Duration) -> anyhow::Result<Self> {
        let root = indexer.root().to_path_buf();
        // Notification paths may be canonical even when the root is not.
        let watch_root = root.canonicalize().unwrap_or_else(|_| root.clone());
        let (batch_tx, mut batch_rx) = mpsc::unbounded_channel::<WatchBatch>();

        let callback_root = watch_root.clone();
        let mut debouncer = new_debouncer(
            debounce,
            move |events: Result<Vec<DebouncedEvent>, notify::Error>| {
                let events = match events {
                    Ok(events) => events,
                    Err(e) => {
                        tracing::warn!("index watcher error: {e}");
                        return;
                    }
                };
                let paths = events
                    .into_iter()
                    .filter(|e| matches!(e.kind, DebouncedEventKind::Any | DebouncedEventKind::AnyContinuous))
                    .map(|e| e.path);
                let batch = batch_from_paths(&callback_root, paths);
                if !batch.is_empty() {
                    let _ = batch_tx.send(batch);
                }
            },
        )?;

        debouncer
            .watcher()
            .watch(&watch_root, notify::RecursiveMode::Recursive)?;
        tracing::info!(root = %root.display(), "watching for changes");

        let handle = tokio::spawn(async move {
            let _debouncer = debouncer;
            while let Some(mut batch) = batch_rx.recv().await {
                while let Ok(more) = batch_rx.try_recv() {
                    batch.merge(more);
                }
                apply_batch(&indexer, batch).await;
            }
        });

        Ok(Self { handle })
    }
}

impl Drop for IndexWatcher {
    fn drop(&mut self) {
        // The task owns the debouncer; aborting it ends the OS watch too.
        self.handle.abort();
    }
}

async fn apply_batch(indexer: &Indexer, batch: WatchBatch) {
    let result = if batch.rescan {
        indexer.index_root(false).await
    } else {
        indexer.apply_changes(batch.changes).await
    };
    match result {
        Ok(report) => {
            if report.files_indexed > 0 || report.files_removed > 0 {
                tracing::info!(
                    indexed = report.files_indexed,
                    removed = report.files_removed,
                    chunks = report.chunks_created,
                    "index updated"
                );
            }
            for error in &report.errors {
                tracing::warn!("{error}");
            }
        }
        Err(e) => tracing::warn!("reindex failed: {e}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use kontext_core::store::memory::InMemoryStore;
    use std::sync::Arc;

    fn change(path: &str, kind: ChangeKind) -> FileChange {
        FileChange {
            path: path.to_string(),
            kind,
        }
    }

    #[test]
    fn test_batch_from_paths() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path();
        std::fs::write(root.join("a.ts"), "export const A = 1;").unwrap();
        std::fs::write(root.join("notes.md"), "# notes").unwrap();

        let batch = batch_from_paths(
            root,
            vec![
                root.join("a.ts"),
                root.join("a.ts"),
                root.join("gone.py"),
                root.join("notes.md"),
                root.join(".ctx/index.db"),
                PathBuf::from("/elsewhere/b.ts"),
            ],
        );
        assert_eq!(
            batch.changes,
            vec![change("a.ts", ChangeKind::Modified), change("gone.py", ChangeKind::Deleted)]
        );
        assert!(!batch.rescan);
    }

    #[test]
    fn test_removed_directory_requests_rescan() {
        let tmp = tempfile::tempdir().unwrap();
        let batch = batch_from_paths(tmp.path(), vec![tmp.path().join("src/old")]);
        assert!(batch.changes.is_empty());
        assert!(batch.rescan);
    }

    #[test]
    fn test_merge_last_kind_wins() {
        let mut first = WatchBatch {
            changes: vec![change("a.ts", ChangeKind::Modified), change("b.ts", ChangeKind::Modified)],
            rescan: false,
        };
        first.merge(WatchBatch {
            changes: vec![change("a.ts", ChangeKind::Deleted)],
            rescan: true,
        });
        assert_eq!(
            first.changes,
            vec![change("a.ts", ChangeKind::Deleted), change("b.ts", ChangeKind::Modified)]
        );
        assert!(first.rescan);
    }

    #[tokio::test]
    async fn test_start_with_valid_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let indexer = Indexer::new(tmp.path(), Arc::new(InMemoryStore::new()), None, Config::default());
        assert!(IndexWatcher::start(indexer, Duration::from_millis(100)).is_ok());
    }

    #[tokio::test]
    async fn test_drop_stops_watch_task() {
        let tmp = tempfile::tempdir().unwrap();
        let store = Arc::new(InMemoryStore::new());
        let indexer = Indexer::new(tmp.path(), store.clone(), None, Config::default());
        let watcher = IndexWatcher::start(indexer, Duration::from_millis(50)).unwrap();
        assert!(Arc::strong_count(&store) > 1);

        drop(watcher);
        // The aborted task releases the indexer and with it the store.
        for _ in 0..100 {
            if Arc::strong_count(&store) == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(Arc::strong_count(&store), 1);
    }

    #[tokio::test]
    async fn test_start_with_nonexistent_directory_fails() {
        let indexer = Indexer::new(
            "/nonexistent/path/xyz",
            Arc::new(InMemoryStore::new()),
            None,
            Config::default(),
        );
        assert!(IndexWatcher::start(indexer, Duration::from_millis(100)).is_err());
    }
}
