//! Indexing pipeline orchestration: discover → detect changes → parse and
//! chunk → embed → store.
//!
//! Parsing runs on the blocking pool, at most `indexing.workers` files at
//! a time. Embedding requests are batched (`embedding.batch_size`) and at
//! most `embedding.concurrency` are in flight across all files. Each file
//! ends in exactly one [`Store::replace_file`] call, so readers see either
//! the old or the new chunk set of a file, never a mix.
//!
//! Work on one path is serialized by a per-path lock; the watcher and a
//! concurrent `update` can race on the same file without interleaving.
//!
//! Failure policy:
//! - unreadable file → recorded in [`IndexReport::errors`], batch continues
//! - embedding failure → logged, the file is written without vectors
//! - store failure → fatal, remaining tasks are aborted
//! - root removed mid-run → [`IndexError::RootMissing`], remaining tasks
//!   are aborted; files already written stay committed

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use futures::future::try_join_all;
use tokio::sync::{OwnedMutexGuard, Semaphore};
use tokio::task::JoinSet;

use kontext_core::changes::PriorSnapshot;
use kontext_core::chunk::{chunk_nodes, hash_bytes, ChunkerConfig};
use kontext_core::embedding::Embedder;
use kontext_core::error::IndexError;
use kontext_core::models::{Chunk, ChangeKind, FileChange, FileMeta, Language};
use kontext_core::store::Store;

use crate::config::Config;
use crate::discovery::{self, DiscoveryRules};
use crate::embedding::prepare_chunk_text;
use crate::incremental::{compute_changes, UnchangedHint, GIT_HEAD_KEY};
use crate::parser::parse_source_at;
use crate::progress::{IndexProgressEvent, IndexProgressReporter, NoProgress};
use crate::vcs::{self, GitState};

/// Meta key recording which embedding model produced the stored vectors.
pub const EMBEDDER_KEY: &str = "embedder";

/// Emit an `Indexing` progress event every this many files.
const PROGRESS_EVERY: u64 = 50;

/// Summary of an indexing run.
#[derive(Debug, Default, Clone, PartialEq, Eq, serde::Serialize)]
pub struct IndexReport {
    pub files_scanned: usize,
    pub files_indexed: usize,
    pub files_unchanged: usize,
    pub files_removed: usize,
    pub chunks_created: usize,
    pub vectors_written: usize,
    /// Files written without vectors because embedding failed.
    pub embedding_failures: usize,
    pub errors: Vec<String>,
    pub duration_ms: u64,
}

/// Identity string stored under [`EMBEDDER_KEY`].
pub fn embedder_identity(embedder: &dyn Embedder) -> String {
    format!("{}@{}", embedder.name(), embedder.dimensions())
}

/// Async mutex per relative path.
#[derive(Default)]
struct PathLocks {
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl PathLocks {
    async fn lock(&self, path: &str) -> PathGuard<'_> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            Arc::clone(locks.entry(path.to_string()).or_default())
        };
        PathGuard {
            locks: self,
            path: path.to_string(),
            guard: Some(lock.lock_owned().await),
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.locks.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

/// Holds one path's lock; the map entry goes away with the last holder.
struct PathGuard<'a> {
    locks: &'a PathLocks,
    path: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for PathGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        let mut locks = self.locks.locks.lock().unwrap_or_else(|e| e.into_inner());
        // Waiters clone the Arc under this map lock, so a count of one
        // means nobody else holds or awaits it.
        if locks.get(&self.path).is_some_and(|l| Arc::strong_count(l) == 1) {
            locks.remove(&self.path);
        }
    }
}

enum FileOutcome {
    Written {
        chunks: usize,
        vectors: usize,
        embedding_failed: bool,
    },
    Unchanged,
    /// The file vanished before it could be read; its record was dropped.
    Removed,
}

struct FileJob {
    path: String,
    language: Language,
    /// Skip the write when the content still hashes to this.
    known_hash: Option<String>,
}

/// Indexes one root into a [`Store`]. Cheap to clone; clones share locks
/// and concurrency limits.
#[derive(Clone)]
pub struct Indexer {
    root: Arc<PathBuf>,
    store: Arc<dyn Store>,
    embedder: Option<Arc<dyn Embedder>>,
    config: Arc<Config>,
    locks: Arc<PathLocks>,
    embed_permits: Arc<Semaphore>,
    progress: Arc<dyn IndexProgressReporter>,
}

impl Indexer {
    pub fn new(
        root: impl Into<PathBuf>,
        store: Arc<dyn Store>,
        embedder: Option<Arc<dyn Embedder>>,
        config: Config,
    ) -> Self {
        let embed_permits = Arc::new(Semaphore::new(config.embedding.concurrency.max(1)));
        Self {
            root: Arc::new(root.into()),
            store,
            embedder,
            config: Arc::new(config),
            locks: Arc::new(PathLocks::default()),
            embed_permits,
            progress: Arc::new(NoProgress),
        }
    }

    pub fn with_progress(mut self, progress: Arc<dyn IndexProgressReporter>) -> Self {
        self.progress = progress;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn embedder(&self) -> Option<&Arc<dyn Embedder>> {
        self.embedder.as_ref()
    }

    fn chunker(&self) -> ChunkerConfig {
        self.config.chunking.chunker()
    }

    fn ensure_root(&self) -> Result<(), IndexError> {
        if self.root.is_dir() {
            Ok(())
        } else {
            Err(IndexError::RootMissing(self.root.to_path_buf()))
        }
    }

    /// Bring the index in line with the working tree.
    ///
    /// With `full`, every discovered file is re-parsed and re-embedded and
    /// the git fast path is skipped. A change of embedding model (name or
    /// dimensions) since the last pass implies `full`.
    pub async fn index_root(&self, full: bool) -> Result<IndexReport, IndexError> {
        let start = Instant::now();
        self.ensure_root()?;
        let mut report = IndexReport::default();

        self.progress.report(IndexProgressEvent::Discovering {
            root: self.root.display().to_string(),
        });
        let root = Arc::clone(&self.root);
        let indexing = self.config.indexing.clone();
        let discovered = tokio::task::spawn_blocking(move || discovery::discover(&root, &indexing))
            .await
            .map_err(|e| IndexError::Task(e.to_string()))?
            .map_err(|e| {
                if self.root.is_dir() {
                    IndexError::Task(format!("{e:#}"))
                } else {
                    IndexError::RootMissing(self.root.to_path_buf())
                }
            })?;
        report.files_scanned = discovered.len();
        tracing::info!(root = %self.root.display(), files = discovered.len(), "discovery finished");

        let identity = self.embedder.as_deref().map(embedder_identity);
        let stored_identity = self.store.get_meta(EMBEDDER_KEY).await?;
        let reembed = identity.is_some() && identity != stored_identity;
        let force = full || reembed;
        if reembed && stored_identity.is_some() {
            tracing::info!(
                from = stored_identity.as_deref().unwrap_or_default(),
                to = identity.as_deref().unwrap_or_default(),
                "embedding model changed, re-embedding every file"
            );
        }

        let records = self.store.list_files().await?;
        let prior: PriorSnapshot = if force {
            records.iter().map(|r| (r.path.clone(), String::new())).collect()
        } else {
            PriorSnapshot::from_records(&records)
        };

        let git = if self.config.indexing.use_git {
            let root = Arc::clone(&self.root);
            tokio::task::spawn_blocking(move || vcs::git_state(&root))
                .await
                .map_err(|e| IndexError::Task(e.to_string()))?
        } else {
            None
        };
        let hint = match (&git, force) {
            (Some(state), false) => {
                let marker = self.store.get_meta(GIT_HEAD_KEY).await?;
                UnchangedHint::from_git(state, marker.as_deref())
            }
            _ => UnchangedHint::none(),
        };
        if !hint.is_empty() {
            tracing::debug!(paths = hint.len(), "git fast path active");
        }

        let changes = compute_changes(
            &discovered,
            &prior,
            &hint,
            self.config.indexing.workers,
        )
        .await;
        self.progress.report(IndexProgressEvent::Detected {
            added: changes.added.len() as u64,
            modified: changes.modified.len() as u64,
            deleted: changes.deleted.len() as u64,
            unchanged: changes.unchanged.len() as u64,
        });
        report.files_unchanged = changes.unchanged.len();

        for path in &changes.deleted {
            let _guard = self.locks.lock(path).await;
            if self.store.delete_file(path).await? {
                report.files_removed += 1;
                tracing::debug!(path = %path, "removed from index");
            }
        }

        let languages: HashMap<&str, Language> = discovered
            .iter()
            .map(|f| (f.path.as_str(), f.language))
            .collect();
        let jobs: Vec<FileJob> = changes
            .dirty_paths()
            .filter_map(|path| {
                languages.get(path.as_str()).map(|language| FileJob {
                    path: path.clone(),
                    language: *language,
                    known_hash: None,
                })
            })
            .collect();
        self.run_jobs(jobs, &mut report).await?;

        self.record_pass_state(git.as_ref(), identity.as_deref(), &report)
            .await?;

        report.duration_ms = start.elapsed().as_millis().try_into().unwrap_or(u64::MAX);
        tracing::info!(
            indexed = report.files_indexed,
            removed = report.files_removed,
            unchanged = report.files_unchanged,
            chunks = report.chunks_created,
            errors = report.errors.len(),
            duration_ms = report.duration_ms,
            "index pass finished"
        );
        Ok(report)
    }

    /// Apply watcher notifications without re-scanning the tree.
    ///
    /// Notifications for the same path are coalesced (last one wins). A
    /// path that no longer exists, or is no longer indexable under the
    /// discovery rules, is removed from the index. Content that still
    /// matches the stored hash is left alone.
    pub async fn apply_changes(&self, changes: Vec<FileChange>) -> Result<IndexReport, IndexError> {
        let start = Instant::now();
        let mut report = IndexReport::default();
        if changes.is_empty() {
            return Ok(report);
        }
        self.ensure_root()?;
        self.store.set_meta(GIT_HEAD_KEY, None).await?;

        let rules = DiscoveryRules::from_config(&self.config.indexing)
            .map_err(|e| IndexError::Task(format!("{e:#}")))?;
        let latest: BTreeMap<String, ChangeKind> =
            changes.into_iter().map(|c| (c.path, c.kind)).collect();
        report.files_scanned = latest.len();

        let mut jobs = Vec::new();
        for (path, kind) in latest {
            let abs = self.root.join(&path);
            let described = match kind {
                ChangeKind::Deleted => None,
                ChangeKind::Added | ChangeKind::Modified => {
                    discovery::describe(&self.root, &abs, &rules)
                }
            };
            match described {
                Some(file) => {
                    let known_hash = self.store.get_file(&path).await?.map(|r| r.hash);
                    jobs.push(FileJob {
                        path,
                        language: file.language,
                        known_hash,
                    });
                }
                None => {
                    let _guard = self.locks.lock(&path).await;
                    if self.store.delete_file(&path).await? {
                        report.files_removed += 1;
                        tracing::debug!(path = %path, "removed from index");
                    }
                }
            }
        }
        self.run_jobs(jobs, &mut report).await?;

        report.duration_ms = start.elapsed().as_millis().try_into().unwrap_or(u64::MAX);
        Ok(report)
    }

    async fn run_jobs(&self, jobs: Vec<FileJob>, report: &mut IndexReport) -> Result<(), IndexError> {
        let total = jobs.len() as u64;
        if total == 0 {
            return Ok(());
        }
        let workers = Arc::new(Semaphore::new(self.config.indexing.workers.max(1)));
        let mut tasks = JoinSet::new();

        for job in jobs {
            let this = self.clone();
            let workers = Arc::clone(&workers);
            tasks.spawn(async move {
                let outcome = match workers.acquire_owned().await {
                    Ok(_permit) => this.index_file(&job).await,
                    Err(e) => Err(IndexError::Task(e.to_string())),
                };
                (job.path, outcome)
            });
        }

        let mut done = 0u64;
        while let Some(joined) = tasks.join_next().await {
            let (path, outcome) = match joined {
                Ok(result) => result,
                Err(e) => {
                    tasks.abort_all();
                    return Err(IndexError::Task(e.to_string()));
                }
            };
            done += 1;
            match outcome {
                Ok(FileOutcome::Written {
                    chunks,
                    vectors,
                    embedding_failed,
                }) => {
                    report.files_indexed += 1;
                    report.chunks_created += chunks;
                    report.vectors_written += vectors;
                    if embedding_failed {
                        report.embedding_failures += 1;
                    }
                }
                Ok(FileOutcome::Unchanged) => report.files_unchanged += 1,
                Ok(FileOutcome::Removed) => report.files_removed += 1,
                Err(e @ (IndexError::Io { .. } | IndexError::Embedding(_))) => {
                    tracing::warn!(path = %path, error = %e, "skipping file");
                    report.errors.push(format!("{path}: {e}"));
                }
                Err(e) => {
                    tracing::error!(path = %path, error = %e, "indexing aborted");
                    tasks.abort_all();
                    return Err(e);
                }
            }
            if done % PROGRESS_EVERY == 0 || done == total {
                self.progress
                    .report(IndexProgressEvent::Indexing { n: done, total });
            }
        }
        Ok(())
    }

    async fn index_file(&self, job: &FileJob) -> Result<FileOutcome, IndexError> {
        let _guard = self.locks.lock(&job.path).await;
        let abs = self.root.join(&job.path);

        let bytes = match tokio::fs::read(&abs).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                self.ensure_root()?;
                self.store.delete_file(&job.path).await?;
                return Ok(FileOutcome::Removed);
            }
            Err(source) => {
                self.ensure_root()?;
                return Err(IndexError::Io { path: abs, source });
            }
        };
        let hash = hash_bytes(&bytes);
        if job.known_hash.as_deref() == Some(hash.as_str()) {
            return Ok(FileOutcome::Unchanged);
        }
        let size = bytes.len() as u64;

        let path = job.path.clone();
        let language = job.language;
        let chunker = self.chunker();
        let chunks = tokio::task::spawn_blocking(move || {
            let text = String::from_utf8_lossy(&bytes);
            let outcome = parse_source_at(&path, &text, language);
            if let Some(diagnostic) = &outcome.diagnostic {
                tracing::debug!(path = %path, %diagnostic, "partial parse");
            }
            chunk_nodes(&outcome.nodes, &text, &chunker)
        })
        .await
        .map_err(|e| IndexError::Task(e.to_string()))?;

        let (vectors, embedding_failed) = match self.embed_chunks(&job.path, language, &chunks).await {
            Ok(vectors) => (vectors, false),
            Err(e) => {
                tracing::warn!(path = %job.path, error = %e, "embedding failed, storing without vectors");
                (None, true)
            }
        };

        let meta = FileMeta {
            path: job.path.clone(),
            language,
            hash,
            size,
        };
        self.store
            .replace_file(&meta, &chunks, vectors.as_deref())
            .await?;
        tracing::debug!(path = %job.path, chunks = chunks.len(), "indexed");

        Ok(FileOutcome::Written {
            chunks: chunks.len(),
            vectors: vectors.as_ref().map_or(0, Vec::len),
            embedding_failed,
        })
    }

    async fn embed_chunks(
        &self,
        path: &str,
        language: Language,
        chunks: &[Chunk],
    ) -> Result<Option<Vec<Vec<f32>>>, IndexError> {
        let Some(embedder) = &self.embedder else {
            return Ok(None);
        };
        if chunks.is_empty() {
            return Ok(None);
        }
        let texts: Vec<String> = chunks
            .iter()
            .map(|c| prepare_chunk_text(path, language, c))
            .collect();

        let batches = texts
            .chunks(self.config.embedding.batch_size.max(1))
            .map(|batch| async move {
                let _permit = self
                    .embed_permits
                    .acquire()
                    .await
                    .map_err(|e| IndexError::Embedding(e.to_string()))?;
                embedder
                    .embed(batch)
                    .await
                    .map_err(|e| IndexError::Embedding(format!("{e:#}")))
            });
        let vectors: Vec<Vec<f32>> = try_join_all(batches).await?.into_iter().flatten().collect();

        if vectors.len() != chunks.len() {
            return Err(IndexError::Embedding(format!(
                "{} vectors for {} chunks",
                vectors.len(),
                chunks.len()
            )));
        }
        Ok(Some(vectors))
    }

    /// Persist the git marker and embedder identity after a full pass.
    ///
    /// The marker is only kept when the tree was clean and every file was
    /// processed; the identity only when every embedding succeeded.
    async fn record_pass_state(
        &self,
        git: Option<&GitState>,
        identity: Option<&str>,
        report: &IndexReport,
    ) -> Result<(), IndexError> {
        let marker = git
            .filter(|state| state.clean && report.errors.is_empty())
            .map(|state| state.head.as_str());
        self.store.set_meta(GIT_HEAD_KEY, marker).await?;

        if let Some(identity) = identity {
            if report.embedding_failures == 0 {
                self.store.set_meta(EMBEDDER_KEY, Some(identity)).await?;
            } else {
                self.store.set_meta(EMBEDDER_KEY, None).await?;
            }
        }
        Ok(())
    }
}
