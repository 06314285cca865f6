//! Incremental change detection over the filesystem.
//!
//! Hashes discovered files concurrently and classifies them against the
//! persisted file records with [`kontext_core::changes::classify`].
//!
//! # Git fast path
//!
//! After a full pass on a clean working tree the store records HEAD under
//! [`GIT_HEAD_KEY`]. If HEAD is still the same on the next pass, every
//! tracked file that is clean relative to HEAD must still hold the content
//! the index recorded, so its stored hash is reused instead of re-reading
//! the file. Any other write to the index clears the marker.

use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Instant;

use futures::stream::{self, StreamExt};

use kontext_core::changes::{classify, PriorSnapshot, PriorState};
use kontext_core::chunk::hash_bytes;
use kontext_core::models::{ChangeSet, DiscoveredFile};

use crate::vcs::GitState;

/// Meta key holding the HEAD commit of the last clean full pass.
pub const GIT_HEAD_KEY: &str = "git_head";

/// Paths whose content is known to match what the index recorded.
#[derive(Debug, Clone, Default)]
pub struct UnchangedHint {
    paths: HashSet<String>,
}

impl UnchangedHint {
    pub fn none() -> Self {
        Self::default()
    }

    /// Clean tracked paths, provided HEAD still equals the recorded marker.
    pub fn from_git(state: &GitState, marker: Option<&str>) -> Self {
        if marker != Some(state.head.as_str()) {
            return Self::none();
        }
        Self {
            paths: state.clean_paths().map(str::to_string).collect(),
        }
    }

    pub fn contains(&self, path: &str) -> bool {
        self.paths.contains(path)
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}

/// Classify `discovered` against `prior`.
///
/// At most `concurrency` files are read at once. A file that vanished or
/// became unreadable since discovery is treated as absent.
pub async fn compute_changes(
    discovered: &[DiscoveredFile],
    prior: &PriorSnapshot,
    hint: &UnchangedHint,
    concurrency: usize,
) -> ChangeSet {
    let started = Instant::now();
    let mut hashed: Vec<(String, String)> = Vec::with_capacity(discovered.len());
    let mut to_read = Vec::new();

    for file in discovered {
        match prior.file_hash(&file.path) {
            Some(stored) if hint.contains(&file.path) => {
                hashed.push((file.path.clone(), stored.to_string()));
            }
            _ => to_read.push((file.path.clone(), file.absolute_path.clone())),
        }
    }
    let skipped = hashed.len();

    // Owned items keep the stream's futures free of borrowed lifetimes, so
    // callers can run this inside spawned tasks.
    let mut reads = stream::iter(to_read)
        .map(|(path, absolute_path): (String, PathBuf)| async move {
            let result = tokio::fs::read(&absolute_path).await;
            (path, result)
        })
        .buffer_unordered(concurrency.max(1));

    while let Some((path, result)) = reads.next().await {
        match result {
            Ok(bytes) => {
                let hash = hash_bytes(&bytes);
                hashed.push((path, hash));
            }
            Err(e) => {
                tracing::warn!(path = %path, error = %e, "cannot read file, treating as absent");
            }
        }
    }

    let mut changes = classify(&hashed, prior);
    changes.duration = started.elapsed();
    tracing::debug!(
        added = changes.added.len(),
        modified = changes.modified.len(),
        deleted = changes.deleted.len(),
        unchanged = changes.unchanged.len(),
        hash_skipped = skipped,
        "changes computed"
    );
    changes
}

#[cfg(test)]
mod tests {
    use super::*;
    use kontext_core::models::Language;
    use std::fs;
    use std::path::Path;

    fn discovered(root: &Path, rel: &str) -> DiscoveredFile {
        let abs = root.join(rel);
        DiscoveredFile {
            path: rel.to_string(),
            size: fs::metadata(&abs).map(|m| m.len()).unwrap_or(0),
            absolute_path: abs,
            language: Language::from_path(rel).unwrap(),
            last_modified: 0,
        }
    }

    #[tokio::test]
    async fn test_classifies_against_prior() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path();
        fs::write(root.join("same.py"), "A = 1").unwrap();
        fs::write(root.join("changed.py"), "B = 2").unwrap();
        fs::write(root.join("new.py"), "C = 3").unwrap();

        let mut prior = PriorSnapshot::new();
        prior.insert("same.py", hash_bytes(b"A = 1"));
        prior.insert("changed.py", hash_bytes(b"B = 1"));
        prior.insert("gone.py", hash_bytes(b"D = 4"));

        let files: Vec<_> = ["changed.py", "new.py", "same.py"]
            .iter()
            .map(|p| discovered(root, p))
            .collect();
        let changes = compute_changes(&files, &prior, &UnchangedHint::none(), 2).await;

        assert_eq!(changes.added, vec!["new.py"]);
        assert_eq!(changes.modified, vec!["changed.py"]);
        assert_eq!(changes.unchanged, vec!["same.py"]);
        assert_eq!(changes.deleted, vec!["gone.py"]);
        assert_eq!(changes.hashes["new.py"], hash_bytes(b"C = 3"));
        assert!(!changes.hashes.contains_key("same.py"));
    }

    #[tokio::test]
    async fn test_runs_inside_spawned_task() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join("a.py"), "A = 1").unwrap();
        let files = vec![discovered(tmp.path(), "a.py")];

        let changes = tokio::spawn(async move {
            let prior = PriorSnapshot::new();
            let hint = UnchangedHint::none();
            compute_changes(&files, &prior, &hint, 4).await
        })
        .await
        .unwrap();
        assert_eq!(changes.added, vec!["a.py"]);
    }

    #[tokio::test]
    async fn test_vanished_file_is_absent() {
        let tmp = tempfile::tempdir().unwrap();
        let mut file = discovered(tmp.path(), "a.py");
        file.absolute_path = tmp.path().join("missing.py");

        let mut prior = PriorSnapshot::new();
        prior.insert("a.py", "h");
        let changes = compute_changes(&[file], &prior, &UnchangedHint::none(), 1).await;
        assert_eq!(changes.deleted, vec!["a.py"]);
        assert!(changes.unchanged.is_empty());
    }

    #[tokio::test]
    async fn test_hint_matches_pure_hash_result() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path();
        fs::write(root.join("a.ts"), "export const A = 1;").unwrap();

        let mut prior = PriorSnapshot::new();
        prior.insert("a.ts", hash_bytes(b"export const A = 1;"));
        let files = vec![discovered(root, "a.ts")];

        let hint = UnchangedHint {
            paths: ["a.ts".to_string()].into_iter().collect(),
        };
        let fast = compute_changes(&files, &prior, &hint, 1).await;
        let slow = compute_changes(&files, &prior, &UnchangedHint::none(), 1).await;
        assert_eq!(fast.unchanged, slow.unchanged);
        assert_eq!(fast.added, slow.added);
        assert_eq!(fast.modified, slow.modified);
        assert_eq!(fast.deleted, slow.deleted);
    }

    #[tokio::test]
    async fn test_hint_requires_prior_record() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join("a.ts"), "export const A = 1;").unwrap();
        let hint = UnchangedHint {
            paths: ["a.ts".to_string()].into_iter().collect(),
        };
        let changes = compute_changes(
            &[discovered(tmp.path(), "a.ts")],
            &PriorSnapshot::new(),
            &hint,
            1,
        )
        .await;
        assert_eq!(changes.added, vec!["a.ts"]);
    }
}
