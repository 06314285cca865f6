//! Git working-tree state for the incremental fast path.
//!
//! Shells out to the `git` CLI. Every path reported here is relative to
//! the indexed root (which may be a subdirectory of the repository) and
//! `/`-separated, matching discovery.

use std::collections::HashSet;
use std::path::Path;
use std::process::Command;

use anyhow::{bail, Context, Result};

/// HEAD plus the set of tracked files whose content matches HEAD.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitState {
    pub head: String,
    /// True when no tracked file differs from HEAD and nothing is untracked.
    pub clean: bool,
    clean_tracked: HashSet<String>,
}

impl GitState {
    /// Whether `rel_path` is tracked and identical to its HEAD version.
    pub fn is_clean(&self, rel_path: &str) -> bool {
        self.clean_tracked.contains(rel_path)
    }

    pub fn clean_paths(&self) -> impl Iterator<Item = &str> {
        self.clean_tracked.iter().map(String::as_str)
    }
}

fn run_git(root: &Path, args: &[&str]) -> Result<Vec<u8>> {
    let output = Command::new("git")
        .args(args)
        .current_dir(root)
        .output()
        .with_context(|| format!("Failed to execute 'git {}'", args.join(" ")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        bail!("git {} failed: {}", args.join(" "), stderr.trim());
    }
    Ok(output.stdout)
}

fn nul_separated(bytes: &[u8]) -> impl Iterator<Item = String> + '_ {
    bytes
        .split(|b| *b == 0)
        .filter(|p| !p.is_empty())
        .map(|p| String::from_utf8_lossy(p).replace('\\', "/"))
}

/// HEAD commit of the repository containing `root`.
pub fn head_sha(root: &Path) -> Result<String> {
    let out = run_git(root, &["rev-parse", "HEAD"])?;
    Ok(String::from_utf8_lossy(&out).trim().to_string())
}

/// Snapshot the working tree, or `None` when `root` is not inside a git
/// repository with at least one commit (or git is unavailable).
pub fn git_state(root: &Path) -> Option<GitState> {
    match read_state(root) {
        Ok(state) => Some(state),
        Err(e) => {
            tracing::debug!(root = %root.display(), error = %e, "git fast path unavailable");
            None
        }
    }
}

fn read_state(root: &Path) -> Result<GitState> {
    let head = head_sha(root)?;
    let tracked = run_git(root, &["ls-files", "-z", "--", "."])?;
    let changed = run_git(
        root,
        &["diff", "HEAD", "--name-only", "-z", "--relative", "--", "."],
    )?;
    let untracked = run_git(
        root,
        &["ls-files", "-z", "--others", "--exclude-standard", "--", "."],
    )?;

    let dirty: HashSet<String> = nul_separated(&changed).collect();
    let has_untracked = nul_separated(&untracked).next().is_some();
    let clean_tracked: HashSet<String> = nul_separated(&tracked)
        .filter(|p| !dirty.contains(p))
        .collect();

    Ok(GitState {
        head,
        clean: dirty.is_empty() && !has_untracked,
        clean_tracked,
    })
}
