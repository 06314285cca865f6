//! Source file discovery.
//!
//! Walks the indexed root honouring `.gitignore`, `.ignore`, and hidden-file
//! rules, then applies the configured include/exclude globs, the language
//! filter (only files with a known extension), and the size cap.
//! The index directory itself and common dependency/build directories are
//! always excluded.
//!
//! Paths are reported relative to the root with `/` separators and sorted
//! for deterministic ordering.

use std::path::Path;

use anyhow::{bail, Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use ignore::WalkBuilder;

use kontext_core::models::{DiscoveredFile, Language};

use crate::config::{IndexingConfig, CTX_DIR};

const DEFAULT_EXCLUDES: &[&str] = &[
    "**/.git/**",
    "**/node_modules/**",
    "**/target/**",
    "**/dist/**",
    "**/build/**",
    "**/__pycache__/**",
    "**/vendor/**",
];

/// Compiled include/exclude rules.
pub struct DiscoveryRules {
    include: Option<GlobSet>,
    exclude: GlobSet,
    max_file_size: u64,
}

impl DiscoveryRules {
    pub fn from_config(config: &IndexingConfig) -> Result<Self> {
        let include = if config.include_globs.is_empty() {
            None
        } else {
            Some(build_globset(&config.include_globs)?)
        };

        let mut excludes: Vec<String> = DEFAULT_EXCLUDES.iter().map(|s| s.to_string()).collect();
        excludes.push(format!("{CTX_DIR}/**"));
        excludes.extend(config.exclude_globs.iter().cloned());

        Ok(Self {
            include,
            exclude: build_globset(&excludes)?,
            max_file_size: config.max_file_size,
        })
    }

    /// Language of `rel_path` when the path passes every rule except size.
    pub fn language_of(&self, rel_path: &str) -> Option<Language> {
        if self.exclude.is_match(rel_path) {
            return None;
        }
        if let Some(include) = &self.include {
            if !include.is_match(rel_path) {
                return None;
            }
        }
        Language::from_path(rel_path)
    }

    pub fn within_size(&self, size: u64) -> bool {
        size <= self.max_file_size
    }
}

/// `/`-separated path of `path` relative to `root`, if it lies inside.
pub fn relative_path(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let parts: Vec<String> = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    (!parts.is_empty()).then(|| parts.join("/"))
}

/// Describe one file, or `None` if it is not indexable under `rules`.
pub fn describe(root: &Path, path: &Path, rules: &DiscoveryRules) -> Option<DiscoveredFile> {
    let rel = relative_path(root, path)?;
    let language = rules.language_of(&rel)?;
    let metadata = std::fs::metadata(path).ok()?;
    if !metadata.is_file() {
        return None;
    }
    if !rules.within_size(metadata.len()) {
        tracing::debug!(path = %rel, size = metadata.len(), "skipping oversized file");
        return None;
    }
    let last_modified = metadata
        .modified()
        .ok()
        .and_then(|m| m.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0);

    Some(DiscoveredFile {
        path: rel,
        absolute_path: path.to_path_buf(),
        language,
        size: metadata.len(),
        last_modified,
    })
}

/// Enumerate indexable files under `root`.
pub fn discover(root: &Path, config: &IndexingConfig) -> Result<Vec<DiscoveredFile>> {
    if !root.is_dir() {
        bail!("index root does not exist: {}", root.display());
    }
    let rules = DiscoveryRules::from_config(config)?;

    let mut files = Vec::new();
    let walker = WalkBuilder::new(root)
        .hidden(true)
        .git_ignore(true)
        .git_global(false)
        .require_git(false)
        .build();

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!(error = %e, "skipping unreadable entry");
                continue;
            }
        };
        if !entry.file_type().is_some_and(|t| t.is_file()) {
            continue;
        }
        if let Some(file) = describe(root, entry.path(), &rules) {
            files.push(file);
        }
    }

    files.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(files)
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern).with_context(|| format!("invalid glob: {pattern}"))?);
    }
    Ok(builder.build()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write(root: &Path, rel: &str, body: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, body).unwrap();
    }

    #[test]
    fn test_discover_filters_and_sorts() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path();
        write(root, "src/b.ts", "export const B = 1;");
        write(root, "src/a.py", "A = 1");
        write(root, "README.md", "# readme");
        write(root, "node_modules/pkg/index.js", "module.exports = 1;");
        write(root, ".ctx/config.toml", "");
        write(root, "ignored/skip.rs", "fn main() {}");
        write(root, ".gitignore", "ignored/\n");

        let files = discover(root, &IndexingConfig::default()).unwrap();
        let paths: Vec<&str> = files.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(paths, vec!["src/a.py", "src/b.ts"]);
        assert_eq!(files[1].language, Language::TypeScript);
        assert!(files[1].absolute_path.ends_with("src/b.ts"));
    }

    #[test]
    fn test_include_exclude_and_size() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path();
        write(root, "src/keep.rs", "fn keep() {}");
        write(root, "src/gen/skip.rs", "fn skip() {}");
        write(root, "scripts/tool.py", "x = 1");
        write(root, "src/big.rs", &"// pad\n".repeat(100));

        let config = IndexingConfig {
            include_globs: vec!["src/**".into()],
            exclude_globs: vec!["src/gen/**".into()],
            max_file_size: 64,
            ..IndexingConfig::default()
        };
        let files = discover(root, &config).unwrap();
        let paths: Vec<&str> = files.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(paths, vec!["src/keep.rs"]);
    }

    #[test]
    fn test_missing_root_is_error() {
        assert!(discover(Path::new("/nonexistent/root"), &IndexingConfig::default()).is_err());
    }

    #[test]
    fn test_relative_path() {
        let root = Path::new("/repo");
        assert_eq!(
            relative_path(root, Path::new("/repo/src/a.ts")).as_deref(),
            Some("src/a.ts")
        );
        assert!(relative_path(root, Path::new("/elsewhere/a.ts")).is_none());
        assert!(relative_path(root, root).is_none());
    }
}
