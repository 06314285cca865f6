//! Content-hash change classification.
//!
//! The classifier is pure: callers hash discovered files (and may skip
//! hashing via version-control metadata), then hand `(path, hash)` pairs
//! and the persisted state to [`classify`]. Every path in
//! `discovered ∪ persisted` lands in exactly one bucket.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use crate::models::{ChangeSet, FileRecord};

/// Read-only view of what the index last recorded.
pub trait PriorState {
    /// Stored content hash for `path`, if the path is indexed.
    fn file_hash(&self, path: &str) -> Option<&str>;

    /// Every indexed path.
    fn paths(&self) -> Vec<&str>;
}

/// In-memory copy of the persisted file records, keyed by path.
#[derive(Debug, Clone, Default)]
pub struct PriorSnapshot {
    hashes: BTreeMap<String, String>,
}

impl PriorSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_records(records: &[FileRecord]) -> Self {
        records
            .iter()
            .map(|r| (r.path.clone(), r.hash.clone()))
            .collect()
    }

    pub fn insert(&mut self, path: impl Into<String>, hash: impl Into<String>) {
        self.hashes.insert(path.into(), hash.into());
    }

    pub fn len(&self) -> usize {
        self.hashes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hashes.is_empty()
    }
}

impl FromIterator<(String, String)> for PriorSnapshot {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self {
            hashes: iter.into_iter().collect(),
        }
    }
}

impl PriorState for PriorSnapshot {
    fn file_hash(&self, path: &str) -> Option<&str> {
        self.hashes.get(path).map(String::as_str)
    }

    fn paths(&self) -> Vec<&str> {
        self.hashes.keys().map(String::as_str).collect()
    }
}

/// Classify hashed discovered files against `prior`.
///
/// A path appearing twice in `hashed` is classified once, using its last
/// hash. `duration` is left at zero for the caller to fill in.
pub fn classify<P: PriorState + ?Sized>(hashed: &[(String, String)], prior: &P) -> ChangeSet {
    let current: BTreeMap<&str, &str> = hashed
        .iter()
        .map(|(path, hash)| (path.as_str(), hash.as_str()))
        .collect();

    let mut set = ChangeSet::default();
    for (&path, &hash) in &current {
        match prior.file_hash(path) {
            None => {
                set.added.push(path.to_string());
                set.hashes.insert(path.to_string(), hash.to_string());
            }
            Some(old) if old != hash => {
                set.modified.push(path.to_string());
                set.hashes.insert(path.to_string(), hash.to_string());
            }
            Some(_) => set.unchanged.push(path.to_string()),
        }
    }

    let deleted: BTreeSet<&str> = prior
        .paths()
        .into_iter()
        .filter(|p| !current.contains_key(p))
        .collect();
    set.deleted = deleted.into_iter().map(String::from).collect();
    set.duration = Duration::ZERO;
    set
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hashed(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(p, h)| (p.to_string(), h.to_string()))
            .collect()
    }

    fn prior(pairs: &[(&str, &str)]) -> PriorSnapshot {
        hashed(pairs).into_iter().collect()
    }

    #[test]
    fn test_first_pass_everything_added() {
        let set = classify(&hashed(&[("b.ts", "2"), ("a.ts", "1")]), &PriorSnapshot::new());
        assert_eq!(set.added, vec!["a.ts", "b.ts"]);
        assert!(set.modified.is_empty() && set.deleted.is_empty() && set.unchanged.is_empty());
        assert_eq!(set.hashes.len(), 2);
    }

    #[test]
    fn test_classifies_each_bucket() {
        let set = classify(
            &hashed(&[("same.ts", "h1"), ("edited.py", "new"), ("fresh.go", "h3")]),
            &prior(&[("same.ts", "h1"), ("edited.py", "old"), ("gone.rs", "h4")]),
        );
        assert_eq!(set.added, vec!["fresh.go"]);
        assert_eq!(set.modified, vec!["edited.py"]);
        assert_eq!(set.unchanged, vec!["same.ts"]);
        assert_eq!(set.deleted, vec!["gone.rs"]);
        assert_eq!(set.hashes.get("edited.py").map(String::as_str), Some("new"));
        assert!(!set.hashes.contains_key("same.ts"));
        assert!(!set.is_empty());
    }

    #[test]
    fn test_no_changes_is_empty() {
        let set = classify(&hashed(&[("a.ts", "1")]), &prior(&[("a.ts", "1")]));
        assert!(set.is_empty());
        assert_eq!(set.unchanged, vec!["a.ts"]);
    }

    #[test]
    fn test_buckets_partition_union() {
        let discovered = hashed(&[("a", "1"), ("b", "2"), ("c", "3"), ("c", "3"), ("d", "9")]);
        let persisted = prior(&[("b", "2"), ("c", "0"), ("e", "5"), ("f", "6")]);
        let set = classify(&discovered, &persisted);

        let mut all: Vec<&String> = set
            .added
            .iter()
            .chain(&set.modified)
            .chain(&set.unchanged)
            .chain(&set.deleted)
            .collect();
        let total = all.len();
        all.sort();
        all.dedup();
        assert_eq!(all.len(), total, "buckets overlap");
        assert_eq!(all, vec!["a", "b", "c", "d", "e", "f"]);
    }
}
