//! Indexing progress reporting.
//!
//! Reports observable progress during `ctx init` / `ctx update` so users
//! see what is being scanned, how much is left, and when the index is up
//! to date. Progress is emitted on **stderr** so stdout remains parseable
//! for scripts.

use std::io::{IsTerminal, Write};

/// A single progress event for an indexing pass.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum IndexProgressEvent {
    /// Walking the root. Total unknown.
    Discovering { root: String },
    /// Change detection finished.
    Detected {
        added: u64,
        modified: u64,
        deleted: u64,
        unchanged: u64,
    },
    /// `n` of `total` dirty files parsed, embedded, and written.
    Indexing { n: u64, total: u64 },
}

/// Reports indexing progress. Implementations write to stderr (human or JSON).
pub trait IndexProgressReporter: Send + Sync {
    /// Emit a progress event. Called from the indexing pipeline.
    fn report(&self, event: IndexProgressEvent);
}

/// Human-friendly progress on stderr: "index  1,234 / 5,000 files".
pub struct StderrProgress;

impl IndexProgressReporter for StderrProgress {
    fn report(&self, event: IndexProgressEvent) {
        let line = match &event {
            IndexProgressEvent::Discovering { root } => format!("index {}  discovering...\n", root),
            IndexProgressEvent::Detected {
                added,
                modified,
                deleted,
                unchanged,
            } => format!(
                "index  {} added, {} modified, {} deleted, {} unchanged\n",
                format_number(*added),
                format_number(*modified),
                format_number(*deleted),
                format_number(*unchanged)
            ),
            IndexProgressEvent::Indexing { n, total } => format!(
                "index  {} / {} files\n",
                format_number(*n),
                format_number(*total)
            ),
        };
        let mut stderr = std::io::stderr().lock();
        let _ = stderr.write_all(line.as_bytes());
        let _ = stderr.flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl IndexProgressReporter for JsonProgress {
    fn report(&self, event: IndexProgressEvent) {
        let obj = match &event {
            IndexProgressEvent::Discovering { root } => serde_json::json!({
                "event": "progress",
                "phase": "discovering",
                "root": root
            }),
            IndexProgressEvent::Detected {
                added,
                modified,
                deleted,
                unchanged,
            } => serde_json::json!({
                "event": "progress",
                "phase": "detected",
                "added": added,
                "modified": modified,
                "deleted": deleted,
                "unchanged": unchanged
            }),
            IndexProgressEvent::Indexing { n, total } => serde_json::json!({
                "event": "progress",
                "phase": "indexing",
                "n": n,
                "total": total
            }),
        };
        if let Ok(line) = serde_json::to_string(&obj) {
            let mut stderr = std::io::stderr().lock();
            let _ = writeln!(stderr, "{}", line);
            let _ = stderr.flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl IndexProgressReporter for NoProgress {
    fn report(&self, _event: IndexProgressEvent) {}
}

pub fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    for (i, c) in s.chars().rev().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if std::io::stderr().is_terminal() {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    /// Build a reporter for this mode.
    pub fn reporter(&self) -> Box<dyn IndexProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}
