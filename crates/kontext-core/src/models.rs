//! Core data models for code indexing and retrieval.
//!
//! These types flow through the whole pipeline:
//!
//! ```text
//! DiscoveredFile ──▶ AstNode ──▶ Chunk ──▶ ChunkRecord ──▶ SearchResult
//!                    (parser)   (chunker)   (store)         (strategies, fusion)
//! ```
//!
//! [`AstNode`] is ephemeral parser output. [`Chunk`] is the retrieval unit
//! persisted by the store as a [`ChunkRecord`], owned by exactly one
//! [`FileRecord`].

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// The closed set of languages the parser understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    TypeScript,
    JavaScript,
    Python,
    Rust,
    Go,
}

impl Language {
    pub const ALL: [Language; 5] = [
        Language::TypeScript,
        Language::JavaScript,
        Language::Python,
        Language::Rust,
        Language::Go,
    ];

    /// Stable identifier used in the store and on the command line.
    pub fn id(self) -> &'static str {
        match self {
            Language::TypeScript => "typescript",
            Language::JavaScript => "javascript",
            Language::Python => "python",
            Language::Rust => "rust",
            Language::Go => "go",
        }
    }

    /// Parse a language identifier. Accepts the canonical ids and the
    /// common short forms (`ts`, `js`, `py`, `rs`).
    pub fn from_id(id: &str) -> Option<Self> {
        match id.trim().to_ascii_lowercase().as_str() {
            "typescript" | "ts" | "tsx" => Some(Language::TypeScript),
            "javascript" | "js" | "jsx" => Some(Language::JavaScript),
            "python" | "py" => Some(Language::Python),
            "rust" | "rs" => Some(Language::Rust),
            "go" | "golang" => Some(Language::Go),
            _ => None,
        }
    }

    /// Map a file extension (without the dot) to a language.
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "ts" | "tsx" | "mts" | "cts" => Some(Language::TypeScript),
            "js" | "jsx" | "mjs" | "cjs" => Some(Language::JavaScript),
            "py" | "pyi" => Some(Language::Python),
            "rs" => Some(Language::Rust),
            "go" => Some(Language::Go),
            _ => None,
        }
    }

    /// Detect the language of a repo-relative or absolute path.
    pub fn from_path(path: &str) -> Option<Self> {
        let file_name = path.rsplit(['/', '\\']).next().unwrap_or(path);
        let (_, ext) = file_name.rsplit_once('.')?;
        Self::from_extension(ext)
    }

    /// Display label used by the status report (`Typescript`, `Python`, ...).
    pub fn label(self) -> &'static str {
        match self {
            Language::TypeScript => "Typescript",
            Language::JavaScript => "Javascript",
            Language::Python => "Python",
            Language::Rust => "Rust",
            Language::Go => "Go",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

impl FromStr for Language {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Language::from_id(s).ok_or_else(|| format!("unsupported language: {s}"))
    }
}

/// Structural category of a parsed node and of the chunk derived from it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    Function,
    Class,
    Method,
    Type,
    Constant,
    Import,
}

impl NodeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            NodeKind::Function => "function",
            NodeKind::Class => "class",
            NodeKind::Method => "method",
            NodeKind::Type => "type",
            NodeKind::Constant => "constant",
            NodeKind::Import => "import",
        }
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NodeKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "function" | "fn" | "func" => Ok(NodeKind::Function),
            "class" | "struct" => Ok(NodeKind::Class),
            "method" => Ok(NodeKind::Method),
            "type" | "interface" => Ok(NodeKind::Type),
            "constant" | "const" => Ok(NodeKind::Constant),
            "import" => Ok(NodeKind::Import),
            other => Err(format!("unknown node type: {other}")),
        }
    }
}

/// A source file found by discovery, before any parsing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredFile {
    /// Path relative to the indexed root, always `/`-separated.
    pub path: String,
    pub absolute_path: PathBuf,
    pub language: Language,
    pub size: u64,
    /// Modification time as Unix seconds.
    pub last_modified: i64,
}

/// One structural declaration extracted by the parser.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AstNode {
    #[serde(rename = "type")]
    pub kind: NodeKind,
    /// `None` for imports.
    pub name: Option<String>,
    /// 1-indexed, inclusive.
    pub line_start: u32,
    pub line_end: u32,
    /// Enclosing class/struct/impl name for methods.
    pub parent: Option<String>,
    pub params: Vec<String>,
    pub return_type: Option<String>,
    pub docstring: Option<String>,
    pub exports: bool,
    pub text: String,
    pub language: Language,
    /// Referenced module paths (import nodes only).
    pub imports: Vec<String>,
}

/// The persisted retrieval unit derived from one or more [`AstNode`]s.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chunk {
    pub line_start: u32,
    pub line_end: u32,
    #[serde(rename = "type")]
    pub kind: NodeKind,
    pub name: Option<String>,
    pub parent: Option<String>,
    pub text: String,
    /// Modules referenced by the owning file's imports.
    pub imports: Vec<String>,
    pub exports: bool,
    /// SHA-256 hex of `text`.
    pub hash: String,
}

/// File metadata handed to the store on (re)index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileMeta {
    pub path: String,
    pub language: Language,
    /// SHA-256 hex of the whole file.
    pub hash: String,
    pub size: u64,
}

/// A persisted file row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileRecord {
    pub id: i64,
    pub path: String,
    pub language: Language,
    pub hash: String,
    /// Unix seconds.
    pub last_indexed: i64,
    pub size: u64,
}

/// A persisted chunk with its owning file's identity.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkRecord {
    pub id: i64,
    pub file_id: i64,
    pub file_path: String,
    pub language: Language,
    pub chunk: Chunk,
}

impl ChunkRecord {
    /// Project this record into a scored [`SearchResult`].
    pub fn to_result(&self, score: f64) -> SearchResult {
        SearchResult {
            chunk_id: self.id,
            file_path: self.file_path.clone(),
            line_start: self.chunk.line_start,
            line_end: self.chunk.line_end,
            name: self.chunk.name.clone(),
            kind: self.chunk.kind,
            text: self.chunk.text.clone(),
            score,
            language: self.language,
        }
    }
}

/// Uniform output of every strategy and of fusion.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResult {
    pub chunk_id: i64,
    pub file_path: String,
    pub line_start: u32,
    pub line_end: u32,
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub kind: NodeKind,
    pub text: String,
    /// Always within `[0.0, 1.0]`.
    pub score: f64,
    pub language: Language,
}

/// Optional filters every strategy honours. All present filters must match.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchFilters {
    pub language: Option<Language>,
}

impl SearchFilters {
    pub fn language(language: Language) -> Self {
        Self {
            language: Some(language),
        }
    }
}

/// Outcome of one incremental classification pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeSet {
    pub added: Vec<String>,
    pub modified: Vec<String>,
    pub deleted: Vec<String>,
    pub unchanged: Vec<String>,
    /// Content hash for every added or modified path.
    pub hashes: BTreeMap<String, String>,
    #[serde(serialize_with = "serialize_duration_ms", rename = "durationMs")]
    pub duration: Duration,
}

impl ChangeSet {
    /// True when nothing needs to be written.
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.modified.is_empty() && self.deleted.is_empty()
    }

    /// Paths that must be (re)parsed and written, in sorted order.
    pub fn dirty_paths(&self) -> impl Iterator<Item = &String> {
        self.added.iter().chain(self.modified.iter())
    }
}

fn serialize_duration_ms<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(d.as_millis() as u64)
}

/// What happened to a watched path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Added,
    Modified,
    Deleted,
}

/// A single changed-file notification from the watcher front-end.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FileChange {
    /// Repo-relative path.
    pub path: String,
    pub kind: ChangeKind,
}

/// Aggregate counts reported by the store.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreStats {
    pub file_count: u64,
    pub chunk_count: u64,
    pub vector_count: u64,
    /// File count per language.
    pub languages: BTreeMap<Language, u64>,
    /// Most recent `last_indexed` across all files.
    pub last_indexed: Option<i64>,
}
