//! Storage abstraction for Kontext.
//!
//! The [`Store`] trait is the only path to persisted index state. The
//! indexing pipeline writes through it and every retrieval strategy reads
//! through it, so backends (SQLite in the app crate, [`memory`] for tests)
//! are interchangeable.
//!
//! # Consistency contract
//!
//! - Whole-file replacement is the only mutation granularity for chunks
//!   and vectors. [`Store::replace_file`] swaps a file's record, chunk set,
//!   lexical rows, and vectors as one atomic unit; readers see either the
//!   old complete set or the new one.
//! - [`Store::delete_file`] removes a file and everything it owns.
//! - No chunk or vector outlives its owning file.
//!
//! Implementations must be `Send + Sync` and serialize writers internally.

pub mod memory;

use async_trait::async_trait;

use crate::error::DatabaseError;
use crate::models::{
    Chunk, ChunkRecord, FileMeta, FileRecord, Language, NodeKind, SearchFilters, StoreStats,
};

/// A chunk paired with the backend's native relevance score.
#[derive(Debug, Clone)]
pub struct ScoredChunk {
    pub record: ChunkRecord,
    /// Higher is better. BM25 relevance for lexical queries, cosine
    /// similarity for vector queries.
    pub raw_score: f64,
}

/// One lexical query term.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LexicalTerm {
    /// Lowercased word made of alphanumerics and underscores.
    pub text: String,
    /// Match any indexed token starting with `text`.
    pub prefix: bool,
}

/// A tokenized keyword query. Terms are OR-ed; relevance ranks chunks
/// matching more (and rarer) terms higher.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LexicalQuery {
    pub terms: Vec<LexicalTerm>,
}

/// How a symbol name is compared against stored chunk names.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MatchMode {
    /// Case-sensitive equality.
    Exact,
    /// Case-sensitive prefix.
    Prefix,
    /// Case-insensitive substring containment.
    #[default]
    Fuzzy,
}

/// Structural filter over stored chunks. Present fields compose as AND.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SymbolQuery {
    pub name: Option<String>,
    pub mode: MatchMode,
    pub kind: Option<NodeKind>,
    pub parent: Option<String>,
    pub language: Option<Language>,
}

/// Abstract storage backend for Kontext.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`upsert_file`](Store::upsert_file) | Insert or update a file record |
/// | [`insert_chunks`](Store::insert_chunks) | Replace a file's chunk set |
/// | [`insert_vector`](Store::insert_vector) | Attach an embedding to a chunk |
/// | [`replace_file`](Store::replace_file) | Atomic file + chunks + vectors swap |
/// | [`delete_file`](Store::delete_file) | Remove a file and everything it owns |
/// | [`lexical_search`](Store::lexical_search) | Keyword relevance query |
/// | [`nearest_vectors`](Store::nearest_vectors) | Cosine nearest neighbours |
/// | [`symbol_query`](Store::symbol_query) | Name/type/parent/language filter |
/// | [`file_paths`](Store::file_paths) | Candidate paths for path matching |
/// | [`import_query`](Store::import_query) | Import chunks referencing a module |
#[async_trait]
pub trait Store: Send + Sync {
    /// Insert or update a file record, returning its id. Sets
    /// `last_indexed` to now.
    async fn upsert_file(&self, file: &FileMeta) -> Result<i64, DatabaseError>;

    async fn get_file(&self, path: &str) -> Result<Option<FileRecord>, DatabaseError>;

    /// All indexed paths, sorted.
    async fn get_all_file_paths(&self) -> Result<Vec<String>, DatabaseError>;

    /// All file records, sorted by path.
    async fn list_files(&self) -> Result<Vec<FileRecord>, DatabaseError>;

    /// Replace the whole chunk set of `file_id` atomically, dropping the
    /// previous chunks' lexical rows and vectors. Returns new chunk ids in
    /// input order.
    async fn insert_chunks(&self, file_id: i64, chunks: &[Chunk]) -> Result<Vec<i64>, DatabaseError>;

    /// Store the embedding for an existing chunk.
    async fn insert_vector(&self, chunk_id: i64, embedding: &[f32]) -> Result<(), DatabaseError>;

    /// Upsert `file` and replace its chunks and vectors in one transaction.
    ///
    /// `vectors`, when present, is parallel to `chunks`.
    async fn replace_file(
        &self,
        file: &FileMeta,
        chunks: &[Chunk],
        vectors: Option<&[Vec<f32>]>,
    ) -> Result<Vec<i64>, DatabaseError>;

    /// Remove a file with its chunks, lexical rows, and vectors. Returns
    /// false when the path was not indexed.
    async fn delete_file(&self, path: &str) -> Result<bool, DatabaseError>;

    /// Keyword query ranked by BM25-style relevance, best first, ties by
    /// chunk id.
    async fn lexical_search(
        &self,
        query: &LexicalQuery,
        limit: usize,
        filters: &SearchFilters,
    ) -> Result<Vec<ScoredChunk>, DatabaseError>;

    /// Brute-force or indexed cosine nearest neighbours, best first.
    async fn nearest_vectors(
        &self,
        query: &[f32],
        limit: usize,
        filters: &SearchFilters,
    ) -> Result<Vec<ScoredChunk>, DatabaseError>;

    /// Chunks satisfying every field of `query`, ordered by chunk id.
    async fn symbol_query(
        &self,
        query: &SymbolQuery,
        limit: usize,
    ) -> Result<Vec<ChunkRecord>, DatabaseError>;

    /// Indexed paths passing `filters`, sorted.
    async fn file_paths(&self, filters: &SearchFilters) -> Result<Vec<String>, DatabaseError>;

    /// Chunks owned by any of `paths`, ordered by path then line.
    async fn chunks_for_files(
        &self,
        paths: &[String],
        limit: usize,
    ) -> Result<Vec<ChunkRecord>, DatabaseError>;

    /// Import chunks whose import list contains `needle`
    /// (case-insensitive substring), ordered by chunk id.
    async fn import_query(
        &self,
        needle: &str,
        limit: usize,
        filters: &SearchFilters,
    ) -> Result<Vec<ChunkRecord>, DatabaseError>;

    /// Every chunk of one file ordered by line. Empty for unknown paths.
    async fn chunks_for_file(&self, path: &str) -> Result<Vec<ChunkRecord>, DatabaseError>;

    async fn stats(&self) -> Result<StoreStats, DatabaseError>;

    async fn get_meta(&self, key: &str) -> Result<Option<String>, DatabaseError>;

    /// Set (or with `None`, clear) a metadata key.
    async fn set_meta(&self, key: &str, value: Option<&str>) -> Result<(), DatabaseError>;
}
