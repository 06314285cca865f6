//! In-memory [`Store`] implementation for tests and embedding hosts.
//!
//! All state sits behind one `std::sync::RwLock`, so every mutation is
//! atomic with respect to readers. Lexical search is an in-process BM25
//! over the same token stream the SQLite FTS index sees; vector search is
//! brute-force cosine similarity.

use std::collections::{BTreeMap, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;

use crate::embedding::cosine_similarity;
use crate::error::DatabaseError;
use crate::models::{
    Chunk, ChunkRecord, FileMeta, FileRecord, NodeKind, SearchFilters, StoreStats,
};
use crate::search::lexical::{index_terms, tokenize};

use super::{LexicalQuery, MatchMode, ScoredChunk, Store, SymbolQuery};

/// BM25 term-frequency saturation.
const K1: f64 = 1.2;
/// BM25 length normalization.
const B: f64 = 0.75;

#[derive(Default)]
struct Inner {
    next_file_id: i64,
    next_chunk_id: i64,
    files: BTreeMap<String, FileRecord>,
    chunks: BTreeMap<i64, StoredChunk>,
    vectors: HashMap<i64, Vec<f32>>,
    meta: HashMap<String, String>,
}

struct StoredChunk {
    file_id: i64,
    chunk: Chunk,
    tokens: Vec<String>,
}

/// In-memory store for tests.
#[derive(Default)]
pub struct InMemoryStore {
    inner: RwLock<Inner>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Inner>, DatabaseError> {
        self.inner
            .read()
            .map_err(|_| DatabaseError::Consistency("store lock poisoned".into()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Inner>, DatabaseError> {
        self.inner
            .write()
            .map_err(|_| DatabaseError::Consistency("store lock poisoned".into()))
    }
}

fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

fn chunk_tokens(chunk: &Chunk) -> Vec<String> {
    let name = chunk.name.as_deref().unwrap_or("");
    let parent = chunk.parent.as_deref().unwrap_or("");
    let terms = index_terms(&[name, parent, &chunk.text]);
    tokenize(name)
        .chain(tokenize(parent))
        .chain(tokenize(&chunk.text))
        .chain(tokenize(&terms))
        .collect()
}

impl Inner {
    fn upsert_file(&mut self, file: &FileMeta) -> i64 {
        let now = now_secs();
        if let Some(existing) = self.files.get_mut(&file.path) {
            existing.language = file.language;
            existing.hash = file.hash.clone();
            existing.size = file.size;
            existing.last_indexed = now;
            return existing.id;
        }
        self.next_file_id += 1;
        let id = self.next_file_id;
        self.files.insert(
            file.path.clone(),
            FileRecord {
                id,
                path: file.path.clone(),
                language: file.language,
                hash: file.hash.clone(),
                last_indexed: now,
                size: file.size,
            },
        );
        id
    }

    fn drop_chunks(&mut self, file_id: i64) {
        let owned: Vec<i64> = self
            .chunks
            .iter()
            .filter(|(_, c)| c.file_id == file_id)
            .map(|(id, _)| *id)
            .collect();
        for id in owned {
            self.chunks.remove(&id);
            self.vectors.remove(&id);
        }
    }

    fn insert_chunks(&mut self, file_id: i64, chunks: &[Chunk]) -> Vec<i64> {
        self.drop_chunks(file_id);
        chunks
            .iter()
            .map(|chunk| {
                self.next_chunk_id += 1;
                let id = self.next_chunk_id;
                self.chunks.insert(
                    id,
                    StoredChunk {
                        file_id,
                        tokens: chunk_tokens(chunk),
                        chunk: chunk.clone(),
                    },
                );
                id
            })
            .collect()
    }

    fn file_by_id(&self, file_id: i64) -> Option<&FileRecord> {
        self.files.values().find(|f| f.id == file_id)
    }

    fn record(&self, id: i64, stored: &StoredChunk) -> Option<ChunkRecord> {
        let file = self.file_by_id(stored.file_id)?;
        Some(ChunkRecord {
            id,
            file_id: file.id,
            file_path: file.path.clone(),
            language: file.language,
            chunk: stored.chunk.clone(),
        })
    }

    fn passes(&self, stored: &StoredChunk, filters: &SearchFilters) -> bool {
        match (filters.language, self.file_by_id(stored.file_id)) {
            (Some(lang), Some(file)) => file.language == lang,
            (None, Some(_)) => true,
            (_, None) => false,
        }
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn upsert_file(&self, file: &FileMeta) -> Result<i64, DatabaseError> {
        Ok(self.write()?.upsert_file(file))
    }

    async fn get_file(&self, path: &str) -> Result<Option<FileRecord>, DatabaseError> {
        Ok(self.read()?.files.get(path).cloned())
    }

    async fn get_all_file_paths(&self) -> Result<Vec<String>, DatabaseError> {
        Ok(self.read()?.files.keys().cloned().collect())
    }

    async fn list_files(&self) -> Result<Vec<FileRecord>, DatabaseError> {
        Ok(self.read()?.files.values().cloned().collect())
    }

    async fn insert_chunks(
        &self,
        file_id: i64,
        chunks: &[Chunk],
    ) -> Result<Vec<i64>, DatabaseError> {
        let mut inner = self.write()?;
        if inner.file_by_id(file_id).is_none() {
            return Err(DatabaseError::Consistency(format!(
                "chunks for unknown file id {file_id}"
            )));
        }
        Ok(inner.insert_chunks(file_id, chunks))
    }

    async fn insert_vector(&self, chunk_id: i64, embedding: &[f32]) -> Result<(), DatabaseError> {
        let mut inner = self.write()?;
        if !inner.chunks.contains_key(&chunk_id) {
            return Err(DatabaseError::Consistency(format!(
                "vector for unknown chunk id {chunk_id}"
            )));
        }
        inner.vectors.insert(chunk_id, embedding.to_vec());
        Ok(())
    }

    async fn replace_file(
        &self,
        file: &FileMeta,
        chunks: &[Chunk],
        vectors: Option<&[Vec<f32>]>,
    ) -> Result<Vec<i64>, DatabaseError> {
        let mut inner = self.write()?;
        let file_id = inner.upsert_file(file);
        let ids = inner.insert_chunks(file_id, chunks);
        if let Some(vectors) = vectors {
            for (id, vector) in ids.iter().zip(vectors) {
                inner.vectors.insert(*id, vector.clone());
            }
        }
        Ok(ids)
    }

    async fn delete_file(&self, path: &str) -> Result<bool, DatabaseError> {
        let mut inner = self.write()?;
        match inner.files.remove(path) {
            Some(file) => {
                inner.drop_chunks(file.id);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn lexical_search(
        &self,
        query: &LexicalQuery,
        limit: usize,
        filters: &SearchFilters,
    ) -> Result<Vec<ScoredChunk>, DatabaseError> {
        let inner = self.read()?;
        let n = inner.chunks.len() as f64;
        if n == 0.0 || query.terms.is_empty() {
            return Ok(Vec::new());
        }
        let avg_len = inner
            .chunks
            .values()
            .map(|c| c.tokens.len() as f64)
            .sum::<f64>()
            / n;

        let term_freq = |tokens: &[String], term: &crate::store::LexicalTerm| -> f64 {
            tokens
                .iter()
                .filter(|t| {
                    if term.prefix {
                        t.starts_with(&term.text)
                    } else {
                        **t == term.text
                    }
                })
                .count() as f64
        };

        let idf: Vec<f64> = query
            .terms
            .iter()
            .map(|term| {
                let df = inner
                    .chunks
                    .values()
                    .filter(|c| term_freq(&c.tokens, term) > 0.0)
                    .count() as f64;
                ((n - df + 0.5) / (df + 0.5) + 1.0).ln()
            })
            .collect();

        let mut hits: Vec<ScoredChunk> = Vec::new();
        for (id, stored) in &inner.chunks {
            if !inner.passes(stored, filters) {
                continue;
            }
            let len = stored.tokens.len() as f64;
            let mut score = 0.0;
            for (term, idf) in query.terms.iter().zip(&idf) {
                let tf = term_freq(&stored.tokens, term);
                if tf > 0.0 {
                    score += idf * (tf * (K1 + 1.0))
                        / (tf + K1 * (1.0 - B + B * (len / avg_len.max(1.0))));
                }
            }
            if score > 0.0 {
                if let Some(record) = inner.record(*id, stored) {
                    hits.push(ScoredChunk {
                        record,
                        raw_score: score,
                    });
                }
            }
        }

        hits.sort_by(|a, b| {
            b.raw_score
                .partial_cmp(&a.raw_score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.record.id.cmp(&b.record.id))
        });
        hits.truncate(limit);
        Ok(hits)
    }

    async fn nearest_vectors(
        &self,
        query: &[f32],
        limit: usize,
        filters: &SearchFilters,
    ) -> Result<Vec<ScoredChunk>, DatabaseError> {
        let inner = self.read()?;
        let mut hits: Vec<ScoredChunk> = inner
            .vectors
            .iter()
            .filter(|(_, v)| v.len() == query.len())
            .filter_map(|(id, v)| {
                let stored = inner.chunks.get(id)?;
                if !inner.passes(stored, filters) {
                    return None;
                }
                Some(ScoredChunk {
                    record: inner.record(*id, stored)?,
                    raw_score: cosine_similarity(query, v) as f64,
                })
            })
            .collect();
        hits.sort_by(|a, b| {
            b.raw_score
                .partial_cmp(&a.raw_score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.record.id.cmp(&b.record.id))
        });
        hits.truncate(limit);
        Ok(hits)
    }

    async fn symbol_query(
        &self,
        query: &SymbolQuery,
        limit: usize,
    ) -> Result<Vec<ChunkRecord>, DatabaseError> {
        let inner = self.read()?;
        let filters = SearchFilters {
            language: query.language,
        };
        let name_matches = |name: Option<&str>| -> bool {
            let Some(wanted) = query.name.as_deref() else {
                return true;
            };
            let Some(name) = name else {
                return false;
            };
            match query.mode {
                MatchMode::Exact => name == wanted,
                MatchMode::Prefix => name.starts_with(wanted),
                MatchMode::Fuzzy => name.to_lowercase().contains(&wanted.to_lowercase()),
            }
        };

        Ok(inner
            .chunks
            .iter()
            .filter(|(_, c)| inner.passes(c, &filters))
            .filter(|(_, c)| query.kind.map_or(true, |k| c.chunk.kind == k))
            .filter(|(_, c)| {
                query
                    .parent
                    .as_deref()
                    .map_or(true, |p| c.chunk.parent.as_deref() == Some(p))
            })
            .filter(|(_, c)| name_matches(c.chunk.name.as_deref()))
            .filter_map(|(id, c)| inner.record(*id, c))
            .take(limit)
            .collect())
    }

    async fn file_paths(&self, filters: &SearchFilters) -> Result<Vec<String>, DatabaseError> {
        Ok(self
            .read()?
            .files
            .values()
            .filter(|f| filters.language.map_or(true, |l| f.language == l))
            .map(|f| f.path.clone())
            .collect())
    }

    async fn chunks_for_files(
        &self,
        paths: &[String],
        limit: usize,
    ) -> Result<Vec<ChunkRecord>, DatabaseError> {
        let inner = self.read()?;
        let mut records: Vec<ChunkRecord> = inner
            .chunks
            .iter()
            .filter_map(|(id, c)| inner.record(*id, c))
            .filter(|r| paths.contains(&r.file_path))
            .collect();
        records.sort_by(|a, b| {
            a.file_path
                .cmp(&b.file_path)
                .then(a.chunk.line_start.cmp(&b.chunk.line_start))
                .then(a.id.cmp(&b.id))
        });
        records.truncate(limit);
        Ok(records)
    }

    async fn import_query(
        &self,
        needle: &str,
        limit: usize,
        filters: &SearchFilters,
    ) -> Result<Vec<ChunkRecord>, DatabaseError> {
        let inner = self.read()?;
        let needle = needle.to_lowercase();
        Ok(inner
            .chunks
            .iter()
            .filter(|(_, c)| c.chunk.kind == NodeKind::Import && inner.passes(c, filters))
            .filter(|(_, c)| {
                c.chunk
                    .imports
                    .iter()
                    .any(|i| i.to_lowercase().contains(&needle))
            })
            .filter_map(|(id, c)| inner.record(*id, c))
            .take(limit)
            .collect())
    }

    async fn chunks_for_file(&self, path: &str) -> Result<Vec<ChunkRecord>, DatabaseError> {
        self.chunks_for_files(&[path.to_string()], usize::MAX).await
    }

    async fn stats(&self) -> Result<StoreStats, DatabaseError> {
        let inner = self.read()?;
        let mut languages = BTreeMap::new();
        for file in inner.files.values() {
            *languages.entry(file.language).or_insert(0) += 1;
        }
        Ok(StoreStats {
            file_count: inner.files.len() as u64,
            chunk_count: inner.chunks.len() as u64,
            vector_count: inner.vectors.len() as u64,
            languages,
            last_indexed: inner.files.values().map(|f| f.last_indexed).max(),
        })
    }

    async fn get_meta(&self, key: &str) -> Result<Option<String>, DatabaseError> {
        Ok(self.read()?.meta.get(key).cloned())
    }

    async fn set_meta(&self, key: &str, value: Option<&str>) -> Result<(), DatabaseError> {
        let mut inner = self.write()?;
        match value {
            Some(v) => {
                inner.meta.insert(key.to_string(), v.to_string());
            }
            None => {
                inner.meta.remove(key);
            }
        }
        Ok(())
    }
}
