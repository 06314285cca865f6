//! SQLite-backed [`Store`] implementation.
//!
//! Every write that touches a file's chunks runs in one transaction, so a
//! concurrent reader sees either the old chunk set or the new one. SQLite
//! serializes writers; WAL lets readers proceed meanwhile.
//!
//! Lexical search goes through the `chunks_fts` FTS5 table and its BM25
//! ranking. Vector search is brute-force cosine over `chunk_vectors`.

use std::collections::BTreeMap;
use std::path::Path;

use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool, Transaction};

use kontext_core::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use kontext_core::error::DatabaseError;
use kontext_core::models::{
    Chunk, ChunkRecord, FileMeta, FileRecord, Language, NodeKind, SearchFilters, StoreStats,
};
use kontext_core::search::lexical::index_terms;
use kontext_core::store::{LexicalQuery, MatchMode, ScoredChunk, Store, SymbolQuery};

use crate::db;
use crate::migrate::{self, MigrationOutcome};

const CHUNK_SELECT: &str = r#"
    SELECT c.id, c.file_id, f.path, f.language, c.line_start, c.line_end, c.kind,
           c.name, c.parent, c.text, c.imports, c.exports, c.hash
    FROM chunks c
    JOIN files f ON f.id = c.file_id
"#;

/// SQLite implementation of the [`Store`] trait.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Connect to `db_path` and bring its schema up to date.
    pub async fn open(db_path: &Path) -> Result<(Self, MigrationOutcome), DatabaseError> {
        let pool = db::connect(db_path).await?;
        let outcome = migrate::run_migrations(&pool).await?;
        Ok((Self { pool }, outcome))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// The smallest chunk of `path` whose line range contains `line`.
    pub async fn chunk_at(&self, path: &str, line: u32) -> Result<Option<ChunkRecord>, DatabaseError> {
        let sql = format!(
            "{CHUNK_SELECT} WHERE f.path = ? AND c.line_start <= ? AND c.line_end >= ? \
             ORDER BY (c.line_end - c.line_start) ASC, c.id ASC LIMIT 1"
        );
        let row = sqlx::query(&sql)
            .bind(path)
            .bind(i64::from(line))
            .bind(i64::from(line))
            .fetch_optional(&self.pool)
            .await
            .map_err(DatabaseError::backend)?;
        row.as_ref().map(record_from_row).transpose()
    }

    /// Drop every stored embedding, e.g. after the embedding model changed.
    pub async fn clear_vectors(&self) -> Result<u64, DatabaseError> {
        let result = sqlx::query("DELETE FROM chunk_vectors")
            .execute(&self.pool)
            .await
            .map_err(DatabaseError::backend)?;
        Ok(result.rows_affected())
    }
}

fn col<'r, T>(row: &'r SqliteRow, name: &str) -> Result<T, DatabaseError>
where
    T: sqlx::Decode<'r, Sqlite> + sqlx::Type<Sqlite>,
{
    row.try_get(name).map_err(DatabaseError::backend)
}

fn parse_language(id: &str) -> Result<Language, DatabaseError> {
    Language::from_id(id)
        .ok_or_else(|| DatabaseError::Consistency(format!("unknown language in index: {id}")))
}

fn record_from_row(row: &SqliteRow) -> Result<ChunkRecord, DatabaseError> {
    let language: String = col(row, "language")?;
    let kind: String = col(row, "kind")?;
    let imports: String = col(row, "imports")?;
    let line_start: i64 = col(row, "line_start")?;
    let line_end: i64 = col(row, "line_end")?;

    Ok(ChunkRecord {
        id: col(row, "id")?,
        file_id: col(row, "file_id")?,
        file_path: col(row, "path")?,
        language: parse_language(&language)?,
        chunk: Chunk {
            line_start: line_start as u32,
            line_end: line_end as u32,
            kind: kind.parse::<NodeKind>().map_err(DatabaseError::Consistency)?,
            name: col(row, "name")?,
            parent: col(row, "parent")?,
            text: col(row, "text")?,
            imports: serde_json::from_str(&imports).map_err(DatabaseError::backend)?,
            exports: col(row, "exports")?,
            hash: col(row, "hash")?,
        },
    })
}

fn file_from_row(row: &SqliteRow) -> Result<FileRecord, DatabaseError> {
    let language: String = col(row, "language")?;
    let size: i64 = col(row, "size")?;
    Ok(FileRecord {
        id: col(row, "id")?,
        path: col(row, "path")?,
        language: parse_language(&language)?,
        hash: col(row, "hash")?,
        last_indexed: col(row, "last_indexed")?,
        size: size.max(0) as u64,
    })
}

fn sql_limit(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

/// Render lexical terms as an FTS5 MATCH expression: each term quoted,
/// prefix terms starred, all OR-ed.
pub fn fts_match_expression(query: &LexicalQuery) -> String {
    query
        .terms
        .iter()
        .map(|t| {
            let quoted = format!("\"{}\"", t.text.replace('"', "\"\""));
            if t.prefix {
                format!("{quoted}*")
            } else {
                quoted
            }
        })
        .collect::<Vec<_>>()
        .join(" OR ")
}

async fn upsert_file_tx(tx: &mut Transaction<'_, Sqlite>, file: &FileMeta) -> Result<i64, sqlx::Error> {
    let now = chrono::Utc::now().timestamp();
    sqlx::query_scalar(
        r#"
        INSERT INTO files (path, language, hash, last_indexed, size)
        VALUES (?, ?, ?, ?, ?)
        ON CONFLICT(path) DO UPDATE SET
            language = excluded.language,
            hash = excluded.hash,
            last_indexed = excluded.last_indexed,
            size = excluded.size
        RETURNING id
        "#,
    )
    .bind(&file.path)
    .bind(file.language.id())
    .bind(&file.hash)
    .bind(now)
    .bind(i64::try_from(file.size).unwrap_or(i64::MAX))
    .fetch_one(&mut **tx)
    .await
}

async fn delete_chunks_tx(tx: &mut Transaction<'_, Sqlite>, file_id: i64) -> Result<(), sqlx::Error> {
    sqlx::query(
        "DELETE FROM chunks_fts WHERE chunk_id IN (SELECT id FROM chunks WHERE file_id = ?)",
    )
    .bind(file_id)
    .execute(&mut **tx)
    .await?;

    sqlx::query(
        "DELETE FROM chunk_vectors WHERE chunk_id IN (SELECT id FROM chunks WHERE file_id = ?)",
    )
    .bind(file_id)
    .execute(&mut **tx)
    .await?;

    sqlx::query("DELETE FROM chunks WHERE file_id = ?")
        .bind(file_id)
        .execute(&mut **tx)
        .await?;
    Ok(())
}

async fn insert_chunks_tx(
    tx: &mut Transaction<'_, Sqlite>,
    file_id: i64,
    chunks: &[Chunk],
    vectors: Option<&[Vec<f32>]>,
) -> Result<Vec<i64>, sqlx::Error> {
    let mut ids = Vec::with_capacity(chunks.len());
    for (i, chunk) in chunks.iter().enumerate() {
        let imports = serde_json::to_string(&chunk.imports).unwrap_or_else(|_| "[]".to_string());
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO chunks (file_id, line_start, line_end, kind, name, parent, text,
                                imports, exports, hash)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING id
            "#,
        )
        .bind(file_id)
        .bind(i64::from(chunk.line_start))
        .bind(i64::from(chunk.line_end))
        .bind(chunk.kind.as_str())
        .bind(&chunk.name)
        .bind(&chunk.parent)
        .bind(&chunk.text)
        .bind(imports)
        .bind(chunk.exports)
        .bind(&chunk.hash)
        .fetch_one(&mut **tx)
        .await?;

        let name = chunk.name.as_deref().unwrap_or("");
        let parent = chunk.parent.as_deref().unwrap_or("");
        sqlx::query(
            "INSERT INTO chunks_fts (chunk_id, name, parent, text, terms) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(id)
        .bind(name)
        .bind(parent)
        .bind(&chunk.text)
        .bind(index_terms(&[name, parent, &chunk.text]))
        .execute(&mut **tx)
        .await?;

        if let Some(vector) = vectors.and_then(|v| v.get(i)) {
            insert_vector_tx(tx, id, vector).await?;
        }
        ids.push(id);
    }
    Ok(ids)
}

async fn insert_vector_tx(
    tx: &mut Transaction<'_, Sqlite>,
    chunk_id: i64,
    vector: &[f32],
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO chunk_vectors (chunk_id, dims, embedding)
        VALUES (?, ?, ?)
        ON CONFLICT(chunk_id) DO UPDATE SET
            dims = excluded.dims,
            embedding = excluded.embedding
        "#,
    )
    .bind(chunk_id)
    .bind(vector.len() as i64)
    .bind(vec_to_blob(vector))
    .execute(&mut **tx)
    .await?;
    Ok(())
}

#[async_trait]
impl Store for SqliteStore {
    async fn upsert_file(&self, file: &FileMeta) -> Result<i64, DatabaseError> {
        let mut tx = self.pool.begin().await.map_err(DatabaseError::backend)?;
        let id = upsert_file_tx(&mut tx, file)
            .await
            .map_err(DatabaseError::backend)?;
        tx.commit().await.map_err(DatabaseError::backend)?;
        Ok(id)
    }

    async fn get_file(&self, path: &str) -> Result<Option<FileRecord>, DatabaseError> {
        let row = sqlx::query(
            "SELECT id, path, language, hash, last_indexed, size FROM files WHERE path = ?",
        )
        .bind(path)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::backend)?;
        row.as_ref().map(file_from_row).transpose()
    }

    async fn get_all_file_paths(&self) -> Result<Vec<String>, DatabaseError> {
        sqlx::query_scalar("SELECT path FROM files ORDER BY path")
            .fetch_all(&self.pool)
            .await
            .map_err(DatabaseError::backend)
    }

    async fn list_files(&self) -> Result<Vec<FileRecord>, DatabaseError> {
        let rows = sqlx::query(
            "SELECT id, path, language, hash, last_indexed, size FROM files ORDER BY path",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::backend)?;
        rows.iter().map(file_from_row).collect()
    }

    async fn insert_chunks(&self, file_id: i64, chunks: &[Chunk]) -> Result<Vec<i64>, DatabaseError> {
        let mut tx = self.pool.begin().await.map_err(DatabaseError::backend)?;
        // A no-op write first: a deferred transaction that reads before it
        // writes cannot wait out a concurrent writer under WAL.
        let touched = sqlx::query("UPDATE files SET last_indexed = last_indexed WHERE id = ?")
            .bind(file_id)
            .execute(&mut *tx)
            .await
            .map_err(DatabaseError::backend)?;
        if touched.rows_affected() == 0 {
            return Err(DatabaseError::Consistency(format!(
                "chunks for unknown file id {file_id}"
            )));
        }
        delete_chunks_tx(&mut tx, file_id)
            .await
            .map_err(DatabaseError::backend)?;
        let ids = insert_chunks_tx(&mut tx, file_id, chunks, None)
            .await
            .map_err(DatabaseError::backend)?;
        tx.commit().await.map_err(DatabaseError::backend)?;
        Ok(ids)
    }

    async fn insert_vector(&self, chunk_id: i64, embedding: &[f32]) -> Result<(), DatabaseError> {
        let written = sqlx::query(
            r#"
            INSERT INTO chunk_vectors (chunk_id, dims, embedding)
            SELECT ?, ?, ? WHERE EXISTS (SELECT 1 FROM chunks WHERE id = ?)
            ON CONFLICT(chunk_id) DO UPDATE SET
                dims = excluded.dims,
                embedding = excluded.embedding
            "#,
        )
        .bind(chunk_id)
        .bind(embedding.len() as i64)
        .bind(vec_to_blob(embedding))
        .bind(chunk_id)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::backend)?;
        if written.rows_affected() == 0 {
            return Err(DatabaseError::Consistency(format!(
                "vector for unknown chunk id {chunk_id}"
            )));
        }
        Ok(())
    }

    async fn replace_file(
        &self,
        file: &FileMeta,
        chunks: &[Chunk],
        vectors: Option<&[Vec<f32>]>,
    ) -> Result<Vec<i64>, DatabaseError> {
        if let Some(v) = vectors {
            if v.len() != chunks.len() {
                return Err(DatabaseError::Consistency(format!(
                    "{} vectors for {} chunks of {}",
                    v.len(),
                    chunks.len(),
                    file.path
                )));
            }
        }

        let mut tx = self.pool.begin().await.map_err(DatabaseError::backend)?;
        let file_id = upsert_file_tx(&mut tx, file)
            .await
            .map_err(DatabaseError::backend)?;
        delete_chunks_tx(&mut tx, file_id)
            .await
            .map_err(DatabaseError::backend)?;
        let ids = insert_chunks_tx(&mut tx, file_id, chunks, vectors)
            .await
            .map_err(DatabaseError::backend)?;
        tx.commit().await.map_err(DatabaseError::backend)?;
        Ok(ids)
    }

    async fn delete_file(&self, path: &str) -> Result<bool, DatabaseError> {
        let mut tx = self.pool.begin().await.map_err(DatabaseError::backend)?;
        // Writes only, keyed by path, so the transaction takes the write
        // lock on its first statement.
        for stmt in [
            "DELETE FROM chunks_fts WHERE chunk_id IN \
             (SELECT c.id FROM chunks c JOIN files f ON f.id = c.file_id WHERE f.path = ?)",
            "DELETE FROM chunk_vectors WHERE chunk_id IN \
             (SELECT c.id FROM chunks c JOIN files f ON f.id = c.file_id WHERE f.path = ?)",
            "DELETE FROM chunks WHERE file_id IN (SELECT id FROM files WHERE path = ?)",
        ] {
            sqlx::query(stmt)
                .bind(path)
                .execute(&mut *tx)
                .await
                .map_err(DatabaseError::backend)?;
        }
        let removed = sqlx::query("DELETE FROM files WHERE path = ?")
            .bind(path)
            .execute(&mut *tx)
            .await
            .map_err(DatabaseError::backend)?;
        tx.commit().await.map_err(DatabaseError::backend)?;
        Ok(removed.rows_affected() > 0)
    }

    async fn lexical_search(
        &self,
        query: &LexicalQuery,
        limit: usize,
        filters: &SearchFilters,
    ) -> Result<Vec<ScoredChunk>, DatabaseError> {
        if query.terms.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }

        // Column weights: chunk_id, name, parent, text, terms.
        let mut qb = QueryBuilder::<Sqlite>::new(
            r#"
            SELECT c.id, c.file_id, f.path, f.language, c.line_start, c.line_end, c.kind,
                   c.name, c.parent, c.text, c.imports, c.exports, c.hash,
                   bm25(chunks_fts, 0.0, 4.0, 2.0, 1.0, 1.0) AS rank
            FROM chunks_fts
            JOIN chunks c ON c.id = chunks_fts.chunk_id
            JOIN files f ON f.id = c.file_id
            WHERE chunks_fts MATCH "#,
        );
        qb.push_bind(fts_match_expression(query));
        if let Some(lang) = filters.language {
            qb.push(" AND f.language = ").push_bind(lang.id());
        }
        qb.push(" ORDER BY rank ASC, c.id ASC LIMIT ")
            .push_bind(sql_limit(limit));

        let rows = qb
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(DatabaseError::backend)?;

        rows.iter()
            .map(|row| {
                let rank: f64 = col(row, "rank")?;
                Ok(ScoredChunk {
                    record: record_from_row(row)?,
                    raw_score: -rank,
                })
            })
            .collect()
    }

    async fn nearest_vectors(
        &self,
        query: &[f32],
        limit: usize,
        filters: &SearchFilters,
    ) -> Result<Vec<ScoredChunk>, DatabaseError> {
        if query.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }

        let mut qb = QueryBuilder::<Sqlite>::new(
            r#"
            SELECT c.id, c.file_id, f.path, f.language, c.line_start, c.line_end, c.kind,
                   c.name, c.parent, c.text, c.imports, c.exports, c.hash, cv.embedding
            FROM chunk_vectors cv
            JOIN chunks c ON c.id = cv.chunk_id
            JOIN files f ON f.id = c.file_id
            WHERE cv.dims = "#,
        );
        qb.push_bind(query.len() as i64);
        if let Some(lang) = filters.language {
            qb.push(" AND f.language = ").push_bind(lang.id());
        }

        let rows = qb
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(DatabaseError::backend)?;

        let mut hits = rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = col(row, "embedding")?;
                Ok(ScoredChunk {
                    record: record_from_row(row)?,
                    raw_score: cosine_similarity(query, &blob_to_vec(&blob)) as f64,
                })
            })
            .collect::<Result<Vec<_>, DatabaseError>>()?;

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
        if limit == 0 {
            return Ok(Vec::new());
        }

        let mut qb = QueryBuilder::<Sqlite>::new(CHUNK_SELECT);
        qb.push(" WHERE 1 = 1");
        if let Some(name) = &query.name {
            match query.mode {
                MatchMode::Exact => {
                    qb.push(" AND c.name = ").push_bind(name.clone());
                }
                MatchMode::Prefix => {
                    qb.push(" AND substr(c.name, 1, length(")
                        .push_bind(name.clone())
                        .push(")) = ")
                        .push_bind(name.clone());
                }
                // SQLite's lower() only folds ASCII; compared in Rust below.
                MatchMode::Fuzzy => {
                    qb.push(" AND c.name IS NOT NULL");
                }
            }
        }
        let fuzzy = match (&query.name, query.mode) {
            (Some(name), MatchMode::Fuzzy) => Some(name.to_lowercase()),
            _ => None,
        };
        if let Some(kind) = query.kind {
            qb.push(" AND c.kind = ").push_bind(kind.as_str());
        }
        if let Some(parent) = &query.parent {
            qb.push(" AND c.parent = ").push_bind(parent.clone());
        }
        if let Some(lang) = query.language {
            qb.push(" AND f.language = ").push_bind(lang.id());
        }
        qb.push(" ORDER BY c.id ASC");
        if fuzzy.is_none() {
            qb.push(" LIMIT ").push_bind(sql_limit(limit));
        }

        let rows = qb
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(DatabaseError::backend)?;
        let mut records = Vec::new();
        for row in &rows {
            let record = record_from_row(row)?;
            if let Some(wanted) = &fuzzy {
                let name = record.chunk.name.as_deref().unwrap_or("");
                if !name.to_lowercase().contains(wanted.as_str()) {
                    continue;
                }
            }
            records.push(record);
            if records.len() == limit {
                break;
            }
        }
        Ok(records)
    }

    async fn file_paths(&self, filters: &SearchFilters) -> Result<Vec<String>, DatabaseError> {
        let mut qb = QueryBuilder::<Sqlite>::new("SELECT path FROM files");
        if let Some(lang) = filters.language {
            qb.push(" WHERE language = ").push_bind(lang.id());
        }
        qb.push(" ORDER BY path");
        qb.build_query_scalar::<String>()
            .fetch_all(&self.pool)
            .await
            .map_err(DatabaseError::backend)
    }

    async fn chunks_for_files(
        &self,
        paths: &[String],
        limit: usize,
    ) -> Result<Vec<ChunkRecord>, DatabaseError> {
        if paths.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }

        let mut qb = QueryBuilder::<Sqlite>::new(CHUNK_SELECT);
        qb.push(" WHERE f.path IN (");
        let mut separated = qb.separated(", ");
        for path in paths {
            separated.push_bind(path.clone());
        }
        separated.push_unseparated(")");
        qb.push(" ORDER BY f.path ASC, c.line_start ASC, c.id ASC LIMIT ")
            .push_bind(sql_limit(limit));

        let rows = qb
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(DatabaseError::backend)?;
        rows.iter().map(record_from_row).collect()
    }

    async fn import_query(
        &self,
        needle: &str,
        limit: usize,
        filters: &SearchFilters,
    ) -> Result<Vec<ChunkRecord>, DatabaseError> {
        if needle.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }

        let mut qb = QueryBuilder::<Sqlite>::new(CHUNK_SELECT);
        qb.push(" WHERE c.kind = 'import' AND instr(lower(c.imports), lower(")
            .push_bind(needle.to_string())
            .push(")) > 0");
        if let Some(lang) = filters.language {
            qb.push(" AND f.language = ").push_bind(lang.id());
        }
        qb.push(" ORDER BY c.id ASC LIMIT ").push_bind(sql_limit(limit));

        let rows = qb
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(DatabaseError::backend)?;

        // The SQL filter runs over the JSON text; confirm per module.
        let lowered = needle.to_lowercase();
        Ok(rows
            .iter()
            .map(record_from_row)
            .collect::<Result<Vec<_>, _>>()?
            .into_iter()
            .filter(|r| {
                r.chunk
                    .imports
                    .iter()
                    .any(|i| i.to_lowercase().contains(&lowered))
            })
            .collect())
    }

    async fn chunks_for_file(&self, path: &str) -> Result<Vec<ChunkRecord>, DatabaseError> {
        self.chunks_for_files(&[path.to_string()], usize::MAX).await
    }

    async fn stats(&self) -> Result<StoreStats, DatabaseError> {
        let row = sqlx::query(
            r#"
            SELECT
                (SELECT COUNT(*) FROM files) AS file_count,
                (SELECT COUNT(*) FROM chunks) AS chunk_count,
                (SELECT COUNT(*) FROM chunk_vectors) AS vector_count,
                (SELECT MAX(last_indexed) FROM files) AS last_indexed
            "#,
        )
        .fetch_one(&self.pool)
        .await
        .map_err(DatabaseError::backend)?;

        let lang_rows =
            sqlx::query("SELECT language, COUNT(*) AS n FROM files GROUP BY language")
                .fetch_all(&self.pool)
                .await
                .map_err(DatabaseError::backend)?;
        let mut languages = BTreeMap::new();
        for r in &lang_rows {
            let id: String = col(r, "language")?;
            let n: i64 = col(r, "n")?;
            languages.insert(parse_language(&id)?, n as u64);
        }

        let file_count: i64 = col(&row, "file_count")?;
        let chunk_count: i64 = col(&row, "chunk_count")?;
        let vector_count: i64 = col(&row, "vector_count")?;
        Ok(StoreStats {
            file_count: file_count as u64,
            chunk_count: chunk_count as u64,
            vector_count: vector_count as u64,
            languages,
            last_indexed: col(&row, "last_indexed")?,
        })
    }

    async fn get_meta(&self, key: &str) -> Result<Option<String>, DatabaseError> {
        sqlx::query_scalar("SELECT value FROM meta WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(DatabaseError::backend)
    }

    async fn set_meta(&self, key: &str, value: Option<&str>) -> Result<(), DatabaseError> {
        match value {
            Some(v) => sqlx::query(
                "INSERT INTO meta (key, value) VALUES (?, ?) \
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            )
            .bind(key)
            .bind(v)
            .execute(&self.pool)
            .await
            .map_err(DatabaseError::backend)?,
            None => sqlx::query("DELETE FROM meta WHERE key = ?")
                .bind(key)
                .execute(&self.pool)
                .await
                .map_err(DatabaseError::backend)?,
        };
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kontext_core::chunk::content_hash;
    use kontext_core::store::LexicalTerm;

    async fn open_temp() -> (tempfile::TempDir, SqliteStore) {
        let dir = tempfile::tempdir().unwrap();
        let (store, outcome) = SqliteStore::open(&dir.path().join(".ctx/index.db"))
            .await
            .unwrap();
        assert_eq!(outcome, MigrationOutcome::Created);
        (dir, store)
    }

    fn meta(path: &str, language: Language) -> FileMeta {
        FileMeta {
            path: path.into(),
            language,
            hash: content_hash(path),
            size: 10,
        }
    }

    fn chunk(kind: NodeKind, name: &str, lines: (u32, u32), text: &str) -> Chunk {
        Chunk {
            line_start: lines.0,
            line_end: lines.1,
            kind,
            name: Some(name.into()),
            parent: None,
            text: text.into(),
            imports: vec!["./db".into()],
            exports: true,
            hash: content_hash(text),
        }
    }

    #[test]
    fn test_fts_match_expression() {
        let q = LexicalQuery {
            terms: vec![
                LexicalTerm {
                    text: "create_pool".into(),
                    prefix: false,
                },
                LexicalTerm {
                    text: "han".into(),
                    prefix: true,
                },
            ],
        };
        assert_eq!(fts_match_expression(&q), "\"create_pool\" OR \"han\"*");
    }

    #[tokio::test]
    async fn test_replace_file_swaps_chunks_and_vectors() {
        let (_dir, store) = open_temp().await;
        let file = meta("src/auth.ts", Language::TypeScript);

        let first = store
            .replace_file(
                &file,
                &[chunk(NodeKind::Function, "validateToken", (1, 3), "function validateToken() {}")],
                Some(&[vec![1.0, 0.0]][..]),
            )
            .await
            .unwrap();
        assert_eq!(first.len(), 1);

        let second = store
            .replace_file(
                &file,
                &[
                    chunk(NodeKind::Function, "a", (1, 2), "function a() {}"),
                    chunk(NodeKind::Function, "b", (4, 5), "function b() {}"),
                ],
                None,
            )
            .await
            .unwrap();
        assert_eq!(second.len(), 2);
        assert!(second.iter().all(|id| *id > first[0]));

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.file_count, 1);
        assert_eq!(stats.chunk_count, 2);
        assert_eq!(stats.vector_count, 0);
        assert_eq!(stats.languages.get(&Language::TypeScript), Some(&1));

        let records = store.chunks_for_file("src/auth.ts").await.unwrap();
        assert_eq!(records[0].chunk.imports, vec!["./db".to_string()]);
        assert!(records[0].chunk.exports);
    }

    #[tokio::test]
    async fn test_replace_file_rejects_mismatched_vectors() {
        let (_dir, store) = open_temp().await;
        let result = store
            .replace_file(
                &meta("a.py", Language::Python),
                &[chunk(NodeKind::Function, "f", (1, 1), "def f(): pass")],
                Some(&[][..]),
            )
            .await;
        assert!(matches!(result, Err(DatabaseError::Consistency(_))));
        assert!(store.get_file("a.py").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delete_file_removes_everything() {
        let (_dir, store) = open_temp().await;
        let ids = store
            .replace_file(
                &meta("a.py", Language::Python),
                &[chunk(NodeKind::Function, "create_pool", (1, 2), "def create_pool(): pass")],
                Some(&[vec![0.5, 0.5]][..]),
            )
            .await
            .unwrap();
        assert!(store.delete_file("a.py").await.unwrap());
        assert!(!store.delete_file("a.py").await.unwrap());

        let stats = store.stats().await.unwrap();
        assert_eq!((stats.file_count, stats.chunk_count, stats.vector_count), (0, 0, 0));
        let fts_rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks_fts")
            .fetch_one(store.pool())
            .await
            .unwrap();
        assert_eq!(fts_rows, 0);
        assert!(store.insert_vector(ids[0], &[1.0]).await.is_err());
    }

    #[tokio::test]
    async fn test_lexical_search_ranks_and_filters() {
        let (_dir, store) = open_temp().await;
        store
            .replace_file(
                &meta("src/db.py", Language::Python),
                &[chunk(
                    NodeKind::Function,
                    "create_pool",
                    (21, 23),
                    "def create_pool(url: str) -> Pool:\n    return Pool(url)",
                )],
                None,
            )
            .await
            .unwrap();
        store
            .replace_file(
                &meta("src/pool.ts", Language::TypeScript),
                &[chunk(NodeKind::Function, "other", (1, 2), "function other() { /* pool */ }")],
                None,
            )
            .await
            .unwrap();

        let query = kontext_core::search::lexical::parse_query("create_pool");
        let hits = store
            .lexical_search(&query, 10, &SearchFilters::default())
            .await
            .unwrap();
        assert_eq!(hits[0].record.chunk.name.as_deref(), Some("create_pool"));
        assert!(hits[0].raw_score > 0.0);

        let ts_only = store
            .lexical_search(&query, 10, &SearchFilters::language(Language::TypeScript))
            .await
            .unwrap();
        assert!(ts_only
            .iter()
            .all(|h| h.record.language == Language::TypeScript));
    }

    #[tokio::test]
    async fn test_symbol_query_modes() {
        let (_dir, store) = open_temp().await;
        store
            .replace_file(
                &meta("src/auth.ts", Language::TypeScript),
                &[
                    chunk(NodeKind::Function, "validateToken", (1, 3), "function validateToken() {}"),
                    chunk(NodeKind::Function, "validateTokenSet", (5, 6), "function validateTokenSet() {}"),
                ],
                None,
            )
            .await
            .unwrap();

        let exact = store
            .symbol_query(
                &SymbolQuery {
                    name: Some("validateToken".into()),
                    mode: MatchMode::Exact,
                    ..Default::default()
                },
                10,
            )
            .await
            .unwrap();
        assert_eq!(exact.len(), 1);

        let prefix = store
            .symbol_query(
                &SymbolQuery {
                    name: Some("validate".into()),
                    mode: MatchMode::Prefix,
                    ..Default::default()
                },
                10,
            )
            .await
            .unwrap();
        assert_eq!(prefix.len(), 2);

        let wrong_case_prefix = store
            .symbol_query(
                &SymbolQuery {
                    name: Some("Validate".into()),
                    mode: MatchMode::Prefix,
                    ..Default::default()
                },
                10,
            )
            .await
            .unwrap();
        assert!(wrong_case_prefix.is_empty());

        let fuzzy = store
            .symbol_query(
                &SymbolQuery {
                    name: Some("TOKENSET".into()),
                    ..Default::default()
                },
                10,
            )
            .await
            .unwrap();
        assert_eq!(fuzzy.len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_writers_and_readers() {
        let (_dir, store) = open_temp().await;
        let store = std::sync::Arc::new(store);

        for i in 0..40 {
            store
                .replace_file(
                    &meta(&format!("old/{i}.ts"), Language::TypeScript),
                    &[chunk(NodeKind::Function, "old", (1, 2), "function old() {}")],
                    None,
                )
                .await
                .unwrap();
        }
        let generation = |n: usize| -> Vec<Chunk> {
            (0..n)
                .map(|i| {
                    let line = i as u32 * 3 + 1;
                    chunk(NodeKind::Function, &format!("gen{n}_{i}"), (line, line + 1), "function f() {}")
                })
                .collect()
        };
        let hot = meta("src/hot.ts", Language::TypeScript);
        store.replace_file(&hot, &generation(2), None).await.unwrap();

        let mut tasks = tokio::task::JoinSet::new();
        for i in 0..40 {
            let s1 = store.clone();
            tasks.spawn(async move {
                let store = s1;
                let vectors = vec![vec![1.0, 0.0]];
                store
                    .replace_file(
                        &meta(&format!("new/{i}.ts"), Language::TypeScript),
                        &[chunk(NodeKind::Function, "fresh", (1, 2), "function fresh() {}")],
                        Some(&vectors),
                    )
                    .await
                    .map(|_| ())
            });
            let s2 = store.clone();
            tasks.spawn(async move {
                let store = s2;
                store
                    .delete_file(&format!("old/{i}.ts"))
                    .await
                    .map(|removed| assert!(removed))
            });
            let store = store.clone();
            let hot = hot.clone();
            let chunks = generation(if i % 2 == 0 { 3 } else { 2 });
            tasks.spawn(async move { store.replace_file(&hot, &chunks, None).await.map(|_| ()) });
        }

        let reader = {
            let store = store.clone();
            tokio::spawn(async move {
                for _ in 0..100 {
                    let records = store.chunks_for_file("src/hot.ts").await.unwrap();
                    let names: Vec<&str> =
                        records.iter().filter_map(|r| r.chunk.name.as_deref()).collect();
                    let complete = names == ["gen2_0", "gen2_1"] || names == ["gen3_0", "gen3_1", "gen3_2"];
                    assert!(complete, "half-replaced chunk set: {names:?}");
                    tokio::task::yield_now().await;
                }
            })
        };

        while let Some(joined) = tasks.join_next().await {
            joined.unwrap().unwrap();
        }
        reader.await.unwrap();

        let paths = store.get_all_file_paths().await.unwrap();
        assert_eq!(paths.len(), 41);
        assert!(paths.iter().all(|p| !p.starts_with("old/")));
        let stats = store.stats().await.unwrap();
        assert_eq!(stats.vector_count, 40);
    }

    #[tokio::test]
    async fn test_writes_reject_unknown_owners() {
        let (_dir, store) = open_temp().await;
        let err = store
            .insert_chunks(999, &[chunk(NodeKind::Function, "a", (1, 1), "a")])
            .await
            .unwrap_err();
        assert!(matches!(err, DatabaseError::Consistency(_)));
        let err = store.insert_vector(999, &[1.0]).await.unwrap_err();
        assert!(matches!(err, DatabaseError::Consistency(_)));
        assert!(!store.delete_file("missing.ts").await.unwrap());

        let file_id = store.upsert_file(&meta("a.ts", Language::TypeScript)).await.unwrap();
        let ids = store
            .insert_chunks(file_id, &[chunk(NodeKind::Function, "a", (1, 1), "a")])
            .await
            .unwrap();
        store.insert_vector(ids[0], &[0.5, 0.5]).await.unwrap();
        store.insert_vector(ids[0], &[1.0, 0.0]).await.unwrap();
        assert_eq!(store.stats().await.unwrap().vector_count, 1);
    }

    #[tokio::test]
    async fn test_fuzzy_symbol_query_folds_unicode_case() {
        let (_dir, store) = open_temp().await;
        store
            .replace_file(
                &meta("src/geo.ts", Language::TypeScript),
                &[
                    chunk(NodeKind::Function, "größeBerechnen", (1, 2), "function größeBerechnen() {}"),
                    chunk(NodeKind::Function, "ÉcoleLoader", (4, 5), "function ÉcoleLoader() {}"),
                ],
                None,
            )
            .await
            .unwrap();

        for (needle, expected) in [("GRÖSSE", 0), ("GRÖßE", 1), ("écoleload", 1), ("É", 1)] {
            let hits = store
                .symbol_query(
                    &SymbolQuery {
                        name: Some(needle.into()),
                        ..Default::default()
                    },
                    10,
                )
                .await
                .unwrap();
            assert_eq!(hits.len(), expected, "needle {needle}");
        }

        let limited = store
            .symbol_query(
                &SymbolQuery {
                    name: Some("e".into()),
                    ..Default::default()
                },
                1,
            )
            .await
            .unwrap();
        assert_eq!(limited.len(), 1);
    }

    #[tokio::test]
    async fn test_nearest_vectors_skips_other_dimensions() {
        let (_dir, store) = open_temp().await;
        store
            .replace_file(
                &meta("a.rs", Language::Rust),
                &[
                    chunk(NodeKind::Function, "near", (1, 1), "fn near() {}"),
                    chunk(NodeKind::Function, "far", (2, 2), "fn far() {}"),
                ],
                Some(&[vec![1.0, 0.0], vec![0.0, 1.0]][..]),
            )
            .await
            .unwrap();
        store
            .replace_file(
                &meta("b.rs", Language::Rust),
                &[chunk(NodeKind::Function, "odd", (1, 1), "fn odd() {}")],
                Some(&[vec![1.0, 0.0, 0.0]][..]),
            )
            .await
            .unwrap();

        let hits = store
            .nearest_vectors(&[1.0, 0.0], 10, &SearchFilters::default())
            .await
            .unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].record.chunk.name.as_deref(), Some("near"));
        assert!((hits[0].raw_score - 1.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_chunk_at_and_meta() {
        let (_dir, store) = open_temp().await;
        let mut method = chunk(NodeKind::Method, "signToken", (25, 27), "signToken() {}");
        method.parent = Some("AuthService".into());
        store
            .replace_file(
                &meta("src/auth.ts", Language::TypeScript),
                &[
                    chunk(NodeKind::Class, "AuthService", (17, 32), "class AuthService {}"),
                    method,
                ],
                None,
            )
            .await
            .unwrap();

        let hit = store.chunk_at("src/auth.ts", 26).await.unwrap().unwrap();
        assert_eq!(hit.chunk.name.as_deref(), Some("signToken"));
        assert_eq!(hit.chunk.parent.as_deref(), Some("AuthService"));
        assert!(store.chunk_at("src/auth.ts", 99).await.unwrap().is_none());

        store.set_meta("git_head", Some("abc")).await.unwrap();
        assert_eq!(store.get_meta("git_head").await.unwrap().as_deref(), Some("abc"));
        store.set_meta("git_head", None).await.unwrap();
        assert!(store.get_meta("git_head").await.unwrap().is_none());
    }
}
