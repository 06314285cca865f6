//! Schema creation and versioning.
//!
//! The schema version lives in `PRAGMA user_version`. A fresh database
//! gets the current schema; a database written by an incompatible version
//! has every table dropped and recreated, which forces the next indexing
//! pass to rebuild from scratch.
//!
//! | Table | Contents |
//! |-------|----------|
//! | `files` | one row per indexed file (path, language, content hash) |
//! | `chunks` | retrieval units, owned by a file |
//! | `chunk_vectors` | one embedding BLOB per chunk |
//! | `chunks_fts` | FTS5 index over chunk name, parent, text, identifier sub-words |
//! | `meta` | key/value state (last clean git HEAD, embedder identity) |

use sqlx::SqlitePool;

use kontext_core::error::DatabaseError;

/// Bump when any table layout changes.
pub const SCHEMA_VERSION: i64 = 1;

/// What [`run_migrations`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationOutcome {
    Created,
    UpToDate,
    /// An incompatible schema was dropped; the index is empty.
    Recreated { from: i64 },
}

const TABLES: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS files (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        path TEXT NOT NULL UNIQUE,
        language TEXT NOT NULL,
        hash TEXT NOT NULL,
        last_indexed INTEGER NOT NULL,
        size INTEGER NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS chunks (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        file_id INTEGER NOT NULL REFERENCES files(id) ON DELETE CASCADE,
        line_start INTEGER NOT NULL,
        line_end INTEGER NOT NULL,
        kind TEXT NOT NULL,
        name TEXT,
        parent TEXT,
        text TEXT NOT NULL,
        imports TEXT NOT NULL DEFAULT '[]',
        exports INTEGER NOT NULL DEFAULT 0,
        hash TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS chunk_vectors (
        chunk_id INTEGER PRIMARY KEY REFERENCES chunks(id) ON DELETE CASCADE,
        dims INTEGER NOT NULL,
        embedding BLOB NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS meta (
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_chunks_file_id ON chunks(file_id)",
    "CREATE INDEX IF NOT EXISTS idx_chunks_name ON chunks(name)",
    "CREATE INDEX IF NOT EXISTS idx_chunks_kind ON chunks(kind)",
    "CREATE INDEX IF NOT EXISTS idx_files_language ON files(language)",
];

const DROP: &[&str] = &[
    "DROP TABLE IF EXISTS chunks_fts",
    "DROP TABLE IF EXISTS chunk_vectors",
    "DROP TABLE IF EXISTS chunks",
    "DROP TABLE IF EXISTS files",
    "DROP TABLE IF EXISTS meta",
];

/// Bring the database at `pool` to [`SCHEMA_VERSION`].
pub async fn run_migrations(pool: &SqlitePool) -> Result<MigrationOutcome, DatabaseError> {
    let version: i64 = sqlx::query_scalar("PRAGMA user_version")
        .fetch_one(pool)
        .await
        .map_err(DatabaseError::backend)?;

    let outcome = match version {
        SCHEMA_VERSION => MigrationOutcome::UpToDate,
        0 => MigrationOutcome::Created,
        other => {
            tracing::warn!(
                found = other,
                expected = SCHEMA_VERSION,
                "index schema changed, rebuilding"
            );
            let mut tx = pool.begin().await.map_err(DatabaseError::backend)?;
            for stmt in DROP {
                sqlx::query(stmt)
                    .execute(&mut *tx)
                    .await
                    .map_err(DatabaseError::backend)?;
            }
            tx.commit().await.map_err(DatabaseError::backend)?;
            MigrationOutcome::Recreated { from: other }
        }
    };

    if outcome == MigrationOutcome::UpToDate {
        return Ok(outcome);
    }

    let mut tx = pool.begin().await.map_err(DatabaseError::backend)?;
    for stmt in TABLES {
        sqlx::query(stmt)
            .execute(&mut *tx)
            .await
            .map_err(DatabaseError::backend)?;
    }

    // FTS5 CREATE is not idempotent natively, so check first.
    let fts_exists: bool = sqlx::query_scalar(
        "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name='chunks_fts'",
    )
    .fetch_one(&mut *tx)
    .await
    .map_err(DatabaseError::backend)?;
    if !fts_exists {
        sqlx::query(
            r#"
            CREATE VIRTUAL TABLE chunks_fts USING fts5(
                chunk_id UNINDEXED,
                name,
                parent,
                text,
                terms,
                tokenize = "unicode61 tokenchars '_'"
            )
            "#,
        )
        .execute(&mut *tx)
        .await
        .map_err(DatabaseError::backend)?;
    }

    sqlx::query(&format!("PRAGMA user_version = {SCHEMA_VERSION}"))
        .execute(&mut *tx)
        .await
        .map_err(DatabaseError::backend)?;
    tx.commit().await.map_err(DatabaseError::backend)?;

    tracing::debug!(?outcome, "schema ready");
    Ok(outcome)
}
