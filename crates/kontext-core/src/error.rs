//! Error taxonomy shared by the indexing and retrieval layers.
//!
//! | Error | Raised by |
//! |-------|-----------|
//! | [`DatabaseError`] | any [`Store`](crate::store::Store) operation |
//! | [`IndexError`] | the indexing pipeline (storage, embedding, I/O, cancellation) |
//! | [`SearchError`] | strategy execution and plan handling |
//!
//! Parse failures are deliberately absent: the parser reports them as a
//! diagnostic alongside whatever nodes it recovered.

use std::path::PathBuf;

use thiserror::Error;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("store backend failure: {0}")]
    Backend(#[source] BoxError),

    #[error("index schema version {found} is incompatible with version {expected}")]
    SchemaMismatch { found: i64, expected: i64 },

    #[error("index consistency violation: {0}")]
    Consistency(String),
}

impl DatabaseError {
    /// Wrap a backend-specific error (sqlx, I/O) without leaking its type.
    pub fn backend<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        DatabaseError::Backend(Box::new(err))
    }
}

#[derive(Debug, Error)]
pub enum IndexError {
    #[error(transparent)]
    Store(#[from] DatabaseError),

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("embedding failed: {0}")]
    Embedding(String),

    #[error("index root {0} no longer exists")]
    RootMissing(PathBuf),

    #[error("indexing task failed: {0}")]
    Task(String),
}

#[derive(Debug, Error)]
pub enum SearchError {
    #[error(transparent)]
    Store(#[from] DatabaseError),

    #[error("query embedding failed: {0}")]
    Embedding(String),

    #[error("vector search requires an embedding provider")]
    EmbedderUnavailable,

    #[error("unknown strategy: {0}")]
    UnknownStrategy(String),

    #[error("invalid query: {0}")]
    InvalidQuery(String),
}
