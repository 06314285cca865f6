//! SQLite database connection management.
//!
//! Provides a connection pool to `<root>/.ctx/index.db` with WAL mode
//! enabled, so searches can run while an indexing pass or the watcher is
//! writing. The database file and its parent directory are created on
//! demand.

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use kontext_core::error::DatabaseError;

/// Open (creating if needed) the database at `db_path`.
///
/// - Creates the database file and parent directories if they don't exist.
/// - Enables WAL journal mode and foreign keys.
/// - Returns a pool with up to 5 connections.
pub async fn connect(db_path: &Path) -> Result<SqlitePool, DatabaseError> {
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent).map_err(DatabaseError::backend)?;
    }

    let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", db_path.display()))
        .map_err(DatabaseError::backend)?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .foreign_keys(true)
        .busy_timeout(Duration::from_secs(10));

    SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await
        .map_err(DatabaseError::backend)
}
