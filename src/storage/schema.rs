//! Database schema definitions.

use sqlx::SqliteConnection;

use crate::storage::StorageError;

/// SQL statement for creating the logs table.
///
/// One row per log entry. Context is stored as two JSON string arrays of
/// equal length.
pub const LOGS_TABLE_DDL: &str = r#"
CREATE TABLE IF NOT EXISTS logs (
    id             INTEGER PRIMARY KEY,
    tag            TEXT    NOT NULL,
    timestamp      INTEGER NOT NULL,
    date           TEXT    NOT NULL,
    container_name TEXT,
    level          INTEGER NOT NULL,
    message        TEXT    NOT NULL,
    context_keys   TEXT    NOT NULL DEFAULT '[]',
    context_values TEXT    NOT NULL DEFAULT '[]'
);
"#;

/// Indexes backing the tag/time scan and the per-tag date history.
pub const LOGS_INDEXES_DDL: &str = r#"
CREATE INDEX IF NOT EXISTS idx_logs_tag_ts ON logs(tag, timestamp);
CREATE INDEX IF NOT EXISTS idx_logs_tag_date ON logs(tag, date);
"#;

/// Initialize the database schema.
///
/// Creates the table and indexes if they don't exist.
pub async fn init_schema(conn: &mut SqliteConnection) -> Result<(), StorageError> {
    sqlx::raw_sql(LOGS_TABLE_DDL).execute(&mut *conn).await?;
    sqlx::raw_sql(LOGS_INDEXES_DDL).execute(&mut *conn).await?;
    Ok(())
}
