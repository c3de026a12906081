//! SQLite backend implementation using sqlx.
//!
//! Connections come from the crate's own bounded [`Pool`]; each one is
//! opened in WAL mode and the schema is created on first open.

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use futures::StreamExt;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteConnection, SqliteJournalMode, SqliteRow, SqliteSynchronous,
};
use sqlx::{ConnectOptions, Connection, Row};

use crate::config::{ConfigError, DriverConfig, DriverOptions, parse_duration};
use crate::storage::StorageError;
use crate::storage::driver::LogDriver;
use crate::storage::pool::{ManageConnection, Pool, PoolBuilder};
use crate::storage::schema::init_schema;
use crate::storage::stream::{BatchSink, StreamOutcome, stream_batches};
use crate::storage::types::{Envelope, LogEntry, LogLevel, QueryOption, TagHistory, code};

/// Registered driver name.
pub const DRIVER_NAME: &str = "sqlite";

/// Default maximum connections in the pool.
const DEFAULT_MAX_ACTIVE: usize = 1;

/// Default idle time before a connection is reclaimed.
const DEFAULT_MAX_INACTIVE: Duration = Duration::from_secs(300);

/// How long a statement waits on a locked database.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const INSERT_LOG_SQL: &str = r#"
INSERT INTO logs (id, tag, timestamp, date, container_name, level, message, context_keys, context_values)
VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
"#;

const FETCH_LOG_SQL: &str = r#"
SELECT id, tag, timestamp, date, container_name, level, message, context_keys, context_values
FROM logs
WHERE tag = ? AND level >= ? AND timestamp >= ? AND timestamp <= ?
ORDER BY timestamp ASC, id ASC
"#;

// =============================================================================
// Settings
// =============================================================================

/// Driver options recognised by the SQLite backend.
///
/// | key               | default | meaning                                   |
/// |-------------------|---------|-------------------------------------------|
/// | `address`         | -       | database file or `sqlite:` URL (required) |
/// | `minActiveConn`   | 0       | connections opened at start               |
/// | `maxActiveConn`   | 1       | connection limit                          |
/// | `maxInActiveTime` | 300     | idle lifetime, seconds or `5m` style      |
/// | `dsnopts`         | -       | extra URL options, repeatable             |
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqliteSettings {
    pub address: String,
    pub min_active: usize,
    pub max_active: usize,
    pub max_inactive: Duration,
    pub dsn_opts: Vec<String>,
}

impl SqliteSettings {
    /// Read settings from parsed driver options. Unknown keys are ignored.
    ///
    /// # Errors
    /// `ConfigError::ValidationError` for a missing address or an
    /// unparsable number or duration.
    pub fn from_options(options: &DriverOptions) -> Result<Self, ConfigError> {
        let address = options
            .get("address")
            .map(str::trim)
            .filter(|a| !a.is_empty())
            .ok_or_else(|| ConfigError::ValidationError("missing address".to_string()))?
            .to_string();

        let max_inactive = match options.get("maxInActiveTime") {
            None => DEFAULT_MAX_INACTIVE,
            Some(raw) => parse_inactive_time(raw)?,
        };

        Ok(Self {
            address,
            min_active: options.parse_or("minActiveConn", 0)?,
            max_active: options.parse_or("maxActiveConn", DEFAULT_MAX_ACTIVE)?,
            max_inactive,
            dsn_opts: options
                .get_all("dsnopts")
                .filter(|o| !o.is_empty())
                .map(str::to_string)
                .collect(),
        })
    }

    fn is_url(&self) -> bool {
        self.address.starts_with("sqlite:")
    }

    /// Connection URL with `dsnopts` appended as query options.
    pub fn url(&self) -> String {
        let mut url = if self.is_url() {
            self.address.clone()
        } else {
            format!("sqlite://{}", self.address)
        };
        if !self.dsn_opts.is_empty() {
            url.push(if url.contains('?') { '&' } else { '?' });
            url.push_str(&self.dsn_opts.join("&"));
        }
        url
    }
}

/// Integer seconds, or a humantime string such as `5m`.
fn parse_inactive_time(raw: &str) -> Result<Duration, ConfigError> {
    if let Ok(secs) = raw.trim().parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }
    parse_duration(raw)
}

// =============================================================================
// Connector
// =============================================================================

/// Opens [`SqliteConnection`]s for the pool.
///
/// Configuration:
/// - WAL journal mode for concurrent readers
/// - Normal synchronous mode for performance with durability
/// - Create database if not exists
pub struct SqliteConnector {
    options: SqliteConnectOptions,
}

impl std::fmt::Debug for SqliteConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteConnector").finish_non_exhaustive()
    }
}

impl SqliteConnector {
    /// # Arguments
    ///
    /// * `url` - SQLite connection URL, e.g., `sqlite://data/hermes.db?mode=rwc`
    pub fn new(url: &str) -> Result<Self, StorageError> {
        let options = SqliteConnectOptions::from_str(url)?
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(BUSY_TIMEOUT)
            .create_if_missing(true);
        Ok(Self { options })
    }
}

#[async_trait::async_trait]
impl ManageConnection for SqliteConnector {
    type Connection = SqliteConnection;
    type Error = sqlx::Error;

    async fn connect(&self) -> Result<SqliteConnection, sqlx::Error> {
        self.options.connect().await
    }
}

// =============================================================================
// Driver
// =============================================================================

/// SQLite log driver.
pub struct SqliteDriver {
    pool: Pool<SqliteConnector>,
}

impl std::fmt::Debug for SqliteDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteDriver")
            .field("pool", &self.pool)
            .finish()
    }
}

impl SqliteDriver {
    /// Open the database described by `config` and create the schema.
    pub async fn open(config: &DriverConfig) -> Result<Self, StorageError> {
        let settings = SqliteSettings::from_options(&config.parse_options()?)?;
        Self::open_with(&settings).await
    }

    /// Open with already-parsed settings.
    pub async fn open_with(settings: &SqliteSettings) -> Result<Self, StorageError> {
        if !settings.is_url()
            && let Some(parent) = Path::new(&settings.address).parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                StorageError::Config(format!(
                    "cannot create directory {}: {e}",
                    parent.display()
                ))
            })?;
        }

        let connector = SqliteConnector::new(&settings.url())?;
        let pool = PoolBuilder::new()
            .min_active(settings.min_active)
            .max_active(settings.max_active)
            .max_lifetime(settings.max_inactive)
            .build(connector)
            .await?;

        {
            let mut conn = pool.acquire().await?;
            init_schema(&mut conn).await?;
        }

        tracing::info!(
            address = %settings.address,
            max_active = settings.max_active,
            "SQLite driver opened"
        );
        Ok(Self { pool })
    }

    /// The connection pool.
    pub fn pool(&self) -> &Pool<SqliteConnector> {
        &self.pool
    }
}

/// Map one `FETCH_LOG_SQL` row.
fn row_to_entry(row: &SqliteRow) -> Result<LogEntry, StorageError> {
    let keys_str: String = row.try_get(7)?;
    let values_str: String = row.try_get(8)?;
    let context_keys: Vec<String> = serde_json::from_str(&keys_str)?;
    let context_values: Vec<String> = serde_json::from_str(&values_str)?;
    if context_keys.len() != context_values.len() {
        return Err(StorageError::InvalidData(format!(
            "context has {} keys but {} values",
            context_keys.len(),
            context_values.len()
        )));
    }

    Ok(LogEntry {
        id: row.try_get(0)?,
        tag: row.try_get(1)?,
        timestamp: row.try_get(2)?,
        date: row.try_get(3)?,
        container_name: row.try_get(4)?,
        level: LogLevel::from_ordinal(row.try_get(5)?),
        message: row.try_get(6)?,
        context_keys,
        context_values,
    })
}

#[async_trait::async_trait]
impl LogDriver for SqliteDriver {
    fn name(&self) -> &str {
        DRIVER_NAME
    }

    async fn collect(&self, entries: &[LogEntry]) -> Result<(), StorageError> {
        if entries.is_empty() {
            return Ok(());
        }

        let mut conn = self.pool.acquire().await?;
        let mut tx = (*conn).begin().await?;
        let mut inserted = 0usize;

        for entry in entries {
            let keys = serde_json::to_string(&entry.context_keys)?;
            let values = serde_json::to_string(&entry.context_values)?;
            let result = sqlx::query(INSERT_LOG_SQL)
                .bind(entry.id)
                .bind(entry.tag.as_str())
                .bind(entry.timestamp)
                .bind(entry.date.as_str())
                .bind(entry.container_name.as_deref())
                .bind(entry.level.ordinal())
                .bind(entry.message.as_str())
                .bind(keys)
                .bind(values)
                .execute(&mut *tx)
                .await;

            match result {
                Ok(_) => inserted += 1,
                Err(e) => tracing::warn!(
                    error = %e,
                    id = entry.id,
                    tag = %entry.tag,
                    "Skipping log entry that failed to insert"
                ),
            }
        }

        tx.commit().await?;
        tracing::trace!(inserted, total = entries.len(), "Collected log batch");
        Ok(())
    }

    async fn find_all_tags(&self) -> Result<Vec<String>, StorageError> {
        let mut conn = self.pool.acquire().await?;
        let tags = sqlx::query_scalar("SELECT DISTINCT tag FROM logs ORDER BY tag")
            .fetch_all(&mut *conn)
            .await?;
        Ok(tags)
    }

    async fn find_tag_history(&self, tag: &str) -> Result<Vec<TagHistory>, StorageError> {
        if tag.trim().is_empty() {
            return Err(StorageError::MissingTag);
        }

        let mut conn = self.pool.acquire().await?;
        let dates: Vec<String> =
            sqlx::query_scalar("SELECT DISTINCT date FROM logs WHERE tag = ? ORDER BY date DESC")
                .bind(tag)
                .fetch_all(&mut *conn)
                .await?;
        Ok(dates.into_iter().map(TagHistory::from_key).collect())
    }

    async fn fetch_log(
        &self,
        query: &QueryOption,
        sink: &BatchSink,
    ) -> Result<StreamOutcome, StorageError> {
        query.validate()?;

        let mut conn = match self.pool.acquire().await {
            Ok(conn) => conn,
            Err(e) => {
                let err = StorageError::from(e);
                tracing::warn!(error = %err, tag = %query.tag, "Cannot acquire connection for query");
                // The consumer may already be gone; the error is returned either way.
                let _ = sink
                    .push(Envelope::error(code::INTERNAL_ERROR, err.to_string()))
                    .await;
                return Err(err);
            }
        };

        let rows = sqlx::query(FETCH_LOG_SQL)
            .bind(query.tag.as_str())
            .bind(query.level.ordinal())
            .bind(query.start_time)
            .bind(query.end_time)
            .fetch(&mut *conn)
            .map(|row| row.map_err(StorageError::from).and_then(|r| row_to_entry(&r)));

        Ok(stream_batches(rows, query.batch_size, sink).await)
    }

    async fn close(&self) -> Result<(), StorageError> {
        self.pool.close();
        tracing::info!("SQLite driver closed");
        Ok(())
    }
}
