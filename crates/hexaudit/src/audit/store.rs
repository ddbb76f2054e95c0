//! Storage adapter for the audit tables
//!
//! [`AuditStorage`] is the async boundary every component above the store
//! talks to. The SQLite implementation keeps one connection behind a mutex
//! and runs each call on the blocking pool.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use super::query::AuditFilters;
use super::{
    format_timestamp, parse_timestamp, schema, AuditConfigRow, AuditError, NewAuditEntry, Result,
    StorageSummary, StoredAuditEntry,
};

#[async_trait]
pub trait AuditStorage: Send + Sync {
    /// Fetch the singleton config row, if it exists.
    async fn load_config(&self) -> Result<Option<AuditConfigRow>>;

    /// Create the singleton config row unless one already exists.
    async fn create_config(
        &self,
        encryption_key: &[u8],
        retention_days: i64,
        now: DateTime<Utc>,
    ) -> Result<()>;

    async fn set_retention_days(&self, retention_days: i64, now: DateTime<Utc>) -> Result<()>;

    /// Insert one entry and return its id.
    async fn insert_entry(&self, entry: NewAuditEntry) -> Result<i64>;

    async fn increment_written(&self) -> Result<()>;

    /// Delete every entry with a timestamp strictly before `cutoff`.
    async fn purge_before(&self, cutoff: DateTime<Utc>) -> Result<usize>;

    async fn record_cleanup(&self, purged: usize, at: DateTime<Utc>) -> Result<()>;

    /// Entries matching `filters`, newest first.
    async fn select_entries(
        &self,
        filters: &AuditFilters,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<StoredAuditEntry>>;

    async fn count_entries(&self, filters: &AuditFilters) -> Result<usize>;

    async fn summary(&self) -> Result<StorageSummary>;
}

/// SQLite-backed audit store
#[derive(Clone)]
pub struct SqliteAuditStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteAuditStore {
    /// Open (or create) the database at `path`
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;

        // Enable WAL mode for better concurrent access
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        conn.execute_batch(schema::CREATE_TABLES)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Create an in-memory store (for testing)
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(schema::CREATE_TABLES)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `f` against the connection on the blocking pool
    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = conn.lock().unwrap_or_else(|err| err.into_inner());
            f(&*guard)
        })
        .await
        .map_err(|err| AuditError::Background(err.to_string()))?
    }

    /// Direct access for tests that need to corrupt rows or inspect columns
    #[doc(hidden)]
    pub fn lock_conn(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|err| err.into_inner())
    }
}

fn append_filter_clauses(
    filters: &AuditFilters,
    sql: &mut String,
    params_vec: &mut Vec<Box<dyn rusqlite::ToSql>>,
) {
    if let Some(start) = filters.start_date {
        sql.push_str(" AND timestamp >= ?");
        params_vec.push(Box::new(format_timestamp(start)));
    }
    if let Some(end) = filters.end_date {
        sql.push_str(" AND timestamp <= ?");
        params_vec.push(Box::new(format_timestamp(end)));
    }
    if let Some(ref category) = filters.category {
        sql.push_str(" AND category = ?");
        params_vec.push(Box::new(category.clone()));
    }
    if let Some(ref scope) = filters.scope {
        sql.push_str(" AND category LIKE ? ESCAPE '\\'");
        params_vec.push(Box::new(format!("{}.%", escape_like(scope))));
    }
    if let Some(severity) = filters.severity {
        let (clause, patterns) = severity.sql_condition();
        sql.push_str(" AND ");
        sql.push_str(&clause);
        for pattern in patterns {
            params_vec.push(Box::new(pattern));
        }
    }
}

fn escape_like(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

fn parse_optional_timestamp(raw: Option<String>) -> Result<Option<DateTime<Utc>>> {
    raw.as_deref().map(parse_timestamp).transpose()
}

/// Range bounds over damaged rows are dropped rather than failing stats
fn summary_timestamp(raw: Option<String>) -> Option<DateTime<Utc>> {
    let raw = raw?;
    parse_timestamp(&raw)
        .map_err(|err| tracing::warn!(error = %err, "Skipping invalid audit timestamp in summary"))
        .ok()
}

fn row_to_entry(row: &rusqlite::Row<'_>) -> Result<StoredAuditEntry> {
    let id: i64 = row.get(0)?;
    let raw_timestamp: String = row.get(2)?;
    let raw_created_at: String = row.get(10)?;

    // An unparseable timestamp marks the row damaged instead of failing the page
    let timestamp = parse_timestamp(&raw_timestamp).ok();
    let created_at = parse_timestamp(&raw_created_at).ok();
    let damaged = timestamp.is_none() || created_at.is_none();
    if damaged {
        tracing::warn!(
            id,
            timestamp = %raw_timestamp,
            created_at = %raw_created_at,
            "Audit row has an invalid stored timestamp"
        );
    }
    let timestamp = timestamp.or(created_at).unwrap_or_default();
    let created_at = created_at.unwrap_or(timestamp);

    Ok(StoredAuditEntry {
        id,
        category: row.get(1)?,
        timestamp,
        user_id: row.get(3)?,
        username: row.get(4)?,
        ip_address: row.get(5)?,
        user_agent: row.get(6)?,
        request_id: row.get(7)?,
        encrypted_message: row.get(8)?,
        encryption_iv: row.get(9)?,
        created_at,
        damaged,
    })
}

fn to_i64(value: usize) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn to_usize(value: i64) -> usize {
    usize::try_from(value).unwrap_or(0)
}

#[async_trait]
impl AuditStorage for SqliteAuditStore {
    async fn load_config(&self) -> Result<Option<AuditConfigRow>> {
        self.with_conn(|conn| {
            let raw = conn
                .query_row(schema::SELECT_CONFIG, [], |row| {
                    Ok((
                        row.get::<_, Vec<u8>>(0)?,
                        row.get::<_, Option<String>>(1)?,
                        row.get::<_, Option<String>>(2)?,
                        row.get::<_, Option<i64>>(3)?,
                        row.get::<_, Option<String>>(4)?,
                        row.get::<_, Option<i64>>(5)?,
                        row.get::<_, Option<i64>>(6)?,
                    ))
                })
                .optional()?;

            let Some((key, created, rotated, retention, cleanup, written, purged)) = raw else {
                return Ok(None);
            };

            Ok(Some(AuditConfigRow {
                encryption_key: key,
                key_created_at: parse_optional_timestamp(created)?,
                key_rotated_at: parse_optional_timestamp(rotated)?,
                retention_days: retention.unwrap_or(30),
                last_cleanup_at: parse_optional_timestamp(cleanup)?,
                total_logs_written: u64::try_from(written.unwrap_or(0)).unwrap_or(0),
                total_logs_purged: u64::try_from(purged.unwrap_or(0)).unwrap_or(0),
            }))
        })
        .await
    }

    async fn create_config(
        &self,
        encryption_key: &[u8],
        retention_days: i64,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let key = encryption_key.to_vec();
        self.with_conn(move |conn| {
            conn.execute(
                schema::INSERT_CONFIG,
                params![key, format_timestamp(now), retention_days],
            )?;
            Ok(())
        })
        .await
    }

    async fn set_retention_days(&self, retention_days: i64, now: DateTime<Utc>) -> Result<()> {
        self.with_conn(move |conn| {
            conn.execute(
                schema::UPDATE_RETENTION_DAYS,
                params![retention_days, format_timestamp(now)],
            )?;
            Ok(())
        })
        .await
    }

    async fn insert_entry(&self, entry: NewAuditEntry) -> Result<i64> {
        self.with_conn(move |conn| {
            let ts = format_timestamp(entry.timestamp);
            conn.execute(
                schema::INSERT_ENTRY,
                params![
                    entry.category,
                    ts,
                    entry.user_id,
                    entry.username,
                    entry.ip_address,
                    entry.user_agent,
                    entry.request_id,
                    entry.encrypted_message,
                    entry.encryption_iv,
                    ts,
                ],
            )?;
            Ok(conn.last_insert_rowid())
        })
        .await
    }

    async fn increment_written(&self) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(schema::INCREMENT_WRITTEN, [])?;
            Ok(())
        })
        .await
    }

    async fn purge_before(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        self.with_conn(move |conn| {
            let deleted = conn.execute(schema::DELETE_BEFORE, params![format_timestamp(cutoff)])?;
            Ok(deleted)
        })
        .await
    }

    async fn record_cleanup(&self, purged: usize, at: DateTime<Utc>) -> Result<()> {
        self.with_conn(move |conn| {
            conn.execute(
                schema::RECORD_CLEANUP,
                params![to_i64(purged), format_timestamp(at)],
            )?;
            Ok(())
        })
        .await
    }

    async fn select_entries(
        &self,
        filters: &AuditFilters,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<StoredAuditEntry>> {
        let filters = filters.clone();
        self.with_conn(move |conn| {
            let mut sql = schema::SELECT_ENTRIES.to_string();
            let mut params_vec: Vec<Box<dyn rusqlite::ToSql>> = vec![];
            append_filter_clauses(&filters, &mut sql, &mut params_vec);

            sql.push_str(" ORDER BY timestamp DESC, id DESC LIMIT ? OFFSET ?");
            params_vec.push(Box::new(to_i64(limit)));
            params_vec.push(Box::new(to_i64(offset)));

            let params_refs: Vec<&dyn rusqlite::ToSql> =
                params_vec.iter().map(|p| p.as_ref()).collect();

            let mut stmt = conn.prepare(&sql)?;
            let mut rows = stmt.query(params_refs.as_slice())?;

            let mut entries = Vec::new();
            while let Some(row) = rows.next()? {
                entries.push(row_to_entry(row)?);
            }
            Ok(entries)
        })
        .await
    }

    async fn count_entries(&self, filters: &AuditFilters) -> Result<usize> {
        let filters = filters.clone();
        self.with_conn(move |conn| {
            let mut sql = schema::COUNT_ENTRIES.to_string();
            let mut params_vec: Vec<Box<dyn rusqlite::ToSql>> = vec![];
            append_filter_clauses(&filters, &mut sql, &mut params_vec);

            let params_refs: Vec<&dyn rusqlite::ToSql> =
                params_vec.iter().map(|p| p.as_ref()).collect();

            let count: i64 =
                conn.query_row(sql.as_str(), params_refs.as_slice(), |row| row.get(0))?;
            Ok(to_usize(count))
        })
        .await
    }

    async fn summary(&self) -> Result<StorageSummary> {
        self.with_conn(|conn| {
            let (total, oldest, newest): (i64, Option<String>, Option<String>) = conn
                .query_row(schema::SUMMARY, [], |row| {
                    Ok((row.get(0)?, row.get(1)?, row.get(2)?))
                })?;

            let mut stmt = conn.prepare(schema::DISTINCT_CATEGORIES)?;
            let categories = stmt
                .query_map([], |row| row.get::<_, String>(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(StorageSummary {
                total: u64::try_from(total).unwrap_or(0),
                oldest: summary_timestamp(oldest),
                newest: summary_timestamp(newest),
                categories,
            })
        })
        .await
    }
}
