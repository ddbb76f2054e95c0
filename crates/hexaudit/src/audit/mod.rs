//! Encrypted SQLite audit trail
//!
//! Every entry's `{message, data}` payload is sealed with AES-256-GCM before
//! it reaches storage. Request-context columns stay in clear so they can be
//! filtered on.

pub mod clock;
pub mod context;
pub mod crypto;
pub mod export;
pub mod keys;
pub mod query;
pub mod retention;
mod schema;
pub mod service;
pub mod store;
pub mod writer;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

pub use clock::{Clock, ManualClock, SystemClock};
pub use context::{RequestContext, SessionUser};
pub use crypto::{AuditCipher, Sealed};
pub use export::{AuditExporter, ExportFile, ExportFormat};
pub use query::{
    parse_date_bound, AuditFilters, AuditLogView, AuditPage, AuditQueryService, AuditStats,
    DateBound, Pagination, Severity,
};
pub use retention::{RetentionPolicy, RetentionSweeper, SweepOutcome, SweeperHandle};
pub use service::{AuditService, SweepSchedule};
pub use store::{AuditStorage, SqliteAuditStore};
pub use writer::{AuditOutcome, AuditWriter};

/// Error type for audit operations
#[derive(Debug, thiserror::Error)]
pub enum AuditError {
    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Encryption error: {0}")]
    Encryption(String),
    #[error("Decryption failed: {0}")]
    Decryption(String),
    #[error("Encryption key initialization failed: {0}")]
    KeyInit(String),
    #[error("Invalid stored value: {0}")]
    InvalidData(String),
    #[error("Background task failed: {0}")]
    Background(String),
}

pub type Result<T> = std::result::Result<T, AuditError>;

/// Decrypted audit payload
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AuditPayload {
    pub message: String,
    #[serde(default)]
    pub data: Option<serde_json::Value>,
}

/// Row about to be inserted into `audit_logs`
#[derive(Clone, Debug)]
pub struct NewAuditEntry {
    pub category: String,
    pub timestamp: DateTime<Utc>,
    pub user_id: Option<String>,
    pub username: Option<String>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub request_id: Option<String>,
    pub encrypted_message: Vec<u8>,
    pub encryption_iv: Vec<u8>,
}

/// Row as read back from `audit_logs`, still encrypted
#[derive(Clone, Debug)]
pub struct StoredAuditEntry {
    pub id: i64,
    pub category: String,
    pub timestamp: DateTime<Utc>,
    pub user_id: Option<String>,
    pub username: Option<String>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub request_id: Option<String>,
    pub encrypted_message: Vec<u8>,
    pub encryption_iv: Vec<u8>,
    pub created_at: DateTime<Utc>,
    /// A stored timestamp failed to parse and was substituted
    pub damaged: bool,
}

/// The singleton `audit_log_config` row
#[derive(Clone)]
pub struct AuditConfigRow {
    pub encryption_key: Vec<u8>,
    pub key_created_at: Option<DateTime<Utc>>,
    pub key_rotated_at: Option<DateTime<Utc>>,
    pub retention_days: i64,
    pub last_cleanup_at: Option<DateTime<Utc>>,
    pub total_logs_written: u64,
    pub total_logs_purged: u64,
}

impl std::fmt::Debug for AuditConfigRow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditConfigRow")
            .field("encryption_key", &"<redacted>")
            .field("key_created_at", &self.key_created_at)
            .field("key_rotated_at", &self.key_rotated_at)
            .field("retention_days", &self.retention_days)
            .field("last_cleanup_at", &self.last_cleanup_at)
            .field("total_logs_written", &self.total_logs_written)
            .field("total_logs_purged", &self.total_logs_purged)
            .finish()
    }
}

/// Aggregates over `audit_logs`
#[derive(Clone, Debug, Default)]
pub struct StorageSummary {
    pub total: u64,
    pub oldest: Option<DateTime<Utc>>,
    pub newest: Option<DateTime<Utc>>,
    pub categories: Vec<String>,
}

/// Fixed-width timestamp encoding; lexical order equals time order.
pub(crate) fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|err| AuditError::InvalidData(format!("bad timestamp {raw:?}: {err}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_timestamp_format_is_fixed_width() {
        let a = Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap();
        let b = a + chrono::Duration::microseconds(1);
        let fa = format_timestamp(a);
        let fb = format_timestamp(b);
        assert_eq!(fa, "2026-01-02T03:04:05.000000Z");
        assert_eq!(fa.len(), fb.len());
        assert!(fa < fb);
        assert_eq!(parse_timestamp(&fb).unwrap(), b);
    }

    #[test]
    fn test_config_row_debug_redacts_key() {
        let row = AuditConfigRow {
            encryption_key: vec![0xAB; 32],
            key_created_at: None,
            key_rotated_at: None,
            retention_days: 30,
            last_cleanup_at: None,
            total_logs_written: 0,
            total_logs_purged: 0,
        };
        let rendered = format!("{row:?}");
        assert!(rendered.contains("<redacted>"));
        assert!(!rendered.contains("171"));
    }
}
