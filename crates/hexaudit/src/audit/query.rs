//! Filtered, paginated, decrypting reads over the audit trail

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

use super::crypto::AuditCipher;
use super::store::AuditStorage;
use super::{AuditError, AuditPayload, Result, StoredAuditEntry};

pub const DEFAULT_PAGE_LIMIT: usize = 50;
pub const MAX_PAGE_LIMIT: usize = 10_000;

/// Shown in place of the message when a row cannot be decrypted
pub const DECRYPTION_FAILED_MESSAGE: &str = "[Decryption failed]";

const CRITICAL_MARKERS: &[&str] = &["fail", "error", "delete", "denied"];
const WARNING_MARKERS: &[&str] = &["warn", "status_change", "vacuum", "migrate", "purge"];

/// Severity derived from the category name
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl std::str::FromStr for Severity {
    type Err = ();

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "info" => Ok(Self::Info),
            "warning" | "warn" => Ok(Self::Warning),
            "critical" => Ok(Self::Critical),
            _ => Err(()),
        }
    }
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Critical => "critical",
        }
    }

    /// Classify a category. Must agree with [`Severity::sql_condition`].
    pub fn for_category(category: &str) -> Self {
        let lower = category.to_lowercase();
        if CRITICAL_MARKERS.iter().any(|m| lower.contains(m)) {
            Self::Critical
        } else if WARNING_MARKERS.iter().any(|m| lower.contains(m)) {
            Self::Warning
        } else {
            Self::Info
        }
    }

    /// SQL condition over `category` selecting this severity, with its LIKE patterns
    pub(crate) fn sql_condition(&self) -> (String, Vec<String>) {
        fn any_of(markers: &[&str]) -> (String, Vec<String>) {
            let clause = vec!["category LIKE ? ESCAPE '\\'"; markers.len()].join(" OR ");
            let patterns = markers
                .iter()
                .map(|m| format!("%{}%", m.replace('_', "\\_")))
                .collect();
            (format!("({clause})"), patterns)
        }

        let (critical, critical_patterns) = any_of(CRITICAL_MARKERS);
        let (warning, warning_patterns) = any_of(WARNING_MARKERS);

        match self {
            Self::Critical => (critical, critical_patterns),
            Self::Warning => (
                format!("({warning} AND NOT {critical})"),
                warning_patterns.into_iter().chain(critical_patterns).collect(),
            ),
            Self::Info => (
                format!("(NOT {critical} AND NOT {warning})"),
                critical_patterns.into_iter().chain(warning_patterns).collect(),
            ),
        }
    }
}

/// Conjunctive filter set; `None` means unconstrained
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditFilters {
    /// Inclusive lower bound
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_date: Option<DateTime<Utc>>,
    /// Inclusive upper bound
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_date: Option<DateTime<Utc>>,
    /// Exact category
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub severity: Option<Severity>,
    /// Category namespace (text before the first `.`)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

/// Which end of a range a date-only value should expand to
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DateBound {
    Start,
    End,
}

/// Parse an RFC 3339 instant or a `YYYY-MM-DD` date.
///
/// A bare date expands to the first or last microsecond of that UTC day.
pub fn parse_date_bound(raw: &str, bound: DateBound) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }

    let date = NaiveDate::parse_from_str(raw, "%Y-%m-%d").ok()?;
    let time = match bound {
        DateBound::Start => NaiveTime::MIN,
        DateBound::End => NaiveTime::from_hms_micro_opt(23, 59, 59, 999_999)?,
    };
    Some(date.and_time(time).and_utc())
}

/// One decrypted row
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuditLogView {
    pub id: i64,
    pub category: String,
    pub severity: Severity,
    pub timestamp: DateTime<Utc>,
    pub user_id: Option<String>,
    pub username: Option<String>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub request_id: Option<String>,
    pub message: String,
    pub data: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub decryption_error: bool,
    /// Stored timestamps were unreadable; `timestamp` is a substitute
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub corrupt: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    pub page: usize,
    pub limit: usize,
    pub total: usize,
    pub pages: usize,
}

impl Pagination {
    fn new(page: usize, limit: usize, total: usize) -> Self {
        Self {
            page,
            limit,
            total,
            pages: total.div_ceil(limit),
        }
    }

    fn offset(&self) -> usize {
        (self.page - 1).saturating_mul(self.limit)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuditPage {
    pub logs: Vec<AuditLogView>,
    pub pagination: Pagination,
}

/// Aggregates used to populate the admin filter UI
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditStats {
    pub total_logs: u64,
    pub oldest_log: Option<DateTime<Utc>>,
    pub newest_log: Option<DateTime<Utc>>,
    pub categories_tracked: Vec<String>,
    pub total_logs_written: u64,
    pub total_logs_purged: u64,
    pub last_cleanup_at: Option<DateTime<Utc>>,
    pub retention_days: i64,
    pub key_created_at: Option<DateTime<Utc>>,
}

pub struct AuditQueryService {
    store: Arc<dyn AuditStorage>,
    cipher: Arc<AuditCipher>,
}

impl AuditQueryService {
    pub fn new(store: Arc<dyn AuditStorage>, cipher: Arc<AuditCipher>) -> Self {
        Self { store, cipher }
    }

    /// Fetch one page. `page` is 1-based; `limit` is clamped to `1..=MAX_PAGE_LIMIT`.
    pub async fn query(
        &self,
        filters: &AuditFilters,
        page: Option<usize>,
        limit: Option<usize>,
    ) -> Result<AuditPage> {
        let page = page.unwrap_or(1).max(1);
        let limit = limit.unwrap_or(DEFAULT_PAGE_LIMIT).clamp(1, MAX_PAGE_LIMIT);

        let total = self.store.count_entries(filters).await?;
        let pagination = Pagination::new(page, limit, total);
        let rows = self
            .store
            .select_entries(filters, limit, pagination.offset())
            .await?;

        let logs = rows.into_iter().map(|row| self.decrypt_row(row)).collect();
        Ok(AuditPage { logs, pagination })
    }

    /// Decrypt one row, isolating failures to that row
    fn decrypt_row(&self, row: StoredAuditEntry) -> AuditLogView {
        let (message, data, decryption_error) =
            match self.open_payload(&row.encrypted_message, &row.encryption_iv) {
                Ok(payload) => (payload.message, payload.data, false),
                Err(err) => {
                    tracing::warn!(id = row.id, category = %row.category, error = %err, "Audit row failed to decrypt");
                    (DECRYPTION_FAILED_MESSAGE.to_string(), None, true)
                }
            };

        AuditLogView {
            id: row.id,
            severity: Severity::for_category(&row.category),
            category: row.category,
            timestamp: row.timestamp,
            user_id: row.user_id,
            username: row.username,
            ip_address: row.ip_address,
            user_agent: row.user_agent,
            request_id: row.request_id,
            message,
            data,
            created_at: row.created_at,
            decryption_error,
            corrupt: row.damaged,
        }
    }

    fn open_payload(&self, blob: &[u8], iv: &[u8]) -> Result<AuditPayload> {
        let plain = self.cipher.decrypt(blob, iv)?;
        let text = String::from_utf8(plain)
            .map_err(|_| AuditError::Decryption("plaintext is not UTF-8".to_string()))?;

        // Payloads written by other tools may be a bare string
        Ok(serde_json::from_str::<AuditPayload>(&text).unwrap_or(AuditPayload {
            message: text,
            data: None,
        }))
    }

    pub async fn stats(&self) -> Result<AuditStats> {
        let summary = self.store.summary().await?;
        let config = self.store.load_config().await?;

        Ok(AuditStats {
            total_logs: summary.total,
            oldest_log: summary.oldest,
            newest_log: summary.newest,
            categories_tracked: summary.categories,
            total_logs_written: config.as_ref().map_or(0, |c| c.total_logs_written),
            total_logs_purged: config.as_ref().map_or(0, |c| c.total_logs_purged),
            last_cleanup_at: config.as_ref().and_then(|c| c.last_cleanup_at),
            retention_days: config.as_ref().map_or(30, |c| c.retention_days),
            key_created_at: config.as_ref().and_then(|c| c.key_created_at),
        })
    }
}
