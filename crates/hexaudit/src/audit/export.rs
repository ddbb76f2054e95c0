//! Downloadable CSV/JSON renderings of a filtered query

use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use super::clock::Clock;
use super::query::{AuditFilters, AuditLogView, AuditQueryService, MAX_PAGE_LIMIT};
use super::Result;

/// Rows per export
pub const EXPORT_LIMIT: usize = MAX_PAGE_LIMIT;

const CSV_HEADER: &str = "id,timestamp,category,severity,user_id,username,ip_address,user_agent,request_id,message,data,decryption_error";

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    #[default]
    Json,
    Csv,
}

impl ExportFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Csv => "csv",
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            Self::Json => "application/json",
            Self::Csv => "text/csv; charset=utf-8",
        }
    }
}

impl std::str::FromStr for ExportFormat {
    type Err = ();

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "csv" => Ok(Self::Csv),
            _ => Err(()),
        }
    }
}

/// Rendered export, ready to send as an attachment
#[derive(Clone, Debug)]
pub struct ExportFile {
    pub filename: String,
    pub content_type: &'static str,
    pub body: String,
    pub count: usize,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct JsonExport<'a> {
    exported_at: DateTime<Utc>,
    filters: &'a AuditFilters,
    count: usize,
    truncated: bool,
    logs: &'a [AuditLogView],
}

pub struct AuditExporter {
    query: Arc<AuditQueryService>,
    clock: Arc<dyn Clock>,
}

impl AuditExporter {
    pub fn new(query: Arc<AuditQueryService>, clock: Arc<dyn Clock>) -> Self {
        Self { query, clock }
    }

    pub async fn export(&self, filters: &AuditFilters, format: ExportFormat) -> Result<ExportFile> {
        let page = self.query.query(filters, Some(1), Some(EXPORT_LIMIT)).await?;
        let now = self.clock.now();
        let count = page.logs.len();
        let truncated = page.pagination.total > count;
        if truncated {
            tracing::warn!(
                total = page.pagination.total,
                exported = count,
                "Audit export truncated"
            );
        }

        let body = match format {
            ExportFormat::Json => serde_json::to_string_pretty(&JsonExport {
                exported_at: now,
                filters,
                count,
                truncated,
                logs: &page.logs,
            })?,
            ExportFormat::Csv => render_csv(&page.logs)?,
        };

        Ok(ExportFile {
            filename: format!(
                "audit-logs-{}.{}",
                now.format("%Y%m%dT%H%M%SZ"),
                format.extension()
            ),
            content_type: format.content_type(),
            body,
            count,
        })
    }
}

fn render_csv(logs: &[AuditLogView]) -> Result<String> {
    let mut out = String::from(CSV_HEADER);
    out.push('\n');

    for log in logs {
        let data = match &log.data {
            Some(value) => serde_json::to_string(value)?,
            None => String::new(),
        };
        let fields = [
            log.id.to_string(),
            log.timestamp.to_rfc3339_opts(SecondsFormat::Micros, true),
            log.category.clone(),
            log.severity.as_str().to_string(),
            log.user_id.clone().unwrap_or_default(),
            log.username.clone().unwrap_or_default(),
            log.ip_address.clone().unwrap_or_default(),
            log.user_agent.clone().unwrap_or_default(),
            log.request_id.clone().unwrap_or_default(),
            log.message.clone(),
            data,
            log.decryption_error.to_string(),
        ];
        let line = fields
            .iter()
            .map(|f| csv_escape_field(f))
            .collect::<Vec<_>>()
            .join(",");
        out.push_str(&line);
        out.push('\n');
    }
    Ok(out)
}

fn csv_escape_field(field: &str) -> String {
    // Prevent spreadsheet formula injection by prefixing a single quote.
    let mut field = field.to_string();
    if matches!(
        field.chars().next(),
        Some('=') | Some('+') | Some('-') | Some('@')
    ) {
        field.insert(0, '\'');
    }

    let needs_quotes =
        field.contains(',') || field.contains('"') || field.contains('\n') || field.contains('\r');
    if !needs_quotes {
        return field;
    }

    let escaped = field.replace('"', "\"\"");
    format!("\"{escaped}\"")
}
