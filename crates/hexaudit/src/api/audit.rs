//! Audit log endpoints

use axum::{
    extract::{rejection::JsonRejection, Extension, Query, State},
    http::header,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

use super::{ApiError, ApiResponse};
use crate::audit::{
    parse_date_bound, AuditFilters, AuditPage, AuditStats, DateBound, ExportFormat,
    RequestContext, Severity,
};
use crate::state::AppState;

#[derive(Clone, Debug, Deserialize)]
pub struct RecordRequest {
    pub category: Option<String>,
    pub message: Option<String>,
    #[serde(default)]
    pub data: Option<serde_json::Value>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RecordResponse {
    /// `recorded` or `dropped`
    pub status: String,
}

/// Filter parameters shared by list and export
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditLogsQuery {
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub category: Option<String>,
    pub severity: Option<String>,
    pub scope: Option<String>,
    pub page: Option<String>,
    pub limit: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportQuery {
    #[serde(flatten)]
    pub filters: AuditLogsQuery,
    pub format: Option<String>,
}

/// Empty query values mean "not set"
fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

fn parse_number(name: &str, value: &Option<String>) -> Result<Option<usize>, ApiError> {
    non_empty(value)
        .map(|v| {
            v.parse::<usize>()
                .map_err(|_| ApiError::bad_request(format!("Invalid {name}: {v}")))
        })
        .transpose()
}

impl AuditLogsQuery {
    pub fn to_filters(&self) -> Result<AuditFilters, ApiError> {
        let date = |name: &str, value: &Option<String>, bound| {
            non_empty(value)
                .map(|v| {
                    parse_date_bound(v, bound)
                        .ok_or_else(|| ApiError::bad_request(format!("Invalid {name}: {v}")))
                })
                .transpose()
        };

        let start_date = date("startDate", &self.start_date, DateBound::Start)?;
        let end_date = date("endDate", &self.end_date, DateBound::End)?;
        if let (Some(start), Some(end)) = (start_date, end_date) {
            if start > end {
                return Err(ApiError::bad_request("startDate is after endDate"));
            }
        }

        let severity = non_empty(&self.severity)
            .map(|v| {
                v.parse::<Severity>()
                    .map_err(|()| ApiError::bad_request(format!("Invalid severity: {v}")))
            })
            .transpose()?;

        Ok(AuditFilters {
            start_date,
            end_date,
            category: non_empty(&self.category).map(str::to_string),
            severity,
            scope: non_empty(&self.scope).map(str::to_string),
        })
    }
}

fn storage_error(err: crate::audit::AuditError) -> ApiError {
    tracing::error!(error = %err, "Audit storage request failed");
    ApiError::internal(err.to_string())
}

/// POST /api/audit-logs
pub async fn record_audit_log(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    body: Result<Json<RecordRequest>, JsonRejection>,
) -> Result<Json<ApiResponse<RecordResponse>>, ApiError> {
    let Json(body) = body.map_err(|e| ApiError::bad_request(e.body_text()))?;

    let category = non_empty(&body.category)
        .ok_or_else(|| ApiError::bad_request("category is required"))?;
    let message = non_empty(&body.message)
        .ok_or_else(|| ApiError::bad_request("message is required"))?;

    let outcome = state
        .audit
        .audit(category, message, body.data, None, &ctx)
        .await;
    let status = if outcome.is_recorded() {
        "recorded"
    } else {
        "dropped"
    };

    Ok(ApiResponse::ok(RecordResponse {
        status: status.to_string(),
    }))
}

/// GET /api/audit-logs/stats
pub async fn audit_stats(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<AuditStats>>, ApiError> {
    let stats = state.audit.stats().await.map_err(storage_error)?;
    Ok(ApiResponse::ok(stats))
}

/// GET /api/audit-logs
pub async fn list_audit_logs(
    State(state): State<AppState>,
    Query(query): Query<AuditLogsQuery>,
) -> Result<Json<ApiResponse<AuditPage>>, ApiError> {
    let filters = query.to_filters()?;
    let page = parse_number("page", &query.page)?;
    let limit = parse_number("limit", &query.limit)?;

    let result = state
        .audit
        .query(&filters, page, limit)
        .await
        .map_err(storage_error)?;
    Ok(ApiResponse::ok(result))
}

/// GET /api/audit-logs/export
pub async fn export_audit_logs(
    State(state): State<AppState>,
    Query(query): Query<ExportQuery>,
) -> Result<Response, ApiError> {
    let filters = query.filters.to_filters()?;
    let format = match non_empty(&query.format) {
        Some(v) => v
            .parse::<ExportFormat>()
            .map_err(|()| ApiError::bad_request(format!("Invalid format: {v}")))?,
        None => ExportFormat::Json,
    };

    let file = state
        .audit
        .export(&filters, format)
        .await
        .map_err(storage_error)?;

    tracing::info!(
        format = format.extension(),
        count = file.count,
        "Exported audit logs"
    );

    let disposition = format!("attachment; filename=\"{}\"", file.filename);
    Ok((
        [
            (header::CONTENT_TYPE, file.content_type.to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        file.body,
    )
        .into_response())
}
