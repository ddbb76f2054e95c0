//! HTTP API for the hexaudit daemon

pub mod access;
pub mod audit;
pub mod context;
pub mod health;

use std::time::Duration;

use axum::{
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::auth::Scope;
use crate::state::AppState;

pub use audit::{AuditLogsQuery, ExportQuery, RecordRequest, RecordResponse};
pub use health::HealthResponse;

/// `{success, data}` / `{success, error}` envelope
#[derive(Clone, Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

/// Error rendered inside the envelope
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::UNAUTHORIZED,
            message: message.into(),
        }
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::FORBIDDEN,
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(self.message),
        };
        (self.status, Json(body)).into_response()
    }
}

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    let cors_enabled = state.config.cors_enabled;
    let slow_request = state.audit.slow_request_threshold();
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Public routes - no auth required
    let public_routes = Router::new().route("/health", get(health::health));

    // Write route - any authenticated user (when auth is enabled).
    let user_routes = Router::new()
        .route("/api/audit-logs", post(audit::record_audit_log))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            access::require(Scope::User),
        ));

    // Admin routes - require auth + admin scope
    let admin_routes = Router::new()
        .route("/api/audit-logs", get(audit::list_audit_logs))
        .route("/api/audit-logs/stats", get(audit::audit_stats))
        .route("/api/audit-logs/export", get(audit::export_audit_logs))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            access::require(Scope::Admin),
        ));

    // CORS is applied only if enabled in config.
    let app = Router::new()
        .merge(public_routes)
        .merge(user_routes)
        .merge(admin_routes)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            context::capture_context,
        ))
        .layer(TraceLayer::new_for_http().on_response(
            move |res: &Response, latency: Duration, _span: &tracing::Span| {
                let status = res.status().as_u16();
                let latency_ms = latency.as_millis() as u64;
                if latency >= slow_request {
                    tracing::warn!(status, latency_ms, "Slow request");
                } else {
                    tracing::debug!(status, latency_ms, "Request finished");
                }
            },
        ))
        .with_state(state);

    if cors_enabled {
        app.layer(cors)
    } else {
        app
    }
}
