//! Route access control
//!
//! One layer per protected router: it authenticates the bearer key, checks
//! the route's scope and stamps the key's user onto the request's
//! [`RequestContext`] so audit rows carry it. With auth disabled every
//! request passes through anonymously.

use std::future::Future;
use std::pin::Pin;

use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderMap, Request},
    middleware::Next,
    response::{IntoResponse, Response},
};

use super::ApiError;
use crate::audit::RequestContext;
use crate::auth::Scope;
use crate::state::AppState;

type AccessFuture = Pin<Box<dyn Future<Output = Response> + Send>>;

/// Layer function for `middleware::from_fn_with_state` guarding `scope`
pub fn require(
    scope: Scope,
) -> impl Fn(State<AppState>, Request<Body>, Next) -> AccessFuture + Clone + Send + Sync + 'static {
    move |State(state), req, next| Box::pin(authorize(state, scope, req, next))
}

async fn authorize(state: AppState, scope: Scope, mut req: Request<Body>, next: Next) -> Response {
    if !state.auth_enabled() {
        return next.run(req).await;
    }

    let Some(token) = bearer_token(req.headers()) else {
        return ApiError::unauthorized("Missing bearer token").into_response();
    };

    let key = match state.auth_store.validate_key(token).await {
        Ok(key) => key,
        Err(err) => {
            tracing::debug!(error = %err, "Rejected API key");
            return ApiError::unauthorized(err.to_string()).into_response();
        }
    };

    if !key.has_scope(scope) {
        tracing::debug!(key_name = %key.name, required_scope = %scope, "API key lacks scope");
        return ApiError::forbidden(format!("The {scope} scope is required")).into_response();
    }

    if let Some(ctx) = req.extensions_mut().get_mut::<RequestContext>() {
        *ctx = std::mem::take(ctx).with_session(key.session_user());
    }
    next.run(req).await
}

/// `Authorization: Bearer <key>`, scheme case-insensitive
fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use axum::{http::StatusCode, middleware, routing::get, Extension, Router};
    use tower::ServiceExt;

    use crate::audit::{AuditService, SqliteAuditStore, SweepSchedule, SystemClock};
    use crate::auth::{ApiKey, AuthStore};
    use crate::config::Config;
    use crate::logging::config::LoggingConfig;
    use crate::logging::{CategoryLogger, Environment};

    fn headers(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, value.parse().unwrap());
        headers
    }

    #[test]
    fn test_bearer_token() {
        assert_eq!(bearer_token(&headers("Bearer k-1")), Some("k-1"));
        assert_eq!(bearer_token(&headers("bearer k-1")), Some("k-1"));
        assert_eq!(bearer_token(&headers("BEARER  k-1 ")), Some("k-1"));
        assert_eq!(bearer_token(&headers("Basic dXNlcjpwYXNz")), None);
        assert_eq!(bearer_token(&headers("Bearerk-1")), None);
        assert_eq!(bearer_token(&headers("Bearer ")), None);
        assert_eq!(bearer_token(&HeaderMap::new()), None);
    }

    async fn state(auth_enabled: bool) -> AppState {
        let logger = Arc::new(CategoryLogger::new(
            Arc::new(LoggingConfig::default()),
            Environment::Test,
        ));
        let audit = AuditService::initialize(
            Arc::new(SqliteAuditStore::in_memory().unwrap()),
            logger,
            Arc::new(SystemClock),
            SweepSchedule::default(),
        )
        .await
        .unwrap();

        let auth_store = AuthStore::with_pepper(None);
        auth_store
            .add_key(ApiKey {
                id: "key-1".to_string(),
                key_hash: auth_store.hash_key("reporter-secret"),
                name: "reporter".to_string(),
                user_id: Some("u-9".to_string()),
                scopes: [Scope::User].into_iter().collect(),
                created_at: chrono::Utc::now(),
                expires_at: None,
            })
            .await;

        let mut config = Config::default();
        config.auth.enabled = auth_enabled;
        AppState::new(config, Arc::new(audit), auth_store)
    }

    /// Echoes the session the access layer stamped, if any
    fn router(state: AppState, scope: Scope) -> Router {
        Router::new()
            .route(
                "/",
                get(|Extension(ctx): Extension<RequestContext>| async move {
                    ctx.session.map(|s| s.id).unwrap_or_default()
                }),
            )
            .layer(middleware::from_fn_with_state(state.clone(), require(scope)))
            .layer(Extension(RequestContext::default()))
            .with_state(state)
    }

    async fn call(router: Router, auth: Option<&str>) -> (StatusCode, String) {
        let mut req = Request::builder().uri("/");
        if let Some(auth) = auth {
            req = req.header(header::AUTHORIZATION, auth);
        }
        let res = router.oneshot(req.body(Body::empty()).unwrap()).await.unwrap();
        let status = res.status();
        let body = axum::body::to_bytes(res.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn test_session_is_stamped_on_context() {
        let state = state(true).await;
        let (status, body) = call(router(state, Scope::User), Some("Bearer reporter-secret")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "u-9");
    }

    #[tokio::test]
    async fn test_rejections_use_envelope() {
        let state = state(true).await;

        let (status, body) = call(router(state.clone(), Scope::User), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        let json: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(json["success"], false);

        let (status, _) = call(router(state.clone(), Scope::User), Some("Bearer nope")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, body) = call(
            router(state, Scope::Admin),
            Some("Bearer reporter-secret"),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        let json: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(json["error"], "The admin scope is required");
    }

    #[tokio::test]
    async fn test_disabled_auth_passes_anonymously() {
        let state = state(false).await;
        let (status, body) = call(router(state, Scope::Admin), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "");
    }
}
