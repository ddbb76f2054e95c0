//! Common test utilities for hexaudit integration tests
#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::http::{Request, StatusCode};
use axum::Router;
use chrono::{DateTime, SubsecRound, Utc};
use tower::ServiceExt;

use hexaudit::api::create_router;
use hexaudit::audit::{AuditService, ManualClock, SqliteAuditStore, SweepSchedule};
use hexaudit::auth::{ApiKey, AuthStore, Scope};
use hexaudit::config::Config;
use hexaudit::logging::config::LoggingConfig;
use hexaudit::logging::{CategoryLogger, Environment};
use hexaudit::state::AppState;

pub const USER_KEY: &str = "user-key-123";
pub const ADMIN_KEY: &str = "admin-key-456";

pub const WHITELIST: &[&str] = &[
    "user.login",
    "user.logout",
    "user.failed_login",
    "ticket.create",
    "ticket.delete",
    "ticket.status_change",
    "import.complete",
];

/// In-process daemon over a temp-dir database
pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub store: SqliteAuditStore,
    pub clock: Arc<ManualClock>,
    pub test_dir: tempfile::TempDir,
}

pub struct TestAppBuilder {
    auth_enabled: bool,
    audit_enabled: bool,
    trusted_proxies: Vec<String>,
    start: DateTime<Utc>,
}

impl Default for TestAppBuilder {
    fn default() -> Self {
        Self {
            auth_enabled: false,
            audit_enabled: true,
            trusted_proxies: Vec::new(),
            start: Utc::now().trunc_subsecs(6),
        }
    }
}

impl TestAppBuilder {
    pub fn with_auth(mut self) -> Self {
        self.auth_enabled = true;
        self
    }

    pub fn audit_disabled(mut self) -> Self {
        self.audit_enabled = false;
        self
    }

    pub fn trusted_proxy(mut self, ip: &str) -> Self {
        self.trusted_proxies.push(ip.to_string());
        self
    }

    pub async fn build(self) -> TestApp {
        let test_dir = tempfile::tempdir().expect("Failed to create test directory");
        let store =
            SqliteAuditStore::open(test_dir.path().join("audit.db")).expect("Failed to open store");

        let mut logging = LoggingConfig::default();
        logging.global.audit_enabled = self.audit_enabled;
        logging.audit.whitelist = WHITELIST.iter().map(|s| s.to_string()).collect();
        let logger = Arc::new(CategoryLogger::new(Arc::new(logging), Environment::Test));

        let clock = Arc::new(ManualClock::new(self.start));
        let audit = AuditService::initialize(
            Arc::new(store.clone()),
            logger,
            clock.clone(),
            SweepSchedule::default(),
        )
        .await
        .expect("Failed to initialize audit service");

        let mut config = Config {
            cors_enabled: false,
            trusted_proxies: self.trusted_proxies,
            audit_db: test_dir.path().join("audit.db"),
            ..Default::default()
        };
        config.auth.enabled = self.auth_enabled;

        let auth_store = AuthStore::with_pepper(None);
        for (name, raw, scope, user_id) in [
            ("reporter", USER_KEY, Scope::User, Some("u-reporter")),
            ("security-admin", ADMIN_KEY, Scope::Admin, None),
        ] {
            auth_store
                .add_key(ApiKey {
                    id: format!("{name}-id"),
                    key_hash: auth_store.hash_key(raw),
                    name: name.to_string(),
                    user_id: user_id.map(str::to_string),
                    scopes: [scope].into_iter().collect(),
                    created_at: Utc::now(),
                    expires_at: None,
                })
                .await;
        }

        let state = AppState::new(config, Arc::new(audit), auth_store);
        let router = create_router(state.clone());

        TestApp {
            router,
            state,
            store,
            clock,
            test_dir,
        }
    }
}

impl TestApp {
    pub fn builder() -> TestAppBuilder {
        TestAppBuilder::default()
    }

    pub async fn new() -> Self {
        Self::builder().build().await
    }

    /// Send a request from `peer` and return the raw response parts
    pub async fn send(&self, mut req: Request<Body>, peer: &str) -> (StatusCode, axum::http::HeaderMap, Vec<u8>) {
        let addr: SocketAddr = format!("{peer}:50000").parse().expect("peer address");
        req.extensions_mut().insert(ConnectInfo(addr));

        let res = self
            .router
            .clone()
            .oneshot(req)
            .await
            .expect("router is infallible");
        let status = res.status();
        let headers = res.headers().clone();
        let body = axum::body::to_bytes(res.into_body(), usize::MAX)
            .await
            .expect("Failed to read body")
            .to_vec();
        (status, headers, body)
    }

    pub async fn get_json(&self, uri: &str, key: Option<&str>) -> (StatusCode, serde_json::Value) {
        let mut builder = Request::builder().method("GET").uri(uri);
        if let Some(key) = key {
            builder = builder.header("Authorization", format!("Bearer {key}"));
        }
        let req = builder.body(Body::empty()).expect("request");
        let (status, _, body) = self.send(req, "127.0.0.1").await;
        (status, parse(&body))
    }

    pub async fn post_json(
        &self,
        uri: &str,
        key: Option<&str>,
        body: serde_json::Value,
    ) -> (StatusCode, serde_json::Value) {
        let mut builder = Request::builder()
            .method("POST")
            .uri(uri)
            .header("Content-Type", "application/json")
            .header("User-Agent", "tracker-web/2.1");
        if let Some(key) = key {
            builder = builder.header("Authorization", format!("Bearer {key}"));
        }
        let req = builder
            .body(Body::from(body.to_string()))
            .expect("request");
        let (status, _, body) = self.send(req, "127.0.0.1").await;
        (status, parse(&body))
    }
}

fn parse(body: &[u8]) -> serde_json::Value {
    if body.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(body).unwrap_or_else(|_| {
            serde_json::Value::String(String::from_utf8_lossy(body).into_owned())
        })
    }
}
