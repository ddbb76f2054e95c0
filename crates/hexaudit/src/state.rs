//! Shared application state for the daemon

use std::collections::HashSet;
use std::net::IpAddr;
use std::sync::Arc;

use crate::audit::AuditService;
use crate::auth::AuthStore;
use crate::config::Config;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// Audit writer, reader and exporter
    pub audit: Arc<AuditService>,
    /// API keys
    pub auth_store: Arc<AuthStore>,
    /// Configuration
    pub config: Arc<Config>,
    /// Peers whose forwarding headers are believed
    pub trusted_proxies: Arc<HashSet<IpAddr>>,
    /// Start time
    pub started_at: chrono::DateTime<chrono::Utc>,
}

impl AppState {
    /// Create new application state around an initialized audit service
    pub fn new(config: Config, audit: Arc<AuditService>, auth_store: AuthStore) -> Self {
        let trusted_proxies: HashSet<IpAddr> = config.trusted_proxy_ips().into_iter().collect();
        if !trusted_proxies.is_empty() {
            tracing::info!(
                count = trusted_proxies.len(),
                "Configured trusted proxies for client IP detection"
            );
        }

        Self {
            audit,
            auth_store: Arc::new(auth_store),
            config: Arc::new(config),
            trusted_proxies: Arc::new(trusted_proxies),
            started_at: chrono::Utc::now(),
        }
    }

    pub fn auth_enabled(&self) -> bool {
        self.config.auth.enabled
    }

    /// Get daemon uptime in seconds
    pub fn uptime_secs(&self) -> i64 {
        (chrono::Utc::now() - self.started_at).num_seconds()
    }
}
