//! Configuration for the hexaudit daemon

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::audit::SweepSchedule;
use crate::auth::{ApiKey, AuthStore, Scope};
use crate::logging::Environment;

/// Substitute every `${VAR}` with the variable's value
fn interpolate_env(raw: &str) -> anyhow::Result<String> {
    let mut resolved = String::with_capacity(raw.len());
    let mut remaining = raw;

    while let Some((literal, tail)) = remaining.split_once("${") {
        let (var, after) = tail
            .split_once('}')
            .ok_or_else(|| anyhow::anyhow!("unterminated ${{ reference"))?;
        anyhow::ensure!(!var.is_empty(), "empty ${{}} reference");
        let value = std::env::var(var)
            .with_context(|| format!("environment variable {var} is not set"))?;
        resolved.push_str(literal);
        resolved.push_str(&value);
        remaining = after;
    }

    resolved.push_str(remaining);
    Ok(resolved)
}

/// An API key value: a literal, `${VAR}` references, or `file:<path>`
fn resolve_api_key(raw: &str) -> anyhow::Result<String> {
    let value = interpolate_env(raw)?;
    let value = value.trim();

    let key = match value.strip_prefix("file:") {
        Some(path) => {
            let path = path.trim();
            std::fs::read_to_string(path)
                .with_context(|| format!("cannot read key file {path}"))?
                .trim()
                .to_string()
        }
        None => value.to_string(),
    };
    anyhow::ensure!(!key.is_empty(), "key resolves to an empty string");
    Ok(key)
}

/// Config files probed by [`Config::load_default`], first match wins
fn default_config_paths() -> Vec<PathBuf> {
    let mut roots = vec![PathBuf::from("/etc/hexaudit")];
    roots.extend(dirs::config_dir().map(|dir| dir.join("hexaudit")));

    let mut paths: Vec<PathBuf> = roots
        .iter()
        .flat_map(|root| ["config.yaml", "config.toml"].map(|name| root.join(name)))
        .collect();
    paths.extend(["hexaudit.yaml", "hexaudit.toml"].map(PathBuf::from));
    paths
}

/// Host part of a `HOST:PORT` listen address is loopback
fn is_loopback_listen(listen: &str) -> bool {
    if let Ok(addr) = listen.parse::<std::net::SocketAddr>() {
        return addr.ip().is_loopback();
    }
    listen
        .rsplit_once(':')
        .is_some_and(|(host, _)| host.eq_ignore_ascii_case("localhost"))
}

const REDACTED: &str = "<redacted>";

/// Configuration for a single API key
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ApiKeyConfig {
    /// Human-readable name for the key; recorded as the audit username
    pub name: String,
    /// The actual API key (will be hashed, never stored plaintext)
    pub key: String,
    /// Application user the key acts as
    #[serde(default)]
    pub user_id: Option<String>,
    /// Scopes granted to this key (user, admin, *)
    #[serde(default)]
    pub scopes: Vec<String>,
    /// Optional expiration time (ISO 8601 format)
    #[serde(default)]
    pub expires_at: Option<chrono::DateTime<chrono::Utc>>,
}

/// Authentication configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Whether authentication is required for API endpoints
    #[serde(default)]
    pub enabled: bool,
    /// API keys
    #[serde(default)]
    pub api_keys: Vec<ApiKeyConfig>,
}

/// Retention sweeper timing
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetentionConfig {
    /// Seconds between wake-ups
    #[serde(default = "default_check_interval_secs")]
    pub check_interval_secs: u64,
    /// Minimum hours between two sweeps
    #[serde(default = "default_min_interval_hours")]
    pub min_interval_hours: i64,
}

fn default_check_interval_secs() -> u64 {
    60 * 60
}

fn default_min_interval_hours() -> i64 {
    23
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            check_interval_secs: default_check_interval_secs(),
            min_interval_hours: default_min_interval_hours(),
        }
    }
}

impl RetentionConfig {
    pub fn schedule(&self) -> SweepSchedule {
        SweepSchedule {
            check_interval: Duration::from_secs(self.check_interval_secs.max(1)),
            min_interval: chrono::Duration::try_hours(self.min_interval_hours.max(0))
                .unwrap_or(chrono::Duration::MAX),
        }
    }
}

/// Daemon configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    /// Listen address (e.g., "0.0.0.0:8080")
    #[serde(default = "default_listen")]
    pub listen: String,

    /// Path to SQLite audit database
    #[serde(default = "default_audit_db")]
    pub audit_db: PathBuf,

    /// Path to the JSON logging/whitelist configuration
    #[serde(default = "default_logging_config")]
    pub logging_config: PathBuf,

    /// production, development or test; `HEXAUDIT_ENV` wins when set
    #[serde(default)]
    pub environment: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable CORS for browser access
    #[serde(default = "default_cors")]
    pub cors_enabled: bool,

    /// Peers allowed to set X-Forwarded-For / X-Real-IP
    #[serde(default)]
    pub trusted_proxies: Vec<String>,

    /// API authentication configuration
    #[serde(default)]
    pub auth: AuthConfig,

    #[serde(default)]
    pub retention: RetentionConfig,
}

fn default_listen() -> String {
    "127.0.0.1:9876".to_string()
}

fn default_audit_db() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("hexaudit")
        .join("audit.db")
}

fn default_logging_config() -> PathBuf {
    PathBuf::from("config/logging.json")
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_cors() -> bool {
    true
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            audit_db: default_audit_db(),
            logging_config: default_logging_config(),
            environment: None,
            log_level: default_log_level(),
            cors_enabled: default_cors(),
            trusted_proxies: Vec::new(),
            auth: AuthConfig::default(),
            retention: RetentionConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from file
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;

        // Support both YAML and TOML based on extension
        let mut config: Config = if path
            .as_ref()
            .extension()
            .is_some_and(|e| e == "yaml" || e == "yml")
        {
            serde_yaml::from_str(&content)?
        } else {
            toml::from_str(&content)?
        };

        config.expand_env_refs()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if !self.auth.enabled && !is_loopback_listen(&self.listen) {
            anyhow::bail!(
                "Refusing to serve audit logs on {} without authentication; enable auth or listen on loopback",
                self.listen
            );
        }
        for (idx, proxy) in self.trusted_proxies.iter().enumerate() {
            proxy.parse::<IpAddr>().map_err(|e| {
                anyhow::anyhow!("Invalid trusted_proxies[{}] value {}: {}", idx, proxy, e)
            })?;
        }
        if let Some(env) = &self.environment {
            env.parse::<Environment>()
                .map_err(|()| anyhow::anyhow!("Invalid environment: {}", env))?;
        }
        Ok(())
    }

    /// Resolve `${VAR}` and `file:` references in API keys
    pub fn expand_env_refs(&mut self) -> anyhow::Result<()> {
        for key in &mut self.auth.api_keys {
            key.key = resolve_api_key(&key.key)
                .with_context(|| format!("auth.api_keys entry {:?}", key.name))?;
        }
        Ok(())
    }

    /// Load the first config file found in the default locations.
    ///
    /// A file that exists but fails to parse or validate is an error; with no
    /// file at all the built-in defaults apply.
    pub fn load_default() -> anyhow::Result<Self> {
        let Some(path) = default_config_paths().into_iter().find(|p| p.is_file()) else {
            return Ok(Self::default());
        };

        let config = Self::from_file(&path)
            .and_then(|config| config.validate().map(|()| config))
            .with_context(|| format!("invalid hexaudit config {}", path.display()))?;
        tracing::info!(path = %path.display(), "Loaded config");
        Ok(config)
    }

    /// Copy safe to print: API key secrets replaced
    pub fn redacted(&self) -> Self {
        let mut config = self.clone();
        for key in &mut config.auth.api_keys {
            key.key = REDACTED.to_string();
        }
        config
    }

    /// Get the tracing level filter
    pub fn tracing_level(&self) -> tracing::Level {
        match self.log_level.to_lowercase().as_str() {
            "trace" => tracing::Level::TRACE,
            "debug" => tracing::Level::DEBUG,
            "info" => tracing::Level::INFO,
            "warn" | "warning" => tracing::Level::WARN,
            "error" => tracing::Level::ERROR,
            _ => tracing::Level::INFO,
        }
    }

    /// Effective environment: `HEXAUDIT_ENV`, then the config file, then development
    pub fn environment(&self) -> Environment {
        Environment::from_env()
            .or_else(|| self.environment.as_deref().and_then(|v| v.parse().ok()))
            .unwrap_or_default()
    }

    /// Parsed trusted proxy addresses; invalid entries are skipped
    pub fn trusted_proxy_ips(&self) -> Vec<IpAddr> {
        self.trusted_proxies
            .iter()
            .filter_map(|p| p.parse().ok())
            .collect()
    }

    /// Load API keys from config into an AuthStore.
    pub async fn load_auth_store(&self) -> anyhow::Result<AuthStore> {
        let store = AuthStore::new();

        if self.auth.enabled && !store.has_pepper() {
            tracing::warn!(
                "Auth is enabled but HEXAUDIT_AUTH_PEPPER is not set; API key hashing will use raw SHA-256"
            );
        }

        for (idx, key_config) in self.auth.api_keys.iter().enumerate() {
            // Parse scopes
            let scopes = if key_config.scopes.is_empty() {
                // Default to user if no scopes specified.
                std::collections::HashSet::from([Scope::User])
            } else {
                let mut scopes = std::collections::HashSet::new();
                for scope_str in &key_config.scopes {
                    let scope = scope_str.parse::<Scope>().map_err(|()| {
                        anyhow::anyhow!(
                            "Invalid auth.api_keys[{}].scopes entry: {}",
                            idx,
                            scope_str
                        )
                    })?;
                    scopes.insert(scope);
                }
                scopes
            };

            let api_key = ApiKey {
                id: uuid::Uuid::new_v4().to_string(),
                key_hash: store.hash_key(&key_config.key),
                name: key_config.name.clone(),
                user_id: key_config.user_id.clone(),
                scopes,
                created_at: chrono::Utc::now(),
                expires_at: key_config.expires_at,
            };

            store.add_key(api_key).await;
        }

        if self.auth.enabled && self.auth.api_keys.is_empty() {
            tracing::warn!("Auth is enabled but no API keys configured");
        }

        Ok(store)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.listen, "127.0.0.1:9876");
        assert!(config.cors_enabled);
        assert!(config.audit_db.ends_with("hexaudit/audit.db"));
        assert_eq!(config.retention.check_interval_secs, 3600);
        assert_eq!(config.retention.min_interval_hours, 23);
    }

    #[test]
    fn test_config_from_toml() {
        let toml = r#"
listen = "0.0.0.0:8080"
log_level = "debug"
logging_config = "/srv/tracker/logging.json"
trusted_proxies = ["10.0.0.1"]

[retention]
check_interval_secs = 60
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.listen, "0.0.0.0:8080");
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.logging_config, PathBuf::from("/srv/tracker/logging.json"));
        assert_eq!(config.retention.check_interval_secs, 60);
        assert_eq!(config.retention.min_interval_hours, 23);
        // Public listener without auth
        assert!(config.validate().is_err());

        let schedule = config.retention.schedule();
        assert_eq!(schedule.check_interval, Duration::from_secs(60));
        assert_eq!(schedule.min_interval, chrono::Duration::hours(23));
    }

    #[test]
    fn test_from_file_by_extension() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;

        let yaml = dir.path().join("hexaudit.yaml");
        std::fs::write(&yaml, "listen: \"127.0.0.1:1\"\nenvironment: production\n")?;
        let config = Config::from_file(&yaml)?;
        assert_eq!(config.listen, "127.0.0.1:1");
        assert_eq!(config.environment.as_deref(), Some("production"));

        let toml = dir.path().join("hexaudit.toml");
        std::fs::write(&toml, "listen = \"127.0.0.1:2\"\n")?;
        assert_eq!(Config::from_file(&toml)?.listen, "127.0.0.1:2");

        let broken = dir.path().join("broken.yaml");
        std::fs::write(&broken, "listen: [unclosed\n")?;
        assert!(Config::from_file(&broken).is_err());
        Ok(())
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let config = Config {
            trusted_proxies: vec!["not-an-ip".to_string()],
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = Config {
            environment: Some("staging".to_string()),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_tracing_level() {
        let config = Config {
            log_level: "trace".to_string(),
            ..Default::default()
        };
        assert_eq!(config.tracing_level(), tracing::Level::TRACE);

        let config = Config {
            log_level: "invalid".to_string(),
            ..Default::default()
        };
        assert_eq!(config.tracing_level(), tracing::Level::INFO);
    }

    #[test]
    fn test_config_with_auth_from_toml() {
        let toml = r#"
[auth]
enabled = true

[[auth.api_keys]]
name = "tracker-web"
key = "secret-key-123"
user_id = "svc-web"
scopes = ["user"]

[[auth.api_keys]]
name = "admin-key"
key = "admin-secret"
scopes = ["*"]
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert!(config.auth.enabled);
        assert_eq!(config.auth.api_keys.len(), 2);
        assert_eq!(config.auth.api_keys[0].user_id.as_deref(), Some("svc-web"));
        assert_eq!(config.auth.api_keys[0].scopes, vec!["user"]);
        assert_eq!(config.auth.api_keys[1].scopes, vec!["*"]);
    }

    #[tokio::test]
    async fn test_load_auth_store() -> anyhow::Result<()> {
        let toml = r#"
[auth]
enabled = true

[[auth.api_keys]]
name = "test"
key = "my-secret-key"
user_id = "u1"
scopes = ["admin"]

[[auth.api_keys]]
name = "default-scopes"
key = "my-key"
"#;
        let config: Config = toml::from_str(toml)?;
        let store = config.load_auth_store().await?;

        let key = store.validate_key("my-secret-key").await?;
        assert_eq!(key.name, "test");
        assert_eq!(key.user_id.as_deref(), Some("u1"));
        assert!(key.has_scope(Scope::Admin));

        // Empty scopes default to user
        let key = store.validate_key("my-key").await?;
        assert!(key.has_scope(Scope::User));
        assert!(!key.has_scope(Scope::Admin));
        Ok(())
    }

    #[tokio::test]
    async fn test_invalid_scope_is_rejected() {
        let toml = r#"
[[auth.api_keys]]
name = "bad"
key = "k"
scopes = ["check"]
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert!(config.load_auth_store().await.is_err());
    }

    #[test]
    fn test_expands_env_refs_in_keys() -> anyhow::Result<()> {
        std::env::set_var("HEXAUDIT_TEST_API_KEY", "secret-from-env");

        let dir = tempfile::tempdir()?;
        let path = dir.path().join("hexaudit.yaml");
        std::fs::write(
            &path,
            r#"
auth:
  enabled: true
  api_keys:
    - name: "env"
      key: "${HEXAUDIT_TEST_API_KEY}"
      scopes: ["user"]
"#,
        )?;

        let config = Config::from_file(&path)?;
        assert_eq!(config.auth.api_keys[0].key, "secret-from-env");
        Ok(())
    }

    #[test]
    fn test_interpolate_env_errors() {
        assert!(interpolate_env("${UNCLOSED").is_err());
        assert!(interpolate_env("${}").is_err());
        assert!(interpolate_env("${HEXAUDIT_TEST_SURELY_UNSET_VAR}").is_err());
        assert_eq!(interpolate_env("plain").unwrap(), "plain");
    }

    #[test]
    fn test_resolve_api_key() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let secret = dir.path().join("key.txt");
        std::fs::write(&secret, "from-file\n")?;
        assert_eq!(
            resolve_api_key(&format!("file:{}", secret.display()))?,
            "from-file"
        );
        assert_eq!(resolve_api_key("  literal ")?, "literal");

        let empty = dir.path().join("empty.txt");
        std::fs::write(&empty, "\n")?;
        assert!(resolve_api_key(&format!("file:{}", empty.display())).is_err());
        assert!(resolve_api_key("file:/nonexistent/hexaudit/key").is_err());
        Ok(())
    }

    #[test]
    fn test_unauthenticated_listener_must_be_loopback() {
        for listen in ["127.0.0.1:9876", "[::1]:9876", "localhost:9876"] {
            let config = Config {
                listen: listen.to_string(),
                ..Default::default()
            };
            assert!(config.validate().is_ok(), "{listen}");
        }

        for listen in ["0.0.0.0:9876", "[::]:9876", "10.1.2.3:80", "audit.internal:9876"] {
            let mut config = Config {
                listen: listen.to_string(),
                ..Default::default()
            };
            let err = config.validate().unwrap_err();
            assert!(err.to_string().contains("without authentication"), "{listen}");

            config.auth.enabled = true;
            assert!(config.validate().is_ok(), "{listen}");
        }
    }

    #[test]
    fn test_redacted_hides_keys() {
        let toml = r#"
[auth]
enabled = true

[[auth.api_keys]]
name = "tracker-web"
key = "secret-key-123"
"#;
        let config: Config = toml::from_str(toml).unwrap();
        let printed = serde_yaml::to_string(&config.redacted()).unwrap();
        assert!(!printed.contains("secret-key-123"));
        assert!(printed.contains("<redacted>"));
        assert!(printed.contains("tracker-web"));
        assert_eq!(config.auth.api_keys[0].key, "secret-key-123");
    }

    #[test]
    fn test_huge_min_interval_does_not_overflow() {
        let retention = RetentionConfig {
            check_interval_secs: 0,
            min_interval_hours: i64::MAX,
        };
        let schedule = retention.schedule();
        assert_eq!(schedule.min_interval, chrono::Duration::MAX);
        assert_eq!(schedule.check_interval, Duration::from_secs(1));
    }

    #[test]
    fn test_environment_prefers_env_var_over_file() {
        let config = Config {
            environment: Some("production".to_string()),
            ..Default::default()
        };
        let expected = Environment::from_env().unwrap_or(Environment::Production);
        assert_eq!(config.environment(), expected);

        let unset = Config::default();
        assert_eq!(
            unset.environment(),
            Environment::from_env().unwrap_or_default()
        );
    }
}
