//! Logging configuration (`logging.config.json`)
//!
//! Loaded once at boot. Any failure to read or parse the file falls back to
//! [`LoggingConfig::default`] so the service still starts.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::LogLevel;

/// Error raised while loading the logging configuration.
///
/// Never fatal: [`LoggingConfig::load_or_default`] logs it and substitutes defaults.
#[derive(Debug, thiserror::Error)]
pub enum ConfigLoadError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Global toggles
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GlobalSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_true")]
    pub audit_enabled: bool,
    #[serde(default = "default_retention_days")]
    pub retention_days: i64,
    #[serde(default = "default_true")]
    pub emojis: bool,
    #[serde(default = "default_true")]
    pub timestamps: bool,
}

impl Default for GlobalSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            audit_enabled: true,
            retention_days: default_retention_days(),
            emojis: true,
            timestamps: true,
        }
    }
}

/// Minimum level per runtime environment
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LevelThresholds {
    #[serde(default = "default_production_level")]
    pub production: LogLevel,
    #[serde(default = "default_development_level")]
    pub development: LogLevel,
    #[serde(default = "default_test_level")]
    pub test: LogLevel,
}

impl Default for LevelThresholds {
    fn default() -> Self {
        Self {
            production: default_production_level(),
            development: default_development_level(),
            test: default_test_level(),
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct CategoryToggle {
    #[serde(default)]
    pub enabled: bool,
}

/// Category table for one logging scope (`frontend` or `backend`)
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ScopeCategories {
    #[serde(default)]
    pub categories: BTreeMap<String, CategoryToggle>,
}

/// Categories eligible for encrypted persistence
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AuditSettings {
    #[serde(default)]
    pub whitelist: Vec<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EmojiSettings {
    #[serde(default = "default_emoji_debug")]
    pub debug: String,
    #[serde(default = "default_emoji_info")]
    pub info: String,
    #[serde(default = "default_emoji_warn")]
    pub warn: String,
    #[serde(default = "default_emoji_error")]
    pub error: String,
    #[serde(default = "default_emoji_success")]
    pub success: String,
}

impl Default for EmojiSettings {
    fn default() -> Self {
        Self {
            debug: default_emoji_debug(),
            info: default_emoji_info(),
            warn: default_emoji_warn(),
            error: default_emoji_error(),
            success: default_emoji_success(),
        }
    }
}

impl EmojiSettings {
    pub fn for_level(&self, level: LogLevel) -> &str {
        match level {
            LogLevel::Debug => &self.debug,
            LogLevel::Info => &self.info,
            LogLevel::Warn => &self.warn,
            LogLevel::Error => &self.error,
        }
    }
}

/// Slow-operation thresholds in milliseconds.
///
/// `slowRequestThreshold` drives the HTTP trace layer and `slowQueryThreshold`
/// the audit read path. `logMemoryUsage` is accepted but not acted on.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceSettings {
    #[serde(default = "default_slow_query_ms")]
    pub slow_query_threshold: u64,
    #[serde(default = "default_slow_request_ms")]
    pub slow_request_threshold: u64,
    #[serde(default)]
    pub log_memory_usage: bool,
}

impl Default for PerformanceSettings {
    fn default() -> Self {
        Self {
            slow_query_threshold: default_slow_query_ms(),
            slow_request_threshold: default_slow_request_ms(),
            log_memory_usage: false,
        }
    }
}

/// Full logging configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default)]
    pub global: GlobalSettings,
    #[serde(default)]
    pub levels: LevelThresholds,
    #[serde(default)]
    pub frontend: ScopeCategories,
    #[serde(default)]
    pub backend: ScopeCategories,
    #[serde(default)]
    pub audit: AuditSettings,
    #[serde(default)]
    pub emojis: EmojiSettings,
    #[serde(default)]
    pub performance: PerformanceSettings,
}

fn default_true() -> bool {
    true
}

fn default_retention_days() -> i64 {
    30
}

fn default_production_level() -> LogLevel {
    LogLevel::Warn
}

fn default_development_level() -> LogLevel {
    LogLevel::Debug
}

fn default_test_level() -> LogLevel {
    LogLevel::Error
}

fn default_emoji_debug() -> String {
    "🐛".to_string()
}

fn default_emoji_info() -> String {
    "ℹ️".to_string()
}

fn default_emoji_warn() -> String {
    "⚠️".to_string()
}

fn default_emoji_error() -> String {
    "❌".to_string()
}

fn default_emoji_success() -> String {
    "✅".to_string()
}

fn default_slow_query_ms() -> u64 {
    500
}

fn default_slow_request_ms() -> u64 {
    2000
}

impl LoggingConfig {
    /// Load configuration from a JSON file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigLoadError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigLoadError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&content).map_err(|source| ConfigLoadError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Load configuration, substituting defaults on any failure.
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        match Self::from_file(path.as_ref()) {
            Ok(config) => {
                tracing::info!(
                    path = %path.as_ref().display(),
                    whitelist = config.audit.whitelist.len(),
                    "Loaded logging config"
                );
                config
            }
            Err(err) => {
                tracing::warn!(error = %err, "Falling back to default logging config");
                Self::default()
            }
        }
    }

    /// Category whitelist as a set for O(1) membership checks
    pub fn whitelist_set(&self) -> HashSet<String> {
        self.audit.whitelist.iter().cloned().collect()
    }

    pub fn scope(&self, scope: &str) -> Option<&ScopeCategories> {
        match scope {
            "frontend" => Some(&self.frontend),
            "backend" => Some(&self.backend),
            _ => None,
        }
    }
}
