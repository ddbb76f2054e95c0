//! Category-aware application logging
//!
//! Ordinary (non-audit) log lines are gated per scope/category and by the
//! minimum level configured for the running environment, then emitted
//! through `tracing`.

pub mod config;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

pub use config::{ConfigLoadError, LoggingConfig};

/// Log severity, ordered from least to most severe
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Runtime environment selecting the level threshold
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Production,
    #[default]
    Development,
    Test,
}

impl std::str::FromStr for Environment {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "production" | "prod" => Ok(Self::Production),
            "development" | "dev" => Ok(Self::Development),
            "test" => Ok(Self::Test),
            _ => Err(()),
        }
    }
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Production => "production",
            Self::Development => "development",
            Self::Test => "test",
        })
    }
}

impl Environment {
    /// `HEXAUDIT_ENV`, if set to a known environment
    pub fn from_env() -> Option<Self> {
        std::env::var("HEXAUDIT_ENV")
            .ok()
            .and_then(|v| v.parse().ok())
    }
}

/// Scope/category gated logger.
///
/// Enablement is resolved once per `scope:category:level` and cached; the
/// configuration is never reloaded, so a restart is required to pick up
/// category changes.
pub struct CategoryLogger {
    config: Arc<LoggingConfig>,
    environment: Environment,
    cache: DashMap<String, bool>,
}

impl CategoryLogger {
    pub fn new(config: Arc<LoggingConfig>, environment: Environment) -> Self {
        Self {
            config,
            environment,
            cache: DashMap::new(),
        }
    }

    pub fn config(&self) -> &LoggingConfig {
        &self.config
    }

    pub fn environment(&self) -> Environment {
        self.environment
    }

    fn min_level(&self) -> LogLevel {
        let levels = &self.config.levels;
        match self.environment {
            Environment::Production => levels.production,
            Environment::Development => levels.development,
            Environment::Test => levels.test,
        }
    }

    /// Whether a message at `level` for `scope:category` should be emitted
    pub fn should_log(&self, scope: &str, category: &str, level: LogLevel) -> bool {
        if !self.config.global.enabled {
            return false;
        }

        let key = format!("{scope}:{category}:{level}");
        if let Some(cached) = self.cache.get(&key) {
            return *cached;
        }

        let enabled = self
            .config
            .scope(scope)
            .and_then(|s| s.categories.get(category))
            .is_some_and(|c| c.enabled);
        let decision = enabled && level >= self.min_level();

        self.cache.insert(key, decision);
        decision
    }

    /// Render `[emoji] [timestamp] [LEVEL] [scope:category] message`
    pub fn format_message(
        &self,
        level: LogLevel,
        scope: &str,
        category: &str,
        message: &str,
        now: DateTime<Utc>,
    ) -> String {
        let mut parts: Vec<String> = Vec::with_capacity(5);
        if self.config.global.emojis {
            parts.push(self.config.emojis.for_level(level).to_string());
        }
        if self.config.global.timestamps {
            parts.push(format!(
                "[{}]",
                now.to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
            ));
        }
        parts.push(format!("[{}]", level.as_str().to_uppercase()));
        parts.push(format!("[{scope}:{category}]"));
        parts.push(message.to_string());
        parts.join(" ")
    }

    /// Emit a message if the category/level gate allows it.
    ///
    /// Returns whether the line was emitted.
    pub fn log(&self, level: LogLevel, scope: &str, category: &str, message: &str) -> bool {
        if !self.should_log(scope, category, level) {
            return false;
        }

        let line = self.format_message(level, scope, category, message, Utc::now());
        match level {
            LogLevel::Debug => tracing::debug!(scope, category, "{line}"),
            LogLevel::Info => tracing::info!(scope, category, "{line}"),
            LogLevel::Warn => tracing::warn!(scope, category, "{line}"),
            LogLevel::Error => tracing::error!(scope, category, "{line}"),
        }
        true
    }

    pub fn debug(&self, scope: &str, category: &str, message: &str) -> bool {
        self.log(LogLevel::Debug, scope, category, message)
    }

    pub fn info(&self, scope: &str, category: &str, message: &str) -> bool {
        self.log(LogLevel::Info, scope, category, message)
    }

    pub fn warn(&self, scope: &str, category: &str, message: &str) -> bool {
        self.log(LogLevel::Warn, scope, category, message)
    }

    pub fn error(&self, scope: &str, category: &str, message: &str) -> bool {
        self.log(LogLevel::Error, scope, category, message)
    }

    #[cfg(test)]
    fn cached_entries(&self) -> usize {
        self.cache.len()
    }
}
