//! The `audit()` entry point

use std::collections::HashSet;
use std::sync::Arc;

use dashmap::DashSet;
use serde_json::Value;

use super::clock::Clock;
use super::context::RequestContext;
use super::crypto::AuditCipher;
use super::store::AuditStorage;
use super::{AuditPayload, NewAuditEntry, Result};
use crate::logging::CategoryLogger;

/// Distinct rejected categories remembered for the once-per-category warning
const MAX_TRACKED_REJECTIONS: usize = 256;

/// What happened to one `audit()` call
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AuditOutcome {
    Recorded { id: i64 },
    /// Auditing is switched off globally
    Disabled,
    /// Category not whitelisted
    Rejected,
    /// Encryption or storage failed; already logged
    Failed,
}

impl AuditOutcome {
    pub fn is_recorded(&self) -> bool {
        matches!(self, Self::Recorded { .. })
    }
}

pub struct AuditWriter {
    store: Arc<dyn AuditStorage>,
    cipher: Arc<AuditCipher>,
    logger: Arc<CategoryLogger>,
    clock: Arc<dyn Clock>,
    whitelist: HashSet<String>,
    enabled: bool,
    rejected: DashSet<String>,
}

impl AuditWriter {
    pub fn new(
        store: Arc<dyn AuditStorage>,
        cipher: Arc<AuditCipher>,
        logger: Arc<CategoryLogger>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let config = logger.config();
        let whitelist = config.whitelist_set();
        let enabled = config.global.audit_enabled;
        Self {
            store,
            cipher,
            logger,
            clock,
            whitelist,
            enabled,
            rejected: DashSet::new(),
        }
    }

    pub fn is_whitelisted(&self, category: &str) -> bool {
        self.whitelist.contains(category)
    }

    /// True the first time `category` is rejected, until the tracking set is full
    fn first_rejection(&self, category: &str) -> bool {
        if self.rejected.contains(category) || self.rejected.len() >= MAX_TRACKED_REJECTIONS {
            return false;
        }
        self.rejected.insert(category.to_string())
    }

    /// Record one event. Never fails; the outcome is informational.
    pub async fn audit(
        &self,
        category: &str,
        message: &str,
        data: Option<Value>,
        user_id: Option<&str>,
        ctx: &RequestContext,
    ) -> AuditOutcome {
        if !self.enabled {
            tracing::debug!(category, "Audit logging disabled, event dropped");
            return AuditOutcome::Disabled;
        }

        if !self.is_whitelisted(category) {
            let warned = self.logger.warn(
                "backend",
                "audit",
                &format!("Attempted to log non-whitelisted category: {category}"),
            );
            if !warned {
                if self.first_rejection(category) {
                    tracing::warn!(
                        category,
                        "Dropped non-whitelisted audit category; repeats are logged at debug"
                    );
                } else {
                    tracing::debug!(category, "Dropped non-whitelisted audit category");
                }
            }
            return AuditOutcome::Rejected;
        }

        match self.write(category, message, data, user_id, ctx).await {
            Ok(id) => {
                self.bump_written();
                AuditOutcome::Recorded { id }
            }
            Err(err) => {
                tracing::error!(category, error = %err, "Failed to write audit log");
                AuditOutcome::Failed
            }
        }
    }

    async fn write(
        &self,
        category: &str,
        message: &str,
        data: Option<Value>,
        user_id: Option<&str>,
        ctx: &RequestContext,
    ) -> Result<i64> {
        let payload = AuditPayload {
            message: message.to_string(),
            data,
        };
        let plaintext = serde_json::to_vec(&payload)?;
        let sealed = self.cipher.encrypt(&plaintext)?;
        let (user_id, username) = ctx.resolve_user(user_id);

        let entry = NewAuditEntry {
            category: category.to_string(),
            timestamp: self.clock.now(),
            user_id,
            username,
            ip_address: ctx.ip_address.clone(),
            user_agent: ctx.user_agent.clone(),
            request_id: ctx.request_id.clone(),
            encrypted_message: sealed.ciphertext,
            encryption_iv: sealed.iv.to_vec(),
        };
        self.store.insert_entry(entry).await
    }

    fn bump_written(&self) {
        let store = Arc::clone(&self.store);
        tokio::spawn(async move {
            if let Err(err) = store.increment_written().await {
                tracing::debug!(error = %err, "Failed to bump audit write counter");
            }
        });
    }
}
