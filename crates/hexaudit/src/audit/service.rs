//! Wiring for the audit subsystem

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;

use super::clock::Clock;
use super::context::RequestContext;
use super::export::{AuditExporter, ExportFile, ExportFormat};
use super::keys;
use super::query::{AuditFilters, AuditPage, AuditQueryService, AuditStats};
use super::retention::{RetentionPolicy, RetentionSweeper, SweeperHandle};
use super::store::AuditStorage;
use super::writer::{AuditOutcome, AuditWriter};
use super::Result;
use crate::logging::CategoryLogger;

/// Sweeper timing; retention days and enablement come from the logging config
#[derive(Clone, Debug)]
pub struct SweepSchedule {
    pub check_interval: Duration,
    pub min_interval: chrono::Duration,
}

impl Default for SweepSchedule {
    fn default() -> Self {
        let policy = RetentionPolicy::default();
        Self {
            check_interval: policy.check_interval,
            min_interval: policy.min_interval,
        }
    }
}

/// Writer, reader, exporter and sweeper sharing one key and one store.
///
/// Only [`AuditService::initialize`] builds one, so nothing can write or read
/// before the key is loaded.
pub struct AuditService {
    store: Arc<dyn AuditStorage>,
    writer: AuditWriter,
    query: Arc<AuditQueryService>,
    exporter: AuditExporter,
    sweeper: Arc<RetentionSweeper>,
    slow_query: Duration,
    slow_request: Duration,
}

impl AuditService {
    pub async fn initialize(
        store: Arc<dyn AuditStorage>,
        logger: Arc<CategoryLogger>,
        clock: Arc<dyn Clock>,
        schedule: SweepSchedule,
    ) -> Result<Self> {
        let global = &logger.config().global;
        let retention_days = global.retention_days;
        let audit_enabled = global.audit_enabled;
        let now = clock.now();

        let (cipher, row) = keys::load_or_create(store.as_ref(), retention_days, now).await?;
        if row.retention_days != retention_days {
            store.set_retention_days(retention_days, now).await?;
        }

        let cipher = Arc::new(cipher);
        let writer = AuditWriter::new(
            Arc::clone(&store),
            Arc::clone(&cipher),
            Arc::clone(&logger),
            Arc::clone(&clock),
        );
        let query = Arc::new(AuditQueryService::new(Arc::clone(&store), cipher));
        let exporter = AuditExporter::new(Arc::clone(&query), Arc::clone(&clock));

        let policy = RetentionPolicy {
            retention_days,
            check_interval: schedule.check_interval,
            min_interval: schedule.min_interval,
            enabled: audit_enabled,
        };
        let sweeper = Arc::new(RetentionSweeper::new(
            Arc::clone(&store),
            clock,
            policy,
            row.last_cleanup_at,
        ));

        let performance = &logger.config().performance;
        let slow_query = Duration::from_millis(performance.slow_query_threshold);
        let slow_request = Duration::from_millis(performance.slow_request_threshold);

        tracing::info!(
            enabled = audit_enabled,
            retention_days,
            whitelist = logger.config().audit.whitelist.len(),
            "Audit log service initialized"
        );

        Ok(Self {
            store,
            writer,
            query,
            exporter,
            sweeper,
            slow_query,
            slow_request,
        })
    }

    pub async fn audit(
        &self,
        category: &str,
        message: &str,
        data: Option<Value>,
        user_id: Option<&str>,
        ctx: &RequestContext,
    ) -> AuditOutcome {
        self.writer.audit(category, message, data, user_id, ctx).await
    }

    pub async fn query(
        &self,
        filters: &AuditFilters,
        page: Option<usize>,
        limit: Option<usize>,
    ) -> Result<AuditPage> {
        let started = Instant::now();
        let result = self.query.query(filters, page, limit).await;
        self.note_slow_query("query", started);
        result
    }

    pub async fn stats(&self) -> Result<AuditStats> {
        self.query.stats().await
    }

    pub async fn export(&self, filters: &AuditFilters, format: ExportFormat) -> Result<ExportFile> {
        let started = Instant::now();
        let result = self.exporter.export(filters, format).await;
        self.note_slow_query("export", started);
        result
    }

    pub async fn count(&self) -> Result<usize> {
        self.store.count_entries(&AuditFilters::default()).await
    }

    /// Latency past which the HTTP layer reports a request as slow
    pub fn slow_request_threshold(&self) -> Duration {
        self.slow_request
    }

    fn note_slow_query(&self, operation: &str, started: Instant) -> bool {
        let elapsed = started.elapsed();
        let slow = elapsed >= self.slow_query;
        if slow {
            tracing::warn!(
                operation,
                elapsed_ms = elapsed.as_millis() as u64,
                threshold_ms = self.slow_query.as_millis() as u64,
                "Slow audit log read"
            );
        }
        slow
    }

    pub fn sweeper(&self) -> &Arc<RetentionSweeper> {
        &self.sweeper
    }

    pub fn spawn_sweeper(&self) -> SweeperHandle {
        Arc::clone(&self.sweeper).spawn()
    }
}
