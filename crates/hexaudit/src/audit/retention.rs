//! Periodic deletion of entries older than the retention window

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;

use super::clock::Clock;
use super::store::AuditStorage;
use super::Result;

#[derive(Clone, Debug)]
pub struct RetentionPolicy {
    /// Entries older than this many days are purged; `<= 0` disables sweeping
    pub retention_days: i64,
    /// How often the sweeper wakes up
    pub check_interval: Duration,
    /// Minimum spacing between two sweeps
    pub min_interval: chrono::Duration,
    /// Mirrors `global.auditEnabled`
    pub enabled: bool,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            retention_days: 30,
            check_interval: Duration::from_secs(60 * 60),
            min_interval: chrono::Duration::hours(23),
            enabled: true,
        }
    }
}

impl RetentionPolicy {
    fn is_active(&self) -> bool {
        self.enabled && self.retention_days > 0
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SweepOutcome {
    Disabled,
    /// Last sweep was less than `min_interval` ago
    NotDue,
    AlreadyRunning,
    Swept { purged: usize },
}

pub struct RetentionSweeper {
    store: Arc<dyn AuditStorage>,
    clock: Arc<dyn Clock>,
    policy: RetentionPolicy,
    running: AtomicBool,
    last_cleanup: Mutex<Option<DateTime<Utc>>>,
}

impl RetentionSweeper {
    /// `last_cleanup` is the persisted `last_cleanup_at`, if any.
    pub fn new(
        store: Arc<dyn AuditStorage>,
        clock: Arc<dyn Clock>,
        policy: RetentionPolicy,
        last_cleanup: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            store,
            clock,
            policy,
            running: AtomicBool::new(false),
            last_cleanup: Mutex::new(last_cleanup),
        }
    }

    pub fn policy(&self) -> &RetentionPolicy {
        &self.policy
    }

    pub fn last_cleanup(&self) -> Option<DateTime<Utc>> {
        *self.last_cleanup.lock().unwrap_or_else(|err| err.into_inner())
    }

    /// Sweep only if `min_interval` has passed since the last sweep
    pub async fn run_if_due(&self) -> Result<SweepOutcome> {
        if !self.policy.is_active() {
            return Ok(SweepOutcome::Disabled);
        }
        if let Some(last) = self.last_cleanup() {
            if self.clock.now() - last < self.policy.min_interval {
                return Ok(SweepOutcome::NotDue);
            }
        }
        self.sweep().await
    }

    /// Sweep now, ignoring the throttle
    pub async fn sweep(&self) -> Result<SweepOutcome> {
        if !self.policy.is_active() {
            return Ok(SweepOutcome::Disabled);
        }
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Ok(SweepOutcome::AlreadyRunning);
        }

        let _running = RunningGuard(&self.running);
        self.purge().await
    }

    async fn purge(&self) -> Result<SweepOutcome> {
        let now = self.clock.now();
        let purged = match retention_cutoff(now, self.policy.retention_days) {
            Some(cutoff) => self.store.purge_before(cutoff).await?,
            None => {
                tracing::debug!(
                    retention_days = self.policy.retention_days,
                    "Retention window reaches past the earliest representable time"
                );
                0
            }
        };
        *self.last_cleanup.lock().unwrap_or_else(|err| err.into_inner()) = Some(now);

        if let Err(err) = self.store.record_cleanup(purged, now).await {
            tracing::warn!(error = %err, "Failed to record audit cleanup stats");
        }

        if purged > 0 {
            tracing::info!(
                purged,
                retention_days = self.policy.retention_days,
                "Purged expired audit logs"
            );
        } else {
            tracing::debug!("Audit retention sweep found nothing to purge");
        }
        Ok(SweepOutcome::Swept { purged })
    }

    /// Run on a timer until the returned handle is shut down.
    ///
    /// The first tick fires immediately.
    pub fn spawn(self: Arc<Self>) -> SweeperHandle {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let period = self.policy.check_interval.max(Duration::from_millis(1));

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            break;
                        }
                    }
                    _ = ticker.tick() => {
                        if let Err(err) = self.run_if_due().await {
                            tracing::error!(error = %err, "Audit retention sweep failed");
                        }
                    }
                }
            }
            tracing::debug!("Audit retention sweeper stopped");
        });

        SweeperHandle { shutdown_tx, task }
    }
}

/// Oldest timestamp still kept; `None` when the window predates the calendar
fn retention_cutoff(now: DateTime<Utc>, retention_days: i64) -> Option<DateTime<Utc>> {
    chrono::Duration::try_days(retention_days).and_then(|window| now.checked_sub_signed(window))
}

/// Clears the in-flight flag even if the sweep future is dropped or panics
struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Cancellation handle for a spawned sweeper
pub struct SweeperHandle {
    shutdown_tx: watch::Sender<bool>,
    task: tokio::task::JoinHandle<()>,
}

impl SweeperHandle {
    /// Stop the timer loop and wait for an in-flight sweep to finish
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        if let Err(err) = self.task.await {
            tracing::error!(error = %err, "Audit retention sweeper task failed");
        }
    }
}
