use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::entry::{DeliveryStatus, OutboxEntry};
use crate::metrics::Metrics;
use crate::store::{to_chrono, Divergence, OutboxLedger, StoreError};
use crate::utils::RetryConfig;

// ============================================================================
// Reconciliation Sweeper
// ============================================================================
//
// One pass, in order:
// 1. expired leases   -> Pending (attempt counted) or DeadLettered at the cap
// 2. Failed entries   -> DeadLettered at the cap, else Pending once backed off
// 3. Delivered entries past retention are pruned
// 4. orders and ledger are compared for divergence
//
// Dead letters and divergences are reported, never retried forever. A
// divergence is logged once when it first shows up; the gauge tracks how
// many are still open.
//
// ============================================================================

#[derive(Debug, Clone)]
pub struct SweeperConfig {
    pub max_attempts: i32,
    /// Delay before attempt n+1 is `backoff.delay_for_attempt(n)`
    pub backoff: RetryConfig,
    pub retention: Duration,
    pub interval: Duration,
    pub batch_size: usize,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            backoff: RetryConfig::default(),
            retention: Duration::from_secs(24 * 60 * 60),
            interval: Duration::from_secs(10),
            batch_size: 500,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SweepReport {
    pub lease_requeued: usize,
    pub failed_requeued: usize,
    /// Failed entries still inside their backoff window
    pub backing_off: usize,
    pub dead_lettered: Vec<OutboxEntry>,
    pub pruned: u64,
    pub divergences: Vec<Divergence>,
    /// Divergences the previous pass had not seen
    pub new_divergences: usize,
}

impl SweepReport {
    pub fn is_quiet(&self) -> bool {
        self.lease_requeued == 0
            && self.failed_requeued == 0
            && self.dead_lettered.is_empty()
            && self.pruned == 0
            && self.divergences.is_empty()
    }
}

pub struct ReconciliationSweeper {
    ledger: Arc<dyn OutboxLedger>,
    config: SweeperConfig,
    metrics: Option<Arc<Metrics>>,
    open_divergences: Mutex<HashSet<Divergence>>,
}

impl ReconciliationSweeper {
    pub fn new(ledger: Arc<dyn OutboxLedger>, config: SweeperConfig) -> Self {
        Self {
            ledger,
            config,
            metrics: None,
            open_divergences: Mutex::new(HashSet::new()),
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn config(&self) -> &SweeperConfig {
        &self.config
    }

    /// How long a failed entry waits before it is requeued
    pub fn backoff_for(&self, attempts: i32) -> Duration {
        self.config
            .backoff
            .delay_for_attempt(attempts.max(0) as u32)
    }

    pub async fn sweep_once(&self) -> Result<SweepReport, StoreError> {
        let mut report = SweepReport::default();

        let reclaimed = self.ledger.reclaim_expired(self.config.max_attempts).await?;
        report.lease_requeued = reclaimed.requeued.len();
        report.dead_lettered.extend(reclaimed.dead_lettered);
        if report.lease_requeued > 0 {
            warn!(count = report.lease_requeued, "Requeued entries with expired claims");
        }

        self.sweep_failed(&mut report).await?;

        report.pruned = self.ledger.prune_delivered(self.config.retention).await?;
        if report.pruned > 0 {
            debug!(count = report.pruned, "Pruned delivered entries");
        }

        report.divergences = self.ledger.find_divergence(self.config.retention).await?;
        let fresh = self.track_divergences(&report.divergences);
        report.new_divergences = fresh.len();

        self.report(&report, &fresh);
        self.refresh_backlog().await?;

        Ok(report)
    }

    async fn sweep_failed(&self, report: &mut SweepReport) -> Result<(), StoreError> {
        let now = Utc::now();

        for entry in self.ledger.failed_entries(self.config.batch_size).await? {
            if entry.attempts >= self.config.max_attempts {
                let reason = format!(
                    "gave up after {} attempts: {}",
                    entry.attempts,
                    entry.last_error.as_deref().unwrap_or("unknown error")
                );
                if self.ledger.dead_letter(entry.id, &reason).await? {
                    let mut entry = entry;
                    entry.status = DeliveryStatus::DeadLettered;
                    entry.last_error = Some(reason);
                    report.dead_lettered.push(entry);
                }
            } else if self.backoff_elapsed(&entry, now) {
                if self.ledger.requeue(entry.id).await? {
                    report.failed_requeued += 1;
                }
            } else {
                report.backing_off += 1;
            }
        }

        Ok(())
    }

    fn backoff_elapsed(&self, entry: &OutboxEntry, now: DateTime<Utc>) -> bool {
        match entry.last_attempt_at {
            Some(at) => at + to_chrono(self.backoff_for(entry.attempts)) <= now,
            None => true,
        }
    }

    /// Remember this pass's divergences, returning the ones not seen before
    fn track_divergences(&self, current: &[Divergence]) -> Vec<Divergence> {
        let mut open = self
            .open_divergences
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let fresh = current
            .iter()
            .filter(|d| !open.contains(*d))
            .cloned()
            .collect();
        *open = current.iter().cloned().collect();
        fresh
    }

    fn report(&self, report: &SweepReport, fresh: &[Divergence]) {
        for entry in &report.dead_lettered {
            error!(
                entry_id = %entry.id,
                order_id = %entry.aggregate_id,
                event_type = %entry.event_type,
                attempts = entry.attempts,
                last_error = entry.last_error.as_deref().unwrap_or_default(),
                "☠️ Outbox entry dead-lettered"
            );
        }

        for divergence in fresh {
            match divergence {
                Divergence::MissingEntry { order_id, version } => error!(
                    order_id = %order_id,
                    version,
                    "Order state has no outbox entry"
                ),
                Divergence::OrphanEntry {
                    entry_id,
                    aggregate_id,
                    aggregate_version,
                } => error!(
                    entry_id = %entry_id,
                    order_id = %aggregate_id,
                    version = aggregate_version,
                    "Outbox entry has no matching order state"
                ),
            }
        }

        if !report.is_quiet() {
            info!(
                lease_requeued = report.lease_requeued,
                failed_requeued = report.failed_requeued,
                backing_off = report.backing_off,
                dead_lettered = report.dead_lettered.len(),
                pruned = report.pruned,
                divergences = report.divergences.len(),
                "🧹 Sweep complete"
            );
        }

        let Some(metrics) = &self.metrics else {
            return;
        };
        metrics.record_requeue("lease_expired", report.lease_requeued);
        metrics.record_requeue("failed", report.failed_requeued);
        metrics.record_pruned(report.pruned);
        for entry in &report.dead_lettered {
            metrics.record_dlq_message(&entry.event_type);
        }
        let missing = report
            .divergences
            .iter()
            .filter(|d| matches!(d, Divergence::MissingEntry { .. }))
            .count();
        metrics.set_divergences("missing_entry", missing);
        metrics.set_divergences("orphan_entry", report.divergences.len() - missing);
    }

    async fn refresh_backlog(&self) -> Result<(), StoreError> {
        let Some(metrics) = &self.metrics else {
            return Ok(());
        };
        let counts = self.ledger.status_counts().await?;
        for status in DeliveryStatus::ALL {
            metrics.set_outbox_backlog(status, counts.get(&status).copied().unwrap_or(0));
        }
        Ok(())
    }
}
