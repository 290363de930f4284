use futures_util::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::entry::OutboxEntry;
use crate::messaging::{EventBus, PublishError};
use crate::metrics::Metrics;
use crate::store::{OutboxLedger, StoreError};

// ============================================================================
// Event Publisher
// ============================================================================
//
// Claim → group by order → publish groups concurrently, each group in `seq`
// order → mark delivered. A failed publish marks that entry failed and hands
// the rest of its group back untouched; the sweeper decides when it is
// tried again. The publisher never reads orders.
//
// ============================================================================

#[derive(Debug, Clone)]
pub struct PublisherConfig {
    pub topic: String,
    pub batch_size: usize,
    /// Entries younger than this are left for the next poll
    pub min_age: Duration,
    pub lease: Duration,
    pub ack_timeout: Duration,
    pub poll_interval: Duration,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            topic: "restaurant.order-events".to_string(),
            batch_size: 100,
            min_age: Duration::ZERO,
            lease: Duration::from_secs(30),
            ack_timeout: Duration::from_secs(5),
            poll_interval: Duration::from_millis(500),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishReport {
    pub claimed: usize,
    pub delivered: usize,
    pub failed: usize,
    pub released: usize,
}

impl PublishReport {
    fn merge(&mut self, other: PublishReport) {
        self.claimed += other.claimed;
        self.delivered += other.delivered;
        self.failed += other.failed;
        self.released += other.released;
    }
}

pub struct OutboxPublisher {
    ledger: Arc<dyn OutboxLedger>,
    bus: Arc<dyn EventBus>,
    config: PublisherConfig,
    metrics: Option<Arc<Metrics>>,
}

impl OutboxPublisher {
    pub fn new(ledger: Arc<dyn OutboxLedger>, bus: Arc<dyn EventBus>, config: PublisherConfig) -> Self {
        Self {
            ledger,
            bus,
            config,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn config(&self) -> &PublisherConfig {
        &self.config
    }

    /// One poll: claim a batch and publish it
    pub async fn run_once(&self) -> Result<PublishReport, StoreError> {
        let batch = self
            .ledger
            .fetch_pending(self.config.batch_size, self.config.min_age, self.config.lease)
            .await?;

        if batch.is_empty() {
            return Ok(PublishReport::default());
        }

        debug!(claimed = batch.len(), "Claimed outbox batch");
        self.publish_batch(batch).await
    }

    /// Poll until nothing is claimable
    pub async fn drain(&self) -> Result<PublishReport, StoreError> {
        let mut total = PublishReport::default();
        loop {
            let report = self.run_once().await?;
            if report.claimed == 0 {
                return Ok(total);
            }
            total.merge(report);
        }
    }

    /// Publish an already-claimed batch
    pub async fn publish_batch(&self, batch: Vec<OutboxEntry>) -> Result<PublishReport, StoreError> {
        let results = join_all(
            group_by_aggregate(batch)
                .into_iter()
                .map(|entries| self.publish_aggregate(entries)),
        )
        .await;

        let mut report = PublishReport::default();
        let mut first_error = None;
        for result in results {
            match result {
                Ok(partial) => report.merge(partial),
                Err(err) if first_error.is_none() => first_error = Some(err),
                Err(err) => warn!(error = %err, "Additional ledger error in batch"),
            }
        }

        if let Some(err) = first_error {
            return Err(err);
        }

        if report.delivered > 0 || report.failed > 0 {
            info!(
                delivered = report.delivered,
                failed = report.failed,
                released = report.released,
                "📤 Outbox batch published"
            );
        }
        Ok(report)
    }

    async fn publish_aggregate(&self, entries: Vec<OutboxEntry>) -> Result<PublishReport, StoreError> {
        let mut report = PublishReport {
            claimed: entries.len(),
            ..Default::default()
        };

        let mut remaining = entries.into_iter();
        while let Some(entry) = remaining.next() {
            match self.publish_entry(&entry).await {
                Ok(()) => {
                    self.ledger.mark_delivered(entry.id).await?;
                    report.delivered += 1;
                }
                Err(err) => {
                    warn!(
                        entry_id = %entry.id,
                        order_id = %entry.aggregate_id,
                        event_type = %entry.event_type,
                        attempts = entry.attempts + 1,
                        error = %err,
                        "Publish failed, holding back the rest of this order"
                    );
                    self.ledger.mark_failed(entry.id, &err.to_string()).await?;
                    report.failed += 1;

                    for held in remaining.by_ref() {
                        if self.ledger.release(held.id).await? {
                            report.released += 1;
                        }
                    }
                }
            }
        }

        Ok(report)
    }

    async fn publish_entry(&self, entry: &OutboxEntry) -> Result<(), PublishError> {
        let started = Instant::now();
        let key = entry.partition_key();

        let result = match tokio::time::timeout(
            self.config.ack_timeout,
            self.bus
                .publish(&self.config.topic, &key, &entry.event_type, &entry.payload),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(PublishError::Timeout(self.config.ack_timeout)),
        };

        if let Some(metrics) = &self.metrics {
            metrics.record_publish(
                &entry.event_type,
                started.elapsed().as_secs_f64(),
                result.as_ref().err().map(failure_label),
            );
        }

        result
    }
}

fn failure_label(err: &PublishError) -> &'static str {
    match err {
        PublishError::Timeout(_) => "timeout",
        PublishError::CircuitOpen => "circuit_open",
        PublishError::Broker(_) => "broker",
    }
}

/// Split a claimed batch per order, keeping `seq` order inside each group
fn group_by_aggregate(mut batch: Vec<OutboxEntry>) -> Vec<Vec<OutboxEntry>> {
    batch.sort_by_key(|e| e.seq);

    let mut index: HashMap<Uuid, usize> = HashMap::new();
    let mut groups: Vec<Vec<OutboxEntry>> = Vec::new();
    for entry in batch {
        match index.get(&entry.aggregate_id) {
            Some(&i) => groups[i].push(entry),
            None => {
                index.insert(entry.aggregate_id, groups.len());
                groups.push(vec![entry]);
            }
        }
    }
    groups
}
