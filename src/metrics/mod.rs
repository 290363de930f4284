use prometheus::{
    HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, IntGaugeVec, Opts, Registry,
};

use crate::outbox::DeliveryStatus;

// ============================================================================
// Metrics Module - Prometheus metrics for observability
// ============================================================================
//
// Provides metrics for:
// - Order intake and state transitions
// - Event publishing (throughput, latency, failures)
// - Sweeper activity (requeues, dead letters, pruning, divergence)
// - Outbox backlog by delivery status
// - Circuit breaker and component health
//
// Only the registry is kept here; exposing it is left to the host process.
// ============================================================================

/// Central metrics registry for the entire application
pub struct Metrics {
    registry: Registry,

    // Order Service Metrics
    pub orders_placed: IntCounter,
    pub order_transitions: IntCounterVec,
    pub order_rejections: IntCounterVec,

    // Publisher Metrics
    pub events_published: IntCounterVec,
    pub publish_failures: IntCounterVec,
    pub publish_duration: HistogramVec,

    // Sweeper Metrics
    pub outbox_requeued: IntCounterVec,
    pub outbox_pruned: IntCounter,
    pub outbox_divergences: IntGaugeVec,
    pub outbox_entries: IntGaugeVec,

    // DLQ Metrics
    pub dlq_messages_total: IntCounter,
    pub dlq_messages_by_event_type: IntCounterVec,

    // Circuit Breaker / Health Metrics
    pub circuit_breaker_state: IntGauge,
    pub system_health_status: IntGauge,
}

impl Metrics {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        // Order Service Metrics
        let orders_placed = IntCounter::new("orders_placed_total", "Total orders placed")?;
        registry.register(Box::new(orders_placed.clone()))?;

        let order_transitions = IntCounterVec::new(
            Opts::new("order_transitions_total", "Total accepted order status transitions"),
            &["to_status"],
        )?;
        registry.register(Box::new(order_transitions.clone()))?;

        let order_rejections = IntCounterVec::new(
            Opts::new("order_rejections_total", "Order commands rejected by kind"),
            &["reason"],
        )?;
        registry.register(Box::new(order_rejections.clone()))?;

        // Publisher Metrics
        let events_published = IntCounterVec::new(
            Opts::new("events_published_total", "Outbox entries acknowledged by the broker"),
            &["event_type"],
        )?;
        registry.register(Box::new(events_published.clone()))?;

        let publish_failures = IntCounterVec::new(
            Opts::new("publish_failures_total", "Outbox entries whose publish failed"),
            &["event_type", "reason"],
        )?;
        registry.register(Box::new(publish_failures.clone()))?;

        let publish_duration = HistogramVec::new(
            HistogramOpts::new("publish_duration_seconds", "Time from send to broker acknowledgement")
                .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]),
            &["event_type"],
        )?;
        registry.register(Box::new(publish_duration.clone()))?;

        // Sweeper Metrics
        let outbox_requeued = IntCounterVec::new(
            Opts::new("outbox_requeued_total", "Entries returned to Pending by the sweeper"),
            &["source"],
        )?;
        registry.register(Box::new(outbox_requeued.clone()))?;

        let outbox_pruned = IntCounter::new(
            "outbox_pruned_total",
            "Delivered entries removed after the retention window",
        )?;
        registry.register(Box::new(outbox_pruned.clone()))?;

        let outbox_divergences = IntGaugeVec::new(
            Opts::new(
                "outbox_divergences",
                "Store/ledger divergences found by the latest sweep",
            ),
            &["kind"],
        )?;
        registry.register(Box::new(outbox_divergences.clone()))?;

        let outbox_entries = IntGaugeVec::new(
            Opts::new("outbox_entries", "Outbox entries by delivery status"),
            &["status"],
        )?;
        registry.register(Box::new(outbox_entries.clone()))?;

        // DLQ Metrics
        let dlq_messages_total = IntCounter::new(
            "dlq_messages_total",
            "Total messages in dead letter queue",
        )?;
        registry.register(Box::new(dlq_messages_total.clone()))?;

        let dlq_messages_by_event_type = IntCounterVec::new(
            Opts::new("dlq_messages_by_event_type", "DLQ messages by event type"),
            &["event_type"],
        )?;
        registry.register(Box::new(dlq_messages_by_event_type.clone()))?;

        // Circuit Breaker / Health Metrics
        let circuit_breaker_state = IntGauge::new(
            "circuit_breaker_state",
            "Circuit breaker state (0=Closed, 1=Open, 2=HalfOpen)",
        )?;
        registry.register(Box::new(circuit_breaker_state.clone()))?;

        let system_health_status = IntGauge::new(
            "system_health_status",
            "Overall health (0=Unhealthy, 1=Degraded, 2=Healthy)",
        )?;
        registry.register(Box::new(system_health_status.clone()))?;

        Ok(Self {
            registry,
            orders_placed,
            order_transitions,
            order_rejections,
            events_published,
            publish_failures,
            publish_duration,
            outbox_requeued,
            outbox_pruned,
            outbox_divergences,
            outbox_entries,
            dlq_messages_total,
            dlq_messages_by_event_type,
            circuit_breaker_state,
            system_health_status,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn record_order_placed(&self) {
        self.orders_placed.inc();
    }

    pub fn record_transition(&self, to_status: &str) {
        self.order_transitions.with_label_values(&[to_status]).inc();
    }

    pub fn record_rejection(&self, reason: &str) {
        self.order_rejections.with_label_values(&[reason]).inc();
    }

    /// Helper to record one publish outcome
    pub fn record_publish(&self, event_type: &str, duration_secs: f64, failure: Option<&str>) {
        match failure {
            None => self.events_published.with_label_values(&[event_type]).inc(),
            Some(reason) => self
                .publish_failures
                .with_label_values(&[event_type, reason])
                .inc(),
        }
        self.publish_duration.with_label_values(&[event_type]).observe(duration_secs);
    }

    pub fn record_requeue(&self, source: &str, count: usize) {
        self.outbox_requeued.with_label_values(&[source]).inc_by(count as u64);
    }

    pub fn record_pruned(&self, count: u64) {
        self.outbox_pruned.inc_by(count);
    }

    pub fn set_divergences(&self, kind: &str, count: usize) {
        self.outbox_divergences.with_label_values(&[kind]).set(count as i64);
    }

    pub fn set_outbox_backlog(&self, status: DeliveryStatus, count: i64) {
        self.outbox_entries.with_label_values(&[status.as_str()]).set(count);
    }

    /// Helper to record DLQ message
    pub fn record_dlq_message(&self, event_type: &str) {
        self.dlq_messages_total.inc();
        self.dlq_messages_by_event_type.with_label_values(&[event_type]).inc();
    }

    pub fn update_circuit_breaker_state(&self, state: i64) {
        self.circuit_breaker_state.set(state);
    }

    pub fn update_system_health(&self, value: i64) {
        self.system_health_status.set(value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counter_value(metrics: &Metrics, name: &str) -> Option<f64> {
        let gathered = metrics.registry().gather();
        let family = gathered.iter().find(|m| m.name() == name)?;
        family.metric[0].counter.value
    }

    #[test]
    fn test_metrics_creation() {
        let metrics = Metrics::new().unwrap();
        metrics.record_order_placed();
        assert!(metrics.registry().gather().len() > 0);
    }

    #[test]
    fn test_record_publish_outcomes() {
        let metrics = Metrics::new().unwrap();
        metrics.record_publish("OrderPlaced", 0.01, None);
        metrics.record_publish("OrderPlaced", 0.02, None);
        metrics.record_publish("OrderReady", 5.0, Some("timeout"));

        assert_eq!(counter_value(&metrics, "events_published_total"), Some(2.0));
        assert_eq!(counter_value(&metrics, "publish_failures_total"), Some(1.0));
    }

    #[test]
    fn test_record_dlq_message() {
        let metrics = Metrics::new().unwrap();
        metrics.record_dlq_message("OrderPlaced");
        metrics.record_dlq_message("OrderCancelled");

        assert_eq!(counter_value(&metrics, "dlq_messages_total"), Some(2.0));
        let gathered = metrics.registry().gather();
        let by_type = gathered
            .iter()
            .find(|m| m.name() == "dlq_messages_by_event_type")
            .unwrap();
        assert_eq!(by_type.metric.len(), 2);
    }

    #[test]
    fn test_backlog_gauge() {
        let metrics = Metrics::new().unwrap();
        metrics.set_outbox_backlog(DeliveryStatus::Pending, 7);

        let gathered = metrics.registry().gather();
        let backlog = gathered.iter().find(|m| m.name() == "outbox_entries").unwrap();
        assert_eq!(backlog.metric[0].gauge.value, Some(7.0));
    }

    #[test]
    fn test_divergence_gauge_is_replaced_each_pass() {
        let metrics = Metrics::new().unwrap();
        metrics.set_divergences("orphan_entry", 3);
        metrics.set_divergences("orphan_entry", 1);

        assert_eq!(
            metrics.outbox_divergences.with_label_values(&["orphan_entry"]).get(),
            1
        );
    }

    #[test]
    fn test_circuit_breaker_metrics() {
        let metrics = Metrics::new().unwrap();
        metrics.update_circuit_breaker_state(1);

        let gathered = metrics.registry().gather();
        let state = gathered.iter().find(|m| m.name() == "circuit_breaker_state").unwrap();
        assert_eq!(state.metric[0].gauge.value, Some(1.0));
    }
}
