use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::metrics::Metrics;
use crate::outbox::{EventEnvelope, OutboxEntry};
use crate::store::{OrderChange, OrderStore, OrderWrite, StoreError};

use super::aggregate::Order;
use super::errors::OrderError;
use super::events::OrderEvent;
use super::value_objects::{LineItem, OrderStatus};

// ============================================================================
// Order Service
// ============================================================================
//
// Orchestrates: Command → Order (pure) → OrderChange → one atomic commit
//
// The service never talks to the broker. Whatever it commits reaches
// consumers through the outbox.
//
// ============================================================================

pub struct OrderService {
    store: Arc<dyn OrderStore>,
    metrics: Option<Arc<Metrics>>,
}

impl OrderService {
    pub fn new(store: Arc<dyn OrderStore>) -> Self {
        Self {
            store,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub async fn get(&self, order_id: Uuid) -> Result<Order, OrderError> {
        Ok(self.store.get(order_id).await?)
    }

    /// Validate and persist a new order together with its `OrderPlaced` entry
    pub async fn place_order(
        &self,
        customer_ref: &str,
        items: Vec<LineItem>,
    ) -> Result<Order, OrderError> {
        let result = self.try_place(customer_ref, items).await;
        self.observe(&result, None);
        result
    }

    /// Move an order to `target`, guarded by the caller's view of its version
    pub async fn transition(
        &self,
        order_id: Uuid,
        target: OrderStatus,
        expected_version: i64,
    ) -> Result<Order, OrderError> {
        let result = self.try_transition(order_id, target, expected_version).await;
        self.observe(&result, Some(target));
        result
    }

    async fn try_place(&self, customer_ref: &str, items: Vec<LineItem>) -> Result<Order, OrderError> {
        let (order, event) = Order::place(customer_ref, items)?;
        self.commit(order, OrderWrite::Insert, event).await
    }

    async fn try_transition(
        &self,
        order_id: Uuid,
        target: OrderStatus,
        expected_version: i64,
    ) -> Result<Order, OrderError> {
        let current = self.store.get(order_id).await?;

        if current.version != expected_version {
            return Err(OrderError::Conflict {
                order_id,
                expected: expected_version,
                actual: current.version,
            });
        }

        let (next, event) = current.transition(target)?;
        self.commit(next, OrderWrite::Update { expected_version }, event)
            .await
    }

    async fn commit(
        &self,
        order: Order,
        write: OrderWrite,
        event: OrderEvent,
    ) -> Result<Order, OrderError> {
        let envelope = EventEnvelope::new(
            order.id,
            order.version,
            event.event_type(),
            order.updated_at,
            event,
        );
        let entry = OutboxEntry::from_envelope(&envelope).map_err(StoreError::from)?;

        let appended = self
            .store
            .commit(OrderChange {
                order: order.clone(),
                write,
                entry,
            })
            .await?;

        debug!(
            order_id = %order.id,
            version = order.version,
            event_type = %appended.event_type,
            seq = appended.seq,
            "Order committed with outbox entry"
        );

        Ok(order)
    }

    fn observe(&self, result: &Result<Order, OrderError>, target: Option<OrderStatus>) {
        match result {
            Ok(order) => {
                info!(
                    order_id = %order.id,
                    status = %order.status,
                    version = order.version,
                    "📝 Order {}",
                    if target.is_some() { "transitioned" } else { "placed" }
                );
                if let Some(metrics) = &self.metrics {
                    match target {
                        Some(status) => metrics.record_transition(status.as_str()),
                        None => metrics.record_order_placed(),
                    }
                }
            }
            Err(err) => {
                match err {
                    OrderError::Storage(_) => warn!(error = %err, "Order command failed in storage"),
                    _ => debug!(error = %err, "Order command rejected"),
                }
                if let Some(metrics) = &self.metrics {
                    metrics.record_rejection(err.kind());
                }
            }
        }
    }
}
