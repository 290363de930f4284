use async_trait::async_trait;
use std::collections::{HashSet, VecDeque};
use tracing::debug;

use crate::domain::order::OrderEvent;
use crate::outbox::{deserialize_envelope, DedupKey, EventEnvelope};

// ============================================================================
// Consumer-side deduplication
// ============================================================================
//
// Delivery is at-least-once. A consumer that must not apply an event twice
// remembers the last `capacity` keys it handled and drops repeats.
//
// ============================================================================

/// Bounded memory of recently handled events
pub struct DedupFilter {
    capacity: usize,
    seen: HashSet<DedupKey>,
    order: VecDeque<DedupKey>,
}

impl DedupFilter {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            seen: HashSet::new(),
            order: VecDeque::new(),
        }
    }

    pub fn contains(&self, key: &DedupKey) -> bool {
        self.seen.contains(key)
    }

    /// Remember `key`; returns false if it was already known
    pub fn insert(&mut self, key: DedupKey) -> bool {
        if !self.seen.insert(key.clone()) {
            return false;
        }
        self.order.push_back(key);
        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.seen.remove(&oldest);
            }
        }
        true
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

#[async_trait]
pub trait EventHandler: Send {
    async fn handle(&mut self, envelope: EventEnvelope<OrderEvent>) -> anyhow::Result<()>;
}

#[derive(Debug, thiserror::Error)]
pub enum ConsumeError {
    #[error("undecodable payload: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("handler failed: {0}")]
    Handler(anyhow::Error),
}

/// Wraps a handler so each event reaches it at most once
pub struct IdempotentConsumer<H> {
    filter: DedupFilter,
    handler: H,
}

impl<H: EventHandler> IdempotentConsumer<H> {
    pub fn new(handler: H, capacity: usize) -> Self {
        Self {
            filter: DedupFilter::new(capacity),
            handler,
        }
    }

    /// Returns `Ok(false)` when the message was a duplicate.
    ///
    /// A key is remembered only after the handler succeeds, so a failed
    /// message is handled again on redelivery.
    pub async fn on_message(&mut self, payload: &str) -> Result<bool, ConsumeError> {
        let envelope: EventEnvelope<OrderEvent> = deserialize_envelope(payload)?;
        let key = envelope.dedup_key();

        if self.filter.contains(&key) {
            debug!(
                aggregate_id = %key.aggregate_id,
                event_type = %key.event_type,
                "Dropping duplicate event"
            );
            return Ok(false);
        }

        self.handler
            .handle(envelope)
            .await
            .map_err(ConsumeError::Handler)?;
        self.filter.insert(key);
        Ok(true)
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }
}
