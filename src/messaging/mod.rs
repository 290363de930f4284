// ============================================================================
// Messaging - broker seam
// ============================================================================
//
// The publisher only sees `EventBus`. Production runs on Kafka/Redpanda
// (`RedpandaClient`); development and tests run on `InMemoryBroker`.
// Consumer-side deduplication lives in `consumer`; `shelf` is a consumer
// that keeps pickup-shelf stock in step with ready and collected orders.
//
// ============================================================================

pub mod consumer;
pub mod in_memory;
pub mod redpanda;
pub mod shelf;

pub use consumer::{ConsumeError, DedupFilter, EventHandler, IdempotentConsumer};
pub use in_memory::{InMemoryBroker, PublishedMessage};
pub use redpanda::RedpandaClient;
pub use shelf::ShelfHandler;

use async_trait::async_trait;
use std::time::Duration;

use crate::utils::CircuitSnapshot;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PublishError {
    #[error("no broker acknowledgement within {0:?}")]
    Timeout(Duration),

    #[error("circuit breaker open")]
    CircuitOpen,

    #[error("broker error: {0}")]
    Broker(String),
}

#[async_trait]
pub trait EventBus: Send + Sync {
    /// Send one message and wait for the broker's acknowledgement
    async fn publish(
        &self,
        topic: &str,
        key: &str,
        event_type: &str,
        payload: &str,
    ) -> Result<(), PublishError>;

    /// Breaker state, for backends that have one
    async fn circuit_state(&self) -> Option<CircuitSnapshot> {
        None
    }
}
