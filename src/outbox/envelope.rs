use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// Event Envelope - the message body put on the broker
// ============================================================================
//
// {event type, aggregate id, occurred-at, domain fields}. Consumers receive
// at-least-once and deduplicate on `DedupKey`.
//
// ============================================================================

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct EventEnvelope<E> {
    pub event_id: Uuid,
    pub event_type: String,
    pub aggregate_id: Uuid,
    /// Order version this event moved the aggregate to
    pub aggregate_version: i64,
    pub occurred_at: DateTime<Utc>,
    pub data: E,
}

/// Identity of an event from a consumer's point of view
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DedupKey {
    pub aggregate_id: Uuid,
    pub event_type: String,
    pub occurred_at: DateTime<Utc>,
}

impl<E> EventEnvelope<E> {
    pub fn new(
        aggregate_id: Uuid,
        aggregate_version: i64,
        event_type: impl Into<String>,
        occurred_at: DateTime<Utc>,
        data: E,
    ) -> Self {
        Self {
            event_id: Uuid::now_v7(),
            event_type: event_type.into(),
            aggregate_id,
            aggregate_version,
            occurred_at,
            data,
        }
    }

    pub fn dedup_key(&self) -> DedupKey {
        DedupKey {
            aggregate_id: self.aggregate_id,
            event_type: self.event_type.clone(),
            occurred_at: self.occurred_at,
        }
    }
}

pub fn serialize_envelope<E: Serialize>(envelope: &EventEnvelope<E>) -> serde_json::Result<String> {
    serde_json::to_string(envelope)
}

pub fn deserialize_envelope<E: for<'de> Deserialize<'de>>(
    json: &str,
) -> serde_json::Result<EventEnvelope<E>> {
    serde_json::from_str(json)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::order::{OrderEvent, OrderStatus};

    #[test]
    fn test_wire_shape_carries_contract_fields() {
        let aggregate_id = Uuid::new_v4();
        let event = OrderEvent::for_transition(OrderStatus::Placed, OrderStatus::Accepted).unwrap();
        let envelope = EventEnvelope::new(aggregate_id, 2, event.event_type(), Utc::now(), event);

        let json: serde_json::Value =
            serde_json::from_str(&serialize_envelope(&envelope).unwrap()).unwrap();

        assert_eq!(json["event_type"], "OrderAccepted");
        assert_eq!(json["aggregate_id"], aggregate_id.to_string());
        assert_eq!(json["aggregate_version"], 2);
        assert!(json["occurred_at"].is_string());
        assert_eq!(json["data"]["type"], "Accepted");
    }

    #[test]
    fn test_dedup_key_ignores_event_id() {
        let aggregate_id = Uuid::new_v4();
        let at = Utc::now();
        let first = EventEnvelope::new(aggregate_id, 1, "OrderPlaced", at, ());
        let second = EventEnvelope::new(aggregate_id, 1, "OrderPlaced", at, ());

        assert_ne!(first.event_id, second.event_id);
        assert_eq!(first.dedup_key(), second.dedup_key());
    }
}
