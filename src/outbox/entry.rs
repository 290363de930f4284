use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::envelope::{serialize_envelope, EventEnvelope};

// ============================================================================
// Outbox Entry - one not-yet-published (or recently published) event
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeliveryStatus {
    /// Waiting for a publisher
    Pending,
    /// Claimed by a publisher until `claimed_until`
    InFlight,
    /// Broker acknowledged
    Delivered,
    /// Last publish attempt failed; waiting for the sweeper
    Failed,
    /// Out of attempts; needs an operator
    DeadLettered,
}

impl DeliveryStatus {
    pub const ALL: [DeliveryStatus; 5] = [
        DeliveryStatus::Pending,
        DeliveryStatus::InFlight,
        DeliveryStatus::Delivered,
        DeliveryStatus::Failed,
        DeliveryStatus::DeadLettered,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            DeliveryStatus::Pending => "Pending",
            DeliveryStatus::InFlight => "InFlight",
            DeliveryStatus::Delivered => "Delivered",
            DeliveryStatus::Failed => "Failed",
            DeliveryStatus::DeadLettered => "DeadLettered",
        }
    }

    /// Statuses that hold back later entries of the same aggregate
    pub fn blocks_aggregate(self) -> bool {
        matches!(self, DeliveryStatus::InFlight | DeliveryStatus::Failed)
    }
}

impl fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeliveryStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DeliveryStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("unknown delivery status: {s}"))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboxEntry {
    pub id: Uuid,
    /// Commit order, assigned by the store on append
    pub seq: i64,
    pub aggregate_id: Uuid,
    pub aggregate_version: i64,
    pub event_type: String,
    /// Serialized `EventEnvelope`
    pub payload: String,
    pub created_at: DateTime<Utc>,
    pub status: DeliveryStatus,
    pub attempts: i32,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub claimed_until: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
}

impl OutboxEntry {
    /// Build a `Pending` entry carrying `envelope` as its payload
    pub fn from_envelope<E: Serialize>(envelope: &EventEnvelope<E>) -> serde_json::Result<Self> {
        Ok(Self {
            id: envelope.event_id,
            seq: 0,
            aggregate_id: envelope.aggregate_id,
            aggregate_version: envelope.aggregate_version,
            event_type: envelope.event_type.clone(),
            payload: serialize_envelope(envelope)?,
            created_at: envelope.occurred_at,
            status: DeliveryStatus::Pending,
            attempts: 0,
            last_attempt_at: None,
            last_error: None,
            claimed_until: None,
            delivered_at: None,
        })
    }

    /// Message key on the broker; keeps one order's events in one partition
    pub fn partition_key(&self) -> String {
        self.aggregate_id.to_string()
    }

    pub fn lease_expired(&self, now: DateTime<Utc>) -> bool {
        self.status == DeliveryStatus::InFlight
            && self.claimed_until.map(|until| until <= now).unwrap_or(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn sample_entry() -> OutboxEntry {
        let envelope = EventEnvelope::new(Uuid::new_v4(), 1, "OrderPlaced", Utc::now(), "payload");
        OutboxEntry::from_envelope(&envelope).unwrap()
    }

    #[test]
    fn test_entry_starts_pending_with_envelope_identity() {
        let aggregate_id = Uuid::new_v4();
        let envelope = EventEnvelope::new(aggregate_id, 3, "OrderReady", Utc::now(), 42);
        let entry = OutboxEntry::from_envelope(&envelope).unwrap();

        assert_eq!(entry.id, envelope.event_id);
        assert_eq!(entry.aggregate_id, aggregate_id);
        assert_eq!(entry.aggregate_version, 3);
        assert_eq!(entry.status, DeliveryStatus::Pending);
        assert_eq!(entry.attempts, 0);
        assert_eq!(entry.partition_key(), aggregate_id.to_string());
        assert!(entry.payload.contains("OrderReady"));
    }

    #[test]
    fn test_lease_expiry() {
        let now = Utc::now();
        let mut entry = sample_entry();
        assert!(!entry.lease_expired(now));

        entry.status = DeliveryStatus::InFlight;
        entry.claimed_until = Some(now + Duration::seconds(30));
        assert!(!entry.lease_expired(now));
        assert!(entry.lease_expired(now + Duration::seconds(31)));
    }

    #[test]
    fn test_only_in_flight_and_failed_block() {
        let blocking: Vec<_> = DeliveryStatus::ALL
            .into_iter()
            .filter(|s| s.blocks_aggregate())
            .collect();
        assert_eq!(blocking, vec![DeliveryStatus::InFlight, DeliveryStatus::Failed]);
    }

    #[test]
    fn test_status_parse() {
        for status in DeliveryStatus::ALL {
            assert_eq!(status.to_string().parse::<DeliveryStatus>().unwrap(), status);
        }
    }
}
