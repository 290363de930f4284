// ============================================================================
// Outbox - from committed entry to acknowledged broker message
// ============================================================================
//
// - `envelope`  - message body and consumer dedup key
// - `entry`     - ledger row and its delivery status
// - `publisher` - claims pending entries and publishes them
// - `sweeper`   - requeues, dead-letters, prunes, detects divergence
//
// ============================================================================

pub mod entry;
pub mod envelope;
pub mod publisher;
pub mod sweeper;

pub use entry::{DeliveryStatus, OutboxEntry};
pub use envelope::{deserialize_envelope, serialize_envelope, DedupKey, EventEnvelope};
pub use publisher::{OutboxPublisher, PublishReport, PublisherConfig};
pub use sweeper::{ReconciliationSweeper, SweepReport, SweeperConfig};
