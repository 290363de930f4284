// ============================================================================
// Infrastructure Actors
// ============================================================================
//
// - Outbox publishing workers
// - Reconciliation sweeps
// - Dead letter queue
// - Health monitoring
// - Coordination and supervision
//
// ============================================================================

// Private module declarations
mod coordinator;
mod dlq;
mod health_monitor;
mod publisher;
mod sweeper;

// Re-export for public API
pub use coordinator::{CoordinatorActor, PipelineParts, Shutdown};
pub use dlq::{AddToDlq, DlqActor, DlqStats, GetDlqMessages, GetDlqStats, ReplayDeadLetter};
pub use health_monitor::{GetSystemHealth, HealthMonitorActor, SystemHealth, UpdateHealth};
pub use publisher::{GetPublisherStats, PublishNow, PublisherActor, PublisherStats};
pub use sweeper::{Sweep, SweeperActor};
