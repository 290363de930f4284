// ============================================================================
// Actors Module
// ============================================================================
//
// Background side of the pipeline. Requests never go through actors; they
// call `OrderService` directly and return once the commit is done.
//
// Structure:
// - core/           - Health vocabulary shared by all actors
// - infrastructure/ - Publisher, Sweeper, DLQ, Health monitor, Coordinator
//
// ============================================================================

pub mod core;
mod infrastructure;

pub use self::core::{ComponentHealth, HealthCheckable, HealthStatus};
pub use infrastructure::*;
