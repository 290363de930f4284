// ============================================================================
// Domain Layer - Business Logic
// ============================================================================
//
// Aggregates and the services that commit them. Nothing in here knows about
// the broker; events leave through the outbox.
//
// ============================================================================

pub mod order;
