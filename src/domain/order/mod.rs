// ============================================================================
// Order Domain - Business Logic for the Order aggregate
// ============================================================================
//
// This module contains ALL Order-specific code:
// - Value objects (LineItem, OrderStatus)
// - Events (OrderPlaced, status-change events)
// - Errors (OrderError, ValidationError)
// - Aggregate (Order state machine)
// - Service (OrderService, the request-path entry point)
//
// ============================================================================

pub mod value_objects;
pub mod events;
pub mod errors;
pub mod aggregate;
pub mod service;

// Re-export for convenience
pub use value_objects::*;
pub use events::*;
pub use errors::*;
pub use aggregate::*;
pub use service::*;
