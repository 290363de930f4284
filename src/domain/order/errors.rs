use uuid::Uuid;

use super::value_objects::OrderStatus;
use crate::store::StoreError;

// ============================================================================
// Order Errors
// ============================================================================
//
// Only these kinds ever reach an API caller. Broker failures are handled
// behind the outbox and never surface here.
//
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum OrderError {
    #[error("Invalid order: {0}")]
    Validation(#[from] ValidationError),

    #[error("Version conflict on order {order_id}: expected {expected}, found {actual}")]
    Conflict {
        order_id: Uuid,
        expected: i64,
        actual: i64,
    },

    #[error("Order cannot move from {from} to {to}")]
    InvalidTransition { from: OrderStatus, to: OrderStatus },

    #[error("Order not found: {0}")]
    NotFound(Uuid),

    #[error("Storage failure, nothing was persisted: {0}")]
    Storage(StoreError),
}

impl OrderError {
    /// Response code the transport layer should answer with
    pub fn status_code(&self) -> u16 {
        match self {
            OrderError::Validation(_) => 400,
            OrderError::NotFound(_) => 404,
            OrderError::Conflict { .. } => 409,
            OrderError::InvalidTransition { .. } => 422,
            OrderError::Storage(_) => 503,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            OrderError::Validation(_) => "validation",
            OrderError::NotFound(_) => "not_found",
            OrderError::Conflict { .. } => "conflict",
            OrderError::InvalidTransition { .. } => "invalid_transition",
            OrderError::Storage(_) => "storage",
        }
    }

    /// Whether retrying with fresh state may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, OrderError::Conflict { .. } | OrderError::Storage(_))
    }
}

impl From<StoreError> for OrderError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(id) => OrderError::NotFound(id),
            StoreError::VersionConflict {
                order_id,
                expected,
                actual,
            } => OrderError::Conflict {
                order_id,
                expected,
                actual,
            },
            other => OrderError::Storage(other),
        }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("order must contain at least one item")]
    EmptyItems,

    #[error("customer reference cannot be blank")]
    BlankCustomerRef,

    #[error("item id cannot be blank")]
    BlankItemId,

    #[error("quantity for item {item_id} must be positive, got {quantity}")]
    NonPositiveQuantity { item_id: String, quantity: i32 },

    #[error("unit price for item {item_id} cannot be negative")]
    NegativePrice { item_id: String },

    #[error("order amount overflows at item {item_id}")]
    AmountOverflow { item_id: String },
}
