use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::errors::{OrderError, ValidationError};
use super::events::{OrderEvent, OrderPlaced};
use super::value_objects::{LineItem, OrderStatus};

// ============================================================================
// Order Aggregate - Domain Logic
// ============================================================================
//
// Pure state machine. Every accepted command returns the next state together
// with exactly one event describing it; persisting both is the caller's job.
//
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    // Identity
    pub id: Uuid,
    pub version: i64,

    // Current State
    pub customer_ref: String,
    pub items: Vec<LineItem>,
    pub status: OrderStatus,

    // Audit Trail
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// Validate a new order and build it in `Placed`, version 1
    pub fn place(
        customer_ref: impl Into<String>,
        items: Vec<LineItem>,
    ) -> Result<(Self, OrderEvent), ValidationError> {
        let customer_ref = customer_ref.into();
        validate(&customer_ref, &items)?;

        let now = Utc::now();
        let order = Self {
            id: Uuid::now_v7(),
            version: 1,
            customer_ref,
            items,
            status: OrderStatus::Placed,
            created_at: now,
            updated_at: now,
        };

        let event = OrderEvent::Placed(OrderPlaced {
            customer_ref: order.customer_ref.clone(),
            items: order.items.clone(),
            total: order.total(),
        });

        Ok((order, event))
    }

    /// Compute the next state for a move to `target`
    pub fn transition(&self, target: OrderStatus) -> Result<(Self, OrderEvent), OrderError> {
        if !self.status.can_transition_to(target) {
            return Err(OrderError::InvalidTransition {
                from: self.status,
                to: target,
            });
        }

        let event = OrderEvent::for_transition(self.status, target).ok_or(
            OrderError::InvalidTransition {
                from: self.status,
                to: target,
            },
        )?;

        let mut next = self.clone();
        next.status = target;
        next.version += 1;
        next.updated_at = Utc::now().max(self.updated_at);

        Ok((next, event))
    }

    /// Sum of line-item subtotals; never stored on its own
    pub fn total(&self) -> Decimal {
        self.items
            .iter()
            .fold(Decimal::ZERO, |total, item| total.saturating_add(item.subtotal()))
    }
}

fn validate(customer_ref: &str, items: &[LineItem]) -> Result<(), ValidationError> {
    if customer_ref.trim().is_empty() {
        return Err(ValidationError::BlankCustomerRef);
    }

    if items.is_empty() {
        return Err(ValidationError::EmptyItems);
    }

    let mut total = Decimal::ZERO;
    for item in items {
        if item.item_id.trim().is_empty() {
            return Err(ValidationError::BlankItemId);
        }
        if item.quantity <= 0 {
            return Err(ValidationError::NonPositiveQuantity {
                item_id: item.item_id.clone(),
                quantity: item.quantity,
            });
        }
        if item.unit_price < Decimal::ZERO {
            return Err(ValidationError::NegativePrice {
                item_id: item.item_id.clone(),
            });
        }
        total = item
            .checked_subtotal()
            .and_then(|subtotal| total.checked_add(subtotal))
            .ok_or_else(|| ValidationError::AmountOverflow {
                item_id: item.item_id.clone(),
            })?;
    }

    Ok(())
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn burger_meal() -> Vec<LineItem> {
        vec![
            LineItem::new("itemA", 2, Decimal::new(500, 2)),
            LineItem::new("itemB", 1, Decimal::new(300, 2)),
        ]
    }

    #[test]
    fn test_place_computes_total_and_starts_placed() {
        let (order, event) = Order::place("table-7", burger_meal()).unwrap();

        assert_eq!(order.total(), Decimal::new(1300, 2));
        assert_eq!(order.status, OrderStatus::Placed);
        assert_eq!(order.version, 1);
        assert_eq!(event.event_type(), "OrderPlaced");

        match event {
            OrderEvent::Placed(placed) => {
                assert_eq!(placed.total, Decimal::new(1300, 2));
                assert_eq!(placed.items.len(), 2);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_place_rejects_empty_items() {
        let result = Order::place("table-7", vec![]);
        assert_eq!(result.unwrap_err(), ValidationError::EmptyItems);
    }

    #[test]
    fn test_place_rejects_non_positive_quantities() {
        for quantity in [0, -3] {
            let items = vec![LineItem::new("soup", quantity, Decimal::new(700, 2))];
            let err = Order::place("table-7", items).unwrap_err();
            assert!(matches!(
                err,
                ValidationError::NonPositiveQuantity { quantity: q, .. } if q == quantity
            ));
        }
    }

    #[test]
    fn test_place_rejects_negative_price_and_blank_refs() {
        let items = vec![LineItem::new("soup", 1, Decimal::new(-100, 2))];
        assert!(matches!(
            Order::place("table-7", items),
            Err(ValidationError::NegativePrice { .. })
        ));
        assert_eq!(
            Order::place("   ", burger_meal()).unwrap_err(),
            ValidationError::BlankCustomerRef
        );
        let items = vec![LineItem::new("", 1, Decimal::ONE)];
        assert_eq!(
            Order::place("table-7", items).unwrap_err(),
            ValidationError::BlankItemId
        );
    }

    #[test]
    fn test_place_rejects_amounts_that_overflow() {
        let items = vec![LineItem::new("itemA", 2, Decimal::MAX)];
        assert_eq!(
            Order::place("table-7", items).unwrap_err(),
            ValidationError::AmountOverflow {
                item_id: "itemA".to_string()
            }
        );

        // each line fits on its own, the sum does not
        let items = vec![
            LineItem::new("itemA", 1, Decimal::MAX),
            LineItem::new("itemB", 1, Decimal::ONE),
        ];
        assert_eq!(
            Order::place("table-7", items).unwrap_err(),
            ValidationError::AmountOverflow {
                item_id: "itemB".to_string()
            }
        );
    }

    #[test]
    fn test_free_items_are_allowed() {
        let items = vec![LineItem::new("water", 1, Decimal::ZERO)];
        let (order, _) = Order::place("table-7", items).unwrap();
        assert_eq!(order.total(), Decimal::ZERO);
    }

    #[test]
    fn test_transition_bumps_version_and_emits_matching_event() {
        let (placed, _) = Order::place("table-7", burger_meal()).unwrap();
        let (accepted, event) = placed.transition(OrderStatus::Accepted).unwrap();

        assert_eq!(accepted.status, OrderStatus::Accepted);
        assert_eq!(accepted.version, 2);
        assert_eq!(accepted.id, placed.id);
        assert_eq!(accepted.total(), placed.total());
        assert!(accepted.updated_at >= placed.updated_at);
        assert_eq!(event.event_type(), "OrderAccepted");
    }

    #[test]
    fn test_transition_rejects_skipping_states() {
        let (placed, _) = Order::place("table-7", burger_meal()).unwrap();
        let err = placed.transition(OrderStatus::Ready).unwrap_err();

        assert!(matches!(
            err,
            OrderError::InvalidTransition {
                from: OrderStatus::Placed,
                to: OrderStatus::Ready
            }
        ));
    }

    #[test]
    fn test_cannot_leave_cancelled() {
        let (placed, _) = Order::place("table-7", burger_meal()).unwrap();
        let (cancelled, _) = placed.transition(OrderStatus::Cancelled).unwrap();

        for target in OrderStatus::ALL {
            assert!(cancelled.transition(target).is_err());
        }
    }
}
