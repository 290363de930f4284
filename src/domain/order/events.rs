use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::value_objects::{LineItem, OrderStatus};

// ============================================================================
// Order Events - what downstream consumers (kitchen display, billing,
// inventory) receive for every committed state change
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum OrderEvent {
    Placed(OrderPlaced),
    Accepted(StatusChanged),
    InPreparation(StatusChanged),
    Ready(StatusChanged),
    Completed(StatusChanged),
    Cancelled(StatusChanged),
}

/// Order Placed - first event in an order's life
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct OrderPlaced {
    pub customer_ref: String,
    pub items: Vec<LineItem>,
    pub total: Decimal,
}

/// Any accepted move along the status table after placement
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct StatusChanged {
    pub from: OrderStatus,
    pub to: OrderStatus,
}

impl OrderEvent {
    /// Event for a committed transition into `to`.
    ///
    /// Returns `None` for `Placed`, which is only ever produced by placement.
    pub fn for_transition(from: OrderStatus, to: OrderStatus) -> Option<Self> {
        let change = StatusChanged { from, to };
        match to {
            OrderStatus::Placed => None,
            OrderStatus::Accepted => Some(OrderEvent::Accepted(change)),
            OrderStatus::InPreparation => Some(OrderEvent::InPreparation(change)),
            OrderStatus::Ready => Some(OrderEvent::Ready(change)),
            OrderStatus::Completed => Some(OrderEvent::Completed(change)),
            OrderStatus::Cancelled => Some(OrderEvent::Cancelled(change)),
        }
    }

    pub fn event_type(&self) -> &'static str {
        match self {
            OrderEvent::Placed(_) => "OrderPlaced",
            OrderEvent::Accepted(_) => "OrderAccepted",
            OrderEvent::InPreparation(_) => "OrderInPreparation",
            OrderEvent::Ready(_) => "OrderReady",
            OrderEvent::Completed(_) => "OrderCompleted",
            OrderEvent::Cancelled(_) => "OrderCancelled",
        }
    }

    /// Status the order is in once this event has happened
    pub fn resulting_status(&self) -> OrderStatus {
        match self {
            OrderEvent::Placed(_) => OrderStatus::Placed,
            OrderEvent::Accepted(_) => OrderStatus::Accepted,
            OrderEvent::InPreparation(_) => OrderStatus::InPreparation,
            OrderEvent::Ready(_) => OrderStatus::Ready,
            OrderEvent::Completed(_) => OrderStatus::Completed,
            OrderEvent::Cancelled(_) => OrderStatus::Cancelled,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_type_matches_resulting_status() {
        for target in OrderStatus::ALL {
            if let Some(event) = OrderEvent::for_transition(OrderStatus::Placed, target) {
                assert_eq!(event.resulting_status(), target);
                assert_eq!(event.event_type(), format!("Order{}", target));
            }
        }
    }

    #[test]
    fn test_placed_is_not_a_transition_event() {
        assert!(OrderEvent::for_transition(OrderStatus::Placed, OrderStatus::Placed).is_none());
    }

    #[test]
    fn test_adjacently_tagged_wire_format() {
        let event = OrderEvent::for_transition(OrderStatus::Placed, OrderStatus::Cancelled).unwrap();
        let json = serde_json::to_value(&event).unwrap();

        assert_eq!(json["type"], "Cancelled");
        assert_eq!(json["data"]["from"], "Placed");
        assert_eq!(json["data"]["to"], "Cancelled");
    }
}
