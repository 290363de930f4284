use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

use super::consumer::EventHandler;
use crate::domain::order::{LineItem, OrderEvent};
use crate::outbox::EventEnvelope;
use crate::store::{ShelfStore, StoreError};

// ============================================================================
// Pickup shelf
// ============================================================================
//
// Keeps shelf stock in step with the order stream: a ready order's items go
// on the shelf and come off again when the order is collected. Status events
// carry no items, so the handler remembers them from `OrderPlaced`.
//
// ============================================================================

pub struct ShelfHandler {
    shelf: Arc<dyn ShelfStore>,
    items_by_order: HashMap<Uuid, Vec<LineItem>>,
}

impl ShelfHandler {
    pub fn new(shelf: Arc<dyn ShelfStore>) -> Self {
        Self {
            shelf,
            items_by_order: HashMap::new(),
        }
    }

    /// Orders placed but not yet collected or cancelled
    pub fn open_orders(&self) -> usize {
        self.items_by_order.len()
    }
}

#[async_trait]
impl EventHandler for ShelfHandler {
    async fn handle(&mut self, envelope: EventEnvelope<OrderEvent>) -> anyhow::Result<()> {
        let order_id = envelope.aggregate_id;

        match envelope.data {
            OrderEvent::Placed(placed) => {
                self.items_by_order.insert(order_id, placed.items);
            }
            OrderEvent::Ready(_) => {
                let Some(items) = self.items_by_order.get(&order_id) else {
                    warn!(order_id = %order_id, "Ready order was never seen placed; shelf not stocked");
                    return Ok(());
                };
                for item in items {
                    self.shelf.restock(&item.item_id, item.quantity).await?;
                }
                debug!(order_id = %order_id, lines = items.len(), "Order put on the shelf");
            }
            OrderEvent::Completed(_) => {
                let Some(items) = self.items_by_order.remove(&order_id) else {
                    return Ok(());
                };
                for item in &items {
                    match self.shelf.take(&item.item_id, item.quantity).await {
                        Ok(_) => {}
                        Err(StoreError::InsufficientStock {
                            menu_item_id,
                            requested,
                            available,
                        }) => warn!(
                            order_id = %order_id,
                            menu_item_id,
                            requested,
                            available,
                            "Collected more than the shelf held"
                        ),
                        Err(other) => {
                            self.items_by_order.insert(order_id, items.clone());
                            return Err(other.into());
                        }
                    }
                }
            }
            OrderEvent::Cancelled(_) => {
                self.items_by_order.remove(&order_id);
            }
            OrderEvent::Accepted(_) | OrderEvent::InPreparation(_) => {}
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::order::{Order, OrderStatus};
    use crate::messaging::IdempotentConsumer;
    use crate::outbox::serialize_envelope;
    use crate::store::InMemoryStore;
    use rust_decimal::Decimal;

    /// Payloads for every event of one order, from placement to `last`
    fn lifecycle(last: OrderStatus) -> Vec<String> {
        let items = vec![
            LineItem::new("pierogi", 2, Decimal::new(2400, 2)),
            LineItem::new("zurek", 1, Decimal::new(1800, 2)),
        ];
        let (mut order, placed) = Order::place("table-7", items).unwrap();
        let mut events = vec![(order.clone(), placed)];

        let path = [
            OrderStatus::Accepted,
            OrderStatus::InPreparation,
            OrderStatus::Ready,
            OrderStatus::Completed,
        ];
        for status in path {
            if order.status == last {
                break;
            }
            let (next, event) = order.transition(status).unwrap();
            events.push((next.clone(), event));
            order = next;
        }

        events
            .into_iter()
            .map(|(order, event)| {
                let envelope =
                    EventEnvelope::new(order.id, order.version, event.event_type(), order.updated_at, event);
                serialize_envelope(&envelope).unwrap()
            })
            .collect()
    }

    #[tokio::test]
    async fn test_ready_stocks_and_completed_clears_the_shelf() {
        let store = InMemoryStore::new();
        let mut consumer = IdempotentConsumer::new(ShelfHandler::new(Arc::new(store.clone())), 100);

        let payloads = lifecycle(OrderStatus::Completed);
        for payload in &payloads[..4] {
            consumer.on_message(payload).await.unwrap();
        }
        assert_eq!(store.find_by_menu_item_id("pierogi").await.unwrap().unwrap().quantity, 2);
        assert_eq!(store.stocked_at_least(1).await.unwrap().len(), 2);

        consumer.on_message(&payloads[4]).await.unwrap();
        assert!(store.stocked_at_least(1).await.unwrap().is_empty());
        assert_eq!(consumer.handler().open_orders(), 0);
    }

    #[tokio::test]
    async fn test_redelivered_ready_does_not_double_stock() {
        let store = InMemoryStore::new();
        let mut consumer = IdempotentConsumer::new(ShelfHandler::new(Arc::new(store.clone())), 100);

        let payloads = lifecycle(OrderStatus::Ready);
        for payload in &payloads {
            consumer.on_message(payload).await.unwrap();
        }
        assert!(!consumer.on_message(&payloads[3]).await.unwrap());

        assert_eq!(store.find_by_menu_item_id("pierogi").await.unwrap().unwrap().quantity, 2);
    }

    #[tokio::test]
    async fn test_cancelled_order_never_reaches_the_shelf() {
        let store = InMemoryStore::new();
        let mut handler = ShelfHandler::new(Arc::new(store.clone()));

        let items = vec![LineItem::new("bigos", 1, Decimal::new(2900, 2))];
        let (order, placed) = Order::place("table-2", items).unwrap();
        let (cancelled, event) = order.transition(OrderStatus::Cancelled).unwrap();

        handler
            .handle(EventEnvelope::new(order.id, 1, placed.event_type(), order.updated_at, placed))
            .await
            .unwrap();
        handler
            .handle(EventEnvelope::new(order.id, 2, event.event_type(), cancelled.updated_at, event))
            .await
            .unwrap();

        assert_eq!(handler.open_orders(), 0);
        assert!(!store.exists_by_menu_item_id("bigos").await.unwrap());
    }
}
