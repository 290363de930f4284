use async_trait::async_trait;
use chrono::Utc;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use uuid::Uuid;

use super::{
    to_chrono, Divergence, OrderChange, OrderStore, OrderWrite, OutboxLedger, ReclaimOutcome,
    ShelfStock, ShelfStore, StoreError,
};
use crate::domain::order::Order;
use crate::outbox::{DeliveryStatus, OutboxEntry};

// ============================================================================
// In-Memory Store
// ============================================================================
//
// Orders and ledger live behind a single mutex; holding it is the
// transaction. Used by the development binary and the test suite.
//
// ============================================================================

/// One-shot storage fault for exercising rollback
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageFault {
    /// Fail before anything is written
    BeforeOrderWrite,
    /// Fail after the order row is written, before the ledger append
    AfterOrderWrite,
}

#[derive(Default)]
struct State {
    orders: HashMap<Uuid, Order>,
    entries: BTreeMap<i64, OutboxEntry>,
    seq_by_id: HashMap<Uuid, i64>,
    next_seq: i64,
    fault: Option<StorageFault>,
    shelf: BTreeMap<String, ShelfStock>,
}

impl State {
    fn append(&mut self, mut entry: OutboxEntry) -> OutboxEntry {
        self.next_seq += 1;
        entry.seq = self.next_seq;
        self.seq_by_id.insert(entry.id, entry.seq);
        self.entries.insert(entry.seq, entry.clone());
        entry
    }

    fn entry_mut(&mut self, entry_id: Uuid) -> Option<&mut OutboxEntry> {
        let seq = self.seq_by_id.get(&entry_id)?;
        self.entries.get_mut(seq)
    }

    fn write_order(&mut self, order: &Order, write: OrderWrite) -> Result<Option<Order>, StoreError> {
        match write {
            OrderWrite::Insert => {
                if self.orders.contains_key(&order.id) {
                    return Err(StoreError::DuplicateOrder(order.id));
                }
            }
            OrderWrite::Update { expected_version } => {
                let current = self
                    .orders
                    .get(&order.id)
                    .ok_or(StoreError::NotFound(order.id))?;
                if current.version != expected_version {
                    return Err(StoreError::VersionConflict {
                        order_id: order.id,
                        expected: expected_version,
                        actual: current.version,
                    });
                }
            }
        }
        Ok(self.orders.insert(order.id, order.clone()))
    }
}

#[derive(Clone, Default)]
pub struct InMemoryStore {
    state: Arc<Mutex<State>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `commit` fail at `fault`
    pub fn inject_fault(&self, fault: StorageFault) {
        if let Ok(mut state) = self.state.lock() {
            state.fault = Some(fault);
        }
    }

    pub fn order_count(&self) -> usize {
        self.state.lock().map(|s| s.orders.len()).unwrap_or(0)
    }

    pub fn entry_count(&self) -> usize {
        self.state.lock().map(|s| s.entries.len()).unwrap_or(0)
    }

    /// Delete an order row without touching the ledger
    #[cfg(test)]
    pub(crate) fn drop_order(&self, order_id: Uuid) {
        if let Ok(mut state) = self.state.lock() {
            state.orders.remove(&order_id);
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, State>, StoreError> {
        self.state
            .lock()
            .map_err(|_| StoreError::Unavailable("in-memory store lock poisoned".to_string()))
    }
}

#[async_trait]
impl OrderStore for InMemoryStore {
    async fn get(&self, order_id: Uuid) -> Result<Order, StoreError> {
        self.lock()?
            .orders
            .get(&order_id)
            .cloned()
            .ok_or(StoreError::NotFound(order_id))
    }

    async fn commit(&self, change: OrderChange) -> Result<OutboxEntry, StoreError> {
        let mut state = self.lock()?;
        let fault = state.fault.take();

        if fault == Some(StorageFault::BeforeOrderWrite) {
            return Err(StoreError::Unavailable("injected fault before order write".into()));
        }

        let previous = state.write_order(&change.order, change.write)?;

        if fault == Some(StorageFault::AfterOrderWrite) {
            // roll back the order row
            match previous {
                Some(previous) => state.orders.insert(previous.id, previous),
                None => state.orders.remove(&change.order.id),
            };
            return Err(StoreError::Unavailable("injected fault before ledger append".into()));
        }

        Ok(state.append(change.entry))
    }
}

#[async_trait]
impl OutboxLedger for InMemoryStore {
    async fn fetch_pending(
        &self,
        limit: usize,
        older_than: Duration,
        lease: Duration,
    ) -> Result<Vec<OutboxEntry>, StoreError> {
        let mut state = self.lock()?;
        let now = Utc::now();
        let cutoff = now - to_chrono(older_than);

        let blocked: HashSet<Uuid> = state
            .entries
            .values()
            .filter(|e| e.status.blocks_aggregate())
            .map(|e| e.aggregate_id)
            .collect();

        let seqs: Vec<i64> = state
            .entries
            .values()
            .filter(|e| {
                e.status == DeliveryStatus::Pending
                    && e.created_at <= cutoff
                    && !blocked.contains(&e.aggregate_id)
            })
            .map(|e| e.seq)
            .take(limit)
            .collect();

        let mut claimed = Vec::with_capacity(seqs.len());
        for seq in seqs {
            if let Some(entry) = state.entries.get_mut(&seq) {
                entry.status = DeliveryStatus::InFlight;
                entry.claimed_until = Some(now + to_chrono(lease));
                entry.last_attempt_at = Some(now);
                claimed.push(entry.clone());
            }
        }

        Ok(claimed)
    }

    async fn mark_delivered(&self, entry_id: Uuid) -> Result<bool, StoreError> {
        let mut state = self.lock()?;
        let Some(entry) = state.entry_mut(entry_id) else {
            return Ok(false);
        };
        if entry.status == DeliveryStatus::Delivered {
            return Ok(false);
        }
        entry.status = DeliveryStatus::Delivered;
        entry.delivered_at = Some(Utc::now());
        entry.claimed_until = None;
        Ok(true)
    }

    async fn mark_failed(&self, entry_id: Uuid, reason: &str) -> Result<bool, StoreError> {
        let mut state = self.lock()?;
        match state.entry_mut(entry_id) {
            Some(entry) if entry.status == DeliveryStatus::InFlight => {
                entry.status = DeliveryStatus::Failed;
                entry.attempts += 1;
                entry.last_attempt_at = Some(Utc::now());
                entry.last_error = Some(reason.to_string());
                entry.claimed_until = None;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn release(&self, entry_id: Uuid) -> Result<bool, StoreError> {
        let mut state = self.lock()?;
        match state.entry_mut(entry_id) {
            Some(entry) if entry.status == DeliveryStatus::InFlight => {
                entry.status = DeliveryStatus::Pending;
                entry.claimed_until = None;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn reclaim_expired(&self, max_attempts: i32) -> Result<ReclaimOutcome, StoreError> {
        let mut state = self.lock()?;
        let now = Utc::now();
        let mut outcome = ReclaimOutcome::default();

        for entry in state.entries.values_mut().filter(|e| e.lease_expired(now)) {
            entry.attempts += 1;
            entry.last_attempt_at = Some(now);
            entry.last_error = Some("claim lease expired".to_string());
            entry.claimed_until = None;

            if entry.attempts >= max_attempts {
                entry.status = DeliveryStatus::DeadLettered;
                outcome.dead_lettered.push(entry.clone());
            } else {
                entry.status = DeliveryStatus::Pending;
                outcome.requeued.push(entry.id);
            }
        }

        Ok(outcome)
    }

    async fn failed_entries(&self, limit: usize) -> Result<Vec<OutboxEntry>, StoreError> {
        Ok(self
            .lock()?
            .entries
            .values()
            .filter(|e| e.status == DeliveryStatus::Failed)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn requeue(&self, entry_id: Uuid) -> Result<bool, StoreError> {
        let mut state = self.lock()?;
        match state.entry_mut(entry_id) {
            Some(entry) if entry.status == DeliveryStatus::Failed => {
                entry.status = DeliveryStatus::Pending;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn dead_letter(&self, entry_id: Uuid, reason: &str) -> Result<bool, StoreError> {
        let mut state = self.lock()?;
        match state.entry_mut(entry_id) {
            Some(entry) if entry.status == DeliveryStatus::Failed => {
                entry.status = DeliveryStatus::DeadLettered;
                entry.last_error = Some(reason.to_string());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn dead_letters(&self, limit: usize) -> Result<Vec<OutboxEntry>, StoreError> {
        Ok(self
            .lock()?
            .entries
            .values()
            .filter(|e| e.status == DeliveryStatus::DeadLettered)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn requeue_dead_letter(&self, entry_id: Uuid) -> Result<bool, StoreError> {
        let mut state = self.lock()?;
        match state.entry_mut(entry_id) {
            Some(entry) if entry.status == DeliveryStatus::DeadLettered => {
                entry.status = DeliveryStatus::Pending;
                entry.attempts = 0;
                entry.last_error = None;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn prune_delivered(&self, retention: Duration) -> Result<u64, StoreError> {
        let mut state = self.lock()?;
        let cutoff = Utc::now() - to_chrono(retention);

        let expired: Vec<(i64, Uuid)> = state
            .entries
            .values()
            .filter(|e| {
                e.status == DeliveryStatus::Delivered
                    && e.delivered_at.map(|at| at <= cutoff).unwrap_or(false)
            })
            .map(|e| (e.seq, e.id))
            .collect();

        for (seq, id) in &expired {
            state.entries.remove(seq);
            state.seq_by_id.remove(id);
        }

        Ok(expired.len() as u64)
    }

    async fn find_divergence(&self, window: Duration) -> Result<Vec<Divergence>, StoreError> {
        let state = self.lock()?;
        let since = Utc::now() - to_chrono(window);
        let recorded: HashSet<(Uuid, i64)> = state
            .entries
            .values()
            .map(|e| (e.aggregate_id, e.aggregate_version))
            .collect();

        let mut found: Vec<Divergence> = state
            .orders
            .values()
            .filter(|o| o.updated_at >= since && !recorded.contains(&(o.id, o.version)))
            .map(|o| Divergence::MissingEntry {
                order_id: o.id,
                version: o.version,
            })
            .collect();

        found.extend(
            state
                .entries
                .values()
                .filter(|e| e.created_at >= since)
                .filter(|e| {
                    state
                        .orders
                        .get(&e.aggregate_id)
                        .map(|o| e.aggregate_version > o.version)
                        .unwrap_or(true)
                })
                .map(|e| Divergence::OrphanEntry {
                    entry_id: e.id,
                    aggregate_id: e.aggregate_id,
                    aggregate_version: e.aggregate_version,
                }),
        );

        Ok(found)
    }

    async fn status_counts(&self) -> Result<HashMap<DeliveryStatus, i64>, StoreError> {
        let state = self.lock()?;
        let mut counts: HashMap<DeliveryStatus, i64> = HashMap::new();
        for entry in state.entries.values() {
            *counts.entry(entry.status).or_default() += 1;
        }
        Ok(counts)
    }

    async fn entries_for(&self, aggregate_id: Uuid) -> Result<Vec<OutboxEntry>, StoreError> {
        Ok(self
            .lock()?
            .entries
            .values()
            .filter(|e| e.aggregate_id == aggregate_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl ShelfStore for InMemoryStore {
    async fn find_by_menu_item_id(&self, menu_item_id: &str) -> Result<Option<ShelfStock>, StoreError> {
        Ok(self.lock()?.shelf.get(menu_item_id).cloned())
    }

    async fn exists_by_menu_item_id(&self, menu_item_id: &str) -> Result<bool, StoreError> {
        Ok(self.lock()?.shelf.contains_key(menu_item_id))
    }

    async fn stocked_at_least(&self, quantity: i32) -> Result<Vec<ShelfStock>, StoreError> {
        Ok(self
            .lock()?
            .shelf
            .values()
            .filter(|s| s.quantity >= quantity)
            .cloned()
            .collect())
    }

    async fn restock(&self, menu_item_id: &str, quantity: i32) -> Result<ShelfStock, StoreError> {
        let mut state = self.lock()?;
        let stock = state
            .shelf
            .entry(menu_item_id.to_string())
            .or_insert_with(|| ShelfStock {
                menu_item_id: menu_item_id.to_string(),
                quantity: 0,
                updated_at: Utc::now(),
            });
        stock.quantity = stock.quantity.saturating_add(quantity);
        stock.updated_at = Utc::now();
        Ok(stock.clone())
    }

    async fn take(&self, menu_item_id: &str, quantity: i32) -> Result<ShelfStock, StoreError> {
        let mut state = self.lock()?;
        let available = state.shelf.get(menu_item_id).map(|s| s.quantity).unwrap_or(0);
        match state.shelf.get_mut(menu_item_id) {
            Some(stock) if available >= quantity => {
                stock.quantity -= quantity;
                stock.updated_at = Utc::now();
                Ok(stock.clone())
            }
            _ => Err(StoreError::InsufficientStock {
                menu_item_id: menu_item_id.to_string(),
                requested: quantity,
                available,
            }),
        }
    }
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::order::{LineItem, Order, OrderStatus};
    use crate::outbox::EventEnvelope;
    use rust_decimal::Decimal;

    const NO_LEASE: Duration = Duration::ZERO;
    const LEASE: Duration = Duration::from_secs(30);

    fn placed_change() -> OrderChange {
        let items = vec![LineItem::new("schabowy", 1, Decimal::new(3200, 2))];
        let (order, event) = Order::place("table-3", items).unwrap();
        change_for(order, OrderWrite::Insert, event.event_type())
    }

    fn change_for(order: Order, write: OrderWrite, event_type: &str) -> OrderChange {
        let envelope = EventEnvelope::new(order.id, order.version, event_type, order.updated_at, ());
        OrderChange {
            entry: OutboxEntry::from_envelope(&envelope).unwrap(),
            order,
            write,
        }
    }

    async fn commit_placed_and_accepted(store: &InMemoryStore) -> Order {
        let placed = placed_change();
        let order = placed.order.clone();
        store.commit(placed).await.unwrap();
        let (accepted, event) = order.transition(OrderStatus::Accepted).unwrap();
        store
            .commit(change_for(
                accepted.clone(),
                OrderWrite::Update { expected_version: 1 },
                event.event_type(),
            ))
            .await
            .unwrap();
        accepted
    }

    #[tokio::test]
    async fn test_commit_assigns_increasing_seq() {
        let store = InMemoryStore::new();
        let first = store.commit(placed_change()).await.unwrap();
        let second = store.commit(placed_change()).await.unwrap();

        assert_eq!(first.seq, 1);
        assert_eq!(second.seq, 2);
        assert_eq!(store.order_count(), 2);
        assert_eq!(store.entry_count(), 2);
    }

    #[tokio::test]
    async fn test_conditional_update_rejects_stale_version() {
        let store = InMemoryStore::new();
        let accepted = commit_placed_and_accepted(&store).await;

        let (prepping, event) = accepted.transition(OrderStatus::InPreparation).unwrap();
        let err = store
            .commit(change_for(
                prepping,
                OrderWrite::Update { expected_version: 1 },
                event.event_type(),
            ))
            .await
            .unwrap_err();

        assert!(matches!(err, StoreError::VersionConflict { expected: 1, actual: 2, .. }));
        assert_eq!(store.get(accepted.id).await.unwrap().version, 2);
        assert_eq!(store.entry_count(), 2);
    }

    #[tokio::test]
    async fn test_fault_after_order_write_rolls_back_both() {
        let store = InMemoryStore::new();
        store.inject_fault(StorageFault::AfterOrderWrite);

        let change = placed_change();
        let order_id = change.order.id;
        assert!(store.commit(change).await.is_err());

        assert!(matches!(store.get(order_id).await, Err(StoreError::NotFound(_))));
        assert_eq!(store.entry_count(), 0);

        // one-shot
        assert!(store.commit(placed_change()).await.is_ok());
    }

    #[tokio::test]
    async fn test_fault_on_update_restores_previous_row() {
        let store = InMemoryStore::new();
        let accepted = commit_placed_and_accepted(&store).await;
        store.inject_fault(StorageFault::AfterOrderWrite);

        let (prepping, event) = accepted.transition(OrderStatus::InPreparation).unwrap();
        let result = store
            .commit(change_for(
                prepping,
                OrderWrite::Update { expected_version: 2 },
                event.event_type(),
            ))
            .await;

        assert!(result.is_err());
        assert_eq!(store.get(accepted.id).await.unwrap(), accepted);
        assert_eq!(store.entries_for(accepted.id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_fetch_pending_claims_oldest_first_once() {
        let store = InMemoryStore::new();
        for _ in 0..3 {
            store.commit(placed_change()).await.unwrap();
        }

        let first = store.fetch_pending(2, Duration::ZERO, LEASE).await.unwrap();
        let second = store.fetch_pending(10, Duration::ZERO, LEASE).await.unwrap();

        assert_eq!(first.iter().map(|e| e.seq).collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(second.iter().map(|e| e.seq).collect::<Vec<_>>(), vec![3]);
        assert!(first.iter().all(|e| e.status == DeliveryStatus::InFlight));
        assert!(store.fetch_pending(10, Duration::ZERO, LEASE).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_fetch_pending_respects_age_filter() {
        let store = InMemoryStore::new();
        store.commit(placed_change()).await.unwrap();

        let too_young = store
            .fetch_pending(10, Duration::from_secs(3600), LEASE)
            .await
            .unwrap();
        assert!(too_young.is_empty());
    }

    #[tokio::test]
    async fn test_in_flight_entry_blocks_later_entries_of_same_order() {
        let store = InMemoryStore::new();
        let placed = placed_change();
        let order = placed.order.clone();
        store.commit(placed).await.unwrap();

        let claimed = store.fetch_pending(1, Duration::ZERO, LEASE).await.unwrap();
        assert_eq!(claimed.len(), 1);

        let (accepted, event) = order.transition(OrderStatus::Accepted).unwrap();
        store
            .commit(change_for(accepted, OrderWrite::Update { expected_version: 1 }, event.event_type()))
            .await
            .unwrap();

        assert!(store.fetch_pending(10, Duration::ZERO, LEASE).await.unwrap().is_empty());

        store.mark_delivered(claimed[0].id).await.unwrap();
        let next = store.fetch_pending(10, Duration::ZERO, LEASE).await.unwrap();
        assert_eq!(next.len(), 1);
        assert_eq!(next[0].event_type, "OrderAccepted");
    }

    #[tokio::test]
    async fn test_mark_failed_counts_attempts_and_release_does_not() {
        let store = InMemoryStore::new();
        store.commit(placed_change()).await.unwrap();

        let entry = store.fetch_pending(1, Duration::ZERO, LEASE).await.unwrap().remove(0);
        assert!(store.release(entry.id).await.unwrap());

        let entry = store.fetch_pending(1, Duration::ZERO, LEASE).await.unwrap().remove(0);
        assert!(store.mark_failed(entry.id, "broker timeout").await.unwrap());
        assert!(!store.mark_failed(entry.id, "again").await.unwrap());

        let failed = store.failed_entries(10).await.unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].attempts, 1);
        assert_eq!(failed[0].last_error.as_deref(), Some("broker timeout"));
    }

    #[tokio::test]
    async fn test_reclaim_expired_requeues_then_dead_letters() {
        let store = InMemoryStore::new();
        store.commit(placed_change()).await.unwrap();

        store.fetch_pending(1, Duration::ZERO, NO_LEASE).await.unwrap();
        let outcome = store.reclaim_expired(2).await.unwrap();
        assert_eq!(outcome.requeued.len(), 1);
        assert!(outcome.dead_lettered.is_empty());

        store.fetch_pending(1, Duration::ZERO, NO_LEASE).await.unwrap();
        let outcome = store.reclaim_expired(2).await.unwrap();
        assert!(outcome.requeued.is_empty());
        assert_eq!(outcome.dead_lettered.len(), 1);
        assert_eq!(outcome.dead_lettered[0].attempts, 2);

        assert!(store.fetch_pending(10, Duration::ZERO, LEASE).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_dead_letter_replay_resets_attempts() {
        let store = InMemoryStore::new();
        store.commit(placed_change()).await.unwrap();

        let entry = store.fetch_pending(1, Duration::ZERO, LEASE).await.unwrap().remove(0);
        store.mark_failed(entry.id, "poison").await.unwrap();
        assert!(store.dead_letter(entry.id, "attempts exhausted").await.unwrap());
        assert_eq!(store.dead_letters(10).await.unwrap().len(), 1);

        assert!(store.requeue_dead_letter(entry.id).await.unwrap());
        let replayed = store.fetch_pending(1, Duration::ZERO, LEASE).await.unwrap();
        assert_eq!(replayed.len(), 1);
        assert_eq!(replayed[0].attempts, 0);
    }

    #[tokio::test]
    async fn test_prune_only_removes_delivered() {
        let store = InMemoryStore::new();
        store.commit(placed_change()).await.unwrap();
        store.commit(placed_change()).await.unwrap();

        let claimed = store.fetch_pending(1, Duration::ZERO, LEASE).await.unwrap();
        store.mark_delivered(claimed[0].id).await.unwrap();

        assert_eq!(store.prune_delivered(Duration::from_secs(3600)).await.unwrap(), 0);
        assert_eq!(store.prune_delivered(Duration::ZERO).await.unwrap(), 1);
        assert_eq!(store.entry_count(), 1);
    }

    #[tokio::test]
    async fn test_status_counts() {
        let store = InMemoryStore::new();
        store.commit(placed_change()).await.unwrap();
        store.commit(placed_change()).await.unwrap();
        store.fetch_pending(1, Duration::ZERO, LEASE).await.unwrap();

        let counts = store.status_counts().await.unwrap();
        assert_eq!(counts.get(&DeliveryStatus::Pending), Some(&1));
        assert_eq!(counts.get(&DeliveryStatus::InFlight), Some(&1));
    }

    #[tokio::test]
    async fn test_consistent_store_has_no_divergence() {
        let store = InMemoryStore::new();
        commit_placed_and_accepted(&store).await;

        let found = store.find_divergence(Duration::from_secs(3600)).await.unwrap();
        assert!(found.is_empty());
    }

    #[tokio::test]
    async fn test_shelf_restock_take_and_lookups() {
        let store = InMemoryStore::new();
        assert!(!store.exists_by_menu_item_id("pierogi").await.unwrap());
        assert_eq!(store.find_by_menu_item_id("pierogi").await.unwrap(), None);

        store.restock("pierogi", 4).await.unwrap();
        store.restock("pierogi", 2).await.unwrap();
        store.restock("zurek", 1).await.unwrap();
        assert!(store.exists_by_menu_item_id("pierogi").await.unwrap());

        let left = store.take("pierogi", 5).await.unwrap();
        assert_eq!(left.quantity, 1);

        // at least, not strictly above
        let stocked: Vec<String> = store
            .stocked_at_least(1)
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.menu_item_id)
            .collect();
        assert_eq!(stocked, vec!["pierogi", "zurek"]);
        assert!(store.stocked_at_least(2).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_shelf_take_never_goes_negative() {
        let store = InMemoryStore::new();
        store.restock("bigos", 1).await.unwrap();

        let err = store.take("bigos", 2).await.unwrap_err();
        assert!(matches!(
            err,
            StoreError::InsufficientStock { requested: 2, available: 1, .. }
        ));
        assert_eq!(store.find_by_menu_item_id("bigos").await.unwrap().unwrap().quantity, 1);

        let missing = store.take("golabki", 1).await.unwrap_err();
        assert!(matches!(missing, StoreError::InsufficientStock { available: 0, .. }));
        assert!(!store.exists_by_menu_item_id("golabki").await.unwrap());
    }

    #[tokio::test]
    async fn test_orphan_entries_outside_window_are_ignored() {
        let store = InMemoryStore::new();
        let order_id = commit_placed_and_accepted(&store).await.id;
        store.drop_order(order_id);

        let found = store.find_divergence(Duration::from_secs(3600)).await.unwrap();
        assert_eq!(found.len(), 2);
        assert!(found
            .iter()
            .all(|d| matches!(d, Divergence::OrphanEntry { aggregate_id, .. } if *aggregate_id == order_id)));

        tokio::time::sleep(Duration::from_millis(5)).await;
        assert!(store.find_divergence(Duration::ZERO).await.unwrap().is_empty());
    }
}
