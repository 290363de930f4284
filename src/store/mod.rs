// ============================================================================
// Persistence - Order Store + Outbox Ledger
// ============================================================================
//
// Two traits, one atomic unit:
// - `OrderStore` owns Order rows. Its only write path, `commit`, also appends
//   the change's outbox entry, so an order mutation and its event are stored
//   together or not at all.
// - `OutboxLedger` is everything after the commit: claiming, delivery status,
//   sweeping, dead letters.
// - `ShelfStore` counts prepared menu items waiting on the pickup shelf.
//
// Backends:
// - `PgStore`       - PostgreSQL through sqlx
// - `InMemoryStore` - one mutex-guarded state, for development and tests
//
// ============================================================================

mod memory;
mod postgres;

pub use memory::{InMemoryStore, StorageFault};
pub use postgres::PgStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::time::Duration;
use uuid::Uuid;

use crate::domain::order::Order;
use crate::outbox::{DeliveryStatus, OutboxEntry};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("order {0} does not exist")]
    NotFound(Uuid),

    #[error("order {order_id} is at version {actual}, expected {expected}")]
    VersionConflict {
        order_id: Uuid,
        expected: i64,
        actual: i64,
    },

    #[error("order {0} already exists")]
    DuplicateOrder(Uuid),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("corrupt row: {0}")]
    Corrupt(String),

    #[error("storage unavailable: {0}")]
    Unavailable(String),

    #[error("shelf holds {available} of {menu_item_id}, {requested} requested")]
    InsufficientStock {
        menu_item_id: String,
        requested: i32,
        available: i32,
    },
}

/// How the order row is written inside the atomic unit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderWrite {
    Insert,
    /// Conditional update; fails unless the stored version equals this one
    Update { expected_version: i64 },
}

/// One committed state change: the order row plus its single outbox entry
#[derive(Debug, Clone)]
pub struct OrderChange {
    pub order: Order,
    pub write: OrderWrite,
    pub entry: OutboxEntry,
}

#[async_trait]
pub trait OrderStore: Send + Sync {
    async fn get(&self, order_id: Uuid) -> Result<Order, StoreError>;

    /// Write the order and append its outbox entry in one atomic unit.
    ///
    /// Returns the appended entry with its assigned `seq`.
    async fn commit(&self, change: OrderChange) -> Result<OutboxEntry, StoreError>;
}

/// Entries the sweeper took back from publishers whose lease ran out
#[derive(Debug, Clone, Default)]
pub struct ReclaimOutcome {
    pub requeued: Vec<Uuid>,
    pub dead_lettered: Vec<OutboxEntry>,
}

/// Store/ledger disagreement found by the sweeper
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Divergence {
    /// Order state with no ledger entry recording it
    MissingEntry { order_id: Uuid, version: i64 },
    /// Ledger entry for an order state that was never committed
    OrphanEntry {
        entry_id: Uuid,
        aggregate_id: Uuid,
        aggregate_version: i64,
    },
}

#[async_trait]
pub trait OutboxLedger: Send + Sync {
    /// Claim up to `limit` pending entries, oldest first.
    ///
    /// Only entries created at least `older_than` ago are eligible. Claimed
    /// entries become `InFlight` until `lease` runs out. Entries of an order
    /// that already has an `InFlight` or `Failed` entry stay put, so one
    /// order's events are never handed out of commit order.
    async fn fetch_pending(
        &self,
        limit: usize,
        older_than: Duration,
        lease: Duration,
    ) -> Result<Vec<OutboxEntry>, StoreError>;

    /// Record a broker acknowledgement
    async fn mark_delivered(&self, entry_id: Uuid) -> Result<bool, StoreError>;

    /// `InFlight` -> `Failed`, counting one attempt
    async fn mark_failed(&self, entry_id: Uuid, reason: &str) -> Result<bool, StoreError>;

    /// `InFlight` -> `Pending` without counting an attempt
    async fn release(&self, entry_id: Uuid) -> Result<bool, StoreError>;

    /// Return expired claims to `Pending`, or dead-letter them at `max_attempts`
    async fn reclaim_expired(&self, max_attempts: i32) -> Result<ReclaimOutcome, StoreError>;

    async fn failed_entries(&self, limit: usize) -> Result<Vec<OutboxEntry>, StoreError>;

    /// `Failed` -> `Pending`
    async fn requeue(&self, entry_id: Uuid) -> Result<bool, StoreError>;

    /// `Failed` -> `DeadLettered`
    async fn dead_letter(&self, entry_id: Uuid, reason: &str) -> Result<bool, StoreError>;

    async fn dead_letters(&self, limit: usize) -> Result<Vec<OutboxEntry>, StoreError>;

    /// Operator replay: `DeadLettered` -> `Pending` with a fresh attempt budget
    async fn requeue_dead_letter(&self, entry_id: Uuid) -> Result<bool, StoreError>;

    /// Delete entries delivered more than `retention` ago
    async fn prune_delivered(&self, retention: Duration) -> Result<u64, StoreError>;

    /// Compare orders touched and entries appended within `window`
    async fn find_divergence(&self, window: Duration) -> Result<Vec<Divergence>, StoreError>;

    async fn status_counts(&self) -> Result<HashMap<DeliveryStatus, i64>, StoreError>;

    /// All entries of one order in commit order
    async fn entries_for(&self, aggregate_id: Uuid) -> Result<Vec<OutboxEntry>, StoreError>;
}

/// Prepared units of one menu item on the pickup shelf
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShelfStock {
    pub menu_item_id: String,
    pub quantity: i32,
    pub updated_at: DateTime<Utc>,
}

#[async_trait]
pub trait ShelfStore: Send + Sync {
    async fn find_by_menu_item_id(&self, menu_item_id: &str) -> Result<Option<ShelfStock>, StoreError>;

    async fn exists_by_menu_item_id(&self, menu_item_id: &str) -> Result<bool, StoreError>;

    /// Items with at least `quantity` units on the shelf, by menu item id
    async fn stocked_at_least(&self, quantity: i32) -> Result<Vec<ShelfStock>, StoreError>;

    /// Put `quantity` units on the shelf, creating the row on first use
    async fn restock(&self, menu_item_id: &str, quantity: i32) -> Result<ShelfStock, StoreError>;

    /// Take `quantity` units off the shelf; nothing changes if fewer are there
    async fn take(&self, menu_item_id: &str, quantity: i32) -> Result<ShelfStock, StoreError>;
}

pub(crate) fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::days(365 * 100))
}
