use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::types::Json;
use sqlx::{Postgres, Row, Transaction};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

use super::{
    to_chrono, Divergence, OrderChange, OrderStore, OrderWrite, OutboxLedger, ReclaimOutcome,
    ShelfStock, ShelfStore, StoreError,
};
use crate::domain::order::{LineItem, Order, OrderStatus};
use crate::outbox::{DeliveryStatus, OutboxEntry};

// ============================================================================
// PostgreSQL Store
// ============================================================================
//
// `orders` and `outbox` live in the same database so one transaction covers
// the order write and the ledger append. Claims are serialized with a
// transaction-scoped advisory lock; the claiming UPDATE itself is the
// conditional write that moves entries Pending -> InFlight.
//
// ============================================================================

/// Advisory lock key shared by every publisher claiming from this ledger
const CLAIM_LOCK_KEY: i64 = 0x6f75_7462_6f78;

const ENTRY_COLUMNS: &str = "seq, id, aggregate_id, aggregate_version, event_type, payload, \
     created_at, status, attempts, last_attempt_at, last_error, claimed_until, delivered_at";

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        info!(max_connections, "🐘 Connected to PostgreSQL");
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Apply pending migrations from `migrations/`
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        debug!("Migrations applied");
        Ok(())
    }

    async fn write_order(
        tx: &mut Transaction<'_, Postgres>,
        order: &Order,
        write: OrderWrite,
    ) -> Result<(), StoreError> {
        match write {
            OrderWrite::Insert => {
                let result = sqlx::query(
                    r#"
                    INSERT INTO orders (id, version, customer_ref, items, status, created_at, updated_at)
                    VALUES ($1, $2, $3, $4, $5, $6, $7)
                    ON CONFLICT (id) DO NOTHING
                    "#,
                )
                .bind(order.id)
                .bind(order.version)
                .bind(&order.customer_ref)
                .bind(Json(&order.items))
                .bind(order.status.as_str())
                .bind(order.created_at)
                .bind(order.updated_at)
                .execute(&mut **tx)
                .await?;

                if result.rows_affected() == 0 {
                    return Err(StoreError::DuplicateOrder(order.id));
                }
            }
            OrderWrite::Update { expected_version } => {
                let result = sqlx::query(
                    r#"
                    UPDATE orders
                    SET version = $2, customer_ref = $3, items = $4, status = $5, updated_at = $6
                    WHERE id = $1 AND version = $7
                    "#,
                )
                .bind(order.id)
                .bind(order.version)
                .bind(&order.customer_ref)
                .bind(Json(&order.items))
                .bind(order.status.as_str())
                .bind(order.updated_at)
                .bind(expected_version)
                .execute(&mut **tx)
                .await?;

                if result.rows_affected() == 0 {
                    let actual: Option<i64> =
                        sqlx::query_scalar("SELECT version FROM orders WHERE id = $1")
                            .bind(order.id)
                            .fetch_optional(&mut **tx)
                            .await?;

                    return Err(match actual {
                        None => StoreError::NotFound(order.id),
                        Some(actual) => StoreError::VersionConflict {
                            order_id: order.id,
                            expected: expected_version,
                            actual,
                        },
                    });
                }
            }
        }
        Ok(())
    }

    /// Ledger append; only ever called inside the order's transaction
    async fn append_entry(
        tx: &mut Transaction<'_, Postgres>,
        entry: &OutboxEntry,
    ) -> Result<i64, StoreError> {
        let seq: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO outbox (id, aggregate_id, aggregate_version, event_type, payload, created_at, status, attempts)
            VALUES ($1, $2, $3, $4, $5, $6, $7, 0)
            RETURNING seq
            "#,
        )
        .bind(entry.id)
        .bind(entry.aggregate_id)
        .bind(entry.aggregate_version)
        .bind(&entry.event_type)
        .bind(&entry.payload)
        .bind(entry.created_at)
        .bind(DeliveryStatus::Pending.as_str())
        .fetch_one(&mut **tx)
        .await?;

        Ok(seq)
    }

    async fn transition(
        &self,
        entry_id: Uuid,
        from: DeliveryStatus,
        to: DeliveryStatus,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query("UPDATE outbox SET status = $3 WHERE id = $1 AND status = $2")
            .bind(entry_id)
            .bind(from.as_str())
            .bind(to.as_str())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn entries_with_status(
        &self,
        status: DeliveryStatus,
        limit: usize,
    ) -> Result<Vec<OutboxEntry>, StoreError> {
        let sql = format!("SELECT {ENTRY_COLUMNS} FROM outbox WHERE status = $1 ORDER BY seq LIMIT $2");
        let rows = sqlx::query(&sql)
            .bind(status.as_str())
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(entry_from_row).collect()
    }
}

fn order_from_row(row: &PgRow) -> Result<Order, StoreError> {
    let status: String = row.try_get("status")?;
    let items: Json<Vec<LineItem>> = row.try_get("items")?;

    Ok(Order {
        id: row.try_get("id")?,
        version: row.try_get("version")?,
        customer_ref: row.try_get("customer_ref")?,
        items: items.0,
        status: status.parse::<OrderStatus>().map_err(StoreError::Corrupt)?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn entry_from_row(row: &PgRow) -> Result<OutboxEntry, StoreError> {
    let status: String = row.try_get("status")?;

    Ok(OutboxEntry {
        id: row.try_get("id")?,
        seq: row.try_get("seq")?,
        aggregate_id: row.try_get("aggregate_id")?,
        aggregate_version: row.try_get("aggregate_version")?,
        event_type: row.try_get("event_type")?,
        payload: row.try_get("payload")?,
        created_at: row.try_get("created_at")?,
        status: status.parse::<DeliveryStatus>().map_err(StoreError::Corrupt)?,
        attempts: row.try_get("attempts")?,
        last_attempt_at: row.try_get::<Option<DateTime<Utc>>, _>("last_attempt_at")?,
        last_error: row.try_get("last_error")?,
        claimed_until: row.try_get::<Option<DateTime<Utc>>, _>("claimed_until")?,
        delivered_at: row.try_get::<Option<DateTime<Utc>>, _>("delivered_at")?,
    })
}

fn stock_from_row(row: &PgRow) -> Result<ShelfStock, StoreError> {
    Ok(ShelfStock {
        menu_item_id: row.try_get("menu_item_id")?,
        quantity: row.try_get("quantity")?,
        updated_at: row.try_get("updated_at")?,
    })
}

#[async_trait]
impl OrderStore for PgStore {
    async fn get(&self, order_id: Uuid) -> Result<Order, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, version, customer_ref, items, status, created_at, updated_at
            FROM orders
            WHERE id = $1
            "#,
        )
        .bind(order_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(StoreError::NotFound(order_id))?;

        order_from_row(&row)
    }

    async fn commit(&self, change: OrderChange) -> Result<OutboxEntry, StoreError> {
        let mut tx = self.pool.begin().await?;

        Self::write_order(&mut tx, &change.order, change.write).await?;
        let seq = Self::append_entry(&mut tx, &change.entry).await?;

        // dropping `tx` on any error above rolls both writes back
        tx.commit().await?;

        let mut entry = change.entry;
        entry.seq = seq;
        Ok(entry)
    }
}

#[async_trait]
impl OutboxLedger for PgStore {
    async fn fetch_pending(
        &self,
        limit: usize,
        older_than: Duration,
        lease: Duration,
    ) -> Result<Vec<OutboxEntry>, StoreError> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(CLAIM_LOCK_KEY)
            .execute(&mut *tx)
            .await?;

        let rows = sqlx::query(
            r#"
            WITH candidates AS (
                SELECT seq FROM outbox
                WHERE status = 'Pending'
                  AND created_at <= $1
                  AND aggregate_id NOT IN (
                      SELECT aggregate_id FROM outbox WHERE status IN ('InFlight', 'Failed')
                  )
                ORDER BY seq
                LIMIT $2
            )
            UPDATE outbox o
            SET status = 'InFlight', claimed_until = $3, last_attempt_at = $4
            FROM candidates c
            WHERE o.seq = c.seq
            RETURNING o.seq, o.id, o.aggregate_id, o.aggregate_version, o.event_type, o.payload,
                      o.created_at, o.status, o.attempts, o.last_attempt_at, o.last_error,
                      o.claimed_until, o.delivered_at
            "#,
        )
        .bind(now - to_chrono(older_than))
        .bind(limit as i64)
        .bind(now + to_chrono(lease))
        .bind(now)
        .fetch_all(&mut *tx)
        .await?;

        tx.commit().await?;

        let mut claimed = rows.iter().map(entry_from_row).collect::<Result<Vec<_>, _>>()?;
        claimed.sort_by_key(|e| e.seq);
        Ok(claimed)
    }

    async fn mark_delivered(&self, entry_id: Uuid) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE outbox
            SET status = 'Delivered', delivered_at = $2, claimed_until = NULL
            WHERE id = $1 AND status <> 'Delivered'
            "#,
        )
        .bind(entry_id)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn mark_failed(&self, entry_id: Uuid, reason: &str) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE outbox
            SET status = 'Failed', attempts = attempts + 1, last_attempt_at = $2,
                last_error = $3, claimed_until = NULL
            WHERE id = $1 AND status = 'InFlight'
            "#,
        )
        .bind(entry_id)
        .bind(Utc::now())
        .bind(reason)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn release(&self, entry_id: Uuid) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE outbox SET status = 'Pending', claimed_until = NULL WHERE id = $1 AND status = 'InFlight'",
        )
        .bind(entry_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn reclaim_expired(&self, max_attempts: i32) -> Result<ReclaimOutcome, StoreError> {
        let sql = format!(
            r#"
            UPDATE outbox
            SET attempts = attempts + 1,
                last_attempt_at = $1,
                last_error = 'claim lease expired',
                claimed_until = NULL,
                status = CASE WHEN attempts + 1 >= $2 THEN 'DeadLettered' ELSE 'Pending' END
            WHERE status = 'InFlight' AND (claimed_until IS NULL OR claimed_until <= $1)
            RETURNING {ENTRY_COLUMNS}
            "#
        );
        let rows = sqlx::query(&sql)
            .bind(Utc::now())
            .bind(max_attempts)
            .fetch_all(&self.pool)
            .await?;

        let mut outcome = ReclaimOutcome::default();
        for row in &rows {
            let entry = entry_from_row(row)?;
            if entry.status == DeliveryStatus::DeadLettered {
                outcome.dead_lettered.push(entry);
            } else {
                outcome.requeued.push(entry.id);
            }
        }
        Ok(outcome)
    }

    async fn failed_entries(&self, limit: usize) -> Result<Vec<OutboxEntry>, StoreError> {
        self.entries_with_status(DeliveryStatus::Failed, limit).await
    }

    async fn requeue(&self, entry_id: Uuid) -> Result<bool, StoreError> {
        self.transition(entry_id, DeliveryStatus::Failed, DeliveryStatus::Pending)
            .await
    }

    async fn dead_letter(&self, entry_id: Uuid, reason: &str) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE outbox SET status = 'DeadLettered', last_error = $2 WHERE id = $1 AND status = 'Failed'",
        )
        .bind(entry_id)
        .bind(reason)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn dead_letters(&self, limit: usize) -> Result<Vec<OutboxEntry>, StoreError> {
        self.entries_with_status(DeliveryStatus::DeadLettered, limit)
            .await
    }

    async fn requeue_dead_letter(&self, entry_id: Uuid) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE outbox
            SET status = 'Pending', attempts = 0, last_error = NULL
            WHERE id = $1 AND status = 'DeadLettered'
            "#,
        )
        .bind(entry_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn prune_delivered(&self, retention: Duration) -> Result<u64, StoreError> {
        let result =
            sqlx::query("DELETE FROM outbox WHERE status = 'Delivered' AND delivered_at <= $1")
                .bind(Utc::now() - to_chrono(retention))
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected())
    }

    async fn find_divergence(&self, window: Duration) -> Result<Vec<Divergence>, StoreError> {
        let since = Utc::now() - to_chrono(window);
        let missing = sqlx::query(
            r#"
            SELECT o.id, o.version
            FROM orders o
            WHERE o.updated_at >= $1
              AND NOT EXISTS (
                  SELECT 1 FROM outbox e
                  WHERE e.aggregate_id = o.id AND e.aggregate_version = o.version
              )
            "#,
        )
        .bind(since)
        .fetch_all(&self.pool)
        .await?;

        let orphans = sqlx::query(
            r#"
            SELECT e.id, e.aggregate_id, e.aggregate_version
            FROM outbox e
            LEFT JOIN orders o ON o.id = e.aggregate_id
            WHERE e.created_at >= $1
              AND (o.id IS NULL OR e.aggregate_version > o.version)
            ORDER BY e.seq
            "#,
        )
        .bind(since)
        .fetch_all(&self.pool)
        .await?;

        let mut found = Vec::with_capacity(missing.len() + orphans.len());
        for row in &missing {
            found.push(Divergence::MissingEntry {
                order_id: row.try_get("id")?,
                version: row.try_get("version")?,
            });
        }
        for row in &orphans {
            found.push(Divergence::OrphanEntry {
                entry_id: row.try_get("id")?,
                aggregate_id: row.try_get("aggregate_id")?,
                aggregate_version: row.try_get("aggregate_version")?,
            });
        }
        Ok(found)
    }

    async fn status_counts(&self) -> Result<HashMap<DeliveryStatus, i64>, StoreError> {
        let rows = sqlx::query("SELECT status, COUNT(*) AS n FROM outbox GROUP BY status")
            .fetch_all(&self.pool)
            .await?;

        let mut counts = HashMap::new();
        for row in &rows {
            let status: String = row.try_get("status")?;
            let status = status.parse::<DeliveryStatus>().map_err(StoreError::Corrupt)?;
            counts.insert(status, row.try_get::<i64, _>("n")?);
        }
        Ok(counts)
    }

    async fn entries_for(&self, aggregate_id: Uuid) -> Result<Vec<OutboxEntry>, StoreError> {
        let sql = format!("SELECT {ENTRY_COLUMNS} FROM outbox WHERE aggregate_id = $1 ORDER BY seq");
        let rows = sqlx::query(&sql)
            .bind(aggregate_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(entry_from_row).collect()
    }
}

#[async_trait]
impl ShelfStore for PgStore {
    async fn find_by_menu_item_id(&self, menu_item_id: &str) -> Result<Option<ShelfStock>, StoreError> {
        let row = sqlx::query("SELECT menu_item_id, quantity, updated_at FROM shelf WHERE menu_item_id = $1")
            .bind(menu_item_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(stock_from_row).transpose()
    }

    async fn exists_by_menu_item_id(&self, menu_item_id: &str) -> Result<bool, StoreError> {
        let exists: bool = sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM shelf WHERE menu_item_id = $1)")
            .bind(menu_item_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(exists)
    }

    async fn stocked_at_least(&self, quantity: i32) -> Result<Vec<ShelfStock>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT menu_item_id, quantity, updated_at
            FROM shelf
            WHERE quantity >= $1
            ORDER BY menu_item_id
            "#,
        )
        .bind(quantity)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(stock_from_row).collect()
    }

    async fn restock(&self, menu_item_id: &str, quantity: i32) -> Result<ShelfStock, StoreError> {
        let row = sqlx::query(
            r#"
            INSERT INTO shelf (menu_item_id, quantity, updated_at)
            VALUES ($1, $2, now())
            ON CONFLICT (menu_item_id)
            DO UPDATE SET quantity = shelf.quantity + EXCLUDED.quantity, updated_at = now()
            RETURNING menu_item_id, quantity, updated_at
            "#,
        )
        .bind(menu_item_id)
        .bind(quantity)
        .fetch_one(&self.pool)
        .await?;
        stock_from_row(&row)
    }

    async fn take(&self, menu_item_id: &str, quantity: i32) -> Result<ShelfStock, StoreError> {
        let row = sqlx::query(
            r#"
            UPDATE shelf
            SET quantity = quantity - $2, updated_at = now()
            WHERE menu_item_id = $1 AND quantity >= $2
            RETURNING menu_item_id, quantity, updated_at
            "#,
        )
        .bind(menu_item_id)
        .bind(quantity)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => stock_from_row(&row),
            None => {
                let available = self
                    .find_by_menu_item_id(menu_item_id)
                    .await?
                    .map(|s| s.quantity)
                    .unwrap_or(0);
                Err(StoreError::InsufficientStock {
                    menu_item_id: menu_item_id.to_string(),
                    requested: quantity,
                    available,
                })
            }
        }
    }
}
