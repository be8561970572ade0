//! # Offline Sale Queue
//!
//! Durable queue of sales recorded while the backend was unreachable.
//!
//! ## Producer / Consumer
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  POINT OF SALE (producer)              SYNC ENGINE (consumer)           │
//! │       │                                      │                          │
//! │       │ enqueue(sale)                        │ list_pending()           │
//! │       ▼                                      ▼                          │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │  queued_sales                                                   │   │
//! │  │  ┌──────────────┬──────────┬───────┬───────────┐                │   │
//! │  │  │ id           │ created  │ total │ tenant_id │  oldest first  │   │
//! │  │  ├──────────────┼──────────┼───────┼───────────┤                │   │
//! │  │  │ 17000...-a1  │ 10:01:02 │  1250 │ t-1       │                │   │
//! │  │  │ 17000...-b7  │ 10:03:40 │   300 │ NULL      │ ← untagged     │   │
//! │  │  └──────────────┴──────────┴───────┴───────────┘                │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       ▲                                      │                          │
//! │       │                                      │ remove(id)  (drained)    │
//! │       │ requeue_quarantined(id)              │ quarantine(id, reason)   │
//! │       │                                      ▼                          │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │  quarantined_sales  (permanently rejected, kept for review)     │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                                                         │
//! │  Rows are only ever INSERTed or DELETEd. No UPDATE touches a queued    │
//! │  sale, so producer and consumer never contend on a field.              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use sqlx::{FromRow, SqlitePool};
use tracing::{debug, info, warn};

use crate::error::{DbError, DbResult};
use till_core::validation::validate_new_sale;
use till_core::{
    generate_queue_id, CoreError, Money, NewQueuedSale, QuarantinedSale, QueuedSale, SaleLine,
};

const SALE_COLUMNS: &str = "id, lines_json, total_cents, payment_method, created_at, \
                            customer_id, tenant_id, user_id";

// =============================================================================
// Row Types
// =============================================================================

#[derive(Debug, FromRow)]
struct QueuedSaleRow {
    id: String,
    lines_json: String,
    total_cents: i64,
    payment_method: String,
    created_at: DateTime<Utc>,
    customer_id: Option<String>,
    tenant_id: Option<String>,
    user_id: String,
}

impl TryFrom<QueuedSaleRow> for QueuedSale {
    type Error = CoreError;

    fn try_from(row: QueuedSaleRow) -> Result<Self, Self::Error> {
        let lines: Vec<SaleLine> =
            serde_json::from_str(&row.lines_json).map_err(|e| CoreError::CorruptLines {
                sale_id: row.id.clone(),
                reason: e.to_string(),
            })?;

        Ok(QueuedSale {
            id: row.id,
            lines,
            total: Money::from_cents(row.total_cents),
            payment_method: row.payment_method.into(),
            created_at: row.created_at,
            customer_id: row.customer_id,
            tenant_id: row.tenant_id,
            user_id: row.user_id,
        })
    }
}

#[derive(Debug, FromRow)]
struct QuarantinedSaleRow {
    #[sqlx(flatten)]
    sale: QueuedSaleRow,
    reason: String,
    quarantined_at: DateTime<Utc>,
}

// =============================================================================
// Repository
// =============================================================================

/// Repository for the offline sale queue.
#[derive(Debug, Clone)]
pub struct QueueRepository {
    pool: SqlitePool,
}

impl QueueRepository {
    /// Creates a new QueueRepository.
    pub fn new(pool: SqlitePool) -> Self {
        QueueRepository { pool }
    }

    /// Validates and durably queues a sale.
    ///
    /// ## Arguments
    /// * `sale` - The completed sale; `id`/`created_at` are filled if absent
    /// * `tenant_id` - Tenant resolved at this instant, `None` if unknown
    ///
    /// ## Returns
    /// The stored sale. When this returns `Ok`, the row is committed.
    ///
    /// ## Errors
    /// * `DbError::Validation` - empty lines, bad quantity, negative total
    /// * `DbError::UniqueViolation` - caller-supplied id already queued
    pub async fn enqueue(&self, sale: NewQueuedSale, tenant_id: Option<&str>) -> DbResult<QueuedSale> {
        validate_new_sale(&sale)?;

        let now = Utc::now();
        let queued = QueuedSale {
            id: sale.id.unwrap_or_else(|| generate_queue_id(now)),
            lines: sale.lines,
            total: sale.total,
            payment_method: sale.payment_method,
            created_at: sale.created_at.unwrap_or(now),
            customer_id: sale.customer_id,
            tenant_id: tenant_id.map(str::to_string),
            user_id: sale.user_id,
        };

        let lines_json = serde_json::to_string(&queued.lines)?;

        sqlx::query(
            r#"
            INSERT INTO queued_sales (
                id, lines_json, total_cents, payment_method, created_at,
                customer_id, tenant_id, user_id
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
        )
        .bind(&queued.id)
        .bind(&lines_json)
        .bind(queued.total.cents())
        .bind(queued.payment_method.as_str())
        .bind(queued.created_at)
        .bind(&queued.customer_id)
        .bind(&queued.tenant_id)
        .bind(&queued.user_id)
        .execute(&self.pool)
        .await
        .map_err(|e| match DbError::from(e) {
            DbError::UniqueViolation { .. } => DbError::duplicate("queued sale id", &queued.id),
            other => other,
        })?;

        info!(
            id = %queued.id,
            lines = queued.lines.len(),
            total = queued.total.cents(),
            tagged = queued.is_tagged(),
            "Sale queued offline"
        );

        Ok(queued)
    }

    /// Gets one queued sale by id.
    pub async fn get(&self, id: &str) -> DbResult<Option<QueuedSale>> {
        let row: Option<QueuedSaleRow> =
            sqlx::query_as(&format!("SELECT {SALE_COLUMNS} FROM queued_sales WHERE id = ?1"))
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(row.map(QueuedSale::try_from).transpose()?)
    }

    /// Returns every queued sale, oldest first.
    ///
    /// A snapshot: sales enqueued after this call are picked up by the next
    /// call, never by the returned vector.
    pub async fn list_pending(&self) -> DbResult<Vec<QueuedSale>> {
        let rows: Vec<QueuedSaleRow> = sqlx::query_as(&format!(
            "SELECT {SALE_COLUMNS} FROM queued_sales ORDER BY created_at ASC, rowid ASC"
        ))
        .fetch_all(&self.pool)
        .await?;

        debug!(count = rows.len(), "Listed pending sales");

        rows.into_iter()
            .map(|row| QueuedSale::try_from(row).map_err(DbError::from))
            .collect()
    }

    /// Counts queued sales.
    pub async fn count_pending(&self) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM queued_sales")
            .fetch_one(&self.pool)
            .await?;

        Ok(count)
    }

    /// Removes a drained sale (and its sync receipt).
    ///
    /// Idempotent: removing an absent id is a no-op.
    ///
    /// ## Returns
    /// `true` if a row was deleted, `false` if it was already gone.
    pub async fn remove(&self, id: &str) -> DbResult<bool> {
        // sync_receipts rows go with it (ON DELETE CASCADE)
        let result = sqlx::query("DELETE FROM queued_sales WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        let removed = result.rows_affected() > 0;
        debug!(id = %id, removed, "Queue entry removed");
        Ok(removed)
    }

    // =========================================================================
    // Quarantine
    // =========================================================================

    /// Moves a permanently rejected sale out of the queue.
    ///
    /// Copy and delete happen in one transaction; the sale is never in
    /// both tables and never in neither.
    ///
    /// ## Returns
    /// `false` if the id was not queued (already drained or quarantined).
    pub async fn quarantine(&self, id: &str, reason: &str) -> DbResult<bool> {
        let mut tx = self.pool.begin().await?;

        let copied = sqlx::query(&format!(
            r#"
            INSERT INTO quarantined_sales ({SALE_COLUMNS}, reason, quarantined_at)
            SELECT {SALE_COLUMNS}, ?2, ?3 FROM queued_sales WHERE id = ?1
            "#
        ))
        .bind(id)
        .bind(reason)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await?;

        if copied.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        sqlx::query("DELETE FROM queued_sales WHERE id = ?1")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        warn!(id = %id, reason = %reason, "Sale quarantined");
        Ok(true)
    }

    /// Lists quarantined sales, most recent first.
    pub async fn list_quarantined(&self) -> DbResult<Vec<QuarantinedSale>> {
        let rows: Vec<QuarantinedSaleRow> = sqlx::query_as(&format!(
            "SELECT {SALE_COLUMNS}, reason, quarantined_at FROM quarantined_sales \
             ORDER BY quarantined_at DESC"
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| -> DbResult<QuarantinedSale> {
                Ok(QuarantinedSale {
                    sale: QueuedSale::try_from(row.sale)?,
                    reason: row.reason,
                    quarantined_at: row.quarantined_at,
                })
            })
            .collect()
    }

    /// Counts quarantined sales.
    pub async fn count_quarantined(&self) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM quarantined_sales")
            .fetch_one(&self.pool)
            .await?;

        Ok(count)
    }

    /// Puts a quarantined sale back into the queue, unchanged.
    ///
    /// ## Errors
    /// * `DbError::NotFound` - id is not quarantined
    pub async fn requeue_quarantined(&self, id: &str) -> DbResult<QueuedSale> {
        let mut tx = self.pool.begin().await?;

        let copied = sqlx::query(&format!(
            "INSERT INTO queued_sales ({SALE_COLUMNS}) \
             SELECT {SALE_COLUMNS} FROM quarantined_sales WHERE id = ?1"
        ))
        .bind(id)
        .execute(&mut *tx)
        .await?;

        if copied.rows_affected() == 0 {
            tx.rollback().await?;
            return Err(DbError::not_found("Quarantined sale", id));
        }

        sqlx::query("DELETE FROM quarantined_sales WHERE id = ?1")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        info!(id = %id, "Quarantined sale requeued");

        self.get(id)
            .await?
            .ok_or_else(|| DbError::not_found("Queued sale", id))
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{Database, DbConfig};
    use chrono::Duration;
    use till_core::PaymentMethod;

    async fn test_db() -> Database {
        Database::new(DbConfig::in_memory()).await.unwrap()
    }

    fn sale(cents: i64) -> NewQueuedSale {
        NewQueuedSale::new(
            "cashier-1",
            PaymentMethod::Cash,
            vec![SaleLine::new("p-1", 1, Money::from_cents(cents))],
        )
    }

    #[tokio::test]
    async fn test_enqueue_assigns_id_and_tenant() {
        let db = test_db().await;
        let queued = db.queue().enqueue(sale(250), Some("tenant-1")).await.unwrap();

        assert!(!queued.id.is_empty());
        assert_eq!(queued.tenant_id.as_deref(), Some("tenant-1"));

        let stored = db.queue().get(&queued.id).await.unwrap().unwrap();
        assert_eq!(stored, queued);
    }

    #[tokio::test]
    async fn test_enqueue_without_tenant_is_untagged() {
        let db = test_db().await;
        let queued = db.queue().enqueue(sale(100), None).await.unwrap();
        assert!(!queued.is_tagged());
    }

    #[tokio::test]
    async fn test_enqueue_rejects_empty_sale() {
        let db = test_db().await;
        let empty = NewQueuedSale::new("cashier-1", PaymentMethod::Card, vec![]);

        let err = db.queue().enqueue(empty, Some("t")).await.unwrap_err();
        assert!(matches!(err, DbError::Validation(_)));
        assert_eq!(db.queue().count_pending().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_enqueue_duplicate_id() {
        let db = test_db().await;
        db.queue().enqueue(sale(1).with_id("dup"), None).await.unwrap();

        let err = db.queue().enqueue(sale(2).with_id("dup"), None).await.unwrap_err();
        assert!(matches!(err, DbError::UniqueViolation { ref value, .. } if value == "dup"));
    }

    #[tokio::test]
    async fn test_list_pending_oldest_first() {
        let db = test_db().await;
        let base = Utc::now();

        // Inserted out of chronological order
        db.queue()
            .enqueue(sale(3).with_id("c").created_at(base + Duration::seconds(2)), None)
            .await
            .unwrap();
        db.queue()
            .enqueue(sale(1).with_id("a").created_at(base), None)
            .await
            .unwrap();
        db.queue()
            .enqueue(sale(2).with_id("b").created_at(base + Duration::seconds(1)), None)
            .await
            .unwrap();

        let ids: Vec<String> = db
            .queue()
            .list_pending()
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.id)
            .collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_same_timestamp_keeps_insertion_order() {
        let db = test_db().await;
        let at = Utc::now();

        for id in ["first", "second", "third"] {
            db.queue()
                .enqueue(sale(1).with_id(id).created_at(at), None)
                .await
                .unwrap();
        }

        let ids: Vec<String> = db
            .queue()
            .list_pending()
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.id)
            .collect();
        assert_eq!(ids, vec!["first", "second", "third"]);
    }

    #[tokio::test]
    async fn test_remove_is_idempotent() {
        let db = test_db().await;
        let queued = db.queue().enqueue(sale(100), None).await.unwrap();

        assert!(db.queue().remove(&queued.id).await.unwrap());
        assert!(!db.queue().remove(&queued.id).await.unwrap());
        assert!(!db.queue().remove("never-existed").await.unwrap());
        assert_eq!(db.queue().count_pending().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_remove_drops_receipt() {
        let db = test_db().await;
        let queued = db.queue().enqueue(sale(100), Some("t")).await.unwrap();
        db.receipts().record_created(&queued.id, "remote-1", "t").await.unwrap();

        db.queue().remove(&queued.id).await.unwrap();
        assert!(db.receipts().get(&queued.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_quarantine_and_requeue() {
        let db = test_db().await;
        let queued = db.queue().enqueue(sale(700), Some("t")).await.unwrap();

        assert!(db.queue().quarantine(&queued.id, "422: price mismatch").await.unwrap());
        assert_eq!(db.queue().count_pending().await.unwrap(), 0);
        assert_eq!(db.queue().count_quarantined().await.unwrap(), 1);

        let quarantined = db.queue().list_quarantined().await.unwrap();
        assert_eq!(quarantined[0].sale, queued);
        assert_eq!(quarantined[0].reason, "422: price mismatch");

        // Second call finds nothing to move
        assert!(!db.queue().quarantine(&queued.id, "again").await.unwrap());

        let back = db.queue().requeue_quarantined(&queued.id).await.unwrap();
        assert_eq!(back, queued);
        assert_eq!(db.queue().count_quarantined().await.unwrap(), 0);

        let err = db.queue().requeue_quarantined(&queued.id).await.unwrap_err();
        assert!(matches!(err, DbError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_queue_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("till.db");

        let id = {
            let db = Database::new(DbConfig::new(&path)).await.unwrap();
            let queued = db.queue().enqueue(sale(999), Some("t")).await.unwrap();
            db.close().await;
            queued.id
        };

        let db = Database::new(DbConfig::new(&path)).await.unwrap();
        let pending = db.queue().list_pending().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, id);
        assert_eq!(pending[0].total.cents(), 999);
    }
}
