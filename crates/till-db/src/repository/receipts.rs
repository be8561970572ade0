//! # Sync Receipts
//!
//! "Submitted, awaiting confirmation" bookkeeping for queued sales.
//!
//! ## Resuming a Half-Finished Submission
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  create_sale ──► record_created ──► create_sale_lines ──► mark_lines   │
//! │      (remote)        (local)            (remote)           (local)      │
//! │                                                         ──► remove      │
//! │                                                                         │
//! │  Crash after record_created?  Next pass sees the receipt, skips        │
//! │  create_sale and reuses remote_sale_id.                                │
//! │                                                                         │
//! │  Crash after mark_lines?      Next pass only removes the queue entry.  │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Receipts live in their own table so the queued sale itself is never
//! updated, and they are deleted together with it.

use chrono::{DateTime, Utc};
use sqlx::{FromRow, SqlitePool};
use tracing::debug;

use crate::error::{DbError, DbResult};
use till_core::SyncReceipt;

#[derive(Debug, FromRow)]
struct SyncReceiptRow {
    queue_id: String,
    remote_sale_id: String,
    tenant_id: Option<String>,
    created_at: DateTime<Utc>,
    lines_created_at: Option<DateTime<Utc>>,
}

impl From<SyncReceiptRow> for SyncReceipt {
    fn from(row: SyncReceiptRow) -> Self {
        SyncReceipt {
            queue_id: row.queue_id,
            remote_sale_id: row.remote_sale_id,
            tenant_id: row.tenant_id,
            created_at: row.created_at,
            lines_created_at: row.lines_created_at,
        }
    }
}

/// Repository for sync receipts.
#[derive(Debug, Clone)]
pub struct SyncReceiptRepository {
    pool: SqlitePool,
}

impl SyncReceiptRepository {
    /// Creates a new SyncReceiptRepository.
    pub fn new(pool: SqlitePool) -> Self {
        SyncReceiptRepository { pool }
    }

    /// Gets the receipt for a queued sale.
    pub async fn get(&self, queue_id: &str) -> DbResult<Option<SyncReceipt>> {
        let row: Option<SyncReceiptRow> = sqlx::query_as(
            "SELECT queue_id, remote_sale_id, tenant_id, created_at, lines_created_at \
             FROM sync_receipts WHERE queue_id = ?1",
        )
        .bind(queue_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(SyncReceipt::from))
    }

    /// Records that the remote sale exists under `tenant_id`.
    ///
    /// The tenant is pinned: a resumed submission writes its line items
    /// under it. If a receipt is already present it is kept and returned
    /// unchanged.
    ///
    /// ## Errors
    /// * `DbError::ForeignKeyViolation` - the queue entry is gone
    pub async fn record_created(
        &self,
        queue_id: &str,
        remote_sale_id: &str,
        tenant_id: &str,
    ) -> DbResult<SyncReceipt> {
        sqlx::query(
            r#"
            INSERT INTO sync_receipts (queue_id, remote_sale_id, tenant_id, created_at)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(queue_id) DO NOTHING
            "#,
        )
        .bind(queue_id)
        .bind(remote_sale_id)
        .bind(tenant_id)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        debug!(queue_id = %queue_id, remote_sale_id = %remote_sale_id, "Receipt recorded");

        self.get(queue_id)
            .await?
            .ok_or_else(|| DbError::not_found("Sync receipt", queue_id))
    }

    /// Records that the remote line items exist.
    pub async fn mark_lines_created(&self, queue_id: &str) -> DbResult<()> {
        let result = sqlx::query(
            "UPDATE sync_receipts SET lines_created_at = ?2 \
             WHERE queue_id = ?1 AND lines_created_at IS NULL",
        )
        .bind(queue_id)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        debug!(queue_id = %queue_id, updated = result.rows_affected(), "Lines marked created");
        Ok(())
    }

    /// Counts receipts (sales mid-submission).
    pub async fn count(&self) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM sync_receipts")
            .fetch_one(&self.pool)
            .await?;

        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{Database, DbConfig};
    use till_core::{Money, NewQueuedSale, PaymentMethod, SaleLine};

    async fn db_with_sale() -> (Database, String) {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let sale = NewQueuedSale::new(
            "cashier-1",
            PaymentMethod::Cash,
            vec![SaleLine::new("p-1", 1, Money::from_cents(100))],
        );
        let queued = db.queue().enqueue(sale, None).await.unwrap();
        (db, queued.id)
    }

    #[tokio::test]
    async fn test_record_created_keeps_first_remote_id() {
        let (db, id) = db_with_sale().await;
        let receipts = db.receipts();

        let first = receipts.record_created(&id, "remote-1", "shop-a").await.unwrap();
        let second = receipts.record_created(&id, "remote-2", "shop-b").await.unwrap();

        assert_eq!(first.remote_sale_id, "remote-1");
        assert_eq!(second.remote_sale_id, "remote-1");
        // First tenant stays pinned
        assert_eq!(second.tenant_id.as_deref(), Some("shop-a"));
        assert!(second.lines_created_at.is_none());
    }

    #[tokio::test]
    async fn test_mark_lines_created() {
        let (db, id) = db_with_sale().await;
        let receipts = db.receipts();

        receipts.record_created(&id, "remote-1", "shop-a").await.unwrap();
        receipts.mark_lines_created(&id).await.unwrap();

        let receipt = receipts.get(&id).await.unwrap().unwrap();
        assert!(receipt.lines_created_at.is_some());
        assert_eq!(receipt.tenant_id.as_deref(), Some("shop-a"));
        assert_eq!(receipts.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_receipt_requires_queued_sale() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let err = db.receipts().record_created("not-queued", "r", "t").await.unwrap_err();
        assert!(matches!(err, DbError::ForeignKeyViolation { .. }));
    }
}
