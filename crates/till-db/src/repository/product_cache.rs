//! # Product Cache Repository
//!
//! Local read replica of the remote catalog, searchable while offline.
//!
//! ## Search
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    How Offline Search Works                             │
//! │                                                                         │
//! │  Cashier types or scans: "7501055300"                                  │
//! │       │                                                                 │
//! │       ├──► code = query (case-insensitive, exact)   → scanned item     │
//! │       │                                                                 │
//! │       └──► name LIKE %query% (case-insensitive)     → other matches    │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  CatalogSearch {                                                        │
//! │      scanned: Some(Agua 500ml),                                         │
//! │      results: [Agua 500ml, ...name matches...],  ← scanned item first  │
//! │  }                                                                      │
//! │                                                                         │
//! │  A scanner hit lets the till add the item without showing a list.      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Stock
//! Refresh overwrites stock with the backend's number. Between refreshes,
//! offline sales decrement it locally so two offline sales cannot both
//! sell the last unit.

use chrono::{DateTime, Utc};
use sqlx::{FromRow, SqlitePool};
use tracing::debug;

use crate::error::{DbError, DbResult};
use till_core::{CachedProduct, CatalogItem, CatalogSearch, Money};

/// Maximum products returned by one search.
pub const SEARCH_LIMIT: i64 = 100;

const PRODUCT_COLUMNS: &str = "id, name, price_cents, code, stock, category, last_synced_at";

#[derive(Debug, FromRow)]
struct CachedProductRow {
    id: String,
    name: String,
    price_cents: i64,
    code: Option<String>,
    stock: i64,
    category: Option<String>,
    last_synced_at: DateTime<Utc>,
}

impl From<CachedProductRow> for CachedProduct {
    fn from(row: CachedProductRow) -> Self {
        CachedProduct {
            id: row.id,
            name: row.name,
            price: Money::from_cents(row.price_cents),
            code: row.code,
            stock: row.stock,
            category: row.category,
            last_synced_at: row.last_synced_at,
        }
    }
}

/// Search key for a name or code. SQLite's NOCASE only folds ASCII, so
/// folding happens here and the folded text is stored next to the original.
fn fold(text: &str) -> String {
    text.trim().to_lowercase()
}

/// Escapes LIKE wildcards so `50%` matches literally.
fn like_pattern(query: &str) -> String {
    let escaped = query
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{escaped}%")
}

/// Repository for the cached catalog.
#[derive(Debug, Clone)]
pub struct ProductCacheRepository {
    pool: SqlitePool,
}

impl ProductCacheRepository {
    /// Creates a new ProductCacheRepository.
    pub fn new(pool: SqlitePool) -> Self {
        ProductCacheRepository { pool }
    }

    /// Upserts a freshly fetched catalog in one transaction.
    ///
    /// Every listed product gets its name, price, code, stock and category
    /// overwritten and `last_synced_at` set to now. Products missing from
    /// `items` are left alone.
    ///
    /// ## Returns
    /// Number of products written.
    pub async fn replace_all(&self, items: &[CatalogItem]) -> DbResult<usize> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        for item in items {
            sqlx::query(
                r#"
                INSERT INTO cached_products (
                    id, name, price_cents, code, stock, category, last_synced_at,
                    name_folded, code_folded
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                ON CONFLICT(id) DO UPDATE SET
                    name = excluded.name,
                    price_cents = excluded.price_cents,
                    code = excluded.code,
                    stock = excluded.stock,
                    category = excluded.category,
                    last_synced_at = excluded.last_synced_at,
                    name_folded = excluded.name_folded,
                    code_folded = excluded.code_folded
                "#,
            )
            .bind(&item.id)
            .bind(&item.name)
            .bind(item.price.cents())
            .bind(&item.code)
            .bind(item.stock)
            .bind(&item.category)
            .bind(now)
            .bind(fold(&item.name))
            .bind(item.code.as_deref().map(fold))
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        debug!(count = items.len(), "Product cache refreshed");
        Ok(items.len())
    }

    /// Searches the cache by name substring or exact code, ignoring case
    /// (accented letters included).
    ///
    /// Empty query lists products by name.
    pub async fn search(&self, query: &str) -> DbResult<CatalogSearch> {
        let query = query.trim();

        debug!(query = %query, "Searching product cache");

        if query.is_empty() {
            let rows: Vec<CachedProductRow> = sqlx::query_as(&format!(
                "SELECT {PRODUCT_COLUMNS} FROM cached_products \
                 ORDER BY name_folded, name LIMIT ?1"
            ))
            .bind(SEARCH_LIMIT)
            .fetch_all(&self.pool)
            .await?;

            return Ok(CatalogSearch {
                scanned: None,
                results: rows.into_iter().map(CachedProduct::from).collect(),
            });
        }

        let scanned = self.get_by_code(query).await?;
        let folded = fold(query);

        let rows: Vec<CachedProductRow> = sqlx::query_as(&format!(
            r#"
            SELECT {PRODUCT_COLUMNS} FROM cached_products
            WHERE name_folded LIKE ?1 ESCAPE '\'
               OR code_folded = ?2
            ORDER BY name_folded, name
            LIMIT ?3
            "#
        ))
        .bind(like_pattern(&folded))
        .bind(&folded)
        .bind(SEARCH_LIMIT)
        .fetch_all(&self.pool)
        .await?;

        let mut results = Vec::with_capacity(rows.len() + 1);
        if let Some(hit) = &scanned {
            results.push(hit.clone());
        }
        results.extend(
            rows.into_iter()
                .map(CachedProduct::from)
                .filter(|p| scanned.as_ref().map_or(true, |hit| hit.id != p.id)),
        );

        debug!(
            count = results.len(),
            scanned = scanned.is_some(),
            "Search returned products"
        );

        Ok(CatalogSearch { scanned, results })
    }

    /// Gets a cached product by id.
    pub async fn get_by_id(&self, id: &str) -> DbResult<Option<CachedProduct>> {
        let row: Option<CachedProductRow> = sqlx::query_as(&format!(
            "SELECT {PRODUCT_COLUMNS} FROM cached_products WHERE id = ?1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(CachedProduct::from))
    }

    /// Gets a cached product by exact code, ignoring case.
    pub async fn get_by_code(&self, code: &str) -> DbResult<Option<CachedProduct>> {
        let row: Option<CachedProductRow> = sqlx::query_as(&format!(
            "SELECT {PRODUCT_COLUMNS} FROM cached_products \
             WHERE code_folded = ?1 ORDER BY id LIMIT 1"
        ))
        .bind(fold(code))
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(CachedProduct::from))
    }

    /// Overwrites the cached stock of one product. Nothing else changes.
    ///
    /// ## Errors
    /// * `DbError::NotFound` - id not in the cache
    pub async fn update_stock_locally(&self, id: &str, new_stock: i64) -> DbResult<()> {
        let result = sqlx::query("UPDATE cached_products SET stock = ?2 WHERE id = ?1")
            .bind(id)
            .bind(new_stock)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Cached product", id));
        }

        debug!(id = %id, stock = new_stock, "Cached stock overwritten");
        Ok(())
    }

    /// Subtracts sold units from cached stock, floored at zero.
    ///
    /// ## Returns
    /// The new stock level.
    ///
    /// ## Errors
    /// * `DbError::NotFound` - id not in the cache
    pub async fn decrement_stock_locally(&self, id: &str, quantity: i64) -> DbResult<i64> {
        let stock: Option<i64> = sqlx::query_scalar(
            "UPDATE cached_products SET stock = MAX(stock - ?2, 0) WHERE id = ?1 RETURNING stock",
        )
        .bind(id)
        .bind(quantity)
        .fetch_optional(&self.pool)
        .await?;

        stock.ok_or_else(|| DbError::not_found("Cached product", id))
    }

    /// Counts cached products.
    pub async fn count(&self) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM cached_products")
            .fetch_one(&self.pool)
            .await?;

        Ok(count)
    }

    /// Returns when any product was last refreshed, `None` if the cache
    /// has never been filled.
    pub async fn last_refreshed_at(&self) -> DbResult<Option<DateTime<Utc>>> {
        let latest: Option<DateTime<Utc>> =
            sqlx::query_scalar("SELECT MAX(last_synced_at) FROM cached_products")
                .fetch_one(&self.pool)
                .await?;

        Ok(latest)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
