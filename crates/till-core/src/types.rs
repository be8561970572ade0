//! # Domain Types
//!
//! Types shared by the queue, the product cache and the sync engine.
//!
//! ## Type Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                    │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │   QueuedSale    │   │    SaleLine     │   │  CachedProduct  │       │
//! │  │  ─────────────  │   │  ─────────────  │   │  ─────────────  │       │
//! │  │  id (local)     │◄──│  product_id     │   │  id (remote)    │       │
//! │  │  lines          │   │  quantity       │   │  name, code     │       │
//! │  │  total          │   │  unit_price     │   │  price, stock   │       │
//! │  │  tenant_id?     │   │  subtotal       │   │  last_synced_at │       │
//! │  └─────────────────┘   └─────────────────┘   └─────────────────┘       │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐                             │
//! │  │   SyncReceipt   │   │ QuarantinedSale │                             │
//! │  │  queue_id       │   │  sale + reason  │                             │
//! │  │  remote_sale_id │   │  (poison queue) │                             │
//! │  └─────────────────┘   └─────────────────┘                             │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Immutability
//! A `QueuedSale` is written once and deleted once. Progress made against
//! the remote store is tracked in a separate `SyncReceipt`, never by editing
//! the queued row.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use ts_rs::TS;
use uuid::Uuid;

use crate::money::Money;

// =============================================================================
// Payment Method
// =============================================================================

/// How a queued sale was paid.
///
/// Stored and sent as a lowercase tag. Tags this build does not know about
/// are kept verbatim in `Other` so a newer backend value never blocks a sale.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub enum PaymentMethod {
    Cash,
    Card,
    Transfer,
    Mixed,
    Other(String),
}

impl PaymentMethod {
    /// Returns the wire/storage tag.
    pub fn as_str(&self) -> &str {
        match self {
            PaymentMethod::Cash => "cash",
            PaymentMethod::Card => "card",
            PaymentMethod::Transfer => "transfer",
            PaymentMethod::Mixed => "mixed",
            PaymentMethod::Other(tag) => tag,
        }
    }
}

impl fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentMethod {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim().to_lowercase().as_str() {
            "cash" => PaymentMethod::Cash,
            "card" => PaymentMethod::Card,
            "transfer" => PaymentMethod::Transfer,
            "mixed" => PaymentMethod::Mixed,
            _ => PaymentMethod::Other(s.trim().to_string()),
        })
    }
}

impl From<String> for PaymentMethod {
    fn from(s: String) -> Self {
        match s.parse() {
            Ok(method) => method,
            Err(never) => match never {},
        }
    }
}

impl From<PaymentMethod> for String {
    fn from(method: PaymentMethod) -> Self {
        method.as_str().to_string()
    }
}

// =============================================================================
// Sale Line
// =============================================================================

/// One line of a queued sale.
///
/// `subtotal` is always `unit_price × quantity`; use [`SaleLine::new`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct SaleLine {
    /// Remote product id (the cached product's id).
    pub product_id: String,
    pub quantity: i64,
    pub unit_price: Money,
    pub subtotal: Money,
}

impl SaleLine {
    /// Creates a line and computes its subtotal.
    pub fn new(product_id: impl Into<String>, quantity: i64, unit_price: Money) -> Self {
        SaleLine {
            product_id: product_id.into(),
            quantity,
            unit_price,
            subtotal: unit_price.multiply_quantity(quantity),
        }
    }
}

// =============================================================================
// Queued Sale
// =============================================================================

/// A sale recorded while the remote store was unreachable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct QueuedSale {
    /// Locally generated id; also the idempotency key sent upstream.
    pub id: String,
    pub lines: Vec<SaleLine>,
    pub total: Money,
    #[ts(type = "string")]
    pub payment_method: PaymentMethod,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
    pub customer_id: Option<String>,
    /// Tenant fixed at enqueue time. `None` when no tenant could be
    /// resolved then; such a sale waits until one can.
    pub tenant_id: Option<String>,
    pub user_id: String,
}

impl QueuedSale {
    /// Returns true if the sale was tagged with a tenant at enqueue time.
    #[inline]
    pub fn is_tagged(&self) -> bool {
        self.tenant_id.is_some()
    }

    /// Sum of line subtotals (may differ from `total` when discounts apply).
    pub fn lines_total(&self) -> Money {
        self.lines.iter().map(|l| l.subtotal).sum()
    }
}

/// Input to the queue: a completed sale that could not reach the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct NewQueuedSale {
    /// Caller-supplied id; generated when absent.
    pub id: Option<String>,
    pub lines: Vec<SaleLine>,
    pub total: Money,
    #[ts(type = "string")]
    pub payment_method: PaymentMethod,
    pub customer_id: Option<String>,
    pub user_id: String,
    /// Defaults to the moment of enqueue.
    #[ts(as = "Option<String>")]
    pub created_at: Option<DateTime<Utc>>,
}

impl NewQueuedSale {
    /// Creates a sale whose total is the sum of its line subtotals.
    pub fn new(user_id: impl Into<String>, payment_method: PaymentMethod, lines: Vec<SaleLine>) -> Self {
        let total = lines.iter().map(|l| l.subtotal).sum();
        NewQueuedSale {
            id: None,
            lines,
            total,
            payment_method,
            customer_id: None,
            user_id: user_id.into(),
            created_at: None,
        }
    }

    /// Overrides the computed total (discounts, rounding, tips).
    pub fn with_total(mut self, total: Money) -> Self {
        self.total = total;
        self
    }

    pub fn with_customer(mut self, customer_id: impl Into<String>) -> Self {
        self.customer_id = Some(customer_id.into());
        self
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn created_at(mut self, at: DateTime<Utc>) -> Self {
        self.created_at = Some(at);
        self
    }
}

// =============================================================================
// Queue Identifiers
// =============================================================================

static QUEUE_ID_SEQ: AtomicU64 = AtomicU64::new(0);

/// Generates a local queue id: `{unix_millis}-{process_seq}-{random8}`.
///
/// The sequence makes ids unique within one process even inside the same
/// millisecond; the random suffix keeps two terminals from colliding.
pub fn generate_queue_id(now: DateTime<Utc>) -> String {
    let seq = QUEUE_ID_SEQ.fetch_add(1, Ordering::Relaxed);
    let random = Uuid::new_v4().simple().to_string();
    format!("{}-{:06}-{}", now.timestamp_millis(), seq, &random[..8])
}

// =============================================================================
// Product Cache
// =============================================================================

/// A product as delivered by the remote catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct CatalogItem {
    pub id: String,
    pub name: String,
    pub price: Money,
    /// Barcode or short code typed at the till.
    pub code: Option<String>,
    pub stock: i64,
    pub category: Option<String>,
}

/// Local read replica of one remote product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct CachedProduct {
    pub id: String,
    pub name: String,
    pub price: Money,
    pub code: Option<String>,
    pub stock: i64,
    pub category: Option<String>,
    #[ts(as = "String")]
    pub last_synced_at: DateTime<Utc>,
}

impl CachedProduct {
    /// Returns true if `query` equals this product's code, ignoring case.
    pub fn code_matches(&self, query: &str) -> bool {
        self.code
            .as_deref()
            .map(|c| c.eq_ignore_ascii_case(query.trim()))
            .unwrap_or(false)
    }
}

/// Result of an offline catalog search.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct CatalogSearch {
    /// Exact code match; callers treat it as a scanned item.
    pub scanned: Option<CachedProduct>,
    /// All matches, the scanned item first when present.
    pub results: Vec<CachedProduct>,
}

// =============================================================================
// Sync Bookkeeping
// =============================================================================

/// Progress of a queued sale against the remote store.
///
/// Exists between "remote sale created" and "local queue entry removed" so a
/// retried submission resumes instead of creating the sale twice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncReceipt {
    pub queue_id: String,
    pub remote_sale_id: String,
    /// Tenant the remote sale was created under.
    pub tenant_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub lines_created_at: Option<DateTime<Utc>>,
}

/// A queued sale the remote store permanently rejected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct QuarantinedSale {
    pub sale: QueuedSale,
    pub reason: String,
    #[ts(as = "String")]
    pub quarantined_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_sale_line_computes_subtotal() {
        let line = SaleLine::new("p-1", 4, Money::from_cents(125));
        assert_eq!(line.subtotal.cents(), 500);
    }

    #[test]
    fn test_new_sale_total_defaults_to_lines() {
        let sale = NewQueuedSale::new(
            "cashier-1",
            PaymentMethod::Cash,
            vec![
                SaleLine::new("p-1", 2, Money::from_cents(100)),
                SaleLine::new("p-2", 1, Money::from_cents(350)),
            ],
        );
        assert_eq!(sale.total.cents(), 550);
        assert!(sale.id.is_none());

        let discounted = sale.with_total(Money::from_cents(500));
        assert_eq!(discounted.total.cents(), 500);
    }

    #[test]
    fn test_payment_method_tags() {
        assert_eq!("cash".parse::<PaymentMethod>().unwrap(), PaymentMethod::Cash);
        assert_eq!("CARD".parse::<PaymentMethod>().unwrap(), PaymentMethod::Card);
        assert_eq!(
            "voucher".parse::<PaymentMethod>().unwrap(),
            PaymentMethod::Other("voucher".to_string())
        );

        let json = serde_json::to_string(&PaymentMethod::Transfer).unwrap();
        assert_eq!(json, "\"transfer\"");
        let back: PaymentMethod = serde_json::from_str("\"mixed\"").unwrap();
        assert_eq!(back, PaymentMethod::Mixed);
    }

    #[test]
    fn test_queue_ids_unique_within_same_millisecond() {
        let now = Utc::now();
        let ids: HashSet<String> = (0..1000).map(|_| generate_queue_id(now)).collect();
        assert_eq!(ids.len(), 1000);
        assert!(ids
            .iter()
            .all(|id| id.starts_with(&now.timestamp_millis().to_string())));
    }

    #[test]
    fn test_code_matches_ignores_case() {
        let product = CachedProduct {
            id: "p-1".into(),
            name: "Agua 500ml".into(),
            price: Money::from_cents(90),
            code: Some("AGUA500".into()),
            stock: 10,
            category: None,
            last_synced_at: Utc::now(),
        };
        assert!(product.code_matches("agua500"));
        assert!(product.code_matches(" AGUA500 "));
        assert!(!product.code_matches("agua"));
    }
}
