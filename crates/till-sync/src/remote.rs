//! # Remote Store
//!
//! The port the engine talks to, and its REST implementation.
//!
//! ## Sale Submission
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     One Queued Sale Upstream                            │
//! │                                                                         │
//! │  QueuedSale ──► RemoteSale { idempotency_key = queue id, ... }         │
//! │                      │                                                  │
//! │                      ▼                                                  │
//! │             POST {base}/sales          → remote sale id                │
//! │                      │                                                  │
//! │                      ▼                                                  │
//! │             POST {base}/sale_items     (one row per line)              │
//! │                                                                         │
//! │  Retrying with the same idempotency key never creates a second sale:  │
//! │  a 409 on create is answered by looking the existing sale up.          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Failure Classes
//! | Response                          | Error                   |
//! |-----------------------------------|-------------------------|
//! | transport error, timeout          | `RemoteError::Network`  |
//! | 401, 403, 408, 429, 5xx           | `RemoteError::Network`  |
//! | any other 4xx                     | `RemoteError::Rejected` |

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;
use till_core::{CatalogItem, Money, QueuedSale};
use tracing::{debug, warn};
use url::Url;

use crate::config::RemoteSettings;
use crate::error::{SyncError, SyncResult};
use crate::tenant::SessionProvider;

// =============================================================================
// Port
// =============================================================================

/// Failure talking to the remote store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoteError {
    /// Transient; the sale stays queued.
    #[error("network: {0}")]
    Network(String),

    /// Permanent; the sale is quarantined.
    #[error("rejected ({status}): {message}")]
    Rejected { status: u16, message: String },
}

/// Sale header as sent upstream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteSale {
    /// The local queue id; the backend dedupes on it.
    pub idempotency_key: String,
    pub tenant_id: String,
    pub user_id: String,
    pub customer_id: Option<String>,
    pub total_cents: i64,
    pub payment_method: String,
    pub created_at: DateTime<Utc>,
}

impl RemoteSale {
    pub fn from_queued(sale: &QueuedSale, tenant_id: &str) -> Self {
        RemoteSale {
            idempotency_key: sale.id.clone(),
            tenant_id: tenant_id.to_string(),
            user_id: sale.user_id.clone(),
            customer_id: sale.customer_id.clone(),
            total_cents: sale.total.cents(),
            payment_method: sale.payment_method.as_str().to_string(),
            created_at: sale.created_at,
        }
    }
}

/// Sale line as sent upstream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteSaleLine {
    pub sale_id: String,
    pub tenant_id: String,
    pub product_id: String,
    pub quantity: i64,
    pub unit_price_cents: i64,
    pub subtotal_cents: i64,
}

impl RemoteSaleLine {
    /// Builds the line rows for a sale already created remotely.
    pub fn for_sale(sale: &QueuedSale, remote_sale_id: &str, tenant_id: &str) -> Vec<Self> {
        sale.lines
            .iter()
            .map(|line| RemoteSaleLine {
                sale_id: remote_sale_id.to_string(),
                tenant_id: tenant_id.to_string(),
                product_id: line.product_id.clone(),
                quantity: line.quantity,
                unit_price_cents: line.unit_price.cents(),
                subtotal_cents: line.subtotal.cents(),
            })
            .collect()
    }
}

/// Backend the engine drains the queue into.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Creates the sale header and returns the remote sale id.
    ///
    /// Must be idempotent on `sale.idempotency_key`.
    async fn create_sale(&self, sale: &RemoteSale) -> Result<String, RemoteError>;

    /// Creates the sale's line rows.
    async fn create_sale_lines(&self, lines: &[RemoteSaleLine]) -> Result<(), RemoteError>;

    /// Fetches the tenant's full product catalog.
    async fn fetch_catalog(&self, tenant_id: &str) -> Result<Vec<CatalogItem>, RemoteError>;
}

// =============================================================================
// REST Implementation
// =============================================================================

/// Product row as returned by `GET /products`.
#[derive(Debug, Deserialize)]
struct RemoteProduct {
    #[serde(deserialize_with = "id_as_string")]
    id: String,
    name: String,
    price_cents: i64,
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    stock: Option<i64>,
    #[serde(default)]
    category: Option<String>,
}

impl From<RemoteProduct> for CatalogItem {
    fn from(p: RemoteProduct) -> Self {
        CatalogItem {
            id: p.id,
            name: p.name,
            price: Money::from_cents(p.price_cents),
            code: p.code.filter(|c| !c.trim().is_empty()),
            stock: p.stock.unwrap_or(0),
            category: p.category,
        }
    }
}

fn id_as_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    value_to_id(&value).ok_or_else(|| serde::de::Error::custom("id must be a string or number"))
}

fn value_to_id(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Pulls the `id` out of a PostgREST representation (object or array).
fn extract_id(body: &Value) -> Option<String> {
    match body {
        Value::Array(rows) => rows.first().and_then(extract_id),
        Value::Object(map) => map.get("id").and_then(value_to_id),
        _ => None,
    }
}

/// Joins a relative endpoint onto a base URL, keeping the base path.
pub(crate) fn join_endpoint(base: &Url, path: &str) -> SyncResult<Url> {
    let mut base = base.clone();
    if !base.path().ends_with('/') {
        let with_slash = format!("{}/", base.path());
        base.set_path(&with_slash);
    }
    Ok(base.join(path.trim_start_matches('/'))?)
}

/// Maps a non-success status to the engine's failure classes.
pub(crate) fn classify_status(status: StatusCode, body: String) -> RemoteError {
    let transient = status.is_server_error()
        || status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::UNAUTHORIZED
        || status == StatusCode::FORBIDDEN;

    if transient {
        RemoteError::Network(format!("HTTP {}: {}", status.as_u16(), body))
    } else {
        RemoteError::Rejected {
            status: status.as_u16(),
            message: body,
        }
    }
}

fn transport_error(err: reqwest::Error) -> RemoteError {
    RemoteError::Network(err.to_string())
}

/// JSON client for a PostgREST-style backend.
#[derive(Clone)]
pub struct RestRemoteStore {
    client: reqwest::Client,
    base_url: Url,
    api_key: Option<String>,
    session: Arc<dyn SessionProvider>,
}

impl RestRemoteStore {
    /// Builds a client from `[remote]` settings.
    ///
    /// ## Returns
    /// * `Err(SyncError::InvalidConfig)` - No `base_url` configured
    pub fn new(settings: &RemoteSettings, session: Arc<dyn SessionProvider>) -> SyncResult<Self> {
        let base_url = settings
            .parsed_base_url()?
            .ok_or_else(|| SyncError::InvalidConfig("remote.base_url is not set".into()))?;

        let client = reqwest::Client::builder()
            .timeout(settings.request_timeout())
            .build()
            .map_err(|e| SyncError::InvalidConfig(format!("HTTP client: {e}")))?;

        Ok(RestRemoteStore {
            client,
            base_url,
            api_key: settings.api_key.clone(),
            session,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> Result<Url, RemoteError> {
        join_endpoint(&self.base_url, path).map_err(|e| RemoteError::Rejected {
            status: 0,
            message: e.to_string(),
        })
    }

    /// Adds `apikey` and bearer auth. The session token wins over the key.
    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        let mut request = request;
        if let Some(key) = &self.api_key {
            request = request.header("apikey", key);
        }

        let token = self
            .session
            .current()
            .and_then(|s| s.access_token)
            .or_else(|| self.api_key.clone());

        match token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn read_json(response: reqwest::Response) -> Result<Value, RemoteError> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, body));
        }

        let text = response.text().await.map_err(transport_error)?;
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&text).map_err(|e| RemoteError::Rejected {
            status: status.as_u16(),
            message: format!("unreadable response body: {e}"),
        })
    }

    /// Looks up a sale created by an earlier attempt with the same key.
    async fn find_sale_by_key(&self, key: &str) -> Result<Option<String>, RemoteError> {
        let mut url = self.endpoint("sales")?;
        url.query_pairs_mut()
            .append_pair("idempotency_key", &format!("eq.{key}"))
            .append_pair("select", "id");

        let response = self
            .authorize(self.client.get(url))
            .send()
            .await
            .map_err(transport_error)?;

        let body = Self::read_json(response).await?;
        Ok(extract_id(&body))
    }
}

impl std::fmt::Debug for RestRemoteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestRemoteStore")
            .field("base_url", &self.base_url.as_str())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl RemoteStore for RestRemoteStore {
    async fn create_sale(&self, sale: &RemoteSale) -> Result<String, RemoteError> {
        let url = self.endpoint("sales")?;
        debug!(idempotency_key = %sale.idempotency_key, "POST sale");

        let response = self
            .authorize(self.client.post(url))
            .header("Idempotency-Key", &sale.idempotency_key)
            .header("Prefer", "return=representation")
            .json(sale)
            .send()
            .await
            .map_err(transport_error)?;

        if response.status() == StatusCode::CONFLICT {
            warn!(
                idempotency_key = %sale.idempotency_key,
                "Sale already exists remotely, resolving existing id"
            );
            return match self.find_sale_by_key(&sale.idempotency_key).await? {
                Some(id) => Ok(id),
                None => Err(RemoteError::Rejected {
                    status: StatusCode::CONFLICT.as_u16(),
                    message: "conflict without an existing sale for this key".into(),
                }),
            };
        }

        let status = response.status();
        let body = Self::read_json(response).await?;
        extract_id(&body).ok_or_else(|| RemoteError::Rejected {
            status: status.as_u16(),
            message: "created sale has no id".into(),
        })
    }

    async fn create_sale_lines(&self, lines: &[RemoteSaleLine]) -> Result<(), RemoteError> {
        if lines.is_empty() {
            return Ok(());
        }

        let url = self.endpoint("sale_items")?;
        debug!(sale_id = %lines[0].sale_id, lines = lines.len(), "POST sale lines");

        let response = self
            .authorize(self.client.post(url))
            .header("Prefer", "return=minimal")
            .json(lines)
            .send()
            .await
            .map_err(transport_error)?;

        Self::read_json(response).await.map(|_| ())
    }

    async fn fetch_catalog(&self, tenant_id: &str) -> Result<Vec<CatalogItem>, RemoteError> {
        let mut url = self.endpoint("products")?;
        url.query_pairs_mut()
            .append_pair("tenant_id", &format!("eq.{tenant_id}"))
            .append_pair("select", "id,name,price_cents,code,stock,category");

        let response = self
            .authorize(self.client.get(url))
            .send()
            .await
            .map_err(transport_error)?;

        let body = Self::read_json(response).await?;
        let products: Vec<RemoteProduct> =
            serde_json::from_value(body).map_err(|e| RemoteError::Rejected {
                status: 200,
                message: format!("unreadable catalog: {e}"),
            })?;

        debug!(tenant_id = %tenant_id, count = products.len(), "Catalog fetched");
        Ok(products.into_iter().map(CatalogItem::from).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tenant::StaticSession;
    use serde_json::json;
    use till_core::{PaymentMethod, SaleLine};

    fn queued_sale() -> QueuedSale {
        QueuedSale {
            id: "1700000000000-000001-abcd1234".to_string(),
            lines: vec![
                SaleLine::new("p-1", 2, Money::from_cents(250)),
                SaleLine::new("p-2", 1, Money::from_cents(1000)),
            ],
            total: Money::from_cents(1500),
            payment_method: PaymentMethod::Cash,
            created_at: Utc::now(),
            customer_id: None,
            tenant_id: Some("shop-1".to_string()),
            user_id: "cashier-1".to_string(),
        }
    }

    #[test]
    fn test_classify_status() {
        let cases = [
            (StatusCode::BAD_REQUEST, false),
            (StatusCode::UNPROCESSABLE_ENTITY, false),
            (StatusCode::NOT_FOUND, false),
            (StatusCode::INTERNAL_SERVER_ERROR, true),
            (StatusCode::BAD_GATEWAY, true),
            (StatusCode::TOO_MANY_REQUESTS, true),
            (StatusCode::REQUEST_TIMEOUT, true),
            (StatusCode::UNAUTHORIZED, true),
        ];

        for (status, transient) in cases {
            let err = classify_status(status, "body".into());
            assert_eq!(
                matches!(err, RemoteError::Network(_)),
                transient,
                "status {status}"
            );
        }
    }

    #[test]
    fn test_extract_id_from_representation() {
        assert_eq!(extract_id(&json!([{ "id": "s-1" }])), Some("s-1".to_string()));
        assert_eq!(extract_id(&json!({ "id": 42 })), Some("42".to_string()));
        assert_eq!(extract_id(&json!([])), None);
        assert_eq!(extract_id(&json!({ "id": "" })), None);
        assert_eq!(extract_id(&Value::Null), None);
    }

    #[test]
    fn test_join_endpoint_keeps_base_path() {
        let base = Url::parse("https://api.example.com/rest/v1").unwrap();
        assert_eq!(
            join_endpoint(&base, "sales").unwrap().as_str(),
            "https://api.example.com/rest/v1/sales"
        );

        let base = Url::parse("https://api.example.com/rest/v1/").unwrap();
        assert_eq!(
            join_endpoint(&base, "/health").unwrap().as_str(),
            "https://api.example.com/rest/v1/health"
        );
    }

    #[test]
    fn test_remote_sale_carries_idempotency_key() {
        let sale = queued_sale();
        let remote = RemoteSale::from_queued(&sale, "shop-1");
        assert_eq!(remote.idempotency_key, sale.id);
        assert_eq!(remote.total_cents, 1500);
        assert_eq!(remote.payment_method, "cash");

        let lines = RemoteSaleLine::for_sale(&sale, "remote-9", "shop-1");
        assert_eq!(lines.len(), 2);
        assert!(lines.iter().all(|l| l.sale_id == "remote-9"));
        assert_eq!(lines[0].subtotal_cents, 500);
    }

    #[test]
    fn test_remote_product_conversion() {
        let rows: Vec<RemoteProduct> = serde_json::from_value(json!([
            { "id": 7, "name": "Espresso", "price_cents": 250, "code": "ESP", "stock": 3 },
            { "id": "p-2", "name": "Muffin", "price_cents": 300, "code": "" }
        ]))
        .unwrap();

        let items: Vec<CatalogItem> = rows.into_iter().map(CatalogItem::from).collect();
        assert_eq!(items[0].id, "7");
        assert_eq!(items[0].stock, 3);
        assert_eq!(items[1].code, None);
        assert_eq!(items[1].stock, 0);
    }

    #[test]
    fn test_rest_store_requires_base_url() {
        let session = Arc::new(StaticSession::new());
        let err = RestRemoteStore::new(&RemoteSettings::default(), session.clone()).unwrap_err();
        assert!(err.is_config_error());

        let settings = RemoteSettings {
            base_url: Some("https://api.example.com/rest/v1".to_string()),
            ..RemoteSettings::default()
        };
        let store = RestRemoteStore::new(&settings, session).unwrap();
        assert_eq!(store.base_url().path(), "/rest/v1");
    }
}
