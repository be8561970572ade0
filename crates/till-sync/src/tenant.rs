//! # Tenant Resolution
//!
//! Decides which tenant a sale belongs to, even when nobody is logged in.
//!
//! ## Resolution Order
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       TenantResolver::resolve()                         │
//! │                                                                         │
//! │  Session ──── tenant_id present? ──yes──► write through to             │
//! │    │                                      settings.last_tenant_id      │
//! │    no                                     and return it                │
//! │    ▼                                                                    │
//! │  CachedSetting ── last_tenant_id set? ──yes──► return it               │
//! │    │                                                                    │
//! │    no                                                                   │
//! │    ▼                                                                    │
//! │  Configured(id) ─────────────────────────────► return id               │
//! │    │                                                                    │
//! │    ▼                                                                    │
//! │  SyncError::NoTenant                                                    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The order is configurable; the default is `[Session, CachedSetting]`.
//! Every successful login refreshes the cached tenant, so an offline
//! restart still knows where its sales go.

use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, RwLock};
use till_db::{setting_keys, LocalStore};
use tracing::{debug, warn};

use crate::error::{SyncError, SyncResult};

// =============================================================================
// Session Port
// =============================================================================

/// Who is logged in right now, as far as the host knows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionIdentity {
    pub user_id: String,
    pub tenant_id: Option<String>,
    /// Bearer token for the remote store, if the session has one.
    pub access_token: Option<String>,
}

/// Source of the current login session.
///
/// Implemented by the host (auth screen, token store). Returning `None`
/// means "no session"; the resolver then falls back to other sources.
pub trait SessionProvider: Send + Sync {
    fn current(&self) -> Option<SessionIdentity>;
}

/// Session state pushed in by the host on login and logout.
#[derive(Debug, Default)]
pub struct StaticSession {
    inner: RwLock<Option<SessionIdentity>>,
}

impl StaticSession {
    /// Creates a session provider with nobody logged in.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a session provider with an identity already set.
    pub fn with_identity(identity: SessionIdentity) -> Self {
        StaticSession {
            inner: RwLock::new(Some(identity)),
        }
    }

    /// Replaces the current identity (login).
    pub fn set(&self, identity: SessionIdentity) {
        let mut guard = self.inner.write().unwrap_or_else(|e| e.into_inner());
        *guard = Some(identity);
    }

    /// Clears the current identity (logout, expiry).
    pub fn clear(&self) {
        let mut guard = self.inner.write().unwrap_or_else(|e| e.into_inner());
        *guard = None;
    }
}

impl SessionProvider for StaticSession {
    fn current(&self) -> Option<SessionIdentity> {
        self.inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

/// Claims carried by the backend's access token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionClaims {
    /// User id.
    pub sub: String,
    #[serde(default)]
    pub tenant_id: Option<String>,
    /// Expiry (unix seconds).
    pub exp: i64,
}

/// Session derived from an HS256 access token.
///
/// An expired or tampered token reads as "no session".
pub struct JwtSession {
    key: DecodingKey,
    validation: Validation,
    token: RwLock<Option<String>>,
}

impl JwtSession {
    pub fn new(secret: &str) -> Self {
        JwtSession {
            key: DecodingKey::from_secret(secret.as_bytes()),
            validation: Validation::new(Algorithm::HS256),
            token: RwLock::new(None),
        }
    }

    /// Stores a freshly issued access token.
    pub fn set_token(&self, token: impl Into<String>) {
        let mut guard = self.token.write().unwrap_or_else(|e| e.into_inner());
        *guard = Some(token.into());
    }

    pub fn clear(&self) {
        let mut guard = self.token.write().unwrap_or_else(|e| e.into_inner());
        *guard = None;
    }
}

impl std::fmt::Debug for JwtSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtSession").finish_non_exhaustive()
    }
}

impl SessionProvider for JwtSession {
    fn current(&self) -> Option<SessionIdentity> {
        let token = self
            .token
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()?;

        match decode::<SessionClaims>(&token, &self.key, &self.validation) {
            Ok(data) => Some(SessionIdentity {
                user_id: data.claims.sub,
                tenant_id: data.claims.tenant_id,
                access_token: Some(token),
            }),
            Err(e) => {
                debug!(error = %e, "Access token rejected, treating as logged out");
                None
            }
        }
    }
}

// =============================================================================
// Tenant Resolver
// =============================================================================

/// One place a tenant id can come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TenantSource {
    /// The active login session.
    Session,
    /// The last tenant any session reported (`last_tenant_id` setting).
    CachedSetting,
    /// A fixed tenant for single-tenant installs.
    Configured(String),
}

/// Resolves the tenant for new and untagged sales.
#[derive(Clone)]
pub struct TenantResolver {
    sources: Vec<TenantSource>,
    session: Arc<dyn SessionProvider>,
    store: LocalStore,
}

impl TenantResolver {
    /// Creates a resolver with the default order `[Session, CachedSetting]`.
    pub fn new(session: Arc<dyn SessionProvider>, store: LocalStore) -> Self {
        Self::with_sources(
            vec![TenantSource::Session, TenantSource::CachedSetting],
            session,
            store,
        )
    }

    pub fn with_sources(
        sources: Vec<TenantSource>,
        session: Arc<dyn SessionProvider>,
        store: LocalStore,
    ) -> Self {
        TenantResolver {
            sources,
            session,
            store,
        }
    }

    pub fn sources(&self) -> &[TenantSource] {
        &self.sources
    }

    /// Returns the current session, if any.
    pub fn session(&self) -> Option<SessionIdentity> {
        self.session.current()
    }

    /// Returns the first tenant any source yields.
    ///
    /// ## Returns
    /// * `Ok(tenant_id)` - First non-empty hit
    /// * `Err(SyncError::NoTenant)` - Every source was empty
    /// * `Err(SyncError::StorageUnavailable)` - The cached setting could not
    ///   be read
    pub async fn resolve(&self) -> SyncResult<String> {
        self.resolve_with_source().await.map(|(tenant, _)| tenant)
    }

    /// Like [`resolve`](Self::resolve), also reporting which source answered.
    pub async fn resolve_with_source(&self) -> SyncResult<(String, TenantSource)> {
        for source in &self.sources {
            let found = match source {
                TenantSource::Session => self.from_session().await?,
                TenantSource::CachedSetting => self.from_cache().await?,
                TenantSource::Configured(id) => non_empty(Some(id.clone())),
            };

            if let Some(tenant_id) = found {
                debug!(tenant_id = %tenant_id, source = ?source, "Tenant resolved");
                return Ok((tenant_id, source.clone()));
            }
        }

        Err(SyncError::NoTenant)
    }

    async fn from_session(&self) -> SyncResult<Option<String>> {
        let Some(tenant_id) = non_empty(self.session.current().and_then(|s| s.tenant_id)) else {
            return Ok(None);
        };

        // Write through so an offline restart still resolves this tenant.
        match self.store.open().await {
            Ok(db) => {
                let settings = db.settings();
                let cached = settings.get(setting_keys::LAST_TENANT_ID).await.ok().flatten();
                if cached.as_deref() != Some(tenant_id.as_str()) {
                    if let Err(e) = settings.set(setting_keys::LAST_TENANT_ID, &tenant_id).await {
                        warn!(error = %e, tenant_id = %tenant_id, "Failed to cache tenant");
                    }
                }
            }
            Err(e) => warn!(error = %e, "Local store unavailable, tenant not cached"),
        }

        Ok(Some(tenant_id))
    }

    async fn from_cache(&self) -> SyncResult<Option<String>> {
        let db = self.store.open().await?;
        let cached = db.settings().get(setting_keys::LAST_TENANT_ID).await?;
        Ok(non_empty(cached))
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};
    use till_db::DbConfig;

    fn identity(tenant: Option<&str>) -> SessionIdentity {
        SessionIdentity {
            user_id: "cashier-1".to_string(),
            tenant_id: tenant.map(str::to_string),
            access_token: None,
        }
    }

    #[tokio::test]
    async fn test_session_tenant_is_cached() {
        let store = LocalStore::new(DbConfig::in_memory());
        let session = Arc::new(StaticSession::with_identity(identity(Some("shop-1"))));
        let resolver = TenantResolver::new(session.clone(), store.clone());

        assert_eq!(resolver.resolve().await.unwrap(), "shop-1");

        let db = store.open().await.unwrap();
        let cached = db.settings().get(setting_keys::LAST_TENANT_ID).await.unwrap();
        assert_eq!(cached.as_deref(), Some("shop-1"));
    }

    #[tokio::test]
    async fn test_falls_back_to_cached_tenant() {
        let store = LocalStore::new(DbConfig::in_memory());
        let db = store.open().await.unwrap();
        db.settings()
            .set(setting_keys::LAST_TENANT_ID, "shop-cached")
            .await
            .unwrap();

        let resolver = TenantResolver::new(Arc::new(StaticSession::new()), store.clone());
        let (tenant, source) = resolver.resolve_with_source().await.unwrap();
        assert_eq!(tenant, "shop-cached");
        assert_eq!(source, TenantSource::CachedSetting);
    }

    #[tokio::test]
    async fn test_session_without_tenant_falls_through() {
        let store = LocalStore::new(DbConfig::in_memory());
        let session = Arc::new(StaticSession::with_identity(identity(None)));
        let resolver = TenantResolver::with_sources(
            vec![
                TenantSource::Session,
                TenantSource::CachedSetting,
                TenantSource::Configured("fixed".to_string()),
            ],
            session,
            store,
        );

        let (tenant, source) = resolver.resolve_with_source().await.unwrap();
        assert_eq!(tenant, "fixed");
        assert_eq!(source, TenantSource::Configured("fixed".to_string()));
    }

    #[tokio::test]
    async fn test_no_tenant_anywhere() {
        let store = LocalStore::new(DbConfig::in_memory());
        let resolver = TenantResolver::new(Arc::new(StaticSession::new()), store);

        assert!(matches!(resolver.resolve().await, Err(SyncError::NoTenant)));
    }

    #[tokio::test]
    async fn test_logout_keeps_cached_tenant() {
        let store = LocalStore::new(DbConfig::in_memory());
        let session = Arc::new(StaticSession::with_identity(identity(Some("shop-2"))));
        let resolver = TenantResolver::new(session.clone(), store);

        resolver.resolve().await.unwrap();
        session.clear();

        assert_eq!(resolver.resolve().await.unwrap(), "shop-2");
    }

    #[test]
    fn test_jwt_session_decodes_claims() {
        let secret = "test-secret";
        let claims = SessionClaims {
            sub: "user-42".to_string(),
            tenant_id: Some("shop-9".to_string()),
            exp: chrono::Utc::now().timestamp() + 3600,
        };
        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap();

        let session = JwtSession::new(secret);
        assert!(session.current().is_none());

        session.set_token(token.clone());
        let current = session.current().unwrap();
        assert_eq!(current.user_id, "user-42");
        assert_eq!(current.tenant_id.as_deref(), Some("shop-9"));
        assert_eq!(current.access_token.as_deref(), Some(token.as_str()));
    }

    #[test]
    fn test_jwt_session_rejects_wrong_secret_and_expiry() {
        let claims = SessionClaims {
            sub: "user-42".to_string(),
            tenant_id: Some("shop-9".to_string()),
            exp: chrono::Utc::now().timestamp() + 3600,
        };
        let forged = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(b"other-secret"),
        )
        .unwrap();

        let session = JwtSession::new("test-secret");
        session.set_token(forged);
        assert!(session.current().is_none());

        let expired = SessionClaims {
            exp: chrono::Utc::now().timestamp() - 3600,
            ..claims
        };
        let token = encode(
            &Header::default(),
            &expired,
            &EncodingKey::from_secret(b"test-secret"),
        )
        .unwrap();
        session.set_token(token);
        assert!(session.current().is_none());
    }
}
