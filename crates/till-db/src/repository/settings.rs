//! # Settings Repository
//!
//! Key/value store for engine state that must survive a restart.
//!
//! Values are overwritten, never deleted. The sync engine relies on two
//! well-known keys:
//!
//! | Key              | Written by                 | Read by          |
//! |------------------|----------------------------|------------------|
//! | `last_tenant_id` | tenant resolver (session)  | tenant resolver  |
//! | `last_sync_at`   | sync engine, after a pass  | status reporting |

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tracing::{debug, warn};

use crate::error::DbResult;

/// Well-known setting keys.
pub mod keys {
    /// Tenant id seen on the last authenticated session.
    pub const LAST_TENANT_ID: &str = "last_tenant_id";
    /// RFC 3339 timestamp of the last completed sync pass.
    pub const LAST_SYNC_AT: &str = "last_sync_at";
}

/// Repository for settings.
#[derive(Debug, Clone)]
pub struct SettingsRepository {
    pool: SqlitePool,
}

impl SettingsRepository {
    /// Creates a new SettingsRepository.
    pub fn new(pool: SqlitePool) -> Self {
        SettingsRepository { pool }
    }

    /// Gets a setting value.
    pub async fn get(&self, key: &str) -> DbResult<Option<String>> {
        let value: Option<String> = sqlx::query_scalar("SELECT value FROM settings WHERE key = ?1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;

        Ok(value)
    }

    /// Creates or overwrites a setting.
    pub async fn set(&self, key: &str, value: &str) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO settings (key, value, updated_at) VALUES (?1, ?2, ?3)
            ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        debug!(key = %key, "Setting stored");
        Ok(())
    }

    /// Reads `last_sync_at`. An unparseable value reads as `None`.
    pub async fn last_sync_at(&self) -> DbResult<Option<DateTime<Utc>>> {
        let Some(raw) = self.get(keys::LAST_SYNC_AT).await? else {
            return Ok(None);
        };

        match DateTime::parse_from_rfc3339(&raw) {
            Ok(at) => Ok(Some(at.with_timezone(&Utc))),
            Err(e) => {
                warn!(value = %raw, error = %e, "Ignoring malformed last_sync_at");
                Ok(None)
            }
        }
    }

    /// Writes `last_sync_at`.
    pub async fn set_last_sync_at(&self, at: DateTime<Utc>) -> DbResult<()> {
        self.set(keys::LAST_SYNC_AT, &at.to_rfc3339()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{Database, DbConfig};

    #[tokio::test]
    async fn test_set_overwrites() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let settings = db.settings();

        assert_eq!(settings.get(keys::LAST_TENANT_ID).await.unwrap(), None);

        settings.set(keys::LAST_TENANT_ID, "tenant-a").await.unwrap();
        settings.set(keys::LAST_TENANT_ID, "tenant-b").await.unwrap();

        assert_eq!(
            settings.get(keys::LAST_TENANT_ID).await.unwrap().as_deref(),
            Some("tenant-b")
        );
    }

    #[tokio::test]
    async fn test_last_sync_at_round_trip() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let settings = db.settings();
        let now = Utc::now();

        settings.set_last_sync_at(now).await.unwrap();
        assert_eq!(settings.last_sync_at().await.unwrap(), Some(now));

        settings.set(keys::LAST_SYNC_AT, "yesterday").await.unwrap();
        assert_eq!(settings.last_sync_at().await.unwrap(), None);
    }
}
