//! # Database Error Types
//!
//! Error types for local store operations.
//!
//! ## Error Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Error Propagation                                    │
//! │                                                                         │
//! │  SQLite Error (sqlx::Error)       ValidationError (till-core)          │
//! │       │                                  │                              │
//! │       ▼                                  ▼                              │
//! │  DbError (this module) ← Adds context and categorization               │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  SyncError (till-sync)                                                 │
//! │       ├── StorageUnavailable → fatal, escapes the sync pass            │
//! │       └── anything else      → recorded against one sale               │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;
use till_core::{CoreError, ValidationError};

/// Local store errors.
#[derive(Debug, Error)]
pub enum DbError {
    /// The store could not be opened or has been closed.
    ///
    /// ## When This Occurs
    /// - Database file can't be created (permissions, missing directory)
    /// - Disk full or file locked by another process
    /// - Schema migration failed while opening
    /// - Pool closed during shutdown
    ///
    /// Offline capability is gone until this is resolved.
    #[error("Local storage unavailable: {0}")]
    StorageUnavailable(String),

    /// Entity not found.
    ///
    /// ## When This Occurs
    /// - Stock update for a product missing from the cache
    /// - Requeue of an id that is not quarantined
    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    /// Unique constraint violation.
    ///
    /// ## When This Occurs
    /// - Enqueue with a caller-supplied id that is already queued
    #[error("Duplicate {field}: '{value}' already exists")]
    UniqueViolation { field: String, value: String },

    /// Foreign key constraint violation.
    ///
    /// ## When This Occurs
    /// - Sync receipt written for a queue entry that was already removed
    #[error("Foreign key violation: {message}")]
    ForeignKeyViolation { message: String },

    /// Sale rejected before it reached the queue.
    #[error("Invalid sale: {0}")]
    Validation(#[from] ValidationError),

    /// A stored row could not be decoded back into a domain type.
    #[error("Corrupt row: {0}")]
    Corrupt(#[from] CoreError),

    /// JSON encoding of line items failed.
    #[error("Serialization failed: {0}")]
    Serialization(String),

    /// Migration failed.
    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    /// Query execution failed.
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// Pool exhausted (all connections in use).
    #[error("Connection pool exhausted")]
    PoolExhausted,

    /// Internal database error.
    #[error("Internal database error: {0}")]
    Internal(String),
}

impl DbError {
    /// Creates a NotFound error for a given entity type and ID.
    pub fn not_found(entity: impl Into<String>, id: impl Into<String>) -> Self {
        DbError::NotFound {
            entity: entity.into(),
            id: id.into(),
        }
    }

    /// Creates a UniqueViolation error.
    pub fn duplicate(field: impl Into<String>, value: impl Into<String>) -> Self {
        DbError::UniqueViolation {
            field: field.into(),
            value: value.into(),
        }
    }

    /// Returns true if the store itself is gone, as opposed to one
    /// operation failing.
    pub fn is_storage_unavailable(&self) -> bool {
        matches!(self, DbError::StorageUnavailable(_))
    }
}

/// Convert sqlx errors to DbError.
///
/// ## Error Mapping
/// ```text
/// sqlx::Error::RowNotFound    → DbError::NotFound
/// sqlx::Error::Database       → Analyze message for constraint type
/// sqlx::Error::PoolTimedOut   → DbError::PoolExhausted
/// sqlx::Error::PoolClosed     → DbError::StorageUnavailable
/// sqlx::Error::Io             → DbError::StorageUnavailable
/// Other                       → DbError::Internal
/// ```
impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => DbError::not_found("Record", "unknown"),

            sqlx::Error::Database(db_err) => {
                let msg = db_err.message();

                // "UNIQUE constraint failed: <table>.<column>"
                if msg.contains("UNIQUE constraint failed") {
                    let field = msg
                        .split("UNIQUE constraint failed: ")
                        .nth(1)
                        .unwrap_or("unknown")
                        .to_string();
                    DbError::UniqueViolation {
                        field,
                        value: "unknown".to_string(),
                    }
                } else if msg.contains("FOREIGN KEY constraint failed") {
                    DbError::ForeignKeyViolation {
                        message: msg.to_string(),
                    }
                } else {
                    DbError::QueryFailed(msg.to_string())
                }
            }

            sqlx::Error::PoolTimedOut => DbError::PoolExhausted,

            sqlx::Error::PoolClosed => DbError::StorageUnavailable("pool is closed".to_string()),

            sqlx::Error::Io(io) => DbError::StorageUnavailable(io.to_string()),

            _ => DbError::Internal(err.to_string()),
        }
    }
}

impl From<sqlx::migrate::MigrateError> for DbError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        DbError::MigrationFailed(err.to_string())
    }
}

impl From<serde_json::Error> for DbError {
    fn from(err: serde_json::Error) -> Self {
        DbError::Serialization(err.to_string())
    }
}

/// Result type for database operations.
pub type DbResult<T> = Result<T, DbError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_closed_is_storage_unavailable() {
        let err: DbError = sqlx::Error::PoolClosed.into();
        assert!(err.is_storage_unavailable());
    }

    #[test]
    fn test_validation_converts() {
        let err: DbError = ValidationError::Required {
            field: "lines".to_string(),
        }
        .into();
        assert_eq!(err.to_string(), "Invalid sale: lines is required");
        assert!(!err.is_storage_unavailable());
    }
}
