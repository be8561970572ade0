//! # Sync Error Types
//!
//! Error types for sync operations.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Sync Error Categories                             │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │  Configuration  │  │   Transport     │  │     Remote              │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  InvalidConfig  │  │  Offline        │  │  RemoteRejection        │ │
//! │  │  MissingDeviceId│  │  NetworkFailure │  │  (quarantines the sale) │ │
//! │  │  InvalidUrl     │  │  Timeout        │  │                         │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │    Storage      │  │     Tenant      │  │      Runtime            │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  StorageUnavail.│  │  NoTenant       │  │  Cancelled              │ │
//! │  │  Database       │  │                 │  │  ShuttingDown           │ │
//! │  │  InvalidSale    │  │                 │  │  ChannelError           │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Only [`SyncError::StorageUnavailable`] aborts a sync pass. Every other
//! error is recorded against the single sale that hit it.

use thiserror::Error;
use till_db::DbError;

use crate::remote::RemoteError;

/// Result type alias for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Sync error type covering all possible sync failures.
#[derive(Debug, Error)]
pub enum SyncError {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Invalid sync configuration.
    #[error("Invalid sync configuration: {0}")]
    InvalidConfig(String),

    /// Missing device ID.
    #[error("Device ID not configured. Run initial setup first.")]
    MissingDeviceId,

    /// Invalid remote URL.
    #[error("Invalid remote URL: {0}")]
    InvalidUrl(String),

    /// Failed to load config file.
    #[error("Failed to load config: {0}")]
    ConfigLoadFailed(String),

    /// Failed to save config file.
    #[error("Failed to save config: {0}")]
    ConfigSaveFailed(String),

    // =========================================================================
    // Storage Errors
    // =========================================================================
    /// The local store cannot be opened or used.
    ///
    /// ## When This Occurs
    /// - Database file cannot be created or opened
    /// - Store closed while a pass was running
    ///
    /// Offline capability is gone. This is the only error that escapes a
    /// sync pass.
    #[error("Local storage unavailable: {0}")]
    StorageUnavailable(String),

    /// A local store operation failed.
    #[error("Database error: {0}")]
    Database(String),

    /// A record the operation needed does not exist.
    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    /// The sale failed validation and was not queued.
    #[error("Invalid sale: {0}")]
    InvalidSale(String),

    // =========================================================================
    // Tenant Errors
    // =========================================================================
    /// No tenant could be resolved from any configured source.
    ///
    /// ## When This Occurs
    /// - Nobody has logged in since install and no tenant is configured
    #[error("No tenant available: no session and no cached tenant")]
    NoTenant,

    // =========================================================================
    // Transport Errors
    // =========================================================================
    /// The device is offline.
    #[error("Device is offline")]
    Offline,

    /// The remote store could not be reached or failed transiently.
    ///
    /// ## When This Occurs
    /// - DNS, connect or TLS failure
    /// - HTTP 408, 429, 401/403 or 5xx
    #[error("Network failure: {0}")]
    NetworkFailure(String),

    /// A single submission took too long.
    #[error("Submission timed out after {0} seconds")]
    Timeout(u64),

    // =========================================================================
    // Remote Errors
    // =========================================================================
    /// The remote store refused the sale permanently.
    ///
    /// ## When This Occurs
    /// - HTTP 4xx other than 401, 403, 408 and 429 (bad payload, constraint
    ///   violation on the remote side)
    #[error("Remote rejected the request ({status}): {message}")]
    RemoteRejection { status: u16, message: String },

    // =========================================================================
    // Runtime Errors
    // =========================================================================
    /// The operation was cancelled before it finished.
    #[error("Operation cancelled")]
    Cancelled,

    /// OS background scheduler registration failed.
    #[error("Background scheduler error: {0}")]
    Scheduler(String),

    /// Background sync is shutting down.
    #[error("Background sync is shutting down")]
    ShuttingDown,

    /// Channel send/receive failed.
    #[error("Channel error: {0}")]
    ChannelError(String),

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

// =============================================================================
// Error Conversions
// =============================================================================

/// Convert local store errors.
///
/// ## Error Mapping
/// ```text
/// DbError::StorageUnavailable → SyncError::StorageUnavailable (fatal)
/// DbError::NotFound           → SyncError::NotFound
/// DbError::Validation         → SyncError::InvalidSale
/// Other                       → SyncError::Database
/// ```
impl From<DbError> for SyncError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::StorageUnavailable(msg) => SyncError::StorageUnavailable(msg),
            DbError::NotFound { entity, id } => SyncError::NotFound { entity, id },
            DbError::Validation(v) => SyncError::InvalidSale(v.to_string()),
            other => SyncError::Database(other.to_string()),
        }
    }
}

impl From<RemoteError> for SyncError {
    fn from(err: RemoteError) -> Self {
        match err {
            RemoteError::Network(msg) => SyncError::NetworkFailure(msg),
            RemoteError::Rejected { status, message } => {
                SyncError::RemoteRejection { status, message }
            }
        }
    }
}

impl From<url::ParseError> for SyncError {
    fn from(err: url::ParseError) -> Self {
        SyncError::InvalidUrl(err.to_string())
    }
}

impl From<std::io::Error> for SyncError {
    fn from(err: std::io::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::de::Error> for SyncError {
    fn from(err: toml::de::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::ser::Error> for SyncError {
    fn from(err: toml::ser::Error) -> Self {
        SyncError::ConfigSaveFailed(err.to_string())
    }
}

// =============================================================================
// Error Categorization
// =============================================================================

impl SyncError {
    /// Returns true if the sale stays queued and a later pass may succeed.
    ///
    /// ## Retryable Errors
    /// - Offline, network failures and timeouts
    /// - Missing tenant (a later login supplies one)
    /// - Per-operation database failures
    /// - Cancellation
    ///
    /// ## Non-Retryable Errors
    /// - Remote rejection (the sale is quarantined instead)
    /// - Configuration errors
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SyncError::Offline
                | SyncError::NetworkFailure(_)
                | SyncError::Timeout(_)
                | SyncError::NoTenant
                | SyncError::Database(_)
                | SyncError::Cancelled
        )
    }

    /// Returns true if the error must abort the whole pass.
    pub fn is_fatal(&self) -> bool {
        matches!(self, SyncError::StorageUnavailable(_))
    }

    /// Returns true if the remote store refused the payload itself.
    pub fn is_rejection(&self) -> bool {
        matches!(self, SyncError::RemoteRejection { .. })
    }

    /// Returns true if this error indicates a configuration problem.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            SyncError::InvalidConfig(_)
                | SyncError::MissingDeviceId
                | SyncError::InvalidUrl(_)
                | SyncError::ConfigLoadFailed(_)
                | SyncError::ConfigSaveFailed(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use till_core::ValidationError;

    #[test]
    fn test_retryable_errors() {
        assert!(SyncError::NetworkFailure("connection reset".into()).is_retryable());
        assert!(SyncError::Timeout(30).is_retryable());
        assert!(SyncError::NoTenant.is_retryable());

        assert!(!SyncError::RemoteRejection {
            status: 400,
            message: "bad payload".into()
        }
        .is_retryable());
        assert!(!SyncError::InvalidConfig("bad config".into()).is_retryable());
        assert!(!SyncError::StorageUnavailable("disk".into()).is_retryable());
    }

    #[test]
    fn test_only_storage_is_fatal() {
        assert!(SyncError::StorageUnavailable("closed".into()).is_fatal());
        assert!(!SyncError::Database("locked".into()).is_fatal());
        assert!(!SyncError::NoTenant.is_fatal());
    }

    #[test]
    fn test_db_error_mapping() {
        let err: SyncError = DbError::StorageUnavailable("pool is closed".into()).into();
        assert!(err.is_fatal());

        let err: SyncError = DbError::not_found("Product", "p-1").into();
        assert!(matches!(err, SyncError::NotFound { ref id, .. } if id == "p-1"));

        let err: SyncError = DbError::Validation(ValidationError::Required {
            field: "lines".into(),
        })
        .into();
        assert!(matches!(err, SyncError::InvalidSale(_)));
    }

    #[test]
    fn test_remote_error_mapping() {
        let err: SyncError = RemoteError::Rejected {
            status: 422,
            message: "total mismatch".into(),
        }
        .into();
        assert!(err.is_rejection());
        assert!(err.to_string().contains("422"));

        let err: SyncError = RemoteError::Network("timeout".into()).into();
        assert!(matches!(err, SyncError::NetworkFailure(_)));
    }
}
