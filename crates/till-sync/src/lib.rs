//! # till-sync: Offline Queue Drain for Till POS
//!
//! Gets sales recorded offline into the remote backend, exactly once, and
//! keeps the product cache fresh for offline lookups.
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Sync Layer Architecture                          │
//! │                                                                         │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │                   BackgroundSync (triggers)                      │  │
//! │  │  timer · reconnect · manual · OS background hook                 │  │
//! │  └────────────────────────────┬─────────────────────────────────────┘  │
//! │                               │ sync_now(cancel)                        │
//! │                               ▼                                         │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │                        SyncEngine                                │  │
//! │  │  single-flight · batches of 5 · join_all · cooldown              │  │
//! │  └───────┬──────────────────┬──────────────────┬────────────────────┘  │
//! │          ▼                  ▼                  ▼                        │
//! │  ┌──────────────┐  ┌────────────────┐  ┌────────────────────────┐      │
//! │  │ RemoteStore  │  │ TenantResolver │  │ ConnectivityPort       │      │
//! │  │ (REST, fake) │  │ session/cache  │  │ (monitor, probe)       │      │
//! │  └──────────────┘  └────────────────┘  └────────────────────────┘      │
//! │          │                                                              │
//! │          ▼                                                              │
//! │  till-db LocalStore: queue · receipts · quarantine · product cache     │
//! │                                                                         │
//! │  STATUS EVENTS (via SyncEventEmitter):                                 │
//! │  • status   - online/syncing/pending/quarantined                       │
//! │  • progress - pending vs synced during a pass                          │
//! │  • error    - pass aborted                                             │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//! - [`engine`] - `SyncEngine`, pass summaries, status, emitter
//! - [`background`] - Timer/reconnect/manual triggers and OS scheduler port
//! - [`remote`] - `RemoteStore` port and the REST client
//! - [`tenant`] - Session port and tenant resolution
//! - [`connectivity`] - Online/offline state and health probe
//! - [`config`] - `sync.toml` plus `TILL_*` environment overrides
//! - [`error`] - `SyncError`
//!
//! ## Usage
//! ```rust,ignore
//! use std::sync::Arc;
//! use till_db::{DbConfig, LocalStore};
//! use till_sync::{
//!     BackgroundSync, ConnectivityMonitor, HealthProbe, NoopScheduler, StaticSession, SyncConfig,
//!     SyncEngine, TriggerSettings,
//! };
//!
//! let config = SyncConfig::load(None)?;
//! let store = LocalStore::new(DbConfig::new("./till.db"));
//! let session = Arc::new(StaticSession::new());
//! let monitor = Arc::new(ConnectivityMonitor::new(true));
//!
//! let engine = Arc::new(SyncEngine::from_config(&config, store, session, monitor.clone())?);
//! let handle = BackgroundSync::spawn(
//!     engine.clone(),
//!     &monitor,
//!     TriggerSettings::from(&config.sync),
//!     Arc::new(NoopScheduler),
//! );
//!
//! if let Some(probe) = HealthProbe::from_settings(&config.remote)? {
//!     probe.spawn(monitor.as_ref().clone(), handle.cancel_signal());
//! }
//!
//! engine.enqueue_sale(sale).await?;
//! let summary = handle.sync_now().await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod background;
pub mod config;
pub mod connectivity;
pub mod engine;
pub mod error;
pub mod remote;
pub mod tenant;

// =============================================================================
// Re-exports
// =============================================================================

pub use background::{
    BackgroundScheduler, BackgroundSync, BackgroundSyncHandle, NoopScheduler, TriggerSettings,
};
pub use config::{SyncConfig, SyncFrequency, SyncSettings};
pub use connectivity::{
    ConnectivityEvent, ConnectivityEvents, ConnectivityMonitor, ConnectivityPort, HealthProbe,
};
pub use engine::{
    CancelSignal, EngineOptions, NoOpEmitter, SaleOutcome, SkipReason, SyncAttemptResult,
    SyncEngine, SyncEngineBuilder, SyncEventEmitter, SyncPassSummary, SyncStatus,
};
pub use error::{SyncError, SyncResult};
pub use remote::{RemoteError, RemoteSale, RemoteSaleLine, RemoteStore, RestRemoteStore};
pub use tenant::{
    JwtSession, SessionIdentity, SessionProvider, StaticSession, TenantResolver, TenantSource,
};
