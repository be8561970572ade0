//! # till-db: Local Durable Store for Till POS
//!
//! SQLite-backed collections the terminal keeps while the backend is
//! unreachable: the offline sale queue, the product cache and settings.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Till POS Data Flow                               │
//! │                                                                         │
//! │  SyncEngine (till-sync)           Point of sale (enqueue, search)      │
//! │       │                                  │                              │
//! │       └─────────────────┬────────────────┘                              │
//! │                         ▼                                               │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                     till-db (THIS CRATE)                        │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────────┐    ┌──────────────────┐   ┌─────────────┐  │   │
//! │  │   │  LocalStore   │    │   Repositories   │   │ Migrations  │  │   │
//! │  │   │  (pool.rs)    │    │                  │   │ (embedded)  │  │   │
//! │  │   │               │    │ QueueRepository  │   │ 0001_...sql │  │   │
//! │  │   │ OnceCell<     │◄───│ ProductCache...  │   │ 0002_...sql │  │   │
//! │  │   │   Database>   │    │ Settings, Recpts │   │             │  │   │
//! │  │   └───────────────┘    └──────────────────┘   └─────────────┘  │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                         │                                               │
//! │                         ▼                                               │
//! │                  till.db (WAL, synchronous=FULL)                        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`pool`] - `DbConfig`, `Database`, open-once `LocalStore`
//! - [`migrations`] - Embedded, additive-only schema migrations
//! - [`error`] - `DbError`
//! - [`repository`] - Queue, product cache, settings, sync receipts
//!
//! ## Usage
//!
//! ```rust,ignore
//! use till_db::{DbConfig, LocalStore};
//!
//! let store = LocalStore::new(DbConfig::new("./till.db"));
//! let db = store.open().await?;
//!
//! let queued = db.queue().enqueue(sale, Some("tenant-1")).await?;
//! let hits = db.products().search("agua").await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod migrations;
pub mod pool;
pub mod repository;

// =============================================================================
// Re-exports
// =============================================================================

pub use error::{DbError, DbResult};
pub use migrations::SchemaVersion;
pub use pool::{Database, DbConfig, LocalStore};

pub use repository::product_cache::ProductCacheRepository;
pub use repository::queue::QueueRepository;
pub use repository::receipts::SyncReceiptRepository;
pub use repository::settings::{keys as setting_keys, SettingsRepository};
