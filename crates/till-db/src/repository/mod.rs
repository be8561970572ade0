//! # Repository Module
//!
//! One repository per local collection.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Database                                                               │
//! │  ├── queue()     → QueueRepository          queued_sales, quarantine   │
//! │  ├── products()  → ProductCacheRepository   cached_products            │
//! │  ├── settings()  → SettingsRepository       settings                   │
//! │  └── receipts()  → SyncReceiptRepository    sync_receipts              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Repositories are thin `Clone` wrappers around the shared pool; create
//! them per call.

pub mod product_cache;
pub mod queue;
pub mod receipts;
pub mod settings;
