//! # till-core: Pure Domain Types for Till POS
//!
//! Everything the offline sync engine stores, queues or sends is defined
//! here, as plain data with no I/O attached.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Till POS Architecture                            │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │          Point-of-sale flow / dashboard (out of scope)          │   │
//! │  │     "enqueue sale"        "sync now"        "search catalog"    │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                  till-sync (SyncEngine, triggers)               │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                till-db (queue, product cache, settings)         │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ till-core (THIS CRATE) ★                        │   │
//! │  │   Money • QueuedSale • SaleLine • CachedProduct • validation    │   │
//! │  │   NO I/O • NO DATABASE • NO NETWORK • PURE FUNCTIONS            │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Queued sales, line items, cached products, sync outcomes
//! - [`money`] - Money type with integer arithmetic (no floating point!)
//! - [`error`] - Domain error types
//! - [`validation`] - Enqueue-time validation
//!
//! ## Example Usage
//!
//! ```rust
//! use till_core::{Money, SaleLine};
//!
//! let line = SaleLine::new("prod-1", 3, Money::from_cents(250));
//! assert_eq!(line.subtotal.cents(), 750);
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod money;
pub mod types;
pub mod validation;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use error::{CoreError, ValidationError};
pub use money::Money;
pub use types::*;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Maximum line items accepted in a single queued sale.
pub const MAX_SALE_LINES: usize = 200;

/// Maximum quantity of a single line.
///
/// Guards against a scanner key held down (1000 instead of 10).
pub const MAX_LINE_QUANTITY: i64 = 9_999;
