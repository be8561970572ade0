//! # Validation Module
//!
//! Checks a sale before it is written to the offline queue.
//!
//! ## Where It Runs
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Checkout completes, backend unreachable                                │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  validate_new_sale(&sale) ← THIS MODULE                                │
//! │       │                                                                 │
//! │       ├── no lines?          → Error: "lines is required"              │
//! │       ├── qty <= 0?          → Error: "quantity must be positive"      │
//! │       ├── negative price?    → Error: "unit_price must not be ..."     │
//! │       ├── subtotal mismatch? → Error: "subtotal has invalid format"    │
//! │       │                                                                 │
//! │       └── OK → QueueRepository::enqueue writes it durably              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! A sale that fails here is never queued: the caller gets the error while
//! the cashier is still at the till.

use crate::error::ValidationError;
use crate::money::Money;
use crate::types::{NewQueuedSale, SaleLine};
use crate::{MAX_LINE_QUANTITY, MAX_SALE_LINES};

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Longest accepted queue id or user id.
const MAX_ID_LEN: usize = 64;

// =============================================================================
// Field Validators
// =============================================================================

/// Validates a line quantity.
///
/// ## Rules
/// - Must be positive (> 0)
/// - Must not exceed MAX_LINE_QUANTITY
pub fn validate_quantity(qty: i64) -> ValidationResult<()> {
    if qty <= 0 {
        return Err(ValidationError::MustBePositive {
            field: "quantity".to_string(),
        });
    }

    if qty > MAX_LINE_QUANTITY {
        return Err(ValidationError::OutOfRange {
            field: "quantity".to_string(),
            min: 1,
            max: MAX_LINE_QUANTITY,
        });
    }

    Ok(())
}

/// Validates an identifier (queue id, user id, product id).
///
/// ## Example
/// ```rust
/// use till_core::validation::validate_id;
///
/// assert!(validate_id("user_id", "cashier-7").is_ok());
/// assert!(validate_id("user_id", "  ").is_err());
/// ```
pub fn validate_id(field: &str, value: &str) -> ValidationResult<()> {
    let value = value.trim();

    if value.is_empty() {
        return Err(ValidationError::Required {
            field: field.to_string(),
        });
    }

    if value.len() > MAX_ID_LEN {
        return Err(ValidationError::TooLong {
            field: field.to_string(),
            max: MAX_ID_LEN,
        });
    }

    Ok(())
}

/// Validates a single line item.
pub fn validate_sale_line(line: &SaleLine) -> ValidationResult<()> {
    validate_id("product_id", &line.product_id)?;
    validate_quantity(line.quantity)?;

    if line.unit_price.is_negative() {
        return Err(ValidationError::MustNotBeNegative {
            field: "unit_price".to_string(),
        });
    }

    match line.unit_price.checked_multiply_quantity(line.quantity) {
        Some(expected) if expected == line.subtotal => Ok(()),
        Some(_) => Err(ValidationError::InvalidFormat {
            field: "subtotal".to_string(),
            reason: "must equal unit_price × quantity".to_string(),
        }),
        None => Err(ValidationError::OutOfRange {
            field: "subtotal".to_string(),
            min: 0,
            max: i64::MAX,
        }),
    }
}

// =============================================================================
// Sale Validator
// =============================================================================

/// Validates a sale about to be queued.
///
/// ## Rules
/// - At least one line, at most MAX_SALE_LINES
/// - Every line valid (see [`validate_sale_line`])
/// - Total not negative
/// - `user_id` present; `id` well-formed when supplied
///
/// ## Example
/// ```rust
/// use till_core::{Money, NewQueuedSale, PaymentMethod, SaleLine};
/// use till_core::validation::validate_new_sale;
///
/// let sale = NewQueuedSale::new(
///     "cashier-1",
///     PaymentMethod::Cash,
///     vec![SaleLine::new("p-1", 2, Money::from_cents(150))],
/// );
/// assert!(validate_new_sale(&sale).is_ok());
///
/// let empty = NewQueuedSale::new("cashier-1", PaymentMethod::Cash, vec![]);
/// assert!(validate_new_sale(&empty).is_err());
/// ```
pub fn validate_new_sale(sale: &NewQueuedSale) -> ValidationResult<()> {
    if sale.lines.is_empty() {
        return Err(ValidationError::Required {
            field: "lines".to_string(),
        });
    }

    if sale.lines.len() > MAX_SALE_LINES {
        return Err(ValidationError::OutOfRange {
            field: "lines".to_string(),
            min: 1,
            max: MAX_SALE_LINES as i64,
        });
    }

    for line in &sale.lines {
        validate_sale_line(line)?;
    }

    if sale.total.is_negative() {
        return Err(ValidationError::MustNotBeNegative {
            field: "total".to_string(),
        });
    }

    let lines_total = sale
        .lines
        .iter()
        .try_fold(Money::zero(), |acc, line| acc.checked_add(line.subtotal));
    if lines_total.is_none() {
        return Err(ValidationError::OutOfRange {
            field: "total".to_string(),
            min: 0,
            max: i64::MAX,
        });
    }

    validate_id("user_id", &sale.user_id)?;

    if let Some(id) = &sale.id {
        validate_id("id", id)?;
    }

    Ok(())
}
