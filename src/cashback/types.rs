// Domain type definitions for the cashback ledger
// Program rules are stored as loose columns and validated into these variants at the store boundary

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Number of decimal places kept on every ledger amount
pub const AMOUNT_SCALE: u32 = 2;

/// Round a computed amount to ledger precision
pub fn round_amount(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(AMOUNT_SCALE, RoundingStrategy::MidpointAwayFromZero)
}

/// How a program credits cashback on a sale
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccrualRule {
    /// Flat amount per eligible sale
    Fixed(Decimal),

    /// Percentage of the sale value (10 = 10%)
    Percentage(Decimal),

    /// Unrecognised configuration; accrues nothing
    Unsupported,
}

impl AccrualRule {
    /// Build the rule from its persisted column pair
    pub fn from_columns(kind: &str, value: Decimal) -> Self {
        match kind {
            "FIXED" => AccrualRule::Fixed(value),
            "PERCENTAGE" => AccrualRule::Percentage(value),
            other => {
                tracing::warn!(accrual_type = other, "Unsupported accrual type, program will accrue nothing");
                AccrualRule::Unsupported
            }
        }
    }
}

/// Cap on how much cashback may be redeemed against a single sale
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "type", content = "value", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RedemptionLimit {
    /// Bounded only by the sale value and the available balance
    #[default]
    Unlimited,

    /// Absolute cap per sale
    Fixed(Decimal),

    /// Percentage of the sale value
    Percentage(Decimal),
}

impl RedemptionLimit {
    /// Build the limit from its nullable column pair
    pub fn from_columns(kind: Option<&str>, value: Option<Decimal>) -> Self {
        match (kind, value) {
            (Some("FIXED"), Some(v)) => RedemptionLimit::Fixed(v),
            (Some("PERCENTAGE"), Some(v)) => RedemptionLimit::Percentage(v),
            _ => RedemptionLimit::Unlimited,
        }
    }

    /// Maximum amount this limit allows on a sale of the given value
    pub fn limit_for(&self, sale_value: Decimal) -> Decimal {
        match self {
            RedemptionLimit::Unlimited => sale_value,
            RedemptionLimit::Fixed(value) => *value,
            RedemptionLimit::Percentage(value) => round_amount(sale_value * *value / Decimal::ONE_HUNDRED),
        }
    }
}

/// Kind of ledger event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "varchar", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionType {
    Accrual,
    Redemption,
    Expiration,
    Cancellation,
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransactionType::Accrual => write!(f, "ACCRUAL"),
            TransactionType::Redemption => write!(f, "REDEMPTION"),
            TransactionType::Expiration => write!(f, "EXPIRATION"),
            TransactionType::Cancellation => write!(f, "CANCELLATION"),
        }
    }
}

/// Lifecycle state of a ledger entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "varchar", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionStatus {
    Active,
    Consumed,
    Expired,
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransactionStatus::Active => write!(f, "ACTIVE"),
            TransactionStatus::Consumed => write!(f, "CONSUMED"),
            TransactionStatus::Expired => write!(f, "EXPIRED"),
        }
    }
}

/// Why an entry left the ACTIVE state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "varchar", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StatusReason {
    Redemption,
    Cancellation,
    Expiration,
}

impl fmt::Display for StatusReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatusReason::Redemption => write!(f, "REDEMPTION"),
            StatusReason::Cancellation => write!(f, "CANCELLATION"),
            StatusReason::Expiration => write!(f, "EXPIRATION"),
        }
    }
}

/// Where a sale was captured
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "varchar", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SaleSource {
    PointOfInteraction,
    Integration,
}

impl fmt::Display for SaleSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SaleSource::PointOfInteraction => write!(f, "POINT_OF_INTERACTION"),
            SaleSource::Integration => write!(f, "INTEGRATION"),
        }
    }
}
