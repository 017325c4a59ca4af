// Error types for ledger mutations

use rust_decimal::Decimal;
use thiserror::Error;

use crate::error::ApiError;
use crate::store::StoreError;

/// Errors raised while mutating a cashback balance
///
/// Every variant aborts the surrounding unit of work.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// Requested redemption is larger than the available balance
    #[error("Insufficient cashback balance: requested {requested}, available {available}")]
    InsufficientBalance {
        requested: Decimal,
        available: Decimal,
    },

    /// Requested redemption exceeds the program limit for this sale
    #[error("Redemption of {requested} exceeds the limit of {limit} for this sale")]
    RedemptionLimitExceeded {
        requested: Decimal,
        limit: Decimal,
    },

    /// Program is inactive or has discount mode disabled
    #[error("Cashback redemption is disabled for this program")]
    RedemptionDisabled,

    /// Amount must be strictly positive
    #[error("Invalid ledger amount: {0}")]
    InvalidAmount(Decimal),

    /// Balance used for a mutation belongs to another program
    #[error("Balance {balance_id} does not belong to program {program_id}")]
    ProgramMismatch {
        balance_id: uuid::Uuid,
        program_id: uuid::Uuid,
    },

    /// Replayed ledger does not chain
    #[error("Ledger replay broken at sequence {sequence}: {reason}")]
    ReplayMismatch { sequence: i64, reason: String },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Result type alias for ledger operations
pub type LedgerResult<T> = Result<T, LedgerError>;

impl From<LedgerError> for ApiError {
    fn from(error: LedgerError) -> Self {
        let error_code = match &error {
            LedgerError::InsufficientBalance { .. } => "INSUFFICIENT_BALANCE",
            LedgerError::RedemptionLimitExceeded { .. } => "REDEMPTION_LIMIT_EXCEEDED",
            LedgerError::RedemptionDisabled => "REDEMPTION_DISABLED",
            LedgerError::InvalidAmount(_) => "INVALID_AMOUNT",
            LedgerError::Store(_) | LedgerError::ProgramMismatch { .. } | LedgerError::ReplayMismatch { .. } => {
                return match error {
                    LedgerError::Store(e) => ApiError::from(e),
                    other => ApiError::InternalError(other.to_string()),
                };
            }
        };

        ApiError::BadRequest {
            error_code,
            message: error.to_string(),
        }
    }
}
