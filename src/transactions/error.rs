use axum::response::{IntoResponse, Response};
use uuid::Uuid;

use crate::cashback::LedgerError;
use crate::error::ApiError;
use crate::store::StoreError;

/// Error types for point-of-sale transactions
#[derive(Debug, thiserror::Error)]
pub enum TransactionError {
    #[error("Organization not found: {0}")]
    OrganizationNotFound(Uuid),

    #[error("Organization {0} has no cashback program")]
    ProgramNotFound(Uuid),

    #[error("Client not found: {0}")]
    ClientNotFound(Uuid),

    #[error("Operator not recognized or inactive")]
    Unauthorized,

    #[error("A client with phone {0} already exists")]
    DuplicateClient(String),

    #[error("A phone number is required to register a new client")]
    MissingClientPhone,

    #[error("Validation error: {0}")]
    Validation(#[from] validator::ValidationErrors),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<TransactionError> for ApiError {
    fn from(error: TransactionError) -> Self {
        match error {
            TransactionError::OrganizationNotFound(id) => ApiError::NotFound {
                resource: "Organization".to_string(),
                id: id.to_string(),
            },
            TransactionError::ProgramNotFound(id) => ApiError::NotFound {
                resource: "Cashback program for organization".to_string(),
                id: id.to_string(),
            },
            TransactionError::ClientNotFound(id) => ApiError::NotFound {
                resource: "Client".to_string(),
                id: id.to_string(),
            },
            TransactionError::Unauthorized => ApiError::Unauthorized(error.to_string()),
            TransactionError::DuplicateClient(_) => ApiError::BadRequest {
                error_code: "DUPLICATE_CLIENT",
                message: error.to_string(),
            },
            TransactionError::MissingClientPhone => ApiError::BadRequest {
                error_code: "MISSING_CLIENT_PHONE",
                message: error.to_string(),
            },
            TransactionError::Validation(errors) => ApiError::ValidationError(errors),
            TransactionError::Ledger(e) => e.into(),
            TransactionError::Store(e) => e.into(),
        }
    }
}

impl IntoResponse for TransactionError {
    fn into_response(self) -> Response {
        ApiError::from(self).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use rust_decimal_macros::dec;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (TransactionError::OrganizationNotFound(Uuid::new_v4()), StatusCode::NOT_FOUND),
            (TransactionError::ClientNotFound(Uuid::new_v4()), StatusCode::NOT_FOUND),
            (TransactionError::Unauthorized, StatusCode::UNAUTHORIZED),
            (TransactionError::DuplicateClient("11987654321".to_string()), StatusCode::BAD_REQUEST),
            (
                TransactionError::Ledger(LedgerError::InsufficientBalance {
                    requested: dec!(30),
                    available: dec!(10),
                }),
                StatusCode::BAD_REQUEST,
            ),
            (
                TransactionError::Store(StoreError::MissingRow("client")),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (error, status) in cases {
            assert_eq!(ApiError::from(error).status_code(), status);
        }
    }

    #[test]
    fn test_redemption_limit_keeps_error_code() {
        let api = ApiError::from(TransactionError::Ledger(LedgerError::RedemptionLimitExceeded {
            requested: dec!(30),
            limit: dec!(20),
        }));

        match api {
            ApiError::BadRequest { error_code, .. } => assert_eq!(error_code, "REDEMPTION_LIMIT_EXCEEDED"),
            other => panic!("expected BadRequest, got {:?}", other),
        }
    }
}
