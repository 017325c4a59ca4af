use axum::response::{IntoResponse, Response};
use uuid::Uuid;

use crate::cashback::LedgerError;
use crate::error::ApiError;
use crate::store::StoreError;

/// Error types for sales imports
#[derive(Debug, thiserror::Error)]
pub enum ImportError {
    #[error("Organization not found: {0}")]
    OrganizationNotFound(Uuid),

    /// Sales of this organization are captured at the point of sale
    #[error("Organization {0} has no sales integration")]
    NotIntegrated(Uuid),

    #[error("Sales feed request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Sales feed of organization {organization_id} answered with status {status}")]
    FeedRejected { organization_id: Uuid, status: u16 },

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Result type alias for import operations
pub type ImportResult<T> = Result<T, ImportError>;

impl From<ImportError> for ApiError {
    fn from(error: ImportError) -> Self {
        match error {
            ImportError::OrganizationNotFound(id) => ApiError::NotFound {
                resource: "Organization".to_string(),
                id: id.to_string(),
            },
            ImportError::NotIntegrated(_) => ApiError::BadRequest {
                error_code: "NOT_INTEGRATED",
                message: error.to_string(),
            },
            ImportError::Http(_) | ImportError::FeedRejected { .. } => {
                ApiError::InternalError(error.to_string())
            }
            ImportError::Ledger(e) => e.into(),
            ImportError::Store(e) => e.into(),
        }
    }
}

impl IntoResponse for ImportError {
    fn into_response(self) -> Response {
        ApiError::from(self).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            ApiError::from(ImportError::OrganizationNotFound(Uuid::new_v4())).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::from(ImportError::NotIntegrated(Uuid::new_v4())).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::from(ImportError::FeedRejected {
                organization_id: Uuid::new_v4(),
                status: 502
            })
            .status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
