// HTTP handlers for point-of-sale endpoints

use axum::{extract::State, http::StatusCode, Json};
use chrono::Utc;

use crate::error::ErrorResponse;
use crate::transactions::{PosTransactionRequest, PosTransactionResponse, TransactionError};

/// Handler for POST /api/pos/transactions
/// Redeems and accrues cashback for one sale at the point of sale
#[utoipa::path(
    post,
    path = "/api/pos/transactions",
    request_body = PosTransactionRequest,
    responses(
        (status = 201, description = "Transaction committed", body = PosTransactionResponse),
        (status = 400, description = "Duplicate client, insufficient balance, limit exceeded or invalid request", body = ErrorResponse),
        (status = 401, description = "Operator not recognized", body = ErrorResponse),
        (status = 404, description = "Organization, program or client not found", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    tag = "pos"
)]
pub async fn create_pos_transaction_handler(
    State(state): State<crate::AppState>,
    Json(request): Json<PosTransactionRequest>,
) -> Result<(StatusCode, Json<PosTransactionResponse>), TransactionError> {
    let outcome = state.pos_service.process(request, Utc::now()).await?;
    Ok((StatusCode::CREATED, Json(outcome.into())))
}
