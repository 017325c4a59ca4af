// HTTP handlers for sales import endpoints

use axum::{
    extract::{Path, State},
    Json,
};
use chrono::Utc;
use uuid::Uuid;

use crate::error::ErrorResponse;
use crate::imports::{ImportError, ImportRequest, ImportSummary};

/// Handler for POST /api/organizations/{org_id}/sales/import
/// Applies a pushed batch of external sales, same as one feed poll
#[utoipa::path(
    post,
    path = "/api/organizations/{org_id}/sales/import",
    params(
        ("org_id" = Uuid, Path, description = "Organization ID")
    ),
    request_body = ImportRequest,
    responses(
        (status = 200, description = "Batch imported", body = ImportSummary),
        (status = 400, description = "Organization has no sales integration", body = ErrorResponse),
        (status = 404, description = "Organization not found", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    tag = "imports"
)]
pub async fn import_sales_handler(
    State(state): State<crate::AppState>,
    Path(org_id): Path<Uuid>,
    Json(request): Json<ImportRequest>,
) -> Result<Json<ImportSummary>, ImportError> {
    tracing::debug!(organization_id = %org_id, count = request.sales.len(), "Manual sales import");

    let summary = state
        .import_service
        .import_batch(org_id, request.sales, Utc::now())
        .await?;

    Ok(Json(summary))
}
