use crate::handlers::common::{map_service_error, success_response};
use crate::{
    errors::ApiError,
    services::stock::{StockItemRequest, StockValidation},
    AppState,
};
use axum::{extract::State, response::IntoResponse, routing::post, Json, Router};
use serde::Deserialize;
use utoipa::ToSchema;

/// Pre-flight availability check the storefront runs before checkout. Pure
/// read over catalog stock; the authoritative decrement happens inside the
/// order-creation transaction.
pub fn stock_routes() -> Router<AppState> {
    Router::new().route("/validate", post(validate_stock))
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct ValidateStockRequest {
    pub items: Vec<StockItemRequest>,
}

/// Check every cart line against current stock
#[utoipa::path(
    post,
    path = "/api/v1/stock/validate",
    request_body = ValidateStockRequest,
    responses(
        (status = 200, description = "Itemized availability report", body = StockValidation),
        (status = 400, description = "Empty cart", body = crate::errors::ErrorResponse)
    ),
    tag = "Stock"
)]
pub async fn validate_stock(
    State(state): State<AppState>,
    Json(payload): Json<ValidateStockRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if payload.items.is_empty() {
        return Err(ApiError::ValidationError("carrinho vazio".to_string()));
    }

    let validation = state
        .services
        .stock
        .validate(&payload.items)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(validation))
}
