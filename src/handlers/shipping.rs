use crate::handlers::common::{map_service_error, success_response};
use crate::{
    errors::ApiError,
    services::shipping::{ShippingOption, ShippingQuoteItem},
    AppState,
};
use axum::{
    extract::State,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Creates the router for shipping endpoints. Quoting is pure computation
/// over catalog data, so no authentication is required.
pub fn shipping_routes() -> Router<AppState> {
    Router::new()
        .route("/calculate", post(calculate_shipping))
        .route("/methods", get(list_methods))
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct CalculateShippingRequest {
    pub items: Vec<ShippingQuoteItem>,
    pub zip_code: String,
    #[serde(default)]
    pub cart_total: Decimal,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CalculateShippingResponse {
    pub methods: Vec<ShippingOption>,
}

/// Quote every active shipping method for a cart and destination
#[utoipa::path(
    post,
    path = "/api/v1/shipping/calculate",
    request_body = CalculateShippingRequest,
    responses(
        (status = 200, description = "Ranked shipping options", body = CalculateShippingResponse),
        (status = 400, description = "Malformed zip code or empty cart", body = crate::errors::ErrorResponse)
    ),
    tag = "Shipping"
)]
pub async fn calculate_shipping(
    State(state): State<AppState>,
    Json(payload): Json<CalculateShippingRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let methods = state
        .services
        .shipping
        .quote(&payload.items, &payload.zip_code, payload.cart_total)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(CalculateShippingResponse { methods }))
}

/// Active methods as configured, without cart-dependent costs.
async fn list_methods(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let methods = state
        .services
        .shipping
        .active_methods()
        .await
        .map_err(map_service_error)?;

    Ok(success_response(methods))
}
