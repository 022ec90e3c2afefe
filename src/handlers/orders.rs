use crate::handlers::common::{
    created_response, map_service_error, success_response, PaginationParams,
};
use crate::{
    auth::AuthUser,
    errors::ApiError,
    services::orders::{CreateOrderRequest, RetryPaymentRequest},
    AppState,
};
use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

/// Creates the router for order endpoints
pub fn order_routes() -> Router<AppState> {
    Router::new()
        .route("/", post(create_order).get(list_orders))
        .route("/:id", get(get_order))
        .route("/:id/retry-payment", post(retry_payment))
        .route("/:id/payment-status", get(get_payment_status))
        .route("/:id/cancel", post(cancel_order))
}

#[derive(Debug, Serialize, ToSchema)]
pub struct PaymentStatusResponse {
    pub status: String,
}

/// Create an order from a validated cart
#[utoipa::path(
    post,
    path = "/api/v1/orders",
    request_body = CreateOrderRequest,
    responses(
        (status = 201, description = "Order created", body = crate::services::orders::OrderConfirmation),
        (status = 402, description = "Payment rejected", body = crate::errors::ErrorResponse),
        (status = 403, description = "Address belongs to another user", body = crate::errors::ErrorResponse),
        (status = 422, description = "Insufficient stock, itemized in details", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Orders"
)]
pub async fn create_order(
    State(state): State<AppState>,
    user: AuthUser,
    Json(payload): Json<CreateOrderRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let confirmation = state
        .services
        .orders
        .create_order(&user, payload)
        .await
        .map_err(map_service_error)?;

    Ok(created_response(confirmation))
}

async fn list_orders(
    State(state): State<AppState>,
    user: AuthUser,
    Query(pagination): Query<PaginationParams>,
) -> Result<impl IntoResponse, ApiError> {
    let orders = state
        .services
        .orders
        .list_orders(&user, pagination.page, pagination.per_page)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(orders))
}

async fn get_order(
    State(state): State<AppState>,
    user: AuthUser,
    Path(order_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let order = state
        .services
        .orders
        .get_order(&user, order_id)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(order))
}

/// Re-run the payment step of a pending order
#[utoipa::path(
    post,
    path = "/api/v1/orders/{id}/retry-payment",
    params(("id" = Uuid, Path, description = "Order id")),
    request_body = RetryPaymentRequest,
    responses(
        (status = 200, description = "Updated payment result", body = crate::services::payments::PaymentSummary),
        (status = 409, description = "Payment already completed", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Orders"
)]
pub async fn retry_payment(
    State(state): State<AppState>,
    user: AuthUser,
    Path(order_id): Path<Uuid>,
    Json(payload): Json<RetryPaymentRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let payment = state
        .services
        .orders
        .retry_payment(&user, order_id, payload)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(payment))
}

/// Poll-facing payment status; pending PIX past its expiry resolves to failed
#[utoipa::path(
    get,
    path = "/api/v1/orders/{id}/payment-status",
    params(("id" = Uuid, Path, description = "Order id")),
    responses(
        (status = 200, description = "Current payment status", body = PaymentStatusResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Orders"
)]
pub async fn get_payment_status(
    State(state): State<AppState>,
    user: AuthUser,
    Path(order_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let status = state
        .services
        .orders
        .get_payment_status(&user, order_id)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(PaymentStatusResponse {
        status: status.to_string(),
    }))
}

async fn cancel_order(
    State(state): State<AppState>,
    user: AuthUser,
    Path(order_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let order = state
        .services
        .orders
        .cancel_order(&user, order_id)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(order))
}
