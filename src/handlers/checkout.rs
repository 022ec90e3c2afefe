use crate::handlers::common::{
    created_response, map_service_error, no_content_response, success_response,
};
use crate::{
    auth::AuthUser,
    checkout::{BuyerInfo, CompleteCheckoutRequest, RecipientInfo},
    errors::ApiError,
    services::orders::OrderItemRequest,
    AppState,
};
use axum::{
    extract::{Path, State},
    response::IntoResponse,
    routing::{get, post, put},
    Json, Router,
};
use serde::Deserialize;
use utoipa::ToSchema;
use uuid::Uuid;

/// Creates the router for the checkout wizard
pub fn checkout_routes() -> Router<AppState> {
    Router::new()
        .route("/", post(start_checkout))
        .route("/:session_id", get(get_session).delete(cancel_checkout))
        .route("/:session_id/buyer", put(set_buyer))
        .route("/:session_id/recipient", put(set_recipient))
        .route("/:session_id/back", post(step_back))
        .route("/:session_id/complete", post(complete_checkout))
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct StartCheckoutRequest {
    pub items: Vec<OrderItemRequest>,
}

/// Open a checkout session over a cart snapshot
async fn start_checkout(
    State(state): State<AppState>,
    user: AuthUser,
    Json(payload): Json<StartCheckoutRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let session = state
        .services
        .checkout
        .start(&user, payload.items)
        .await
        .map_err(map_service_error)?;

    Ok(created_response(session))
}

async fn get_session(
    State(state): State<AppState>,
    user: AuthUser,
    Path(session_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let session = state
        .services
        .checkout
        .get(&user, session_id)
        .map_err(map_service_error)?;

    Ok(success_response(session))
}

async fn set_buyer(
    State(state): State<AppState>,
    user: AuthUser,
    Path(session_id): Path<Uuid>,
    Json(payload): Json<BuyerInfo>,
) -> Result<impl IntoResponse, ApiError> {
    let session = state
        .services
        .checkout
        .set_buyer(&user, session_id, payload)
        .map_err(map_service_error)?;

    Ok(success_response(session))
}

async fn set_recipient(
    State(state): State<AppState>,
    user: AuthUser,
    Path(session_id): Path<Uuid>,
    Json(payload): Json<RecipientInfo>,
) -> Result<impl IntoResponse, ApiError> {
    let session = state
        .services
        .checkout
        .set_recipient(&user, session_id, payload)
        .map_err(map_service_error)?;

    Ok(success_response(session))
}

/// Step back one position; always allowed before the order exists
async fn step_back(
    State(state): State<AppState>,
    user: AuthUser,
    Path(session_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let session = state
        .services
        .checkout
        .back(&user, session_id)
        .map_err(map_service_error)?;

    Ok(success_response(session))
}

/// Place the order from the payment step
async fn complete_checkout(
    State(state): State<AppState>,
    user: AuthUser,
    Path(session_id): Path<Uuid>,
    Json(payload): Json<CompleteCheckoutRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let confirmation = state
        .services
        .checkout
        .complete(&user, session_id, payload)
        .await
        .map_err(map_service_error)?;

    Ok(created_response(confirmation))
}

/// Abandon the flow: the session disappears with no server-side trace
async fn cancel_checkout(
    State(state): State<AppState>,
    user: AuthUser,
    Path(session_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .services
        .checkout
        .cancel(&user, session_id)
        .map_err(map_service_error)?;

    Ok(no_content_response())
}
