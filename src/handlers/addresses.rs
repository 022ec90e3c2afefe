use crate::handlers::common::{
    created_response, map_service_error, no_content_response, success_response,
};
use crate::{
    auth::AuthUser,
    errors::ApiError,
    services::addresses::{CreateAddressRequest, UpdateAddressRequest},
    AppState,
};
use axum::{
    extract::{Path, State},
    response::IntoResponse,
    routing::{get, patch},
    Json, Router,
};
use uuid::Uuid;

/// Creates the router for the caller's address book
pub fn address_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_addresses).post(create_address))
        .route(
            "/:id",
            get(get_address).put(update_address).delete(delete_address),
        )
        .route("/:id/default", patch(set_default_address))
}

async fn list_addresses(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<impl IntoResponse, ApiError> {
    let addresses = state
        .services
        .addresses
        .list_addresses(user.user_id)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(addresses))
}

async fn get_address(
    State(state): State<AppState>,
    user: AuthUser,
    Path(address_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let address = state
        .services
        .addresses
        .get_address(user.user_id, address_id)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(address))
}

/// Create an address; the user's first address becomes the default
#[utoipa::path(
    post,
    path = "/api/v1/user/addresses",
    request_body = CreateAddressRequest,
    responses(
        (status = 201, description = "Address created"),
        (status = 400, description = "Malformed zip code or missing field", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Addresses"
)]
pub async fn create_address(
    State(state): State<AppState>,
    user: AuthUser,
    Json(payload): Json<CreateAddressRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let address = state
        .services
        .addresses
        .create_address(user.user_id, payload)
        .await
        .map_err(map_service_error)?;

    Ok(created_response(address))
}

async fn update_address(
    State(state): State<AppState>,
    user: AuthUser,
    Path(address_id): Path<Uuid>,
    Json(payload): Json<UpdateAddressRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let address = state
        .services
        .addresses
        .update_address(user.user_id, address_id, payload)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(address))
}

/// Switch the default address, clearing the previous one transactionally
async fn set_default_address(
    State(state): State<AppState>,
    user: AuthUser,
    Path(address_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let address = state
        .services
        .addresses
        .set_default(user.user_id, address_id)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(address))
}

async fn delete_address(
    State(state): State<AppState>,
    user: AuthUser,
    Path(address_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .services
        .addresses
        .delete_address(user.user_id, address_id)
        .await
        .map_err(map_service_error)?;

    Ok(no_content_response())
}
