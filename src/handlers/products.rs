use crate::handlers::common::{map_service_error, success_response, PaginationParams};
use crate::{
    entities::{
        product::{self, Entity as ProductEntity},
        product_variant::{self, Entity as ProductVariantEntity},
    },
    errors::{ApiError, ServiceError},
    AppState,
};
use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    routing::get,
    Router,
};
use sea_orm::{ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder};
use serde::Serialize;
use uuid::Uuid;

/// Read-only catalog endpoints backing the storefront listing pages.
pub fn product_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_products))
        .route("/:id", get(get_product))
}

#[derive(Debug, Serialize)]
pub struct ProductResponse {
    #[serde(flatten)]
    pub product: product::Model,
    pub variants: Vec<product_variant::Model>,
}

#[derive(Debug, Serialize)]
pub struct ProductListResponse {
    pub products: Vec<product::Model>,
    pub total: u64,
    pub page: u64,
    pub per_page: u64,
}

async fn list_products(
    State(state): State<AppState>,
    Query(pagination): Query<PaginationParams>,
) -> Result<impl IntoResponse, ApiError> {
    let paginator = ProductEntity::find()
        .filter(product::Column::IsActive.eq(true))
        .order_by_asc(product::Column::Name)
        .paginate(&*state.db, pagination.per_page.max(1));

    let total = paginator
        .num_items()
        .await
        .map_err(|e| map_service_error(ServiceError::DatabaseError(e)))?;
    let products = paginator
        .fetch_page(pagination.page.saturating_sub(1))
        .await
        .map_err(|e| map_service_error(ServiceError::DatabaseError(e)))?;

    Ok(success_response(ProductListResponse {
        products,
        total,
        page: pagination.page,
        per_page: pagination.per_page,
    }))
}

async fn get_product(
    State(state): State<AppState>,
    Path(product_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let product = ProductEntity::find_by_id(product_id)
        .one(&*state.db)
        .await
        .map_err(|e| map_service_error(ServiceError::DatabaseError(e)))?
        .ok_or_else(|| ApiError::NotFound(format!("Product {} not found", product_id)))?;

    let variants = ProductVariantEntity::find()
        .filter(product_variant::Column::ProductId.eq(product_id))
        .all(&*state.db)
        .await
        .map_err(|e| map_service_error(ServiceError::DatabaseError(e)))?;

    Ok(success_response(ProductResponse { product, variants }))
}
