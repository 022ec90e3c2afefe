use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi};
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "vitrine-api",
        description = "Storefront checkout and order orchestration API"
    ),
    paths(
        crate::handlers::orders::create_order,
        crate::handlers::orders::retry_payment,
        crate::handlers::orders::get_payment_status,
        crate::handlers::shipping::calculate_shipping,
        crate::handlers::stock::validate_stock,
        crate::handlers::addresses::create_address,
        crate::handlers::payment_webhooks::payment_webhook,
    ),
    components(schemas(
        crate::errors::ErrorResponse,
        crate::errors::StockShortfall,
        crate::errors::FieldError,
        crate::services::orders::CreateOrderRequest,
        crate::services::orders::OrderItemRequest,
        crate::services::orders::RetryPaymentRequest,
        crate::services::orders::OrderConfirmation,
        crate::services::orders::OrderStatus,
        crate::services::payments::CreditCardPayload,
        crate::services::payments::PaymentMethod,
        crate::services::payments::PaymentStatus,
        crate::services::payments::PaymentSummary,
        crate::services::shipping::ShippingOption,
        crate::services::shipping::ShippingQuoteItem,
        crate::services::shipping::EstimatedDays,
        crate::services::stock::StockItemRequest,
        crate::services::stock::StockValidation,
        crate::handlers::stock::ValidateStockRequest,
        crate::services::addresses::CreateAddressRequest,
        crate::services::addresses::UpdateAddressRequest,
        crate::handlers::orders::PaymentStatusResponse,
        crate::handlers::shipping::CalculateShippingRequest,
        crate::handlers::shipping::CalculateShippingResponse,
    )),
    modifiers(&SecurityAddon),
    tags(
        (name = "Orders", description = "Order creation, payment retry and polling"),
        (name = "Shipping", description = "Shipping quotes"),
        (name = "Stock", description = "Pre-flight availability checks"),
        (name = "Addresses", description = "User address book"),
        (name = "Payments", description = "Gateway callbacks")
    )
)]
pub struct ApiDoc;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer_auth",
            SecurityScheme::Http(
                HttpBuilder::new()
                    .scheme(HttpAuthScheme::Bearer)
                    .bearer_format("JWT")
                    .build(),
            ),
        );
    }
}

/// Swagger UI mounted at `/docs`, serving the generated document.
pub fn swagger_ui() -> SwaggerUi {
    SwaggerUi::new("/docs").url("/api-docs/openapi.json", ApiDoc::openapi())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_includes_core_paths() {
        let doc = ApiDoc::openapi();
        let paths: Vec<&String> = doc.paths.paths.keys().collect();
        assert!(paths.iter().any(|p| p.as_str() == "/api/v1/orders"));
        assert!(paths
            .iter()
            .any(|p| p.as_str() == "/api/v1/shipping/calculate"));
        assert!(paths
            .iter()
            .any(|p| p.as_str() == "/api/v1/payments/webhook"));
    }
}
