use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Storefront API",
        version = "1.0.0",
        description = r#"
# Storefront API

Order lifecycle and payment settlement for a small storefront.

Carts are mutable baskets; checkout freezes a cart into a pending order
with snapshotted prices. Payment runs through an external provider:
charges are initiated server-side and settled by signed webhook
deliveries, with every success re-verified against the provider before
any local state changes.
        "#
    ),
    servers(
        (url = "http://localhost:8080", description = "Local development")
    ),
    tags(
        (name = "Carts", description = "Cart management endpoints"),
        (name = "Checkout", description = "Cart to order conversion"),
        (name = "Orders", description = "Order queries and customer cancellation"),
        (name = "Payments", description = "Charge initiation and webhook reconciliation"),
        (name = "Admin", description = "Staff-only order transitions"),
        (name = "Health", description = "Health check endpoints")
    ),
    paths(
        crate::handlers::carts::get_cart,
        crate::handlers::carts::add_item,
        crate::handlers::carts::remove_item,
        crate::handlers::checkout::checkout,
        crate::handlers::orders::list_orders,
        crate::handlers::orders::get_order,
        crate::handlers::orders::cancel_order,
        crate::handlers::orders::mark_processing,
        crate::handlers::orders::mark_shipped,
        crate::handlers::orders::mark_completed,
        crate::handlers::orders::refund_order,
        crate::handlers::orders::cancel_order_staff,
        crate::handlers::payments::pay_order,
        crate::handlers::webhooks::payment_webhook,
        crate::handlers::health::health_check,
    ),
    components(
        schemas(
            crate::handlers::carts::AddItemRequest,
            crate::handlers::checkout::OrderResponse,
            crate::handlers::checkout::OrderLineResponse,
            crate::handlers::orders::CancelOrderRequest,
            crate::handlers::orders::StaffActionRequest,
            crate::handlers::payments::PayOrderRequest,
            crate::handlers::health::HealthResponse,
            crate::services::cart::CartView,
            crate::services::cart::CartLineView,
            crate::services::checkout::CheckoutRequest,
            crate::services::payments::InitiatedPayment,
            crate::services::payments::WebhookOutcome,
            crate::errors::ErrorResponse
        )
    )
)]
pub struct ApiDocV1;

pub fn swagger_ui() -> SwaggerUi {
    SwaggerUi::new("/swagger-ui")
        .url("/api-docs/openapi.json", ApiDocV1::openapi())
        .config(utoipa_swagger_ui::Config::from("/api-docs/openapi.json").try_it_out_enabled(true))
}
