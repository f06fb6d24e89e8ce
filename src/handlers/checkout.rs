use crate::{
    errors::ServiceError,
    handlers::AppState,
    services::checkout::{CheckoutRequest, OrderWithLines},
};
use axum::{
    extract::{Json, Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::post,
    Router,
};
use rust_decimal::Decimal;
use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

/// Wire shape for a created or fetched order.
#[derive(Debug, Serialize, ToSchema)]
pub struct OrderResponse {
    pub id: Uuid,
    pub customer_id: Uuid,
    pub status: String,
    pub shipping_address: String,
    pub billing_address: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tracking_number: Option<String>,
    pub total: Decimal,
    pub lines: Vec<OrderLineResponse>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct OrderLineResponse {
    pub product_id: Uuid,
    pub quantity: i32,
    pub unit_price: Decimal,
    pub line_total: Decimal,
}

impl From<OrderWithLines> for OrderResponse {
    fn from(value: OrderWithLines) -> Self {
        Self {
            id: value.order.id,
            customer_id: value.order.customer_id,
            status: value.order.status.to_string(),
            shipping_address: value.order.shipping_address,
            billing_address: value.order.billing_address,
            tracking_number: value.order.tracking_number,
            total: value.total,
            lines: value
                .lines
                .into_iter()
                .map(|line| OrderLineResponse {
                    product_id: line.product_id,
                    quantity: line.quantity,
                    line_total: line.line_total(),
                    unit_price: line.unit_price,
                })
                .collect(),
        }
    }
}

#[utoipa::path(
    post,
    path = "/api/v1/customers/{customer_id}/checkout",
    params(("customer_id" = Uuid, Path, description = "Customer id")),
    request_body = CheckoutRequest,
    responses(
        (status = 201, description = "Pending order created from the cart", body = OrderResponse),
        (status = 400, description = "Empty cart or missing address", body = crate::errors::ErrorResponse),
        (status = 404, description = "Customer or cart not found", body = crate::errors::ErrorResponse),
        (status = 409, description = "Customer already has a pending order", body = crate::errors::ErrorResponse)
    ),
    tag = "Checkout"
)]
pub async fn checkout(
    State(state): State<AppState>,
    Path(customer_id): Path<Uuid>,
    Json(request): Json<CheckoutRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let order = state.services.checkout.checkout(customer_id, request).await?;
    Ok((StatusCode::CREATED, Json(OrderResponse::from(order))))
}

pub fn routes() -> Router<AppState> {
    Router::new().route("/customers/:customer_id/checkout", post(checkout))
}
