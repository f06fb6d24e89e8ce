use crate::{
    errors::ServiceError, handlers::AppState, services::payments::InitiatedPayment,
};
use axum::{
    extract::{Json, Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::post,
    Router,
};
use rust_decimal::Decimal;
use serde::Deserialize;
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct PayOrderRequest {
    /// Overrides the derived order total. Normally omitted.
    #[serde(default)]
    pub amount: Option<Decimal>,
}

#[utoipa::path(
    post,
    path = "/api/v1/orders/{order_id}/pay",
    params(("order_id" = Uuid, Path, description = "Order id")),
    request_body = PayOrderRequest,
    responses(
        (status = 201, description = "Charge initiated with the provider", body = InitiatedPayment),
        (status = 400, description = "Non-positive amount", body = crate::errors::ErrorResponse),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
        (status = 409, description = "Order already paid or payment in flight", body = crate::errors::ErrorResponse),
        (status = 502, description = "Provider rejected the charge", body = crate::errors::ErrorResponse)
    ),
    tag = "Payments"
)]
pub async fn pay_order(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
    payload: Option<Json<PayOrderRequest>>,
) -> Result<impl IntoResponse, ServiceError> {
    let request = payload.map(|Json(body)| body).unwrap_or_default();
    let initiated = state
        .services
        .payments
        .initiate_payment(order_id, request.amount)
        .await?;
    Ok((StatusCode::CREATED, Json(initiated)))
}

pub fn routes() -> Router<AppState> {
    Router::new().route("/orders/:order_id/pay", post(pay_order))
}
