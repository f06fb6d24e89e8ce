use crate::{
    errors::ServiceError,
    gateway::SIGNATURE_HEADER,
    handlers::AppState,
    services::payments::WebhookOutcome,
};
use axum::{
    extract::State,
    http::HeaderMap,
    response::IntoResponse,
    routing::post,
    Json, Router,
};
use bytes::Bytes;

#[utoipa::path(
    post,
    path = "/api/v1/payments/webhook",
    request_body = String,
    responses(
        (status = 200, description = "Delivery reconciled (or already was)", body = WebhookOutcome),
        (status = 400, description = "Malformed payload or unrecognized event", body = crate::errors::ErrorResponse),
        (status = 401, description = "Missing or invalid signature", body = crate::errors::ErrorResponse),
        (status = 502, description = "Provider verification failed; delivery should be retried", body = crate::errors::ErrorResponse)
    ),
    tag = "Payments"
)]
pub async fn payment_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, ServiceError> {
    // signature check runs on the raw bytes, before any parsing
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok());
    let outcome = state
        .services
        .payments
        .handle_webhook(&body, signature)
        .await?;
    Ok(Json(outcome))
}

pub fn routes() -> Router<AppState> {
    Router::new().route("/payments/webhook", post(payment_webhook))
}
