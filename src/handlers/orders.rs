use crate::{
    errors::ServiceError, handlers::checkout::OrderResponse, handlers::AppState,
    services::orders::OrderPage,
};
use axum::{
    extract::{Json, Path, Query, State},
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct ListOrdersParams {
    #[serde(default = "default_page")]
    pub page: u64,
    #[serde(default = "default_per_page")]
    pub per_page: u64,
}

fn default_page() -> u64 {
    1
}

fn default_per_page() -> u64 {
    20
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CancelOrderRequest {
    pub customer_id: Uuid,
}

/// Identifies the staff account performing an admin transition.
#[derive(Debug, Deserialize, ToSchema)]
pub struct StaffActionRequest {
    pub staff_id: Uuid,
    #[serde(default)]
    pub tracking_number: Option<String>,
}

#[utoipa::path(
    get,
    path = "/api/v1/orders/{order_id}",
    params(("order_id" = Uuid, Path, description = "Order id")),
    responses(
        (status = 200, description = "Order with lines and derived total", body = OrderResponse),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse)
    ),
    tag = "Orders"
)]
pub async fn get_order(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    let order = state.services.orders.get_order(order_id).await?;
    Ok(Json(OrderResponse::from(order)))
}

#[utoipa::path(
    get,
    path = "/api/v1/customers/{customer_id}/orders",
    params(
        ("customer_id" = Uuid, Path, description = "Customer to list orders for"),
        ("page" = u64, Query, description = "1-based page number"),
        ("per_page" = u64, Query, description = "Page size, capped at 100")
    ),
    responses((status = 200, description = "Page of the customer's orders, newest first")),
    tag = "Orders"
)]
pub async fn list_orders(
    State(state): State<AppState>,
    Path(customer_id): Path<Uuid>,
    Query(params): Query<ListOrdersParams>,
) -> Result<impl IntoResponse, ServiceError> {
    let page: OrderPage = state
        .services
        .orders
        .list_orders_for_customer(customer_id, params.page, params.per_page)
        .await?;
    Ok(Json(page))
}

#[utoipa::path(
    post,
    path = "/api/v1/orders/{order_id}/cancel",
    params(("order_id" = Uuid, Path, description = "Order id")),
    request_body = CancelOrderRequest,
    responses(
        (status = 200, description = "Order cancelled and stock restored"),
        (status = 403, description = "Order belongs to another customer", body = crate::errors::ErrorResponse),
        (status = 409, description = "Order is past the point of customer cancellation", body = crate::errors::ErrorResponse)
    ),
    tag = "Orders"
)]
pub async fn cancel_order(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
    Json(request): Json<CancelOrderRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let order = state
        .services
        .orders
        .cancel_order(order_id, request.customer_id)
        .await?;
    Ok(Json(order))
}

#[utoipa::path(
    post,
    path = "/api/v1/admin/orders/{order_id}/process",
    params(("order_id" = Uuid, Path, description = "Order id")),
    request_body = StaffActionRequest,
    responses(
        (status = 200, description = "Order moved to processing"),
        (status = 403, description = "Staff privileges required", body = crate::errors::ErrorResponse),
        (status = 409, description = "Transition not allowed from the current status", body = crate::errors::ErrorResponse)
    ),
    tag = "Admin"
)]
pub async fn mark_processing(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
    Json(request): Json<StaffActionRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let order = state
        .services
        .orders
        .mark_processing(order_id, request.staff_id)
        .await?;
    Ok(Json(order))
}

#[utoipa::path(
    post,
    path = "/api/v1/admin/orders/{order_id}/ship",
    params(("order_id" = Uuid, Path, description = "Order id")),
    request_body = StaffActionRequest,
    responses(
        (status = 200, description = "Order marked shipped"),
        (status = 403, description = "Staff privileges required", body = crate::errors::ErrorResponse),
        (status = 409, description = "Transition not allowed from the current status", body = crate::errors::ErrorResponse)
    ),
    tag = "Admin"
)]
pub async fn mark_shipped(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
    Json(request): Json<StaffActionRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let order = state
        .services
        .orders
        .mark_shipped(order_id, request.staff_id, request.tracking_number)
        .await?;
    Ok(Json(order))
}

#[utoipa::path(
    post,
    path = "/api/v1/admin/orders/{order_id}/complete",
    params(("order_id" = Uuid, Path, description = "Order id")),
    request_body = StaffActionRequest,
    responses(
        (status = 200, description = "Order marked completed"),
        (status = 403, description = "Staff privileges required", body = crate::errors::ErrorResponse),
        (status = 409, description = "Transition not allowed from the current status", body = crate::errors::ErrorResponse)
    ),
    tag = "Admin"
)]
pub async fn mark_completed(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
    Json(request): Json<StaffActionRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let order = state
        .services
        .orders
        .mark_completed(order_id, request.staff_id)
        .await?;
    Ok(Json(order))
}

#[utoipa::path(
    post,
    path = "/api/v1/admin/orders/{order_id}/refund",
    params(("order_id" = Uuid, Path, description = "Order id")),
    request_body = StaffActionRequest,
    responses(
        (status = 200, description = "Order refunded"),
        (status = 403, description = "Staff privileges required", body = crate::errors::ErrorResponse),
        (status = 409, description = "Only completed orders can be refunded", body = crate::errors::ErrorResponse)
    ),
    tag = "Admin"
)]
pub async fn refund_order(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
    Json(request): Json<StaffActionRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let order = state
        .services
        .orders
        .refund_order(order_id, request.staff_id)
        .await?;
    Ok(Json(order))
}

#[utoipa::path(
    post,
    path = "/api/v1/admin/orders/{order_id}/cancel",
    params(("order_id" = Uuid, Path, description = "Order id")),
    request_body = StaffActionRequest,
    responses(
        (status = 200, description = "Order cancelled and stock restored"),
        (status = 403, description = "Staff privileges required", body = crate::errors::ErrorResponse),
        (status = 409, description = "Transition not allowed from the current status", body = crate::errors::ErrorResponse)
    ),
    tag = "Admin"
)]
pub async fn cancel_order_staff(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
    Json(request): Json<StaffActionRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let order = state
        .services
        .orders
        .cancel_order_staff(order_id, request.staff_id)
        .await?;
    Ok(Json(order))
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/customers/:customer_id/orders", get(list_orders))
        .route("/orders/:order_id", get(get_order))
        .route("/orders/:order_id/cancel", post(cancel_order))
        .route("/admin/orders/:order_id/process", post(mark_processing))
        .route("/admin/orders/:order_id/ship", post(mark_shipped))
        .route("/admin/orders/:order_id/complete", post(mark_completed))
        .route("/admin/orders/:order_id/refund", post(refund_order))
        .route("/admin/orders/:order_id/cancel", post(cancel_order_staff))
}
