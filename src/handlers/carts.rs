use crate::{errors::ServiceError, handlers::AppState, services::cart::CartView};
use axum::{
    extract::{Json, Path, State},
    response::IntoResponse,
    routing::{delete, get, post},
    Router,
};
use serde::Deserialize;
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Debug, Deserialize, ToSchema)]
pub struct AddItemRequest {
    pub product_id: Uuid,
    pub quantity: i32,
}

#[utoipa::path(
    get,
    path = "/api/v1/customers/{customer_id}/cart",
    params(("customer_id" = Uuid, Path, description = "Customer id")),
    responses(
        (status = 200, description = "The customer's cart, created if absent", body = CartView),
        (status = 404, description = "Customer not found", body = crate::errors::ErrorResponse)
    ),
    tag = "Carts"
)]
pub async fn get_cart(
    State(state): State<AppState>,
    Path(customer_id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    let view = state.services.cart.get_or_create_cart(customer_id).await?;
    Ok(Json(view))
}

#[utoipa::path(
    post,
    path = "/api/v1/customers/{customer_id}/cart/items",
    params(("customer_id" = Uuid, Path, description = "Customer id")),
    request_body = AddItemRequest,
    responses(
        (status = 200, description = "Updated cart", body = CartView),
        (status = 400, description = "Invalid quantity", body = crate::errors::ErrorResponse),
        (status = 404, description = "Customer or product not found", body = crate::errors::ErrorResponse),
        (status = 422, description = "Product out of stock", body = crate::errors::ErrorResponse)
    ),
    tag = "Carts"
)]
pub async fn add_item(
    State(state): State<AppState>,
    Path(customer_id): Path<Uuid>,
    Json(request): Json<AddItemRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let view = state
        .services
        .cart
        .add_item(customer_id, request.product_id, request.quantity)
        .await?;
    Ok(Json(view))
}

#[utoipa::path(
    delete,
    path = "/api/v1/customers/{customer_id}/cart/items/{product_id}",
    params(
        ("customer_id" = Uuid, Path, description = "Customer id"),
        ("product_id" = Uuid, Path, description = "Product id")
    ),
    responses(
        (status = 200, description = "Updated cart", body = CartView),
        (status = 404, description = "Cart or line not found", body = crate::errors::ErrorResponse)
    ),
    tag = "Carts"
)]
pub async fn remove_item(
    State(state): State<AppState>,
    Path((customer_id, product_id)): Path<(Uuid, Uuid)>,
) -> Result<impl IntoResponse, ServiceError> {
    let view = state
        .services
        .cart
        .remove_item(customer_id, product_id)
        .await?;
    Ok(Json(view))
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/customers/:customer_id/cart", get(get_cart))
        .route("/customers/:customer_id/cart/items", post(add_item))
        .route(
            "/customers/:customer_id/cart/items/:product_id",
            delete(remove_item),
        )
}
