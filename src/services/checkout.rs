use crate::{
    entities::{
        cart, cart_line, order, order_line, product, Cart, CartLine, Customer, Order, OrderStatus,
        Product,
    },
    errors::ServiceError,
    events::{Event, EventSender},
    notifier::{self, EmailMessage, EmailTemplate, Notifier},
};
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DbErr, EntityTrait, PaginatorTrait,
    QueryFilter, QueryOrder, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

/// Checkout orchestrator: converts a cart into an immutable order snapshot.
///
/// The entire conversion runs in one transaction so no observer can see an
/// order without lines or a cleared cart without an order. The partial unique
/// index on pending orders backstops the one-pending-order-per-customer
/// pre-check under concurrent checkouts.
#[derive(Clone)]
pub struct CheckoutService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
    notifier: Arc<dyn Notifier>,
}

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct CheckoutRequest {
    #[validate(length(min = 1, message = "Shipping address is required"))]
    pub shipping_address: String,
    #[validate(length(min = 1, message = "Billing address is required"))]
    pub billing_address: String,
}

/// An order with its line snapshot and the derived total.
#[derive(Debug, Serialize)]
pub struct OrderWithLines {
    pub order: order::Model,
    pub lines: Vec<order_line::Model>,
    pub total: Decimal,
}

impl OrderWithLines {
    pub fn derive_total(lines: &[order_line::Model]) -> Decimal {
        lines.iter().map(|line| line.line_total()).sum()
    }
}

impl CheckoutService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        event_sender: Arc<EventSender>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            db,
            event_sender,
            notifier,
        }
    }

    /// Converts the customer's cart into a pending order.
    ///
    /// Preconditions are checked in order, each with its own failure: a cart
    /// must exist, it must have lines, and the customer must not already have
    /// a pending order. Order plus lines are created, product stock is
    /// decremented per line and cart lines are deleted, all in one atomic
    /// unit; the cart row itself is retained for reuse.
    #[instrument(skip(self, request), fields(customer_id = %customer_id))]
    pub async fn checkout(
        &self,
        customer_id: Uuid,
        request: CheckoutRequest,
    ) -> Result<OrderWithLines, ServiceError> {
        request.validate()?;

        let txn = self.db.begin().await?;

        let customer = Customer::find_by_id(customer_id)
            .one(&txn)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Customer {} not found", customer_id))
            })?;

        let cart = Cart::find()
            .filter(cart::Column::CustomerId.eq(customer_id))
            .one(&txn)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Customer {} has no cart", customer_id))
            })?;

        let lines = CartLine::find()
            .filter(cart_line::Column::CartId.eq(cart.id))
            .order_by_asc(cart_line::Column::CreatedAt)
            .all(&txn)
            .await?;
        if lines.is_empty() {
            return Err(ServiceError::ValidationError("Cart is empty".to_string()));
        }

        let pending = Order::find()
            .filter(order::Column::CustomerId.eq(customer_id))
            .filter(order::Column::Status.eq(OrderStatus::Pending))
            .count(&txn)
            .await?;
        if pending > 0 {
            return Err(ServiceError::Conflict(
                "Customer already has a pending order".to_string(),
            ));
        }

        let now = Utc::now();
        let order_id = Uuid::new_v4();
        let order_model = order::ActiveModel {
            id: Set(order_id),
            customer_id: Set(customer_id),
            cart_id: Set(Some(cart.id)),
            status: Set(OrderStatus::Pending),
            order_date: Set(now),
            shipping_address: Set(request.shipping_address),
            billing_address: Set(request.billing_address),
            tracking_number: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        };
        let order_model = order_model
            .insert(&txn)
            .await
            .map_err(map_pending_order_conflict)?;

        let mut order_lines = Vec::with_capacity(lines.len());
        for cart_line in &lines {
            let product = Product::find_by_id(cart_line.product_id)
                .one(&txn)
                .await?
                .ok_or_else(|| {
                    ServiceError::InternalError(format!(
                        "cart line {} references missing product",
                        cart_line.id
                    ))
                })?;

            // unit price is snapshotted here; later catalog changes never
            // rewrite this order's total
            let order_line = order_line::ActiveModel {
                id: Set(Uuid::new_v4()),
                order_id: Set(order_id),
                product_id: Set(product.id),
                quantity: Set(cart_line.quantity),
                unit_price: Set(product.price),
                created_at: Set(now),
            };
            order_lines.push(order_line.insert(&txn).await?);

            let new_stock = (product.stock - cart_line.quantity).max(0);
            let mut product_update: product::ActiveModel = product.into();
            product_update.stock = Set(new_stock);
            product_update.updated_at = Set(now);
            product_update.update(&txn).await?;
        }

        CartLine::delete_many()
            .filter(cart_line::Column::CartId.eq(cart.id))
            .exec(&txn)
            .await?;

        txn.commit().await.map_err(map_pending_order_conflict)?;

        self.event_sender
            .send_or_log(Event::OrderCreated(order_id))
            .await;

        let total = OrderWithLines::derive_total(&order_lines);
        notifier::dispatch(
            self.notifier.clone(),
            EmailMessage {
                template: EmailTemplate::OrderConfirmation,
                recipient: customer.email,
                context: serde_json::json!({
                    "order_id": order_id.to_string(),
                    "total": total,
                }),
            },
        );

        info!(
            "Checkout completed: order {} created from cart {} ({} lines)",
            order_id,
            cart.id,
            order_lines.len()
        );
        Ok(OrderWithLines {
            order: order_model,
            lines: order_lines,
            total,
        })
    }
}

/// An insert that trips the pending-order partial unique index means a
/// concurrent checkout committed first; surface it the same way as the
/// pre-check.
fn map_pending_order_conflict(err: DbErr) -> ServiceError {
    let detail = err.to_string();
    // Postgres reports the index name, SQLite the column
    if detail.contains("idx_orders_pending_per_customer") || detail.contains("orders.customer_id") {
        ServiceError::Conflict("Customer already has a pending order".to_string())
    } else {
        ServiceError::DatabaseError(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn checkout_request_requires_addresses() {
        let request = CheckoutRequest {
            shipping_address: "".to_string(),
            billing_address: "12 Riverside Dr".to_string(),
        };
        assert!(request.validate().is_err());

        let request = CheckoutRequest {
            shipping_address: "12 Riverside Dr".to_string(),
            billing_address: "12 Riverside Dr".to_string(),
        };
        assert!(request.validate().is_ok());
    }

    #[test]
    fn derived_total_sums_snapshotted_prices() {
        let now = Utc::now();
        let order_id = Uuid::new_v4();
        let line = |qty: i32, price: Decimal| order_line::Model {
            id: Uuid::new_v4(),
            order_id,
            product_id: Uuid::new_v4(),
            quantity: qty,
            unit_price: price,
            created_at: now,
        };

        let lines = vec![line(2, dec!(10.00)), line(1, dec!(5.00))];
        assert_eq!(OrderWithLines::derive_total(&lines), dec!(25.00));
    }

    #[test]
    fn unique_index_violation_maps_to_conflict() {
        let err = DbErr::Custom(
            "UNIQUE constraint failed: idx_orders_pending_per_customer".to_string(),
        );
        assert!(matches!(
            map_pending_order_conflict(err),
            ServiceError::Conflict(_)
        ));

        let other = DbErr::Custom("disk I/O error".to_string());
        assert!(matches!(
            map_pending_order_conflict(other),
            ServiceError::DatabaseError(_)
        ));
    }
}
