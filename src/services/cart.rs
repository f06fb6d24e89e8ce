use crate::{
    entities::{cart, cart_line, Cart, CartLine, Customer, Product},
    errors::ServiceError,
    events::{Event, EventSender},
};
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::OnConflict, ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection,
    EntityTrait, QueryFilter, Set, TransactionTrait,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, instrument};
use utoipa::ToSchema;
use uuid::Uuid;

/// Cart manager.
///
/// Owns the mutable pre-checkout basket. One cart per customer, created
/// lazily; a repeated add merges into the existing line. Totals are derived
/// from the current product prices on every read and never cached on the
/// cart row.
#[derive(Clone)]
pub struct CartService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
}

/// A cart line joined with its product, priced at read time.
#[derive(Debug, Serialize, ToSchema)]
pub struct CartLineView {
    pub product_id: Uuid,
    pub product_name: String,
    pub quantity: i32,
    pub unit_price: Decimal,
    pub line_total: Decimal,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CartView {
    pub id: Uuid,
    pub customer_id: Uuid,
    pub lines: Vec<CartLineView>,
    pub total: Decimal,
}

impl CartService {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: Arc<EventSender>) -> Self {
        Self { db, event_sender }
    }

    /// Returns the customer's cart, creating an empty one on first access.
    ///
    /// The insert is conflict-tolerant on the unique customer_id, so two
    /// concurrent first accesses converge on the same row.
    #[instrument(skip(self))]
    pub async fn get_or_create_cart(&self, customer_id: Uuid) -> Result<CartView, ServiceError> {
        let cart = Self::get_or_create_model(&*self.db, customer_id).await?;
        self.view(cart).await
    }

    /// Adds a product to the customer's cart, merging with an existing line.
    ///
    /// The stock check is best-effort: it rejects products that are already
    /// out of stock but holds no reservation, so a concurrent buyer can still
    /// win the last unit at checkout time.
    #[instrument(skip(self))]
    pub async fn add_item(
        &self,
        customer_id: Uuid,
        product_id: Uuid,
        quantity: i32,
    ) -> Result<CartView, ServiceError> {
        if quantity < 1 {
            return Err(ServiceError::ValidationError(
                "Quantity must be at least 1".to_string(),
            ));
        }

        let txn = self.db.begin().await?;

        let cart = Self::get_or_create_model(&txn, customer_id).await?;

        let product = Product::find_by_id(product_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Product {} not found", product_id)))?;

        if product.stock <= 0 {
            return Err(ServiceError::InsufficientStock(format!(
                "Product {} is out of stock",
                product.name
            )));
        }

        let existing = CartLine::find()
            .filter(cart_line::Column::CartId.eq(cart.id))
            .filter(cart_line::Column::ProductId.eq(product_id))
            .one(&txn)
            .await?;

        if let Some(line) = existing {
            let current = line.quantity;
            let mut line: cart_line::ActiveModel = line.into();
            line.quantity = Set(current + quantity);
            line.updated_at = Set(Utc::now());
            line.update(&txn).await?;
        } else {
            let line = cart_line::ActiveModel {
                id: Set(Uuid::new_v4()),
                cart_id: Set(cart.id),
                product_id: Set(product_id),
                quantity: Set(quantity),
                created_at: Set(Utc::now()),
                updated_at: Set(Utc::now()),
            };
            line.insert(&txn).await?;
        }

        let mut cart_update: cart::ActiveModel = cart.clone().into();
        cart_update.updated_at = Set(Utc::now());
        cart_update.update(&txn).await?;

        txn.commit().await?;

        self.event_sender
            .send_or_log(Event::CartItemAdded {
                cart_id: cart.id,
                product_id,
                quantity,
            })
            .await;

        info!(
            "Added product {} x{} to cart {}",
            product_id, quantity, cart.id
        );
        self.view(cart).await
    }

    /// Removes a product's line from the customer's cart entirely.
    #[instrument(skip(self))]
    pub async fn remove_item(
        &self,
        customer_id: Uuid,
        product_id: Uuid,
    ) -> Result<CartView, ServiceError> {
        let txn = self.db.begin().await?;

        let cart = Cart::find()
            .filter(cart::Column::CustomerId.eq(customer_id))
            .one(&txn)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Customer {} has no cart", customer_id))
            })?;

        let line = CartLine::find()
            .filter(cart_line::Column::CartId.eq(cart.id))
            .filter(cart_line::Column::ProductId.eq(product_id))
            .one(&txn)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Product {} is not in the cart", product_id))
            })?;

        CartLine::delete_by_id(line.id).exec(&txn).await?;

        let mut cart_update: cart::ActiveModel = cart.clone().into();
        cart_update.updated_at = Set(Utc::now());
        cart_update.update(&txn).await?;

        txn.commit().await?;

        self.event_sender
            .send_or_log(Event::CartItemRemoved {
                cart_id: cart.id,
                product_id,
            })
            .await;

        info!("Removed product {} from cart {}", product_id, cart.id);
        self.view(cart).await
    }

    async fn get_or_create_model(
        conn: &impl ConnectionTrait,
        customer_id: Uuid,
    ) -> Result<cart::Model, ServiceError> {
        if let Some(cart) = Cart::find()
            .filter(cart::Column::CustomerId.eq(customer_id))
            .one(conn)
            .await?
        {
            return Ok(cart);
        }

        Customer::find_by_id(customer_id)
            .one(conn)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Customer {} not found", customer_id))
            })?;

        let fresh = cart::ActiveModel {
            id: Set(Uuid::new_v4()),
            customer_id: Set(customer_id),
            created_at: Set(Utc::now()),
            updated_at: Set(Utc::now()),
        };

        // a concurrent creator may win; the unique key makes that a no-op here
        Cart::insert(fresh)
            .on_conflict(
                OnConflict::column(cart::Column::CustomerId)
                    .do_nothing()
                    .to_owned(),
            )
            .exec_without_returning(conn)
            .await?;

        Cart::find()
            .filter(cart::Column::CustomerId.eq(customer_id))
            .one(conn)
            .await?
            .ok_or_else(|| {
                ServiceError::InternalError(format!(
                    "cart for customer {} missing after creation",
                    customer_id
                ))
            })
    }

    async fn view(&self, cart: cart::Model) -> Result<CartView, ServiceError> {
        let lines = CartLine::find()
            .filter(cart_line::Column::CartId.eq(cart.id))
            .find_also_related(Product)
            .all(&*self.db)
            .await?;

        let mut views = Vec::with_capacity(lines.len());
        let mut total = Decimal::ZERO;
        for (line, product) in lines {
            let product = product.ok_or_else(|| {
                ServiceError::InternalError(format!(
                    "cart line {} references missing product",
                    line.id
                ))
            })?;
            let line_total = product.price * Decimal::from(line.quantity);
            total += line_total;
            views.push(CartLineView {
                product_id: product.id,
                product_name: product.name,
                quantity: line.quantity,
                unit_price: product.price,
                line_total,
            });
        }

        Ok(CartView {
            id: cart.id,
            customer_id: cart.customer_id,
            lines: views,
            total,
        })
    }
}
