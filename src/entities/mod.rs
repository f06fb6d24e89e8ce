//! Sea-ORM entities for the storefront data model.

pub mod cart;
pub mod cart_line;
pub mod customer;
pub mod order;
pub mod order_line;
pub mod payment;
pub mod product;

pub use cart::{Entity as Cart, Model as CartModel};
pub use cart_line::{Entity as CartLine, Model as CartLineModel};
pub use customer::{Entity as Customer, Model as CustomerModel};
pub use order::{Entity as Order, Model as OrderModel, OrderStatus};
pub use order_line::{Entity as OrderLine, Model as OrderLineModel};
pub use payment::{Entity as Payment, Model as PaymentModel, PaymentStatus};
pub use product::{Entity as Product, Model as ProductModel};
