//! # bistro-core
//!
//! Order lifecycle, carts and payment reconciliation for the bistro service.
//!
//! This crate provides:
//! - `CartStore` for per-user item → quantity carts
//! - `OrderLedger`, the order state machine (checkout, verify, status)
//! - `PaymentGateway` trait for redirect-based payment providers
//! - `Reconciler` for rolling back checkouts that never completed
//! - `MenuCatalog` and `CatalogLookup` for resolving item ids to prices
//! - `OrderError` for typed error handling
//! - In-memory repositories, and Postgres ones behind the `postgres` feature
//!
//! ## Example
//!
//! ```rust,ignore
//! use bistro_core::{Identity, NewOrder, OrderLineItem, Role};
//!
//! let caller = Identity::from_role("u1", Role::User);
//! let placed = ledger
//!     .create_order(&caller, NewOrder {
//!         items: vec![OrderLineItem::new("Pizza", 10.0, 2)],
//!         amount: 22.0,
//!         address: "1 Main St".into(),
//!         idempotency_key: None,
//!     })
//!     .await?;
//!
//! // Redirect the customer to placed.session.checkout_url
//! ```

pub mod cart;
pub mod catalog;
pub mod error;
pub mod gateway;
pub mod identity;
pub mod intent;
pub mod ledger;
pub mod order;
#[cfg(feature = "postgres")]
pub mod postgres;
pub mod reconcile;
pub mod store;

// Re-exports for convenience
pub use cart::{CartData, CartStore};
pub use catalog::{cart_total, CatalogLookup, Currency, MenuCatalog, MenuItem};
pub use error::{OrderError, OrderResult};
pub use gateway::{
    BoxedPaymentGateway, CheckoutRequest, CheckoutSession, CheckoutUrls, GatewayEvent,
    GatewayEventKind, GatewayLineItem, PaymentGateway, DELIVERY_LINE_NAME,
};
pub use identity::{Identity, Role};
pub use intent::{CheckoutIntent, CheckoutStep, IntentRepository, MemoryIntentRepository};
pub use ledger::{
    AmountPolicy, LedgerOptions, NewOrder, OrderLedger, PlacedOrder, StatusPolicy, VerifyOutcome,
};
pub use order::{DeliveryAddress, Order, OrderLineItem, OrderStatus};
pub use reconcile::{Reconciler, SweepReport};
pub use store::{
    DiscardOutcome, MemoryOrderRepository, MemoryUserRepository, OrderRepository, StoreError,
    UserRecord, UserRepository,
};
