//! # bistro-stripe
//!
//! Stripe payment gateway for bistro.
//!
//! **StripeGateway** opens a hosted Checkout Session per order:
//! - one line per ordered dish plus a "Delivery Charges" line
//! - `metadata[order_id]` and the callback URLs carry our order id
//! - `Idempotency-Key` derived from the order id; it moves on after each failed attempt
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use bistro_stripe::StripeGateway;
//! use std::time::Duration;
//!
//! let gateway = StripeGateway::from_env(Duration::from_secs(15))?;
//! let session = gateway.create_checkout(&request).await?;
//!
//! // Redirect the customer to session.checkout_url
//! ```
//!
//! ## Webhooks
//!
//! ```rust,ignore
//! let event = gateway.verify_webhook(payload, signature).await?;
//! if let Some((order_id, success)) = event.payment_outcome() {
//!     ledger.verify_payment(order_id, success).await?;
//! }
//! ```

pub mod checkout;
pub mod config;
pub mod webhook;

// Re-exports
pub use checkout::StripeGateway;
pub use config::StripeConfig;
pub use webhook::{sign_payload, verify_and_parse};
