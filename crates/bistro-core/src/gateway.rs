//! # Payment Gateway Trait
//!
//! Contract for redirect-based payment providers.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    PaymentGateway (trait)                   │
//! │  ├── create_checkout()                                      │
//! │  ├── verify_webhook()                                       │
//! │  └── provider_name()                                        │
//! └─────────────────────────────────────────────────────────────┘
//!                            ▲
//!                    ┌───────┴───────┐
//!                    │ StripeGateway │
//!                    └───────────────┘
//! ```
//!
//! The gateway never sees the order record. It receives a [`CheckoutRequest`]
//! snapshot and returns a session whose callback URLs carry the order id.

use crate::catalog::Currency;
use crate::error::OrderResult;
use crate::order::Order;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Name of the line appended for delivery
pub const DELIVERY_LINE_NAME: &str = "Delivery Charges";

/// A line item as the gateway charges it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayLineItem {
    pub name: String,
    /// Unit price in the smallest currency unit
    pub unit_amount: i64,
    pub quantity: u32,
}

/// Everything a provider needs to open a checkout session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckoutRequest {
    /// Our order id (also embedded in the callback URLs)
    pub order_id: String,
    pub currency: Currency,
    /// Items as snapshotted on the order
    pub line_items: Vec<GatewayLineItem>,
    /// Flat delivery fee in the smallest currency unit
    pub delivery_fee: i64,
    pub success_url: String,
    pub cancel_url: String,
    /// Forwarded to the provider so a retried request maps to the same session.
    /// Moves on after a failed attempt, since providers replay stored errors.
    pub idempotency_key: String,
}

impl CheckoutRequest {
    /// Build the request for an order using its id for the callback URLs
    pub fn for_order(
        order: &Order,
        currency: Currency,
        delivery_fee: f64,
        urls: &CheckoutUrls,
    ) -> Self {
        let (success_url, cancel_url) = urls.with_order_id(&order.id);
        Self {
            order_id: order.id.clone(),
            currency,
            line_items: order
                .items
                .iter()
                .map(|item| GatewayLineItem {
                    name: item.name.clone(),
                    unit_amount: item.unit_amount(currency),
                    quantity: item.quantity,
                })
                .collect(),
            delivery_fee: currency.to_smallest_unit(delivery_fee),
            success_url,
            cancel_url,
            idempotency_key: format!("checkout-{}", order.id),
        }
    }

    /// Builder: key for the attempt after `failures` failed ones
    pub fn with_attempt(mut self, failures: u32) -> Self {
        self.idempotency_key = if failures == 0 {
            format!("checkout-{}", self.order_id)
        } else {
            format!("checkout-{}-retry{}", self.order_id, failures)
        };
        self
    }

    /// The order's items followed by the delivery-fee line
    pub fn line_items_with_delivery(&self) -> Vec<GatewayLineItem> {
        let mut items = self.line_items.clone();
        items.push(GatewayLineItem {
            name: DELIVERY_LINE_NAME.to_string(),
            unit_amount: self.delivery_fee,
            quantity: 1,
        });
        items
    }

    /// Total the customer will be charged, in the smallest unit
    pub fn total(&self) -> i64 {
        self.line_items_with_delivery()
            .iter()
            .map(|item| item.unit_amount * i64::from(item.quantity))
            .sum()
    }
}

/// A checkout session created by a payment provider
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckoutSession {
    /// Provider's session ID
    pub session_id: String,

    /// Our internal order ID
    pub order_id: String,

    /// Provider name (e.g., "stripe")
    pub provider: String,

    /// URL to redirect customer to for payment
    pub checkout_url: String,

    /// When the provider stops accepting payment on this session
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,
}

impl CheckoutSession {
    pub fn new(
        session_id: impl Into<String>,
        order_id: impl Into<String>,
        provider: impl Into<String>,
        checkout_url: impl Into<String>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            order_id: order_id.into(),
            provider: provider.into(),
            checkout_url: checkout_url.into(),
            expires_at: None,
            created_at: Utc::now(),
        }
    }

    /// Builder: set expiry
    pub fn with_expires_at(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }
}

/// Webhook event kinds the ledger reacts to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GatewayEventKind {
    /// Session finished; `paid` is false for delayed payment methods
    CheckoutCompleted { paid: bool },
    /// Session expired without payment
    CheckoutExpired,
    /// Delayed payment failed after the session completed
    PaymentFailed,
    /// Anything else (acknowledged, ignored)
    Other(String),
}

/// A verified webhook event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayEvent {
    pub event_id: String,
    pub kind: GatewayEventKind,
    pub provider: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// Our order id from session metadata
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount_total: Option<i64>,
    pub timestamp: DateTime<Utc>,
}

impl GatewayEvent {
    /// `(order_id, success)` when the event settles an order one way or the other
    pub fn payment_outcome(&self) -> Option<(&str, bool)> {
        let order_id = self.order_id.as_deref()?;
        match self.kind {
            GatewayEventKind::CheckoutCompleted { paid: true } => Some((order_id, true)),
            GatewayEventKind::CheckoutExpired | GatewayEventKind::PaymentFailed => {
                Some((order_id, false))
            }
            GatewayEventKind::CheckoutCompleted { paid: false } | GatewayEventKind::Other(_) => {
                None
            }
        }
    }
}

/// Core trait for payment provider implementations.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Create a checkout session and return the redirect URL.
    ///
    /// Implementations charge `request.line_items_with_delivery()`, never the
    /// bare item list.
    async fn create_checkout(&self, request: &CheckoutRequest) -> OrderResult<CheckoutSession>;

    /// Verify a webhook signature and parse the event.
    async fn verify_webhook(&self, payload: &[u8], signature: &str) -> OrderResult<GatewayEvent>;

    /// Get the provider name (for logging and routing).
    fn provider_name(&self) -> &'static str;
}

/// Type alias for a shared payment gateway (dynamic dispatch)
pub type BoxedPaymentGateway = Arc<dyn PaymentGateway>;

/// Callback targets handed to the gateway
#[derive(Debug, Clone)]
pub struct CheckoutUrls {
    /// Where the customer lands after paying
    pub success_url: String,
    /// Where the customer lands after cancelling
    pub cancel_url: String,
}

impl CheckoutUrls {
    /// The storefront's `/verify` page with the outcome flag, as the web client expects
    pub fn for_frontend(frontend_url: &str) -> Self {
        let base = frontend_url.trim_end_matches('/');
        Self {
            success_url: format!("{}/verify?success=true", base),
            cancel_url: format!("{}/verify?success=false", base),
        }
    }

    pub fn new(success_url: impl Into<String>, cancel_url: impl Into<String>) -> Self {
        Self {
            success_url: success_url.into(),
            cancel_url: cancel_url.into(),
        }
    }

    /// `(success, cancel)` with `orderId` appended
    pub fn with_order_id(&self, order_id: &str) -> (String, String) {
        (
            append_query(&self.success_url, "orderId", order_id),
            append_query(&self.cancel_url, "orderId", order_id),
        )
    }
}

impl Default for CheckoutUrls {
    fn default() -> Self {
        Self::for_frontend("http://localhost:5173")
    }
}

fn append_query(url: &str, key: &str, value: &str) -> String {
    if url.contains('?') {
        format!("{}&{}={}", url, key, value)
    } else {
        format!("{}?{}={}", url, key, value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::order::{DeliveryAddress, OrderLineItem};

    #[test]
    fn test_checkout_urls() {
        let urls = CheckoutUrls::new(
            "https://bistro.example/success",
            "https://bistro.example/cancel",
        );
        let (success, cancel) = urls.with_order_id("ord-1");

        assert_eq!(success, "https://bistro.example/success?orderId=ord-1");
        assert_eq!(cancel, "https://bistro.example/cancel?orderId=ord-1");

        let (success, _) =
            CheckoutUrls::for_frontend("https://bistro.example/").with_order_id("ord-1");
        assert_eq!(success, "https://bistro.example/verify?success=true&orderId=ord-1");
    }

    #[test]
    fn test_request_appends_delivery_fee() {
        let order = Order::new(
            "u1",
            vec![OrderLineItem::new("Pizza", 10.0, 2)],
            22.0,
            DeliveryAddress::from("1 Main St"),
        );
        let request =
            CheckoutRequest::for_order(&order, Currency::USD, 2.0, &CheckoutUrls::default());

        let lines = request.line_items_with_delivery();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].unit_amount, 1000);
        assert_eq!(lines[1].name, DELIVERY_LINE_NAME);
        assert_eq!(lines[1].unit_amount, 200);
        assert_eq!(request.total(), 2200);
        assert!(request.success_url.ends_with(&format!("orderId={}", order.id)));
    }

    #[test]
    fn test_payment_outcome() {
        let mut event = GatewayEvent {
            event_id: "evt_1".into(),
            kind: GatewayEventKind::CheckoutCompleted { paid: true },
            provider: "stripe".into(),
            session_id: Some("cs_1".into()),
            order_id: Some("ord-1".into()),
            amount_total: Some(2200),
            timestamp: Utc::now(),
        };
        assert_eq!(event.payment_outcome(), Some(("ord-1", true)));

        event.kind = GatewayEventKind::CheckoutExpired;
        assert_eq!(event.payment_outcome(), Some(("ord-1", false)));

        event.kind = GatewayEventKind::CheckoutCompleted { paid: false };
        assert_eq!(event.payment_outcome(), None);

        event.kind = GatewayEventKind::CheckoutCompleted { paid: true };
        event.order_id = None;
        assert_eq!(event.payment_outcome(), None);
    }

    #[test]
    fn test_attempt_moves_idempotency_key() {
        let order = Order::new(
            "u1",
            vec![OrderLineItem::new("Pizza", 10.0, 1)],
            12.0,
            DeliveryAddress::from("1 Main St"),
        );
        let request =
            CheckoutRequest::for_order(&order, Currency::USD, 2.0, &CheckoutUrls::default());
        assert_eq!(request.idempotency_key, format!("checkout-{}", order.id));

        let first = request.clone().with_attempt(0);
        assert_eq!(first.idempotency_key, request.idempotency_key);

        let retry = request.with_attempt(2);
        assert_eq!(retry.idempotency_key, format!("checkout-{}-retry2", order.id));
    }
}
