//! # Stripe Checkout Sessions
//!
//! [`PaymentGateway`] backed by the Stripe Checkout Sessions API.

use crate::config::StripeConfig;
use crate::webhook;
use async_trait::async_trait;
use bistro_core::{
    CheckoutRequest, CheckoutSession, GatewayEvent, OrderError, OrderResult, PaymentGateway,
};
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, error, info, instrument};

const PROVIDER: &str = "stripe";

/// Stripe hosted checkout
pub struct StripeGateway {
    config: StripeConfig,
    client: Client,
}

impl StripeGateway {
    /// Create a gateway whose HTTP client gives up after `timeout`
    pub fn new(config: StripeConfig, timeout: Duration) -> OrderResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| OrderError::Configuration(format!("HTTP client: {}", e)))?;

        Ok(Self { config, client })
    }

    /// Create from environment variables
    pub fn from_env(timeout: Duration) -> OrderResult<Self> {
        Self::new(StripeConfig::from_env()?, timeout)
    }

    pub fn config(&self) -> &StripeConfig {
        &self.config
    }

    /// Form body for `POST /v1/checkout/sessions`
    fn form_params(request: &CheckoutRequest) -> Vec<(String, String)> {
        let currency = request.currency.as_str().to_string();
        let mut params = vec![
            ("mode".to_string(), "payment".to_string()),
            ("success_url".to_string(), request.success_url.clone()),
            ("cancel_url".to_string(), request.cancel_url.clone()),
            ("client_reference_id".to_string(), request.order_id.clone()),
            ("metadata[order_id]".to_string(), request.order_id.clone()),
        ];

        for (i, item) in request.line_items_with_delivery().iter().enumerate() {
            params.push((
                format!("line_items[{}][price_data][currency]", i),
                currency.clone(),
            ));
            params.push((
                format!("line_items[{}][price_data][unit_amount]", i),
                item.unit_amount.to_string(),
            ));
            params.push((
                format!("line_items[{}][price_data][product_data][name]", i),
                item.name.clone(),
            ));
            params.push((format!("line_items[{}][quantity]", i), item.quantity.to_string()));
        }

        params
    }
}

#[async_trait]
impl PaymentGateway for StripeGateway {
    #[instrument(skip(self, request), fields(order_id = %request.order_id))]
    async fn create_checkout(&self, request: &CheckoutRequest) -> OrderResult<CheckoutSession> {
        let params = Self::form_params(request);
        debug!(lines = request.line_items.len() + 1, "creating stripe checkout session");

        let url = format!("{}/v1/checkout/sessions", self.config.api_base_url);
        let response = self
            .client
            .post(&url)
            .header("Authorization", self.config.auth_header())
            .header("Stripe-Version", &self.config.api_version)
            .header("Idempotency-Key", &request.idempotency_key)
            .form(&params)
            .send()
            .await
            .map_err(|e| OrderError::gateway(PROVIDER, e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| OrderError::gateway(PROVIDER, e.to_string()))?;

        if !status.is_success() {
            error!(%status, body = %body, "stripe API error");
            let message = serde_json::from_str::<StripeErrorResponse>(&body)
                .map(|e| e.error.message)
                .unwrap_or_else(|_| format!("HTTP {}", status));
            return Err(OrderError::gateway(PROVIDER, message));
        }

        let session: StripeCheckoutSessionResponse = serde_json::from_str(&body)
            .map_err(|e| OrderError::gateway(PROVIDER, format!("unexpected response: {}", e)))?;
        let checkout_url = session
            .url
            .ok_or_else(|| OrderError::gateway(PROVIDER, "session has no redirect URL"))?;

        info!(session_id = %session.id, "created stripe checkout session");

        let checkout = CheckoutSession::new(session.id, &request.order_id, PROVIDER, checkout_url);
        Ok(match session.expires_at.and_then(|ts| DateTime::from_timestamp(ts, 0)) {
            Some(expires_at) => checkout.with_expires_at(expires_at),
            None => checkout,
        })
    }

    #[instrument(skip(self, payload, signature))]
    async fn verify_webhook(&self, payload: &[u8], signature: &str) -> OrderResult<GatewayEvent> {
        let secret = self.config.webhook_secret.as_deref().ok_or_else(|| {
            OrderError::Unauthorized("STRIPE_WEBHOOK_SECRET not configured".to_string())
        })?;
        webhook::verify_and_parse(secret, payload, signature, Utc::now())
    }

    fn provider_name(&self) -> &'static str {
        PROVIDER
    }
}

// =============================================================================
// Stripe API Types
// =============================================================================

#[derive(Debug, Deserialize)]
struct StripeCheckoutSessionResponse {
    id: String,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    expires_at: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct StripeErrorResponse {
    error: StripeError,
}

#[derive(Debug, Deserialize)]
struct StripeError {
    message: String,
}
