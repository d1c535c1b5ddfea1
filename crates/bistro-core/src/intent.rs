//! # Checkout Intents
//!
//! Durable progress record for the three checkout steps (persist order,
//! clear cart, open gateway session). The steps are not atomic; the intent
//! tells a retry or the reconciliation sweep how far a checkout got.
//!
//! An intent is claimed before the order is written. Claiming is atomic per
//! `(user_id, idempotency_key)`, so two requests carrying the same key can
//! never both create an order.

use crate::store::{StoreError, StoreResult};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;
use tokio::sync::RwLock;

/// Furthest completed checkout step
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckoutStep {
    /// Key reserved, order not written yet
    Claimed,
    OrderPersisted,
    CartCleared,
    SessionIssued,
}

impl CheckoutStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckoutStep::Claimed => "claimed",
            CheckoutStep::OrderPersisted => "order_persisted",
            CheckoutStep::CartCleared => "cart_cleared",
            CheckoutStep::SessionIssued => "session_issued",
        }
    }
}

impl FromStr for CheckoutStep {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "claimed" => Ok(CheckoutStep::Claimed),
            "order_persisted" => Ok(CheckoutStep::OrderPersisted),
            "cart_cleared" => Ok(CheckoutStep::CartCleared),
            "session_issued" => Ok(CheckoutStep::SessionIssued),
            other => Err(StoreError::Corrupt(format!("unknown checkout step: {}", other))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckoutIntent {
    pub order_id: String,
    pub user_id: String,
    /// Client-supplied `Idempotency-Key`, if any
    pub idempotency_key: Option<String>,
    pub step: CheckoutStep,
    /// Latest gateway session id
    pub session_id: Option<String>,
    /// When the latest gateway session stops accepting payment
    pub session_expires_at: Option<DateTime<Utc>>,
    /// Gateway attempts that failed; each one moves the provider idempotency key on
    pub gateway_failures: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CheckoutIntent {
    pub fn new(
        order_id: impl Into<String>,
        user_id: impl Into<String>,
        idempotency_key: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            order_id: order_id.into(),
            user_id: user_id.into(),
            idempotency_key,
            step: CheckoutStep::Claimed,
            session_id: None,
            session_expires_at: None,
            gateway_failures: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Builder: start at a later step
    pub fn at_step(mut self, step: CheckoutStep) -> Self {
        self.step = step;
        self
    }

    /// Last moment the checkout can still complete: `timeout` after the most
    /// recent progress, or the session expiry when that is later
    pub fn live_until(&self, timeout: Duration) -> DateTime<Utc> {
        let by_activity = self.updated_at + timeout;
        match self.session_expires_at {
            Some(expires) if expires > by_activity => expires,
            _ => by_activity,
        }
    }
}

#[async_trait]
pub trait IntentRepository: Send + Sync {
    /// Store `intent` unless the same user already holds its idempotency key.
    ///
    /// Returns the existing intent on a key collision, `None` once `intent`
    /// is stored. Intents without a key always store.
    async fn claim(&self, intent: CheckoutIntent) -> StoreResult<Option<CheckoutIntent>>;

    async fn get(&self, order_id: &str) -> StoreResult<Option<CheckoutIntent>>;

    /// Move forward to `step`. Never moves backwards; missing intents are ignored.
    async fn advance(&self, order_id: &str, step: CheckoutStep) -> StoreResult<()>;

    /// Mark the session as issued and remember when it expires
    async fn record_session(
        &self,
        order_id: &str,
        session_id: &str,
        expires_at: Option<DateTime<Utc>>,
    ) -> StoreResult<()>;

    async fn record_gateway_failure(&self, order_id: &str) -> StoreResult<()>;

    async fn remove(&self, order_id: &str) -> StoreResult<()>;

    async fn list(&self) -> StoreResult<Vec<CheckoutIntent>>;
}

#[derive(Debug, Default)]
pub struct MemoryIntentRepository {
    intents: RwLock<HashMap<String, CheckoutIntent>>,
}

impl MemoryIntentRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl IntentRepository for MemoryIntentRepository {
    async fn claim(&self, intent: CheckoutIntent) -> StoreResult<Option<CheckoutIntent>> {
        let mut intents = self.intents.write().await;
        if let Some(key) = intent.idempotency_key.as_deref() {
            let held = intents
                .values()
                .find(|i| i.user_id == intent.user_id && i.idempotency_key.as_deref() == Some(key));
            if let Some(existing) = held {
                return Ok(Some(existing.clone()));
            }
        }
        intents.insert(intent.order_id.clone(), intent);
        Ok(None)
    }

    async fn get(&self, order_id: &str) -> StoreResult<Option<CheckoutIntent>> {
        Ok(self.intents.read().await.get(order_id).cloned())
    }

    async fn advance(&self, order_id: &str, step: CheckoutStep) -> StoreResult<()> {
        if let Some(intent) = self.intents.write().await.get_mut(order_id) {
            if step > intent.step {
                intent.step = step;
            }
            intent.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn record_session(
        &self,
        order_id: &str,
        session_id: &str,
        expires_at: Option<DateTime<Utc>>,
    ) -> StoreResult<()> {
        if let Some(intent) = self.intents.write().await.get_mut(order_id) {
            intent.step = CheckoutStep::SessionIssued;
            intent.session_id = Some(session_id.to_string());
            intent.session_expires_at = expires_at;
            intent.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn record_gateway_failure(&self, order_id: &str) -> StoreResult<()> {
        if let Some(intent) = self.intents.write().await.get_mut(order_id) {
            intent.gateway_failures += 1;
            intent.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn remove(&self, order_id: &str) -> StoreResult<()> {
        self.intents.write().await.remove(order_id);
        Ok(())
    }

    async fn list(&self) -> StoreResult<Vec<CheckoutIntent>> {
        Ok(self.intents.read().await.values().cloned().collect())
    }
}
