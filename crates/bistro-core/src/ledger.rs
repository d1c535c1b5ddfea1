//! # Order Ledger
//!
//! The order state machine:
//!
//! ```text
//!   create_order ──► Pending ──verify(true)──► Paid ──update_status──► Paid (any label)
//!                       │
//!                       └──verify(false) / sweep──► deleted
//! ```
//!
//! Checkout runs three steps that are not atomic: persist the order, clear
//! the owner's cart, open a gateway session. A failure after the first step
//! leaves a `Pending` order behind. The checkout intent records how far each
//! attempt got so the client can retry with the same idempotency key (or call
//! [`OrderLedger::resume_checkout`]), and the reconciliation sweep rolls back
//! whatever is never paid.

use crate::cart::CartStore;
use crate::catalog::{CatalogLookup, Currency};
use crate::error::{OrderError, OrderResult};
use crate::gateway::{BoxedPaymentGateway, CheckoutRequest, CheckoutSession, CheckoutUrls};
use crate::identity::Identity;
use crate::intent::{CheckoutIntent, CheckoutStep, IntentRepository};
use crate::order::{DeliveryAddress, Order, OrderLineItem, OrderStatus};
use crate::store::{DiscardOutcome, OrderRepository};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};

/// Largest accepted difference between submitted and recomputed totals
const AMOUNT_TOLERANCE: f64 = 0.01;

/// How the checkout amount sent by the client is treated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AmountPolicy {
    /// Store the client's amount; log a warning when it disagrees with the recomputed total
    Trust,
    /// Reject the checkout when it disagrees
    Enforce,
}

impl FromStr for AmountPolicy {
    type Err = OrderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "trust" => Ok(AmountPolicy::Trust),
            "enforce" => Ok(AmountPolicy::Enforce),
            other => Err(OrderError::Configuration(format!("unknown amount policy: {}", other))),
        }
    }
}

/// How `update_status` treats its input
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusPolicy {
    /// Any label, any order (compatible with existing admin clients)
    Legacy,
    /// Known labels only, paid orders only
    Strict,
}

impl FromStr for StatusPolicy {
    type Err = OrderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "legacy" => Ok(StatusPolicy::Legacy),
            "strict" => Ok(StatusPolicy::Strict),
            other => Err(OrderError::Configuration(format!("unknown status policy: {}", other))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LedgerOptions {
    pub currency: Currency,
    /// Flat delivery fee in major units
    pub delivery_fee: f64,
    /// Upper bound on a single gateway call
    pub gateway_timeout: Duration,
    pub amount_policy: AmountPolicy,
    pub status_policy: StatusPolicy,
}

impl Default for LedgerOptions {
    fn default() -> Self {
        Self {
            currency: Currency::USD,
            delivery_fee: 2.0,
            gateway_timeout: Duration::from_secs(15),
            amount_policy: AmountPolicy::Trust,
            status_policy: StatusPolicy::Legacy,
        }
    }
}

/// Checkout request body
#[derive(Debug, Clone)]
pub struct NewOrder {
    pub items: Vec<OrderLineItem>,
    pub amount: f64,
    pub address: DeliveryAddress,
    pub idempotency_key: Option<String>,
}

/// Result of a checkout
#[derive(Debug, Clone)]
pub struct PlacedOrder {
    pub order_id: String,
    pub session: CheckoutSession,
    /// True when an earlier attempt's order was reused
    pub resumed: bool,
}

/// Result of a payment callback
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyOutcome {
    /// Pending order is now paid
    Paid,
    /// Duplicate success callback
    AlreadyPaid,
    /// Pending order deleted
    Discarded,
}

pub struct OrderLedger {
    orders: Arc<dyn OrderRepository>,
    intents: Arc<dyn IntentRepository>,
    carts: CartStore,
    gateway: BoxedPaymentGateway,
    catalog: Arc<dyn CatalogLookup>,
    urls: CheckoutUrls,
    options: LedgerOptions,
}

impl OrderLedger {
    pub fn new(
        orders: Arc<dyn OrderRepository>,
        intents: Arc<dyn IntentRepository>,
        carts: CartStore,
        gateway: BoxedPaymentGateway,
        catalog: Arc<dyn CatalogLookup>,
        urls: CheckoutUrls,
    ) -> Self {
        Self {
            orders,
            intents,
            carts,
            gateway,
            catalog,
            urls,
            options: LedgerOptions::default(),
        }
    }

    /// Builder: replace options
    pub fn with_options(mut self, options: LedgerOptions) -> Self {
        self.options = options;
        self
    }

    pub fn options(&self) -> &LedgerOptions {
        &self.options
    }

    pub fn provider_name(&self) -> &'static str {
        self.gateway.provider_name()
    }

    /// Place an order for the caller and open a checkout session.
    ///
    /// The snapshot and amount come from the request. The cart is cleared
    /// once the order is stored, whatever happens with the gateway after.
    /// A repeated idempotency key resumes the order it first produced.
    #[instrument(skip(self, caller, request), fields(items = request.items.len()))]
    pub async fn create_order(
        &self,
        caller: &Identity,
        request: NewOrder,
    ) -> OrderResult<PlacedOrder> {
        let user_id = caller.require_user()?;

        self.validate(&request)?;
        self.check_amount(&request.items, request.amount)?;

        let order = Order::new(user_id, request.items, request.amount, request.address);
        let intent = CheckoutIntent::new(&order.id, user_id, request.idempotency_key);

        // Step 0: reserve the key before anything is written
        if let Some((held, earlier)) = self.claim(&intent).await? {
            return self.replay(user_id, held, earlier).await;
        }

        // Step 1: persist
        if let Err(e) = self.orders.insert(order.clone()).await {
            if let Err(release) = self.intents.remove(&order.id).await {
                warn!(order_id = %order.id, error = %release, "failed to release checkout intent");
            }
            return Err(e.into());
        }
        self.intents
            .advance(&order.id, CheckoutStep::OrderPersisted)
            .await?;
        info!(order_id = %order.id, amount = order.amount, "order persisted");

        // Step 2: clear cart
        self.carts.clear(user_id).await?;
        self.intents
            .advance(&order.id, CheckoutStep::CartCleared)
            .await?;

        // Step 3: gateway
        let session = self.open_session(&order).await?;
        Ok(PlacedOrder {
            order_id: order.id,
            session,
            resumed: false,
        })
    }

    /// Request a fresh session for the caller's own pending order
    #[instrument(skip(self, caller))]
    pub async fn resume_checkout(
        &self,
        caller: &Identity,
        order_id: &str,
    ) -> OrderResult<PlacedOrder> {
        let user_id = caller.require_user()?;
        let order = self
            .orders
            .get(order_id)
            .await?
            .ok_or_else(|| OrderError::order_not_found(order_id))?;

        if !order.is_owned_by(user_id) {
            return Err(OrderError::NotOwner {
                order_id: order.id,
                user_id: user_id.to_string(),
            });
        }
        if order.payment {
            return Err(OrderError::ConflictOrRace {
                order_id: order.id,
                message: "already paid".to_string(),
            });
        }

        let session = self.open_session(&order).await?;
        Ok(PlacedOrder {
            order_id: order.id,
            session,
            resumed: true,
        })
    }

    /// Apply the gateway's verdict for an order.
    ///
    /// A success marks the order paid. A failure deletes it; a second failure
    /// callback for the same order then reports `OrderNotFound`. A failure for
    /// an order that is already paid is refused with `ConflictOrRace`.
    #[instrument(skip(self))]
    pub async fn verify_payment(
        &self,
        order_id: &str,
        success: bool,
    ) -> OrderResult<VerifyOutcome> {
        let outcome = if success {
            match self.orders.mark_paid(order_id).await? {
                None => {
                    error!(order_id, "payment confirmed for an order that no longer exists");
                    return Err(OrderError::order_not_found(order_id));
                }
                Some(false) => VerifyOutcome::Paid,
                Some(true) => VerifyOutcome::AlreadyPaid,
            }
        } else {
            match self.orders.delete_unpaid(order_id).await? {
                DiscardOutcome::Deleted(_) => VerifyOutcome::Discarded,
                DiscardOutcome::AlreadyPaid => {
                    warn!(order_id, "failure callback for a paid order ignored");
                    return Err(OrderError::ConflictOrRace {
                        order_id: order_id.to_string(),
                        message: "payment already confirmed".to_string(),
                    });
                }
                DiscardOutcome::Missing => return Err(OrderError::order_not_found(order_id)),
            }
        };

        if let Err(e) = self.intents.remove(order_id).await {
            warn!(order_id, error = %e, "failed to drop checkout intent");
        }
        info!(order_id, ?outcome, "payment verified");
        Ok(outcome)
    }

    /// One order, visible to its owner and to admins
    pub async fn get_order(&self, caller: &Identity, order_id: &str) -> OrderResult<Order> {
        let user_id = caller.require_user()?;
        let order = self
            .orders
            .get(order_id)
            .await?
            .ok_or_else(|| OrderError::order_not_found(order_id))?;

        if caller.is_admin() || order.is_owned_by(user_id) {
            Ok(order)
        } else {
            Err(OrderError::NotOwner {
                order_id: order.id,
                user_id: user_id.to_string(),
            })
        }
    }

    /// The caller's own orders in insertion order
    pub async fn list_for_user(&self, caller: &Identity) -> OrderResult<Vec<Order>> {
        let user_id = caller.require_user()?;
        Ok(self.orders.list_by_owner(user_id).await?)
    }

    /// Every order (admin only)
    pub async fn list_all(&self, caller: &Identity) -> OrderResult<Vec<Order>> {
        caller.require_admin()?;
        Ok(self.orders.list_all().await?)
    }

    /// Set the fulfillment label (admin only)
    #[instrument(skip(self, caller, status), fields(status = %status))]
    pub async fn update_status(
        &self,
        caller: &Identity,
        order_id: &str,
        status: OrderStatus,
    ) -> OrderResult<()> {
        let admin_id = caller.require_admin()?;

        if self.options.status_policy == StatusPolicy::Strict {
            if !status.is_known() {
                warn!(order_id, admin_id, "rejected unknown status label");
                return Err(OrderError::Validation(format!("unknown status: {}", status)));
            }
            let order = self
                .orders
                .get(order_id)
                .await?
                .ok_or_else(|| OrderError::order_not_found(order_id))?;
            if !order.payment {
                return Err(OrderError::ConflictOrRace {
                    order_id: order.id,
                    message: "order is not paid".to_string(),
                });
            }
        } else if !status.is_known() {
            warn!(order_id, admin_id, "storing non-standard status label");
        }

        if !self.orders.set_status(order_id, status).await? {
            return Err(OrderError::order_not_found(order_id));
        }
        info!(order_id, admin_id, "status updated");
        Ok(())
    }

    /// Σ price × quantity + delivery fee, preferring catalog prices for lines
    /// that carry a resolvable catalog id.
    ///
    /// Under `Enforce`, unknown and withdrawn (inactive) items are rejected.
    pub fn expected_amount(&self, items: &[OrderLineItem]) -> OrderResult<f64> {
        let enforce = self.options.amount_policy == AmountPolicy::Enforce;
        let mut subtotal = 0.0;
        for item in items {
            let unit = match item.item_id.as_deref() {
                Some(id) => match self.catalog.resolve(id) {
                    Some(menu_item) if menu_item.active => menu_item.price,
                    Some(_) if enforce => {
                        return Err(OrderError::Validation(format!("item not available: {}", id)));
                    }
                    Some(menu_item) => {
                        warn!(item_id = id, "checkout includes a withdrawn item");
                        menu_item.price
                    }
                    None if enforce => {
                        return Err(OrderError::Validation(format!("unknown item: {}", id)));
                    }
                    None => item.price,
                },
                None => item.price,
            };
            subtotal += unit * f64::from(item.quantity);
        }
        Ok(subtotal + self.options.delivery_fee)
    }

    fn validate(&self, request: &NewOrder) -> OrderResult<()> {
        if request.items.is_empty() {
            return Err(OrderError::Validation("order has no items".to_string()));
        }
        for item in &request.items {
            if item.name.trim().is_empty() {
                return Err(OrderError::Validation("item without a name".to_string()));
            }
            if item.quantity == 0 {
                return Err(OrderError::Validation(format!("zero quantity for {}", item.name)));
            }
            if !item.price.is_finite() || item.price < 0.0 {
                return Err(OrderError::Validation(format!("invalid price for {}", item.name)));
            }
        }
        if !request.amount.is_finite() || request.amount < 0.0 {
            return Err(OrderError::Validation("invalid amount".to_string()));
        }
        Ok(())
    }

    fn check_amount(&self, items: &[OrderLineItem], amount: f64) -> OrderResult<()> {
        let expected = self.expected_amount(items)?;
        if (expected - amount).abs() <= AMOUNT_TOLERANCE {
            return Ok(());
        }
        match self.options.amount_policy {
            AmountPolicy::Trust => {
                warn!(
                    submitted = amount,
                    expected, "checkout amount differs from recomputed total"
                );
                Ok(())
            }
            AmountPolicy::Enforce => Err(OrderError::Validation(format!(
                "amount {} does not match expected {}",
                amount, expected
            ))),
        }
    }

    /// Reserve the idempotency key carried by `intent`.
    ///
    /// Returns the intent already holding the key together with its order, or
    /// `None` once `intent` is stored.
    async fn claim(
        &self,
        intent: &CheckoutIntent,
    ) -> OrderResult<Option<(CheckoutIntent, Order)>> {
        // Second round only runs after clearing a key left by a discarded order
        for _ in 0..2 {
            let Some(held) = self.intents.claim(intent.clone()).await? else {
                return Ok(None);
            };
            match self.orders.get(&held.order_id).await? {
                Some(order) => return Ok(Some((held, order))),
                None if held.step == CheckoutStep::Claimed => {
                    return Err(OrderError::ConflictOrRace {
                        order_id: held.order_id,
                        message: "checkout already in progress".to_string(),
                    });
                }
                None => {
                    debug!(order_id = %held.order_id, "idempotency key freed by discarded order");
                    self.intents.remove(&held.order_id).await?;
                }
            }
        }
        Err(OrderError::ConflictOrRace {
            order_id: intent.order_id.clone(),
            message: "idempotency key is contended".to_string(),
        })
    }

    /// Same owner, same key: continue the earlier order instead of a new one
    async fn replay(
        &self,
        user_id: &str,
        held: CheckoutIntent,
        order: Order,
    ) -> OrderResult<PlacedOrder> {
        if order.payment {
            return Err(OrderError::ConflictOrRace {
                order_id: order.id,
                message: "idempotency key already used by a paid order".to_string(),
            });
        }

        info!(order_id = %order.id, step = ?held.step, "replaying checkout");
        if held.step < CheckoutStep::CartCleared {
            self.carts.clear(user_id).await?;
            self.intents
                .advance(&order.id, CheckoutStep::CartCleared)
                .await?;
        }
        let session = self.open_session(&order).await?;
        Ok(PlacedOrder {
            order_id: order.id,
            session,
            resumed: true,
        })
    }

    /// Step 3, bounded by `gateway_timeout`.
    ///
    /// Each failed attempt moves the provider idempotency key on, so a retry
    /// is never answered with the provider's cached error.
    async fn open_session(&self, order: &Order) -> OrderResult<CheckoutSession> {
        let failures = match self.intents.get(&order.id).await? {
            Some(intent) => intent.gateway_failures,
            None => {
                // Order stored without an intent (seeded or migrated data)
                let adopted = CheckoutIntent::new(&order.id, &order.user_id, None)
                    .at_step(CheckoutStep::OrderPersisted);
                self.intents.claim(adopted).await?;
                0
            }
        };

        let request = CheckoutRequest::for_order(
            order,
            self.options.currency,
            self.options.delivery_fee,
            &self.urls,
        )
        .with_attempt(failures);
        let provider = self.gateway.provider_name();

        let session = match tokio::time::timeout(
            self.options.gateway_timeout,
            self.gateway.create_checkout(&request),
        )
        .await
        {
            Ok(Ok(session)) => session,
            Ok(Err(e)) => {
                warn!(order_id = %order.id, error = %e, "gateway failed; order left pending");
                self.note_gateway_failure(&order.id).await;
                return Err(e);
            }
            Err(_) => {
                warn!(order_id = %order.id, "gateway timed out; order left pending");
                self.note_gateway_failure(&order.id).await;
                return Err(OrderError::gateway(provider, "checkout session request timed out"));
            }
        };

        self.intents
            .record_session(&order.id, &session.session_id, session.expires_at)
            .await?;
        info!(order_id = %order.id, session_id = %session.session_id, "checkout session issued");
        Ok(session)
    }

    async fn note_gateway_failure(&self, order_id: &str) {
        if let Err(e) = self.intents.record_gateway_failure(order_id).await {
            warn!(order_id, error = %e, "failed to record gateway failure");
        }
    }
}
