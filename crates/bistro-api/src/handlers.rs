//! # Request Handlers
//!
//! Axum handlers for the cart and order API. Each handler resolves the
//! caller, calls into the ledger or cart store, and renders the envelope.

use crate::auth::Caller;
use crate::response::{ApiError, ApiResult, DataResponse, MessageResponse};
use crate::state::AppState;
use axum::{
    body::Bytes,
    extract::{rejection::JsonRejection, Path, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use bistro_core::{
    CartData, DeliveryAddress, NewOrder, Order, OrderError, OrderLineItem, OrderStatus,
    VerifyOutcome,
};
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument, warn};

/// Client-supplied checkout deduplication header
pub const IDEMPOTENCY_HEADER: &str = "idempotency-key";

// =============================================================================
// Request/Response Types
// =============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartItemRequest {
    pub item_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CartResponse {
    pub success: bool,
    pub cart_data: CartData,
}

#[derive(Debug, Deserialize)]
pub struct PlaceOrderRequest {
    pub items: Vec<OrderLineItem>,
    pub amount: f64,
    #[serde(default)]
    pub address: DeliveryAddress,
}

#[derive(Debug, Serialize)]
pub struct PlaceOrderResponse {
    pub success: bool,
    /// Gateway redirect target
    pub session_url: String,
    #[serde(rename = "orderId")]
    pub order_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderIdRequest {
    pub order_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyRequest {
    pub order_id: String,
    /// `"true"`/`"false"` from the redirect, or a boolean
    #[serde(default)]
    pub success: serde_json::Value,
}

impl VerifyRequest {
    /// Anything other than `true`/`"true"` counts as not paid
    pub fn is_success(&self) -> bool {
        match &self.success {
            serde_json::Value::Bool(b) => *b,
            serde_json::Value::String(s) => s == "true",
            _ => false,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusRequest {
    pub order_id: String,
    pub status: String,
}

fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> ApiResult<T> {
    payload.map(|Json(body)| body).map_err(ApiError::from)
}

// =============================================================================
// Handlers
// =============================================================================

/// Health check endpoint
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "bistro",
        "version": env!("CARGO_PKG_VERSION"),
        "gateway": state.ledger.provider_name(),
    }))
}

/// `POST /api/cart/add {itemId}`
#[instrument(skip_all)]
pub async fn add_to_cart(
    State(state): State<AppState>,
    Caller(caller): Caller,
    payload: Result<Json<CartItemRequest>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let user_id = caller.require_user()?;
    let request = json_body(payload)?;
    state.carts.add_item(user_id, &request.item_id).await?;
    Ok(MessageResponse::ok("Added to Cart"))
}

/// `POST /api/cart/remove {itemId}`
#[instrument(skip_all)]
pub async fn remove_from_cart(
    State(state): State<AppState>,
    Caller(caller): Caller,
    payload: Result<Json<CartItemRequest>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let user_id = caller.require_user()?;
    let request = json_body(payload)?;
    state.carts.remove_item(user_id, &request.item_id).await?;
    Ok(MessageResponse::ok("Removed from Cart"))
}

/// `GET /api/cart` (also `POST /api/cart/get`)
pub async fn get_cart(
    State(state): State<AppState>,
    Caller(caller): Caller,
) -> ApiResult<Json<CartResponse>> {
    let user_id = caller.require_user()?;
    let cart_data = state.carts.get_cart(user_id).await?;
    Ok(Json(CartResponse {
        success: true,
        cart_data,
    }))
}

/// `POST /api/order/place {items, amount, address}`
#[instrument(skip_all)]
pub async fn place_order(
    State(state): State<AppState>,
    Caller(caller): Caller,
    headers: HeaderMap,
    payload: Result<Json<PlaceOrderRequest>, JsonRejection>,
) -> ApiResult<Json<PlaceOrderResponse>> {
    caller.require_user()?;
    let request = json_body(payload)?;
    let idempotency_key = headers
        .get(IDEMPOTENCY_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .map(String::from);

    let placed = state
        .ledger
        .create_order(
            &caller,
            NewOrder {
                items: request.items,
                amount: request.amount,
                address: request.address,
                idempotency_key,
            },
        )
        .await?;

    Ok(Json(PlaceOrderResponse {
        success: true,
        session_url: placed.session.checkout_url,
        order_id: placed.order_id,
    }))
}

/// `POST /api/order/resume {orderId}`
#[instrument(skip_all)]
pub async fn resume_order(
    State(state): State<AppState>,
    Caller(caller): Caller,
    payload: Result<Json<OrderIdRequest>, JsonRejection>,
) -> ApiResult<Json<PlaceOrderResponse>> {
    let request = json_body(payload)?;
    let placed = state.ledger.resume_checkout(&caller, &request.order_id).await?;

    Ok(Json(PlaceOrderResponse {
        success: true,
        session_url: placed.session.checkout_url,
        order_id: placed.order_id,
    }))
}

/// `POST /api/order/verify {orderId, success}`. Unauthenticated: the
/// storefront relays the gateway redirect.
#[instrument(skip_all)]
pub async fn verify_order(
    State(state): State<AppState>,
    payload: Result<Json<VerifyRequest>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let request = json_body(payload)?;
    let outcome = state
        .ledger
        .verify_payment(&request.order_id, request.is_success())
        .await?;

    Ok(match outcome {
        VerifyOutcome::Paid | VerifyOutcome::AlreadyPaid => MessageResponse::ok("Paid"),
        VerifyOutcome::Discarded => MessageResponse::failed("Not Paid"),
    })
}

/// `GET /api/order/user` (also `POST /api/order/userorders`)
pub async fn user_orders(
    State(state): State<AppState>,
    Caller(caller): Caller,
) -> ApiResult<Json<DataResponse<Vec<Order>>>> {
    let orders = state.ledger.list_for_user(&caller).await?;
    Ok(DataResponse::ok(orders))
}

/// `GET /api/order/list` (admin)
pub async fn list_orders(
    State(state): State<AppState>,
    Caller(caller): Caller,
) -> ApiResult<Json<DataResponse<Vec<Order>>>> {
    let orders = state.ledger.list_all(&caller).await?;
    Ok(DataResponse::ok(orders))
}

/// `GET /api/order/{orderId}` (owner or admin)
pub async fn get_order(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Path(order_id): Path<String>,
) -> ApiResult<Json<DataResponse<Order>>> {
    let order = state.ledger.get_order(&caller, &order_id).await?;
    Ok(DataResponse::ok(order))
}

/// `PATCH /api/order/status {orderId, status}` (admin; also `POST`)
#[instrument(skip_all)]
pub async fn update_status(
    State(state): State<AppState>,
    Caller(caller): Caller,
    payload: Result<Json<StatusRequest>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    caller.require_admin()?;
    let request = json_body(payload)?;
    state
        .ledger
        .update_status(&caller, &request.order_id, OrderStatus::from(request.status))
        .await?;
    Ok(MessageResponse::ok("Status Updated Successfully"))
}

/// `POST /webhook/stripe`
#[instrument(skip_all)]
pub async fn stripe_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<StatusCode> {
    let signature = headers
        .get("stripe-signature")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| OrderError::Unauthorized("missing Stripe-Signature header".to_string()))?;

    let event = state.gateway.verify_webhook(&body, signature).await?;
    info!(event_id = %event.event_id, kind = ?event.kind, "webhook received");

    let Some((order_id, success)) = event.payment_outcome() else {
        return Ok(StatusCode::OK);
    };

    match state.ledger.verify_payment(order_id, success).await {
        Ok(outcome) => {
            info!(order_id, ?outcome, "webhook applied");
            Ok(StatusCode::OK)
        }
        // Already settled by the redirect or an earlier delivery
        Err(OrderError::OrderNotFound { .. }) if !success => Ok(StatusCode::OK),
        // Paid, but the order is gone; Stripe records a failed delivery
        Err(e @ OrderError::OrderNotFound { .. }) => {
            error!(order_id, event_id = %event.event_id, "paid webhook for unknown order");
            Err(e.into())
        }
        Err(e @ OrderError::ConflictOrRace { .. }) => {
            warn!(order_id, error = %e, "webhook conflicts with settled order");
            Ok(StatusCode::OK)
        }
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_verify_success_flag() {
        let parse = |v: serde_json::Value| -> VerifyRequest {
            serde_json::from_value(json!({"orderId": "o1", "success": v})).unwrap()
        };
        assert!(parse(json!("true")).is_success());
        assert!(parse(json!(true)).is_success());
        assert!(!parse(json!("false")).is_success());
        assert!(!parse(json!("yes")).is_success());
        assert!(!parse(json!(null)).is_success());

        let missing: VerifyRequest = serde_json::from_value(json!({"orderId": "o1"})).unwrap();
        assert!(!missing.is_success());
    }

    #[test]
    fn test_place_order_request_shape() {
        let request: PlaceOrderRequest = serde_json::from_value(json!({
            "items": [{"_id": "f1", "name": "Pizza", "price": 10, "quantity": 2}],
            "amount": 22,
            "address": {"street": "1 Main St"}
        }))
        .unwrap();
        assert_eq!(request.items[0].item_id.as_deref(), Some("f1"));
        assert_eq!(request.amount, 22.0);
    }
}
