use async_trait::async_trait;
use axum::http::{HeaderName, HeaderValue, StatusCode};
use axum_test::TestServer;
use bistro_api::{create_router, AppConfig, AppState, Stores};
use bistro_core::{
    CheckoutRequest, CheckoutSession, GatewayEvent, MenuCatalog, MenuItem, OrderError,
    OrderResult, PaymentGateway, Role, UserRecord,
};
use chrono::Utc;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

const WEBHOOK_SECRET: &str = "whsec_test";

#[derive(Default)]
struct FakeGateway {
    fail: AtomicBool,
    calls: AtomicUsize,
}

#[async_trait]
impl PaymentGateway for FakeGateway {
    async fn create_checkout(&self, request: &CheckoutRequest) -> OrderResult<CheckoutSession> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(OrderError::gateway("fake", "connection refused"));
        }
        Ok(CheckoutSession::new(
            format!("cs_{}", request.order_id),
            &request.order_id,
            "fake",
            format!("https://pay.example/{}", request.order_id),
        ))
    }

    async fn verify_webhook(&self, payload: &[u8], signature: &str) -> OrderResult<GatewayEvent> {
        bistro_stripe::verify_and_parse(WEBHOOK_SECRET, payload, signature, Utc::now())
    }

    fn provider_name(&self) -> &'static str {
        "fake"
    }
}

struct Harness {
    server: TestServer,
    state: AppState,
    gateway: Arc<FakeGateway>,
}

impl Harness {
    fn new() -> Self {
        let gateway = Arc::new(FakeGateway::default());
        let stores = Stores::in_memory([
            UserRecord::new("alice", Role::User),
            UserRecord::new("bob", Role::User),
            UserRecord::new("root", Role::Admin),
        ]);
        let menu = MenuCatalog::new()
            .with_item(MenuItem::new("f1", "Pizza", 10.0))
            .with_item(MenuItem::new("f2", "Salad", 4.5));
        let state =
            AppState::with_parts(AppConfig::new("test-secret"), stores, gateway.clone(), menu);
        let server = TestServer::new(create_router(state.clone())).unwrap();
        Self {
            server,
            state,
            gateway,
        }
    }

    fn bearer(&self, user_id: &str) -> HeaderValue {
        let token = self.state.tokens.issue(user_id).unwrap();
        HeaderValue::from_str(&format!("Bearer {}", token)).unwrap()
    }

    fn auth(&self) -> HeaderName {
        HeaderName::from_static("authorization")
    }

    async fn place_pizza(&self, user_id: &str) -> Value {
        let response = self
            .server
            .post("/api/order/place")
            .add_header(self.auth(), self.bearer(user_id))
            .json(&pizza_order())
            .await;
        response.assert_status_ok();
        response.json::<Value>()
    }
}

fn pizza_order() -> Value {
    json!({
        "items": [{"_id": "f1", "name": "Pizza", "price": 10, "quantity": 2}],
        "amount": 22,
        "address": {"street": "1 Main St", "city": "Springfield"}
    })
}

#[tokio::test]
async fn test_health() {
    let h = Harness::new();
    let response = h.server.get("/health").await;
    response.assert_status_ok();
    assert_eq!(response.json::<Value>()["status"], "healthy");
}

#[tokio::test]
async fn test_cart_add_remove_get() {
    let h = Harness::new();

    for _ in 0..2 {
        let response = h
            .server
            .post("/api/cart/add")
            .add_header(h.auth(), h.bearer("alice"))
            .json(&json!({"itemId": "f1"}))
            .await;
        response.assert_status_ok();
        assert_eq!(
            response.json::<Value>(),
            json!({"success": true, "message": "Added to Cart"})
        );
    }

    h.server
        .post("/api/cart/remove")
        .add_header(h.auth(), h.bearer("alice"))
        .json(&json!({"itemId": "f1"}))
        .await
        .assert_status_ok();

    let response = h
        .server
        .get("/api/cart")
        .add_header(h.auth(), h.bearer("alice"))
        .await;
    response.assert_status_ok();
    assert_eq!(
        response.json::<Value>(),
        json!({"success": true, "cartData": {"f1": 1}})
    );

    h.server
        .post("/api/cart/remove")
        .add_header(h.auth(), h.bearer("alice"))
        .json(&json!({"itemId": "f1"}))
        .await
        .assert_status_ok();

    let body = h
        .server
        .get("/api/cart")
        .add_header(h.auth(), h.bearer("alice"))
        .await
        .json::<Value>();
    assert_eq!(body["cartData"], json!({}));
}

#[tokio::test]
async fn test_missing_or_invalid_credential() {
    let h = Harness::new();

    let response = h.server.get("/api/cart").await;
    response.assert_status(StatusCode::UNAUTHORIZED);
    assert_eq!(
        response.json::<Value>(),
        json!({"success": false, "message": "Not Authorized, Login Again"})
    );

    let response = h
        .server
        .get("/api/order/user")
        .add_header(h.auth(), HeaderValue::from_static("Bearer garbage"))
        .await;
    response.assert_status(StatusCode::UNAUTHORIZED);
    assert_eq!(response.json::<Value>()["success"], false);
}

#[tokio::test]
async fn test_cart_for_deleted_user() {
    let h = Harness::new();
    let response = h
        .server
        .post("/api/cart/add")
        .add_header(h.auth(), h.bearer("ghost"))
        .json(&json!({"itemId": "f1"}))
        .await;
    response.assert_status(StatusCode::NOT_FOUND);
    assert_eq!(response.json::<Value>()["message"], "User not found");
}

#[tokio::test]
async fn test_place_and_verify_paid() {
    let h = Harness::new();
    h.server
        .post("/api/cart/add")
        .add_header(h.auth(), h.bearer("alice"))
        .json(&json!({"itemId": "f1"}))
        .await
        .assert_status_ok();

    let placed = h.place_pizza("alice").await;
    assert_eq!(placed["success"], true);
    let order_id = placed["orderId"].as_str().unwrap().to_string();
    assert_eq!(placed["session_url"], format!("https://pay.example/{}", order_id));

    let cart = h
        .server
        .get("/api/cart")
        .add_header(h.auth(), h.bearer("alice"))
        .await
        .json::<Value>();
    assert_eq!(cart["cartData"], json!({}));

    let response = h
        .server
        .post("/api/order/verify")
        .json(&json!({"orderId": order_id, "success": "true"}))
        .await;
    response.assert_status_ok();
    assert_eq!(response.json::<Value>(), json!({"success": true, "message": "Paid"}));

    let orders = h
        .server
        .get("/api/order/user")
        .add_header(h.auth(), h.bearer("alice"))
        .await
        .json::<Value>();
    let data = orders["data"].as_array().unwrap();
    assert_eq!(data.len(), 1);
    assert_eq!(data[0]["_id"], order_id.as_str());
    assert_eq!(data[0]["payment"], true);
    assert_eq!(data[0]["status"], "Food Processing");
    assert_eq!(data[0]["amount"], 22.0);
    assert_eq!(data[0]["address"]["city"], "Springfield");

    // Late cancel for a paid order
    let response = h
        .server
        .post("/api/order/verify")
        .json(&json!({"orderId": order_id, "success": "false"}))
        .await;
    response.assert_status(StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_verify_failure_discards_order() {
    let h = Harness::new();
    let order_id = h.place_pizza("alice").await["orderId"]
        .as_str()
        .unwrap()
        .to_string();

    let response = h
        .server
        .post("/api/order/verify")
        .json(&json!({"orderId": order_id, "success": "false"}))
        .await;
    response.assert_status_ok();
    assert_eq!(
        response.json::<Value>(),
        json!({"success": false, "message": "Not Paid"})
    );

    let response = h
        .server
        .post("/api/order/verify")
        .json(&json!({"orderId": order_id, "success": "false"}))
        .await;
    response.assert_status(StatusCode::NOT_FOUND);

    let orders = h
        .server
        .get("/api/order/user")
        .add_header(h.auth(), h.bearer("alice"))
        .await
        .json::<Value>();
    assert_eq!(orders["data"], json!([]));
}

#[tokio::test]
async fn test_admin_routes() {
    let h = Harness::new();
    let order_id = h.place_pizza("alice").await["orderId"]
        .as_str()
        .unwrap()
        .to_string();
    h.place_pizza("bob").await;

    let response = h
        .server
        .get("/api/order/list")
        .add_header(h.auth(), h.bearer("alice"))
        .await;
    response.assert_status(StatusCode::FORBIDDEN);
    assert_eq!(response.json::<Value>()["message"], "You are not an admin");

    let response = h
        .server
        .patch("/api/order/status")
        .add_header(h.auth(), h.bearer("alice"))
        .json(&json!({"orderId": order_id, "status": "Delivered"}))
        .await;
    response.assert_status(StatusCode::FORBIDDEN);

    let all = h
        .server
        .get("/api/order/list")
        .add_header(h.auth(), h.bearer("root"))
        .await
        .json::<Value>();
    assert_eq!(all["data"].as_array().unwrap().len(), 2);

    let response = h
        .server
        .patch("/api/order/status")
        .add_header(h.auth(), h.bearer("root"))
        .json(&json!({"orderId": order_id, "status": "Out for delivery"}))
        .await;
    response.assert_status_ok();
    assert_eq!(response.json::<Value>()["message"], "Status Updated Successfully");

    let order = h
        .server
        .get(&format!("/api/order/{}", order_id))
        .add_header(h.auth(), h.bearer("alice"))
        .await
        .json::<Value>();
    assert_eq!(order["data"]["status"], "Out for delivery");
}

#[tokio::test]
async fn test_order_detail_access() {
    let h = Harness::new();
    let order_id = h.place_pizza("alice").await["orderId"]
        .as_str()
        .unwrap()
        .to_string();

    let response = h
        .server
        .get(&format!("/api/order/{}", order_id))
        .add_header(h.auth(), h.bearer("bob"))
        .await;
    response.assert_status(StatusCode::FORBIDDEN);
    assert_eq!(response.json::<Value>()["message"], "Not allowed");

    h.server
        .get(&format!("/api/order/{}", order_id))
        .add_header(h.auth(), h.bearer("root"))
        .await
        .assert_status_ok();

    h.server
        .get("/api/order/does-not-exist")
        .add_header(h.auth(), h.bearer("alice"))
        .await
        .assert_status(StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_legacy_routes_and_token_header() {
    let h = Harness::new();
    let token_header = HeaderName::from_static("token");
    let token = HeaderValue::from_str(&h.state.tokens.issue("alice").unwrap()).unwrap();

    h.server
        .post("/api/cart/add")
        .add_header(token_header.clone(), token.clone())
        .json(&json!({"itemId": "f2"}))
        .await
        .assert_status_ok();

    let cart = h
        .server
        .post("/api/cart/get")
        .add_header(token_header.clone(), token.clone())
        .await
        .json::<Value>();
    assert_eq!(cart["cartData"], json!({"f2": 1}));

    h.place_pizza("alice").await;
    let orders = h
        .server
        .post("/api/order/userorders")
        .add_header(token_header, token)
        .await
        .json::<Value>();
    assert_eq!(orders["data"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_invalid_order_rejected() {
    let h = Harness::new();
    let response = h
        .server
        .post("/api/order/place")
        .add_header(h.auth(), h.bearer("alice"))
        .json(&json!({"items": [], "amount": 2, "address": "1 Main St"}))
        .await;
    response.assert_status(StatusCode::BAD_REQUEST);
    assert_eq!(
        response.json::<Value>(),
        json!({"success": false, "message": "Invalid request"})
    );

    let response = h
        .server
        .post("/api/order/place")
        .add_header(h.auth(), h.bearer("alice"))
        .json(&json!({"amount": "lots"}))
        .await;
    response.assert_status(StatusCode::BAD_REQUEST);
    assert_eq!(response.json::<Value>()["success"], false);
}

#[tokio::test]
async fn test_gateway_failure_then_resume() {
    let h = Harness::new();
    h.server
        .post("/api/cart/add")
        .add_header(h.auth(), h.bearer("alice"))
        .json(&json!({"itemId": "f1"}))
        .await
        .assert_status_ok();
    h.gateway.fail.store(true, Ordering::SeqCst);

    let response = h
        .server
        .post("/api/order/place")
        .add_header(h.auth(), h.bearer("alice"))
        .json(&pizza_order())
        .await;
    response.assert_status(StatusCode::BAD_GATEWAY);
    assert_eq!(response.json::<Value>()["message"], "Payment provider unavailable");

    // Order persisted, cart already cleared
    let orders = h
        .server
        .get("/api/order/user")
        .add_header(h.auth(), h.bearer("alice"))
        .await
        .json::<Value>();
    let order_id = orders["data"][0]["_id"].as_str().unwrap().to_string();
    assert_eq!(orders["data"][0]["payment"], false);
    let cart = h
        .server
        .get("/api/cart")
        .add_header(h.auth(), h.bearer("alice"))
        .await
        .json::<Value>();
    assert_eq!(cart["cartData"], json!({}));

    h.gateway.fail.store(false, Ordering::SeqCst);
    let response = h
        .server
        .post("/api/order/resume")
        .add_header(h.auth(), h.bearer("alice"))
        .json(&json!({"orderId": order_id}))
        .await;
    response.assert_status_ok();
    assert_eq!(
        response.json::<Value>()["session_url"],
        format!("https://pay.example/{}", order_id)
    );
}

#[tokio::test]
async fn test_idempotency_key_dedups_checkout() {
    let h = Harness::new();
    let key = HeaderName::from_static("idempotency-key");

    let mut ids = Vec::new();
    for _ in 0..2 {
        let body = h
            .server
            .post("/api/order/place")
            .add_header(h.auth(), h.bearer("alice"))
            .add_header(key.clone(), HeaderValue::from_static("checkout-1"))
            .json(&pizza_order())
            .await
            .json::<Value>();
        ids.push(body["orderId"].as_str().unwrap().to_string());
    }
    assert_eq!(ids[0], ids[1]);
    assert_eq!(h.gateway.calls.load(Ordering::SeqCst), 2);

    let orders = h
        .server
        .get("/api/order/user")
        .add_header(h.auth(), h.bearer("alice"))
        .await
        .json::<Value>();
    assert_eq!(orders["data"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_stripe_webhook_settles_order() {
    let h = Harness::new();
    let order_id = h.place_pizza("alice").await["orderId"]
        .as_str()
        .unwrap()
        .to_string();

    let payload = serde_json::to_vec(&json!({
        "id": "evt_1",
        "type": "checkout.session.completed",
        "created": Utc::now().timestamp(),
        "data": {"object": {
            "id": "cs_1",
            "payment_status": "paid",
            "amount_total": 2200,
            "metadata": {"order_id": order_id}
        }}
    }))
    .unwrap();
    let signature =
        bistro_stripe::sign_payload(WEBHOOK_SECRET, Utc::now().timestamp(), &payload).unwrap();

    for _ in 0..2 {
        h.server
            .post("/webhook/stripe")
            .add_header(
                HeaderName::from_static("stripe-signature"),
                HeaderValue::from_str(&signature).unwrap(),
            )
            .bytes(payload.clone().into())
            .await
            .assert_status_ok();
    }

    let order = h
        .server
        .get(&format!("/api/order/{}", order_id))
        .add_header(h.auth(), h.bearer("alice"))
        .await
        .json::<Value>();
    assert_eq!(order["data"]["payment"], true);

    h.server
        .post("/webhook/stripe")
        .add_header(
            HeaderName::from_static("stripe-signature"),
            HeaderValue::from_static("t=1,v1=bad"),
        )
        .bytes(payload.into())
        .await
        .assert_status(StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_paid_webhook_for_unknown_order_fails_delivery() {
    let h = Harness::new();
    let event = |event_type: &str, payment_status: &str| {
        serde_json::to_vec(&json!({
            "id": "evt_9",
            "type": event_type,
            "created": Utc::now().timestamp(),
            "data": {"object": {
                "id": "cs_9",
                "payment_status": payment_status,
                "metadata": {"order_id": "rolled-back"}
            }}
        }))
        .unwrap()
    };

    for (payload, expected) in [
        (event("checkout.session.completed", "paid"), StatusCode::NOT_FOUND),
        (event("checkout.session.expired", "unpaid"), StatusCode::OK),
    ] {
        let signature =
            bistro_stripe::sign_payload(WEBHOOK_SECRET, Utc::now().timestamp(), &payload)
                .unwrap();
        h.server
            .post("/webhook/stripe")
            .add_header(
                HeaderName::from_static("stripe-signature"),
                HeaderValue::from_str(&signature).unwrap(),
            )
            .bytes(payload.into())
            .await
            .assert_status(expected);
    }
}

#[tokio::test]
async fn test_reconciler_rolls_back_abandoned_checkout() {
    let h = Harness::new();
    let order_id = h.place_pizza("alice").await["orderId"]
        .as_str()
        .unwrap()
        .to_string();

    let later = Utc::now() + chrono::Duration::days(2);
    let report = h.state.reconciler.sweep(later).await.unwrap();
    assert_eq!(report.rolled_back, vec![order_id.clone()]);

    h.server
        .post("/api/order/verify")
        .json(&json!({"orderId": order_id, "success": "true"}))
        .await
        .assert_status(StatusCode::NOT_FOUND);
}
