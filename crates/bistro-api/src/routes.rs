//! # Routes
//!
//! Axum router configuration for the cart and order API.

use crate::handlers;
use crate::state::AppState;
use axum::{
    routing::{get, patch, post},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

/// Create the main application router
///
/// Routes:
/// - Cart:
///   - POST /api/cart/add - Add one unit of an item
///   - POST /api/cart/remove - Remove one unit of an item
///   - GET  /api/cart - Current cart (legacy: POST /api/cart/get)
///
/// - Orders:
///   - POST  /api/order/place - Place order and open a checkout session
///   - POST  /api/order/resume - New session for a pending order
///   - POST  /api/order/verify - Payment callback relayed by the storefront
///   - GET   /api/order/user - Caller's orders (legacy: POST /api/order/userorders)
///   - GET   /api/order/list - All orders (admin)
///   - PATCH /api/order/status - Set fulfillment status (admin; legacy: POST)
///   - GET   /api/order/{order_id} - One order (owner or admin)
///
/// - Webhooks:
///   - POST /webhook/stripe - Stripe webhook handler
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let cart_routes = Router::new()
        .route("/", get(handlers::get_cart))
        .route("/add", post(handlers::add_to_cart))
        .route("/remove", post(handlers::remove_from_cart))
        .route("/get", post(handlers::get_cart));

    let order_routes = Router::new()
        .route("/place", post(handlers::place_order))
        .route("/resume", post(handlers::resume_order))
        .route("/verify", post(handlers::verify_order))
        .route("/user", get(handlers::user_orders))
        .route("/userorders", post(handlers::user_orders))
        .route("/list", get(handlers::list_orders))
        .route(
            "/status",
            patch(handlers::update_status).post(handlers::update_status),
        )
        .route("/{order_id}", get(handlers::get_order));

    // No CORS needed, raw body
    let webhook_routes = Router::new().route("/stripe", post(handlers::stripe_webhook));

    Router::new()
        .route("/health", get(handlers::health))
        .route("/", get(handlers::health))
        .nest("/api/cart", cart_routes)
        .nest("/api/order", order_routes)
        .nest("/webhook", webhook_routes)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
