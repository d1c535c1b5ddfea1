//! # bistro-api
//!
//! HTTP API layer for bistro.
//!
//! This crate provides:
//! - Axum-based HTTP server
//! - Cart and order endpoints behind a JWT authorization gate
//! - Stripe webhook reconciliation
//!
//! ## Endpoints
//!
//! | Method | Path | Auth | Description |
//! |--------|------|------|-------------|
//! | GET | `/health` | - | Health check |
//! | POST | `/api/cart/add` | user | Add one unit |
//! | POST | `/api/cart/remove` | user | Remove one unit |
//! | GET | `/api/cart` | user | Current cart |
//! | POST | `/api/order/place` | user | Place order, get `session_url` |
//! | POST | `/api/order/resume` | user | New session for a pending order |
//! | POST | `/api/order/verify` | - | Payment callback |
//! | GET | `/api/order/user` | user | Own orders |
//! | GET | `/api/order/list` | admin | All orders |
//! | PATCH | `/api/order/status` | admin | Set fulfillment status |
//! | GET | `/api/order/{order_id}` | owner/admin | One order |
//! | POST | `/webhook/stripe` | signature | Stripe webhook |

pub mod auth;
pub mod handlers;
pub mod response;
pub mod routes;
pub mod state;

pub use auth::{Caller, TokenVerifier};
pub use response::{ApiError, ApiResult};
pub use routes::create_router;
pub use state::{AppConfig, AppState, Stores};
