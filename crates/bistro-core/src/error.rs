//! # Order Error Types
//!
//! Typed error handling for the bistro order lifecycle.
//! Cart, ledger and gateway operations return `Result<T, OrderError>`.

use thiserror::Error;

/// Core error type for cart, ledger and payment operations
#[derive(Debug, Error)]
pub enum OrderError {
    /// User record does not exist
    #[error("User not found: {user_id}")]
    UserNotFound { user_id: String },

    /// Order does not exist (never placed, or discarded after a failed payment)
    #[error("Order not found: {order_id}")]
    OrderNotFound { order_id: String },

    /// Missing, malformed or expired credential
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Valid credential, insufficient role
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Valid credential, someone else's order
    #[error("Order {order_id} is not owned by {user_id}")]
    NotOwner { order_id: String, user_id: String },

    /// Malformed input (empty order, zero quantity, amount mismatch, ...)
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Payment provider failed to create or describe a session
    #[error("Gateway error [{provider}]: {message}")]
    Gateway { provider: String, message: String },

    /// Order was already resolved by an earlier callback
    #[error("Order {order_id} already resolved: {message}")]
    ConflictOrRace { order_id: String, message: String },

    /// Configuration errors (missing keys, invalid values)
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Unexpected store failure
    #[error("Internal error: {0}")]
    Internal(String),
}

impl OrderError {
    pub fn gateway(provider: impl Into<String>, message: impl Into<String>) -> Self {
        OrderError::Gateway {
            provider: provider.into(),
            message: message.into(),
        }
    }

    pub fn order_not_found(order_id: impl Into<String>) -> Self {
        OrderError::OrderNotFound {
            order_id: order_id.into(),
        }
    }

    /// Returns the HTTP status code appropriate for this error
    pub fn status_code(&self) -> u16 {
        match self {
            OrderError::Validation(_) => 400,
            OrderError::Unauthorized(_) => 401,
            OrderError::Forbidden(_) => 403,
            OrderError::NotOwner { .. } => 403,
            OrderError::UserNotFound { .. } => 404,
            OrderError::OrderNotFound { .. } => 404,
            OrderError::ConflictOrRace { .. } => 409,
            OrderError::Gateway { .. } => 502,
            OrderError::Configuration(_) => 500,
            OrderError::Serialization(_) => 500,
            OrderError::Internal(_) => 500,
        }
    }

    /// Fixed, client-safe message. Internal detail stays in the logs.
    pub fn public_message(&self) -> &'static str {
        match self {
            OrderError::Validation(_) => "Invalid request",
            OrderError::Unauthorized(_) => "Not Authorized, Login Again",
            OrderError::Forbidden(_) => "You are not an admin",
            OrderError::NotOwner { .. } => "Not allowed",
            OrderError::UserNotFound { .. } => "User not found",
            OrderError::OrderNotFound { .. } => "Order not found",
            OrderError::ConflictOrRace { .. } => "Order already resolved",
            OrderError::Gateway { .. } => "Payment provider unavailable",
            OrderError::Configuration(_)
            | OrderError::Serialization(_)
            | OrderError::Internal(_) => "Error",
        }
    }
}

impl From<serde_json::Error> for OrderError {
    fn from(err: serde_json::Error) -> Self {
        OrderError::Serialization(err.to_string())
    }
}

/// Result type alias for order operations
pub type OrderResult<T> = Result<T, OrderError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(OrderError::Unauthorized("missing".into()).status_code(), 401);
        assert_eq!(OrderError::Forbidden("user".into()).status_code(), 403);
        assert_eq!(OrderError::order_not_found("x").status_code(), 404);
        assert_eq!(
            OrderError::ConflictOrRace {
                order_id: "x".into(),
                message: "paid".into()
            }
            .status_code(),
            409
        );
        assert_eq!(OrderError::gateway("stripe", "down").status_code(), 502);
    }

    #[test]
    fn test_public_message_hides_detail() {
        let err = OrderError::Internal("connection reset by peer at 10.0.0.3".into());
        assert_eq!(err.public_message(), "Error");
        assert!(!err.public_message().contains("10.0.0.3"));
    }
}
