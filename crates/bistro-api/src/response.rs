//! # Response Envelope
//!
//! Every response body is `{success, message?, ...}`. Failures carry a fixed
//! message from [`OrderError::public_message`]; the detail only reaches the log.

use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use bistro_core::OrderError;
use serde::Serialize;
use tracing::{error, warn};

/// Error response body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub message: String,
}

impl ErrorResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

/// Handler error: an [`OrderError`] rendered through the envelope
#[derive(Debug)]
pub struct ApiError(pub OrderError);

impl From<OrderError> for ApiError {
    fn from(err: OrderError) -> Self {
        ApiError(err)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError(OrderError::Validation(rejection.body_text()))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let code = self.0.status_code();
        let status = StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        if status.is_server_error() {
            error!(status = code, error = %self.0, "request failed");
        } else {
            warn!(status = code, error = %self.0, "request rejected");
        }

        (status, Json(ErrorResponse::new(self.0.public_message()))).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

/// `{success: true, message}`
#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub success: bool,
    pub message: &'static str,
}

impl MessageResponse {
    pub fn ok(message: &'static str) -> Json<Self> {
        Json(Self {
            success: true,
            message,
        })
    }

    pub fn failed(message: &'static str) -> Json<Self> {
        Json(Self {
            success: false,
            message,
        })
    }
}

/// `{success: true, data}`
#[derive(Debug, Serialize)]
pub struct DataResponse<T> {
    pub success: bool,
    pub data: T,
}

impl<T: Serialize> DataResponse<T> {
    pub fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data,
        })
    }
}
