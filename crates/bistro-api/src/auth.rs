//! # Authorization Gate
//!
//! Resolves the caller of a request into an [`Identity`].
//!
//! The credential is an HS256 JWT carrying the user id, sent either as
//! `Authorization: Bearer <jwt>` or in the legacy `token` header. The role is
//! read from the user store on every request, so a demotion takes effect on
//! the caller's next request.

use crate::response::ApiError;
use crate::state::AppState;
use axum::{extract::FromRequestParts, http::request::Parts, http::HeaderMap};
use bistro_core::{Identity, OrderError, OrderResult, Role};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Lifetime of issued tokens
pub const TOKEN_TTL_DAYS: i64 = 7;

/// Legacy credential header
pub const TOKEN_HEADER: &str = "token";

/// JWT claims
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// User id
    pub id: String,
    /// Expiry (seconds since epoch)
    pub exp: i64,
}

/// Signs and checks HS256 tokens
#[derive(Clone)]
pub struct TokenVerifier {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
}

impl TokenVerifier {
    pub fn new(secret: &str) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            validation: Validation::new(Algorithm::HS256),
        }
    }

    /// Issue a token for `user_id` valid for [`TOKEN_TTL_DAYS`]
    pub fn issue(&self, user_id: &str) -> OrderResult<String> {
        let claims = Claims {
            id: user_id.to_string(),
            exp: (Utc::now() + Duration::days(TOKEN_TTL_DAYS)).timestamp(),
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| OrderError::Internal(format!("token encoding failed: {}", e)))
    }

    /// The user id inside a valid, unexpired token
    pub fn verify(&self, token: &str) -> OrderResult<String> {
        let data = decode::<Claims>(token, &self.decoding, &self.validation)
            .map_err(|e| OrderError::Unauthorized(format!("invalid token: {}", e)))?;
        if data.claims.id.is_empty() {
            return Err(OrderError::Unauthorized("token has no user id".to_string()));
        }
        Ok(data.claims.id)
    }
}

/// Raw credential from `Authorization` (with or without `Bearer `) or `token`
pub fn extract_token(headers: &HeaderMap) -> Option<&str> {
    let raw = headers
        .get(axum::http::header::AUTHORIZATION)
        .or_else(|| headers.get(TOKEN_HEADER))
        .and_then(|v| v.to_str().ok())?
        .trim();
    let token = raw.strip_prefix("Bearer ").unwrap_or(raw).trim();
    (!token.is_empty()).then_some(token)
}

/// Resolve the caller. No credential → `Guest`; a bad one → `Unauthorized`.
///
/// A valid token for a user the store no longer knows still resolves to a
/// plain `User`, so user-scoped operations report `UserNotFound`.
pub async fn resolve_identity(state: &AppState, headers: &HeaderMap) -> OrderResult<Identity> {
    let Some(token) = extract_token(headers) else {
        return Ok(Identity::Guest);
    };
    let user_id = state.tokens.verify(token)?;
    let role = state
        .users
        .find(&user_id)
        .await?
        .map(|user| user.role)
        .unwrap_or(Role::User);

    debug!(user_id = %user_id, ?role, "caller resolved");
    Ok(Identity::from_role(user_id, role))
}

/// Extractor for the resolved caller.
///
/// ```rust,ignore
/// async fn handler(Caller(identity): Caller) -> impl IntoResponse { ... }
/// ```
pub struct Caller(pub Identity);

impl FromRequestParts<AppState> for Caller {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        resolve_identity(state, &parts.headers)
            .await
            .map(Caller)
            .map_err(ApiError::from)
    }
}
