//! # Caller Identity
//!
//! The resolved identity of whoever is making a request. It is computed once
//! per request by the authorization gate and passed explicitly into every
//! ledger and cart operation.

use crate::error::{OrderError, OrderResult};
use serde::{Deserialize, Serialize};

/// Role stored on the user record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Admin,
}

impl Default for Role {
    fn default() -> Self {
        Role::User
    }
}

/// Who is calling
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Identity {
    /// No credential presented
    Guest,
    /// Authenticated customer
    User { user_id: String },
    /// Authenticated administrator
    Admin { user_id: String },
}

impl Identity {
    /// Build an identity from a verified user id and its current role
    pub fn from_role(user_id: impl Into<String>, role: Role) -> Self {
        match role {
            Role::User => Identity::User {
                user_id: user_id.into(),
            },
            Role::Admin => Identity::Admin {
                user_id: user_id.into(),
            },
        }
    }

    pub fn user_id(&self) -> Option<&str> {
        match self {
            Identity::Guest => None,
            Identity::User { user_id } | Identity::Admin { user_id } => Some(user_id),
        }
    }

    pub fn is_admin(&self) -> bool {
        matches!(self, Identity::Admin { .. })
    }

    /// Any authenticated caller; guests are `Unauthorized`
    pub fn require_user(&self) -> OrderResult<&str> {
        self.user_id()
            .ok_or_else(|| OrderError::Unauthorized("credential required".to_string()))
    }

    /// Admin callers only; guests are `Unauthorized`, users `Forbidden`
    pub fn require_admin(&self) -> OrderResult<&str> {
        let user_id = self.require_user()?;
        if self.is_admin() {
            Ok(user_id)
        } else {
            Err(OrderError::Forbidden(format!("user {} is not an admin", user_id)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_gating() {
        let guest = Identity::Guest;
        let user = Identity::from_role("u1", Role::User);
        let admin = Identity::from_role("a1", Role::Admin);

        assert!(matches!(guest.require_user(), Err(OrderError::Unauthorized(_))));
        assert!(matches!(guest.require_admin(), Err(OrderError::Unauthorized(_))));
        assert_eq!(user.require_user().unwrap(), "u1");
        assert!(matches!(user.require_admin(), Err(OrderError::Forbidden(_))));
        assert_eq!(admin.require_admin().unwrap(), "a1");
    }
}
