//! # Cart Store
//!
//! Per-user item → quantity mapping persisted on the user record.
//!
//! Quantities are always positive: a decrement that would reach zero removes
//! the key. Every mutation is a read-modify-write of the whole cart field
//! with no concurrency token, so two concurrent mutations for the same user
//! can lose one of the updates (last write wins).

use crate::error::{OrderError, OrderResult};
use crate::store::UserRepository;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Item id → quantity
pub type CartData = BTreeMap<String, u32>;

/// Add one unit. Returns the new quantity.
pub fn increment(cart: &mut CartData, item_id: &str) -> u32 {
    let qty = cart.entry(item_id.to_string()).or_insert(0);
    *qty = qty.saturating_add(1);
    *qty
}

/// Remove one unit, dropping the key at zero. Returns the remaining quantity.
pub fn decrement(cart: &mut CartData, item_id: &str) -> u32 {
    match cart.get_mut(item_id) {
        Some(qty) if *qty > 1 => {
            *qty -= 1;
            *qty
        }
        _ => {
            cart.remove(item_id);
            0
        }
    }
}

/// Cart operations backed by the user store
#[derive(Clone)]
pub struct CartStore {
    users: Arc<dyn UserRepository>,
}

impl CartStore {
    pub fn new(users: Arc<dyn UserRepository>) -> Self {
        Self { users }
    }

    /// Increment `item_id` by one for `user_id`
    pub async fn add_item(&self, user_id: &str, item_id: &str) -> OrderResult<CartData> {
        self.mutate(user_id, |cart| {
            let qty = increment(cart, item_id);
            debug!(user_id, item_id, qty, "cart add");
        })
        .await
    }

    /// Decrement `item_id` by one for `user_id`
    pub async fn remove_item(&self, user_id: &str, item_id: &str) -> OrderResult<CartData> {
        self.mutate(user_id, |cart| {
            let qty = decrement(cart, item_id);
            debug!(user_id, item_id, qty, "cart remove");
        })
        .await
    }

    /// Current cart; a missing user has an empty cart
    pub async fn get_cart(&self, user_id: &str) -> OrderResult<CartData> {
        Ok(self
            .users
            .find(user_id)
            .await?
            .map(|user| user.cart_data)
            .unwrap_or_default())
    }

    /// Empty the cart. A missing user is not an error.
    pub async fn clear(&self, user_id: &str) -> OrderResult<()> {
        if !self.users.save_cart(user_id, CartData::new()).await? {
            warn!(user_id, "cart clear skipped: user not found");
        }
        Ok(())
    }

    async fn mutate<F>(&self, user_id: &str, apply: F) -> OrderResult<CartData>
    where
        F: FnOnce(&mut CartData),
    {
        let user = self
            .users
            .find(user_id)
            .await?
            .ok_or_else(|| OrderError::UserNotFound {
                user_id: user_id.to_string(),
            })?;

        let mut cart = user.cart_data;
        apply(&mut cart);

        // The user can vanish between read and write
        if !self.users.save_cart(user_id, cart.clone()).await? {
            return Err(OrderError::UserNotFound {
                user_id: user_id.to_string(),
            });
        }
        Ok(cart)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::Role;
    use crate::store::{MemoryUserRepository, UserRecord};

    fn store() -> CartStore {
        let users = MemoryUserRepository::with_users([UserRecord::new("u1", Role::User)]);
        CartStore::new(Arc::new(users))
    }

    #[tokio::test]
    async fn test_add_and_remove_sequence() {
        let carts = store();

        assert_eq!(carts.add_item("u1", "f1").await.unwrap().get("f1"), Some(&1));
        assert_eq!(carts.add_item("u1", "f1").await.unwrap().get("f1"), Some(&2));
        assert_eq!(carts.remove_item("u1", "f1").await.unwrap().get("f1"), Some(&1));

        let cart = carts.remove_item("u1", "f1").await.unwrap();
        assert!(cart.is_empty());
        assert!(!cart.contains_key("f1"));
        assert!(carts.get_cart("u1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_remove_missing_item_is_noop() {
        let carts = store();
        carts.add_item("u1", "f2").await.unwrap();

        let cart = carts.remove_item("u1", "f1").await.unwrap();
        assert_eq!(cart.len(), 1);
        assert!(!cart.contains_key("f1"));
    }

    #[tokio::test]
    async fn test_unknown_user() {
        let carts = store();

        assert!(matches!(
            carts.add_item("ghost", "f1").await,
            Err(OrderError::UserNotFound { .. })
        ));
        assert!(matches!(
            carts.remove_item("ghost", "f1").await,
            Err(OrderError::UserNotFound { .. })
        ));
        assert!(carts.get_cart("ghost").await.unwrap().is_empty());
        assert!(carts.clear("ghost").await.is_ok());
    }

    #[test]
    fn test_decrement_never_stores_zero() {
        let mut cart = CartData::new();
        assert_eq!(decrement(&mut cart, "f1"), 0);
        assert!(cart.is_empty());

        increment(&mut cart, "f1");
        assert_eq!(decrement(&mut cart, "f1"), 0);
        assert!(!cart.contains_key("f1"));
    }
}
