//! # Persistence
//!
//! Repository traits for users (and their carts) and orders, plus in-memory
//! implementations. Postgres implementations live in the `postgres` module
//! behind the feature of the same name. Each call is a single record operation;
//! callers get no cross-record atomicity.

use crate::cart::CartData;
use crate::error::OrderError;
use crate::identity::Role;
use crate::order::{Order, OrderStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::RwLock;

/// Store-level failure
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("duplicate key: {0}")]
    Duplicate(String),

    /// A stored value no longer parses
    #[error("corrupt record: {0}")]
    Corrupt(String),
}

impl From<StoreError> for OrderError {
    fn from(err: StoreError) -> Self {
        OrderError::Internal(err.to_string())
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// The slice of a user document this subsystem reads and writes
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRecord {
    #[serde(rename = "_id", alias = "id")]
    pub id: String,

    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub email: String,

    #[serde(default)]
    pub role: Role,

    #[serde(default)]
    pub cart_data: CartData,
}

impl UserRecord {
    pub fn new(id: impl Into<String>, role: Role) -> Self {
        Self {
            id: id.into(),
            name: String::new(),
            email: String::new(),
            role,
            cart_data: CartData::new(),
        }
    }
}

#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn find(&self, user_id: &str) -> StoreResult<Option<UserRecord>>;

    /// Overwrite the whole cart field. Returns false when the user is missing.
    async fn save_cart(&self, user_id: &str, cart: CartData) -> StoreResult<bool>;

    async fn upsert(&self, user: UserRecord) -> StoreResult<()>;
}

/// Result of trying to delete an unpaid order
#[derive(Debug, Clone, PartialEq)]
pub enum DiscardOutcome {
    Deleted(Order),
    /// Left in place: payment already confirmed
    AlreadyPaid,
    Missing,
}

#[async_trait]
pub trait OrderRepository: Send + Sync {
    async fn insert(&self, order: Order) -> StoreResult<()>;

    async fn get(&self, order_id: &str) -> StoreResult<Option<Order>>;

    /// Orders for one owner, insertion order
    async fn list_by_owner(&self, user_id: &str) -> StoreResult<Vec<Order>>;

    /// Every order, insertion order
    async fn list_all(&self) -> StoreResult<Vec<Order>>;

    /// Set `payment = true`. `None` if missing, otherwise whether it was already set.
    async fn mark_paid(&self, order_id: &str) -> StoreResult<Option<bool>>;

    /// Delete the order only while `payment` is still false
    async fn delete_unpaid(&self, order_id: &str) -> StoreResult<DiscardOutcome>;

    /// Returns false if the order is missing
    async fn set_status(&self, order_id: &str, status: OrderStatus) -> StoreResult<bool>;

    /// Unpaid orders created strictly before `cutoff`
    async fn pending_before(&self, cutoff: DateTime<Utc>) -> StoreResult<Vec<Order>>;
}

// =============================================================================
// In-memory implementations
// =============================================================================

#[derive(Debug, Default)]
pub struct MemoryUserRepository {
    users: RwLock<HashMap<String, UserRecord>>,
}

impl MemoryUserRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed with users (builder)
    pub fn with_users(users: impl IntoIterator<Item = UserRecord>) -> Self {
        Self {
            users: RwLock::new(users.into_iter().map(|u| (u.id.clone(), u)).collect()),
        }
    }
}

#[async_trait]
impl UserRepository for MemoryUserRepository {
    async fn find(&self, user_id: &str) -> StoreResult<Option<UserRecord>> {
        Ok(self.users.read().await.get(user_id).cloned())
    }

    async fn save_cart(&self, user_id: &str, cart: CartData) -> StoreResult<bool> {
        let mut users = self.users.write().await;
        match users.get_mut(user_id) {
            Some(user) => {
                user.cart_data = cart;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn upsert(&self, user: UserRecord) -> StoreResult<()> {
        self.users.write().await.insert(user.id.clone(), user);
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct MemoryOrderRepository {
    orders: RwLock<Vec<Order>>,
}

impl MemoryOrderRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl OrderRepository for MemoryOrderRepository {
    async fn insert(&self, order: Order) -> StoreResult<()> {
        let mut orders = self.orders.write().await;
        if orders.iter().any(|o| o.id == order.id) {
            return Err(StoreError::Duplicate(order.id));
        }
        orders.push(order);
        Ok(())
    }

    async fn get(&self, order_id: &str) -> StoreResult<Option<Order>> {
        Ok(self
            .orders
            .read()
            .await
            .iter()
            .find(|o| o.id == order_id)
            .cloned())
    }

    async fn list_by_owner(&self, user_id: &str) -> StoreResult<Vec<Order>> {
        Ok(self
            .orders
            .read()
            .await
            .iter()
            .filter(|o| o.is_owned_by(user_id))
            .cloned()
            .collect())
    }

    async fn list_all(&self) -> StoreResult<Vec<Order>> {
        Ok(self.orders.read().await.clone())
    }

    async fn mark_paid(&self, order_id: &str) -> StoreResult<Option<bool>> {
        let mut orders = self.orders.write().await;
        Ok(orders.iter_mut().find(|o| o.id == order_id).map(|order| {
            let was_paid = order.payment;
            order.payment = true;
            was_paid
        }))
    }

    async fn delete_unpaid(&self, order_id: &str) -> StoreResult<DiscardOutcome> {
        let mut orders = self.orders.write().await;
        let Some(index) = orders.iter().position(|o| o.id == order_id) else {
            return Ok(DiscardOutcome::Missing);
        };
        if orders[index].payment {
            return Ok(DiscardOutcome::AlreadyPaid);
        }
        Ok(DiscardOutcome::Deleted(orders.remove(index)))
    }

    async fn set_status(&self, order_id: &str, status: OrderStatus) -> StoreResult<bool> {
        let mut orders = self.orders.write().await;
        match orders.iter_mut().find(|o| o.id == order_id) {
            Some(order) => {
                order.status = status;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn pending_before(&self, cutoff: DateTime<Utc>) -> StoreResult<Vec<Order>> {
        Ok(self
            .orders
            .read()
            .await
            .iter()
            .filter(|o| !o.payment && o.date < cutoff)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::order::{DeliveryAddress, OrderLineItem};

    fn order(user: &str) -> Order {
        Order::new(
            user,
            vec![OrderLineItem::new("Pizza", 10.0, 1)],
            12.0,
            DeliveryAddress::from("1 Main St"),
        )
    }

    #[tokio::test]
    async fn test_orders_keep_insertion_order() {
        let repo = MemoryOrderRepository::new();
        let first = order("u1");
        let second = order("u2");
        let third = order("u1");
        repo.insert(first.clone()).await.unwrap();
        repo.insert(second.clone()).await.unwrap();
        repo.insert(third.clone()).await.unwrap();

        let mine: Vec<_> = repo
            .list_by_owner("u1")
            .await
            .unwrap()
            .into_iter()
            .map(|o| o.id)
            .collect();
        assert_eq!(mine, vec![first.id, third.id]);
        assert_eq!(repo.list_all().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_duplicate_insert_rejected() {
        let repo = MemoryOrderRepository::new();
        let o = order("u1");
        repo.insert(o.clone()).await.unwrap();
        assert!(matches!(repo.insert(o).await, Err(StoreError::Duplicate(_))));
    }

    #[tokio::test]
    async fn test_delete_unpaid_leaves_paid_orders() {
        let repo = MemoryOrderRepository::new();
        let o = order("u1");
        repo.insert(o.clone()).await.unwrap();

        assert_eq!(repo.mark_paid(&o.id).await.unwrap(), Some(false));
        assert_eq!(repo.mark_paid(&o.id).await.unwrap(), Some(true));
        assert_eq!(
            repo.delete_unpaid(&o.id).await.unwrap(),
            DiscardOutcome::AlreadyPaid
        );
        assert!(repo.get(&o.id).await.unwrap().is_some());
        assert_eq!(
            repo.delete_unpaid("missing").await.unwrap(),
            DiscardOutcome::Missing
        );
    }

    #[tokio::test]
    async fn test_save_cart_for_missing_user() {
        let repo = MemoryUserRepository::new();
        assert!(!repo.save_cart("ghost", CartData::new()).await.unwrap());
    }
}
