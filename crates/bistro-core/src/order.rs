//! # Order Types
//!
//! Orders, their line-item snapshots and fulfillment status.

use crate::catalog::Currency;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A line item captured at checkout
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderLineItem {
    /// Catalog id, when the client sent one
    #[serde(
        rename = "_id",
        alias = "itemId",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub item_id: Option<String>,

    /// Dish name (denormalized for display)
    pub name: String,

    /// Unit price in major units
    pub price: f64,

    pub quantity: u32,
}

impl OrderLineItem {
    pub fn new(name: impl Into<String>, price: f64, quantity: u32) -> Self {
        Self {
            item_id: None,
            name: name.into(),
            price,
            quantity,
        }
    }

    /// Builder: set catalog id
    pub fn with_item_id(mut self, item_id: impl Into<String>) -> Self {
        self.item_id = Some(item_id.into());
        self
    }

    /// Unit price in the currency's smallest unit
    pub fn unit_amount(&self, currency: Currency) -> i64 {
        currency.to_smallest_unit(self.price)
    }
}

/// Delivery address, stored exactly as the client sent it
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeliveryAddress(pub serde_json::Value);

impl From<&str> for DeliveryAddress {
    fn from(value: &str) -> Self {
        DeliveryAddress(serde_json::Value::String(value.to_string()))
    }
}

/// Fulfillment status.
///
/// The three known labels are variants; anything else an admin submits is
/// kept verbatim in `Custom`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum OrderStatus {
    FoodProcessing,
    OutForDelivery,
    Delivered,
    Custom(String),
}

impl OrderStatus {
    pub fn as_str(&self) -> &str {
        match self {
            OrderStatus::FoodProcessing => "Food Processing",
            OrderStatus::OutForDelivery => "Out for delivery",
            OrderStatus::Delivered => "Delivered",
            OrderStatus::Custom(label) => label,
        }
    }

    /// True for the three labels the admin console offers
    pub fn is_known(&self) -> bool {
        !matches!(self, OrderStatus::Custom(_))
    }
}

impl Default for OrderStatus {
    fn default() -> Self {
        OrderStatus::FoodProcessing
    }
}

impl From<String> for OrderStatus {
    fn from(value: String) -> Self {
        match value.as_str() {
            "Food Processing" => OrderStatus::FoodProcessing,
            "Out for delivery" => OrderStatus::OutForDelivery,
            "Delivered" => OrderStatus::Delivered,
            _ => OrderStatus::Custom(value),
        }
    }
}

impl From<&str> for OrderStatus {
    fn from(value: &str) -> Self {
        OrderStatus::from(value.to_string())
    }
}

impl From<OrderStatus> for String {
    fn from(status: OrderStatus) -> Self {
        match status {
            OrderStatus::Custom(label) => label,
            known => known.as_str().to_string(),
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A placed order.
///
/// `items` and `amount` are fixed at creation. Only `payment` and `status`
/// change afterwards, and only through the ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    #[serde(rename = "_id", alias = "id")]
    pub id: String,

    /// Owner
    pub user_id: String,

    pub items: Vec<OrderLineItem>,

    /// Total as submitted at checkout, delivery fee included
    pub amount: f64,

    pub address: DeliveryAddress,

    #[serde(default)]
    pub status: OrderStatus,

    #[serde(default)]
    pub payment: bool,

    /// Created timestamp
    pub date: DateTime<Utc>,
}

impl Order {
    /// Create a new pending order with generated ID
    pub fn new(
        user_id: impl Into<String>,
        items: Vec<OrderLineItem>,
        amount: f64,
        address: DeliveryAddress,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.into(),
            items,
            amount,
            address,
            status: OrderStatus::default(),
            payment: false,
            date: Utc::now(),
        }
    }

    pub fn is_owned_by(&self, user_id: &str) -> bool {
        self.user_id == user_id
    }
}
