//! # Catalog Types
//!
//! Menu lookup for amount computation and validation.
//! The bundled catalog is loaded from `config/menu.toml`.

use crate::cart::CartData;
use serde::{Deserialize, Serialize};

/// Supported currencies (ISO 4217)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Currency {
    USD,
    EUR,
    GBP,
    JPY,
    CAD,
    AUD,
    INR,
}

impl Currency {
    /// Returns the ISO 4217 currency code
    pub fn as_str(&self) -> &'static str {
        match self {
            Currency::USD => "usd",
            Currency::EUR => "eur",
            Currency::GBP => "gbp",
            Currency::JPY => "jpy",
            Currency::CAD => "cad",
            Currency::AUD => "aud",
            Currency::INR => "inr",
        }
    }

    /// Parse a lowercase or uppercase ISO code
    pub fn parse(code: &str) -> Option<Self> {
        match code.to_ascii_lowercase().as_str() {
            "usd" => Some(Currency::USD),
            "eur" => Some(Currency::EUR),
            "gbp" => Some(Currency::GBP),
            "jpy" => Some(Currency::JPY),
            "cad" => Some(Currency::CAD),
            "aud" => Some(Currency::AUD),
            "inr" => Some(Currency::INR),
            _ => None,
        }
    }

    /// Returns the number of decimal places for this currency
    /// (JPY has 0 decimals, most others have 2)
    pub fn decimal_places(&self) -> u8 {
        match self {
            Currency::JPY => 0,
            _ => 2,
        }
    }

    /// Convert a decimal amount to the smallest currency unit (cents, etc.)
    pub fn to_smallest_unit(&self, amount: f64) -> i64 {
        let multiplier = 10_f64.powi(self.decimal_places() as i32);
        (amount * multiplier).round() as i64
    }
}

impl Default for Currency {
    fn default() -> Self {
        Currency::USD
    }
}

impl std::fmt::Display for Currency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str().to_uppercase())
    }
}

/// A dish on the menu
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MenuItem {
    /// Catalog id (the key used in carts)
    pub id: String,

    /// Display name
    pub name: String,

    /// Unit price in major units (e.g. dollars)
    pub price: f64,

    #[serde(default)]
    pub category: String,

    /// Whether this dish can currently be ordered
    #[serde(default = "default_true")]
    pub active: bool,
}

fn default_true() -> bool {
    true
}

impl MenuItem {
    pub fn new(id: impl Into<String>, name: impl Into<String>, price: f64) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            price,
            category: String::new(),
            active: true,
        }
    }

    /// Builder: set category
    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }
}

/// Resolves item ids to prices and names.
///
/// The catalog is owned elsewhere; items may disappear between the moment a
/// customer adds them to a cart and the moment a total is computed.
pub trait CatalogLookup: Send + Sync {
    /// Find an item by id. Inactive items still resolve; callers check `active`.
    fn resolve(&self, item_id: &str) -> Option<MenuItem>;
}

/// In-memory menu (loaded from config)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MenuCatalog {
    #[serde(default)]
    pub items: Vec<MenuItem>,
}

impl MenuCatalog {
    /// Create an empty catalog
    pub fn new() -> Self {
        Self { items: Vec::new() }
    }

    /// Add an item to the catalog
    pub fn add(&mut self, item: MenuItem) {
        self.items.push(item);
    }

    /// Builder: add an item
    pub fn with_item(mut self, item: MenuItem) -> Self {
        self.add(item);
        self
    }

    /// Find an item by id
    pub fn get(&self, id: &str) -> Option<&MenuItem> {
        self.items.iter().find(|i| i.id == id)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Load catalog from TOML string
    pub fn from_toml(toml_str: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(toml_str)
    }
}

impl CatalogLookup for MenuCatalog {
    fn resolve(&self, item_id: &str) -> Option<MenuItem> {
        self.get(item_id).cloned()
    }
}

/// Sum `price × quantity` over a cart, skipping ids the catalog cannot resolve.
pub fn cart_total(cart: &CartData, catalog: &dyn CatalogLookup) -> f64 {
    cart.iter()
        .filter(|(_, qty)| **qty > 0)
        .filter_map(|(id, qty)| catalog.resolve(id).map(|item| item.price * f64::from(*qty)))
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn menu() -> MenuCatalog {
        MenuCatalog::new()
            .with_item(MenuItem::new("f1", "Pizza", 10.0).with_category("Mains"))
            .with_item(MenuItem::new("f2", "Salad", 4.5))
    }

    #[test]
    fn test_currency_conversion() {
        let usd = Currency::USD;
        assert_eq!(usd.to_smallest_unit(10.99), 1099);

        let jpy = Currency::JPY;
        assert_eq!(jpy.to_smallest_unit(1000.0), 1000);
        assert_eq!(Currency::parse("USD"), Some(Currency::USD));
        assert_eq!(Currency::parse("xyz"), None);
    }

    #[test]
    fn test_cart_total_skips_unknown_items() {
        let mut cart = CartData::new();
        cart.insert("f1".into(), 2);
        cart.insert("f2".into(), 1);
        cart.insert("deleted".into(), 5);

        assert_eq!(cart_total(&cart, &menu()), 24.5);
    }

    #[test]
    fn test_catalog_from_toml() {
        let catalog = MenuCatalog::from_toml(
            r#"
            [[items]]
            id = "f1"
            name = "Pizza"
            price = 10.0
            category = "Mains"

            [[items]]
            id = "f9"
            name = "Old Soup"
            price = 3.0
            active = false
            "#,
        )
        .unwrap();

        assert_eq!(catalog.len(), 2);
        assert!(catalog.get("f1").unwrap().active);
        assert!(!catalog.resolve("f9").unwrap().active);
    }
}
