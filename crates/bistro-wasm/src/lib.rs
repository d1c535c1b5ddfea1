//! # bistro-wasm
//!
//! WebAssembly bindings for the storefront cart.
//!
//! The browser keeps an optimistic copy of the cart so the UI updates before
//! the `/api/cart/add` or `/api/cart/remove` round trip finishes. The copy
//! applies the same rules as the server (quantities stay positive, a key is
//! dropped when it reaches zero) and is replaced wholesale by the server's
//! view after each sync.
//!
//! ## Usage (JavaScript)
//!
//! ```javascript
//! import init, { WasmCart } from 'bistro-wasm';
//!
//! await init();
//!
//! const cart = new WasmCart();
//! cart.set_menu(menuItems);
//! cart.add('f1');
//! await fetch('/api/cart/add', { ... });
//! cart.replace((await getCart()).cartData);
//!
//! console.log('Total:', cart.total());
//! ```
//!
//! ## Building
//!
//! ```bash
//! wasm-pack build --target web
//! ```

use bistro_core::cart::{decrement, increment};
use bistro_core::{cart_total, CartData, Currency, MenuCatalog, MenuItem};
use wasm_bindgen::prelude::*;

/// Initialize the WASM module (called automatically)
#[wasm_bindgen(start)]
pub fn init() {}

/// Client-side cart mirror
#[wasm_bindgen]
#[derive(Debug, Default)]
pub struct WasmCart {
    items: CartData,
    menu: MenuCatalog,
}

#[wasm_bindgen]
impl WasmCart {
    #[wasm_bindgen(constructor)]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the menu used for totals (array of `{id, name, price}`)
    pub fn set_menu(&mut self, items: JsValue) -> Result<(), JsValue> {
        let items: Vec<MenuItem> = serde_wasm_bindgen::from_value(items)
            .map_err(|e| JsValue::from_str(&format!("Invalid menu: {}", e)))?;
        self.menu = MenuCatalog { items };
        Ok(())
    }

    /// Optimistic add; returns the new quantity
    pub fn add(&mut self, item_id: &str) -> u32 {
        increment(&mut self.items, item_id)
    }

    /// Optimistic remove; returns the remaining quantity
    pub fn remove(&mut self, item_id: &str) -> u32 {
        decrement(&mut self.items, item_id)
    }

    pub fn quantity(&self, item_id: &str) -> u32 {
        self.items.get(item_id).copied().unwrap_or(0)
    }

    /// Adopt the server's `cartData`
    pub fn replace(&mut self, cart_data: JsValue) -> Result<(), JsValue> {
        let cart: CartData = serde_wasm_bindgen::from_value(cart_data)
            .map_err(|e| JsValue::from_str(&format!("Invalid cart: {}", e)))?;
        self.replace_with(cart);
        Ok(())
    }

    /// Current cart as a plain object
    pub fn to_js(&self) -> Result<JsValue, JsValue> {
        serde_wasm_bindgen::to_value(&self.items)
            .map_err(|e| JsValue::from_str(&format!("Serialization failed: {}", e)))
    }

    /// Subtotal in major units; items missing from the menu are skipped
    pub fn total(&self) -> f64 {
        cart_total(&self.items, &self.menu)
    }

    /// Subtotal plus delivery, or zero for an empty cart
    pub fn total_with_delivery(&self, delivery_fee: f64) -> f64 {
        let subtotal = self.total();
        if subtotal == 0.0 {
            0.0
        } else {
            subtotal + delivery_fee
        }
    }

    pub fn item_count(&self) -> u32 {
        self.items.values().sum()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }
}

impl WasmCart {
    /// Drops zero quantities the server should never send
    fn replace_with(&mut self, mut cart: CartData) {
        cart.retain(|_, qty| *qty > 0);
        self.items = cart;
    }
}

/// Format an amount in major units for display
#[wasm_bindgen]
pub fn format_price(amount: f64, currency: &str) -> String {
    let currency = Currency::parse(currency).unwrap_or_default();
    let decimals = usize::from(currency.decimal_places());
    format!("{:.*} {}", decimals, amount, currency)
}

/// Get library version
#[wasm_bindgen]
pub fn version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}
