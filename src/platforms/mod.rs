//! Remote platform integrations.
//!
//! Defines the narrow collaborator contracts consumed by the engine:
//! - [`MarketplaceApi`] — Mercado Libre: search, listing creation/update,
//!   token refresh
//! - [`StorefrontApi`] — Shopify: inventory reads and writes
//!
//! Implementors live in submodules; the engine only ever sees the traits,
//! which keeps every decision path testable against in-memory mocks.

pub mod meli;
pub mod shopify;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Marketplace
// ---------------------------------------------------------------------------

/// One item from a marketplace keyword search, in relevance order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchItem {
    pub id: String,
    pub title: String,
    pub price: f64,
    pub sold_quantity: i64,
    pub free_shipping: bool,
}

/// Payload for creating a listing.
#[derive(Debug, Clone, Serialize)]
pub struct ListingSpec {
    pub title: String,
    pub category_id: String,
    pub price: f64,
    pub currency_id: String,
    pub available_quantity: i64,
    pub condition: String,
    pub description: String,
    pub free_shipping: bool,
}

/// Successful listing creation.
#[derive(Debug, Clone, Deserialize)]
pub struct CreatedItem {
    pub id: String,
    pub permalink: Option<String>,
}

/// Partial update for a live listing. Only set fields are sent.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ItemPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub available_quantity: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

impl ItemPatch {
    pub fn price(value: f64) -> Self {
        Self {
            price: Some(value),
            ..Default::default()
        }
    }

    pub fn quantity(value: i64) -> Self {
        Self {
            available_quantity: Some(value),
            ..Default::default()
        }
    }

    pub fn status(value: &str) -> Self {
        Self {
            status: Some(value.to_string()),
            ..Default::default()
        }
    }
}

/// Abstraction over the marketplace.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MarketplaceApi: Send + Sync {
    /// Keyword search returning up to `limit` items in relevance order.
    async fn search_items(&self, keyword: &str, limit: u32) -> Result<Vec<SearchItem>>;

    /// Create a new listing. Fails on any non-2xx response.
    async fn create_item(&self, spec: &ListingSpec) -> Result<CreatedItem>;

    /// Patch a live listing (price, quantity, status).
    async fn update_item(&self, item_id: &str, patch: &ItemPatch) -> Result<()>;

    /// Refresh the OAuth access token.
    async fn refresh_token(&self) -> Result<()>;

    /// Platform name for logging and identification.
    fn name(&self) -> &str;
}

// ---------------------------------------------------------------------------
// Storefront
// ---------------------------------------------------------------------------

/// A storefront product with its variants (stock source of truth).
#[derive(Debug, Clone, Deserialize)]
pub struct StorefrontProduct {
    pub id: String,
    pub variants: Vec<StorefrontVariant>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorefrontVariant {
    pub id: i64,
    pub inventory_item_id: i64,
    pub inventory_quantity: i64,
}

/// Abstraction over the storefront.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait StorefrontApi: Send + Sync {
    /// Fetch a product with its variants. `None` when it no longer exists.
    async fn get_product(&self, product_id: &str) -> Result<Option<StorefrontProduct>>;

    /// Set the available quantity for an inventory item at a location.
    async fn update_inventory(
        &self,
        inventory_item_id: i64,
        location_id: &str,
        quantity: i64,
    ) -> Result<()>;

    fn name(&self) -> &str;
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_item_patch_serializes_only_set_fields() {
        let patch = ItemPatch::price(199.99);
        let json = serde_json::to_value(&patch).unwrap();
        assert_eq!(json, serde_json::json!({"price": 199.99}));

        let patch = ItemPatch::status("paused");
        let json = serde_json::to_value(&patch).unwrap();
        assert_eq!(json, serde_json::json!({"status": "paused"}));

        let patch = ItemPatch::quantity(7);
        let json = serde_json::to_value(&patch).unwrap();
        assert_eq!(json, serde_json::json!({"available_quantity": 7}));
    }

    #[test]
    fn test_search_item_deserialize() {
        let item: SearchItem = serde_json::from_value(serde_json::json!({
            "id": "MLM1",
            "title": "Cable USB-C",
            "price": 129.5,
            "sold_quantity": 40,
            "free_shipping": true,
        }))
        .unwrap();
        assert_eq!(item.id, "MLM1");
        assert!(item.free_shipping);
    }
}
