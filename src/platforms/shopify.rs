//! Shopify storefront integration.
//!
//! The storefront is the stock source of truth; the engine reads variant
//! inventory and occasionally writes corrected levels back.
//!
//! API docs: https://shopify.dev/docs/api/admin-rest
//! Auth: `X-Shopify-Access-Token` header.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tracing::debug;

use super::{StorefrontApi, StorefrontProduct, StorefrontVariant};
use crate::config::{AppConfig, StorefrontConfig};

const PLATFORM_NAME: &str = "shopify";

// ---------------------------------------------------------------------------
// API response types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct ShopifyProductEnvelope {
    product: ShopifyProduct,
}

#[derive(Debug, Deserialize)]
struct ShopifyProduct {
    id: i64,
    #[serde(default)]
    variants: Vec<ShopifyVariant>,
}

#[derive(Debug, Deserialize)]
struct ShopifyVariant {
    id: i64,
    #[serde(default)]
    inventory_item_id: i64,
    #[serde(default)]
    inventory_quantity: i64,
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Shopify Admin REST client.
pub struct ShopifyClient {
    http: Client,
    shop_url: String,
    api_version: String,
    access_token: SecretString,
    location_id: String,
}

impl ShopifyClient {
    /// Build the client from config, resolving secrets from the environment.
    pub fn from_config(cfg: &StorefrontConfig) -> Result<Self> {
        let shop_url = AppConfig::resolve_env(&cfg.shop_url_env)?;
        let access_token = AppConfig::resolve_env(&cfg.access_token_env)?;
        let location_id = AppConfig::resolve_env(&cfg.location_id_env)?;
        Self::new(shop_url, access_token, &cfg.api_version, location_id)
    }

    pub fn new(
        shop_url: String,
        access_token: String,
        api_version: &str,
        location_id: String,
    ) -> Result<Self> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .user_agent("LISTERO/0.1.0 (listing-automation)")
            .build()
            .context("Failed to build HTTP client for Shopify")?;

        Ok(Self {
            http,
            shop_url: shop_url.trim_end_matches('/').to_string(),
            api_version: api_version.to_string(),
            access_token: SecretString::new(access_token),
            location_id,
        })
    }

    /// The default inventory location configured for this shop.
    pub fn location_id(&self) -> &str {
        &self.location_id
    }

    fn url(&self, path: &str) -> String {
        format!(
            "https://{}/admin/api/{}/{}",
            self.shop_url, self.api_version, path
        )
    }
}

#[async_trait]
impl StorefrontApi for ShopifyClient {
    async fn get_product(&self, product_id: &str) -> Result<Option<StorefrontProduct>> {
        let url = self.url(&format!("products/{product_id}.json"));
        debug!(url = %url, "Fetching Shopify product");

        let resp = self
            .http
            .get(&url)
            .header("X-Shopify-Access-Token", self.access_token.expose_secret())
            .send()
            .await
            .context("Shopify product request failed")?;

        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("Shopify product error {status}: {body}");
        }

        let envelope: ShopifyProductEnvelope = resp
            .json()
            .await
            .context("Failed to parse Shopify product response")?;

        Ok(Some(StorefrontProduct {
            id: envelope.product.id.to_string(),
            variants: envelope
                .product
                .variants
                .into_iter()
                .map(|v| StorefrontVariant {
                    id: v.id,
                    inventory_item_id: v.inventory_item_id,
                    inventory_quantity: v.inventory_quantity,
                })
                .collect(),
        }))
    }

    async fn update_inventory(
        &self,
        inventory_item_id: i64,
        location_id: &str,
        quantity: i64,
    ) -> Result<()> {
        let body = serde_json::json!({
            "location_id": location_id,
            "inventory_item_id": inventory_item_id,
            "available": quantity,
        });

        let resp = self
            .http
            .post(self.url("inventory_levels/set.json"))
            .header("X-Shopify-Access-Token", self.access_token.expose_secret())
            .json(&body)
            .send()
            .await
            .context("Shopify inventory update request failed")?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("Shopify inventory update error {status}: {body}");
        }

        debug!(inventory_item_id, quantity, "Shopify inventory updated");
        Ok(())
    }

    fn name(&self) -> &str {
        PLATFORM_NAME
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
