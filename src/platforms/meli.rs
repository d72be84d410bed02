//! Mercado Libre marketplace integration.
//!
//! Covers the narrow surface the engine needs: public keyword search,
//! authenticated item creation/update, and OAuth token refresh.
//!
//! API docs: https://developers.mercadolibre.com/
//! Base URL: https://api.mercadolibre.com
//! Auth: `Authorization: Bearer {access_token}` for writes; search is public.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::{CreatedItem, ItemPatch, ListingSpec, MarketplaceApi, SearchItem};
use crate::config::{AppConfig, MarketplaceConfig};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

const BASE_URL: &str = "https://api.mercadolibre.com";
const PLATFORM_NAME: &str = "mercadolibre";

// ---------------------------------------------------------------------------
// API response types (Mercado Libre JSON → Rust)
// ---------------------------------------------------------------------------

/// `/sites/{site}/search` — we only deserialize the fields we need.
#[derive(Debug, Deserialize)]
struct MeliSearchResponse {
    #[serde(default)]
    results: Vec<MeliSearchResult>,
}

#[derive(Debug, Deserialize)]
struct MeliSearchResult {
    id: String,
    title: String,
    #[serde(default)]
    price: f64,
    #[serde(default)]
    sold_quantity: i64,
    #[serde(default)]
    shipping: MeliShipping,
}

#[derive(Debug, Default, Deserialize)]
struct MeliShipping {
    #[serde(default)]
    free_shipping: bool,
}

/// `/items` POST response.
#[derive(Debug, Deserialize)]
struct MeliItemResponse {
    id: String,
    #[serde(default)]
    permalink: Option<String>,
}

/// `/oauth/token` response.
#[derive(Debug, Deserialize)]
struct MeliTokenResponse {
    access_token: String,
    refresh_token: String,
    #[serde(default)]
    expires_in: u64,
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Mercado Libre platform client.
///
/// Tokens live behind an `RwLock` so the scheduled refresh job can rotate
/// them while other jobs keep issuing authenticated requests.
pub struct MeliClient {
    http: Client,
    site_id: String,
    app_id: String,
    secret_key: SecretString,
    access_token: RwLock<SecretString>,
    refresh_token: RwLock<SecretString>,
}

impl MeliClient {
    /// Build the client from config, resolving secrets from the environment.
    pub fn from_config(cfg: &MarketplaceConfig) -> Result<Self> {
        let app_id = AppConfig::resolve_env(&cfg.app_id_env)?;
        let secret_key = AppConfig::resolve_env(&cfg.secret_key_env)?;
        let access_token = AppConfig::resolve_env(&cfg.access_token_env)?;
        let refresh_token = AppConfig::resolve_env(&cfg.refresh_token_env)?;
        Self::new(&cfg.site_id, app_id, secret_key, access_token, refresh_token)
    }

    pub fn new(
        site_id: &str,
        app_id: String,
        secret_key: String,
        access_token: String,
        refresh_token: String,
    ) -> Result<Self> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .user_agent("LISTERO/0.1.0 (listing-automation)")
            .build()
            .context("Failed to build HTTP client for Mercado Libre")?;

        Ok(Self {
            http,
            site_id: site_id.to_string(),
            app_id,
            secret_key: SecretString::new(secret_key),
            access_token: RwLock::new(SecretString::new(access_token)),
            refresh_token: RwLock::new(SecretString::new(refresh_token)),
        })
    }

    async fn bearer(&self) -> String {
        self.access_token.read().await.expose_secret().clone()
    }
}

#[async_trait]
impl MarketplaceApi for MeliClient {
    async fn search_items(&self, keyword: &str, limit: u32) -> Result<Vec<SearchItem>> {
        let url = format!(
            "{BASE_URL}/sites/{}/search?q={}&limit={}",
            self.site_id,
            urlencoding::encode(keyword),
            limit,
        );
        debug!(url = %url, "Searching Mercado Libre");

        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .context("Mercado Libre search request failed")?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("Mercado Libre search error {status}: {body}");
        }

        let parsed: MeliSearchResponse = resp
            .json()
            .await
            .context("Failed to parse Mercado Libre search response")?;

        Ok(parsed
            .results
            .into_iter()
            .map(|r| SearchItem {
                id: r.id,
                title: r.title,
                price: r.price,
                sold_quantity: r.sold_quantity,
                free_shipping: r.shipping.free_shipping,
            })
            .collect())
    }

    async fn create_item(&self, spec: &ListingSpec) -> Result<CreatedItem> {
        let body = serde_json::json!({
            "title": spec.title,
            "category_id": spec.category_id,
            "price": spec.price,
            "currency_id": spec.currency_id,
            "available_quantity": spec.available_quantity,
            "buying_mode": "buy_it_now",
            "listing_type_id": "gold_special",
            "condition": spec.condition,
            "description": { "plain_text": spec.description },
            "shipping": {
                "mode": "me2",
                "free_shipping": spec.free_shipping,
            },
        });

        let resp = self
            .http
            .post(format!("{BASE_URL}/items"))
            .bearer_auth(self.bearer().await)
            .json(&body)
            .send()
            .await
            .context("Mercado Libre item creation request failed")?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("Mercado Libre item creation error {status}: {body}");
        }

        let item: MeliItemResponse = resp
            .json()
            .await
            .context("Failed to parse Mercado Libre item response")?;

        info!(item_id = %item.id, "Listing created on Mercado Libre");
        Ok(CreatedItem {
            id: item.id,
            permalink: item.permalink,
        })
    }

    async fn update_item(&self, item_id: &str, patch: &ItemPatch) -> Result<()> {
        let resp = self
            .http
            .put(format!("{BASE_URL}/items/{item_id}"))
            .bearer_auth(self.bearer().await)
            .json(patch)
            .send()
            .await
            .context("Mercado Libre item update request failed")?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("Mercado Libre item update error {status}: {body}");
        }

        debug!(item_id, "Listing updated on Mercado Libre");
        Ok(())
    }

    async fn refresh_token(&self) -> Result<()> {
        let current_refresh = self.refresh_token.read().await.expose_secret().clone();
        let params = [
            ("grant_type", "refresh_token"),
            ("client_id", self.app_id.as_str()),
            ("client_secret", self.secret_key.expose_secret().as_str()),
            ("refresh_token", current_refresh.as_str()),
        ];

        let resp = self
            .http
            .post(format!("{BASE_URL}/oauth/token"))
            .form(&params)
            .send()
            .await
            .context("Mercado Libre token refresh request failed")?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("Mercado Libre token refresh error {status}: {body}");
        }

        let token: MeliTokenResponse = resp
            .json()
            .await
            .context("Failed to parse Mercado Libre token response")?;

        *self.access_token.write().await = SecretString::new(token.access_token);
        *self.refresh_token.write().await = SecretString::new(token.refresh_token);

        if token.expires_in == 0 {
            warn!("Token refresh response carried no expiry");
        }
        info!(expires_in = token.expires_in, "Mercado Libre token refreshed");
        Ok(())
    }

    fn name(&self) -> &str {
        PLATFORM_NAME
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_search_response_parsing() {
        let raw = serde_json::json!({
            "site_id": "MLM",
            "results": [
                {
                    "id": "MLM100",
                    "title": "Cable USB-C 2m trenzado",
                    "price": 149.0,
                    "sold_quantity": 230,
                    "shipping": {"free_shipping": true}
                },
                {
                    "id": "MLM101",
                    "title": "Cable USB-C 1m",
                    "price": 89.0
                }
            ]
        });
        let parsed: MeliSearchResponse = serde_json::from_value(raw).unwrap();
        assert_eq!(parsed.results.len(), 2);
        assert!(parsed.results[0].shipping.free_shipping);
        // Missing shipping block defaults to paid shipping.
        assert!(!parsed.results[1].shipping.free_shipping);
        assert_eq!(parsed.results[1].sold_quantity, 0);
    }

    #[test]
    fn test_token_response_parsing() {
        let raw = serde_json::json!({
            "access_token": "APP_USR-abc",
            "token_type": "bearer",
            "expires_in": 21600,
            "refresh_token": "TG-def"
        });
        let parsed: MeliTokenResponse = serde_json::from_value(raw).unwrap();
        assert_eq!(parsed.access_token, "APP_USR-abc");
        assert_eq!(parsed.refresh_token, "TG-def");
        assert_eq!(parsed.expires_in, 21600);
    }

    #[test]
    fn test_client_name() {
        let client = MeliClient::new(
            "MLM",
            "app".into(),
            "secret".into(),
            "access".into(),
            "refresh".into(),
        )
        .unwrap();
        assert_eq!(client.name(), "mercadolibre");
    }
}
