//! Spreadsheet mirror.
//!
//! Periodic bulk export of product state and recent actions to a Google
//! Sheets spreadsheet via the values REST API. Strictly best-effort: the
//! scheduler logs failures and moves on; nothing here ever blocks a
//! decision.

use anyhow::{Context, Result};
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::config::{AppConfig, SheetsConfig};
use crate::types::{ActionRecord, Product};

const BASE_URL: &str = "https://sheets.googleapis.com/v4/spreadsheets";

/// Mirror client for one spreadsheet.
pub struct SheetsMirror {
    http: Client,
    spreadsheet_id: String,
    api_token: SecretString,
}

impl SheetsMirror {
    /// Build from config. Returns `None` when the mirror is disabled or its
    /// token is absent; the caller simply skips the job.
    pub fn from_config(cfg: &SheetsConfig) -> Result<Option<Self>> {
        if !cfg.enabled || cfg.spreadsheet_id.is_empty() {
            return Ok(None);
        }
        let Some(token_env) = &cfg.api_token_env else {
            return Ok(None);
        };
        let api_token = AppConfig::resolve_env(token_env)?;

        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .user_agent("LISTERO/0.1.0 (listing-automation)")
            .build()
            .context("Failed to build HTTP client for Sheets")?;

        Ok(Some(Self {
            http,
            spreadsheet_id: cfg.spreadsheet_id.clone(),
            api_token: SecretString::new(api_token),
        }))
    }

    /// Overwrite the Products and Actions sheets with the current state.
    pub async fn write_snapshot(
        &self,
        products: &[Product],
        actions: &[ActionRecord],
    ) -> Result<()> {
        self.write_range("Products!A1", product_rows(products)).await?;
        self.write_range("Actions!A1", action_rows(actions)).await?;
        info!(
            products = products.len(),
            actions = actions.len(),
            "Spreadsheet mirror updated"
        );
        Ok(())
    }

    async fn write_range(&self, range: &str, values: Vec<Vec<Value>>) -> Result<()> {
        let url = format!(
            "{BASE_URL}/{}/values/{}?valueInputOption=RAW",
            self.spreadsheet_id,
            urlencoding::encode(range),
        );
        debug!(range, rows = values.len(), "Writing sheet range");

        let resp = self
            .http
            .put(&url)
            .bearer_auth(self.api_token.expose_secret())
            .json(&json!({ "values": values }))
            .send()
            .await
            .context("Sheets values request failed")?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("Sheets values error {status}: {body}");
        }
        Ok(())
    }
}

fn product_rows(products: &[Product]) -> Vec<Vec<Value>> {
    let header = vec![
        json!("sku"),
        json!("name"),
        json!("status"),
        json!("score"),
        json!("item_id"),
        json!("price"),
        json!("margin"),
        json!("updated_at"),
    ];
    let mut rows = vec![header];
    rows.extend(products.iter().map(|p| {
        vec![
            json!(p.sku),
            json!(p.name),
            json!(p.status.as_str()),
            json!(p.score),
            json!(p.marketplace_item_id.clone().unwrap_or_default()),
            json!(p.final_price.unwrap_or(0.0)),
            json!(p.margin_percentage.unwrap_or(0.0)),
            json!(p.updated_at.to_rfc3339()),
        ]
    }));
    rows
}

fn action_rows(actions: &[ActionRecord]) -> Vec<Vec<Value>> {
    let header = vec![
        json!("created_at"),
        json!("product_id"),
        json!("action"),
        json!("reason"),
        json!("success"),
    ];
    let mut rows = vec![header];
    rows.extend(actions.iter().map(|a| {
        vec![
            json!(a.created_at.to_rfc3339()),
            json!(a.product_id.map(|id| id.to_string()).unwrap_or_default()),
            json!(a.action_type),
            json!(a.reason.clone().unwrap_or_default()),
            json!(a.success),
        ]
    }));
    rows
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_config_yields_none() {
        let cfg = SheetsConfig {
            enabled: false,
            spreadsheet_id: "abc".to_string(),
            api_token_env: Some("X".to_string()),
        };
        assert!(SheetsMirror::from_config(&cfg).unwrap().is_none());

        let cfg = SheetsConfig {
            enabled: true,
            spreadsheet_id: String::new(),
            api_token_env: Some("X".to_string()),
        };
        assert!(SheetsMirror::from_config(&cfg).unwrap().is_none());
    }

    #[test]
    fn test_product_rows_shape() {
        let product = crate::types::tests::sample_product();
        let rows = product_rows(&[product]);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0][0], json!("sku"));
        assert_eq!(rows[1][0], json!("SKU-001"));
        assert_eq!(rows[1][2], json!("pending"));
        // Unpriced products export zeros, not nulls.
        assert_eq!(rows[1][5], json!(0.0));
    }

    #[test]
    fn test_action_rows_shape() {
        let record = ActionRecord {
            id: 1,
            product_id: Some(7),
            action_type: "published".to_string(),
            reason: Some("score 85".to_string()),
            old_value: None,
            new_value: None,
            success: true,
            error_message: None,
            created_at: chrono::Utc::now(),
        };
        let rows = action_rows(&[record]);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1][1], json!("7"));
        assert_eq!(rows[1][2], json!("published"));
        assert_eq!(rows[1][4], json!(true));
    }
}
