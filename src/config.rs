//! Configuration loading from TOML with environment variable resolution.
//!
//! Reads `config.toml` and deserializes into strongly-typed structs.
//! Secrets (API tokens) are referenced by env-var name in the config and
//! resolved at runtime via `std::env::var`. Business-rule constants live in
//! a single immutable [`BusinessRules`] value that is passed explicitly into
//! every pure function; nothing reads thresholds from ambient state.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub app: AppSection,
    pub database: DatabaseConfig,
    pub marketplace: MarketplaceConfig,
    pub storefront: StorefrontConfig,
    pub rules: BusinessRules,
    pub jobs: JobsConfig,
    pub sheets: SheetsConfig,
    pub alerts: AlertsConfig,
    pub dashboard: DashboardConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppSection {
    pub name: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct MarketplaceConfig {
    pub enabled: bool,
    /// Marketplace site, e.g. "MLM" for Mexico.
    pub site_id: String,
    pub currency_id: String,
    /// Fallback category when a product has no marketplace category mapped.
    pub default_category_id: String,
    pub app_id_env: String,
    pub secret_key_env: String,
    pub access_token_env: String,
    pub refresh_token_env: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorefrontConfig {
    pub enabled: bool,
    pub shop_url_env: String,
    pub access_token_env: String,
    pub api_version: String,
    pub location_id_env: String,
}

/// Business-rule constants for pricing, scoring, optimization and A/B tests.
///
/// Loaded once at process start; the engine passes a reference into every
/// decision function.
#[derive(Debug, Deserialize, Clone)]
pub struct BusinessRules {
    /// Default marketplace commission when no category-level figure is known.
    pub commission_percentage: f64,
    /// Sales tax applied on top of the pre-tax price.
    pub iva_percentage: f64,
    /// Income-tax retention treated as a cost rate alongside commission.
    pub isr_percentage: f64,
    pub min_margin_percentage: f64,
    pub ideal_margin_percentage: f64,

    /// Score at or above which a product is approved and auto-published.
    pub score_auto_publish: i64,
    /// Score at or above which a product goes to manual approval.
    pub score_needs_approval: i64,

    pub pause_no_sales_days: i64,
    pub pause_min_visits: i64,
    pub pause_min_ctr: f64,
    pub price_reduction_percentage: f64,
    pub ads_min_sales: i64,
    pub ads_min_margin: f64,
    pub ads_min_ctr: f64,
    pub ads_min_roas: f64,
    pub scale_min_sales_7d: i64,
    pub scale_min_conversion: f64,
    pub scale_min_stock: i64,

    pub ab_test_duration_days: i64,
    pub ab_test_min_visits: i64,
    pub ab_test_min_sales: i64,

    /// Free-shipping share above which the analyzer recommends offering it.
    pub free_shipping_threshold_pct: f64,
}

impl Default for BusinessRules {
    fn default() -> Self {
        Self {
            commission_percentage: 13.0,
            iva_percentage: 16.0,
            isr_percentage: 1.0,
            min_margin_percentage: 30.0,
            ideal_margin_percentage: 40.0,
            score_auto_publish: 80,
            score_needs_approval: 50,
            pause_no_sales_days: 14,
            pause_min_visits: 50,
            pause_min_ctr: 0.5,
            price_reduction_percentage: 10.0,
            ads_min_sales: 5,
            ads_min_margin: 35.0,
            ads_min_ctr: 1.5,
            ads_min_roas: 3.0,
            scale_min_sales_7d: 10,
            scale_min_conversion: 2.0,
            scale_min_stock: 20,
            ab_test_duration_days: 7,
            ab_test_min_visits: 100,
            ab_test_min_sales: 5,
            free_shipping_threshold_pct: 70.0,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct JobsConfig {
    /// How often the scheduler wakes up to check for due jobs.
    pub check_interval_secs: u64,
    pub token_refresh_hours: u64,
    pub sync_stock_minutes: u64,
    pub metrics_rollup_hours: u64,
    /// 6-field cron expression (seconds first).
    pub optimize_cron: String,
    pub ab_evaluation_cron: String,
    pub sheets_mirror_minutes: u64,
    pub auto_publish_minutes: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SheetsConfig {
    pub enabled: bool,
    pub spreadsheet_id: String,
    pub api_token_env: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AlertsConfig {
    pub telegram_bot_token_env: Option<String>,
    pub telegram_chat_id_env: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DashboardConfig {
    pub enabled: bool,
    pub port: u16,
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        let config: AppConfig = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {path}"))?;
        Ok(config)
    }

    /// Resolve an environment variable name to its value.
    /// Useful for loading secrets referenced in the config.
    pub fn resolve_env(env_name: &str) -> Result<String> {
        std::env::var(env_name)
            .with_context(|| format!("Environment variable not set: {env_name}"))
    }
}
