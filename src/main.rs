//! LISTERO — Autonomous marketplace listing automation engine.
//!
//! Entry point. Loads configuration, initialises structured logging, opens
//! the catalog store, wires the remote clients into the decision engine,
//! and runs the job scheduler with graceful shutdown.

use anyhow::Result;
use std::sync::Arc;
use tracing::{info, warn};

use listero::config::AppConfig;
use listero::engine::abtest::AbTestEvaluator;
use listero::engine::optimizer::Optimizer;
use listero::engine::Engine;
use listero::jobs::{JobContext, Scheduler};
use listero::notify::Notifier;
use listero::platforms::meli::MeliClient;
use listero::platforms::shopify::ShopifyClient;
use listero::platforms::{MarketplaceApi, StorefrontApi};
use listero::sheets::SheetsMirror;
use listero::storage::CatalogStore;

const BANNER: &str = r#"
 _     ___ ____ _____ _____ ____   ___
| |   |_ _/ ___|_   _| ____|  _ \ / _ \
| |    | |\___ \ | | |  _| | |_) | | | |
| |___ | | ___) || | | |___|  _ <| |_| |
|_____|___|____/ |_| |_____|_| \_\\___/

  Marketplace Listing Automation Engine
  v0.1.0
"#;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    // Load configuration from TOML
    let cfg = AppConfig::load("config.toml")?;

    // Initialise structured logging
    init_logging();

    println!("{BANNER}");
    info!(
        app_name = %cfg.app.name,
        site = %cfg.marketplace.site_id,
        "LISTERO starting up"
    );

    // -- Storage ---------------------------------------------------------

    let store = CatalogStore::connect(&cfg.database.url).await?;

    // -- Platform clients ------------------------------------------------

    if !cfg.marketplace.enabled {
        anyhow::bail!("The marketplace client is required; enable [marketplace] in config.toml");
    }
    let marketplace: Arc<dyn MarketplaceApi> = Arc::new(MeliClient::from_config(&cfg.marketplace)?);

    let (storefront, storefront_location): (Option<Arc<dyn StorefrontApi>>, Option<String>) =
        if cfg.storefront.enabled {
            let client = ShopifyClient::from_config(&cfg.storefront)?;
            let location = client.location_id().to_string();
            (Some(Arc::new(client)), Some(location))
        } else {
            warn!("Storefront disabled; stock sync will be a no-op");
            (None, None)
        };

    // -- Engine ----------------------------------------------------------

    let notifier = Notifier::from_config(&cfg.alerts);
    let sheets = SheetsMirror::from_config(&cfg.sheets)?;

    let engine = Engine::new(
        store.clone(),
        Arc::clone(&marketplace),
        storefront,
        storefront_location,
        notifier.clone(),
        cfg.rules.clone(),
        cfg.marketplace.currency_id.clone(),
        cfg.marketplace.default_category_id.clone(),
    );
    let optimizer = Optimizer::new(
        store.clone(),
        Arc::clone(&marketplace),
        notifier.clone(),
        cfg.rules.clone(),
    );
    let ab_tests = AbTestEvaluator::new(
        store.clone(),
        Arc::clone(&marketplace),
        notifier.clone(),
        cfg.rules.clone(),
    );

    // -- Dashboard -------------------------------------------------------

    if cfg.dashboard.enabled {
        listero::dashboard::spawn_dashboard(store.clone(), cfg.dashboard.port);
    }

    // -- Scheduler -------------------------------------------------------

    let ctx = Arc::new(JobContext {
        engine,
        optimizer,
        ab_tests,
        marketplace,
        notifier,
        sheets,
        store,
    });
    let scheduler = Scheduler::from_config(&cfg.jobs, ctx)?;

    info!("Entering scheduler loop. Press Ctrl+C to stop.");
    scheduler
        .run(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown signal received.");
        })
        .await;

    info!("LISTERO shut down cleanly.");
    Ok(())
}

/// Initialise the `tracing` subscriber.
fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("listero=info"));

    let json_logging = std::env::var("LISTERO_LOG_JSON").is_ok();

    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt().with_env_filter(env_filter).with_target(true).init();
    }
}
