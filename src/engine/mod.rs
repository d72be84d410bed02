//! Decision engine — product lifecycle orchestration.
//!
//! Pipelines intake → pricing → scoring → lifecycle gate → publication,
//! plus storefront stock reconciliation and the sweep entry points the job
//! scheduler calls. Pure computation lives in `pricing` and `scoring`;
//! this layer wires it to the catalog store and the remote platforms.

pub mod abtest;
pub mod optimizer;

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::config::BusinessRules;
use crate::notify::Notifier;
use crate::platforms::{ItemPatch, ListingSpec, MarketplaceApi, StorefrontApi};
use crate::pricing;
use crate::scoring;
use crate::storage::CatalogStore;
use crate::types::{
    ActionEntry, ActionKind, CompetitionLevel, EvaluationOutcome, NewProduct, Product,
    ProductMetrics, ProductStatus, PublishOutcome,
};

/// Marketplace title limit.
const MAX_TITLE_LEN: usize = 60;

/// Lifecycle engine. Cheap to clone pieces; instantiate once and share.
pub struct Engine {
    store: CatalogStore,
    marketplace: Arc<dyn MarketplaceApi>,
    storefront: Option<Arc<dyn StorefrontApi>>,
    storefront_location_id: Option<String>,
    notifier: Notifier,
    rules: BusinessRules,
    currency_id: String,
    default_category_id: String,
}

impl Engine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: CatalogStore,
        marketplace: Arc<dyn MarketplaceApi>,
        storefront: Option<Arc<dyn StorefrontApi>>,
        storefront_location_id: Option<String>,
        notifier: Notifier,
        rules: BusinessRules,
        currency_id: String,
        default_category_id: String,
    ) -> Self {
        Self {
            store,
            marketplace,
            storefront,
            storefront_location_id,
            notifier,
            rules,
            currency_id,
            default_category_id,
        }
    }

    pub fn store(&self) -> &CatalogStore {
        &self.store
    }

    pub fn rules(&self) -> &BusinessRules {
        &self.rules
    }

    // -- Intake ----------------------------------------------------------

    /// Create a product (with its metrics row) unless the sku already
    /// exists, in which case the existing product is returned untouched.
    pub async fn create_product(&self, intake: NewProduct) -> Result<Product> {
        if intake.sku.trim().is_empty() {
            anyhow::bail!("Product sku must not be empty");
        }
        if intake.base_cost <= 0.0 {
            anyhow::bail!("Product base cost must be positive (got {})", intake.base_cost);
        }

        if let Some(existing) = self.store.product_by_sku(&intake.sku).await? {
            warn!(sku = %intake.sku, "Product already exists");
            return Ok(existing);
        }

        let product = self.store.create_product(&intake).await?;
        info!(sku = %product.sku, product_id = product.id, "Product created");
        Ok(product)
    }

    // -- Evaluation ------------------------------------------------------

    /// Run the pricing + scoring pair and apply the lifecycle gate.
    ///
    /// Live products (published/paused) are never touched; publishing is a
    /// distinct transition and re-evaluation must not undo it.
    pub async fn evaluate_product(&self, product_id: i64) -> Result<EvaluationOutcome> {
        let product = self
            .store
            .product(product_id)
            .await?
            .with_context(|| format!("Product not found: {product_id}"))?;

        if product.is_live() {
            return Ok(EvaluationOutcome::AlreadyLive);
        }

        let commission = product
            .commission_percentage
            .unwrap_or(self.rules.commission_percentage);

        let quote = match pricing::quote(
            product.base_cost,
            product.shipping_cost,
            commission,
            &self.rules,
        ) {
            Ok(quote) => quote,
            Err(e) => {
                error!(sku = %product.sku, error = %e, "Pricing failed");
                self.store
                    .log_action(
                        &ActionEntry::new(ActionKind::EvaluationFailed, Some(product.id))
                            .reason("pricing calculator hard stop")
                            .failed(e.to_string()),
                    )
                    .await?;
                return Ok(EvaluationOutcome::PricingFailed {
                    reason: e.to_string(),
                });
            }
        };

        // The latest persisted analysis is authoritative for scoring; a
        // product never analyzed scores against medium competition.
        let competition = self
            .store
            .latest_analysis(product.id)
            .await?
            .map(|a| a.competition_level)
            .unwrap_or(CompetitionLevel::Medium);

        let gap = scoring::price_gap_pct(quote.competitive_price, quote.optimal_price);
        let card = scoring::score(quote.margin_percentage, competition, gap, None, &self.rules);
        let (status, auto_approved) = scoring::status_for_score(card.total, &self.rules);

        self.store
            .apply_evaluation(
                product.id,
                quote.optimal_price,
                quote.competitive_price,
                quote.margin_percentage,
                quote.commission_percentage,
                card.total,
                status,
                auto_approved,
            )
            .await?;

        self.store
            .log_action(
                &ActionEntry::new(ActionKind::Evaluated, Some(product.id))
                    .reason(format!(
                        "score {} {}",
                        card.total,
                        card.breakdown()
                    ))
                    .change(product.status.to_string(), status.to_string()),
            )
            .await?;

        info!(
            sku = %product.sku,
            score = card.total,
            status = %status,
            price = quote.competitive_price,
            margin = quote.margin_percentage,
            "Product evaluated"
        );

        Ok(EvaluationOutcome::Scored {
            score: card.total,
            status,
            final_price: quote.competitive_price,
            margin_percentage: quote.margin_percentage,
        })
    }

    // -- Publication -----------------------------------------------------

    /// Publish an approved product to the marketplace.
    ///
    /// The `published` status is only ever reached through a successful
    /// remote creation; on failure nothing local changes and the failure is
    /// logged to the action trail.
    pub async fn publish_product(&self, product_id: i64) -> Result<PublishOutcome> {
        let product = self
            .store
            .product(product_id)
            .await?
            .with_context(|| format!("Product not found: {product_id}"))?;

        if product.marketplace_item_id.is_some() {
            return Ok(PublishOutcome::NotEligible {
                reason: "already published".to_string(),
            });
        }
        if product.status != ProductStatus::Approved {
            return Ok(PublishOutcome::NotEligible {
                reason: format!("status is {}", product.status),
            });
        }
        let Some(price) = product.final_price else {
            self.store
                .log_action(
                    &ActionEntry::new(ActionKind::PublishFailed, Some(product.id))
                        .failed("no final price computed"),
                )
                .await?;
            return Ok(PublishOutcome::NotEligible {
                reason: "no final price computed".to_string(),
            });
        };

        let title: String = product.name.chars().take(MAX_TITLE_LEN).collect();
        let spec = ListingSpec {
            title: title.clone(),
            category_id: product
                .marketplace_category_id
                .clone()
                .unwrap_or_else(|| self.default_category_id.clone()),
            price,
            currency_id: self.currency_id.clone(),
            available_quantity: product.stock,
            condition: "new".to_string(),
            description: format!("Producto: {}\n\nSKU: {}", product.name, product.sku),
            free_shipping: product.shipping_cost == 0.0,
        };

        match self.marketplace.create_item(&spec).await {
            Ok(created) => {
                self.store
                    .mark_published(product.id, &created.id, created.permalink.as_deref())
                    .await?;
                self.store
                    .create_live_listing(product.id, &created.id, &title, price)
                    .await?;
                self.store
                    .log_action(
                        &ActionEntry::new(ActionKind::Published, Some(product.id))
                            .reason(format!("auto-published with score {}", product.score))
                            .change(product.status.to_string(), "published"),
                    )
                    .await?;
                self.notifier.product_published(&product.name, &created.id, product.score);
                info!(sku = %product.sku, item_id = %created.id, "Product published");
                Ok(PublishOutcome::Published { item_id: created.id })
            }
            Err(e) => {
                error!(sku = %product.sku, error = %e, "Publication failed");
                self.store
                    .log_action(
                        &ActionEntry::new(ActionKind::PublishFailed, Some(product.id))
                            .failed(e.to_string()),
                    )
                    .await?;
                Ok(PublishOutcome::Failed {
                    reason: e.to_string(),
                })
            }
        }
    }

    // -- Stock reconciliation --------------------------------------------

    /// Pull the storefront's variant inventory and propagate differences to
    /// the local catalog and the marketplace listing.
    /// Returns `true` when the stock changed.
    pub async fn sync_stock(&self, product_id: i64) -> Result<bool> {
        let Some(storefront) = &self.storefront else {
            return Ok(false);
        };

        let product = self
            .store
            .product(product_id)
            .await?
            .with_context(|| format!("Product not found: {product_id}"))?;

        let Some(storefront_id) = &product.storefront_product_id else {
            return Ok(false);
        };

        let Some(remote) = storefront.get_product(storefront_id).await? else {
            warn!(sku = %product.sku, storefront_id, "Storefront product missing");
            return Ok(false);
        };

        let Some(variant) = remote.variants.first() else {
            return Ok(false);
        };

        let remote_stock = variant.inventory_quantity;
        if remote_stock == product.stock {
            return Ok(false);
        }

        // Push the marketplace quantity first so a remote failure leaves
        // the local record at its pre-attempt value.
        if let Some(item_id) = &product.marketplace_item_id {
            self.marketplace
                .update_item(item_id, &ItemPatch::quantity(remote_stock))
                .await
                .context("Marketplace quantity update failed")?;
        }

        self.store.update_product_stock(product.id, remote_stock).await?;
        self.store
            .log_action(
                &ActionEntry::new(ActionKind::StockSynced, Some(product.id))
                    .change(product.stock.to_string(), remote_stock.to_string()),
            )
            .await?;

        info!(sku = %product.sku, old = product.stock, new = remote_stock, "Stock synced");
        Ok(true)
    }

    // -- Sweeps (job entry points) ---------------------------------------

    /// Publish every auto-approved product that isn't live yet.
    /// One product's failure never aborts the sweep.
    pub async fn auto_publish_sweep(&self) -> Result<usize> {
        let candidates = self.store.auto_publishable_products().await?;
        let mut published = 0;
        for product in &candidates {
            match self.publish_product(product.id).await {
                Ok(PublishOutcome::Published { .. }) => published += 1,
                Ok(_) => {}
                Err(e) => {
                    error!(sku = %product.sku, error = %e, "Auto-publish failed; continuing");
                }
            }
        }
        info!(candidates = candidates.len(), published, "Auto-publish sweep complete");
        Ok(published)
    }

    /// Reconcile stock for every published, storefront-linked product.
    pub async fn stock_sync_sweep(&self) -> Result<usize> {
        let products = self.store.storefront_linked_published().await?;
        let mut changed = 0;
        for product in &products {
            match self.sync_stock(product.id).await {
                Ok(true) => changed += 1,
                Ok(false) => {}
                Err(e) => {
                    error!(sku = %product.sku, error = %e, "Stock sync failed; continuing");
                }
            }
        }
        info!(products = products.len(), changed, "Stock sync sweep complete");
        Ok(changed)
    }

    /// Recompute ProductMetrics aggregates from the listing-metrics series.
    pub async fn metrics_rollup_sweep(&self) -> Result<usize> {
        let rollups = self.store.listing_metric_rollups().await?;
        let mut updated = 0;
        for rollup in &rollups {
            let conversion_rate = if rollup.visits > 0 {
                pricing::round2(rollup.sales as f64 / rollup.visits as f64 * 100.0)
            } else {
                0.0
            };
            let ctr = if rollup.ad_impressions > 0 {
                pricing::round2(rollup.ad_clicks as f64 / rollup.ad_impressions as f64 * 100.0)
            } else {
                0.0
            };

            let Some(current) = self.store.metrics(rollup.product_id).await? else {
                continue;
            };

            let result = self
                .store
                .set_metrics(&ProductMetrics {
                    product_id: rollup.product_id,
                    total_visits: rollup.visits,
                    total_sales: rollup.sales,
                    total_revenue: rollup.revenue,
                    total_profit: current.total_profit,
                    ctr,
                    conversion_rate,
                    last_sale_date: rollup.last_sale_date.or(current.last_sale_date),
                    updated_at: current.updated_at,
                })
                .await;

            match result {
                Ok(()) => updated += 1,
                Err(e) => {
                    error!(product_id = rollup.product_id, error = %e, "Rollup failed; continuing");
                }
            }
        }
        info!(updated, "Metrics rollup sweep complete");
        Ok(updated)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
