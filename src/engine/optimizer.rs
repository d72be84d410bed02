//! Performance optimizer.
//!
//! Evaluates published products against their accumulated metrics through an
//! ordered table of named predicate + action rules. The pause rule is
//! terminal for a pass; the remaining rules fire independently. Every action
//! lands in the audit trail, successful or not, and one product's failure
//! never blocks the next.

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::config::BusinessRules;
use crate::notify::Notifier;
use crate::platforms::{ItemPatch, MarketplaceApi};
use crate::pricing::{self, round2};
use crate::storage::{CatalogStore, WindowTotals};
use crate::types::{
    ActionEntry, ActionKind, ActionOutcome, OptimizeOutcome, Product, ProductMetrics,
    ProductStatus,
};

/// Days of listing metrics feeding the recent-performance predicates.
const WINDOW_DAYS: i64 = 7;

// ---------------------------------------------------------------------------
// Rule table
// ---------------------------------------------------------------------------

/// Everything a predicate may look at. Assembled once per product so the
/// predicates stay pure and independently testable.
pub(crate) struct RuleContext<'a> {
    pub product: &'a Product,
    pub metrics: &'a ProductMetrics,
    pub window: &'a WindowTotals,
    pub rules: &'a BusinessRules,
    pub now: DateTime<Utc>,
}

impl RuleContext<'_> {
    /// 7-day return on ad spend. `None` while the window has no spend;
    /// the ads-pause rule is inert without the signal.
    fn roas(&self) -> Option<f64> {
        (self.window.ad_spend > 0.0).then(|| self.window.revenue / self.window.ad_spend)
    }

    fn margin(&self) -> f64 {
        self.product.margin_percentage.unwrap_or(0.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RuleAction {
    Pause,
    ReducePrice,
    ActivateAds,
    PauseAds,
    Scale,
}

pub(crate) struct Rule {
    pub name: &'static str,
    pub action: RuleAction,
    /// A terminal rule ends the pass once its action succeeds.
    pub terminal: bool,
    pub applies: fn(&RuleContext) -> bool,
}

pub(crate) const RULES: &[Rule] = &[
    Rule {
        name: "pause_low_performance",
        action: RuleAction::Pause,
        terminal: true,
        applies: should_pause,
    },
    Rule {
        name: "reduce_price",
        action: RuleAction::ReducePrice,
        terminal: false,
        applies: should_reduce_price,
    },
    Rule {
        name: "activate_ads",
        action: RuleAction::ActivateAds,
        terminal: false,
        applies: should_activate_ads,
    },
    Rule {
        name: "pause_ads",
        action: RuleAction::PauseAds,
        terminal: false,
        applies: should_pause_ads,
    },
    Rule {
        name: "scale",
        action: RuleAction::Scale,
        terminal: false,
        applies: should_scale,
    },
];

fn should_pause(ctx: &RuleContext) -> bool {
    // Stale: no sale for too long with visits under the floor.
    if let Some(days) = ctx.metrics.days_since_last_sale(ctx.now) {
        if days >= ctx.rules.pause_no_sales_days
            && ctx.metrics.total_visits < ctx.rules.pause_min_visits
        {
            return true;
        }
    }

    // Plenty of traffic but nobody clicks.
    if ctx.metrics.total_visits > 100 && ctx.metrics.ctr < ctx.rules.pause_min_ctr {
        return true;
    }

    // Selling below the viability floor.
    if ctx.margin() < ctx.rules.min_margin_percentage {
        return true;
    }

    false
}

fn should_reduce_price(ctx: &RuleContext) -> bool {
    (ctx.metrics.total_visits > 50 && ctx.metrics.ctr < 1.0)
        || (ctx.metrics.total_visits > 200 && ctx.metrics.conversion_rate < 1.0)
}

fn should_activate_ads(ctx: &RuleContext) -> bool {
    ctx.metrics.total_sales >= ctx.rules.ads_min_sales
        && ctx.margin() >= ctx.rules.ads_min_margin
        && ctx.metrics.ctr >= ctx.rules.ads_min_ctr
}

fn should_pause_ads(ctx: &RuleContext) -> bool {
    match ctx.roas() {
        Some(roas) => roas < ctx.rules.ads_min_roas,
        None => {
            debug!(product_id = ctx.product.id, "ROAS unavailable; ads-pause rule inert");
            false
        }
    }
}

fn should_scale(ctx: &RuleContext) -> bool {
    ctx.window.sales >= ctx.rules.scale_min_sales_7d
        && ctx.metrics.conversion_rate >= ctx.rules.scale_min_conversion
        && ctx.margin() >= ctx.rules.min_margin_percentage + 5.0
        && ctx.product.stock >= ctx.rules.scale_min_stock
}

// ---------------------------------------------------------------------------
// Optimizer
// ---------------------------------------------------------------------------

pub struct Optimizer {
    store: CatalogStore,
    marketplace: Arc<dyn MarketplaceApi>,
    notifier: Notifier,
    rules: BusinessRules,
}

impl Optimizer {
    pub fn new(
        store: CatalogStore,
        marketplace: Arc<dyn MarketplaceApi>,
        notifier: Notifier,
        rules: BusinessRules,
    ) -> Self {
        Self {
            store,
            marketplace,
            notifier,
            rules,
        }
    }

    /// Optimize every published product, isolating per-product failures.
    pub async fn optimize_all(&self) -> Result<usize> {
        let products = self
            .store
            .products_by_status(ProductStatus::Published)
            .await?;
        let mut acted = 0;
        for product in &products {
            match self.optimize_product(product.id).await {
                Ok(OptimizeOutcome::Actions(actions)) if !actions.is_empty() => acted += 1,
                Ok(_) => {}
                Err(e) => {
                    error!(sku = %product.sku, error = %e, "Optimization failed; continuing");
                }
            }
        }
        info!(products = products.len(), acted, "Optimization sweep complete");
        Ok(acted)
    }

    /// Evaluate the rule table against one product.
    pub async fn optimize_product(&self, product_id: i64) -> Result<OptimizeOutcome> {
        let product = self
            .store
            .product(product_id)
            .await?
            .with_context(|| format!("Product not found: {product_id}"))?;

        if product.status != ProductStatus::Published {
            return Ok(OptimizeOutcome::Skipped {
                reason: "not published",
            });
        }

        let Some(metrics) = self.store.metrics(product.id).await? else {
            return Ok(OptimizeOutcome::Skipped {
                reason: "no metrics",
            });
        };

        let now = Utc::now();
        let window = self
            .store
            .product_window(product.id, now - Duration::days(WINDOW_DAYS))
            .await?;

        let ctx = RuleContext {
            product: &product,
            metrics: &metrics,
            window: &window,
            rules: &self.rules,
            now,
        };

        let mut fired: Vec<ActionOutcome> = Vec::new();
        for rule in RULES {
            if !(rule.applies)(&ctx) {
                continue;
            }
            let outcome = self.apply(rule, &product).await;
            let stop = rule.terminal && outcome.success;
            fired.push(outcome);
            if stop {
                break;
            }
        }

        if fired.is_empty() {
            Ok(OptimizeOutcome::NoOp)
        } else {
            Ok(OptimizeOutcome::Actions(fired))
        }
    }

    /// Execute a fired rule. Remote errors leave local state untouched and
    /// are absorbed into the returned outcome.
    async fn apply(&self, rule: &Rule, product: &Product) -> ActionOutcome {
        let result = match rule.action {
            RuleAction::Pause => self.pause(product).await,
            RuleAction::ReducePrice => self.reduce_price(product).await,
            RuleAction::ActivateAds => self.flag_ads(product, ActionKind::AdsActivated).await,
            RuleAction::PauseAds => self.flag_ads(product, ActionKind::AdsPaused).await,
            RuleAction::Scale => self.scale(product).await,
        };

        match result {
            Ok(detail) => ActionOutcome {
                rule: rule.name,
                success: true,
                detail,
            },
            Err(e) => {
                warn!(sku = %product.sku, rule = rule.name, error = %e, "Rule action failed");
                ActionOutcome {
                    rule: rule.name,
                    success: false,
                    detail: e.to_string(),
                }
            }
        }
    }

    /// Pause the listing remotely, then locally. Idempotent: a product that
    /// is already paused never re-enters the sweep.
    async fn pause(&self, product: &Product) -> Result<String> {
        let remote = async {
            if let Some(item_id) = &product.marketplace_item_id {
                self.marketplace
                    .update_item(item_id, &ItemPatch::status("paused"))
                    .await?;
            }
            Ok::<_, anyhow::Error>(())
        }
        .await;

        if let Err(e) = remote {
            self.store
                .log_action(
                    &ActionEntry::new(ActionKind::Paused, Some(product.id))
                        .reason("low performance")
                        .failed(e.to_string()),
                )
                .await?;
            return Err(e);
        }

        self.store
            .update_product_status(product.id, ProductStatus::Paused)
            .await?;
        self.store
            .log_action(
                &ActionEntry::new(ActionKind::Paused, Some(product.id))
                    .reason("low performance")
                    .change("published", "paused"),
            )
            .await?;
        self.notifier
            .optimization("Product paused", &product.name, "low performance");
        info!(sku = %product.sku, "Product paused");
        Ok("paused".to_string())
    }

    /// Reduce the price by the configured percentage unless the resulting
    /// margin would fall under the floor; in that case nothing is pushed
    /// and the aborted decision is still recorded.
    async fn reduce_price(&self, product: &Product) -> Result<String> {
        let Some(old_price) = product.final_price else {
            anyhow::bail!("product has no final price");
        };
        let commission = product
            .commission_percentage
            .unwrap_or(self.rules.commission_percentage);

        let new_price = round2(old_price * (1.0 - self.rules.price_reduction_percentage / 100.0));
        let new_margin = pricing::margin_for_price(
            new_price,
            product.base_cost,
            product.shipping_cost,
            commission,
            &self.rules,
        )?;

        if new_margin < self.rules.min_margin_percentage {
            warn!(
                sku = %product.sku,
                new_price,
                new_margin,
                "Price reduction aborted: margin below floor"
            );
            self.store
                .log_action(
                    &ActionEntry::new(ActionKind::PriceAdjusted, Some(product.id))
                        .reason("reduction aborted")
                        .failed(format!(
                            "margin {new_margin:.2}% below minimum {:.2}%",
                            self.rules.min_margin_percentage
                        )),
                )
                .await?;
            return Ok("aborted: margin floor".to_string());
        }

        let remote = async {
            if let Some(item_id) = &product.marketplace_item_id {
                self.marketplace
                    .update_item(item_id, &ItemPatch::price(new_price))
                    .await?;
            }
            Ok::<_, anyhow::Error>(())
        }
        .await;

        if let Err(e) = remote {
            self.store
                .log_action(
                    &ActionEntry::new(ActionKind::PriceAdjusted, Some(product.id))
                        .change(format!("{old_price:.2}"), format!("{new_price:.2}"))
                        .failed(e.to_string()),
                )
                .await?;
            return Err(e);
        }

        self.store
            .update_product_price(product.id, new_price, new_margin)
            .await?;
        self.store
            .log_action(
                &ActionEntry::new(ActionKind::PriceAdjusted, Some(product.id))
                    .reason("low CTR/conversion")
                    .change(format!("{old_price:.2}"), format!("{new_price:.2}")),
            )
            .await?;
        self.notifier.optimization(
            "Price adjusted",
            &product.name,
            &format!("reduced from ${old_price:.2} to ${new_price:.2}"),
        );
        info!(sku = %product.sku, old_price, new_price, "Price adjusted");
        Ok(format!("{old_price:.2} -> {new_price:.2}"))
    }

    /// Ads actions are recorded and notified as intents; the marketplace ads
    /// API is not integrated.
    async fn flag_ads(&self, product: &Product, kind: ActionKind) -> Result<String> {
        let (subject, detail) = match kind {
            ActionKind::AdsActivated => ("Ads activated", "qualified for advertising"),
            _ => ("Ads paused", "low ROAS over the last 7 days"),
        };
        self.store
            .log_action(&ActionEntry::new(kind, Some(product.id)).reason(detail))
            .await?;
        self.notifier.optimization(subject, &product.name, detail);
        info!(sku = %product.sku, action = %kind, "Ads action recorded");
        Ok(detail.to_string())
    }

    async fn scale(&self, product: &Product) -> Result<String> {
        self.store
            .log_action(
                &ActionEntry::new(ActionKind::Scaled, Some(product.id))
                    .reason("high recent performance"),
            )
            .await?;
        self.notifier
            .optimization("Product scaled", &product.name, "high performance detected");
        info!(sku = %product.sku, "Product flagged for scaling");
        Ok("scale flagged".to_string())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
