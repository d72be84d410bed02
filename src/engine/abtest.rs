//! A/B test management.
//!
//! Creates paired listing variants atomically, gates evaluation on a
//! minimum duration and minimum traffic, and decides winners through a
//! cascade of comparisons, each requiring a 10% or larger relative advantage
//! before falling through to the next criterion.

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::BusinessRules;
use crate::notify::Notifier;
use crate::platforms::{ItemPatch, MarketplaceApi};
use crate::storage::{CatalogStore, VariantDraft};
use crate::types::{
    AbTest, ActionEntry, ActionKind, DeferReason, TestOutcome, TestStatus, TestType,
    VariantMetrics, Winner,
};

/// Relative advantage required to win a comparison (10%).
const WINNER_LEAD: f64 = 1.1;

/// Cascading winner determination: conversion rate, then sales, then
/// revenue. Symmetric by construction: swapping the inputs swaps A and B.
pub(crate) fn determine_winner(a: &VariantMetrics, b: &VariantMetrics) -> Winner {
    let comparisons = [
        (a.conversion_rate, b.conversion_rate),
        (a.sales as f64, b.sales as f64),
        (a.revenue, b.revenue),
    ];

    for (va, vb) in comparisons {
        if va > vb * WINNER_LEAD {
            return Winner::A;
        }
        if vb > va * WINNER_LEAD {
            return Winner::B;
        }
    }

    Winner::Tie
}

/// Readiness gate: both variants need the minimum visits, and at least one
/// must have reached the minimum sales.
pub(crate) fn readiness(
    a: &VariantMetrics,
    b: &VariantMetrics,
    rules: &BusinessRules,
) -> Option<DeferReason> {
    if a.visits < rules.ab_test_min_visits || b.visits < rules.ab_test_min_visits {
        return Some(DeferReason::MinVisits);
    }
    if a.sales < rules.ab_test_min_sales && b.sales < rules.ab_test_min_sales {
        return Some(DeferReason::MinSales);
    }
    None
}

pub struct AbTestEvaluator {
    store: CatalogStore,
    marketplace: Arc<dyn MarketplaceApi>,
    notifier: Notifier,
    rules: BusinessRules,
}

impl AbTestEvaluator {
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

    /// Create a test with two fresh active variant listings. Atomic: on any
    /// failure nothing partial persists.
    pub async fn create_test(
        &self,
        product_id: i64,
        test_type: TestType,
        variant_a: VariantDraft,
        variant_b: VariantDraft,
    ) -> Result<AbTest> {
        let product = self
            .store
            .product(product_id)
            .await?
            .with_context(|| format!("Product not found: {product_id}"))?;

        let test = self
            .store
            .create_ab_test(product_id, test_type, &variant_a, &variant_b)
            .await?;

        info!(
            test_id = test.id,
            sku = %product.sku,
            test_type = %test_type,
            "A/B test started"
        );
        Ok(test)
    }

    /// Evaluate every running test against `now`, isolating failures.
    pub async fn evaluate_all(&self, now: DateTime<Utc>) -> Result<usize> {
        let tests = self.store.running_tests().await?;
        let mut completed = 0;
        for test in &tests {
            match self.evaluate_test(test.id, now).await {
                Ok(TestOutcome::Completed { .. }) => completed += 1,
                Ok(_) => {}
                Err(e) => {
                    tracing::error!(test_id = test.id, error = %e, "Test evaluation failed; continuing");
                }
            }
        }
        info!(tests = tests.len(), completed, "A/B evaluation sweep complete");
        Ok(completed)
    }

    /// Evaluate one test. Completed/cancelled tests are never re-evaluated;
    /// an unready test defers with no state change.
    pub async fn evaluate_test(&self, test_id: i64, now: DateTime<Utc>) -> Result<TestOutcome> {
        let test = self
            .store
            .ab_test(test_id)
            .await?
            .with_context(|| format!("A/B test not found: {test_id}"))?;

        if test.status != TestStatus::Running {
            return Ok(TestOutcome::AlreadyDecided);
        }

        if now - test.started_at < Duration::days(self.rules.ab_test_duration_days) {
            return Ok(TestOutcome::Deferred {
                reason: DeferReason::MinDuration,
            });
        }

        let metrics_a = self
            .store
            .aggregate_listing_metrics(test.variant_a_id, None)
            .await?;
        let metrics_b = self
            .store
            .aggregate_listing_metrics(test.variant_b_id, None)
            .await?;

        if let Some(reason) = readiness(&metrics_a, &metrics_b, &self.rules) {
            info!(test_id, %reason, "A/B test deferred");
            return Ok(TestOutcome::Deferred { reason });
        }

        let winner = determine_winner(&metrics_a, &metrics_b);
        let loser_listing_id = winner.loser().map(|v| match v {
            crate::types::Variant::A => test.variant_a_id,
            crate::types::Variant::B => test.variant_b_id,
        });

        let results = serde_json::json!({
            "variant_a": metrics_a,
            "variant_b": metrics_b,
            "winner": winner.as_str(),
        });

        // Local completion first: the decision is the source of truth.
        self.store
            .complete_ab_test(test.id, winner, &results, loser_listing_id, now)
            .await?;

        self.store
            .log_action(
                &ActionEntry::new(ActionKind::TestCompleted, Some(test.product_id))
                    .reason(format!("{} test, winner {winner}", test.test_type))
                    .change("running", "completed"),
            )
            .await?;

        // Best-effort remote retirement of the losing listing.
        if let Some(listing_id) = loser_listing_id {
            if let Err(e) = self.retire_listing(listing_id, test.product_id).await {
                warn!(test_id, listing_id, error = %e, "Losing variant remote pause failed");
            }
        }

        let product = self.store.product(test.product_id).await?;
        let product_name = product
            .map(|p| p.name)
            .unwrap_or_else(|| format!("product {}", test.product_id));
        self.notifier.ab_test_completed(&product_name, winner);

        info!(test_id, winner = %winner, "A/B test completed");
        Ok(TestOutcome::Completed { winner })
    }

    async fn retire_listing(&self, listing_id: i64, product_id: i64) -> Result<()> {
        let listing = self
            .store
            .listing(listing_id)
            .await?
            .with_context(|| format!("Listing not found: {listing_id}"))?;

        let result = self
            .marketplace
            .update_item(&listing.marketplace_item_id, &ItemPatch::status("paused"))
            .await;

        let mut entry = ActionEntry::new(ActionKind::Paused, Some(product_id))
            .reason(format!("losing variant {}", listing.marketplace_item_id));
        if let Err(e) = &result {
            entry = entry.failed(e.to_string());
        }
        self.store.log_action(&entry).await?;
        result
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platforms::MockMarketplaceApi;
    use crate::types::{ListingStatus, NewProduct};

    fn vm(visits: i64, sales: i64, revenue: f64) -> VariantMetrics {
        VariantMetrics::new(visits, sales, revenue)
    }

    // -- pure winner cascade --------------------------------------------

    #[test]
    fn test_winner_by_conversion() {
        // 5% vs 3%: 5 > 3 * 1.1 → A.
        let a = vm(1000, 50, 5000.0);
        let b = vm(1000, 30, 6000.0);
        assert_eq!(determine_winner(&a, &b), Winner::A);
    }

    #[test]
    fn test_winner_symmetry() {
        let cases = [
            (vm(1000, 50, 5000.0), vm(1000, 30, 3000.0)),
            (vm(500, 10, 900.0), vm(800, 12, 1500.0)),
            (vm(1000, 20, 2000.0), vm(1000, 20, 2000.0)),
            (vm(1000, 20, 2000.0), vm(1000, 21, 2600.0)),
        ];
        for (a, b) in cases {
            let forward = determine_winner(&a, &b);
            let backward = determine_winner(&b, &a);
            match forward {
                Winner::A => assert_eq!(backward, Winner::B),
                Winner::B => assert_eq!(backward, Winner::A),
                Winner::Tie => assert_eq!(backward, Winner::Tie),
            }
        }
    }

    #[test]
    fn test_winner_falls_through_to_sales() {
        // Conversion within 10% (5.0 vs 4.8), sales decide (50 vs 30).
        let a = vm(1000, 50, 5000.0);
        let b = vm(625, 30, 4000.0);
        assert!((b.conversion_rate - 4.8).abs() < 1e-9);
        assert_eq!(determine_winner(&a, &b), Winner::A);
    }

    #[test]
    fn test_winner_falls_through_to_revenue() {
        // Conversion equal, sales equal, revenue decides.
        let a = vm(1000, 20, 3000.0);
        let b = vm(1000, 20, 2000.0);
        assert_eq!(determine_winner(&a, &b), Winner::A);
        assert_eq!(determine_winner(&b, &a), Winner::B);
    }

    #[test]
    fn test_tie_when_everything_close() {
        let a = vm(1000, 20, 2000.0);
        let b = vm(1000, 21, 2100.0);
        assert_eq!(determine_winner(&a, &b), Winner::Tie);
    }

    // -- readiness gate --------------------------------------------------

    #[test]
    fn test_readiness_requires_visits_on_both() {
        let rules = BusinessRules::default();
        // Huge sales on A can't bypass B's missing visits.
        let a = vm(5000, 500, 50_000.0);
        let b = vm(99, 0, 0.0);
        assert_eq!(readiness(&a, &b, &rules), Some(DeferReason::MinVisits));
    }

    #[test]
    fn test_readiness_requires_sales_on_one() {
        let rules = BusinessRules::default();
        let a = vm(1000, 2, 200.0);
        let b = vm(1000, 3, 300.0);
        assert_eq!(readiness(&a, &b, &rules), Some(DeferReason::MinSales));

        let b = vm(1000, 5, 500.0);
        assert_eq!(readiness(&a, &b, &rules), None);
    }

    // -- evaluator flow --------------------------------------------------

    async fn setup(
        marketplace: MockMarketplaceApi,
    ) -> (AbTestEvaluator, CatalogStore, AbTest) {
        let store = CatalogStore::in_memory().await.unwrap();
        let product = store
            .create_product(&NewProduct {
                sku: "SKU-1".to_string(),
                name: "Cable USB-C".to_string(),
                base_cost: 100.0,
                shipping_cost: 0.0,
                stock: 25,
                category: None,
                marketplace_category_id: None,
                storefront_product_id: None,
            })
            .await
            .unwrap();

        let evaluator = AbTestEvaluator::new(
            store.clone(),
            Arc::new(marketplace),
            Notifier::disabled(),
            BusinessRules::default(),
        );

        let test = evaluator
            .create_test(
                product.id,
                TestType::Price,
                VariantDraft {
                    marketplace_item_id: "MLM-A".to_string(),
                    title: "Variant A".to_string(),
                    description: None,
                    price: 220.0,
                },
                VariantDraft {
                    marketplace_item_id: "MLM-B".to_string(),
                    title: "Variant B".to_string(),
                    description: None,
                    price: 240.0,
                },
            )
            .await
            .unwrap();

        (evaluator, store, test)
    }

    async fn seed_variant(store: &CatalogStore, listing_id: i64, visits: i64, sales: i64) {
        store
            .add_listing_metrics(
                listing_id,
                Utc::now(),
                visits,
                sales,
                sales as f64 * 100.0,
                0.0,
                0,
                0,
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_defers_before_minimum_duration() {
        let (evaluator, store, test) = setup(MockMarketplaceApi::new()).await;
        seed_variant(&store, test.variant_a_id, 1000, 50).await;
        seed_variant(&store, test.variant_b_id, 1000, 30).await;

        // Metrics are overwhelming, but the clock gate comes first.
        let outcome = evaluator.evaluate_test(test.id, Utc::now()).await.unwrap();
        assert_eq!(
            outcome,
            TestOutcome::Deferred {
                reason: DeferReason::MinDuration
            }
        );
        let test = store.ab_test(test.id).await.unwrap().unwrap();
        assert_eq!(test.status, TestStatus::Running);
    }

    #[tokio::test]
    async fn test_defers_below_thresholds_regardless_of_magnitude() {
        let (evaluator, store, test) = setup(MockMarketplaceApi::new()).await;
        seed_variant(&store, test.variant_a_id, 90, 80).await;
        seed_variant(&store, test.variant_b_id, 5000, 400).await;

        let later = Utc::now() + Duration::days(8);
        let outcome = evaluator.evaluate_test(test.id, later).await.unwrap();
        assert_eq!(
            outcome,
            TestOutcome::Deferred {
                reason: DeferReason::MinVisits
            }
        );
    }

    #[tokio::test]
    async fn test_completes_and_pauses_loser() {
        let mut marketplace = MockMarketplaceApi::new();
        marketplace.expect_update_item().times(1).returning(|item_id, patch| {
            assert_eq!(item_id, "MLM-B");
            assert_eq!(patch.status.as_deref(), Some("paused"));
            Ok(())
        });
        let (evaluator, store, test) = setup(marketplace).await;

        // 5% vs 3% conversion → A wins.
        seed_variant(&store, test.variant_a_id, 1000, 50).await;
        seed_variant(&store, test.variant_b_id, 1000, 30).await;

        let later = Utc::now() + Duration::days(8);
        let outcome = evaluator.evaluate_test(test.id, later).await.unwrap();
        assert_eq!(outcome, TestOutcome::Completed { winner: Winner::A });

        let test = store.ab_test(test.id).await.unwrap().unwrap();
        assert_eq!(test.status, TestStatus::Completed);
        assert_eq!(test.winner, Some(Winner::A));
        let results = test.results.unwrap();
        assert_eq!(results["winner"], "A");
        assert_eq!(results["variant_a"]["visits"], 1000);

        let loser = store.listing(test.variant_b_id).await.unwrap().unwrap();
        assert_eq!(loser.status, ListingStatus::Paused);
        assert!(loser.ended_at.is_some());

        // Terminal: a second evaluation is a no-op.
        let again = evaluator.evaluate_test(test.id, later).await.unwrap();
        assert_eq!(again, TestOutcome::AlreadyDecided);
    }

    #[tokio::test]
    async fn test_inverse_metrics_swap_winner() {
        let mut marketplace = MockMarketplaceApi::new();
        marketplace.expect_update_item().times(1).returning(|item_id, _| {
            assert_eq!(item_id, "MLM-A");
            Ok(())
        });
        let (evaluator, store, test) = setup(marketplace).await;

        seed_variant(&store, test.variant_a_id, 1000, 30).await;
        seed_variant(&store, test.variant_b_id, 1000, 50).await;

        let later = Utc::now() + Duration::days(8);
        let outcome = evaluator.evaluate_test(test.id, later).await.unwrap();
        assert_eq!(outcome, TestOutcome::Completed { winner: Winner::B });

        let loser = store.listing(test.variant_a_id).await.unwrap().unwrap();
        assert_eq!(loser.status, ListingStatus::Paused);
    }

    #[tokio::test]
    async fn test_tie_pauses_neither() {
        let (evaluator, store, test) = setup(MockMarketplaceApi::new()).await;

        seed_variant(&store, test.variant_a_id, 1000, 20).await;
        seed_variant(&store, test.variant_b_id, 1000, 21).await;

        let later = Utc::now() + Duration::days(8);
        let outcome = evaluator.evaluate_test(test.id, later).await.unwrap();
        assert_eq!(outcome, TestOutcome::Completed { winner: Winner::Tie });

        let a = store.listing(test.variant_a_id).await.unwrap().unwrap();
        let b = store.listing(test.variant_b_id).await.unwrap().unwrap();
        assert_eq!(a.status, ListingStatus::Active);
        assert_eq!(b.status, ListingStatus::Active);
    }

    #[tokio::test]
    async fn test_remote_failure_does_not_undo_completion() {
        let mut marketplace = MockMarketplaceApi::new();
        marketplace
            .expect_update_item()
            .returning(|_, _| Err(anyhow::anyhow!("HTTP 500")));
        let (evaluator, store, test) = setup(marketplace).await;

        seed_variant(&store, test.variant_a_id, 1000, 50).await;
        seed_variant(&store, test.variant_b_id, 1000, 30).await;

        let later = Utc::now() + Duration::days(8);
        let outcome = evaluator.evaluate_test(test.id, later).await.unwrap();
        assert_eq!(outcome, TestOutcome::Completed { winner: Winner::A });

        // Local truth holds; the remote failure is in the audit trail.
        let test = store.ab_test(test.id).await.unwrap().unwrap();
        assert_eq!(test.status, TestStatus::Completed);

        let actions = store.actions_for_product(test.product_id).await.unwrap();
        assert!(actions.iter().any(|a| a.action_type == "paused" && !a.success));
    }
}
