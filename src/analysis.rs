//! Competition analysis.
//!
//! Searches the marketplace for a keyword, derives price statistics and a
//! competition-level classification, persists an append-only snapshot, and
//! returns a summary for the scoring function and pricing decisions.

use anyhow::Result;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::BusinessRules;
use crate::platforms::{MarketplaceApi, SearchItem};
use crate::pricing::round2;
use crate::storage::CatalogStore;
use crate::types::CompetitionLevel;

/// How many results to request from the marketplace.
const SEARCH_LIMIT: u32 = 20;

/// How many top-relevance items feed the price statistics.
const TOP_ITEMS: usize = 10;

/// Result-count floor below which a keyword is uncontested.
const LOW_COMPETITION_RESULTS: usize = 10;

/// Result-count ceiling for the medium classification.
const MEDIUM_COMPETITION_RESULTS: usize = 50;

/// Price coefficient-of-variation (percent) above which a scattered market
/// still counts as medium rather than high competition.
const MEDIUM_VARIANCE_PCT: f64 = 20.0;

/// One competitor kept in the snapshot, in relevance order.
#[derive(Debug, Clone, Serialize)]
pub struct CompetitorItem {
    pub id: String,
    pub title: String,
    pub price: f64,
    pub sold_quantity: i64,
    pub free_shipping: bool,
}

/// Derived statistics over one keyword's result set.
#[derive(Debug, Clone, Serialize)]
pub struct CompetitionSummary {
    pub avg_price: f64,
    pub min_price: f64,
    pub max_price: f64,
    pub competition_level: CompetitionLevel,
    pub top_competitors: Vec<CompetitorItem>,
    pub free_shipping_percentage: f64,
    pub should_offer_free_shipping: bool,
}

/// Classify crowdedness from the result count and price dispersion.
fn classify(total_results: usize, variance_pct: f64) -> CompetitionLevel {
    if total_results < LOW_COMPETITION_RESULTS {
        CompetitionLevel::Low
    } else if total_results < MEDIUM_COMPETITION_RESULTS && variance_pct > MEDIUM_VARIANCE_PCT {
        CompetitionLevel::Medium
    } else {
        CompetitionLevel::High
    }
}

/// Sample standard deviation. 0 for fewer than two samples.
fn stdev(values: &[f64], mean: f64) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let sum_sq: f64 = values.iter().map(|v| (v - mean).powi(2)).sum();
    (sum_sq / (values.len() - 1) as f64).sqrt()
}

/// Derive the summary from a search result set.
///
/// Statistics run over the top items with a positive price; the
/// free-shipping share runs over the full result set. `None` when no item
/// carries a usable price.
pub(crate) fn summarize(items: &[SearchItem], rules: &BusinessRules) -> Option<CompetitionSummary> {
    let mut prices = Vec::new();
    let mut top_competitors = Vec::new();

    for item in items.iter().take(TOP_ITEMS) {
        if item.price > 0.0 {
            prices.push(item.price);
        }
        top_competitors.push(CompetitorItem {
            id: item.id.clone(),
            title: item.title.clone(),
            price: item.price,
            sold_quantity: item.sold_quantity,
            free_shipping: item.free_shipping,
        });
    }

    if prices.is_empty() {
        return None;
    }

    let avg_price = prices.iter().sum::<f64>() / prices.len() as f64;
    let min_price = prices.iter().cloned().fold(f64::INFINITY, f64::min);
    let max_price = prices.iter().cloned().fold(f64::NEG_INFINITY, f64::max);

    let free_shipping_count = items.iter().filter(|i| i.free_shipping).count();
    let free_shipping_percentage = free_shipping_count as f64 / items.len() as f64 * 100.0;

    let variance_pct = if avg_price > 0.0 {
        stdev(&prices, avg_price) / avg_price * 100.0
    } else {
        0.0
    };

    Some(CompetitionSummary {
        avg_price: round2(avg_price),
        min_price: round2(min_price),
        max_price: round2(max_price),
        competition_level: classify(items.len(), variance_pct),
        top_competitors,
        free_shipping_percentage: round2(free_shipping_percentage),
        should_offer_free_shipping: free_shipping_percentage > rules.free_shipping_threshold_pct,
    })
}

/// Queries the marketplace and persists competition snapshots.
pub struct CompetitorAnalyzer {
    marketplace: Arc<dyn MarketplaceApi>,
    store: CatalogStore,
    rules: BusinessRules,
}

impl CompetitorAnalyzer {
    pub fn new(marketplace: Arc<dyn MarketplaceApi>, store: CatalogStore, rules: BusinessRules) -> Self {
        Self {
            marketplace,
            store,
            rules,
        }
    }

    /// Analyze the competition for a product under a search keyword.
    ///
    /// Returns `None` (no snapshot persisted) when the search comes back
    /// empty or without any priced item.
    pub async fn analyze(
        &self,
        product_id: i64,
        keyword: &str,
    ) -> Result<Option<CompetitionSummary>> {
        let items = self.marketplace.search_items(keyword, SEARCH_LIMIT).await?;

        if items.is_empty() {
            warn!(keyword, "No competitors found");
            return Ok(None);
        }

        let Some(summary) = summarize(&items, &self.rules) else {
            warn!(keyword, "No priced competitors found");
            return Ok(None);
        };

        self.store
            .insert_analysis(
                product_id,
                keyword,
                summary.avg_price,
                summary.min_price,
                summary.max_price,
                summary.competition_level,
                &serde_json::to_value(&summary.top_competitors)?,
                summary.free_shipping_percentage,
            )
            .await?;

        info!(
            keyword,
            level = %summary.competition_level,
            avg_price = summary.avg_price,
            "Competition analyzed"
        );

        Ok(Some(summary))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platforms::MockMarketplaceApi;

    fn item(id: &str, price: f64, free_shipping: bool) -> SearchItem {
        SearchItem {
            id: id.to_string(),
            title: format!("Item {id}"),
            price,
            sold_quantity: 10,
            free_shipping,
        }
    }

    fn items_with_prices(prices: &[f64]) -> Vec<SearchItem> {
        prices
            .iter()
            .enumerate()
            .map(|(i, p)| item(&format!("MLM{i}"), *p, false))
            .collect()
    }

    #[test]
    fn test_classify_low_on_sparse_results() {
        assert_eq!(classify(3, 50.0), CompetitionLevel::Low);
        assert_eq!(classify(9, 0.0), CompetitionLevel::Low);
    }

    #[test]
    fn test_classify_medium_needs_scatter() {
        assert_eq!(classify(20, 25.0), CompetitionLevel::Medium);
        // Tight prices in a mid-sized result set read as crowded.
        assert_eq!(classify(20, 5.0), CompetitionLevel::High);
    }

    #[test]
    fn test_classify_high_on_large_results() {
        assert_eq!(classify(50, 80.0), CompetitionLevel::High);
        assert_eq!(classify(500, 5.0), CompetitionLevel::High);
    }

    #[test]
    fn test_stdev() {
        assert_eq!(stdev(&[10.0], 10.0), 0.0);
        let values = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        let mean = 5.0;
        assert!((stdev(&values, mean) - 2.138).abs() < 0.01);
    }

    #[test]
    fn test_summarize_stats_over_top_ten() {
        let rules = BusinessRules::default();
        // 12 items; only the first 10 feed the stats.
        let mut items = items_with_prices(&[100.0; 10]);
        items.push(item("MLM99", 10_000.0, false));
        items.push(item("MLM100", 10_000.0, false));

        let summary = summarize(&items, &rules).unwrap();
        assert_eq!(summary.avg_price, 100.0);
        assert_eq!(summary.min_price, 100.0);
        assert_eq!(summary.max_price, 100.0);
        assert_eq!(summary.top_competitors.len(), 10);
    }

    #[test]
    fn test_summarize_ignores_unpriced_items() {
        let rules = BusinessRules::default();
        let items = vec![item("a", 0.0, false), item("b", 50.0, false)];
        let summary = summarize(&items, &rules).unwrap();
        assert_eq!(summary.avg_price, 50.0);
        // Unpriced items still appear in the competitor snapshot.
        assert_eq!(summary.top_competitors.len(), 2);
    }

    #[test]
    fn test_summarize_none_without_prices() {
        let rules = BusinessRules::default();
        let items = vec![item("a", 0.0, false)];
        assert!(summarize(&items, &rules).is_none());
    }

    #[test]
    fn test_free_shipping_share_over_full_set() {
        let rules = BusinessRules::default();
        let mut items = items_with_prices(&[100.0; 4]);
        for entry in items.iter_mut().take(3) {
            entry.free_shipping = true;
        }
        let summary = summarize(&items, &rules).unwrap();
        assert_eq!(summary.free_shipping_percentage, 75.0);
        assert!(summary.should_offer_free_shipping);

        let few = items_with_prices(&[100.0; 4]);
        let summary = summarize(&few, &rules).unwrap();
        assert_eq!(summary.free_shipping_percentage, 0.0);
        assert!(!summary.should_offer_free_shipping);
    }

    #[tokio::test]
    async fn test_analyze_persists_snapshot() {
        let store = CatalogStore::in_memory().await.unwrap();
        let product = store
            .create_product(&crate::types::NewProduct {
                sku: "SKU-1".to_string(),
                name: "Cable".to_string(),
                base_cost: 100.0,
                shipping_cost: 0.0,
                stock: 10,
                category: None,
                marketplace_category_id: None,
                storefront_product_id: None,
            })
            .await
            .unwrap();

        let mut marketplace = MockMarketplaceApi::new();
        marketplace
            .expect_search_items()
            .returning(|_, _| Ok(vec![
                SearchItem {
                    id: "MLM1".to_string(),
                    title: "Cable A".to_string(),
                    price: 120.0,
                    sold_quantity: 5,
                    free_shipping: true,
                },
                SearchItem {
                    id: "MLM2".to_string(),
                    title: "Cable B".to_string(),
                    price: 80.0,
                    sold_quantity: 2,
                    free_shipping: true,
                },
            ]));

        let analyzer = CompetitorAnalyzer::new(
            Arc::new(marketplace),
            store.clone(),
            BusinessRules::default(),
        );
        let summary = analyzer.analyze(product.id, "cable usb").await.unwrap().unwrap();

        assert_eq!(summary.competition_level, CompetitionLevel::Low);
        assert_eq!(summary.avg_price, 100.0);
        assert!(summary.should_offer_free_shipping);

        let snapshot = store.latest_analysis(product.id).await.unwrap().unwrap();
        assert_eq!(snapshot.keyword, "cable usb");
        assert_eq!(snapshot.competition_level, CompetitionLevel::Low);
    }

    #[tokio::test]
    async fn test_analyze_empty_search_yields_none() {
        let store = CatalogStore::in_memory().await.unwrap();
        let mut marketplace = MockMarketplaceApi::new();
        marketplace.expect_search_items().returning(|_, _| Ok(vec![]));

        let analyzer = CompetitorAnalyzer::new(
            Arc::new(marketplace),
            store.clone(),
            BusinessRules::default(),
        );
        let summary = analyzer.analyze(1, "nothing").await.unwrap();
        assert!(summary.is_none());
        assert!(store.latest_analysis(1).await.unwrap().is_none());
    }
}
