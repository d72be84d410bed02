//! Shared types for the LISTERO engine.
//!
//! These types form the data model used across all modules.
//! They are designed to be stable so that platform, pricing,
//! and engine modules can depend on them without circular references.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// Product
// ---------------------------------------------------------------------------

/// A catalog item managed by the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Product {
    pub id: i64,
    /// Unique, immutable merchant key.
    pub sku: String,
    pub name: String,
    pub base_cost: f64,
    pub shipping_cost: f64,
    pub stock: i64,
    pub category: Option<String>,
    pub marketplace_category_id: Option<String>,
    /// Storefront product backing this item (stock source of truth).
    pub storefront_product_id: Option<String>,
    /// Set once the product is published on the marketplace.
    pub marketplace_item_id: Option<String>,
    pub marketplace_permalink: Option<String>,
    /// Ideal-margin price from the last pricing pass.
    pub calculated_price: Option<f64>,
    /// The price actually listed (competitive price, later adjusted).
    pub final_price: Option<f64>,
    pub margin_percentage: Option<f64>,
    pub commission_percentage: Option<f64>,
    pub status: ProductStatus,
    pub score: i64,
    pub auto_approved: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub published_at: Option<DateTime<Utc>>,
}

impl fmt::Display for Product {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} ({} | score {} | {})",
            self.sku,
            self.name,
            self.status,
            self.score,
            self.final_price
                .map(|p| format!("${p:.2}"))
                .unwrap_or_else(|| "unpriced".to_string()),
        )
    }
}

impl Product {
    /// Whether the product is live on the marketplace (published or paused
    /// post-publication). Live products are never touched by re-evaluation.
    pub fn is_live(&self) -> bool {
        matches!(self.status, ProductStatus::Published | ProductStatus::Paused)
    }

    /// Whether the product is eligible for the auto-publish sweep.
    pub fn is_auto_publishable(&self) -> bool {
        self.status == ProductStatus::Approved
            && self.auto_approved
            && self.marketplace_item_id.is_none()
    }
}

/// Product lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProductStatus {
    Pending,
    NeedsApproval,
    Approved,
    Rejected,
    Published,
    Paused,
}

impl ProductStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProductStatus::Pending => "pending",
            ProductStatus::NeedsApproval => "needs_approval",
            ProductStatus::Approved => "approved",
            ProductStatus::Rejected => "rejected",
            ProductStatus::Published => "published",
            ProductStatus::Paused => "paused",
        }
    }
}

impl fmt::Display for ProductStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ProductStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ProductStatus::Pending),
            "needs_approval" => Ok(ProductStatus::NeedsApproval),
            "approved" => Ok(ProductStatus::Approved),
            "rejected" => Ok(ProductStatus::Rejected),
            "published" => Ok(ProductStatus::Published),
            "paused" => Ok(ProductStatus::Paused),
            _ => Err(anyhow::anyhow!("Unknown product status: {s}")),
        }
    }
}

/// Intake payload for creating a product.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewProduct {
    pub sku: String,
    pub name: String,
    pub base_cost: f64,
    #[serde(default)]
    pub shipping_cost: f64,
    #[serde(default)]
    pub stock: i64,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub marketplace_category_id: Option<String>,
    #[serde(default)]
    pub storefront_product_id: Option<String>,
}

// ---------------------------------------------------------------------------
// Metrics
// ---------------------------------------------------------------------------

/// Cumulative performance counters, one-to-one with a product.
/// Written by metric ingestion/rollup; read-only to the optimizer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductMetrics {
    pub product_id: i64,
    pub total_visits: i64,
    pub total_sales: i64,
    pub total_revenue: f64,
    pub total_profit: f64,
    /// Click-through rate, percent.
    pub ctr: f64,
    /// Conversion rate, percent.
    pub conversion_rate: f64,
    pub last_sale_date: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl ProductMetrics {
    /// Whole days since the last recorded sale. `None` if never sold.
    pub fn days_since_last_sale(&self, now: DateTime<Utc>) -> Option<i64> {
        self.last_sale_date.map(|d| (now - d).num_days())
    }
}

/// Aggregated per-listing figures over some window (or all time).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VariantMetrics {
    pub visits: i64,
    pub sales: i64,
    pub revenue: f64,
    /// Conversion rate, percent. 0 when there are no visits.
    pub conversion_rate: f64,
}

impl VariantMetrics {
    pub fn new(visits: i64, sales: i64, revenue: f64) -> Self {
        let conversion_rate = if visits > 0 {
            (sales as f64 / visits as f64) * 100.0
        } else {
            0.0
        };
        Self {
            visits,
            sales,
            revenue,
            conversion_rate: (conversion_rate * 100.0).round() / 100.0,
        }
    }
}

// ---------------------------------------------------------------------------
// Listings
// ---------------------------------------------------------------------------

/// A published variant of a product. Multiple active listings exist only
/// while an A/B test is running; otherwise at most one is live.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Listing {
    pub id: i64,
    pub product_id: i64,
    pub marketplace_item_id: String,
    pub title: String,
    pub description: Option<String>,
    pub price: f64,
    pub is_ab_test: bool,
    pub ab_variant: Option<Variant>,
    pub ab_test_id: Option<i64>,
    pub status: ListingStatus,
    pub created_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListingStatus {
    Active,
    Paused,
    Ended,
}

impl ListingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ListingStatus::Active => "active",
            ListingStatus::Paused => "paused",
            ListingStatus::Ended => "ended",
        }
    }
}

impl fmt::Display for ListingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ListingStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(ListingStatus::Active),
            "paused" => Ok(ListingStatus::Paused),
            "ended" => Ok(ListingStatus::Ended),
            _ => Err(anyhow::anyhow!("Unknown listing status: {s}")),
        }
    }
}

// ---------------------------------------------------------------------------
// A/B tests
// ---------------------------------------------------------------------------

/// One of the two listing configurations under simultaneous test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Variant {
    A,
    B,
}

impl Variant {
    pub fn opposite(&self) -> Self {
        match self {
            Variant::A => Variant::B,
            Variant::B => Variant::A,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Variant::A => "A",
            Variant::B => "B",
        }
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Variant {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "A" => Ok(Variant::A),
            "B" => Ok(Variant::B),
            _ => Err(anyhow::anyhow!("Unknown variant: {s}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestType {
    Price,
    Title,
    Description,
    Combined,
}

impl TestType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TestType::Price => "price",
            TestType::Title => "title",
            TestType::Description => "description",
            TestType::Combined => "combined",
        }
    }
}

impl fmt::Display for TestType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for TestType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "price" => Ok(TestType::Price),
            "title" => Ok(TestType::Title),
            "description" => Ok(TestType::Description),
            "combined" => Ok(TestType::Combined),
            _ => Err(anyhow::anyhow!("Unknown test type: {s}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestStatus {
    Running,
    Completed,
    Cancelled,
}

impl TestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TestStatus::Running => "running",
            TestStatus::Completed => "completed",
            TestStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for TestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for TestStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(TestStatus::Running),
            "completed" => Ok(TestStatus::Completed),
            "cancelled" => Ok(TestStatus::Cancelled),
            _ => Err(anyhow::anyhow!("Unknown test status: {s}")),
        }
    }
}

/// Outcome label of a completed test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Winner {
    A,
    B,
    Tie,
}

impl Winner {
    pub fn as_str(&self) -> &'static str {
        match self {
            Winner::A => "A",
            Winner::B => "B",
            Winner::Tie => "tie",
        }
    }

    /// The losing variant, if the test wasn't a tie.
    pub fn loser(&self) -> Option<Variant> {
        match self {
            Winner::A => Some(Variant::B),
            Winner::B => Some(Variant::A),
            Winner::Tie => None,
        }
    }
}

impl fmt::Display for Winner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Winner {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "A" => Ok(Winner::A),
            "B" => Ok(Winner::B),
            "tie" => Ok(Winner::Tie),
            _ => Err(anyhow::anyhow!("Unknown winner: {s}")),
        }
    }
}

/// A paired-variant listing experiment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AbTest {
    pub id: i64,
    pub product_id: i64,
    pub test_type: TestType,
    pub variant_a_id: i64,
    pub variant_b_id: i64,
    pub status: TestStatus,
    pub winner: Option<Winner>,
    pub results: Option<serde_json::Value>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// Competitor analysis
// ---------------------------------------------------------------------------

/// Qualitative classification of how crowded a keyword's result set is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompetitionLevel {
    Low,
    Medium,
    High,
}

impl CompetitionLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            CompetitionLevel::Low => "low",
            CompetitionLevel::Medium => "medium",
            CompetitionLevel::High => "high",
        }
    }
}

impl fmt::Display for CompetitionLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for CompetitionLevel {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(CompetitionLevel::Low),
            "medium" => Ok(CompetitionLevel::Medium),
            "high" => Ok(CompetitionLevel::High),
            _ => Err(anyhow::anyhow!("Unknown competition level: {s}")),
        }
    }
}

/// Persisted snapshot of a competition analysis. Append-only history;
/// only the latest record per product is authoritative for scoring.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompetitorSnapshot {
    pub id: i64,
    pub product_id: i64,
    pub keyword: String,
    pub avg_price: f64,
    pub min_price: f64,
    pub max_price: f64,
    pub competition_level: CompetitionLevel,
    pub top_competitors: serde_json::Value,
    pub free_shipping_percentage: f64,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Action log
// ---------------------------------------------------------------------------

/// What kind of decision the engine recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Evaluated,
    EvaluationFailed,
    Published,
    PublishFailed,
    Paused,
    PriceAdjusted,
    AdsActivated,
    AdsPaused,
    Scaled,
    StockSynced,
    TestCompleted,
    TokenRefreshed,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::Evaluated => "evaluated",
            ActionKind::EvaluationFailed => "evaluation_failed",
            ActionKind::Published => "published",
            ActionKind::PublishFailed => "publish_failed",
            ActionKind::Paused => "paused",
            ActionKind::PriceAdjusted => "price_adjusted",
            ActionKind::AdsActivated => "ads_activated",
            ActionKind::AdsPaused => "ads_paused",
            ActionKind::Scaled => "scaled",
            ActionKind::StockSynced => "stock_synced",
            ActionKind::TestCompleted => "test_completed",
            ActionKind::TokenRefreshed => "token_refreshed",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An entry to append to the audit trail.
#[derive(Debug, Clone, Default)]
pub struct ActionEntry {
    pub product_id: Option<i64>,
    pub action_type: String,
    pub reason: Option<String>,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
    pub success: bool,
    pub error_message: Option<String>,
}

impl ActionEntry {
    pub fn new(kind: ActionKind, product_id: Option<i64>) -> Self {
        Self {
            product_id,
            action_type: kind.as_str().to_string(),
            success: true,
            ..Default::default()
        }
    }

    pub fn reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn change(mut self, old: impl Into<String>, new: impl Into<String>) -> Self {
        self.old_value = Some(old.into());
        self.new_value = Some(new.into());
        self
    }

    pub fn failed(mut self, error: impl Into<String>) -> Self {
        self.success = false;
        self.error_message = Some(error.into());
        self
    }
}

/// A persisted audit record. Never mutated or deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionRecord {
    pub id: i64,
    pub product_id: Option<i64>,
    pub action_type: String,
    pub reason: Option<String>,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
    pub success: bool,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Engine outcomes
// ---------------------------------------------------------------------------

/// Result of `evaluate_product`: a structured outcome, not an error,
/// for every expected business condition.
#[derive(Debug, Clone, PartialEq)]
pub enum EvaluationOutcome {
    /// Pricing + scoring ran and the lifecycle gate was applied.
    Scored {
        score: i64,
        status: ProductStatus,
        final_price: f64,
        margin_percentage: f64,
    },
    /// The product is live (published/paused); re-evaluation never touches it.
    AlreadyLive,
    /// The pricing calculator hard-failed; nothing was mutated.
    PricingFailed { reason: String },
}

/// Result of `publish_product`.
#[derive(Debug, Clone, PartialEq)]
pub enum PublishOutcome {
    Published { item_id: String },
    /// Not approved, already published, or missing a final price.
    NotEligible { reason: String },
    /// Remote creation failed; local state unchanged, failure logged.
    Failed { reason: String },
}

/// One optimizer rule application for one product.
#[derive(Debug, Clone)]
pub struct ActionOutcome {
    pub rule: &'static str,
    pub success: bool,
    pub detail: String,
}

/// Result of `optimize_product`.
#[derive(Debug, Clone)]
pub enum OptimizeOutcome {
    /// Product not published or has no metrics yet.
    Skipped { reason: &'static str },
    /// No rule fired.
    NoOp,
    /// Rules fired, in evaluation order.
    Actions(Vec<ActionOutcome>),
}

/// Why a running A/B test was not decided this pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeferReason {
    MinDuration,
    MinVisits,
    MinSales,
}

impl fmt::Display for DeferReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeferReason::MinDuration => write!(f, "minimum duration not reached"),
            DeferReason::MinVisits => write!(f, "variants below minimum visits"),
            DeferReason::MinSales => write!(f, "no variant reached minimum sales"),
        }
    }
}

/// Result of `evaluate_test`.
#[derive(Debug, Clone, PartialEq)]
pub enum TestOutcome {
    Completed { winner: Winner },
    Deferred { reason: DeferReason },
    /// Test already completed or cancelled; never re-evaluated.
    AlreadyDecided,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    #[test]
    fn test_product_status_roundtrip() {
        for status in [
            ProductStatus::Pending,
            ProductStatus::NeedsApproval,
            ProductStatus::Approved,
            ProductStatus::Rejected,
            ProductStatus::Published,
            ProductStatus::Paused,
        ] {
            let parsed: ProductStatus = status.as_str().parse().unwrap();
            assert_eq!(parsed, status);
        }
        assert!("nonsense".parse::<ProductStatus>().is_err());
    }

    #[test]
    fn test_product_status_serde_matches_as_str() {
        let json = serde_json::to_string(&ProductStatus::NeedsApproval).unwrap();
        assert_eq!(json, "\"needs_approval\"");
    }

    #[test]
    fn test_variant_opposite() {
        assert_eq!(Variant::A.opposite(), Variant::B);
        assert_eq!(Variant::B.opposite(), Variant::A);
    }

    #[test]
    fn test_winner_loser() {
        assert_eq!(Winner::A.loser(), Some(Variant::B));
        assert_eq!(Winner::B.loser(), Some(Variant::A));
        assert_eq!(Winner::Tie.loser(), None);
    }

    #[test]
    fn test_winner_roundtrip() {
        for w in [Winner::A, Winner::B, Winner::Tie] {
            assert_eq!(w.as_str().parse::<Winner>().unwrap(), w);
        }
    }

    #[test]
    fn test_variant_metrics_conversion() {
        let m = VariantMetrics::new(1000, 50, 5000.0);
        assert!((m.conversion_rate - 5.0).abs() < 1e-10);

        let empty = VariantMetrics::new(0, 0, 0.0);
        assert_eq!(empty.conversion_rate, 0.0);
    }

    #[test]
    fn test_days_since_last_sale() {
        let now = Utc::now();
        let metrics = ProductMetrics {
            product_id: 1,
            total_visits: 0,
            total_sales: 0,
            total_revenue: 0.0,
            total_profit: 0.0,
            ctr: 0.0,
            conversion_rate: 0.0,
            last_sale_date: Some(now - chrono::Duration::days(15)),
            updated_at: now,
        };
        assert_eq!(metrics.days_since_last_sale(now), Some(15));

        let never = ProductMetrics {
            last_sale_date: None,
            ..metrics
        };
        assert_eq!(never.days_since_last_sale(now), None);
    }

    #[test]
    fn test_action_entry_builder() {
        let entry = ActionEntry::new(ActionKind::PriceAdjusted, Some(7))
            .reason("low CTR")
            .change("100.00", "90.00");
        assert_eq!(entry.action_type, "price_adjusted");
        assert_eq!(entry.product_id, Some(7));
        assert!(entry.success);
        assert_eq!(entry.old_value.as_deref(), Some("100.00"));

        let failed = ActionEntry::new(ActionKind::PublishFailed, Some(7)).failed("timeout");
        assert!(!failed.success);
        assert_eq!(failed.error_message.as_deref(), Some("timeout"));
    }

    #[test]
    fn test_product_is_live_guard() {
        let mut product = sample_product();
        assert!(!product.is_live());
        product.status = ProductStatus::Published;
        assert!(product.is_live());
        product.status = ProductStatus::Paused;
        assert!(product.is_live());
    }

    #[test]
    fn test_auto_publishable() {
        let mut product = sample_product();
        product.status = ProductStatus::Approved;
        product.auto_approved = true;
        assert!(product.is_auto_publishable());

        product.marketplace_item_id = Some("MLM123".to_string());
        assert!(!product.is_auto_publishable());
    }

    #[test]
    fn test_product_display() {
        let product = sample_product();
        let display = format!("{product}");
        assert!(display.contains("SKU-001"));
        assert!(display.contains("pending"));
        assert!(display.contains("unpriced"));
    }

    pub(crate) fn sample_product() -> Product {
        Product {
            id: 1,
            sku: "SKU-001".to_string(),
            name: "Cable USB-C 2m".to_string(),
            base_cost: 100.0,
            shipping_cost: 0.0,
            stock: 25,
            category: Some("electronics".to_string()),
            marketplace_category_id: None,
            storefront_product_id: None,
            marketplace_item_id: None,
            marketplace_permalink: None,
            calculated_price: None,
            final_price: None,
            margin_percentage: None,
            commission_percentage: None,
            status: ProductStatus::Pending,
            score: 0,
            auto_approved: false,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            published_at: None,
        }
    }
}
