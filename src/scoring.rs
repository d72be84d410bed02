//! Product quality scoring.
//!
//! Pure and deterministic: margin, competition level, price gap and an
//! optional trend signal in, a 0–100 score with a labeled breakdown out.
//!
//! Weights: margin 40 pts, competition 25 pts, price competitiveness 20 pts,
//! trend 15 pts.

use serde::Serialize;

use crate::config::BusinessRules;
use crate::types::{CompetitionLevel, ProductStatus};

/// Score with its per-factor breakdown, retained for audit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScoreCard {
    pub total: i64,
    pub margin_pts: i64,
    pub competition_pts: i64,
    pub price_pts: i64,
    pub trend_pts: i64,
}

impl ScoreCard {
    /// Breakdown map for the action log / results snapshot.
    pub fn breakdown(&self) -> serde_json::Value {
        serde_json::json!({
            "margin": self.margin_pts,
            "competition": self.competition_pts,
            "price": self.price_pts,
            "trend": self.trend_pts,
            "total": self.total,
        })
    }
}

/// Margin factor: 0 below the minimum margin, 20 at the minimum, linearly up
/// to 40 at the ideal margin.
fn margin_points(margin_percentage: f64, rules: &BusinessRules) -> i64 {
    if margin_percentage >= rules.ideal_margin_percentage {
        40
    } else if margin_percentage >= rules.min_margin_percentage {
        let range = (margin_percentage - rules.min_margin_percentage)
            / (rules.ideal_margin_percentage - rules.min_margin_percentage);
        (20.0 + 20.0 * range) as i64
    } else {
        0
    }
}

fn competition_points(level: CompetitionLevel) -> i64 {
    match level {
        CompetitionLevel::Low => 25,
        CompetitionLevel::Medium => 15,
        CompetitionLevel::High => 5,
    }
}

/// Price-competitiveness factor from the relative gap (percent) between the
/// competitive and ideal prices. An undefined gap scores the 10-pt default.
fn price_points(price_gap_pct: Option<f64>) -> i64 {
    match price_gap_pct {
        None => 10,
        Some(gap) if gap <= 5.0 => 20,
        Some(gap) if gap <= 10.0 => 15,
        Some(gap) if gap <= 15.0 => 10,
        Some(_) => 5,
    }
}

/// Trend factor. The signal is external (0–15); when unavailable the
/// mid-value default applies.
fn trend_points(trend: Option<f64>) -> i64 {
    match trend {
        None => 10,
        Some(t) => (t.clamp(0.0, 15.0)).round() as i64,
    }
}

/// Score a product from its pricing result and competition signal.
pub fn score(
    margin_percentage: f64,
    competition: CompetitionLevel,
    price_gap_pct: Option<f64>,
    trend: Option<f64>,
    rules: &BusinessRules,
) -> ScoreCard {
    let margin_pts = margin_points(margin_percentage, rules);
    let competition_pts = competition_points(competition);
    let price_pts = price_points(price_gap_pct);
    let trend_pts = trend_points(trend);
    ScoreCard {
        total: margin_pts + competition_pts + price_pts + trend_pts,
        margin_pts,
        competition_pts,
        price_pts,
        trend_pts,
    }
}

/// Relative gap (percent) between the competitive and ideal prices.
/// `None` when the ideal price is not positive.
pub fn price_gap_pct(competitive_price: f64, optimal_price: f64) -> Option<f64> {
    if optimal_price > 0.0 {
        Some((competitive_price - optimal_price).abs() / optimal_price * 100.0)
    } else {
        None
    }
}

/// Lifecycle gate applied to a freshly scored product.
/// Returns the target status and whether it was auto-approved.
pub fn status_for_score(score: i64, rules: &BusinessRules) -> (ProductStatus, bool) {
    if score >= rules.score_auto_publish {
        (ProductStatus::Approved, true)
    } else if score >= rules.score_needs_approval {
        (ProductStatus::NeedsApproval, false)
    } else {
        (ProductStatus::Rejected, false)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
