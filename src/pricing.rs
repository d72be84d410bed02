//! Price ladder calculation.
//!
//! Pure functions: base cost in, tax-inclusive price ladder out. Commission
//! and ISR retention are treated as a combined cost rate on tax-exclusive
//! revenue; IVA is applied on top at the end. All monetary outputs are
//! rounded to two decimals.

use serde::Serialize;
use tracing::debug;

use crate::config::BusinessRules;

/// Result of a pricing pass.
#[derive(Debug, Clone, Serialize)]
pub struct PriceQuote {
    pub base_cost: f64,
    pub commission_percentage: f64,
    pub shipping_cost: f64,
    pub iva_percentage: f64,
    pub isr_percentage: f64,
    /// Breakeven price, tax inclusive.
    pub min_price: f64,
    /// Price carrying the minimum acceptable margin, tax inclusive.
    pub min_margin_price: f64,
    /// Price carrying the ideal margin, tax inclusive.
    pub optimal_price: f64,
    /// Midpoint of the min-margin and ideal-margin prices.
    pub competitive_price: f64,
    /// Realized margin at the competitive price, percent.
    pub margin_percentage: f64,
    /// Absolute profit at the competitive price.
    pub profit: f64,
}

/// Hard failures of the calculator. The caller treats these as a full stop
/// for the product: status unchanged, error logged.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum PricingError {
    #[error("base cost must be positive (got {0:.2})")]
    NonPositiveCost(f64),
    #[error("cost rates leave no revenue: {0}")]
    NonFinite(&'static str),
}

/// Round to two decimal places (money boundary).
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Pre-tax price that yields `margin` percent after the combined cost rate.
fn price_for_margin(base_cost: f64, cost_rate: f64, margin: f64) -> Result<f64, PricingError> {
    let denominator = 1.0 - (cost_rate + margin) / 100.0;
    if denominator <= 0.0 {
        return Err(PricingError::NonFinite("cost rate + margin >= 100%"));
    }
    let price = base_cost / denominator;
    if !price.is_finite() {
        return Err(PricingError::NonFinite("division overflowed"));
    }
    Ok(price)
}

/// Compute the full price ladder for a product.
///
/// `commission_percentage` is the category-level commission; callers fall
/// back to `rules.commission_percentage` when no category figure is known.
pub fn quote(
    base_cost: f64,
    shipping_cost: f64,
    commission_percentage: f64,
    rules: &BusinessRules,
) -> Result<PriceQuote, PricingError> {
    if base_cost <= 0.0 {
        return Err(PricingError::NonPositiveCost(base_cost));
    }

    let iva = rules.iva_percentage;
    let isr = rules.isr_percentage;
    let cost_rate = commission_percentage + isr;

    let min_price = price_for_margin(base_cost, cost_rate, 0.0)?;
    let min_margin_price = price_for_margin(base_cost, cost_rate, rules.min_margin_percentage)?;
    let ideal_margin_price = price_for_margin(base_cost, cost_rate, rules.ideal_margin_percentage)?;

    let iva_factor = 1.0 + iva / 100.0;
    let min_price_taxed = min_price * iva_factor;
    let min_margin_taxed = min_margin_price * iva_factor;
    let ideal_margin_taxed = ideal_margin_price * iva_factor;

    let competitive_price = (min_margin_taxed + ideal_margin_taxed) / 2.0;

    // Realized margin at the competitive price: strip tax, subtract the
    // combined cost rate plus shipping and base cost from tax-exclusive
    // revenue, divide profit by that revenue.
    let revenue = competitive_price / iva_factor;
    let costs = cost_rate / 100.0 * revenue + shipping_cost;
    let profit = revenue - base_cost - costs;
    let margin_percentage = (profit / revenue) * 100.0;
    if !margin_percentage.is_finite() {
        return Err(PricingError::NonFinite("margin division"));
    }

    debug!(
        base_cost,
        competitive = round2(competitive_price),
        margin = round2(margin_percentage),
        "Price ladder computed"
    );

    Ok(PriceQuote {
        base_cost: round2(base_cost),
        commission_percentage,
        shipping_cost,
        iva_percentage: iva,
        isr_percentage: isr,
        min_price: round2(min_price_taxed),
        min_margin_price: round2(min_margin_taxed),
        optimal_price: round2(ideal_margin_taxed),
        competitive_price: round2(competitive_price),
        margin_percentage: round2(margin_percentage),
        profit: round2(profit),
    })
}

/// Realized margin (percent) at an arbitrary tax-inclusive price.
///
/// Same cost model as [`quote`]; used by the optimizer to check a reduced
/// price against the margin floor before pushing it remotely.
pub fn margin_for_price(
    price: f64,
    base_cost: f64,
    shipping_cost: f64,
    commission_percentage: f64,
    rules: &BusinessRules,
) -> Result<f64, PricingError> {
    if base_cost <= 0.0 {
        return Err(PricingError::NonPositiveCost(base_cost));
    }
    if price <= 0.0 {
        return Err(PricingError::NonFinite("non-positive price"));
    }

    let iva_factor = 1.0 + rules.iva_percentage / 100.0;
    let revenue = price / iva_factor;
    let cost_rate = commission_percentage + rules.isr_percentage;
    let costs = cost_rate / 100.0 * revenue + shipping_cost;
    let profit = revenue - base_cost - costs;
    let margin = (profit / revenue) * 100.0;
    if !margin.is_finite() {
        return Err(PricingError::NonFinite("margin division"));
    }
    Ok(round2(margin))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn rules() -> BusinessRules {
        BusinessRules::default()
    }

    #[test]
    fn test_pinned_ladder() {
        // base 100, commission 13, ISR 1, IVA 16, margins 30/40.
        let q = quote(100.0, 0.0, 13.0, &rules()).unwrap();
        assert_eq!(q.min_price, 134.88);
        assert_eq!(q.min_margin_price, 207.14);
        assert_eq!(q.optimal_price, 252.17);
        assert_eq!(q.competitive_price, 229.66);
        assert_eq!(q.margin_percentage, 35.49);
    }

    #[test]
    fn test_ladder_is_monotonic() {
        for base in [1.0, 10.0, 99.99, 450.0, 12_000.0] {
            let q = quote(base, 0.0, 13.0, &rules()).unwrap();
            assert!(q.min_price < q.min_margin_price, "base {base}");
            assert!(q.min_margin_price < q.optimal_price, "base {base}");
            assert!(q.min_margin_price < q.competitive_price);
            assert!(q.competitive_price < q.optimal_price);
        }
    }

    #[test]
    fn test_margin_between_min_and_ideal() {
        let r = rules();
        for base in [5.0, 100.0, 2_500.0] {
            let q = quote(base, 0.0, 13.0, &r).unwrap();
            assert!(q.margin_percentage >= r.min_margin_percentage);
            assert!(q.margin_percentage <= r.ideal_margin_percentage);
        }
    }

    #[test]
    fn test_shipping_lowers_margin() {
        let free = quote(100.0, 0.0, 13.0, &rules()).unwrap();
        let paid = quote(100.0, 25.0, 13.0, &rules()).unwrap();
        // The ladder itself ignores shipping; the realized margin doesn't.
        assert_eq!(free.competitive_price, paid.competitive_price);
        assert!(paid.margin_percentage < free.margin_percentage);
    }

    #[test]
    fn test_non_positive_cost_rejected() {
        assert_eq!(
            quote(0.0, 0.0, 13.0, &rules()).unwrap_err(),
            PricingError::NonPositiveCost(0.0)
        );
        assert!(matches!(
            quote(-5.0, 0.0, 13.0, &rules()).unwrap_err(),
            PricingError::NonPositiveCost(_)
        ));
    }

    #[test]
    fn test_degenerate_rates_rejected() {
        // commission + ISR + ideal margin >= 100% leaves no revenue.
        let err = quote(100.0, 0.0, 60.0, &rules()).unwrap_err();
        assert!(matches!(err, PricingError::NonFinite(_)));
    }

    #[test]
    fn test_margin_for_price_matches_quote() {
        let r = rules();
        let q = quote(100.0, 0.0, 13.0, &r).unwrap();
        let margin = margin_for_price(q.competitive_price, 100.0, 0.0, 13.0, &r).unwrap();
        // Recomputing from the rounded price stays within a cent of the quote.
        assert!((margin - q.margin_percentage).abs() < 0.05);
    }

    #[test]
    fn test_margin_for_price_reduction() {
        let r = rules();
        // A 10% cut from the competitive price of a base-100 product dips
        // below the 30% floor, exactly the optimizer's abort case.
        let reduced = round2(229.66 * 0.9);
        let margin = margin_for_price(reduced, 100.0, 0.0, 13.0, &r).unwrap();
        assert!(margin < r.min_margin_percentage);
    }

    #[test]
    fn test_margin_for_price_invalid_inputs() {
        let r = rules();
        assert!(margin_for_price(100.0, 0.0, 0.0, 13.0, &r).is_err());
        assert!(margin_for_price(0.0, 100.0, 0.0, 13.0, &r).is_err());
    }

    #[test]
    fn test_round2() {
        assert_eq!(round2(229.658385), 229.66);
        assert_eq!(round2(134.883720), 134.88);
        assert_eq!(round2(1.005), 1.0); // f64 repr of 1.005 is just below
    }
}
