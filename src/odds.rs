//! Odds conversions and payout math.
//!
//! Providers quote American odds; every internal computation uses decimal
//! odds. All functions here are pure and total — they form the single
//! normalization point for odds formats (no other module converts).

/// Convert American odds to decimal odds.
///
/// +150 → 2.5 (win 1.5× the stake), -110 → ~1.909.
pub fn american_to_decimal(american: i32) -> f64 {
    let a = american as f64;
    if a >= 0.0 {
        (a / 100.0) + 1.0
    } else {
        (100.0 / a.abs()) + 1.0
    }
}

/// Convert decimal odds back to the nearest American quote.
/// Decimal odds at or below 1.0 clamp to the minimum payout quote.
pub fn decimal_to_american(decimal: f64) -> i32 {
    if decimal >= 2.0 {
        ((decimal - 1.0) * 100.0).round() as i32
    } else if decimal > 1.0 {
        (-100.0 / (decimal - 1.0)).round() as i32
    } else {
        i32::MIN / 2 // degenerate quote, never produced by a real book
    }
}

/// Format American odds with the conventional +/- sign.
pub fn format_american(american: i32) -> String {
    if american > 0 {
        format!("+{american}")
    } else {
        american.to_string()
    }
}

/// Combined decimal odds for a parlay: the product of its legs.
pub fn combined_odds<I: IntoIterator<Item = f64>>(legs: I) -> f64 {
    legs.into_iter().product()
}

/// Payout in minor currency units for a winning wager: `amount × odds`,
/// rounded to the nearest unit.
pub fn payout(amount: i64, decimal_odds: f64) -> i64 {
    (amount as f64 * decimal_odds).round() as i64
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_american_to_decimal_positive() {
        assert!((american_to_decimal(100) - 2.0).abs() < 1e-10);
        assert!((american_to_decimal(150) - 2.5).abs() < 1e-10);
        assert!((american_to_decimal(250) - 3.5).abs() < 1e-10);
    }

    #[test]
    fn test_american_to_decimal_negative() {
        assert!((american_to_decimal(-100) - 2.0).abs() < 1e-10);
        assert!((american_to_decimal(-200) - 1.5).abs() < 1e-10);
        assert!((american_to_decimal(-110) - 1.9090909090909092).abs() < 1e-10);
    }

    #[test]
    fn test_decimal_to_american_round_trip() {
        for a in [-250, -110, -105, 100, 120, 150, 300] {
            let d = american_to_decimal(a);
            assert_eq!(decimal_to_american(d), a);
        }
    }

    #[test]
    fn test_format_american() {
        assert_eq!(format_american(150), "+150");
        assert_eq!(format_american(-110), "-110");
        assert_eq!(format_american(0), "0");
    }

    #[test]
    fn test_combined_odds_product_not_sum() {
        let combined = combined_odds([2.0, 1.5]);
        assert!((combined - 3.0).abs() < 1e-10);

        let triple = combined_odds([2.0, 2.0, 1.25]);
        assert!((triple - 5.0).abs() < 1e-10);
    }

    #[test]
    fn test_combined_odds_empty_is_identity() {
        // An all-void parlay has no priced legs left; the product collapses
        // to 1.0 (stake-only), which the void path refunds anyway.
        assert!((combined_odds(std::iter::empty::<f64>()) - 1.0).abs() < 1e-10);
    }

    #[test]
    fn test_payout_rounds_to_nearest_unit() {
        assert_eq!(payout(4000, 2.0), 8000);
        assert_eq!(payout(1000, 1.909), 1909);
        assert_eq!(payout(333, 1.5), 500); // 499.5 rounds up
        assert_eq!(payout(100, 1.004), 100); // 100.4 rounds down
    }
}
