//! Drift calculation
//!
//! Pure functions computing how far a security's post-trade weight sits from
//! its model target. No side effects; safe to call concurrently.

use rust_decimal::{Decimal, RoundingStrategy};

/// Number of decimal places kept at the output boundary.
const OUTPUT_SCALE: u32 = 4;

/// Actual weight and drift for one security.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Drift {
    /// `(adjusted_quantity * price) / market_value`, rounded to 4 dp.
    pub actual: Decimal,
    /// `1 - actual / target`, rounded to 4 dp; zero when target is zero.
    pub actual_drift: Decimal,
}

/// Compute a security's actual weight and drift from target.
///
/// Rounding (half-up, 4 decimal places) is applied only at the boundary;
/// the drift is derived from the full-precision weight.
pub fn compute(
    adjusted_quantity: Decimal,
    price: Decimal,
    target: Decimal,
    market_value: Decimal,
) -> Drift {
    let actual_raw = if market_value.is_zero() {
        Decimal::ZERO
    } else {
        (adjusted_quantity * price) / market_value
    };

    let drift_raw = if target.is_zero() {
        Decimal::ZERO
    } else {
        Decimal::ONE - actual_raw / target
    };

    Drift {
        actual: round_half_up(actual_raw),
        actual_drift: round_half_up(drift_raw),
    }
}

fn round_half_up(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(OUTPUT_SCALE, RoundingStrategy::MidpointAwayFromZero)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::dec;

    #[test]
    fn test_actual_weight() {
        // 12 shares at 25 in a 1000 portfolio = 30%
        let drift = compute(dec!(12), dec!(25), dec!(0.30), dec!(1000));
        assert_eq!(drift.actual, dec!(0.3000));
        assert_eq!(drift.actual_drift, dec!(0.0000));
    }

    #[test]
    fn test_drift_formula_when_target_positive() {
        // actual = 0.38, target = 0.40 -> drift = 1 - 0.38/0.40 = 0.05
        let drift = compute(dec!(38), dec!(10), dec!(0.40), dec!(1000));
        assert_eq!(drift.actual, dec!(0.3800));
        assert_eq!(drift.actual_drift, dec!(0.0500));
    }

    #[test]
    fn test_drift_zero_when_target_zero() {
        let drift = compute(dec!(10), dec!(10), Decimal::ZERO, dec!(1000));
        assert_eq!(drift.actual, dec!(0.1000));
        assert_eq!(drift.actual_drift, Decimal::ZERO);
    }

    #[test]
    fn test_zero_market_value_yields_zero_weight() {
        let drift = compute(dec!(10), dec!(10), dec!(0.40), Decimal::ZERO);
        assert_eq!(drift.actual, Decimal::ZERO);
        assert_eq!(drift.actual_drift, dec!(1.0000));
    }

    #[test]
    fn test_rounding_half_up_at_boundary() {
        // actual = 0.00005 -> rounds up to 0.0001
        let drift = compute(dec!(1), dec!(0.05), Decimal::ZERO, dec!(1000));
        assert_eq!(drift.actual, dec!(0.0001));
    }

    #[test]
    fn test_rounding_applied_only_at_boundary() {
        // actual_raw = 0.333333..., target = 0.50
        // drift = 1 - (1/3)/0.5 = 1/3 -> 0.3333, not 1 - 0.3333/0.5 = 0.3334
        let drift = compute(dec!(1), dec!(1), dec!(0.50), dec!(3));
        assert_eq!(drift.actual, dec!(0.3333));
        assert_eq!(drift.actual_drift, dec!(0.3333));
    }

    #[test]
    fn test_pure_and_idempotent() {
        let a = compute(dec!(7), dec!(13.37), dec!(0.25), dec!(512.5));
        let b = compute(dec!(7), dec!(13.37), dec!(0.25), dec!(512.5));
        assert_eq!(a, b);
    }

    #[test]
    fn test_overweight_position_has_negative_drift() {
        // actual = 0.50 vs target 0.40 -> drift = 1 - 1.25 = -0.25
        let drift = compute(dec!(50), dec!(10), dec!(0.40), dec!(1000));
        assert_eq!(drift.actual_drift, dec!(-0.2500));
    }
}
