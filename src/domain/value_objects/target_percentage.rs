use crate::domain::errors::ValidationError;
use rust_decimal::{dec, Decimal};
use serde::{Deserialize, Serialize};

/// Highest allocation a single model may carry in total.
pub const MAX_TARGET: Decimal = dec!(0.95);

/// Targets are quoted in half-percent-of-a-percent steps.
pub const TARGET_INCREMENT: Decimal = dec!(0.005);

/// Target allocation weight for one security, in [0, 0.95].
///
/// Must be exactly representable as a multiple of 0.005, or zero.
/// Construction-validated and immutable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "Decimal", into = "Decimal")]
pub struct TargetPercentage(Decimal);

impl TargetPercentage {
    pub const ZERO: TargetPercentage = TargetPercentage(Decimal::ZERO);

    pub fn new(value: Decimal) -> Result<Self, ValidationError> {
        if value < Decimal::ZERO || value > MAX_TARGET {
            return Err(ValidationError::TargetOutOfRange(value));
        }
        let remainder = value
            .checked_rem(TARGET_INCREMENT)
            .ok_or(ValidationError::InvalidTargetPrecision(value))?;
        if !remainder.is_zero() {
            return Err(ValidationError::InvalidTargetPrecision(value));
        }
        Ok(TargetPercentage(value.normalize()))
    }

    pub fn value(&self) -> Decimal {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }
}

impl TryFrom<Decimal> for TargetPercentage {
    type Error = ValidationError;

    fn try_from(value: Decimal) -> Result<Self, Self::Error> {
        TargetPercentage::new(value)
    }
}

impl From<TargetPercentage> for Decimal {
    fn from(target: TargetPercentage) -> Decimal {
        target.0
    }
}

impl std::fmt::Display for TargetPercentage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_new_valid() {
        let target = TargetPercentage::new(dec!(0.40));
        assert!(target.is_ok());
        assert_eq!(target.unwrap().value(), dec!(0.40));
    }

    #[test]
    fn test_target_zero_allowed() {
        let target = TargetPercentage::new(Decimal::ZERO).unwrap();
        assert!(target.is_zero());
    }

    #[test]
    fn test_target_smallest_increment_retained() {
        // 0.005 is the smallest non-zero target
        let target = TargetPercentage::new(dec!(0.005));
        assert!(target.is_ok());
    }

    #[test]
    fn test_target_off_grid_rejected() {
        let target = TargetPercentage::new(dec!(0.0049));
        assert_eq!(
            target.unwrap_err(),
            ValidationError::InvalidTargetPrecision(dec!(0.0049))
        );
    }

    #[test]
    fn test_target_above_ceiling_rejected() {
        let target = TargetPercentage::new(dec!(0.955));
        assert_eq!(
            target.unwrap_err(),
            ValidationError::TargetOutOfRange(dec!(0.955))
        );
    }

    #[test]
    fn test_target_negative_rejected() {
        let target = TargetPercentage::new(dec!(-0.05));
        assert!(matches!(
            target.unwrap_err(),
            ValidationError::TargetOutOfRange(_)
        ));
    }

    #[test]
    fn test_target_ceiling_exact() {
        // 0.95 itself is on the 0.005 grid and allowed
        assert!(TargetPercentage::new(dec!(0.95)).is_ok());
    }

    #[test]
    fn test_serde_round_trip_validates() {
        let json = "\"0.0049\"";
        let parsed: Result<TargetPercentage, _> = serde_json::from_str(json);
        assert!(parsed.is_err());

        let target: TargetPercentage = serde_json::from_str("\"0.40\"").unwrap();
        assert_eq!(target.value(), dec!(0.40));
    }
}
