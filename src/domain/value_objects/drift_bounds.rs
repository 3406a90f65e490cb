use crate::domain::errors::ValidationError;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct RawDriftBounds {
    low: Decimal,
    high: Decimal,
}

/// Tolerance band around a target weight, `low <= high`, each in [0, 1].
///
/// No rebalancing is required while a security's actual weight stays within
/// `[target - low, target + high]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawDriftBounds", into = "RawDriftBounds")]
pub struct DriftBounds {
    low: Decimal,
    high: Decimal,
}

impl DriftBounds {
    pub fn new(low: Decimal, high: Decimal) -> Result<Self, ValidationError> {
        for value in [low, high] {
            if value < Decimal::ZERO || value > Decimal::ONE {
                return Err(ValidationError::DriftOutOfRange(value));
            }
        }
        if low > high {
            return Err(ValidationError::InvalidDriftOrder { low, high });
        }
        Ok(DriftBounds { low, high })
    }

    /// Collapsed band [0, 0], used for held securities absent from the model.
    pub fn collapsed() -> Self {
        DriftBounds {
            low: Decimal::ZERO,
            high: Decimal::ZERO,
        }
    }

    pub fn low(&self) -> Decimal {
        self.low
    }

    pub fn high(&self) -> Decimal {
        self.high
    }
}

impl TryFrom<RawDriftBounds> for DriftBounds {
    type Error = ValidationError;

    fn try_from(raw: RawDriftBounds) -> Result<Self, Self::Error> {
        DriftBounds::new(raw.low, raw.high)
    }
}

impl From<DriftBounds> for RawDriftBounds {
    fn from(bounds: DriftBounds) -> RawDriftBounds {
        RawDriftBounds {
            low: bounds.low,
            high: bounds.high,
        }
    }
}
