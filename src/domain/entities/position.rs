use crate::domain::errors::ValidationError;
use crate::domain::value_objects::drift_bounds::DriftBounds;
use crate::domain::value_objects::target_percentage::TargetPercentage;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Length of a security identifier.
pub const SECURITY_ID_LEN: usize = 24;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RawPosition {
    security_id: String,
    target: TargetPercentage,
    drift_bounds: DriftBounds,
}

/// One modeled security: identifier, target weight, and drift tolerance.
///
/// Owned exclusively by a single [`InvestmentModel`]; positions with a zero
/// target are pruned whenever the owning model is validated or persisted.
///
/// [`InvestmentModel`]: crate::domain::entities::investment_model::InvestmentModel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawPosition", into = "RawPosition")]
pub struct Position {
    security_id: String,
    target: TargetPercentage,
    drift_bounds: DriftBounds,
}

impl Position {
    pub fn new(
        security_id: impl Into<String>,
        target: TargetPercentage,
        drift_bounds: DriftBounds,
    ) -> Result<Self, ValidationError> {
        let security_id = security_id.into();
        if security_id.len() != SECURITY_ID_LEN
            || !security_id.chars().all(|c| c.is_ascii_alphanumeric())
        {
            return Err(ValidationError::InvalidSecurityId(security_id));
        }
        Ok(Position {
            security_id,
            target,
            drift_bounds,
        })
    }

    pub fn security_id(&self) -> &str {
        &self.security_id
    }

    pub fn target(&self) -> TargetPercentage {
        self.target
    }

    pub fn target_value(&self) -> Decimal {
        self.target.value()
    }

    pub fn drift_bounds(&self) -> DriftBounds {
        self.drift_bounds
    }
}

impl TryFrom<RawPosition> for Position {
    type Error = ValidationError;

    fn try_from(raw: RawPosition) -> Result<Self, Self::Error> {
        Position::new(raw.security_id, raw.target, raw.drift_bounds)
    }
}

impl From<Position> for RawPosition {
    fn from(position: Position) -> RawPosition {
        RawPosition {
            security_id: position.security_id,
            target: position.target,
            drift_bounds: position.drift_bounds,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::dec;

    fn sec(c: char) -> String {
        std::iter::repeat(c).take(SECURITY_ID_LEN).collect()
    }

    #[test]
    fn test_position_new_valid() {
        let position = Position::new(
            sec('a'),
            TargetPercentage::new(dec!(0.40)).unwrap(),
            DriftBounds::new(dec!(0.02), dec!(0.05)).unwrap(),
        );
        assert!(position.is_ok());
        let p = position.unwrap();
        assert_eq!(p.security_id(), sec('a'));
        assert_eq!(p.target_value(), dec!(0.40));
    }

    #[test]
    fn test_position_short_security_id_rejected() {
        let position = Position::new(
            "abc123",
            TargetPercentage::ZERO,
            DriftBounds::collapsed(),
        );
        assert_eq!(
            position.unwrap_err(),
            ValidationError::InvalidSecurityId("abc123".to_string())
        );
    }

    #[test]
    fn test_position_non_alphanumeric_rejected() {
        let mut id = sec('a');
        id.replace_range(0..1, "-");
        assert!(matches!(
            Position::new(id, TargetPercentage::ZERO, DriftBounds::collapsed()).unwrap_err(),
            ValidationError::InvalidSecurityId(_)
        ));
    }

    #[test]
    fn test_position_serde_revalidates() {
        let json = serde_json::json!({
            "security_id": "too-short",
            "target": "0.40",
            "drift_bounds": { "low": "0.02", "high": "0.05" }
        });
        let parsed: Result<Position, _> = serde_json::from_value(json);
        assert!(parsed.is_err());
    }
}
