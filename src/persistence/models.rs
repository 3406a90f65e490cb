//! Database Models
//!
//! Row types for the persistence layer and their conversions to and from the
//! domain aggregates. Nested structures travel as JSON in TEXT columns; the
//! domain constructors re-validate everything on the way out.

use super::DatabaseError;
use crate::domain::entities::investment_model::InvestmentModel;
use crate::domain::entities::position::Position;
use crate::domain::entities::rebalance_record::{PortfolioRebalance, RebalanceRecord};
use chrono::{DateTime, Utc};
use sqlx::FromRow;
use std::collections::BTreeSet;

/// Investment model row
#[derive(Debug, Clone, FromRow)]
pub struct InvestmentModelRecord {
    pub id: String,
    pub name: String,
    pub version: i64,
    pub last_rebalance_date: Option<DateTime<Utc>>,
    pub positions: String,
    pub portfolio_ids: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl InvestmentModelRecord {
    /// Rehydrate the domain aggregate, re-running its invariants.
    pub fn into_model(self) -> Result<InvestmentModel, DatabaseError> {
        let positions: Vec<Position> = serde_json::from_str(&self.positions).map_err(|e| {
            DatabaseError::QueryError(format!(
                "Corrupt positions column for model {}: {}",
                self.id, e
            ))
        })?;
        let portfolio_ids: BTreeSet<String> =
            serde_json::from_str(&self.portfolio_ids).map_err(|e| {
                DatabaseError::QueryError(format!(
                    "Corrupt portfolio_ids column for model {}: {}",
                    self.id, e
                ))
            })?;

        InvestmentModel::from_parts(
            self.id.clone(),
            self.name,
            positions,
            portfolio_ids,
            self.last_rebalance_date,
            self.version as u64,
        )
        .map_err(|e| {
            DatabaseError::QueryError(format!("Stored model {} is invalid: {}", self.id, e))
        })
    }
}

/// JSON columns for one model, ready to bind.
pub struct ModelColumns {
    pub positions: String,
    pub portfolio_ids: String,
}

impl ModelColumns {
    pub fn from_model(model: &InvestmentModel) -> Result<Self, DatabaseError> {
        let positions = serde_json::to_string(model.positions()).map_err(|e| {
            DatabaseError::QueryError(format!("Failed to serialize positions: {}", e))
        })?;
        let portfolio_ids = serde_json::to_string(model.portfolio_ids()).map_err(|e| {
            DatabaseError::QueryError(format!("Failed to serialize portfolio ids: {}", e))
        })?;
        Ok(ModelColumns {
            positions,
            portfolio_ids,
        })
    }
}

/// Rebalance record row
#[derive(Debug, Clone, FromRow)]
pub struct RebalanceRecordRow {
    pub rebalance_id: String,
    pub model_id: String,
    pub model_name: String,
    pub rebalance_date: DateTime<Utc>,
    pub portfolios: String,
    pub created_at: DateTime<Utc>,
}

impl RebalanceRecordRow {
    pub fn into_record(self) -> Result<RebalanceRecord, DatabaseError> {
        let portfolios: Vec<PortfolioRebalance> =
            serde_json::from_str(&self.portfolios).map_err(|e| {
                DatabaseError::QueryError(format!(
                    "Corrupt portfolios column for record {}: {}",
                    self.rebalance_id, e
                ))
            })?;
        Ok(RebalanceRecord {
            rebalance_id: self.rebalance_id,
            model_id: self.model_id,
            model_name: self.model_name,
            rebalance_date: self.rebalance_date,
            portfolios,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::value_objects::drift_bounds::DriftBounds;
    use crate::domain::value_objects::target_percentage::TargetPercentage;
    use rust_decimal::dec;

    fn sec(c: char) -> String {
        std::iter::repeat(c).take(24).collect()
    }

    #[test]
    fn test_model_round_trips_through_columns() {
        let model = InvestmentModel::new(
            "m1",
            "Balanced",
            vec![Position::new(
                sec('a'),
                TargetPercentage::new(dec!(0.40)).unwrap(),
                DriftBounds::new(dec!(0.02), dec!(0.05)).unwrap(),
            )
            .unwrap()],
            vec!["p1".to_string()],
        )
        .unwrap();

        let columns = ModelColumns::from_model(&model).unwrap();
        let record = InvestmentModelRecord {
            id: model.id().to_string(),
            name: model.name().to_string(),
            version: model.version() as i64,
            last_rebalance_date: None,
            positions: columns.positions,
            portfolio_ids: columns.portfolio_ids,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };

        let restored = record.into_model().unwrap();
        assert_eq!(restored, model);
    }

    #[test]
    fn test_corrupt_positions_column_rejected() {
        let record = InvestmentModelRecord {
            id: "m1".to_string(),
            name: "Broken".to_string(),
            version: 1,
            last_rebalance_date: None,
            positions: "not json".to_string(),
            portfolio_ids: "[]".to_string(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        assert!(matches!(
            record.into_model().unwrap_err(),
            DatabaseError::QueryError(_)
        ));
    }

    #[test]
    fn test_invalid_stored_target_rejected_on_rehydration() {
        // A hand-edited row with an off-grid target must not rehydrate.
        let record = InvestmentModelRecord {
            id: "m1".to_string(),
            name: "Tampered".to_string(),
            version: 1,
            last_rebalance_date: None,
            positions: format!(
                r#"[{{"security_id":"{}","target":"0.0049","drift_bounds":{{"low":"0.01","high":"0.02"}}}}]"#,
                "a".repeat(24)
            ),
            portfolio_ids: "[]".to_string(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        assert!(record.into_model().is_err());
    }
}
