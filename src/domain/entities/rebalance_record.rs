use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TransactionType {
    Buy,
    Sell,
}

impl std::fmt::Display for TransactionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransactionType::Buy => write!(f, "BUY"),
            TransactionType::Sell => write!(f, "SELL"),
        }
    }
}

/// One trade proposed by the optimizer, emitted only for a non-zero delta.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionDto {
    pub transaction_type: TransactionType,
    pub security_id: String,
    pub quantity: u64,
    pub trade_date: NaiveDate,
}

/// Per-security drift entry in the client-facing result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriftDto {
    pub security_id: String,
    pub original_quantity: Decimal,
    pub adjusted_quantity: Decimal,
    pub target: Decimal,
    pub high_drift: Decimal,
    pub low_drift: Decimal,
    /// Post-trade weight, rounded to 4 decimal places (half-up).
    pub actual: Decimal,
}

/// Per-portfolio result handed back to the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RebalanceDto {
    pub portfolio_id: String,
    pub portfolio_name: String,
    pub rebalance_id: String,
    pub transactions: Vec<TransactionDto>,
    pub drifts: Vec<DriftDto>,
}

/// Before/after state of one security inside the audit record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionState {
    pub security_id: String,
    pub price: Decimal,
    pub original_quantity: Decimal,
    pub adjusted_quantity: Decimal,
    pub target: Decimal,
    pub low_drift: Decimal,
    pub high_drift: Decimal,
    pub actual: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortfolioRebalance {
    pub portfolio_id: String,
    pub portfolio_name: String,
    pub market_value: Decimal,
    pub positions: Vec<PositionState>,
}

/// Durable audit record for one rebalance invocation.
///
/// Created once, never mutated; a new rebalance produces a new record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RebalanceRecord {
    pub rebalance_id: String,
    pub model_id: String,
    pub model_name: String,
    pub rebalance_date: DateTime<Utc>,
    pub portfolios: Vec<PortfolioRebalance>,
}

impl RebalanceRecord {
    pub fn new(
        model_id: impl Into<String>,
        model_name: impl Into<String>,
        rebalance_date: DateTime<Utc>,
        portfolios: Vec<PortfolioRebalance>,
    ) -> Self {
        let model_id = model_id.into();
        let rebalance_id = format!(
            "rbl_{}_{}",
            model_id,
            rebalance_date.timestamp_millis()
        );
        RebalanceRecord {
            rebalance_id,
            model_id,
            model_name: model_name.into(),
            rebalance_date,
            portfolios,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::dec;

    #[test]
    fn test_transaction_type_display() {
        assert_eq!(TransactionType::Buy.to_string(), "BUY");
        assert_eq!(TransactionType::Sell.to_string(), "SELL");
    }

    #[test]
    fn test_transaction_type_serializes_uppercase() {
        let json = serde_json::to_string(&TransactionType::Sell).unwrap();
        assert_eq!(json, "\"SELL\"");
    }

    #[test]
    fn test_record_id_embeds_model_and_timestamp() {
        let date = Utc::now();
        let record = RebalanceRecord::new("m1", "Balanced", date, vec![]);
        assert!(record.rebalance_id.starts_with("rbl_m1_"));
        assert_eq!(record.model_name, "Balanced");
    }

    #[test]
    fn test_decimal_fields_serialize_as_exact_strings() {
        let drift = DriftDto {
            security_id: "a".repeat(24),
            original_quantity: dec!(10),
            adjusted_quantity: dec!(12),
            target: dec!(0.40),
            high_drift: dec!(0.05),
            low_drift: dec!(0.02),
            actual: dec!(0.4125),
        };
        let json = serde_json::to_value(&drift).unwrap();
        assert_eq!(json["actual"], serde_json::json!("0.4125"));
        assert_eq!(json["target"], serde_json::json!("0.40"));
    }
}
