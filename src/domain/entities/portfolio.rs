use crate::domain::errors::ExternalServiceError;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Point-in-time view of one portfolio's holdings.
///
/// Built per rebalance invocation and discarded afterwards; never persisted
/// by the core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortfolioSnapshot {
    pub portfolio_id: String,
    #[serde(default)]
    pub portfolio_name: Option<String>,
    pub cash_balance: Decimal,
    /// securityId -> current quantity
    pub positions: BTreeMap<String, Decimal>,
}

impl PortfolioSnapshot {
    pub fn display_name(&self) -> &str {
        self.portfolio_name.as_deref().unwrap_or(&self.portfolio_id)
    }
}

/// Prices for one rebalance invocation, securityId -> price.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PriceSheet(pub BTreeMap<String, Decimal>);

impl PriceSheet {
    pub fn new(prices: BTreeMap<String, Decimal>) -> Self {
        PriceSheet(prices)
    }

    pub fn price(&self, security_id: &str) -> Option<Decimal> {
        self.0.get(security_id).copied()
    }

    /// Every requested security must carry a strictly positive price; a
    /// missing or non-positive entry is fatal, not a warning.
    pub fn ensure_positive(
        &self,
        service: &str,
        security_ids: &[String],
    ) -> Result<(), ExternalServiceError> {
        for id in security_ids {
            match self.0.get(id) {
                Some(price) if *price > Decimal::ZERO => {}
                Some(price) => {
                    return Err(ExternalServiceError::InvalidResponse {
                        service: service.to_string(),
                        reason: format!("non-positive price {} for security {}", price, id),
                    });
                }
                None => {
                    return Err(ExternalServiceError::InvalidResponse {
                        service: service.to_string(),
                        reason: format!("missing price for security {}", id),
                    });
                }
            }
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
