use crate::domain::entities::investment_model::InvestmentModel;
use crate::domain::entities::portfolio::{PortfolioSnapshot, PriceSheet};
use crate::domain::errors::{ExternalServiceError, RebalanceError};
use rust_decimal::prelude::ToPrimitive;
use thiserror::Error;

/// Relative feasibility tolerance, in weight space.
const FEASIBILITY_TOL: f64 = 1e-6;

/// Why a relaxation backend could not produce a solution.
#[derive(Debug, Error)]
pub enum SolverFailure {
    #[error("numerical failure: {0}")]
    Numerical(String),

    #[error("unsupported formulation: {0}")]
    Unsupported(String),
}

/// One security in the combined universe, with its band and current holding.
///
/// Securities held but absent from the model carry `weight = low_drift =
/// high_drift = 0`, collapsing their band to [0, 0].
#[derive(Debug, Clone)]
pub struct SecurityTerm {
    pub security_id: String,
    pub price: f64,
    pub weight: f64,
    pub low_drift: f64,
    pub high_drift: f64,
    pub current_quantity: i64,
}

/// The rebalancing problem for one portfolio.
///
/// Market value and prices are fixed constants; the decision variables are
/// the new integer quantities. Terms are kept in ascending security id order
/// so every downstream step (including rounding repair) is deterministic.
#[derive(Debug, Clone)]
pub struct RebalanceProblem {
    pub market_value: f64,
    pub terms: Vec<SecurityTerm>,
}

impl RebalanceProblem {
    /// Assemble the problem from the portfolio snapshot, the owning model,
    /// and the fetched prices. `universe` must be the sorted combined set of
    /// held and modeled securities, with a validated price for each.
    pub fn build(
        snapshot: &PortfolioSnapshot,
        model: &InvestmentModel,
        prices: &PriceSheet,
        universe: &[String],
        market_value: rust_decimal::Decimal,
    ) -> Result<Self, RebalanceError> {
        let mv = market_value.to_f64().ok_or_else(|| {
            RebalanceError::ExternalService(ExternalServiceError::InvalidResponse {
                service: "position-service".to_string(),
                reason: format!("market value {} is not representable", market_value),
            })
        })?;

        let mut terms = Vec::with_capacity(universe.len());
        for security_id in universe {
            let price = prices.price(security_id).and_then(|p| p.to_f64()).ok_or_else(|| {
                RebalanceError::ExternalService(ExternalServiceError::InvalidResponse {
                    service: "price-service".to_string(),
                    reason: format!("missing price for security {}", security_id),
                })
            })?;

            let current = snapshot
                .positions
                .get(security_id)
                .copied()
                .unwrap_or_default();
            let current_quantity = current.round().to_i64().ok_or_else(|| {
                RebalanceError::ExternalService(ExternalServiceError::InvalidResponse {
                    service: "position-service".to_string(),
                    reason: format!(
                        "quantity {} for security {} is not an integer share count",
                        current, security_id
                    ),
                })
            })?;

            let (weight, low_drift, high_drift) = match model.position(security_id) {
                Some(position) => (
                    position.target_value().to_f64().unwrap_or(0.0),
                    position.drift_bounds().low().to_f64().unwrap_or(0.0),
                    position.drift_bounds().high().to_f64().unwrap_or(0.0),
                ),
                None => (0.0, 0.0, 0.0),
            };

            terms.push(SecurityTerm {
                security_id: security_id.clone(),
                price,
                weight,
                low_drift,
                high_drift,
                current_quantity,
            });
        }

        Ok(RebalanceProblem {
            market_value: mv,
            terms,
        })
    }

    /// Continuous band for one term, in portfolio-value space, with the
    /// non-negativity floor already applied.
    pub fn value_band(&self, term: &SecurityTerm) -> (f64, f64) {
        let lower = (self.market_value * (term.weight - term.low_drift)).max(0.0);
        let upper = self.market_value * (term.weight + term.high_drift);
        (lower, upper)
    }

    /// Integer quantity interval per term, or `None` when any interval is
    /// empty (the problem is infeasible).
    pub fn integer_bounds(&self) -> Option<Vec<(i64, i64)>> {
        let mut bounds = Vec::with_capacity(self.terms.len());
        for term in &self.terms {
            let (lower_value, upper_value) = self.value_band(term);
            // Tolerance scaled to the portfolio so share-price magnitude
            // cannot flip a boundary quantity in or out of the band.
            let tol = self.market_value * FEASIBILITY_TOL / term.price;

            let lower = ((lower_value / term.price) - tol).ceil().max(0.0) as i64;
            let upper = ((upper_value / term.price) + tol).floor() as i64;
            if upper < lower {
                return None;
            }
            bounds.push((lower, upper));
        }
        Some(bounds)
    }
}
