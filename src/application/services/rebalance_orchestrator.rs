//! Rebalance Orchestrator
//!
//! Drives one portfolio's rebalance pipeline (fetch state, optimize, derive
//! transactions and drift) and fans it out across every portfolio attached
//! to a model with bounded concurrency and per-portfolio failure isolation.

use crate::config::RebalanceConfig;
use crate::domain::entities::investment_model::InvestmentModel;
use crate::domain::entities::rebalance_record::{
    DriftDto, PortfolioRebalance, PositionState, RebalanceDto, RebalanceRecord, TransactionDto,
    TransactionType,
};
use crate::domain::errors::RebalanceError;
use crate::domain::repositories::{ModelSource, PositionSource, PriceSource, RebalanceStore};
use crate::domain::services::drift_calculator;
use crate::domain::services::optimization::problem::RebalanceProblem;
use crate::domain::services::optimization::{OptimizationEngine, OptimizationStatus};
use chrono::Utc;
use futures_util::stream::{self, StreamExt};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Result of one portfolio inside a model-wide run.
#[derive(Debug)]
pub struct PortfolioOutcome {
    pub portfolio_id: String,
    pub result: Result<RebalanceDto, RebalanceError>,
}

/// Everything a model-wide rebalance produced, one entry per portfolio.
///
/// Callers decide how to surface partial failure; the orchestrator never
/// drops an entry.
#[derive(Debug)]
pub struct ModelRebalanceReport {
    pub model_id: String,
    pub model_name: String,
    /// Id of the persisted audit record; `None` when no portfolio succeeded.
    pub rebalance_id: Option<String>,
    pub outcomes: Vec<PortfolioOutcome>,
    /// Error from refreshing the model's last-rebalance stamp, surfaced but
    /// never retried here.
    pub model_update_error: Option<RebalanceError>,
}

impl ModelRebalanceReport {
    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.result.is_ok()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.succeeded()
    }
}

/// Fully computed single-portfolio rebalance, not yet persisted.
struct PortfolioComputation {
    portfolio: PortfolioRebalance,
    transactions: Vec<TransactionDto>,
    drifts: Vec<DriftDto>,
}

impl PortfolioComputation {
    fn into_dto(self, rebalance_id: String) -> RebalanceDto {
        RebalanceDto {
            portfolio_id: self.portfolio.portfolio_id,
            portfolio_name: self.portfolio.portfolio_name,
            rebalance_id,
            transactions: self.transactions,
            drifts: self.drifts,
        }
    }
}

pub struct RebalanceOrchestrator {
    positions: Arc<dyn PositionSource>,
    prices: Arc<dyn PriceSource>,
    models: Arc<dyn ModelSource>,
    store: Arc<dyn RebalanceStore>,
    engine: Arc<OptimizationEngine>,
    config: RebalanceConfig,
}

impl RebalanceOrchestrator {
    pub fn new(
        positions: Arc<dyn PositionSource>,
        prices: Arc<dyn PriceSource>,
        models: Arc<dyn ModelSource>,
        store: Arc<dyn RebalanceStore>,
        engine: Arc<OptimizationEngine>,
        config: RebalanceConfig,
    ) -> Self {
        RebalanceOrchestrator {
            positions,
            prices,
            models,
            store,
            engine,
            config,
        }
    }

    /// Rebalance a single portfolio against its owning model and persist the
    /// audit record. The model itself is never mutated here.
    pub async fn rebalance_portfolio(
        &self,
        model_id: &str,
        portfolio_id: &str,
    ) -> Result<RebalanceDto, RebalanceError> {
        let model = self.models.model(model_id).await?;
        let computation = self.compute_with_deadline(&model, portfolio_id).await?;

        let record = RebalanceRecord::new(
            model.id(),
            model.name(),
            Utc::now(),
            vec![computation.portfolio.clone()],
        );
        let rebalance_id = self.store.save_rebalance_record(&record).await?;
        info!(
            "Rebalanced portfolio {} against model {} ({} transaction(s))",
            portfolio_id,
            model_id,
            computation.transactions.len()
        );
        Ok(computation.into_dto(rebalance_id))
    }

    /// Rebalance every portfolio attached to a model.
    ///
    /// The first portfolio runs alone as a dead-dependency probe: when it
    /// fails because a collaborator is unreachable after retries, the batch
    /// aborts instead of hammering a known-dead service once per portfolio.
    /// Every other failure stays isolated to its portfolio.
    pub async fn rebalance_model(
        &self,
        model_id: &str,
    ) -> Result<ModelRebalanceReport, RebalanceError> {
        let model = self.models.model(model_id).await?;
        let portfolio_ids = self.models.portfolios_for_model(model_id).await?;

        if portfolio_ids.is_empty() {
            return Ok(ModelRebalanceReport {
                model_id: model.id().to_string(),
                model_name: model.name().to_string(),
                rebalance_id: None,
                outcomes: Vec::new(),
                model_update_error: None,
            });
        }

        info!(
            "Rebalancing model {} across {} portfolio(s), max {} in flight",
            model_id,
            portfolio_ids.len(),
            self.config.max_rebalance_concurrency.max(1)
        );

        let mut results: BTreeMap<String, Result<PortfolioComputation, RebalanceError>> =
            BTreeMap::new();

        let probe_id = &portfolio_ids[0];
        let probe = self.compute_with_deadline(&model, probe_id).await;
        if let Err(e) = &probe {
            if e.is_dead_dependency() {
                warn!(
                    "Aborting model {} rebalance, dependency down: {}",
                    model_id, e
                );
                return Err(e.clone());
            }
        }
        results.insert(probe_id.clone(), probe);

        let remaining: Vec<String> = portfolio_ids.iter().skip(1).cloned().collect();
        let concurrency = self.config.max_rebalance_concurrency.max(1);
        let model_ref = &model;
        let fanned: Vec<(String, Result<PortfolioComputation, RebalanceError>)> =
            stream::iter(remaining.into_iter().map(|portfolio_id| async move {
                let result = self.compute_with_deadline(model_ref, &portfolio_id).await;
                (portfolio_id, result)
            }))
            .buffer_unordered(concurrency)
            .collect()
            .await;
        results.extend(fanned);

        // Persist one audit record covering every successful portfolio, in
        // the model's portfolio order.
        let successes: Vec<&PortfolioComputation> = portfolio_ids
            .iter()
            .filter_map(|id| results.get(id).and_then(|r| r.as_ref().ok()))
            .collect();
        let rebalance_id = if successes.is_empty() {
            None
        } else {
            let record = RebalanceRecord::new(
                model.id(),
                model.name(),
                Utc::now(),
                successes.iter().map(|c| c.portfolio.clone()).collect(),
            );
            Some(self.store.save_rebalance_record(&record).await?)
        };

        let mut outcomes = Vec::with_capacity(portfolio_ids.len());
        for portfolio_id in &portfolio_ids {
            let result = results
                .remove(portfolio_id)
                .expect("every portfolio id produced an outcome");
            let result = match result {
                Ok(computation) => Ok(computation.into_dto(
                    rebalance_id
                        .clone()
                        .expect("record persisted when any portfolio succeeded"),
                )),
                Err(e) => Err(e),
            };
            outcomes.push(PortfolioOutcome {
                portfolio_id: portfolio_id.clone(),
                result,
            });
        }

        let model_update_error = if rebalance_id.is_some() {
            self.stamp_model(&model).await.err()
        } else {
            None
        };

        let report = ModelRebalanceReport {
            model_id: model.id().to_string(),
            model_name: model.name().to_string(),
            rebalance_id,
            outcomes,
            model_update_error,
        };
        info!(
            "Model {} rebalance finished: {} succeeded, {} failed",
            model_id,
            report.succeeded(),
            report.failed()
        );
        Ok(report)
    }

    /// Refresh the model's last-rebalance stamp through the CAS boundary.
    async fn stamp_model(&self, model: &InvestmentModel) -> Result<(), RebalanceError> {
        let expected = model.version();
        let mut updated = model.clone();
        updated.mark_rebalanced(Utc::now());
        match self.store.update_model(&updated, expected).await {
            Ok(_) => Ok(()),
            Err(e) => {
                warn!(
                    "Could not stamp model {} after rebalance: {}",
                    model.id(),
                    e
                );
                Err(e)
            }
        }
    }

    async fn compute_with_deadline(
        &self,
        model: &InvestmentModel,
        portfolio_id: &str,
    ) -> Result<PortfolioComputation, RebalanceError> {
        match tokio::time::timeout(
            self.config.portfolio_deadline(),
            self.compute_portfolio(model, portfolio_id),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(RebalanceError::DeadlineExceeded {
                portfolio_id: portfolio_id.to_string(),
                seconds: self.config.portfolio_deadline_seconds,
            }),
        }
    }

    /// One portfolio's pipeline: fetch -> universe -> prices -> market value
    /// -> optimize -> transactions + drift. Strictly sequential; owns all of
    /// its transient state.
    async fn compute_portfolio(
        &self,
        model: &InvestmentModel,
        portfolio_id: &str,
    ) -> Result<PortfolioComputation, RebalanceError> {
        let snapshot = self.positions.portfolio_state(portfolio_id).await?;

        let mut universe: BTreeSet<String> = snapshot.positions.keys().cloned().collect();
        universe.extend(model.positions().iter().map(|p| p.security_id().to_string()));
        let universe: Vec<String> = universe.into_iter().collect();

        let sheet = if universe.is_empty() {
            Default::default()
        } else {
            self.prices.prices(&universe).await?
        };
        sheet.ensure_positive("price-service", &universe)?;

        let mut market_value = snapshot.cash_balance;
        for (security_id, quantity) in &snapshot.positions {
            let price = sheet.price(security_id).unwrap_or(Decimal::ZERO);
            market_value += *quantity * price;
        }
        debug!(
            "Portfolio {}: {} securities in universe, market value {}",
            portfolio_id,
            universe.len(),
            market_value
        );

        let problem =
            RebalanceProblem::build(&snapshot, model, &sheet, &universe, market_value)?;
        let outcome = self.engine.optimize(problem).await;
        match outcome.status {
            OptimizationStatus::Optimal => {}
            OptimizationStatus::Infeasible => {
                return Err(RebalanceError::OptimizationInfeasible {
                    portfolio_id: portfolio_id.to_string(),
                })
            }
            OptimizationStatus::Timeout => {
                return Err(RebalanceError::OptimizationTimeout {
                    portfolio_id: portfolio_id.to_string(),
                })
            }
            OptimizationStatus::SolverError => {
                return Err(RebalanceError::SolverError {
                    portfolio_id: portfolio_id.to_string(),
                    reason: "all solver backends failed".to_string(),
                })
            }
        }

        let trade_date = Utc::now().date_naive();
        let mut transactions = Vec::new();
        let mut drifts = Vec::with_capacity(universe.len());
        let mut states = Vec::with_capacity(universe.len());

        for security_id in &universe {
            let original = snapshot
                .positions
                .get(security_id)
                .copied()
                .unwrap_or_default();
            let original_int = original.round().to_i64().unwrap_or_default();
            let adjusted_int = outcome.quantities.get(security_id).copied().unwrap_or(0);
            let adjusted = Decimal::from(adjusted_int);
            let price = sheet.price(security_id).unwrap_or(Decimal::ZERO);

            let delta = adjusted_int - original_int;
            if delta != 0 {
                transactions.push(TransactionDto {
                    transaction_type: if delta > 0 {
                        TransactionType::Buy
                    } else {
                        TransactionType::Sell
                    },
                    security_id: security_id.clone(),
                    quantity: delta.unsigned_abs(),
                    trade_date,
                });
            }

            let (target, low, high) = match model.position(security_id) {
                Some(p) => (
                    p.target_value(),
                    p.drift_bounds().low(),
                    p.drift_bounds().high(),
                ),
                None => (Decimal::ZERO, Decimal::ZERO, Decimal::ZERO),
            };
            let drift = drift_calculator::compute(adjusted, price, target, market_value);

            drifts.push(DriftDto {
                security_id: security_id.clone(),
                original_quantity: original,
                adjusted_quantity: adjusted,
                target,
                high_drift: high,
                low_drift: low,
                actual: drift.actual,
            });
            states.push(PositionState {
                security_id: security_id.clone(),
                price,
                original_quantity: original,
                adjusted_quantity: adjusted,
                target,
                low_drift: low,
                high_drift: high,
                actual: drift.actual,
            });
        }

        Ok(PortfolioComputation {
            portfolio: PortfolioRebalance {
                portfolio_id: snapshot.portfolio_id.clone(),
                portfolio_name: snapshot.display_name().to_string(),
                market_value,
                positions: states,
            },
            transactions,
            drifts,
        })
    }
}
