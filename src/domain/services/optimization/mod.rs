//! Optimization Engine
//!
//! Formulates and solves the constrained integer rebalancing problem for one
//! portfolio: minimize total absolute drift from target subject to
//! per-security drift bands and non-negative integer share quantities.
//!
//! The continuous relaxation is handed to solver backends in a fixed
//! preference order; the relaxed solution is then rounded and repaired to a
//! feasible integer point. Infeasibility is a normal terminal status, not an
//! error.

pub mod closed_form;
pub mod gradient;
pub mod problem;

use crate::domain::services::optimization::closed_form::ClosedFormBackend;
use crate::domain::services::optimization::gradient::GradientBackend;
use crate::domain::services::optimization::problem::{RebalanceProblem, SolverFailure};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, warn};

/// Terminal status of one optimization run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptimizationStatus {
    /// A feasible integer allocation was found.
    Optimal,
    /// The feasible region is empty; no allocation satisfies every band.
    Infeasible,
    /// Every backend exceeded the configured wall-clock budget.
    Timeout,
    /// Every backend failed for a non-timeout reason.
    SolverError,
}

/// Outcome of one optimization run.
#[derive(Debug, Clone)]
pub struct OptimizationResult {
    pub status: OptimizationStatus,
    /// securityId -> new integer quantity; empty unless `Optimal`.
    pub quantities: BTreeMap<String, i64>,
    /// `sum |MV*w_i - u'_i*p_i|` at the accepted integer point.
    pub objective_value: Decimal,
}

impl OptimizationResult {
    fn terminal(status: OptimizationStatus) -> Self {
        OptimizationResult {
            status,
            quantities: BTreeMap::new(),
            objective_value: Decimal::ZERO,
        }
    }
}

/// Relaxation backend: produces continuous quantities for the problem.
pub trait SolverBackend: Send + Sync {
    fn name(&self) -> &'static str;

    fn solve(&self, problem: &RebalanceProblem) -> Result<Vec<f64>, SolverFailure>;
}

/// Drives the solver backends and the integer rounding/repair step.
pub struct OptimizationEngine {
    backends: Vec<Arc<dyn SolverBackend>>,
    solver_timeout: Duration,
}

impl OptimizationEngine {
    /// Default backend order: closed form first (fastest, exact for this
    /// separable objective), gradient descent as the fallback.
    pub fn new(solver_timeout: Duration) -> Self {
        OptimizationEngine {
            backends: vec![
                Arc::new(ClosedFormBackend),
                Arc::new(GradientBackend::default()),
            ],
            solver_timeout,
        }
    }

    pub fn with_backends(
        backends: Vec<Arc<dyn SolverBackend>>,
        solver_timeout: Duration,
    ) -> Self {
        OptimizationEngine {
            backends,
            solver_timeout,
        }
    }

    /// Solve one portfolio's rebalancing problem.
    ///
    /// Runs each backend on a blocking thread under the wall-clock budget.
    /// The solve is CPU-bound; callers on an async runtime are never blocked.
    pub async fn optimize(&self, problem: RebalanceProblem) -> OptimizationResult {
        if problem.terms.is_empty() {
            return OptimizationResult {
                status: OptimizationStatus::Optimal,
                quantities: BTreeMap::new(),
                objective_value: Decimal::ZERO,
            };
        }

        // Integer feasibility is decidable per security before any solve.
        let bounds = match problem.integer_bounds() {
            Some(bounds) => bounds,
            None => return OptimizationResult::terminal(OptimizationStatus::Infeasible),
        };

        let problem = Arc::new(problem);
        let mut timed_out = false;

        for backend in &self.backends {
            let backend = Arc::clone(backend);
            let name = backend.name();
            let task_problem = Arc::clone(&problem);

            let attempt = timeout(
                self.solver_timeout,
                tokio::task::spawn_blocking(move || backend.solve(&task_problem)),
            )
            .await;

            let relaxed = match attempt {
                Ok(Ok(Ok(relaxed))) => relaxed,
                Ok(Ok(Err(failure))) => {
                    warn!("Solver backend '{}' failed: {}", name, failure);
                    continue;
                }
                Ok(Err(join_error)) => {
                    warn!("Solver backend '{}' panicked: {}", name, join_error);
                    continue;
                }
                Err(_) => {
                    warn!(
                        "Solver backend '{}' exceeded the {:?} budget",
                        name, self.solver_timeout
                    );
                    timed_out = true;
                    continue;
                }
            };

            if relaxed.len() != problem.terms.len()
                || relaxed.iter().any(|x| !x.is_finite())
            {
                warn!("Solver backend '{}' returned an unusable solution", name);
                continue;
            }

            debug!("Accepted relaxed solution from backend '{}'", name);
            return Self::round_and_repair(&problem, &bounds, &relaxed);
        }

        if timed_out {
            OptimizationResult::terminal(OptimizationStatus::Timeout)
        } else {
            OptimizationResult::terminal(OptimizationStatus::SolverError)
        }
    }

    /// Round the relaxed solution to integers, re-checking the drift band
    /// per security and nudging any violator to the nearest feasible
    /// integer. Terms are ordered by ascending security id, which fixes the
    /// repair tie-break deterministically.
    fn round_and_repair(
        problem: &RebalanceProblem,
        bounds: &[(i64, i64)],
        relaxed: &[f64],
    ) -> OptimizationResult {
        let mut quantities = BTreeMap::new();
        let mut objective = 0.0_f64;

        for (index, term) in problem.terms.iter().enumerate() {
            let (lower, upper) = bounds[index];
            let mut quantity = relaxed[index].round() as i64;
            if quantity < lower {
                quantity = lower;
            } else if quantity > upper {
                quantity = upper;
            }

            objective +=
                (problem.market_value * term.weight - quantity as f64 * term.price).abs();
            quantities.insert(term.security_id.clone(), quantity);
        }

        OptimizationResult {
            status: OptimizationStatus::Optimal,
            quantities,
            objective_value: Decimal::from_f64(objective)
                .unwrap_or(Decimal::ZERO)
                .round_dp(4),
        }
    }
}
