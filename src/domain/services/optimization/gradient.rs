use crate::domain::services::optimization::problem::{RebalanceProblem, SolverFailure};
use crate::domain::services::optimization::SolverBackend;
use argmin::core::{CostFunction, Executor, Gradient, State};
use argmin::solver::gradientdescent::SteepestDescent;
use argmin::solver::linesearch::{condition::ArmijoCondition, BacktrackingLineSearch};

/// Smoothing constant for the |.| terms in the objective.
const ABS_EPSILON: f64 = 1e-10;

/// Weight of the quadratic band/non-negativity penalties.
const PENALTY: f64 = 1000.0;

/// Iterative fallback backend.
///
/// Solves the relaxation in weight space (`x_i = q_i * p_i / MV`), which
/// keeps every variable in [0, 1] regardless of per-share price, with
/// steepest descent over a smoothed |.| objective plus quadratic penalties
/// for band violations. Used when the closed form reports a numerical
/// problem.
pub struct GradientBackend {
    max_iters: u64,
}

impl Default for GradientBackend {
    fn default() -> Self {
        GradientBackend { max_iters: 200 }
    }
}

struct DriftProblem {
    weights: Vec<f64>,
    lower: Vec<f64>,
    upper: Vec<f64>,
}

impl DriftProblem {
    fn penalty_terms(&self, i: usize, x: f64) -> (f64, f64) {
        let below = (self.lower[i] - x).max(0.0);
        let above = (x - self.upper[i]).max(0.0);
        let negative = (-x).max(0.0);
        let cost = PENALTY * (below * below + above * above + negative * negative);
        let grad = PENALTY * 2.0 * (above - below - negative);
        (cost, grad)
    }
}

impl CostFunction for DriftProblem {
    type Param = Vec<f64>;
    type Output = f64;

    fn cost(&self, param: &Self::Param) -> Result<Self::Output, argmin::core::Error> {
        let mut total = 0.0;
        for (i, &x) in param.iter().enumerate() {
            let gap = self.weights[i] - x;
            total += (gap * gap + ABS_EPSILON).sqrt();
            total += self.penalty_terms(i, x).0;
        }
        Ok(total)
    }
}

impl Gradient for DriftProblem {
    type Param = Vec<f64>;
    type Gradient = Vec<f64>;

    fn gradient(&self, param: &Self::Param) -> Result<Self::Gradient, argmin::core::Error> {
        let mut gradient = vec![0.0; param.len()];
        for (i, &x) in param.iter().enumerate() {
            let gap = self.weights[i] - x;
            gradient[i] = -gap / (gap * gap + ABS_EPSILON).sqrt();
            gradient[i] += self.penalty_terms(i, x).1;
        }
        Ok(gradient)
    }
}

impl SolverBackend for GradientBackend {
    fn name(&self) -> &'static str {
        "gradient-descent"
    }

    fn solve(&self, problem: &RebalanceProblem) -> Result<Vec<f64>, SolverFailure> {
        if problem.market_value <= 0.0 {
            return Err(SolverFailure::Unsupported(
                "non-positive market value".to_string(),
            ));
        }
        for term in &problem.terms {
            if !(term.price.is_finite() && term.price > 0.0) {
                return Err(SolverFailure::Unsupported(format!(
                    "non-positive price {} for security {}",
                    term.price, term.security_id
                )));
            }
        }

        let weights: Vec<f64> = problem.terms.iter().map(|t| t.weight).collect();
        let (lower, upper): (Vec<f64>, Vec<f64>) = problem
            .terms
            .iter()
            .map(|t| {
                let (lo, hi) = problem.value_band(t);
                (lo / problem.market_value, hi / problem.market_value)
            })
            .unzip();
        // Start from the portfolio as it stands today.
        let initial: Vec<f64> = problem
            .terms
            .iter()
            .map(|t| t.current_quantity as f64 * t.price / problem.market_value)
            .collect();

        let cost = DriftProblem {
            weights,
            lower,
            upper,
        };

        let linesearch = BacktrackingLineSearch::new(
            ArmijoCondition::new(1e-4)
                .map_err(|e| SolverFailure::Numerical(format!("line search setup: {}", e)))?,
        );
        let solver = SteepestDescent::new(linesearch);

        let max_iters = self.max_iters;
        let result = Executor::new(cost, solver)
            .configure(|state| state.param(initial).max_iters(max_iters))
            .run()
            .map_err(|e| SolverFailure::Numerical(format!("descent failed: {}", e)))?;

        let solution = result
            .state()
            .get_best_param()
            .cloned()
            .ok_or_else(|| SolverFailure::Numerical("no solution produced".to_string()))?;

        // Map weights back to share quantities, clamping residual penalty
        // violations into the band.
        let relaxed = problem
            .terms
            .iter()
            .zip(solution)
            .map(|(term, x)| {
                let (lower_value, upper_value) = problem.value_band(term);
                (x * problem.market_value)
                    .max(lower_value)
                    .min(upper_value)
                    .max(0.0)
                    / term.price
            })
            .collect();
        Ok(relaxed)
    }
}
