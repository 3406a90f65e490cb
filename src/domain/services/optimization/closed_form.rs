use crate::domain::services::optimization::problem::{RebalanceProblem, SolverFailure};
use crate::domain::services::optimization::SolverBackend;

/// Exact backend for the continuous relaxation.
///
/// The objective `sum |MV*w_i - q_i*p_i|` is separable per security, so the
/// relaxed optimum is simply the ideal quantity `MV*w_i / p_i` clamped into
/// its band `[max(0, MV*(w_i-l_i))/p_i, MV*(w_i+h_i)/p_i]`. Preferred over
/// the gradient backend: no iteration, no tolerance, no scaling concerns.
pub struct ClosedFormBackend;

impl SolverBackend for ClosedFormBackend {
    fn name(&self) -> &'static str {
        "closed-form"
    }

    fn solve(&self, problem: &RebalanceProblem) -> Result<Vec<f64>, SolverFailure> {
        let mut relaxed = Vec::with_capacity(problem.terms.len());
        for term in &problem.terms {
            if !(term.price.is_finite() && term.price > 0.0) {
                return Err(SolverFailure::Unsupported(format!(
                    "non-positive price {} for security {}",
                    term.price, term.security_id
                )));
            }

            let (lower_value, upper_value) = problem.value_band(term);
            let ideal = problem.market_value * term.weight / term.price;
            let quantity = ideal
                .max(lower_value / term.price)
                .min(upper_value / term.price)
                .max(0.0);

            if !quantity.is_finite() {
                return Err(SolverFailure::Numerical(format!(
                    "non-finite relaxed quantity for security {}",
                    term.security_id
                )));
            }
            relaxed.push(quantity);
        }
        Ok(relaxed)
    }
}
