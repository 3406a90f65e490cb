use rust_decimal::Decimal;
use thiserror::Error;

/// Errors raised while constructing value objects and positions.
///
/// Each variant names the violated rule so callers can surface it verbatim.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ValidationError {
    #[error("Target {0} is outside [0, 0.95]")]
    TargetOutOfRange(Decimal),

    #[error("Target {0} is not a multiple of 0.005")]
    InvalidTargetPrecision(Decimal),

    #[error("Drift {0} is outside [0, 1]")]
    DriftOutOfRange(Decimal),

    #[error("Low drift {low} exceeds high drift {high}")]
    InvalidDriftOrder { low: Decimal, high: Decimal },

    #[error("Security id must be exactly 24 alphanumeric characters: '{0}'")]
    InvalidSecurityId(String),

    #[error("Model name must not be empty")]
    EmptyModelName,
}

/// Model-level invariants broken by a mutation of the aggregate.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum BusinessRuleViolation {
    #[error("Sum of position targets {0} exceeds 0.95")]
    TargetSumExceeded(Decimal),

    #[error("Model has {0} positions with a non-zero target, limit is 100")]
    TooManyPositions(usize),

    #[error("Duplicate security in model: {0}")]
    DuplicateSecurity(String),
}

/// A collaborator was unreachable or returned unusable data.
///
/// `ServiceUnreachable` is the only transient variant; the retry layer never
/// retries `ClientError` or `InvalidResponse`.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ExternalServiceError {
    #[error("{service} unreachable after {attempts} attempt(s): {reason}")]
    ServiceUnreachable {
        service: String,
        attempts: u32,
        reason: String,
    },

    #[error("{service} returned an invalid response: {reason}")]
    InvalidResponse { service: String, reason: String },

    #[error("{service} rejected the request: {reason}")]
    ClientError { service: String, reason: String },
}

impl ExternalServiceError {
    /// True when the collaborator itself is down, as opposed to rejecting
    /// one particular request.
    pub fn is_unreachable(&self) -> bool {
        matches!(self, ExternalServiceError::ServiceUnreachable { .. })
    }

    /// Transient errors are the only ones worth retrying.
    pub fn is_transient(&self) -> bool {
        self.is_unreachable()
    }
}

/// Top-level error taxonomy for rebalancing operations.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum RebalanceError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    BusinessRule(#[from] BusinessRuleViolation),

    #[error(transparent)]
    ExternalService(#[from] ExternalServiceError),

    #[error("No feasible integer allocation exists for portfolio {portfolio_id}")]
    OptimizationInfeasible { portfolio_id: String },

    #[error("Optimizer exceeded its time budget for portfolio {portfolio_id}")]
    OptimizationTimeout { portfolio_id: String },

    #[error("All solver backends failed for portfolio {portfolio_id}: {reason}")]
    SolverError {
        portfolio_id: String,
        reason: String,
    },

    #[error("Model version conflict: expected version {expected}")]
    VersionConflict { expected: u64 },

    #[error("Position not found in model: {security_id}")]
    PositionNotFound { security_id: String },

    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("Portfolio {portfolio_id} rebalance exceeded the {seconds}s deadline")]
    DeadlineExceeded { portfolio_id: String, seconds: u64 },
}

impl RebalanceError {
    /// True when the failure means a shared dependency is down and a
    /// model-wide batch should not even be attempted.
    pub fn is_dead_dependency(&self) -> bool {
        matches!(
            self,
            RebalanceError::ExternalService(e) if e.is_unreachable()
        )
    }
}
