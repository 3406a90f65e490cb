//! Collaborator Interfaces
//!
//! The core consumes four narrow interfaces for external state: positions,
//! prices, model metadata, and the durable store. This keeps the orchestrator
//! independent of transport and makes every collaborator mockable in tests.

use crate::domain::entities::investment_model::InvestmentModel;
use crate::domain::entities::portfolio::{PortfolioSnapshot, PriceSheet};
use crate::domain::entities::rebalance_record::RebalanceRecord;
use crate::domain::errors::{ExternalServiceError, RebalanceError};
use async_trait::async_trait;

/// Common result type for external-source lookups
pub type SourceResult<T> = Result<T, ExternalServiceError>;

/// Current holdings and cash for one portfolio.
#[async_trait]
pub trait PositionSource: Send + Sync {
    async fn portfolio_state(&self, portfolio_id: &str) -> SourceResult<PortfolioSnapshot>;
}

/// Prices for a set of securities.
///
/// Implementations must treat a missing or non-positive price for a
/// requested security as a fatal `InvalidResponse`.
#[async_trait]
pub trait PriceSource: Send + Sync {
    async fn prices(&self, security_ids: &[String]) -> SourceResult<PriceSheet>;
}

/// Read-only access to investment models and their portfolio attachments.
#[async_trait]
pub trait ModelSource: Send + Sync {
    async fn model(&self, model_id: &str) -> Result<InvestmentModel, RebalanceError>;

    async fn portfolios_for_model(&self, model_id: &str) -> Result<Vec<String>, RebalanceError>;
}

/// Durable storage for rebalance records and model writes.
#[async_trait]
pub trait RebalanceStore: Send + Sync {
    /// Persist an immutable rebalance record, returning its id.
    async fn save_rebalance_record(
        &self,
        record: &RebalanceRecord,
    ) -> Result<String, RebalanceError>;

    /// Persist a newly created model.
    async fn create_model(&self, model: &InvestmentModel) -> Result<(), RebalanceError>;

    /// Compare-and-swap model update. The write must be rejected with
    /// `VersionConflict` when the stored version differs from
    /// `expected_version`; the core never retries the conflict itself.
    async fn update_model(
        &self,
        model: &InvestmentModel,
        expected_version: u64,
    ) -> Result<InvestmentModel, RebalanceError>;
}
