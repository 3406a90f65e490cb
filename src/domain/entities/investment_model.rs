use crate::domain::entities::position::Position;
use crate::domain::errors::{BusinessRuleViolation, RebalanceError, ValidationError};
use crate::domain::value_objects::target_percentage::MAX_TARGET;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};

/// Maximum number of positions with a non-zero target per model.
pub const MAX_ACTIVE_POSITIONS: usize = 100;

/// Aggregate root for one investment model.
///
/// Invariants, enforced after construction and after every mutation:
/// - sum of all position targets <= 0.95
/// - at most 100 positions with a non-zero target
/// - no duplicate security id
///
/// Zero-target positions are pruned on validation. The version counter bumps
/// on every successful mutation and is the optimistic-concurrency
/// precondition checked by the persistence collaborator; the aggregate itself
/// never writes anywhere.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvestmentModel {
    id: String,
    name: String,
    positions: Vec<Position>,
    portfolio_ids: BTreeSet<String>,
    last_rebalance_date: Option<DateTime<Utc>>,
    version: u64,
}

impl InvestmentModel {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        positions: Vec<Position>,
        portfolio_ids: impl IntoIterator<Item = String>,
    ) -> Result<Self, RebalanceError> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(ValidationError::EmptyModelName.into());
        }
        let mut model = InvestmentModel {
            id: id.into(),
            name,
            positions,
            portfolio_ids: portfolio_ids.into_iter().collect(),
            last_rebalance_date: None,
            version: 1,
        };
        model.prune_zero_targets();
        model.check_invariants()?;
        Ok(model)
    }

    /// Rebuild an aggregate from persisted state without resetting the
    /// version counter. Invariants are still enforced.
    pub fn from_parts(
        id: String,
        name: String,
        positions: Vec<Position>,
        portfolio_ids: BTreeSet<String>,
        last_rebalance_date: Option<DateTime<Utc>>,
        version: u64,
    ) -> Result<Self, RebalanceError> {
        let mut model = InvestmentModel {
            id,
            name,
            positions,
            portfolio_ids,
            last_rebalance_date,
            version,
        };
        model.prune_zero_targets();
        model.check_invariants()?;
        Ok(model)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn positions(&self) -> &[Position] {
        &self.positions
    }

    pub fn position(&self, security_id: &str) -> Option<&Position> {
        self.positions.iter().find(|p| p.security_id() == security_id)
    }

    pub fn portfolio_ids(&self) -> &BTreeSet<String> {
        &self.portfolio_ids
    }

    pub fn last_rebalance_date(&self) -> Option<DateTime<Utc>> {
        self.last_rebalance_date
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn total_target(&self) -> Decimal {
        self.positions.iter().map(|p| p.target_value()).sum()
    }

    pub fn active_position_count(&self) -> usize {
        self.positions
            .iter()
            .filter(|p| !p.target().is_zero())
            .count()
    }

    /// Add a position; rejects duplicates and any invariant breach.
    pub fn add_position(&mut self, position: Position) -> Result<(), RebalanceError> {
        if self.position(position.security_id()).is_some() {
            return Err(
                BusinessRuleViolation::DuplicateSecurity(position.security_id().to_string())
                    .into(),
            );
        }
        let mut candidate = self.positions.clone();
        candidate.push(position);
        self.commit_positions(candidate)
    }

    /// Replace the position with the same security id.
    pub fn update_position(&mut self, position: Position) -> Result<(), RebalanceError> {
        let mut candidate = self.positions.clone();
        let slot = candidate
            .iter_mut()
            .find(|p| p.security_id() == position.security_id())
            .ok_or_else(|| RebalanceError::PositionNotFound {
                security_id: position.security_id().to_string(),
            })?;
        *slot = position;
        self.commit_positions(candidate)
    }

    /// Remove a position. All three fields must match the stored value
    /// exactly; a partial match is treated as not-found so a concurrent edit
    /// is never deleted by accident.
    pub fn remove_position(&mut self, position: &Position) -> Result<(), RebalanceError> {
        let index = self
            .positions
            .iter()
            .position(|p| p == position)
            .ok_or_else(|| RebalanceError::PositionNotFound {
                security_id: position.security_id().to_string(),
            })?;
        let mut candidate = self.positions.clone();
        candidate.remove(index);
        self.commit_positions(candidate)
    }

    pub fn add_portfolios(
        &mut self,
        portfolio_ids: impl IntoIterator<Item = String>,
    ) -> Result<(), RebalanceError> {
        self.portfolio_ids.extend(portfolio_ids);
        self.version += 1;
        Ok(())
    }

    pub fn remove_portfolios(&mut self, portfolio_ids: &[String]) -> Result<(), RebalanceError> {
        for id in portfolio_ids {
            self.portfolio_ids.remove(id);
        }
        self.version += 1;
        Ok(())
    }

    /// Stamp a completed rebalance. Bumps the version so the persistence
    /// collaborator can CAS on the previous one.
    pub fn mark_rebalanced(&mut self, date: DateTime<Utc>) {
        self.last_rebalance_date = Some(date);
        self.version += 1;
    }

    /// Validate the aggregate, pruning zero-target positions first. Called
    /// by the persistence boundary before every write.
    pub fn validate(&mut self) -> Result<(), RebalanceError> {
        self.prune_zero_targets();
        self.check_invariants()
    }

    fn commit_positions(&mut self, mut candidate: Vec<Position>) -> Result<(), RebalanceError> {
        Self::prune(&mut candidate);
        Self::invariants_of(&candidate)?;
        self.positions = candidate;
        self.version += 1;
        Ok(())
    }

    fn prune_zero_targets(&mut self) {
        Self::prune(&mut self.positions);
    }

    fn prune(positions: &mut Vec<Position>) {
        positions.retain(|p| !p.target().is_zero());
    }

    fn check_invariants(&self) -> Result<(), RebalanceError> {
        Self::invariants_of(&self.positions)
    }

    fn invariants_of(positions: &[Position]) -> Result<(), RebalanceError> {
        let mut seen = HashSet::new();
        for position in positions {
            if !seen.insert(position.security_id()) {
                return Err(BusinessRuleViolation::DuplicateSecurity(
                    position.security_id().to_string(),
                )
                .into());
            }
        }

        let total: Decimal = positions.iter().map(|p| p.target_value()).sum();
        if total > MAX_TARGET {
            return Err(BusinessRuleViolation::TargetSumExceeded(total).into());
        }

        let active = positions.iter().filter(|p| !p.target().is_zero()).count();
        if active > MAX_ACTIVE_POSITIONS {
            return Err(BusinessRuleViolation::TooManyPositions(active).into());
        }

        Ok(())
    }
}
