//! Database Repository
//!
//! Data access for investment models and rebalance records. Implements the
//! domain collaborator traits; `DatabaseError` never crosses the trait
//! boundary, it is mapped into the domain taxonomy here.

use super::models::{InvestmentModelRecord, ModelColumns, RebalanceRecordRow};
use super::{DatabaseError, DbPool};
use crate::domain::entities::investment_model::InvestmentModel;
use crate::domain::entities::rebalance_record::RebalanceRecord;
use crate::domain::errors::{ExternalServiceError, RebalanceError};
use crate::domain::repositories::{ModelSource, RebalanceStore};
use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, error};

fn storage_error(context: &str, e: DatabaseError) -> RebalanceError {
    error!("{}: {}", context, e);
    RebalanceError::ExternalService(ExternalServiceError::ServiceUnreachable {
        service: "database".to_string(),
        attempts: 1,
        reason: e.to_string(),
    })
}

/// Read side of model storage
pub struct SqliteModelRepository {
    pool: DbPool,
}

impl SqliteModelRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn fetch(&self, model_id: &str) -> Result<Option<InvestmentModel>, DatabaseError> {
        let record = sqlx::query_as::<_, InvestmentModelRecord>(
            "SELECT * FROM investment_models WHERE id = ?1",
        )
        .bind(model_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| DatabaseError::QueryError(format!("Failed to get model: {}", e)))?;

        record.map(InvestmentModelRecord::into_model).transpose()
    }
}

#[async_trait]
impl ModelSource for SqliteModelRepository {
    async fn model(&self, model_id: &str) -> Result<InvestmentModel, RebalanceError> {
        self.fetch(model_id)
            .await
            .map_err(|e| storage_error("Failed to load model", e))?
            .ok_or_else(|| RebalanceError::ModelNotFound(model_id.to_string()))
    }

    async fn portfolios_for_model(&self, model_id: &str) -> Result<Vec<String>, RebalanceError> {
        let model = self.model(model_id).await?;
        Ok(model.portfolio_ids().iter().cloned().collect())
    }
}

/// Write side: rebalance records and CAS-guarded model writes
pub struct SqliteRebalanceStore {
    pool: DbPool,
}

impl SqliteRebalanceStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn record(&self, rebalance_id: &str) -> Result<Option<RebalanceRecord>, RebalanceError> {
        let row = sqlx::query_as::<_, RebalanceRecordRow>(
            "SELECT * FROM rebalance_records WHERE rebalance_id = ?1",
        )
        .bind(rebalance_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            storage_error(
                "Failed to load rebalance record",
                DatabaseError::QueryError(e.to_string()),
            )
        })?;

        row.map(RebalanceRecordRow::into_record)
            .transpose()
            .map_err(|e| storage_error("Failed to decode rebalance record", e))
    }

    pub async fn records_for_model(
        &self,
        model_id: &str,
    ) -> Result<Vec<RebalanceRecord>, RebalanceError> {
        let rows = sqlx::query_as::<_, RebalanceRecordRow>(
            "SELECT * FROM rebalance_records WHERE model_id = ?1 ORDER BY rebalance_date DESC",
        )
        .bind(model_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            storage_error(
                "Failed to list rebalance records",
                DatabaseError::QueryError(e.to_string()),
            )
        })?;

        rows.into_iter()
            .map(|row| {
                row.into_record()
                    .map_err(|e| storage_error("Failed to decode rebalance record", e))
            })
            .collect()
    }
}

#[async_trait]
impl RebalanceStore for SqliteRebalanceStore {
    async fn save_rebalance_record(
        &self,
        record: &RebalanceRecord,
    ) -> Result<String, RebalanceError> {
        let portfolios = serde_json::to_string(&record.portfolios).map_err(|e| {
            storage_error(
                "Failed to serialize rebalance record",
                DatabaseError::QueryError(e.to_string()),
            )
        })?;

        sqlx::query(
            r#"
            INSERT INTO rebalance_records (
                rebalance_id, model_id, model_name, rebalance_date, portfolios
            )
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
        )
        .bind(&record.rebalance_id)
        .bind(&record.model_id)
        .bind(&record.model_name)
        .bind(record.rebalance_date)
        .bind(portfolios)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            storage_error(
                "Failed to save rebalance record",
                DatabaseError::QueryError(e.to_string()),
            )
        })?;

        debug!("Saved rebalance record {}", record.rebalance_id);
        Ok(record.rebalance_id.clone())
    }

    async fn create_model(&self, model: &InvestmentModel) -> Result<(), RebalanceError> {
        let columns = ModelColumns::from_model(model)
            .map_err(|e| storage_error("Failed to serialize model", e))?;
        let now = Utc::now();

        sqlx::query(
            r#"
            INSERT INTO investment_models (
                id, name, version, last_rebalance_date, positions, portfolio_ids,
                created_at, updated_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)
            "#,
        )
        .bind(model.id())
        .bind(model.name())
        .bind(model.version() as i64)
        .bind(model.last_rebalance_date())
        .bind(&columns.positions)
        .bind(&columns.portfolio_ids)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            storage_error(
                "Failed to create model",
                DatabaseError::QueryError(e.to_string()),
            )
        })?;

        debug!("Created model {} (version {})", model.id(), model.version());
        Ok(())
    }

    /// Compare-and-swap write. The UPDATE carries the expected version in
    /// its WHERE clause; zero affected rows means a concurrent writer won.
    async fn update_model(
        &self,
        model: &InvestmentModel,
        expected_version: u64,
    ) -> Result<InvestmentModel, RebalanceError> {
        let columns = ModelColumns::from_model(model)
            .map_err(|e| storage_error("Failed to serialize model", e))?;
        let now = Utc::now();

        let rows_affected = sqlx::query(
            r#"
            UPDATE investment_models
            SET name = ?1, version = ?2, last_rebalance_date = ?3,
                positions = ?4, portfolio_ids = ?5, updated_at = ?6
            WHERE id = ?7 AND version = ?8
            "#,
        )
        .bind(model.name())
        .bind(model.version() as i64)
        .bind(model.last_rebalance_date())
        .bind(&columns.positions)
        .bind(&columns.portfolio_ids)
        .bind(now)
        .bind(model.id())
        .bind(expected_version as i64)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            storage_error(
                "Failed to update model",
                DatabaseError::QueryError(e.to_string()),
            )
        })?
        .rows_affected();

        if rows_affected == 0 {
            let exists: (i64,) =
                sqlx::query_as("SELECT COUNT(*) FROM investment_models WHERE id = ?1")
                    .bind(model.id())
                    .fetch_one(&self.pool)
                    .await
                    .map_err(|e| {
                        storage_error(
                            "Failed to check model existence",
                            DatabaseError::QueryError(e.to_string()),
                        )
                    })?;
            return if exists.0 > 0 {
                Err(RebalanceError::VersionConflict {
                    expected: expected_version,
                })
            } else {
                Err(RebalanceError::ModelNotFound(model.id().to_string()))
            };
        }

        debug!(
            "Updated model {} ({} -> {})",
            model.id(),
            expected_version,
            model.version()
        );
        Ok(model.clone())
    }
}
