use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::application::services::rebalance_orchestrator::RebalanceOrchestrator;
use crate::domain::entities::investment_model::InvestmentModel;
use crate::domain::entities::position::Position;
use crate::domain::entities::rebalance_record::RebalanceDto;
use crate::domain::errors::RebalanceError;
use crate::domain::repositories::{ModelSource, RebalanceStore};

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<RebalanceOrchestrator>,
    pub models: Arc<dyn ModelSource>,
    pub store: Arc<dyn RebalanceStore>,
}

/// Error response
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Request body for creating a model
#[derive(Debug, Deserialize)]
pub struct CreateModelRequest {
    /// Client-supplied id; generated when absent
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub positions: Vec<Position>,
    #[serde(default)]
    pub portfolio_ids: Vec<String>,
}

/// Query parameters for the single-portfolio rebalance endpoint
#[derive(Debug, Deserialize)]
pub struct RebalanceQuery {
    pub model_id: String,
}

/// One portfolio's entry in the model-wide rebalance response
#[derive(Debug, Serialize)]
pub struct PortfolioResultResponse {
    pub portfolio_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<RebalanceDto>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Response for a model-wide rebalance
#[derive(Debug, Serialize)]
pub struct ModelRebalanceResponse {
    pub model_id: String,
    pub model_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rebalance_id: Option<String>,
    pub succeeded: usize,
    pub failed: usize,
    pub results: Vec<PortfolioResultResponse>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_update_error: Option<String>,
}

/// Map the domain taxonomy onto HTTP status codes.
///
/// Infeasibility and version conflicts are state conflicts (409), not
/// client mistakes; collaborator failures are gateway errors.
fn error_response(err: RebalanceError) -> (StatusCode, Json<ErrorResponse>) {
    let status = match &err {
        RebalanceError::Validation(_) | RebalanceError::BusinessRule(_) => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        RebalanceError::ModelNotFound(_) | RebalanceError::PositionNotFound { .. } => {
            StatusCode::NOT_FOUND
        }
        RebalanceError::VersionConflict { .. }
        | RebalanceError::OptimizationInfeasible { .. } => StatusCode::CONFLICT,
        RebalanceError::ExternalService(_) => StatusCode::BAD_GATEWAY,
        RebalanceError::OptimizationTimeout { .. }
        | RebalanceError::DeadlineExceeded { .. } => StatusCode::GATEWAY_TIMEOUT,
        RebalanceError::SolverError { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (
        status,
        Json(ErrorResponse {
            error: err.to_string(),
        }),
    )
}

/// Liveness probe
pub async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

/// Create an investment model
pub async fn create_model(
    State(state): State<AppState>,
    Json(request): Json<CreateModelRequest>,
) -> Result<(StatusCode, Json<InvestmentModel>), (StatusCode, Json<ErrorResponse>)> {
    let id = request
        .id
        .unwrap_or_else(|| format!("mdl_{}", Utc::now().timestamp_millis()));

    if state.models.model(&id).await.is_ok() {
        return Err((
            StatusCode::CONFLICT,
            Json(ErrorResponse {
                error: format!("Model already exists: {}", id),
            }),
        ));
    }

    let model = InvestmentModel::new(id, request.name, request.positions, request.portfolio_ids)
        .map_err(error_response)?;
    state.store.create_model(&model).await.map_err(error_response)?;
    Ok((StatusCode::CREATED, Json(model)))
}

/// Fetch one investment model
pub async fn get_model(
    State(state): State<AppState>,
    Path(model_id): Path<String>,
) -> Result<Json<InvestmentModel>, (StatusCode, Json<ErrorResponse>)> {
    let model = state.models.model(&model_id).await.map_err(error_response)?;
    Ok(Json(model))
}

/// Add a position to an existing model
pub async fn add_position(
    State(state): State<AppState>,
    Path(model_id): Path<String>,
    Json(position): Json<Position>,
) -> Result<Json<InvestmentModel>, (StatusCode, Json<ErrorResponse>)> {
    let mut model = state.models.model(&model_id).await.map_err(error_response)?;
    let expected = model.version();
    model.add_position(position).map_err(error_response)?;
    let saved = state
        .store
        .update_model(&model, expected)
        .await
        .map_err(error_response)?;
    Ok(Json(saved))
}

/// Rebalance one portfolio against a model
pub async fn rebalance_portfolio(
    State(state): State<AppState>,
    Path(portfolio_id): Path<String>,
    Query(query): Query<RebalanceQuery>,
) -> Result<Json<RebalanceDto>, (StatusCode, Json<ErrorResponse>)> {
    let dto = state
        .orchestrator
        .rebalance_portfolio(&query.model_id, &portfolio_id)
        .await
        .map_err(error_response)?;
    Ok(Json(dto))
}

/// Rebalance every portfolio attached to a model
pub async fn rebalance_model(
    State(state): State<AppState>,
    Path(model_id): Path<String>,
) -> Result<Json<ModelRebalanceResponse>, (StatusCode, Json<ErrorResponse>)> {
    let report = state
        .orchestrator
        .rebalance_model(&model_id)
        .await
        .map_err(error_response)?;

    let response = ModelRebalanceResponse {
        model_id: report.model_id,
        model_name: report.model_name,
        rebalance_id: report.rebalance_id,
        succeeded: report
            .outcomes
            .iter()
            .filter(|o| o.result.is_ok())
            .count(),
        failed: report
            .outcomes
            .iter()
            .filter(|o| o.result.is_err())
            .count(),
        results: report
            .outcomes
            .into_iter()
            .map(|outcome| match outcome.result {
                Ok(dto) => PortfolioResultResponse {
                    portfolio_id: outcome.portfolio_id,
                    result: Some(dto),
                    error: None,
                },
                Err(e) => PortfolioResultResponse {
                    portfolio_id: outcome.portfolio_id,
                    result: None,
                    error: Some(e.to_string()),
                },
            })
            .collect(),
        model_update_error: report.model_update_error.map(|e| e.to_string()),
    };
    Ok(Json(response))
}
