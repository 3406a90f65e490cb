//! HTTP adapter for the position service.

use crate::domain::entities::portfolio::PortfolioSnapshot;
use crate::domain::errors::ExternalServiceError;
use crate::domain::repositories::{PositionSource, SourceResult};
use crate::infrastructure::resilience::{retry_with_backoff, RetryPolicy};
use async_trait::async_trait;
use tracing::debug;

const SERVICE: &str = "position-service";

pub struct HttpPositionClient {
    client: reqwest::Client,
    base_url: String,
    retry: RetryPolicy,
}

impl HttpPositionClient {
    pub fn new(base_url: impl Into<String>, retry: RetryPolicy) -> Self {
        HttpPositionClient {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            retry,
        }
    }

    async fn fetch(&self, portfolio_id: &str) -> Result<PortfolioSnapshot, ExternalServiceError> {
        let url = format!("{}/portfolios/{}", self.base_url, portfolio_id);
        debug!("Fetching portfolio state from {}", url);

        let response = self.client.get(&url).send().await.map_err(|e| {
            ExternalServiceError::ServiceUnreachable {
                service: SERVICE.to_string(),
                attempts: 1,
                reason: e.to_string(),
            }
        })?;

        let status = response.status();
        if status.is_client_error() {
            return Err(ExternalServiceError::ClientError {
                service: SERVICE.to_string(),
                reason: format!("{} for portfolio {}", status, portfolio_id),
            });
        }
        if !status.is_success() {
            return Err(ExternalServiceError::ServiceUnreachable {
                service: SERVICE.to_string(),
                attempts: 1,
                reason: format!("{} for portfolio {}", status, portfolio_id),
            });
        }

        response
            .json::<PortfolioSnapshot>()
            .await
            .map_err(|e| ExternalServiceError::InvalidResponse {
                service: SERVICE.to_string(),
                reason: e.to_string(),
            })
    }
}

#[async_trait]
impl PositionSource for HttpPositionClient {
    async fn portfolio_state(&self, portfolio_id: &str) -> SourceResult<PortfolioSnapshot> {
        retry_with_backoff(&self.retry, SERVICE, || self.fetch(portfolio_id)).await
    }
}
