//! HTTP adapter for the price service, with an injected TTL cache.

use crate::domain::entities::portfolio::PriceSheet;
use crate::domain::errors::ExternalServiceError;
use crate::domain::repositories::{PriceSource, SourceResult};
use crate::infrastructure::resilience::{retry_with_backoff, RetryPolicy};
use crate::infrastructure::ttl_cache::TtlCache;
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

const SERVICE: &str = "price-service";

pub struct HttpPriceClient {
    client: reqwest::Client,
    base_url: String,
    retry: RetryPolicy,
    cache: Arc<TtlCache<String, Decimal>>,
}

impl HttpPriceClient {
    pub fn new(
        base_url: impl Into<String>,
        retry: RetryPolicy,
        cache: Arc<TtlCache<String, Decimal>>,
    ) -> Self {
        HttpPriceClient {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            retry,
            cache,
        }
    }

    async fn fetch(
        &self,
        security_ids: &[String],
    ) -> Result<BTreeMap<String, Decimal>, ExternalServiceError> {
        let url = format!("{}/prices", self.base_url);
        debug!("Fetching {} price(s) from {}", security_ids.len(), url);

        let response = self
            .client
            .get(&url)
            .query(&[("ids", security_ids.join(","))])
            .send()
            .await
            .map_err(|e| ExternalServiceError::ServiceUnreachable {
                service: SERVICE.to_string(),
                attempts: 1,
                reason: e.to_string(),
            })?;

        let status = response.status();
        if status.is_client_error() {
            return Err(ExternalServiceError::ClientError {
                service: SERVICE.to_string(),
                reason: status.to_string(),
            });
        }
        if !status.is_success() {
            return Err(ExternalServiceError::ServiceUnreachable {
                service: SERVICE.to_string(),
                attempts: 1,
                reason: status.to_string(),
            });
        }

        response
            .json::<BTreeMap<String, Decimal>>()
            .await
            .map_err(|e| ExternalServiceError::InvalidResponse {
                service: SERVICE.to_string(),
                reason: e.to_string(),
            })
    }
}

#[async_trait]
impl PriceSource for HttpPriceClient {
    /// Serve cached prices where they are still live and fetch the rest in
    /// one request. Only strictly positive prices enter the cache.
    async fn prices(&self, security_ids: &[String]) -> SourceResult<PriceSheet> {
        let mut sheet = BTreeMap::new();
        let mut missing = Vec::new();
        for id in security_ids {
            match self.cache.get(id) {
                Some(price) => {
                    sheet.insert(id.clone(), price);
                }
                None => missing.push(id.clone()),
            }
        }

        if !missing.is_empty() {
            let fetched =
                retry_with_backoff(&self.retry, SERVICE, || self.fetch(&missing)).await?;
            for id in &missing {
                match fetched.get(id) {
                    Some(price) if *price > Decimal::ZERO => {
                        self.cache.insert(id.clone(), *price);
                        sheet.insert(id.clone(), *price);
                    }
                    Some(price) => {
                        return Err(ExternalServiceError::InvalidResponse {
                            service: SERVICE.to_string(),
                            reason: format!("non-positive price {} for security {}", price, id),
                        })
                    }
                    None => {
                        return Err(ExternalServiceError::InvalidResponse {
                            service: SERVICE.to_string(),
                            reason: format!("missing price for security {}", id),
                        })
                    }
                }
            }
        }

        Ok(PriceSheet::new(sheet))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{routing::get, Json, Router};
    use rust_decimal::dec;
    use std::future::IntoFuture;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn sec(c: char) -> String {
        std::iter::repeat(c).take(24).collect()
    }

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(axum::serve(listener, router).into_future());
        format!("http://{}", addr)
    }

    fn policy() -> RetryPolicy {
        RetryPolicy::new(2, Duration::from_millis(1))
    }

    fn cache() -> Arc<TtlCache<String, Decimal>> {
        Arc::new(TtlCache::new(Duration::from_secs(60), 16))
    }

    fn price_router(hits: Arc<AtomicUsize>) -> Router {
        Router::new().route(
            "/prices",
            get(move || {
                hits.fetch_add(1, Ordering::SeqCst);
                async {
                    let mut prices = BTreeMap::new();
                    prices.insert(sec('a'), dec!(50.10));
                    prices.insert(sec('b'), dec!(25));
                    Json(prices)
                }
            }),
        )
    }

    #[tokio::test]
    async fn test_fetches_and_caches_prices() {
        let hits = Arc::new(AtomicUsize::new(0));
        let base = serve(price_router(hits.clone())).await;
        let client = HttpPriceClient::new(base, policy(), cache());

        let universe = vec![sec('a'), sec('b')];
        let sheet = client.prices(&universe).await.unwrap();
        assert_eq!(sheet.price(&sec('a')), Some(dec!(50.10)));
        assert_eq!(sheet.price(&sec('b')), Some(dec!(25)));
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        // Second call is served from the cache
        let sheet = client.prices(&universe).await.unwrap();
        assert_eq!(sheet.len(), 2);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_missing_price_is_invalid_response() {
        let hits = Arc::new(AtomicUsize::new(0));
        let base = serve(price_router(hits)).await;
        let client = HttpPriceClient::new(base, policy(), cache());

        let err = client.prices(&[sec('z')]).await.unwrap_err();
        assert!(matches!(err, ExternalServiceError::InvalidResponse { .. }));
    }

    #[tokio::test]
    async fn test_non_positive_price_rejected_and_not_cached() {
        let router = Router::new().route(
            "/prices",
            get(|| async {
                let mut prices = BTreeMap::new();
                prices.insert(sec('a'), dec!(0));
                Json(prices)
            }),
        );
        let base = serve(router).await;
        let shared_cache = cache();
        let client = HttpPriceClient::new(base, policy(), shared_cache.clone());

        let err = client.prices(&[sec('a')]).await.unwrap_err();
        assert!(matches!(err, ExternalServiceError::InvalidResponse { .. }));
        assert!(shared_cache.is_empty());
    }

    #[tokio::test]
    async fn test_client_error_not_retried() {
        let hits = Arc::new(AtomicUsize::new(0));
        let hits_handler = hits.clone();
        let router = Router::new().route(
            "/prices",
            get(move || {
                hits_handler.fetch_add(1, Ordering::SeqCst);
                async { axum::http::StatusCode::BAD_REQUEST }
            }),
        );
        let base = serve(router).await;
        let client = HttpPriceClient::new(base, policy(), cache());

        let err = client.prices(&[sec('a')]).await.unwrap_err();
        assert!(matches!(err, ExternalServiceError::ClientError { .. }));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
