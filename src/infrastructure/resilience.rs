//! Retry with exponential backoff for external collaborators.
//!
//! Only transient failures are retried; a collaborator that rejected the
//! request outright would reject the identical retry too.

use crate::config::RebalanceConfig;
use crate::domain::errors::ExternalServiceError;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(attempts: u32, base_delay: Duration) -> Self {
        RetryPolicy {
            attempts: attempts.max(1),
            base_delay,
        }
    }

    pub fn from_config(config: &RebalanceConfig) -> Self {
        RetryPolicy::new(
            config.external_retry_attempts,
            Duration::from_secs(config.external_retry_base_delay_seconds),
        )
    }
}

/// Run `operation` up to `policy.attempts` times, doubling the delay after
/// each transient failure. The final error carries the true attempt count.
pub async fn retry_with_backoff<T, F, Fut>(
    policy: &RetryPolicy,
    service: &str,
    mut operation: F,
) -> Result<T, ExternalServiceError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ExternalServiceError>>,
{
    let mut delay = policy.base_delay;
    let mut attempt = 1u32;

    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt < policy.attempts => {
                warn!(
                    "{} attempt {}/{} failed: {}, retrying in {:?}",
                    service, attempt, policy.attempts, e, delay
                );
                tokio::time::sleep(delay).await;
                delay *= 2;
                attempt += 1;
            }
            Err(ExternalServiceError::ServiceUnreachable {
                service, reason, ..
            }) => {
                return Err(ExternalServiceError::ServiceUnreachable {
                    service,
                    attempts: attempt,
                    reason,
                })
            }
            Err(e) => return Err(e),
        }
    }
}
